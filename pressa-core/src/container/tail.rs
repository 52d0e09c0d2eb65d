use std::io::{Read, Write};

use crate::container::block::read_exact_or_truncated;
use crate::error::{PressaError, Result};

pub const TAIL_MAGIC: [u8; 8] = *b"PRZTAIL\0";
pub const TAIL_LEN: u64 = 56;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameTail {
    pub total_u: u64,
    /// Sum of block payload lengths (excludes header, block headers and tail).
    pub total_c: u64,
    pub digest: [u8; 32],
}

impl FrameTail {
    pub fn to_bytes(&self) -> [u8; TAIL_LEN as usize] {
        let mut b = [0u8; TAIL_LEN as usize];
        b[0..8].copy_from_slice(&TAIL_MAGIC);
        b[8..16].copy_from_slice(&self.total_u.to_le_bytes());
        b[16..24].copy_from_slice(&self.total_c.to_le_bytes());
        b[24..56].copy_from_slice(&self.digest);
        b
    }

    pub fn write_to<W: Write>(&self, mut w: W) -> std::io::Result<()> {
        w.write_all(&self.to_bytes())
    }

    pub fn read_from<R: Read>(mut r: R) -> Result<Self> {
        let mut b = [0u8; TAIL_LEN as usize];
        read_exact_or_truncated(&mut r, &mut b)?;
        if b[0..8] != TAIL_MAGIC {
            return Err(PressaError::corrupt("bad tail magic"));
        }
        let mut t = FrameTail::default();
        t.total_u = u64::from_le_bytes(b[8..16].try_into().unwrap_or_default());
        t.total_c = u64::from_le_bytes(b[16..24].try_into().unwrap_or_default());
        t.digest.copy_from_slice(&b[24..56]);
        Ok(t)
    }
}
