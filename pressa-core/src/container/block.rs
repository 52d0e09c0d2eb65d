use std::io::Read;

use crate::error::{PressaError, Result};
use crate::util::buf::read_full;

pub const BLOCK_HEADER_LEN: usize = 8;

/// `u_len = c_len = 0` terminates the block sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub u_len: u32,
    pub c_len: u32,
}

impl BlockHeader {
    pub const END: BlockHeader = BlockHeader { u_len: 0, c_len: 0 };

    pub fn is_end(&self) -> bool {
        *self == Self::END
    }

    pub fn to_bytes(&self) -> [u8; BLOCK_HEADER_LEN] {
        let mut b = [0u8; BLOCK_HEADER_LEN];
        b[0..4].copy_from_slice(&self.u_len.to_le_bytes());
        b[4..8].copy_from_slice(&self.c_len.to_le_bytes());
        b
    }

    pub fn read_from(mut r: impl Read) -> Result<Self> {
        let mut b = [0u8; BLOCK_HEADER_LEN];
        read_exact_or_truncated(&mut r, &mut b)?;
        Ok(Self {
            u_len: u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
            c_len: u32::from_le_bytes([b[4], b[5], b[6], b[7]]),
        })
    }
}

/// Like `read_exact`, but an early EOF becomes `TruncatedInput`.
pub fn read_exact_or_truncated(r: &mut impl Read, buf: &mut [u8]) -> Result<()> {
    let n = read_full(r, buf)?;
    if n < buf.len() {
        return Err(PressaError::TruncatedInput {
            expected: buf.len() as u64,
            available: n as u64,
        });
    }
    Ok(())
}
