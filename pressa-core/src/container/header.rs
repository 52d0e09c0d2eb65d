use std::io::{Read, Write};

use crate::codec::CodecId;
use crate::error::{PressaError, Result};
use crate::util::buf::read_full;

pub const MAGIC: &[u8; 4] = b"PRZF";
pub const VERSION: u16 = 1;
pub const HEADER_LEN: u64 = 16;
/// Upper bound accepted for `block_size` (and thus any block's `u_len`).
pub const MAX_BLOCK_SIZE: u32 = 64 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: u16,
    pub codec: CodecId,
    pub level: i8,
    pub block_size: u32,
    pub flags: u8,
}

impl FrameHeader {
    pub fn new(codec: CodecId, level: i32, block_size: u32) -> Self {
        Self {
            version: VERSION,
            codec,
            level: level.clamp(i8::MIN as i32, i8::MAX as i32) as i8,
            block_size,
            flags: 0,
        }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN as usize] {
        let mut b = [0u8; HEADER_LEN as usize];
        b[0..4].copy_from_slice(MAGIC);
        b[4..6].copy_from_slice(&self.version.to_le_bytes());
        b[6] = self.codec as u8;
        b[7] = self.level as u8;
        b[8..12].copy_from_slice(&self.block_size.to_le_bytes());
        b[12] = self.flags;
        // [13..16] reserved
        b
    }

    pub fn write_to(&self, mut w: impl Write) -> std::io::Result<()> {
        w.write_all(&self.to_bytes())
    }

    /// A missing or short header is a corrupt stream, not a truncated one:
    /// without it nothing about the expected length is known.
    pub fn read_from(mut r: impl Read) -> Result<Self> {
        let mut b = [0u8; HEADER_LEN as usize];
        let n = read_full(&mut r, &mut b)?;
        if n < b.len() {
            return Err(PressaError::corrupt(format!(
                "frame header needs {HEADER_LEN} bytes, got {n}"
            )));
        }
        Self::parse(&b)
    }

    pub fn parse(b: &[u8]) -> Result<Self> {
        if b.len() < HEADER_LEN as usize || &b[0..4] != MAGIC {
            return Err(PressaError::corrupt("missing frame header"));
        }
        let version = u16::from_le_bytes([b[4], b[5]]);
        if version != VERSION {
            return Err(PressaError::corrupt(format!("unsupported frame version {version}")));
        }
        let codec = CodecId::from_u8(b[6])
            .ok_or_else(|| PressaError::corrupt(format!("unknown codec id {}", b[6])))?;
        let block_size = u32::from_le_bytes([b[8], b[9], b[10], b[11]]);
        if block_size == 0 || block_size > MAX_BLOCK_SIZE {
            return Err(PressaError::corrupt(format!("bad block size {block_size}")));
        }
        Ok(Self {
            version,
            codec,
            level: b[7] as i8,
            block_size,
            flags: b[12],
        })
    }

    /// Cheap check used by the sniffer and store recovery.
    pub fn looks_like_frame(prefix: &[u8]) -> bool {
        prefix.starts_with(MAGIC)
    }
}
