use super::{CodecId, Compressor};
use crate::error::Result;
use std::io::{Read, Write};

/// Codec 0: block payloads are the plaintext itself.
pub struct Identity;

impl Compressor for Identity {
    fn id(&self) -> CodecId {
        CodecId::Store
    }

    fn compress(&self, src: &mut dyn Read, dst: &mut dyn Write, _level: i32) -> Result<u64> {
        let n = std::io::copy(src, dst)?;
        Ok(n)
    }

    fn decompress(&self, src: &mut dyn Read, dst: &mut dyn Write) -> Result<u64> {
        let n = std::io::copy(src, dst)?;
        Ok(n)
    }
}
