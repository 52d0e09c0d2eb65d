use super::{CodecId, Compressor};
use crate::error::Result;
use std::io::{Read, Write};

/// LZ4 frame format; the level argument has no effect.
pub struct Lz4Compressor;

impl Compressor for Lz4Compressor {
    fn id(&self) -> CodecId {
        CodecId::Lz4
    }

    fn compress(&self, src: &mut dyn Read, dst: &mut dyn Write, _level: i32) -> Result<u64> {
        let mut enc = lz4_flex::frame::FrameEncoder::new(dst);
        let consumed = std::io::copy(src, &mut enc)?;
        enc.finish()
            .map_err(std::io::Error::other)?;
        Ok(consumed)
    }

    fn decompress(&self, src: &mut dyn Read, dst: &mut dyn Write) -> Result<u64> {
        let mut dec = lz4_flex::frame::FrameDecoder::new(src);
        let produced = std::io::copy(&mut dec, dst)?;
        Ok(produced)
    }
}
