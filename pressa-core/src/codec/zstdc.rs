use super::{CodecId, Compressor};
use crate::error::Result;
use std::io::{Read, Write};

pub struct ZstdCompressor;

impl ZstdCompressor {
    fn clamp_level(level: i32) -> i32 {
        let range = zstd::compression_level_range();
        level.clamp(1, *range.end())
    }
}

impl Compressor for ZstdCompressor {
    fn id(&self) -> CodecId {
        CodecId::Zstd
    }

    fn compress(&self, src: &mut dyn Read, dst: &mut dyn Write, level: i32) -> Result<u64> {
        // single-threaded: frames must be byte-identical across runs
        let mut enc = zstd::stream::Encoder::new(dst, Self::clamp_level(level))?;
        let consumed = std::io::copy(src, &mut enc)?;
        enc.finish()?;
        Ok(consumed)
    }

    fn decompress(&self, src: &mut dyn Read, dst: &mut dyn Write) -> Result<u64> {
        let mut dec = zstd::stream::Decoder::new(src)?;
        let produced = std::io::copy(&mut dec, dst)?;
        Ok(produced)
    }
}
