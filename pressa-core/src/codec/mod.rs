use crate::error::{PressaError, Result};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::str::FromStr;

#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecId {
    Store = 0,
    Zstd = 1,
    Lz4 = 2,
    Qoi = 3,
}

impl CodecId {
    pub fn from_u8(b: u8) -> Option<Self> {
        DESCRIPTORS.iter().map(|d| d.id).find(|id| *id as u8 == b)
    }

    pub fn descriptor(self) -> &'static CodecDescriptor {
        &DESCRIPTORS[self as usize]
    }

    pub fn name(self) -> &'static str {
        self.descriptor().name
    }
}

impl std::fmt::Display for CodecId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CodecId {
    type Err = PressaError;
    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        DESCRIPTORS
            .iter()
            .find(|d| d.name == wanted)
            .map(|d| d.id)
            .ok_or_else(|| PressaError::Config(format!("unknown codec: {s}")))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct CodecDescriptor {
    pub id: CodecId,
    pub name: &'static str,
    pub supports_streaming: bool,
    pub is_lossless: bool,
}

/// Indexed by `CodecId as usize`.
pub const DESCRIPTORS: [CodecDescriptor; 4] = [
    CodecDescriptor {
        id: CodecId::Store,
        name: "store",
        supports_streaming: true,
        is_lossless: true,
    },
    CodecDescriptor {
        id: CodecId::Zstd,
        name: "zstd",
        supports_streaming: true,
        is_lossless: true,
    },
    CodecDescriptor {
        id: CodecId::Lz4,
        name: "lz4",
        supports_streaming: true,
        is_lossless: true,
    },
    CodecDescriptor {
        id: CodecId::Qoi,
        name: "qoi",
        supports_streaming: false,
        is_lossless: true,
    },
];

pub trait Compressor: Send + Sync {
    fn id(&self) -> CodecId;
    fn compress(&self, src: &mut dyn Read, dst: &mut dyn Write, level: i32) -> Result<u64>;
    fn decompress(&self, src: &mut dyn Read, dst: &mut dyn Write) -> Result<u64>;

    /// Frame block sizes are rounded down to a multiple of this.
    fn block_align(&self) -> usize {
        1
    }
}

pub fn get_codec(id: CodecId) -> &'static dyn Compressor {
    match id {
        CodecId::Store => &identity::Identity,
        CodecId::Zstd => &zstdc::ZstdCompressor,
        CodecId::Lz4 => &lz4c::Lz4Compressor,
        CodecId::Qoi => &qoi::QoiCompressor,
    }
}

pub fn get_codec_u8(b: u8) -> Result<&'static dyn Compressor> {
    CodecId::from_u8(b)
        .map(get_codec)
        .ok_or_else(|| PressaError::corrupt(format!("unknown codec id {b}")))
}

pub mod identity;
pub mod lz4c;
pub mod qoi;
pub mod zstdc;
