//! Format sniffing over a byte prefix.
//!
//! `classify` never fails: anything it cannot place comes back as
//! `application/octet-stream` with a low confidence.

use serde::{Deserialize, Serialize};

use crate::codec::CodecId;
use crate::container::header::FrameHeader;

/// Bytes of a file the sniffer looks at by default.
pub const DEFAULT_SNIFF_LEN: usize = 8192;

pub const GENERIC_MIME: &str = "application/octet-stream";
pub const GENERIC_CONFIDENCE: f32 = 0.1;
pub const FRAME_MIME: &str = "application/x-pressa-frame";

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatClass {
    Text,
    /// Uncompressed pixel data (PPM, BMP, TIFF).
    RawPixels,
    /// Already-compressed still images.
    Image,
    Media,
    Archive,
    Document,
    Binary,
    /// One of our own frames.
    Frame,
    Unknown,
}

impl FormatClass {
    pub fn as_str(self) -> &'static str {
        match self {
            FormatClass::Text => "text",
            FormatClass::RawPixels => "raw_pixels",
            FormatClass::Image => "image",
            FormatClass::Media => "media",
            FormatClass::Archive => "archive",
            FormatClass::Document => "document",
            FormatClass::Binary => "binary",
            FormatClass::Frame => "frame",
            FormatClass::Unknown => "unknown",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FormatGuess {
    pub mime_type: String,
    pub confidence: f32,
    pub class: FormatClass,
}

impl FormatGuess {
    fn new(mime_type: &str, confidence: f32, class: FormatClass) -> Self {
        Self {
            mime_type: mime_type.to_string(),
            confidence,
            class,
        }
    }

    pub fn generic() -> Self {
        Self::new(GENERIC_MIME, GENERIC_CONFIDENCE, FormatClass::Unknown)
    }

    /// Content that a general-purpose codec will not shrink further.
    pub fn is_opaque(&self) -> bool {
        matches!(
            self.class,
            FormatClass::Image | FormatClass::Media | FormatClass::Archive | FormatClass::Frame
        )
    }

    pub fn recommended_codec(&self) -> Option<CodecId> {
        if self.is_opaque() {
            return None;
        }
        match self.class {
            FormatClass::RawPixels => Some(CodecId::Qoi),
            _ => Some(CodecId::Zstd),
        }
    }
}

struct Magic {
    offset: usize,
    bytes: &'static [u8],
    mime: &'static str,
    class: FormatClass,
    confidence: f32,
}

const fn magic(
    offset: usize,
    bytes: &'static [u8],
    mime: &'static str,
    class: FormatClass,
    confidence: f32,
) -> Magic {
    Magic {
        offset,
        bytes,
        mime,
        class,
        confidence,
    }
}

use FormatClass::*;

// Longer signatures first; short ones only match when nothing better did.
static MAGICS: &[Magic] = &[
    magic(0, b"\x89PNG\r\n\x1a\n", "image/png", Image, 0.99),
    magic(0, b"SQLite format 3\0", "application/vnd.sqlite3", Document, 0.99),
    magic(0, b"7z\xbc\xaf\x27\x1c", "application/x-7z-compressed", Archive, 0.99),
    magic(0, b"\xfd7zXZ\0", "application/x-xz", Archive, 0.99),
    magic(0, b"Rar!\x1a\x07", "application/vnd.rar", Archive, 0.99),
    magic(0, b"GIF87a", "image/gif", Image, 0.99),
    magic(0, b"GIF89a", "image/gif", Image, 0.99),
    magic(0, b"%PDF-", "application/pdf", Document, 0.98),
    magic(0, b"qoif", "image/qoi", Image, 0.95),
    magic(0, b"\x28\xb5\x2f\xfd", "application/zstd", Archive, 0.95),
    magic(0, b"\x04\x22\x4d\x18", "application/x-lz4", Archive, 0.95),
    magic(0, b"PK\x03\x04", "application/zip", Archive, 0.95),
    magic(0, b"PK\x05\x06", "application/zip", Archive, 0.9),
    magic(0, b"\x1a\x45\xdf\xa3", "video/x-matroska", Media, 0.95),
    magic(0, b"\x7fELF", "application/x-elf", Binary, 0.95),
    magic(0, b"OggS", "audio/ogg", Media, 0.95),
    magic(0, b"fLaC", "audio/flac", Media, 0.95),
    magic(4, b"ftyp", "video/mp4", Media, 0.9),
    magic(0, b"II*\0", "image/tiff", RawPixels, 0.8),
    magic(0, b"MM\0*", "image/tiff", RawPixels, 0.8),
    magic(0, b"ID3", "audio/mpeg", Media, 0.9),
    magic(0, b"BZh", "application/x-bzip2", Archive, 0.8),
    magic(0, b"\xff\xd8\xff", "image/jpeg", Image, 0.95),
    magic(0, b"\x1f\x8b", "application/gzip", Archive, 0.8),
];

/// Classify a file from its first bytes.
pub fn classify(prefix: &[u8]) -> FormatGuess {
    if prefix.is_empty() {
        return FormatGuess::generic();
    }
    if FrameHeader::looks_like_frame(prefix) {
        return FormatGuess::new(FRAME_MIME, 0.99, Frame);
    }
    if let Some(g) = riff(prefix) {
        return g;
    }
    if let Some(m) = MAGICS.iter().find(|m| {
        prefix.len() >= m.offset + m.bytes.len()
            && &prefix[m.offset..m.offset + m.bytes.len()] == m.bytes
    }) {
        return FormatGuess::new(m.mime, m.confidence, m.class);
    }
    if is_bmp(prefix) {
        return FormatGuess::new("image/bmp", 0.8, RawPixels);
    }
    if is_ppm(prefix) {
        return FormatGuess::new("image/x-portable-pixmap", 0.85, RawPixels);
    }
    if is_mp3_frame(prefix) {
        return FormatGuess::new("audio/mpeg", 0.5, Media);
    }
    if let Some(g) = text(prefix) {
        return g;
    }
    FormatGuess::generic()
}

fn riff(p: &[u8]) -> Option<FormatGuess> {
    if p.len() < 12 || &p[0..4] != b"RIFF" {
        return None;
    }
    match &p[8..12] {
        b"WEBP" => Some(FormatGuess::new("image/webp", 0.99, Image)),
        b"WAVE" => Some(FormatGuess::new("audio/wav", 0.99, Media)),
        b"AVI " => Some(FormatGuess::new("video/x-msvideo", 0.99, Media)),
        _ => None,
    }
}

// "BM" alone is too common in text; also require the zeroed reserved words
fn is_bmp(p: &[u8]) -> bool {
    p.len() >= 14 && &p[0..2] == b"BM" && p[6..10] == [0, 0, 0, 0]
}

fn is_ppm(p: &[u8]) -> bool {
    p.len() >= 3 && &p[0..2] == b"P6" && p[2].is_ascii_whitespace()
}

fn is_mp3_frame(p: &[u8]) -> bool {
    p.len() >= 2 && p[0] == 0xff && matches!(p[1], 0xfb | 0xf3 | 0xf2)
}

fn text(p: &[u8]) -> Option<FormatGuess> {
    // a prefix may cut a multi-byte sequence at the very end
    let valid = match std::str::from_utf8(p) {
        Ok(s) => s,
        Err(e) if e.error_len().is_none() => std::str::from_utf8(&p[..e.valid_up_to()]).ok()?,
        Err(_) => return None,
    };
    if valid.is_empty() || valid.contains('\0') {
        return None;
    }
    let control = valid
        .bytes()
        .filter(|&b| b.is_ascii_control() && !matches!(b, b'\t' | b'\n' | b'\r' | 0x0c | 0x1b))
        .count();
    if control * 50 > valid.len() {
        return None;
    }

    let head = valid.trim_start_matches('\u{feff}').trim_start();
    let lower: String = head.chars().take(64).collect::<String>().to_ascii_lowercase();
    let guess = if lower.starts_with("<?xml") {
        FormatGuess::new("application/xml", 0.8, Text)
    } else if lower.starts_with("<!doctype html") || lower.starts_with("<html") {
        FormatGuess::new("text/html", 0.8, Text)
    } else if head.starts_with('{') || head.starts_with('[') {
        FormatGuess::new("application/json", 0.6, Text)
    } else {
        FormatGuess::new("text/plain", 0.7, Text)
    };
    Some(guess)
}
