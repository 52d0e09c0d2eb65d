//! QOI ("Quite OK Image") op scheme applied to a byte stream read as RGB pixels.
//!
//! Output is a valid one-row QOI image (`width = pixel count`, `height = 1`,
//! 3 channels) followed by the 0..=2 bytes that did not fill a whole pixel:
//! `[remainder len u8][remainder bytes]`. Alpha is fixed at 255 when encoding;
//! RGBA ops are still understood when decoding.

use super::{CodecId, Compressor};
use crate::error::{PressaError, Result};
use std::io::{Read, Write};

pub const QOI_MAGIC: [u8; 4] = *b"qoif";
pub const QOI_HEADER_SIZE: usize = 14;
pub const QOI_END_MARK: [u8; 8] = [0, 0, 0, 0, 0, 0, 0, 1];
const CHANNELS: u8 = 3;
const COLORSPACE_SRGB: u8 = 0;

const OP_INDEX: u8 = 0b0000_0000;
const OP_DIFF: u8 = 0b0100_0000;
const OP_LUMA: u8 = 0b1000_0000;
const OP_RUN: u8 = 0b1100_0000;
const OP_RGB: u8 = 0b1111_1110;
const OP_RGBA: u8 = 0b1111_1111;
const MASK_2: u8 = 0b1100_0000;
const MAX_RUN: u8 = 62;
/// Decoded pixels are flushed to the writer in pieces of this size.
const DECODE_CHUNK: usize = 64 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Pixel {
    r: u8,
    g: u8,
    b: u8,
    a: u8,
}

impl Pixel {
    const START: Pixel = Pixel {
        r: 0,
        g: 0,
        b: 0,
        a: 255,
    };
    const ZERO: Pixel = Pixel {
        r: 0,
        g: 0,
        b: 0,
        a: 0,
    };

    fn index_pos(self) -> usize {
        (self.r as usize * 3 + self.g as usize * 5 + self.b as usize * 7 + self.a as usize * 11) % 64
    }
}

pub struct QoiCompressor;

impl Compressor for QoiCompressor {
    fn id(&self) -> CodecId {
        CodecId::Qoi
    }

    fn compress(&self, src: &mut dyn Read, dst: &mut dyn Write, _level: i32) -> Result<u64> {
        let mut input = Vec::new();
        src.read_to_end(&mut input)?;
        let out = encode_pixels(&input)?;
        dst.write_all(&out)?;
        Ok(input.len() as u64)
    }

    fn decompress(&self, src: &mut dyn Read, dst: &mut dyn Write) -> Result<u64> {
        let mut input = Vec::new();
        src.read_to_end(&mut input)?;
        decode_pixels_into(&input, dst)
    }

    fn block_align(&self) -> usize {
        CHANNELS as usize
    }
}

fn encode_pixels(data: &[u8]) -> Result<Vec<u8>> {
    let px_count = data.len() / CHANNELS as usize;
    let width = u32::try_from(px_count)
        .map_err(|_| PressaError::Config("qoi block exceeds u32::MAX pixels".into()))?;
    let remainder = &data[px_count * CHANNELS as usize..];

    // worst case: one RGB op per pixel
    let mut out = Vec::with_capacity(QOI_HEADER_SIZE + px_count * 4 + QOI_END_MARK.len() + 3);
    out.extend_from_slice(&QOI_MAGIC);
    out.extend_from_slice(&width.to_be_bytes());
    out.extend_from_slice(&1u32.to_be_bytes());
    out.push(CHANNELS);
    out.push(COLORSPACE_SRGB);

    let mut index = [Pixel::ZERO; 64];
    let mut prev = Pixel::START;
    let mut run: u8 = 0;

    for chunk in data.chunks_exact(CHANNELS as usize) {
        let px = Pixel {
            r: chunk[0],
            g: chunk[1],
            b: chunk[2],
            a: 255,
        };

        if px == prev {
            run += 1;
            if run == MAX_RUN {
                out.push(OP_RUN | (run - 1));
                run = 0;
            }
            continue;
        }

        if run > 0 {
            out.push(OP_RUN | (run - 1));
            run = 0;
        }

        let pos = px.index_pos();
        if index[pos] == px {
            out.push(OP_INDEX | pos as u8);
        } else {
            index[pos] = px;

            let dr = px.r.wrapping_sub(prev.r) as i8;
            let dg = px.g.wrapping_sub(prev.g) as i8;
            let db = px.b.wrapping_sub(prev.b) as i8;
            let dr_dg = dr.wrapping_sub(dg);
            let db_dg = db.wrapping_sub(dg);

            if (-2..=1).contains(&dr) && (-2..=1).contains(&dg) && (-2..=1).contains(&db) {
                out.push(OP_DIFF | ((dr + 2) as u8) << 4 | ((dg + 2) as u8) << 2 | (db + 2) as u8);
            } else if (-32..=31).contains(&dg)
                && (-8..=7).contains(&dr_dg)
                && (-8..=7).contains(&db_dg)
            {
                out.push(OP_LUMA | (dg + 32) as u8);
                out.push(((dr_dg + 8) as u8) << 4 | (db_dg + 8) as u8);
            } else {
                out.extend_from_slice(&[OP_RGB, px.r, px.g, px.b]);
            }
        }
        prev = px;
    }
    if run > 0 {
        out.push(OP_RUN | (run - 1));
    }

    out.extend_from_slice(&QOI_END_MARK);
    out.push(remainder.len() as u8);
    out.extend_from_slice(remainder);
    Ok(out)
}

struct ByteCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let available = self.buf.len() - self.pos;
        if available < n {
            return Err(PressaError::TruncatedInput {
                expected: n as u64,
                available: available as u64,
            });
        }
        let s = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    fn byte(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32_be(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }
}

#[cfg(test)]
fn decode_pixels(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    decode_pixels_into(data, &mut out)?;
    Ok(out)
}

/// Decode `data` into `dst`, writing as it goes so output size is bounded by
/// what the writer accepts, not by the header's claimed dimensions.
fn decode_pixels_into(data: &[u8], dst: &mut dyn Write) -> Result<u64> {
    let mut cur = ByteCursor { buf: data, pos: 0 };
    if cur.take(4)? != QOI_MAGIC {
        return Err(PressaError::corrupt("qoi: bad magic"));
    }
    let width = cur.u32_be()? as u64;
    let height = cur.u32_be()? as u64;
    let channels = cur.byte()?;
    let _colorspace = cur.byte()?;
    if channels != 3 && channels != 4 {
        return Err(PressaError::corrupt(format!("qoi: {channels} channels")));
    }
    let px_count = width
        .checked_mul(height)
        .ok_or_else(|| PressaError::corrupt("qoi: dimensions overflow"))?;
    // every pixel costs at least 1/62 of an op byte; reject headers the body cannot back
    let body_len = data.len().saturating_sub(QOI_HEADER_SIZE) as u64;
    if px_count > body_len.saturating_mul(MAX_RUN as u64) {
        return Err(PressaError::corrupt("qoi: pixel count exceeds body"));
    }

    let mut out = Vec::with_capacity(DECODE_CHUNK);
    let mut written = 0u64;
    let mut index = [Pixel::ZERO; 64];
    let mut px = Pixel::START;
    let mut run: u8 = 0;

    for _ in 0..px_count {
        if run > 0 {
            run -= 1;
        } else {
            let b1 = cur.byte()?;
            if b1 == OP_RGB {
                let c = cur.take(3)?;
                px.r = c[0];
                px.g = c[1];
                px.b = c[2];
            } else if b1 == OP_RGBA {
                let c = cur.take(4)?;
                px = Pixel {
                    r: c[0],
                    g: c[1],
                    b: c[2],
                    a: c[3],
                };
            } else {
                match b1 & MASK_2 {
                    OP_INDEX => px = index[(b1 & 0x3f) as usize],
                    OP_DIFF => {
                        px.r = px.r.wrapping_add((b1 >> 4) & 0x03).wrapping_sub(2);
                        px.g = px.g.wrapping_add((b1 >> 2) & 0x03).wrapping_sub(2);
                        px.b = px.b.wrapping_add(b1 & 0x03).wrapping_sub(2);
                    }
                    OP_LUMA => {
                        let b2 = cur.byte()?;
                        let vg = (b1 & 0x3f).wrapping_sub(32);
                        px.r = px.r.wrapping_add(vg.wrapping_sub(8).wrapping_add((b2 >> 4) & 0x0f));
                        px.g = px.g.wrapping_add(vg);
                        px.b = px.b.wrapping_add(vg.wrapping_sub(8).wrapping_add(b2 & 0x0f));
                    }
                    _ => run = b1 & 0x3f,
                }
            }
            index[px.index_pos()] = px;
        }
        out.extend_from_slice(&[px.r, px.g, px.b]);
        if out.len() >= DECODE_CHUNK {
            dst.write_all(&out)?;
            written += out.len() as u64;
            out.clear();
        }
    }

    if cur.take(QOI_END_MARK.len())? != QOI_END_MARK {
        return Err(PressaError::corrupt("qoi: missing end mark"));
    }
    let rem_len = cur.byte()? as usize;
    if rem_len >= CHANNELS as usize {
        return Err(PressaError::corrupt("qoi: bad remainder length"));
    }
    out.extend_from_slice(cur.take(rem_len)?);
    if cur.pos != data.len() {
        return Err(PressaError::corrupt("qoi: trailing bytes"));
    }
    dst.write_all(&out)?;
    Ok(written + out.len() as u64)
}
