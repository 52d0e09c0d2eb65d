use crate::codec::{Compressor, get_codec};
use crate::container::block::{BlockHeader, read_exact_or_truncated};
use crate::container::header::FrameHeader;
use crate::container::tail::FrameTail;
use crate::error::{PressaError, Result};
use crate::util::buf::{BoundedWriter, read_full};
use std::io::{Cursor, Read, Write};

/// Streaming frame decoder. Blocks are decoded one at a time; the tail
/// (totals and digest) is checked once the block sequence ends, so the
/// final `read` returning 0 means the whole frame verified.
pub struct FrameReader<R: Read> {
    inner: R,
    header: FrameHeader,
    codec: &'static dyn Compressor,
    cur_buf: Option<Cursor<Vec<u8>>>,
    hasher: blake3::Hasher,
    total_u: u64,
    total_c: u64,
    done: bool,
}

impl<R: Read> FrameReader<R> {
    pub fn new(mut inner: R) -> Result<Self> {
        let header = FrameHeader::read_from(&mut inner)?;
        Ok(Self {
            inner,
            codec: get_codec(header.codec),
            header,
            cur_buf: None,
            hasher: blake3::Hasher::new(),
            total_u: 0,
            total_c: 0,
            done: false,
        })
    }

    pub fn header(&self) -> &FrameHeader {
        &self.header
    }

    fn load_next(&mut self) -> Result<bool> {
        if self.done {
            return Ok(false);
        }
        let bh = BlockHeader::read_from(&mut self.inner)?;
        if bh.is_end() {
            self.finish()?;
            return Ok(false);
        }
        if bh.u_len == 0 || bh.u_len > self.header.block_size {
            return Err(PressaError::corrupt(format!(
                "block length {} outside 1..={}",
                bh.u_len, self.header.block_size
            )));
        }
        if bh.c_len as u64 > max_payload_len(bh.u_len) {
            return Err(PressaError::corrupt(format!(
                "block payload {} too large for {} bytes",
                bh.c_len, bh.u_len
            )));
        }

        let mut payload = vec![0u8; bh.c_len as usize];
        read_exact_or_truncated(&mut self.inner, &mut payload)?;

        // the payload is complete here, so any codec failure is corruption
        let mut sink = BoundedWriter::new(bh.u_len as usize);
        self.codec
            .decompress(&mut payload.as_slice(), &mut sink)
            .map_err(|e| PressaError::corrupt(format!("block decode failed: {e}")))?;
        let plain = sink.into_inner();
        if plain.len() != bh.u_len as usize {
            return Err(PressaError::corrupt(format!(
                "block decoded to {} bytes, header says {}",
                plain.len(),
                bh.u_len
            )));
        }

        self.hasher.update(&plain);
        self.total_u += bh.u_len as u64;
        self.total_c += bh.c_len as u64;
        self.cur_buf = Some(Cursor::new(plain));
        Ok(true)
    }

    fn finish(&mut self) -> Result<()> {
        let tail = FrameTail::read_from(&mut self.inner)?;
        if tail.total_u != self.total_u || tail.total_c != self.total_c {
            return Err(PressaError::corrupt(format!(
                "tail totals {}/{} do not match blocks {}/{}",
                tail.total_u, tail.total_c, self.total_u, self.total_c
            )));
        }
        if &tail.digest != self.hasher.finalize().as_bytes() {
            return Err(PressaError::corrupt("content digest mismatch"));
        }
        let mut extra = [0u8; 1];
        if read_full(&mut self.inner, &mut extra)? != 0 {
            return Err(PressaError::corrupt("trailing bytes after frame tail"));
        }
        self.done = true;
        Ok(())
    }
}

/// Worst-case expansion across the codecs (QOI's RGB op is 4 bytes per 3),
/// plus fixed per-block overhead.
fn max_payload_len(u_len: u32) -> u64 {
    let u = u_len as u64;
    u + u / 2 + 1024
}

impl<R: Read> Read for FrameReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            if let Some(cur) = self.cur_buf.as_mut() {
                let n = cur.read(buf)?;
                if n > 0 {
                    return Ok(n);
                }
                self.cur_buf = None;
            }
            if !self.load_next()? {
                return Ok(0);
            }
        }
    }
}

/// Decode a whole frame from `src` into `dst`; returns bytes produced.
pub fn decode_stream<R: Read, W: Write + ?Sized>(src: R, dst: &mut W) -> Result<u64> {
    let mut reader = FrameReader::new(src)?;
    let n = std::io::copy(&mut reader, dst)?;
    Ok(n)
}

pub fn decode(frame: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(frame.len() * 2);
    decode_stream(frame, &mut out)?;
    Ok(out)
}
