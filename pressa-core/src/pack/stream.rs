use std::io::Write;

use crate::codec::{CodecId, Compressor, get_codec};
use crate::container::block::BlockHeader;
use crate::container::header::{FrameHeader, HEADER_LEN, MAX_BLOCK_SIZE};
use crate::container::tail::{FrameTail, TAIL_LEN};
use crate::error::{PressaError, Result};

pub const DEFAULT_BLOCK_SIZE: usize = 1024 * 1024;

#[derive(Clone, Copy, Debug)]
pub struct EncodeOptions {
    pub codec: CodecId,
    pub level: i32,
    pub block_size: usize,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            codec: CodecId::Zstd,
            level: 3,
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameSummary {
    pub total_u: u64,
    /// Full frame length on the wire: header, blocks and tail.
    pub frame_len: u64,
    pub digest: [u8; 32],
}

/// Cuts input into blocks and compresses each independently; shared by
/// `FrameWriter` (push) and `EncodeChunks` (pull).
struct BlockEncoder {
    codec: &'static dyn Compressor,
    header: FrameHeader,
    block_size: usize,
    pending: Vec<u8>,
    hasher: blake3::Hasher,
    total_u: u64,
    total_c: u64,
    frame_len: u64,
}

impl BlockEncoder {
    fn new(opts: EncodeOptions) -> Result<Self> {
        let codec = get_codec(opts.codec);
        let align = codec.block_align();
        let block_size = opts.block_size.min(MAX_BLOCK_SIZE as usize) / align * align;
        if block_size == 0 {
            return Err(PressaError::Config(format!(
                "block size {} too small for {}",
                opts.block_size, opts.codec
            )));
        }
        Ok(Self {
            codec,
            header: FrameHeader::new(opts.codec, opts.level, block_size as u32),
            block_size,
            pending: Vec::with_capacity(block_size),
            hasher: blake3::Hasher::new(),
            total_u: 0,
            total_c: 0,
            frame_len: 0,
        })
    }

    fn start(&mut self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.header.to_bytes());
        self.frame_len = HEADER_LEN;
    }

    fn push(&mut self, mut data: &[u8], out: &mut Vec<u8>) -> Result<()> {
        while !data.is_empty() {
            let room = self.block_size - self.pending.len();
            let take = room.min(data.len());
            self.pending.extend_from_slice(&data[..take]);
            data = &data[take..];
            if self.pending.len() == self.block_size {
                self.seal_block(out)?;
            }
        }
        Ok(())
    }

    fn seal_block(&mut self, out: &mut Vec<u8>) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let mut body = Vec::with_capacity(self.pending.len() / 2 + 64);
        self.codec
            .compress(&mut self.pending.as_slice(), &mut body, self.header.level as i32)?;
        let c_len = u32::try_from(body.len())
            .map_err(|_| PressaError::Config("compressed block exceeds u32::MAX".into()))?;
        let bh = BlockHeader {
            u_len: self.pending.len() as u32,
            c_len,
        };
        out.extend_from_slice(&bh.to_bytes());
        out.extend_from_slice(&body);

        self.hasher.update(&self.pending);
        self.total_u += self.pending.len() as u64;
        self.total_c += body.len() as u64;
        self.frame_len += (bh.to_bytes().len() + body.len()) as u64;
        self.pending.clear();
        Ok(())
    }

    fn finish(&mut self, out: &mut Vec<u8>) -> Result<FrameSummary> {
        self.seal_block(out)?;
        out.extend_from_slice(&BlockHeader::END.to_bytes());
        let digest = *self.hasher.finalize().as_bytes();
        let tail = FrameTail {
            total_u: self.total_u,
            total_c: self.total_c,
            digest,
        };
        out.extend_from_slice(&tail.to_bytes());
        self.frame_len += BlockHeader::END.to_bytes().len() as u64 + TAIL_LEN;
        Ok(FrameSummary {
            total_u: self.total_u,
            frame_len: self.frame_len,
            digest,
        })
    }
}

/// Push-style encoder: write plaintext in, frame bytes go to `inner`.
pub struct FrameWriter<W: Write> {
    inner: W,
    enc: BlockEncoder,
    scratch: Vec<u8>,
}

impl<W: Write> FrameWriter<W> {
    pub fn new(mut inner: W, opts: EncodeOptions) -> Result<Self> {
        let mut enc = BlockEncoder::new(opts)?;
        let mut scratch = Vec::new();
        enc.start(&mut scratch);
        inner.write_all(&scratch)?;
        scratch.clear();
        Ok(Self {
            inner,
            enc,
            scratch,
        })
    }

    pub fn finish(mut self) -> Result<(W, FrameSummary)> {
        let summary = self.enc.finish(&mut self.scratch)?;
        self.inner.write_all(&self.scratch)?;
        self.inner.flush()?;
        Ok((self.inner, summary))
    }
}

impl<W: Write> Write for FrameWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.enc.push(buf, &mut self.scratch)?;
        if !self.scratch.is_empty() {
            self.inner.write_all(&self.scratch)?;
            self.scratch.clear();
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

/// Pull-style encoder over a sequence of plaintext chunks. Yields the header,
/// then encoded blocks as they fill, then the closing block and tail. Single
/// pass; dropping it early simply stops the work.
pub struct EncodeChunks<I> {
    chunks: I,
    enc: BlockEncoder,
    started: bool,
    finished: bool,
    summary: Option<FrameSummary>,
}

pub fn encode_chunks<I>(chunks: I, opts: EncodeOptions) -> Result<EncodeChunks<I::IntoIter>>
where
    I: IntoIterator,
    I::Item: AsRef<[u8]>,
{
    Ok(EncodeChunks {
        chunks: chunks.into_iter(),
        enc: BlockEncoder::new(opts)?,
        started: false,
        finished: false,
        summary: None,
    })
}

impl<I> EncodeChunks<I> {
    /// Available once the iterator has been drained.
    pub fn summary(&self) -> Option<FrameSummary> {
        self.summary
    }
}

impl<I> Iterator for EncodeChunks<I>
where
    I: Iterator,
    I::Item: AsRef<[u8]>,
{
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let mut out = Vec::new();
        if !self.started {
            self.started = true;
            self.enc.start(&mut out);
            return Some(Ok(out));
        }
        loop {
            match self.chunks.next() {
                Some(chunk) => {
                    if let Err(e) = self.enc.push(chunk.as_ref(), &mut out) {
                        self.finished = true;
                        return Some(Err(e));
                    }
                    if !out.is_empty() {
                        return Some(Ok(out));
                    }
                }
                None => {
                    self.finished = true;
                    return Some(self.enc.finish(&mut out).map(|s| {
                        self.summary = Some(s);
                        out
                    }));
                }
            }
        }
    }
}

/// One-shot encode with the default block size.
pub fn encode(data: &[u8], codec: CodecId, level: i32) -> Result<Vec<u8>> {
    let opts = EncodeOptions {
        codec,
        level,
        ..Default::default()
    };
    let mut w = FrameWriter::new(Vec::with_capacity(data.len() / 2 + 128), opts)?;
    w.write_all(data)?;
    let (out, _) = w.finish()?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::header::FrameHeader;

    #[test]
    fn empty_input_is_header_end_and_tail() {
        let out = encode(&[], CodecId::Zstd, 3).unwrap();
        assert_eq!(out.len() as u64, HEADER_LEN + 8 + TAIL_LEN);
        assert!(FrameHeader::looks_like_frame(&out));
    }

    #[test]
    fn encoding_is_deterministic() {
        let data: Vec<u8> = (0..50_000u32).map(|i| (i % 97) as u8).collect();
        for codec in [CodecId::Store, CodecId::Zstd, CodecId::Lz4, CodecId::Qoi] {
            assert_eq!(encode(&data, codec, 5).unwrap(), encode(&data, codec, 5).unwrap());
        }
    }

    #[test]
    fn chunk_iterator_matches_writer_output() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i * 7 % 13) as u8).collect();
        let opts = EncodeOptions {
            codec: CodecId::Lz4,
            level: 0,
            block_size: 4096,
        };
        let mut w = FrameWriter::new(Vec::new(), opts).unwrap();
        w.write_all(&data).unwrap();
        let (expected, summary) = w.finish().unwrap();

        let mut it = encode_chunks(data.chunks(333), opts).unwrap();
        let mut got = Vec::new();
        for piece in &mut it {
            got.extend_from_slice(&piece.unwrap());
        }
        assert_eq!(got, expected);
        assert_eq!(it.summary(), Some(summary));
        assert_eq!(summary.frame_len, expected.len() as u64);
    }

    #[test]
    fn qoi_blocks_are_pixel_aligned() {
        let opts = EncodeOptions {
            codec: CodecId::Qoi,
            level: 0,
            block_size: 1000,
        };
        let w = FrameWriter::new(Vec::new(), opts).unwrap();
        let (out, _) = w.finish().unwrap();
        let h = FrameHeader::parse(&out).unwrap();
        assert_eq!(h.block_size, 999);
    }

    #[test]
    fn tiny_block_sizes_are_rejected() {
        let opts = EncodeOptions {
            codec: CodecId::Qoi,
            level: 0,
            block_size: 2,
        };
        assert!(FrameWriter::new(Vec::new(), opts).is_err());
    }
}
