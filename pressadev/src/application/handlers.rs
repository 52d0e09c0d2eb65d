use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use pressa_core::{
    CodecId, EncodeOptions, Engine, EngineResult, FrameReader, FrameWriter, Job, JobControl,
    PressaError, classify,
};

fn io_err(e: std::io::Error) -> PressaError {
    PressaError::from(e)
}

fn print_job(verb: &str, job: &Job) {
    match job.skipped {
        Some(reason) => println!("{verb}: {} unchanged ({reason:?})", job.record),
        None => println!(
            "{verb}: {} codec={} saved={}B ({} ms)",
            job.record,
            job.codec.map(|c| c.name()).unwrap_or("-"),
            job.bytes_saved,
            job.elapsed_ms
        ),
    }
}

/// Regular files under `paths`, walking directories when `recursive`.
pub fn collect_sources(paths: &[PathBuf], recursive: bool) -> Vec<PathBuf> {
    let mut out = Vec::new();
    for p in paths {
        if recursive && p.is_dir() {
            for entry in walkdir::WalkDir::new(p)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
            {
                if entry.file_type().is_file() {
                    out.push(entry.into_path());
                }
            }
        } else {
            out.push(p.clone());
        }
    }
    out
}

pub fn handle_save(engine: &Engine, paths: &[PathBuf], recursive: bool) -> EngineResult<()> {
    for src in collect_sources(paths, recursive) {
        let r = engine.save_file(&src)?;
        println!(
            "{}  {} ({} bytes, {})",
            r.id,
            src.display(),
            r.original_size,
            r.detected_format
        );
    }
    Ok(())
}

pub fn handle_compress(
    engine: &Engine,
    file_id: Option<&str>,
    codec: Option<CodecId>,
    level: Option<i32>,
) -> EngineResult<()> {
    let job = engine.compress_with(file_id, codec, level, &JobControl::default())?;
    print_job("compress", &job);
    Ok(())
}

pub fn handle_compress_all(engine: &Engine) -> EngineResult<()> {
    let jobs = engine.compress_all(&JobControl::default())?;
    let mut failed = 0usize;
    for job in &jobs {
        match &job.error {
            Some(e) => {
                failed += 1;
                eprintln!("compress: {} failed: {}: {}", job.record, e.code, e.message);
            }
            None => print_job("compress", job),
        }
    }
    eprintln!("compress: {} records, {} failed", jobs.len(), failed);
    Ok(())
}

pub fn handle_decompress(engine: &Engine, file_id: &str) -> EngineResult<()> {
    let job = engine.decompress(file_id)?;
    print_job("decompress", &job);
    Ok(())
}

pub fn handle_analyze(engine: &Engine, file_id: &str) -> EngineResult<()> {
    let g = engine.analyze(file_id)?;
    println!(
        "{} class={} confidence={:.2}",
        g.mime_type,
        g.class.as_str(),
        g.confidence
    );
    Ok(())
}

pub fn handle_sniff(path: &Path, sniff_len: usize) -> EngineResult<()> {
    let mut prefix = Vec::with_capacity(sniff_len);
    File::open(path)
        .map_err(io_err)?
        .take(sniff_len as u64)
        .read_to_end(&mut prefix)
        .map_err(io_err)?;
    let g = classify(&prefix);
    let codec = g.recommended_codec().map(|c| c.name()).unwrap_or("none");
    println!(
        "{}: {} class={} confidence={:.2} codec={}",
        path.display(),
        g.mime_type,
        g.class.as_str(),
        g.confidence,
        codec
    );
    Ok(())
}

pub fn handle_ls(engine: &Engine, long: bool) -> EngineResult<()> {
    for r in engine.records()? {
        if long {
            let codec = r.codec.map(|c| c.name()).unwrap_or("-");
            println!(
                "{}  {:>12}  {:>12}  {:<5} {:<28} {}",
                r.id,
                r.original_size,
                r.stored_size(),
                codec,
                r.detected_format,
                r.original_path.display()
            );
        } else {
            println!("{}  {}", r.id, r.original_path.display());
        }
    }
    Ok(())
}

pub fn handle_rm(engine: &Engine, file_id: &str) -> EngineResult<()> {
    let r = engine.remove(file_id)?;
    eprintln!("rm: {}", r.id);
    Ok(())
}

pub fn handle_cat(engine: &Engine, file_id: &str) -> EngineResult<()> {
    let mut out = std::io::stdout().lock();
    engine.read_original(file_id, &mut out)?;
    out.flush().map_err(io_err)?;
    Ok(())
}

pub fn handle_stats(engine: &Engine) -> EngineResult<()> {
    let s = engine.stats()?;
    println!("records:      {}", s.records);
    println!("compressed:   {}", s.compressed_records);
    println!("original:     {} bytes", s.original_bytes);
    println!("stored:       {} bytes", s.stored_bytes);
    println!("saved:        {} bytes", s.bytes_saved());
    println!("ratio:        {:.3}", s.compression_ratio());
    Ok(())
}

pub fn handle_codecs(engine: &Engine) -> EngineResult<()> {
    for d in engine.codecs() {
        println!(
            "{:<2} {:<6} streaming={} lossless={}",
            d.id as u8, d.name, d.supports_streaming, d.is_lossless
        );
    }
    Ok(())
}

pub fn encode_file(
    input: &Path,
    out: &Path,
    codec: CodecId,
    level: i32,
    block_size: usize,
) -> pressa_core::Result<(u64, u64)> {
    let opts = EncodeOptions {
        codec,
        level,
        block_size,
    };
    let mut src = BufReader::new(File::open(input)?);
    write_replacing(out, |sink| {
        let mut w = FrameWriter::new(sink, opts)?;
        std::io::copy(&mut src, &mut w)?;
        let (_, summary) = w.finish()?;
        Ok((summary.total_u, summary.frame_len))
    })
}

pub fn decode_file(input: &Path, out: &Path) -> pressa_core::Result<u64> {
    let mut frame = FrameReader::new(BufReader::new(File::open(input)?))?;
    write_replacing(out, |sink| Ok(std::io::copy(&mut frame, sink)?))
}

/// Fill a temporary sibling of `out` and rename it into place only when
/// `fill` succeeds; a failed run leaves `out` as it was.
fn write_replacing<T>(
    out: &Path,
    fill: impl FnOnce(&mut BufWriter<&mut File>) -> pressa_core::Result<T>,
) -> pressa_core::Result<T> {
    let dir = match out.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    let value = {
        let mut sink = BufWriter::new(tmp.as_file_mut());
        let value = fill(&mut sink)?;
        sink.flush()?;
        value
    };
    tmp.as_file().sync_all()?;
    tmp.persist(out).map_err(|e| PressaError::Io(e.error))?;
    Ok(value)
}

pub fn handle_encode(
    input: &Path,
    out: &Path,
    codec: CodecId,
    level: i32,
    block_size: usize,
) -> EngineResult<()> {
    let (u, c) = encode_file(input, out, codec, level, block_size)?;
    eprintln!("encode: {} -> {} ({u} -> {c} bytes, {codec})", input.display(), out.display());
    Ok(())
}

pub fn handle_decode(input: &Path, out: &Path) -> EngineResult<()> {
    let n = decode_file(input, out)?;
    eprintln!("decode: {} -> {} ({n} bytes)", input.display(), out.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collect_walks_directories_only_when_recursive() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(dir.path().join("a/one.txt"), b"1").unwrap();
        std::fs::write(nested.join("two.txt"), b"2").unwrap();

        let flat = collect_sources(&[dir.path().join("a")], false);
        assert_eq!(flat, vec![dir.path().join("a")]);

        let deep = collect_sources(&[dir.path().join("a")], true);
        assert_eq!(deep.len(), 2);
        assert!(deep.iter().all(|p| p.is_file()));
    }

    #[test]
    fn frame_files_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.bin");
        let frame = dir.path().join("in.przf");
        let back = dir.path().join("back.bin");
        let data = b"pressadev frame tools ".repeat(4000);
        std::fs::write(&input, &data).unwrap();

        let (u, c) = encode_file(&input, &frame, CodecId::Lz4, 1, 8 * 1024).unwrap();
        assert_eq!(u, data.len() as u64);
        assert_eq!(c, std::fs::metadata(&frame).unwrap().len());
        assert_eq!(decode_file(&frame, &back).unwrap(), u);
        assert_eq!(std::fs::read(&back).unwrap(), data);
    }

    #[test]
    fn decoding_a_plain_file_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("plain.txt");
        std::fs::write(&input, b"not a frame at all, just text").unwrap();
        let err = decode_file(&input, &dir.path().join("out")).unwrap_err();
        assert!(matches!(err, PressaError::CorruptStream(_)));
    }

    #[test]
    fn failed_decode_leaves_no_partial_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.bin");
        let frame = dir.path().join("in.przf");
        std::fs::write(&input, b"cut me short ".repeat(5000)).unwrap();
        encode_file(&input, &frame, CodecId::Zstd, 3, 4 * 1024).unwrap();
        let bytes = std::fs::read(&frame).unwrap();
        std::fs::write(&frame, &bytes[..bytes.len() * 2 / 3]).unwrap();

        let fresh = dir.path().join("fresh.bin");
        assert!(matches!(
            decode_file(&frame, &fresh),
            Err(PressaError::TruncatedInput { .. })
        ));
        assert!(!fresh.exists());

        let existing = dir.path().join("existing.bin");
        std::fs::write(&existing, b"previous contents").unwrap();
        assert!(decode_file(&frame, &existing).is_err());
        assert_eq!(std::fs::read(&existing).unwrap(), b"previous contents");

        let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 3);
    }
}
