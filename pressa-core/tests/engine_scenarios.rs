use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;

use pressa_core::{
    ArtifactStore, CodecId, Engine, EngineConfig, ErrorCode, FileRecord, FsStore, JobControl,
    JobId, PressaError, ProgressSink, RecordId, Request, Response, Result, StagedArtifact,
    StoreStats, decode, encode,
};
use proptest::prelude::*;

fn config(dir: &Path) -> EngineConfig {
    let mut cfg = EngineConfig::with_root(dir.join("store"));
    cfg.block_size = 16 * 1024;
    cfg
}

fn engine(dir: &Path) -> Engine {
    Engine::open(config(dir)).unwrap()
}

fn write_source(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
    let p = dir.join(name);
    std::fs::write(&p, data).unwrap();
    p
}

#[test]
fn ten_byte_text_file_may_expand_without_error() {
    let dir = tempfile::tempdir().unwrap();
    let e = engine(dir.path());
    let rec = e
        .save_file(&write_source(dir.path(), "ten.txt", b"0123456789"))
        .unwrap();
    assert_eq!(rec.original_size, 10);
    assert_eq!(rec.compressed_size, None);

    let job = e.compress(Some(rec.id.as_str())).unwrap();
    let after = e.record(rec.id.as_str()).unwrap();
    let compressed = after.compressed_size.expect("compressed size recorded");
    assert_eq!(job.bytes_saved, 10 - compressed as i64);
    assert!(job.bytes_saved < 0);
}

#[test]
fn analyze_on_empty_file_is_generic() {
    let dir = tempfile::tempdir().unwrap();
    let e = engine(dir.path());
    let rec = e
        .save_file(&write_source(dir.path(), "empty", b""))
        .unwrap();
    let guess = e.analyze(rec.id.as_str()).unwrap();
    assert_eq!(guess.mime_type, "application/octet-stream");
    assert!(guess.confidence <= 0.1);
}

#[test]
fn analyze_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let e = engine(dir.path());
    let rec = e
        .save_file(&write_source(dir.path(), "page.html", b"<!doctype html><p>hi</p>"))
        .unwrap();
    let a = e.analyze(rec.id.as_str()).unwrap();
    let b = e.analyze(rec.id.as_str()).unwrap();
    assert_eq!(a, b);
    assert_eq!(a.mime_type, "text/html");
    assert!(e.recent_jobs().is_empty());
}

#[test]
fn truncated_artifact_fails_decompress_and_keeps_record() {
    let dir = tempfile::tempdir().unwrap();
    let e = engine(dir.path());
    let data = b"truncate me please ".repeat(3000);
    let rec = e
        .save_file(&write_source(dir.path(), "t.txt", &data))
        .unwrap();
    e.compress(Some(rec.id.as_str())).unwrap();
    let compressed = e.record(rec.id.as_str()).unwrap();

    // header present, body cut short
    let frame = std::fs::read(&compressed.stored_path).unwrap();
    assert!(matches!(
        decode(&frame[..frame.len() / 2]),
        Err(PressaError::TruncatedInput { .. })
    ));
    std::fs::write(&compressed.stored_path, &frame[..frame.len() / 2]).unwrap();

    let err = e.decompress(rec.id.as_str()).unwrap_err();
    assert_eq!(err.code, ErrorCode::TruncatedInput);
    assert_eq!(e.record(rec.id.as_str()).unwrap(), compressed);
}

/// Delegates to a real store but fails every compressed commit after the
/// staged file is written and before it is renamed into place.
struct CrashBeforeRename {
    inner: FsStore,
}

impl ArtifactStore for CrashBeforeRename {
    fn ingest(&self, source: &Path) -> Result<FileRecord> {
        self.inner.ingest(source)
    }
    fn get(&self, id: &RecordId) -> Result<FileRecord> {
        self.inner.get(id)
    }
    fn list(&self) -> Result<Vec<FileRecord>> {
        self.inner.list()
    }
    fn latest(&self) -> Result<Option<FileRecord>> {
        self.inner.latest()
    }
    fn open_reader(&self, id: &RecordId) -> Result<Box<dyn Read + Send>> {
        self.inner.open_reader(id)
    }
    fn stage(&self) -> Result<StagedArtifact> {
        self.inner.stage()
    }
    fn commit_compressed(
        &self,
        _id: &RecordId,
        staged: StagedArtifact,
        _codec: CodecId,
    ) -> Result<FileRecord> {
        assert!(!staged.is_empty());
        drop(staged);
        Err(std::io::Error::other("simulated crash").into())
    }
    fn commit_original(&self, id: &RecordId, staged: StagedArtifact) -> Result<FileRecord> {
        self.inner.commit_original(id, staged)
    }
    fn remove(&self, id: &RecordId) -> Result<FileRecord> {
        self.inner.remove(id)
    }
    fn stats(&self) -> Result<StoreStats> {
        self.inner.stats()
    }
}

#[test]
fn crash_between_stage_and_rename_leaves_original_intact() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let inner = FsStore::open(&cfg).unwrap();
    let e = Engine::with_store(cfg, Arc::new(CrashBeforeRename { inner }));

    let data = b"precious original bytes ".repeat(2000);
    let rec = e
        .save_file(&write_source(dir.path(), "p.txt", &data))
        .unwrap();
    let err = e.compress(Some(rec.id.as_str())).unwrap_err();
    assert_eq!(err.code, ErrorCode::IoError);

    assert_eq!(e.record(rec.id.as_str()).unwrap(), rec);
    let mut out = Vec::new();
    e.read_original(rec.id.as_str(), &mut out).unwrap();
    assert_eq!(out, data);
    let staging = dir.path().join("store/staging");
    assert_eq!(std::fs::read_dir(staging).unwrap().count(), 0);
    let failed = e.recent_jobs().pop().unwrap();
    assert_eq!(failed.error.unwrap().code, ErrorCode::IoError);
}

#[test]
fn dropped_stage_never_becomes_visible() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsStore::open(&config(dir.path())).unwrap();
    let rec = store
        .ingest(&write_source(dir.path(), "a", b"keep me"))
        .unwrap();
    {
        let mut staged = store.stage().unwrap();
        staged.write_all(b"half-writ").unwrap();
    }
    let mut got = Vec::new();
    store.open_reader(&rec.id).unwrap().read_to_end(&mut got).unwrap();
    assert_eq!(got, b"keep me");
}

/// Parks the job on its first progress report until released.
struct Gate {
    entered: Mutex<Option<mpsc::Sender<()>>>,
    release: Mutex<mpsc::Receiver<()>>,
}

impl ProgressSink for Gate {
    fn on_progress(&self, _job: JobId, _done: u64, _total: u64) {
        let first = self.entered.lock().unwrap().take();
        if let Some(tx) = first {
            tx.send(()).unwrap();
            self.release.lock().unwrap().recv().unwrap();
        }
    }
}

#[test]
fn concurrent_compress_and_decompress_exactly_one_runs() {
    let dir = tempfile::tempdir().unwrap();
    let e = Arc::new(engine(dir.path()));
    let data = b"contended record ".repeat(10_000);
    let rec = e
        .save_file(&write_source(dir.path(), "c.txt", &data))
        .unwrap();

    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let gate = Arc::new(Gate {
        entered: Mutex::new(Some(entered_tx)),
        release: Mutex::new(release_rx),
    });
    let ctl = JobControl {
        progress: Some(gate),
        ..Default::default()
    };

    let worker = {
        let e = Arc::clone(&e);
        let id = rec.id.to_string();
        thread::spawn(move || e.compress_with(Some(id.as_str()), None, None, &ctl))
    };
    entered_rx.recv().unwrap();
    let second = e.decompress(rec.id.as_str());
    release_tx.send(()).unwrap();
    let first = worker.join().unwrap();

    assert!(first.is_ok());
    assert_eq!(second.unwrap_err().code, ErrorCode::RecordBusy);
    assert!(e.record(rec.id.as_str()).unwrap().is_compressed());
}

#[test]
fn compress_all_handles_every_record() {
    let dir = tempfile::tempdir().unwrap();
    let e = engine(dir.path());
    for i in 0..6 {
        let body = format!("record number {i} ").repeat(500);
        e.save_file(&write_source(dir.path(), &format!("{i}.txt"), body.as_bytes()))
            .unwrap();
    }
    let jobs = e.compress_all(&JobControl::default()).unwrap();
    assert_eq!(jobs.len(), 6);
    assert!(jobs.iter().all(|j| j.succeeded()));
    let stats = e.stats().unwrap();
    assert_eq!(stats.compressed_records, 6);
    assert!(stats.bytes_saved() > 0);
}

#[test]
fn wire_requests_drive_the_engine() {
    let dir = tempfile::tempdir().unwrap();
    let e = engine(dir.path());
    let src = write_source(dir.path(), "w.txt", &b"wire ".repeat(1000));

    let req: Request = serde_json::from_value(serde_json::json!({
        "command": "save_file_inside_db",
        "file": src,
    }))
    .unwrap();
    let file_id = match e.handle(req).unwrap() {
        Response::Saved {
            file_id,
            original_size,
            ..
        } => {
            assert_eq!(original_size, 5000);
            file_id
        }
        other => panic!("unexpected {other:?}"),
    };

    let resp = e
        .handle(serde_json::from_str(r#"{"command":"compress"}"#).unwrap())
        .unwrap();
    match resp {
        Response::Compressed(outcome) => {
            assert_eq!(outcome.file_id, file_id);
            assert!(outcome.bytes_saved > 0);
        }
        other => panic!("unexpected {other:?}"),
    }

    let resp = e
        .handle(Request::Decompress {
            file_id: file_id.clone(),
        })
        .unwrap();
    assert!(matches!(resp, Response::Decompressed(_)));

    let err = e
        .handle(Request::Remove {
            file_id: RecordId::generate().to_string(),
        })
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::UnknownRecord);
}

#[test]
fn restart_preserves_records_and_stats() {
    let dir = tempfile::tempdir().unwrap();
    let (id, stats) = {
        let e = engine(dir.path());
        let rec = e
            .save_file(&write_source(dir.path(), "r.txt", &b"restart ".repeat(800)))
            .unwrap();
        e.compress(None).unwrap();
        (rec.id, e.stats().unwrap())
    };
    let e = engine(dir.path());
    assert_eq!(e.stats().unwrap(), stats);
    assert!(e.record(id.as_str()).unwrap().is_compressed());
    assert!(e.recent_jobs().is_empty());
}

proptest! {
    #[test]
    fn prop_roundtrip_public_api(
        data in prop::collection::vec(any::<u8>(), 0..50_000),
        codec in prop::sample::select(vec![CodecId::Store, CodecId::Zstd, CodecId::Lz4, CodecId::Qoi]),
        level in 1i32..10,
    ) {
        let frame = encode(&data, codec, level).unwrap();
        prop_assert_eq!(decode(&frame).unwrap(), data);
    }
}
