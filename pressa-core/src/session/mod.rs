//! One compress / decompress / analyze run against a single File Record.
//!
//! `Idle -> Sniffing -> Encoding|Decoding -> Persisting -> Done`, or `Failed`
//! from any non-terminal state. The record lock is taken on entering
//! `Sniffing` and released when the run returns, whatever the outcome.

use std::io::{Cursor, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::codec::CodecId;
use crate::domain::{FileRecord, RecordId};
use crate::error::{PressaError, Result};
use crate::pack::stream::{EncodeOptions, FrameWriter};
use crate::policy::Policy;
use crate::read::stream::FrameReader;
use crate::sniff::{FormatGuess, classify};
use crate::store::ArtifactStore;
use crate::util::buf::read_full;
use crate::util::hash_forward::HashingForward;

pub mod control;
pub mod job;
pub mod locks;

use control::JobControl;
use job::{Job, JobId, Operation, SessionState, SkipReason};
use locks::RecordLocks;

pub struct Session {
    store: Arc<dyn ArtifactStore>,
    locks: Arc<RecordLocks>,
    policy: Policy,
    block_size: usize,
    sniff_len: usize,
    next_job: AtomicU64,
}

impl Session {
    pub fn new(
        store: Arc<dyn ArtifactStore>,
        policy: Policy,
        block_size: usize,
        sniff_len: usize,
    ) -> Self {
        Self {
            store,
            locks: Arc::new(RecordLocks::new()),
            policy,
            block_size,
            sniff_len,
            next_job: AtomicU64::new(1),
        }
    }

    pub fn store(&self) -> &Arc<dyn ArtifactStore> {
        &self.store
    }

    pub fn locks(&self) -> &RecordLocks {
        &self.locks
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn next_job_id(&self) -> JobId {
        JobId(self.next_job.fetch_add(1, Ordering::Relaxed))
    }

    /// Run one job to a terminal state. Failures are recorded on the
    /// returned job, never raised.
    pub fn run(&self, id: &RecordId, op: Operation, ctl: &JobControl) -> Job {
        self.run_with(id, op, &self.policy, ctl)
    }

    pub fn run_with(&self, id: &RecordId, op: Operation, policy: &Policy, ctl: &JobControl) -> Job {
        let started = Instant::now();
        let mut job = Job::new(self.next_job_id(), id.clone(), op);
        let outcome = match op {
            Operation::Compress => self.compress(&mut job, policy, ctl),
            Operation::Decompress => self.decompress(&mut job, ctl),
            Operation::Analyze => self.analyze(&mut job),
        };
        job.elapsed_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(()) => tracing::info!(
                job = %job.id,
                record = %job.record,
                op = ?job.operation,
                bytes_saved = job.bytes_saved,
                skipped = ?job.skipped,
                elapsed_ms = job.elapsed_ms,
                "job finished"
            ),
            Err(e) => {
                tracing::warn!(
                    job = %job.id,
                    record = %job.record,
                    op = ?job.operation,
                    error = %e,
                    "job failed"
                );
                job.fail(&e);
            }
        }
        job
    }

    fn compress(&self, job: &mut Job, policy: &Policy, ctl: &JobControl) -> Result<()> {
        job.transition(SessionState::Sniffing)?;
        let _lease = self.locks.try_acquire(&job.record, job.id)?;
        let record = self.store.get(&job.record)?;
        if record.is_compressed() {
            return job.skip(SkipReason::AlreadyCompressed);
        }

        let mut reader = self.store.open_reader(&record.id)?;
        let prefix = self.read_prefix(&mut reader)?;
        let guess = classify(&prefix);
        job.format = Some(guess.clone());
        if policy.skip_opaque && guess.is_opaque() {
            tracing::debug!(record = %record.id, format = %guess.mime_type, "opaque format, skipping");
            return job.skip(SkipReason::OpaqueFormat);
        }
        let codec = policy
            .codec
            .or_else(|| guess.recommended_codec())
            .unwrap_or(CodecId::Zstd);
        job.codec = Some(codec);
        tracing::debug!(record = %record.id, format = %guess.mime_type, %codec, "encoding");

        job.transition(SessionState::Encoding)?;
        let opts = EncodeOptions {
            codec,
            level: policy.level,
            block_size: self.block_size,
        };
        let mut writer = FrameWriter::new(self.store.stage()?, opts)?;
        let mut src = Cursor::new(prefix).chain(reader);
        pump(&mut src, &mut writer, self.block_size, job.id, record.original_size, ctl)?;
        let (staged, summary) = writer.finish()?;
        if summary.total_u != record.original_size {
            return Err(PressaError::corrupt(format!(
                "artifact holds {} bytes, record says {}",
                summary.total_u, record.original_size
            )));
        }

        if !policy.accepts_gain(record.original_size, staged.len()) {
            return job.skip(SkipReason::InsufficientGain);
        }
        // last chance to back out before the swap
        ctl.cancel.check()?;

        job.transition(SessionState::Persisting)?;
        let updated = self.store.commit_compressed(&record.id, staged, codec)?;
        job.bytes_saved = updated.bytes_saved();
        job.transition(SessionState::Done)
    }

    fn decompress(&self, job: &mut Job, ctl: &JobControl) -> Result<()> {
        job.transition(SessionState::Sniffing)?;
        let _lease = self.locks.try_acquire(&job.record, job.id)?;
        let record = self.store.get(&job.record)?;
        let compressed_size = match record.compressed_size {
            Some(n) => n,
            None => return job.skip(SkipReason::NotCompressed),
        };
        let mut frame = FrameReader::new(self.store.open_reader(&record.id)?)?;
        job.codec = Some(frame.header().codec);

        job.transition(SessionState::Decoding)?;
        let mut out = HashingForward::new(self.store.stage()?);
        pump(&mut frame, &mut out, self.block_size, job.id, record.original_size, ctl)?;
        let (staged, digest, produced) = out.finish();
        verify_restored(&record, produced, &digest)?;
        ctl.cancel.check()?;

        job.transition(SessionState::Persisting)?;
        self.store.commit_original(&record.id, staged)?;
        job.bytes_saved = compressed_size as i64 - record.original_size as i64;
        job.transition(SessionState::Done)
    }

    fn analyze(&self, job: &mut Job) -> Result<()> {
        job.transition(SessionState::Sniffing)?;
        let _lease = self.locks.try_acquire(&job.record, job.id)?;
        let guess = self.sniff_record(&job.record)?;
        job.format = Some(guess);
        job.transition(SessionState::Done)
    }

    /// Classify a record by its original content; compressed records are
    /// classified from their decoded prefix. Callers hold the record lock.
    pub fn sniff_record(&self, id: &RecordId) -> Result<FormatGuess> {
        let record = self.store.get(id)?;
        let reader = self.store.open_reader(id)?;
        let prefix = if record.is_compressed() {
            self.read_prefix(&mut FrameReader::new(reader)?)?
        } else {
            let mut reader = reader;
            self.read_prefix(&mut reader)?
        };
        Ok(classify(&prefix))
    }

    fn read_prefix(&self, r: &mut dyn Read) -> Result<Vec<u8>> {
        let mut prefix = vec![0u8; self.sniff_len];
        let n = read_full(r, &mut prefix)?;
        prefix.truncate(n);
        Ok(prefix)
    }
}

fn verify_restored(record: &FileRecord, produced: u64, digest: &[u8; 32]) -> Result<()> {
    if produced != record.original_size {
        return Err(PressaError::corrupt(format!(
            "decoded {produced} bytes, record holds {}",
            record.original_size
        )));
    }
    if digest != &record.digest {
        return Err(PressaError::corrupt("decoded content does not match ingest digest"));
    }
    Ok(())
}

/// Copy `src` to `dst` in `chunk`-sized pieces, checking for cancellation
/// before each piece and reporting progress after it.
fn pump(
    src: &mut dyn Read,
    dst: &mut dyn Write,
    chunk: usize,
    job: JobId,
    total: u64,
    ctl: &JobControl,
) -> Result<u64> {
    let mut buf = vec![0u8; chunk.clamp(4096, 1 << 20)];
    let mut done = 0u64;
    loop {
        ctl.cancel.check()?;
        let n = read_full(src, &mut buf)?;
        if n == 0 {
            break;
        }
        dst.write_all(&buf[..n])?;
        done += n as u64;
        ctl.report(job, done, total);
    }
    Ok(done)
}
