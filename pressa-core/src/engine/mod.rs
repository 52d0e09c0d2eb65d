//! The single entry point callers talk to. Every failure leaving this module
//! is an `EngineError`: a stable code plus a message without storage paths.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::codec::{CodecDescriptor, CodecId, DESCRIPTORS};
use crate::config::EngineConfig;
use crate::domain::{FileRecord, RecordId};
use crate::error::{ErrorCode, PressaError};
use crate::policy::Policy;
use crate::read::stream::FrameReader;
use crate::session::Session;
use crate::session::control::JobControl;
use crate::session::job::{Job, Operation};
use crate::sniff::FormatGuess;
use crate::stats::StoreStats;
use crate::store::{ArtifactStore, open_store};

pub mod command;

use command::{JobOutcome, RecordView, Request, Response};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct EngineError {
    pub code: ErrorCode,
    pub message: String,
}

impl EngineError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message)
    }
}

impl From<PressaError> for EngineError {
    fn from(e: PressaError) -> Self {
        Self::new(e.code(), e.public_message())
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

pub struct Engine {
    config: EngineConfig,
    session: Session,
    history: Mutex<VecDeque<Job>>,
}

impl Engine {
    pub fn open(config: EngineConfig) -> EngineResult<Self> {
        config.validate()?;
        let store = open_store(&config)?;
        Ok(Self::with_store(config, store))
    }

    /// Build over an already-open store (alternative backends, test doubles).
    pub fn with_store(config: EngineConfig, store: Arc<dyn ArtifactStore>) -> Self {
        let session = Session::new(
            store,
            config.policy.clone(),
            config.block_size,
            config.sniff_len,
        );
        Self {
            config,
            session,
            history: Mutex::new(VecDeque::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    fn store(&self) -> &dyn ArtifactStore {
        self.session.store().as_ref()
    }

    pub fn save_file(&self, source: &Path) -> EngineResult<FileRecord> {
        Ok(self.store().ingest(source)?)
    }

    /// Compress `file_id`, or the most recently saved record when `None`.
    pub fn compress(&self, file_id: Option<&str>) -> EngineResult<Job> {
        self.compress_with(file_id, None, None, &JobControl::default())
    }

    pub fn compress_with(
        &self,
        file_id: Option<&str>,
        codec: Option<CodecId>,
        level: Option<i32>,
        ctl: &JobControl,
    ) -> EngineResult<Job> {
        let id = self.resolve(file_id)?;
        let policy = self.policy_with(codec, level)?;
        let job = self.session.run_with(&id, Operation::Compress, &policy, ctl);
        self.finish(job)
    }

    pub fn decompress(&self, file_id: &str) -> EngineResult<Job> {
        self.decompress_with(file_id, &JobControl::default())
    }

    pub fn decompress_with(&self, file_id: &str, ctl: &JobControl) -> EngineResult<Job> {
        let id = RecordId::parse(file_id)?;
        let job = self.session.run(&id, Operation::Decompress, ctl);
        self.finish(job)
    }

    /// Sniff only; leaves the record and the job history alone.
    pub fn analyze(&self, file_id: &str) -> EngineResult<FormatGuess> {
        let id = RecordId::parse(file_id)?;
        let job = self.session.run(&id, Operation::Analyze, &JobControl::default());
        match (job.format, job.error) {
            (Some(guess), None) => Ok(guess),
            (_, Some(e)) => Err(EngineError::new(e.code, e.message)),
            (None, None) => Err(EngineError::new(ErrorCode::Internal, "analysis produced no result")),
        }
    }

    /// Compress every uncompressed record in parallel. Each record is locked
    /// on its own; one record failing does not stop the others.
    pub fn compress_all(&self, ctl: &JobControl) -> EngineResult<Vec<Job>> {
        let pending: Vec<RecordId> = self
            .store()
            .list()?
            .into_iter()
            .filter(|r| !r.is_compressed())
            .map(|r| r.id)
            .collect();
        let jobs: Vec<Job> = pending
            .par_iter()
            .map(|id| self.session.run(id, Operation::Compress, ctl))
            .collect();
        for job in &jobs {
            self.remember(job.clone());
        }
        Ok(jobs)
    }

    /// Stream a record's original content into `dst`, decoding when the
    /// stored artifact is compressed. Holds the record lock throughout.
    pub fn read_original(&self, file_id: &str, dst: &mut dyn Write) -> EngineResult<u64> {
        let id = RecordId::parse(file_id)?;
        let _lease = self
            .session
            .locks()
            .try_acquire(&id, self.session.next_job_id())?;
        let record = self.store().get(&id)?;
        let reader = self.store().open_reader(&id)?;
        let n = if record.is_compressed() {
            let mut frame = FrameReader::new(reader).map_err(EngineError::from)?;
            std::io::copy(&mut frame, dst).map_err(PressaError::from)?
        } else {
            let mut reader = reader;
            std::io::copy(&mut reader, dst).map_err(PressaError::from)?
        };
        Ok(n)
    }

    pub fn remove(&self, file_id: &str) -> EngineResult<FileRecord> {
        let id = RecordId::parse(file_id)?;
        let _lease = self
            .session
            .locks()
            .try_acquire(&id, self.session.next_job_id())?;
        Ok(self.store().remove(&id)?)
    }

    pub fn record(&self, file_id: &str) -> EngineResult<FileRecord> {
        let id = RecordId::parse(file_id)?;
        Ok(self.store().get(&id)?)
    }

    pub fn records(&self) -> EngineResult<Vec<FileRecord>> {
        Ok(self.store().list()?)
    }

    pub fn stats(&self) -> EngineResult<StoreStats> {
        Ok(self.store().stats()?)
    }

    pub fn codecs(&self) -> Vec<CodecDescriptor> {
        DESCRIPTORS.to_vec()
    }

    /// Finished jobs, newest last.
    pub fn recent_jobs(&self) -> Vec<Job> {
        match self.history.lock() {
            Ok(h) => h.iter().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().iter().cloned().collect(),
        }
    }

    pub fn handle(&self, req: Request) -> EngineResult<Response> {
        self.handle_with(req, &JobControl::default())
    }

    pub fn handle_with(&self, req: Request, ctl: &JobControl) -> EngineResult<Response> {
        tracing::debug!(command = req.name(), "handling request");
        let resp = match req {
            Request::SaveFile { file } => {
                let r = self.save_file(&file)?;
                Response::Saved {
                    file_id: r.id.to_string(),
                    stored_path: r.stored_path,
                    original_size: r.original_size,
                    detected_format: r.detected_format,
                }
            }
            Request::Compress {
                file_id,
                codec,
                level,
            } => {
                let job = self.compress_with(file_id.as_deref(), codec, level, ctl)?;
                Response::Compressed(JobOutcome::from(&job))
            }
            Request::Decompress { file_id } => {
                let job = self.decompress_with(&file_id, ctl)?;
                Response::Decompressed(JobOutcome::from(&job))
            }
            Request::Analyze { file_id } => Response::Analysis(self.analyze(&file_id)?),
            Request::List => Response::Records {
                records: self.records()?.iter().map(RecordView::from).collect(),
            },
            Request::Remove { file_id } => {
                let r = self.remove(&file_id)?;
                Response::Removed {
                    file_id: r.id.to_string(),
                }
            }
            Request::Stats => {
                let stats = self.stats()?;
                Response::Stats {
                    bytes_saved: stats.bytes_saved(),
                    stats,
                }
            }
            Request::Codecs => Response::Codecs {
                codecs: self.codecs(),
            },
        };
        Ok(resp)
    }

    fn resolve(&self, file_id: Option<&str>) -> EngineResult<RecordId> {
        match file_id {
            Some(s) => Ok(RecordId::parse(s)?),
            None => self
                .store()
                .latest()?
                .map(|r| r.id)
                .ok_or_else(|| EngineError::new(ErrorCode::UnknownRecord, "no saved records")),
        }
    }

    fn policy_with(&self, codec: Option<CodecId>, level: Option<i32>) -> EngineResult<Policy> {
        let mut policy = self.config.policy.clone();
        if codec.is_some() {
            policy.codec = codec;
        }
        if let Some(l) = level {
            policy.level = l;
        }
        policy
            .validate()
            .map_err(|e| EngineError::invalid_request(e.public_message()))?;
        Ok(policy)
    }

    fn finish(&self, job: Job) -> EngineResult<Job> {
        self.remember(job.clone());
        match &job.error {
            Some(e) => Err(EngineError::new(e.code, e.message.clone())),
            None => Ok(job),
        }
    }

    fn remember(&self, job: Job) {
        let cap = self.config.job_history;
        if cap == 0 {
            return;
        }
        let mut h = match self.history.lock() {
            Ok(h) => h,
            Err(poisoned) => poisoned.into_inner(),
        };
        while h.len() >= cap {
            h.pop_front();
        }
        h.push_back(job);
    }
}
