use serde::{Deserialize, Serialize};
use std::fmt;

use crate::codec::CodecId;
use crate::domain::RecordId;
use crate::error::{ErrorCode, PressaError, Result};
use crate::sniff::FormatGuess;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Compress,
    Decompress,
    Analyze,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Sniffing,
    Encoding,
    Decoding,
    Persisting,
    Done,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Done | SessionState::Failed)
    }

    fn allows(self, to: SessionState) -> bool {
        use SessionState::*;
        match (self, to) {
            (Done | Failed, _) => false,
            (_, Failed) => true,
            (Idle, Sniffing) => true,
            (Sniffing, Encoding | Decoding | Done) => true,
            (Encoding | Decoding, Persisting) => true,
            (Persisting, Done) => true,
            _ => false,
        }
    }
}

/// Why a job finished without touching the record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    AlreadyCompressed,
    NotCompressed,
    OpaqueFormat,
    InsufficientGain,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub code: ErrorCode,
    pub message: String,
}

impl From<&PressaError> for JobError {
    fn from(e: &PressaError) -> Self {
        Self {
            code: e.code(),
            message: e.public_message(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub record: RecordId,
    pub operation: Operation,
    pub state: SessionState,
    /// Signed: negative means the stored artifact grew.
    pub bytes_saved: i64,
    pub codec: Option<CodecId>,
    pub skipped: Option<SkipReason>,
    pub format: Option<FormatGuess>,
    pub error: Option<JobError>,
    pub elapsed_ms: u64,
}

impl Job {
    pub fn new(id: JobId, record: RecordId, operation: Operation) -> Self {
        Self {
            id,
            record,
            operation,
            state: SessionState::Idle,
            bytes_saved: 0,
            codec: None,
            skipped: None,
            format: None,
            error: None,
            elapsed_ms: 0,
        }
    }

    pub fn status(&self) -> JobStatus {
        match self.state {
            SessionState::Idle => JobStatus::Pending,
            SessionState::Done => JobStatus::Succeeded,
            SessionState::Failed => JobStatus::Failed,
            _ => JobStatus::Running,
        }
    }

    pub fn transition(&mut self, to: SessionState) -> Result<()> {
        if !self.state.allows(to) {
            return Err(PressaError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }

    /// Finish as a no-op success.
    pub fn skip(&mut self, reason: SkipReason) -> Result<()> {
        self.transition(SessionState::Done)?;
        self.skipped = Some(reason);
        self.bytes_saved = 0;
        Ok(())
    }

    /// Record `err` and move to `Failed`. A job already terminal keeps its state.
    pub fn fail(&mut self, err: &PressaError) {
        if self.transition(SessionState::Failed).is_ok() {
            self.error = Some(JobError::from(err));
        }
    }

    pub fn succeeded(&self) -> bool {
        self.state == SessionState::Done
    }
}
