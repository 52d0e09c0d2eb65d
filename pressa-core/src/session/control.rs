use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{PressaError, Result};
use crate::session::job::JobId;

/// Shared cancellation flag; clones observe the same flag.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(PressaError::Cancelled);
        }
        Ok(())
    }
}

pub trait ProgressSink: Send + Sync {
    /// Called after each chunk; `total` is the expected input size.
    fn on_progress(&self, job: JobId, done: u64, total: u64);
}

#[derive(Clone, Default)]
pub struct JobControl {
    pub cancel: CancelToken,
    pub progress: Option<Arc<dyn ProgressSink>>,
}

impl JobControl {
    pub fn with_cancel(cancel: CancelToken) -> Self {
        Self {
            cancel,
            progress: None,
        }
    }

    pub(crate) fn report(&self, job: JobId, done: u64, total: u64) {
        if let Some(p) = &self.progress {
            p.on_progress(job, done, total);
        }
    }
}
