use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::domain::RecordId;
use crate::error::{PressaError, Result};
use crate::session::job::JobId;

/// Non-blocking per-record exclusion. A second acquire on a held record fails
/// with `RecordBusy` instead of waiting.
#[derive(Default)]
pub struct RecordLocks {
    held: DashMap<RecordId, JobId>,
}

pub struct RecordLease<'a> {
    locks: &'a RecordLocks,
    id: RecordId,
}

impl RecordLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self, id: &RecordId, holder: JobId) -> Result<RecordLease<'_>> {
        match self.held.entry(id.clone()) {
            Entry::Occupied(e) => {
                tracing::debug!(record = %id, holder = %e.get(), "record busy");
                Err(PressaError::RecordBusy(id.clone()))
            }
            Entry::Vacant(v) => {
                v.insert(holder);
                Ok(RecordLease {
                    locks: self,
                    id: id.clone(),
                })
            }
        }
    }

    pub fn holder(&self, id: &RecordId) -> Option<JobId> {
        self.held.get(id).map(|h| *h)
    }

    pub fn is_held(&self, id: &RecordId) -> bool {
        self.held.contains_key(id)
    }
}

impl Drop for RecordLease<'_> {
    fn drop(&mut self) {
        self.locks.held.remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_is_busy_until_release() {
        let locks = RecordLocks::new();
        let id = RecordId::generate();
        let lease = locks.try_acquire(&id, JobId(1)).unwrap();
        assert_eq!(locks.holder(&id), Some(JobId(1)));
        assert!(matches!(
            locks.try_acquire(&id, JobId(2)),
            Err(PressaError::RecordBusy(_))
        ));
        drop(lease);
        assert!(!locks.is_held(&id));
        assert!(locks.try_acquire(&id, JobId(3)).is_ok());
    }

    #[test]
    fn different_records_do_not_contend() {
        let locks = RecordLocks::new();
        let a = locks.try_acquire(&RecordId::generate(), JobId(1)).unwrap();
        let b = locks.try_acquire(&RecordId::generate(), JobId(2)).unwrap();
        drop((a, b));
    }
}
