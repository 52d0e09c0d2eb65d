//! Managed storage for File Records.
//!
//! Every artifact lives at `objects/<id>`. Content is only ever replaced by
//! renaming a fully written file from `staging/` over it, so readers see
//! either the old artifact or the new one.

use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;

use crate::codec::CodecId;
use crate::config::EngineConfig;
use crate::domain::{FileRecord, RecordId};
use crate::error::Result;
use crate::read::stream::FrameReader;
use crate::stats::StoreStats;

pub mod fs;
pub mod index;
pub mod journal;
pub mod staged;

pub use fs::FsStore;
pub use staged::StagedArtifact;

pub trait ArtifactStore: Send + Sync {
    /// Copy `source` into managed storage as a new record.
    fn ingest(&self, source: &Path) -> Result<FileRecord>;

    fn get(&self, id: &RecordId) -> Result<FileRecord>;

    /// All live records, oldest first.
    fn list(&self) -> Result<Vec<FileRecord>>;

    /// Most recently ingested live record.
    fn latest(&self) -> Result<Option<FileRecord>>;

    /// Reader over the stored artifact as it is on disk (a frame when the
    /// record is compressed). The handle is released when dropped.
    fn open_reader(&self, id: &RecordId) -> Result<Box<dyn Read + Send>>;

    fn stage(&self) -> Result<StagedArtifact>;

    /// Swap a staged frame in as the record's artifact.
    fn commit_compressed(
        &self,
        id: &RecordId,
        staged: StagedArtifact,
        codec: CodecId,
    ) -> Result<FileRecord>;

    /// Swap staged original content back in.
    fn commit_original(&self, id: &RecordId, staged: StagedArtifact) -> Result<FileRecord>;

    /// Explicit removal; the only way a record goes away.
    fn remove(&self, id: &RecordId) -> Result<FileRecord>;

    fn stats(&self) -> Result<StoreStats>;

    fn replace_with_compressed(
        &self,
        id: &RecordId,
        compressed: &[u8],
        codec: CodecId,
    ) -> Result<FileRecord> {
        let mut staged = self.stage()?;
        staged.write_all(compressed)?;
        self.commit_compressed(id, staged, codec)
    }

    /// Decode the stored frame and swap the original back in.
    fn restore_original(&self, id: &RecordId) -> Result<FileRecord> {
        let record = self.get(id)?;
        if !record.is_compressed() {
            return Ok(record);
        }
        let mut staged = self.stage()?;
        let mut frame = FrameReader::new(self.open_reader(id)?)?;
        std::io::copy(&mut frame, &mut staged)?;
        self.commit_original(id, staged)
    }
}

impl dyn ArtifactStore + '_ {
    /// Scoped read access to a record's artifact; the handle is closed on
    /// every exit path, including when `f` fails.
    pub fn with_reader<T>(
        &self,
        id: &RecordId,
        f: impl FnOnce(&mut dyn Read, &FileRecord) -> Result<T>,
    ) -> Result<T> {
        let record = self.get(id)?;
        let mut reader = self.open_reader(id)?;
        f(&mut reader, &record)
    }
}

pub fn open_store(cfg: &EngineConfig) -> Result<Arc<dyn ArtifactStore>> {
    Ok(Arc::new(FsStore::open(cfg)?))
}
