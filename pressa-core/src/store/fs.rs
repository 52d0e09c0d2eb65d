use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::codec::CodecId;
use crate::config::EngineConfig;
use crate::container::header::{FrameHeader, HEADER_LEN};
use crate::domain::{FileRecord, RecordId};
use crate::error::{PressaError, Result};
use crate::sniff::classify;
use crate::stats::StoreStats;
use crate::store::ArtifactStore;
use crate::store::index::CatalogIndex;
use crate::store::journal::{CatalogRecord, Journal};
use crate::store::staged::StagedArtifact;
use crate::util::buf::read_full;
use crate::util::hash_forward::HashingForward;

pub const OBJECTS_DIR: &str = "objects";
pub const STAGING_DIR: &str = "staging";
pub const CATALOG_FILE: &str = "catalog.log";
/// Artifacts found in `objects/` that no record owns are moved here on open.
pub const ORPHANS_DIR: &str = "orphans";

struct State {
    journal: Journal,
    index: CatalogIndex,
}

impl State {
    fn append(&mut self, rec: CatalogRecord) -> Result<()> {
        self.journal.append(&rec)?;
        self.index.apply(&rec);
        Ok(())
    }

    /// Put the index back to `prev` after its artifact swap failed. The index
    /// is restored even when the journal refuses the record; reopening
    /// reconciles the catalog from the artifact on disk.
    fn revert(&mut self, prev: &FileRecord) {
        let undo = match (prev.codec, prev.compressed_size) {
            (Some(codec), Some(compressed_size)) => CatalogRecord::Compressed {
                id: prev.id.clone(),
                codec,
                compressed_size,
            },
            _ => CatalogRecord::Restored {
                id: prev.id.clone(),
            },
        };
        if let Err(e) = self.journal.append(&undo) {
            tracing::warn!(id = %prev.id, error = %e, "could not journal the undo record");
        }
        self.index.apply(&undo);
    }
}

/// Directory-backed store: `objects/`, `staging/` and `catalog.log` under one root.
pub struct FsStore {
    root: PathBuf,
    objects: PathBuf,
    staging: PathBuf,
    sniff_len: usize,
    reject_duplicate_paths: bool,
    state: Mutex<State>,
    /// Source paths with an ingest in flight.
    ingesting: DashMap<PathBuf, ()>,
}

struct PathClaim<'a> {
    map: &'a DashMap<PathBuf, ()>,
    path: PathBuf,
}

impl Drop for PathClaim<'_> {
    fn drop(&mut self) {
        self.map.remove(&self.path);
    }
}

impl FsStore {
    pub fn open(cfg: &EngineConfig) -> Result<Self> {
        let root = cfg.store_root.clone();
        let objects = root.join(OBJECTS_DIR);
        let staging = root.join(STAGING_DIR);
        std::fs::create_dir_all(&objects)?;
        std::fs::create_dir_all(&staging)?;

        let (journal, records) = Journal::open(&root.join(CATALOG_FILE))?;
        let mut index = CatalogIndex::default();
        for rec in &records {
            index.apply(rec);
        }
        let mut state = State { journal, index };

        let cleared = clear_dir(&staging)?;
        if cleared > 0 {
            tracing::warn!(files = cleared, "removed leftover staging files");
        }
        reconcile(&mut state, &objects, &root.join(ORPHANS_DIR))?;

        tracing::info!(
            root = %root.display(),
            records = state.index.len(),
            "store opened"
        );
        Ok(Self {
            root,
            objects,
            staging,
            sniff_len: cfg.sniff_len,
            reject_duplicate_paths: cfg.policy.reject_duplicate_paths,
            state: Mutex::new(state),
            ingesting: DashMap::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn object_path(&self, id: &RecordId) -> PathBuf {
        self.objects.join(id.as_str())
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|e| std::io::Error::other(e.to_string()).into())
    }

    fn present(&self, mut r: FileRecord) -> FileRecord {
        r.stored_path = self.object_path(&r.id);
        r
    }

    fn lookup(&self, st: &State, id: &RecordId) -> Result<FileRecord> {
        st.index
            .get(id)
            .cloned()
            .map(|r| self.present(r))
            .ok_or_else(|| PressaError::UnknownRecord(id.to_string()))
    }

    fn claim_path(&self, path: &Path) -> Result<PathClaim<'_>> {
        match self.ingesting.entry(path.to_path_buf()) {
            Entry::Occupied(_) => Err(PressaError::Duplicate(display_name(path))),
            Entry::Vacant(v) => {
                v.insert(());
                Ok(PathClaim {
                    map: &self.ingesting,
                    path: path.to_path_buf(),
                })
            }
        }
    }
}

impl ArtifactStore for FsStore {
    fn ingest(&self, source: &Path) -> Result<FileRecord> {
        let source = std::fs::canonicalize(source)?;
        if !std::fs::metadata(&source)?.is_file() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "source is not a regular file",
            )
            .into());
        }
        let _claim = self.claim_path(&source)?;
        if self.reject_duplicate_paths && self.lock()?.index.by_path(&source).is_some() {
            return Err(PressaError::Duplicate(display_name(&source)));
        }

        let mut src = File::open(&source)?;
        let mut staged = self.stage()?;
        let mut prefix = vec![0u8; self.sniff_len];
        let n = read_full(&mut src, &mut prefix)?;
        prefix.truncate(n);

        let mut hw = HashingForward::new(&mut staged);
        hw.write_all(&prefix)?;
        std::io::copy(&mut src, &mut hw)?;
        let (_, digest, size) = hw.finish();
        let guess = classify(&prefix);

        let id = RecordId::generate();
        let dest = self.object_path(&id);
        staged.commit(&dest)?;

        let record = FileRecord {
            id,
            original_path: source,
            stored_path: dest.clone(),
            original_size: size,
            compressed_size: None,
            detected_format: guess.mime_type,
            codec: None,
            digest,
            ingested_at: time::OffsetDateTime::now_utc().unix_timestamp(),
        };
        let mut st = self.lock()?;
        if let Err(e) = st.append(CatalogRecord::Ingested(record.clone())) {
            let _ = std::fs::remove_file(&dest);
            return Err(e);
        }
        tracing::info!(
            id = %record.id,
            size = record.original_size,
            format = %record.detected_format,
            "ingested"
        );
        Ok(record)
    }

    fn get(&self, id: &RecordId) -> Result<FileRecord> {
        let st = self.lock()?;
        self.lookup(&st, id)
    }

    fn list(&self) -> Result<Vec<FileRecord>> {
        let st = self.lock()?;
        Ok(st.index.iter().cloned().map(|r| self.present(r)).collect())
    }

    fn latest(&self) -> Result<Option<FileRecord>> {
        let st = self.lock()?;
        Ok(st.index.latest().cloned().map(|r| self.present(r)))
    }

    fn open_reader(&self, id: &RecordId) -> Result<Box<dyn Read + Send>> {
        self.get(id)?;
        let f = File::open(self.object_path(id))?;
        Ok(Box::new(f))
    }

    fn stage(&self) -> Result<StagedArtifact> {
        StagedArtifact::new_in(&self.staging)
    }

    fn commit_compressed(
        &self,
        id: &RecordId,
        staged: StagedArtifact,
        codec: CodecId,
    ) -> Result<FileRecord> {
        let mut st = self.lock()?;
        let prev = self.lookup(&st, id)?;
        st.append(CatalogRecord::Compressed {
            id: id.clone(),
            codec,
            compressed_size: staged.len(),
        })?;
        if let Err(e) = staged.commit(&self.object_path(id)) {
            st.revert(&prev);
            return Err(e);
        }
        self.lookup(&st, id)
    }

    fn commit_original(&self, id: &RecordId, staged: StagedArtifact) -> Result<FileRecord> {
        let mut st = self.lock()?;
        let record = self.lookup(&st, id)?;
        if staged.len() != record.original_size {
            return Err(PressaError::corrupt(format!(
                "restored {} bytes, record holds {}",
                staged.len(),
                record.original_size
            )));
        }
        st.append(CatalogRecord::Restored { id: id.clone() })?;
        if let Err(e) = staged.commit(&self.object_path(id)) {
            st.revert(&record);
            return Err(e);
        }
        self.lookup(&st, id)
    }

    fn remove(&self, id: &RecordId) -> Result<FileRecord> {
        let mut st = self.lock()?;
        let record = self.lookup(&st, id)?;
        st.append(CatalogRecord::Removed { id: id.clone() })?;
        match std::fs::remove_file(self.object_path(id)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            // unowned now; quarantined on the next open
            Err(e) => tracing::warn!(id = %id, error = %e, "could not delete removed artifact"),
        }
        tracing::info!(id = %id, "removed");
        Ok(record)
    }

    fn stats(&self) -> Result<StoreStats> {
        Ok(self.lock()?.index.stats())
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn clear_dir(dir: &Path) -> Result<usize> {
    let mut n = 0;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            std::fs::remove_file(entry.path())?;
            n += 1;
        }
    }
    Ok(n)
}

/// Bring the catalog back in line with `objects/` after a crash between a
/// catalog append and its artifact swap. Artifacts no record owns are moved
/// to `orphans/`, never deleted: a lost catalog record must stay recoverable.
fn reconcile(state: &mut State, objects: &Path, orphans: &Path) -> Result<()> {
    let records: Vec<FileRecord> = state.index.iter().cloned().collect();
    for r in &records {
        let path = objects.join(r.id.as_str());
        let len = match std::fs::metadata(&path) {
            Ok(m) => m.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(id = %r.id, "artifact missing from store");
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        if len == r.stored_size() {
            continue;
        }
        let fix = if r.is_compressed() && len == r.original_size {
            Some(CatalogRecord::Restored { id: r.id.clone() })
        } else {
            let mut head = [0u8; HEADER_LEN as usize];
            let n = read_full(&mut File::open(&path)?, &mut head)?;
            FrameHeader::parse(&head[..n])
                .ok()
                .map(|h| CatalogRecord::Compressed {
                    id: r.id.clone(),
                    codec: h.codec,
                    compressed_size: len,
                })
        };
        match fix {
            Some(rec) => {
                tracing::warn!(id = %r.id, fix = ?rec, "reconciling catalog with artifact");
                state.append(rec)?;
            }
            None => {
                tracing::warn!(id = %r.id, len, "artifact size disagrees with catalog");
            }
        }
    }

    for entry in std::fs::read_dir(objects)? {
        let entry = entry?;
        let name = entry.file_name();
        let owned = RecordId::parse(&name.to_string_lossy())
            .ok()
            .is_some_and(|id| state.index.get(&id).is_some());
        if !owned {
            std::fs::create_dir_all(orphans)?;
            let dest = orphans.join(&name);
            tracing::warn!(file = ?name, to = %dest.display(), "quarantining orphaned artifact");
            std::fs::rename(entry.path(), dest)?;
        }
    }
    Ok(())
}
