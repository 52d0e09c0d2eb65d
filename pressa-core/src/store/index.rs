use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::domain::{FileRecord, RecordId};
use crate::stats::StoreStats;
use crate::store::journal::CatalogRecord;

/// In-memory view of the catalog, rebuilt by replaying it.
#[derive(Clone, Debug, Default)]
pub struct CatalogIndex {
    by_id: HashMap<RecordId, FileRecord>,
    by_path: HashMap<PathBuf, RecordId>,
    /// Ingest order, oldest first.
    order: Vec<RecordId>,
    stats: StoreStats,
}

impl CatalogIndex {
    pub fn apply(&mut self, rec: &CatalogRecord) {
        match rec {
            CatalogRecord::Ingested(r) => {
                if self.by_id.contains_key(&r.id) {
                    return;
                }
                self.stats.records += 1;
                self.stats.original_bytes += r.original_size;
                self.stats.stored_bytes += r.stored_size();
                if r.is_compressed() {
                    self.stats.compressed_records += 1;
                }
                self.by_path.insert(r.original_path.clone(), r.id.clone());
                self.order.push(r.id.clone());
                self.by_id.insert(r.id.clone(), r.clone());
            }
            CatalogRecord::Compressed {
                id,
                codec,
                compressed_size,
            } => {
                if let Some(r) = self.by_id.get_mut(id) {
                    self.stats.stored_bytes -= r.stored_size();
                    if !r.is_compressed() {
                        self.stats.compressed_records += 1;
                    }
                    r.compressed_size = Some(*compressed_size);
                    r.codec = Some(*codec);
                    self.stats.stored_bytes += r.stored_size();
                }
            }
            CatalogRecord::Restored { id } => {
                if let Some(r) = self.by_id.get_mut(id) {
                    self.stats.stored_bytes -= r.stored_size();
                    if r.is_compressed() {
                        self.stats.compressed_records -= 1;
                    }
                    r.compressed_size = None;
                    r.codec = None;
                    self.stats.stored_bytes += r.stored_size();
                }
            }
            CatalogRecord::Removed { id } => {
                if let Some(r) = self.by_id.remove(id) {
                    self.stats.records -= 1;
                    self.stats.original_bytes -= r.original_size;
                    self.stats.stored_bytes -= r.stored_size();
                    if r.is_compressed() {
                        self.stats.compressed_records -= 1;
                    }
                    if self.by_path.get(&r.original_path) == Some(id) {
                        self.by_path.remove(&r.original_path);
                    }
                    self.order.retain(|x| x != id);
                }
            }
        }
    }

    pub fn get(&self, id: &RecordId) -> Option<&FileRecord> {
        self.by_id.get(id)
    }

    pub fn by_path(&self, path: &Path) -> Option<&FileRecord> {
        self.by_path.get(path).and_then(|id| self.by_id.get(id))
    }

    pub fn latest(&self) -> Option<&FileRecord> {
        self.order.last().and_then(|id| self.by_id.get(id))
    }

    /// Records in ingest order.
    pub fn iter(&self) -> impl Iterator<Item = &FileRecord> + '_ {
        self.order.iter().filter_map(|id| self.by_id.get(id))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn stats(&self) -> StoreStats {
        self.stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CodecId;

    fn rec(path: &str, size: u64) -> FileRecord {
        FileRecord {
            id: RecordId::generate(),
            original_path: PathBuf::from(path),
            stored_path: PathBuf::new(),
            original_size: size,
            compressed_size: None,
            detected_format: "text/plain".into(),
            codec: None,
            digest: [0; 32],
            ingested_at: 0,
        }
    }

    #[test]
    fn stats_follow_compress_restore_remove() {
        let mut idx = CatalogIndex::default();
        let a = rec("/a", 100);
        let b = rec("/b", 50);
        idx.apply(&CatalogRecord::Ingested(a.clone()));
        idx.apply(&CatalogRecord::Ingested(b.clone()));
        assert_eq!(idx.stats().stored_bytes, 150);

        idx.apply(&CatalogRecord::Compressed {
            id: a.id.clone(),
            codec: CodecId::Zstd,
            compressed_size: 30,
        });
        let s = idx.stats();
        assert_eq!((s.compressed_records, s.stored_bytes, s.bytes_saved()), (1, 80, 70));

        idx.apply(&CatalogRecord::Restored { id: a.id.clone() });
        assert_eq!(idx.stats().stored_bytes, 150);
        assert_eq!(idx.get(&a.id).unwrap().codec, None);

        idx.apply(&CatalogRecord::Removed { id: b.id.clone() });
        assert_eq!(idx.stats(), StoreStats {
            records: 1,
            compressed_records: 0,
            original_bytes: 100,
            stored_bytes: 100,
        });
        assert!(idx.by_path(Path::new("/b")).is_none());
    }

    #[test]
    fn latest_tracks_ingest_order() {
        let mut idx = CatalogIndex::default();
        assert!(idx.latest().is_none());
        let a = rec("/a", 1);
        let b = rec("/b", 2);
        idx.apply(&CatalogRecord::Ingested(a.clone()));
        idx.apply(&CatalogRecord::Ingested(b.clone()));
        assert_eq!(idx.latest().unwrap().id, b.id);
        idx.apply(&CatalogRecord::Removed { id: b.id.clone() });
        assert_eq!(idx.latest().unwrap().id, a.id);
        assert_eq!(idx.iter().count(), 1);
    }
}
