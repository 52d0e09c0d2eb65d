use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::codec::CodecId;
use crate::domain::{FileRecord, RecordId};
use crate::error::{PressaError, Result};
use crate::util::varint::{get_uvarint, put_uvarint};

const MAGIC: &[u8; 8] = b"PRZLOG\0\0";
const VERSION: u8 = 1;
const HEADER_LEN: u64 = MAGIC.len() as u64 + 1;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub enum CatalogRecord {
    Ingested(FileRecord),
    Compressed {
        id: RecordId,
        codec: CodecId,
        compressed_size: u64,
    },
    Restored {
        id: RecordId,
    },
    Removed {
        id: RecordId,
    },
}

impl CatalogRecord {
    pub fn id(&self) -> &RecordId {
        match self {
            CatalogRecord::Ingested(r) => &r.id,
            CatalogRecord::Compressed { id, .. }
            | CatalogRecord::Restored { id }
            | CatalogRecord::Removed { id } => id,
        }
    }
}

/// What the journal needs from its backing file.
pub trait LogFile: Write + Seek + Send {
    fn truncate_to(&mut self, len: u64) -> io::Result<()>;
    fn sync(&mut self) -> io::Result<()>;
}

impl LogFile for File {
    fn truncate_to(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.sync_data()
    }
}

/// Append-only catalog: `[magic][version]` then `uvarint len | CBOR record`
/// repeated. A torn final record is dropped on open.
///
/// A failed append is cut back off the file, so later records never land
/// behind a torn one. If that cut fails too, the journal refuses further
/// appends.
pub struct Journal {
    f: Box<dyn LogFile>,
    path: PathBuf,
    poisoned: bool,
}

impl Journal {
    /// Opens (or creates) the catalog and returns every intact record.
    pub fn open(path: &Path) -> Result<(Self, Vec<CatalogRecord>)> {
        let mut f = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        if f.metadata()?.len() == 0 {
            f.write_all(MAGIC)?;
            f.write_all(&[VERSION])?;
            f.sync_all()?;
            return Ok((Self::with_file(f, path), Vec::new()));
        }

        let mut head = [0u8; HEADER_LEN as usize];
        f.seek(SeekFrom::Start(0))?;
        f.read_exact(&mut head)
            .map_err(|_| PressaError::Catalog("catalog header is cut short".into()))?;
        if &head[..MAGIC.len()] != MAGIC {
            return Err(PressaError::Catalog("not a catalog file".into()));
        }
        if head[MAGIC.len()] != VERSION {
            return Err(PressaError::Catalog(format!(
                "unsupported catalog version {}",
                head[MAGIC.len()]
            )));
        }

        let (records, good_len) = replay(&mut BufReader::new(&mut f))?;
        let len = f.metadata()?.len();
        if good_len < len {
            tracing::warn!(
                catalog = %path.display(),
                dropped = len - good_len,
                "dropping torn catalog tail"
            );
            f.set_len(good_len)?;
            f.sync_all()?;
        }
        f.seek(SeekFrom::End(0))?;
        Ok((Self::with_file(f, path), records))
    }

    fn with_file(f: File, path: &Path) -> Self {
        Self {
            f: Box::new(f),
            path: path.to_path_buf(),
            poisoned: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record and sync it to disk before returning.
    pub fn append(&mut self, rec: &CatalogRecord) -> Result<()> {
        let mut payload = Vec::with_capacity(256);
        ciborium::into_writer(rec, &mut payload)
            .map_err(|e| PressaError::Catalog(format!("encode record: {e}")))?;
        let mut buf = Vec::with_capacity(payload.len() + 10);
        put_uvarint(&mut buf, payload.len() as u64);
        buf.extend_from_slice(&payload);

        if self.poisoned {
            return Err(PressaError::Catalog(
                "catalog closed after a failed rollback".into(),
            ));
        }
        let start = self.f.stream_position()?;
        let written = self.f.write_all(&buf).and_then(|()| self.f.sync());
        if let Err(e) = written {
            if let Err(rb) = self.rollback(start) {
                tracing::error!(
                    catalog = %self.path.display(),
                    error = %rb,
                    "could not cut a failed append; catalog closed"
                );
                self.poisoned = true;
            }
            return Err(e.into());
        }
        Ok(())
    }

    fn rollback(&mut self, start: u64) -> io::Result<()> {
        self.f.truncate_to(start)?;
        self.f.seek(SeekFrom::Start(start))?;
        self.f.sync()
    }

    #[cfg(test)]
    pub(crate) fn wrap_file(&mut self, wrap: impl FnOnce(Box<dyn LogFile>) -> Box<dyn LogFile>) {
        let placeholder: Box<dyn LogFile> = Box::new(io::Cursor::new(Vec::new()));
        let real = std::mem::replace(&mut self.f, placeholder);
        self.f = wrap(real);
    }
}


/// Reads records after the header; returns them with the offset just past
/// the last intact one.
fn replay<R: Read>(r: &mut R) -> Result<(Vec<CatalogRecord>, u64)> {
    let mut records = Vec::new();
    let mut good = HEADER_LEN;
    loop {
        let len = match get_uvarint(r) {
            Ok(Some(n)) => n,
            Ok(None) => break,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        };
        let mut payload = Vec::new();
        let got = r.by_ref().take(len).read_to_end(&mut payload)?;
        if (got as u64) < len {
            break;
        }
        let rec: CatalogRecord = match ciborium::from_reader(payload.as_slice()) {
            Ok(rec) => rec,
            Err(e) => {
                tracing::warn!(error = %e, "undecodable catalog record; stopping replay");
                break;
            }
        };
        let mut lenv = Vec::with_capacity(10);
        put_uvarint(&mut lenv, len);
        good += (lenv.len() as u64) + len;
        records.push(rec);
    }
    Ok((records, good))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn record(n: u8) -> FileRecord {
        FileRecord {
            id: RecordId::generate(),
            original_path: PathBuf::from(format!("/src/{n}.txt")),
            stored_path: PathBuf::from("objects/x"),
            original_size: n as u64,
            compressed_size: None,
            detected_format: "text/plain".into(),
            codec: None,
            digest: [n; 32],
            ingested_at: 1_700_000_000,
        }
    }

    #[test]
    fn records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.log");
        let a = record(1);
        {
            let (mut j, recs) = Journal::open(&path).unwrap();
            assert!(recs.is_empty());
            j.append(&CatalogRecord::Ingested(a.clone())).unwrap();
            j.append(&CatalogRecord::Compressed {
                id: a.id.clone(),
                codec: CodecId::Zstd,
                compressed_size: 40,
            })
            .unwrap();
        }
        let (_, recs) = Journal::open(&path).unwrap();
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0], CatalogRecord::Ingested(a.clone()));
        assert_eq!(recs[1].id(), &a.id);
    }

    #[test]
    fn torn_tail_is_dropped_and_appends_continue() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.log");
        let a = record(1);
        let b = record(2);
        {
            let (mut j, _) = Journal::open(&path).unwrap();
            j.append(&CatalogRecord::Ingested(a.clone())).unwrap();
        }
        // half a record: length prefix promising more than is there
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[0x40, 0xa1, 0x00]).unwrap();
        }
        {
            let (mut j, recs) = Journal::open(&path).unwrap();
            assert_eq!(recs.len(), 1);
            j.append(&CatalogRecord::Ingested(b.clone())).unwrap();
        }
        let (_, recs) = Journal::open(&path).unwrap();
        assert_eq!(
            recs,
            vec![CatalogRecord::Ingested(a), CatalogRecord::Ingested(b)]
        );
    }

    #[test]
    fn failed_append_is_cut_back_before_the_next_one() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.log");
        let (a, b, c) = (record(1), record(2), record(3));
        {
            let (mut j, _) = Journal::open(&path).unwrap();
            j.append(&CatalogRecord::Ingested(a.clone())).unwrap();

            let budget = faulty::inject(&mut j, 3);
            assert!(matches!(
                j.append(&CatalogRecord::Ingested(b)),
                Err(PressaError::Io(_))
            ));

            budget.store(usize::MAX, std::sync::atomic::Ordering::SeqCst);
            j.append(&CatalogRecord::Ingested(c.clone())).unwrap();
        }
        let (_, recs) = Journal::open(&path).unwrap();
        assert_eq!(
            recs,
            vec![CatalogRecord::Ingested(a), CatalogRecord::Ingested(c)]
        );
    }

    #[test]
    fn failed_rollback_closes_the_journal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.log");
        let (mut j, _) = Journal::open(&path).unwrap();
        let mut budget = None;
        j.wrap_file(|real| {
            let (mut faulty, b) = faulty::FaultyLog::new(real, 2);
            faulty.fail_truncate = true;
            budget = Some(b);
            Box::new(faulty)
        });
        let budget = budget.unwrap();

        assert!(j.append(&CatalogRecord::Ingested(record(1))).is_err());
        budget.store(usize::MAX, std::sync::atomic::Ordering::SeqCst);
        assert!(matches!(
            j.append(&CatalogRecord::Ingested(record(2))),
            Err(PressaError::Catalog(_))
        ));
    }

    #[test]
    fn foreign_files_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.log");
        std::fs::write(&path, b"definitely not a catalog").unwrap();
        assert!(matches!(Journal::open(&path), Err(PressaError::Catalog(_))));
    }
}
