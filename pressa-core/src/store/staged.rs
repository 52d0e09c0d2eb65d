use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

use crate::error::{PressaError, Result};

/// A temporary file under the store's `staging/` directory. It only becomes
/// visible by being renamed over its destination in `commit`; dropping it
/// deletes the file.
pub struct StagedArtifact {
    file: NamedTempFile,
    written: u64,
}

impl StagedArtifact {
    pub fn new_in(dir: &Path) -> Result<Self> {
        let file = tempfile::Builder::new()
            .prefix("stage-")
            .suffix(".tmp")
            .tempfile_in(dir)?;
        Ok(Self { file, written: 0 })
    }

    pub fn len(&self) -> u64 {
        self.written
    }

    pub fn is_empty(&self) -> bool {
        self.written == 0
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Flush, fsync and rename over `dest`.
    pub fn commit(mut self, dest: &Path) -> Result<u64> {
        self.file.flush()?;
        self.file.as_file().sync_all()?;
        let written = self.written;
        self.file
            .persist(dest)
            .map_err(|e| PressaError::Io(e.error))?;
        sync_parent(dest);
        Ok(written)
    }
}

impl Write for StagedArtifact {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.file.flush()
    }
}

// Best effort: directory fsync is not available everywhere.
fn sync_parent(path: &Path) {
    #[cfg(unix)]
    if let Some(parent) = path.parent() {
        if let Ok(dir) = std::fs::File::open(parent) {
            let _ = dir.sync_all();
        }
    }
    #[cfg(not(unix))]
    let _ = path;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_replaces_destination() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("artifact");
        std::fs::write(&dest, b"old").unwrap();

        let mut s = StagedArtifact::new_in(dir.path()).unwrap();
        s.write_all(b"brand new").unwrap();
        assert_eq!(s.len(), 9);
        assert_eq!(s.commit(&dest).unwrap(), 9);
        assert_eq!(std::fs::read(&dest).unwrap(), b"brand new");
    }

    #[test]
    fn dropping_leaves_destination_alone() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("artifact");
        std::fs::write(&dest, b"old").unwrap();

        let staged_path = {
            let mut s = StagedArtifact::new_in(dir.path()).unwrap();
            s.write_all(b"half of someth").unwrap();
            s.path().to_path_buf()
        };
        assert!(!staged_path.exists());
        assert_eq!(std::fs::read(&dest).unwrap(), b"old");
    }
}
