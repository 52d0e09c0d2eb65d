// pressa_core/src/domain.rs
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::codec::CodecId;
use crate::error::{PressaError, Result};

/// Stable identifier of a File Record; also the artifact's file name under `objects/`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RecordId(String);

impl RecordId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Accepts any UUID spelling, normalises to the simple (32 hex) form.
    pub fn parse(s: &str) -> Result<Self> {
        let id = uuid::Uuid::parse_str(s.trim())
            .map_err(|_| PressaError::UnknownRecord(s.to_string()))?;
        Ok(Self(id.simple().to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for RecordId {
    type Error = PressaError;
    fn try_from(s: String) -> Result<Self> {
        RecordId::parse(&s)
    }
}

impl From<RecordId> for String {
    fn from(id: RecordId) -> Self {
        id.0
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: RecordId,
    pub original_path: PathBuf,
    pub stored_path: PathBuf,
    pub original_size: u64,
    /// Set only while the stored artifact is a compressed frame.
    pub compressed_size: Option<u64>,
    pub detected_format: String,
    pub codec: Option<CodecId>,
    pub digest: [u8; 32],
    pub ingested_at: i64,
}

impl FileRecord {
    pub fn is_compressed(&self) -> bool {
        self.compressed_size.is_some()
    }

    /// Size of the artifact currently on disk.
    pub fn stored_size(&self) -> u64 {
        self.compressed_size.unwrap_or(self.original_size)
    }

    pub fn bytes_saved(&self) -> i64 {
        self.original_size as i64 - self.stored_size() as i64
    }

    pub fn digest_hex(&self) -> String {
        hex::encode(self.digest)
    }
}
