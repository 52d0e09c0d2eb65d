use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::codec::{CodecDescriptor, CodecId};
use crate::domain::FileRecord;
use crate::session::job::{Job, JobId, SkipReason};
use crate::sniff::FormatGuess;
use crate::stats::StoreStats;

/// One typed command per engine operation, tagged by `command` on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Request {
    #[serde(alias = "save_file_inside_db")]
    SaveFile {
        #[serde(alias = "path")]
        file: PathBuf,
    },
    Compress {
        #[serde(default)]
        file_id: Option<String>,
        #[serde(default)]
        codec: Option<CodecId>,
        #[serde(default)]
        level: Option<i32>,
    },
    Decompress {
        file_id: String,
    },
    Analyze {
        file_id: String,
    },
    List,
    Remove {
        file_id: String,
    },
    Stats,
    Codecs,
}

impl Request {
    pub fn name(&self) -> &'static str {
        match self {
            Request::SaveFile { .. } => "save_file",
            Request::Compress { .. } => "compress",
            Request::Decompress { .. } => "decompress",
            Request::Analyze { .. } => "analyze",
            Request::List => "list",
            Request::Remove { .. } => "remove",
            Request::Stats => "stats",
            Request::Codecs => "codecs",
        }
    }
}

/// Caller-facing view of a File Record.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RecordView {
    pub file_id: String,
    pub original_path: PathBuf,
    pub stored_path: PathBuf,
    pub original_size: u64,
    pub compressed_size: Option<u64>,
    pub bytes_saved: i64,
    pub detected_format: String,
    pub codec: Option<CodecId>,
    pub digest: String,
    pub ingested_at: i64,
}

impl From<&FileRecord> for RecordView {
    fn from(r: &FileRecord) -> Self {
        Self {
            file_id: r.id.to_string(),
            original_path: r.original_path.clone(),
            stored_path: r.stored_path.clone(),
            original_size: r.original_size,
            compressed_size: r.compressed_size,
            bytes_saved: r.bytes_saved(),
            detected_format: r.detected_format.clone(),
            codec: r.codec,
            digest: r.digest_hex(),
            ingested_at: r.ingested_at,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct JobOutcome {
    pub file_id: String,
    pub job: JobId,
    pub bytes_saved: i64,
    pub codec: Option<CodecId>,
    pub skipped: Option<SkipReason>,
}

impl From<&Job> for JobOutcome {
    fn from(j: &Job) -> Self {
        Self {
            file_id: j.record.to_string(),
            job: j.id,
            bytes_saved: j.bytes_saved,
            codec: j.codec,
            skipped: j.skipped,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Response {
    Saved {
        file_id: String,
        stored_path: PathBuf,
        original_size: u64,
        detected_format: String,
    },
    Compressed(JobOutcome),
    Decompressed(JobOutcome),
    Analysis(FormatGuess),
    Records {
        records: Vec<RecordView>,
    },
    Removed {
        file_id: String,
    },
    Stats {
        #[serde(flatten)]
        stats: StoreStats,
        bytes_saved: i64,
    },
    Codecs {
        codecs: Vec<CodecDescriptor>,
    },
}
