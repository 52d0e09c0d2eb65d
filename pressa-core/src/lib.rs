#![forbid(unsafe_code)]

pub mod config;
pub mod domain;
pub mod error;
pub mod policy;
pub mod sniff;
pub mod stats;

pub mod util {
    pub mod buf;
    pub mod hash_forward;
    pub mod varint;
}

pub mod codec;

pub mod container {
    pub mod block;
    pub mod header;
    pub mod tail;
}

pub mod pack {
    pub mod stream;
}

pub mod read {
    pub mod stream;
}

pub mod engine;
pub mod session;
pub mod store;

// Re-exports: stable API surface
pub use codec::{CodecDescriptor, CodecId};
pub use config::EngineConfig;
pub use domain::{FileRecord, RecordId};
pub use engine::command::{Request, Response};
pub use engine::{Engine, EngineError, EngineResult};
pub use error::{ErrorCode, PressaError, Result};
pub use pack::stream::{EncodeOptions, FrameWriter, encode, encode_chunks};
pub use policy::Policy;
pub use read::stream::{FrameReader, decode, decode_stream};
pub use session::control::{CancelToken, JobControl, ProgressSink};
pub use session::job::{Job, JobId, JobStatus, Operation, SessionState, SkipReason};
pub use sniff::{FormatClass, FormatGuess, classify};
pub use stats::StoreStats;
pub use store::{ArtifactStore, FsStore, StagedArtifact};
