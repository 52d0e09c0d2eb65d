use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub records: u64,
    pub compressed_records: u64,
    pub original_bytes: u64,
    /// Bytes currently on disk across all artifacts.
    pub stored_bytes: u64,
}

impl StoreStats {
    pub fn bytes_saved(&self) -> i64 {
        self.original_bytes as i64 - self.stored_bytes as i64
    }

    pub fn compression_ratio(&self) -> f32 {
        if self.stored_bytes == 0 {
            return 1.0;
        }
        self.original_bytes as f32 / self.stored_bytes as f32
    }
}
