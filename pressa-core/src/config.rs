use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{PressaError, Result};
use crate::pack::stream::DEFAULT_BLOCK_SIZE;
use crate::policy::Policy;
use crate::sniff::DEFAULT_SNIFF_LEN;

pub const MIN_BLOCK_SIZE: usize = 4 * 1024;
pub const MAX_BLOCK_SIZE: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub store_root: PathBuf,
    pub block_size: usize,
    pub sniff_len: usize,
    /// Finished jobs kept in memory for `recent_jobs`.
    pub job_history: usize,
    pub policy: Policy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            store_root: PathBuf::from(".pressa"),
            block_size: DEFAULT_BLOCK_SIZE,
            sniff_len: DEFAULT_SNIFF_LEN,
            job_history: 64,
            policy: Policy::default(),
        }
    }
}

impl EngineConfig {
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            store_root: root.into(),
            ..Self::default()
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let cfg: EngineConfig =
            toml::from_str(contents).map_err(|e| PressaError::Config(e.message().to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Optional TOML file first, then an explicit store root on top.
    pub fn load(file: Option<&Path>, store_root: Option<PathBuf>) -> Result<Self> {
        let mut cfg = match file {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        if let Some(root) = store_root {
            cfg.store_root = root;
        }
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if !(MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&self.block_size) {
            return Err(PressaError::Config(format!(
                "block_size {} outside {MIN_BLOCK_SIZE}..={MAX_BLOCK_SIZE}",
                self.block_size
            )));
        }
        if self.sniff_len == 0 {
            return Err(PressaError::Config("sniff_len must be positive".into()));
        }
        self.policy.validate()
    }
}
