use serde::{Deserialize, Serialize};

use crate::codec::CodecId;
use crate::error::{PressaError, Result};

pub const DEFAULT_LEVEL: i32 = 3;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Policy {
    /// Force this codec instead of the sniffer's recommendation.
    pub codec: Option<CodecId>,
    pub level: i32,
    /// Skip formats that are already compressed (media, archives, our own frames).
    pub skip_opaque: bool,
    /// Fraction of the original size a compress must save, e.g. 0.05 requires
    /// output at most 95% of the input; otherwise the job is a no-op.
    pub min_gain: Option<f32>,
    /// Refuse to ingest a source path that already has a live record.
    pub reject_duplicate_paths: bool,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            codec: None,
            level: DEFAULT_LEVEL,
            skip_opaque: true,
            min_gain: None,
            reject_duplicate_paths: false,
        }
    }
}

impl Policy {
    pub fn validate(&self) -> Result<()> {
        if let Some(g) = self.min_gain {
            if !(0.0..1.0).contains(&g) {
                return Err(PressaError::Config(format!("min_gain {g} outside [0, 1)")));
            }
        }
        if !(-7..=22).contains(&self.level) {
            return Err(PressaError::Config(format!("level {} outside -7..=22", self.level)));
        }
        Ok(())
    }

    /// Whether an encode from `original` to `stored` bytes is worth keeping.
    pub fn accepts_gain(&self, original: u64, stored: u64) -> bool {
        match self.min_gain {
            None => true,
            Some(g) => (stored as f64) <= (original as f64) * (1.0 - g as f64),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let p = Policy::default();
        assert_eq!(p.level, 3);
        assert!(p.skip_opaque);
        assert!(p.accepts_gain(10, 25));
        p.validate().unwrap();
    }

    #[test]
    fn min_gain_threshold() {
        let p = Policy {
            min_gain: Some(0.25),
            ..Default::default()
        };
        assert!(p.accepts_gain(100, 75));
        assert!(!p.accepts_gain(100, 76));
        assert!(Policy {
            min_gain: Some(1.5),
            ..Default::default()
        }
        .validate()
        .is_err());
    }
}
