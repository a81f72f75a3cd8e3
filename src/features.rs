//! Encoding features fixed when a [`Trace`](crate::Trace) is constructed.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Toggles for the size-reducing encodings.
///
/// Both default to on. Missing keys in a JSON document fall back to the
/// default, so `{"interning": false}` only turns interning off.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Features {
    /// Replace event names and annotation values with interning ids.
    pub interning: bool,
    /// Encode event timestamps as deltas on an incremental clock.
    pub incremental_timestamps: bool,
}

impl Default for Features {
    fn default() -> Self {
        Self {
            interning: true,
            incremental_timestamps: true,
        }
    }
}

impl Features {
    /// Both encodings off: every packet is self-describing.
    pub const PLAIN: Features = Features {
        interning: false,
        incremental_timestamps: false,
    };

    /// True if any feature requires the consumer to keep per-sequence state.
    pub fn is_incremental(&self) -> bool {
        self.interning || self.incremental_timestamps
    }

    pub fn from_json(buf: &str) -> Result<Self> {
        Ok(serde_json::from_str(buf)?)
    }

    /// Load features from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let buf = fs::read_to_string(path)?;
        Self::from_json(&buf)
    }
}
