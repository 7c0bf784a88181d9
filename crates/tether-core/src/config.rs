//! Connection configuration.

use crate::FRAME_OVERHEAD;
use crate::error::Error;
use serde::{Deserialize, Serialize};

/// Default traffic-volume rekey threshold (1 GiB)
pub const DEFAULT_REKEY_THRESHOLD: u64 = 1024 * 1024 * 1024;

/// Per-connection parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Bytes sealed under one outbound key before a rekey is required
    pub rekey_threshold: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            rekey_threshold: DEFAULT_REKEY_THRESHOLD,
        }
    }
}

impl ConnectionConfig {
    /// Configuration with a custom rekey threshold
    #[must_use]
    pub fn with_rekey_threshold(rekey_threshold: u64) -> Self {
        Self { rekey_threshold }
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the threshold cannot fit a
    /// single packet's overhead.
    pub fn validate(&self) -> Result<(), Error> {
        if self.rekey_threshold <= FRAME_OVERHEAD as u64 {
            return Err(Error::InvalidConfig(format!(
                "rekey_threshold must exceed the {FRAME_OVERHEAD}-byte frame overhead, got {}",
                self.rekey_threshold
            )));
        }
        Ok(())
    }
}
