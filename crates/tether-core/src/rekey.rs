//! Traffic-volume rekey policy.
//!
//! The application loop asks [`RekeyPolicy::needs_rekey`] before sealing
//! each packet and, when it answers true, sends a Rekey message before the
//! packet itself. The check is proactive: the threshold is never crossed
//! under one key.

use crate::FRAME_OVERHEAD;
use crate::codec::{Message, REKEY_MARKER};
use crate::error::CodecError;

/// Decides when an outbound channel must rotate its key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RekeyPolicy {
    threshold: u64,
    frame_overhead: u64,
}

impl RekeyPolicy {
    /// Policy with the standard packet overhead
    #[must_use]
    pub fn new(threshold: u64) -> Self {
        Self {
            threshold,
            frame_overhead: FRAME_OVERHEAD as u64,
        }
    }

    /// Policy with an explicit per-packet overhead
    #[must_use]
    pub fn with_overhead(threshold: u64, frame_overhead: u64) -> Self {
        Self {
            threshold,
            frame_overhead,
        }
    }

    /// Byte threshold
    #[must_use]
    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    /// Per-packet overhead counted against the threshold
    #[must_use]
    pub fn frame_overhead(&self) -> u64 {
        self.frame_overhead
    }

    /// True when sealing `next_packet_size` more bytes would reach the threshold.
    #[must_use]
    pub fn needs_rekey(&self, bytes_since_rekey: u64, next_packet_size: usize) -> bool {
        bytes_since_rekey
            .saturating_add(next_packet_size as u64)
            .saturating_add(self.frame_overhead)
            >= self.threshold
    }
}

/// The control message that rotates the sender's outbound key.
#[must_use]
pub fn build_rekey_message() -> Message {
    Message::Rekey
}

/// Check a decrypted Rekey payload.
///
/// # Errors
///
/// Returns [`CodecError::InvalidRekeyMarker`] for anything but the marker.
pub fn validate_rekey_payload(payload: &[u8]) -> Result<(), CodecError> {
    if payload == REKEY_MARKER {
        Ok(())
    } else {
        Err(CodecError::InvalidRekeyMarker)
    }
}

/// Rekey counters for one connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RekeyStats {
    /// Traffic-volume rekeys we initiated
    pub sent: u64,
    /// Traffic-volume rekeys the peer initiated
    pub received: u64,
    /// Identity-bound rekeys performed at the end of the handshake
    pub identity: u64,
}
