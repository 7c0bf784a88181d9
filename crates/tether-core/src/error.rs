//! Error types for the tether core protocol.

use crate::codec::MessageType;
use crate::connection::{ConnectionState, HandshakeStep};
use thiserror::Error;

/// Core protocol errors
///
/// Every variant is fatal for the connection that produced it.
#[derive(Debug, Error)]
pub enum Error {
    /// Message encoding error
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Ephemeral channel error
    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Handshake error
    #[error("handshake error: {0}")]
    Handshake(#[from] HandshakeError),

    /// Cryptographic error
    #[error("crypto error: {0}")]
    Crypto(#[from] tether_crypto::CryptoError),

    /// Rejected connection configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Whether this is a handshake-order violation
    #[must_use]
    pub fn is_invalid_state(&self) -> bool {
        matches!(self, Self::Handshake(HandshakeError::InvalidState { .. }))
    }

    /// Whether this is an AEAD authentication failure on an inbound packet
    #[must_use]
    pub fn is_decryption_failure(&self) -> bool {
        matches!(self, Self::Channel(ChannelError::Decryption))
    }
}

/// Message-level errors
#[derive(Debug, Error)]
pub enum CodecError {
    /// Empty input where a tagged message was expected
    #[error("empty message")]
    Empty,

    /// Message tag not in the message table
    #[error("unknown message type: 0x{0:02X}")]
    UnknownMessageType(u8),

    /// Payload length does not match the message table
    #[error("invalid {message_type:?} payload: expected {expected} bytes, got {actual}")]
    InvalidLength {
        /// Message whose payload was malformed
        message_type: MessageType,
        /// Length from the message table
        expected: usize,
        /// Length received
        actual: usize,
    },

    /// Input too short to hold a length header
    #[error("too short: expected at least {expected}, got {actual}")]
    TooShort {
        /// Expected minimum size
        expected: usize,
        /// Actual size received
        actual: usize,
    },

    /// Rekey message did not carry the fixed marker payload
    #[error("invalid rekey marker")]
    InvalidRekeyMarker,
}

/// Ephemeral channel errors
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Peer ephemeral key was malformed or not a curve point
    #[error("key agreement failed: {0}")]
    KeyAgreement(#[source] tether_crypto::CryptoError),

    /// Setup message consumed twice on one channel
    #[error("session key already derived")]
    AlreadyDerived,

    /// Channel used before its session key exists
    #[error("channel not established")]
    NotEstablished,

    /// AEAD sealing failed
    #[error("encryption failed")]
    Encryption,

    /// Inbound packet failed authentication
    #[error("packet authentication failed")]
    Decryption,

    /// Packet sequence number space exhausted
    #[error("nonce counter overflow")]
    NonceOverflow,

    /// Plaintext larger than a single packet may carry
    #[error("packet too large: {0} bytes")]
    PacketTooLarge(usize),
}

/// Handshake errors
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// Operation or message not allowed at this point of the handshake
    #[error("invalid state: {message:?} received in {state:?} at step {step:?}")]
    InvalidState {
        /// Connection state when the violation happened
        state: ConnectionState,
        /// Handshake step when the violation happened
        step: HandshakeStep,
        /// Offending message, if the violation was caused by one
        message: Option<MessageType>,
    },

    /// Challenge, propose or reply failed verification against the pinned key
    #[error("authentication failed: {0}")]
    Authentication(#[source] tether_crypto::CryptoError),
}
