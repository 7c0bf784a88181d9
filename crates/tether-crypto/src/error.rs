//! Cryptographic error types.

use thiserror::Error;

/// Cryptographic errors
#[derive(Debug, Error)]
pub enum CryptoError {
    /// AEAD encryption failed
    #[error("encryption failed")]
    EncryptionFailed,

    /// AEAD decryption failed (authentication failure)
    #[error("decryption failed: authentication failure")]
    DecryptionFailed,

    /// Invalid key length
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// Invalid public key (wrong encoding or not on the curve)
    #[error("invalid public key")]
    InvalidPublicKey,

    /// Invalid secret key scalar
    #[error("invalid secret key")]
    InvalidSecretKey,

    /// Cipher suite byte not recognized
    #[error("unsupported cipher suite: 0x{0:02X}")]
    UnsupportedCipherSuite(u8),

    /// Random number generation failed
    #[error("random number generation failed")]
    RandomFailed,

    /// Invalid signature
    #[error("invalid signature")]
    InvalidSignature,

    /// Challenge or propose hash did not match the expected transcript
    #[error("transcript mismatch")]
    TranscriptMismatch,
}
