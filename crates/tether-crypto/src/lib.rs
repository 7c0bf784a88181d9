//! # tether Crypto
//!
//! Cryptographic primitives for the tether channel protocol.
//!
//! This crate provides:
//! - Single-use secp256k1 ephemeral keys and ECDH key agreement
//! - Long-term secp256k1 identity keys with ECDSA challenge signatures
//! - A BLAKE3 key schedule for per-direction channel keys and key rotation
//! - `XChaCha20-Poly1305` AEAD sealing
//! - Challenge / propose / reply transcript functions for mutual authentication
//!
//! ## Cryptographic Suite
//!
//! | Function | Algorithm | Security Level |
//! |----------|-----------|----------------|
//! | Key Exchange | ECDH secp256k1 | 128-bit |
//! | Signatures | ECDSA secp256k1 (low-S) | 128-bit |
//! | AEAD | XChaCha20-Poly1305 | 256-bit key |
//! | Hash | BLAKE3 | 128-bit collision |
//! | KDF | HKDF-BLAKE3 | 128-bit |

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod aead;
pub mod auth;
pub mod ephemeral;
pub mod error;
pub mod hash;
pub mod identity;
pub mod keys;

pub use error::CryptoError;
pub use ephemeral::{EphemeralPublicKey, EphemeralSecret, SharedSecret};
pub use identity::{IdentityKeyPair, IdentityPublicKey, PinnedPeerKey, Signature};
pub use keys::ChannelKeys;

/// SEC1 compressed secp256k1 point size
pub const COMPRESSED_PUBLIC_KEY_SIZE: usize = 33;

/// secp256k1 secret scalar size
pub const SECRET_KEY_SIZE: usize = 32;

/// ECDH shared secret size (x-coordinate)
pub const SHARED_SECRET_SIZE: usize = 32;

/// Compact ECDSA signature size (`r || s`)
pub const SIGNATURE_SIZE: usize = 64;

/// Transcript hash size for challenge and propose messages
pub const TRANSCRIPT_HASH_SIZE: usize = 32;

/// Session identifier size
pub const SESSION_ID_SIZE: usize = 32;

/// Cipher suite identifiers carried in the channel setup message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CipherSuite {
    /// XChaCha20-Poly1305 payload sealing with BLAKE3-masked length headers
    XChaCha20Poly1305Blake3 = 0x00,
}

impl CipherSuite {
    /// Wire identifier of the suite.
    #[must_use]
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for CipherSuite {
    type Error = CryptoError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Self::XChaCha20Poly1305Blake3),
            other => Err(CryptoError::UnsupportedCipherSuite(other)),
        }
    }
}
