//! Long-term secp256k1 identity keys and ECDSA signatures.
//!
//! An endpoint holds one [`IdentityKeyPair`] for the lifetime of the process
//! and a [`PinnedPeerKey`] for its counterparty, both supplied by the caller's
//! identity store before any handshake starts.
//!
//! ## Security Properties
//!
//! - **Deterministic nonces**: RFC 6979, no RNG required for signing
//! - **Low-S signatures**: 64-byte `r || s`, malleable encodings rejected on verify
//! - **Zeroization**: signing scalars are cleared on drop

use crate::{COMPRESSED_PUBLIC_KEY_SIZE, CryptoError, SECRET_KEY_SIZE, SIGNATURE_SIZE};
use k256::ecdsa::signature::{Signer, Verifier};
use rand_core::{CryptoRng, RngCore};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

/// ECDSA signature (64 bytes, `r || s`)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Signature([u8; SIGNATURE_SIZE]);

impl Signature {
    /// Create a signature from raw bytes
    #[must_use]
    pub fn from_bytes(bytes: [u8; SIGNATURE_SIZE]) -> Self {
        Self(bytes)
    }

    /// Create a signature from a slice
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidSignature`] if the slice is not exactly 64 bytes.
    pub fn from_slice(slice: &[u8]) -> Result<Self, CryptoError> {
        if slice.len() != SIGNATURE_SIZE {
            return Err(CryptoError::InvalidSignature);
        }
        let mut bytes = [0u8; SIGNATURE_SIZE];
        bytes.copy_from_slice(slice);
        Ok(Self(bytes))
    }

    /// Get the raw signature bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; SIGNATURE_SIZE] {
        &self.0
    }
}

/// Identity public key, stored as a validated compressed point.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct IdentityPublicKey([u8; COMPRESSED_PUBLIC_KEY_SIZE]);

impl IdentityPublicKey {
    /// Parse a compressed SEC1 public key
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKeyLength`] for anything but 33 bytes and
    /// [`CryptoError::InvalidPublicKey`] if the bytes are not a compressed curve point.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != COMPRESSED_PUBLIC_KEY_SIZE {
            return Err(CryptoError::InvalidKeyLength {
                expected: COMPRESSED_PUBLIC_KEY_SIZE,
                actual: bytes.len(),
            });
        }
        if bytes[0] != 0x02 && bytes[0] != 0x03 {
            return Err(CryptoError::InvalidPublicKey);
        }
        k256::ecdsa::VerifyingKey::from_sec1_bytes(bytes)
            .map_err(|_| CryptoError::InvalidPublicKey)?;

        let mut key = [0u8; COMPRESSED_PUBLIC_KEY_SIZE];
        key.copy_from_slice(bytes);
        Ok(Self(key))
    }

    /// Get the raw compressed key bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; COMPRESSED_PUBLIC_KEY_SIZE] {
        &self.0
    }

    /// Verify a signature on a message
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidSignature`] if the signature is malformed
    /// or does not authenticate the message under this key.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<(), CryptoError> {
        let key = k256::ecdsa::VerifyingKey::from_sec1_bytes(&self.0)
            .map_err(|_| CryptoError::InvalidPublicKey)?;
        let signature = k256::ecdsa::Signature::from_slice(signature.as_bytes())
            .map_err(|_| CryptoError::InvalidSignature)?;

        key.verify(message, &signature)
            .map_err(|_| CryptoError::InvalidSignature)
    }
}

/// Long-term identity keypair.
///
/// Contains the secret signing scalar, zeroized on drop.
pub struct IdentityKeyPair {
    signing: k256::ecdsa::SigningKey,
    public: IdentityPublicKey,
}

impl IdentityKeyPair {
    /// Generate a new random identity.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::RandomFailed`] if the RNG cannot produce bytes.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Result<Self, CryptoError> {
        let mut bytes = Zeroizing::new([0u8; SECRET_KEY_SIZE]);
        loop {
            rng.try_fill_bytes(&mut bytes[..])
                .map_err(|_| CryptoError::RandomFailed)?;
            if let Ok(identity) = Self::from_secret_bytes(&bytes[..]) {
                return Ok(identity);
            }
        }
    }

    /// Restore an identity from its 32-byte secret scalar.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKeyLength`] for the wrong length and
    /// [`CryptoError::InvalidSecretKey`] for a zero or out-of-range scalar.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != SECRET_KEY_SIZE {
            return Err(CryptoError::InvalidKeyLength {
                expected: SECRET_KEY_SIZE,
                actual: bytes.len(),
            });
        }
        let signing = k256::ecdsa::SigningKey::from_slice(bytes)
            .map_err(|_| CryptoError::InvalidSecretKey)?;

        let encoded = signing.verifying_key().to_encoded_point(true);
        let public = IdentityPublicKey::from_slice(encoded.as_bytes())?;

        Ok(Self { signing, public })
    }

    /// Public half of the identity
    #[must_use]
    pub fn public_key(&self) -> &IdentityPublicKey {
        &self.public
    }

    /// Sign a message (SHA-256 prehash, RFC 6979 nonce, low-S).
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> Signature {
        let signature: k256::ecdsa::Signature = self.signing.sign(message);
        let mut bytes = [0u8; SIGNATURE_SIZE];
        bytes.copy_from_slice(signature.to_bytes().as_slice());
        Signature(bytes)
    }

    /// Export the secret scalar (for the identity store).
    ///
    /// # Security
    ///
    /// This exposes the raw secret key bytes; the returned buffer zeroizes on drop.
    #[must_use]
    pub fn secret_bytes(&self) -> Zeroizing<[u8; SECRET_KEY_SIZE]> {
        let mut bytes = Zeroizing::new([0u8; SECRET_KEY_SIZE]);
        bytes.copy_from_slice(self.signing.to_bytes().as_slice());
        bytes
    }
}

/// The counterparty's identity key, obtained out-of-band and trusted for
/// the life of a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PinnedPeerKey(IdentityPublicKey);

impl PinnedPeerKey {
    /// Pin an identity key
    #[must_use]
    pub fn new(key: IdentityPublicKey) -> Self {
        Self(key)
    }

    /// The pinned key
    #[must_use]
    pub fn key(&self) -> &IdentityPublicKey {
        &self.0
    }

    /// Constant-time comparison against a presented identity key
    #[must_use]
    pub fn matches(&self, presented: &IdentityPublicKey) -> bool {
        self.0.as_bytes().ct_eq(presented.as_bytes()).into()
    }
}
