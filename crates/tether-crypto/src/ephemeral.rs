//! Single-use secp256k1 ephemeral keys and ECDH key agreement.
//!
//! Provides secp256k1 key exchange with:
//! - SEC1 compressed public key encoding (33 bytes)
//! - On-curve validation of every peer key
//! - Secrets consumed by the exchange, so one keypair yields one shared secret
//! - Zeroization of sensitive data

use crate::{COMPRESSED_PUBLIC_KEY_SIZE, CryptoError, SECRET_KEY_SIZE, SHARED_SECRET_SIZE};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use rand_core::{CryptoRng, RngCore};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Ephemeral secret scalar. The inner key is zeroized on drop.
pub struct EphemeralSecret(k256::SecretKey);

/// Compressed, curve-validated ephemeral public key (33 bytes).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EphemeralPublicKey([u8; COMPRESSED_PUBLIC_KEY_SIZE]);

/// ECDH shared secret (x-coordinate of the shared point, 32 bytes).
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret([u8; SHARED_SECRET_SIZE]);

impl EphemeralSecret {
    /// Generate a new random secret scalar.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::RandomFailed`] if the RNG cannot produce bytes.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Result<Self, CryptoError> {
        let mut bytes = Zeroizing::new([0u8; SECRET_KEY_SIZE]);
        loop {
            rng.try_fill_bytes(&mut bytes[..])
                .map_err(|_| CryptoError::RandomFailed)?;
            // Zero and out-of-range scalars are redrawn
            if let Ok(secret) = k256::SecretKey::from_slice(&bytes[..]) {
                return Ok(Self(secret));
            }
        }
    }

    /// Import from raw scalar bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidSecretKey`] if the scalar is zero or not below the group order.
    pub fn from_bytes(bytes: &[u8; SECRET_KEY_SIZE]) -> Result<Self, CryptoError> {
        k256::SecretKey::from_slice(bytes)
            .map(Self)
            .map_err(|_| CryptoError::InvalidSecretKey)
    }

    /// Derive the public key from this secret.
    #[must_use]
    pub fn public_key(&self) -> EphemeralPublicKey {
        EphemeralPublicKey::from_point(&self.0.public_key())
    }

    /// Perform Diffie-Hellman key exchange, consuming the secret.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidPublicKey`] if the peer key does not decode to a curve point.
    pub fn diffie_hellman(self, peer: &EphemeralPublicKey) -> Result<SharedSecret, CryptoError> {
        let peer_point = k256::PublicKey::from_sec1_bytes(&peer.0)
            .map_err(|_| CryptoError::InvalidPublicKey)?;
        let shared = k256::ecdh::diffie_hellman(self.0.to_nonzero_scalar(), peer_point.as_affine());

        let mut bytes = [0u8; SHARED_SECRET_SIZE];
        bytes.copy_from_slice(shared.raw_secret_bytes().as_slice());
        Ok(SharedSecret(bytes))
    }
}

impl EphemeralPublicKey {
    fn from_point(point: &k256::PublicKey) -> Self {
        let encoded = point.to_encoded_point(true);
        let mut bytes = [0u8; COMPRESSED_PUBLIC_KEY_SIZE];
        bytes.copy_from_slice(encoded.as_bytes());
        Self(bytes)
    }

    /// Parse a compressed SEC1 point.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKeyLength`] for anything but 33 bytes and
    /// [`CryptoError::InvalidPublicKey`] for uncompressed encodings or points off the curve.
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

        let point =
            k256::PublicKey::from_sec1_bytes(bytes).map_err(|_| CryptoError::InvalidPublicKey)?;
        Ok(Self::from_point(&point))
    }

    /// Export public key as bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; COMPRESSED_PUBLIC_KEY_SIZE] {
        self.0
    }

    /// Get bytes as a slice.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; COMPRESSED_PUBLIC_KEY_SIZE] {
        &self.0
    }
}

impl SharedSecret {
    /// Get shared secret as bytes.
    ///
    /// # Security
    ///
    /// The shared secret must go through the channel key schedule
    /// before use as an encryption key.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; SHARED_SECRET_SIZE] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::OsRng;

    const GENERATOR_COMPRESSED: &str =
        "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798";

    fn decode_hex(hex: &str) -> Vec<u8> {
        (0..hex.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).unwrap())
            .collect()
    }

    #[test]
    fn test_key_generation() {
        let secret = EphemeralSecret::generate(&mut OsRng).unwrap();
        let public = secret.public_key();

        assert_eq!(public.as_bytes().len(), COMPRESSED_PUBLIC_KEY_SIZE);
        assert!(public.as_bytes()[0] == 0x02 || public.as_bytes()[0] == 0x03);
    }

    #[test]
    fn test_key_exchange_symmetry() {
        let alice = EphemeralSecret::generate(&mut OsRng).unwrap();
        let alice_public = alice.public_key();
        let bob = EphemeralSecret::generate(&mut OsRng).unwrap();
        let bob_public = bob.public_key();

        let alice_shared = alice.diffie_hellman(&bob_public).unwrap();
        let bob_shared = bob.diffie_hellman(&alice_public).unwrap();

        assert_eq!(alice_shared.as_bytes(), bob_shared.as_bytes());
    }

    #[test]
    fn test_scalar_one_is_generator() {
        let mut one = [0u8; 32];
        one[31] = 1;
        let secret = EphemeralSecret::from_bytes(&one).unwrap();

        assert_eq!(
            secret.public_key().as_bytes().to_vec(),
            decode_hex(GENERATOR_COMPRESSED)
        );
    }

    #[test]
    fn test_scalar_one_exchange_yields_peer_x() {
        let mut one = [0u8; 32];
        one[31] = 1;
        let secret = EphemeralSecret::from_bytes(&one).unwrap();
        let peer = EphemeralSecret::generate(&mut OsRng).unwrap().public_key();

        let shared = secret.diffie_hellman(&peer).unwrap();
        assert_eq!(&shared.as_bytes()[..], &peer.as_bytes()[1..]);
    }

    #[test]
    fn test_reject_zero_scalar() {
        assert!(matches!(
            EphemeralSecret::from_bytes(&[0u8; 32]),
            Err(CryptoError::InvalidSecretKey)
        ));
    }

    #[test]
    fn test_reject_wrong_length() {
        assert!(matches!(
            EphemeralPublicKey::from_slice(&[0x02; 32]),
            Err(CryptoError::InvalidKeyLength {
                expected: 33,
                actual: 32
            })
        ));
    }

    #[test]
    fn test_reject_uncompressed_prefix() {
        let mut bytes = decode_hex(GENERATOR_COMPRESSED);
        bytes[0] = 0x04;
        assert!(matches!(
            EphemeralPublicKey::from_slice(&bytes),
            Err(CryptoError::InvalidPublicKey)
        ));
    }

    #[test]
    fn test_reject_off_curve_point() {
        // x >= p is not a field element
        let mut bytes = [0xFFu8; 33];
        bytes[0] = 0x02;
        assert!(matches!(
            EphemeralPublicKey::from_slice(&bytes),
            Err(CryptoError::InvalidPublicKey)
        ));
    }

    #[test]
    fn test_public_key_parse_roundtrip() {
        let public = EphemeralSecret::generate(&mut OsRng).unwrap().public_key();
        let parsed = EphemeralPublicKey::from_slice(public.as_bytes()).unwrap();
        assert_eq!(parsed, public);
    }
}
