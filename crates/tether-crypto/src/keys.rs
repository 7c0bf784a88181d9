//! Per-direction channel key schedule.
//!
//! One ECDH shared secret yields one [`ChannelKeys`] on each endpoint:
//!
//! ```text
//! prk        = extract("tether-channel-v1", shared_x || suite)
//! payload    = expand(prk, "payload-key")    32 bytes, AEAD key
//! header     = expand(prk, "header-key")     32 bytes, length mask key
//! nonce_salt = expand(prk, "nonce-salt")     16 bytes
//! session_id = expand(prk, "session-id")     32 bytes, transcript binding
//! ```
//!
//! Rotation replaces the payload and header keys only:
//!
//! ```text
//! prk'     = extract(session_id, payload || header || mix_in)
//! payload' = expand(prk', "rekey-payload-key")
//! header'  = expand(prk', "rekey-header-key")
//! ```

use crate::aead::{AeadKey, NONCE_SALT_SIZE, Nonce};
use crate::hash::{hkdf_expand, hkdf_extract};
use crate::{CipherSuite, CryptoError, SESSION_ID_SIZE, SharedSecret};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

const CHANNEL_SALT: &[u8] = b"tether-channel-v1";

/// Size of the masked length header.
pub const LENGTH_MASK_SIZE: usize = 4;

/// Symmetric state of one direction of a channel.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct ChannelKeys {
    payload_key: AeadKey,
    header_key: [u8; 32],
    nonce_salt: [u8; NONCE_SALT_SIZE],
    session_id: [u8; SESSION_ID_SIZE],
}

impl ChannelKeys {
    /// Derive channel keys from an ECDH shared secret.
    #[must_use]
    pub fn derive(shared: &SharedSecret, suite: CipherSuite) -> Self {
        let mut ikm = Zeroizing::new([0u8; 33]);
        ikm[..32].copy_from_slice(shared.as_bytes());
        ikm[32] = suite.as_u8();
        let prk = Zeroizing::new(hkdf_extract(CHANNEL_SALT, &ikm[..]));

        let mut payload = Zeroizing::new([0u8; 32]);
        let mut header_key = [0u8; 32];
        let mut nonce_salt = [0u8; NONCE_SALT_SIZE];
        let mut session_id = [0u8; SESSION_ID_SIZE];
        hkdf_expand(&prk, b"payload-key", &mut payload[..]);
        hkdf_expand(&prk, b"header-key", &mut header_key);
        hkdf_expand(&prk, b"nonce-salt", &mut nonce_salt);
        hkdf_expand(&prk, b"session-id", &mut session_id);

        Self {
            payload_key: AeadKey::new(*payload),
            header_key,
            nonce_salt,
            session_id,
        }
    }

    /// Derive the next generation of keys, mixing in caller material.
    ///
    /// An empty `mix_in` is a plain volume rekey. Session id and nonce salt
    /// carry over unchanged.
    #[must_use]
    pub fn rotate(&self, mix_in: &[u8]) -> Self {
        let mut ikm = Zeroizing::new(Vec::with_capacity(64 + mix_in.len()));
        ikm.extend_from_slice(self.payload_key.as_bytes());
        ikm.extend_from_slice(&self.header_key);
        ikm.extend_from_slice(mix_in);
        let prk = Zeroizing::new(hkdf_extract(&self.session_id, &ikm));

        let mut payload = Zeroizing::new([0u8; 32]);
        let mut header_key = [0u8; 32];
        hkdf_expand(&prk, b"rekey-payload-key", &mut payload[..]);
        hkdf_expand(&prk, b"rekey-header-key", &mut header_key);

        Self {
            payload_key: AeadKey::new(*payload),
            header_key,
            nonce_salt: self.nonce_salt,
            session_id: self.session_id,
        }
    }

    /// Transcript binding identifier shared by both ends of the channel.
    #[must_use]
    pub fn session_id(&self) -> &[u8; SESSION_ID_SIZE] {
        &self.session_id
    }

    /// Keystream bytes that mask the length header of packet `sequence`.
    #[must_use]
    pub fn length_mask(&self, sequence: u64) -> [u8; LENGTH_MASK_SIZE] {
        let mut hasher = blake3::Hasher::new_keyed(&self.header_key);
        hasher.update(&sequence.to_le_bytes());
        let output = hasher.finalize();

        let mut mask = [0u8; LENGTH_MASK_SIZE];
        mask.copy_from_slice(&output.as_bytes()[..LENGTH_MASK_SIZE]);
        mask
    }

    /// Seal `plaintext` as packet number `sequence`.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::EncryptionFailed` if AEAD encryption fails.
    pub fn seal(&self, sequence: u64, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let nonce = Nonce::from_counter(sequence, &self.nonce_salt);
        self.payload_key.encrypt(&nonce, plaintext, aad)
    }

    /// Open packet number `sequence`.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::DecryptionFailed` on authentication failure.
    pub fn open(
        &self,
        sequence: u64,
        ciphertext_and_tag: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let nonce = Nonce::from_counter(sequence, &self.nonce_salt);
        self.payload_key.decrypt(&nonce, ciphertext_and_tag, aad)
    }

    /// Commitment to the current payload key.
    #[must_use]
    pub fn fingerprint(&self) -> [u8; 32] {
        self.payload_key.commitment()
    }
}
