//! Unidirectional ephemeral channels.
//!
//! A connection owns exactly two channels. The outbound channel announces
//! its ephemeral key in our Setup-Init and completes when the peer's
//! Setup-Ack arrives; the inbound channel completes on the peer's Setup-Init
//! and answers with our Setup-Ack. Each ephemeral secret is consumed by its
//! single key agreement.

use crate::codec::{self, Message, MessageType};
use crate::error::ChannelError;
use crate::{FRAME_OVERHEAD, LENGTH_PREFIX_SIZE, MAC_SIZE, MAX_PLAINTEXT_SIZE};
use rand_core::{CryptoRng, RngCore};
use tether_crypto::{
    COMPRESSED_PUBLIC_KEY_SIZE, ChannelKeys, CipherSuite, CryptoError, EphemeralPublicKey,
    EphemeralSecret, SESSION_ID_SIZE,
};

/// Direction of a channel relative to the local endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Peer to us
    Inbound,
    /// Us to peer
    Outbound,
}

/// One direction of an encrypted connection.
pub struct EphemeralChannel {
    direction: Direction,
    suite: CipherSuite,
    secret: Option<EphemeralSecret>,
    local_public: EphemeralPublicKey,
    peer_public: Option<EphemeralPublicKey>,
    keys: Option<ChannelKeys>,
    sequence: u64,
    bytes_since_rekey: u64,
    generation: u32,
}

impl EphemeralChannel {
    /// Create a channel with a fresh single-use ephemeral keypair.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::RandomFailed`] if the RNG fails.
    pub fn generate<R: RngCore + CryptoRng>(
        direction: Direction,
        rng: &mut R,
    ) -> Result<Self, CryptoError> {
        let secret = EphemeralSecret::generate(rng)?;
        let local_public = secret.public_key();

        Ok(Self {
            direction,
            suite: CipherSuite::XChaCha20Poly1305Blake3,
            secret: Some(secret),
            local_public,
            peer_public: None,
            keys: None,
            sequence: 0,
            bytes_since_rekey: 0,
            generation: 0,
        })
    }

    /// Channel direction
    #[must_use]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Our ephemeral public key for this channel
    #[must_use]
    pub fn local_public(&self) -> &EphemeralPublicKey {
        &self.local_public
    }

    /// The peer's ephemeral public key, once received
    #[must_use]
    pub fn peer_public(&self) -> Option<&EphemeralPublicKey> {
        self.peer_public.as_ref()
    }

    /// Whether the session key has been derived
    #[must_use]
    pub fn is_established(&self) -> bool {
        self.keys.is_some()
    }

    /// The setup message announcing this channel's ephemeral key.
    ///
    /// Outbound channels send a Setup-Init (34-byte payload, key and suite),
    /// inbound channels a Setup-Ack (33-byte payload).
    #[must_use]
    pub fn build_setup_message(&self) -> Vec<u8> {
        let ephemeral = self.local_public.to_bytes();
        let message = match self.direction {
            Direction::Outbound => Message::SetupInit {
                ephemeral,
                suite: self.suite.as_u8(),
            },
            Direction::Inbound => Message::SetupAck { ephemeral },
        };
        message.encode()
    }

    /// Setup message type this channel consumes from the peer
    #[must_use]
    pub fn expected_setup_type(&self) -> MessageType {
        match self.direction {
            Direction::Inbound => MessageType::SetupInit,
            Direction::Outbound => MessageType::SetupAck,
        }
    }

    /// Derive the session key from the peer's setup payload (tag excluded).
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::AlreadyDerived`] if the key exists already and
    /// [`ChannelError::KeyAgreement`] if the payload has the wrong size, names
    /// an unsupported suite or carries an invalid curve point.
    pub fn consume_setup_message(&mut self, payload: &[u8]) -> Result<(), ChannelError> {
        if self.keys.is_some() {
            return Err(ChannelError::AlreadyDerived);
        }

        let expected = self.expected_setup_type().payload_size();
        if payload.len() != expected {
            return Err(ChannelError::KeyAgreement(CryptoError::InvalidKeyLength {
                expected,
                actual: payload.len(),
            }));
        }
        if self.direction == Direction::Inbound {
            let suite = CipherSuite::try_from(payload[COMPRESSED_PUBLIC_KEY_SIZE])
                .map_err(ChannelError::KeyAgreement)?;
            if suite != self.suite {
                return Err(ChannelError::KeyAgreement(
                    CryptoError::UnsupportedCipherSuite(suite.as_u8()),
                ));
            }
        }

        let peer = EphemeralPublicKey::from_slice(&payload[..COMPRESSED_PUBLIC_KEY_SIZE])
            .map_err(ChannelError::KeyAgreement)?;
        let secret = self.secret.take().ok_or(ChannelError::AlreadyDerived)?;
        let shared = secret
            .diffie_hellman(&peer)
            .map_err(ChannelError::KeyAgreement)?;

        self.keys = Some(ChannelKeys::derive(&shared, self.suite));
        self.peer_public = Some(peer);

        tracing::debug!("{:?} channel established", self.direction);
        Ok(())
    }

    fn keys(&self) -> Result<&ChannelKeys, ChannelError> {
        self.keys.as_ref().ok_or(ChannelError::NotEstablished)
    }

    fn next_sequence(&self) -> Result<u64, ChannelError> {
        self.sequence
            .checked_add(1)
            .ok_or(ChannelError::NonceOverflow)
    }

    /// Seal one packet: `masked_len(4) || ciphertext || mac(16)`.
    ///
    /// Advances the sequence number and the sealed byte count by
    /// `plaintext.len() + 4`.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::NotEstablished`] before key agreement,
    /// [`ChannelError::PacketTooLarge`] above the packet limit and
    /// [`ChannelError::NonceOverflow`] once the sequence space is exhausted.
    pub fn seal(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, ChannelError> {
        let keys = self.keys()?;
        if plaintext.len() > MAX_PLAINTEXT_SIZE {
            return Err(ChannelError::PacketTooLarge(plaintext.len()));
        }
        let next = self.next_sequence()?;

        let header = codec::encode_length(plaintext.len(), keys.length_mask(self.sequence));
        let sealed = keys
            .seal(self.sequence, plaintext, &header)
            .map_err(|_| ChannelError::Encryption)?;

        let mut packet = Vec::with_capacity(LENGTH_PREFIX_SIZE + sealed.len());
        packet.extend_from_slice(&header);
        packet.extend_from_slice(&sealed);

        self.sequence = next;
        self.bytes_since_rekey = self
            .bytes_since_rekey
            .saturating_add((plaintext.len() + LENGTH_PREFIX_SIZE) as u64);
        Ok(packet)
    }

    /// Full size of the next inbound packet, from its first four bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::NotEstablished`] before key agreement,
    /// [`ChannelError::Decryption`] if fewer than four bytes are given and
    /// [`ChannelError::PacketTooLarge`] if the header announces more than
    /// the packet limit.
    pub fn expected_packet_size(&self, header: &[u8]) -> Result<usize, ChannelError> {
        let keys = self.keys()?;
        let len = codec::decode_length(header, keys.length_mask(self.sequence))
            .map_err(|_| ChannelError::Decryption)?;
        if len > MAX_PLAINTEXT_SIZE {
            return Err(ChannelError::PacketTooLarge(len));
        }
        Ok(len + FRAME_OVERHEAD)
    }

    /// Open one packet produced by the peer's [`seal`](Self::seal).
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Decryption`] if the header does not match the
    /// packet length or authentication fails, and
    /// [`ChannelError::NotEstablished`] before key agreement.
    pub fn open(&mut self, packet: &[u8]) -> Result<Vec<u8>, ChannelError> {
        let keys = self.keys()?;
        if packet.len() < FRAME_OVERHEAD {
            return Err(ChannelError::Decryption);
        }
        let next = self.next_sequence()?;

        let (header, sealed) = packet.split_at(LENGTH_PREFIX_SIZE);
        let len = codec::decode_length(header, keys.length_mask(self.sequence))
            .map_err(|_| ChannelError::Decryption)?;
        // sealed.len() >= MAC_SIZE after the FRAME_OVERHEAD check
        if len > MAX_PLAINTEXT_SIZE || len != sealed.len() - MAC_SIZE {
            return Err(ChannelError::Decryption);
        }

        let plaintext = keys
            .open(self.sequence, sealed, header)
            .map_err(|_| ChannelError::Decryption)?;

        self.sequence = next;
        Ok(plaintext)
    }

    /// Bytes sealed under the current key
    #[must_use]
    pub fn sealed_byte_count(&self) -> u64 {
        self.bytes_since_rekey
    }

    /// Reset the sealed byte count without touching the key or sequence.
    ///
    /// [`rotate_key`](Self::rotate_key) resets through here.
    pub fn reset_byte_count(&mut self) {
        self.bytes_since_rekey = 0;
    }

    /// Replace the session key with one derived from it and `mix_in`.
    ///
    /// The byte count resets with the swap; the sequence number carries on.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::NotEstablished`] before key agreement.
    pub fn rotate_key(&mut self, mix_in: &[u8]) -> Result<(), ChannelError> {
        let rotated = self.keys()?.rotate(mix_in);
        self.keys = Some(rotated);
        self.reset_byte_count();
        self.generation = self.generation.wrapping_add(1);

        tracing::debug!(
            "{:?} channel key rotated (generation {})",
            self.direction,
            self.generation
        );
        Ok(())
    }

    /// Session id bound into the authentication transcripts
    #[must_use]
    pub fn session_id(&self) -> Option<&[u8; SESSION_ID_SIZE]> {
        self.keys.as_ref().map(ChannelKeys::session_id)
    }

    /// Commitment to the current session key
    #[must_use]
    pub fn key_fingerprint(&self) -> Option<[u8; 32]> {
        self.keys.as_ref().map(ChannelKeys::fingerprint)
    }

    /// Packets sealed or opened so far
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Number of key rotations since establishment
    #[must_use]
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Erase all key material. The channel cannot be used afterwards.
    pub fn wipe(&mut self) {
        self.secret = None;
        self.keys = None;
        self.peer_public = None;
        self.bytes_since_rekey = 0;
    }

    #[cfg(test)]
    pub(crate) fn set_sequence(&mut self, sequence: u64) {
        self.sequence = sequence;
    }
}

impl std::fmt::Debug for EphemeralChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EphemeralChannel")
            .field("direction", &self.direction)
            .field("established", &self.is_established())
            .field("sequence", &self.sequence)
            .field("bytes_since_rekey", &self.bytes_since_rekey)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}
