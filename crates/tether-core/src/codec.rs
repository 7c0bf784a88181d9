//! Handshake and control message codec.
//!
//! Every message is one tag byte followed by a fixed-size payload. Setup
//! messages travel in plaintext; the others are sealed by the outbound
//! channel, so on the wire they read `tag || masked_len || ct || mac`.
//!
//! | Tag    | Message    | Payload | Sealed |
//! |--------|------------|---------|--------|
//! | `0x01` | Setup-Init | 34      | no     |
//! | `0x02` | Setup-Ack  | 33      | no     |
//! | `0x03` | Challenge  | 32      | yes    |
//! | `0x04` | Reply      | 64      | yes    |
//! | `0x05` | Propose    | 32      | yes    |
//! | `0x06` | Rekey      | 33      | yes    |

use crate::error::CodecError;
use crate::{FRAME_OVERHEAD, LENGTH_PREFIX_SIZE, MAX_PLAINTEXT_SIZE};
use tether_crypto::auth::TranscriptHash;
use tether_crypto::{COMPRESSED_PUBLIC_KEY_SIZE, SIGNATURE_SIZE, Signature, TRANSCRIPT_HASH_SIZE};

/// Size of the message tag
pub const TAG_SIZE: usize = 1;

/// Payload carried by every Rekey message
pub const REKEY_MARKER: [u8; REKEY_PAYLOAD_SIZE] = [0u8; REKEY_PAYLOAD_SIZE];

const SETUP_INIT_PAYLOAD_SIZE: usize = COMPRESSED_PUBLIC_KEY_SIZE + 1;
const REKEY_PAYLOAD_SIZE: usize = 33;

/// Handshake and control message types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Sender's outbound ephemeral key and cipher suite
    SetupInit = 0x01,
    /// Sender's inbound ephemeral key, answering a Setup-Init
    SetupAck = 0x02,
    /// Identity challenge
    Challenge = 0x03,
    /// Signed answer to a challenge
    Reply = 0x04,
    /// Identity proposal
    Propose = 0x05,
    /// Traffic-volume key rotation
    Rekey = 0x06,
}

/// One row of the message table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageSpec {
    /// Message type
    pub message_type: MessageType,
    /// Payload size, tag excluded
    pub payload_size: usize,
    /// Whether the payload is sealed by the outbound channel
    pub sealed: bool,
}

/// The fixed message table.
pub const MESSAGE_TABLE: [MessageSpec; 6] = [
    MessageSpec {
        message_type: MessageType::SetupInit,
        payload_size: SETUP_INIT_PAYLOAD_SIZE,
        sealed: false,
    },
    MessageSpec {
        message_type: MessageType::SetupAck,
        payload_size: COMPRESSED_PUBLIC_KEY_SIZE,
        sealed: false,
    },
    MessageSpec {
        message_type: MessageType::Challenge,
        payload_size: TRANSCRIPT_HASH_SIZE,
        sealed: true,
    },
    MessageSpec {
        message_type: MessageType::Reply,
        payload_size: SIGNATURE_SIZE,
        sealed: true,
    },
    MessageSpec {
        message_type: MessageType::Propose,
        payload_size: TRANSCRIPT_HASH_SIZE,
        sealed: true,
    },
    MessageSpec {
        message_type: MessageType::Rekey,
        payload_size: REKEY_PAYLOAD_SIZE,
        sealed: true,
    },
];

impl MessageType {
    /// Wire tag
    #[must_use]
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Table row for this type
    #[must_use]
    pub fn spec(self) -> &'static MessageSpec {
        // Table order follows tag order, starting at 0x01
        &MESSAGE_TABLE[usize::from(self.as_u8()) - 1]
    }

    /// Payload size, tag excluded
    #[must_use]
    pub fn payload_size(self) -> usize {
        self.spec().payload_size
    }

    /// Whether the payload travels sealed
    #[must_use]
    pub fn is_sealed(self) -> bool {
        self.spec().sealed
    }

    /// Bytes following the tag on the wire
    #[must_use]
    pub fn wire_size(self) -> usize {
        if self.is_sealed() {
            self.payload_size() + FRAME_OVERHEAD
        } else {
            self.payload_size()
        }
    }
}

impl TryFrom<u8> for MessageType {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::SetupInit),
            0x02 => Ok(Self::SetupAck),
            0x03 => Ok(Self::Challenge),
            0x04 => Ok(Self::Reply),
            0x05 => Ok(Self::Propose),
            0x06 => Ok(Self::Rekey),
            other => Err(CodecError::UnknownMessageType(other)),
        }
    }
}

/// Payload size for a raw message tag.
///
/// # Errors
///
/// Returns [`CodecError::UnknownMessageType`] for tags outside the table.
pub fn size_for_type(tag: u8) -> Result<usize, CodecError> {
    MessageType::try_from(tag).map(MessageType::payload_size)
}

/// Split a tagged message into its type and the bytes after the tag.
///
/// # Errors
///
/// Returns [`CodecError::Empty`] for empty input and
/// [`CodecError::UnknownMessageType`] for an unknown tag.
pub fn split_tag(bytes: &[u8]) -> Result<(MessageType, &[u8]), CodecError> {
    let (&tag, rest) = bytes.split_first().ok_or(CodecError::Empty)?;
    Ok((MessageType::try_from(tag)?, rest))
}

/// Check a payload against the message table.
///
/// # Errors
///
/// Returns [`CodecError::InvalidLength`] if `payload` is not exactly the
/// table size for `message_type`.
pub fn check_payload(message_type: MessageType, payload: &[u8]) -> Result<(), CodecError> {
    let expected = message_type.payload_size();
    if payload.len() == expected {
        Ok(())
    } else {
        Err(CodecError::InvalidLength {
            message_type,
            expected,
            actual: payload.len(),
        })
    }
}

/// A decoded handshake or control message payload.
///
/// Setup keys are kept as raw bytes; curve validation belongs to the
/// channel that consumes them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Setup-Init: outbound ephemeral key and cipher suite byte
    SetupInit {
        /// Compressed ephemeral public key
        ephemeral: [u8; COMPRESSED_PUBLIC_KEY_SIZE],
        /// Cipher suite identifier
        suite: u8,
    },
    /// Setup-Ack: inbound ephemeral key
    SetupAck {
        /// Compressed ephemeral public key
        ephemeral: [u8; COMPRESSED_PUBLIC_KEY_SIZE],
    },
    /// Challenge transcript hash
    Challenge(TranscriptHash),
    /// Signed reply
    Reply(Signature),
    /// Propose transcript hash
    Propose(TranscriptHash),
    /// Rekey marker
    Rekey,
}

impl Message {
    /// Type of this message
    #[must_use]
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::SetupInit { .. } => MessageType::SetupInit,
            Self::SetupAck { .. } => MessageType::SetupAck,
            Self::Challenge(_) => MessageType::Challenge,
            Self::Reply(_) => MessageType::Reply,
            Self::Propose(_) => MessageType::Propose,
            Self::Rekey => MessageType::Rekey,
        }
    }

    /// Encode the payload, tag excluded.
    #[must_use]
    pub fn encode_payload(&self) -> Vec<u8> {
        match self {
            Self::SetupInit { ephemeral, suite } => {
                let mut out = Vec::with_capacity(SETUP_INIT_PAYLOAD_SIZE);
                out.extend_from_slice(ephemeral);
                out.push(*suite);
                out
            }
            Self::SetupAck { ephemeral } => ephemeral.to_vec(),
            Self::Challenge(hash) | Self::Propose(hash) => hash.to_vec(),
            Self::Reply(signature) => signature.as_bytes().to_vec(),
            Self::Rekey => REKEY_MARKER.to_vec(),
        }
    }

    /// Encode as `tag || payload`.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let payload = self.encode_payload();
        let mut out = Vec::with_capacity(TAG_SIZE + payload.len());
        out.push(self.message_type().as_u8());
        out.extend_from_slice(&payload);
        out
    }

    /// Decode a payload of a known type.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidLength`] on a size mismatch and
    /// [`CodecError::InvalidRekeyMarker`] for a Rekey payload other than
    /// the marker.
    pub fn decode_payload(message_type: MessageType, payload: &[u8]) -> Result<Self, CodecError> {
        check_payload(message_type, payload)?;

        let message = match message_type {
            MessageType::SetupInit => {
                let mut ephemeral = [0u8; COMPRESSED_PUBLIC_KEY_SIZE];
                ephemeral.copy_from_slice(&payload[..COMPRESSED_PUBLIC_KEY_SIZE]);
                Self::SetupInit {
                    ephemeral,
                    suite: payload[COMPRESSED_PUBLIC_KEY_SIZE],
                }
            }
            MessageType::SetupAck => {
                let mut ephemeral = [0u8; COMPRESSED_PUBLIC_KEY_SIZE];
                ephemeral.copy_from_slice(payload);
                Self::SetupAck { ephemeral }
            }
            MessageType::Challenge => Self::Challenge(to_hash(payload)),
            MessageType::Propose => Self::Propose(to_hash(payload)),
            MessageType::Reply => {
                let mut signature = [0u8; SIGNATURE_SIZE];
                signature.copy_from_slice(payload);
                Self::Reply(Signature::from_bytes(signature))
            }
            MessageType::Rekey => {
                if payload != REKEY_MARKER {
                    return Err(CodecError::InvalidRekeyMarker);
                }
                Self::Rekey
            }
        };
        Ok(message)
    }
}

fn to_hash(payload: &[u8]) -> TranscriptHash {
    let mut hash = [0u8; TRANSCRIPT_HASH_SIZE];
    hash.copy_from_slice(payload);
    hash
}

/// Decode a plaintext `tag || payload` message.
///
/// # Errors
///
/// Returns a [`CodecError`] for empty input, unknown tags, wrong payload
/// sizes or a bad rekey marker.
pub fn decode_message(bytes: &[u8]) -> Result<Message, CodecError> {
    let (message_type, payload) = split_tag(bytes)?;
    Message::decode_payload(message_type, payload)
}

/// Mask a plaintext length into a packet header.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn encode_length(len: usize, mask: [u8; LENGTH_PREFIX_SIZE]) -> [u8; LENGTH_PREFIX_SIZE] {
    debug_assert!(len <= MAX_PLAINTEXT_SIZE);
    let mut header = (len as u32).to_le_bytes();
    for (byte, m) in header.iter_mut().zip(mask) {
        *byte ^= m;
    }
    header
}

/// Unmask the plaintext length from the first bytes of a packet.
///
/// # Errors
///
/// Returns [`CodecError::TooShort`] if fewer than four bytes are given.
pub fn decode_length(header: &[u8], mask: [u8; LENGTH_PREFIX_SIZE]) -> Result<usize, CodecError> {
    if header.len() < LENGTH_PREFIX_SIZE {
        return Err(CodecError::TooShort {
            expected: LENGTH_PREFIX_SIZE,
            actual: header.len(),
        });
    }
    let mut raw = [0u8; LENGTH_PREFIX_SIZE];
    for (i, byte) in raw.iter_mut().enumerate() {
        *byte = header[i] ^ mask[i];
    }
    Ok(u32::from_le_bytes(raw) as usize)
}

/// Total packet size for a plaintext of `len` bytes.
#[must_use]
pub fn sealed_size(len: usize) -> usize {
    len + FRAME_OVERHEAD
}
