//! # tether Core
//!
//! Authenticated ephemeral channels between a wallet front-end and the node
//! bridge it talks to.
//!
//! This crate provides:
//! - Per-direction ephemeral channels (ECDH setup, sealing, key rotation)
//! - The handshake/control message codec and application packet framing
//! - Traffic-volume rekey policy
//! - The connection state machine driving setup and mutual authentication
//! - Error types and handling
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Connection                                │
//! │   (handshake state machine, events, encrypt/decrypt, rekey)     │
//! ├────────────────────────────────┬────────────────────────────────┤
//! │    Inbound EphemeralChannel    │   Outbound EphemeralChannel    │
//! │  (peer Init -> our Ack, open)  │  (our Init -> peer Ack, seal)  │
//! ├────────────────────────────────┴────────────────────────────────┤
//! │                        Packet codec                              │
//! │   (tagged control messages, masked length || ct || tag)         │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The connection never touches a socket. Outbound bytes are queued as
//! [`Event::Send`] and pulled by the transport with
//! [`Connection::poll_event`].

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod channel;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod rekey;

pub use channel::{Direction, EphemeralChannel};
pub use codec::{Message, MessageType, size_for_type};
pub use config::ConnectionConfig;
pub use connection::{Connection, ConnectionState, Event, HandshakeStep, Role};
pub use error::Error;
pub use rekey::{RekeyPolicy, RekeyStats};

/// Protocol version, reported by the CLI
pub const PROTOCOL_VERSION: u32 = 0x0000_0001;

/// AEAD authentication tag size
pub const MAC_SIZE: usize = tether_crypto::aead::TAG_SIZE;

/// Size of the masked plaintext length prefix on every sealed packet
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Bytes a sealed packet adds on top of its plaintext
pub const FRAME_OVERHEAD: usize = LENGTH_PREFIX_SIZE + MAC_SIZE;

/// Largest plaintext a single packet may carry (16 MiB)
pub const MAX_PLAINTEXT_SIZE: usize = 16 * 1024 * 1024;
