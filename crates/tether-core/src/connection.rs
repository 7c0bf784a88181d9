//! Connection state machine.
//!
//! A [`Connection`] sequences its two [`EphemeralChannel`]s through setup
//! and mutual authentication, then carries application traffic.
//!
//! Responder (bridge) steps:
//!
//! ```text
//! start               -> send Init
//! Ack       Start             Uninitialized  -> AckReceived
//! Init      AckReceived       Uninitialized  -> InitReceived, Encrypted, send Ack
//! Challenge InitReceived      Encrypted      -> ChallengeReceived, send Reply
//! Propose   ChallengeReceived Encrypted      -> ProposeReceived, send Challenge
//! Reply     ProposeReceived   Encrypted      -> ReplyReceived, identity rekey, Ready
//! ```
//!
//! Initiator (wallet) steps:
//!
//! ```text
//! Init      Start             Uninitialized  -> InitReceived, send Ack + Init
//! Ack       InitReceived      Uninitialized  -> AckReceived, Encrypted, send Challenge
//! Reply     AckReceived       Encrypted      -> ReplyReceived, send Propose
//! Challenge ReplyReceived     Encrypted      -> ChallengeReceived, send Reply,
//!                                               identity rekey, Ready
//! ```
//!
//! Rekey is accepted in `Ready` only. Any other message, or any error, moves
//! the connection to `Failed`, erases its keys and drops queued events.

use crate::MAC_SIZE;
use crate::channel::{Direction, EphemeralChannel};
use crate::codec::{self, Message, MessageType};
use crate::config::ConnectionConfig;
use crate::error::{ChannelError, Error, HandshakeError};
use crate::rekey::{self, RekeyPolicy, RekeyStats};
use rand_core::{CryptoRng, OsRng, RngCore};
use std::collections::VecDeque;
use tether_crypto::auth::{self, TranscriptHash};
use tether_crypto::{IdentityKeyPair, IdentityPublicKey, PinnedPeerKey, SESSION_ID_SIZE};
use zeroize::Zeroize;

/// Which end of the connection we are
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Wallet front-end, answers the responder's Init and issues the first challenge
    Initiator,
    /// Node bridge, opens the handshake with its Init
    Responder,
}

/// Handshake progress, in the responder's order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandshakeStep {
    /// Nothing received yet
    Start,
    /// Peer's Setup-Ack consumed
    AckReceived,
    /// Peer's Setup-Init consumed
    InitReceived,
    /// Peer's Challenge verified
    ChallengeReceived,
    /// Peer's Propose verified
    ProposeReceived,
    /// Peer's Reply verified
    ReplyReceived,
}

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Channels not yet established
    Uninitialized,
    /// Both channels established, peer not yet authenticated
    Encrypted,
    /// Peer authenticated, application traffic allowed
    Ready,
    /// Terminal; all key material erased
    Failed,
}

impl ConnectionState {
    /// Check if a state transition is valid
    #[must_use]
    pub fn can_transition(self, to: Self) -> bool {
        match (self, to) {
            (Self::Uninitialized, Self::Encrypted) | (Self::Encrypted, Self::Ready) => true,
            (from, Self::Failed) => from != Self::Failed,
            _ => false,
        }
    }
}

/// Output of the connection, pulled with [`Connection::poll_event`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Bytes for the transport (handshake or control message)
    Send(Vec<u8>),
    /// The peer is authenticated; queued exactly once
    Ready,
}

/// An authenticated, encrypted connection to one pinned peer.
pub struct Connection {
    role: Role,
    identity: IdentityKeyPair,
    peer: PinnedPeerKey,
    inbound: EphemeralChannel,
    outbound: EphemeralChannel,
    step: HandshakeStep,
    state: ConnectionState,
    started: bool,
    policy: RekeyPolicy,
    stats: RekeyStats,
    pending_challenge: Option<TranscriptHash>,
    events: VecDeque<Event>,
    mac_len: usize,
}

impl Connection {
    /// Create a connection with fresh ephemeral keys from the OS RNG.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for a bad configuration and
    /// [`Error::Crypto`] if key generation fails.
    pub fn new(
        role: Role,
        identity: IdentityKeyPair,
        peer: PinnedPeerKey,
        config: &ConnectionConfig,
    ) -> Result<Self, Error> {
        Self::with_rng(role, identity, peer, config, &mut OsRng)
    }

    /// Create a connection drawing ephemeral keys from `rng`.
    ///
    /// # Errors
    ///
    /// Same as [`Connection::new`].
    pub fn with_rng<R: RngCore + CryptoRng>(
        role: Role,
        identity: IdentityKeyPair,
        peer: PinnedPeerKey,
        config: &ConnectionConfig,
        rng: &mut R,
    ) -> Result<Self, Error> {
        config.validate()?;
        let inbound = EphemeralChannel::generate(Direction::Inbound, rng)?;
        let outbound = EphemeralChannel::generate(Direction::Outbound, rng)?;

        Ok(Self {
            role,
            identity,
            peer,
            inbound,
            outbound,
            step: HandshakeStep::Start,
            state: ConnectionState::Uninitialized,
            started: false,
            policy: RekeyPolicy::new(config.rekey_threshold),
            stats: RekeyStats::default(),
            pending_challenge: None,
            events: VecDeque::new(),
            mac_len: MAC_SIZE,
        })
    }

    /// Our role
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Current connection state
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Current handshake step
    #[must_use]
    pub fn step(&self) -> HandshakeStep {
        self.step
    }

    /// Check if the peer is authenticated
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Ready
    }

    /// Authentication tag length used by the packet framing
    #[must_use]
    pub fn mac_len(&self) -> usize {
        self.mac_len
    }

    /// Rekey counters
    #[must_use]
    pub fn stats(&self) -> RekeyStats {
        self.stats
    }

    /// Bytes sealed under the current outbound key
    #[must_use]
    pub fn bytes_since_rekey(&self) -> u64 {
        self.outbound.sealed_byte_count()
    }

    /// Our identity key
    #[must_use]
    pub fn local_identity(&self) -> &IdentityPublicKey {
        self.identity.public_key()
    }

    /// The pinned peer identity key
    #[must_use]
    pub fn peer_identity(&self) -> &IdentityPublicKey {
        self.peer.key()
    }

    /// Next queued event, if any
    pub fn poll_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    /// Number of queued events
    #[must_use]
    pub fn pending_events(&self) -> usize {
        self.events.len()
    }

    /// Begin the handshake. The responder queues its Setup-Init.
    ///
    /// # Errors
    ///
    /// Returns [`HandshakeError::InvalidState`] if already started or failed.
    pub fn start(&mut self) -> Result<(), Error> {
        self.run(|conn| {
            if conn.started {
                return Err(conn.invalid_state(None));
            }
            conn.started = true;
            tracing::debug!("{:?} connection started", conn.role);

            if conn.role == Role::Responder {
                let init = conn.outbound.build_setup_message();
                conn.events.push_back(Event::Send(init));
            }
            Ok(())
        })
    }

    /// Process one tagged handshake or control message from the peer.
    ///
    /// # Errors
    ///
    /// Any error is fatal: the connection moves to `Failed`.
    pub fn process_message(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.run(|conn| conn.dispatch(bytes))
    }

    /// Seal an application packet.
    ///
    /// # Errors
    ///
    /// Returns [`HandshakeError::InvalidState`] unless `Ready`, or a
    /// [`ChannelError`] from sealing. Either fails the connection.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, Error> {
        self.run(|conn| {
            conn.require_ready()?;
            Ok(conn.outbound.seal(plaintext)?)
        })
    }

    /// Open an application packet.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Decryption`] if the packet fails
    /// authentication, or [`HandshakeError::InvalidState`] unless `Ready`.
    /// Either fails the connection.
    pub fn decrypt(&mut self, packet: &[u8]) -> Result<Vec<u8>, Error> {
        self.run(|conn| {
            conn.require_ready()?;
            Ok(conn.inbound.open(packet)?)
        })
    }

    /// Size of the next inbound sealed packet from its first four bytes.
    ///
    /// Works as soon as the inbound channel is established, so transports
    /// can size sealed handshake messages too.
    ///
    /// # Errors
    ///
    /// Returns [`HandshakeError::InvalidState`] on a failed connection and a
    /// [`ChannelError`] for a short or oversized header. A rejected header
    /// fails the connection.
    pub fn decode_expected_size(&mut self, header: &[u8]) -> Result<usize, Error> {
        self.run(|conn| Ok(conn.inbound.expected_packet_size(header)?))
    }

    /// Whether a Rekey must be sent before sealing `next_packet_size` bytes.
    #[must_use]
    pub fn needs_rekey(&self, next_packet_size: usize) -> bool {
        self.is_ready()
            && self
                .policy
                .needs_rekey(self.outbound.sealed_byte_count(), next_packet_size)
    }

    /// Seal a Rekey message under the current key, then rotate the outbound key.
    ///
    /// Returns the tagged message for the transport.
    ///
    /// # Errors
    ///
    /// Returns [`HandshakeError::InvalidState`] unless `Ready`.
    pub fn build_rekey_payload(&mut self) -> Result<Vec<u8>, Error> {
        self.run(|conn| {
            conn.require_ready()?;
            let message = rekey::build_rekey_message();
            let packet = conn.seal_control(&message)?;
            conn.outbound.rotate_key(&[])?;
            conn.stats.sent += 1;

            tracing::debug!("{:?} outbound rekey #{}", conn.role, conn.stats.sent);
            Ok(packet)
        })
    }

    /// Tear down: erase all key material and move to `Failed`.
    pub fn close(&mut self) {
        if self.state != ConnectionState::Failed {
            tracing::debug!("{:?} connection closed", self.role);
        }
        self.wipe();
        self.state = ConnectionState::Failed;
    }

    fn run<T>(&mut self, op: impl FnOnce(&mut Self) -> Result<T, Error>) -> Result<T, Error> {
        if self.state == ConnectionState::Failed {
            return Err(self.invalid_state(None));
        }
        let result = op(self);
        if let Err(error) = &result {
            self.fail(error);
        }
        result
    }

    fn fail(&mut self, error: &Error) {
        tracing::warn!(
            "{:?} connection failed at {:?}/{:?}: {}",
            self.role,
            self.state,
            self.step,
            error
        );
        self.wipe();
        self.state = ConnectionState::Failed;
    }

    fn wipe(&mut self) {
        self.inbound.wipe();
        self.outbound.wipe();
        if let Some(mut challenge) = self.pending_challenge.take() {
            challenge.zeroize();
        }
        self.events.clear();
    }

    fn invalid_state(&self, message: Option<MessageType>) -> Error {
        HandshakeError::InvalidState {
            state: self.state,
            step: self.step,
            message,
        }
        .into()
    }

    fn require_ready(&self) -> Result<(), Error> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(self.invalid_state(None))
        }
    }

    fn advance(&mut self, step: HandshakeStep) {
        tracing::debug!(
            "{:?} handshake step: {:?} -> {:?}",
            self.role,
            self.step,
            step
        );
        self.step = step;
    }

    fn transition_to(&mut self, state: ConnectionState) -> Result<(), Error> {
        if !self.state.can_transition(state) {
            return Err(self.invalid_state(None));
        }
        tracing::debug!(
            "{:?} connection state: {:?} -> {:?}",
            self.role,
            self.state,
            state
        );
        self.state = state;
        Ok(())
    }

    /// Required step (none for Rekey) and state for a message, by role
    fn precondition(
        role: Role,
        message_type: MessageType,
    ) -> Option<(Option<HandshakeStep>, ConnectionState)> {
        use ConnectionState as C;
        use HandshakeStep as S;
        use MessageType as M;

        match (role, message_type) {
            (_, M::Rekey) => Some((None, C::Ready)),
            (Role::Responder, M::SetupAck) => Some((Some(S::Start), C::Uninitialized)),
            (Role::Responder, M::SetupInit) => Some((Some(S::AckReceived), C::Uninitialized)),
            (Role::Responder, M::Challenge) => Some((Some(S::InitReceived), C::Encrypted)),
            (Role::Responder, M::Propose) => Some((Some(S::ChallengeReceived), C::Encrypted)),
            (Role::Responder, M::Reply) => Some((Some(S::ProposeReceived), C::Encrypted)),
            (Role::Initiator, M::SetupInit) => Some((Some(S::Start), C::Uninitialized)),
            (Role::Initiator, M::SetupAck) => Some((Some(S::InitReceived), C::Uninitialized)),
            (Role::Initiator, M::Reply) => Some((Some(S::AckReceived), C::Encrypted)),
            (Role::Initiator, M::Challenge) => Some((Some(S::ReplyReceived), C::Encrypted)),
            (Role::Initiator, M::Propose) => None,
        }
    }

    fn dispatch(&mut self, bytes: &[u8]) -> Result<(), Error> {
        let (message_type, body) = codec::split_tag(bytes)?;

        let allowed = self.started
            && Self::precondition(self.role, message_type).is_some_and(|(step, state)| {
                step.is_none_or(|step| step == self.step) && state == self.state
            });
        if !allowed {
            return Err(self.invalid_state(Some(message_type)));
        }

        match (self.role, message_type) {
            (_, MessageType::Rekey) => self.on_rekey(body),
            (_, MessageType::SetupInit) => self.on_setup_init(body),
            (_, MessageType::SetupAck) => self.on_setup_ack(body),
            (Role::Responder, MessageType::Challenge) => self.on_first_challenge(body),
            (Role::Responder, MessageType::Propose) => self.on_propose(body),
            (Role::Responder, MessageType::Reply) => self.on_final_reply(body),
            (Role::Initiator, MessageType::Reply) => self.on_first_reply(body),
            (Role::Initiator, MessageType::Challenge) => self.on_final_challenge(body),
            (Role::Initiator, MessageType::Propose) => Err(self.invalid_state(Some(message_type))),
        }
    }

    fn on_setup_init(&mut self, payload: &[u8]) -> Result<(), Error> {
        codec::check_payload(MessageType::SetupInit, payload)?;
        self.inbound.consume_setup_message(payload)?;
        let ack = self.inbound.build_setup_message();
        self.events.push_back(Event::Send(ack));

        match self.role {
            Role::Responder => {
                self.advance(HandshakeStep::InitReceived);
                self.transition_to(ConnectionState::Encrypted)
            }
            Role::Initiator => {
                let init = self.outbound.build_setup_message();
                self.events.push_back(Event::Send(init));
                self.advance(HandshakeStep::InitReceived);
                Ok(())
            }
        }
    }

    fn on_setup_ack(&mut self, payload: &[u8]) -> Result<(), Error> {
        codec::check_payload(MessageType::SetupAck, payload)?;
        self.outbound.consume_setup_message(payload)?;

        match self.role {
            Role::Responder => {
                self.advance(HandshakeStep::AckReceived);
                Ok(())
            }
            Role::Initiator => {
                self.transition_to(ConnectionState::Encrypted)?;
                let sid = self.session_id(Direction::Outbound)?;
                let challenge = auth::build_challenge(&sid, self.identity.public_key(), self.peer.key());
                self.pending_challenge = Some(challenge);
                self.send_control(&Message::Challenge(challenge))?;
                self.advance(HandshakeStep::AckReceived);
                Ok(())
            }
        }
    }

    /// Responder: the initiator challenges us on its outbound channel.
    fn on_first_challenge(&mut self, body: &[u8]) -> Result<(), Error> {
        let payload = self.open_control(MessageType::Challenge, body)?;
        let sid = self.session_id(Direction::Inbound)?;
        let challenge =
            auth::verify_challenge(&payload, &sid, self.peer.key(), self.identity.public_key())
                .map_err(HandshakeError::Authentication)?;

        let reply = auth::build_reply(&self.identity, &sid, &challenge);
        self.send_control(&Message::Reply(reply))?;
        self.advance(HandshakeStep::ChallengeReceived);
        Ok(())
    }

    /// Responder: the initiator proposes its identity; challenge it back.
    fn on_propose(&mut self, body: &[u8]) -> Result<(), Error> {
        let payload = self.open_control(MessageType::Propose, body)?;
        let sid = self.session_id(Direction::Inbound)?;
        auth::verify_propose(&payload, &sid, self.peer.key())
            .map_err(HandshakeError::Authentication)?;

        let sid = self.session_id(Direction::Outbound)?;
        let challenge = auth::build_challenge(&sid, self.identity.public_key(), self.peer.key());
        self.pending_challenge = Some(challenge);
        self.send_control(&Message::Challenge(challenge))?;
        self.advance(HandshakeStep::ProposeReceived);
        Ok(())
    }

    /// Responder: the initiator answers our challenge.
    fn on_final_reply(&mut self, body: &[u8]) -> Result<(), Error> {
        let payload = self.open_control(MessageType::Reply, body)?;
        self.verify_pending_reply(&payload)?;

        self.identity_rekey()?;
        self.advance(HandshakeStep::ReplyReceived);
        self.become_ready()
    }

    /// Initiator: the responder answers our challenge; propose our identity.
    fn on_first_reply(&mut self, body: &[u8]) -> Result<(), Error> {
        let payload = self.open_control(MessageType::Reply, body)?;
        self.verify_pending_reply(&payload)?;

        let sid = self.session_id(Direction::Outbound)?;
        let propose = auth::build_propose(&sid, self.identity.public_key());
        self.send_control(&Message::Propose(propose))?;
        self.advance(HandshakeStep::ReplyReceived);
        Ok(())
    }

    /// Initiator: the responder challenges us; answer under the current
    /// key, then rekey.
    fn on_final_challenge(&mut self, body: &[u8]) -> Result<(), Error> {
        let payload = self.open_control(MessageType::Challenge, body)?;
        let sid = self.session_id(Direction::Inbound)?;
        let challenge =
            auth::verify_challenge(&payload, &sid, self.peer.key(), self.identity.public_key())
                .map_err(HandshakeError::Authentication)?;

        let reply = auth::build_reply(&self.identity, &sid, &challenge);
        self.send_control(&Message::Reply(reply))?;

        self.identity_rekey()?;
        self.advance(HandshakeStep::ChallengeReceived);
        self.become_ready()
    }

    fn on_rekey(&mut self, body: &[u8]) -> Result<(), Error> {
        let payload = self.open_control(MessageType::Rekey, body)?;
        rekey::validate_rekey_payload(&payload)?;
        self.inbound.rotate_key(&[])?;
        self.stats.received += 1;

        tracing::debug!("{:?} inbound rekey #{}", self.role, self.stats.received);
        Ok(())
    }

    fn verify_pending_reply(&mut self, payload: &[u8]) -> Result<(), Error> {
        let challenge = self
            .pending_challenge
            .take()
            .ok_or_else(|| self.invalid_state(Some(MessageType::Reply)))?;
        let sid = self.session_id(Direction::Outbound)?;
        auth::verify_reply(payload, &sid, &challenge, self.peer.key())
            .map_err(HandshakeError::Authentication)?;
        Ok(())
    }

    /// Rotate both channels with both identity keys, initiator first.
    fn identity_rekey(&mut self) -> Result<(), Error> {
        let (initiator, responder) = match self.role {
            Role::Initiator => (self.identity.public_key(), self.peer.key()),
            Role::Responder => (self.peer.key(), self.identity.public_key()),
        };
        let mut mix_in = Vec::with_capacity(2 * initiator.as_bytes().len());
        mix_in.extend_from_slice(initiator.as_bytes());
        mix_in.extend_from_slice(responder.as_bytes());

        self.inbound.rotate_key(&mix_in)?;
        self.outbound.rotate_key(&mix_in)?;
        self.stats.identity += 1;
        Ok(())
    }

    fn become_ready(&mut self) -> Result<(), Error> {
        self.transition_to(ConnectionState::Ready)?;
        self.events.push_back(Event::Ready);
        Ok(())
    }

    fn session_id(&self, direction: Direction) -> Result<[u8; SESSION_ID_SIZE], Error> {
        let channel = match direction {
            Direction::Inbound => &self.inbound,
            Direction::Outbound => &self.outbound,
        };
        channel
            .session_id()
            .copied()
            .ok_or_else(|| ChannelError::NotEstablished.into())
    }

    /// `tag || seal(payload)` under the outbound channel.
    fn seal_control(&mut self, message: &Message) -> Result<Vec<u8>, Error> {
        let sealed = self.outbound.seal(&message.encode_payload())?;
        let mut packet = Vec::with_capacity(codec::TAG_SIZE + sealed.len());
        packet.push(message.message_type().as_u8());
        packet.extend_from_slice(&sealed);
        Ok(packet)
    }

    fn send_control(&mut self, message: &Message) -> Result<(), Error> {
        let packet = self.seal_control(message)?;
        self.events.push_back(Event::Send(packet));
        Ok(())
    }

    fn open_control(&mut self, message_type: MessageType, body: &[u8]) -> Result<Vec<u8>, Error> {
        let payload = self.inbound.open(body)?;
        codec::check_payload(message_type, &payload)?;
        Ok(payload)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("role", &self.role)
            .field("state", &self.state)
            .field("step", &self.step)
            .field("inbound", &self.inbound)
            .field("outbound", &self.outbound)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}
