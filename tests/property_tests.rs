//! Property-based tests for tether
//!
//! Uses proptest to verify invariants across large input spaces.

use proptest::prelude::*;

// ============================================================================
// Codec Properties
// ============================================================================

mod codec_properties {
    use super::*;
    use tether_core::{
        FRAME_OVERHEAD, MessageType,
        codec::{self, MESSAGE_TABLE, TAG_SIZE},
        size_for_type,
    };

    proptest! {
        /// Only the six table tags have a size
        #[test]
        fn size_defined_for_known_tags_only(tag in any::<u8>()) {
            let size = size_for_type(tag);
            if (0x01..=0x06).contains(&tag) {
                let expected = MESSAGE_TABLE[usize::from(tag - 1)].payload_size;
                prop_assert_eq!(size.unwrap(), expected);
            } else {
                prop_assert!(size.is_err());
            }
        }

        /// Decoding arbitrary bytes never panics, and success means an exact size
        #[test]
        fn decode_accepts_only_exact_sizes(bytes in prop::collection::vec(any::<u8>(), 0..128)) {
            if let Ok(message) = codec::decode_message(&bytes) {
                let message_type = message.message_type();
                prop_assert_eq!(bytes.len(), TAG_SIZE + message_type.payload_size());
                prop_assert_eq!(message.encode(), bytes);
            }
        }

        /// Sealed types carry exactly one frame of overhead on the wire
        #[test]
        fn wire_size_accounts_for_sealing(tag in 1u8..=6) {
            let message_type = MessageType::try_from(tag).unwrap();
            let extra = if message_type.is_sealed() { FRAME_OVERHEAD } else { 0 };
            prop_assert_eq!(message_type.wire_size(), message_type.payload_size() + extra);
        }

        /// The length header inverts under the same mask
        #[test]
        fn length_mask_inverts(len in 0usize..=tether_core::MAX_PLAINTEXT_SIZE, mask in any::<[u8; 4]>()) {
            let header = codec::encode_length(len, mask);
            prop_assert_eq!(codec::decode_length(&header, mask).unwrap(), len);
        }
    }
}

// ============================================================================
// Rekey Policy Properties
// ============================================================================

mod rekey_properties {
    use super::*;
    use tether_core::{FRAME_OVERHEAD, RekeyPolicy};

    proptest! {
        /// Rekey is due exactly when the next packet would reach the threshold
        #[test]
        fn threshold_boundary(
            threshold in (FRAME_OVERHEAD as u64 + 1)..(1u64 << 40),
            sealed in 0u64..(1u64 << 40),
            next in 0usize..(1usize << 24),
        ) {
            let policy = RekeyPolicy::new(threshold);
            let total = sealed + next as u64 + FRAME_OVERHEAD as u64;
            prop_assert_eq!(policy.needs_rekey(sealed, next), total >= threshold);
        }

        /// Never panics on extreme counters
        #[test]
        fn saturates(sealed in any::<u64>(), next in any::<usize>()) {
            let policy = RekeyPolicy::new(u64::MAX);
            let _ = policy.needs_rekey(sealed, next);
            prop_assert!(RekeyPolicy::new(1).needs_rekey(sealed, next));
        }
    }
}

// ============================================================================
// Traffic Properties
// ============================================================================

mod traffic_properties {
    use super::*;
    use tether_core::{ConnectionConfig, FRAME_OVERHEAD, Role};
    use tether_integration_tests::Endpoints;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        /// Any message sequence arrives intact and in order, in both directions
        #[test]
        fn messages_arrive_intact(
            messages in prop::collection::vec(
                (any::<bool>(), prop::collection::vec(any::<u8>(), 0..2048)),
                1..24,
            ),
            threshold in 256u64..8192,
        ) {
            let mut endpoints = Endpoints::new(&ConnectionConfig::with_rekey_threshold(threshold));
            endpoints.handshake().unwrap();

            for (from_wallet, message) in &messages {
                let from = if *from_wallet { Role::Initiator } else { Role::Responder };
                prop_assert_eq!(&endpoints.send(from, message).unwrap(), message);
            }
            prop_assert!(endpoints.initiator.is_ready());
            prop_assert!(endpoints.responder.is_ready());
        }

        /// Sealing is never idempotent and always adds one frame of overhead
        #[test]
        fn encrypt_is_not_idempotent(message in prop::collection::vec(any::<u8>(), 0..512)) {
            let mut endpoints = Endpoints::new(&ConnectionConfig::default());
            endpoints.handshake().unwrap();

            let first = endpoints.initiator.encrypt(&message).unwrap();
            let second = endpoints.initiator.encrypt(&message).unwrap();
            prop_assert_eq!(first.len(), message.len() + FRAME_OVERHEAD);
            prop_assert_ne!(first, second);
        }

        /// A single flipped bit anywhere in a packet is rejected
        #[test]
        fn bit_flip_rejected(
            message in prop::collection::vec(any::<u8>(), 0..256),
            position in any::<prop::sample::Index>(),
            bit in 0u8..8,
        ) {
            let mut endpoints = Endpoints::new(&ConnectionConfig::default());
            endpoints.handshake().unwrap();

            let mut packet = endpoints.initiator.encrypt(&message).unwrap();
            let i = position.index(packet.len());
            packet[i] ^= 1 << bit;

            prop_assert!(endpoints.responder.decrypt(&packet).is_err());
        }
    }
}

// ============================================================================
// Handshake Properties
// ============================================================================

mod handshake_properties {
    use super::*;
    use tether_core::{ConnectionConfig, ConnectionState, Role};
    use tether_integration_tests::Endpoints;

    fn arbitrary_message() -> impl Strategy<Value = Vec<u8>> {
        (0u8..8, prop::collection::vec(any::<u8>(), 0..96)).prop_map(|(tag, mut body)| {
            body.insert(0, tag);
            body
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// Forged messages never authenticate a connection, and the first
        /// rejection is final
        #[test]
        fn forged_messages_never_reach_ready(
            wallet in any::<bool>(),
            messages in prop::collection::vec(arbitrary_message(), 1..12),
        ) {
            let role = if wallet { Role::Initiator } else { Role::Responder };
            let mut endpoints = Endpoints::new(&ConnectionConfig::default());
            let conn = endpoints.connection(role);
            conn.start().unwrap();

            let mut failed = false;
            for message in &messages {
                let result = conn.process_message(message);
                if failed {
                    prop_assert!(result.unwrap_err().is_invalid_state());
                } else if result.is_err() {
                    failed = true;
                }
                prop_assert!(!conn.is_ready());
                prop_assert_eq!(conn.state() == ConnectionState::Failed, failed);
            }
        }

        /// Replaying an honest transcript into a fresh pair fails
        #[test]
        fn transcript_is_session_bound(skip in 0usize..9) {
            let mut original = Endpoints::new(&ConnectionConfig::default());
            let transcript = original.handshake().unwrap();

            let mut fresh = Endpoints::new(&ConnectionConfig::default());
            fresh.responder.start().unwrap();
            fresh.initiator.start().unwrap();

            let mut any_failed = false;
            for sent in transcript.messages.iter().skip(skip) {
                let receiver = match sent.from {
                    Role::Initiator => &mut fresh.responder,
                    Role::Responder => &mut fresh.initiator,
                };
                if receiver.state() != ConnectionState::Failed
                    && receiver.process_message(&sent.bytes).is_err()
                {
                    any_failed = true;
                }
            }

            prop_assert!(any_failed);
            prop_assert!(!fresh.initiator.is_ready());
            prop_assert!(!fresh.responder.is_ready());
        }
    }
}

// ============================================================================
// Handshake Order Properties
// ============================================================================

mod state_order_properties {
    use super::*;
    use tether_core::{ConnectionConfig, ConnectionState, Role};
    use tether_integration_tests::{Endpoints, permutations};

    /// Deliver `order` of the genuine messages `receiver` saw during a
    /// seeded handshake to a fresh copy of that receiver.
    fn replay(seed: u64, receiver: Role, order: &[usize]) -> Result<(), TestCaseError> {
        let config = ConnectionConfig::default();
        let messages = Endpoints::seeded(seed, &config)
            .handshake()
            .unwrap()
            .received_by(receiver);
        prop_assert_eq!(messages.len(), order.len());

        let mut fresh = Endpoints::seeded(seed, &config);
        let conn = fresh.connection(receiver);
        conn.start().unwrap();

        let in_order = order.iter().enumerate().all(|(i, &index)| i == index);
        for (position, &index) in order.iter().enumerate() {
            match conn.process_message(&messages[index]) {
                // Only the genuine prefix is accepted
                Ok(()) => prop_assert_eq!(index, position),
                Err(err) => {
                    prop_assert!(!in_order, "genuine order rejected: {}", err);
                    prop_assert!(err.is_invalid_state(), "{:?}: {}", order, err);
                    prop_assert_eq!(conn.state(), ConnectionState::Failed);
                    prop_assert!(!conn.is_ready());
                    return Ok(());
                }
            }
        }

        prop_assert!(in_order, "{:?} was accepted", order);
        prop_assert!(conn.is_ready());
        Ok(())
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(4))]

        /// Every ordering of the five messages a responder receives, other
        /// than the table order, fails with InvalidState
        #[test]
        fn responder_rejects_every_other_order(seed in any::<u64>()) {
            let orders = permutations(5);
            prop_assert_eq!(orders.len(), 120);
            for order in &orders {
                replay(seed, Role::Responder, order)?;
            }
        }

        /// Same for the four messages an initiator receives
        #[test]
        fn initiator_rejects_every_other_order(seed in any::<u64>()) {
            let orders = permutations(4);
            prop_assert_eq!(orders.len(), 24);
            for order in &orders {
                replay(seed, Role::Initiator, order)?;
            }
        }
    }
}
