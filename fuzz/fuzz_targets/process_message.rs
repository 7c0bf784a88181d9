//! Fuzz target for the connection state machine
//!
//! Feeds arbitrary message sequences into a started connection. It must
//! never panic, never reach `Ready`, and stay failed after the first error.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use rand_core::OsRng;
use tether_core::{Connection, ConnectionConfig, ConnectionState, Role};
use tether_crypto::{IdentityKeyPair, PinnedPeerKey};

#[derive(Debug, Arbitrary)]
struct Input {
    initiator: bool,
    messages: Vec<Vec<u8>>,
}

fuzz_target!(|input: Input| {
    let role = if input.initiator {
        Role::Initiator
    } else {
        Role::Responder
    };
    let (Ok(local), Ok(peer)) = (
        IdentityKeyPair::generate(&mut OsRng),
        IdentityKeyPair::generate(&mut OsRng),
    ) else {
        return;
    };
    let pin = PinnedPeerKey::new(*peer.public_key());
    let Ok(mut conn) = Connection::new(role, local, pin, &ConnectionConfig::default()) else {
        return;
    };
    let _ = conn.start();

    let mut failed = false;
    for message in input.messages.iter().take(16) {
        let result = conn.process_message(message);
        if failed {
            assert!(result.is_err());
        }
        failed |= result.is_err();
        assert!(!conn.is_ready());
        assert_eq!(conn.state() == ConnectionState::Failed, failed);
    }
});
