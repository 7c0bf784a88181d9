//! Zeroization validation tests
//!
//! Key-bearing types derive `Zeroize`; these tests drive the explicit wipe
//! path and check that the observable key material is gone afterwards.

use rand_core::OsRng;
use tether_crypto::aead::{AeadKey, Nonce};
use tether_crypto::{CipherSuite, ChannelKeys, EphemeralSecret, SharedSecret};
use zeroize::Zeroize;

fn is_zeroed(data: &[u8]) -> bool {
    data.iter().all(|&b| b == 0)
}

fn shared_secret() -> SharedSecret {
    let a = EphemeralSecret::generate(&mut OsRng).unwrap();
    let b = EphemeralSecret::generate(&mut OsRng).unwrap();
    a.diffie_hellman(&b.public_key()).unwrap()
}

#[test]
fn test_aead_key_zeroization() {
    let mut key = AeadKey::new([42u8; 32]);
    key.zeroize();

    assert!(is_zeroed(key.as_bytes()));
}

#[test]
fn test_shared_secret_zeroization() {
    let mut shared = shared_secret();
    assert!(!is_zeroed(shared.as_bytes()));

    shared.zeroize();
    assert!(is_zeroed(shared.as_bytes()));
}

#[test]
fn test_channel_keys_zeroization() {
    let mut keys = ChannelKeys::derive(&shared_secret(), CipherSuite::XChaCha20Poly1305Blake3);
    let zero_key = AeadKey::new([0u8; 32]);
    assert_ne!(keys.fingerprint(), zero_key.commitment());

    keys.zeroize();

    assert_eq!(keys.fingerprint(), zero_key.commitment());
    assert!(is_zeroed(keys.session_id()));
}

#[test]
fn test_wiped_channel_keys_cannot_open_old_traffic() {
    let shared = shared_secret();
    let sender = ChannelKeys::derive(&shared, CipherSuite::XChaCha20Poly1305Blake3);
    let mut receiver = ChannelKeys::derive(&shared, CipherSuite::XChaCha20Poly1305Blake3);

    let sealed = sender.seal(0, b"before wipe", b"").unwrap();
    receiver.zeroize();

    assert!(receiver.open(0, &sealed, b"").is_err());
}

#[test]
fn test_wiped_aead_key_matches_zero_key() {
    let nonce = Nonce::from_counter(0, &[0u8; 16]);
    let mut key = AeadKey::new([7u8; 32]);
    key.zeroize();

    let sealed = AeadKey::new([0u8; 32]).encrypt(&nonce, b"x", b"").unwrap();
    assert_eq!(key.decrypt(&nonce, &sealed, b"").unwrap(), b"x");
}
