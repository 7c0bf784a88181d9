//! Mutual authentication transcripts.
//!
//! Challenge and propose messages are context-separated BLAKE3 hashes bound
//! to the session id of the channel they travel on. A reply is an ECDSA
//! signature over the challenge it answers, so only the holder of the
//! challenged identity key can produce it.
//!
//! ```text
//! challenge = H("challenge", session_id || challenger || target)
//! propose   = H("propose",   session_id || proposer)
//! reply     = ECDSA(H("reply", session_id || challenge))
//! ```

use crate::hash::hash_with_context;
use crate::{
    CryptoError, IdentityKeyPair, IdentityPublicKey, SESSION_ID_SIZE, Signature,
    TRANSCRIPT_HASH_SIZE,
};
use subtle::ConstantTimeEq;

const CHALLENGE_CONTEXT: &str = "tether auth v1 challenge";
const PROPOSE_CONTEXT: &str = "tether auth v1 propose";
const REPLY_CONTEXT: &str = "tether auth v1 reply";

/// A challenge or propose transcript hash.
pub type TranscriptHash = [u8; TRANSCRIPT_HASH_SIZE];

/// Build the challenge `challenger` sends to `target` on the channel
/// identified by `session_id`.
#[must_use]
pub fn build_challenge(
    session_id: &[u8; SESSION_ID_SIZE],
    challenger: &IdentityPublicKey,
    target: &IdentityPublicKey,
) -> TranscriptHash {
    hash_with_context(
        CHALLENGE_CONTEXT,
        &[session_id, challenger.as_bytes(), target.as_bytes()],
    )
}

/// Check a received challenge against the expected identities.
///
/// # Errors
///
/// Returns [`CryptoError::TranscriptMismatch`] if the challenge was not
/// built for this session and identity pair.
pub fn verify_challenge(
    received: &[u8],
    session_id: &[u8; SESSION_ID_SIZE],
    challenger: &IdentityPublicKey,
    target: &IdentityPublicKey,
) -> Result<TranscriptHash, CryptoError> {
    let expected = build_challenge(session_id, challenger, target);
    compare(received, &expected)?;
    Ok(expected)
}

/// Build the identity proposal sent by `proposer`.
#[must_use]
pub fn build_propose(
    session_id: &[u8; SESSION_ID_SIZE],
    proposer: &IdentityPublicKey,
) -> TranscriptHash {
    hash_with_context(PROPOSE_CONTEXT, &[session_id, proposer.as_bytes()])
}

/// Check a received proposal against the pinned identity of the proposer.
///
/// # Errors
///
/// Returns [`CryptoError::TranscriptMismatch`] if the proposal names a
/// different identity or session.
pub fn verify_propose(
    received: &[u8],
    session_id: &[u8; SESSION_ID_SIZE],
    proposer: &IdentityPublicKey,
) -> Result<(), CryptoError> {
    compare(received, &build_propose(session_id, proposer))
}

fn reply_digest(session_id: &[u8; SESSION_ID_SIZE], challenge: &TranscriptHash) -> [u8; 32] {
    hash_with_context(REPLY_CONTEXT, &[session_id, challenge])
}

/// Answer `challenge` by signing it with our identity key.
#[must_use]
pub fn build_reply(
    identity: &IdentityKeyPair,
    session_id: &[u8; SESSION_ID_SIZE],
    challenge: &TranscriptHash,
) -> Signature {
    identity.sign(&reply_digest(session_id, challenge))
}

/// Verify a reply to a challenge we issued.
///
/// # Errors
///
/// Returns [`CryptoError::InvalidSignature`] if the reply is malformed or
/// was not signed by `signer` over this challenge.
pub fn verify_reply(
    received: &[u8],
    session_id: &[u8; SESSION_ID_SIZE],
    challenge: &TranscriptHash,
    signer: &IdentityPublicKey,
) -> Result<(), CryptoError> {
    let signature = Signature::from_slice(received)?;
    signer.verify(&reply_digest(session_id, challenge), &signature)
}

fn compare(received: &[u8], expected: &TranscriptHash) -> Result<(), CryptoError> {
    if received.len() != TRANSCRIPT_HASH_SIZE {
        return Err(CryptoError::TranscriptMismatch);
    }
    if bool::from(received.ct_eq(expected)) {
        Ok(())
    } else {
        Err(CryptoError::TranscriptMismatch)
    }
}
