//! Hex-encoded identity and pinned peer key files.

use anyhow::Context;
use std::fs;
use std::path::Path;
use tether_crypto::{IdentityKeyPair, IdentityPublicKey, PinnedPeerKey};
use zeroize::Zeroizing;

/// Load the secret identity key from `path`.
///
/// # Errors
///
/// Returns an error if the file is missing, not hex, or not a valid scalar.
pub fn load_identity(path: &Path) -> anyhow::Result<IdentityKeyPair> {
    let contents = Zeroizing::new(
        fs::read_to_string(path)
            .with_context(|| format!("reading identity key {}", path.display()))?,
    );
    let bytes = Zeroizing::new(
        hex::decode(contents.trim())
            .with_context(|| format!("identity key {} is not hex", path.display()))?,
    );
    IdentityKeyPair::from_secret_bytes(&bytes)
        .with_context(|| format!("identity key {} is invalid", path.display()))
}

/// Write the secret identity key to `path`, readable by the owner only.
///
/// # Errors
///
/// Returns an error if the file exists and `force` is false, or on I/O failure.
pub fn save_identity(path: &Path, identity: &IdentityKeyPair, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "Identity key {} already exists (use --force to overwrite)",
            path.display()
        );
    }
    create_parent(path)?;

    let encoded = Zeroizing::new(hex::encode(&identity.secret_bytes()[..]));
    fs::write(path, encoded.as_bytes())?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }

    Ok(())
}

/// Load a hex public key from `path`.
///
/// # Errors
///
/// Returns an error if the file is missing or does not hold a valid point.
pub fn load_public_key(path: &Path) -> anyhow::Result<IdentityPublicKey> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("reading public key {}", path.display()))?;
    parse_public_key(contents.trim())
        .with_context(|| format!("public key {} is invalid", path.display()))
}

/// Load the pinned identity of the peer.
///
/// # Errors
///
/// See [`load_public_key`].
pub fn load_pinned_peer(path: &Path) -> anyhow::Result<PinnedPeerKey> {
    load_public_key(path).map(PinnedPeerKey::new)
}

/// Parse a 33-byte compressed public key from hex.
///
/// # Errors
///
/// Returns an error if `encoded` is not hex or not a curve point.
pub fn parse_public_key(encoded: &str) -> anyhow::Result<IdentityPublicKey> {
    let bytes = hex::decode(encoded)?;
    Ok(IdentityPublicKey::from_slice(&bytes)?)
}

/// Write a public key to `path` as hex.
///
/// # Errors
///
/// Returns an error on I/O failure.
pub fn save_public_key(path: &Path, key: &IdentityPublicKey) -> anyhow::Result<()> {
    create_parent(path)?;
    fs::write(path, format!("{}\n", hex::encode(key.as_bytes())))?;
    Ok(())
}

fn create_parent(path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}
