//! On-disk ECDSA P-256 signing keypair.
//!
//! Two PEM files under one directory: `signing.priv` (PKCS#8, owner-only)
//! and `signing.pub` (SubjectPublicKeyInfo, world-readable). Each file is
//! written to a temporary file first and renamed into place, and the public
//! file is written last, so an interrupted generation leaves no `.pub` and
//! [`keypair_exists`] reports false.

use anyhow::{anyhow, bail, Context, Result};
use jsonwebtoken::{DecodingKey, EncodingKey};
use rcgen::{KeyPair, PKCS_ECDSA_P256_SHA256};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::info;

/// File name prefix shared by both halves of the keypair.
pub const KEYPAIR_PREFIX: &str = "signing";

const PRIVATE_KEY_MODE: u32 = 0o600;
const PUBLIC_KEY_MODE: u32 = 0o644;

/// Loaded keypair, ready for the signer and verifier.
pub struct SigningKeys {
    pub encoding_key: EncodingKey,
    pub decoding_key: DecodingKey,
}

pub fn private_key_path(dir: &Path) -> PathBuf {
    dir.join(format!("{}.priv", KEYPAIR_PREFIX))
}

pub fn public_key_path(dir: &Path) -> PathBuf {
    dir.join(format!("{}.pub", KEYPAIR_PREFIX))
}

/// True if both key files are present and readable.
pub fn keypair_exists(dir: &Path) -> bool {
    fs::File::open(private_key_path(dir)).is_ok() && fs::File::open(public_key_path(dir)).is_ok()
}

/// Generate a fresh keypair into `dir`, replacing any existing one.
pub fn generate_keypair(dir: &Path) -> Result<()> {
    let key_pair = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256)
        .map_err(|e| anyhow!("Failed to generate ECDSA P-256 key: {}", e))?;

    // Drop the old public half first so a crash mid-way is never mistaken
    // for a complete keypair.
    let public_path = public_key_path(dir);
    if public_path.exists() {
        fs::remove_file(&public_path)
            .with_context(|| format!("Failed to remove stale public key: {:?}", public_path))?;
    }

    write_atomically(
        &private_key_path(dir),
        key_pair.serialize_pem().as_bytes(),
        PRIVATE_KEY_MODE,
    )?;
    write_atomically(
        &public_path,
        key_pair.public_key_pem().as_bytes(),
        PUBLIC_KEY_MODE,
    )?;

    info!(dir = ?dir, "Generated signing keypair");
    Ok(())
}

/// Load the keypair from `dir`.
///
/// Fails if either file is missing, is not an ECDSA P-256 key, or the public
/// key does not belong to the private key.
pub fn load_keypair(dir: &Path) -> Result<SigningKeys> {
    let private_path = private_key_path(dir);
    let public_path = public_key_path(dir);

    let private_pem = fs::read_to_string(&private_path)
        .with_context(|| format!("Failed to read private key: {:?}", private_path))?;
    let public_pem = fs::read_to_string(&public_path)
        .with_context(|| format!("Failed to read public key: {:?}", public_path))?;

    let key_pair = KeyPair::from_pem(&private_pem)
        .map_err(|e| anyhow!("Failed to parse private key {:?}: {}", private_path, e))?;

    if key_pair.algorithm() != &PKCS_ECDSA_P256_SHA256 {
        bail!("Private key {:?} is not an ECDSA P-256 key", private_path);
    }
    if key_pair.public_key_pem().trim() != public_pem.trim() {
        bail!(
            "Public key {:?} does not match private key {:?}; regenerate the keypair",
            public_path,
            private_path
        );
    }

    let encoding_key = EncodingKey::from_ec_pem(private_pem.as_bytes())
        .context("Failed to load EC private key")?;
    let decoding_key = DecodingKey::from_ec_pem(public_pem.as_bytes())
        .context("Failed to load EC public key")?;

    Ok(SigningKeys {
        encoding_key,
        decoding_key,
    })
}

/// Load the keypair from `dir`, generating it first if it does not exist.
pub fn ensure_keypair(dir: &Path) -> Result<SigningKeys> {
    if !keypair_exists(dir) {
        info!(dir = ?dir, "No signing keypair found, generating one");
        generate_keypair(dir)?;
    }
    load_keypair(dir)
}

fn write_atomically(path: &Path, contents: &[u8], mode: u32) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| anyhow!("Key path has no parent directory: {:?}", path))?;

    let mut file = NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temporary file in {:?}", dir))?;
    file.write_all(contents)
        .with_context(|| format!("Failed to write {:?}", path))?;
    file.as_file().sync_all()?;
    set_mode(file.as_file(), mode)?;

    file.persist(path)
        .with_context(|| format!("Failed to move key into place: {:?}", path))?;
    Ok(())
}

#[cfg(unix)]
fn set_mode(file: &fs::File, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(fs::Permissions::from_mode(mode))
        .context("Failed to set key file permissions")
}

#[cfg(not(unix))]
fn set_mode(_file: &fs::File, _mode: u32) -> Result<()> {
    Ok(())
}
