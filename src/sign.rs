//! Operator key handling and ed25519 signing helpers.
//!
//! Booths bake the operator's public key into their template parameters;
//! consolidation is authorized by a signature over a message bound to the
//! booth's own address, so replaying it against another booth fails.

use crate::address::Address;
use crate::error::{BallotError, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey, SECRET_KEY_LENGTH};
use rand::rngs::OsRng;
use sha2::{Digest, Sha512};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Domain tag prefixed to every consolidation message.
pub const CONSOLIDATE_DOMAIN: &[u8] = b"qvote.consolidate.v1";

/// Describes how an operator key should be obtained.
#[derive(Debug, Clone)]
pub enum Ed25519KeySource {
    /// Deterministic key derived from an `ed25519://` seed string.
    Seed(String),
    /// Load the secret key material from the provided file path.
    File(PathBuf),
    /// Use a freshly generated random key.
    Random,
}

impl Ed25519KeySource {
    /// Parses a `--key` CLI argument into a concrete key source.
    pub fn from_spec(spec: Option<&str>) -> Self {
        match spec {
            Some(value) if value.starts_with("ed25519://") => {
                Self::Seed(value.trim_start_matches("ed25519://").to_string())
            }
            Some(value) if !value.is_empty() => Self::File(PathBuf::from(value)),
            _ => Self::Random,
        }
    }
}

/// Loads or derives a signing key according to the source.
pub fn load_or_derive_key(source: &Ed25519KeySource) -> Result<SigningKey> {
    let secret = match source {
        Ed25519KeySource::Seed(seed) => derive_secret_from_seed(seed),
        Ed25519KeySource::File(path) => load_secret_from_file(path)?,
        Ed25519KeySource::Random => SigningKey::generate(&mut OsRng).to_bytes(),
    };
    Ok(SigningKey::from_bytes(&secret))
}

/// Address an operator key sweeps consolidated balances to.
pub fn operator_address(verifying: &VerifyingKey) -> Address {
    Address::hash160(verifying.as_bytes())
}

/// Message an operator signs to consolidate `booth`.
pub fn consolidation_message(booth: &Address) -> Vec<u8> {
    let mut message = Vec::with_capacity(CONSOLIDATE_DOMAIN.len() + booth.as_bytes().len());
    message.extend_from_slice(CONSOLIDATE_DOMAIN);
    message.extend_from_slice(booth.as_bytes());
    message
}

/// Signs the consolidation message for `booth`.
pub fn sign_consolidation(signing: &SigningKey, booth: &Address) -> Signature {
    signing.sign(&consolidation_message(booth))
}

/// Strictly verifies `signature` over `payload`.
pub fn verify_signature(
    verifying: &VerifyingKey,
    payload: &[u8],
    signature: &Signature,
) -> Result<()> {
    verifying
        .verify_strict(payload, signature)
        .map_err(|_| BallotError::Unauthorized("signature verification failed".into()))
}

/// Encodes a public key as base64.
pub fn encode_public_key_base64(verifying: &VerifyingKey) -> String {
    BASE64.encode(verifying.to_bytes())
}

/// Decodes a base64 public key.
pub fn decode_public_key_base64(input: &str) -> Result<VerifyingKey> {
    let bytes = BASE64
        .decode(input.trim())
        .map_err(|err| BallotError::Decode(err.to_string()))?;
    VerifyingKey::try_from(bytes.as_slice()).map_err(|err| BallotError::Decode(err.to_string()))
}

/// Encodes a signature as base64.
pub fn encode_signature_base64(sig: &Signature) -> String {
    BASE64.encode(sig.to_bytes())
}

/// Decodes a base64 signature.
pub fn decode_signature_base64(input: &str) -> Result<Signature> {
    let bytes = BASE64
        .decode(input.trim())
        .map_err(|err| BallotError::Decode(err.to_string()))?;
    Signature::from_slice(&bytes).map_err(|err| BallotError::Decode(err.to_string()))
}

fn derive_secret_from_seed(seed: &str) -> [u8; SECRET_KEY_LENGTH] {
    let digest = Sha512::digest(seed.as_bytes());
    let mut secret = [0u8; SECRET_KEY_LENGTH];
    secret.copy_from_slice(&digest[..SECRET_KEY_LENGTH]);
    secret
}

fn load_secret_from_file(path: &Path) -> Result<[u8; SECRET_KEY_LENGTH]> {
    let contents = fs::read(path)
        .map_err(|err| BallotError::Io(format!("failed to read {}: {err}", path.display())))?;
    if contents.len() == SECRET_KEY_LENGTH {
        return bytes_to_secret(&contents);
    }
    let text = std::str::from_utf8(&contents)
        .map_err(|_| BallotError::Decode(format!("{} is not a key file", path.display())))?
        .trim();
    if text.len() == SECRET_KEY_LENGTH * 2 {
        if let Ok(decoded) = hex::decode(text) {
            return bytes_to_secret(&decoded);
        }
    }
    let decoded = BASE64
        .decode(text)
        .map_err(|err| BallotError::Decode(err.to_string()))?;
    bytes_to_secret(&decoded)
}

fn bytes_to_secret(bytes: &[u8]) -> Result<[u8; SECRET_KEY_LENGTH]> {
    bytes.try_into().map_err(|_| {
        BallotError::Decode(format!(
            "secret key must be {SECRET_KEY_LENGTH} bytes, got {}",
            bytes.len()
        ))
    })
}
