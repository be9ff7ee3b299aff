//! Secret resolution and URL signing.
//!
//! Secrets (the batch service API key) can come from three sources, in
//! priority order:
//!
//! 1. **Direct value** - for quick local testing (`"api_key": "sk-..."`)
//! 2. **File reference** - for Docker secrets (`"api_key_file": "/run/secrets/key"`)
//! 3. **Env var reference** - for production (`"api_key_env": "OPENAI_API_KEY"`)
//!
//! [`UrlSigner`] produces the time-limited signatures embedded in the object
//! URLs handed to the batch service.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use secrecy::SecretString;
use std::fs;

/// Error type for secret resolution failures.
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("No secret source provided (need one of: direct value, file path, or env var name)")]
    NoSourceProvided,

    #[error("Failed to read secret from file '{path}': {source}")]
    FileReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Environment variable '{name}' not set")]
    EnvVarNotSet { name: String },

    #[error("Environment variable '{name}' contains invalid UTF-8")]
    EnvVarNotUnicode { name: String },

    #[error("Signing error: {0}")]
    SigningError(String),

    #[error("Invalid signing key: {0}")]
    InvalidKey(String),
}

/// Result type for secret resolution.
pub type Result<T> = std::result::Result<T, SecretError>;

/// Resolves a secret from a direct value, a file, or an environment
/// variable, in that order. Empty values are treated as absent.
pub fn resolve_secret(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> Result<SecretString> {
    if let Some(value) = direct {
        if !value.is_empty() {
            return Ok(SecretString::from(value.to_string()));
        }
    }

    if let Some(path) = file_path {
        if !path.is_empty() {
            let expanded = expand_home(path);
            return match fs::read_to_string(&expanded) {
                Ok(content) => Ok(SecretString::from(content.trim().to_string())),
                Err(e) => Err(SecretError::FileReadError {
                    path: expanded,
                    source: e,
                }),
            };
        }
    }

    if let Some(var_name) = env_var {
        if !var_name.is_empty() {
            return match std::env::var(var_name) {
                // Env vars may carry a trailing newline
                Ok(value) => Ok(SecretString::from(value.trim())),
                Err(std::env::VarError::NotPresent) => Err(SecretError::EnvVarNotSet {
                    name: var_name.to_string(),
                }),
                Err(std::env::VarError::NotUnicode(_)) => Err(SecretError::EnvVarNotUnicode {
                    name: var_name.to_string(),
                }),
            };
        }
    }

    Err(SecretError::NoSourceProvided)
}

/// Expands `~` and `~/path` to the current user's home directory.
fn expand_home(path: &str) -> String {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = std::env::var_os("HOME").or_else(|| std::env::var_os("USERPROFILE")) {
            if path == "~" {
                return home.to_string_lossy().into_owned();
            }
            return path.replacen("~", &home.to_string_lossy(), 1);
        }
    }
    path.to_string()
}

// ============================================
// URL signing
// ============================================

const NONCE_SIZE: usize = 12;
const TAG_SIZE: usize = 16;

/// Signs `(object key, expiry)` pairs with AES-256-GCM used as a MAC.
///
/// The signature is the URL-safe base64 of `<12-byte random nonce><16-byte tag>`
/// where the tag authenticates the key and expiry as associated data.
pub struct UrlSigner {
    cipher: Aes256Gcm,
}

impl UrlSigner {
    /// Reads a 64-character hex key from the named environment variable.
    pub fn from_env(var_name: &str) -> Result<Self> {
        let key_hex = std::env::var(var_name).map_err(|_| {
            SecretError::InvalidKey(format!("Environment variable {} not set", var_name))
        })?;

        Self::from_hex_key(key_hex.trim())
    }

    /// Builds a signer from a 64-character hex string (32 bytes decoded).
    pub fn from_hex_key(key_hex: &str) -> Result<Self> {
        let key_bytes = hex_decode(key_hex)
            .map_err(|e| SecretError::InvalidKey(format!("Invalid hex key: {}", e)))?;

        if key_bytes.len() != 32 {
            return Err(SecretError::InvalidKey(format!(
                "Key must be 32 bytes (64 hex chars), got {} bytes",
                key_bytes.len()
            )));
        }

        let cipher = Aes256Gcm::new_from_slice(&key_bytes)
            .map_err(|e| SecretError::InvalidKey(format!("Failed to create cipher: {}", e)))?;

        Ok(Self { cipher })
    }

    /// Signs an object key for the given unix expiry timestamp.
    pub fn sign(&self, key: &str, expires_at: i64) -> Result<String> {
        let nonce_bytes = rand_bytes::<NONCE_SIZE>()?;
        let aad = signed_message(key, expires_at);

        let tag = self
            .cipher
            .encrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload {
                    msg: &[],
                    aad: aad.as_bytes(),
                },
            )
            .map_err(|e| SecretError::SigningError(e.to_string()))?;

        let mut combined = nonce_bytes.to_vec();
        combined.extend(tag);
        Ok(URL_SAFE_NO_PAD.encode(combined))
    }

    /// Checks a signature produced by [`UrlSigner::sign`] and that `now` is
    /// not past the expiry.
    pub fn verify(&self, key: &str, expires_at: i64, signature: &str, now: i64) -> bool {
        if now > expires_at {
            return false;
        }
        let Ok(combined) = URL_SAFE_NO_PAD.decode(signature) else {
            return false;
        };
        if combined.len() != NONCE_SIZE + TAG_SIZE {
            return false;
        }

        let (nonce_bytes, tag) = combined.split_at(NONCE_SIZE);
        let aad = signed_message(key, expires_at);
        self.cipher
            .decrypt(
                Nonce::from_slice(nonce_bytes),
                Payload {
                    msg: tag,
                    aad: aad.as_bytes(),
                },
            )
            .is_ok()
    }
}

fn signed_message(key: &str, expires_at: i64) -> String {
    format!("{}\n{}", key, expires_at)
}

/// Decodes hex string to bytes.
fn hex_decode(hex: &str) -> std::result::Result<Vec<u8>, String> {
    if hex.len() % 2 != 0 {
        return Err("Hex string must have even length".to_string());
    }

    (0..hex.len())
        .step_by(2)
        .map(|i| {
            hex.get(i..i + 2)
                .ok_or_else(|| format!("Invalid hex at position {}", i))
                .and_then(|pair| {
                    u8::from_str_radix(pair, 16)
                        .map_err(|e| format!("Invalid hex at position {}: {}", i, e))
                })
        })
        .collect()
}

/// Generates cryptographically secure random bytes.
fn rand_bytes<const N: usize>() -> Result<[u8; N]> {
    let mut bytes = [0u8; N];
    getrandom::fill(&mut bytes).map_err(|e| {
        SecretError::SigningError(format!("Failed to generate random bytes: {}", e))
    })?;
    Ok(bytes)
}
