//! AES-256-GCM sealing for secrets at rest and handshake cookies.
//!
//! A sealed value is `base64(nonce):base64(ciphertext)` in a single string,
//! so it can live in one database column or one cookie. GCM is authenticated:
//! any tampering with either part fails decryption.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

/// Size of the master key in bytes (256 bits)
const KEY_SIZE: usize = 32;

/// Size of the nonce in bytes (96 bits, standard for GCM)
const NONCE_SIZE: usize = 12;

/// Validates that the master key is exactly 32 bytes when base64 decoded.
pub fn validate_key(key_base64: &str) -> Result<Vec<u8>> {
    let key_bytes = BASE64
        .decode(key_base64)
        .context("Failed to decode base64 encryption key")?;

    if key_bytes.len() != KEY_SIZE {
        return Err(anyhow!(
            "Encryption key must be {} bytes (256 bits), got {} bytes",
            KEY_SIZE,
            key_bytes.len()
        ));
    }

    Ok(key_bytes)
}

/// Seals plaintext with a fresh random nonce.
///
/// Returns a `nonce:ciphertext` string, both parts base64-encoded.
pub fn seal(plaintext: &str, key: &[u8]) -> Result<String> {
    if key.len() != KEY_SIZE {
        return Err(anyhow!("Encryption key must be {} bytes", KEY_SIZE));
    }

    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| anyhow!("Failed to create cipher: {}", e))?;

    // Random nonce, never reused
    let nonce_bytes = Aes256Gcm::generate_nonce(&mut OsRng);

    let ciphertext_bytes = cipher
        .encrypt(&nonce_bytes, plaintext.as_bytes())
        .map_err(|e| anyhow!("Encryption failed: {}", e))?;

    Ok(format!(
        "{}:{}",
        BASE64.encode(nonce_bytes),
        BASE64.encode(&ciphertext_bytes)
    ))
}

/// Opens a sealed `nonce:ciphertext` string.
///
/// Fails on a wrong key, a malformed string, or tampered data.
pub fn open(sealed: &str, key: &[u8]) -> Result<String> {
    if key.len() != KEY_SIZE {
        return Err(anyhow!("Encryption key must be {} bytes", KEY_SIZE));
    }

    let (nonce_part, ciphertext_part) = sealed
        .split_once(':')
        .ok_or_else(|| anyhow!("Sealed value missing nonce separator"))?;

    let nonce_bytes = BASE64.decode(nonce_part).context("Failed to decode nonce")?;
    let ciphertext_bytes = BASE64
        .decode(ciphertext_part)
        .context("Failed to decode ciphertext")?;

    if nonce_bytes.len() != NONCE_SIZE {
        return Err(anyhow!(
            "Invalid nonce size: expected {}, got {}",
            NONCE_SIZE,
            nonce_bytes.len()
        ));
    }

    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| anyhow!("Failed to create cipher: {}", e))?;

    let nonce = Nonce::from_slice(&nonce_bytes);

    let plaintext_bytes = cipher
        .decrypt(nonce, ciphertext_bytes.as_ref())
        .map_err(|e| anyhow!("Decryption failed (wrong key or corrupted data): {}", e))?;

    String::from_utf8(plaintext_bytes).context("Decrypted data is not valid UTF-8")
}
