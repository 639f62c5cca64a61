//! Randomness and secret-handling helpers.
//!
//! Random material comes from `ring`'s system CSPRNG and is encoded with
//! URL-safe base64 so it can travel in query strings and path segments.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ring::rand::{SecureRandom, SystemRandom};

use crate::errors::{CloudKeepError, Result};

/// Fill a buffer of `len` bytes from the system CSPRNG.
pub fn random_bytes(len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    SystemRandom::new()
        .fill(&mut buf)
        .map_err(|_| CloudKeepError::Application("System random generator unavailable".into()))?;
    Ok(buf)
}

/// Random URL-safe token carrying `len * 8` bits of entropy.
pub fn random_token(len: usize) -> Result<String> {
    Ok(URL_SAFE_NO_PAD.encode(random_bytes(len)?))
}

/// Random lowercase hex string of `len` bytes.
pub fn random_hex(len: usize) -> Result<String> {
    Ok(hex_encode(&random_bytes(len)?))
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Compare two byte strings without an early exit on the first mismatch.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Shorten a secret for logs: first 4 and last 4 characters.
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 12 {
        return "****".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}
