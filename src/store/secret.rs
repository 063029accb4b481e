//! Salted SHA-256 digests for the app password and profile PINs
//!
//! Stored form is `<salt hex>$<digest hex>`.

use rand::RngCore;
use sha2::{Digest, Sha256};

const SALT_LEN: usize = 16;

fn digest(salt: &[u8], secret: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(secret.as_bytes());
    hasher.finalize().into()
}

/// Hash a secret with a fresh random salt
pub fn hash_secret(secret: &str) -> String {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    format!("{}${}", hex::encode(salt), hex::encode(digest(&salt, secret)))
}

/// Check a secret against a stored hash in constant time
pub fn verify_secret(secret: &str, stored: &str) -> bool {
    let Some((salt_hex, digest_hex)) = stored.split_once('$') else {
        return false;
    };
    let (Ok(salt), Ok(expected)) = (hex::decode(salt_hex), hex::decode(digest_hex)) else {
        return false;
    };
    constant_time_eq(&digest(&salt, secret), &expected)
}

/// Byte comparison whose duration does not depend on where inputs differ
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
