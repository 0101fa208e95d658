//! One-time recovery codes for account access without the authenticator.
//!
//! Codes are shown to the user exactly once at generation; only their
//! Argon2 hashes are persisted. Comparison happens against the stored
//! hash after normalizing user input, so "abcd-efgh-jk23" and
//! "ABCDEFGHJK23" name the same code.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use rand::rngs::OsRng;
use rand::Rng;

use crate::error::{AuthError, AuthResult};

pub(super) const BATCH_SIZE: usize = 10;
const GROUPS: usize = 3;
const GROUP_LEN: usize = 4;

// No 0/O/1/I, so a code read off paper is unambiguous.
const ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// A freshly generated batch: plain codes for one-time display plus the
/// hashes that go to the store.
#[derive(Debug)]
pub struct RecoveryCodeBatch {
    pub plain_codes: Vec<String>,
    pub code_hashes: Vec<String>,
}

/// Generate a batch of recovery codes in `XXXX-XXXX-XXXX` form.
///
/// # Errors
/// `Unexpected` when hashing fails.
pub(super) fn generate_batch() -> AuthResult<RecoveryCodeBatch> {
    let mut plain_codes = Vec::with_capacity(BATCH_SIZE);
    let mut code_hashes = Vec::with_capacity(BATCH_SIZE);
    for _ in 0..BATCH_SIZE {
        let code = generate_code();
        code_hashes.push(hash_code(&code)?);
        plain_codes.push(code);
    }
    Ok(RecoveryCodeBatch {
        plain_codes,
        code_hashes,
    })
}

fn generate_code() -> String {
    let mut rng = OsRng;
    let mut groups = Vec::with_capacity(GROUPS);
    for _ in 0..GROUPS {
        let group: String = (0..GROUP_LEN)
            .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
            .collect();
        groups.push(group);
    }
    groups.join("-")
}

fn hash_code(code: &str) -> AuthResult<String> {
    let salt = SaltString::generate(&mut argon2::password_hash::rand_core::OsRng);
    Argon2::default()
        .hash_password(normalize(code).as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AuthError::Unexpected(anyhow::anyhow!("failed to hash recovery code: {e}")))
}

/// Uppercase and strip separators before comparison.
pub(super) fn normalize(input: &str) -> String {
    input
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Check a submitted code against one stored hash. An undecodable stored
/// hash counts as a mismatch rather than an error, so one corrupt row
/// cannot lock out the rest of the batch.
pub(super) fn matches(submitted: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(normalize(submitted).as_bytes(), &parsed)
        .is_ok()
}
