//! Slow salted hashing of secrets using Argon2id
//!
//! Hashes are PHC strings (`$argon2id$v=19$m=..,t=..,p=..$<salt>$<hash>`),
//! so the salt and parameters travel with the derived hash.

use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

use crate::error::{Result, VaultError};

/// Parameters for Argon2id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KdfParams {
    /// Memory cost in KiB (default: 65536 = 64MB)
    pub memory_cost: u32,
    /// Time cost / iterations (default: 3)
    pub time_cost: u32,
    /// Parallelism (default: 4)
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_cost: 65536, // 64 MB
            time_cost: 3,
            parallelism: 4,
        }
    }
}

impl KdfParams {
    fn hasher(&self) -> Result<Argon2<'static>> {
        let params = Params::new(self.memory_cost, self.time_cost, self.parallelism, Some(32))
            .map_err(|e| VaultError::KeyDerivation(e.to_string()))?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

/// Generate a cryptographically secure random salt (B64, PHC alphabet)
pub fn generate_salt() -> String {
    SaltString::generate(&mut OsRng).to_string()
}

/// Hash a secret. Without `salt` a fresh random one is drawn; with `salt` the result is deterministic.
pub fn hash_secret(secret: &str, salt: Option<&str>, params: &KdfParams) -> Result<String> {
    if secret.is_empty() {
        return Err(VaultError::EmptyInput);
    }

    let salt = match salt {
        Some(s) => SaltString::from_b64(s)
            .map_err(|e| VaultError::KeyDerivation(format!("Invalid salt: {}", e)))?,
        None => SaltString::generate(&mut OsRng),
    };

    let hash = params
        .hasher()?
        .hash_password(secret.as_bytes(), &salt)
        .map_err(|e| VaultError::KeyDerivation(e.to_string()))?;

    Ok(hash.to_string())
}

/// Check a secret against a stored PHC string.
///
/// Parameters and salt come from `stored`. The derived-hash comparison is
/// constant-time. Malformed input yields `false`.
pub fn verify_secret(secret: &str, stored: &str) -> bool {
    let parsed = match PasswordHash::new(stored) {
        Ok(parsed) => parsed,
        Err(_) => return false,
    };

    Argon2::default()
        .verify_password(secret.as_bytes(), &parsed)
        .is_ok()
}
