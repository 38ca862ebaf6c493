//! Cryptographic primitives for secure credential storage
//!
//! This module provides:
//! - AES-256-GCM authenticated encryption
//! - Argon2id hashing of secrets
//! - Secure random secrets and structural token validation
//! - Secure memory handling with zeroize
//! - The `EncryptionEngine` that owns the installation's master key

mod encryption;
mod engine;
mod key_derivation;
mod random;
mod secure_memory;
mod validation;

pub use encryption::{decrypt, encrypt, EncryptedBlob, AUTH_TAG_LEN, IV_LEN};
pub use engine::{EncryptionEngine, KeySource};
pub use key_derivation::{generate_salt, hash_secret, verify_secret, KdfParams};
pub use random::{generate_secure_key, DEFAULT_SECRET_BYTES};
pub use secure_memory::{MasterKey, SecretString, MASTER_KEY_LEN};
pub use validation::{validate_token_format, TokenKind};
