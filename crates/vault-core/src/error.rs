//! Error types for vault-core

use thiserror::Error;

/// Result type alias for vault operations
pub type Result<T> = std::result::Result<T, VaultError>;

/// Vault error types
#[derive(Error, Debug)]
pub enum VaultError {
    #[error("Encryption engine is not initialized - no master key loaded")]
    NotInitialized,

    #[error("Refusing to process empty input")]
    EmptyInput,

    #[error("Invalid encrypted data format: {0}")]
    InvalidFormat(String),

    #[error("Authentication failed - ciphertext was tampered with or the key is wrong")]
    AuthenticationFailed,

    #[error("Invalid token format: {0}")]
    InvalidTokenFormat(String),

    #[error("Configuration not found: {0}")]
    NotFound(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Master key unavailable: {0}")]
    KeyMaterial(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for VaultError {
    fn from(e: rusqlite::Error) -> Self {
        VaultError::Persistence(e.to_string())
    }
}

impl From<tokio::task::JoinError> for VaultError {
    fn from(e: tokio::task::JoinError) -> Self {
        VaultError::Persistence(format!("Task join error: {}", e))
    }
}
