//! # vault-core
//!
//! Secure credential management for Tracker Vault:
//! - A process-wide `EncryptionEngine` owning one AES-256 master key
//! - AES-256-GCM encryption, Argon2id hashing, URL-safe secret generation
//! - Structural validation of access tokens
//! - An SQLite-backed `CredentialStore` keyed by (organization, project)

pub mod credential;
pub mod crypto;
pub mod error;
pub mod settings;
mod vault;

pub use credential::{
    AuthMode, ConfigurationSummary, ConfigurationView, ConnectionStatus, CredentialStore,
    RetryPolicy, StoreOptions, REDACTED_MARKER,
};
pub use crypto::{EncryptedBlob, EncryptionEngine, KdfParams, KeySource, MasterKey, SecretString, TokenKind};
pub use error::{Result, VaultError};
pub use settings::{SettingsManager, VaultSettings};
pub use vault::Vault;
