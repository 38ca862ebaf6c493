//! Encrypted credential storage keyed by (organization, project)

mod manager;
mod types;

pub use manager::CredentialStore;
pub use types::*;
