//! Vault orchestration
//!
//! Initialization order is fixed: settings, then the encryption engine
//! (which loads or creates the master key), then the credential store.

use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::credential::CredentialStore;
use crate::crypto::{EncryptionEngine, KeySource};
use crate::error::Result;
use crate::settings::{SettingsManager, VaultSettings};

/// One engine and one store bound to a data directory
pub struct Vault {
    settings_manager: SettingsManager,
    engine: Arc<EncryptionEngine>,
    store: CredentialStore,
}

impl Vault {
    /// Open the vault in the default per-user data directory
    pub async fn open_default() -> Result<Self> {
        let data_dir = SettingsManager::default_data_dir()?;
        Self::open(&data_dir).await
    }

    /// Open the vault rooted at `data_dir`
    pub async fn open(data_dir: &Path) -> Result<Self> {
        let settings_manager = SettingsManager::new(data_dir)?;
        let settings = settings_manager.get();

        let engine = Arc::new(EncryptionEngine::new(
            settings_manager.key_file(),
            settings.kdf.clone(),
        ));
        if engine.initialize()? == KeySource::Volatile {
            warn!("Master key is held in memory only; credentials stored now will not survive a restart");
        }

        let store = CredentialStore::open(
            &settings_manager.database_file(),
            Arc::clone(&engine),
            settings.default_retry,
        )
        .await?;

        info!("Vault opened at {:?}", data_dir);
        Ok(Self {
            settings_manager,
            engine,
            store,
        })
    }

    /// The shared encryption engine
    pub fn engine(&self) -> &Arc<EncryptionEngine> {
        &self.engine
    }

    /// The credential store
    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    /// Current settings
    pub fn settings(&self) -> &VaultSettings {
        self.settings_manager.get()
    }

    /// Data directory this vault lives in
    pub fn data_dir(&self) -> &Path {
        self.settings_manager.data_dir()
    }

    /// Where the master key currently comes from
    pub fn key_source(&self) -> Option<KeySource> {
        self.engine.key_source()
    }

    /// Clear the master key from memory
    pub fn lock(&self) {
        self.engine.clear_master_key();
        info!("Vault locked");
    }

    /// Reload the master key after `lock`
    pub fn unlock(&self) -> Result<KeySource> {
        let source = self.engine.initialize()?;
        info!("Vault unlocked");
        Ok(source)
    }
}
