//! Vault settings
//!
//! Non-sensitive configuration in a plain JSON file next to the key file
//! and the database. A missing file means defaults.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::credential::RetryPolicy;
use crate::crypto::KdfParams;
use crate::error::{Result, VaultError};

/// Default master key file name
pub const KEY_FILE_NAME: &str = "master.key";
/// Default database file name
pub const DATABASE_FILE_NAME: &str = "credentials.db";
const SETTINGS_FILE_NAME: &str = "settings.json";

/// Vault settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VaultSettings {
    /// Settings file version
    pub version: u32,
    /// Override for the master key location
    pub key_file: Option<PathBuf>,
    /// Override for the database location
    pub database_file: Option<PathBuf>,
    /// Argon2id parameters for `hash`
    pub kdf: KdfParams,
    /// Retry policy given to newly created configurations
    pub default_retry: RetryPolicy,
}

impl Default for VaultSettings {
    fn default() -> Self {
        Self {
            version: 1,
            key_file: None,
            database_file: None,
            kdf: KdfParams::default(),
            default_retry: RetryPolicy::default(),
        }
    }
}

/// Settings bound to a data directory
pub struct SettingsManager {
    data_dir: PathBuf,
    settings_file: PathBuf,
    settings: VaultSettings,
}

impl SettingsManager {
    /// Load settings from `data_dir`, falling back to defaults
    pub fn new(data_dir: &Path) -> Result<Self> {
        let settings_file = data_dir.join(SETTINGS_FILE_NAME);
        let settings = Self::load_from_file(&settings_file)?;

        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            settings_file,
            settings,
        })
    }

    /// Default per-user data directory
    pub fn default_data_dir() -> Result<PathBuf> {
        ProjectDirs::from("com", "tracker-vault", "tracker-vault")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .ok_or_else(|| VaultError::Persistence("Could not determine data directory".to_string()))
    }

    fn load_from_file(path: &Path) -> Result<VaultSettings> {
        if !path.exists() {
            debug!("No settings file found, using defaults");
            return Ok(VaultSettings::default());
        }

        let contents = std::fs::read_to_string(path)?;
        let settings: VaultSettings = serde_json::from_str(&contents)?;
        debug!("Loaded settings from {:?}", path);
        Ok(settings)
    }

    /// Save settings to file
    pub async fn save(&self) -> Result<()> {
        let contents = serde_json::to_string_pretty(&self.settings)?;

        tokio::fs::create_dir_all(&self.data_dir).await?;

        // Write atomically using temp file
        let temp_path = self.settings_file.with_extension("tmp");
        tokio::fs::write(&temp_path, &contents).await?;
        tokio::fs::rename(&temp_path, &self.settings_file).await?;

        debug!("Saved settings to {:?}", self.settings_file);
        Ok(())
    }

    /// Get current settings
    pub fn get(&self) -> &VaultSettings {
        &self.settings
    }

    /// Get mutable settings
    pub fn get_mut(&mut self) -> &mut VaultSettings {
        &mut self.settings
    }

    /// Data directory these settings belong to
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Effective master key path
    pub fn key_file(&self) -> PathBuf {
        self.settings
            .key_file
            .clone()
            .unwrap_or_else(|| self.data_dir.join(KEY_FILE_NAME))
    }

    /// Effective database path
    pub fn database_file(&self) -> PathBuf {
        self.settings
            .database_file
            .clone()
            .unwrap_or_else(|| self.data_dir.join(DATABASE_FILE_NAME))
    }
}
