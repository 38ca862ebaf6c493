//! Credential store manager
//!
//! One row per (organization URL, project name). Tokens and webhook secrets
//! are encrypted by the `EncryptionEngine` before they reach SQLite and are
//! decrypted on the way out. Reads degrade to `None` when a stored secret
//! cannot be decrypted; writes surface every failure.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::types::{
    AuthMode, ConfigurationSummary, ConfigurationView, ConnectionStatus, RetryPolicy,
    StoreOptions, REDACTED_MARKER,
};
use crate::crypto::{EncryptedBlob, EncryptionEngine, SecretString, TokenKind, DEFAULT_SECRET_BYTES};
use crate::error::{Result, VaultError};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS tracker_configurations (
    id                   TEXT PRIMARY KEY,
    organization_url     TEXT NOT NULL,
    project_name         TEXT NOT NULL,
    auth_mode            TEXT NOT NULL DEFAULT 'pat',
    encrypted_pat_token  TEXT,
    webhook_url          TEXT,
    webhook_secret       TEXT,
    retry_max_attempts   INTEGER NOT NULL DEFAULT 3,
    retry_base_delay_ms  INTEGER NOT NULL DEFAULT 1000,
    enabled              INTEGER NOT NULL DEFAULT 1,
    connection_status    TEXT NOT NULL DEFAULT 'disconnected',
    last_sync_at         TEXT,
    created_at           TEXT NOT NULL,
    updated_at           TEXT NOT NULL,
    UNIQUE (organization_url, project_name)
);

CREATE INDEX IF NOT EXISTS idx_tracker_configurations_status
    ON tracker_configurations(connection_status);
";

/// Columns that never carry secret material, in `row_to_summary` order
const SUMMARY_COLUMNS: &str = "id, organization_url, project_name, auth_mode, webhook_url,
    retry_max_attempts, retry_base_delay_ms, enabled, connection_status,
    last_sync_at, created_at, updated_at";

/// Single-statement upsert keyed on the (organization_url, project_name) constraint.
/// Bare column names in the UPDATE arm refer to the existing row.
const UPSERT: &str = "
INSERT INTO tracker_configurations (
    id, organization_url, project_name, auth_mode, encrypted_pat_token,
    webhook_url, webhook_secret, retry_max_attempts, retry_base_delay_ms,
    enabled, connection_status, last_sync_at, created_at, updated_at
) VALUES (
    ?1, ?2, ?3, COALESCE(?4, 'pat'), ?5,
    ?6, COALESCE(?7, ?8), COALESCE(?9, ?10), COALESCE(?11, ?12),
    COALESCE(?13, 1), ?15, NULL, ?14, ?14
)
ON CONFLICT (organization_url, project_name) DO UPDATE SET
    auth_mode           = COALESCE(?4, auth_mode),
    encrypted_pat_token = excluded.encrypted_pat_token,
    webhook_url         = COALESCE(?6, webhook_url),
    webhook_secret      = COALESCE(?7, webhook_secret, excluded.webhook_secret),
    retry_max_attempts  = COALESCE(?9, retry_max_attempts),
    retry_base_delay_ms = COALESCE(?11, retry_base_delay_ms),
    enabled             = COALESCE(?13, enabled),
    connection_status   = excluded.connection_status,
    updated_at          = excluded.updated_at
";

/// Credential store manager
pub struct CredentialStore {
    conn: Arc<Mutex<Connection>>,
    engine: Arc<EncryptionEngine>,
    default_retry: RetryPolicy,
}

impl CredentialStore {
    /// Open (or create) the database at `path`
    pub async fn open(
        path: &Path,
        engine: Arc<EncryptionEngine>,
        default_retry: RetryPolicy,
    ) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let db_path = path.to_path_buf();
        let conn = tokio::task::spawn_blocking(move || -> Result<Connection> {
            let conn = Connection::open(&db_path)?;
            conn.busy_timeout(Duration::from_secs(5))?;
            conn.execute_batch(SCHEMA)?;
            Ok(conn)
        })
        .await??;

        info!("Credential store opened at {:?}", path);
        Ok(Self::with_connection(conn, engine, default_retry))
    }

    /// Open a throwaway in-memory database
    pub fn open_in_memory(engine: Arc<EncryptionEngine>, default_retry: RetryPolicy) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self::with_connection(conn, engine, default_retry))
    }

    fn with_connection(conn: Connection, engine: Arc<EncryptionEngine>, default_retry: RetryPolicy) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            engine,
            default_retry,
        }
    }

    /// Run `f` against the connection on the blocking pool
    async fn run<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            f(&conn)
        })
        .await?
    }

    fn encrypt_field(&self, plaintext: &str) -> Result<String> {
        self.engine.encrypt(plaintext)?.to_json()
    }

    /// Decrypt a stored blob, logging and discarding any failure
    fn decrypt_field(&self, what: &str, org: &str, project: &str, stored: &str) -> Option<SecretString> {
        let result = EncryptedBlob::from_json(stored).and_then(|blob| self.engine.decrypt(&blob));
        match result {
            Ok(plaintext) => Some(SecretString::new(plaintext)),
            Err(e) => {
                warn!("Stored {} for {}/{} is unusable: {}", what, org, project, e);
                None
            }
        }
    }

    fn ensure_token_format(&self, org: &str, project: &str, token: &str) -> Result<()> {
        if self
            .engine
            .validate_token_format(token, TokenKind::PersonalAccessToken)
        {
            Ok(())
        } else {
            Err(VaultError::InvalidTokenFormat(format!(
                "token for {}/{} does not look like a personal access token",
                org, project
            )))
        }
    }

    /// Encrypt and store a token, inserting or updating the (org, project) row
    pub async fn store_token(
        &self,
        org: &str,
        project: &str,
        token: &str,
        options: StoreOptions,
    ) -> Result<ConfigurationSummary> {
        self.ensure_token_format(org, project, token)?;

        let encrypted_token = self.encrypt_field(token)?;
        let summary = self
            .upsert(org, project, Some(encrypted_token), options, ConnectionStatus::Connected)
            .await?;

        info!("Stored token for {}/{}", org, project);
        Ok(summary)
    }

    /// Store a federated configuration that carries no personal access token.
    ///
    /// The row is forced to `federated` mode, any previously stored token is
    /// dropped and the status resets to `disconnected`.
    pub async fn store_configuration(
        &self,
        org: &str,
        project: &str,
        mut options: StoreOptions,
    ) -> Result<ConfigurationSummary> {
        options.auth_mode = Some(AuthMode::Federated);
        let summary = self
            .upsert(org, project, None, options, ConnectionStatus::Disconnected)
            .await?;

        info!("Stored federated configuration for {}/{}", org, project);
        Ok(summary)
    }

    async fn upsert(
        &self,
        org: &str,
        project: &str,
        encrypted_token: Option<String>,
        options: StoreOptions,
        status: ConnectionStatus,
    ) -> Result<ConfigurationSummary> {
        let supplied_secret = match options.webhook_secret.as_deref() {
            Some(secret) => Some(self.encrypt_field(secret)?),
            None => None,
        };
        let generated_secret = self.encrypt_field(&self.generate_webhook_secret()?)?;

        let id = Uuid::new_v4().to_string();
        let org_owned = org.to_string();
        let project_owned = project.to_string();
        let default_retry = self.default_retry;
        let now = Utc::now().to_rfc3339();

        self.run(move |conn| {
            conn.execute(
                UPSERT,
                params![
                    id,
                    org_owned,
                    project_owned,
                    options.auth_mode.map(AuthMode::as_str),
                    encrypted_token,
                    options.webhook_url,
                    supplied_secret,
                    generated_secret,
                    options.retry_policy.map(|r| r.max_attempts),
                    default_retry.max_attempts,
                    options.retry_policy.map(|r| r.base_delay_ms as i64),
                    default_retry.base_delay_ms as i64,
                    options.enabled,
                    now,
                    status.as_str(),
                ],
            )?;
            select_summary(conn, &org_owned, &project_owned)?
                .ok_or_else(|| VaultError::Persistence("Upserted row vanished".to_string()))
        })
        .await
    }

    /// Decrypted token, or `None` when absent or unusable
    pub async fn retrieve_token(&self, org: &str, project: &str) -> Result<Option<SecretString>> {
        let stored = self
            .select_secret_column(org, project, "encrypted_pat_token")
            .await?;
        Ok(stored.and_then(|s| self.decrypt_field("token", org, project, &s)))
    }

    /// Decrypted webhook secret, or `None` when absent or unusable
    pub async fn retrieve_webhook_secret(
        &self,
        org: &str,
        project: &str,
    ) -> Result<Option<SecretString>> {
        let stored = self
            .select_secret_column(org, project, "webhook_secret")
            .await?;
        Ok(stored.and_then(|s| self.decrypt_field("webhook secret", org, project, &s)))
    }

    async fn select_secret_column(
        &self,
        org: &str,
        project: &str,
        column: &'static str,
    ) -> Result<Option<String>> {
        let org = org.to_string();
        let project = project.to_string();
        self.run(move |conn| {
            let sql = format!(
                "SELECT {} FROM tracker_configurations
                 WHERE organization_url = ?1 AND project_name = ?2",
                column
            );
            let value: Option<Option<String>> = conn
                .query_row(&sql, params![org, project], |row| row.get(0))
                .optional()?;
            Ok(value.flatten())
        })
        .await
    }

    /// Replace the token of an existing configuration
    pub async fn update_token(&self, org: &str, project: &str, new_token: &str) -> Result<()> {
        if !self.exists(org, project).await? {
            return Err(not_found(org, project));
        }

        self.ensure_token_format(org, project, new_token)?;
        let encrypted_token = self.encrypt_field(new_token)?;

        let org_owned = org.to_string();
        let project_owned = project.to_string();
        let now = Utc::now().to_rfc3339();

        let updated = self
            .run(move |conn| {
                Ok(conn.execute(
                    "UPDATE tracker_configurations
                     SET encrypted_pat_token = ?1, connection_status = 'connected', updated_at = ?2
                     WHERE organization_url = ?3 AND project_name = ?4",
                    params![encrypted_token, now, org_owned, project_owned],
                )?)
            })
            .await?;

        if updated == 0 {
            return Err(not_found(org, project));
        }

        info!("Updated token for {}/{}", org, project);
        Ok(())
    }

    /// Delete a configuration together with its secrets
    pub async fn remove_pat_token(&self, org: &str, project: &str) -> Result<()> {
        let org_owned = org.to_string();
        let project_owned = project.to_string();

        let deleted = self
            .run(move |conn| {
                Ok(conn.execute(
                    "DELETE FROM tracker_configurations
                     WHERE organization_url = ?1 AND project_name = ?2",
                    params![org_owned, project_owned],
                )?)
            })
            .await?;

        if deleted == 0 {
            return Err(not_found(org, project));
        }

        info!("Removed configuration for {}/{}", org, project);
        Ok(())
    }

    /// All configurations, secrets omitted
    pub async fn get_configurations(&self) -> Result<Vec<ConfigurationSummary>> {
        self.run(|conn| {
            let sql = format!(
                "SELECT {} FROM tracker_configurations ORDER BY organization_url, project_name",
                SUMMARY_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([], row_to_summary)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    /// One configuration with secrets replaced by a marker
    pub async fn get_configuration(&self, org: &str, project: &str) -> Result<Option<ConfigurationView>> {
        let org = org.to_string();
        let project = project.to_string();

        self.run(move |conn| {
            let sql = format!(
                "SELECT {}, encrypted_pat_token IS NOT NULL, webhook_secret IS NOT NULL
                 FROM tracker_configurations
                 WHERE organization_url = ?1 AND project_name = ?2",
                SUMMARY_COLUMNS
            );
            let view = conn
                .query_row(&sql, params![org, project], |row| {
                    let has_token: bool = row.get(12)?;
                    let has_secret: bool = row.get(13)?;
                    Ok(ConfigurationView {
                        summary: row_to_summary(row)?,
                        pat_token: has_token.then(|| REDACTED_MARKER.to_string()),
                        webhook_secret: has_secret.then(|| REDACTED_MARKER.to_string()),
                    })
                })
                .optional()?;
            Ok(view)
        })
        .await
    }

    /// Set status (and optionally the last sync time) without touching secrets
    pub async fn update_connection_status(
        &self,
        org: &str,
        project: &str,
        status: ConnectionStatus,
        last_sync_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let org_owned = org.to_string();
        let project_owned = project.to_string();
        let now = Utc::now().to_rfc3339();
        let last_sync = last_sync_at.map(|t| t.to_rfc3339());

        let updated = self
            .run(move |conn| {
                Ok(conn.execute(
                    "UPDATE tracker_configurations
                     SET connection_status = ?1, last_sync_at = COALESCE(?2, last_sync_at), updated_at = ?3
                     WHERE organization_url = ?4 AND project_name = ?5",
                    params![status.as_str(), last_sync, now, org_owned, project_owned],
                )?)
            })
            .await?;

        if updated == 0 {
            return Err(not_found(org, project));
        }

        debug!("Connection status for {}/{} is now {}", org, project, status);
        Ok(())
    }

    /// Format-level check of the stored token. A failing check marks the row `error`.
    pub async fn test_connection(&self, org: &str, project: &str) -> Result<bool> {
        let usable = match self.retrieve_token(org, project).await? {
            Some(token) => self
                .engine
                .validate_token_format(token.expose(), TokenKind::PersonalAccessToken),
            None => false,
        };

        if !usable {
            match self
                .update_connection_status(org, project, ConnectionStatus::Error, None)
                .await
            {
                Ok(()) | Err(VaultError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }

        Ok(usable)
    }

    /// Fresh URL-safe webhook secret
    pub fn generate_webhook_secret(&self) -> Result<String> {
        self.engine.generate_secure_key(DEFAULT_SECRET_BYTES)
    }

    async fn exists(&self, org: &str, project: &str) -> Result<bool> {
        let org = org.to_string();
        let project = project.to_string();
        self.run(move |conn| {
            Ok(conn
                .prepare_cached(
                    "SELECT 1 FROM tracker_configurations
                     WHERE organization_url = ?1 AND project_name = ?2",
                )?
                .exists(params![org, project])?)
        })
        .await
    }
}

fn not_found(org: &str, project: &str) -> VaultError {
    VaultError::NotFound(format!("{}/{}", org, project))
}

fn select_summary(conn: &Connection, org: &str, project: &str) -> Result<Option<ConfigurationSummary>> {
    let sql = format!(
        "SELECT {} FROM tracker_configurations WHERE organization_url = ?1 AND project_name = ?2",
        SUMMARY_COLUMNS
    );
    Ok(conn
        .query_row(&sql, params![org, project], row_to_summary)
        .optional()?)
}

fn parse_timestamp(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e)))
}

fn row_to_summary(row: &Row<'_>) -> rusqlite::Result<ConfigurationSummary> {
    let id: String = row.get(0)?;
    let auth_mode: String = row.get(3)?;
    let max_attempts: u32 = row.get(5)?;
    let base_delay_ms: i64 = row.get(6)?;
    let status: String = row.get(8)?;
    let last_sync_at: Option<String> = row.get(9)?;
    let created_at: String = row.get(10)?;
    let updated_at: String = row.get(11)?;

    Ok(ConfigurationSummary {
        id: Uuid::parse_str(&id).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })?,
        organization_url: row.get(1)?,
        project_name: row.get(2)?,
        auth_mode: AuthMode::parse(&auth_mode),
        webhook_url: row.get(4)?,
        retry_policy: RetryPolicy {
            max_attempts,
            base_delay_ms: base_delay_ms.max(0) as u64,
        },
        enabled: row.get(7)?,
        connection_status: ConnectionStatus::parse(&status),
        last_sync_at: last_sync_at
            .as_deref()
            .map(|s| parse_timestamp(9, s))
            .transpose()?,
        created_at: parse_timestamp(10, &created_at)?,
        updated_at: parse_timestamp(11, &updated_at)?,
    })
}
