//! Credential configuration types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Marker returned in place of a stored secret
pub const REDACTED_MARKER: &str = "[ENCRYPTED]";

/// How the desktop app authenticates against the work-tracking service
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    /// Personal access token
    #[default]
    Pat,
    /// Federated identity; no token is required
    Federated,
}

impl AuthMode {
    pub fn as_str(self) -> &'static str {
        match self {
            AuthMode::Pat => "pat",
            AuthMode::Federated => "federated",
        }
    }

    pub(crate) fn parse(s: &str) -> Self {
        match s {
            "federated" => AuthMode::Federated,
            _ => AuthMode::Pat,
        }
    }
}

/// Connection state of a configuration. Any operation may set any value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connected,
    Error,
}

impl ConnectionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Error => "error",
        }
    }

    pub(crate) fn parse(s: &str) -> Self {
        match s {
            "connected" => ConnectionStatus::Connected,
            "error" => ConnectionStatus::Error,
            _ => ConnectionStatus::Disconnected,
        }
    }
}

impl std::str::FromStr for ConnectionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "disconnected" | "connected" | "error" => Ok(Self::parse(s)),
            other => Err(format!(
                "unknown connection status '{}' (expected disconnected, connected or error)",
                other
            )),
        }
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Retry policy for calls against the work-tracking service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
        }
    }
}

/// Optional fields for `store_token`.
///
/// On insert, absent values take defaults. On update, absent values keep
/// what is already stored.
#[derive(Debug, Clone, Default)]
pub struct StoreOptions {
    pub auth_mode: Option<AuthMode>,
    pub webhook_url: Option<String>,
    /// Generated when absent on insert
    pub webhook_secret: Option<String>,
    pub retry_policy: Option<RetryPolicy>,
    pub enabled: Option<bool>,
}

/// Configuration without any secret material (safe to display or log)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationSummary {
    pub id: Uuid,
    pub organization_url: String,
    pub project_name: String,
    pub auth_mode: AuthMode,
    pub webhook_url: Option<String>,
    pub retry_policy: RetryPolicy,
    pub enabled: bool,
    pub connection_status: ConnectionStatus,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Single configuration with secrets replaced by `REDACTED_MARKER`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationView {
    #[serde(flatten)]
    pub summary: ConfigurationSummary,
    pub pat_token: Option<String>,
    pub webhook_secret: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parsing() {
        for status in [
            ConnectionStatus::Disconnected,
            ConnectionStatus::Connected,
            ConnectionStatus::Error,
        ] {
            assert_eq!(status.as_str().parse::<ConnectionStatus>().unwrap(), status);
        }
        assert!("online".parse::<ConnectionStatus>().is_err());
        assert_eq!(ConnectionStatus::parse("garbage"), ConnectionStatus::Disconnected);
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&ConnectionStatus::Connected).unwrap();
        assert_eq!(json, "\"connected\"");
        assert_eq!(AuthMode::parse(AuthMode::Federated.as_str()), AuthMode::Federated);
    }
}
