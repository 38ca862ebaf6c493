//! Structural token validation. Never contacts the external service.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Personal access tokens issued by the work-tracking service
static PAT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9]{20,100}$").unwrap());

/// Webhook secrets, including the ones produced by `generate_secure_key`
static WEBHOOK_SECRET_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{32,128}$").unwrap());

/// Generic API keys
static API_KEY_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._~+/=-]{16,256}$").unwrap());

/// Substrings that mark a placeholder rather than a real secret (lowercase)
const PLACEHOLDER_MARKERS: &[&str] = &["password", "token", "changeme", "placeholder"];

/// Kind of token being validated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    PersonalAccessToken,
    WebhookSecret,
    ApiKey,
}

impl TokenKind {
    fn pattern(self) -> &'static Regex {
        match self {
            TokenKind::PersonalAccessToken => &PAT_PATTERN,
            TokenKind::WebhookSecret => &WEBHOOK_SECRET_PATTERN,
            TokenKind::ApiKey => &API_KEY_PATTERN,
        }
    }
}

/// Check length bounds, character class, and degenerate values.
pub fn validate_token_format(token: &str, kind: TokenKind) -> bool {
    if !kind.pattern().is_match(token) {
        return false;
    }

    let mut chars = token.chars();
    if let Some(first) = chars.next() {
        if chars.all(|c| c == first) {
            return false;
        }
    }

    let lowered = token.to_ascii_lowercase();
    !PLACEHOLDER_MARKERS.iter().any(|m| lowered.contains(m))
}
