//! Tracker Vault CLI - manage encrypted work-tracker credentials from a shell
//!
//! Logs go to stderr; stdout carries only command output so it can be piped.

use std::path::PathBuf;

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use tracing::info;

use vault_core::{AuthMode, ConnectionStatus, KeySource, RetryPolicy, StoreOptions, TokenKind, Vault};

/// Tracker Vault - encrypted storage for work-tracking service credentials
#[derive(Parser, Debug)]
#[command(name = "tracker-vault")]
#[command(version)]
#[command(about = "Tracker Vault - encrypted storage for work-tracking service credentials")]
struct Args {
    /// Data directory holding the master key, database and settings
    #[arg(long, global = true, env = "TRACKER_VAULT_DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

/// Identifies one configuration
#[derive(ClapArgs, Debug)]
struct Target {
    /// Organization URL
    org: String,
    /// Project name
    project: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the master key and database if they do not exist
    Init,
    /// Store (or replace) the configuration for an organization/project
    Store {
        #[command(flatten)]
        target: Target,
        /// Token value; read from TRACKER_VAULT_TOKEN when omitted
        #[arg(long, env = "TRACKER_VAULT_TOKEN", hide_env_values = true)]
        token: Option<String>,
        /// Use federated authentication; no token is needed
        #[arg(long)]
        federated: bool,
        #[arg(long)]
        webhook_url: Option<String>,
        /// Webhook secret; one is generated when omitted
        #[arg(long)]
        webhook_secret: Option<String>,
        #[arg(long)]
        max_attempts: Option<u32>,
        #[arg(long)]
        base_delay_ms: Option<u64>,
        /// Store the configuration disabled
        #[arg(long)]
        disabled: bool,
    },
    /// Replace the token of an existing configuration
    Update {
        #[command(flatten)]
        target: Target,
        #[arg(long, env = "TRACKER_VAULT_TOKEN", hide_env_values = true)]
        token: String,
    },
    /// Print the decrypted token
    Retrieve {
        #[command(flatten)]
        target: Target,
        /// Print the webhook secret instead of the token
        #[arg(long)]
        webhook_secret: bool,
    },
    /// Delete a configuration and its secrets
    Remove {
        #[command(flatten)]
        target: Target,
    },
    /// List all configurations as JSON (no secrets)
    List,
    /// Show one configuration as JSON (secrets masked)
    Show {
        #[command(flatten)]
        target: Target,
    },
    /// Set the connection status
    Status {
        #[command(flatten)]
        target: Target,
        /// disconnected, connected or error
        status: ConnectionStatus,
        /// RFC 3339 time of the last successful sync
        #[arg(long)]
        last_sync_at: Option<DateTime<Utc>>,
    },
    /// Check that the stored token is present and well-formed
    Test {
        #[command(flatten)]
        target: Target,
    },
    /// Print a fresh webhook secret
    GenSecret,
    /// Hash a secret with Argon2id
    Hash {
        secret: String,
        /// B64 salt for a deterministic hash
        #[arg(long)]
        salt: Option<String>,
    },
    /// Check a secret against a hash
    VerifyHash { secret: String, hash: String },
    /// Check a value against a token format
    Validate {
        token: String,
        #[arg(long, value_enum, default_value_t = KindArg::Pat)]
        kind: KindArg,
    },
}

/// Token format accepted by `validate`
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum KindArg {
    /// Personal access token
    Pat,
    /// Webhook secret
    Webhook,
    /// Generic API key
    ApiKey,
}

impl From<KindArg> for TokenKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Pat => TokenKind::PersonalAccessToken,
            KindArg::Webhook => TokenKind::WebhookSecret,
            KindArg::ApiKey => TokenKind::ApiKey,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let vault = match &args.data_dir {
        Some(dir) => Vault::open(dir).await,
        None => Vault::open_default().await,
    }
    .context("Failed to open vault")?;

    if vault.key_source() == Some(KeySource::Volatile) {
        eprintln!("warning: master key could not be persisted; stored credentials will be lost on exit");
    }

    let store = vault.store();

    match args.command {
        Command::Init => {
            info!("Vault ready at {:?}", vault.data_dir());
            println!("{}", vault.data_dir().display());
        }
        Command::Store {
            target,
            token,
            federated,
            webhook_url,
            webhook_secret,
            max_attempts,
            base_delay_ms,
            disabled,
        } => {
            let defaults = vault.settings().default_retry;
            let retry_policy = match (max_attempts, base_delay_ms) {
                (None, None) => None,
                (attempts, delay) => Some(RetryPolicy {
                    max_attempts: attempts.unwrap_or(defaults.max_attempts),
                    base_delay_ms: delay.unwrap_or(defaults.base_delay_ms),
                }),
            };
            let options = StoreOptions {
                auth_mode: federated.then_some(AuthMode::Federated),
                webhook_url,
                webhook_secret,
                retry_policy,
                enabled: disabled.then_some(false),
            };
            let summary = match (token, federated) {
                (Some(token), _) => {
                    store
                        .store_token(&target.org, &target.project, &token, options)
                        .await?
                }
                (None, true) => {
                    store
                        .store_configuration(&target.org, &target.project, options)
                        .await?
                }
                (None, false) => bail!("--token is required unless --federated is set"),
            };
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::Update { target, token } => {
            store
                .update_token(&target.org, &target.project, &token)
                .await?;
        }
        Command::Retrieve {
            target,
            webhook_secret,
        } => {
            let secret = if webhook_secret {
                store
                    .retrieve_webhook_secret(&target.org, &target.project)
                    .await?
            } else {
                store.retrieve_token(&target.org, &target.project).await?
            };
            match secret {
                Some(secret) => println!("{}", secret.expose()),
                None => bail!("no usable secret for {}/{}", target.org, target.project),
            }
        }
        Command::Remove { target } => {
            store
                .remove_pat_token(&target.org, &target.project)
                .await?;
        }
        Command::List => {
            let configs = store.get_configurations().await?;
            println!("{}", serde_json::to_string_pretty(&configs)?);
        }
        Command::Show { target } => {
            match store
                .get_configuration(&target.org, &target.project)
                .await?
            {
                Some(view) => println!("{}", serde_json::to_string_pretty(&view)?),
                None => bail!("no configuration for {}/{}", target.org, target.project),
            }
        }
        Command::Status {
            target,
            status,
            last_sync_at,
        } => {
            store
                .update_connection_status(&target.org, &target.project, status, last_sync_at)
                .await?;
        }
        Command::Test { target } => {
            let ok = store
                .test_connection(&target.org, &target.project)
                .await?;
            println!("{}", if ok { "ok" } else { "failed" });
            if !ok {
                std::process::exit(1);
            }
        }
        Command::GenSecret => {
            println!("{}", store.generate_webhook_secret()?);
        }
        Command::Hash { secret, salt } => {
            println!("{}", vault.engine().hash(&secret, salt.as_deref())?);
        }
        Command::VerifyHash { secret, hash } => {
            let ok = vault.engine().verify_hash(&secret, &hash);
            println!("{}", ok);
            if !ok {
                std::process::exit(1);
            }
        }
        Command::Validate { token, kind } => {
            let ok = vault
                .engine()
                .validate_token_format(&token, kind.into());
            println!("{}", ok);
            if !ok {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
