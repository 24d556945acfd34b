use crate::application::accrual_client::AccrualClientConfig;
use crate::application::auth::AuthConfig;
use crate::application::reconciler::ReconcilerConfig;
use crate::error::{LoyaltyError, Result};
use clap::Args;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

const DEVELOPMENT_JWT_SECRET: &str = "loyalty-development-secret-change-me";

/// Runtime settings shared by every subcommand.
///
/// Each option can also be supplied through the environment variable named
/// next to it.
#[derive(Args, Debug, Clone)]
pub struct Settings {
    /// Base address of the accrual authority
    #[arg(short = 'r', long, env = "ACCRUAL_SYSTEM_ADDRESS", global = true)]
    pub accrual_address: Option<String>,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(short = 'd', long, env = "DATABASE_URI", global = true)]
    pub db_path: Option<PathBuf>,

    /// Reconciliation tick interval in milliseconds
    #[arg(long, env = "POLL_INTERVAL_MS", default_value_t = 5000, global = true)]
    pub poll_interval_ms: u64,

    /// Maximum orders examined per reconciliation tick
    #[arg(long, env = "RECONCILE_BATCH_SIZE", default_value_t = 100, global = true)]
    pub batch_size: usize,

    /// Per-query timeout for the accrual authority, in seconds
    #[arg(long, env = "ACCRUAL_TIMEOUT_SECS", default_value_t = 10, global = true)]
    pub accrual_timeout_secs: u64,

    /// Cooldown applied when a rate-limit reply has no Retry-After header
    #[arg(long, env = "ACCRUAL_RETRY_AFTER_SECS", default_value_t = 60, global = true)]
    pub default_retry_after_secs: u64,

    /// Secret used to sign access tokens
    #[arg(long, env = "JWT_SECRET", hide_env_values = true, global = true)]
    pub jwt_secret: Option<String>,

    /// Lifetime of issued access tokens, in hours
    #[arg(long, env = "TOKEN_TTL_HOURS", default_value_t = 24, global = true)]
    pub token_ttl_hours: u64,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,
}

impl Settings {
    pub fn reconciler(&self) -> Result<ReconcilerConfig> {
        if self.poll_interval_ms == 0 {
            return Err(LoyaltyError::ConfigError(
                "poll interval must be positive".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(LoyaltyError::ConfigError(
                "batch size must be positive".to_string(),
            ));
        }
        Ok(ReconcilerConfig {
            tick_interval: Duration::from_millis(self.poll_interval_ms),
            batch_size: self.batch_size,
        })
    }

    pub fn accrual_client(&self) -> Result<AccrualClientConfig> {
        if self.accrual_timeout_secs == 0 {
            return Err(LoyaltyError::ConfigError(
                "accrual timeout must be positive".to_string(),
            ));
        }
        Ok(AccrualClientConfig {
            request_timeout: Duration::from_secs(self.accrual_timeout_secs),
            default_retry_after: Duration::from_secs(self.default_retry_after_secs),
        })
    }

    pub fn auth(&self) -> Result<AuthConfig> {
        let token_ttl_secs = self.token_ttl_hours.checked_mul(3600).ok_or_else(|| {
            LoyaltyError::ConfigError(format!(
                "token ttl of {} hours is out of range",
                self.token_ttl_hours
            ))
        })?;
        let secret = match &self.jwt_secret {
            Some(secret) if !secret.is_empty() => secret.clone(),
            _ => {
                warn!("JWT_SECRET is not set, using the development secret");
                DEVELOPMENT_JWT_SECRET.to_string()
            }
        };
        Ok(AuthConfig {
            secret,
            token_ttl: Duration::from_secs(token_ttl_secs),
        })
    }
}
