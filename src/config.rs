//! Configuration for tiprelay
//!
//! CLI arguments and environment variable handling using clap. A `.env`
//! file is loaded by `main` before parsing.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::clients::http::GatewayConfig;
use crate::engine::EngineConfig;
use crate::worker::PoolConfig;

/// Secret used in dev mode when `WALLET_SECRET` is unset
const DEV_WALLET_SECRET: &str = "dev-only-insecure-wallet-secret";

/// tiprelay - social tip relay and registration engine
#[derive(Parser, Debug, Clone)]
#[command(name = "tiprelay")]
#[command(about = "Relays tips between social identities over custodial ledger accounts")]
pub struct Args {
    /// SQLite database file
    #[arg(long, env = "DATABASE_PATH", default_value = "tiprelay.db")]
    pub database_path: PathBuf,

    /// Master secret for custodial key derivation
    #[arg(long, env = "WALLET_SECRET", hide_env_values = true)]
    pub wallet_secret: Option<String>,

    /// Ledger gateway base URL
    #[arg(long, env = "LEDGER_GATEWAY_URL", default_value = "http://localhost:7890")]
    pub ledger_gateway_url: String,

    /// Ledger gateway bearer token (optional)
    #[arg(long, env = "LEDGER_GATEWAY_TOKEN", hide_env_values = true)]
    pub ledger_gateway_token: Option<String>,

    /// Ledger network name passed to the gateway
    #[arg(long, env = "LEDGER_NETWORK", default_value = "testnet")]
    pub ledger_network: String,

    /// Social gateway base URL
    #[arg(long, env = "SOCIAL_GATEWAY_URL", default_value = "http://localhost:7891")]
    pub social_gateway_url: String,

    /// Social gateway bearer token (optional)
    #[arg(long, env = "SOCIAL_GATEWAY_TOKEN", hide_env_values = true)]
    pub social_gateway_token: Option<String>,

    /// Community whose posts are scanned for tips
    #[arg(long, env = "SOCIAL_COMMUNITY", default_value = "tiprelay")]
    pub social_community: String,

    /// Pattern the social gateway matches tip posts against
    #[arg(long, env = "TIP_PATTERN", default_value = r"!tipxem\s+(\d+(\.\d+)?)")]
    pub tip_pattern: String,

    /// Token symbol shown in notices
    #[arg(long, env = "TOKEN_SYMBOL", default_value = "XEM")]
    pub token_symbol: String,

    /// Seconds between block polls
    #[arg(long, env = "BLOCK_POLL_INTERVAL_SECS", default_value = "15")]
    pub block_poll_interval_secs: u64,

    /// Seconds between inbox polls
    #[arg(long, env = "INBOX_POLL_INTERVAL_SECS", default_value = "10")]
    pub inbox_poll_interval_secs: u64,

    /// Seconds between tip-post polls
    #[arg(long, env = "MENTION_POLL_INTERVAL_SECS", default_value = "30")]
    pub mention_poll_interval_secs: u64,

    /// Event handlers allowed to run at once
    #[arg(long, env = "HANDLER_CONCURRENCY", default_value = "8")]
    pub handler_concurrency: usize,

    /// Timeout for gateway requests in milliseconds
    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value = "30000")]
    pub request_timeout_ms: u64,

    /// Seconds to wait for running poll cycles on shutdown
    #[arg(long, env = "SHUTDOWN_GRACE_SECS", default_value = "10")]
    pub shutdown_grace_secs: u64,

    /// Block height to start from when no cursor is stored
    #[arg(long, env = "BLOCK_START_HEIGHT", default_value = "0")]
    pub block_start_height: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON", default_value = "false")]
    pub log_json: bool,

    /// Run against in-memory ledger and social adapters
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,
}

impl Args {
    /// Effective wallet secret (falls back to a fixed secret in dev mode)
    pub fn wallet_secret(&self) -> Option<String> {
        match &self.wallet_secret {
            Some(secret) => Some(secret.clone()),
            None if self.dev_mode => Some(DEV_WALLET_SECRET.to_string()),
            None => None,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn ledger_gateway(&self) -> GatewayConfig {
        GatewayConfig {
            base_url: self.ledger_gateway_url.clone(),
            token: self.ledger_gateway_token.clone(),
            request_timeout: self.request_timeout(),
        }
    }

    pub fn social_gateway(&self) -> GatewayConfig {
        GatewayConfig {
            base_url: self.social_gateway_url.clone(),
            token: self.social_gateway_token.clone(),
            request_timeout: self.request_timeout(),
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            token_symbol: self.token_symbol.clone(),
            tip_pattern: self.tip_pattern.clone(),
            pool: PoolConfig {
                concurrency: self.handler_concurrency,
                // A handler makes a handful of sequential gateway calls
                handler_timeout: self.request_timeout() * 4,
            },
            block_interval: Duration::from_secs(self.block_poll_interval_secs),
            inbox_interval: Duration::from_secs(self.inbox_poll_interval_secs),
            mention_interval: Duration::from_secs(self.mention_poll_interval_secs),
            block_start_height: self.block_start_height,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if !self.dev_mode && self.wallet_secret.as_deref().map_or(true, |s| s.trim().is_empty()) {
            return Err("WALLET_SECRET is required in production mode".to_string());
        }

        for (name, value) in [
            ("BLOCK_POLL_INTERVAL_SECS", self.block_poll_interval_secs),
            ("INBOX_POLL_INTERVAL_SECS", self.inbox_poll_interval_secs),
            ("MENTION_POLL_INTERVAL_SECS", self.mention_poll_interval_secs),
            ("REQUEST_TIMEOUT_MS", self.request_timeout_ms),
        ] {
            if value == 0 {
                return Err(format!("{} must be greater than zero", name));
            }
        }

        if self.handler_concurrency == 0 {
            return Err("HANDLER_CONCURRENCY must be greater than zero".to_string());
        }

        if self.tip_pattern.trim().is_empty() {
            return Err("TIP_PATTERN must not be empty".to_string());
        }

        Ok(())
    }
}
