//! Process configuration.
//!
//! Built once at startup from command-line flags with environment fallbacks
//! (after `.env` loading) and handed to constructors explicitly.

use anyhow::{bail, Result};
use clap::{Parser, ValueEnum};
use tracing::warn;

/// Well-known development signing secret. Refused in production mode.
pub const DEV_FALLBACK_SECRET: &str = "xcloud-default-secret-key";

/// Minimum signing secret length accepted in production mode.
pub const MIN_PRODUCTION_SECRET_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AppMode {
    Debug,
    Production,
}

#[derive(Debug, Clone, Parser)]
#[command(name = "xcloud", version, about = "XCloud account administration API")]
pub struct AppConfig {
    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Address to bind
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0")]
    pub bind_addr: String,

    /// SQLite database holding user credentials
    #[arg(long, env = "AUTH_DB_PATH", default_value = "xcloud_auth.db")]
    pub db_path: String,

    /// HMAC secret used to sign tokens
    #[arg(long, env = "JWT_SECRET", hide_env_values = true)]
    pub jwt_secret: Option<String>,

    /// `iss` claim written into and required from tokens
    #[arg(long, env = "JWT_ISSUER", default_value = "xcloud")]
    pub jwt_issuer: String,

    #[arg(long, env = "APP_MODE", value_enum, default_value_t = AppMode::Debug)]
    pub mode: AppMode,

    /// bcrypt work factor
    #[arg(
        long,
        env = "BCRYPT_COST",
        default_value_t = bcrypt::DEFAULT_COST,
        value_parser = clap::value_parser!(u32).range(4..=31)
    )]
    pub bcrypt_cost: u32,
}

impl AppConfig {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }

    /// The configured secret, or the development fallback outside production.
    pub fn signing_secret(&self) -> Result<String> {
        let configured = self
            .jwt_secret
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());

        match (configured, self.mode) {
            (Some(secret), AppMode::Production) if secret.len() < MIN_PRODUCTION_SECRET_LEN => {
                bail!(
                    "JWT_SECRET must be at least {MIN_PRODUCTION_SECRET_LEN} bytes in production mode"
                )
            }
            (Some(secret), _) => Ok(secret.to_string()),
            (None, AppMode::Production) => bail!("JWT_SECRET is required in production mode"),
            (None, AppMode::Debug) => {
                warn!("JWT_SECRET not set, using the development fallback secret");
                Ok(DEV_FALLBACK_SECRET.to_string())
            }
        }
    }
}
