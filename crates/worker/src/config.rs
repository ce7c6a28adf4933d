//! Worker configuration

use std::env;
use std::time::Duration;

/// Cron expression (with seconds) for the orphan sweep
pub const DEFAULT_SWEEP_SCHEDULE: &str = "0 */10 * * * *";

/// Stripe checkout sessions expire after 24h, so nothing older can still settle
pub const DEFAULT_SWEEP_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

/// Upper bound for `SWEEP_WINDOW_SECS`
pub const MAX_SWEEP_WINDOW: Duration = Duration::from_secs(31 * 24 * 60 * 60);

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_url: String,
    pub database_max_connections: u32,
    pub sweep_schedule: String,
    pub sweep_window: Duration,
    /// Run one sweep immediately instead of waiting for the first tick
    pub sweep_on_startup: bool,
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let sweep_window = match env::var("SWEEP_WINDOW_SECS") {
            Ok(raw) => {
                let secs: u64 = raw
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::Invalid("SWEEP_WINDOW_SECS"))?;
                let window = Duration::from_secs(secs);
                if secs == 0 || window > MAX_SWEEP_WINDOW {
                    return Err(ConfigError::Invalid("SWEEP_WINDOW_SECS"));
                }
                window
            }
            Err(_) => DEFAULT_SWEEP_WINDOW,
        };

        Ok(Self {
            database_url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::Missing("DATABASE_URL"))?,
            database_max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
            sweep_schedule: env::var("SWEEP_SCHEDULE")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_SWEEP_SCHEDULE.to_string()),
            sweep_window,
            sweep_on_startup: env::var("SWEEP_ON_STARTUP")
                .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
                .unwrap_or(false),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),
}
