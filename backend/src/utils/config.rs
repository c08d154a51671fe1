use anyhow::Result;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::constants::*;
use crate::services::{CoreSettings, MatchRetention};
use crate::utils::retry::RetryPolicy;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    /// Empty means any origin.
    pub allowed_origins: Vec<String>,
    pub core: CoreSettings,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let proximity_radius_meters = env_or("PROXIMITY_RADIUS_METERS", PROXIMITY_RADIUS_METERS);
        let match_retention = match env::var("MATCH_RETENTION") {
            Ok(raw) => MatchRetention::parse(&raw, proximity_radius_meters)
                .ok_or_else(|| anyhow::anyhow!("MATCH_RETENTION must be 'persistent' or 'geofenced', got {:?}", raw))?,
            Err(_) => MatchRetention::Persistent,
        };

        Ok(Self {
            database_url: env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?,
            port: env_or("PORT", DEFAULT_SERVER_PORT),
            allowed_origins: env::var("ALLOWED_ORIGINS")
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|o| !o.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
            core: CoreSettings {
                proximity_radius_meters,
                heartbeat_interval: Duration::from_secs(env_or("HEARTBEAT_INTERVAL_SECS", HEARTBEAT_INTERVAL_SECS)),
                location_timeout: Duration::from_secs(env_or("LOCATION_TIMEOUT_SECS", LOCATION_TIMEOUT_SECS)),
                exchange_ttl: chrono::Duration::seconds(env_or("EXCHANGE_TTL_SECS", EXCHANGE_TTL_SECS)),
                proximity_check_interval: Duration::from_secs(env_or(
                    "PROXIMITY_CHECK_INTERVAL_SECS",
                    PROXIMITY_CHECK_INTERVAL_SECS,
                )),
                reaper_interval: Duration::from_secs(env_or("REAPER_INTERVAL_SECS", REAPER_INTERVAL_SECS)),
                match_retention,
                retry: RetryPolicy {
                    max_attempts: env_or("STORE_MAX_RETRIES", STORE_MAX_RETRIES),
                    base_delay: Duration::from_millis(RETRY_BASE_DELAY_MS),
                    timeout: Duration::from_secs(env_or("STORE_TIMEOUT_SECS", STORE_TIMEOUT_SECS)),
                },
            },
        })
    }

    /// Defaults for everything except the database URL.
    pub fn with_database_url(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            port: DEFAULT_SERVER_PORT,
            allowed_origins: Vec::new(),
            core: CoreSettings::default(),
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::with_database_url("postgres://localhost/flick");
        assert_eq!(config.port, 3000);
        assert!(config.allowed_origins.is_empty());
        assert_eq!(config.core.proximity_radius_meters, 100.0);
        assert_eq!(config.core.heartbeat_interval, Duration::from_secs(60));
        assert_eq!(config.core.exchange_ttl, chrono::Duration::seconds(900));
        assert_eq!(config.core.proximity_check_interval, Duration::from_secs(30));
        assert_eq!(config.core.match_retention, MatchRetention::Persistent);
    }
}
