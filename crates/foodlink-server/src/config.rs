use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, bail};

use foodlink_engine::EngineSettings;
use foodlink_gateway::connection::GatewayConfig;

/// Secrets that ship in examples and must never reach production.
const PLACEHOLDER_SECRETS: &[&str] = &["dev-secret-change-me", "change-me", "changeme", "secret"];

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub token_ttl_hours: i64,
    pub store_timeout_ms: u64,
    pub rate_limit_max: usize,
    pub rate_limit_window_secs: u64,
    pub expiry_sweep_secs: u64,
    pub default_radius_m: f64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(get: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let jwt_secret = get("FOODLINK_JWT_SECRET")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .context("FOODLINK_JWT_SECRET must be set")?;
        if PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("FOODLINK_JWT_SECRET is a placeholder value; refusing to start");
        }

        let config = Self {
            host: get("FOODLINK_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_or(&get, "FOODLINK_PORT", 3000)?,
            db_path: PathBuf::from(get("FOODLINK_DB_PATH").unwrap_or_else(|| "foodlink.db".into())),
            jwt_secret,
            token_ttl_hours: parse_or(&get, "FOODLINK_TOKEN_TTL_HOURS", 720)?,
            store_timeout_ms: parse_or(&get, "FOODLINK_STORE_TIMEOUT_MS", 5000)?,
            rate_limit_max: parse_or(&get, "FOODLINK_RATE_LIMIT_MAX", 100)?,
            rate_limit_window_secs: parse_or(&get, "FOODLINK_RATE_LIMIT_WINDOW_SECS", 60)?,
            expiry_sweep_secs: parse_or(&get, "FOODLINK_EXPIRY_SWEEP_SECS", 60)?,
            default_radius_m: parse_or(&get, "FOODLINK_DISCOVERY_DEFAULT_RADIUS_M", 5000.0)?,
        };

        if config.token_ttl_hours <= 0 {
            bail!("FOODLINK_TOKEN_TTL_HOURS must be positive");
        }
        if config.store_timeout_ms == 0 {
            bail!("FOODLINK_STORE_TIMEOUT_MS must be positive");
        }
        if config.rate_limit_max == 0 || config.rate_limit_window_secs == 0 {
            bail!("rate limit max and window must be positive");
        }
        if config.expiry_sweep_secs == 0 {
            bail!("FOODLINK_EXPIRY_SWEEP_SECS must be positive");
        }
        if !config.default_radius_m.is_finite() || config.default_radius_m <= 0.0 {
            bail!("FOODLINK_DISCOVERY_DEFAULT_RADIUS_M must be a positive number");
        }
        Ok(config)
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            store_timeout: Duration::from_millis(self.store_timeout_ms),
            default_radius_m: self.default_radius_m,
        }
    }

    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            rate_limit_max: self.rate_limit_max,
            rate_limit_window: Duration::from_secs(self.rate_limit_window_secs),
        }
    }
}

fn parse_or<F, T>(get: &F, key: &str, default: T) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{} has an invalid value {:?}: {}", key, raw, e)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_only_secret_is_set() {
        let config = Config::from_lookup(lookup(&[("FOODLINK_JWT_SECRET", "a-long-random-value")])).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.db_path, PathBuf::from("foodlink.db"));
        assert_eq!(config.token_ttl_hours, 720);
        assert_eq!(config.engine_settings().store_timeout, Duration::from_millis(5000));
        assert_eq!(config.gateway_config().rate_limit_max, 100);
        assert_eq!(config.gateway_config().rate_limit_window, Duration::from_secs(60));
        assert_eq!(config.expiry_sweep_secs, 60);
        assert_eq!(config.default_radius_m, 5000.0);
    }

    #[test]
    fn missing_or_placeholder_secret_is_refused() {
        assert!(Config::from_lookup(lookup(&[])).is_err());
        assert!(Config::from_lookup(lookup(&[("FOODLINK_JWT_SECRET", "  ")])).is_err());
        assert!(Config::from_lookup(lookup(&[("FOODLINK_JWT_SECRET", "dev-secret-change-me")])).is_err());
    }

    #[test]
    fn malformed_numbers_are_errors() {
        let err = Config::from_lookup(lookup(&[
            ("FOODLINK_JWT_SECRET", "a-long-random-value"),
            ("FOODLINK_PORT", "eighty"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("FOODLINK_PORT"));

        assert!(Config::from_lookup(lookup(&[
            ("FOODLINK_JWT_SECRET", "a-long-random-value"),
            ("FOODLINK_RATE_LIMIT_MAX", "0"),
        ]))
        .is_err());
    }

    #[test]
    fn zero_store_timeout_is_refused() {
        let err = Config::from_lookup(lookup(&[
            ("FOODLINK_JWT_SECRET", "a-long-random-value"),
            ("FOODLINK_STORE_TIMEOUT_MS", "0"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("FOODLINK_STORE_TIMEOUT_MS"));
    }

    #[test]
    fn overrides_are_read() {
        let config = Config::from_lookup(lookup(&[
            ("FOODLINK_JWT_SECRET", "a-long-random-value"),
            ("FOODLINK_PORT", "8080"),
            ("FOODLINK_STORE_TIMEOUT_MS", "250"),
            ("FOODLINK_DISCOVERY_DEFAULT_RADIUS_M", "1500.5"),
        ]))
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.engine_settings().store_timeout, Duration::from_millis(250));
        assert_eq!(config.default_radius_m, 1500.5);
    }
}
