//! Environment-derived configuration.
//!
//! Mirrors the teacher's `Config::from_env` shape: every option has a
//! sane default, parse failures fall back silently rather than panicking,
//! and `.env` is loaded once at the top.

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub cache_max_size: usize,
    pub cache_ttl_overrides_minutes: HashMap<String, u64>,
    pub max_concurrent_upstream: usize,
    pub max_concurrent_requests: usize,
    pub forecast_deadline_seconds: u64,
    pub offline_mode: bool,
    pub api_keys: HashMap<String, String>,
    pub journal_path: Option<String>,
    pub retry_attempts: u32,
    pub retry_base_backoff_ms: u64,
    pub retry_max_backoff_ms: u64,
    pub fetch_timeout_seconds: u64,
    pub port: u16,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let cache_max_size = env_parse("CACHE_MAX_SIZE", 10_000usize);
        let max_concurrent_upstream = env_parse("MAX_CONCURRENT_UPSTREAM", 8usize);
        let max_concurrent_requests = env_parse("MAX_CONCURRENT_REQUESTS", 64usize);
        let forecast_deadline_seconds = env_parse("FORECAST_DEADLINE_SECONDS", 60u64);
        let offline_mode = env::var("OFFLINE_MODE")
            .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "on" | "yes"))
            .unwrap_or(false);
        let journal_path = env::var("JOURNAL_PATH")
            .ok()
            .filter(|p| !p.is_empty());
        let retry_attempts = env_parse("RETRY_ATTEMPTS", 3u32);
        let retry_base_backoff_ms = env_parse("RETRY_BASE_BACKOFF_MS", 250u64);
        let retry_max_backoff_ms = env_parse("RETRY_MAX_BACKOFF_MS", 5_000u64);
        let fetch_timeout_seconds = env_parse("FETCH_TIMEOUT_SECONDS", 10u64);
        let port = env_parse("PORT", 8080u16);

        if max_concurrent_upstream == 0 || max_concurrent_requests == 0 {
            return Err(AppError::invalid_configuration(
                "MAX_CONCURRENT_UPSTREAM and MAX_CONCURRENT_REQUESTS must be positive",
            ));
        }

        let mut cache_ttl_overrides_minutes = HashMap::new();
        for (key, value) in env::vars() {
            if let Some(source) = key.strip_prefix("CACHE_TTL_MINUTES_") {
                if let Ok(minutes) = value.parse::<u64>() {
                    cache_ttl_overrides_minutes.insert(source.to_lowercase(), minutes);
                }
            }
        }

        let mut api_keys = HashMap::new();
        for (key, value) in env::vars() {
            if let Some(source) = key.strip_suffix("_API_KEY") {
                if !value.is_empty() {
                    api_keys.insert(source.to_lowercase(), value);
                }
            }
        }

        Ok(Self {
            cache_max_size,
            cache_ttl_overrides_minutes,
            max_concurrent_upstream,
            max_concurrent_requests,
            forecast_deadline_seconds,
            offline_mode,
            api_keys,
            journal_path,
            retry_attempts,
            retry_base_backoff_ms,
            retry_max_backoff_ms,
            fetch_timeout_seconds,
            port,
        })
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_seconds)
    }

    pub fn forecast_deadline(&self) -> Duration {
        Duration::from_secs(self.forecast_deadline_seconds)
    }

    pub fn api_key_for(&self, source_id: &str) -> Option<&str> {
        self.api_keys.get(source_id).map(|s| s.as_str())
    }

    pub fn ttl_override_for(&self, source_id: &str) -> Option<Duration> {
        self.cache_ttl_overrides_minutes
            .get(source_id)
            .map(|minutes| Duration::from_secs(minutes * 60))
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_concurrency_caps() {
        env::set_var("MAX_CONCURRENT_UPSTREAM", "0");
        let result = AppConfig::from_env();
        env::remove_var("MAX_CONCURRENT_UPSTREAM");
        assert!(result.is_err());
    }

    #[test]
    fn defaults_are_sane_when_unset() {
        env::remove_var("CACHE_MAX_SIZE");
        env::remove_var("MAX_CONCURRENT_UPSTREAM");
        env::remove_var("MAX_CONCURRENT_REQUESTS");
        let config = AppConfig::from_env().expect("defaults should parse");
        assert_eq!(config.cache_max_size, 10_000);
        assert_eq!(config.max_concurrent_upstream, 8);
        assert_eq!(config.max_concurrent_requests, 64);
    }
}
