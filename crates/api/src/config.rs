//! Application configuration loaded from environment variables.

use std::time::Duration;

use saga::identity::MIN_SECRET_LEN;
use saga::{RetryPolicy, ScanConfig};

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `text` or `json` (default: `text`)
/// - `DATABASE_URL`: Postgres connection string; in-memory backends when unset
/// - `ORDER_QUEUE`, `SHIPPING_QUEUE`, `DISPATCH_QUEUE`: stage queue names
/// - `VISIBILITY_TIMEOUT_SECS`: broker lease length (default: `30`)
/// - `SCAN_TIMEOUT_MS`: per-scan deadline (default: `5000`)
/// - `CONFIRM_MAX_ATTEMPTS`: confirmation attempts on transient errors (default: `3`)
/// - `CONFIRM_RETRY_BASE_MS`: backoff base (default: `50`)
/// - `IDENTITY_SECRET`: enables signed admin requests when set
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub order_queue: String,
    pub shipping_queue: String,
    pub dispatch_queue: String,
    pub visibility_timeout: Duration,
    pub scan_timeout: Duration,
    pub confirm_max_attempts: u32,
    pub confirm_retry_base: Duration,
    pub identity_secret: Option<String>,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: match lookup("LOG_FORMAT").as_deref() {
                Some(f) if f.eq_ignore_ascii_case("json") => LogFormat::Json,
                _ => LogFormat::Text,
            },
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            order_queue: lookup("ORDER_QUEUE").unwrap_or(defaults.order_queue),
            shipping_queue: lookup("SHIPPING_QUEUE").unwrap_or(defaults.shipping_queue),
            dispatch_queue: lookup("DISPATCH_QUEUE").unwrap_or(defaults.dispatch_queue),
            visibility_timeout: parsed("VISIBILITY_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.visibility_timeout),
            scan_timeout: parsed("SCAN_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.scan_timeout),
            confirm_max_attempts: parsed("CONFIRM_MAX_ATTEMPTS")
                .and_then(|n| u32::try_from(n).ok())
                .unwrap_or(defaults.confirm_max_attempts),
            confirm_retry_base: parsed("CONFIRM_RETRY_BASE_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.confirm_retry_base),
            identity_secret: lookup("IDENTITY_SECRET").filter(|s| !s.is_empty()),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Rejects settings the server cannot start with.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(secret) = &self.identity_secret
            && secret.len() < MIN_SECRET_LEN
        {
            return Err(format!(
                "IDENTITY_SECRET must be at least {MIN_SECRET_LEN} bytes"
            ));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.confirm_max_attempts, self.confirm_retry_base)
    }

    pub fn scan_config(&self) -> ScanConfig {
        ScanConfig {
            timeout: Some(self.scan_timeout),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            order_queue: "OrderQueue".to_string(),
            shipping_queue: "ShippingQueue".to_string(),
            dispatch_queue: "DispatchQueue".to_string(),
            visibility_timeout: Duration::from_secs(30),
            scan_timeout: Duration::from_millis(5000),
            confirm_max_attempts: 3,
            confirm_retry_base: Duration::from_millis(50),
            identity_secret: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.order_queue, "OrderQueue");
        assert_eq!(config.scan_timeout, Duration::from_secs(5));
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_addr_formatting() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Config::default()
        };
        assert_eq!(config.addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_empty_lookup_gives_defaults() {
        let config = Config::from_lookup(|_| None);
        assert_eq!(config.addr(), "0.0.0.0:3000");
        assert_eq!(config.log_format, LogFormat::Text);
        assert_eq!(config.confirm_max_attempts, 3);
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup_from(&[
            ("PORT", "8081"),
            ("LOG_FORMAT", "JSON"),
            ("DATABASE_URL", "postgres://localhost/saga"),
            ("ORDER_QUEUE", "orders.v2"),
            ("SCAN_TIMEOUT_MS", "250"),
            ("CONFIRM_MAX_ATTEMPTS", "5"),
            ("CONFIRM_RETRY_BASE_MS", "10"),
        ]));

        assert_eq!(config.port, 8081);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/saga"));
        assert_eq!(config.order_queue, "orders.v2");
        assert_eq!(config.scan_config().timeout, Some(Duration::from_millis(250)));

        let retry = config.retry_policy();
        assert_eq!(retry.max_attempts, 5);
        assert_eq!(retry.base_delay, Duration::from_millis(10));
    }

    #[test]
    fn test_short_identity_secret_is_rejected() {
        let config = Config::from_lookup(lookup_from(&[("IDENTITY_SECRET", "hunter2")]));
        assert!(config.validate().is_err());

        let config = Config::from_lookup(lookup_from(&[(
            "IDENTITY_SECRET",
            "0123456789abcdef0123456789abcdef",
        )]));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unparsable_numbers_fall_back() {
        let config = Config::from_lookup(lookup_from(&[
            ("PORT", "eighty"),
            ("VISIBILITY_TIMEOUT_SECS", "-3"),
            ("DATABASE_URL", ""),
        ]));

        assert_eq!(config.port, 3000);
        assert_eq!(config.visibility_timeout, Duration::from_secs(30));
        assert!(config.database_url.is_none());
    }
}
