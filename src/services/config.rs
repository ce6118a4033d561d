use crate::constants::{
    env, limits, network as network_constants, pagination as pagination_constants,
    retry as retry_constants,
};
use crate::errors::InitError;
use crate::services::logger::LogLevel;
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct RetrySettings {
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: retry_constants::MAX_ATTEMPTS,
            base_delay: Duration::from_millis(retry_constants::BASE_DELAY_MS),
            max_delay: Duration::from_millis(retry_constants::MAX_DELAY_MS),
            jitter: retry_constants::JITTER,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaginationSettings {
    pub page_size: u64,
    pub max_pages: usize,
}

impl Default for PaginationSettings {
    fn default() -> Self {
        Self {
            page_size: pagination_constants::PAGE_SIZE,
            max_pages: pagination_constants::MAX_PAGES,
        }
    }
}

/// Process configuration. Built once at startup and handed to constructors.
#[derive(Clone)]
pub struct Config {
    pub host: String,
    pub api_key: String,
    pub schema_db: Option<PathBuf>,
    pub timeout: Duration,
    pub retry: RetrySettings,
    pub pagination: PaginationSettings,
    pub idempotent_operations: HashSet<String>,
    pub max_upload_bytes: u64,
    pub insecure_tls: bool,
    pub log_level: LogLevel,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("host", &self.host)
            .field("api_key", &"[REDACTED]")
            .field("schema_db", &self.schema_db)
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .field("pagination", &self.pagination)
            .field("idempotent_operations", &self.idempotent_operations)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .field("insecure_tls", &self.insecure_tls)
            .field("log_level", &self.log_level)
            .finish()
    }
}

impl Config {
    /// Defaults for everything optional; used by tests and embedders.
    pub fn new(host: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            api_key: api_key.into(),
            schema_db: None,
            timeout: Duration::from_millis(network_constants::TIMEOUT_API_REQUEST_MS),
            retry: RetrySettings::default(),
            pagination: PaginationSettings::default(),
            idempotent_operations: HashSet::new(),
            max_upload_bytes: limits::MAX_UPLOAD_BYTES,
            insecure_tls: false,
            log_level: LogLevel::default(),
        }
    }

    pub fn from_env() -> Result<Self, InitError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, InitError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let host = read(env::HOST).ok_or(InitError::MissingSetting(env::HOST))?;
        let api_key = read(env::API_KEY).ok_or(InitError::MissingSetting(env::API_KEY))?;
        let mut config = Self::new(host, api_key);

        config.schema_db = read(env::SCHEMA_DB).map(PathBuf::from);
        if let Some(raw) = read(env::TIMEOUT_MS) {
            config.timeout = Duration::from_millis(parse_u64(env::TIMEOUT_MS, &raw, 1, 600_000)?);
        }
        if let Some(raw) = read(env::RETRY_MAX_ATTEMPTS) {
            config.retry.max_attempts = parse_u64(env::RETRY_MAX_ATTEMPTS, &raw, 1, 10)? as usize;
        }
        if let Some(raw) = read(env::RETRY_BASE_DELAY_MS) {
            config.retry.base_delay =
                Duration::from_millis(parse_u64(env::RETRY_BASE_DELAY_MS, &raw, 0, 60_000)?);
        }
        if let Some(raw) = read(env::RETRY_MAX_DELAY_MS) {
            config.retry.max_delay =
                Duration::from_millis(parse_u64(env::RETRY_MAX_DELAY_MS, &raw, 0, 300_000)?);
        }
        if config.retry.max_delay < config.retry.base_delay {
            return Err(InitError::InvalidSetting {
                name: env::RETRY_MAX_DELAY_MS,
                reason: "must not be lower than the base delay".to_string(),
            });
        }
        if let Some(raw) = read(env::RETRY_JITTER) {
            config.retry.jitter = parse_ratio(env::RETRY_JITTER, &raw)?;
        }
        if let Some(raw) = read(env::IDEMPOTENT_OPERATIONS) {
            config.idempotent_operations = raw
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(raw) = read(env::PAGE_SIZE) {
            config.pagination.page_size = parse_u64(env::PAGE_SIZE, &raw, 1, 1_000)?;
        }
        if let Some(raw) = read(env::MAX_PAGES) {
            config.pagination.max_pages = parse_u64(env::MAX_PAGES, &raw, 1, 10_000)? as usize;
        }
        if let Some(raw) = read(env::MAX_UPLOAD_BYTES) {
            config.max_upload_bytes = parse_u64(env::MAX_UPLOAD_BYTES, &raw, 1, u64::MAX)?;
        }
        if let Some(raw) = read(env::INSECURE_TLS) {
            config.insecure_tls = parse_bool(env::INSECURE_TLS, &raw)?;
        }
        if let Some(raw) = read(env::LOG_LEVEL) {
            config.log_level = LogLevel::parse(&raw).ok_or_else(|| InitError::InvalidSetting {
                name: env::LOG_LEVEL,
                reason: format!("expected one of error, warn, info, debug (got '{}')", raw),
            })?;
        }
        Ok(config)
    }
}

fn parse_u64(name: &'static str, raw: &str, min: u64, max: u64) -> Result<u64, InitError> {
    let value = raw.parse::<u64>().map_err(|_| InitError::InvalidSetting {
        name,
        reason: format!("expected an integer, got '{}'", raw),
    })?;
    if value < min || value > max {
        return Err(InitError::InvalidSetting {
            name,
            reason: format!("{} is outside {}..={}", value, min, max),
        });
    }
    Ok(value)
}

fn parse_ratio(name: &'static str, raw: &str) -> Result<f64, InitError> {
    match raw.parse::<f64>() {
        Ok(value) if (0.0..=1.0).contains(&value) => Ok(value),
        _ => Err(InitError::InvalidSetting {
            name,
            reason: format!("expected a number between 0 and 1, got '{}'", raw),
        }),
    }
}

fn parse_bool(name: &'static str, raw: &str) -> Result<bool, InitError> {
    match raw.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(InitError::InvalidSetting {
            name,
            reason: format!("expected true or false, got '{}'", raw),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_only_required_settings_exist() {
        let config = Config::from_lookup(lookup_from(&[
            ("OPENPROJECT_HOST", "op.example.com"),
            ("OPENPROJECT_API_KEY", "YXBpa2V5OnNlY3JldA=="),
        ]))
        .expect("config");
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.retry, RetrySettings::default());
        assert_eq!(config.pagination.page_size, 20);
        assert!(config.schema_db.is_none());
        assert!(!format!("{:?}", config).contains("YXBpa2V5"));
    }

    #[test]
    fn missing_host_is_fatal() {
        let err = Config::from_lookup(lookup_from(&[("OPENPROJECT_API_KEY", "abc")]))
            .expect_err("must fail");
        assert!(matches!(err, InitError::MissingSetting("OPENPROJECT_HOST")));
    }

    #[test]
    fn blank_api_key_counts_as_missing() {
        let err = Config::from_lookup(lookup_from(&[
            ("OPENPROJECT_HOST", "op.example.com"),
            ("OPENPROJECT_API_KEY", "   "),
        ]))
        .expect_err("must fail");
        assert!(matches!(err, InitError::MissingSetting("OPENPROJECT_API_KEY")));
    }

    #[test]
    fn malformed_optional_settings_are_fatal() {
        let base = [
            ("OPENPROJECT_HOST", "op.example.com"),
            ("OPENPROJECT_API_KEY", "abc"),
        ];
        for (key, value) in [
            ("OPPROXY_TIMEOUT_MS", "soon"),
            ("OPPROXY_RETRY_MAX_ATTEMPTS", "0"),
            ("OPPROXY_RETRY_JITTER", "1.5"),
            ("OPPROXY_INSECURE_TLS", "maybe"),
            ("LOG_LEVEL", "chatty"),
        ] {
            let mut pairs = base.to_vec();
            pairs.push((key, value));
            let err = Config::from_lookup(lookup_from(&pairs)).expect_err(key);
            assert!(matches!(err, InitError::InvalidSetting { name, .. } if name == key));
        }
    }

    #[test]
    fn idempotent_operations_parse_as_a_set() {
        let config = Config::from_lookup(lookup_from(&[
            ("OPENPROJECT_HOST", "op.example.com"),
            ("OPENPROJECT_API_KEY", "abc"),
            ("OPPROXY_IDEMPOTENT_OPERATIONS", "work_packages.comment, ,projects.update"),
        ]))
        .expect("config");
        assert_eq!(config.idempotent_operations.len(), 2);
        assert!(config.idempotent_operations.contains("projects.update"));
    }
}
