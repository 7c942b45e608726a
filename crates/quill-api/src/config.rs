use std::collections::HashMap;
use std::env;
use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;
use std::time::Duration;

use quill_core::sync::{DeletePolicy, EngineOptions};
use thiserror::Error;

const MIN_JWT_SECRET_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub database_path: String,
    pub jwt_secret: String,
    pub auth_clock_skew: Duration,
    pub max_batch_size: usize,
    pub max_write_attempts: u32,
    pub delete_policy: DeletePolicy,
    pub rate_limit_window: Duration,
    pub sync_rate_limit_per_window: u32,
    pub realtime_channel_capacity: usize,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AppConfig")
            .field("bind_addr", &self.bind_addr)
            .field("database_path", &self.database_path)
            .field("jwt_secret", &"[REDACTED]")
            .field("auth_clock_skew", &self.auth_clock_skew)
            .field("max_batch_size", &self.max_batch_size)
            .field("max_write_attempts", &self.max_write_attempts)
            .field("delete_policy", &self.delete_policy)
            .field("rate_limit_window", &self.rate_limit_window)
            .field(
                "sync_rate_limit_per_window",
                &self.sync_rate_limit_per_window,
            )
            .field(
                "realtime_channel_capacity",
                &self.realtime_channel_capacity,
            )
            .finish()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub(crate) fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let bind_addr = value_or_default(&lookup, "QUILL_API_BIND_ADDR", "127.0.0.1:8080");
        let database_path = value_or_default(&lookup, "QUILL_DATABASE_PATH", "quill.db");

        let jwt_secret = required_trimmed(&lookup, "JWT_SECRET")?;
        if jwt_secret.len() < MIN_JWT_SECRET_LEN {
            return Err(ConfigError::Invalid(format!(
                "JWT_SECRET must be at least {MIN_JWT_SECRET_LEN} characters"
            )));
        }

        let auth_clock_skew_secs: u64 =
            parse_in_range(&lookup, "AUTH_CLOCK_SKEW_SECS", "60", 0..=300)?;
        let max_batch_size: usize =
            parse_in_range(&lookup, "SYNC_MAX_BATCH_SIZE", "500", 1..=10_000)?;
        let max_write_attempts: u32 =
            parse_in_range(&lookup, "SYNC_MAX_WRITE_ATTEMPTS", "3", 1..=10)?;

        let delete_policy = value_or_default(&lookup, "SYNC_DELETE_POLICY", "always_wins")
            .parse::<DeletePolicy>()
            .map_err(|_| {
                ConfigError::Invalid(
                    "SYNC_DELETE_POLICY must be always_wins or last_writer_wins".to_string(),
                )
            })?;

        let rate_limit_window_secs: u64 =
            parse_in_range(&lookup, "RATE_LIMIT_WINDOW_SECS", "60", 10..=3_600)?;
        let sync_rate_limit_per_window: u32 =
            parse_in_range(&lookup, "SYNC_RATE_LIMIT_PER_WINDOW", "120", 1..=5_000)?;
        let realtime_channel_capacity: usize =
            parse_in_range(&lookup, "REALTIME_CHANNEL_CAPACITY", "256", 16..=65_536)?;

        Ok(Self {
            bind_addr,
            database_path,
            jwt_secret,
            auth_clock_skew: Duration::from_secs(auth_clock_skew_secs),
            max_batch_size,
            max_write_attempts,
            delete_policy,
            rate_limit_window: Duration::from_secs(rate_limit_window_secs),
            sync_rate_limit_per_window,
            realtime_channel_capacity,
        })
    }

    pub const fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            delete_policy: self.delete_policy,
            max_write_attempts: self.max_write_attempts,
        }
    }
}

fn parse_in_range<T>(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: &str,
    range: RangeInclusive<T>,
) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + fmt::Display,
{
    let bounds = format!("[{}, {}]", range.start(), range.end());
    let value = value_or_default(lookup, name, default)
        .parse::<T>()
        .map_err(|_| ConfigError::Invalid(format!("{name} must be an integer in {bounds}")))?;
    if !range.contains(&value) {
        return Err(ConfigError::Invalid(format!("{name} must be in {bounds}")));
    }
    Ok(value)
}

fn value_or_default(lookup: impl Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    optional_trimmed(lookup, name).unwrap_or_else(|| default.to_string())
}

fn required_trimmed(
    lookup: impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<String, ConfigError> {
    optional_trimmed(lookup, name).ok_or(ConfigError::MissingVar(name))
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}
