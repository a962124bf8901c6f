use std::{env, path::PathBuf, time::Duration};

use ce_outbox::OutboxConfig;
use sealed_codec::{DEFAULT_TRUNCATE_LEN, FULL_LENGTH};
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub service_name: String,
    pub db_url: Option<String>,
    pub outbox_listener_url: Option<String>,
    pub aead_keyset_path: PathBuf,
    pub bidx_keyset_path: PathBuf,
    /// Blind-index length for nin, email and phone.
    pub bidx_truncate_len: usize,
    /// Blind-index length for name; 0 keeps the full MAC.
    pub name_bidx_truncate_len: usize,
    pub keyset_cache_capacity: u64,
    pub outbox: OutboxConfig,
    pub outbox_relay_enabled: bool,
    pub outbox_relay_url: Option<String>,
    pub outbox_relay_timeout_ms: u64,
    pub encrypt_events: bool,
    pub event_source: String,
    pub tenant_api_base_url: Option<String>,
    pub tenant_api_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub log_format: LogFormat,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("invalid {key}: {message}")]
    InvalidNumber { key: &'static str, message: String },
    #[error("invalid {key}: expected a boolean, got {value:?}")]
    InvalidBool { key: &'static str, value: String },
    #[error("invalid PROFILE_LOG_FORMAT: {0}")]
    InvalidLogFormat(String),
    #[error("invalid outbox config: {0}")]
    InvalidOutbox(String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let lookup = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let service_name =
            lookup("PROFILE_SERVICE_NAME").unwrap_or_else(|| "profile-service".to_string());
        let db_url = lookup("DB_URL").or_else(|| lookup("DATABASE_URL"));
        let outbox_listener_url = lookup("PROFILE_OUTBOX_LISTENER_URL").or_else(|| db_url.clone());
        let aead_keyset_path = lookup("PROFILE_AEAD_KEYSET_PATH")
            .map(PathBuf::from)
            .ok_or(ConfigError::Missing("PROFILE_AEAD_KEYSET_PATH"))?;
        let bidx_keyset_path = lookup("PROFILE_BIDX_KEYSET_PATH")
            .map(PathBuf::from)
            .ok_or(ConfigError::Missing("PROFILE_BIDX_KEYSET_PATH"))?;

        let bidx_truncate_len = parse_with_lookup(
            &lookup,
            "PROFILE_BIDX_TRUNCATE_LEN",
            DEFAULT_TRUNCATE_LEN,
            |key, raw| parse_number::<usize>(key, &raw),
        )?;
        let name_bidx_truncate_len = parse_with_lookup(
            &lookup,
            "PROFILE_NAME_BIDX_TRUNCATE_LEN",
            FULL_LENGTH,
            |key, raw| parse_number::<usize>(key, &raw),
        )?;
        let keyset_cache_capacity = parse_with_lookup(
            &lookup,
            "PROFILE_KEYSET_CACHE_CAPACITY",
            0,
            |key, raw| parse_number::<u64>(key, &raw),
        )?;

        let defaults = OutboxConfig::default();
        let max_wait_ms = parse_with_lookup(
            &lookup,
            "PROFILE_OUTBOX_MAX_WAIT_MS",
            defaults.max_wait.as_millis() as u64,
            |key, raw| parse_number::<u64>(key, &raw),
        )?;
        let max_batch = parse_with_lookup(
            &lookup,
            "PROFILE_OUTBOX_MAX_BATCH",
            defaults.max_batch,
            |key, raw| parse_number::<usize>(key, &raw),
        )?;
        let retry_interval_ms = parse_with_lookup(
            &lookup,
            "PROFILE_OUTBOX_RETRY_INTERVAL_MS",
            defaults.retry_interval.as_millis() as u64,
            |key, raw| parse_number::<u64>(key, &raw),
        )?;
        let cancel_grace_ms = parse_with_lookup(
            &lookup,
            "PROFILE_OUTBOX_CANCEL_GRACE_MS",
            defaults.cancel_grace.as_millis() as u64,
            |key, raw| parse_number::<u64>(key, &raw),
        )?;
        let channel = lookup("PROFILE_OUTBOX_CHANNEL").unwrap_or(defaults.channel);
        let outbox = OutboxConfig::default()
            .with_channel(channel)
            .with_max_wait(Duration::from_millis(max_wait_ms))
            .with_max_batch(max_batch)
            .with_retry_interval(Duration::from_millis(retry_interval_ms))
            .with_cancel_grace(Duration::from_millis(cancel_grace_ms));
        outbox
            .validate()
            .map_err(|error| ConfigError::InvalidOutbox(error.to_string()))?;

        let outbox_relay_enabled =
            parse_with_lookup(&lookup, "PROFILE_OUTBOX_RELAY_ENABLED", true, parse_bool)?;
        let outbox_relay_url = lookup("PROFILE_OUTBOX_RELAY_URL");
        let outbox_relay_timeout_ms = parse_with_lookup(
            &lookup,
            "PROFILE_OUTBOX_RELAY_TIMEOUT_MS",
            10_000,
            |key, raw| parse_number::<u64>(key, &raw),
        )?;
        let encrypt_events =
            parse_with_lookup(&lookup, "PROFILE_OUTBOX_ENCRYPT_EVENTS", true, parse_bool)?;
        let event_source = lookup("PROFILE_EVENT_SOURCE")
            .unwrap_or_else(|| profile_proto::PROFILE_EVENT_SOURCE_DEFAULT.to_string());
        let tenant_api_base_url =
            lookup("PROFILE_TENANT_API_BASE_URL").map(|value| value.trim_end_matches('/').to_string());
        let tenant_api_timeout_ms = parse_with_lookup(
            &lookup,
            "PROFILE_TENANT_API_TIMEOUT_MS",
            5_000,
            |key, raw| parse_number::<u64>(key, &raw),
        )?;
        let request_timeout_ms = parse_with_lookup(
            &lookup,
            "PROFILE_REQUEST_TIMEOUT_MS",
            30_000,
            |key, raw| parse_number::<u64>(key, &raw),
        )?;
        let log_format = parse_with_lookup(&lookup, "PROFILE_LOG_FORMAT", LogFormat::Text, |_, raw| {
            parse_log_format(&raw)
        })?;

        Ok(Self {
            service_name,
            db_url,
            outbox_listener_url,
            aead_keyset_path,
            bidx_keyset_path,
            bidx_truncate_len,
            name_bidx_truncate_len,
            keyset_cache_capacity,
            outbox,
            outbox_relay_enabled,
            outbox_relay_url,
            outbox_relay_timeout_ms,
            encrypt_events,
            event_source,
            tenant_api_base_url,
            tenant_api_timeout_ms,
            request_timeout_ms,
            log_format,
        })
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn parse_with_lookup<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
    parser: impl FnOnce(&'static str, String) -> Result<T, ConfigError>,
) -> Result<T, ConfigError> {
    match lookup(key) {
        Some(raw) => parser(key, raw),
        None => Ok(default),
    }
}

fn parse_number<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse::<T>().map_err(|error| ConfigError::InvalidNumber {
        key,
        message: error.to_string(),
    })
}

fn parse_bool(key: &'static str, raw: String) -> Result<bool, ConfigError> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidBool { key, value: raw }),
    }
}

fn parse_log_format(raw: &str) -> Result<LogFormat, ConfigError> {
    match raw.to_ascii_lowercase().as_str() {
        "text" | "pretty" => Ok(LogFormat::Text),
        "json" => Ok(LogFormat::Json),
        other => Err(ConfigError::InvalidLogFormat(other.to_string())),
    }
}
