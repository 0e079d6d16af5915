use std::env;

use url::Url;

use crate::error::ConfigError;
use crate::transport::{DEFAULT_BEACON_QUEUE, DEFAULT_MAX_BEACON_BYTES, TransportKind};

pub const BATCH_PATH: &str = "api/learning/progress/batch";

const BASE_URL_KEY: &str = "PROGRESS_API_BASE_URL";
const BEACON_MAX_BYTES_KEY: &str = "PROGRESS_BEACON_MAX_BYTES";
const BEACON_QUEUE_KEY: &str = "PROGRESS_BEACON_QUEUE";
const TERMINATION_KEY: &str = "PROGRESS_TERMINATION_TRANSPORT";

#[derive(Clone, Debug)]
pub struct SyncConfig {
    pub endpoint: Url,
    pub beacon_max_bytes: usize,
    pub beacon_queue: usize,
    pub termination: TransportKind,
}

impl SyncConfig {
    /// Config with defaults for the given API base.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Url` if `base_url` is not a valid URL.
    pub fn new(base_url: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            endpoint: batch_endpoint(base_url)?,
            beacon_max_bytes: DEFAULT_MAX_BEACON_BYTES,
            beacon_queue: DEFAULT_BEACON_QUEUE,
            termination: TransportKind::Reliable,
        })
    }

    /// Reads the config from `PROGRESS_*` environment variables.
    ///
    /// # Errors
    ///
    /// See [`SyncConfig::from_lookup`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Reads the config through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` if the base URL is unset, or
    /// `ConfigError::Invalid` / `ConfigError::Url` for unparsable values.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let base_url = lookup(BASE_URL_KEY)
            .filter(|value| !value.trim().is_empty())
            .ok_or(ConfigError::Missing { key: BASE_URL_KEY })?;
        let mut config = Self::new(&base_url)?;

        if let Some(raw) = lookup(BEACON_MAX_BYTES_KEY) {
            config.beacon_max_bytes = parse_positive(BEACON_MAX_BYTES_KEY, raw)?;
        }
        if let Some(raw) = lookup(BEACON_QUEUE_KEY) {
            config.beacon_queue = parse_positive(BEACON_QUEUE_KEY, raw)?;
        }
        if let Some(raw) = lookup(TERMINATION_KEY) {
            let termination = match raw.trim() {
                "reliable" => Some(TransportKind::Reliable),
                "best-effort" => Some(TransportKind::BestEffort),
                _ => None,
            };
            config.termination = termination.ok_or(ConfigError::Invalid {
                key: TERMINATION_KEY,
                raw,
            })?;
        }
        Ok(config)
    }
}

/// Resolves `<base>/api/learning/progress/batch`, keeping any base path.
///
/// # Errors
///
/// Returns `ConfigError::Url` if `base_url` is not a valid URL.
pub fn batch_endpoint(base_url: &str) -> Result<Url, ConfigError> {
    let base = format!("{}/", base_url.trim().trim_end_matches('/'));
    Ok(Url::parse(&base)?.join(BATCH_PATH)?)
}

fn parse_positive(key: &'static str, raw: String) -> Result<usize, ConfigError> {
    match raw.trim().parse::<usize>() {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(ConfigError::Invalid { key, raw }),
    }
}
