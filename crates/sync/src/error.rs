//! Shared error types for the sync crate.

use thiserror::Error;

/// Errors emitted by a single delivery attempt.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TransportError {
    #[error("transport is not available in this environment")]
    Unsupported,
    #[error("progress endpoint returned status {0}")]
    HttpStatus(reqwest::StatusCode),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("best-effort transport rejected a {bytes} byte payload")]
    Rejected { bytes: usize },
    #[error("request task ended before a response arrived")]
    Aborted,
    #[error(transparent)]
    Encode(#[from] serde_json::Error),
}

/// Errors emitted by `FlushController`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FlushError {
    #[error("no credential available, flush skipped")]
    MissingCredential,
    #[error("flush failed, {requeued} records requeued: {source}")]
    Transport {
        requeued: usize,
        #[source]
        source: TransportError,
    },
}

/// Errors emitted while reading `SyncConfig`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("{key} is not set")]
    Missing { key: &'static str },
    #[error("invalid {key} value: {raw}")]
    Invalid { key: &'static str, raw: String },
    #[error(transparent)]
    Url(#[from] url::ParseError),
}
