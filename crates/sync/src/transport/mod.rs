//! Delivery of progress batches to the remote endpoint.
//!
//! Two mechanisms are available. The reliable one can carry an
//! `Authorization` header and reports whether the server accepted the batch.
//! The best-effort one only reports whether the payload was accepted for
//! sending. Exactly one of them is used per flush attempt.

mod beacon;
mod http;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use progress_core::model::{ProgressBatch, ProgressRecord};
use serde::Serialize;
use tracing::warn;
use url::Url;

use crate::error::TransportError;

pub use beacon::{DEFAULT_BEACON_QUEUE, DEFAULT_MAX_BEACON_BYTES, QueuedBeacon};
pub use http::HttpReliableTransport;

pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Which delivery mechanism a flush should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Reliable,
    BestEffort,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Reliable => write!(f, "reliable"),
            TransportKind::BestEffort => write!(f, "best-effort"),
        }
    }
}

/// Synchronous access to the current bearer token.
///
/// The synchronizer never refreshes or waits for a token; `None` fails the
/// flush attempt immediately.
pub trait CredentialSource: Send + Sync {
    fn token(&self) -> Option<String>;
}

impl<F> CredentialSource for F
where
    F: Fn() -> Option<String> + Send + Sync,
{
    fn token(&self) -> Option<String> {
        self()
    }
}

/// Request/response transport that supports custom headers.
///
/// Implementations must let the request run to completion even if the
/// awaiting caller is dropped.
#[async_trait]
pub trait ReliableTransport: Send + Sync {
    /// Posts a batch with `Authorization: Bearer <token>`.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Unsupported` when the environment cannot issue
    /// the request at all, or another `TransportError` when the request fails
    /// or the server answers with a non-success status.
    async fn post_batch(
        &self,
        url: &Url,
        batch: &ProgressBatch,
        token: &str,
    ) -> Result<(), TransportError>;
}

/// Fire-and-forget transport without a header channel.
pub trait BestEffortTransport: Send + Sync {
    /// Returns `true` if the payload was accepted for sending. This says
    /// nothing about whether the server persisted it.
    fn send(&self, url: &Url, payload: BeaconPayload) -> bool;
}

/// Body plus its content type, for transports that cannot set headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeaconPayload {
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

impl BeaconPayload {
    #[must_use]
    pub fn json(body: Vec<u8>) -> Self {
        Self {
            content_type: JSON_CONTENT_TYPE,
            body,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.body.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}

/// Best-effort body: the batch plus the token, since no header can carry it.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BeaconBody<'a> {
    items: &'a [ProgressRecord],
    access_token: &'a str,
}

/// Picks and runs one delivery mechanism per flush attempt.
#[derive(Clone)]
pub struct TransportSelector {
    endpoint: Url,
    reliable: Arc<dyn ReliableTransport>,
    best_effort: Arc<dyn BestEffortTransport>,
    credentials: Arc<dyn CredentialSource>,
}

impl TransportSelector {
    #[must_use]
    pub fn new(
        endpoint: Url,
        reliable: Arc<dyn ReliableTransport>,
        best_effort: Arc<dyn BestEffortTransport>,
        credentials: Arc<dyn CredentialSource>,
    ) -> Self {
        Self {
            endpoint,
            reliable,
            best_effort,
            credentials,
        }
    }

    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Current token, treating a blank one as absent.
    #[must_use]
    pub fn credential(&self) -> Option<String> {
        self.credentials
            .token()
            .filter(|token| !token.trim().is_empty())
    }

    /// Sends through the reliable transport.
    ///
    /// # Errors
    ///
    /// Propagates the reliable transport's `TransportError`.
    pub async fn send_reliable(
        &self,
        batch: &ProgressBatch,
        token: &str,
    ) -> Result<(), TransportError> {
        self.reliable.post_batch(&self.endpoint, batch, token).await
    }

    /// Hands the batch to the best-effort transport.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Rejected` if the transport refuses the payload,
    /// or `TransportError::Encode` if the batch cannot be serialized.
    pub fn send_best_effort(
        &self,
        batch: &ProgressBatch,
        token: &str,
    ) -> Result<(), TransportError> {
        let body = serde_json::to_vec(&BeaconBody {
            items: &batch.items,
            access_token: token,
        })?;
        let bytes = body.len();
        if self.best_effort.send(&self.endpoint, BeaconPayload::json(body)) {
            Ok(())
        } else {
            Err(TransportError::Rejected { bytes })
        }
    }

    /// Sends with the preferred transport and reports which one was used.
    ///
    /// The reliable transport falls back to best-effort only when it is
    /// unsupported; any other reliable failure is returned as is.
    ///
    /// # Errors
    ///
    /// Returns the `TransportError` of the transport that was used.
    pub async fn send(
        &self,
        batch: &ProgressBatch,
        token: &str,
        preferred: TransportKind,
    ) -> Result<TransportKind, TransportError> {
        match preferred {
            TransportKind::BestEffort => self
                .send_best_effort(batch, token)
                .map(|()| TransportKind::BestEffort),
            TransportKind::Reliable => match self.send_reliable(batch, token).await {
                Err(TransportError::Unsupported) => {
                    warn!("reliable transport unsupported, falling back to best-effort");
                    self.send_best_effort(batch, token)
                        .map(|()| TransportKind::BestEffort)
                }
                other => other.map(|()| TransportKind::Reliable),
            },
        }
    }
}
