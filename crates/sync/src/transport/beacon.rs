use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use url::Url;

use super::{BeaconPayload, BestEffortTransport};

pub const DEFAULT_MAX_BEACON_BYTES: usize = 64 * 1024;
pub const DEFAULT_BEACON_QUEUE: usize = 32;

/// Fire-and-forget transport backed by a bounded queue.
///
/// `send` only enqueues; a background task posts each payload without an
/// authorization header and logs the outcome. Payloads over `max_bytes`, or
/// arriving while the queue is full, are refused on the spot.
#[derive(Clone)]
pub struct QueuedBeacon {
    tx: mpsc::Sender<(Url, BeaconPayload)>,
    max_bytes: usize,
}

impl QueuedBeacon {
    /// Starts the delivery task on `runtime`.
    #[must_use]
    pub fn spawn(runtime: &Handle, client: Client, capacity: usize, max_bytes: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        runtime.spawn(deliver(client, rx));
        Self { tx, max_bytes }
    }

    #[must_use]
    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }
}

impl BestEffortTransport for QueuedBeacon {
    fn send(&self, url: &Url, payload: BeaconPayload) -> bool {
        if payload.len() > self.max_bytes {
            warn!(
                bytes = payload.len(),
                limit = self.max_bytes,
                "beacon payload over size limit"
            );
            return false;
        }
        match self.tx.try_send((url.clone(), payload)) {
            Ok(()) => true,
            Err(err) => {
                warn!(error = %err, "beacon queue refused payload");
                false
            }
        }
    }
}

async fn deliver(client: Client, mut rx: mpsc::Receiver<(Url, BeaconPayload)>) {
    while let Some((url, payload)) = rx.recv().await {
        let bytes = payload.len();
        let result = client
            .post(url)
            .header(CONTENT_TYPE, payload.content_type)
            .body(payload.body)
            .send()
            .await;
        match result {
            Ok(response) if response.status().is_success() => {
                debug!(bytes, "beacon delivered");
            }
            Ok(response) => warn!(status = %response.status(), "beacon refused by server"),
            Err(err) => warn!(error = %err, "beacon delivery failed"),
        }
    }
}
