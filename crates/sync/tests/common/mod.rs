#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use progress_sync::{
    BeaconPayload, BestEffortTransport, CredentialSource, ProgressBatch, ReliableTransport,
    TransportError, TransportSelector,
};
use tokio::sync::Notify;
use url::Url;

pub const ENDPOINT: &str = "http://progress.test/api/learning/progress/batch";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReliableMode {
    Succeed,
    Fail,
    Unsupported,
    /// Signals `entered`, then waits for `release` before succeeding or failing.
    Gated { succeed: bool },
    Hang,
}

pub struct FakeReliable {
    mode: Mutex<ReliableMode>,
    pub batches: Mutex<Vec<ProgressBatch>>,
    pub tokens: Mutex<Vec<String>>,
    pub entered: Notify,
    pub release: Notify,
}

impl FakeReliable {
    pub fn new(mode: ReliableMode) -> Arc<Self> {
        Arc::new(Self {
            mode: Mutex::new(mode),
            batches: Mutex::new(Vec::new()),
            tokens: Mutex::new(Vec::new()),
            entered: Notify::new(),
            release: Notify::new(),
        })
    }

    pub fn set_mode(&self, mode: ReliableMode) {
        *self.mode.lock().unwrap() = mode;
    }

    pub fn calls(&self) -> usize {
        self.batches.lock().unwrap().len()
    }

    pub fn last_batch(&self) -> ProgressBatch {
        let mut batch = self.batches.lock().unwrap().last().cloned().unwrap();
        batch.items.sort_by(|a, b| a.subject_id.cmp(&b.subject_id));
        batch
    }
}

#[async_trait]
impl ReliableTransport for FakeReliable {
    async fn post_batch(
        &self,
        url: &Url,
        batch: &ProgressBatch,
        token: &str,
    ) -> Result<(), TransportError> {
        assert_eq!(url.as_str(), ENDPOINT);
        let mode = *self.mode.lock().unwrap();
        if mode == ReliableMode::Unsupported {
            return Err(TransportError::Unsupported);
        }
        self.batches.lock().unwrap().push(batch.clone());
        self.tokens.lock().unwrap().push(token.to_owned());

        let succeed = match mode {
            ReliableMode::Succeed => true,
            ReliableMode::Fail | ReliableMode::Unsupported => false,
            ReliableMode::Gated { succeed } => {
                self.entered.notify_one();
                self.release.notified().await;
                succeed
            }
            ReliableMode::Hang => std::future::pending().await,
        };
        if succeed {
            Ok(())
        } else {
            Err(TransportError::HttpStatus(
                reqwest::StatusCode::SERVICE_UNAVAILABLE,
            ))
        }
    }
}

pub struct FakeBeacon {
    accept: bool,
    pub sent: Mutex<Vec<BeaconPayload>>,
}

impl FakeBeacon {
    pub fn new(accept: bool) -> Arc<Self> {
        Arc::new(Self {
            accept,
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn last_body(&self) -> serde_json::Value {
        let sent = self.sent.lock().unwrap();
        serde_json::from_slice(&sent.last().unwrap().body).unwrap()
    }
}

impl BestEffortTransport for FakeBeacon {
    fn send(&self, url: &Url, payload: BeaconPayload) -> bool {
        assert_eq!(url.as_str(), ENDPOINT);
        self.sent.lock().unwrap().push(payload);
        self.accept
    }
}

pub fn selector(
    reliable: &Arc<FakeReliable>,
    beacon: &Arc<FakeBeacon>,
    token: Option<&str>,
) -> TransportSelector {
    let token = token.map(str::to_owned);
    let credentials: Arc<dyn CredentialSource> = Arc::new(move || token.clone());
    TransportSelector::new(
        Url::parse(ENDPOINT).unwrap(),
        Arc::clone(reliable) as Arc<dyn ReliableTransport>,
        Arc::clone(beacon) as Arc<dyn BestEffortTransport>,
        credentials,
    )
}

/// Polls `condition` until it holds or roughly a second has passed.
pub async fn wait_for(condition: impl Fn() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
