use std::sync::Arc;

use progress_core::Clock;
use progress_core::model::ProgressRecord;
use reqwest::Client;
use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::config::SyncConfig;
use crate::controller::{FlushController, FlushOutcome, SyncStats};
use crate::lifecycle::{LifecycleSource, TriggerSet};
use crate::transport::{
    CredentialSource, HttpReliableTransport, QueuedBeacon, TransportKind, TransportSelector,
};

/// Write-behind progress synchronizer: the surface consumed by view code.
///
/// Progress updates are coalesced in memory and delivered in batches when a
/// trigger fires. Dropping the synchronizer (or calling [`retire`]) makes one
/// last synchronous best-effort flush.
///
/// [`retire`]: ProgressSynchronizer::retire
pub struct ProgressSynchronizer {
    controller: Arc<FlushController>,
    triggers: TriggerSet,
    retired: bool,
}

impl ProgressSynchronizer {
    #[must_use]
    pub fn new(selector: TransportSelector, termination: TransportKind, clock: Clock) -> Self {
        Self {
            controller: Arc::new(FlushController::new(selector, clock)),
            triggers: TriggerSet::new(termination),
            retired: false,
        }
    }

    /// Builds a synchronizer with the HTTP reliable transport and a queued
    /// beacon whose delivery task runs on `runtime`.
    #[must_use]
    pub fn from_config(
        config: &SyncConfig,
        credentials: Arc<dyn CredentialSource>,
        runtime: &Handle,
    ) -> Self {
        let client = Client::new();
        let beacon = QueuedBeacon::spawn(
            runtime,
            client.clone(),
            config.beacon_queue,
            config.beacon_max_bytes,
        );
        let selector = TransportSelector::new(
            config.endpoint.clone(),
            Arc::new(HttpReliableTransport::with_client(client)),
            Arc::new(beacon),
            credentials,
        );
        Self::new(selector, config.termination, Clock::default())
    }

    /// Subscribes to visibility and termination signals from `source`.
    pub fn listen(&self, source: &dyn LifecycleSource, runtime: Handle) {
        self.triggers.attach(source, &self.controller, runtime);
    }

    pub fn add_progress_item(&self, record: ProgressRecord) {
        self.controller.add(record);
    }

    /// Caller-driven flush over the reliable transport.
    ///
    /// Returns `false` when another flush is already running or delivery
    /// failed; failed records stay buffered for the next trigger.
    pub async fn flush_progress(&self) -> bool {
        match self.controller.flush(TransportKind::Reliable).await {
            Ok(FlushOutcome::Delivered { .. } | FlushOutcome::NothingToDo) => true,
            Ok(FlushOutcome::AlreadyInProgress) => false,
            Err(err) => {
                debug!(error = %err, "flush_progress failed");
                false
            }
        }
    }

    #[must_use]
    pub fn has_pending_items(&self) -> bool {
        self.pending_count() > 0
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.controller.pending_count()
    }

    #[must_use]
    pub fn stats(&self) -> SyncStats {
        self.controller.stats()
    }

    /// Retires the synchronizer with a final best-effort flush.
    ///
    /// Returns whether the remaining records were accepted for sending. When a
    /// lifecycle flush is still in flight this returns `false` and that flush
    /// sends any remaining records best-effort after it settles.
    pub fn retire(mut self) -> bool {
        self.retired = true;
        self.teardown()
    }

    fn teardown(&self) -> bool {
        match self.controller.retire() {
            Ok(FlushOutcome::Delivered { .. } | FlushOutcome::NothingToDo) => true,
            Ok(FlushOutcome::AlreadyInProgress) => {
                debug!("flush in progress at teardown, leftovers follow when it settles");
                false
            }
            Err(err) => {
                warn!(error = %err, "teardown flush failed");
                false
            }
        }
    }
}

impl Drop for ProgressSynchronizer {
    fn drop(&mut self) {
        if !self.retired {
            self.teardown();
        }
    }
}
