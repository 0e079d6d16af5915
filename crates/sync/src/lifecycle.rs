//! Process-lifecycle triggers.
//!
//! Platform adapters implement [`LifecycleSource`]; [`TriggerSet`] wires their
//! signals to flushes without the controller knowing where they came from.

use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::controller::{FlushController, FlushOutcome};
use crate::transport::TransportKind;

pub type LifecycleCallback = Box<dyn Fn() + Send + Sync>;

/// Source of visibility and termination signals.
pub trait LifecycleSource {
    /// The process became hidden but may keep running.
    fn on_hidden(&self, callback: LifecycleCallback);

    /// The process is about to be destroyed.
    fn on_terminating(&self, callback: LifecycleCallback);
}

/// Lifecycle source driven by explicit calls.
#[derive(Default)]
pub struct ManualLifecycle {
    hidden: Mutex<Vec<LifecycleCallback>>,
    terminating: Mutex<Vec<LifecycleCallback>>,
}

impl ManualLifecycle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit_hidden(&self) {
        let callbacks = self.hidden.lock().unwrap_or_else(PoisonError::into_inner);
        for callback in callbacks.iter() {
            callback();
        }
    }

    pub fn emit_terminating(&self) {
        let callbacks = self
            .terminating
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for callback in callbacks.iter() {
            callback();
        }
    }
}

impl LifecycleSource for ManualLifecycle {
    fn on_hidden(&self, callback: LifecycleCallback) {
        self.hidden
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(callback);
    }

    fn on_terminating(&self, callback: LifecycleCallback) {
        self.terminating
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(callback);
    }
}

/// Maps lifecycle signals to flushes.
///
/// Hidden always prefers the reliable transport. Terminating uses the
/// configured transport: reliable by default, since many hosts let an
/// in-flight request finish after teardown, or best-effort where they do not.
#[derive(Debug, Clone, Copy)]
pub struct TriggerSet {
    termination: TransportKind,
}

impl TriggerSet {
    #[must_use]
    pub fn new(termination: TransportKind) -> Self {
        Self { termination }
    }

    /// Registers flush callbacks on `source`.
    ///
    /// Callbacks hold a weak reference, so a retired controller is not kept
    /// alive by its source; once it is gone the callbacks do nothing.
    pub fn attach(
        &self,
        source: &dyn LifecycleSource,
        controller: &Arc<FlushController>,
        runtime: Handle,
    ) {
        let weak = Arc::downgrade(controller);
        let hidden_runtime = runtime.clone();
        source.on_hidden(Box::new(move || {
            spawn_flush(&weak, &hidden_runtime, TransportKind::Reliable, "hidden");
        }));

        let weak = Arc::downgrade(controller);
        let termination = self.termination;
        source.on_terminating(Box::new(move || {
            spawn_flush(&weak, &runtime, termination, "terminating");
        }));
    }
}

fn spawn_flush(
    controller: &Weak<FlushController>,
    runtime: &Handle,
    preferred: TransportKind,
    trigger: &'static str,
) {
    let Some(controller) = controller.upgrade().filter(|c| !c.is_retired()) else {
        debug!(trigger, "synchronizer retired, ignoring lifecycle signal");
        return;
    };
    // The task may never finish if the process goes away mid-request.
    runtime.spawn(async move {
        match controller.flush(preferred).await {
            Ok(FlushOutcome::Delivered { items, .. }) => {
                debug!(trigger, items, "lifecycle flush delivered");
            }
            Ok(outcome) => debug!(trigger, ?outcome, "lifecycle flush skipped"),
            Err(err) => warn!(trigger, error = %err, "lifecycle flush failed"),
        }
    });
}
