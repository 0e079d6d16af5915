use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use progress_core::Clock;
use progress_core::model::{ProgressBatch, ProgressRecord};
use tracing::{debug, info, warn};

use crate::buffer::MergeBuffer;
use crate::error::{FlushError, TransportError};
use crate::transport::{TransportKind, TransportSelector};

/// Result of a flush call that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// The buffer was empty.
    NothingToDo,
    /// Another flush holds the in-flight guard; nothing was drained.
    AlreadyInProgress,
    Delivered {
        items: usize,
        transport: TransportKind,
    },
}

/// Counters describing flush history.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub flushes_succeeded: u64,
    pub flushes_failed: u64,
    pub items_delivered: u64,
    pub last_success_at: Option<DateTime<Utc>>,
}

/// Owns the merge buffer and the single in-flight flush guard.
///
/// The buffer mutex is never held across an await; the guard is an atomic
/// flag flipped with compare-and-swap, so at most one flush drains at a time.
///
/// Once retired, lifecycle triggers are ignored and a flush that was already
/// in flight hands any leftover records to the best-effort transport when it
/// settles.
pub struct FlushController {
    buffer: Mutex<MergeBuffer>,
    selector: TransportSelector,
    flushing: AtomicBool,
    retired: AtomicBool,
    stats: Mutex<SyncStats>,
    clock: Clock,
}

impl FlushController {
    #[must_use]
    pub fn new(selector: TransportSelector, clock: Clock) -> Self {
        Self {
            buffer: Mutex::new(MergeBuffer::new()),
            selector,
            flushing: AtomicBool::new(false),
            retired: AtomicBool::new(false),
            stats: Mutex::new(SyncStats::default()),
            clock,
        }
    }

    pub fn add(&self, record: ProgressRecord) {
        self.buffer().add(record);
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.buffer().len()
    }

    #[must_use]
    pub fn is_flushing(&self) -> bool {
        self.flushing.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn stats(&self) -> SyncStats {
        lock(&self.stats).clone()
    }

    /// Drains the buffer and delivers it with the preferred transport.
    ///
    /// If the returned future is dropped before the transport answers, the
    /// drained records go back into the buffer.
    ///
    /// # Errors
    ///
    /// Returns `FlushError::MissingCredential` without touching the buffer when
    /// no token is available, or `FlushError::Transport` after requeueing the
    /// batch when delivery fails.
    pub async fn flush(&self, preferred: TransportKind) -> Result<FlushOutcome, FlushError> {
        let (in_flight, token) = match self.start()? {
            Start::Ready { in_flight, token } => (in_flight, token),
            Start::Done(outcome) => return Ok(outcome),
        };
        let result = self
            .selector
            .send(in_flight.batch(), &token, preferred)
            .await;
        let outcome = self.finish(in_flight, result);
        if self.is_retired() {
            self.flush_leftovers();
        }
        outcome
    }

    /// Marks the controller retired and makes a final best-effort flush.
    ///
    /// If another flush is in flight this returns `AlreadyInProgress`; that
    /// flush sends whatever is still buffered once it settles.
    ///
    /// # Errors
    ///
    /// Same as [`FlushController::flush_best_effort`].
    pub fn retire(&self) -> Result<FlushOutcome, FlushError> {
        self.retired.store(true, Ordering::SeqCst);
        self.flush_best_effort()
    }

    /// Synchronous best-effort flush, for teardown when nothing will await.
    ///
    /// # Errors
    ///
    /// Same as [`FlushController::flush`].
    pub fn flush_best_effort(&self) -> Result<FlushOutcome, FlushError> {
        let (in_flight, token) = match self.start()? {
            Start::Ready { in_flight, token } => (in_flight, token),
            Start::Done(outcome) => return Ok(outcome),
        };
        let result = self
            .selector
            .send_best_effort(in_flight.batch(), &token)
            .map(|()| TransportKind::BestEffort);
        self.finish(in_flight, result)
    }

    fn flush_leftovers(&self) {
        if self.buffer().is_empty() {
            return;
        }
        match self.flush_best_effort() {
            Ok(FlushOutcome::Delivered { items, .. }) => {
                info!(items, "sent progress left over after retirement");
            }
            Ok(_) => {}
            Err(err) => {
                warn!(error = %err, "progress left over after retirement was not sent");
            }
        }
    }

    fn start(&self) -> Result<Start<'_>, FlushError> {
        if self
            .flushing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("flush already in progress");
            return Ok(Start::Done(FlushOutcome::AlreadyInProgress));
        }
        let guard = FlushGuard {
            flushing: &self.flushing,
        };

        if self.buffer().is_empty() {
            return Ok(Start::Done(FlushOutcome::NothingToDo));
        }
        let Some(token) = self.selector.credential() else {
            warn!(
                pending = self.pending_count(),
                "no credential available, keeping progress buffered"
            );
            lock(&self.stats).flushes_failed += 1;
            return Err(FlushError::MissingCredential);
        };

        let records = self.buffer().drain_all();
        debug!(
            items = records.len(),
            endpoint = %self.selector.endpoint(),
            "flushing progress"
        );
        let in_flight = InFlight {
            controller: self,
            batch: ProgressBatch::new(records),
            _guard: guard,
        };
        Ok(Start::Ready { in_flight, token })
    }

    fn finish(
        &self,
        mut in_flight: InFlight<'_>,
        result: Result<TransportKind, TransportError>,
    ) -> Result<FlushOutcome, FlushError> {
        match result {
            Ok(transport) => {
                let items = in_flight.take().len();
                info!(items, %transport, "progress flushed");
                let mut stats = lock(&self.stats);
                stats.flushes_succeeded += 1;
                stats.items_delivered += items as u64;
                stats.last_success_at = Some(self.clock.now());
                Ok(FlushOutcome::Delivered { items, transport })
            }
            Err(source) => {
                let records = in_flight.take().into_items();
                let requeued = records.len();
                warn!(requeued, error = %source, "progress flush failed");
                self.buffer().reinsert(records);
                lock(&self.stats).flushes_failed += 1;
                Err(FlushError::Transport { requeued, source })
            }
        }
    }

    fn buffer(&self) -> MutexGuard<'_, MergeBuffer> {
        lock(&self.buffer)
    }
}

enum Start<'a> {
    Ready {
        in_flight: InFlight<'a>,
        token: String,
    },
    Done(FlushOutcome),
}

/// Releases the flushing flag when dropped.
struct FlushGuard<'a> {
    flushing: &'a AtomicBool,
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        // SeqCst pairs with `retire`: either it wins the guard or this flush
        // sees the retired flag afterwards.
        self.flushing.store(false, Ordering::SeqCst);
    }
}

/// A drained batch that has not been settled yet.
///
/// If it is dropped unsettled (the flush future was abandoned), the batch is
/// put back into the buffer before the flag is released.
struct InFlight<'a> {
    controller: &'a FlushController,
    batch: ProgressBatch,
    _guard: FlushGuard<'a>,
}

impl InFlight<'_> {
    fn batch(&self) -> &ProgressBatch {
        &self.batch
    }

    fn take(&mut self) -> ProgressBatch {
        std::mem::take(&mut self.batch)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.batch.is_empty() {
            let batch = self.take();
            warn!(requeued = batch.len(), "flush abandoned before completion");
            self.controller.buffer().reinsert(batch.into_items());
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
