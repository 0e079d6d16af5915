mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{FakeBeacon, FakeReliable, ReliableMode, selector};
use progress_core::time::fixed_now;
use progress_sync::{
    Clock, FlushController, FlushError, FlushOutcome, ProgressRecord, ProgressSynchronizer,
    TransportError, TransportKind,
};

fn synchronizer(
    reliable: &Arc<FakeReliable>,
    beacon: &Arc<FakeBeacon>,
    token: Option<&str>,
) -> ProgressSynchronizer {
    ProgressSynchronizer::new(
        selector(reliable, beacon, token),
        TransportKind::Reliable,
        Clock::fixed(fixed_now()),
    )
}

#[tokio::test]
async fn failed_flush_keeps_merged_records() {
    let reliable = FakeReliable::new(ReliableMode::Fail);
    let beacon = FakeBeacon::new(true);
    let sync = synchronizer(&reliable, &beacon, Some("tok"));

    sync.add_progress_item(ProgressRecord::new("L1").with_completed(false));
    sync.add_progress_item(ProgressRecord::new("L1").with_completed(true));
    sync.add_progress_item(ProgressRecord::new("L2").with_completed(false));

    assert!(!sync.flush_progress().await);
    assert_eq!(sync.pending_count(), 2);
    assert!(sync.has_pending_items());

    reliable.set_mode(ReliableMode::Succeed);
    assert!(sync.flush_progress().await);

    let batch = reliable.last_batch();
    assert_eq!(batch.items.len(), 2);
    assert_eq!(batch.items[0].subject_id, "L1");
    assert!(batch.items[0].completed);
    assert_eq!(batch.items[1].subject_id, "L2");
    assert!(!batch.items[1].completed);
    assert!(!sync.has_pending_items());
}

#[tokio::test]
async fn second_flush_while_first_in_flight_is_rejected() {
    let reliable = FakeReliable::new(ReliableMode::Gated { succeed: true });
    let beacon = FakeBeacon::new(true);
    let sync = Arc::new(synchronizer(&reliable, &beacon, Some("tok")));
    sync.add_progress_item(ProgressRecord::new("L1").with_elapsed(10.0));

    let first = tokio::spawn({
        let sync = Arc::clone(&sync);
        async move { sync.flush_progress().await }
    });
    reliable.entered.notified().await;

    assert!(!sync.flush_progress().await);

    reliable.release.notify_one();
    assert!(first.await.unwrap());
    assert_eq!(reliable.calls(), 1);
    assert_eq!(beacon.calls(), 0);
}

#[tokio::test]
async fn missing_credential_leaves_buffer_untouched() {
    let reliable = FakeReliable::new(ReliableMode::Succeed);
    let beacon = FakeBeacon::new(true);
    let controller = FlushController::new(
        selector(&reliable, &beacon, None),
        Clock::fixed(fixed_now()),
    );
    controller.add(ProgressRecord::new("L1").with_elapsed(5.0));
    controller.add(ProgressRecord::new("L2").with_elapsed(7.0));

    let err = controller.flush(TransportKind::Reliable).await.unwrap_err();

    assert!(matches!(err, FlushError::MissingCredential));
    assert_eq!(controller.pending_count(), 2);
    assert_eq!(reliable.calls(), 0);
    assert_eq!(beacon.calls(), 0);
    assert!(!controller.is_flushing());
}

#[tokio::test]
async fn blank_token_counts_as_missing() {
    let reliable = FakeReliable::new(ReliableMode::Succeed);
    let beacon = FakeBeacon::new(true);
    let sync = synchronizer(&reliable, &beacon, Some("  "));
    sync.add_progress_item(ProgressRecord::new("L1"));

    assert!(!sync.flush_progress().await);
    assert_eq!(sync.pending_count(), 1);
    assert_eq!(reliable.calls(), 0);
}

#[tokio::test]
async fn empty_buffer_is_nothing_to_do() {
    let reliable = FakeReliable::new(ReliableMode::Succeed);
    let beacon = FakeBeacon::new(true);
    let controller = FlushController::new(
        selector(&reliable, &beacon, Some("tok")),
        Clock::fixed(fixed_now()),
    );

    let outcome = controller.flush(TransportKind::Reliable).await.unwrap();

    assert_eq!(outcome, FlushOutcome::NothingToDo);
    assert_eq!(reliable.calls(), 0);
    assert!(!controller.is_flushing());
}

#[tokio::test]
async fn successful_flush_sends_token_and_updates_stats() {
    let reliable = FakeReliable::new(ReliableMode::Succeed);
    let beacon = FakeBeacon::new(true);
    let controller = FlushController::new(
        selector(&reliable, &beacon, Some("tok-7")),
        Clock::fixed(fixed_now()),
    );
    controller.add(ProgressRecord::new("L1").with_elapsed(5.0));
    controller.add(ProgressRecord::new("L2").with_position(9.0));

    let outcome = controller.flush(TransportKind::Reliable).await.unwrap();

    assert_eq!(
        outcome,
        FlushOutcome::Delivered {
            items: 2,
            transport: TransportKind::Reliable
        }
    );
    assert_eq!(reliable.tokens.lock().unwrap().as_slice(), ["tok-7"]);
    assert_eq!(controller.pending_count(), 0);

    let stats = controller.stats();
    assert_eq!(stats.flushes_succeeded, 1);
    assert_eq!(stats.flushes_failed, 0);
    assert_eq!(stats.items_delivered, 2);
    assert_eq!(stats.last_success_at, Some(fixed_now()));
}

#[tokio::test]
async fn failed_flush_requeues_identical_records() {
    let reliable = FakeReliable::new(ReliableMode::Fail);
    let beacon = FakeBeacon::new(true);
    let controller = FlushController::new(
        selector(&reliable, &beacon, Some("tok")),
        Clock::fixed(fixed_now()),
    );
    for (id, elapsed) in [("A", 3.0), ("B", 8.0), ("C", 13.0)] {
        controller.add(
            ProgressRecord::new(id)
                .with_elapsed(elapsed)
                .with_milestone(1),
        );
    }

    let err = controller.flush(TransportKind::Reliable).await.unwrap_err();
    assert!(matches!(
        err,
        FlushError::Transport {
            requeued: 3,
            source: TransportError::HttpStatus(_)
        }
    ));
    let attempted = reliable.last_batch();

    reliable.set_mode(ReliableMode::Succeed);
    controller.flush(TransportKind::Reliable).await.unwrap();

    assert_eq!(reliable.last_batch(), attempted);
    assert_eq!(controller.stats().flushes_failed, 1);
}

#[tokio::test]
async fn updates_during_failed_flush_win_over_requeued_snapshot() {
    let reliable = FakeReliable::new(ReliableMode::Gated { succeed: false });
    let beacon = FakeBeacon::new(true);
    let sync = Arc::new(synchronizer(&reliable, &beacon, Some("tok")));
    sync.add_progress_item(
        ProgressRecord::new("L1")
            .with_elapsed(30.0)
            .with_position(200.0)
            .with_milestone(1),
    );

    let first = tokio::spawn({
        let sync = Arc::clone(&sync);
        async move { sync.flush_progress().await }
    });
    reliable.entered.notified().await;
    assert_eq!(sync.pending_count(), 0);

    sync.add_progress_item(
        ProgressRecord::new("L1")
            .with_elapsed(45.0)
            .with_position(120.0)
            .with_milestone(2),
    );
    reliable.release.notify_one();
    assert!(!first.await.unwrap());

    reliable.set_mode(ReliableMode::Succeed);
    assert!(sync.flush_progress().await);
    let record = &reliable.last_batch().items[0];
    assert_eq!(record.elapsed_seconds, 45.0);
    assert_eq!(record.position_seconds, 200.0);
    assert_eq!(record.milestone, Some(2));
}

#[tokio::test]
async fn unsupported_reliable_transport_falls_back_to_best_effort() {
    let reliable = FakeReliable::new(ReliableMode::Unsupported);
    let beacon = FakeBeacon::new(true);
    let controller = FlushController::new(
        selector(&reliable, &beacon, Some("tok")),
        Clock::fixed(fixed_now()),
    );
    controller.add(ProgressRecord::new("L1").with_elapsed(4.0));

    let outcome = controller.flush(TransportKind::Reliable).await.unwrap();

    assert_eq!(
        outcome,
        FlushOutcome::Delivered {
            items: 1,
            transport: TransportKind::BestEffort
        }
    );
    assert_eq!(beacon.calls(), 1);
    assert_eq!(
        beacon.sent.lock().unwrap()[0].content_type,
        "application/json"
    );
    let body = beacon.last_body();
    assert_eq!(body["accessToken"], "tok");
    assert_eq!(body["items"][0]["subjectId"], "L1");
    assert_eq!(body["items"][0]["elapsedSeconds"], 4.0);
}

#[tokio::test]
async fn rejected_best_effort_send_requeues_without_fallback() {
    let reliable = FakeReliable::new(ReliableMode::Succeed);
    let beacon = FakeBeacon::new(false);
    let controller = FlushController::new(
        selector(&reliable, &beacon, Some("tok")),
        Clock::fixed(fixed_now()),
    );
    controller.add(ProgressRecord::new("L1"));

    let err = controller.flush(TransportKind::BestEffort).await.unwrap_err();

    assert!(matches!(
        err,
        FlushError::Transport {
            requeued: 1,
            source: TransportError::Rejected { .. }
        }
    ));
    assert_eq!(reliable.calls(), 0);
    assert_eq!(controller.pending_count(), 1);
}

#[tokio::test]
async fn abandoned_flush_requeues_and_releases_guard() {
    let reliable = FakeReliable::new(ReliableMode::Hang);
    let beacon = FakeBeacon::new(true);
    let controller = FlushController::new(
        selector(&reliable, &beacon, Some("tok")),
        Clock::fixed(fixed_now()),
    );
    controller.add(ProgressRecord::new("L1").with_elapsed(12.0));

    let abandoned = tokio::time::timeout(
        Duration::from_millis(20),
        controller.flush(TransportKind::Reliable),
    )
    .await;

    assert!(abandoned.is_err());
    assert_eq!(controller.pending_count(), 1);
    assert!(!controller.is_flushing());

    reliable.set_mode(ReliableMode::Succeed);
    controller.flush(TransportKind::Reliable).await.unwrap();
    assert_eq!(reliable.last_batch().items[0].elapsed_seconds, 12.0);
}

#[tokio::test]
async fn retire_flushes_remaining_records_best_effort() {
    let reliable = FakeReliable::new(ReliableMode::Succeed);
    let beacon = FakeBeacon::new(true);
    let sync = synchronizer(&reliable, &beacon, Some("tok"));
    sync.add_progress_item(ProgressRecord::new("L9").with_completed(true));

    assert!(sync.retire());

    assert_eq!(reliable.calls(), 0);
    assert_eq!(beacon.calls(), 1);
    assert_eq!(beacon.last_body()["items"][0]["completed"], true);
}

#[tokio::test]
async fn dropping_synchronizer_flushes_once() {
    let reliable = FakeReliable::new(ReliableMode::Succeed);
    let beacon = FakeBeacon::new(true);
    {
        let sync = synchronizer(&reliable, &beacon, Some("tok"));
        sync.add_progress_item(ProgressRecord::new("L1"));
    }
    assert_eq!(beacon.calls(), 1);

    let sync = synchronizer(&reliable, &beacon, Some("tok"));
    sync.add_progress_item(ProgressRecord::new("L2"));
    sync.retire();
    assert_eq!(beacon.calls(), 2);
}
