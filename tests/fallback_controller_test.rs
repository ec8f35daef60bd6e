//! Integration tests for the fallback controller on a paused Tokio clock

mod common;

use chatflow_core::config::{DeliveryTuning, FallbackConfig};
use chatflow_core::delivery::{DeliveryMode, FallbackController, MessageSource};
use chatflow_core::events::{DeliveryEvent, TransitionReason};
use chatflow_core::DeliveryError;
use chrono::{TimeZone, Utc};
use common::*;
use std::time::Duration;
use tokio::sync::broadcast::error::TryRecvError;

fn drain_events(
    receiver: &mut tokio::sync::broadcast::Receiver<chatflow_core::PublishedEvent>,
) -> Vec<DeliveryEvent> {
    let mut events = Vec::new();
    while let Ok(published) = receiver.try_recv() {
        events.push(published.event);
    }
    events
}

#[tokio::test(start_paused = true)]
async fn test_push_failures_fall_back_to_polling_and_push_recovers() {
    init_test_logging();
    let fetcher = ScriptedFetcher::new().into_arc();
    fetcher.push_batch(vec![message("m1")]);

    let controller = FallbackController::new(fast_config(), fetcher.clone()).unwrap();
    controller.initialize("tenant-1").unwrap();

    controller.notify_push_failure(Some("webhook timeout")).unwrap();
    controller.notify_push_failure(Some("webhook timeout")).unwrap();
    let state = controller.get_state();
    assert_eq!(state.mode, DeliveryMode::Pull);
    assert_eq!(state.health_score, 60);
    assert!(state.is_active);

    advance(Duration::from_millis(1_100)).await;
    let state = controller.get_state();
    assert_eq!(state.queue_depth, 1);
    assert!(state.last_pull_message_at.is_some());
    assert_eq!(fetcher.call_count(), 1);
    assert_eq!(fetcher.calls()[0].tenant_id, "tenant-1");

    controller.notify_push_message(message("m2")).unwrap();
    let state = controller.get_state();
    assert_eq!(state.mode, DeliveryMode::Push);
    assert_eq!(state.queue_depth, 2);
    assert!(!state.is_active);

    advance(Duration::from_secs(3)).await;
    assert_eq!(fetcher.call_count(), 1, "poller must be stopped in push mode");

    let first = controller.get_next_message().unwrap().unwrap();
    let second = controller.get_next_message().unwrap().unwrap();
    assert_eq!((first.id(), first.source), ("m1", MessageSource::Pull));
    assert_eq!((second.id(), second.source), ("m2", MessageSource::Push));
    assert!(controller.get_next_message().unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_force_mode_back_to_back() {
    let fetcher = ScriptedFetcher::new().into_arc();
    let controller = FallbackController::new(fast_config(), fetcher.clone()).unwrap();
    controller.initialize("tenant-1").unwrap();
    controller.notify_push_failure(None).unwrap();

    controller.force_mode(DeliveryMode::Pull).unwrap();
    controller.force_mode(DeliveryMode::Push).unwrap();

    let state = controller.get_state();
    assert_eq!(state.mode, DeliveryMode::Push);
    assert_eq!(state.consecutive_failures, 0);
    assert_eq!(state.health_score, 70);
    assert!(!state.is_active);

    advance(Duration::from_secs(5)).await;
    assert_eq!(fetcher.call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_destroy_stops_every_tick() {
    let fetcher = ScriptedFetcher::new().into_arc();
    let controller = FallbackController::new(fast_config(), fetcher.clone()).unwrap();
    controller.initialize("tenant-1").unwrap();
    controller.notify_push_message(message("m1")).unwrap();
    controller.force_mode(DeliveryMode::Pull).unwrap();
    advance(Duration::from_millis(1_500)).await;
    let calls_before = fetcher.call_count();

    let mut events = controller.subscribe();
    controller.destroy();
    controller.destroy();
    let after_destroy = controller.get_state();
    assert_eq!(after_destroy.queue_depth, 0);
    assert!(!after_destroy.is_active);
    assert_eq!(
        drain_events(&mut events),
        vec![DeliveryEvent::Destroyed {
            tenant_id: Some("tenant-1".to_string())
        }]
    );

    // Well past both the polling and the push silence windows
    advance(Duration::from_secs(120)).await;

    assert_eq!(controller.get_state(), after_destroy);
    assert_eq!(fetcher.call_count(), calls_before);
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test(start_paused = true)]
async fn test_dropping_last_handle_cancels_tasks() {
    let fetcher = ScriptedFetcher::new().into_arc();
    let controller = FallbackController::new(fast_config(), fetcher.clone()).unwrap();
    controller.initialize("tenant-1").unwrap();
    controller.force_mode(DeliveryMode::Pull).unwrap();
    drop(controller);

    advance(Duration::from_secs(10)).await;
    assert_eq!(fetcher.call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_push_silence_penalty() {
    let controller =
        FallbackController::new(FallbackConfig::default(), ScriptedFetcher::new().into_arc())
            .unwrap();
    controller.initialize("tenant-1").unwrap();

    // Ticks at 10s..60s see at most 60s of silence, which is not over the threshold
    advance(Duration::from_secs(65)).await;
    assert_eq!(controller.get_state().health_score, 100);

    advance(Duration::from_secs(10)).await;
    assert_eq!(controller.get_state().health_score, 95);

    advance(Duration::from_secs(10)).await;
    assert_eq!(controller.get_state().health_score, 90);

    controller.notify_push_message(message("m1")).unwrap();
    advance(Duration::from_secs(30)).await;
    assert_eq!(controller.get_state().health_score, 100);
}

#[tokio::test(start_paused = true)]
async fn test_critical_health_forces_pull_without_failure_threshold() {
    let config = FallbackConfig {
        tuning: DeliveryTuning {
            failure_threshold: 10,
            ..Default::default()
        },
        ..Default::default()
    };
    let controller = FallbackController::new(config, ScriptedFetcher::new().into_arc()).unwrap();
    let mut events = controller.subscribe();
    controller.initialize("tenant-1").unwrap();

    for _ in 0..4 {
        controller.notify_push_failure(None).unwrap();
    }
    let state = controller.get_state();
    assert_eq!(state.mode, DeliveryMode::Push);
    assert_eq!(state.health_score, 20);

    advance(Duration::from_millis(10_500)).await;
    let state = controller.get_state();
    assert_eq!(state.mode, DeliveryMode::Pull);
    assert!(state.is_active);
    assert_eq!(state.consecutive_failures, 4);

    let transitions: Vec<_> = drain_events(&mut events)
        .into_iter()
        .filter_map(|event| match event {
            DeliveryEvent::ModeChanged { reason, to, .. } => Some((to, reason)),
            _ => None,
        })
        .collect();
    assert_eq!(
        transitions,
        vec![(DeliveryMode::Pull, TransitionReason::CriticalHealth)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_health_monitor_recovers_push_after_decrementing_failures() {
    let config = FallbackConfig {
        tuning: DeliveryTuning {
            neutral_health: 100,
            push_failure_penalty: 5,
            ..Default::default()
        },
        ..Default::default()
    };
    let controller = FallbackController::new(config, ScriptedFetcher::new().into_arc()).unwrap();
    controller.initialize("tenant-1").unwrap();

    controller.force_mode(DeliveryMode::Pull).unwrap();
    controller.notify_push_failure(None).unwrap();
    controller.notify_push_failure(None).unwrap();
    let state = controller.get_state();
    assert_eq!(state.mode, DeliveryMode::Pull);
    assert_eq!(state.health_score, 90);
    assert_eq!(state.consecutive_failures, 2);

    advance(Duration::from_millis(10_500)).await;
    let state = controller.get_state();
    assert_eq!(state.mode, DeliveryMode::Pull);
    assert_eq!(state.consecutive_failures, 1);

    advance(Duration::from_secs(10)).await;
    let state = controller.get_state();
    assert_eq!(state.mode, DeliveryMode::Push);
    assert_eq!(state.consecutive_failures, 0);
    assert!(!state.is_active);
}

#[tokio::test(start_paused = true)]
async fn test_fetch_errors_back_off_without_stopping_polling() {
    let fetcher = ScriptedFetcher::new().into_arc();
    fetcher.push_error("connection reset");
    fetcher.push_error("connection reset");
    fetcher.push_batch(vec![message("m1")]);

    let controller = FallbackController::new(fast_config(), fetcher.clone()).unwrap();
    controller.initialize("tenant-1").unwrap();
    controller.force_mode(DeliveryMode::Pull).unwrap();

    // 1s: fails, retry after 1s. 2s: fails, retry after 1.5s. 3s: skipped. 4s: succeeds.
    advance(Duration::from_millis(4_500)).await;

    let state = controller.get_state();
    assert_eq!(fetcher.call_count(), 3);
    assert_eq!(state.stats.poll_failures, 2);
    assert_eq!(state.stats.polls_skipped, 1);
    assert_eq!(state.stats.poll_cycles, 3);
    assert_eq!(state.health_score, 60);
    assert_eq!(state.queue_depth, 1);
    assert_eq!(state.mode, DeliveryMode::Pull);
}

#[tokio::test(start_paused = true)]
async fn test_slow_fetch_skips_overlapping_ticks() {
    let fetcher = ScriptedFetcher::with_delay(Duration::from_millis(2_500)).into_arc();
    let controller = FallbackController::new(fast_config(), fetcher.clone()).unwrap();
    controller.initialize("tenant-1").unwrap();
    controller.force_mode(DeliveryMode::Pull).unwrap();

    advance(Duration::from_millis(4_200)).await;

    let state = controller.get_state();
    assert_eq!(fetcher.call_count(), 1);
    assert_eq!(state.stats.poll_cycles, 1);
    assert_eq!(state.stats.polls_skipped, 2);
}

#[tokio::test(start_paused = true)]
async fn test_fetch_timeout_counts_as_failure() {
    let config = FallbackConfig {
        fetch_timeout_ms: 2_000,
        ..fast_config()
    };
    let fetcher = ScriptedFetcher::with_delay(Duration::from_secs(5)).into_arc();
    let controller = FallbackController::new(config, fetcher).unwrap();
    controller.initialize("tenant-1").unwrap();
    controller.force_mode(DeliveryMode::Pull).unwrap();

    advance(Duration::from_millis(3_500)).await;

    let state = controller.get_state();
    assert_eq!(state.stats.poll_failures, 1);
    assert_eq!(state.health_score, 65);
}

#[tokio::test(start_paused = true)]
async fn test_poll_cursor_and_duplicate_suppression() {
    let t1 = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    let t2 = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 5).unwrap();

    let fetcher = ScriptedFetcher::new().into_arc();
    fetcher.push_batch(vec![
        message("m1").with_timestamp(t1),
        message("m2").with_timestamp(t2),
    ]);
    fetcher.push_batch(vec![message("m2").with_timestamp(t2)]);

    let controller = FallbackController::new(fast_config(), fetcher.clone()).unwrap();
    controller.initialize("tenant-1").unwrap();
    controller.force_mode(DeliveryMode::Pull).unwrap();

    advance(Duration::from_millis(2_100)).await;

    let calls = fetcher.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].since, None);
    assert_eq!(calls[1].since, Some(t2));

    let state = controller.get_state();
    assert_eq!(state.queue_depth, 2);
    assert_eq!(state.stats.pull_messages, 2);
    assert_eq!(state.stats.duplicates_rejected, 1);
}

#[tokio::test(start_paused = true)]
async fn test_events_follow_decision_points() {
    let controller =
        FallbackController::new(fast_config(), ScriptedFetcher::new().into_arc()).unwrap();
    let mut events = controller.subscribe();
    controller.initialize("tenant-1").unwrap();
    controller.notify_push_failure(None).unwrap();
    controller.notify_push_failure(None).unwrap();

    let names: Vec<_> = drain_events(&mut events)
        .iter()
        .map(DeliveryEvent::name)
        .collect();
    assert_eq!(
        names,
        vec![
            "delivery.initialized",
            "delivery.health_changed",
            "delivery.health_changed",
            "delivery.mode_changed",
        ]
    );
}

#[tokio::test]
async fn test_drain_stops_at_handler_failure() {
    let controller =
        FallbackController::new(FallbackConfig::default(), ScriptedFetcher::new().into_arc())
            .unwrap();
    controller.initialize("tenant-1").unwrap();

    assert_eq!(
        controller
            .process_all_pending_messages(|_, _| Ok::<_, String>(()))
            .unwrap()
            .unwrap(),
        0
    );

    for id in ["a", "b", "c"] {
        controller.notify_push_message(message(id)).unwrap();
    }
    let failure = controller
        .process_all_pending_messages(|message, _| {
            if message.id == "b" {
                Err("handler exploded".to_string())
            } else {
                Ok(())
            }
        })
        .unwrap()
        .unwrap_err();
    assert_eq!(failure.processed, 1);
    assert_eq!(failure.message_id, "b");
    assert_eq!(failure.error, "handler exploded");

    let state = controller.get_state();
    assert_eq!(state.queue_depth, 3);
    assert_eq!(state.pending_messages, 1);
    assert_eq!(controller.get_next_message().unwrap().unwrap().id(), "c");
}

#[tokio::test]
async fn test_misuse_after_destroy_fails_loudly() {
    let controller =
        FallbackController::new(FallbackConfig::default(), ScriptedFetcher::new().into_arc())
            .unwrap();
    controller.initialize("tenant-1").unwrap();
    controller.destroy();

    let error = controller.notify_push_failure(None).unwrap_err();
    assert!(error.is_misuse());
    assert_eq!(
        controller.force_mode(DeliveryMode::Pull),
        Err(DeliveryError::Destroyed {
            operation: "force_mode"
        })
    );
    assert!(matches!(
        controller.process_all_pending_messages(|_, _| Ok::<_, String>(())),
        Err(DeliveryError::Destroyed { .. })
    ));
    assert_eq!(controller.get_state().tenant_id.as_deref(), Some("tenant-1"));
}

/// Short real-time intervals for tests on a multi-threaded runtime
fn threaded_config() -> FallbackConfig {
    FallbackConfig {
        polling_interval_ms: 20,
        health_check_interval_ms: 1_000,
        ..Default::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_push_failures_from_plain_thread_start_polling() {
    init_test_logging();
    let fetcher = ScriptedFetcher::new().into_arc();
    fetcher.push_batch(vec![message("m1")]);
    let controller = FallbackController::new(threaded_config(), fetcher.clone()).unwrap();
    controller.initialize("tenant-thread").unwrap();

    let from_thread = controller.clone();
    std::thread::spawn(move || {
        from_thread.notify_push_failure(Some("socket closed")).unwrap();
        from_thread.notify_push_failure(Some("socket closed")).unwrap();
    })
    .join()
    .expect("push failures from a non-runtime thread must not panic");

    let state = controller.get_state();
    assert_eq!(state.mode, DeliveryMode::Pull);
    assert!(state.is_active);
    assert_eq!(state.consecutive_failures, 2);
    assert_eq!(state.health_score, 60);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(fetcher.call_count() >= 1);
    assert_eq!(controller.get_state().queue_depth, 1);

    controller.destroy();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_force_mode_from_plain_thread_toggles_poller() {
    let fetcher = ScriptedFetcher::new().into_arc();
    let controller = FallbackController::new(threaded_config(), fetcher.clone()).unwrap();
    controller.initialize("tenant-thread").unwrap();

    let from_thread = controller.clone();
    std::thread::spawn(move || {
        from_thread.force_mode(DeliveryMode::Pull).unwrap();
        assert!(from_thread.get_state().is_active);
        from_thread.force_mode(DeliveryMode::Push).unwrap();
        from_thread.force_mode(DeliveryMode::Pull).unwrap();
    })
    .join()
    .expect("mode overrides from a non-runtime thread must not panic");

    let state = controller.get_state();
    assert_eq!(state.mode, DeliveryMode::Pull);
    assert!(state.is_active);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(fetcher.call_count() >= 1);

    controller.destroy();
    assert!(!controller.get_state().is_active);
}
