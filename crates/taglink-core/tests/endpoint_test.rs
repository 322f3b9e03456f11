#![allow(clippy::unwrap_used)]

// Endpoint lifecycle against the simulated controller. Every test runs on
// paused time, so reconnect delays and cycle periods elapse instantly.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use taglink_api::sim::SimulatedController;
use taglink_core::{
    ChangeEvent, ConnectionState, CoreError, DataType, Endpoint, EndpointConfig, EndpointStatus,
    ReadMode, ReadPayload, TagDefinition, TagRegistry, TagValue,
};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::time::Instant;

const GUARD: Duration = Duration::from_secs(120);

// ── Helpers ─────────────────────────────────────────────────────────

fn config() -> EndpointConfig {
    EndpointConfig {
        cycle_time: Duration::from_millis(100),
        reconnect_delay: Duration::from_secs(5),
        timeout: Duration::from_secs(2),
        max_skipped_cycles: 10,
        ..EndpointConfig::new("10.0.0.5")
    }
}

fn endpoint_with(plc: &SimulatedController, config: EndpointConfig, tags: &[&str]) -> Endpoint {
    let (registry, report) =
        TagRegistry::from_table(tags.iter().map(|t| TagDefinition::new(None, t, None)));
    assert!(report.is_clean());
    Endpoint::new(config, registry, Arc::new(plc.factory()))
}

fn endpoint(plc: &SimulatedController, tags: &[&str]) -> Endpoint {
    endpoint_with(plc, config(), tags)
}

async fn next_status(rx: &mut broadcast::Receiver<EndpointStatus>) -> EndpointStatus {
    tokio::time::timeout(GUARD, rx.recv())
        .await
        .expect("no status within guard")
        .unwrap()
}

async fn next_change(rx: &mut broadcast::Receiver<ChangeEvent>) -> ChangeEvent {
    tokio::time::timeout(GUARD, rx.recv())
        .await
        .expect("no change within guard")
        .unwrap()
}

/// Wait until online and the first cycle has published its changes.
async fn online(ep: &Endpoint, status: &mut broadcast::Receiver<EndpointStatus>) {
    assert_eq!(next_status(status).await, EndpointStatus::Connecting);
    assert_eq!(next_status(status).await, EndpointStatus::Online);
    assert_eq!(ep.status(), ConnectionState::Online);
}

async fn settle_first_cycle(changes: &mut broadcast::Receiver<ChangeEvent>) {
    loop {
        if let ChangeEvent::AllChanged(_) = next_change(changes).await {
            return;
        }
    }
}

fn recorder<T: Send + 'static>() -> (Arc<Mutex<Vec<T>>>, Arc<Mutex<Vec<T>>>) {
    let log = Arc::new(Mutex::new(Vec::new()));
    (Arc::clone(&log), log)
}

// ── Scan cycle ──────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn first_cycle_reports_change_then_aggregate_then_nothing() {
    let plc = SimulatedController::new().with_tag("A", TagValue::Dint(5));
    let ep = endpoint(&plc, &["A"]);
    let mut changes = ep.changes();
    ep.connect().unwrap();

    match next_change(&mut changes).await {
        ChangeEvent::Tag(change) => {
            assert_eq!(change.key, "A");
            assert_eq!(change.value, TagValue::Dint(5));
            assert_eq!(change.previous, None);
        }
        other => panic!("expected a tag change, got {other:?}"),
    }
    match next_change(&mut changes).await {
        ChangeEvent::AllChanged(snapshot) => {
            assert_eq!(snapshot.changed.len(), 1);
            assert_eq!(snapshot.values["A"], Some(TagValue::Dint(5)));
        }
        other => panic!("expected an aggregate change, got {other:?}"),
    }

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(matches!(changes.try_recv(), Err(TryRecvError::Empty)));
    assert!(ep.stats().cycles_completed >= 10);
    assert_eq!(ep.all_tag_values()["A"], Some(TagValue::Dint(5)));

    ep.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn controller_side_changes_are_published_with_previous_value() {
    let plc = SimulatedController::new()
        .with_tag("A", TagValue::Dint(5))
        .with_tag("B", TagValue::Bool(false));
    let ep = endpoint(&plc, &["A", "B"]);
    let mut changes = ep.changes();
    ep.connect().unwrap();
    settle_first_cycle(&mut changes).await;

    plc.set_tag("B", TagValue::Bool(true));
    match next_change(&mut changes).await {
        ChangeEvent::Tag(change) => {
            assert_eq!(change.key, "B");
            assert_eq!(change.previous, Some(TagValue::Bool(false)));
        }
        other => panic!("expected a tag change, got {other:?}"),
    }
    match next_change(&mut changes).await {
        ChangeEvent::AllChanged(snapshot) => assert_eq!(snapshot.changed.len(), 1),
        other => panic!("expected an aggregate change, got {other:?}"),
    }

    ep.shutdown().await;
}

// ── Writes ──────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn write_completion_precedes_read_back_change() {
    let plc = SimulatedController::new().with_tag("A", TagValue::Dint(5));
    let ep = endpoint(&plc, &["A"]);
    let (log, sink) = recorder::<String>();
    let change_sink = Arc::clone(&sink);
    let _sub = ep.subscribe_change(move |c| change_sink.lock().push(format!("change {}", c.value)));
    let mut changes = ep.changes();
    ep.connect().unwrap();
    settle_first_cycle(&mut changes).await;

    ep.request_write_with("A", 10, move |outcome| {
        sink.lock().push(format!("write {outcome:?}"));
    })
    .unwrap();
    assert_eq!(ep.pending_writes(), 1);

    match next_change(&mut changes).await {
        ChangeEvent::Tag(change) => assert_eq!(change.value, TagValue::Dint(10)),
        other => panic!("expected a tag change, got {other:?}"),
    }
    assert_eq!(*log.lock(), vec!["change 5", "write Ok(())", "change 10"]);
    assert_eq!(plc.write_log().len(), 1);
    assert_eq!(ep.stats().writes_flushed, 1);

    ep.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn writes_to_one_tag_coalesce_into_one_exchange() {
    let plc = SimulatedController::new().with_tag("A", TagValue::Dint(5));
    let ep = endpoint(&plc, &["A"]);
    let mut changes = ep.changes();
    ep.connect().unwrap();
    settle_first_cycle(&mut changes).await;

    let first = ep.request_write("A", 10).unwrap();
    let second = ep.request_write("A", 20).unwrap();
    assert_eq!(ep.pending_writes(), 1);

    assert_eq!(first.await, Ok(()));
    assert_eq!(second.await, Ok(()));

    let log = plc.write_log();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].len(), 1);
    assert_eq!(log[0][0].address.key(), "A");
    assert_eq!(log[0][0].value, TagValue::Dint(20));
    assert_eq!(plc.tag("A"), Some(TagValue::Dint(20)));

    ep.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn write_requests_are_validated_synchronously() {
    let plc = SimulatedController::new().with_tag("Flag", TagValue::Bool(false));
    let registry = TagRegistry::new();
    let flag = registry.register(None, "Flag", Some(DataType::Bool)).unwrap();
    let ep = Endpoint::new(config(), registry, Arc::new(plc.factory()));

    assert_eq!(
        ep.request_write("Missing", 1).unwrap_err(),
        CoreError::UnknownTag {
            key: "Missing".into()
        }
    );
    assert!(matches!(
        ep.request_write(&flag, "yes").unwrap_err(),
        CoreError::InvalidValue { .. }
    ));
    assert_eq!(ep.pending_writes(), 0);

    // Integers coerce to the declared type.
    let _ticket = ep.request_write(&flag, 1).unwrap();
    assert_eq!(ep.pending_writes(), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_write_fails_every_completion_and_goes_offline_once() {
    let plc = SimulatedController::new()
        .with_tag("A", TagValue::Dint(5))
        .with_tag("B", TagValue::Dint(6));
    let ep = endpoint(&plc, &["A", "B"]);
    let mut status = ep.status_events();
    let mut changes = ep.changes();
    ep.connect().unwrap();
    online(&ep, &mut status).await;
    settle_first_cycle(&mut changes).await;

    plc.fail_next_writes(1);
    plc.fail_next_reads(1);
    let a = ep.request_write("A", 1).unwrap();
    let b = ep.request_write("B", 2).unwrap();

    assert!(matches!(a.await, Err(CoreError::WriteFailed { .. })));
    assert!(matches!(b.await, Err(CoreError::WriteFailed { .. })));

    assert_eq!(next_status(&mut status).await, EndpointStatus::Offline);
    assert_eq!(next_status(&mut status).await, EndpointStatus::Connecting);
    assert_eq!(next_status(&mut status).await, EndpointStatus::Online);
    assert_eq!(ep.stats().cycles_failed, 1);
    assert_eq!(plc.connect_attempts(), 2);

    ep.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn writes_queued_while_offline_flush_after_reconnect() {
    let plc = SimulatedController::new().with_tag("A", TagValue::Dint(5));
    plc.refuse_next_connects(1);
    let ep = endpoint(&plc, &["A"]);
    let mut status = ep.status_events();
    ep.connect().unwrap();

    assert_eq!(next_status(&mut status).await, EndpointStatus::Connecting);
    assert_eq!(next_status(&mut status).await, EndpointStatus::Offline);
    let ticket = ep.request_write("A", 7).unwrap();

    assert_eq!(ticket.await, Ok(()));
    assert_eq!(plc.tag("A"), Some(TagValue::Dint(7)));
    assert_eq!(ep.status(), ConnectionState::Online);

    ep.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn write_in_flight_when_session_drops_resolves_with_failure() {
    let plc = SimulatedController::new().with_tag("A", TagValue::Dint(5));
    let ep = endpoint(&plc, &["A"]);
    let mut status = ep.status_events();
    let mut changes = ep.changes();
    ep.connect().unwrap();
    online(&ep, &mut status).await;
    settle_first_cycle(&mut changes).await;

    plc.hang_writes(true);
    let ticket = ep.request_write("A", 9).unwrap();
    // Let the next cycle pick the write up and block on it.
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(ep.pending_writes(), 0);
    plc.end_sessions();

    assert_eq!(ticket.await, Err(CoreError::Disconnected));
    assert_eq!(next_status(&mut status).await, EndpointStatus::Offline);

    plc.hang_writes(false);
    ep.shutdown().await;
}

// ── Connection failures ─────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn read_failure_reconnects_after_the_fixed_delay() {
    let plc = SimulatedController::new().with_tag("A", TagValue::Dint(5));
    let ep = endpoint(&plc, &["A"]);
    let mut status = ep.status_events();
    ep.connect().unwrap();
    online(&ep, &mut status).await;

    plc.fail_next_reads(1);
    assert_eq!(next_status(&mut status).await, EndpointStatus::Offline);
    let offline_at = Instant::now();

    assert_eq!(next_status(&mut status).await, EndpointStatus::Connecting);
    assert!(offline_at.elapsed() >= Duration::from_secs(5));
    assert_eq!(next_status(&mut status).await, EndpointStatus::Online);
    assert_eq!(plc.connect_attempts(), 2);
    assert_eq!(ep.stats().reconnect_attempts, 1);

    ep.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn values_are_unknown_while_offline() {
    let plc = SimulatedController::new().with_tag("A", TagValue::Dint(5));
    let ep = endpoint(&plc, &["A"]);
    let mut status = ep.status_events();
    let mut changes = ep.changes();
    ep.connect().unwrap();
    online(&ep, &mut status).await;
    settle_first_cycle(&mut changes).await;

    plc.refuse_next_connects(u32::MAX);
    plc.fail_next_reads(1);
    assert_eq!(next_status(&mut status).await, EndpointStatus::Offline);

    assert_eq!(ep.all_tag_values()["A"], None);
    let tag = ep.tag("A").unwrap();
    assert_eq!(tag.value(), None);
    assert!(!tag.is_initialized());
    assert_eq!(tag.last_known_good(), Some(TagValue::Dint(5)));

    // Still unknown across failed reconnects.
    tokio::time::sleep(Duration::from_secs(12)).await;
    assert_eq!(ep.all_tag_values()["A"], None);

    plc.refuse_next_connects(0);
    match next_change(&mut changes).await {
        ChangeEvent::Tag(change) => {
            assert_eq!(change.value, TagValue::Dint(5));
            assert_eq!(change.previous, None);
        }
        other => panic!("expected a tag change, got {other:?}"),
    }

    ep.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn refused_connect_retries_with_connecting_before_online() {
    let plc = SimulatedController::new().with_tag("A", TagValue::Dint(5));
    plc.refuse_next_connects(2);
    let ep = endpoint(&plc, &["A"]);
    let (statuses, sink) = recorder::<EndpointStatus>();
    let _sub = ep.subscribe_status(move |s| sink.lock().push(s));
    let mut status = ep.status_events();
    ep.connect().unwrap();

    for expected in [
        EndpointStatus::Connecting,
        EndpointStatus::Offline,
        EndpointStatus::Connecting,
        EndpointStatus::Offline,
        EndpointStatus::Connecting,
        EndpointStatus::Online,
    ] {
        assert_eq!(next_status(&mut status).await, expected);
    }
    assert_eq!(statuses.lock().len(), 6);
    assert_eq!(plc.connect_attempts(), 3);

    ep.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn manual_reconnect_skips_the_delay() {
    let plc = SimulatedController::new().with_tag("A", TagValue::Dint(5));
    plc.refuse_next_connects(1);
    let ep = endpoint(&plc, &["A"]);
    let mut status = ep.status_events();
    ep.connect().unwrap();

    assert_eq!(next_status(&mut status).await, EndpointStatus::Connecting);
    assert_eq!(next_status(&mut status).await, EndpointStatus::Offline);
    let offline_at = Instant::now();
    ep.reconnect_now();

    assert_eq!(next_status(&mut status).await, EndpointStatus::Connecting);
    assert!(offline_at.elapsed() < Duration::from_secs(1));
    assert_eq!(next_status(&mut status).await, EndpointStatus::Online);

    // No-op while online.
    ep.reconnect_now();
    assert_eq!(ep.status(), ConnectionState::Online);

    ep.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn runtime_error_and_session_end_route_offline() {
    let plc = SimulatedController::new().with_tag("A", TagValue::Dint(5));
    let ep = endpoint(&plc, &["A"]);
    let mut status = ep.status_events();
    ep.connect().unwrap();
    online(&ep, &mut status).await;

    plc.emit_error("socket reset");
    assert_eq!(next_status(&mut status).await, EndpointStatus::Offline);
    online(&ep, &mut status).await;

    plc.end_sessions();
    assert_eq!(next_status(&mut status).await, EndpointStatus::Offline);
    online(&ep, &mut status).await;
    assert_eq!(plc.connect_attempts(), 3);

    ep.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn stuck_cycle_forces_failure_after_skip_threshold() {
    let plc = SimulatedController::new().with_tag("A", TagValue::Dint(5));
    let config = EndpointConfig {
        timeout: Duration::from_secs(60),
        ..config()
    };
    let ep = endpoint_with(&plc, config, &["A"]);
    let mut status = ep.status_events();
    let mut changes = ep.changes();
    ep.connect().unwrap();
    online(&ep, &mut status).await;
    settle_first_cycle(&mut changes).await;

    plc.hang_reads(true);
    let hung_at = Instant::now();
    assert_eq!(next_status(&mut status).await, EndpointStatus::Offline);
    assert!(hung_at.elapsed() < Duration::from_secs(60));

    let stats = ep.stats();
    assert!(stats.cycles_skipped >= 10);
    assert_eq!(stats.cycles_failed, 1);

    plc.hang_reads(false);
    online(&ep, &mut status).await;

    ep.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn hung_read_is_bounded_by_the_timeout() {
    let plc = SimulatedController::new().with_tag("A", TagValue::Dint(5));
    let config = EndpointConfig {
        cycle_time: Duration::from_secs(1),
        timeout: Duration::from_millis(300),
        ..config()
    };
    let ep = endpoint_with(&plc, config, &["A"]);
    let mut status = ep.status_events();
    let mut changes = ep.changes();
    ep.connect().unwrap();
    online(&ep, &mut status).await;
    settle_first_cycle(&mut changes).await;

    plc.hang_reads(true);
    assert_eq!(next_status(&mut status).await, EndpointStatus::Offline);
    assert_eq!(ep.stats().cycles_skipped, 0);

    plc.hang_reads(false);
    ep.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn never_more_than_one_session() {
    let plc = SimulatedController::new().with_tag("A", TagValue::Dint(5));
    plc.set_latency(Duration::from_millis(50));
    let ep = endpoint(&plc, &["A"]);
    let mut status = ep.status_events();
    ep.connect().unwrap();
    online(&ep, &mut status).await;

    for _ in 0..5 {
        plc.end_sessions();
        assert_eq!(next_status(&mut status).await, EndpointStatus::Offline);
        ep.reconnect_now();
        ep.connect().unwrap();
        online(&ep, &mut status).await;
    }

    assert_eq!(plc.peak_sessions(), 1);
    ep.shutdown().await;
    assert_eq!(plc.live_sessions(), 0);
}

// ── Handler failures ────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn panicking_handlers_do_not_stop_scanning() {
    let plc = SimulatedController::new().with_tag("A", TagValue::Dint(5));
    let ep = endpoint(&plc, &["A"]);
    let mut status = ep.status_events();
    let mut changes = ep.changes();
    let _failing = ep.subscribe_change(|_| panic!("handler failure"));
    let (seen, sink) = recorder::<TagValue>();
    let _healthy = ep.subscribe_change(move |c| sink.lock().push(c.value.clone()));
    ep.connect().unwrap();
    online(&ep, &mut status).await;
    settle_first_cycle(&mut changes).await;

    ep.request_write_with("A", 7, |_| panic!("callback failure")).unwrap();
    match next_change(&mut changes).await {
        ChangeEvent::Tag(change) => assert_eq!(change.value, TagValue::Dint(7)),
        other => panic!("expected a tag change, got {other:?}"),
    }
    settle_first_cycle(&mut changes).await;

    let reads = plc.read_exchanges();
    let ticket = ep.request_write("A", 8).unwrap();
    let outcome = tokio::time::timeout(GUARD, ticket)
        .await
        .expect("write never completed");
    assert_eq!(outcome, Ok(()));
    match next_change(&mut changes).await {
        ChangeEvent::Tag(change) => assert_eq!(change.value, TagValue::Dint(8)),
        other => panic!("expected a tag change, got {other:?}"),
    }

    assert!(plc.read_exchanges() > reads);
    assert_eq!(ep.status(), ConnectionState::Online);
    assert_eq!(plc.connect_attempts(), 1);
    assert_eq!(
        *seen.lock(),
        vec![TagValue::Dint(5), TagValue::Dint(7), TagValue::Dint(8)]
    );

    ep.shutdown().await;
}

// ── Shutdown ────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn shutdown_is_idempotent_and_final() {
    let plc = SimulatedController::new().with_tag("A", TagValue::Dint(5));
    let ep = endpoint(&plc, &["A"]);
    let mut status = ep.status_events();
    ep.subscribe_change(|_| {}).detach();
    ep.connect().unwrap();
    online(&ep, &mut status).await;
    assert_eq!(ep.subscriber_count(), 1);

    tokio::join!(ep.shutdown(), ep.shutdown());
    ep.shutdown().await;

    assert_eq!(ep.status(), ConnectionState::Closing);
    assert_eq!(next_status(&mut status).await, EndpointStatus::Offline);
    assert_eq!(plc.live_sessions(), 0);
    assert_eq!(ep.subscriber_count(), 0);
    assert_eq!(ep.all_tag_values()["A"], None);

    let attempts = plc.connect_attempts();
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(plc.connect_attempts(), attempts);

    assert_eq!(ep.connect(), Err(CoreError::ShutdownInProgress));
    assert_eq!(
        ep.request_write("A", 1).unwrap_err(),
        CoreError::ShutdownInProgress
    );
}

#[tokio::test(start_paused = true)]
async fn shutdown_with_hung_write_resolves_disconnected() {
    let plc = SimulatedController::new().with_tag("A", TagValue::Dint(5));
    let ep = endpoint(&plc, &["A"]);
    let mut status = ep.status_events();
    let mut changes = ep.changes();
    ep.connect().unwrap();
    online(&ep, &mut status).await;
    settle_first_cycle(&mut changes).await;

    plc.hang_writes(true);
    let ticket = ep.request_write("A", 9).unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(ep.pending_writes(), 0);

    tokio::time::timeout(GUARD, ep.shutdown())
        .await
        .expect("shutdown waited on the hung exchange");

    assert_eq!(ticket.await, Err(CoreError::Disconnected));
    assert_eq!(ep.status(), ConnectionState::Closing);
    assert_eq!(next_status(&mut status).await, EndpointStatus::Offline);
    assert_eq!(plc.live_sessions(), 0);
    assert!(plc.write_log().is_empty());
}

#[tokio::test(start_paused = true)]
async fn shutdown_during_backoff_never_reconnects() {
    let plc = SimulatedController::new().with_tag("A", TagValue::Dint(5));
    plc.refuse_next_connects(1);
    let ep = endpoint(&plc, &["A"]);
    let mut status = ep.status_events();
    ep.connect().unwrap();

    assert_eq!(next_status(&mut status).await, EndpointStatus::Connecting);
    assert_eq!(next_status(&mut status).await, EndpointStatus::Offline);
    let queued = ep.request_write("A", 3).unwrap();

    ep.shutdown().await;
    assert_eq!(queued.await, Err(CoreError::ShutdownInProgress));

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(plc.connect_attempts(), 1);
    assert!(matches!(status.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test(start_paused = true)]
async fn shutdown_before_connect_is_clean() {
    let plc = SimulatedController::new();
    let ep = endpoint(&plc, &["A"]);
    ep.shutdown().await;
    assert_eq!(ep.status(), ConnectionState::Closing);
    assert_eq!(plc.connect_attempts(), 0);
}

// ── Tags and subscriptions ──────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn redefined_tags_are_scanned_on_the_next_cycle() {
    let plc = SimulatedController::new()
        .with_tag("A", TagValue::Dint(5))
        .with_tag("Main:Speed", TagValue::Real(1.5));
    let ep = endpoint(&plc, &["A"]);
    let mut changes = ep.changes();
    ep.connect().unwrap();
    settle_first_cycle(&mut changes).await;

    let report = ep.redefine_tags([
        TagDefinition::new(None, "A", None),
        TagDefinition::new(Some("Main"), "Speed", Some(DataType::Real)),
    ]);
    assert!(report.is_clean());

    let mut keys = Vec::new();
    while keys.len() < 2 {
        if let ChangeEvent::Tag(change) = next_change(&mut changes).await {
            keys.push(change.key.clone());
        }
    }
    assert_eq!(keys, vec!["A", "Main:Speed"]);

    ep.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn unsubscribed_handlers_are_not_called_again() {
    let plc = SimulatedController::new().with_tag("A", TagValue::Dint(5));
    let ep = endpoint(&plc, &["A"]);
    let (seen, sink) = recorder::<TagValue>();
    let sub = ep.subscribe_change(move |c| sink.lock().push(c.value.clone()));
    let mut changes = ep.changes();
    ep.connect().unwrap();
    settle_first_cycle(&mut changes).await;

    sub.unsubscribe();
    plc.set_tag("A", TagValue::Dint(6));
    settle_first_cycle(&mut changes).await;

    assert_eq!(*seen.lock(), vec![TagValue::Dint(5)]);
    assert_eq!(ep.subscriber_count(), 0);

    ep.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn read_modes_shape_messages_like_a_reading_node() {
    let plc = SimulatedController::new()
        .with_tag("A", TagValue::Dint(5))
        .with_tag("B", TagValue::Dint(6));
    let ep = endpoint(&plc, &["A", "B"]);

    let (single, sink) = recorder();
    let _single = ep
        .subscribe_read(ReadMode::Single("B".into()), move |m| sink.lock().push(m.clone()))
        .unwrap();
    let (split, sink) = recorder();
    let _split = ep
        .subscribe_read(ReadMode::AllSplit, move |m| sink.lock().push(m.clone()))
        .unwrap();
    let (all, sink) = recorder();
    let _all = ep
        .subscribe_read(ReadMode::All, move |m| sink.lock().push(m.clone()))
        .unwrap();
    assert!(matches!(
        ep.subscribe_read(ReadMode::Single("Nope".into()), |_| {}),
        Err(CoreError::UnknownTag { .. })
    ));

    let mut changes = ep.changes();
    ep.connect().unwrap();
    settle_first_cycle(&mut changes).await;

    let single = single.lock();
    assert_eq!(single.len(), 1);
    assert_eq!(single[0].topic, "B");
    assert_eq!(single[0].payload, ReadPayload::Value(TagValue::Dint(6)));

    assert_eq!(split.lock().len(), 2);

    let all = all.lock();
    assert_eq!(all.len(), 1);
    match &all[0].payload {
        ReadPayload::All(values) => assert_eq!(values.len(), 2),
        other @ ReadPayload::Value(_) => panic!("expected all values, got {other:?}"),
    }
    drop(single);
    drop(all);

    ep.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn change_stream_yields_events() {
    use futures_util::StreamExt;

    let plc = SimulatedController::new().with_tag("A", TagValue::Dint(5));
    let ep = endpoint(&plc, &["A"]);
    let mut stream = ep.change_stream();
    ep.connect().unwrap();

    let first = tokio::time::timeout(GUARD, stream.next()).await.unwrap().unwrap();
    assert!(matches!(first, ChangeEvent::Tag(_)));

    ep.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn endpoints_are_independent() {
    let healthy = SimulatedController::new().with_tag("A", TagValue::Dint(1));
    let broken = SimulatedController::new().with_tag("A", TagValue::Dint(2));
    broken.refuse_next_connects(u32::MAX);

    let good = endpoint(&healthy, &["A"]);
    let bad = endpoint(&broken, &["A"]);
    let mut good_status = good.status_events();
    good.connect().unwrap();
    bad.connect().unwrap();

    online(&good, &mut good_status).await;
    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(good.status(), ConnectionState::Online);
    assert_ne!(bad.status(), ConnectionState::Online);
    assert!(broken.connect_attempts() >= 3);

    tokio::join!(good.shutdown(), bad.shutdown());
}
