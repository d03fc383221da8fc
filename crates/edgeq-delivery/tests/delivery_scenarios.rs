mod common;

use common::*;
use edgeq_delivery::{CancellationToken, CycleOutcome, RetentionConfig, RetentionReaper};
use edgeq_store::{Database, DeliveryState, ManualClock};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn offline_appends_stay_pending() {
    let store = Arc::new(Database::open_in_memory().unwrap());
    let transport = ScriptedTransport::offline();
    let connection = connection(transport.clone());
    let engine = engine(Arc::clone(&store), Arc::clone(&connection));

    let ids = append_numbered(&store, "T", 10);
    assert!(connection.connect().await.is_err());

    let report = engine.run_cycle().await.unwrap();
    assert_eq!(report.outcome, CycleOutcome::NotConnected);
    assert!(report.delivered.is_empty());

    let pending = store.list_pending().unwrap();
    assert_eq!(pending.iter().map(|m| m.id).collect::<Vec<_>>(), ids);
    assert!(pending.iter().all(|m| m.state == DeliveryState::Pending));
    assert_eq!(transport.publish_calls(), 0);
}

#[tokio::test]
async fn reconnect_drains_backlog_in_order() {
    let store = Arc::new(Database::open_in_memory().unwrap());
    let transport = ScriptedTransport::offline();
    let connection = connection(transport.clone());
    let engine = engine(Arc::clone(&store), Arc::clone(&connection));

    let ids = append_numbered(&store, "T", 10);
    assert!(connection.connect().await.is_err());

    transport.set_reachable(true);
    connection.connect().await.unwrap();

    let report = engine.run_cycle().await.unwrap();
    assert_eq!(report.outcome, CycleOutcome::Drained);
    assert_eq!(report.delivered, ids);

    assert_eq!(transport.payloads(), numbered(0..10));
    assert!(transport.published().iter().all(|(topic, _)| topic == "T"));
    assert!(store.list_pending().unwrap().is_empty());
    assert!(store
        .all_messages()
        .unwrap()
        .iter()
        .all(|m| m.state == DeliveryState::Delivered));
}

#[tokio::test]
async fn failed_publish_halts_cycle_and_resumes_at_same_record() {
    let store = Arc::new(Database::open_in_memory().unwrap());
    let transport = ScriptedTransport::new();
    transport.fault_on_publish(4, PublishFault::AckTimeout);
    let connection = connection(transport.clone());
    let engine = engine(Arc::clone(&store), Arc::clone(&connection));

    let ids = append_numbered(&store, "T", 10);
    connection.connect().await.unwrap();

    let first = engine.run_cycle().await.unwrap();
    assert_eq!(first.delivered, ids[..3].to_vec());
    match &first.outcome {
        CycleOutcome::Halted { id, reason } => {
            assert_eq!(*id, ids[3]);
            assert!(reason.contains("acknowledgment"), "{reason}");
        }
        other => panic!("expected halt, got {other:?}"),
    }
    assert_eq!(pending_ids(&store), ids[3..].to_vec());
    // Nothing past the failed record was attempted.
    assert_eq!(transport.publish_calls(), 4);

    let second = engine.run_cycle().await.unwrap();
    assert_eq!(second.outcome, CycleOutcome::Drained);
    assert_eq!(second.delivered, ids[3..].to_vec());

    // Each payload reached the broker exactly once, in order.
    assert_eq!(transport.payloads(), numbered(0..10));
    assert!(store.list_pending().unwrap().is_empty());
}

#[tokio::test]
async fn retention_purges_undelivered_record() {
    let clock = Arc::new(ManualClock::starting_now());
    let store = Arc::new(Database::open_in_memory_with_clock(clock.clone()).unwrap());
    let transport = ScriptedTransport::offline();
    let connection = connection(transport.clone());
    let reaper = RetentionReaper::new(
        Arc::clone(&store),
        RetentionConfig {
            window: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(10),
        },
    );

    let id = store.append("T", b"expiring").unwrap();
    assert!(connection.connect().await.is_err());

    clock.advance(chrono::Duration::seconds(61));
    assert_eq!(reaper.sweep().unwrap(), 1);

    assert!(store.get(id).unwrap().is_none());
    assert!(store.all_messages().unwrap().is_empty());
    assert!(transport.published().is_empty());
}

#[tokio::test(start_paused = true)]
async fn hung_publish_times_out_and_halts() {
    let store = Arc::new(Database::open_in_memory().unwrap());
    let transport = ScriptedTransport::new();
    transport.fault_on_publish(2, PublishFault::Hang);
    let connection = connection(transport.clone());
    let engine = engine(Arc::clone(&store), Arc::clone(&connection));

    let ids = append_numbered(&store, "T", 3);
    connection.connect().await.unwrap();

    let started = tokio::time::Instant::now();
    let report = engine.run_cycle().await.unwrap();

    assert_eq!(report.delivered, vec![ids[0]]);
    assert!(matches!(report.outcome, CycleOutcome::Halted { id, .. } if id == ids[1]));
    assert!(started.elapsed() >= delivery_config().ack_timeout);
    assert_eq!(pending_ids(&store), ids[1..].to_vec());
}

#[tokio::test]
async fn link_drop_mid_cycle_leaves_record_pending() {
    let store = Arc::new(Database::open_in_memory().unwrap());
    let transport = ScriptedTransport::new();
    transport.fault_on_publish(3, PublishFault::DropConnection);
    let connection = connection(transport.clone());
    let engine = engine(Arc::clone(&store), Arc::clone(&connection));

    let ids = append_numbered(&store, "T", 5);
    connection.connect().await.unwrap();

    let report = engine.run_cycle().await.unwrap();
    assert_eq!(report.delivered, ids[..2].to_vec());
    assert!(matches!(report.outcome, CycleOutcome::Halted { id, .. } if id == ids[2]));
    assert_eq!(pending_ids(&store), ids[2..].to_vec());
}

#[tokio::test(start_paused = true)]
async fn connectivity_loss_halts_a_waiting_publish() {
    let store = Arc::new(Database::open_in_memory().unwrap());
    let transport = ScriptedTransport::new();
    transport.fault_on_publish(1, PublishFault::Hang);
    let connection = connection(transport.clone());
    let engine = Arc::new(engine(Arc::clone(&store), Arc::clone(&connection)));
    let ids = append_numbered(&store, "T", 2);

    let cancel = CancellationToken::new();
    let link = tokio::spawn({
        let connection = Arc::clone(&connection);
        let cancel = cancel.clone();
        async move { connection.run(cancel).await }
    });
    wait_until(|| connection.is_connected()).await;

    let started = tokio::time::Instant::now();
    let cycle = tokio::spawn({
        let engine = Arc::clone(&engine);
        async move { engine.run_cycle().await }
    });
    wait_until(|| transport.publish_calls() == 1).await;
    transport.drop_connection("keepalive timeout");

    let report = cycle.await.unwrap().unwrap();
    assert!(started.elapsed() < delivery_config().ack_timeout / 2);
    assert!(report.delivered.is_empty());
    assert!(matches!(report.outcome, CycleOutcome::Halted { id, .. } if id == ids[0]));
    assert_eq!(pending_ids(&store), ids);
    assert_eq!(transport.publish_calls(), 1);

    cancel.cancel();
    link.await.unwrap();
}

#[tokio::test]
async fn record_purged_in_flight_is_skipped() {
    let clock = Arc::new(ManualClock::starting_now());
    let store = Arc::new(Database::open_in_memory_with_clock(clock.clone()).unwrap());
    let transport = ScriptedTransport::new();
    let connection = connection(transport.clone());
    let engine = engine(Arc::clone(&store), Arc::clone(&connection));

    let id = store.append("T", b"doomed").unwrap();
    connection.connect().await.unwrap();

    // The reaper wins the race while the acknowledgment is on its way back.
    transport.before_ack({
        let store = Arc::clone(&store);
        move || {
            let cutoff = store.now() + chrono::Duration::seconds(1);
            store.purge_older_than(cutoff).unwrap();
        }
    });

    let report = engine.run_cycle().await.unwrap();
    assert!(report.delivered.is_empty());
    assert_eq!(report.outcome, CycleOutcome::Drained);
    assert!(store.get(id).unwrap().is_none());
    assert_eq!(transport.payloads(), vec!["doomed".to_string()]);
}

#[tokio::test]
async fn only_acknowledged_records_are_marked_delivered() {
    let store = Arc::new(Database::open_in_memory().unwrap());
    let transport = ScriptedTransport::new();
    transport.fault_on_publish(1, PublishFault::AckTimeout);
    transport.fault_on_publish(3, PublishFault::AckTimeout);
    let connection = connection(transport.clone());
    let engine = engine(Arc::clone(&store), Arc::clone(&connection));

    append_numbered(&store, "T", 4);
    connection.connect().await.unwrap();

    for _ in 0..4 {
        engine.run_cycle().await.unwrap();
    }

    let acknowledged = transport.payloads();
    for message in store.all_messages().unwrap() {
        let text = String::from_utf8(message.payload.clone()).unwrap();
        if message.state == DeliveryState::Delivered {
            assert!(acknowledged.contains(&text), "{text} delivered without ack");
        }
    }
    assert_eq!(acknowledged, numbered(0..4));
}

#[tokio::test]
async fn delivery_resumes_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("queue.db");
    let transport = ScriptedTransport::new();
    transport.fault_on_publish(3, PublishFault::AckTimeout);

    let ids = {
        let store = Arc::new(Database::open(&path).unwrap());
        let connection = connection(transport.clone());
        let engine = engine(Arc::clone(&store), Arc::clone(&connection));

        let ids = append_numbered(&store, "T", 5);
        connection.connect().await.unwrap();
        engine.run_cycle().await.unwrap();
        ids
    };

    let store = Arc::new(Database::open(&path).unwrap());
    assert_eq!(pending_ids(&store), ids[2..].to_vec());

    let connection = connection(transport.clone());
    let engine = engine(Arc::clone(&store), Arc::clone(&connection));
    connection.connect().await.unwrap();
    let report = engine.run_cycle().await.unwrap();

    assert_eq!(report.delivered, ids[2..].to_vec());
    assert_eq!(transport.payloads(), numbered(0..5));
}
