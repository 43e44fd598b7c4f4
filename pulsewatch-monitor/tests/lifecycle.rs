//! End-to-end lifecycle of a subject through the public monitor API:
//! bus message -> ingest -> scan -> alert -> recovery -> resolved.

use async_trait::async_trait;
use parking_lot::Mutex;
use pulsewatch_devkit::{init_test_tracing, HeartbeatPayloads, TestHarness};
use pulsewatch_monitor::notifier::{DispatchConfig, Dispatcher};
use pulsewatch_monitor::{
    Event, IngestHandler, IngestOutcome, MissDetector, Notifier, NotifyError, StateStore, StatusSnapshotter,
};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;

#[derive(Default)]
struct Recorder {
    alerts: Mutex<Vec<Event>>,
    resolved: Mutex<Vec<Event>>,
}

#[async_trait]
impl Notifier for Recorder {
    async fn alert(&self, event: &Event) -> Result<(), NotifyError> {
        self.alerts.lock().push(event.clone());
        Ok(())
    }

    async fn resolved(&self, event: &Event) -> Result<(), NotifyError> {
        self.resolved.lock().push(event.clone());
        Ok(())
    }
}

#[tokio::test]
async fn test_subject_goes_missing_and_recovers() {
    let harness = TestHarness::new("heartbeat");
    let mut bus = harness.mqtt_client.setup_receiver();

    let recorder = Arc::new(Recorder::default());
    let (dispatcher, worker) = Dispatcher::spawn(recorder.clone(), DispatchConfig::default());
    let store = StateStore::new();
    let ingest = IngestHandler::new(store.clone(), dispatcher.clone());
    let detector = MissDetector::new(store.clone(), Duration::from_secs(3600));

    // first beat, 10 seconds old
    let start = OffsetDateTime::now_utc() - time::Duration::seconds(10);
    let beat = HeartbeatPayloads::heartbeat_full("backup", 2, 4, "Nightly backup", "nas", start);
    harness
        .mqtt_client
        .simulate_incoming(harness.topic("backup"), HeartbeatPayloads::bytes(&beat), true)
        .await
        .unwrap();
    let msg = bus.recv().await.unwrap();
    assert_eq!(ingest.handle_payload(&msg.topic, &msg.payload), IngestOutcome::Created);

    // silent past the grace period
    let now = OffsetDateTime::now_utc();
    let outcome = detector.scan(now);
    assert_eq!(outcome.alerts.len(), 1);
    assert_eq!(outcome.alerts[0].description, "Nightly backup");
    assert!(outcome.alerts[0].miss_count >= 5);
    dispatcher.dispatch_scan(outcome);

    // debounced
    assert!(detector.scan(now + time::Duration::seconds(1)).is_empty());

    let status = StatusSnapshotter::new(store.clone()).snapshot(now);
    assert!(status.subjects[0].missing);
    assert!(status.subjects[0].alert_active);

    // recovery through the bus
    harness.send_heartbeat("backup", 2).await.unwrap();
    let msg = bus.recv().await.unwrap();
    assert_eq!(ingest.handle_payload(&msg.topic, &msg.payload), IngestOutcome::Resolved);
    assert!(!store.get("backup").unwrap().alert_active);

    drop(ingest);
    drop(dispatcher);
    worker.await.unwrap();

    assert_eq!(recorder.alerts.lock().len(), 1);
    let resolved = recorder.resolved.lock();
    assert_eq!(resolved.len(), 1);
    assert_eq!(resolved[0].subject, "backup");
}

#[tokio::test]
async fn test_garbage_on_the_bus_is_ignored() {
    init_test_tracing();
    let (dispatcher, _rx) = Dispatcher::channel(4);
    let store = StateStore::new();
    let ingest = IngestHandler::new(store.clone(), dispatcher);

    let missing = HeartbeatPayloads::missing_subject(OffsetDateTime::now_utc());
    assert_eq!(
        ingest.handle_payload("heartbeat/x", &HeartbeatPayloads::bytes(&missing)),
        IngestOutcome::Rejected
    );
    assert_eq!(ingest.handle_payload("heartbeat/x", b"\xff\xfe"), IngestOutcome::Rejected);
    assert!(store.is_empty());
}
