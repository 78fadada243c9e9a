//! Failure scenario tests
//!
//! These tests verify that:
//! - Malformed messages are dropped and counted, never crash the pipeline
//! - Unknown machines are rejected until they are registered
//! - Storage failures and timeouts drop the message but not the pipeline
//! - Failing notification sinks never affect alert state

use std::sync::Arc;

use async_trait::async_trait;
use coffee_monitoring::{
    notify::{NotificationEvent, NotificationSink},
    pipeline::Pipeline,
    storage::{MachineInfo, MemoryBackend, StorageBackend},
};
use pretty_assertions::assert_eq;

use crate::helpers::{
    FlakyBackend, RecordingSink, open_alerts, publish_all, snapshot, spawn_with_backend,
    test_config,
};

#[tokio::test]
async fn test_malformed_messages_are_dropped() {
    let test = spawn_with_backend(test_config(&[1], 2), Arc::new(MemoryBackend::new())).await;

    publish_all(
        &test.handle,
        &[
            ("coffeeMachine/abc/temperature", "92.5"),
            ("coffeeMachine/1", "92.5"),
            ("teaMachine/1/temperature", "92.5"),
            ("coffeeMachine/1/pressure", "9"),
            ("coffeeMachine/1/temperature", "151"),
            ("coffeeMachine/1/temperature", "hot"),
            ("coffeeMachine/1/waterLevel", "-1"),
            ("coffeeMachine/1/status", "BROKEN"),
            ("coffeeMachine/1/usage", "ESPRESSO:30:92:extra"),
            ("coffeeMachine/1/temperature", "{not json"),
            ("coffeeMachine/1/temperature", "92.5"),
        ],
    )
    .await;

    let stats = test.handle.stats().await.unwrap();
    assert_eq!(stats.ingest.received, 11);
    assert_eq!(stats.ingest.malformed_topic, 4);
    assert_eq!(stats.ingest.unparseable_payload, 6);
    assert_eq!(stats.ingest.applied, 1);

    // only the valid message touched the snapshot
    let state = snapshot(test.backend.as_ref(), 1).await;
    assert_eq!(state.temperature_c, Some(92.5));
    assert_eq!(state.water_level_pct, None);

    test.pipeline.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unknown_machine_until_registered() {
    let test = spawn_with_backend(test_config(&[1], 2), Arc::new(MemoryBackend::new())).await;

    publish_all(&test.handle, &[("coffeeMachine/99/waterLevel", "10")]).await;

    let stats = test.handle.stats().await.unwrap();
    assert_eq!(stats.ingest.unknown_machine, 1);
    assert!(test.backend.get_machine(99).await.unwrap().is_none());
    assert!(test.sink.opened().is_empty());

    test.backend
        .register_machine(MachineInfo {
            id: 99,
            name: "Late arrival".to_string(),
            location: Some("Basement".to_string()),
        })
        .await
        .unwrap();

    publish_all(&test.handle, &[("coffeeMachine/99/waterLevel", "10")]).await;
    assert_eq!(snapshot(test.backend.as_ref(), 99).await.water_level_pct, Some(10));
    assert_eq!(open_alerts(test.backend.as_ref(), 99).await.len(), 1);

    test.pipeline.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_storage_failure_drops_message() {
    let backend = Arc::new(FlakyBackend::default());
    let test = spawn_with_backend(test_config(&[1], 2), backend.clone()).await;

    publish_all(&test.handle, &[("coffeeMachine/1/waterLevel", "50")]).await;

    backend.fail_writes();
    publish_all(&test.handle, &[("coffeeMachine/1/waterLevel", "10")]).await;

    let stats = test.handle.stats().await.unwrap();
    assert_eq!(stats.ingest.downstream_unavailable, 1);
    assert_eq!(snapshot(backend.as_ref(), 1).await.water_level_pct, Some(50));
    assert!(test.sink.opened().is_empty());

    backend.heal();
    publish_all(&test.handle, &[("coffeeMachine/1/waterLevel", "5")]).await;

    assert_eq!(snapshot(backend.as_ref(), 1).await.water_level_pct, Some(5));
    assert_eq!(test.sink.opened().len(), 1);

    test.pipeline.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_storage_timeout_drops_message() {
    let backend = Arc::new(FlakyBackend::default());
    let test = spawn_with_backend(test_config(&[1, 2], 2), backend.clone()).await;

    backend.hang_writes();
    publish_all(&test.handle, &[("coffeeMachine/1/temperature", "92.0")]).await;

    let stats = test.handle.stats().await.unwrap();
    assert_eq!(stats.ingest.downstream_unavailable, 1);
    assert!(snapshot_missing(backend.as_ref(), 1).await);

    backend.heal();
    publish_all(
        &test.handle,
        &[
            ("coffeeMachine/1/temperature", "93.0"),
            ("coffeeMachine/2/temperature", "94.0"),
        ],
    )
    .await;

    assert_eq!(snapshot(backend.as_ref(), 1).await.temperature_c, Some(93.0));
    assert_eq!(snapshot(backend.as_ref(), 2).await.temperature_c, Some(94.0));

    test.pipeline.shutdown().await.unwrap();
}

async fn snapshot_missing(backend: &dyn StorageBackend, machine_id: u64) -> bool {
    backend
        .get_machine(machine_id)
        .await
        .unwrap()
        .is_some_and(|record| record.state.is_none())
}

struct BrokenSink;

#[async_trait]
impl NotificationSink for BrokenSink {
    fn name(&self) -> &str {
        "broken"
    }

    async fn deliver(&self, _event: &NotificationEvent) -> anyhow::Result<()> {
        anyhow::bail!("503 Service Unavailable")
    }
}

#[tokio::test]
async fn test_failing_sink_does_not_affect_alerts() {
    let config = test_config(&[1], 1);
    let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
    coffee_monitoring::pipeline::seed_registry(backend.as_ref(), &config.machines)
        .await
        .unwrap();

    let recording = RecordingSink::default();
    let pipeline = Pipeline::spawn(
        &config,
        backend.clone(),
        vec![Box::new(BrokenSink), Box::new(recording.clone())],
    );
    let handle = pipeline.handle();

    publish_all(
        &handle,
        &[
            ("coffeeMachine/1/milkLevel", "5"),
            ("coffeeMachine/1/milkLevel", "80"),
        ],
    )
    .await;

    let alerts = backend
        .query_alerts(coffee_monitoring::storage::AlertQuery::default())
        .await
        .unwrap();
    assert_eq!(alerts.len(), 1);
    assert!(alerts[0].resolved);

    assert_eq!(recording.events().len(), 2);
    let stats = handle.stats().await.unwrap();
    assert_eq!(stats.notifications.failed, 2);
    assert_eq!(stats.notifications.delivered, 2);

    pipeline.shutdown().await.unwrap();
}
