//! End-to-end scenarios: raw message in, snapshot / alerts / notifications out

use assert_matches::assert_matches;
use coffee_monitoring::{
    AlertType, BrewType, MachineStatus, Severity,
    actors::messages::PipelineEvent,
    config::ThresholdOverrides,
    storage::MemoryBackend,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;

use crate::helpers::{
    open_alerts, publish_all, snapshot, spawn_pipeline, spawn_with_backend, test_config,
};

#[tokio::test]
async fn test_temperature_touches_only_temperature() {
    let test = spawn_pipeline(&[42]).await;

    publish_all(&test.handle, &[("coffeeMachine/42/temperature", "92.5")]).await;

    let state = snapshot(test.backend.as_ref(), 42).await;
    assert_eq!(state.temperature_c, Some(92.5));
    assert_eq!(state.water_level_pct, None);
    assert_eq!(state.milk_level_pct, None);
    assert_eq!(state.beans_level_pct, None);
    assert_eq!(state.status, MachineStatus::Off);

    test.pipeline.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_structured_and_scalar_payloads() {
    let test = spawn_pipeline(&[1]).await;

    publish_all(
        &test.handle,
        &[
            ("coffeeMachine/1/waterLevel", r#"{"level": 85}"#),
            ("coffeeMachine/1/milkLevel", "60"),
            ("coffeeMachine/1/beansLevel", r#"{"level": "70"}"#),
            ("coffeeMachine/1/status", r#"{"status": "ON"}"#),
        ],
    )
    .await;

    let state = snapshot(test.backend.as_ref(), 1).await;
    assert_eq!(state.water_level_pct, Some(85));
    assert_eq!(state.milk_level_pct, Some(60));
    assert_eq!(state.beans_level_pct, Some(70));
    assert_eq!(state.status, MachineStatus::On);

    let stats = test.handle.stats().await.unwrap();
    assert_eq!(stats.ingest.received, 4);
    assert_eq!(stats.ingest.applied, 4);
    assert_eq!(stats.ingest.dropped(), 0);

    test.pipeline.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_low_water_opens_once_and_auto_resolves() {
    let test = spawn_pipeline(&[7]).await;

    publish_all(
        &test.handle,
        &[
            ("coffeeMachine/7/waterLevel", "25"),
            ("coffeeMachine/7/waterLevel", "15"),
        ],
    )
    .await;

    let open = open_alerts(test.backend.as_ref(), 7).await;
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].alert_type, AlertType::LowWater);
    assert_eq!(open[0].severity, Severity::Warning);
    assert_eq!(open[0].message, "Water level is low: 15% (threshold: 20%)");

    publish_all(&test.handle, &[("coffeeMachine/7/waterLevel", "14")]).await;
    assert_eq!(open_alerts(test.backend.as_ref(), 7).await.len(), 1);
    assert_eq!(test.sink.opened().len(), 1);

    publish_all(&test.handle, &[("coffeeMachine/7/waterLevel", "30")]).await;
    assert!(open_alerts(test.backend.as_ref(), 7).await.is_empty());

    let resolved = test.sink.resolved();
    assert_eq!(resolved.len(), 1);
    assert_eq!(resolved[0].id, open[0].id);
    assert!(resolved[0].resolved);

    let stats = test.handle.stats().await.unwrap();
    assert_eq!(stats.ingest.alerts_opened, 1);
    assert_eq!(stats.ingest.alerts_suppressed, 1);
    assert_eq!(stats.ingest.alerts_resolved, 1);

    test.pipeline.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_new_breach_after_resolution_opens_new_alert() {
    let test = spawn_pipeline(&[7]).await;

    publish_all(
        &test.handle,
        &[
            ("coffeeMachine/7/beansLevel", "10"),
            ("coffeeMachine/7/beansLevel", "50"),
            ("coffeeMachine/7/beansLevel", "5"),
        ],
    )
    .await;

    let opened = test.sink.opened();
    assert_eq!(opened.len(), 2);
    assert_ne!(opened[0].id, opened[1].id);
    assert_eq!(open_alerts(test.backend.as_ref(), 7).await.len(), 1);

    test.pipeline.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_temperature_malfunction_requires_operator() {
    let test = spawn_pipeline(&[3]).await;

    publish_all(
        &test.handle,
        &[
            ("coffeeMachine/3/temperature", "92.0"),
            ("coffeeMachine/3/temperature", "105.0"),
            ("coffeeMachine/3/temperature", "90.0"),
        ],
    )
    .await;

    let open = open_alerts(test.backend.as_ref(), 3).await;
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].alert_type, AlertType::Malfunction);
    assert_eq!(open[0].message, "Temperature too high: 105.0°C (max: 100.0°C)");

    let resolved = test.handle.resolve_alert(open[0].id).await.unwrap();
    assert_matches!(resolved, Some(ref alert) if alert.resolved);
    assert!(open_alerts(test.backend.as_ref(), 3).await.is_empty());

    // resolving twice is a no-op
    assert_eq!(test.handle.resolve_alert(open[0].id).await.unwrap(), None);

    test.handle.flush().await.unwrap();
    assert_eq!(test.sink.resolved().len(), 1);

    test.pipeline.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_error_status_stays_open_after_recovery() {
    let test = spawn_pipeline(&[5]).await;

    publish_all(
        &test.handle,
        &[
            ("coffeeMachine/5/status", "ON"),
            ("coffeeMachine/5/status", "ERROR"),
            ("coffeeMachine/5/status", "ON"),
        ],
    )
    .await;

    let open = open_alerts(test.backend.as_ref(), 5).await;
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].severity, Severity::Critical);
    assert_eq!(open[0].message, "Machine is in ERROR state (was: ON)");
    assert_eq!(snapshot(test.backend.as_ref(), 5).await.status, MachineStatus::On);

    let resolved = test
        .handle
        .resolve_alerts(5, AlertType::Malfunction)
        .await
        .unwrap();
    assert_eq!(resolved.len(), 1);
    assert!(open_alerts(test.backend.as_ref(), 5).await.is_empty());

    test.pipeline.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_usage_event_recorded() {
    let test = spawn_pipeline(&[9]).await;

    publish_all(
        &test.handle,
        &[(
            "coffeeMachine/9/usage",
            r#"{"brewType":"ESPRESSO","volumeMl":30,"tempAtBrew":92.0}"#,
        )],
    )
    .await;

    let usage = test.backend.query_usage(9, 10).await.unwrap();
    assert_eq!(usage.len(), 1);
    assert_eq!(usage[0].brew_type, BrewType::Espresso);
    assert_eq!(usage[0].volume_ml, Some(30));
    assert_eq!(usage[0].temp_at_brew_c, Some(92.0));

    // brews leave the snapshot alone
    let record = test.backend.get_machine(9).await.unwrap().unwrap();
    assert!(record.state.is_none());

    test.pipeline.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_older_reading_is_ignored() {
    let test = spawn_pipeline(&[2]).await;

    publish_all(
        &test.handle,
        &[
            (
                "coffeeMachine/2/milkLevel",
                r#"{"level": 40, "timestamp": "2025-03-01T10:00:05Z"}"#,
            ),
            (
                "coffeeMachine/2/milkLevel",
                r#"{"level": 90, "timestamp": "2025-03-01T10:00:00Z"}"#,
            ),
            (
                "coffeeMachine/2/waterLevel",
                r#"{"level": 90, "timestamp": "2025-03-01T10:00:00Z"}"#,
            ),
        ],
    )
    .await;

    let state = snapshot(test.backend.as_ref(), 2).await;
    assert_eq!(state.milk_level_pct, Some(40));
    // other fields keep their own clock
    assert_eq!(state.water_level_pct, Some(90));

    let stats = test.handle.stats().await.unwrap();
    assert_eq!(stats.ingest.stale, 1);

    test.pipeline.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_per_machine_threshold_override() {
    let mut config = test_config(&[1, 2], 2);
    config.machines[0].thresholds = Some(ThresholdOverrides {
        low_milk: Some(50),
        ..ThresholdOverrides::default()
    });
    let test = spawn_with_backend(config, Arc::new(MemoryBackend::new())).await;

    publish_all(
        &test.handle,
        &[
            ("coffeeMachine/1/milkLevel", "40"),
            ("coffeeMachine/2/milkLevel", "40"),
        ],
    )
    .await;

    assert_eq!(open_alerts(test.backend.as_ref(), 1).await.len(), 1);
    assert!(open_alerts(test.backend.as_ref(), 2).await.is_empty());
    assert_eq!(test.handle.thresholds_for(1).low_milk, 50);

    test.pipeline.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_subscribers_see_changes() {
    let test = spawn_pipeline(&[4]).await;
    let mut events = test.handle.subscribe();

    publish_all(&test.handle, &[("coffeeMachine/4/waterLevel", "10")]).await;

    assert_matches!(
        events.recv().await.unwrap(),
        PipelineEvent::StateChanged(state) if state.water_level_pct == Some(10)
    );
    assert_matches!(
        events.recv().await.unwrap(),
        PipelineEvent::AlertOpened(alert) if alert.alert_type == AlertType::LowWater
    );

    test.pipeline.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_processes_queued_messages() {
    let test = spawn_pipeline(&[6]).await;

    for level in 50..60 {
        test.handle
            .publish("coffeeMachine/6/waterLevel", level.to_string())
            .await
            .unwrap();
    }

    let backend = test.backend.clone();
    test.pipeline.shutdown().await.unwrap();

    assert_eq!(snapshot(backend.as_ref(), 6).await.water_level_pct, Some(59));
    assert!(test.handle.publish("coffeeMachine/6/waterLevel", "10").await.is_err());
}
