//! Persistence across restarts with the SQLite backend
//!
//! These tests verify that:
//! - Snapshots, field clocks and open alerts survive a restart
//! - An alert left open before a restart is reused, not duplicated
//! - The uniqueness of open alerts is enforced by the database itself

use std::sync::Arc;

use coffee_monitoring::{
    AlertType, Severity,
    storage::{NewAlert, OpenAlertResult, StorageBackend, sqlite::SqliteBackend},
};
use futures::future::join_all;
use pretty_assertions::assert_eq;
use tempfile::tempdir;

use crate::helpers::{open_alerts, publish_all, snapshot, spawn_with_backend, test_config};

#[tokio::test]
async fn test_state_and_alerts_survive_restart() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("brewwatch.db");

    let first_alert = {
        let backend = Arc::new(SqliteBackend::new(&db_path).await.unwrap());
        let test = spawn_with_backend(test_config(&[1], 2), backend).await;

        publish_all(
            &test.handle,
            &[
                ("coffeeMachine/1/status", "ON"),
                (
                    "coffeeMachine/1/waterLevel",
                    r#"{"level": 10, "timestamp": "2025-03-01T10:00:00Z"}"#,
                ),
            ],
        )
        .await;

        let open = open_alerts(test.backend.as_ref(), 1).await;
        assert_eq!(open.len(), 1);
        test.pipeline.shutdown().await.unwrap();
        open[0].clone()
    };

    let backend = Arc::new(SqliteBackend::new(&db_path).await.unwrap());
    let test = spawn_with_backend(test_config(&[1], 2), backend).await;

    let state = snapshot(test.backend.as_ref(), 1).await;
    assert_eq!(state.water_level_pct, Some(10));
    assert_eq!(
        state.status,
        coffee_monitoring::MachineStatus::On
    );

    publish_all(
        &test.handle,
        &[
            // older than what was applied before the restart
            (
                "coffeeMachine/1/waterLevel",
                r#"{"level": 80, "timestamp": "2025-03-01T09:00:00Z"}"#,
            ),
            (
                "coffeeMachine/1/waterLevel",
                r#"{"level": 5, "timestamp": "2025-03-01T10:05:00Z"}"#,
            ),
        ],
    )
    .await;

    let stats = test.handle.stats().await.unwrap();
    assert_eq!(stats.ingest.stale, 1);
    assert_eq!(snapshot(test.backend.as_ref(), 1).await.water_level_pct, Some(5));

    let open = open_alerts(test.backend.as_ref(), 1).await;
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].id, first_alert.id);
    assert!(test.sink.opened().is_empty());

    publish_all(
        &test.handle,
        &[(
            "coffeeMachine/1/waterLevel",
            r#"{"level": 50, "timestamp": "2025-03-01T10:10:00Z"}"#,
        )],
    )
    .await;

    let resolved = test.sink.resolved();
    assert_eq!(resolved.len(), 1);
    assert_eq!(resolved[0].id, first_alert.id);

    test.pipeline.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_database_enforces_single_open_alert() {
    let dir = tempdir().unwrap();
    let backend = Arc::new(SqliteBackend::new(dir.path().join("alerts.db")).await.unwrap());
    coffee_monitoring::pipeline::seed_registry(backend.as_ref(), &test_config(&[1], 1).machines)
        .await
        .unwrap();

    let attempts = (0..10).map(|_| {
        let backend = backend.clone();
        tokio::spawn(async move {
            backend
                .open_alert(NewAlert {
                    machine_id: 1,
                    alert_type: AlertType::LowBeans,
                    severity: Severity::Warning,
                    message: "Beans level is low: 5% (threshold: 20%)".to_string(),
                    threshold_value: 20.0,
                })
                .await
                .unwrap()
        })
    });

    let results: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|result| result.unwrap())
        .collect();

    let opened = results
        .iter()
        .filter(|result| matches!(result, OpenAlertResult::Opened(_)))
        .count();
    assert_eq!(opened, 1);
    assert_eq!(open_alerts(backend.as_ref(), 1).await.len(), 1);

    backend.close().await.unwrap();
}
