//! Concurrency tests
//!
//! These tests verify that:
//! - Concurrent breaches for one machine never produce two open alerts
//! - Machines on different workers progress independently
//! - Per-machine ordering holds while many publishers run in parallel
//! - An operator resolve waiting on a busy shard does not hold up the others

use std::sync::Arc;
use std::time::Duration;

use coffee_monitoring::{AlertType, actors::messages::PipelineEvent, storage::MemoryBackend};
use futures::future::join_all;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{Instant, timeout};

use crate::helpers::{
    FlakyBackend, SLOW_SAVE, open_alerts, snapshot, spawn_pipeline, spawn_with_backend,
    test_config,
};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_breaches_open_one_alert() {
    let test = spawn_pipeline(&[1]).await;

    let publishers = (0..16).map(|i| {
        let handle = test.handle.clone();
        tokio::spawn(async move {
            for level in 0..10u8 {
                let payload = ((i + level) % 15).to_string();
                handle
                    .publish("coffeeMachine/1/waterLevel", payload)
                    .await
                    .unwrap();
            }
        })
    });
    for result in join_all(publishers).await {
        result.unwrap();
    }
    test.handle.flush().await.unwrap();

    let open = open_alerts(test.backend.as_ref(), 1).await;
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].alert_type, AlertType::LowWater);
    assert_eq!(test.sink.opened().len(), 1);

    test.pipeline.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_breaches_without_debounce() {
    let mut config = test_config(&[1], 4);
    config.alerts.debounce = false;
    let test = spawn_with_backend(config, Arc::new(MemoryBackend::new())).await;

    let publishers = (0..8).map(|_| {
        let handle = test.handle.clone();
        tokio::spawn(async move {
            for _ in 0..10 {
                handle
                    .publish("coffeeMachine/1/temperature", "120")
                    .await
                    .unwrap();
            }
        })
    });
    for result in join_all(publishers).await {
        result.unwrap();
    }
    test.handle.flush().await.unwrap();

    assert_eq!(open_alerts(test.backend.as_ref(), 1).await.len(), 1);

    test.pipeline.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_machines_keep_their_own_order() {
    let machines: Vec<u64> = (1..=20).collect();
    let test = spawn_pipeline(&machines).await;

    let publishers = machines.iter().map(|&id| {
        let handle = test.handle.clone();
        tokio::spawn(async move {
            let topic = format!("coffeeMachine/{id}/milkLevel");
            for level in 40..=80u8 {
                handle.publish(topic.clone(), level.to_string()).await.unwrap();
            }
        })
    });
    for result in join_all(publishers).await {
        result.unwrap();
    }
    test.handle.flush().await.unwrap();

    for id in machines {
        let state = snapshot(test.backend.as_ref(), id).await;
        assert_eq!(state.milk_level_pct, Some(80), "machine {id}");
    }

    let stats = test.handle.stats().await.unwrap();
    assert_eq!(stats.ingest.received, 20 * 41);
    assert_eq!(stats.ingest.dropped(), 0);

    test.pipeline.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_resolve_on_busy_shard_does_not_stall_other_machines() {
    let backend = Arc::new(FlakyBackend::default());
    backend.slow_saves_for(1);
    let test = spawn_with_backend(test_config(&[1, 2], 2), backend.clone()).await;

    // roughly three seconds of queued work for machine 1
    for level in 0..20 {
        test.handle
            .publish("coffeeMachine/1/waterLevel", (50 + level).to_string())
            .await
            .unwrap();
    }

    let resolving = tokio::spawn({
        let handle = test.handle.clone();
        async move { handle.resolve_alerts(1, AlertType::Malfunction).await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    let mut events = test.handle.subscribe();
    let started = Instant::now();
    test.handle
        .publish("coffeeMachine/2/temperature", "91.5")
        .await
        .unwrap();

    let landed = timeout(Duration::from_secs(1), async {
        loop {
            match events.recv().await {
                Ok(PipelineEvent::StateChanged(state)) if state.machine_id == 2 => break,
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => panic!("event stream closed"),
            }
        }
    })
    .await;
    assert!(landed.is_ok(), "machine 2 waited behind machine 1's resolve");
    assert!(started.elapsed() < SLOW_SAVE * 5);
    assert!(!resolving.is_finished());

    let resolved = resolving.await.unwrap().unwrap();
    assert!(resolved.is_empty());
    test.handle.flush().await.unwrap();
    assert_eq!(snapshot(backend.as_ref(), 1).await.water_level_pct, Some(69));

    test.pipeline.shutdown().await.unwrap();
}
