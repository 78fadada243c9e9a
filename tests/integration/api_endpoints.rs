//! Integration tests for API endpoints
//!
//! These tests verify that:
//! - Machine, alert and usage endpoints return what the pipeline stored
//! - Operators can resolve alerts by id and by type
//! - The HTTP bridge feeds the pipeline
//! - Error handling is correct

use std::net::SocketAddr;

use coffee_monitoring::{
    api::{ApiState, spawn_api_server},
    config::ApiSettings,
};
use reqwest::StatusCode;
use serde_json::{Value, json};

use crate::helpers::{TestPipeline, publish_all, spawn_pipeline};

async fn spawn_test_api(machines: &[u64]) -> (TestPipeline, SocketAddr) {
    let test = spawn_pipeline(machines).await;

    let settings = ApiSettings {
        bind: Some("127.0.0.1:0".parse().unwrap()),
        enable_cors: true,
    };
    let addr = spawn_api_server(&settings, ApiState::new(test.handle.clone()))
        .await
        .unwrap();

    (test, addr)
}

async fn get_json(addr: SocketAddr, path: &str) -> (StatusCode, Value) {
    let response = reqwest::get(format!("http://{addr}{path}")).await.unwrap();
    let status = response.status();
    (status, response.json().await.unwrap())
}

async fn post_json(addr: SocketAddr, path: &str, body: Option<Value>) -> (StatusCode, Value) {
    let client = reqwest::Client::new();
    let mut request = client.post(format!("http://{addr}{path}"));
    if let Some(body) = body {
        request = request.json(&body);
    }

    let response = request.send().await.unwrap();
    let status = response.status();
    (status, response.json().await.unwrap())
}

#[tokio::test]
async fn test_health_endpoint() {
    let (_test, addr) = spawn_test_api(&[1]).await;

    let (status, body) = get_json(addr, "/api/v1/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["storage"]["healthy"], true);
}

#[tokio::test]
async fn test_machine_endpoints() {
    let (test, addr) = spawn_test_api(&[1, 2]).await;

    publish_all(
        &test.handle,
        &[
            ("coffeeMachine/1/temperature", "92.5"),
            ("coffeeMachine/1/usage", "LATTE:250"),
        ],
    )
    .await;

    let (status, body) = get_json(addr, "/api/v1/machines").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 2);

    let (status, body) = get_json(addr, "/api/v1/machines/1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], 1);
    assert_eq!(body["state"]["temperature_c"], 92.5);

    let (status, body) = get_json(addr, "/api/v1/machines/2").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["state"].is_null());

    let (status, body) = get_json(addr, "/api/v1/machines/1/usage").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);
    assert_eq!(body["events"][0]["brew_type"], "LATTE");
    assert_eq!(body["events"][0]["volume_ml"], 250);

    let (status, body) = get_json(addr, "/api/v1/machines/77").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("77"));
}

#[tokio::test]
async fn test_alert_listing_and_resolution() {
    let (test, addr) = spawn_test_api(&[1]).await;

    publish_all(
        &test.handle,
        &[
            ("coffeeMachine/1/waterLevel", "10"),
            ("coffeeMachine/1/temperature", "130"),
        ],
    )
    .await;

    let (status, body) = get_json(addr, "/api/v1/alerts?resolved=false").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 2);

    let (_, body) = get_json(addr, "/api/v1/alerts?severity=critical").await;
    assert_eq!(body["count"], 1);
    assert_eq!(body["alerts"][0]["type"], "MALFUNCTION");
    let malfunction_id = body["alerts"][0]["id"].as_u64().unwrap();

    let (_, body) = get_json(addr, "/api/v1/alerts/summary").await;
    assert_eq!(body["open"]["total"], 2);
    assert_eq!(body["open"]["critical"], 1);
    assert_eq!(body["open_by_type"]["LOW_WATER"], 1);
    assert_eq!(body["open_by_type"]["LOW_MILK"], 0);

    let (status, body) =
        post_json(addr, &format!("/api/v1/alerts/{malfunction_id}/resolve"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["resolved"], true);

    let (status, _) =
        post_json(addr, &format!("/api/v1/alerts/{malfunction_id}/resolve"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = post_json(addr, "/api/v1/machines/1/alerts/low_water/resolve", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);

    let (_, body) = get_json(addr, "/api/v1/machines/1/alerts?resolved=false").await;
    assert_eq!(body["count"], 0);
    let (_, body) = get_json(addr, "/api/v1/machines/1/alerts").await;
    assert_eq!(body["count"], 2);
}

#[tokio::test]
async fn test_invalid_filters() {
    let (_test, addr) = spawn_test_api(&[1]).await;

    let (status, body) = get_json(addr, "/api/v1/alerts?type=LOW_COFFEE").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("LOW_COFFEE"));

    let (status, _) = post_json(addr, "/api/v1/machines/1/alerts/BROKEN/resolve", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = post_json(addr, "/api/v1/machines/9/alerts/LOW_WATER/resolve", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_telemetry_bridge() {
    let (test, addr) = spawn_test_api(&[3]).await;

    let (status, body) = post_json(
        addr,
        "/api/v1/telemetry",
        Some(json!({"topic": "coffeeMachine/3/beansLevel", "payload": "12"})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["accepted"], true);

    let (status, _) = post_json(
        addr,
        "/api/v1/telemetry",
        Some(json!({"topic": "coffeeMachine/3/temperature", "payload": {"temperature": 95.0}})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    // accepted, then dropped by the pipeline
    let (status, _) = post_json(
        addr,
        "/api/v1/telemetry",
        Some(json!({"topic": "coffeeMachine/x/temperature", "payload": "95"})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    test.handle.flush().await.unwrap();

    let (_, body) = get_json(addr, "/api/v1/machines/3").await;
    assert_eq!(body["state"]["beans_level_pct"], 12);
    assert_eq!(body["state"]["temperature_c"], 95.0);

    let (_, body) = get_json(addr, "/api/v1/stats").await;
    assert_eq!(body["pipeline"]["ingest"]["received"], 3);
    assert_eq!(body["pipeline"]["ingest"]["malformed_topic"], 1);
    assert_eq!(body["pipeline"]["ingest"]["alerts_opened"], 1);
}

#[tokio::test]
async fn test_thresholds_endpoint() {
    let (_test, addr) = spawn_test_api(&[1]).await;

    let (status, body) = get_json(addr, "/api/v1/thresholds").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["thresholds"]["low_water"], 20);
    assert_eq!(body["thresholds"]["min_temperature"], 85.0);
    assert!(body.get("machine_id").is_none());

    let (_, body) = get_json(addr, "/api/v1/thresholds?machine_id=1").await;
    assert_eq!(body["machine_id"], 1);
}
