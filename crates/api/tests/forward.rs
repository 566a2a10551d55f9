//! Integration tests for `POST /forward`.

mod common;

use assert_matches::assert_matches;
use axum::http::StatusCode;
use common::{body_json, event_json, post_json, post_raw, Behaviour, FakeDestination};
use serde_json::json;
use tessera_relay::Destinations;

// ---------------------------------------------------------------------------
// Test: a valid request is forwarded only to the requested destinations
// ---------------------------------------------------------------------------

#[tokio::test]
async fn forwards_to_requested_destinations_only() {
    let ledger = FakeDestination::new(Behaviour::Accept);
    let spatial = FakeDestination::new(Behaviour::Accept);
    let app = common::build_test_app(
        Destinations::new()
            .with("ledger", ledger.clone())
            .with("spatial", spatial.clone()),
    );

    let response = post_json(
        app,
        "/forward",
        json!({ "event": event_json(), "forwardTo": ["ledger"] }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(
        json,
        json!({
            "ledger": { "status": "delivered", "data": { "received": "sensor.kitchen_motion" } }
        })
    );
    assert_eq!(ledger.deliveries(), 1);
    assert_eq!(spatial.deliveries(), 0);
}

// ---------------------------------------------------------------------------
// Test: unknown destinations get no entry and no call
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_destinations_are_ignored() {
    let ledger = FakeDestination::new(Behaviour::Accept);
    let app = common::build_test_app(Destinations::new().with("ledger", ledger.clone()));

    let response = post_json(
        app,
        "/forward",
        json!({ "event": event_json(), "forwardTo": ["nowhere"] }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({}));
    assert_eq!(ledger.deliveries(), 0);
}

// ---------------------------------------------------------------------------
// Test: failed deliveries are still a 200 with per-destination failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn failures_are_reported_per_destination() {
    let ledger = FakeDestination::new(Behaviour::Reject(503));
    let spatial = FakeDestination::new(Behaviour::Reject(400));
    let app = common::build_test_app(
        Destinations::new()
            .with("ledger", ledger.clone())
            .with("spatial", spatial.clone()),
    );

    let response = post_json(
        app,
        "/forward",
        json!({ "event": event_json(), "forwardTo": ["ledger", "spatial"] }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;

    assert_eq!(json["ledger"]["status"], "failed");
    assert_eq!(json["ledger"]["retryable"], true);
    assert_eq!(ledger.deliveries(), 3);

    assert_eq!(json["spatial"]["status"], "failed");
    assert_eq!(json["spatial"]["retryable"], false);
    assert_eq!(spatial.deliveries(), 1);
}

// ---------------------------------------------------------------------------
// Test: a hung destination is bounded and does not block the others
// ---------------------------------------------------------------------------

#[tokio::test]
async fn hung_destination_does_not_block_others() {
    let ledger = FakeDestination::new(Behaviour::Accept);
    let spatial = FakeDestination::new(Behaviour::Hang);
    let app = common::build_test_app(
        Destinations::new()
            .with("ledger", ledger.clone())
            .with("spatial", spatial),
    );

    let response = post_json(
        app,
        "/forward",
        json!({ "event": event_json(), "forwardTo": ["ledger", "spatial"] }),
    )
    .await;

    let json = body_json(response).await;
    assert_eq!(json["ledger"]["status"], "delivered");
    assert_eq!(json["spatial"]["status"], "failed");
    assert_matches!(json["spatial"]["message"].as_str(), Some(m) if m.contains("timed out"));
}

// ---------------------------------------------------------------------------
// Test: missing fields are rejected with 400 and no destination is called
// ---------------------------------------------------------------------------

#[tokio::test]
async fn missing_event_returns_400_without_calls() {
    let ledger = FakeDestination::new(Behaviour::Accept);
    let app = common::build_test_app(Destinations::new().with("ledger", ledger.clone()));

    let response = post_json(app, "/forward", json!({ "forwardTo": ["ledger"] })).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["code"], "BAD_REQUEST");
    assert!(json["error"].as_str().unwrap().contains("event"));
    assert_eq!(ledger.deliveries(), 0);
}

#[tokio::test]
async fn missing_forward_to_returns_400() {
    let ledger = FakeDestination::new(Behaviour::Accept);
    let app = common::build_test_app(Destinations::new().with("ledger", ledger.clone()));

    let response = post_json(app, "/forward", json!({ "event": event_json() })).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "BAD_REQUEST");
    assert_eq!(ledger.deliveries(), 0);
}

#[tokio::test]
async fn malformed_json_returns_400() {
    let app = common::build_test_app(Destinations::new());

    let response = post_raw(app, "/forward", "{ not json").await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "BAD_REQUEST");
}

// ---------------------------------------------------------------------------
// Test: an event with a blank id fails validation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn blank_event_id_returns_validation_error() {
    let ledger = FakeDestination::new(Behaviour::Accept);
    let app = common::build_test_app(Destinations::new().with("ledger", ledger.clone()));

    let mut event = event_json();
    event["id"] = json!("  ");

    let response = post_json(
        app,
        "/forward",
        json!({ "event": event, "forwardTo": ["ledger"] }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "VALIDATION_ERROR");
    assert_eq!(ledger.deliveries(), 0);
}
