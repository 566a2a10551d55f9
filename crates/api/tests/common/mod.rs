#![allow(dead_code)]

use std::net::IpAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use tessera_api::config::ServerConfig;
use tessera_api::router::build_app_router;
use tessera_api::state::AppState;
use tessera_core::event::Event;
use tessera_core::retry::RetryPolicy;
use tessera_relay::{
    Destination, DestinationError, Destinations, ForwardingGateway, GatewayConfig,
    HealthAggregator,
};
use tower::ServiceExt;

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: IpAddr::from([127, 0, 0, 1]),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
    }
}

/// Build the full application router over the given destinations, with
/// millisecond backoff and short timeouts.
pub fn build_test_app(destinations: Destinations) -> Router {
    let config = test_config();

    let gateway = ForwardingGateway::new(
        destinations.clone(),
        GatewayConfig {
            retry: RetryPolicy {
                base_delay: Duration::from_millis(5),
                ..Default::default()
            },
            attempt_timeout: Duration::from_millis(200),
        },
    );
    let health = HealthAggregator::new(destinations, Duration::from_millis(200));

    let state = AppState {
        gateway: Arc::new(gateway),
        health: Arc::new(health),
    };

    build_app_router(state, &config)
}

// ---------------------------------------------------------------------------
// Fake destination
// ---------------------------------------------------------------------------

#[derive(Clone, Copy)]
pub enum Behaviour {
    Accept,
    Reject(u16),
    Hang,
}

/// Destination double that counts calls and answers per its behaviour.
pub struct FakeDestination {
    behaviour: Behaviour,
    deliveries: AtomicU32,
    probes: AtomicU32,
}

impl FakeDestination {
    pub fn new(behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            behaviour,
            deliveries: AtomicU32::new(0),
            probes: AtomicU32::new(0),
        })
    }

    pub fn deliveries(&self) -> u32 {
        self.deliveries.load(Ordering::SeqCst)
    }

    pub fn probes(&self) -> u32 {
        self.probes.load(Ordering::SeqCst)
    }

    async fn respond(&self) -> Result<(), DestinationError> {
        match self.behaviour {
            Behaviour::Accept => Ok(()),
            Behaviour::Reject(status) => Err(DestinationError::HttpStatus {
                status,
                body: "rejected".into(),
            }),
            Behaviour::Hang => std::future::pending().await,
        }
    }
}

#[async_trait]
impl Destination for FakeDestination {
    async fn deliver(&self, event: &Event) -> Result<serde_json::Value, DestinationError> {
        self.deliveries.fetch_add(1, Ordering::SeqCst);
        self.respond().await?;
        Ok(serde_json::json!({ "received": event.id }))
    }

    async fn probe(&self) -> Result<(), DestinationError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.respond().await
    }
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn post_raw(app: Router, uri: &str, body: impl Into<String>) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.into()))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> Response<Body> {
    post_raw(app, uri, body.to_string()).await
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// A well-formed event payload as a partner would send it.
pub fn event_json() -> serde_json::Value {
    serde_json::json!({
        "id": "sensor.kitchen_motion",
        "kind": "sensor",
        "state": "on",
        "attributes": { "zone": "kitchen" },
        "observedAt": "2024-05-01T12:00:00Z"
    })
}
