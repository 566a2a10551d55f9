use std::sync::Arc;

use tessera_relay::{ForwardingGateway, HealthAggregator};

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    /// Relays `POST /forward` requests to partner systems.
    pub gateway: Arc<ForwardingGateway>,
    /// Answers `GET /health`.
    pub health: Arc<HealthAggregator>,
}
