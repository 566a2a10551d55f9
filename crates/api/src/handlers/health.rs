use std::collections::BTreeMap;

use axum::extract::State;
use axum::Json;
use tessera_relay::HealthStatus;

use crate::state::AppState;

/// GET /health
///
/// Probe every configured destination once. Always 200; unreachable
/// destinations are reported `offline`.
pub async fn health_check(State(state): State<AppState>) -> Json<BTreeMap<String, HealthStatus>> {
    Json(state.health.check_all().await)
}
