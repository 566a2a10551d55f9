//! Handler for relaying a single event to partner systems.

use std::collections::BTreeMap;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use tessera_core::event::Event;
use tessera_relay::ForwardOutcome;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// Body of `POST /forward`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwardRequest {
    pub event: Event,
    pub forward_to: Vec<String>,
}

/// POST /forward
///
/// Validate the event, then forward it to each requested destination.
/// Returns 200 with one outcome per known destination, even when every
/// delivery failed. Malformed input is rejected with 400 before any
/// destination is contacted.
pub async fn forward_event(
    State(state): State<AppState>,
    body: Result<Json<ForwardRequest>, JsonRejection>,
) -> AppResult<Json<BTreeMap<String, ForwardOutcome>>> {
    let Json(input) = body.map_err(AppError::from)?;
    input.event.validate()?;

    tracing::info!(
        event_id = %input.event.id,
        kind = %input.event.kind,
        targets = ?input.forward_to,
        "Forward requested",
    );

    let outcomes = state.gateway.forward(&input.event, &input.forward_to).await;
    Ok(Json(outcomes))
}
