use axum::routing::post;
use axum::Router;

use crate::handlers::forward;
use crate::state::AppState;

/// Event relay routes.
///
/// ```text
/// POST /forward  -> forward_event
/// ```
pub fn router() -> Router<AppState> {
    Router::new().route("/forward", post(forward::forward_event))
}
