use axum::extract::State;
use axum::response::{IntoResponse, Json};

use crate::state::AppState;

/// `GET /debug/vars`: the `tags`/`hosts`/`pri` counter maps.
pub async fn debug_vars(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.counters.to_json())
}
