pub mod logs;
pub mod stream;
pub mod vars;

use axum::routing::get;
use axum::Router;

use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/log", get(logs::get_log))
        .route("/stream", get(stream::ws_stream))
        .route("/debug/vars", get(vars::debug_vars))
        .with_state(state)
}
