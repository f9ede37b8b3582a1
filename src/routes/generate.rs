//! Generation routes.

use crate::handlers::generate::{generate_configs, update_qgs};
use crate::state::AppState;
use axum::{routing::post, Router};

pub fn generate_routes(state: AppState) -> Router {
    Router::new()
        .route("/generate_configs", post(generate_configs))
        .route("/update_qgs", post(update_qgs))
        .with_state(state)
}
