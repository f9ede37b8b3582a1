//! Router assembly.

pub mod common;
pub mod generate;

pub use common::common_routes;
pub use generate::generate_routes;

use crate::state::AppState;
use axum::Router;
use tower_http::trace::TraceLayer;

/// Full application: generation routes plus health and version, with request tracing.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(common_routes())
        .merge(generate_routes(state))
        .layer(TraceLayer::new_for_http())
}
