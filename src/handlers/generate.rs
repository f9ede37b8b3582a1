//! Generation handlers: each request reloads the config document and runs its stages synchronously.

use crate::config::load_config;
use crate::error::GenerateError;
use crate::generator::{run, Stage, CONFIG_STAGES};
use crate::response::finished;
use crate::state::AppState;
use axum::extract::State;
use axum::response::{IntoResponse, Response};

async fn generate(state: &AppState, stages: &[Stage], done: &str) -> Result<Response, GenerateError> {
    let config = load_config(&state.config_file).await?;
    let report = run(&config, state.connector.as_ref(), stages).await?;
    if !report.succeeded() {
        let failed: Vec<&str> = report.failed_stages().iter().map(|s| s.stage.as_str()).collect();
        return Err(GenerateError::Stage {
            stages: failed.join(", "),
            log: report.into_entries(),
        });
    }
    Ok(finished(done, report).into_response())
}

/// POST /generate_configs: service configs and the permissions file.
pub async fn generate_configs(State(state): State<AppState>) -> Result<Response, GenerateError> {
    generate(&state, CONFIG_STAGES, "Finished writing service configs and permissions").await
}

/// POST /update_qgs: QGIS projects.
pub async fn update_qgs(State(state): State<AppState>) -> Result<Response, GenerateError> {
    generate(&state, &[Stage::Qgs], "Finished writing QGIS project files").await
}
