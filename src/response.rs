//! Response envelope of the generation routes.

use crate::generator::RunReport;
use crate::report::LogEntry;
use axum::{http::StatusCode, Json};
use serde::Serialize;

#[derive(Serialize)]
pub struct Finished {
    pub message: String,
    pub log: Vec<LogEntry>,
}

pub fn finished(message: impl Into<String>, report: RunReport) -> (StatusCode, Json<Finished>) {
    (
        StatusCode::OK,
        Json(Finished {
            message: message.into(),
            log: report.into_entries(),
        }),
    )
}
