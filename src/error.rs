//! Typed errors and HTTP mapping.

use crate::report::LogEntry;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("config parse: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("config schema: {0}")]
    Schema(String),
    #[error("validation: {0}")]
    Validation(String),
}

#[derive(Error, Debug)]
pub enum StoreError {
    /// The ConfigDB cannot be reached. Fatal for the whole run.
    #[error("database connection: {0}")]
    Connection(String),
    #[error("database: {0}")]
    Query(#[source] sqlx::Error),
    /// Rows a service needs are absent or inconsistent. The entity is skipped.
    #[error("missing data: {0}")]
    MissingData(String),
}

impl StoreError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, StoreError::Connection(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
            | sqlx::Error::Configuration(_) => StoreError::Connection(e.to_string()),
            other => StoreError::Query(other),
        }
    }
}

#[derive(Error, Debug)]
pub enum QgsError {
    #[error("template: {0}")]
    Template(String),
    #[error("unbound template placeholder: {0}")]
    Unbound(String),
    #[error("qml style: {0}")]
    Style(String),
    #[error("xml: {0}")]
    Xml(String),
}

#[derive(Error, Debug)]
pub enum GenerateError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Qgs(#[from] QgsError),
    #[error("write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("serialize: {0}")]
    Serialize(#[from] serde_json::Error),
    /// Stages that failed without aborting the run; carries the run's log.
    #[error("Generation failed: {stages}")]
    Stage { stages: String, log: Vec<LogEntry> },
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl GenerateError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            GenerateError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error"),
            GenerateError::Store(e) if e.is_fatal() => (StatusCode::INTERNAL_SERVER_ERROR, "database_unavailable"),
            GenerateError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "database_error"),
            GenerateError::Qgs(_) => (StatusCode::INTERNAL_SERVER_ERROR, "qgs_error"),
            GenerateError::Write { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "write_error"),
            GenerateError::Serialize(_) => (StatusCode::INTERNAL_SERVER_ERROR, "serialize_error"),
            GenerateError::Stage { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "generation_failed"),
        }
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            GenerateError::Stage { log, .. } => Some(serde_json::json!({ "log": log })),
            _ => None,
        }
    }
}

impl IntoResponse for GenerateError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message: self.to_string(),
                details: self.details(),
            },
        };
        (status, Json(body)).into_response()
    }
}
