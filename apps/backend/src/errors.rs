use std::net::SocketAddr;
use std::path::PathBuf;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::model::ModelLoadError;

/// Failures of the startup and shutdown sequence.
/// Each fatal variant maps to its own exit code so the launching process can
/// tell "model missing" from "port exhausted" from "file write denied".
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Configuration error: {0:#}")]
    Config(#[from] anyhow::Error),

    #[error("No local port available on {addr}: {source}")]
    ResourceUnavailable {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to publish port record to {}: {source}", path.display())]
    DiscoveryWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Model load failed: {0}")]
    ModelLoad(#[from] ModelLoadError),

    #[error("Failed to remove port record {}: {source}", path.display())]
    DiscoveryCleanup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("HTTP server error: {0}")]
    Server(#[source] std::io::Error),

    #[error("Failed to install shutdown signal handlers: {0}")]
    Signal(#[source] std::io::Error),
}

impl ServiceError {
    pub fn exit_code(&self) -> u8 {
        match self {
            ServiceError::Config(_) => 1,
            ServiceError::ResourceUnavailable { .. } => 2,
            ServiceError::DiscoveryWrite { .. } => 3,
            ServiceError::ModelLoad(_) => 4,
            ServiceError::Server(_) => 5,
            ServiceError::DiscoveryCleanup { .. } => 6,
            ServiceError::Signal(_) => 7,
        }
    }
}

/// HTTP-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::NotFound(path) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("No route for {path}"),
            ),
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}
