use axum::{extract::State, Json};
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct Liveness {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Readiness {
    pub status: &'static str,
    pub model_ready: bool,
    pub model_name: Option<String>,
}

/// GET /
/// Process liveness only. Answers as soon as the listener accepts connections.
pub async fn liveness_handler(State(state): State<AppState>) -> Json<Liveness> {
    Json(Liveness {
        status: "healthy",
        service: state.service_name,
        version: state.version,
    })
}

/// GET /health
/// Reports whether the language model has finished loading.
pub async fn readiness_handler(State(state): State<AppState>) -> Json<Readiness> {
    // One read of the model slot, so ready and name always agree.
    let model = state.service.model();
    Json(Readiness {
        status: "healthy",
        model_ready: model.is_some(),
        model_name: model.map(|m| m.name().to_string()),
    })
}
