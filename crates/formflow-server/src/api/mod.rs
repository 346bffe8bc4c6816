//! API routes and handlers for the formflow server

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use formflow_engine::{EngineError, GraphValue, SectionRequest};

use crate::error::ApiError;
use crate::AppState;

/// Build the router for API endpoints
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/api/next_question_flow", post(next_question_flow))
        .route("/health", get(health_check))
        .with_state(state)
}

/// Resolves the next question or action for the given section context. The
/// payload's only mandatory field is `sectionId`; every other field becomes
/// an input parameter validated against the section's declaration.
async fn next_question_flow(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<serde_json::Value>,
) -> Result<impl IntoResponse, ApiError> {
    let trace_id = Uuid::new_v4().to_string();
    info!(trace_id = %trace_id, "Incoming request: {}", payload);

    let serde_json::Value::Object(fields) = payload else {
        return Err(ApiError::new(
            EngineError::InvalidRequest("payload must be a JSON object".to_string()),
            trace_id,
        ));
    };
    let section_id = fields
        .get("sectionId")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| {
            ApiError::new(
                EngineError::InvalidRequest("sectionId is required".to_string()),
                trace_id.clone(),
            )
        })?;

    let inputs: HashMap<String, GraphValue> = fields
        .iter()
        .map(|(name, value)| (name.clone(), GraphValue::from_json(value)))
        .collect();

    let request = SectionRequest {
        section_id,
        inputs,
        trace_id: Some(trace_id.clone()),
    };
    match state.engine.run_section(request).await {
        Ok(response) => Ok(Json(response)),
        Err(error) => Err(ApiError::new(error, trace_id)),
    }
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}
