//! Error handling for the formflow server API
//!
//! Domain errors (bad payloads, unknown sections, failing action bodies)
//! map to 409; unavailability and unexpected faults map to 500. The body
//! always carries `errorType`, `message` and `traceId`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use formflow_engine::EngineError;
use serde_json::json;

/// An engine failure paired with the request's trace id.
#[derive(Debug)]
pub struct ApiError {
    pub error: EngineError,
    pub trace_id: String,
}

impl ApiError {
    pub fn new(error: EngineError, trace_id: impl Into<String>) -> ApiError {
        ApiError {
            error,
            trace_id: trace_id.into(),
        }
    }

    fn status(&self) -> StatusCode {
        if self.error.is_domain_error() {
            StatusCode::CONFLICT
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "errorType": self.error.kind(),
            "message": self.error.to_string(),
            "traceId": self.trace_id,
        }));
        (self.status(), body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_errors_map_to_conflict() {
        let err = ApiError::new(
            EngineError::SectionNotFound("SEC_X".to_string()),
            "trace-1",
        );
        assert_eq!(err.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_unavailability_maps_to_internal_error() {
        let err = ApiError::new(EngineError::Unavailable("down".to_string()), "trace-2");
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
