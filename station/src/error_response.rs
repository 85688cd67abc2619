//! Wraps `CoreError` into the `{success:false, error}` envelope from spec §6,
//! and every handler's success payload into `{success:true, data}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;
use trust_common::error::CoreError;

pub struct ApiError(pub CoreError);

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = json!({ "success": false, "error": self.0.message() });
        (status, Json(body)).into_response()
    }
}

/// Wraps a successful payload as `{success: true, data: ...}`.
pub fn ok<T: Serialize>(data: T) -> Response {
    Json(json!({ "success": true, "data": data })).into_response()
}

pub type ApiResult<T = Response> = Result<T, ApiError>;
