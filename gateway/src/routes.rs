//! Gateway HTTP surface (spec §6), mounted under a caller-chosen prefix.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::pipeline::handle_action;
use crate::GatewayState;

pub fn router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/.well-known/agent-gateway", get(discovery))
        .route("/actions", get(list_actions))
        .route("/actions/:name", post(execute_action))
        .route("/behavior/sessions", get(behavior_sessions))
        .route("/metrics", get(metrics))
        .with_state(state)
}

async fn discovery(State(state): State<Arc<GatewayState>>) -> Response {
    Json(json!({
        "gatewayId": state.gateway_id,
        "actions": state.deps.registry.list(),
        "features": {
            "ml": state.deps.analyzer.is_some(),
            "behaviorTracking": true,
        },
    }))
    .into_response()
}

async fn list_actions(State(state): State<Arc<GatewayState>>) -> Response {
    Json(json!({ "success": true, "data": state.deps.registry.list() })).into_response()
}

async fn execute_action(
    State(state): State<Arc<GatewayState>>,
    Path(name): Path<String>,
    headers: HeaderMap,
    Json(body): Json<ActionRequestBody>,
) -> Response {
    let response = handle_action(&state.deps, &headers, &name, body.params).await;
    (response.status, Json(response.body)).into_response()
}

#[derive(Debug, serde::Deserialize)]
pub struct ActionRequestBody {
    #[serde(default)]
    pub params: Value,
}

async fn behavior_sessions(State(state): State<Arc<GatewayState>>) -> Response {
    Json(json!({ "success": true, "data": state.deps.behavior.snapshot() })).into_response()
}

async fn metrics(State(state): State<Arc<GatewayState>>) -> String {
    state.metrics.render()
}
