//! HTTP surface from spec §6. Every handler is a thin translation layer:
//! parse request, call into `StationService`, shape the `{success, data}`
//! envelope.

use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use trust_common::error::CoreError;
use uuid::Uuid;

use crate::auth::AuthenticatedDeveloper;
use crate::error_response::{ok, ApiResult};
use crate::service::{classify_verify_error, ReportItem};
use crate::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/.well-known/station-keys", get(station_keys))
        .route("/.well-known/station-info", get(station_info))
        .route("/developers/register", post(register_developer))
        .route("/developers/agents", post(register_agent))
        .route("/certificates/request", post(request_certificate))
        .route("/certificates/verify", get(verify_certificate))
        .route("/verify", post(pre_action_check))
        .route("/report", post(report_single))
        .route("/reports", post(ingest_reports))
        .route("/agents/:external_id/reputation", get(reputation_breakdown))
        .route("/metrics", get(metrics))
        .with_state(state)
}

async fn station_keys(State(state): State<Arc<AppState>>) -> ApiResult {
    Ok(ok(json!({
        "publicKey": state.service.key.public_key_pem(),
        "algorithm": "RS256",
        "use": "sig",
        "issuer": trust_common::certificate::ISSUER,
    })))
}

async fn station_info(State(state): State<Arc<AppState>>) -> ApiResult {
    Ok(ok(json!({
        "service": "trust-station",
        "certificateExpirySeconds": state.service.certificate_ttl_seconds,
    })))
}

#[derive(Debug, Deserialize)]
struct RegisterDeveloperBody {
    name: String,
}

async fn register_developer(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RegisterDeveloperBody>,
) -> ApiResult {
    if body.name.trim().is_empty() {
        return Err(CoreError::BadRequest("name must not be empty".into()).into());
    }
    let (developer, api_key) = state.service.register_developer(&body.name).await;
    Ok(ok(json!({
        "developerId": developer.id,
        "name": developer.name,
        "apiKey": api_key,
    })))
}

#[derive(Debug, Deserialize)]
struct RegisterAgentBody {
    #[serde(rename = "externalId")]
    external_id: String,
}

async fn register_agent(
    State(state): State<Arc<AppState>>,
    AuthenticatedDeveloper(developer): AuthenticatedDeveloper,
    Json(body): Json<RegisterAgentBody>,
) -> ApiResult {
    if body.external_id.trim().is_empty() {
        return Err(CoreError::BadRequest("externalId must not be empty".into()).into());
    }
    let agent = state
        .service
        .register_agent(developer.id, &body.external_id)
        .await?;
    Ok(ok(json!({
        "agentId": agent.id,
        "externalId": agent.external_id,
        "status": agent.status,
        "reputationScore": agent.reputation_score,
    })))
}

#[derive(Debug, Deserialize)]
struct RequestCertificateBody {
    #[serde(rename = "agentId")]
    agent_id: Uuid,
    scope: Option<Vec<String>>,
}

async fn request_certificate(
    State(state): State<Arc<AppState>>,
    AuthenticatedDeveloper(developer): AuthenticatedDeveloper,
    Json(body): Json<RequestCertificateBody>,
) -> ApiResult {
    let outcome = state
        .service
        .issue_for_agent(developer.id, body.agent_id, body.scope)
        .await?;
    metrics::counter!("station_certificates_issued_total").increment(1);
    Ok(ok(json!({
        "token": outcome.token,
        "expiresAt": outcome.expires_at,
        "score": outcome.score,
    })))
}

#[derive(Debug, Deserialize)]
struct VerifyQuery {
    token: String,
}

async fn verify_certificate(
    State(state): State<Arc<AppState>>,
    Query(query): Query<VerifyQuery>,
) -> ApiResult {
    let outcome = state.service.verify_remote(&query.token).await;
    Ok(ok(json!({
        "valid": outcome.valid,
        "payload": outcome.payload,
    })))
}

#[derive(Debug, Deserialize)]
struct PreActionCheckBody {
    #[serde(rename = "agentId")]
    agent_id: Uuid,
    #[serde(rename = "actionType")]
    action_type: String,
    threshold: Option<u8>,
    #[serde(default)]
    context: Value,
}

async fn pre_action_check(
    State(state): State<Arc<AppState>>,
    AuthenticatedDeveloper(developer): AuthenticatedDeveloper,
    Json(body): Json<PreActionCheckBody>,
) -> ApiResult {
    let outcome = state
        .service
        .pre_action_check(
            developer.id,
            body.agent_id,
            &body.action_type,
            body.threshold,
            body.context,
        )
        .await?;
    Ok(ok(json!({
        "allowed": outcome.allowed,
        "score": outcome.score,
        "reason": outcome.reason,
        "actionId": outcome.action_id,
    })))
}

#[derive(Debug, Deserialize)]
struct ReportSingleBody {
    #[serde(rename = "actionId")]
    action_id: Uuid,
    outcome: String,
}

async fn report_single(
    State(state): State<Arc<AppState>>,
    AuthenticatedDeveloper(developer): AuthenticatedDeveloper,
    Json(body): Json<ReportSingleBody>,
) -> ApiResult {
    let success = body.outcome.eq_ignore_ascii_case("success");
    let summary = state
        .service
        .report_single(developer.id, body.action_id, success)
        .await?;
    Ok(ok(summary_json(summary)))
}

#[derive(Debug, Deserialize)]
struct ReportsBody {
    #[serde(rename = "agentId")]
    agent_id: Uuid,
    #[serde(rename = "gatewayId")]
    gateway_id: String,
    #[serde(rename = "certificateJti")]
    certificate_jti: Uuid,
    actions: Vec<ReportActionBody>,
}

#[derive(Debug, Deserialize)]
struct ReportActionBody {
    #[serde(rename = "actionType")]
    action_type: String,
    outcome: String,
    #[serde(default)]
    metadata: Value,
    #[serde(rename = "performedAt")]
    performed_at: Option<chrono::DateTime<chrono::Utc>>,
}

async fn ingest_reports(
    State(state): State<Arc<AppState>>,
    AuthenticatedDeveloper(developer): AuthenticatedDeveloper,
    Json(body): Json<ReportsBody>,
) -> ApiResult {
    if body.actions.is_empty() {
        return Err(CoreError::BadRequest("actions must not be empty".into()).into());
    }
    let actions = body
        .actions
        .into_iter()
        .map(|a| ReportItem {
            action_type: a.action_type,
            outcome: a.outcome,
            metadata: a.metadata,
            performed_at: a.performed_at,
        })
        .collect();

    let summary = state
        .service
        .ingest_reports(
            developer.id,
            body.agent_id,
            body.certificate_jti,
            &body.gateway_id,
            actions,
        )
        .await?;
    metrics::counter!("station_reports_ingested_total").increment(1);
    Ok(ok(summary_json(summary)))
}

fn summary_json(summary: crate::service::ReportSummary) -> Value {
    json!({
        "agentId": summary.agent_id,
        "actionsProcessed": summary.actions_processed,
        "successCount": summary.success_count,
        "failureCount": summary.failure_count,
        "newReputationScore": summary.new_reputation_score,
    })
}

async fn reputation_breakdown(
    State(state): State<Arc<AppState>>,
    AuthenticatedDeveloper(developer): AuthenticatedDeveloper,
    axum::extract::Path(external_id): axum::extract::Path<String>,
) -> ApiResult {
    let breakdown = state
        .service
        .reputation_breakdown(developer.id, &external_id)
        .await?;
    Ok(ok(json!({
        "agentId": breakdown.agent_id,
        "score": breakdown.score,
        "identityVerified": breakdown.identity_verified,
        "stakeAmount": breakdown.stake_amount,
        "vouchesReceived": breakdown.vouches_received,
        "totalActions": breakdown.total_actions,
        "successfulActions": breakdown.successful_actions,
        "failedActions": breakdown.failed_actions,
    })))
}

async fn metrics(State(state): State<Arc<AppState>>) -> String {
    state.metrics.render()
}

#[allow(dead_code)]
fn map_verify_error(err: trust_common::certificate::VerifyError) -> CoreError {
    classify_verify_error(err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::StationService;
    use crate::store::InMemoryStore;
    use http_body_util::BodyExt;
    use rsa::pkcs1::{EncodeRsaPrivateKey, EncodeRsaPublicKey};
    use rsa::{RsaPrivateKey, RsaPublicKey};
    use tower::ServiceExt;
    use trust_observability::MetricsExporter;

    fn test_app() -> Router {
        let mut rng = rand::thread_rng();
        let private = RsaPrivateKey::new(&mut rng, 2048).expect("rsa key");
        let public = RsaPublicKey::from(&private);
        let private_pem = private
            .to_pkcs1_pem(rsa::pkcs1::LineEnding::LF)
            .expect("pkcs1 pem")
            .to_string();
        let public_pem = public
            .to_pkcs1_pem(rsa::pkcs1::LineEnding::LF)
            .expect("pkcs1 pem");
        let key = trust_common::certificate::KeyMaterial::from_pem_pair(&private_pem, &public_pem)
            .expect("key material");

        let store: std::sync::Arc<dyn crate::store::Store> =
            std::sync::Arc::new(InMemoryStore::new());
        let service = StationService {
            store: store.clone(),
            key,
            certificate_ttl_seconds: 300,
        };
        let metrics = MetricsExporter::noop_for_tests();
        let state = Arc::new(AppState { store, service, metrics });
        router(state)
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn happy_path_register_issue_and_verify() {
        let app = test_app();

        let register_response = app
            .clone()
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/developers/register")
                    .header("content-type", "application/json")
                    .body(axum::body::Body::from(r#"{"name":"acme"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        let register_body = body_json(register_response).await;
        let api_key = register_body["data"]["apiKey"].as_str().unwrap().to_string();

        let agent_response = app
            .clone()
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/developers/agents")
                    .header("content-type", "application/json")
                    .header("authorization", format!("Bearer {api_key}"))
                    .body(axum::body::Body::from(r#"{"externalId":"agent-1"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        let agent_body = body_json(agent_response).await;
        assert_eq!(agent_body["data"]["reputationScore"], 50);
        let agent_id = agent_body["data"]["agentId"].as_str().unwrap().to_string();

        let cert_response = app
            .clone()
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/certificates/request")
                    .header("content-type", "application/json")
                    .header("authorization", format!("Bearer {api_key}"))
                    .body(axum::body::Body::from(format!(
                        r#"{{"agentId":"{agent_id}"}}"#
                    )))
                    .unwrap(),
            )
            .await
            .unwrap();
        let cert_body = body_json(cert_response).await;
        assert_eq!(cert_body["data"]["score"], 50);
        let token = cert_body["data"]["token"].as_str().unwrap().to_string();

        let verify_response = app
            .clone()
            .oneshot(
                axum::http::Request::builder()
                    .method("GET")
                    .uri(format!("/certificates/verify?token={token}"))
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let verify_body = body_json(verify_response).await;
        assert_eq!(verify_body["data"]["valid"], true);
    }

    #[tokio::test]
    async fn missing_api_key_is_unauthenticated() {
        let app = test_app();
        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/developers/agents")
                    .header("content-type", "application/json")
                    .body(axum::body::Body::from(r#"{"externalId":"agent-1"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::UNAUTHORIZED);
    }
}
