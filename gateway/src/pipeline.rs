//! The gateway request pipeline (spec §4.7): the ordered sequence every
//! inbound action request goes through, from credential extraction to
//! response shaping.

use axum::http::{HeaderMap, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::behavior::BehaviorTracker;
use crate::keycache::KeyCache;
use crate::ml::ThreatAnalyzer;
use crate::registry::{ActionRegistry, AgentContext, ExecuteOutcome};
use crate::report::{ReportAction, Reporter};
use crate::verify;

pub struct PipelineDeps {
    pub key_cache: Arc<KeyCache>,
    pub behavior: Arc<BehaviorTracker>,
    pub registry: Arc<ActionRegistry>,
    pub analyzer: Option<Arc<dyn ThreatAnalyzer>>,
    pub reporter: Arc<Reporter>,
}

pub struct PipelineResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl PipelineResponse {
    fn new(status: StatusCode, body: Value) -> Self {
        Self { status, body }
    }
}

/// spec §4.7, steps 1-10.
pub async fn handle_action(
    deps: &PipelineDeps,
    headers: &HeaderMap,
    action_name: &str,
    params: Value,
) -> PipelineResponse {
    // 1. Extract credential.
    let token = match verify::extract_credential(headers) {
        Ok(t) => t,
        Err(err) => {
            return PipelineResponse::new(
                StatusCode::UNAUTHORIZED,
                json!({ "success": false, "error": err.to_string() }),
            )
        }
    };

    // 2. Verify certificate locally.
    let claims = match verify::verify(&deps.key_cache, token) {
        Ok(c) => c,
        Err(err) => {
            let status = match err {
                trust_common::certificate::VerifyError::AgentDisabled => StatusCode::FORBIDDEN,
                _ => StatusCode::UNAUTHORIZED,
            };
            return PipelineResponse::new(status, json!({ "success": false, "error": err.to_string() }));
        }
    };

    // 3. Live-block check.
    if deps.behavior.is_blocked(claims.sub) {
        deps.reporter.dispatch(
            claims.sub,
            claims.jti,
            ReportAction {
                action_type: action_name.to_string(),
                outcome: "failure".to_string(),
                metadata: json!({ "reason": "behavioral_block" }),
                performed_at: chrono::Utc::now(),
            },
        );
        return PipelineResponse::new(
            StatusCode::FORBIDDEN,
            json!({ "success": false, "error": "blocked mid-session" }),
        );
    }

    // 4. Action existence.
    if deps.registry.get(action_name).is_none() {
        let (_, _, _) = deps.behavior.record_action(
            claims.sub,
            &claims.agent_external_id,
            action_name,
            &params,
            false,
            true,
        );
        return PipelineResponse::new(
            StatusCode::NOT_FOUND,
            json!({
                "success": false,
                "error": format!("unknown action '{action_name}'"),
                "availableActions": deps.registry.list().into_iter().map(|a| a.name).collect::<Vec<_>>(),
            }),
        );
    }

    // 5. Scope check.
    if !claims.authorizes(action_name) {
        deps.behavior.record_action(
            claims.sub,
            &claims.agent_external_id,
            action_name,
            &params,
            false,
            false,
        );
        deps.reporter.dispatch(
            claims.sub,
            claims.jti,
            ReportAction {
                action_type: action_name.to_string(),
                outcome: "failure".to_string(),
                metadata: json!({ "reason": "scope_violation" }),
                performed_at: chrono::Utc::now(),
            },
        );
        return PipelineResponse::new(
            StatusCode::FORBIDDEN,
            json!({ "success": false, "error": format!("action '{action_name}' is outside the certificate's scope") }),
        );
    }

    // 6. ML threat check, fail-open.
    if let Some(analyzer) = &deps.analyzer {
        match analyzer.analyze(&params, claims.sub).await {
            Ok(result) if !result.safe => {
                deps.behavior.record_action(
                    claims.sub,
                    &claims.agent_external_id,
                    action_name,
                    &params,
                    false,
                    true,
                );
                deps.reporter.dispatch(
                    claims.sub,
                    claims.jti,
                    ReportAction {
                        action_type: action_name.to_string(),
                        outcome: "failure".to_string(),
                        metadata: json!({ "reason": "ml_threat_detected", "threats": result.threats }),
                        performed_at: chrono::Utc::now(),
                    },
                );
                return PipelineResponse::new(
                    StatusCode::FORBIDDEN,
                    json!({
                        "success": false,
                        "error": "request blocked by threat analysis",
                        "threats": result.threats,
                    }),
                );
            }
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(error = %err, "threat analyzer errored, failing open");
            }
        }
    }

    // 7. Score gate, validation, execution.
    let ctx = AgentContext {
        agent_id: claims.sub,
        external_id: claims.agent_external_id.clone(),
        score: claims.score,
    };
    let (outcome, score_met) = deps.registry.execute(action_name, params.clone(), &ctx).await;
    let success = matches!(outcome, ExecuteOutcome::Success { .. });

    // 8. Behavior record.
    let (behavior_score, new_flags, blocked_now) = deps.behavior.record_action(
        claims.sub,
        &claims.agent_external_id,
        action_name,
        &params,
        success,
        score_met,
    );

    // 9. Report dispatch, fire-and-forget.
    deps.reporter.dispatch(
        claims.sub,
        claims.jti,
        ReportAction {
            action_type: action_name.to_string(),
            outcome: if success { "success" } else { "failure" }.to_string(),
            metadata: json!({
                "params": params,
                "behaviorScore": behavior_score,
                "flags": new_flags,
                "blocked": blocked_now,
            }),
            performed_at: chrono::Utc::now(),
        },
    );

    // 10. Response shaping.
    shape_response(outcome, behavior_score, &new_flags, blocked_now)
}

fn shape_response(
    outcome: ExecuteOutcome,
    behavior_score: u8,
    new_flags: &[crate::behavior::Flag],
    blocked_now: bool,
) -> PipelineResponse {
    if blocked_now {
        return PipelineResponse::new(
            StatusCode::FORBIDDEN,
            json!({ "success": false, "error": "blocked mid-session" }),
        );
    }

    let advisory = if behavior_score < 80 || !new_flags.is_empty() {
        let warning = if behavior_score < 50 {
            "severe behavioral risk detected"
        } else {
            "mild behavioral risk detected"
        };
        Some(json!({ "score": behavior_score, "flags": new_flags, "warning": warning }))
    } else {
        None
    };

    match outcome {
        ExecuteOutcome::Success { data } => {
            let mut body = json!({ "success": true, "data": data });
            if let Some(advisory) = advisory {
                body["behavior"] = advisory;
            }
            PipelineResponse::new(StatusCode::OK, body)
        }
        ExecuteOutcome::Failure { error } => {
            let mut body = json!({ "success": false, "error": error });
            if let Some(advisory) = advisory {
                body["behavior"] = advisory;
            }
            PipelineResponse::new(StatusCode::FORBIDDEN, body)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::BehaviorTracker;
    use crate::config::BehaviorConfig;
    use crate::keycache::KeyCache;
    use crate::registry::{ActionDefinition, FnHandler, ParamSchema, ParamType};
    use crate::report::Reporter;
    use axum::http::HeaderValue;
    use rsa::pkcs1::{EncodeRsaPrivateKey, EncodeRsaPublicKey};
    use rsa::{RsaPrivateKey, RsaPublicKey};
    use std::collections::HashMap;
    use trust_common::certificate::{issue_certificate, KeyMaterial};
    use trust_common::model::AgentStatus;

    fn test_key() -> KeyMaterial {
        let mut rng = rand::thread_rng();
        let private = RsaPrivateKey::new(&mut rng, 2048).expect("rsa key");
        let public = RsaPublicKey::from(&private);
        let private_pem = private.to_pkcs1_pem(rsa::pkcs1::LineEnding::LF).unwrap().to_string();
        let public_pem = public.to_pkcs1_pem(rsa::pkcs1::LineEnding::LF).unwrap();
        KeyMaterial::from_pem_pair(&private_pem, &public_pem).unwrap()
    }

    fn test_deps(key: &KeyMaterial) -> PipelineDeps {
        let mut registry = ActionRegistry::new();
        let mut params = HashMap::new();
        params.insert(
            "query".to_string(),
            ParamSchema { param_type: ParamType::String, required: true, description: "q".into() },
        );
        registry.register(ActionDefinition {
            name: "search".into(),
            description: "search".into(),
            min_score: 30,
            parameters: params,
            handler: Box::new(FnHandler(|p, _ctx| Ok(p["query"].clone()))),
        });

        let client = reqwest::Client::new();
        PipelineDeps {
            key_cache: Arc::new(KeyCache::for_tests(client.clone(), "http://station.invalid".into(), key.clone())),
            behavior: Arc::new(BehaviorTracker::new(BehaviorConfig::default())),
            registry: Arc::new(registry),
            analyzer: None,
            reporter: Arc::new(Reporter::new(client, "http://station.invalid".into(), "gw-test".into(), None)),
        }
    }

    fn bearer_headers(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
        headers
    }

    #[tokio::test]
    async fn missing_credential_is_unauthorized() {
        let key = test_key();
        let deps = test_deps(&key);
        let response = handle_action(&deps, &HeaderMap::new(), "search", json!({"query": "x"})).await;
        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn happy_path_executes_handler() {
        let key = test_key();
        let deps = test_deps(&key);
        let (token, _) = issue_certificate(
            &key,
            uuid::Uuid::new_v4(),
            "agent-1",
            uuid::Uuid::new_v4(),
            50,
            true,
            AgentStatus::Active,
            0,
            0,
            None,
            300,
            chrono::Utc::now(),
        )
        .unwrap();

        let response = handle_action(&deps, &bearer_headers(&token), "search", json!({"query": "x"})).await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body["data"], json!("x"));
    }

    #[tokio::test]
    async fn score_below_min_is_forbidden() {
        let key = test_key();
        let deps = test_deps(&key);
        let (token, _) = issue_certificate(
            &key,
            uuid::Uuid::new_v4(),
            "agent-2",
            uuid::Uuid::new_v4(),
            10,
            false,
            AgentStatus::Active,
            0,
            0,
            None,
            300,
            chrono::Utc::now(),
        )
        .unwrap();

        let response = handle_action(&deps, &bearer_headers(&token), "search", json!({"query": "x"})).await;
        assert_eq!(response.status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn scope_violation_is_forbidden() {
        let key = test_key();
        let deps = test_deps(&key);
        let (token, claims) = issue_certificate(
            &key,
            uuid::Uuid::new_v4(),
            "agent-3",
            uuid::Uuid::new_v4(),
            80,
            true,
            AgentStatus::Active,
            0,
            0,
            Some(vec!["order".into()]),
            300,
            chrono::Utc::now(),
        )
        .unwrap();

        let response = handle_action(&deps, &bearer_headers(&token), "search", json!({"query": "x"})).await;
        assert_eq!(response.status, StatusCode::FORBIDDEN);

        let snapshot = deps
            .behavior
            .snapshot()
            .into_iter()
            .find(|s| s.agent_id == claims.sub)
            .expect("session recorded");
        assert_eq!(snapshot.behavior_score, 90);
        assert!(snapshot.flags.contains(&crate::behavior::Flag::ScopeViolation));
    }

    #[tokio::test]
    async fn unknown_action_is_not_found() {
        let key = test_key();
        let deps = test_deps(&key);
        let (token, _) = issue_certificate(
            &key,
            uuid::Uuid::new_v4(),
            "agent-4",
            uuid::Uuid::new_v4(),
            80,
            true,
            AgentStatus::Active,
            0,
            0,
            None,
            300,
            chrono::Utc::now(),
        )
        .unwrap();

        let response = handle_action(&deps, &bearer_headers(&token), "checkout", json!({})).await;
        assert_eq!(response.status, StatusCode::NOT_FOUND);
    }
}
