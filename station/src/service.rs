//! Orchestration glue: issuance, remote verification, pre-action checks, and
//! report ingestion. Pure scoring lives in `trust_common::reputation`; this
//! module is the only place that turns persisted state into scoring inputs
//! and writes the recomputed score back atomically with the triggering
//! mutation (spec §4.1).

use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use trust_common::certificate::{issue_certificate, verify_local, Claims, KeyMaterial, VerifyError};
use trust_common::error::CoreError;
use trust_common::model::{
    ActionLogEntry, Agent, CertificateRecord, Decision, Developer, ReputationEvent,
    ReputationEventType,
};
use trust_common::reputation::{compute_score, ReputationInputs};
use uuid::Uuid;

use crate::store::Store;

pub struct StationService {
    pub store: Arc<dyn Store>,
    pub key: KeyMaterial,
    pub certificate_ttl_seconds: i64,
}

pub struct IssueOutcome {
    pub token: String,
    pub expires_at: chrono::DateTime<Utc>,
    pub score: u8,
}

pub struct VerifyOutcome {
    pub valid: bool,
    pub payload: Option<Claims>,
}

pub struct PreActionOutcome {
    pub allowed: bool,
    pub score: u8,
    pub reason: String,
    pub action_id: Uuid,
}

pub struct ReportItem {
    pub action_type: String,
    pub outcome: String,
    pub metadata: Value,
    pub performed_at: Option<chrono::DateTime<Utc>>,
}

pub struct ReportSummary {
    pub agent_id: Uuid,
    pub actions_processed: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub new_reputation_score: u8,
}

pub struct ReputationBreakdown {
    pub agent_id: Uuid,
    pub score: u8,
    pub identity_verified: bool,
    pub stake_amount: f64,
    pub vouches_received: u32,
    pub total_actions: u64,
    pub successful_actions: u64,
    pub failed_actions: u64,
}

impl StationService {
    pub async fn register_developer(&self, name: &str) -> (Developer, String) {
        self.store.create_developer(name).await
    }

    pub async fn register_agent(
        &self,
        developer_id: Uuid,
        external_id: &str,
    ) -> Result<Agent, CoreError> {
        self.store.create_agent(developer_id, external_id).await
    }

    /// Re-run the reputation formula against this agent's current persisted
    /// state and write the cached score back. Called by every mutation path
    /// that can change an input (spec §4.1).
    async fn recompute_and_persist(&self, mut agent: Agent) -> Agent {
        let vouches = self.store.vouches_received_count(agent.id).await;
        let inputs = ReputationInputs {
            identity_verified: agent.identity_verified,
            stake_amount: agent.stake_amount,
            vouches_received_count: vouches,
            total_actions: agent.total_actions,
            successful_actions: agent.successful_actions,
            failed_actions: agent.failed_actions,
            created_at: agent.created_at,
        };
        agent.reputation_score = compute_score(&inputs, Utc::now());
        self.store.update_agent(agent.clone()).await;
        agent
    }

    /// spec §4.2: issue(externalId, developerId, scope?) -> (token, expiresAt, score).
    /// Here the agent is addressed by its internal id, as the HTTP surface
    /// in spec §6 passes `agentId` rather than `externalId`.
    pub async fn issue_for_agent(
        &self,
        developer_id: Uuid,
        agent_id: Uuid,
        scope: Option<Vec<String>>,
    ) -> Result<IssueOutcome, CoreError> {
        let agent = self
            .store
            .get_agent(agent_id)
            .await
            .filter(|a| a.developer_id == developer_id)
            .ok_or_else(|| CoreError::NotFound("agent not found".into()))?;

        if agent.status.is_barred() {
            return Err(CoreError::Forbidden(format!(
                "agent status is {:?}, cannot issue a certificate",
                agent.status
            )));
        }

        let agent = self.recompute_and_persist(agent).await;
        let now = Utc::now();

        let (token, claims) = issue_certificate(
            &self.key,
            agent.id,
            &agent.external_id,
            agent.developer_id,
            agent.reputation_score,
            agent.identity_verified,
            agent.status,
            agent.total_actions,
            agent.successful_actions,
            scope,
            self.certificate_ttl_seconds,
            now,
        )
        .map_err(|e| CoreError::Internal(e.to_string()))?;

        let expires_at = claims.expires_at();
        self.store
            .insert_certificate(CertificateRecord {
                jti: claims.jti,
                agent_id: agent.id,
                score: agent.reputation_score,
                issued_at: now,
                expires_at,
                revoked: false,
            })
            .await;

        Ok(IssueOutcome {
            token,
            expires_at,
            score: agent.reputation_score,
        })
    }

    /// spec §4.3 remote path: local checks plus a revocation lookup by jti.
    pub async fn verify_remote(&self, token: &str) -> VerifyOutcome {
        let claims = match verify_local(&self.key, token) {
            Ok(c) => c,
            Err(_) => return VerifyOutcome { valid: false, payload: None },
        };

        match self.store.get_certificate(claims.jti).await {
            Some(record) if !record.revoked => VerifyOutcome {
                valid: true,
                payload: Some(claims),
            },
            _ => VerifyOutcome { valid: false, payload: None },
        }
    }

    /// spec §6 `/verify`: pre-action check. Logs the decision as an action
    /// log entry so a later `/report` can be correlated by `actionId`.
    pub async fn pre_action_check(
        &self,
        developer_id: Uuid,
        agent_id: Uuid,
        action_type: &str,
        threshold: Option<u8>,
        context: Value,
    ) -> Result<PreActionOutcome, CoreError> {
        let agent = self
            .store
            .get_agent(agent_id)
            .await
            .filter(|a| a.developer_id == developer_id)
            .ok_or_else(|| CoreError::NotFound("agent not found".into()))?;

        let (allowed, reason) = if agent.status.is_barred() {
            (false, format!("agent status is {:?}", agent.status))
        } else if let Some(threshold) = threshold {
            if agent.reputation_score >= threshold {
                (true, "score meets threshold".to_string())
            } else {
                (
                    false,
                    format!(
                        "Insufficient reputation score: {} < {}",
                        agent.reputation_score, threshold
                    ),
                )
            }
        } else {
            (true, "no threshold supplied".to_string())
        };

        let entry = ActionLogEntry {
            id: Uuid::new_v4(),
            agent_id: agent.id,
            action_type: action_type.to_string(),
            decision: if allowed { Decision::Allowed } else { Decision::Denied },
            reason: reason.clone(),
            metadata: context,
            created_at: Utc::now(),
        };
        let action_id = entry.id;
        self.store.append_action_log(entry).await;

        Ok(PreActionOutcome {
            allowed,
            score: agent.reputation_score,
            reason,
            action_id,
        })
    }

    /// spec §6 `/report`: a single post-action outcome keyed by the
    /// `actionId` returned from `/verify`. Folds through the same
    /// counter/recompute path as `/reports` for one item.
    pub async fn report_single(
        &self,
        developer_id: Uuid,
        action_id: Uuid,
        outcome_success: bool,
    ) -> Result<ReportSummary, CoreError> {
        let agent = self
            .store
            .get_agent_for_action(developer_id, action_id)
            .await
            .ok_or_else(|| CoreError::NotFound("action not found".into()))?;

        let agent = self
            .apply_outcome(agent, outcome_success, "single-report")
            .await;

        Ok(ReportSummary {
            agent_id: agent.id,
            actions_processed: 1,
            success_count: if outcome_success { 1 } else { 0 },
            failure_count: if outcome_success { 0 } else { 1 },
            new_reputation_score: agent.reputation_score,
        })
    }

    /// spec §4.8: `POST /reports`, gateway batch report.
    pub async fn ingest_reports(
        &self,
        developer_id: Uuid,
        agent_id: Uuid,
        certificate_jti: Uuid,
        gateway_id: &str,
        actions: Vec<ReportItem>,
    ) -> Result<ReportSummary, CoreError> {
        let mut agent = self
            .store
            .get_agent(agent_id)
            .await
            .filter(|a| a.developer_id == developer_id)
            .ok_or_else(|| CoreError::NotFound("agent not found".into()))?;

        let certificate = self
            .store
            .get_certificate(certificate_jti)
            .await
            .filter(|c| c.agent_id == agent.id)
            .ok_or_else(|| CoreError::NotFound("certificate not found for this agent".into()))?;
        let _ = certificate;

        let mut success_count = 0u64;
        let mut failure_count = 0u64;

        for item in &actions {
            let success = item.outcome.eq_ignore_ascii_case("success");
            self.store
                .append_action_log(ActionLogEntry {
                    id: Uuid::new_v4(),
                    agent_id: agent.id,
                    action_type: item.action_type.clone(),
                    decision: Decision::Allowed,
                    reason: format!("reported by gateway {gateway_id}"),
                    metadata: item.metadata.clone(),
                    created_at: item.performed_at.unwrap_or_else(Utc::now),
                })
                .await;

            agent.total_actions += 1;
            if success {
                agent.successful_actions += 1;
                success_count += 1;
                self.store
                    .append_reputation_event(ReputationEvent {
                        id: Uuid::new_v4(),
                        agent_id: agent.id,
                        event_type: ReputationEventType::Success,
                        score_change: 0,
                        created_at: Utc::now(),
                    })
                    .await;
            } else {
                agent.failed_actions += 1;
                failure_count += 1;
                self.store
                    .append_reputation_event(ReputationEvent {
                        id: Uuid::new_v4(),
                        agent_id: agent.id,
                        event_type: ReputationEventType::Failure,
                        score_change: -5,
                        created_at: Utc::now(),
                    })
                    .await;
            }
        }

        let agent = self.recompute_and_persist(agent).await;

        Ok(ReportSummary {
            agent_id: agent.id,
            actions_processed: actions.len() as u64,
            success_count,
            failure_count,
            new_reputation_score: agent.reputation_score,
        })
    }

    async fn apply_outcome(&self, mut agent: Agent, success: bool, source: &str) -> Agent {
        agent.total_actions += 1;
        let event_type = if success {
            agent.successful_actions += 1;
            ReputationEventType::Success
        } else {
            agent.failed_actions += 1;
            ReputationEventType::Failure
        };
        self.store
            .append_reputation_event(ReputationEvent {
                id: Uuid::new_v4(),
                agent_id: agent.id,
                event_type,
                score_change: if success { 0 } else { -5 },
                created_at: Utc::now(),
            })
            .await;
        tracing::debug!(agent_id = %agent.id, source, success, "applied action outcome");
        self.recompute_and_persist(agent).await
    }

    pub async fn reputation_breakdown(
        &self,
        developer_id: Uuid,
        external_id: &str,
    ) -> Result<ReputationBreakdown, CoreError> {
        let agent = self
            .store
            .get_agent_by_external(developer_id, external_id)
            .await
            .ok_or_else(|| CoreError::NotFound("agent not found".into()))?;
        let vouches = self.store.vouches_received_count(agent.id).await;

        Ok(ReputationBreakdown {
            agent_id: agent.id,
            score: agent.reputation_score,
            identity_verified: agent.identity_verified,
            stake_amount: agent.stake_amount,
            vouches_received: vouches,
            total_actions: agent.total_actions,
            successful_actions: agent.successful_actions,
            failed_actions: agent.failed_actions,
        })
    }
}

pub fn classify_verify_error(err: VerifyError) -> CoreError {
    match err {
        VerifyError::MissingCredential => CoreError::Unauthenticated(err.to_string()),
        VerifyError::Expired => CoreError::CertExpired,
        VerifyError::InvalidSignature => CoreError::CertInvalid(err.to_string()),
        VerifyError::AgentDisabled => CoreError::Forbidden(err.to_string()),
    }
}
