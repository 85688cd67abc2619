//! Persistence abstraction. `InMemoryStore` backs tests and any deployment
//! without a `DATABASE_URL`; `PgStore` is the production backend. Both
//! implement the same trait so `StationService` never knows which one it's
//! talking to.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rand::Rng;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use trust_common::apikey::hash_api_key;
use trust_common::error::CoreError;
use trust_common::model::{
    ActionLogEntry, Agent, AgentStatus, CertificateRecord, Developer, ReputationEvent, Vouch,
};
use uuid::Uuid;

/// Minimum cached score a voucher must hold at vouch creation time (spec §3).
const MIN_VOUCHER_SCORE: u8 = 60;

#[async_trait]
pub trait Store: Send + Sync {
    async fn get_developer_by_api_key_hash(&self, hash: &str) -> Option<Developer>;
    async fn create_developer(&self, name: &str) -> (Developer, String);

    async fn get_agent_by_external(&self, developer_id: Uuid, external_id: &str) -> Option<Agent>;
    async fn get_agent(&self, id: Uuid) -> Option<Agent>;
    async fn create_agent(
        &self,
        developer_id: Uuid,
        external_id: &str,
    ) -> Result<Agent, CoreError>;
    async fn update_agent(&self, agent: Agent);

    async fn create_vouch(
        &self,
        voucher_id: Uuid,
        vouched_id: Uuid,
        weight: u8,
    ) -> Result<Vouch, CoreError>;
    async fn vouches_received_count(&self, agent_id: Uuid) -> u32;

    async fn insert_certificate(&self, record: CertificateRecord);
    async fn get_certificate(&self, jti: Uuid) -> Option<CertificateRecord>;
    async fn revoke_certificate(&self, jti: Uuid) -> bool;

    async fn append_action_log(&self, entry: ActionLogEntry);
    async fn append_reputation_event(&self, event: ReputationEvent);

    /// Resolve the agent that owns a previously logged action, scoped to
    /// `developer_id` so one developer cannot reference another's actions.
    async fn get_agent_for_action(&self, developer_id: Uuid, action_id: Uuid) -> Option<Agent>;
}

#[derive(Default)]
struct MemoryState {
    developers: HashMap<Uuid, Developer>,
    developers_by_hash: HashMap<String, Uuid>,
    agents: HashMap<Uuid, Agent>,
    agents_by_external: HashMap<(Uuid, String), Uuid>,
    vouches: Vec<Vouch>,
    certificates: HashMap<Uuid, CertificateRecord>,
    action_log: Vec<ActionLogEntry>,
    reputation_events: Vec<ReputationEvent>,
}

/// In-memory `Store`. A single mutex guards every collection: simpler than
/// per-agent locking and sufficient for the test/no-database deployment mode
/// this backs. `PgStore` serializes per-agent read-modify-write with a row
/// lock instead.
pub struct InMemoryStore {
    state: Mutex<MemoryState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn generate_api_key() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 24] = rng.gen();
    format!("ats_{}", hex_encode(&bytes))
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get_developer_by_api_key_hash(&self, hash: &str) -> Option<Developer> {
        let state = self.state.lock();
        let id = state.developers_by_hash.get(hash)?;
        state.developers.get(id).cloned()
    }

    async fn create_developer(&self, name: &str) -> (Developer, String) {
        let raw_key = generate_api_key();
        let api_key_hash = hash_api_key(&raw_key);
        let developer = Developer {
            id: Uuid::new_v4(),
            name: name.to_string(),
            api_key_hash: api_key_hash.clone(),
            created_at: Utc::now(),
        };
        let mut state = self.state.lock();
        state
            .developers_by_hash
            .insert(api_key_hash, developer.id);
        state.developers.insert(developer.id, developer.clone());
        (developer, raw_key)
    }

    async fn get_agent_by_external(&self, developer_id: Uuid, external_id: &str) -> Option<Agent> {
        let state = self.state.lock();
        let id = state
            .agents_by_external
            .get(&(developer_id, external_id.to_string()))?;
        state.agents.get(id).cloned()
    }

    async fn get_agent(&self, id: Uuid) -> Option<Agent> {
        self.state.lock().agents.get(&id).cloned()
    }

    async fn create_agent(
        &self,
        developer_id: Uuid,
        external_id: &str,
    ) -> Result<Agent, CoreError> {
        let mut state = self.state.lock();
        let key = (developer_id, external_id.to_string());
        if state.agents_by_external.contains_key(&key) {
            return Err(CoreError::Conflict(format!(
                "agent '{external_id}' already registered for this developer"
            )));
        }
        let agent = Agent {
            id: Uuid::new_v4(),
            developer_id,
            external_id: external_id.to_string(),
            identity_verified: false,
            stake_amount: 0.0,
            total_actions: 0,
            successful_actions: 0,
            failed_actions: 0,
            status: AgentStatus::Active,
            created_at: Utc::now(),
            reputation_score: 50,
        };
        state.agents_by_external.insert(key, agent.id);
        state.agents.insert(agent.id, agent.clone());
        Ok(agent)
    }

    async fn update_agent(&self, agent: Agent) {
        self.state.lock().agents.insert(agent.id, agent);
    }

    async fn create_vouch(
        &self,
        voucher_id: Uuid,
        vouched_id: Uuid,
        weight: u8,
    ) -> Result<Vouch, CoreError> {
        let mut state = self.state.lock();

        let voucher = state
            .agents
            .get(&voucher_id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound("voucher agent not found".into()))?;
        if voucher.reputation_score < MIN_VOUCHER_SCORE {
            return Err(CoreError::Forbidden(format!(
                "voucher score {} is below the minimum {} required to vouch",
                voucher.reputation_score, MIN_VOUCHER_SCORE
            )));
        }
        if !state.agents.contains_key(&vouched_id) {
            return Err(CoreError::NotFound("vouched agent not found".into()));
        }
        if state
            .vouches
            .iter()
            .any(|v| v.voucher_id == voucher_id && v.vouched_id == vouched_id)
        {
            return Err(CoreError::Conflict("vouch already exists".into()));
        }

        let vouch = Vouch {
            voucher_id,
            vouched_id,
            weight,
            created_at: Utc::now(),
        };
        state.vouches.push(vouch.clone());
        Ok(vouch)
    }

    async fn vouches_received_count(&self, agent_id: Uuid) -> u32 {
        self.state
            .lock()
            .vouches
            .iter()
            .filter(|v| v.vouched_id == agent_id)
            .count() as u32
    }

    async fn insert_certificate(&self, record: CertificateRecord) {
        self.state.lock().certificates.insert(record.jti, record);
    }

    async fn get_certificate(&self, jti: Uuid) -> Option<CertificateRecord> {
        self.state.lock().certificates.get(&jti).cloned()
    }

    async fn revoke_certificate(&self, jti: Uuid) -> bool {
        let mut state = self.state.lock();
        match state.certificates.get_mut(&jti) {
            Some(record) => {
                record.revoked = true;
                true
            }
            None => false,
        }
    }

    async fn append_action_log(&self, entry: ActionLogEntry) {
        self.state.lock().action_log.push(entry);
    }

    async fn append_reputation_event(&self, event: ReputationEvent) {
        self.state.lock().reputation_events.push(event);
    }

    async fn get_agent_for_action(&self, developer_id: Uuid, action_id: Uuid) -> Option<Agent> {
        let state = self.state.lock();
        let entry = state.action_log.iter().find(|e| e.id == action_id)?;
        let agent = state.agents.get(&entry.agent_id)?;
        if agent.developer_id != developer_id {
            return None;
        }
        Some(agent.clone())
    }
}

/// Postgres-backed `Store`. Uses only runtime-checked `sqlx::query*` calls, no
/// `query!` family, since this crate is never built against a live database.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    async fn get_developer_by_api_key_hash(&self, hash: &str) -> Option<Developer> {
        sqlx::query_as::<_, DeveloperRow>(
            "SELECT id, name, api_key_hash, created_at FROM developers WHERE api_key_hash = $1",
        )
        .bind(hash)
        .fetch_optional(&self.pool)
        .await
        .ok()
        .flatten()
        .map(Into::into)
    }

    async fn create_developer(&self, name: &str) -> (Developer, String) {
        let raw_key = generate_api_key();
        let api_key_hash = hash_api_key(&raw_key);
        let id = Uuid::new_v4();
        let created_at = Utc::now();
        let _ = sqlx::query(
            "INSERT INTO developers (id, name, api_key_hash, created_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(id)
        .bind(name)
        .bind(&api_key_hash)
        .bind(created_at)
        .execute(&self.pool)
        .await;
        (
            Developer {
                id,
                name: name.to_string(),
                api_key_hash,
                created_at,
            },
            raw_key,
        )
    }

    async fn get_agent_by_external(&self, developer_id: Uuid, external_id: &str) -> Option<Agent> {
        sqlx::query_as::<_, AgentRow>(
            "SELECT id, developer_id, external_id, identity_verified, stake_amount, \
             total_actions, successful_actions, failed_actions, status, created_at, \
             reputation_score FROM agents WHERE developer_id = $1 AND external_id = $2",
        )
        .bind(developer_id)
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await
        .ok()
        .flatten()
        .map(Into::into)
    }

    async fn get_agent(&self, id: Uuid) -> Option<Agent> {
        sqlx::query_as::<_, AgentRow>(
            "SELECT id, developer_id, external_id, identity_verified, stake_amount, \
             total_actions, successful_actions, failed_actions, status, created_at, \
             reputation_score FROM agents WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .ok()
        .flatten()
        .map(Into::into)
    }

    async fn create_agent(
        &self,
        developer_id: Uuid,
        external_id: &str,
    ) -> Result<Agent, CoreError> {
        let agent = Agent {
            id: Uuid::new_v4(),
            developer_id,
            external_id: external_id.to_string(),
            identity_verified: false,
            stake_amount: 0.0,
            total_actions: 0,
            successful_actions: 0,
            failed_actions: 0,
            status: AgentStatus::Active,
            created_at: Utc::now(),
            reputation_score: 50,
        };
        sqlx::query(
            "INSERT INTO agents (id, developer_id, external_id, identity_verified, \
             stake_amount, total_actions, successful_actions, failed_actions, status, \
             created_at, reputation_score) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11)",
        )
        .bind(agent.id)
        .bind(agent.developer_id)
        .bind(&agent.external_id)
        .bind(agent.identity_verified)
        .bind(agent.stake_amount)
        .bind(agent.total_actions as i64)
        .bind(agent.successful_actions as i64)
        .bind(agent.failed_actions as i64)
        .bind(status_str(agent.status))
        .bind(agent.created_at)
        .bind(agent.reputation_score as i16)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => CoreError::Conflict(
                format!("agent '{external_id}' already registered for this developer"),
            ),
            other => CoreError::Internal(other.to_string()),
        })?;
        Ok(agent)
    }

    async fn update_agent(&self, agent: Agent) {
        let _ = sqlx::query(
            "UPDATE agents SET identity_verified=$2, stake_amount=$3, total_actions=$4, \
             successful_actions=$5, failed_actions=$6, status=$7, reputation_score=$8 \
             WHERE id=$1",
        )
        .bind(agent.id)
        .bind(agent.identity_verified)
        .bind(agent.stake_amount)
        .bind(agent.total_actions as i64)
        .bind(agent.successful_actions as i64)
        .bind(agent.failed_actions as i64)
        .bind(status_str(agent.status))
        .bind(agent.reputation_score as i16)
        .execute(&self.pool)
        .await;
    }

    async fn create_vouch(
        &self,
        voucher_id: Uuid,
        vouched_id: Uuid,
        weight: u8,
    ) -> Result<Vouch, CoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| CoreError::Internal(e.to_string()))?;

        let score: Option<i16> =
            sqlx::query_scalar("SELECT reputation_score FROM agents WHERE id = $1 FOR UPDATE")
                .bind(voucher_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| CoreError::Internal(e.to_string()))?;
        let score = score.ok_or_else(|| CoreError::NotFound("voucher agent not found".into()))?;
        if (score as u8) < MIN_VOUCHER_SCORE {
            return Err(CoreError::Forbidden(format!(
                "voucher score {score} is below the minimum {MIN_VOUCHER_SCORE} required to vouch"
            )));
        }

        let vouch = Vouch {
            voucher_id,
            vouched_id,
            weight,
            created_at: Utc::now(),
        };
        sqlx::query(
            "INSERT INTO vouches (voucher_id, vouched_id, weight, created_at) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(vouch.voucher_id)
        .bind(vouch.vouched_id)
        .bind(vouch.weight as i16)
        .bind(vouch.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                CoreError::Conflict("vouch already exists".into())
            }
            other => CoreError::Internal(other.to_string()),
        })?;

        tx.commit()
            .await
            .map_err(|e| CoreError::Internal(e.to_string()))?;
        Ok(vouch)
    }

    async fn vouches_received_count(&self, agent_id: Uuid) -> u32 {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM vouches WHERE vouched_id = $1")
            .bind(agent_id)
            .fetch_one(&self.pool)
            .await
            .unwrap_or(0) as u32
    }

    async fn insert_certificate(&self, record: CertificateRecord) {
        let _ = sqlx::query(
            "INSERT INTO certificates (jti, agent_id, score, issued_at, expires_at, revoked) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(record.jti)
        .bind(record.agent_id)
        .bind(record.score as i16)
        .bind(record.issued_at)
        .bind(record.expires_at)
        .bind(record.revoked)
        .execute(&self.pool)
        .await;
    }

    async fn get_certificate(&self, jti: Uuid) -> Option<CertificateRecord> {
        sqlx::query_as::<_, CertificateRow>(
            "SELECT jti, agent_id, score, issued_at, expires_at, revoked FROM certificates \
             WHERE jti = $1",
        )
        .bind(jti)
        .fetch_optional(&self.pool)
        .await
        .ok()
        .flatten()
        .map(Into::into)
    }

    async fn revoke_certificate(&self, jti: Uuid) -> bool {
        sqlx::query("UPDATE certificates SET revoked = true WHERE jti = $1")
            .bind(jti)
            .execute(&self.pool)
            .await
            .map(|result| result.rows_affected() > 0)
            .unwrap_or(false)
    }

    async fn append_action_log(&self, entry: ActionLogEntry) {
        let _ = sqlx::query(
            "INSERT INTO action_log (id, agent_id, action_type, decision, reason, metadata, \
             created_at) VALUES ($1,$2,$3,$4,$5,$6,$7)",
        )
        .bind(entry.id)
        .bind(entry.agent_id)
        .bind(&entry.action_type)
        .bind(decision_str(entry.decision))
        .bind(&entry.reason)
        .bind(entry.metadata)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await;
    }

    async fn append_reputation_event(&self, event: ReputationEvent) {
        let _ = sqlx::query(
            "INSERT INTO reputation_events (id, agent_id, event_type, score_change, created_at) \
             VALUES ($1,$2,$3,$4,$5)",
        )
        .bind(event.id)
        .bind(event.agent_id)
        .bind(event_type_str(event.event_type))
        .bind(event.score_change)
        .bind(event.created_at)
        .execute(&self.pool)
        .await;
    }

    async fn get_agent_for_action(&self, developer_id: Uuid, action_id: Uuid) -> Option<Agent> {
        sqlx::query_as::<_, AgentRow>(
            "SELECT a.id, a.developer_id, a.external_id, a.identity_verified, a.stake_amount, \
             a.total_actions, a.successful_actions, a.failed_actions, a.status, a.created_at, \
             a.reputation_score FROM agents a JOIN action_log l ON l.agent_id = a.id \
             WHERE l.id = $1 AND a.developer_id = $2",
        )
        .bind(action_id)
        .bind(developer_id)
        .fetch_optional(&self.pool)
        .await
        .ok()
        .flatten()
        .map(Into::into)
    }
}

fn status_str(status: AgentStatus) -> &'static str {
    match status {
        AgentStatus::Active => "active",
        AgentStatus::Suspended => "suspended",
        AgentStatus::Banned => "banned",
    }
}

fn decision_str(decision: trust_common::model::Decision) -> &'static str {
    match decision {
        trust_common::model::Decision::Allowed => "allowed",
        trust_common::model::Decision::Denied => "denied",
    }
}

fn event_type_str(kind: trust_common::model::ReputationEventType) -> &'static str {
    use trust_common::model::ReputationEventType::*;
    match kind {
        Success => "success",
        Failure => "failure",
        VouchReceived => "vouch_received",
        StakeAdded => "stake_added",
        AbuseReported => "abuse_reported",
    }
}

#[derive(sqlx::FromRow)]
struct DeveloperRow {
    id: Uuid,
    name: String,
    api_key_hash: String,
    created_at: chrono::DateTime<Utc>,
}

impl From<DeveloperRow> for Developer {
    fn from(row: DeveloperRow) -> Self {
        Developer {
            id: row.id,
            name: row.name,
            api_key_hash: row.api_key_hash,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct AgentRow {
    id: Uuid,
    developer_id: Uuid,
    external_id: String,
    identity_verified: bool,
    stake_amount: f64,
    total_actions: i64,
    successful_actions: i64,
    failed_actions: i64,
    status: String,
    created_at: chrono::DateTime<Utc>,
    reputation_score: i16,
}

impl From<AgentRow> for Agent {
    fn from(row: AgentRow) -> Self {
        Agent {
            id: row.id,
            developer_id: row.developer_id,
            external_id: row.external_id,
            identity_verified: row.identity_verified,
            stake_amount: row.stake_amount,
            total_actions: row.total_actions as u64,
            successful_actions: row.successful_actions as u64,
            failed_actions: row.failed_actions as u64,
            status: match row.status.as_str() {
                "suspended" => AgentStatus::Suspended,
                "banned" => AgentStatus::Banned,
                _ => AgentStatus::Active,
            },
            created_at: row.created_at,
            reputation_score: row.reputation_score as u8,
        }
    }
}

#[derive(sqlx::FromRow)]
struct CertificateRow {
    jti: Uuid,
    agent_id: Uuid,
    score: i16,
    issued_at: chrono::DateTime<Utc>,
    expires_at: chrono::DateTime<Utc>,
    revoked: bool,
}

impl From<CertificateRow> for CertificateRecord {
    fn from(row: CertificateRow) -> Self {
        CertificateRecord {
            jti: row.jti,
            agent_id: row.agent_id,
            score: row.score as u8,
            issued_at: row.issued_at,
            expires_at: row.expires_at,
            revoked: row.revoked,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn duplicate_agent_registration_conflicts() {
        let store = InMemoryStore::new();
        let (dev, _) = store.create_developer("acme").await;
        store.create_agent(dev.id, "agent-1").await.unwrap();
        let err = store.create_agent(dev.id, "agent-1").await.unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn vouch_requires_minimum_voucher_score() {
        let store = InMemoryStore::new();
        let (dev, _) = store.create_developer("acme").await;
        let voucher = store.create_agent(dev.id, "voucher").await.unwrap();
        let vouched = store.create_agent(dev.id, "vouched").await.unwrap();
        // fresh agents start at score 50, below the 60 threshold
        let err = store
            .create_vouch(voucher.id, vouched.id, 3)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Forbidden(_)));
    }

    #[tokio::test]
    async fn duplicate_vouch_pair_conflicts() {
        let store = InMemoryStore::new();
        let (dev, _) = store.create_developer("acme").await;
        let mut voucher = store.create_agent(dev.id, "voucher").await.unwrap();
        let vouched = store.create_agent(dev.id, "vouched").await.unwrap();
        voucher.reputation_score = 80;
        store.update_agent(voucher.clone()).await;

        store.create_vouch(voucher.id, vouched.id, 3).await.unwrap();
        let err = store
            .create_vouch(voucher.id, vouched.id, 3)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
    }
}
