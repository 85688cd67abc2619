use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Status of an agent's standing with the station. Status-change itself is
/// out of scope here; the core only ever reads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Active,
    Suspended,
    Banned,
}

impl AgentStatus {
    pub fn is_barred(&self) -> bool {
        matches!(self, AgentStatus::Suspended | AgentStatus::Banned)
    }
}

/// Durable record of an autonomous agent, identified internally by `id` and
/// externally by the `(developer_id, external_id)` pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: Uuid,
    pub developer_id: Uuid,
    pub external_id: String,
    pub identity_verified: bool,
    pub stake_amount: f64,
    pub total_actions: u64,
    pub successful_actions: u64,
    pub failed_actions: u64,
    pub status: AgentStatus,
    pub created_at: DateTime<Utc>,
    pub reputation_score: u8,
}

impl Agent {
    /// `successfulActions + failedActions <= totalActions` must hold for every
    /// agent at rest.
    pub fn counters_consistent(&self) -> bool {
        self.successful_actions + self.failed_actions <= self.total_actions
    }

    pub fn vouches_received_count(&self, vouches: &[Vouch]) -> u32 {
        vouches.iter().filter(|v| v.vouched_id == self.id).count() as u32
    }
}

/// Directed edge in the vouch graph. Unique per ordered `(voucher, vouched)`
/// pair. The voucher's cached score must have been >= 60 at creation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vouch {
    pub voucher_id: Uuid,
    pub vouched_id: Uuid,
    pub weight: u8,
    pub created_at: DateTime<Utc>,
}

/// Persisted certificate record keyed by `jti`. Owns the revocation bit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateRecord {
    pub jti: Uuid,
    pub agent_id: Uuid,
    pub score: u8,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
}

impl CertificateRecord {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && now < self.expires_at
    }
}

/// Outcome of a verification or report event, for the immutable audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Allowed,
    Denied,
}

/// Immutable audit record of a verification or report event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionLogEntry {
    pub id: Uuid,
    pub agent_id: Uuid,
    pub action_type: String,
    pub decision: Decision,
    pub reason: String,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

/// Kind of reputation-affecting event appended to an agent's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReputationEventType {
    Success,
    Failure,
    VouchReceived,
    StakeAdded,
    AbuseReported,
}

/// Immutable, append-only log entry. `score_change` is informational; the
/// authoritative score always comes from re-running the reputation formula.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReputationEvent {
    pub id: Uuid,
    pub agent_id: Uuid,
    pub event_type: ReputationEventType,
    pub score_change: i32,
    pub created_at: DateTime<Utc>,
}

/// Principal that owns agents. The core never mutates this beyond creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Developer {
    pub id: Uuid,
    pub name: String,
    /// Hash of the bearer API key, never the key itself. See `crate::apikey`.
    pub api_key_hash: String,
    pub created_at: DateTime<Utc>,
}
