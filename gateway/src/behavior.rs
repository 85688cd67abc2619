//! Live per-session behavior tracker (spec §4.6). A gateway-local singleton:
//! sessions never cross gateways, and each agent's session is guarded by its
//! own lock so unrelated agents never contend with each other.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::BehaviorConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Flag {
    RapidFire,
    HighFailureRate,
    ActionEnumeration,
    RepeatedAction,
    ScopeViolation,
    BurstDetected,
}

impl Flag {
    fn is_scope_violation(self) -> bool {
        matches!(self, Flag::ScopeViolation)
    }
}

#[derive(Debug, Clone)]
struct SessionAction {
    action_name: String,
    params_fingerprint: String,
    success: bool,
    score_met: bool,
    timestamp: DateTime<Utc>,
}

/// Stable fingerprint of `(actionName, params)` used for repetition
/// detection (spec §8's canonical-params-fingerprint round-trip property).
pub fn fingerprint(action_name: &str, params: &serde_json::Value) -> String {
    let canonical = canonicalize(params);
    let mut hasher = Sha256::new();
    hasher.update(action_name.as_bytes());
    hasher.update(b"||");
    hasher.update(canonical.as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..6]) // ~48 bits, matching spec's stated sufficiency
}

fn canonicalize(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = String::from("{");
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&format!("{key:?}:{}", canonicalize(&map[*key])));
            }
            out.push('}');
            out
        }
        serde_json::Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(canonicalize).collect();
            format!("[{}]", parts.join(","))
        }
        other => other.to_string(),
    }
}

pub struct Session {
    pub agent_id: Uuid,
    pub external_id: String,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub behavior_score: u8,
    actions: Vec<SessionAction>,
    flags: HashSet<Flag>,
    pub blocked: bool,
}

impl Session {
    fn new(agent_id: Uuid, external_id: String, now: DateTime<Utc>) -> Self {
        Self {
            agent_id,
            external_id,
            started_at: now,
            last_activity_at: now,
            behavior_score: 100,
            actions: Vec::new(),
            flags: HashSet::new(),
            blocked: false,
        }
    }

    fn is_stale(&self, now: DateTime<Utc>, timeout: ChronoDuration) -> bool {
        now - self.last_activity_at > timeout
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub agent_id: Uuid,
    pub external_id: String,
    #[serde(rename = "behaviorScore")]
    pub behavior_score: u8,
    pub blocked: bool,
    pub flags: Vec<Flag>,
    #[serde(rename = "actionCount")]
    pub action_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct BehaviorEvent {
    pub agent_id: Uuid,
    pub flag: Flag,
    #[serde(rename = "behaviorScore")]
    pub behavior_score: u8,
    pub blocked: bool,
}

pub trait BehaviorListener: Send + Sync {
    fn on_event(&self, event: BehaviorEvent);
}

pub struct LoggingListener;

impl BehaviorListener for LoggingListener {
    fn on_event(&self, event: BehaviorEvent) {
        tracing::info!(
            agent_id = %event.agent_id,
            flag = ?event.flag,
            score = event.behavior_score,
            blocked = event.blocked,
            "behavior flag triggered"
        );
    }
}

pub struct BehaviorTracker {
    config: BehaviorConfig,
    sessions: RwLock<HashMap<Uuid, Arc<Mutex<Session>>>>,
    listener: Arc<dyn BehaviorListener>,
}

impl BehaviorTracker {
    pub fn new(config: BehaviorConfig) -> Self {
        Self {
            config,
            sessions: RwLock::new(HashMap::new()),
            listener: Arc::new(LoggingListener),
        }
    }

    pub fn with_listener(config: BehaviorConfig, listener: Arc<dyn BehaviorListener>) -> Self {
        Self {
            config,
            sessions: RwLock::new(HashMap::new()),
            listener,
        }
    }

    pub fn is_blocked(&self, agent_id: Uuid) -> bool {
        let timeout = ChronoDuration::from_std(self.config.session_timeout).unwrap_or_default();
        let now = Utc::now();
        let handle = {
            let sessions = self.sessions.read();
            sessions.get(&agent_id).cloned()
        };
        match handle {
            Some(session_lock) => {
                let session = session_lock.lock();
                session.blocked && !session.is_stale(now, timeout)
            }
            None => false,
        }
    }

    fn session_handle(&self, agent_id: Uuid, external_id: &str) -> Arc<Mutex<Session>> {
        if let Some(existing) = self.sessions.read().get(&agent_id) {
            return existing.clone();
        }
        let mut sessions = self.sessions.write();
        sessions
            .entry(agent_id)
            .or_insert_with(|| Arc::new(Mutex::new(Session::new(agent_id, external_id.to_string(), Utc::now()))))
            .clone()
    }

    /// spec §4.6 `recordAction`: append the action, run every detector, apply
    /// penalties, and return `(behaviorScore, newFlags, blockedNow)`.
    pub fn record_action(
        &self,
        agent_id: Uuid,
        external_id: &str,
        action_name: &str,
        params: &serde_json::Value,
        success: bool,
        score_met: bool,
    ) -> (u8, Vec<Flag>, bool) {
        let timeout = ChronoDuration::from_std(self.config.session_timeout).unwrap_or_default();
        let now = Utc::now();
        let handle = self.session_handle(agent_id, external_id);
        let mut session = handle.lock();

        if session.is_stale(now, timeout) {
            *session = Session::new(agent_id, external_id.to_string(), now);
        }
        session.last_activity_at = now;

        session.actions.push(SessionAction {
            action_name: action_name.to_string(),
            params_fingerprint: fingerprint(action_name, params),
            success,
            score_met,
            timestamp: now,
        });

        if session.blocked {
            return (session.behavior_score, Vec::new(), true);
        }

        let triggered = self.run_detectors(&session, now);
        let mut newly_fired = Vec::new();

        for flag in &triggered {
            let recurring = session.flags.contains(flag);
            let penalty = if flag.is_scope_violation() || !recurring {
                self.config.violation_penalty
            } else {
                self.config.violation_penalty / 2
            };
            session.behavior_score = session.behavior_score.saturating_sub(penalty);
            session.flags.insert(*flag);
            newly_fired.push(*flag);

            self.listener.on_event(BehaviorEvent {
                agent_id,
                flag: *flag,
                behavior_score: session.behavior_score,
                blocked: session.behavior_score <= self.config.block_threshold,
            });
        }

        if session.behavior_score <= self.config.block_threshold {
            session.blocked = true;
        }

        (session.behavior_score, newly_fired, session.blocked)
    }

    fn run_detectors(&self, session: &Session, now: DateTime<Utc>) -> Vec<Flag> {
        let window = ChronoDuration::milliseconds(60_000);
        let recent: Vec<&SessionAction> = session
            .actions
            .iter()
            .filter(|a| now - a.timestamp <= window)
            .collect();

        let mut flags = Vec::new();

        if recent.len() as u32 > self.config.max_actions_per_minute {
            flags.push(Flag::RapidFire);
        }

        let failures = session.actions.iter().filter(|a| !a.success).count() as u32;
        if failures >= self.config.max_failures_before_flag {
            flags.push(Flag::HighFailureRate);
        }

        let unique_actions: HashSet<&str> = recent.iter().map(|a| a.action_name.as_str()).collect();
        if unique_actions.len() as u32 > self.config.max_unique_actions_per_minute {
            flags.push(Flag::ActionEnumeration);
        }

        let mut fingerprint_counts: HashMap<&str, u32> = HashMap::new();
        for action in &recent {
            *fingerprint_counts.entry(action.params_fingerprint.as_str()).or_insert(0) += 1;
        }
        if fingerprint_counts
            .values()
            .any(|count| *count > self.config.max_repeated_actions_per_minute)
        {
            flags.push(Flag::RepeatedAction);
        }

        if let Some(last) = session.actions.last() {
            if !last.score_met {
                flags.push(Flag::ScopeViolation);
            }
        }

        if session.actions.len() >= 6 {
            let len = session.actions.len();
            let sixth_from_last = session.actions[len - 6].timestamp;
            let fifth_from_last = session.actions[len - 5].timestamp;
            let gap = fifth_from_last - sixth_from_last;
            let last_five_span = session.actions[len - 1].timestamp - fifth_from_last;
            if gap > ChronoDuration::milliseconds(30_000)
                && last_five_span < ChronoDuration::milliseconds(5_000)
            {
                flags.push(Flag::BurstDetected);
            }
        }

        flags
    }

    /// Periodic sweeper (spec §4.6): evicts idle sessions. Never blocks on
    /// `record_action` since it only ever removes entries from the map, each
    /// under its own per-session lock.
    pub fn sweep(&self) {
        let timeout = ChronoDuration::from_std(self.config.session_timeout).unwrap_or_default();
        let now = Utc::now();
        let stale: Vec<Uuid> = {
            let sessions = self.sessions.read();
            sessions
                .iter()
                .filter(|(_, lock)| lock.lock().is_stale(now, timeout))
                .map(|(id, _)| *id)
                .collect()
        };
        if stale.is_empty() {
            return;
        }
        let mut sessions = self.sessions.write();
        for id in stale {
            sessions.remove(&id);
        }
    }

    pub fn spawn_sweeper(self: Arc<Self>) {
        let interval = self.config.sweeper_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                self.sweep();
            }
        });
    }

    pub fn snapshot(&self) -> Vec<SessionSnapshot> {
        self.sessions
            .read()
            .values()
            .map(|lock| {
                let session = lock.lock();
                SessionSnapshot {
                    agent_id: session.agent_id,
                    external_id: session.external_id.clone(),
                    behavior_score: session.behavior_score,
                    blocked: session.blocked,
                    flags: session.flags.iter().copied().collect(),
                    action_count: session.actions.len(),
                }
            })
            .collect()
    }
}

mod hex {
    pub fn encode(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_config() -> BehaviorConfig {
        BehaviorConfig {
            session_timeout: std::time::Duration::from_millis(300_000),
            max_actions_per_minute: 30,
            max_failures_before_flag: 5,
            max_unique_actions_per_minute: 10,
            max_repeated_actions_per_minute: 4,
            violation_penalty: 20,
            block_threshold: 20,
            sweeper_interval: std::time::Duration::from_secs(60),
        }
    }

    #[test]
    fn fingerprint_is_stable_across_key_order() {
        let a = fingerprint("search", &json!({"a": 1, "b": 2}));
        let b = fingerprint("search", &json!({"b": 2, "a": 1}));
        assert_eq!(a, b);
    }

    #[test]
    fn fresh_session_starts_unblocked_at_full_score() {
        let tracker = BehaviorTracker::new(test_config());
        let agent_id = Uuid::new_v4();
        let (score, flags, blocked) =
            tracker.record_action(agent_id, "ext", "search", &json!({"q": "x"}), true, true);
        assert_eq!(score, 100);
        assert!(flags.is_empty());
        assert!(!blocked);
    }

    #[test]
    fn repeated_identical_calls_trigger_repeated_action_and_block() {
        let tracker = BehaviorTracker::new(test_config());
        let agent_id = Uuid::new_v4();
        let params = json!({"q": "probe"});

        let mut last = (100u8, Vec::new(), false);
        for _ in 0..5 {
            last = tracker.record_action(agent_id, "ext", "search", &params, true, true);
        }
        // 5th occurrence exceeds max_repeated_actions_per_minute=4
        assert!(last.1.contains(&Flag::RepeatedAction));
        assert_eq!(last.0, 80);
        assert!(!last.2);
    }

    #[test]
    fn score_met_false_raises_scope_violation_every_time() {
        let tracker = BehaviorTracker::new(test_config());
        let agent_id = Uuid::new_v4();
        let (score1, flags1, _) =
            tracker.record_action(agent_id, "ext", "order", &json!({"id": 1}), false, false);
        assert!(flags1.contains(&Flag::ScopeViolation));
        assert_eq!(score1, 80);

        let (score2, flags2, _) =
            tracker.record_action(agent_id, "ext", "order", &json!({"id": 2}), false, false);
        assert!(flags2.contains(&Flag::ScopeViolation));
        assert_eq!(score2, 60);
    }

    #[test]
    fn once_blocked_subsequent_actions_stay_blocked_until_expiry() {
        let mut config = test_config();
        config.violation_penalty = 100;
        let tracker = BehaviorTracker::new(config);
        let agent_id = Uuid::new_v4();

        let (_, _, blocked) =
            tracker.record_action(agent_id, "ext", "order", &json!({"id": 1}), false, false);
        assert!(blocked);

        let (score, flags, blocked_again) =
            tracker.record_action(agent_id, "ext", "order", &json!({"id": 2}), false, false);
        assert!(blocked_again);
        assert!(flags.is_empty());
        assert_eq!(score, 0);
    }
}
