//! Agent client (spec §4.10): acquires and caches certificates, presents
//! them to gateways, and retries exactly once on a 401.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::ClientError;

/// Scope semantics on `acquire`: `Unchanged` leaves the cached scope as-is,
/// `Wildcard` clears it to "all actions", `Set` replaces it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeRequest {
    Unchanged,
    Wildcard,
    Set(Vec<String>),
}

#[derive(Debug, Clone, Default)]
struct CachedCertificate {
    token: Option<String>,
    expires_at: Option<DateTime<Utc>>,
    scope: Option<Vec<String>>,
}

const REFRESH_BUFFER: i64 = 30_000;

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IssueResponse {
    token: String,
    #[serde(rename = "expiresAt")]
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct IssueRequest {
    #[serde(rename = "agentId")]
    agent_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    scope: Option<Vec<String>>,
}

/// One item in an `executeBatch` call.
pub struct BatchItem {
    pub action_name: String,
    pub params: Value,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ActionResult {
    pub success: bool,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

pub struct AgentClient {
    http: Client,
    station_url: String,
    developer_api_key: String,
    agent_id: Uuid,
    state: Mutex<CachedCertificate>,
}

impl AgentClient {
    pub fn new(station_url: impl Into<String>, developer_api_key: impl Into<String>, agent_id: Uuid) -> Self {
        Self {
            http: Client::new(),
            station_url: station_url.into(),
            developer_api_key: developer_api_key.into(),
            agent_id,
            state: Mutex::new(CachedCertificate::default()),
        }
    }

    /// spec §4.10 `setScope`: clears the cached token when the requested
    /// scope differs from what's cached. `None` means wildcard.
    pub fn set_scope(&self, scope: Option<Vec<String>>) {
        let mut state = self.state.lock();
        if state.scope != scope {
            state.scope = scope;
            state.token = None;
            state.expires_at = None;
        }
    }

    /// spec §4.10 `acquire`.
    pub async fn acquire(&self, force_refresh: bool, scope: ScopeRequest) -> Result<String, ClientError> {
        let requested_scope = {
            let state = self.state.lock();
            match &scope {
                ScopeRequest::Unchanged => state.scope.clone(),
                ScopeRequest::Wildcard => None,
                ScopeRequest::Set(list) => Some(list.clone()),
            }
        };

        let cache_hit = {
            let state = self.state.lock();
            !force_refresh
                && state.scope == requested_scope
                && state
                    .token
                    .as_ref()
                    .zip(state.expires_at)
                    .map(|(_, expires_at)| Utc::now() + Duration::milliseconds(REFRESH_BUFFER) < expires_at)
                    .unwrap_or(false)
        };

        if cache_hit {
            return Ok(self.state.lock().token.clone().expect("cache_hit implies token present"));
        }

        self.refresh(requested_scope).await
    }

    async fn refresh(&self, scope: Option<Vec<String>>) -> Result<String, ClientError> {
        let url = format!("{}/certificates/request", self.station_url.trim_end_matches('/'));
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.developer_api_key)
            .json(&IssueRequest { agent_id: self.agent_id, scope: scope.clone() })
            .send()
            .await?;

        let envelope: Envelope<IssueResponse> = response.json().await?;
        if !envelope.success {
            return Err(ClientError::Rejected(
                envelope.error.unwrap_or_else(|| "certificate request failed".into()),
            ));
        }
        let issued = envelope
            .data
            .ok_or_else(|| ClientError::Malformed("missing data in issue response".into()))?;

        let mut state = self.state.lock();
        state.token = Some(issued.token.clone());
        state.expires_at = Some(issued.expires_at);
        state.scope = scope;

        Ok(issued.token)
    }

    /// spec §4.10 `executeAction`: on a 401, force-refreshes once and
    /// retries; the retry's outcome (success or failure) is returned as-is.
    pub async fn execute_action(
        &self,
        gateway_url: &str,
        action_name: &str,
        params: Value,
    ) -> Result<ActionResult, ClientError> {
        let token = self.acquire(false, ScopeRequest::Unchanged).await?;
        match self.post_action(gateway_url, action_name, &params, &token).await? {
            (reqwest::StatusCode::UNAUTHORIZED, _) => {
                let token = self.acquire(true, ScopeRequest::Unchanged).await?;
                let (_, result) = self.post_action(gateway_url, action_name, &params, &token).await?;
                Ok(result)
            }
            (_, result) => Ok(result),
        }
    }

    async fn post_action(
        &self,
        gateway_url: &str,
        action_name: &str,
        params: &Value,
        token: &str,
    ) -> Result<(reqwest::StatusCode, ActionResult), ClientError> {
        let url = format!("{}/actions/{}", gateway_url.trim_end_matches('/'), action_name);
        let response = self
            .http
            .post(&url)
            .bearer_auth(token)
            .json(&serde_json::json!({ "params": params }))
            .send()
            .await?;
        let status = response.status();
        let body: Value = response.json().await?;
        let result = ActionResult {
            success: body.get("success").and_then(Value::as_bool).unwrap_or(false),
            data: body.get("data").cloned(),
            error: body.get("error").and_then(Value::as_str).map(str::to_string),
        };
        Ok((status, result))
    }

    /// spec §4.10 `executeBatch`: sequential, halts on the first failure.
    pub async fn execute_batch(
        &self,
        gateway_url: &str,
        items: Vec<BatchItem>,
    ) -> Result<Vec<ActionResult>, ClientError> {
        let mut results = Vec::with_capacity(items.len());
        for item in items {
            let result = self.execute_action(gateway_url, &item.action_name, item.params).await?;
            let halt = !result.success;
            results.push(result);
            if halt {
                break;
            }
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_scope_clears_token_only_on_change() {
        let client = AgentClient::new("http://station.invalid", "key", Uuid::new_v4());
        {
            let mut state = client.state.lock();
            state.token = Some("cached".into());
            state.expires_at = Some(Utc::now() + Duration::seconds(60));
            state.scope = Some(vec!["search".into()]);
        }

        client.set_scope(Some(vec!["search".into()]));
        assert_eq!(client.state.lock().token.as_deref(), Some("cached"));

        client.set_scope(Some(vec!["order".into()]));
        assert_eq!(client.state.lock().token, None);
    }
}
