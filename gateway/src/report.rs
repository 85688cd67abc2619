//! Fire-and-forget report dispatch to the station (spec §4.7 step 9, §4.8,
//! §9's "an agent should not be punished for a flaky station link").

use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct ReportAction {
    #[serde(rename = "actionType")]
    pub action_type: String,
    pub outcome: String,
    pub metadata: Value,
    #[serde(rename = "performedAt")]
    pub performed_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize)]
struct ReportBody {
    #[serde(rename = "agentId")]
    agent_id: Uuid,
    #[serde(rename = "gatewayId")]
    gateway_id: String,
    #[serde(rename = "certificateJti")]
    certificate_jti: Uuid,
    actions: Vec<ReportAction>,
}

pub struct Reporter {
    client: Client,
    station_url: String,
    gateway_id: String,
    api_key: Option<String>,
}

impl Reporter {
    pub fn new(client: Client, station_url: String, gateway_id: String, api_key: Option<String>) -> Self {
        Self { client, station_url, gateway_id, api_key }
    }

    /// Dispatch one batch report. Spawns its own task so the calling request
    /// never waits on station availability; failures are logged only.
    pub fn dispatch(&self, agent_id: Uuid, certificate_jti: Uuid, action: ReportAction) {
        let url = format!("{}/reports", self.station_url.trim_end_matches('/'));
        let body = ReportBody {
            agent_id,
            gateway_id: self.gateway_id.clone(),
            certificate_jti,
            actions: vec![action],
        };
        let client = self.client.clone();
        let api_key = self.api_key.clone();

        tokio::spawn(async move {
            let mut request = client.post(&url).json(&body);
            if let Some(key) = api_key {
                request = request.bearer_auth(key);
            }
            match request.send().await {
                Ok(response) if !response.status().is_success() => {
                    tracing::warn!(status = %response.status(), "station rejected report");
                }
                Err(err) => {
                    tracing::warn!(error = %err, "report dispatch to station failed");
                }
                _ => {}
            }
        });
    }
}
