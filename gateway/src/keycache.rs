//! Station public-key cache (spec §4.4). Fetched once at startup — failure
//! there is fatal — then refreshed on a timer; a refresh failure is logged
//! and the previously cached key stays in use.

use parking_lot::RwLock;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use trust_common::certificate::KeyMaterial;

#[derive(Debug, Deserialize)]
struct StationKeysResponse {
    success: bool,
    data: Option<StationKeysPayload>,
}

#[derive(Debug, Deserialize)]
struct StationKeysPayload {
    #[serde(rename = "publicKey")]
    public_key: String,
}

/// Shared, hot-swappable handle to the station's current verification key.
pub struct KeyCache {
    client: Client,
    station_url: String,
    key: RwLock<Arc<KeyMaterial>>,
}

impl KeyCache {
    /// Fetch the key once. Failure here should abort gateway startup
    /// (fail-closed per spec §4.4).
    pub async fn bootstrap(client: Client, station_url: String) -> anyhow::Result<Self> {
        let key = fetch_key(&client, &station_url).await?;
        Ok(Self {
            client,
            station_url,
            key: RwLock::new(Arc::new(key)),
        })
    }

    pub fn current(&self) -> Arc<KeyMaterial> {
        self.key.read().clone()
    }

    /// Build a cache around an already-known key, skipping the network
    /// round trip. Used by tests that exercise the pipeline without a live
    /// station.
    #[cfg(test)]
    pub fn for_tests(client: Client, station_url: String, key: KeyMaterial) -> Self {
        Self {
            client,
            station_url,
            key: RwLock::new(Arc::new(key)),
        }
    }

    /// Refresh from the station. Errors are swallowed by the caller (the
    /// periodic task below); the cached key remains authoritative.
    pub async fn refresh(&self) -> anyhow::Result<()> {
        let key = fetch_key(&self.client, &self.station_url).await?;
        *self.key.write() = Arc::new(key);
        Ok(())
    }

    /// Spawn the periodic refresh task. Runs for the lifetime of the
    /// process; refresh failures are logged, never propagated.
    pub fn spawn_refresh_loop(self: Arc<Self>, interval: Duration) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately; skip it
            loop {
                ticker.tick().await;
                if let Err(err) = self.refresh().await {
                    tracing::warn!(error = %err, "station public key refresh failed, keeping cached key");
                } else {
                    tracing::debug!("station public key refreshed");
                }
            }
        });
    }
}

async fn fetch_key(client: &Client, station_url: &str) -> anyhow::Result<KeyMaterial> {
    let url = format!("{}/.well-known/station-keys", station_url.trim_end_matches('/'));
    let response: StationKeysResponse = client.get(&url).send().await?.json().await?;
    if !response.success {
        anyhow::bail!("station-keys endpoint reported failure");
    }
    let payload = response
        .data
        .ok_or_else(|| anyhow::anyhow!("station-keys response missing data"))?;
    let key = KeyMaterial::verify_only(&payload.public_key)
        .map_err(|e| anyhow::anyhow!("invalid station public key: {e}"))?;
    Ok(key)
}
