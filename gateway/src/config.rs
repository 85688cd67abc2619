//! Gateway configuration: the behavior-tracker knobs from spec §4.6 (all
//! defaults as stated, all tunable), plus station connectivity and the
//! gateway's own HTTP surface.

use anyhow::Result;
use clap::Parser;
use std::time::Duration;
use trust_observability::{LogFormat, TracingConfig};

#[derive(Debug, Parser)]
#[command(name = "gateway", about = "Trust Gateway: certificate enforcement point")]
pub struct Cli {
    #[arg(long)]
    pub port: Option<u16>,

    #[arg(long)]
    pub station_url: Option<String>,

    #[arg(long, default_value = "info")]
    pub log_level: String,

    #[arg(long, default_value = "pretty")]
    pub log_format: String,
}

/// Behavior tracker knobs, spec §4.6's table verbatim.
#[derive(Debug, Clone, Copy)]
pub struct BehaviorConfig {
    pub session_timeout: Duration,
    pub max_actions_per_minute: u32,
    pub max_failures_before_flag: u32,
    pub max_unique_actions_per_minute: u32,
    pub max_repeated_actions_per_minute: u32,
    pub violation_penalty: u8,
    pub block_threshold: u8,
    pub sweeper_interval: Duration,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            session_timeout: Duration::from_millis(300_000),
            max_actions_per_minute: 30,
            max_failures_before_flag: 5,
            max_unique_actions_per_minute: 10,
            max_repeated_actions_per_minute: 10,
            violation_penalty: 10,
            block_threshold: 20,
            sweeper_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub gateway_id: String,
    pub port: u16,
    pub station_url: String,
    pub key_refresh_interval: Duration,
    pub behavior: BehaviorConfig,
    pub tracing: TracingConfig,
}

const DEFAULT_PORT: u16 = 4000;
const DEFAULT_KEY_REFRESH_SECONDS: u64 = 3600;

impl GatewayConfig {
    pub fn load(cli: &Cli) -> Result<Self> {
        dotenvy::dotenv().ok();

        let port = cli.port.unwrap_or_else(|| {
            std::env::var("GATEWAY_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(DEFAULT_PORT)
        });

        let station_url = cli
            .station_url
            .clone()
            .or_else(|| std::env::var("STATION_URL").ok())
            .unwrap_or_else(|| "http://localhost:3000".to_string());

        let gateway_id = std::env::var("GATEWAY_ID")
            .unwrap_or_else(|_| format!("gateway-{}", uuid::Uuid::new_v4()));

        let key_refresh_seconds = std::env::var("STATION_KEY_REFRESH_SECONDS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_KEY_REFRESH_SECONDS);

        let log_format = cli.log_format.parse().unwrap_or(LogFormat::Pretty);

        Ok(Self {
            gateway_id,
            port,
            station_url,
            key_refresh_interval: Duration::from_secs(key_refresh_seconds),
            behavior: BehaviorConfig::default(),
            tracing: TracingConfig {
                service_name: "trust-gateway".into(),
                log_format,
                log_level: cli.log_level.clone(),
            },
        })
    }
}
