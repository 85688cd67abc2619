//! Station configuration. The required env vars are a hard external
//! contract, not a tunable profile, so they're read directly via
//! `std::env::var` rather than through a layered config builder.

use anyhow::{Context, Result};
use clap::Parser;
use trust_observability::{LogFormat, TracingConfig};

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_CERTIFICATE_EXPIRY_SECONDS: i64 = 300;

#[derive(Debug, Parser)]
#[command(name = "station", about = "Trust Station: certificate issuer and reputation oracle")]
pub struct Cli {
    #[arg(long)]
    pub port: Option<u16>,

    #[arg(long, default_value = "info")]
    pub log_level: String,

    #[arg(long, default_value = "pretty")]
    pub log_format: String,
}

#[derive(Debug, Clone)]
pub struct StationConfig {
    pub database_url: Option<String>,
    pub private_key_pem: String,
    pub public_key_pem: String,
    pub port: u16,
    pub certificate_expiry_seconds: i64,
    pub tracing: TracingConfig,
}

impl StationConfig {
    /// Load from the environment per spec §6, overlaid with CLI flags.
    /// Missing `STATION_PRIVATE_KEY` / `STATION_PUBLIC_KEY` is fatal at
    /// startup, matching the non-zero exit code contract in spec §6.
    pub fn load(cli: &Cli) -> Result<Self> {
        dotenvy::dotenv().ok();

        let private_key_pem = std::env::var("STATION_PRIVATE_KEY")
            .context("STATION_PRIVATE_KEY is required (PEM, PKCS8)")?;
        let public_key_pem = std::env::var("STATION_PUBLIC_KEY")
            .context("STATION_PUBLIC_KEY is required (PEM, SPKI)")?;
        let database_url = std::env::var("DATABASE_URL").ok();

        let port = cli.port.unwrap_or_else(|| {
            std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(DEFAULT_PORT)
        });

        let certificate_expiry_seconds = std::env::var("CERTIFICATE_EXPIRY_SECONDS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_CERTIFICATE_EXPIRY_SECONDS);

        let log_format = cli
            .log_format
            .parse()
            .unwrap_or(LogFormat::Pretty);

        Ok(Self {
            database_url,
            private_key_pem,
            public_key_pem,
            port,
            certificate_expiry_seconds,
            tracing: TracingConfig {
                service_name: "trust-station".into(),
                log_format,
                log_level: cli.log_level.clone(),
            },
        })
    }
}
