//! Tracing + Prometheus initialization shared by the `station` and `gateway`
//! binaries. Kept deliberately small: one subscriber install, one metrics
//! recorder install, both idempotent-safe at the process level.

use anyhow::{anyhow, Context, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Supported log output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" | "text" => Ok(LogFormat::Pretty),
            other => Err(anyhow!("unsupported log format: {other}")),
        }
    }
}

/// Configuration driving tracing initialization.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    pub service_name: String,
    pub log_format: LogFormat,
    pub log_level: String,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            service_name: "trust-platform".into(),
            log_format: LogFormat::Pretty,
            log_level: "info".into(),
        }
    }
}

/// Install the global tracing subscriber. Safe to call once per process;
/// a second call returns an error rather than panicking.
pub fn init_tracing(config: &TracingConfig) -> Result<()> {
    let env_filter =
        EnvFilter::try_new(config.log_level.clone()).unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = match config.log_format {
        LogFormat::Pretty => registry.with(fmt::layer().with_target(true)).try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_target(true))
            .try_init(),
    };
    result.map_err(|err| anyhow!("failed to install tracing subscriber: {err}"))
}

/// Prometheus exporter wrapper returning rendered metrics text.
#[derive(Clone)]
pub struct MetricsExporter {
    handle: PrometheusHandle,
}

impl MetricsExporter {
    pub fn install_with_defaults() -> Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("failed to install Prometheus recorder")?;
        Ok(Self { handle })
    }

    /// A handle with no global recorder installed. For tests, where
    /// multiple test binaries in one process must not fight over the
    /// process-wide recorder singleton.
    pub fn noop_for_tests() -> Self {
        let (_recorder, handle) = PrometheusBuilder::new()
            .build()
            .expect("building a local prometheus recorder never fails");
        Self { handle }
    }

    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Convenience helper initializing tracing + metrics with a single call.
pub fn init(tracing: &TracingConfig) -> Result<MetricsExporter> {
    init_tracing(tracing)?;
    MetricsExporter::install_with_defaults()
}
