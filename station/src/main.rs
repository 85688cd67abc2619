use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use trust_common::certificate::KeyMaterial;
use trust_station::config::{Cli, StationConfig};
use trust_station::service::StationService;
use trust_station::store::{InMemoryStore, PgStore, Store};
use trust_station::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = StationConfig::load(&cli)?;
    let metrics = trust_observability::init(&config.tracing)?;

    let key = KeyMaterial::from_pem_pair(&config.private_key_pem, &config.public_key_pem)
        .context("failed to load station signing keys")?;

    let store: Arc<dyn Store> = match &config.database_url {
        Some(url) => {
            tracing::info!("connecting to Postgres");
            Arc::new(PgStore::connect(url).await.context("connecting to database")?)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory store");
            Arc::new(InMemoryStore::new())
        }
    };

    let service = StationService {
        store: store.clone(),
        key,
        certificate_ttl_seconds: config.certificate_expiry_seconds,
    };

    let state = Arc::new(AppState {
        store,
        service,
        metrics,
    });

    let app = trust_station::routes::router(state).layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(%addr, "station listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
