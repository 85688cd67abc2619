use anyhow::Result;
use clap::Parser;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use trust_gateway::behavior::BehaviorTracker;
use trust_gateway::config::{Cli, GatewayConfig};
use trust_gateway::keycache::KeyCache;
use trust_gateway::ml::HeuristicAnalyzer;
use trust_gateway::pipeline::PipelineDeps;
use trust_gateway::registry::{ActionDefinition, ActionRegistry, FnHandler, ParamSchema, ParamType};
use trust_gateway::report::Reporter;
use trust_gateway::GatewayState;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = GatewayConfig::load(&cli)?;
    let metrics = trust_observability::init(&config.tracing)?;

    let client = reqwest::Client::builder().build()?;

    // Public-key fetch failure at startup is fatal (spec §4.4).
    let key_cache = Arc::new(KeyCache::bootstrap(client.clone(), config.station_url.clone()).await?);
    key_cache.clone().spawn_refresh_loop(config.key_refresh_interval);

    let behavior = Arc::new(BehaviorTracker::new(config.behavior));
    behavior.clone().spawn_sweeper();

    let registry = Arc::new(demo_registry());
    let reporter = Arc::new(Reporter::new(
        client,
        config.station_url.clone(),
        config.gateway_id.clone(),
        std::env::var("STATION_API_KEY").ok(),
    ));

    let deps = PipelineDeps {
        key_cache,
        behavior,
        registry,
        analyzer: Some(Arc::new(HeuristicAnalyzer::default())),
        reporter,
    };

    let state = Arc::new(GatewayState {
        gateway_id: config.gateway_id.clone(),
        deps,
        metrics,
    });

    let app = trust_gateway::routes::router(state).layer(TraceLayer::new_for_http());

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(%addr, gateway_id = %config.gateway_id, "gateway listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Reference action set matching the happy-path and score-gate scenarios:
/// a real deployment registers its own handlers at startup instead.
fn demo_registry() -> ActionRegistry {
    let mut registry = ActionRegistry::new();

    let mut search_params = HashMap::new();
    search_params.insert(
        "query".to_string(),
        ParamSchema { param_type: ParamType::String, required: true, description: "search text".into() },
    );
    registry.register(ActionDefinition {
        name: "search".into(),
        description: "search the index".into(),
        min_score: 30,
        parameters: search_params,
        handler: Box::new(FnHandler(|params, _ctx| {
            let query = params["query"].as_str().unwrap_or_default();
            Ok(json!([query]))
        })),
    });

    let mut order_params = HashMap::new();
    order_params.insert(
        "sku".to_string(),
        ParamSchema { param_type: ParamType::String, required: true, description: "item sku".into() },
    );
    registry.register(ActionDefinition {
        name: "order".into(),
        description: "place an order".into(),
        min_score: 60,
        parameters: order_params,
        handler: Box::new(FnHandler(|params, ctx| {
            Ok(json!({ "orderId": uuid::Uuid::new_v4(), "sku": params["sku"], "agent": ctx.external_id }))
        })),
    });

    registry
}
