//! Walks an agent through the flow an embedded `trust-agent-client` actually
//! drives in production: acquire a certificate, call one gateway action,
//! then run a small batch. Point it at a running station and gateway.
//!
//! ```text
//! agent-walkthrough --station-url http://localhost:4000 \
//!     --gateway-url http://localhost:5000 \
//!     --developer-api-key <key> --agent-id <uuid>
//! ```

use clap::Parser;
use trust_agent_client::{AgentClient, BatchItem, ScopeRequest};
use uuid::Uuid;

#[derive(Parser)]
struct Args {
    #[arg(long)]
    station_url: String,
    #[arg(long)]
    gateway_url: String,
    #[arg(long)]
    developer_api_key: String,
    #[arg(long)]
    agent_id: Uuid,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let client = AgentClient::new(args.station_url, args.developer_api_key, args.agent_id);

    let token = client.acquire(false, ScopeRequest::Unchanged).await?;
    println!("acquired certificate: {}...", &token[..token.len().min(24)]);

    let result = client
        .execute_action(&args.gateway_url, "search", serde_json::json!({ "query": "rust" }))
        .await?;
    println!("search -> success={} data={:?}", result.success, result.data);

    let batch = vec![
        BatchItem { action_name: "search".into(), params: serde_json::json!({ "query": "a" }) },
        BatchItem { action_name: "search".into(), params: serde_json::json!({ "query": "b" }) },
    ];
    let results = client.execute_batch(&args.gateway_url, batch).await?;
    for (i, result) in results.iter().enumerate() {
        println!("batch[{i}] -> success={} data={:?}", result.success, result.data);
    }

    Ok(())
}
