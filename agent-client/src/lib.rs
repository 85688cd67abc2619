//! Agent client library: what an autonomous agent embeds to acquire, cache,
//! and present trust certificates to gateways (spec §4.10).

pub mod client;
pub mod error;

pub use client::{ActionResult, AgentClient, BatchItem, ScopeRequest};
pub use error::ClientError;
