//! Client-side error taxonomy. A thin wrapper over the core taxonomy plus
//! the transport failures specific to talking to a station or gateway.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request to station/gateway failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("station/gateway rejected the request: {0}")]
    Rejected(String),
    #[error("unexpected response shape: {0}")]
    Malformed(String),
}
