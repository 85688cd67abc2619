//! Shared domain model, reputation calculator, and certificate core for the
//! trust-verification platform: a station that issues short-lived signed
//! clearance certificates to autonomous agents, and gateways that verify
//! them and enforce per-action trust thresholds.

pub mod apikey;
pub mod certificate;
pub mod error;
pub mod model;
pub mod reputation;

pub use certificate::{issue_certificate, verify_local, Claims, KeyMaterial, VerifyError, ISSUER};
pub use error::CoreError;
pub use reputation::{compute_score, success_rate_claim, ReputationInputs};
