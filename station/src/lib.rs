//! Trust Station: registry of agents, owner of the signing key pair, issuer
//! of certificates, sink for behavior reports, oracle for current
//! reputation (spec §2).

pub mod auth;
pub mod config;
pub mod error_response;
pub mod routes;
pub mod service;
pub mod store;

use std::sync::Arc;
use trust_observability::MetricsExporter;

use crate::service::StationService;
use crate::store::Store;

pub struct AppState {
    pub store: Arc<dyn Store>,
    pub service: StationService,
    pub metrics: MetricsExporter,
}
