//! Developer bearer-token authentication. Lookup is by hash, never by
//! scanning every developer row (spec §9's hot-path note).

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use std::sync::Arc;
use trust_common::apikey::hash_api_key;
use trust_common::error::CoreError;
use trust_common::model::Developer;

use crate::error_response::ApiError;
use crate::AppState;

/// Extractor pulling the `Authorization: Bearer <api key>` developer out of
/// the request, failing with `Unauthenticated` when missing or unknown.
pub struct AuthenticatedDeveloper(pub Developer);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthenticatedDeveloper {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or_else(|| CoreError::Unauthenticated("missing API key".into()))?;

        let hash = hash_api_key(raw);
        let developer = state
            .store
            .get_developer_by_api_key_hash(&hash)
            .await
            .ok_or_else(|| CoreError::Unauthenticated("invalid API key".into()))?;

        Ok(AuthenticatedDeveloper(developer))
    }
}
