//! Certificate claims and the RS256 sign/verify primitives shared by the
//! station (issuance, remote verification) and the gateway (local
//! verification).

use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{
    decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::model::AgentStatus;

pub const ISSUER: &str = "agent-trust-station";

/// Claims carried by every issued certificate. Field names match the wire
/// contract in spec §6 exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    #[serde(rename = "agentExternalId")]
    pub agent_external_id: String,
    #[serde(rename = "developerId")]
    pub developer_id: Uuid,
    pub score: u8,
    #[serde(rename = "identityVerified")]
    pub identity_verified: bool,
    pub status: AgentStatus,
    #[serde(rename = "totalActions")]
    pub total_actions: u64,
    #[serde(rename = "successRate")]
    pub success_rate: Option<f64>,
    pub iss: String,
    pub jti: Uuid,
    pub iat: i64,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<Vec<String>>,
}

impl Claims {
    /// A certificate's scope manifest authorizes an action when it is
    /// absent/empty (wildcard) or contains the action name.
    pub fn authorizes(&self, action_name: &str) -> bool {
        match &self.scope {
            None => true,
            Some(scope) if scope.is_empty() => true,
            Some(scope) => scope.iter().any(|s| s == action_name),
        }
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.exp, 0).single().unwrap_or(Utc::now())
    }
}

/// Asymmetric key material the station signs with and everyone else verifies
/// against.
#[derive(Clone)]
pub struct KeyMaterial {
    encoding_key: Option<EncodingKey>,
    decoding_key: DecodingKey,
    public_key_pem: String,
}

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("invalid PEM key material: {0}")]
    InvalidPem(String),
}

impl KeyMaterial {
    /// Load a signing + verification pair, as the station does at startup
    /// from `STATION_PRIVATE_KEY` / `STATION_PUBLIC_KEY`.
    pub fn from_pem_pair(private_pem: &str, public_pem: &str) -> Result<Self, KeyError> {
        let encoding_key = EncodingKey::from_rsa_pem(private_pem.as_bytes())
            .map_err(|e| KeyError::InvalidPem(e.to_string()))?;
        let decoding_key = DecodingKey::from_rsa_pem(public_pem.as_bytes())
            .map_err(|e| KeyError::InvalidPem(e.to_string()))?;
        Ok(Self {
            encoding_key: Some(encoding_key),
            decoding_key,
            public_key_pem: public_pem.to_string(),
        })
    }

    /// Verification-only material, as a gateway caches from the station's
    /// discovery endpoint.
    pub fn verify_only(public_pem: &str) -> Result<Self, KeyError> {
        let decoding_key = DecodingKey::from_rsa_pem(public_pem.as_bytes())
            .map_err(|e| KeyError::InvalidPem(e.to_string()))?;
        Ok(Self {
            encoding_key: None,
            decoding_key,
            public_key_pem: public_pem.to_string(),
        })
    }

    pub fn public_key_pem(&self) -> &str {
        &self.public_key_pem
    }
}

#[derive(Debug, Error)]
pub enum IssueError {
    #[error("signing key not available for issuance")]
    NoEncodingKey,
    #[error("failed to sign certificate: {0}")]
    Signing(String),
}

/// Sign a fresh certificate. The caller (the station) is responsible for
/// having already checked agent status and for persisting the returned
/// `jti` alongside the certificate record.
#[allow(clippy::too_many_arguments)]
pub fn issue_certificate(
    key: &KeyMaterial,
    agent_internal_id: Uuid,
    agent_external_id: &str,
    developer_id: Uuid,
    score: u8,
    identity_verified: bool,
    status: AgentStatus,
    total_actions: u64,
    successful_actions: u64,
    scope: Option<Vec<String>>,
    ttl_seconds: i64,
    issued_at: DateTime<Utc>,
) -> Result<(String, Claims), IssueError> {
    let encoding_key = key.encoding_key.as_ref().ok_or(IssueError::NoEncodingKey)?;
    let jti = Uuid::new_v4();
    let claims = Claims {
        sub: agent_internal_id,
        agent_external_id: agent_external_id.to_string(),
        developer_id,
        score,
        identity_verified,
        status,
        total_actions,
        success_rate: crate::reputation::success_rate_claim(successful_actions, total_actions),
        iss: ISSUER.to_string(),
        jti,
        iat: issued_at.timestamp(),
        exp: issued_at.timestamp() + ttl_seconds,
        scope: match scope {
            Some(s) if !s.is_empty() => Some(s),
            _ => None,
        },
    };

    let token = encode(&Header::new(Algorithm::RS256), &claims, encoding_key)
        .map_err(|e| IssueError::Signing(e.to_string()))?;
    Ok((token, claims))
}

/// Failure modes of local (gateway-side) verification, matching spec §4.3
/// exactly.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VerifyError {
    #[error("no bearer credential supplied")]
    MissingCredential,
    #[error("certificate has expired")]
    Expired,
    #[error("certificate signature is invalid")]
    InvalidSignature,
    #[error("agent is disabled")]
    AgentDisabled,
}

/// Verify a compact JWS locally: signature, issuer, expiry, and agent status.
/// This never touches the database — see `verify_remote` for the
/// revocation-aware fallback.
pub fn verify_local(key: &KeyMaterial, token: &str) -> Result<Claims, VerifyError> {
    let mut validation = Validation::new(Algorithm::RS256);
    validation.set_issuer(&[ISSUER]);
    validation.validate_exp = true;
    // We decode manually below so we can distinguish "expired" from "bad
    // signature" as two distinct error variants instead of one opaque kind.
    validation.validate_exp = false;

    let token_data = decode::<Claims>(token, &key.decoding_key, &validation)
        .map_err(|_| VerifyError::InvalidSignature)?;

    if token_data.claims.iss != ISSUER {
        return Err(VerifyError::InvalidSignature);
    }

    let now = Utc::now().timestamp();
    if token_data.claims.exp <= now {
        return Err(VerifyError::Expired);
    }

    if token_data.claims.status.is_barred() {
        return Err(VerifyError::AgentDisabled);
    }

    Ok(token_data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::pkcs1::{EncodeRsaPrivateKey, EncodeRsaPublicKey};
    use rsa::{RsaPrivateKey, RsaPublicKey};

    fn test_keys() -> KeyMaterial {
        let mut rng = rand::thread_rng();
        let private = RsaPrivateKey::new(&mut rng, 2048).expect("rsa key");
        let public = RsaPublicKey::from(&private);
        let private_pem = private
            .to_pkcs1_pem(rsa::pkcs1::LineEnding::LF)
            .expect("pkcs1 pem")
            .to_string();
        let public_pem = public
            .to_pkcs1_pem(rsa::pkcs1::LineEnding::LF)
            .expect("pkcs1 pem");
        KeyMaterial::from_pem_pair(&private_pem, &public_pem).expect("key material")
    }

    #[test]
    fn round_trips_issue_and_verify() {
        let key = test_keys();
        let agent_id = Uuid::new_v4();
        let developer_id = Uuid::new_v4();
        let (token, issued_claims) = issue_certificate(
            &key,
            agent_id,
            "agent-ext-1",
            developer_id,
            72,
            true,
            AgentStatus::Active,
            10,
            8,
            Some(vec!["search".into()]),
            300,
            Utc::now(),
        )
        .expect("issue succeeds");

        let decoded = verify_local(&key, &token).expect("verify succeeds");
        assert_eq!(decoded.sub, agent_id);
        assert_eq!(decoded.score, 72);
        assert_eq!(decoded.jti, issued_claims.jti);
        assert_eq!(decoded.scope, Some(vec!["search".to_string()]));
    }

    #[test]
    fn expired_certificate_is_rejected() {
        let key = test_keys();
        let (token, _) = issue_certificate(
            &key,
            Uuid::new_v4(),
            "agent-ext-2",
            Uuid::new_v4(),
            50,
            false,
            AgentStatus::Active,
            0,
            0,
            None,
            -10,
            Utc::now(),
        )
        .expect("issue succeeds");

        let err = verify_local(&key, &token).expect_err("should be expired");
        assert_eq!(err, VerifyError::Expired);
    }

    #[test]
    fn disabled_agent_rejected_even_with_valid_signature() {
        let key = test_keys();
        let (token, _) = issue_certificate(
            &key,
            Uuid::new_v4(),
            "agent-ext-3",
            Uuid::new_v4(),
            10,
            false,
            AgentStatus::Banned,
            0,
            0,
            None,
            300,
            Utc::now(),
        )
        .expect("issue succeeds");

        let err = verify_local(&key, &token).expect_err("should be disabled");
        assert_eq!(err, VerifyError::AgentDisabled);
    }

    #[test]
    fn tampered_signature_is_rejected() {
        let key = test_keys();
        let (token, _) = issue_certificate(
            &key,
            Uuid::new_v4(),
            "agent-ext-4",
            Uuid::new_v4(),
            50,
            false,
            AgentStatus::Active,
            0,
            0,
            None,
            300,
            Utc::now(),
        )
        .expect("issue succeeds");

        let mut tampered = token.clone();
        tampered.push('x');
        let err = verify_local(&key, &tampered).expect_err("should be invalid");
        assert_eq!(err, VerifyError::InvalidSignature);
    }

    #[test]
    fn empty_scope_is_stored_as_wildcard() {
        let key = test_keys();
        let (_, claims) = issue_certificate(
            &key,
            Uuid::new_v4(),
            "agent-ext-5",
            Uuid::new_v4(),
            50,
            false,
            AgentStatus::Active,
            0,
            0,
            Some(vec![]),
            300,
            Utc::now(),
        )
        .expect("issue succeeds");
        assert_eq!(claims.scope, None);
        assert!(claims.authorizes("anything"));
    }
}
