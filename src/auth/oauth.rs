use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::AuthError;
use crate::config::OAuthConfig;

/// Identity asserted by the external OAuth verifier
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VerifiedIdentity {
    pub uid: String,
    pub email: String,
    pub name: Option<String>,
    pub picture: Option<String>,
}

#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, id_token: &str) -> Result<VerifiedIdentity, AuthError>;
}

/// Calls a verifier service: `POST {url} {"id_token": ...}` -> `{uid, email, name, picture}`
pub struct HttpIdentityVerifier {
    client: reqwest::Client,
    url: Option<String>,
    client_id: Option<String>,
}

impl HttpIdentityVerifier {
    pub fn from_config(config: &OAuthConfig) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AuthError::Configuration(format!("http client: {}", e)))?;
        Ok(Self {
            client,
            url: config.verifier_url.clone(),
            client_id: config.client_id.clone(),
        })
    }
}

#[async_trait]
impl IdentityVerifier for HttpIdentityVerifier {
    async fn verify(&self, id_token: &str) -> Result<VerifiedIdentity, AuthError> {
        let url = self
            .url
            .as_deref()
            .ok_or_else(|| AuthError::VerifierUnavailable("OAuth verifier is not configured".to_string()))?;

        let response = self
            .client
            .post(url)
            .json(&serde_json::json!({ "id_token": id_token, "audience": self.client_id }))
            .send()
            .await
            .map_err(|e| AuthError::VerifierUnavailable(format!("OAuth verifier unreachable: {}", e)))?;

        let status = response.status();
        if status.is_client_error() {
            tracing::warn!("OAuth verifier rejected token with status {}", status);
            return Err(AuthError::IdentityRejected("Invalid OAuth token".to_string()));
        }
        if !status.is_success() {
            return Err(AuthError::VerifierUnavailable(format!("OAuth verifier returned {}", status)));
        }

        let identity: VerifiedIdentity = response
            .json()
            .await
            .map_err(|e| AuthError::VerifierUnavailable(format!("Malformed verifier response: {}", e)))?;

        if identity.email.trim().is_empty() || identity.uid.trim().is_empty() {
            return Err(AuthError::IdentityRejected("OAuth identity has no email".to_string()));
        }
        Ok(identity)
    }
}
