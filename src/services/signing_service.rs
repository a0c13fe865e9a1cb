//! HTTP client for the remote signing service
//!
//! Both calls are form posts carrying a Bearer token:
//! `POST {base}/oxeleven/rest/oxeleven/generateKey` and
//! `POST {base}/oxeleven/rest/oxeleven/deleteKey`.

use chrono::{Duration as ChronoDuration, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument};
use zeroize::Zeroizing;

/// Path prefix of the signing-service REST API
pub const SIGNING_API_PATH: &str = "/oxeleven/rest/oxeleven";

#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    #[error("insufficient access to the signing service")]
    Unauthorized,

    #[error("signing service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unable to reach the signing service: {source}")]
    Connection {
        #[source]
        source: reqwest::Error,
    },

    #[error("unexpected signing service response: {message}")]
    Decode { message: String },
}

impl SigningError {
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }
}

/// A key minted by the signing service. `jwk` is the full response body and
/// goes into the published key bundle as is.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedKey {
    pub kid: String,
    pub jwk: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct DeleteKeyResponse {
    #[serde(default)]
    deleted: bool,
}

/// Endpoint URL for one signing-service operation
pub fn endpoint(base_url: &str, operation: &str) -> String {
    format!("{}{}/{}", base_url.trim_end_matches('/'), SIGNING_API_PATH, operation)
}

/// Key expiry as epoch milliseconds, `days` from now
pub fn expiration_millis(days: u32) -> i64 {
    (Utc::now() + ChronoDuration::days(i64::from(days))).timestamp() * 1000
}

pub struct SigningServiceClient {
    client: Client,
    base_url: String,
    token: Zeroizing<String>,
}

impl std::fmt::Debug for SigningServiceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningServiceClient")
            .field("base_url", &self.base_url)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

impl SigningServiceClient {
    pub fn new(
        base_url: impl Into<String>,
        token: Zeroizing<String>,
        timeout: Duration,
    ) -> crate::errors::Result<Self> {
        // The signing service is commonly deployed with a self-signed certificate
        let client = Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| {
                crate::errors::FleetError::internal(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self { client, base_url: base_url.into(), token })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post(
        &self,
        operation: &str,
        form: &[(&str, String)],
    ) -> Result<serde_json::Value, SigningError> {
        let response = self
            .client
            .post(endpoint(&self.base_url, operation))
            .bearer_auth(self.token.as_str())
            .form(form)
            .send()
            .await
            .map_err(|source| SigningError::Connection { source })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(SigningError::Unauthorized);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SigningError::Status { status: status.as_u16(), body });
        }

        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| SigningError::Decode { message: e.to_string() })
    }

    /// Mint a key for one signature algorithm
    #[instrument(skip(self), fields(base_url = %self.base_url))]
    pub async fn generate_key(
        &self,
        algorithm: &str,
        validity_days: u32,
    ) -> Result<GeneratedKey, SigningError> {
        let body = self
            .post(
                "generateKey",
                &[
                    ("signatureAlgorithm", algorithm.to_string()),
                    ("expirationTime", expiration_millis(validity_days).to_string()),
                ],
            )
            .await?;

        let kid = body
            .get("kid")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| SigningError::Decode { message: "response has no 'kid'".to_string() })?
            .to_string();
        debug!(kid = %kid, "Signing key generated");
        Ok(GeneratedKey { kid, jwk: body })
    }

    /// Revoke a key. `Ok(false)` when the service answered but did not delete it.
    #[instrument(skip(self), fields(base_url = %self.base_url))]
    pub async fn delete_key(&self, kid: &str) -> Result<bool, SigningError> {
        let body = self.post("deleteKey", &[("kid", kid.to_string())]).await?;
        let parsed: DeleteKeyResponse = serde_json::from_value(body)
            .map_err(|e| SigningError::Decode { message: e.to_string() })?;
        Ok(parsed.deleted)
    }
}
