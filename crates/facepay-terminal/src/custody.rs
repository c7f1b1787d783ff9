//! Credential custody client.
//!
//! The terminal holds no payer keys. For each transfer it asks the custody
//! service for the payer's credential with
//! `POST {custody}/credentials/resolve {"address": ...}` and hands the answer
//! straight to the sponsor request. The credential is never logged.

use facepay::{AccountAddress, CredentialProvider, PayerCredential, TransferError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Serialize)]
struct ResolveRequest<'a> {
    address: &'a str,
}

#[derive(Deserialize)]
struct ResolveResponse {
    credential: String,
}

pub struct HttpCredentialProvider {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    timeout: Duration,
}

impl HttpCredentialProvider {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
            timeout,
        }
    }

    /// Send `Authorization: Bearer <token>` with every lookup.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

impl std::fmt::Debug for HttpCredentialProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpCredentialProvider")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl CredentialProvider for HttpCredentialProvider {
    async fn credential_for(&self, payer: &AccountAddress) -> Result<PayerCredential, TransferError> {
        let mut request = self
            .client
            .post(format!("{}/credentials/resolve", self.base_url))
            .json(&ResolveRequest {
                address: payer.as_str(),
            })
            .timeout(self.timeout);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let resp = request.send().await.map_err(|e| {
            TransferError::CredentialUnavailable(format!("custody service unreachable: {e}"))
        })?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            tracing::warn!(payer = %payer.short(), "no credential on file");
            return Err(TransferError::CredentialUnavailable(format!(
                "no credential on file for {}",
                payer.short()
            )));
        }
        if !status.is_success() {
            return Err(TransferError::CredentialUnavailable(format!(
                "custody service returned {status}"
            )));
        }

        let body: ResolveResponse = resp.json().await.map_err(|_| {
            TransferError::CredentialUnavailable("custody service sent an unreadable answer".to_string())
        })?;
        if body.credential.is_empty() {
            return Err(TransferError::CredentialUnavailable(
                "custody service returned an empty credential".to_string(),
            ));
        }
        tracing::debug!(payer = %payer.short(), "payer credential resolved");
        Ok(PayerCredential::new(body.credential))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_hides_token() {
        let custody = HttpCredentialProvider::new(
            reqwest::Client::new(),
            "http://custody.internal/",
            Duration::from_secs(5),
        )
        .with_token("custody-secret");
        let debug = format!("{custody:?}");
        assert!(!debug.contains("custody-secret"));
        assert!(debug.contains("http://custody.internal\""));
    }

    #[tokio::test]
    async fn test_unreachable_custody_is_credential_unavailable() {
        let custody = HttpCredentialProvider::new(
            reqwest::Client::new(),
            "http://localhost:1",
            Duration::from_secs(2),
        );
        let err = custody
            .credential_for(&AccountAddress::new("0xA").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::CredentialUnavailable(_)));
    }
}
