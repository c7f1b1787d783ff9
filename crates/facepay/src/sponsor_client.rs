//! HTTP client for a remote fee sponsor's `/transfer` endpoint.
//!
//! The sponsor co-signs the payer's transfer and pays the network fee. The
//! client never retries: once a request may have left the socket, any failure
//! to read a definite answer is reported as [`TransferError::Ambiguous`].

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::DEFAULT_TRANSFER_TIMEOUT_SECS;
use crate::error::TransferError;
use crate::hmac::{sign_transfer, ATTEMPT_ID_HEADER, SPONSOR_AUTH_HEADER};
use crate::payment::{TransferOutcome, TransferRequest};
use crate::scheme::SponsoredTransferExecutor;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TransferBody<'a> {
    attempt_id: String,
    payer_credential: &'a str,
    from_address: &'a str,
    to_address: &'a str,
    amount: String,
    currency: &'a str,
}

/// Sponsor response body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SponsorResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub transaction_digest: Option<String>,
    #[serde(default)]
    pub sponsor: Option<String>,
    #[serde(default)]
    pub error_kind: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// [`SponsoredTransferExecutor`] backed by a sponsor HTTP service.
pub struct HttpSponsorExecutor {
    client: reqwest::Client,
    base_url: String,
    secret: Option<Vec<u8>>,
    timeout: Duration,
}

impl HttpSponsorExecutor {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            secret: None,
            timeout: Duration::from_secs(DEFAULT_TRANSFER_TIMEOUT_SECS),
        }
    }

    /// Sign every request body with this shared secret.
    pub fn with_shared_secret(mut self, secret: impl Into<Vec<u8>>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl std::fmt::Debug for HttpSponsorExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSponsorExecutor")
            .field("base_url", &self.base_url)
            .field("secret", &self.secret.as_ref().map(|_| "[REDACTED]"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl HttpSponsorExecutor {
    /// Build the signed POST for one transfer without sending it.
    fn signed_request(&self, request: &TransferRequest) -> Result<reqwest::Request, TransferError> {
        let url = format!("{}/transfer", self.base_url);
        let body = TransferBody {
            attempt_id: request.attempt_id.to_string(),
            payer_credential: request.payer_credential.expose(),
            from_address: request.payer.as_str(),
            to_address: request.payee.as_str(),
            amount: request.amount.to_string(),
            currency: request.currency.symbol(),
        };
        let body_bytes = serde_json::to_vec(&body)
            .map_err(|e| TransferError::SponsorUnavailable(format!("serialization failed: {e}")))?;

        let mut http = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header(ATTEMPT_ID_HEADER, request.attempt_id.to_string())
            .timeout(self.timeout);
        if let Some(secret) = &self.secret {
            let sig = sign_transfer(secret, &request.attempt_id, &body_bytes);
            http = http.header(SPONSOR_AUTH_HEADER, sig);
        }
        http.body(body_bytes)
            .build()
            .map_err(|e| TransferError::SponsorUnavailable(format!("invalid sponsor request: {e}")))
    }
}

impl SponsoredTransferExecutor for HttpSponsorExecutor {
    async fn transfer(&self, request: TransferRequest) -> Result<TransferOutcome, TransferError> {
        let http = self.signed_request(&request)?;

        tracing::info!(
            attempt_id = %request.attempt_id,
            payer = %request.payer,
            payee = %request.payee,
            amount = %request.amount,
            currency = %request.currency,
            "submitting sponsored transfer"
        );

        let resp = self.client.execute(http).await.map_err(classify_send_error)?;
        let status = resp.status();
        let text = resp.text().await.map_err(|e| {
            TransferError::Ambiguous(format!("sponsor response unreadable ({status}): {e}"))
        })?;
        let parsed = serde_json::from_str::<SponsorResponse>(&text).ok();
        classify_response(status.as_u16(), parsed)
    }
}

fn classify_send_error(e: reqwest::Error) -> TransferError {
    if e.is_timeout() {
        TransferError::Ambiguous(format!("sponsor request timed out: {e}"))
    } else if e.is_connect() || e.is_builder() {
        TransferError::SponsorUnavailable(format!("sponsor unreachable: {e}"))
    } else {
        TransferError::Ambiguous(format!("sponsor request failed: {e}"))
    }
}

/// Map a sponsor HTTP answer to a transfer outcome.
pub fn classify_response(
    status: u16,
    body: Option<SponsorResponse>,
) -> Result<TransferOutcome, TransferError> {
    match status {
        401 | 403 => {
            return Err(TransferError::SponsorUnavailable(
                "sponsor authentication failed".to_string(),
            ))
        }
        429 | 503 => {
            return Err(TransferError::SponsorUnavailable(format!(
                "sponsor refused request ({status})"
            )))
        }
        _ => {}
    }

    let Some(body) = body else {
        return Err(TransferError::Ambiguous(format!(
            "sponsor returned {status} without a readable body"
        )));
    };

    if body.success {
        return match body.transaction_digest {
            Some(digest) if !digest.is_empty() => Ok(TransferOutcome {
                settlement_ref: digest,
                fee_paid_by: body.sponsor,
            }),
            _ => Err(TransferError::Ambiguous(
                "sponsor reported success without a transaction digest".to_string(),
            )),
        };
    }

    let message = body
        .error
        .unwrap_or_else(|| format!("sponsor declined ({status})"));
    match body.error_kind.as_deref() {
        Some("insufficient_funds") => Err(TransferError::InsufficientFunds(message)),
        Some("sponsor_unavailable") => Err(TransferError::SponsorUnavailable(message)),
        Some("unknown") => Err(TransferError::Ambiguous(message)),
        _ if status >= 500 => Err(TransferError::Ambiguous(message)),
        _ => Err(TransferError::NetworkRejected(message)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount::{Amount, Currency};
    use crate::identity::AccountAddress;
    use crate::hmac::verify_transfer;
    use crate::payment::{AttemptId, PayerCredential};

    fn body(json: &str) -> Option<SponsorResponse> {
        Some(serde_json::from_str(json).unwrap())
    }

    #[test]
    fn test_success_with_digest_settles() {
        let outcome = classify_response(
            200,
            body(r#"{"success":true,"transactionDigest":"tx123","sponsor":"0xS"}"#),
        )
        .unwrap();
        assert_eq!(outcome.settlement_ref, "tx123");
        assert_eq!(outcome.fee_paid_by.as_deref(), Some("0xS"));
    }

    #[test]
    fn test_success_without_digest_is_ambiguous() {
        let err = classify_response(200, body(r#"{"success":true}"#)).unwrap_err();
        assert!(err.requires_reconciliation());
    }

    #[test]
    fn test_unreadable_body_is_ambiguous() {
        let err = classify_response(200, None).unwrap_err();
        assert!(matches!(err, TransferError::Ambiguous(_)));
    }

    #[test]
    fn test_declines_map_to_kinds() {
        let err = classify_response(
            400,
            body(r#"{"success":false,"errorKind":"insufficient_funds","error":"balance 3"}"#),
        )
        .unwrap_err();
        assert!(matches!(err, TransferError::InsufficientFunds(m) if m == "balance 3"));

        let err = classify_response(400, body(r#"{"success":false,"error":"bad sig"}"#))
            .unwrap_err();
        assert!(matches!(err, TransferError::NetworkRejected(_)));

        let err = classify_response(500, body(r#"{"success":false}"#)).unwrap_err();
        assert!(matches!(err, TransferError::Ambiguous(_)));
    }

    #[test]
    fn test_auth_and_overload_are_unavailable() {
        assert!(matches!(
            classify_response(401, None),
            Err(TransferError::SponsorUnavailable(_))
        ));
        assert!(matches!(
            classify_response(503, body(r#"{"success":false}"#)),
            Err(TransferError::SponsorUnavailable(_))
        ));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let exec = HttpSponsorExecutor::new(reqwest::Client::new(), "http://sponsor/")
            .with_shared_secret(b"hunter2".to_vec());
        let debug = format!("{exec:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("http://sponsor\""));
    }

    #[test]
    fn test_request_signature_verifies_for_its_attempt() {
        let exec = HttpSponsorExecutor::new(reqwest::Client::new(), "http://sponsor")
            .with_shared_secret(b"shared-secret".to_vec());
        let attempt_id = AttemptId::new();
        let request = TransferRequest {
            attempt_id,
            payer_credential: PayerCredential::new("k"),
            payer: AccountAddress::new("0xA").unwrap(),
            payee: AccountAddress::new("0xB").unwrap(),
            amount: Amount::parse("25").unwrap(),
            currency: Currency::Usdc,
        };
        let http = exec.signed_request(&request).unwrap();
        assert_eq!(http.url().as_str(), "http://sponsor/transfer");
        assert_eq!(
            http.headers()[ATTEMPT_ID_HEADER].to_str().unwrap(),
            attempt_id.to_string()
        );

        let sig = http.headers()[SPONSOR_AUTH_HEADER].to_str().unwrap();
        let body = http.body().and_then(|b| b.as_bytes()).unwrap();
        assert!(verify_transfer(b"shared-secret", &attempt_id, body, sig));
        assert!(!verify_transfer(b"shared-secret", &AttemptId::new(), body, sig));
    }

    #[tokio::test]
    async fn test_unreachable_sponsor_is_unavailable() {
        let exec = HttpSponsorExecutor::new(reqwest::Client::new(), "http://localhost:1")
            .with_timeout(Duration::from_secs(2));
        let request = TransferRequest {
            attempt_id: AttemptId::new(),
            payer_credential: PayerCredential::new("k"),
            payer: AccountAddress::new("0xA").unwrap(),
            payee: AccountAddress::new("0xB").unwrap(),
            amount: Amount::parse("1").unwrap(),
            currency: Currency::Usdc,
        };
        let err = exec.transfer(request).await.unwrap_err();
        assert!(matches!(err, TransferError::SponsorUnavailable(_)));
    }
}
