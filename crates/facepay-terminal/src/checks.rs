//! HTTP clients for the proximity and security stages.
//!
//! Each stage is a `POST` to its configured URL with the attempt details;
//! the service answers `{"passed": bool, "reason": "..."}`. A stage with no
//! URL always passes.

use facepay::{AuthorizationChecks, CheckContext};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CheckRequest<'a> {
    stage: &'a str,
    attempt_id: String,
    payer: &'a str,
    payee: &'a str,
    amount: String,
    currency: &'a str,
}

#[derive(Deserialize)]
struct CheckResponse {
    passed: bool,
    #[serde(default)]
    reason: Option<String>,
}

pub struct HttpPresenceChecks {
    client: reqwest::Client,
    proximity_url: Option<String>,
    security_url: Option<String>,
    timeout: Duration,
}

impl HttpPresenceChecks {
    pub fn new(
        client: reqwest::Client,
        proximity_url: Option<String>,
        security_url: Option<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            proximity_url,
            security_url,
            timeout,
        }
    }

    async fn run(&self, stage: &str, url: Option<&str>, ctx: &CheckContext) -> Result<(), String> {
        let Some(url) = url else {
            return Ok(());
        };
        let body = CheckRequest {
            stage,
            attempt_id: ctx.attempt_id.to_string(),
            payer: ctx.payer.as_str(),
            payee: ctx.payee.as_str(),
            amount: ctx.amount.to_string(),
            currency: ctx.currency.symbol(),
        };

        let resp = self
            .client
            .post(url)
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| format!("{stage} service unreachable: {e}"))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(format!("{stage} service returned {status}"));
        }
        let answer: CheckResponse = resp
            .json()
            .await
            .map_err(|e| format!("{stage} service sent an unreadable answer: {e}"))?;

        tracing::debug!(
            attempt_id = %ctx.attempt_id,
            stage,
            passed = answer.passed,
            "presence check answered"
        );
        if answer.passed {
            Ok(())
        } else {
            Err(answer
                .reason
                .unwrap_or_else(|| format!("{stage} check did not pass")))
        }
    }
}

impl AuthorizationChecks for HttpPresenceChecks {
    async fn check_proximity(&self, ctx: &CheckContext) -> Result<(), String> {
        self.run("proximity", self.proximity_url.as_deref(), ctx).await
    }

    async fn check_security(&self, ctx: &CheckContext) -> Result<(), String> {
        self.run("security", self.security_url.as_deref(), ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facepay::{AccountAddress, Amount, AttemptId, Currency};

    fn ctx() -> CheckContext {
        CheckContext {
            attempt_id: AttemptId::new(),
            payer: AccountAddress::new("0xA").unwrap(),
            payee: AccountAddress::new("0xM").unwrap(),
            amount: Amount::parse("12.5").unwrap(),
            currency: Currency::Usdc,
        }
    }

    #[tokio::test]
    async fn test_unconfigured_stages_pass() {
        let checks =
            HttpPresenceChecks::new(reqwest::Client::new(), None, None, Duration::from_secs(1));
        assert!(checks.check_proximity(&ctx()).await.is_ok());
        assert!(checks.check_security(&ctx()).await.is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_stage_fails() {
        let checks = HttpPresenceChecks::new(
            reqwest::Client::new(),
            Some("http://localhost:1/proximity".to_string()),
            None,
            Duration::from_secs(2),
        );
        let reason = checks.check_proximity(&ctx()).await.unwrap_err();
        assert!(reason.starts_with("proximity service unreachable"));
        assert!(checks.check_security(&ctx()).await.is_ok());
    }

    #[test]
    fn test_request_shape() {
        let c = ctx();
        let body = CheckRequest {
            stage: "security",
            attempt_id: c.attempt_id.to_string(),
            payer: c.payer.as_str(),
            payee: c.payee.as_str(),
            amount: c.amount.to_string(),
            currency: c.currency.symbol(),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["attemptId"], c.attempt_id.to_string());
        assert_eq!(json["currency"], "USDC");
        assert_eq!(json["amount"], c.amount.to_string());
    }
}
