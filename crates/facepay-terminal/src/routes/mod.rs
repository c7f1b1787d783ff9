pub mod attempts;
pub mod enrollment;
pub mod health;
pub mod session;

use actix_web::{http::header, web, HttpRequest};
use facepay::security::bearer_matches;
use facepay_identity::RecognitionOracle;

use crate::error::TerminalError;
use crate::metrics;

/// Check the request's bearer token. `None` means the endpoint is open.
pub(crate) fn authorize(
    req: &HttpRequest,
    expected: Option<&str>,
    endpoint: &'static str,
) -> Result<(), TerminalError> {
    let Some(expected) = expected else {
        return Ok(());
    };
    let presented = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    if bearer_matches(presented, expected) {
        Ok(())
    } else {
        tracing::warn!(endpoint, "bearer token missing or invalid");
        metrics::AUTH_FAILURES.with_label_values(&[endpoint]).inc();
        Err(TerminalError::Unauthorized)
    }
}

/// Mount every route of the terminal service.
pub fn configure<O: RecognitionOracle + 'static>(cfg: &mut web::ServiceConfig) {
    health::configure::<O>(cfg);
    session::configure::<O>(cfg);
    enrollment::configure::<O>(cfg);
    attempts::configure::<O>(cfg);
}
