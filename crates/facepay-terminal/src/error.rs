use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use facepay::{FacepayError, OracleError};
use facepay_identity::IdentityError;

#[derive(Debug, thiserror::Error)]
pub enum TerminalError {
    #[error(transparent)]
    Session(#[from] FacepayError),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error("unauthorized")]
    Unauthorized,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),
}

impl From<OracleError> for TerminalError {
    fn from(e: OracleError) -> Self {
        TerminalError::Identity(IdentityError::Oracle(e))
    }
}

/// Status, error code and client-facing message for a core error.
fn describe_facepay(e: &FacepayError) -> (StatusCode, &'static str, String) {
    match e {
        FacepayError::InvalidAmount(m) => (StatusCode::BAD_REQUEST, "invalid_amount", m.clone()),
        FacepayError::InvalidIdentity(m) => {
            (StatusCode::BAD_REQUEST, "invalid_identity", m.clone())
        }
        FacepayError::InvalidSample(m) => (StatusCode::BAD_REQUEST, "invalid_sample", m.clone()),
        FacepayError::Busy(_) => (StatusCode::CONFLICT, "busy", e.to_string()),
        FacepayError::InvalidTransition { .. } => {
            (StatusCode::CONFLICT, "invalid_transition", e.to_string())
        }
        FacepayError::SessionClosed => (
            StatusCode::SERVICE_UNAVAILABLE,
            "session_closed",
            "The payment session is not running".to_string(),
        ),
        FacepayError::Ledger(_) | FacepayError::ConfigError(_) | FacepayError::SerdeError(_) => {
            tracing::error!("Internal error: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "An internal error occurred".to_string(),
            )
        }
    }
}

impl TerminalError {
    fn describe(&self) -> (StatusCode, &'static str, String) {
        match self {
            TerminalError::Session(e) => describe_facepay(e),
            TerminalError::Identity(IdentityError::InvalidInput(e)) => describe_facepay(e),
            TerminalError::Identity(IdentityError::AlreadyEnrolled(address)) => (
                StatusCode::CONFLICT,
                "already_enrolled",
                format!("Account {address} already has an enrolled face"),
            ),
            TerminalError::Identity(IdentityError::Oracle(OracleError::Unavailable(m))) => {
                tracing::warn!("Recognition oracle unavailable: {}", m);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "oracle_unavailable",
                    "The recognition service is unavailable, try again".to_string(),
                )
            }
            TerminalError::Identity(IdentityError::Oracle(OracleError::Rejected(m))) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "oracle_rejected",
                m.clone(),
            ),
            TerminalError::Identity(e @ (IdentityError::Registry(_) | IdentityError::Database(_))) => {
                tracing::error!("Registry error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                )
            }
            TerminalError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "Valid Bearer token required".to_string(),
            ),
            TerminalError::NotFound(m) => (StatusCode::NOT_FOUND, "not_found", m.clone()),
            TerminalError::BadRequest(m) => (StatusCode::BAD_REQUEST, "bad_request", m.clone()),
        }
    }
}

impl ResponseError for TerminalError {
    fn status_code(&self) -> StatusCode {
        self.describe().0
    }

    fn error_response(&self) -> HttpResponse {
        let (status, error, message) = self.describe();
        HttpResponse::build(status).json(serde_json::json!({
            "error": error,
            "message": message,
        }))
    }
}
