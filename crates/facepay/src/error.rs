use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::payment::PaymentState;

/// Failure classification recorded on a failed attempt and shown to the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotRecognized,
    AlreadyEnrolled,
    OracleRejected,
    OracleUnavailable,
    AmbiguousMatch,
    AuthorizationDenied,
    ProximityFailed,
    SecurityCheckFailed,
    BiometricMismatch,
    BiometricTimeout,
    InsufficientFunds,
    SponsorUnavailable,
    TransferFailed,
    InvalidAmount,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotRecognized => "not_recognized",
            Self::AlreadyEnrolled => "already_enrolled",
            Self::OracleRejected => "oracle_rejected",
            Self::OracleUnavailable => "oracle_unavailable",
            Self::AmbiguousMatch => "ambiguous_match",
            Self::AuthorizationDenied => "authorization_denied",
            Self::ProximityFailed => "proximity_failed",
            Self::SecurityCheckFailed => "security_check_failed",
            Self::BiometricMismatch => "biometric_mismatch",
            Self::BiometricTimeout => "biometric_timeout",
            Self::InsufficientFunds => "insufficient_funds",
            Self::SponsorUnavailable => "sponsor_unavailable",
            Self::TransferFailed => "transfer_failed",
            Self::InvalidAmount => "invalid_amount",
        }
    }

    /// Kinds raised at or after the transfer boundary. An attempt that failed
    /// with one of these must be reconciled before the payer is charged again.
    pub fn is_financial(&self) -> bool {
        matches!(
            self,
            Self::InsufficientFunds | Self::SponsorUnavailable | Self::TransferFailed
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors reported by the recognition oracle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OracleError {
    /// Unreachable, timed out, or answered with a server error.
    #[error("recognition oracle unavailable: {0}")]
    Unavailable(String),

    /// The oracle refused the request (no face detected, bad image, ...).
    #[error("recognition oracle rejected request: {0}")]
    Rejected(String),
}

impl OracleError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unavailable(_) => ErrorKind::OracleUnavailable,
            Self::Rejected(_) => ErrorKind::OracleRejected,
        }
    }
}

/// Errors returned by the sponsored transfer step.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),

    /// The sponsor refused or could not be reached before anything was submitted.
    #[error("sponsor unavailable: {0}")]
    SponsorUnavailable(String),

    #[error("network rejected transfer: {0}")]
    NetworkRejected(String),

    /// No usable answer: the transfer may or may not have executed.
    #[error("transfer outcome unknown: {0}")]
    Ambiguous(String),

    #[error("payer credential unavailable: {0}")]
    CredentialUnavailable(String),

    #[error("transfer already invoked for attempt {0}")]
    AlreadyInvoked(String),
}

impl TransferError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InsufficientFunds(_) => ErrorKind::InsufficientFunds,
            Self::SponsorUnavailable(_) => ErrorKind::SponsorUnavailable,
            Self::NetworkRejected(_)
            | Self::Ambiguous(_)
            | Self::CredentialUnavailable(_)
            | Self::AlreadyInvoked(_) => ErrorKind::TransferFailed,
        }
    }

    /// Whether the ledger must be checked by hand before a new attempt.
    pub fn requires_reconciliation(&self) -> bool {
        matches!(self, Self::Ambiguous(_))
    }
}

/// Errors returned by facepay operations.
#[derive(Debug, Error)]
pub enum FacepayError {
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("invalid identity: {0}")]
    InvalidIdentity(String),

    #[error("invalid sample: {0}")]
    InvalidSample(String),

    #[error("{event} not accepted in state {state}")]
    InvalidTransition {
        state: PaymentState,
        event: &'static str,
    },

    #[error("terminal busy: attempt in state {0}")]
    Busy(PaymentState),

    #[error("session closed")]
    SessionClosed,

    #[error("ledger error: {0}")]
    Ledger(String),

    #[error("config error: {0}")]
    ConfigError(String),

    #[error("serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),
}

impl FacepayError {
    /// Taxonomy kind for boundary rejections that have one.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::InvalidAmount(_) => Some(ErrorKind::InvalidAmount),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for FacepayError {
    fn from(e: rusqlite::Error) -> Self {
        FacepayError::Ledger(e.to_string())
    }
}
