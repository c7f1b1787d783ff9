use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::time::Instant;
use uuid::Uuid;

use crate::amount::{Amount, Currency};
use crate::error::ErrorKind;
use crate::identity::{AccountAddress, FaceSample, ResolvedIdentity};

/// Unique id of one payment attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttemptId(Uuid);

impl AttemptId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }
}

impl Default for AttemptId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// States of the payment authorization machine, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentState {
    Idle,
    Recognizing,
    Recognized,
    AmountEntry,
    Authorizing,
    ProximityCheck,
    SecurityCheck,
    BiometricConfirm,
    Processing,
    Settled,
    Failed,
}

impl PaymentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Recognizing => "recognizing",
            Self::Recognized => "recognized",
            Self::AmountEntry => "amount_entry",
            Self::Authorizing => "authorizing",
            Self::ProximityCheck => "proximity_check",
            Self::SecurityCheck => "security_check",
            Self::BiometricConfirm => "biometric_confirm",
            Self::Processing => "processing",
            Self::Settled => "settled",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Settled | Self::Failed)
    }

    /// Whether a new recognition trigger may start an attempt.
    pub fn accepts_capture(&self) -> bool {
        matches!(self, Self::Idle | Self::Settled | Self::Failed)
    }

    /// Progress indicator for the terminal display, 0..=100.
    pub fn progress(&self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Recognizing => 30,
            Self::Recognized => 100,
            Self::AmountEntry => 0,
            Self::Authorizing => 10,
            Self::ProximityCheck => 25,
            Self::SecurityCheck => 55,
            Self::BiometricConfirm => 75,
            Self::Processing => 90,
            Self::Settled => 100,
            Self::Failed => 0,
        }
    }
}

impl fmt::Display for PaymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a settled attempt. Created once, never modified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferReceipt {
    pub attempt_id: AttemptId,
    pub settled: bool,
    pub settlement_ref: String,
    pub reward_amount: u64,
}

/// The subject of the state machine. Owned by [`crate::machine::PaymentMachine`].
#[derive(Debug, Clone)]
pub struct PaymentAttempt {
    pub(crate) id: AttemptId,
    pub(crate) payer: Option<ResolvedIdentity>,
    pub(crate) payee: AccountAddress,
    pub(crate) amount: Option<Amount>,
    pub(crate) currency: Currency,
    pub(crate) state: PaymentState,
    pub(crate) started_at: DateTime<Utc>,
    pub(crate) last_error: Option<ErrorKind>,
    pub(crate) failure_detail: Option<String>,
    pub(crate) receipt: Option<TransferReceipt>,
    pub(crate) visited: Vec<PaymentState>,
    pub(crate) biometric_deadline: Option<Instant>,
    pub(crate) biometric_sample: Option<FaceSample>,
    pub(crate) reconfirming: bool,
    pub(crate) transfer_invoked: bool,
}

impl PaymentAttempt {
    pub(crate) fn start(payee: AccountAddress, currency: Currency) -> Self {
        Self {
            id: AttemptId::new(),
            payer: None,
            payee,
            amount: None,
            currency,
            state: PaymentState::Recognizing,
            started_at: Utc::now(),
            last_error: None,
            failure_detail: None,
            receipt: None,
            visited: vec![PaymentState::Recognizing],
            biometric_deadline: None,
            biometric_sample: None,
            reconfirming: false,
            transfer_invoked: false,
        }
    }

    pub(crate) fn enter(&mut self, state: PaymentState) {
        self.state = state;
        self.visited.push(state);
    }

    pub fn id(&self) -> AttemptId {
        self.id
    }

    pub fn payer(&self) -> Option<&ResolvedIdentity> {
        self.payer.as_ref()
    }

    pub fn payee(&self) -> &AccountAddress {
        &self.payee
    }

    pub fn amount(&self) -> Option<Amount> {
        self.amount
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    pub fn state(&self) -> PaymentState {
        self.state
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn last_error(&self) -> Option<ErrorKind> {
        self.last_error
    }

    /// What went wrong, beyond the error kind.
    pub fn failure_detail(&self) -> Option<&str> {
        self.failure_detail.as_deref()
    }

    pub fn receipt(&self) -> Option<&TransferReceipt> {
        self.receipt.as_ref()
    }

    /// Every state entered by this attempt, in order.
    pub fn visited(&self) -> &[PaymentState] {
        &self.visited
    }

    pub fn transfer_invoked(&self) -> bool {
        self.transfer_invoked
    }

    /// Deadline of the open biometric window. `None` once it has been resolved.
    pub fn biometric_deadline(&self) -> Option<Instant> {
        if self.state == PaymentState::BiometricConfirm && !self.reconfirming {
            self.biometric_deadline
        } else {
            None
        }
    }

    /// Whole seconds left in the biometric window, rounded up.
    pub fn biometric_window_remaining(&self, now: Instant) -> u64 {
        match self.biometric_deadline() {
            Some(deadline) => {
                let left = deadline.saturating_duration_since(now);
                let secs = left.as_secs();
                if left.subsec_nanos() > 0 {
                    secs + 1
                } else {
                    secs
                }
            }
            None => 0,
        }
    }

    pub fn snapshot(&self, now: Instant) -> AttemptSnapshot {
        AttemptSnapshot {
            id: self.id,
            payer_address: self.payer.as_ref().map(|p| p.account_address.clone()),
            payer_name: self
                .payer
                .as_ref()
                .map(|p| p.display_name.as_str().to_string()),
            payee_address: self.payee.clone(),
            amount: self.amount,
            currency: self.currency,
            state: self.state,
            started_at: self.started_at,
            biometric_window_remaining: self.biometric_window_remaining(now),
            last_error: self.last_error,
            failure_detail: self.failure_detail.clone(),
            receipt: self.receipt.clone(),
        }
    }
}

/// Serializable view of an attempt for the terminal display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptSnapshot {
    pub id: AttemptId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payer_address: Option<AccountAddress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payer_name: Option<String>,
    pub payee_address: AccountAddress,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<Amount>,
    pub currency: Currency,
    pub state: PaymentState,
    pub started_at: DateTime<Utc>,
    pub biometric_window_remaining: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt: Option<TransferReceipt>,
}

/// What the machine asks the transfer step to move. Carries no credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOrder {
    pub attempt_id: AttemptId,
    pub payer: AccountAddress,
    pub payee: AccountAddress,
    pub amount: Amount,
    pub currency: Currency,
}

/// Opaque signing material for the payer, resolved per transfer.
///
/// Not `Clone`, not `Serialize`, and its `Debug` output is redacted: the
/// value lives for exactly one executor call.
pub struct PayerCredential(String);

impl PayerCredential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Raw value, for building the single outgoing request.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PayerCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PayerCredential([REDACTED])")
    }
}

/// Request handed to a [`crate::scheme::SponsoredTransferExecutor`].
#[derive(Debug)]
pub struct TransferRequest {
    pub attempt_id: AttemptId,
    pub payer_credential: PayerCredential,
    pub payer: AccountAddress,
    pub payee: AccountAddress,
    pub amount: Amount,
    pub currency: Currency,
}

impl TransferRequest {
    pub fn new(order: TransferOrder, payer_credential: PayerCredential) -> Self {
        Self {
            attempt_id: order.attempt_id,
            payer_credential,
            payer: order.payer,
            payee: order.payee,
            amount: order.amount,
            currency: order.currency,
        }
    }
}

/// Successful executor response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferOutcome {
    pub settlement_ref: String,
    /// Sponsor identity that paid the network fee, when reported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fee_paid_by: Option<String>,
}
