//! Collaborator traits consumed by the payment session.
//!
//! - [`Recognizer`] - resolves a face sample to an identity (implemented by
//!   `facepay_identity::IdentityDirectory`)
//! - [`AuthorizationChecks`] - the proximity and security stages
//! - [`CredentialProvider`] - resolves a payer's signing credential per transfer
//! - [`SponsoredTransferExecutor`] - moves funds with the fee paid by a sponsor
//!
//! See [`crate::sponsor_client::HttpSponsorExecutor`] for the HTTP executor.

use crate::amount::{Amount, Currency};
use crate::error::{OracleError, TransferError};
use crate::identity::{AccountAddress, FaceSample, RecognitionResult};
use crate::payment::{AttemptId, PayerCredential, TransferOutcome, TransferRequest};

/// Face-sample-to-identity resolution.
pub trait Recognizer: Send + Sync {
    /// Resolve a sample. No match and ambiguous matches are `matched=false`,
    /// not errors.
    fn recognize(
        &self,
        sample: &FaceSample,
    ) -> impl std::future::Future<Output = Result<RecognitionResult, OracleError>> + Send;
}

/// Attempt details handed to the external checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckContext {
    pub attempt_id: AttemptId,
    pub payer: AccountAddress,
    pub payee: AccountAddress,
    pub amount: Amount,
    pub currency: Currency,
}

/// The proximity and security stages of the authorization pipeline.
///
/// Each returns `Err(reason)` when the stage does not pass.
pub trait AuthorizationChecks: Send + Sync {
    fn check_proximity(
        &self,
        ctx: &CheckContext,
    ) -> impl std::future::Future<Output = Result<(), String>> + Send;

    fn check_security(
        &self,
        ctx: &CheckContext,
    ) -> impl std::future::Future<Output = Result<(), String>> + Send;
}

/// Source of payer signing credentials (a custody service, never a static table).
pub trait CredentialProvider: Send + Sync {
    fn credential_for(
        &self,
        payer: &AccountAddress,
    ) -> impl std::future::Future<Output = Result<PayerCredential, TransferError>> + Send;
}

/// Executes a transfer whose network fee is paid by a sponsor.
///
/// # Safety of retries
/// Implementations must not retry internally. A request that times out or
/// returns an unreadable answer is [`TransferError::Ambiguous`]: the funds may
/// have moved, and only reconciliation against the ledger can tell.
pub trait SponsoredTransferExecutor: Send + Sync {
    fn transfer(
        &self,
        request: TransferRequest,
    ) -> impl std::future::Future<Output = Result<TransferOutcome, TransferError>> + Send;
}
