//! Face-authorized payments for a merchant terminal.
//!
//! A customer is identified by face, confirms the payment by holding their
//! face in front of the camera for a short window, and pays with a transfer
//! whose network fee is covered by a sponsor.
//!
//! # Pieces
//!
//! - [`PaymentMachine`] - the authorization pipeline as a pure state machine
//! - [`TerminalSession`] / [`SessionHandle`] - drives the machine, its timers and effects
//! - [`AttemptLedger`] - durable claim per transfer so funds move at most once
//! - [`HttpSponsorExecutor`] - the sponsored transfer over HTTP
//! - [`reward`] - loyalty points for a settled payment
//!
//! Identity resolution lives in the `facepay-identity` crate, which implements
//! [`Recognizer`] on top of a recognition oracle.
//!
//! # Quick example
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use facepay::*;
//! # async fn demo<R, C, P, X>(recognizer: Arc<R>, checks: Arc<C>, custody: Arc<P>, sponsor: Arc<X>)
//! # where R: Recognizer + 'static, C: AuthorizationChecks + 'static,
//! #       P: CredentialProvider + 'static, X: SponsoredTransferExecutor + 'static {
//! let config = SessionConfig::new("0x8c42...merchant".parse().unwrap());
//! let ledger = Arc::new(InMemoryAttemptLedger::new());
//! let session = TerminalSession::new(config, recognizer, checks, custody, sponsor, ledger).spawn();
//!
//! session.submit_recognition_sample(FaceSample::jpeg(vec![/* frame */])).await.unwrap();
//! session.submit_amount(Amount::parse("25.00").unwrap()).await.unwrap();
//! # }
//! ```

pub mod amount;
pub mod constants;
pub mod error;
pub mod hmac;
pub mod identity;
pub mod payment;
pub mod reward;
pub mod scheme;
pub mod security;

pub mod ledger;
pub mod machine;
pub mod session;
pub mod sponsor_client;

pub use amount::{Amount, Currency};
pub use constants::*;
pub use error::{ErrorKind, FacepayError, OracleError, TransferError};
pub use identity::*;
pub use ledger::{
    AttemptLedger, AttemptOutcome, InMemoryAttemptLedger, LedgerEntry, SqliteAttemptLedger,
};
pub use machine::{Effect, Event, PaymentMachine, Transition};
pub use payment::*;
pub use reward::{reward, RewardRate};
pub use scheme::*;
pub use session::{
    RecognitionVerdict, SessionHandle, SessionObserver, SessionUpdate, TerminalSession,
};
pub use sponsor_client::HttpSponsorExecutor;
