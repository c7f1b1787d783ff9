//! Face-identity resolution for facepay terminals.
//!
//! A face is enrolled with an external recognition oracle under the key
//! `address|name`, and a local [`EnrollmentRegistry`] records who is enrolled
//! for display. [`IdentityDirectory`] combines the two:
//!
//! - enrollment is at most once per account address
//! - recognition never guesses: ambiguous matches are reported as no match
//! - the oracle is asked on every call, nothing is cached
//!
//! The directory implements [`facepay::Recognizer`], so it plugs straight into
//! a [`facepay::TerminalSession`].

pub mod directory;
pub mod error;
pub mod oracle;
pub mod registry;

pub use directory::{
    EnrolledIdentity, EnrollmentOutcome, EnrollmentStatus, IdentityDirectory, ReconcileReport,
    RevokeOutcome,
};
pub use error::IdentityError;
pub use oracle::{HttpRecognitionOracle, OracleCandidate, OraclePerson, RecognitionOracle};
pub use registry::{EnrollmentRegistry, InMemoryEnrollmentRegistry, SqliteEnrollmentRegistry};
