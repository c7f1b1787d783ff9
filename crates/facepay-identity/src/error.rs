use facepay::{ErrorKind, FacepayError, OracleError};

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error(transparent)]
    Oracle(#[from] OracleError),

    #[error("account {0} is already enrolled")]
    AlreadyEnrolled(String),

    #[error(transparent)]
    InvalidInput(#[from] FacepayError),

    #[error("registry error: {0}")]
    Registry(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl IdentityError {
    /// Taxonomy kind, where the error has one.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Oracle(e) => Some(e.kind()),
            Self::AlreadyEnrolled(_) => Some(ErrorKind::AlreadyEnrolled),
            Self::InvalidInput(e) => e.kind(),
            Self::Registry(_) | Self::Database(_) => None,
        }
    }
}
