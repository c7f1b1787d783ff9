use facepay::{AttemptLedger, SessionHandle};
use facepay_identity::IdentityDirectory;
use std::sync::Arc;

/// Shared application state.
///
/// Generic over the recognition oracle so the routes can be driven by a fake
/// oracle in tests.
pub struct AppState<O> {
    /// The one payment session this terminal runs
    pub session: SessionHandle,
    pub directory: Arc<IdentityDirectory<O>>,
    pub ledger: Arc<dyn AttemptLedger>,
    /// Bearer token for /metrics (None = public)
    pub metrics_token: Option<String>,
    /// Bearer token for revoke, reconcile and attempt inspection (None = open)
    pub admin_token: Option<String>,
}
