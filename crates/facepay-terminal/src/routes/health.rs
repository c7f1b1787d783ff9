use actix_web::{web, HttpRequest, HttpResponse};
use facepay_identity::RecognitionOracle;

use crate::error::TerminalError;
use crate::metrics;
use crate::routes::authorize;
use crate::state::AppState;

/// GET /health
///
/// Reports `attention` while the ledger holds transfers of unknown outcome.
pub async fn health<O: RecognitionOracle + 'static>(state: web::Data<AppState<O>>) -> HttpResponse {
    let current = state.session.current();
    let unresolved = state.ledger.unresolved().len();
    HttpResponse::Ok().json(serde_json::json!({
        "status": if unresolved == 0 { "ok" } else { "attention" },
        "service": "facepay-terminal",
        "version": env!("CARGO_PKG_VERSION"),
        "sessionState": current.state,
        "busy": current.busy,
        "unresolvedAttempts": unresolved,
    }))
}

/// GET /metrics - Prometheus metrics, bearer-gated when METRICS_TOKEN is set
pub async fn metrics_endpoint<O: RecognitionOracle + 'static>(
    req: HttpRequest,
    state: web::Data<AppState<O>>,
) -> Result<HttpResponse, TerminalError> {
    authorize(&req, state.metrics_token.as_deref(), "metrics")?;
    Ok(HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(metrics::metrics_output()))
}

pub fn configure<O: RecognitionOracle + 'static>(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health::<O>))
        .route("/metrics", web::get().to(metrics_endpoint::<O>));
}
