use actix_web::{web, HttpRequest, HttpResponse};
use facepay::AttemptId;
use facepay_identity::RecognitionOracle;

use crate::error::TerminalError;
use crate::routes::authorize;
use crate::state::AppState;

/// GET /attempts/unresolved - claimed transfers whose outcome is pending or unknown
pub async fn unresolved<O: RecognitionOracle + 'static>(
    req: HttpRequest,
    state: web::Data<AppState<O>>,
) -> Result<HttpResponse, TerminalError> {
    authorize(&req, state.admin_token.as_deref(), "attempts")?;
    let attempts = state.ledger.unresolved();
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "count": attempts.len(),
        "attempts": attempts,
    })))
}

/// GET /attempts/{id} - recorded outcome of one transfer
pub async fn outcome<O: RecognitionOracle + 'static>(
    req: HttpRequest,
    state: web::Data<AppState<O>>,
    path: web::Path<String>,
) -> Result<HttpResponse, TerminalError> {
    authorize(&req, state.admin_token.as_deref(), "attempts")?;
    let raw = path.into_inner();
    let id = AttemptId::parse(&raw)
        .ok_or_else(|| TerminalError::BadRequest(format!("'{raw}' is not an attempt id")))?;
    match state.ledger.outcome(&id) {
        Some(outcome) => Ok(HttpResponse::Ok().json(serde_json::json!({
            "attemptId": id,
            "outcome": outcome,
        }))),
        None => Err(TerminalError::NotFound(format!("no transfer on record for {id}"))),
    }
}

pub fn configure<O: RecognitionOracle + 'static>(cfg: &mut web::ServiceConfig) {
    cfg.route("/attempts/unresolved", web::get().to(unresolved::<O>))
        .route("/attempts/{id}", web::get().to(outcome::<O>));
}
