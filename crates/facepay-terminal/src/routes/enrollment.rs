use actix_web::{web, HttpRequest, HttpResponse};
use facepay::{AccountAddress, DisplayName, FaceSample};
use facepay_identity::{IdentityError, RecognitionOracle};
use serde::Deserialize;

use crate::error::TerminalError;
use crate::metrics;
use crate::routes::authorize;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct NameQuery {
    pub name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollRequest {
    pub account_address: String,
    pub display_name: String,
    pub image: String,
    #[serde(default)]
    pub mime_type: Option<String>,
}

/// GET /enrollment/{address}?name= - is this address/name pair enrolled
pub async fn check_enrollment<O: RecognitionOracle + 'static>(
    state: web::Data<AppState<O>>,
    path: web::Path<String>,
    query: web::Query<NameQuery>,
) -> Result<HttpResponse, TerminalError> {
    let address = AccountAddress::new(path.into_inner())?;
    let name = DisplayName::new(query.into_inner().name)?;
    let status = state.directory.check_enrollment(&address, &name).await;
    Ok(HttpResponse::Ok().json(status))
}

/// POST /enrollment - register a face for an account
pub async fn enroll<O: RecognitionOracle + 'static>(
    state: web::Data<AppState<O>>,
    body: web::Json<EnrollRequest>,
) -> Result<HttpResponse, TerminalError> {
    let body = body.into_inner();
    let address = AccountAddress::new(body.account_address)?;
    let name = DisplayName::new(body.display_name)?;
    let sample = FaceSample::from_base64(&body.image, body.mime_type.as_deref())?;

    match state.directory.enroll(&address, &name, &sample).await {
        Ok(outcome) => {
            metrics::ENROLLMENTS.with_label_values(&["enrolled"]).inc();
            Ok(HttpResponse::Created().json(outcome))
        }
        Err(e) => {
            let label = match &e {
                IdentityError::AlreadyEnrolled(_) => "already_enrolled",
                IdentityError::Oracle(_) => "oracle_error",
                _ => "error",
            };
            metrics::ENROLLMENTS.with_label_values(&[label]).inc();
            Err(e.into())
        }
    }
}

/// DELETE /enrollment/{address} - remove every template for the account
pub async fn revoke<O: RecognitionOracle + 'static>(
    req: HttpRequest,
    state: web::Data<AppState<O>>,
    path: web::Path<String>,
) -> Result<HttpResponse, TerminalError> {
    authorize(&req, state.admin_token.as_deref(), "revoke")?;
    let address = AccountAddress::new(path.into_inner())?;
    let outcome = state.directory.revoke(&address).await?;
    if outcome.removed_from_oracle == 0 && !outcome.removed_from_registry {
        return Err(TerminalError::NotFound(format!(
            "no enrollment for {address}"
        )));
    }
    Ok(HttpResponse::Ok().json(outcome))
}

/// GET /enrollments - every identity the oracle holds
pub async fn list_enrolled<O: RecognitionOracle + 'static>(
    req: HttpRequest,
    state: web::Data<AppState<O>>,
) -> Result<HttpResponse, TerminalError> {
    authorize(&req, state.admin_token.as_deref(), "list_enrolled")?;
    let identities = state.directory.list_enrolled().await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "count": identities.len(),
        "identities": identities,
    })))
}

/// POST /enrollments/reconcile - bring the local registry in line with the oracle
pub async fn reconcile<O: RecognitionOracle + 'static>(
    req: HttpRequest,
    state: web::Data<AppState<O>>,
) -> Result<HttpResponse, TerminalError> {
    authorize(&req, state.admin_token.as_deref(), "reconcile")?;
    let report = state.directory.reconcile().await?;
    Ok(HttpResponse::Ok().json(report))
}

pub fn configure<O: RecognitionOracle + 'static>(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/enrollment").route(web::post().to(enroll::<O>)))
        .service(
            web::resource("/enrollment/{address}")
                .route(web::get().to(check_enrollment::<O>))
                .route(web::delete().to(revoke::<O>)),
        )
        .service(web::resource("/enrollments").route(web::get().to(list_enrolled::<O>)))
        .service(
            web::resource("/enrollments/reconcile").route(web::post().to(reconcile::<O>)),
        );
}
