//! Session control for the terminal display and camera.
//!
//! Samples arrive as base64 JSON (`{"image": "...", "mimeType": "image/jpeg"}`;
//! data URLs are accepted). Command routes answer with the session update
//! current right after the command was applied; effects started by it
//! (recognition, checks, the transfer) finish later and show up on
//! `GET /session` and the `/session/events` stream.

use actix_web::{http::header, web, HttpResponse};
use bytes::Bytes;
use facepay::{Amount, FaceSample, FacepayError};
use facepay_identity::RecognitionOracle;
use futures::StreamExt;
use serde::Deserialize;

use crate::error::TerminalError;
use crate::state::AppState;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SampleBody {
    pub image: String,
    #[serde(default)]
    pub mime_type: Option<String>,
}

impl SampleBody {
    pub fn decode(&self) -> Result<FaceSample, FacepayError> {
        FaceSample::from_base64(&self.image, self.mime_type.as_deref())
    }
}

/// Amounts may be sent as a decimal string (`"12.50"`) or a JSON number.
#[derive(Deserialize)]
#[serde(untagged)]
pub enum AmountInput {
    Text(String),
    Number(f64),
}

impl AmountInput {
    pub fn parse(&self) -> Result<Amount, FacepayError> {
        match self {
            AmountInput::Text(s) => Amount::parse(s),
            AmountInput::Number(n) => Amount::try_from(*n),
        }
    }
}

#[derive(Deserialize)]
pub struct AmountBody {
    pub amount: AmountInput,
}

/// GET /session
pub async fn current<O: RecognitionOracle + 'static>(state: web::Data<AppState<O>>) -> HttpResponse {
    HttpResponse::Ok().json(state.session.current())
}

/// GET /session/events - server-sent events, one per published update
pub async fn events<O: RecognitionOracle + 'static>(state: web::Data<AppState<O>>) -> HttpResponse {
    let stream = state.session.updates().map(|update| {
        let payload = match serde_json::to_string(&update) {
            Ok(json) => format!("event: session\ndata: {json}\n\n"),
            Err(e) => {
                tracing::error!(error = %e, "failed to encode session update");
                ": dropped update\n\n".to_string()
            }
        };
        Ok::<_, actix_web::Error>(Bytes::from(payload))
    });
    HttpResponse::Ok()
        .insert_header((header::CONTENT_TYPE, "text/event-stream"))
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .streaming(stream)
}

/// POST /session/recognize
pub async fn recognize<O: RecognitionOracle + 'static>(
    state: web::Data<AppState<O>>,
    body: web::Json<SampleBody>,
) -> Result<HttpResponse, TerminalError> {
    let sample = body.decode()?;
    let update = state.session.submit_recognition_sample(sample).await?;
    Ok(HttpResponse::Accepted().json(update))
}

/// POST /session/amount
pub async fn amount<O: RecognitionOracle + 'static>(
    state: web::Data<AppState<O>>,
    body: web::Json<AmountBody>,
) -> Result<HttpResponse, TerminalError> {
    let amount = body.amount.parse()?;
    let update = state.session.submit_amount(amount).await?;
    Ok(HttpResponse::Accepted().json(update))
}

/// POST /session/biometric
pub async fn biometric<O: RecognitionOracle + 'static>(
    state: web::Data<AppState<O>>,
    body: web::Json<SampleBody>,
) -> Result<HttpResponse, TerminalError> {
    let sample = body.decode()?;
    let update = state.session.confirm_biometric_sample(sample).await?;
    Ok(HttpResponse::Ok().json(update))
}

/// POST /session/abort
pub async fn abort<O: RecognitionOracle + 'static>(
    state: web::Data<AppState<O>>,
) -> Result<HttpResponse, TerminalError> {
    let update = state.session.abort().await?;
    tracing::info!("attempt aborted by operator");
    Ok(HttpResponse::Ok().json(update))
}

/// POST /session/reset
pub async fn reset<O: RecognitionOracle + 'static>(
    state: web::Data<AppState<O>>,
) -> Result<HttpResponse, TerminalError> {
    let update = state.session.reset().await?;
    Ok(HttpResponse::Ok().json(update))
}

pub fn configure<O: RecognitionOracle + 'static>(cfg: &mut web::ServiceConfig) {
    cfg.route("/session", web::get().to(current::<O>))
        .route("/session/events", web::get().to(events::<O>))
        .route("/session/recognize", web::post().to(recognize::<O>))
        .route("/session/amount", web::post().to(amount::<O>))
        .route("/session/biometric", web::post().to(biometric::<O>))
        .route("/session/abort", web::post().to(abort::<O>))
        .route("/session/reset", web::post().to(reset::<O>));
}
