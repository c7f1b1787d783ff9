//! The face-recognition oracle: a black-box service that stores face
//! templates under an identity key and searches them by photo.
//!
//! [`HttpRecognitionOracle`] speaks the Luxand-style REST dialect:
//!
//! | call            | request                                  |
//! |-----------------|------------------------------------------|
//! | list identities | `GET /v2/person`                         |
//! | enroll          | `POST /v2/person` (multipart `photos`)   |
//! | search          | `POST /photo/search/v2` (multipart `photo`) |
//! | delete          | `DELETE /v2/person/{uuid}`               |
//!
//! Every request carries the API token in a `token` header.

use facepay::{FaceSample, IdentityKey, OracleError, TemplateRef};
use serde::Deserialize;
use std::time::Duration;

/// An identity as stored by the oracle. `key` is the raw person name and
/// may not be a well-formed `address|name` key.
#[derive(Debug, Clone, PartialEq)]
pub struct OraclePerson {
    pub template_ref: TemplateRef,
    pub key: String,
}

impl OraclePerson {
    pub fn identity_key(&self) -> Option<IdentityKey> {
        IdentityKey::parse(&self.key).ok()
    }
}

/// One search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct OracleCandidate {
    pub template_ref: TemplateRef,
    pub key: String,
    /// Oracle similarity score, clamped to `[0, 1]`.
    pub probability: f64,
}

/// Operations the directory needs from a recognition provider.
pub trait RecognitionOracle: Send + Sync {
    fn list_identities(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<OraclePerson>, OracleError>> + Send;

    fn enroll(
        &self,
        key: &IdentityKey,
        sample: &FaceSample,
    ) -> impl std::future::Future<Output = Result<TemplateRef, OracleError>> + Send;

    fn search(
        &self,
        sample: &FaceSample,
    ) -> impl std::future::Future<Output = Result<Vec<OracleCandidate>, OracleError>> + Send;

    fn delete(
        &self,
        template_ref: &TemplateRef,
    ) -> impl std::future::Future<Output = Result<(), OracleError>> + Send;
}

#[derive(Deserialize)]
struct PersonBody {
    uuid: String,
    #[serde(default)]
    name: String,
}

#[derive(Deserialize)]
struct EnrollBody {
    #[serde(default)]
    uuid: Option<String>,
}

#[derive(Deserialize)]
struct CandidateBody {
    uuid: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    probability: f64,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
}

/// [`RecognitionOracle`] over HTTP.
pub struct HttpRecognitionOracle {
    client: reqwest::Client,
    base_url: String,
    token: String,
    timeout: Duration,
}

impl HttpRecognitionOracle {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            timeout,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<String, OracleError> {
        let resp = request
            .header("token", &self.token)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| OracleError::Unavailable(format!("request failed: {e}")))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| OracleError::Unavailable(format!("unreadable response: {e}")))?;

        if status.is_success() {
            return Ok(text);
        }
        let message = serde_json::from_str::<ErrorBody>(&text)
            .ok()
            .and_then(|b| b.message)
            .unwrap_or_else(|| status.to_string());
        if status.is_server_error()
            || status == reqwest::StatusCode::UNAUTHORIZED
            || status == reqwest::StatusCode::FORBIDDEN
            || status == reqwest::StatusCode::TOO_MANY_REQUESTS
        {
            Err(OracleError::Unavailable(format!("{status}: {message}")))
        } else {
            Err(OracleError::Rejected(format!("{status}: {message}")))
        }
    }

    fn photo_part(sample: &FaceSample, file_name: &str) -> Result<reqwest::multipart::Part, OracleError> {
        reqwest::multipart::Part::bytes(sample.bytes().to_vec())
            .file_name(file_name.to_string())
            .mime_str(sample.mime_type())
            .map_err(|e| OracleError::Rejected(format!("bad image type: {e}")))
    }
}

impl std::fmt::Debug for HttpRecognitionOracle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRecognitionOracle")
            .field("base_url", &self.base_url)
            .field("token", &"[REDACTED]")
            .field("timeout", &self.timeout)
            .finish()
    }
}

fn parse<T: serde::de::DeserializeOwned>(text: &str) -> Result<T, OracleError> {
    serde_json::from_str(text)
        .map_err(|e| OracleError::Unavailable(format!("unexpected response shape: {e}")))
}

impl RecognitionOracle for HttpRecognitionOracle {
    async fn list_identities(&self) -> Result<Vec<OraclePerson>, OracleError> {
        let text = self.send(self.client.get(self.url("/v2/person"))).await?;
        let people: Vec<PersonBody> = parse(&text)?;
        Ok(people
            .into_iter()
            .map(|p| OraclePerson {
                template_ref: TemplateRef::new(p.uuid),
                key: p.name,
            })
            .collect())
    }

    async fn enroll(&self, key: &IdentityKey, sample: &FaceSample) -> Result<TemplateRef, OracleError> {
        let form = reqwest::multipart::Form::new()
            .text("name", key.to_string())
            .text("store", "1")
            .text("collections", "")
            .text("unique", "0")
            .part("photos", Self::photo_part(sample, "enrollment.jpg")?);
        let text = self
            .send(self.client.post(self.url("/v2/person")).multipart(form))
            .await?;
        let body: EnrollBody = parse(&text)?;
        match body.uuid {
            Some(uuid) if !uuid.is_empty() => Ok(TemplateRef::new(uuid)),
            _ => Err(OracleError::Unavailable(
                "enrollment response carried no template id".to_string(),
            )),
        }
    }

    async fn search(&self, sample: &FaceSample) -> Result<Vec<OracleCandidate>, OracleError> {
        let form = reqwest::multipart::Form::new()
            .part("photo", Self::photo_part(sample, "recognition.jpg")?)
            .text("collections", "");
        let text = self
            .send(self.client.post(self.url("/photo/search/v2")).multipart(form))
            .await?;
        let hits: Vec<CandidateBody> = parse(&text)?;
        Ok(hits
            .into_iter()
            .map(|h| OracleCandidate {
                template_ref: TemplateRef::new(h.uuid),
                key: h.name,
                probability: if h.probability.is_finite() {
                    h.probability.clamp(0.0, 1.0)
                } else {
                    0.0
                },
            })
            .collect())
    }

    async fn delete(&self, template_ref: &TemplateRef) -> Result<(), OracleError> {
        let path = format!("/v2/person/{}", template_ref.as_str());
        self.send(self.client.delete(self.url(&path))).await?;
        Ok(())
    }
}
