//! Identity types shared by the directory and the payment machine.
//!
//! The recognition oracle names a person by an [`IdentityKey`]: the account
//! address and display name joined by [`IDENTITY_KEY_DELIMITER`]. Neither
//! component may contain the delimiter, so a key always splits back into
//! exactly the pair it was built from.

use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::FacepayError;

/// Separator between address and display name in an identity key.
pub const IDENTITY_KEY_DELIMITER: char = '|';

/// Longest display name accepted at enrollment.
pub const MAX_DISPLAY_NAME_LEN: usize = 128;

/// On-chain account address, kept as the string form the ledger uses.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccountAddress(String);

impl AccountAddress {
    pub fn new(address: impl Into<String>) -> Result<Self, FacepayError> {
        let address = address.into().trim().to_string();
        if address.is_empty() {
            return Err(FacepayError::InvalidIdentity(
                "account address is empty".to_string(),
            ));
        }
        if address.contains(IDENTITY_KEY_DELIMITER) {
            return Err(FacepayError::InvalidIdentity(format!(
                "account address must not contain '{IDENTITY_KEY_DELIMITER}'"
            )));
        }
        if !address.chars().all(|c| c.is_ascii_graphic()) {
            return Err(FacepayError::InvalidIdentity(
                "account address must be printable ASCII without whitespace".to_string(),
            ));
        }
        Ok(Self(address))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `0x1234...cdef` form for log lines and display.
    pub fn short(&self) -> String {
        if self.0.len() <= 12 {
            return self.0.clone();
        }
        format!("{}...{}", &self.0[..6], &self.0[self.0.len() - 4..])
    }
}

impl fmt::Display for AccountAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for AccountAddress {
    type Err = FacepayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for AccountAddress {
    type Error = FacepayError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<AccountAddress> for String {
    fn from(a: AccountAddress) -> Self {
        a.0
    }
}

/// Customer name as shown on the terminal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DisplayName(String);

impl DisplayName {
    pub fn new(name: impl Into<String>) -> Result<Self, FacepayError> {
        let name = name.into().trim().to_string();
        if name.is_empty() {
            return Err(FacepayError::InvalidIdentity(
                "display name is empty".to_string(),
            ));
        }
        if name.contains(IDENTITY_KEY_DELIMITER) {
            return Err(FacepayError::InvalidIdentity(format!(
                "display name must not contain '{IDENTITY_KEY_DELIMITER}'"
            )));
        }
        if name.chars().count() > MAX_DISPLAY_NAME_LEN {
            return Err(FacepayError::InvalidIdentity(format!(
                "display name longer than {MAX_DISPLAY_NAME_LEN} characters"
            )));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DisplayName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for DisplayName {
    type Error = FacepayError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<DisplayName> for String {
    fn from(n: DisplayName) -> Self {
        n.0
    }
}

/// Composite name under which the oracle stores a person.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentityKey {
    address: AccountAddress,
    name: DisplayName,
}

impl IdentityKey {
    pub fn new(address: AccountAddress, name: DisplayName) -> Self {
        Self { address, name }
    }

    /// Split an oracle-side key. Exactly one delimiter is required.
    pub fn parse(key: &str) -> Result<Self, FacepayError> {
        let mut parts = key.split(IDENTITY_KEY_DELIMITER);
        match (parts.next(), parts.next(), parts.next()) {
            (Some(address), Some(name), None) => Ok(Self {
                address: AccountAddress::new(address)?,
                name: DisplayName::new(name)?,
            }),
            _ => Err(FacepayError::InvalidIdentity(format!(
                "identity key must have the form address{IDENTITY_KEY_DELIMITER}name"
            ))),
        }
    }

    pub fn address(&self) -> &AccountAddress {
        &self.address
    }

    pub fn name(&self) -> &DisplayName {
        &self.name
    }

    pub fn into_parts(self) -> (AccountAddress, DisplayName) {
        (self.address, self.name)
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.address, IDENTITY_KEY_DELIMITER, self.name)
    }
}

/// Oracle-owned handle to a stored biometric template. Never inspected here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TemplateRef(String);

impl TemplateRef {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TemplateRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A captured camera frame.
#[derive(Clone, PartialEq, Eq)]
pub struct FaceSample {
    bytes: Vec<u8>,
    mime_type: String,
}

impl FaceSample {
    pub const DEFAULT_MIME_TYPE: &'static str = "image/jpeg";

    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes,
            mime_type: mime_type.into(),
        }
    }

    pub fn jpeg(bytes: Vec<u8>) -> Self {
        Self::new(bytes, Self::DEFAULT_MIME_TYPE)
    }

    /// Decode a base64 payload, with or without a `data:<mime>;base64,` prefix.
    pub fn from_base64(encoded: &str, mime_type: Option<&str>) -> Result<Self, FacepayError> {
        let (prefix_mime, payload) = match encoded.strip_prefix("data:") {
            Some(rest) => match rest.split_once(";base64,") {
                Some((mime, data)) => (Some(mime), data),
                None => {
                    return Err(FacepayError::InvalidSample(
                        "data URL is not base64-encoded".to_string(),
                    ))
                }
            },
            None => (None, encoded),
        };

        let bytes = base64::engine::general_purpose::STANDARD
            .decode(payload.trim())
            .map_err(|e| FacepayError::InvalidSample(format!("invalid base64: {e}")))?;
        if bytes.is_empty() {
            return Err(FacepayError::InvalidSample("sample is empty".to_string()));
        }

        let mime = mime_type
            .or(prefix_mime)
            .unwrap_or(Self::DEFAULT_MIME_TYPE);
        if !mime.starts_with("image/") {
            return Err(FacepayError::InvalidSample(format!(
                "unsupported mime type '{mime}'"
            )));
        }
        Ok(Self::new(bytes, mime))
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

// Samples are biometric data; logs only ever see the size.
impl fmt::Debug for FaceSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FaceSample")
            .field("len", &self.bytes.len())
            .field("mime_type", &self.mime_type)
            .finish()
    }
}

/// Address and name of a recognized person.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedIdentity {
    pub account_address: AccountAddress,
    pub display_name: DisplayName,
}

impl From<IdentityKey> for ResolvedIdentity {
    fn from(key: IdentityKey) -> Self {
        let (account_address, display_name) = key.into_parts();
        Self {
            account_address,
            display_name,
        }
    }
}

/// Enrollment record: one per account address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityRecord {
    pub account_address: AccountAddress,
    pub display_name: DisplayName,
    pub template_ref: TemplateRef,
    pub enrolled_at: DateTime<Utc>,
}

impl IdentityRecord {
    pub fn key(&self) -> IdentityKey {
        IdentityKey::new(self.account_address.clone(), self.display_name.clone())
    }
}

/// Why a recognition produced no identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoMatchReason {
    /// The oracle returned no candidate.
    NoCandidate,
    /// Candidates exist but none reached the match threshold.
    BelowThreshold,
    /// More than one identity reached the threshold.
    Ambiguous,
    /// The best candidate's key is not an address/name pair.
    MalformedKey,
}

/// Outcome of one recognition call. Produced fresh each time, never cached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecognitionResult {
    pub matched: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_address: Option<AccountAddress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<DisplayName>,
    pub confidence: f64,
    pub observed_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<NoMatchReason>,
}

impl RecognitionResult {
    pub fn matched(identity: ResolvedIdentity, confidence: f64) -> Self {
        Self {
            matched: true,
            account_address: Some(identity.account_address),
            display_name: Some(identity.display_name),
            confidence: confidence.clamp(0.0, 1.0),
            observed_at: Utc::now(),
            reason: None,
        }
    }

    pub fn unmatched(reason: NoMatchReason, confidence: f64) -> Self {
        Self {
            matched: false,
            account_address: None,
            display_name: None,
            confidence: confidence.clamp(0.0, 1.0),
            observed_at: Utc::now(),
            reason: Some(reason),
        }
    }

    /// The resolved identity, only when matched.
    pub fn identity(&self) -> Option<ResolvedIdentity> {
        if !self.matched {
            return None;
        }
        match (&self.account_address, &self.display_name) {
            (Some(a), Some(n)) => Some(ResolvedIdentity {
                account_address: a.clone(),
                display_name: n.clone(),
            }),
            _ => None,
        }
    }
}
