use chrono::{DateTime, Utc};
use dashmap::DashMap;
use facepay::{
    AccountAddress, DisplayName, FaceSample, IdentityKey, IdentityRecord, NoMatchReason,
    OracleError, RecognitionResult, Recognizer, ResolvedIdentity, TemplateRef,
    DEFAULT_MATCH_THRESHOLD, DEFAULT_ORACLE_TIMEOUT_SECS,
};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::error::IdentityError;
use crate::oracle::{OraclePerson, RecognitionOracle};
use crate::registry::EnrollmentRegistry;

/// Answer of [`IdentityDirectory::check_enrollment`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentStatus {
    pub is_enrolled: bool,
    pub account_address: AccountAddress,
    pub display_name: DisplayName,
    pub identity_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_ref: Option<TemplateRef>,
    pub checked_at: DateTime<Utc>,
    /// Why the oracle could not be asked. `is_enrolled` is `false` when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

/// Answer of [`IdentityDirectory::enroll`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentOutcome {
    pub record: IdentityRecord,
    /// Set when the oracle accepted the face but the registry write failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry_warning: Option<String>,
}

/// An identity known to the oracle.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrolledIdentity {
    pub account_address: AccountAddress,
    pub display_name: DisplayName,
    pub template_ref: TemplateRef,
    /// From the registry, when it has the record.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enrolled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RevokeOutcome {
    pub removed_from_oracle: usize,
    pub removed_from_registry: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    pub unchanged: usize,
    /// Oracle entries whose key is not `address|name`.
    pub foreign: usize,
}

/// Face-sample-to-identity resolution over a [`RecognitionOracle`] and an
/// [`EnrollmentRegistry`].
///
/// Nothing is cached: every call asks the oracle. Enrollment and revocation
/// for one address run one at a time.
pub struct IdentityDirectory<O> {
    oracle: O,
    registry: Arc<dyn EnrollmentRegistry>,
    match_threshold: f64,
    timeout: Duration,
    address_locks: DashMap<AccountAddress, Arc<Mutex<()>>>,
}

impl<O: RecognitionOracle> IdentityDirectory<O> {
    pub fn new(oracle: O, registry: Arc<dyn EnrollmentRegistry>) -> Self {
        Self {
            oracle,
            registry,
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            timeout: Duration::from_secs(DEFAULT_ORACLE_TIMEOUT_SECS),
            address_locks: DashMap::new(),
        }
    }

    /// Minimum candidate probability that counts as a match. Clamped to `[0, 1]`.
    pub fn with_match_threshold(mut self, threshold: f64) -> Self {
        self.match_threshold = if threshold.is_finite() {
            threshold.clamp(0.0, 1.0)
        } else {
            DEFAULT_MATCH_THRESHOLD
        };
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn registry(&self) -> &Arc<dyn EnrollmentRegistry> {
        &self.registry
    }

    fn address_lock(&self, address: &AccountAddress) -> Arc<Mutex<()>> {
        self.address_locks
            .entry(address.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the lock entry once no other caller is waiting on it.
    fn release_address_lock(&self, address: &AccountAddress, lock: Arc<Mutex<()>>) {
        drop(lock);
        self.address_locks
            .remove_if(address, |_, l| Arc::strong_count(l) == 1);
    }

    async fn bounded<T>(
        &self,
        call: &'static str,
        fut: impl Future<Output = Result<T, OracleError>>,
    ) -> Result<T, OracleError> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(OracleError::Unavailable(format!(
                "{call} timed out after {}s",
                self.timeout.as_secs()
            ))),
        }
    }

    /// Ask the oracle whether `address|name` is enrolled.
    ///
    /// Never fails: an unreachable oracle yields `is_enrolled = false` with
    /// `failure` set.
    pub async fn check_enrollment(
        &self,
        address: &AccountAddress,
        name: &DisplayName,
    ) -> EnrollmentStatus {
        let key = IdentityKey::new(address.clone(), name.clone());
        let key_str = key.to_string();
        let mut status = EnrollmentStatus {
            is_enrolled: false,
            account_address: address.clone(),
            display_name: name.clone(),
            identity_key: key_str.clone(),
            template_ref: None,
            checked_at: Utc::now(),
            failure: None,
        };

        match self.bounded("list", self.oracle.list_identities()).await {
            Ok(people) => {
                if let Some(person) = people.into_iter().find(|p| p.key == key_str) {
                    status.is_enrolled = true;
                    status.template_ref = Some(person.template_ref);
                }
                tracing::debug!(
                    address = %address.short(),
                    enrolled = status.is_enrolled,
                    "enrollment checked"
                );
            }
            Err(e) => {
                tracing::warn!(address = %address.short(), error = %e, "enrollment check failed");
                status.failure = Some(e.to_string());
            }
        }
        status
    }

    /// Register a face for `address`. At most one enrollment per address.
    pub async fn enroll(
        &self,
        address: &AccountAddress,
        name: &DisplayName,
        sample: &FaceSample,
    ) -> Result<EnrollmentOutcome, IdentityError> {
        if sample.is_empty() {
            return Err(facepay::FacepayError::InvalidSample("sample is empty".to_string()).into());
        }

        let lock = self.address_lock(address);
        let result = {
            let _guard = lock.lock().await;
            self.enroll_exclusive(address, name, sample).await
        };
        self.release_address_lock(address, lock);
        result
    }

    async fn enroll_exclusive(
        &self,
        address: &AccountAddress,
        name: &DisplayName,
        sample: &FaceSample,
    ) -> Result<EnrollmentOutcome, IdentityError> {
        let people = self.bounded("list", self.oracle.list_identities()).await?;
        let held_by_oracle = people
            .iter()
            .filter_map(OraclePerson::identity_key)
            .any(|k| k.address() == address);
        if held_by_oracle || self.registry.is_enrolled(address) {
            tracing::info!(address = %address.short(), "enrollment refused, already enrolled");
            return Err(IdentityError::AlreadyEnrolled(address.to_string()));
        }

        let key = IdentityKey::new(address.clone(), name.clone());
        let template_ref = self.bounded("enroll", self.oracle.enroll(&key, sample)).await?;
        let record = IdentityRecord {
            account_address: address.clone(),
            display_name: name.clone(),
            template_ref,
            enrolled_at: Utc::now(),
        };
        tracing::info!(
            address = %address.short(),
            template_ref = %record.template_ref,
            "face enrolled"
        );

        let registry_warning = match self.registry.record(&record) {
            Ok(()) => None,
            Err(e) => {
                tracing::warn!(
                    address = %address.short(),
                    error = %e,
                    "enrolled with the oracle but the registry write failed; reconcile to repair"
                );
                Some(format!("registry not updated: {e}"))
            }
        };

        Ok(EnrollmentOutcome {
            record,
            registry_warning,
        })
    }

    /// Resolve a sample to at most one identity.
    ///
    /// Candidates below the threshold are ignored. Two or more distinct
    /// addresses above it are ambiguous and reported as no match.
    pub async fn recognize(&self, sample: &FaceSample) -> Result<RecognitionResult, OracleError> {
        let candidates = self.bounded("search", self.oracle.search(sample)).await?;
        let best_overall = candidates
            .iter()
            .map(|c| c.probability)
            .fold(0.0_f64, f64::max);

        let mut above: HashMap<AccountAddress, (IdentityKey, f64)> = HashMap::new();
        let mut malformed_above = 0usize;
        for candidate in candidates
            .iter()
            .filter(|c| c.probability >= self.match_threshold)
        {
            match IdentityKey::parse(&candidate.key) {
                Ok(key) => {
                    let entry = above
                        .entry(key.address().clone())
                        .or_insert((key, candidate.probability));
                    if candidate.probability > entry.1 {
                        entry.1 = candidate.probability;
                    }
                }
                Err(_) => malformed_above += 1,
            }
        }

        let distinct = above.len();
        let mut hits = above.into_values();
        let result = match hits.next() {
            Some((key, confidence)) if distinct == 1 => {
                RecognitionResult::matched(ResolvedIdentity::from(key), confidence)
            }
            Some(_) => {
                tracing::warn!(candidates = distinct, "ambiguous face match rejected");
                RecognitionResult::unmatched(NoMatchReason::Ambiguous, best_overall)
            }
            None if malformed_above > 0 => {
                RecognitionResult::unmatched(NoMatchReason::MalformedKey, best_overall)
            }
            None if candidates.is_empty() => {
                RecognitionResult::unmatched(NoMatchReason::NoCandidate, 0.0)
            }
            None => RecognitionResult::unmatched(NoMatchReason::BelowThreshold, best_overall),
        };

        match &result.account_address {
            Some(address) => tracing::info!(
                address = %address.short(),
                confidence = result.confidence,
                "face recognized"
            ),
            None => tracing::info!(
                reason = ?result.reason,
                confidence = result.confidence,
                "face not recognized"
            ),
        }
        Ok(result)
    }

    /// Every well-formed identity held by the oracle, ordered by address.
    pub async fn list_enrolled(&self) -> Result<Vec<EnrolledIdentity>, IdentityError> {
        let people = self.bounded("list", self.oracle.list_identities()).await?;
        let mut out: Vec<EnrolledIdentity> = people
            .into_iter()
            .filter_map(|p| {
                let (account_address, display_name) = p.identity_key()?.into_parts();
                let enrolled_at = self.registry.get(&account_address).map(|r| r.enrolled_at);
                Some(EnrolledIdentity {
                    account_address,
                    display_name,
                    template_ref: p.template_ref,
                    enrolled_at,
                })
            })
            .collect();
        out.sort_by(|a, b| a.account_address.cmp(&b.account_address));
        Ok(out)
    }

    /// Remove every oracle template for `address` and its registry record.
    pub async fn revoke(&self, address: &AccountAddress) -> Result<RevokeOutcome, IdentityError> {
        let lock = self.address_lock(address);
        let result = {
            let _guard = lock.lock().await;
            self.revoke_exclusive(address).await
        };
        self.release_address_lock(address, lock);
        result
    }

    async fn revoke_exclusive(
        &self,
        address: &AccountAddress,
    ) -> Result<RevokeOutcome, IdentityError> {
        let people = self.bounded("list", self.oracle.list_identities()).await?;
        let mut outcome = RevokeOutcome::default();
        for person in people {
            let owned = person
                .identity_key()
                .map(|k| k.address() == address)
                .unwrap_or(false);
            if owned {
                self.bounded("delete", self.oracle.delete(&person.template_ref))
                    .await?;
                outcome.removed_from_oracle += 1;
            }
        }
        outcome.removed_from_registry = self.registry.revoke(address)?;
        tracing::info!(
            address = %address.short(),
            oracle = outcome.removed_from_oracle,
            registry = outcome.removed_from_registry,
            "enrollment revoked"
        );
        Ok(outcome)
    }

    /// Bring the registry in line with the oracle: add what the oracle has,
    /// drop what it no longer has.
    pub async fn reconcile(&self) -> Result<ReconcileReport, IdentityError> {
        let people = self.bounded("list", self.oracle.list_identities()).await?;
        let mut report = ReconcileReport::default();

        // First template per address wins, matching what recognition resolves to.
        let mut held: BTreeMap<AccountAddress, (DisplayName, TemplateRef)> = BTreeMap::new();
        for person in people {
            match person.identity_key() {
                Some(key) => {
                    let (address, name) = key.into_parts();
                    held.entry(address).or_insert((name, person.template_ref));
                }
                None => report.foreign += 1,
            }
        }

        for record in self.registry.list() {
            if !held.contains_key(&record.account_address) {
                self.registry.revoke(&record.account_address)?;
                report.removed += 1;
            }
        }

        for (address, (name, template_ref)) in held {
            match self.registry.get(&address) {
                Some(existing)
                    if existing.display_name == name && existing.template_ref == template_ref =>
                {
                    report.unchanged += 1;
                }
                existing => {
                    let enrolled_at = existing
                        .as_ref()
                        .map(|r| r.enrolled_at)
                        .unwrap_or_else(Utc::now);
                    if existing.is_some() {
                        report.updated += 1;
                    } else {
                        report.added += 1;
                    }
                    self.registry.record(&IdentityRecord {
                        account_address: address,
                        display_name: name,
                        template_ref,
                        enrolled_at,
                    })?;
                }
            }
        }

        tracing::info!(
            added = report.added,
            updated = report.updated,
            removed = report.removed,
            unchanged = report.unchanged,
            foreign = report.foreign,
            "enrollment registry reconciled"
        );
        Ok(report)
    }
}

impl<O: RecognitionOracle> Recognizer for IdentityDirectory<O> {
    async fn recognize(&self, sample: &FaceSample) -> Result<RecognitionResult, OracleError> {
        IdentityDirectory::recognize(self, sample).await
    }
}
