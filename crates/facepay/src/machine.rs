//! Payment authorization state machine.
//!
//! The machine owns the single active [`PaymentAttempt`] and advances it one
//! [`Event`] at a time. It performs no I/O: every accepted event returns a
//! [`Transition`] naming the one [`Effect`] the caller must carry out, and the
//! outcome of that effect comes back as the next event. The session driver in
//! [`crate::session`] is the only caller in production; tests drive it directly.
//!
//! ```text
//! Idle → Recognizing → Recognized → AmountEntry → Authorizing → ProximityCheck
//!      → SecurityCheck → BiometricConfirm → Processing → Settled | Failed
//! ```
//!
//! Rejected events leave the attempt untouched.

use std::time::Duration;
use tokio::time::Instant;

use crate::amount::Amount;
use crate::constants::{SessionConfig, MAX_BIOMETRIC_WINDOW_SECS, READY_MESSAGE};
use crate::error::{ErrorKind, FacepayError, OracleError, TransferError};
use crate::identity::{FaceSample, RecognitionResult};
use crate::payment::{
    AttemptSnapshot, PaymentAttempt, PaymentState, TransferOrder, TransferOutcome,
    TransferReceipt,
};
use crate::reward::reward;
use crate::scheme::CheckContext;

/// Inputs to the machine: operator actions and effect results.
#[derive(Debug)]
pub enum Event {
    /// A recognition sample was captured; starts a new attempt.
    CaptureRequested(FaceSample),
    RecognitionCompleted(Result<RecognitionResult, OracleError>),
    AmountSubmitted(Amount),
    /// Begin the authorization pipeline for the entered amount.
    Authorize,
    /// Evaluate local policy and hand over to the external checks.
    Advance,
    ProximityChecked(Result<(), String>),
    SecurityChecked(Result<(), String>),
    BiometricSampleCaptured(FaceSample),
    /// The biometric deadline has been reached.
    WindowElapsed,
    ReconfirmationCompleted(Result<RecognitionResult, OracleError>),
    TransferCompleted(Result<TransferOutcome, TransferError>),
    Abort,
    Reset,
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Self::CaptureRequested(_) => "capture_requested",
            Self::RecognitionCompleted(_) => "recognition_completed",
            Self::AmountSubmitted(_) => "amount_submitted",
            Self::Authorize => "authorize",
            Self::Advance => "advance",
            Self::ProximityChecked(_) => "proximity_checked",
            Self::SecurityChecked(_) => "security_checked",
            Self::BiometricSampleCaptured(_) => "biometric_sample_captured",
            Self::WindowElapsed => "window_elapsed",
            Self::ReconfirmationCompleted(_) => "reconfirmation_completed",
            Self::TransferCompleted(_) => "transfer_completed",
            Self::Abort => "abort",
            Self::Reset => "reset",
        }
    }
}

/// The single externally observable action attached to a transition.
#[derive(Debug)]
pub enum Effect {
    /// Call the recognizer with the capture sample.
    Recognize(FaceSample),
    CheckProximity(CheckContext),
    CheckSecurity(CheckContext),
    /// Arm the biometric deadline.
    StartTimer(Instant),
    /// Call the recognizer with the biometric sample.
    Reconfirm(FaceSample),
    /// Execute the sponsored transfer. Emitted at most once per attempt.
    Transfer(TransferOrder),
    /// Show the transition message on the terminal.
    Notify,
    /// Bookkeeping only (a biometric sample was stored).
    None,
}

impl Effect {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Recognize(_) => "recognize",
            Self::CheckProximity(_) => "check_proximity",
            Self::CheckSecurity(_) => "check_security",
            Self::StartTimer(_) => "start_timer",
            Self::Reconfirm(_) => "reconfirm",
            Self::Transfer(_) => "transfer",
            Self::Notify => "notify",
            Self::None => "none",
        }
    }
}

/// An accepted event.
#[derive(Debug)]
pub struct Transition {
    pub from: PaymentState,
    pub to: PaymentState,
    pub effect: Effect,
    pub message: String,
}

/// Owner of the active attempt slot.
#[derive(Debug)]
pub struct PaymentMachine {
    config: SessionConfig,
    attempt: Option<PaymentAttempt>,
}

impl PaymentMachine {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            attempt: None,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> PaymentState {
        self.attempt
            .as_ref()
            .map(|a| a.state)
            .unwrap_or(PaymentState::Idle)
    }

    pub fn attempt(&self) -> Option<&PaymentAttempt> {
        self.attempt.as_ref()
    }

    pub fn snapshot(&self, now: Instant) -> Option<AttemptSnapshot> {
        self.attempt.as_ref().map(|a| a.snapshot(now))
    }

    /// Deadline the driver must wake up for, if a biometric window is open.
    pub fn biometric_deadline(&self) -> Option<Instant> {
        self.attempt.as_ref().and_then(|a| a.biometric_deadline())
    }

    /// Advance the machine by one event.
    pub fn apply(&mut self, event: Event, now: Instant) -> Result<Transition, FacepayError> {
        let name = event.name();
        match event {
            Event::CaptureRequested(sample) => self.on_capture(sample),
            Event::RecognitionCompleted(result) => self.on_recognition(result, name),
            Event::AmountSubmitted(amount) => self.on_amount(amount, name),
            Event::Authorize => self.on_authorize(name),
            Event::Advance => self.on_advance(name),
            Event::ProximityChecked(result) => self.on_proximity(result, name),
            Event::SecurityChecked(result) => self.on_security(result, now, name),
            Event::BiometricSampleCaptured(sample) => self.on_biometric_sample(sample, now, name),
            Event::WindowElapsed => self.on_window_elapsed(now, name),
            Event::ReconfirmationCompleted(result) => self.on_reconfirmation(result, name),
            Event::TransferCompleted(result) => self.on_transfer(result, name),
            Event::Abort => self.on_abort(now, name),
            Event::Reset => self.on_reset(name),
        }
    }

    fn on_capture(&mut self, sample: FaceSample) -> Result<Transition, FacepayError> {
        let from = self.state();
        if !from.accepts_capture() {
            return Err(FacepayError::Busy(from));
        }
        if sample.is_empty() {
            return Err(FacepayError::InvalidSample("sample is empty".to_string()));
        }
        self.attempt = Some(PaymentAttempt::start(
            self.config.payee.clone(),
            self.config.currency,
        ));
        Ok(Transition {
            from,
            to: PaymentState::Recognizing,
            effect: Effect::Recognize(sample),
            message: "Scanning for registered user...".to_string(),
        })
    }

    fn on_recognition(
        &mut self,
        result: Result<RecognitionResult, OracleError>,
        event: &'static str,
    ) -> Result<Transition, FacepayError> {
        let attempt = expect_state(&mut self.attempt, PaymentState::Recognizing, event)?;
        match result {
            Ok(recognition) => match recognition.identity() {
                Some(identity) => {
                    let message = format!("Welcome {}!", identity.display_name);
                    attempt.payer = Some(identity);
                    Ok(advance(attempt, PaymentState::Recognized, Effect::Notify, message))
                }
                None => {
                    let detail = match recognition.reason {
                        Some(reason) => format!("no match ({reason:?})"),
                        None => "no match".to_string(),
                    };
                    Ok(fail(attempt, ErrorKind::NotRecognized, detail))
                }
            },
            // An outage is still a failed recognition; the detail keeps the cause.
            Err(e) => Ok(fail(attempt, ErrorKind::NotRecognized, e.to_string())),
        }
    }

    fn on_amount(&mut self, amount: Amount, event: &'static str) -> Result<Transition, FacepayError> {
        let attempt = expect_state(&mut self.attempt, PaymentState::Recognized, event)?;
        if amount.is_zero() {
            return Err(FacepayError::InvalidAmount(
                "amount must be greater than zero".to_string(),
            ));
        }
        attempt.amount = Some(amount);
        let message = format!("Payment amount: {} {}", amount, attempt.currency);
        Ok(advance(attempt, PaymentState::AmountEntry, Effect::Notify, message))
    }

    fn on_authorize(&mut self, event: &'static str) -> Result<Transition, FacepayError> {
        let attempt = expect_state(&mut self.attempt, PaymentState::AmountEntry, event)?;
        Ok(advance(
            attempt,
            PaymentState::Authorizing,
            Effect::Notify,
            "Initializing payment...".to_string(),
        ))
    }

    fn on_advance(&mut self, event: &'static str) -> Result<Transition, FacepayError> {
        let max = self.config.max_payment_amount;
        let attempt = expect_state(&mut self.attempt, PaymentState::Authorizing, event)?;
        let ctx = check_context(attempt).ok_or(FacepayError::InvalidTransition {
            state: PaymentState::Authorizing,
            event,
        })?;

        if ctx.payer == ctx.payee {
            return Ok(fail(
                attempt,
                ErrorKind::AuthorizationDenied,
                "payer and merchant are the same account".to_string(),
            ));
        }
        if let Some(max) = max {
            if ctx.amount > max {
                return Ok(fail(
                    attempt,
                    ErrorKind::AuthorizationDenied,
                    format!("amount exceeds terminal limit of {max}"),
                ));
            }
        }

        Ok(advance(
            attempt,
            PaymentState::ProximityCheck,
            Effect::CheckProximity(ctx),
            "Checking customer proximity...".to_string(),
        ))
    }

    fn on_proximity(
        &mut self,
        result: Result<(), String>,
        event: &'static str,
    ) -> Result<Transition, FacepayError> {
        let attempt = expect_state(&mut self.attempt, PaymentState::ProximityCheck, event)?;
        if let Err(reason) = result {
            return Ok(fail(attempt, ErrorKind::ProximityFailed, reason));
        }
        let ctx = check_context(attempt).ok_or(FacepayError::InvalidTransition {
            state: PaymentState::ProximityCheck,
            event,
        })?;
        Ok(advance(
            attempt,
            PaymentState::SecurityCheck,
            Effect::CheckSecurity(ctx),
            "Running security checks...".to_string(),
        ))
    }

    fn on_security(
        &mut self,
        result: Result<(), String>,
        now: Instant,
        event: &'static str,
    ) -> Result<Transition, FacepayError> {
        let window = self
            .config
            .biometric_window
            .min(Duration::from_secs(MAX_BIOMETRIC_WINDOW_SECS));
        let attempt = expect_state(&mut self.attempt, PaymentState::SecurityCheck, event)?;
        if let Err(reason) = result {
            return Ok(fail(attempt, ErrorKind::SecurityCheckFailed, reason));
        }
        let deadline = now + window;
        attempt.biometric_deadline = Some(deadline);
        attempt.biometric_sample = None;
        attempt.reconfirming = false;
        let message = format!(
            "Look into the camera for {} seconds to confirm the payment",
            window.as_secs()
        );
        Ok(advance(
            attempt,
            PaymentState::BiometricConfirm,
            Effect::StartTimer(deadline),
            message,
        ))
    }

    fn on_biometric_sample(
        &mut self,
        sample: FaceSample,
        now: Instant,
        event: &'static str,
    ) -> Result<Transition, FacepayError> {
        let attempt = expect_state(&mut self.attempt, PaymentState::BiometricConfirm, event)?;
        if !window_open(attempt, now) {
            return Err(FacepayError::InvalidTransition {
                state: PaymentState::BiometricConfirm,
                event,
            });
        }
        if sample.is_empty() {
            return Err(FacepayError::InvalidSample("sample is empty".to_string()));
        }
        // Latest sample wins: the check at expiry uses the freshest frame.
        attempt.biometric_sample = Some(sample);
        Ok(Transition {
            from: PaymentState::BiometricConfirm,
            to: PaymentState::BiometricConfirm,
            effect: Effect::None,
            message: "Biometric sample captured".to_string(),
        })
    }

    fn on_window_elapsed(
        &mut self,
        now: Instant,
        event: &'static str,
    ) -> Result<Transition, FacepayError> {
        let attempt = expect_state(&mut self.attempt, PaymentState::BiometricConfirm, event)?;
        let expired = matches!(attempt.biometric_deadline, Some(deadline) if now >= deadline);
        if attempt.reconfirming || !expired {
            return Err(FacepayError::InvalidTransition {
                state: PaymentState::BiometricConfirm,
                event,
            });
        }

        match attempt.biometric_sample.take() {
            None => Ok(fail(
                attempt,
                ErrorKind::BiometricTimeout,
                "no sample captured before the window closed".to_string(),
            )),
            Some(sample) => {
                attempt.reconfirming = true;
                Ok(Transition {
                    from: PaymentState::BiometricConfirm,
                    to: PaymentState::BiometricConfirm,
                    effect: Effect::Reconfirm(sample),
                    message: "Confirming identity...".to_string(),
                })
            }
        }
    }

    fn on_reconfirmation(
        &mut self,
        result: Result<RecognitionResult, OracleError>,
        event: &'static str,
    ) -> Result<Transition, FacepayError> {
        let attempt = expect_state(&mut self.attempt, PaymentState::BiometricConfirm, event)?;
        if !attempt.reconfirming || attempt.transfer_invoked {
            return Err(FacepayError::InvalidTransition {
                state: PaymentState::BiometricConfirm,
                event,
            });
        }

        let recognition = match result {
            Ok(r) => r,
            Err(e @ OracleError::Unavailable(_)) => {
                return Ok(fail(attempt, ErrorKind::OracleUnavailable, e.to_string()));
            }
            Err(e @ OracleError::Rejected(_)) => {
                return Ok(fail(attempt, ErrorKind::BiometricMismatch, e.to_string()));
            }
        };

        let order = match (recognition.identity(), attempt.payer.as_ref(), attempt.amount) {
            (Some(seen), Some(payer), Some(amount))
                if seen.account_address == payer.account_address =>
            {
                TransferOrder {
                    attempt_id: attempt.id,
                    payer: payer.account_address.clone(),
                    payee: attempt.payee.clone(),
                    amount,
                    currency: attempt.currency,
                }
            }
            (Some(seen), _, _) => {
                let detail = format!("sample matched {}", seen.account_address.short());
                return Ok(fail(attempt, ErrorKind::BiometricMismatch, detail));
            }
            (None, _, _) => {
                return Ok(fail(
                    attempt,
                    ErrorKind::BiometricMismatch,
                    "sample did not match any identity".to_string(),
                ));
            }
        };

        attempt.transfer_invoked = true;
        Ok(advance(
            attempt,
            PaymentState::Processing,
            Effect::Transfer(order),
            "Processing transaction...".to_string(),
        ))
    }

    fn on_transfer(
        &mut self,
        result: Result<TransferOutcome, TransferError>,
        event: &'static str,
    ) -> Result<Transition, FacepayError> {
        let rate = self.config.reward_rate;
        let attempt = expect_state(&mut self.attempt, PaymentState::Processing, event)?;
        match result {
            Ok(outcome) => {
                let reward_amount = attempt.amount.map(|a| reward(a, rate)).unwrap_or(0);
                attempt.receipt = Some(TransferReceipt {
                    attempt_id: attempt.id,
                    settled: true,
                    settlement_ref: outcome.settlement_ref,
                    reward_amount,
                });
                Ok(advance(
                    attempt,
                    PaymentState::Settled,
                    Effect::Notify,
                    "Payment completed successfully!".to_string(),
                ))
            }
            Err(e) => Ok(fail(attempt, e.kind(), e.to_string())),
        }
    }

    fn on_abort(&mut self, now: Instant, event: &'static str) -> Result<Transition, FacepayError> {
        let from = self.state();
        let abortable = match self.attempt.as_ref() {
            Some(attempt) => match attempt.state {
                PaymentState::Recognizing
                | PaymentState::Recognized
                | PaymentState::AmountEntry
                | PaymentState::Authorizing
                | PaymentState::ProximityCheck
                | PaymentState::SecurityCheck => true,
                PaymentState::BiometricConfirm => window_open(attempt, now),
                _ => false,
            },
            None => false,
        };
        if !abortable {
            return Err(FacepayError::InvalidTransition { state: from, event });
        }
        self.attempt = None;
        Ok(Transition {
            from,
            to: PaymentState::Idle,
            effect: Effect::Notify,
            message: "Payment cancelled".to_string(),
        })
    }

    fn on_reset(&mut self, event: &'static str) -> Result<Transition, FacepayError> {
        let from = self.state();
        if !(from == PaymentState::Idle || from.is_terminal()) {
            return Err(FacepayError::InvalidTransition { state: from, event });
        }
        self.attempt = None;
        Ok(Transition {
            from,
            to: PaymentState::Idle,
            effect: Effect::Notify,
            message: READY_MESSAGE.to_string(),
        })
    }
}

fn expect_state<'a>(
    slot: &'a mut Option<PaymentAttempt>,
    expected: PaymentState,
    event: &'static str,
) -> Result<&'a mut PaymentAttempt, FacepayError> {
    match slot.as_mut() {
        Some(attempt) if attempt.state == expected => Ok(attempt),
        Some(attempt) => Err(FacepayError::InvalidTransition {
            state: attempt.state,
            event,
        }),
        None => Err(FacepayError::InvalidTransition {
            state: PaymentState::Idle,
            event,
        }),
    }
}

fn advance(
    attempt: &mut PaymentAttempt,
    to: PaymentState,
    effect: Effect,
    message: String,
) -> Transition {
    let from = attempt.state;
    attempt.enter(to);
    Transition {
        from,
        to,
        effect,
        message,
    }
}

fn fail(attempt: &mut PaymentAttempt, kind: ErrorKind, detail: String) -> Transition {
    let from = attempt.state;
    attempt.last_error = Some(kind);
    attempt.failure_detail = Some(detail);
    attempt.biometric_deadline = None;
    attempt.biometric_sample = None;
    attempt.enter(PaymentState::Failed);
    Transition {
        from,
        to: PaymentState::Failed,
        effect: Effect::Notify,
        message: failure_message(kind).to_string(),
    }
}

fn window_open(attempt: &PaymentAttempt, now: Instant) -> bool {
    !attempt.reconfirming && matches!(attempt.biometric_deadline, Some(deadline) if now < deadline)
}

fn check_context(attempt: &PaymentAttempt) -> Option<CheckContext> {
    Some(CheckContext {
        attempt_id: attempt.id,
        payer: attempt.payer.as_ref()?.account_address.clone(),
        payee: attempt.payee.clone(),
        amount: attempt.amount?,
        currency: attempt.currency,
    })
}

/// Operator-facing text for a failed attempt.
pub fn failure_message(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::NotRecognized => {
            "Customer not recognized. Please ensure you are registered and try again."
        }
        ErrorKind::OracleUnavailable => "Recognition service unavailable. Please try again.",
        ErrorKind::OracleRejected => "The photo was rejected. Please try again.",
        ErrorKind::AmbiguousMatch => "More than one customer matched. Please try again.",
        ErrorKind::AlreadyEnrolled => "This account is already enrolled.",
        ErrorKind::AuthorizationDenied => "Payment not authorized.",
        ErrorKind::ProximityFailed => "Customer device not within range.",
        ErrorKind::SecurityCheckFailed => "Security checks failed.",
        ErrorKind::BiometricMismatch => "Biometric confirmation did not match the customer.",
        ErrorKind::BiometricTimeout => "Biometric confirmation timed out.",
        ErrorKind::InsufficientFunds => "Insufficient funds.",
        ErrorKind::SponsorUnavailable => "Fee sponsor unavailable. No funds were moved.",
        ErrorKind::TransferFailed => {
            "Transaction failed. Check the ledger before starting a new payment."
        }
        ErrorKind::InvalidAmount => "Invalid payment amount.",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{AccountAddress, DisplayName, NoMatchReason, ResolvedIdentity};
    use std::time::Duration;

    fn config() -> SessionConfig {
        SessionConfig::new(AccountAddress::new("0xMERCHANT").unwrap())
    }

    fn sample() -> FaceSample {
        FaceSample::jpeg(vec![0xff, 0xd8, 0xff])
    }

    fn matched(address: &str, name: &str) -> RecognitionResult {
        RecognitionResult::matched(
            ResolvedIdentity {
                account_address: AccountAddress::new(address).unwrap(),
                display_name: DisplayName::new(name).unwrap(),
            },
            0.97,
        )
    }

    /// Drive a fresh machine into the open biometric window.
    fn machine_in_window(now: Instant) -> PaymentMachine {
        let mut m = PaymentMachine::new(config());
        m.apply(Event::CaptureRequested(sample()), now).unwrap();
        m.apply(Event::RecognitionCompleted(Ok(matched("0xA", "Alice"))), now)
            .unwrap();
        m.apply(Event::AmountSubmitted(Amount::parse("25.00").unwrap()), now)
            .unwrap();
        m.apply(Event::Authorize, now).unwrap();
        m.apply(Event::Advance, now).unwrap();
        m.apply(Event::ProximityChecked(Ok(())), now).unwrap();
        let t = m.apply(Event::SecurityChecked(Ok(())), now).unwrap();
        assert!(matches!(t.effect, Effect::StartTimer(_)));
        m
    }

    #[test]
    fn test_happy_path_visits_every_stage_in_order() {
        let now = Instant::now();
        let mut m = machine_in_window(now);
        m.apply(Event::BiometricSampleCaptured(sample()), now).unwrap();

        let expiry = now + Duration::from_secs(5);
        let t = m.apply(Event::WindowElapsed, expiry).unwrap();
        assert!(matches!(t.effect, Effect::Reconfirm(_)));

        let t = m
            .apply(
                Event::ReconfirmationCompleted(Ok(matched("0xA", "Alice"))),
                expiry,
            )
            .unwrap();
        let order = match t.effect {
            Effect::Transfer(order) => order,
            other => panic!("expected transfer, got {other:?}"),
        };
        assert_eq!(order.payer.as_str(), "0xA");
        assert_eq!(order.payee.as_str(), "0xMERCHANT");
        assert_eq!(order.amount, Amount::parse("25").unwrap());

        let t = m
            .apply(
                Event::TransferCompleted(Ok(TransferOutcome {
                    settlement_ref: "tx123".to_string(),
                    fee_paid_by: None,
                })),
                expiry,
            )
            .unwrap();
        assert_eq!(t.to, PaymentState::Settled);

        let attempt = m.attempt().unwrap();
        assert_eq!(
            attempt.visited(),
            &[
                PaymentState::Recognizing,
                PaymentState::Recognized,
                PaymentState::AmountEntry,
                PaymentState::Authorizing,
                PaymentState::ProximityCheck,
                PaymentState::SecurityCheck,
                PaymentState::BiometricConfirm,
                PaymentState::Processing,
                PaymentState::Settled,
            ]
        );
        let receipt = attempt.receipt().unwrap();
        assert_eq!(receipt.attempt_id, attempt.id());
        assert!(receipt.settled);
        assert_eq!(receipt.settlement_ref, "tx123");
        assert_eq!(receipt.reward_amount, 25);
    }

    #[test]
    fn test_capture_refused_while_attempt_active() {
        let now = Instant::now();
        let mut m = PaymentMachine::new(config());
        m.apply(Event::CaptureRequested(sample()), now).unwrap();
        let err = m.apply(Event::CaptureRequested(sample()), now).unwrap_err();
        assert!(matches!(err, FacepayError::Busy(PaymentState::Recognizing)));
    }

    #[test]
    fn test_empty_capture_rejected_before_transition() {
        let mut m = PaymentMachine::new(config());
        let err = m
            .apply(Event::CaptureRequested(FaceSample::jpeg(vec![])), Instant::now())
            .unwrap_err();
        assert!(matches!(err, FacepayError::InvalidSample(_)));
        assert_eq!(m.state(), PaymentState::Idle);
    }

    #[test]
    fn test_unmatched_recognition_fails_not_recognized() {
        let now = Instant::now();
        let mut m = PaymentMachine::new(config());
        m.apply(Event::CaptureRequested(sample()), now).unwrap();
        let t = m
            .apply(
                Event::RecognitionCompleted(Ok(RecognitionResult::unmatched(
                    NoMatchReason::Ambiguous,
                    0.9,
                ))),
                now,
            )
            .unwrap();
        assert_eq!(t.to, PaymentState::Failed);
        assert_eq!(
            m.attempt().unwrap().last_error(),
            Some(ErrorKind::NotRecognized)
        );
    }

    #[test]
    fn test_oracle_outage_during_recognition() {
        let now = Instant::now();
        let mut m = PaymentMachine::new(config());
        m.apply(Event::CaptureRequested(sample()), now).unwrap();
        m.apply(
            Event::RecognitionCompleted(Err(OracleError::Unavailable("timeout".into()))),
            now,
        )
        .unwrap();
        let attempt = m.attempt().unwrap();
        assert_eq!(attempt.state(), PaymentState::Failed);
        assert_eq!(attempt.last_error(), Some(ErrorKind::NotRecognized));
        assert!(attempt.failure_detail().unwrap().contains("timeout"));
    }

    #[test]
    fn test_zero_amount_rejected_at_boundary() {
        let now = Instant::now();
        let mut m = PaymentMachine::new(config());
        m.apply(Event::CaptureRequested(sample()), now).unwrap();
        m.apply(Event::RecognitionCompleted(Ok(matched("0xA", "Alice"))), now)
            .unwrap();
        let err = m
            .apply(Event::AmountSubmitted(Amount::ZERO), now)
            .unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::InvalidAmount));
        assert_eq!(m.state(), PaymentState::Recognized);
    }

    #[test]
    fn test_stage_cannot_be_skipped() {
        let now = Instant::now();
        let mut m = PaymentMachine::new(config());
        m.apply(Event::CaptureRequested(sample()), now).unwrap();
        m.apply(Event::RecognitionCompleted(Ok(matched("0xA", "Alice"))), now)
            .unwrap();
        m.apply(Event::AmountSubmitted(Amount::parse("5").unwrap()), now)
            .unwrap();
        let err = m.apply(Event::SecurityChecked(Ok(())), now).unwrap_err();
        assert!(matches!(
            err,
            FacepayError::InvalidTransition {
                state: PaymentState::AmountEntry,
                ..
            }
        ));
    }

    #[test]
    fn test_proximity_failure_ends_pipeline() {
        let now = Instant::now();
        let mut m = PaymentMachine::new(config());
        m.apply(Event::CaptureRequested(sample()), now).unwrap();
        m.apply(Event::RecognitionCompleted(Ok(matched("0xA", "Alice"))), now)
            .unwrap();
        m.apply(Event::AmountSubmitted(Amount::parse("5").unwrap()), now)
            .unwrap();
        m.apply(Event::Authorize, now).unwrap();
        m.apply(Event::Advance, now).unwrap();
        let t = m
            .apply(Event::ProximityChecked(Err("no beacon".into())), now)
            .unwrap();
        assert_eq!(t.to, PaymentState::Failed);
        let attempt = m.attempt().unwrap();
        assert_eq!(attempt.last_error(), Some(ErrorKind::ProximityFailed));
        assert!(!attempt.visited().contains(&PaymentState::SecurityCheck));
    }

    #[test]
    fn test_self_payment_denied() {
        let now = Instant::now();
        let mut m = PaymentMachine::new(config());
        m.apply(Event::CaptureRequested(sample()), now).unwrap();
        m.apply(
            Event::RecognitionCompleted(Ok(matched("0xMERCHANT", "Owner"))),
            now,
        )
        .unwrap();
        m.apply(Event::AmountSubmitted(Amount::parse("5").unwrap()), now)
            .unwrap();
        m.apply(Event::Authorize, now).unwrap();
        let t = m.apply(Event::Advance, now).unwrap();
        assert_eq!(t.to, PaymentState::Failed);
        assert_eq!(
            m.attempt().unwrap().last_error(),
            Some(ErrorKind::AuthorizationDenied)
        );
    }

    #[test]
    fn test_amount_above_limit_denied() {
        let now = Instant::now();
        let cfg = config().with_max_payment_amount(Amount::parse("10").unwrap());
        let mut m = PaymentMachine::new(cfg);
        m.apply(Event::CaptureRequested(sample()), now).unwrap();
        m.apply(Event::RecognitionCompleted(Ok(matched("0xA", "Alice"))), now)
            .unwrap();
        m.apply(Event::AmountSubmitted(Amount::parse("10.01").unwrap()), now)
            .unwrap();
        m.apply(Event::Authorize, now).unwrap();
        m.apply(Event::Advance, now).unwrap();
        assert_eq!(
            m.attempt().unwrap().last_error(),
            Some(ErrorKind::AuthorizationDenied)
        );
    }

    #[test]
    fn test_window_elapsed_before_deadline_rejected() {
        let now = Instant::now();
        let mut m = machine_in_window(now);
        let err = m
            .apply(Event::WindowElapsed, now + Duration::from_secs(4))
            .unwrap_err();
        assert!(matches!(err, FacepayError::InvalidTransition { .. }));
        assert_eq!(m.state(), PaymentState::BiometricConfirm);
    }

    #[test]
    fn test_timeout_fires_exactly_once() {
        let now = Instant::now();
        let mut m = machine_in_window(now);
        let expiry = now + Duration::from_secs(5);

        let t = m.apply(Event::WindowElapsed, expiry).unwrap();
        assert_eq!(t.to, PaymentState::Failed);
        assert_eq!(
            m.attempt().unwrap().last_error(),
            Some(ErrorKind::BiometricTimeout)
        );

        assert!(m.apply(Event::WindowElapsed, expiry).is_err());
        let failures = m
            .attempt()
            .unwrap()
            .visited()
            .iter()
            .filter(|s| **s == PaymentState::Failed)
            .count();
        assert_eq!(failures, 1);
    }

    #[test]
    fn test_oversized_window_is_capped() {
        let now = Instant::now();
        let mut config = config();
        config.biometric_window = Duration::MAX;
        let mut m = PaymentMachine::new(config);
        m.apply(Event::CaptureRequested(sample()), now).unwrap();
        m.apply(Event::RecognitionCompleted(Ok(matched("0xA", "Alice"))), now)
            .unwrap();
        m.apply(Event::AmountSubmitted(Amount::parse("25.00").unwrap()), now)
            .unwrap();
        m.apply(Event::Authorize, now).unwrap();
        m.apply(Event::Advance, now).unwrap();
        m.apply(Event::ProximityChecked(Ok(())), now).unwrap();
        m.apply(Event::SecurityChecked(Ok(())), now).unwrap();

        let cap = Duration::from_secs(MAX_BIOMETRIC_WINDOW_SECS);
        assert_eq!(m.biometric_deadline(), Some(now + cap));
        assert_eq!(
            SessionConfig::new(AccountAddress::new("0xM").unwrap())
                .with_biometric_window(Duration::from_secs(u64::MAX))
                .biometric_window,
            cap
        );
    }

    #[test]
    fn test_sample_after_deadline_rejected() {
        let now = Instant::now();
        let mut m = machine_in_window(now);
        let err = m
            .apply(
                Event::BiometricSampleCaptured(sample()),
                now + Duration::from_secs(5),
            )
            .unwrap_err();
        assert!(matches!(err, FacepayError::InvalidTransition { .. }));
    }

    #[test]
    fn test_mismatch_never_emits_transfer() {
        let now = Instant::now();
        let mut m = machine_in_window(now);
        m.apply(Event::BiometricSampleCaptured(sample()), now).unwrap();
        let expiry = now + Duration::from_secs(5);
        m.apply(Event::WindowElapsed, expiry).unwrap();
        let t = m
            .apply(
                Event::ReconfirmationCompleted(Ok(matched("0xB", "Bob"))),
                expiry,
            )
            .unwrap();
        assert!(matches!(t.effect, Effect::Notify));
        let attempt = m.attempt().unwrap();
        assert_eq!(attempt.last_error(), Some(ErrorKind::BiometricMismatch));
        assert!(!attempt.transfer_invoked());
        assert!(!attempt.visited().contains(&PaymentState::Processing));
    }

    #[test]
    fn test_abort_inside_window_returns_to_idle() {
        let now = Instant::now();
        let mut m = machine_in_window(now);
        let t = m
            .apply(Event::Abort, now + Duration::from_secs(2))
            .unwrap();
        assert_eq!(t.to, PaymentState::Idle);
        assert!(m.attempt().is_none());
        assert!(m.biometric_deadline().is_none());
    }

    #[test]
    fn test_abort_after_expiry_rejected() {
        let now = Instant::now();
        let mut m = machine_in_window(now);
        assert!(m.apply(Event::Abort, now + Duration::from_secs(5)).is_err());
    }

    #[test]
    fn test_abort_rejected_while_processing() {
        let now = Instant::now();
        let mut m = machine_in_window(now);
        m.apply(Event::BiometricSampleCaptured(sample()), now).unwrap();
        let expiry = now + Duration::from_secs(5);
        m.apply(Event::WindowElapsed, expiry).unwrap();
        m.apply(
            Event::ReconfirmationCompleted(Ok(matched("0xA", "Alice"))),
            expiry,
        )
        .unwrap();
        assert_eq!(m.state(), PaymentState::Processing);
        assert!(m.apply(Event::Abort, expiry).is_err());
    }

    #[test]
    fn test_ambiguous_transfer_is_transfer_failed() {
        let now = Instant::now();
        let mut m = machine_in_window(now);
        m.apply(Event::BiometricSampleCaptured(sample()), now).unwrap();
        let expiry = now + Duration::from_secs(5);
        m.apply(Event::WindowElapsed, expiry).unwrap();
        m.apply(
            Event::ReconfirmationCompleted(Ok(matched("0xA", "Alice"))),
            expiry,
        )
        .unwrap();
        m.apply(
            Event::TransferCompleted(Err(TransferError::Ambiguous("timeout".into()))),
            expiry,
        )
        .unwrap();
        let attempt = m.attempt().unwrap();
        assert_eq!(attempt.last_error(), Some(ErrorKind::TransferFailed));
        assert!(attempt.receipt().is_none());
    }

    #[test]
    fn test_reset_only_from_terminal_or_idle() {
        let now = Instant::now();
        let mut m = PaymentMachine::new(config());
        assert!(m.apply(Event::Reset, now).is_ok());

        m.apply(Event::CaptureRequested(sample()), now).unwrap();
        assert!(m.apply(Event::Reset, now).is_err());

        m.apply(
            Event::RecognitionCompleted(Ok(RecognitionResult::unmatched(
                NoMatchReason::NoCandidate,
                0.0,
            ))),
            now,
        )
        .unwrap();
        let t = m.apply(Event::Reset, now).unwrap();
        assert_eq!(t.from, PaymentState::Failed);
        assert_eq!(m.state(), PaymentState::Idle);
    }

    #[test]
    fn test_capture_after_terminal_starts_fresh_attempt() {
        let now = Instant::now();
        let mut m = PaymentMachine::new(config());
        m.apply(Event::CaptureRequested(sample()), now).unwrap();
        m.apply(
            Event::RecognitionCompleted(Err(OracleError::Unavailable("down".into()))),
            now,
        )
        .unwrap();
        let first = m.attempt().unwrap().id();

        m.apply(Event::CaptureRequested(sample()), now).unwrap();
        let second = m.attempt().unwrap();
        assert_ne!(second.id(), first);
        assert_eq!(second.visited(), &[PaymentState::Recognizing]);
        assert!(second.last_error().is_none());
    }
}
