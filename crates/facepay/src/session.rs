//! The terminal session: one [`PaymentMachine`] driven by a single task.
//!
//! All events for the terminal are serialized through an mpsc channel into
//! the session task, so at most one attempt is ever in flight. Effects run as
//! spawned tasks tagged with their attempt id; results for an attempt that
//! has since been aborted are dropped. State is published through a
//! `tokio::sync::watch` channel for displays and event streams.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep_until, timeout, Instant};
use tokio_stream::wrappers::WatchStream;

use crate::amount::Amount;
use crate::constants::{SessionConfig, READY_MESSAGE};
use crate::error::{ErrorKind, FacepayError, OracleError, TransferError};
use crate::identity::{FaceSample, RecognitionResult};
use crate::ledger::{AttemptLedger, AttemptOutcome, LedgerEntry};
use crate::machine::{Effect, Event, PaymentMachine, Transition};
use crate::payment::{
    AttemptId, AttemptSnapshot, PaymentState, TransferOrder, TransferOutcome, TransferRequest,
};
use crate::scheme::{AuthorizationChecks, CredentialProvider, Recognizer, SponsoredTransferExecutor};

const COMMAND_QUEUE: usize = 32;
const COUNTDOWN_TICK: Duration = Duration::from_secs(1);

/// What the terminal display shows.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUpdate {
    pub state: PaymentState,
    pub progress: u8,
    pub message: String,
    /// An effect (recognition, check, transfer) is in flight.
    pub busy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt: Option<AttemptSnapshot>,
}

impl SessionUpdate {
    fn ready() -> Self {
        Self {
            state: PaymentState::Idle,
            progress: 0,
            message: READY_MESSAGE.to_string(),
            busy: false,
            attempt: None,
        }
    }

    pub fn last_error(&self) -> Option<ErrorKind> {
        self.attempt.as_ref().and_then(|a| a.last_error)
    }
}

/// How a recognition call ended, as seen by [`SessionObserver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecognitionVerdict {
    Matched,
    Unmatched,
    Error,
}

impl RecognitionVerdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Matched => "matched",
            Self::Unmatched => "unmatched",
            Self::Error => "error",
        }
    }

    fn of(result: &Result<RecognitionResult, OracleError>) -> Self {
        match result {
            Ok(recognition) if recognition.identity().is_some() => Self::Matched,
            Ok(_) => Self::Unmatched,
            Err(_) => Self::Error,
        }
    }
}

/// Hooks the session calls where things happen.
///
/// Called from the session task and its effect tasks, so implementations
/// must return quickly.
pub trait SessionObserver: Send + Sync {
    /// The first recognition of an attempt came back.
    fn recognition_finished(&self, _attempt_id: AttemptId, _verdict: RecognitionVerdict) {}

    /// An attempt reached `Settled` or `Failed`.
    fn attempt_finished(
        &self,
        _attempt_id: AttemptId,
        _state: PaymentState,
        _error: Option<ErrorKind>,
    ) {
    }

    /// The transfer call returned, `elapsed` measured from claiming the ledger entry.
    fn transfer_finished(&self, _attempt_id: AttemptId, _elapsed: Duration, _settled: bool) {}
}

struct NoopObserver;

impl SessionObserver for NoopObserver {}

type Reply = oneshot::Sender<Result<SessionUpdate, FacepayError>>;

enum Command {
    Capture(FaceSample, Reply),
    Amount(Amount, Reply),
    BiometricSample(FaceSample, Reply),
    Abort(Reply),
    Reset(Reply),
}

/// Cloneable front door to a running session.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    updates: watch::Receiver<SessionUpdate>,
}

impl SessionHandle {
    /// Start an attempt from a recognition sample. Returns once recognition is dispatched.
    pub async fn submit_recognition_sample(
        &self,
        sample: FaceSample,
    ) -> Result<SessionUpdate, FacepayError> {
        self.request(|reply| Command::Capture(sample, reply)).await
    }

    /// Enter the amount for the recognized payer and start authorization.
    pub async fn submit_amount(&self, amount: Amount) -> Result<SessionUpdate, FacepayError> {
        self.request(|reply| Command::Amount(amount, reply)).await
    }

    /// Hand a frame to the open biometric window.
    pub async fn confirm_biometric_sample(
        &self,
        sample: FaceSample,
    ) -> Result<SessionUpdate, FacepayError> {
        self.request(|reply| Command::BiometricSample(sample, reply)).await
    }

    pub async fn abort(&self) -> Result<SessionUpdate, FacepayError> {
        self.request(Command::Abort).await
    }

    /// Clear a settled or failed attempt.
    pub async fn reset(&self) -> Result<SessionUpdate, FacepayError> {
        self.request(Command::Reset).await
    }

    pub fn current(&self) -> SessionUpdate {
        self.updates.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionUpdate> {
        self.updates.clone()
    }

    pub fn updates(&self) -> WatchStream<SessionUpdate> {
        WatchStream::new(self.updates.clone())
    }

    /// Wait until no effect is in flight, or `limit` passes.
    pub async fn wait_quiescent(&self, limit: Duration) -> SessionUpdate {
        let mut rx = self.updates.clone();
        let _ = timeout(limit, rx.wait_for(|u| !u.busy)).await;
        self.current()
    }

    async fn request(
        &self,
        build: impl FnOnce(Reply) -> Command,
    ) -> Result<SessionUpdate, FacepayError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(build(tx))
            .await
            .map_err(|_| FacepayError::SessionClosed)?;
        rx.await.map_err(|_| FacepayError::SessionClosed)?
    }
}

/// A configured session, ready to [`spawn`](TerminalSession::spawn).
pub struct TerminalSession<R, C, P, X> {
    config: SessionConfig,
    recognizer: Arc<R>,
    checks: Arc<C>,
    credentials: Arc<P>,
    executor: Arc<X>,
    ledger: Arc<dyn AttemptLedger>,
    observer: Arc<dyn SessionObserver>,
}

impl<R, C, P, X> TerminalSession<R, C, P, X>
where
    R: Recognizer + 'static,
    C: AuthorizationChecks + 'static,
    P: CredentialProvider + 'static,
    X: SponsoredTransferExecutor + 'static,
{
    pub fn new(
        config: SessionConfig,
        recognizer: Arc<R>,
        checks: Arc<C>,
        credentials: Arc<P>,
        executor: Arc<X>,
        ledger: Arc<dyn AttemptLedger>,
    ) -> Self {
        Self {
            config,
            recognizer,
            checks,
            credentials,
            executor,
            ledger,
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn SessionObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Start the session task on the current runtime.
    pub fn spawn(self) -> SessionHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE);
        let (update_tx, update_rx) = watch::channel(SessionUpdate::ready());
        let (result_tx, result_rx) = mpsc::unbounded_channel();

        let driver = Driver {
            machine: PaymentMachine::new(self.config),
            recognizer: self.recognizer,
            checks: self.checks,
            credentials: self.credentials,
            executor: self.executor,
            ledger: self.ledger,
            observer: self.observer,
            updates: update_tx,
            results: result_tx,
            message: READY_MESSAGE.to_string(),
            in_flight: false,
        };
        tokio::spawn(driver.run(cmd_rx, result_rx));

        SessionHandle {
            commands: cmd_tx,
            updates: update_rx,
        }
    }
}

struct Driver<R, C, P, X> {
    machine: PaymentMachine,
    recognizer: Arc<R>,
    checks: Arc<C>,
    credentials: Arc<P>,
    executor: Arc<X>,
    ledger: Arc<dyn AttemptLedger>,
    observer: Arc<dyn SessionObserver>,
    updates: watch::Sender<SessionUpdate>,
    results: mpsc::UnboundedSender<(AttemptId, Event)>,
    message: String,
    in_flight: bool,
}

impl<R, C, P, X> Driver<R, C, P, X>
where
    R: Recognizer + 'static,
    C: AuthorizationChecks + 'static,
    P: CredentialProvider + 'static,
    X: SponsoredTransferExecutor + 'static,
{
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut results: mpsc::UnboundedReceiver<(AttemptId, Event)>,
    ) {
        tracing::info!(
            payee = %self.machine.config().payee,
            currency = %self.machine.config().currency,
            "terminal session started"
        );
        loop {
            let wake_at = self
                .machine
                .biometric_deadline()
                .map(|deadline| deadline.min(Instant::now() + COUNTDOWN_TICK));

            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(cmd) => self.on_command(cmd),
                    None => break,
                },
                Some((attempt_id, event)) = results.recv() => self.on_result(attempt_id, event),
                _ = sleep_until_opt(wake_at) => self.on_wake(),
            }
        }
        tracing::info!("terminal session stopped");
    }

    fn on_command(&mut self, cmd: Command) {
        match cmd {
            Command::Capture(sample, reply) => {
                let _ = reply.send(self.step(Event::CaptureRequested(sample)));
            }
            Command::Amount(amount, reply) => {
                let result = self
                    .step(Event::AmountSubmitted(amount))
                    .and_then(|_| self.step(Event::Authorize))
                    .and_then(|_| self.step(Event::Advance));
                let _ = reply.send(result);
            }
            Command::BiometricSample(sample, reply) => {
                let _ = reply.send(self.step(Event::BiometricSampleCaptured(sample)));
            }
            Command::Abort(reply) => {
                let result = self.step(Event::Abort);
                if result.is_ok() {
                    self.in_flight = false;
                    self.publish();
                }
                let _ = reply.send(result.map(|_| self.current()));
            }
            Command::Reset(reply) => {
                let _ = reply.send(self.step(Event::Reset));
            }
        }
    }

    fn on_result(&mut self, attempt_id: AttemptId, event: Event) {
        let current = self.machine.attempt().map(|a| a.id());
        if current != Some(attempt_id) {
            tracing::debug!(
                attempt_id = %attempt_id,
                event = event.name(),
                "discarding result for a finished attempt"
            );
            return;
        }
        self.in_flight = false;
        if let Err(e) = self.step(event) {
            tracing::warn!(attempt_id = %attempt_id, error = %e, "effect result rejected");
            self.publish();
        }
    }

    fn on_wake(&mut self) {
        match self.machine.biometric_deadline() {
            Some(deadline) if Instant::now() >= deadline => {
                if let Err(e) = self.step(Event::WindowElapsed) {
                    tracing::warn!(error = %e, "biometric window expiry rejected");
                }
            }
            Some(_) => self.publish(),
            None => {}
        }
    }

    /// Apply one event, start its effect and publish the new state.
    fn step(&mut self, event: Event) -> Result<SessionUpdate, FacepayError> {
        let name = event.name();
        let verdict = match &event {
            Event::RecognitionCompleted(result) => Some(RecognitionVerdict::of(result)),
            _ => None,
        };
        let transition = self.machine.apply(event, Instant::now())?;
        let Transition {
            from,
            to,
            effect,
            message,
        } = transition;

        let attempt_id = self.machine.attempt().map(|a| a.id());
        if to == PaymentState::Failed {
            tracing::warn!(
                attempt_id = ?attempt_id,
                from = %from,
                event = name,
                error = ?self.machine.attempt().and_then(|a| a.last_error()),
                "payment attempt failed"
            );
        } else if from != to {
            tracing::info!(
                attempt_id = ?attempt_id,
                from = %from,
                to = %to,
                event = name,
                effect = effect.name(),
                "payment state transition"
            );
        } else {
            tracing::debug!(attempt_id = ?attempt_id, event = name, effect = effect.name(), "payment event");
        }

        if let Some(attempt_id) = attempt_id {
            if let Some(verdict) = verdict {
                self.observer.recognition_finished(attempt_id, verdict);
            }
            if from != to && to.is_terminal() {
                let error = self.machine.attempt().and_then(|a| a.last_error());
                self.observer.attempt_finished(attempt_id, to, error);
            }
        }

        self.message = message;
        if let Some(attempt_id) = attempt_id {
            self.start_effect(attempt_id, effect);
        }
        self.publish();
        Ok(self.current())
    }

    fn start_effect(&mut self, attempt_id: AttemptId, effect: Effect) {
        let (oracle_limit, check_limit, transfer_limit) = {
            let config = self.machine.config();
            (
                config.oracle_timeout,
                config.check_timeout,
                config.transfer_timeout,
            )
        };
        let results = self.results.clone();
        match effect {
            Effect::Recognize(sample) => {
                self.in_flight = true;
                let recognizer = self.recognizer.clone();
                let limit = oracle_limit;
                tokio::spawn(async move {
                    let result = recognize_within(recognizer.as_ref(), &sample, limit).await;
                    let _ = results.send((attempt_id, Event::RecognitionCompleted(result)));
                });
            }
            Effect::Reconfirm(sample) => {
                self.in_flight = true;
                let recognizer = self.recognizer.clone();
                let limit = oracle_limit;
                tokio::spawn(async move {
                    let result = recognize_within(recognizer.as_ref(), &sample, limit).await;
                    let _ = results.send((attempt_id, Event::ReconfirmationCompleted(result)));
                });
            }
            Effect::CheckProximity(ctx) => {
                self.in_flight = true;
                let checks = self.checks.clone();
                let limit = check_limit;
                tokio::spawn(async move {
                    let result = timeout(limit, checks.check_proximity(&ctx))
                        .await
                        .unwrap_or_else(|_| Err("proximity check timed out".to_string()));
                    let _ = results.send((attempt_id, Event::ProximityChecked(result)));
                });
            }
            Effect::CheckSecurity(ctx) => {
                self.in_flight = true;
                let checks = self.checks.clone();
                let limit = check_limit;
                tokio::spawn(async move {
                    let result = timeout(limit, checks.check_security(&ctx))
                        .await
                        .unwrap_or_else(|_| Err("security check timed out".to_string()));
                    let _ = results.send((attempt_id, Event::SecurityChecked(result)));
                });
            }
            Effect::Transfer(order) => {
                self.in_flight = true;
                let credentials = self.credentials.clone();
                let executor = self.executor.clone();
                let ledger = self.ledger.clone();
                let observer = self.observer.clone();
                let limit = transfer_limit;
                tokio::spawn(async move {
                    let started = Instant::now();
                    let result = execute_transfer(
                        order,
                        credentials.as_ref(),
                        executor.as_ref(),
                        ledger.as_ref(),
                        limit,
                    )
                    .await;
                    observer.transfer_finished(attempt_id, started.elapsed(), result.is_ok());
                    let _ = results.send((attempt_id, Event::TransferCompleted(result)));
                });
            }
            Effect::StartTimer(_) | Effect::Notify | Effect::None => {}
        }
    }

    fn current(&self) -> SessionUpdate {
        let state = self.machine.state();
        SessionUpdate {
            state,
            progress: state.progress(),
            message: self.message.clone(),
            busy: self.in_flight,
            attempt: self.machine.snapshot(Instant::now()),
        }
    }

    fn publish(&self) {
        self.updates.send_replace(self.current());
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn recognize_within<R: Recognizer>(
    recognizer: &R,
    sample: &FaceSample,
    limit: Duration,
) -> Result<RecognitionResult, OracleError> {
    match timeout(limit, recognizer.recognize(sample)).await {
        Ok(result) => result,
        Err(_) => Err(OracleError::Unavailable(format!(
            "no answer within {}s",
            limit.as_secs()
        ))),
    }
}

/// Claim the attempt in the ledger, resolve the credential, call the executor
/// once and record what happened.
///
/// The claim is written before anything leaves the terminal. If it cannot be
/// written the transfer is not attempted.
pub async fn execute_transfer<P, X>(
    order: TransferOrder,
    credentials: &P,
    executor: &X,
    ledger: &dyn AttemptLedger,
    limit: Duration,
) -> Result<TransferOutcome, TransferError>
where
    P: CredentialProvider,
    X: SponsoredTransferExecutor,
{
    let attempt_id = order.attempt_id;
    if !ledger.try_claim(&LedgerEntry::claim(&order)) {
        return Err(TransferError::AlreadyInvoked(format!(
            "attempt {attempt_id} already has a transfer on record"
        )));
    }

    let result = async {
        let credential = match timeout(limit, credentials.credential_for(&order.payer)).await {
            Ok(credential) => credential?,
            Err(_) => {
                return Err(TransferError::CredentialUnavailable(
                    "custody service timed out".to_string(),
                ))
            }
        };
        let request = TransferRequest::new(order, credential);
        match timeout(limit, executor.transfer(request)).await {
            Ok(result) => result,
            Err(_) => Err(TransferError::Ambiguous(format!(
                "no answer from sponsor within {}s",
                limit.as_secs()
            ))),
        }
    }
    .await;

    let outcome = match &result {
        Ok(done) => AttemptOutcome::Settled {
            settlement_ref: done.settlement_ref.clone(),
        },
        Err(e) if e.requires_reconciliation() => AttemptOutcome::Unknown,
        Err(e) => AttemptOutcome::Failed {
            error_kind: e.kind(),
        },
    };
    match &result {
        Ok(done) => tracing::info!(
            attempt_id = %attempt_id,
            settlement_ref = %done.settlement_ref,
            fee_paid_by = ?done.fee_paid_by,
            "sponsored transfer settled"
        ),
        Err(e) if e.requires_reconciliation() => tracing::error!(
            attempt_id = %attempt_id,
            error = %e,
            "transfer outcome unknown, reconcile before retrying this payer"
        ),
        Err(e) => tracing::warn!(attempt_id = %attempt_id, error = %e, "sponsored transfer failed"),
    }
    if let Err(e) = ledger.record_outcome(&attempt_id, outcome) {
        tracing::error!(attempt_id = %attempt_id, error = %e, "failed to record transfer outcome");
    }
    result
}
