//! End-to-end terminal sessions against in-process collaborators.
//!
//! Time is paused, so the biometric window elapses as soon as the session
//! task is the only thing left waiting.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use facepay::*;

const ALICE_FACE: u8 = 0xA1;
const BOB_FACE: u8 = 0xB0;
const STRANGER_FACE: u8 = 0x00;

struct FakeRecognizer {
    faces: HashMap<u8, ResolvedIdentity>,
    calls: AtomicUsize,
}

impl FakeRecognizer {
    fn new() -> Self {
        let mut faces = HashMap::new();
        faces.insert(ALICE_FACE, identity("0xA", "Alice"));
        faces.insert(BOB_FACE, identity("0xB", "Bob"));
        Self {
            faces,
            calls: AtomicUsize::new(0),
        }
    }
}

impl Recognizer for FakeRecognizer {
    async fn recognize(&self, sample: &FaceSample) -> Result<RecognitionResult, OracleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let face = sample.bytes().first().copied().unwrap_or_default();
        Ok(match self.faces.get(&face) {
            Some(who) => RecognitionResult::matched(who.clone(), 0.98),
            None => RecognitionResult::unmatched(NoMatchReason::NoCandidate, 0.1),
        })
    }
}

#[derive(Default)]
struct FakeChecks {
    deny_proximity: bool,
}

impl AuthorizationChecks for FakeChecks {
    async fn check_proximity(&self, _ctx: &CheckContext) -> Result<(), String> {
        if self.deny_proximity {
            Err("customer device not in range".to_string())
        } else {
            Ok(())
        }
    }

    async fn check_security(&self, _ctx: &CheckContext) -> Result<(), String> {
        Ok(())
    }
}

struct FakeCustody;

impl CredentialProvider for FakeCustody {
    async fn credential_for(&self, payer: &AccountAddress) -> Result<PayerCredential, TransferError> {
        Ok(PayerCredential::new(format!("key-for-{payer}")))
    }
}

struct FakeSponsor {
    calls: AtomicUsize,
    seen: Mutex<Vec<(String, String, String)>>,
    answer: Mutex<Option<Result<TransferOutcome, TransferError>>>,
    /// Never answer, to exercise the transfer timeout.
    hang: bool,
}

impl FakeSponsor {
    fn settling(digest: &str) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
            answer: Mutex::new(Some(Ok(TransferOutcome {
                settlement_ref: digest.to_string(),
                fee_paid_by: Some("0xSPONSOR".to_string()),
            }))),
            hang: false,
        }
    }

    fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::settling("never")
        }
    }
}

impl SponsoredTransferExecutor for FakeSponsor {
    async fn transfer(&self, request: TransferRequest) -> Result<TransferOutcome, TransferError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push((
            request.payer_credential.expose().to_string(),
            request.payee.to_string(),
            request.amount.to_string(),
        ));
        if self.hang {
            std::future::pending::<()>().await;
        }
        self.answer
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(|| Err(TransferError::NetworkRejected("answered twice".into())))
    }
}

fn identity(address: &str, name: &str) -> ResolvedIdentity {
    ResolvedIdentity {
        account_address: AccountAddress::new(address).unwrap(),
        display_name: DisplayName::new(name).unwrap(),
    }
}

fn face(id: u8) -> FaceSample {
    FaceSample::jpeg(vec![id, 0xd8, 0xff, 0xe0])
}

struct Rig {
    session: SessionHandle,
    recognizer: Arc<FakeRecognizer>,
    sponsor: Arc<FakeSponsor>,
    ledger: Arc<InMemoryAttemptLedger>,
}

fn rig_with(checks: FakeChecks, sponsor: FakeSponsor) -> Rig {
    let recognizer = Arc::new(FakeRecognizer::new());
    let sponsor = Arc::new(sponsor);
    let ledger = Arc::new(InMemoryAttemptLedger::new());
    let config = SessionConfig::new(AccountAddress::new("0xMERCHANT").unwrap());
    let session = TerminalSession::new(
        config,
        recognizer.clone(),
        Arc::new(checks),
        Arc::new(FakeCustody),
        sponsor.clone(),
        ledger.clone(),
    )
    .spawn();
    Rig {
        session,
        recognizer,
        sponsor,
        ledger,
    }
}

fn rig() -> Rig {
    rig_with(FakeChecks::default(), FakeSponsor::settling("tx123"))
}

const QUIET: Duration = Duration::from_secs(1);

async fn wait_terminal(session: &SessionHandle) -> SessionUpdate {
    let mut rx = session.subscribe();
    let update = tokio::time::timeout(
        Duration::from_secs(120),
        rx.wait_for(|u| u.state.is_terminal() && !u.busy),
    )
    .await
    .expect("attempt never finished")
    .expect("session stopped")
    .clone();
    update
}

/// Recognize Alice and enter an amount; leaves the session in the biometric window.
async fn into_window(rig: &Rig, amount: &str) -> SessionUpdate {
    rig.session
        .submit_recognition_sample(face(ALICE_FACE))
        .await
        .unwrap();
    let recognized = rig.session.wait_quiescent(QUIET).await;
    assert_eq!(recognized.state, PaymentState::Recognized);

    rig.session
        .submit_amount(Amount::parse(amount).unwrap())
        .await
        .unwrap();
    rig.session.wait_quiescent(QUIET).await
}

#[tokio::test(start_paused = true)]
async fn test_alice_pays_and_settles_with_reward() {
    let rig = rig();
    let window = into_window(&rig, "25.00").await;
    assert_eq!(window.state, PaymentState::BiometricConfirm);
    assert_eq!(window.progress, 75);
    assert_eq!(window.attempt.as_ref().unwrap().biometric_window_remaining, 5);

    rig.session
        .confirm_biometric_sample(face(ALICE_FACE))
        .await
        .unwrap();

    let done = wait_terminal(&rig.session).await;
    assert_eq!(done.state, PaymentState::Settled);
    assert_eq!(done.progress, 100);
    let attempt = done.attempt.unwrap();
    let receipt = attempt.receipt.unwrap();
    assert!(receipt.settled);
    assert_eq!(receipt.settlement_ref, "tx123");
    assert_eq!(receipt.reward_amount, 25);
    assert_eq!(receipt.attempt_id, attempt.id);

    assert_eq!(rig.sponsor.calls.load(Ordering::SeqCst), 1);
    let seen = rig.sponsor.seen.lock().unwrap().clone();
    assert_eq!(
        seen,
        vec![("key-for-0xA".to_string(), "0xMERCHANT".to_string(), "25".to_string())]
    );
    assert_eq!(
        rig.ledger.outcome(&attempt.id),
        Some(AttemptOutcome::Settled {
            settlement_ref: "tx123".to_string()
        })
    );
}

#[tokio::test(start_paused = true)]
async fn test_different_face_in_window_is_mismatch() {
    let rig = rig();
    into_window(&rig, "25.00").await;
    rig.session
        .confirm_biometric_sample(face(BOB_FACE))
        .await
        .unwrap();

    let done = wait_terminal(&rig.session).await;
    assert_eq!(done.state, PaymentState::Failed);
    assert_eq!(done.last_error(), Some(ErrorKind::BiometricMismatch));
    assert_eq!(rig.sponsor.calls.load(Ordering::SeqCst), 0);
    assert!(rig.ledger.unresolved().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_empty_window_times_out_once() {
    let rig = rig();
    into_window(&rig, "10").await;

    let done = wait_terminal(&rig.session).await;
    assert_eq!(done.last_error(), Some(ErrorKind::BiometricTimeout));

    // Let any stray timer fire; the failure must not be recorded twice.
    tokio::time::sleep(Duration::from_secs(30)).await;
    let after = rig.session.current();
    assert_eq!(after.state, PaymentState::Failed);
    assert_eq!(after.attempt.unwrap().id, done.attempt.unwrap().id);
    assert_eq!(rig.sponsor.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_face_not_recognized() {
    let rig = rig();
    rig.session
        .submit_recognition_sample(face(STRANGER_FACE))
        .await
        .unwrap();
    let update = rig.session.wait_quiescent(QUIET).await;
    assert_eq!(update.state, PaymentState::Failed);
    assert_eq!(update.last_error(), Some(ErrorKind::NotRecognized));
}

#[tokio::test(start_paused = true)]
async fn test_second_capture_refused_while_busy() {
    let rig = rig();
    into_window(&rig, "5").await;
    let err = rig
        .session
        .submit_recognition_sample(face(BOB_FACE))
        .await
        .unwrap_err();
    assert!(matches!(err, FacepayError::Busy(PaymentState::BiometricConfirm)));
}

#[tokio::test(start_paused = true)]
async fn test_abort_during_window_discards_attempt() {
    let rig = rig();
    into_window(&rig, "5").await;
    rig.session
        .confirm_biometric_sample(face(ALICE_FACE))
        .await
        .unwrap();

    let update = rig.session.abort().await.unwrap();
    assert_eq!(update.state, PaymentState::Idle);
    assert!(update.attempt.is_none());

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(rig.session.current().state, PaymentState::Idle);
    assert_eq!(rig.sponsor.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_proximity_denial_stops_pipeline() {
    let rig = rig_with(
        FakeChecks {
            deny_proximity: true,
        },
        FakeSponsor::settling("tx"),
    );
    let update = into_window(&rig, "5").await;
    assert_eq!(update.state, PaymentState::Failed);
    assert_eq!(update.last_error(), Some(ErrorKind::ProximityFailed));
    assert_eq!(rig.recognizer.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_zero_amount_rejected_without_transition() {
    let rig = rig();
    rig.session
        .submit_recognition_sample(face(ALICE_FACE))
        .await
        .unwrap();
    rig.session.wait_quiescent(QUIET).await;

    let err = rig.session.submit_amount(Amount::ZERO).await.unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::InvalidAmount));
    assert_eq!(rig.session.current().state, PaymentState::Recognized);
}

#[tokio::test(start_paused = true)]
async fn test_silent_sponsor_leaves_unresolved_ledger_entry() {
    let rig = rig_with(FakeChecks::default(), FakeSponsor::hanging());
    into_window(&rig, "25").await;
    rig.session
        .confirm_biometric_sample(face(ALICE_FACE))
        .await
        .unwrap();

    let done = wait_terminal(&rig.session).await;
    assert_eq!(done.last_error(), Some(ErrorKind::TransferFailed));
    assert_eq!(rig.sponsor.calls.load(Ordering::SeqCst), 1);

    let open = rig.ledger.unresolved();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].outcome, AttemptOutcome::Unknown);
    assert_eq!(open[0].payer.as_str(), "0xA");
}

#[tokio::test(start_paused = true)]
async fn test_reset_then_next_customer() {
    let rig = rig();
    into_window(&rig, "1").await;
    let first = wait_terminal(&rig.session).await;
    assert_eq!(first.state, PaymentState::Failed);

    let ready = rig.session.reset().await.unwrap();
    assert_eq!(ready.state, PaymentState::Idle);
    assert_eq!(ready.message, READY_MESSAGE);

    let window = into_window(&rig, "2").await;
    assert_eq!(window.state, PaymentState::BiometricConfirm);
    assert_ne!(window.attempt.unwrap().id, first.attempt.unwrap().id);
}

#[derive(Default)]
struct RecordingObserver {
    events: Mutex<Vec<String>>,
}

impl RecordingObserver {
    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

impl SessionObserver for RecordingObserver {
    fn recognition_finished(&self, _attempt_id: AttemptId, verdict: RecognitionVerdict) {
        self.push(format!("recognition:{}", verdict.as_str()));
    }

    fn attempt_finished(&self, _attempt_id: AttemptId, state: PaymentState, error: Option<ErrorKind>) {
        self.push(format!("finished:{state}:{}", error.map(|k| k.as_str()).unwrap_or("-")));
    }

    fn transfer_finished(&self, _attempt_id: AttemptId, _elapsed: Duration, settled: bool) {
        self.push(format!("transfer:{settled}"));
    }
}

#[tokio::test(start_paused = true)]
async fn test_observer_sees_outcomes_replaced_by_reset() {
    let observer = Arc::new(RecordingObserver::default());
    let session = TerminalSession::new(
        SessionConfig::new(AccountAddress::new("0xMERCHANT").unwrap()),
        Arc::new(FakeRecognizer::new()),
        Arc::new(FakeChecks::default()),
        Arc::new(FakeCustody),
        Arc::new(FakeSponsor::settling("tx123")),
        Arc::new(InMemoryAttemptLedger::new()),
    )
    .with_observer(observer.clone())
    .spawn();

    session.submit_recognition_sample(face(STRANGER_FACE)).await.unwrap();
    wait_terminal(&session).await;
    session.reset().await.unwrap();

    session.submit_recognition_sample(face(ALICE_FACE)).await.unwrap();
    session.wait_quiescent(QUIET).await;
    session.submit_amount(Amount::parse("25.00").unwrap()).await.unwrap();
    session.wait_quiescent(QUIET).await;
    session.confirm_biometric_sample(face(ALICE_FACE)).await.unwrap();
    let done = wait_terminal(&session).await;
    assert_eq!(done.state, PaymentState::Settled);
    session.reset().await.unwrap();

    let events = observer.events.lock().unwrap().clone();
    assert_eq!(
        events,
        vec![
            "recognition:unmatched",
            "finished:failed:not_recognized",
            "recognition:matched",
            "transfer:true",
            "finished:settled:-",
        ]
    );
}

#[tokio::test]
async fn test_execute_transfer_refuses_second_claim() {
    let ledger = InMemoryAttemptLedger::new();
    let sponsor = FakeSponsor::settling("tx1");
    let order = TransferOrder {
        attempt_id: AttemptId::new(),
        payer: AccountAddress::new("0xA").unwrap(),
        payee: AccountAddress::new("0xMERCHANT").unwrap(),
        amount: Amount::parse("3").unwrap(),
        currency: Currency::Usdc,
    };

    let first = facepay::session::execute_transfer(
        order.clone(),
        &FakeCustody,
        &sponsor,
        &ledger,
        Duration::from_secs(5),
    )
    .await;
    assert!(first.is_ok());

    let second = facepay::session::execute_transfer(
        order,
        &FakeCustody,
        &sponsor,
        &ledger,
        Duration::from_secs(5),
    )
    .await;
    assert!(matches!(second, Err(TransferError::AlreadyInvoked(_))));
    assert_eq!(sponsor.calls.load(Ordering::SeqCst), 1);
}
