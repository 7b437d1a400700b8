//! Common utilities for txgroup integration tests.
#![allow(dead_code)]

use ahash::AHashMap as HashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use txgroup::prelude::*;

// --- MockTxManager ---

/// What happened to one nested transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxEvent {
    Begin(u64),
    Commit(u64),
    Rollback(u64),
}

/// A transaction manager that records every begin, commit and rollback.
#[derive(Default)]
pub struct MockTxManager {
    next_id: AtomicU64,
    events: Mutex<Vec<TxEvent>>,
    fail_begin: AtomicBool,
    fail_commit: AtomicBool,
}

impl MockTxManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_begin(&self, fail: bool) {
        self.fail_begin.store(fail, Ordering::SeqCst);
    }

    pub fn fail_commit(&self, fail: bool) {
        self.fail_commit.store(fail, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<TxEvent> {
        self.events.lock().clone()
    }

    pub fn begins(&self) -> usize {
        self.count(|e| matches!(e, TxEvent::Begin(_)))
    }

    pub fn commits(&self) -> usize {
        self.count(|e| matches!(e, TxEvent::Commit(_)))
    }

    pub fn rollbacks(&self) -> usize {
        self.count(|e| matches!(e, TxEvent::Rollback(_)))
    }

    /// Per begun transaction: (commits, rollbacks).
    pub fn outcomes(&self) -> HashMap<u64, (usize, usize)> {
        let mut outcomes: HashMap<u64, (usize, usize)> = HashMap::new();
        for event in self.events() {
            match event {
                TxEvent::Begin(id) => {
                    outcomes.entry(id).or_default();
                }
                TxEvent::Commit(id) => outcomes.entry(id).or_default().0 += 1,
                TxEvent::Rollback(id) => outcomes.entry(id).or_default().1 += 1,
            }
        }
        outcomes
    }

    fn count<F: Fn(&TxEvent) -> bool>(&self, f: F) -> usize {
        self.events.lock().iter().filter(|e| f(e)).count()
    }
}

impl LocalTransactionManager for MockTxManager {
    fn begin_nested(&self) -> Result<TxStatus> {
        if self.fail_begin.load(Ordering::SeqCst) {
            return Err(TxError::LocalTransaction("begin refused".to_string()));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.events.lock().push(TxEvent::Begin(id));
        Ok(TxStatus::new(id))
    }

    fn commit(&self, status: &TxStatus) -> Result<()> {
        if self.fail_commit.load(Ordering::SeqCst) {
            return Err(TxError::LocalTransaction("commit refused".to_string()));
        }
        self.events.lock().push(TxEvent::Commit(status.id()));
        Ok(())
    }

    fn rollback(&self, status: &TxStatus) -> Result<()> {
        self.events.lock().push(TxEvent::Rollback(status.id()));
        Ok(())
    }
}

// --- MockCoordinator ---

/// How the mock answers `add_participant`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Accept,
    NotFound,
    Unreachable,
}

/// A close request as the coordinator saw it.
#[derive(Debug, Clone)]
pub struct CloseRequest {
    pub group_id: String,
    pub eligible_when_requested: bool,
    pub at: Instant,
}

/// A coordinator that answers from a script and, when a group is closed,
/// delivers one decision to every participant of that group after a delay.
pub struct MockCoordinator {
    wait_time: Duration,
    service: Mutex<Option<Weak<ParticipantService>>>,
    registration: Mutex<Registration>,
    accept_reports: AtomicBool,
    panic_on_report: AtomicBool,
    close_reply: Mutex<Option<(Duration, Decision)>>,
    participants: Mutex<Vec<(String, String)>>,
    reports: Mutex<Vec<(String, bool)>>,
    close_requests: Mutex<Vec<CloseRequest>>,
}

impl MockCoordinator {
    pub fn new(wait_time: Duration) -> Self {
        Self {
            wait_time,
            service: Mutex::new(None),
            registration: Mutex::new(Registration::Accept),
            accept_reports: AtomicBool::new(true),
            panic_on_report: AtomicBool::new(false),
            close_reply: Mutex::new(None),
            participants: Mutex::new(Vec::new()),
            reports: Mutex::new(Vec::new()),
            close_requests: Mutex::new(Vec::new()),
        }
    }

    /// Connects the mock to the service it delivers decisions to.
    pub fn attach(&self, service: &Arc<ParticipantService>) {
        *self.service.lock() = Some(Arc::downgrade(service));
    }

    pub fn set_registration(&self, registration: Registration) {
        *self.registration.lock() = registration;
    }

    pub fn accept_reports(&self, accept: bool) {
        self.accept_reports.store(accept, Ordering::SeqCst);
    }

    /// Makes `report_outcome` panic, as a broken transport would.
    pub fn panic_on_report(&self, panic: bool) {
        self.panic_on_report.store(panic, Ordering::SeqCst);
    }

    /// Reply with `decision`, `delay` after a close request. `None` never replies.
    pub fn reply_on_close(&self, reply: Option<(Duration, Decision)>) {
        *self.close_reply.lock() = reply;
    }

    pub fn participants_of(&self, group_id: &str) -> Vec<String> {
        self.participants
            .lock()
            .iter()
            .filter(|(group, _)| group == group_id)
            .map(|(_, participant)| participant.clone())
            .collect()
    }

    pub fn all_participants(&self) -> Vec<String> {
        self.participants
            .lock()
            .iter()
            .map(|(_, participant)| participant.clone())
            .collect()
    }

    pub fn reports(&self) -> Vec<(String, bool)> {
        self.reports.lock().clone()
    }

    pub fn close_requests(&self) -> Vec<CloseRequest> {
        self.close_requests.lock().clone()
    }

    /// Delivers `decision` to every participant of `group_id`.
    pub fn decide(&self, group_id: &str, decision: Decision) -> usize {
        let Some(service) = self.service.lock().as_ref().and_then(Weak::upgrade) else {
            return 0;
        };
        self.participants_of(group_id)
            .iter()
            .filter(|participant| {
                service
                    .deliver_decision_code(participant, decision.code())
                    .unwrap_or(false)
            })
            .count()
    }
}

impl GroupCoordinator for MockCoordinator {
    fn add_participant(
        &self,
        group_id: &str,
        participant_id: &str,
    ) -> Result<Option<TransactionGroup>> {
        match *self.registration.lock() {
            Registration::Accept => {}
            Registration::NotFound => return Ok(None),
            Registration::Unreachable => {
                return Err(TxError::Other("connection refused".to_string()));
            }
        }
        self.participants
            .lock()
            .push((group_id.to_string(), participant_id.to_string()));
        Ok(Some(TransactionGroup::new(
            group_id,
            participant_id,
            self.wait_time,
        )))
    }

    fn report_outcome(&self, _group_id: &str, participant_id: &str, succeeded: bool) -> bool {
        if self.panic_on_report.load(Ordering::SeqCst) {
            panic!("report transport failed");
        }
        self.reports
            .lock()
            .push((participant_id.to_string(), succeeded));
        self.accept_reports.load(Ordering::SeqCst)
    }

    fn request_group_close(&self, group_id: &str, eligible: Arc<AwaitFlag>) {
        self.close_requests.lock().push(CloseRequest {
            group_id: group_id.to_string(),
            eligible_when_requested: eligible.is_done(),
            at: Instant::now(),
        });

        let Some((delay, decision)) = *self.close_reply.lock() else {
            return;
        };
        let Some(service) = self.service.lock().as_ref().and_then(Weak::upgrade) else {
            return;
        };
        let participants = self.participants_of(group_id);
        thread::spawn(move || {
            thread::sleep(delay);
            for participant in participants {
                let _ = service.deliver_decision(&participant, decision);
            }
        });
    }
}

// --- MockSession ---

#[derive(Default)]
pub struct MockSession {
    restarts: AtomicUsize,
}

impl MockSession {
    pub fn restarts(&self) -> usize {
        self.restarts.load(Ordering::SeqCst)
    }
}

impl NetworkSession for MockSession {
    fn restart(&self) {
        self.restarts.fetch_add(1, Ordering::SeqCst);
    }
}

// --- Helper Functions ---

pub struct Harness {
    pub service: Arc<ParticipantService>,
    pub tx_manager: Arc<MockTxManager>,
    pub coordinator: Arc<MockCoordinator>,
    pub session: Arc<MockSession>,
}

/// Builds a service wired to fresh mocks, with groups waiting `wait_time`
/// for their decision.
pub fn setup(wait_time: Duration) -> Harness {
    setup_with_config(wait_time, ParticipantConfig::default())
}

pub fn setup_with_config(wait_time: Duration, config: ParticipantConfig) -> Harness {
    let tx_manager = Arc::new(MockTxManager::new());
    let coordinator = Arc::new(MockCoordinator::new(wait_time));
    let session = Arc::new(MockSession::default());
    let service = Arc::new(
        ParticipantService::new(
            tx_manager.clone(),
            coordinator.clone(),
            session.clone(),
            config,
        )
        .unwrap(),
    );
    coordinator.attach(&service);

    Harness {
        service,
        tx_manager,
        coordinator,
        session,
    }
}

/// Helper function to wait for a condition with timeout
pub fn wait_for_condition<F>(condition: F, timeout_ms: u64) -> bool
where
    F: Fn() -> bool,
{
    let start = Instant::now();
    let timeout = Duration::from_millis(timeout_ms);
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// A business failure with a recognizable message.
pub fn business_error(message: &str) -> BoxError {
    Box::new(std::io::Error::other(message.to_string()))
}
