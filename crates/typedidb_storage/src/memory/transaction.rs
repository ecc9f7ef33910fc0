//! Transaction bookkeeping.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

use crate::engine::{Durability, TransactionMode, TransactionOutcome};
use crate::error::{StorageError, StorageResult};
use crate::request::Request;

use super::state::DatabaseState;

type FinishListener = Box<dyn FnOnce(&TransactionOutcome)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    /// Created, waiting for overlapping transactions to finish.
    Waiting,
    /// Holds a working copy and executes requests.
    Running,
    /// Committed or rolled back.
    Finished,
}

/// A queued request, type-erased.
pub(crate) trait Job {
    fn store(&self) -> &str;

    fn operation(&self) -> &'static str;

    /// Execute against the working copy.
    fn run(self: Box<Self>, state: &mut DatabaseState) -> Delivery;

    /// Settle with `Aborted` without running.
    fn cancel(self: Box<Self>);
}

/// The outcome of a job, waiting to be handed to its listeners.
pub(crate) struct Delivery {
    pub store: String,
    pub operation: &'static str,
    pub failure: Option<StorageError>,
    settle: Box<dyn FnOnce()>,
}

impl Delivery {
    pub fn deliver(self) {
        (self.settle)();
    }
}

type Body<T> = Box<dyn FnOnce(&mut DatabaseState) -> StorageResult<T>>;

pub(crate) struct Operation<T> {
    store: String,
    operation: &'static str,
    request: Request<T>,
    body: Body<T>,
}

impl<T: Clone + 'static> Operation<T> {
    pub fn new(
        store: &str,
        operation: &'static str,
        body: impl FnOnce(&mut DatabaseState) -> StorageResult<T> + 'static,
    ) -> (Self, Request<T>) {
        let request = Request::pending();
        let op = Self {
            store: store.to_string(),
            operation,
            request: request.clone(),
            body: Box::new(body),
        };
        (op, request)
    }
}

impl<T: Clone + 'static> Job for Operation<T> {
    fn store(&self) -> &str {
        &self.store
    }

    fn operation(&self) -> &'static str {
        self.operation
    }

    fn run(self: Box<Self>, state: &mut DatabaseState) -> Delivery {
        let Self {
            store,
            operation,
            request,
            body,
        } = *self;
        let outcome = body(state);
        Delivery {
            store,
            operation,
            failure: outcome.as_ref().err().cloned(),
            settle: Box::new(move || {
                request.settle(outcome);
            }),
        }
    }

    fn cancel(self: Box<Self>) {
        self.request.settle(Err(StorageError::Aborted));
    }
}

/// State shared by a transaction's handles and the engine.
pub(crate) struct TxnState {
    pub id: u64,
    pub db: String,
    pub connection: u64,
    pub mode: TransactionMode,
    pub durability: Durability,
    pub scope: RefCell<Vec<String>>,
    phase: Cell<Phase>,
    active: Cell<bool>,
    commit_requested: Cell<bool>,
    pending: Cell<usize>,
    queue: RefCell<VecDeque<Box<dyn Job>>>,
    pub working: RefCell<Option<DatabaseState>>,
    outcome: RefCell<Option<TransactionOutcome>>,
    listeners: RefCell<Vec<FinishListener>>,
}

impl TxnState {
    pub fn new(
        id: u64,
        db: &str,
        connection: u64,
        mode: TransactionMode,
        durability: Durability,
        scope: Vec<String>,
    ) -> Self {
        Self {
            id,
            db: db.to_string(),
            connection,
            mode,
            durability,
            scope: RefCell::new(scope),
            phase: Cell::new(Phase::Waiting),
            active: Cell::new(true),
            commit_requested: Cell::new(false),
            pending: Cell::new(0),
            queue: RefCell::new(VecDeque::new()),
            working: RefCell::new(None),
            outcome: RefCell::new(None),
            listeners: RefCell::new(Vec::new()),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase.get()
    }

    pub fn is_finished(&self) -> bool {
        self.phase.get() == Phase::Finished
    }

    pub fn is_active(&self) -> bool {
        self.active.get() && !self.is_finished()
    }

    pub fn set_active(&self, active: bool) {
        self.active.set(active);
    }

    pub fn commit_requested(&self) -> bool {
        self.commit_requested.get()
    }

    pub fn request_commit(&self) {
        self.commit_requested.set(true);
        self.active.set(false);
    }

    pub fn pending(&self) -> usize {
        self.pending.get()
    }

    /// Whether the transaction can commit: running, outside an active
    /// window and with nothing outstanding.
    pub fn is_idle(&self) -> bool {
        self.phase.get() == Phase::Running && !self.active.get() && self.pending() == 0
    }

    pub fn start(&self, working: DatabaseState) -> usize {
        *self.working.borrow_mut() = Some(working);
        self.phase.set(Phase::Running);
        self.queue.borrow().len()
    }

    pub fn push(&self, job: Box<dyn Job>) {
        self.queue.borrow_mut().push_back(job);
        self.pending.set(self.pending.get() + 1);
    }

    pub fn pop(&self) -> Option<Box<dyn Job>> {
        self.queue.borrow_mut().pop_front()
    }

    /// Mark one request as delivered.
    pub fn delivered(&self) {
        self.pending.set(self.pending.get().saturating_sub(1));
    }

    pub fn in_scope(&self, store: &str) -> bool {
        self.mode == TransactionMode::VersionChange
            || self.scope.borrow().iter().any(|name| name == store)
    }

    /// Whether two unfinished transactions must not run at the same time.
    pub fn conflicts_with(&self, other: &TxnState) -> bool {
        if self.db != other.db || !(self.mode.is_write() || other.mode.is_write()) {
            return false;
        }
        if self.mode == TransactionMode::VersionChange
            || other.mode == TransactionMode::VersionChange
        {
            return true;
        }
        let theirs = other.scope.borrow();
        self.scope.borrow().iter().any(|name| theirs.contains(name))
    }

    /// Mark the transaction finished and hand back what still needs
    /// delivering: queued jobs to cancel and the finish listeners.
    pub fn finish(&self, outcome: TransactionOutcome) -> (Vec<Box<dyn Job>>, Vec<FinishListener>) {
        self.phase.set(Phase::Finished);
        self.active.set(false);
        self.pending.set(0);
        *self.working.borrow_mut() = None;
        *self.outcome.borrow_mut() = Some(outcome);
        let jobs = self.queue.borrow_mut().drain(..).collect();
        let listeners = std::mem::take(&mut *self.listeners.borrow_mut());
        (jobs, listeners)
    }

    pub fn outcome(&self) -> Option<TransactionOutcome> {
        self.outcome.borrow().clone()
    }

    pub fn add_listener(&self, listener: FinishListener) {
        if !self.is_finished() {
            self.listeners.borrow_mut().push(listener);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn txn(mode: TransactionMode, scope: &[&str]) -> TxnState {
        TxnState::new(
            1,
            "db",
            1,
            mode,
            Durability::Default,
            scope.iter().map(|s| (*s).to_string()).collect(),
        )
    }

    #[test]
    fn readers_never_conflict() {
        let a = txn(TransactionMode::ReadOnly, &["s"]);
        let b = txn(TransactionMode::ReadOnly, &["s"]);
        assert!(!a.conflicts_with(&b));
    }

    #[test]
    fn writers_conflict_on_overlap_only() {
        let a = txn(TransactionMode::ReadWrite, &["s", "t"]);
        let b = txn(TransactionMode::ReadOnly, &["t"]);
        let c = txn(TransactionMode::ReadWrite, &["u"]);
        assert!(a.conflicts_with(&b));
        assert!(!a.conflicts_with(&c));
    }

    #[test]
    fn finishing_cancels_queued_jobs() {
        let state = txn(TransactionMode::ReadWrite, &["s"]);
        let (op, request) = Operation::new("s", "count", |_| Ok(0_u64));
        state.push(Box::new(op));
        assert_eq!(state.pending(), 1);

        let (jobs, _) = state.finish(TransactionOutcome::Aborted);
        for job in jobs {
            job.cancel();
        }
        assert_eq!(request.outcome(), Some(Err(StorageError::Aborted)));
        assert!(state.is_finished());
        assert_eq!(state.pending(), 0);
    }
}
