//! In-memory storage engine.
//!
//! [`InMemoryEngine`] runs the IndexedDB processing model on a private
//! event loop: every engine event (a request completing, a transaction
//! finishing, an upgrade or blocked notification) is a task, and one task
//! is one turn. Between turns the engine deactivates transactions, commits
//! the ones with nothing outstanding and starts the ones that were waiting
//! on an overlapping scope.
//!
//! Nothing runs until the loop is driven with [`InMemoryEngine::block_on`],
//! [`InMemoryEngine::step`] or [`InMemoryEngine::run_until_idle`].
//!
//! ```
//! use typedidb_storage::{InMemoryEngine, StorageEngine};
//!
//! let engine = InMemoryEngine::new();
//! let open = engine.open("notes", Some(1));
//! engine.run_until_idle();
//! let connection = open.result().outcome().unwrap().unwrap();
//! assert_eq!(connection.version(), 1);
//! ```

mod handles;
mod lifecycle;
mod snapshot;
mod state;
mod transaction;

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::future::Future;
use std::pin::pin;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};

use serde::Serialize;
use tracing::{debug, trace};

use crate::engine::{
    DatabaseInfo, DeleteRequest, OpenRequest, StorageEngine, TransactionMode, TransactionOutcome,
};
use crate::error::{StorageError, StorageResult};
use crate::key_path::KeyPathSpec;
use crate::request::Request;

use lifecycle::{ConnState, PendingOp};
use state::DatabaseState;
use transaction::{Job, Phase, TxnState};

pub use snapshot::SNAPSHOT_FORMAT_VERSION;

type Task = Box<dyn FnOnce(&Rc<EngineInner>)>;

/// Something observable the engine did, recorded when the event log is on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// An open reached the front of its database's queue.
    OpenStarted {
        /// Database name.
        name: String,
        /// Version asked for.
        version: Option<u64>,
    },
    /// Open connections were asked to close.
    VersionChangeSent {
        /// Database name.
        name: String,
        /// Connection that was notified.
        connection: u64,
    },
    /// An open or delete was blocked by connections that stayed open.
    Blocked {
        /// Database name.
        name: String,
    },
    /// An upgrade transaction began.
    UpgradeStarted {
        /// Database name.
        name: String,
        /// Version before.
        old_version: u64,
        /// Version after.
        new_version: u64,
    },
    /// A connection was handed out.
    Opened {
        /// Database name.
        name: String,
        /// Connection version.
        version: u64,
        /// Connection id.
        connection: u64,
    },
    /// A connection finished closing.
    ConnectionClosed {
        /// Database name.
        name: String,
        /// Connection id.
        connection: u64,
    },
    /// A database was removed.
    DatabaseDeleted {
        /// Database name.
        name: String,
    },
    /// A transaction was created.
    TransactionCreated {
        /// Transaction id.
        id: u64,
        /// Access mode.
        mode: TransactionMode,
        /// Stores in scope.
        stores: Vec<String>,
    },
    /// A transaction acquired its scope.
    TransactionStarted {
        /// Transaction id.
        id: u64,
    },
    /// A request was queued.
    RequestIssued {
        /// Owning transaction.
        transaction: u64,
        /// Target store.
        store: String,
        /// Operation name.
        operation: &'static str,
    },
    /// A request's listeners were called.
    RequestSettled {
        /// Owning transaction.
        transaction: u64,
        /// Target store.
        store: String,
        /// Operation name.
        operation: &'static str,
        /// Whether it succeeded.
        ok: bool,
    },
    /// A transaction committed or rolled back.
    TransactionFinished {
        /// Transaction id.
        id: u64,
        /// How it ended.
        outcome: TransactionOutcome,
    },
}

#[derive(Debug, Default)]
struct Faults {
    stores: BTreeSet<(String, String)>,
    indexes: BTreeSet<(String, String, String)>,
    commits: BTreeSet<String>,
}

/// Shared engine state. Handles keep a weak reference to it.
pub(crate) struct EngineInner {
    tasks: RefCell<VecDeque<Task>>,
    databases: RefCell<BTreeMap<String, DatabaseState>>,
    connections: RefCell<Vec<Rc<ConnState>>>,
    transactions: RefCell<Vec<Rc<TxnState>>>,
    lifecycle: RefCell<BTreeMap<String, VecDeque<Rc<PendingOp>>>>,
    faults: RefCell<Faults>,
    events: RefCell<Option<Vec<EngineEvent>>>,
    next_id: Cell<u64>,
}

impl EngineInner {
    fn new(databases: BTreeMap<String, DatabaseState>) -> Self {
        Self {
            tasks: RefCell::new(VecDeque::new()),
            databases: RefCell::new(databases),
            connections: RefCell::new(Vec::new()),
            transactions: RefCell::new(Vec::new()),
            lifecycle: RefCell::new(BTreeMap::new()),
            faults: RefCell::new(Faults::default()),
            events: RefCell::new(None),
            next_id: Cell::new(0),
        }
    }

    pub(crate) fn allocate_id(&self) -> u64 {
        let id = self.next_id.get() + 1;
        self.next_id.set(id);
        id
    }

    pub(crate) fn schedule(&self, task: impl FnOnce(&Rc<EngineInner>) + 'static) {
        self.tasks.borrow_mut().push_back(Box::new(task));
    }

    pub(crate) fn record(&self, event: EngineEvent) {
        trace!(?event, "engine event");
        if let Some(events) = self.events.borrow_mut().as_mut() {
            events.push(event);
        }
    }

    /// Run one task and settle the turn. Returns `false` when idle.
    fn step(self: &Rc<Self>) -> bool {
        let task = self.tasks.borrow_mut().pop_front();
        match task {
            Some(task) => {
                task(self);
                self.settle_turn();
                true
            }
            None => {
                self.settle_turn();
                !self.tasks.borrow().is_empty()
            }
        }
    }

    /// End of a turn: no transaction stays active, idle ones commit, waiting
    /// ones start when their scope frees up.
    fn settle_turn(self: &Rc<Self>) {
        for txn in self.transactions.borrow().iter() {
            txn.set_active(false);
        }
        loop {
            let mut changed = self.commit_idle();
            changed |= self.start_waiting();
            self.transactions.borrow_mut().retain(|txn| !txn.is_finished());
            changed |= self.close_idle_connections();
            changed |= self.resume_parked();
            if !changed {
                break;
            }
        }
    }

    fn live_transactions(&self) -> Vec<Rc<TxnState>> {
        self.transactions.borrow().clone()
    }

    pub(crate) fn register_transaction(&self, txn: &Rc<TxnState>) {
        self.record(EngineEvent::TransactionCreated {
            id: txn.id,
            mode: txn.mode,
            stores: txn.scope.borrow().clone(),
        });
        self.transactions.borrow_mut().push(Rc::clone(txn));
    }

    fn commit_idle(self: &Rc<Self>) -> bool {
        let mut changed = false;
        for txn in self.live_transactions() {
            if txn.is_idle() {
                self.commit(&txn);
                changed = true;
            }
        }
        changed
    }

    fn start_waiting(self: &Rc<Self>) -> bool {
        let live = self.live_transactions();
        let mut changed = false;
        for (position, txn) in live.iter().enumerate() {
            if txn.phase() != Phase::Waiting {
                continue;
            }
            let blocked = live[..position]
                .iter()
                .any(|earlier| !earlier.is_finished() && earlier.conflicts_with(txn));
            if blocked {
                continue;
            }
            changed = true;

            let working = {
                let databases = self.databases.borrow();
                databases.get(&txn.db).map(|db| {
                    let mut working = DatabaseState::new(db.version);
                    for name in txn.scope.borrow().iter() {
                        if let Some(store) = db.stores.get(name) {
                            working.stores.insert(name.clone(), store.clone());
                        }
                    }
                    working
                })
            };
            let Some(working) = working else {
                self.finish(
                    txn,
                    TransactionOutcome::Failed(StorageError::invalid_state("database no longer exists")),
                );
                continue;
            };
            let queued = txn.start(working);
            self.record(EngineEvent::TransactionStarted { id: txn.id });
            for _ in 0..queued {
                let txn = Rc::clone(txn);
                self.schedule(move |engine| engine.run_next(&txn));
            }
        }
        changed
    }

    /// Check that a request may be issued against `txn` right now.
    pub(crate) fn check_request(&self, txn: &TxnState, write: bool) -> StorageResult<()> {
        if !txn.is_active() {
            return Err(StorageError::TransactionInactive);
        }
        if write && txn.mode == TransactionMode::ReadOnly {
            return Err(StorageError::ReadOnly);
        }
        Ok(())
    }

    /// Queue a checked request.
    pub(crate) fn enqueue(&self, txn: &Rc<TxnState>, job: Box<dyn Job>) {
        self.record(EngineEvent::RequestIssued {
            transaction: txn.id,
            store: job.store().to_string(),
            operation: job.operation(),
        });
        txn.push(job);
        if txn.phase() == Phase::Running {
            let txn = Rc::clone(txn);
            self.schedule(move |engine| engine.run_next(&txn));
        }
    }

    fn run_next(self: &Rc<Self>, txn: &Rc<TxnState>) {
        if txn.is_finished() {
            return;
        }
        let Some(job) = txn.pop() else {
            return;
        };
        let delivery = {
            let mut working = txn.working.borrow_mut();
            match working.as_mut() {
                Some(state) => job.run(state),
                None => {
                    job.cancel();
                    return;
                }
            }
        };

        self.record(EngineEvent::RequestSettled {
            transaction: txn.id,
            store: delivery.store.clone(),
            operation: delivery.operation,
            ok: delivery.failure.is_none(),
        });
        txn.set_active(!txn.commit_requested());
        txn.delivered();
        let failure = delivery.failure.clone();
        delivery.deliver();
        txn.set_active(false);

        if let Some(err) = failure {
            if !txn.is_finished() {
                debug!(transaction = txn.id, error = %err, "request failed, aborting transaction");
                self.finish(txn, TransactionOutcome::Failed(err));
            }
        }
    }

    fn commit(self: &Rc<Self>, txn: &Rc<TxnState>) {
        let Some(working) = txn.working.borrow_mut().take() else {
            return;
        };
        let faulted = self.faults.borrow_mut().commits.remove(&txn.db);
        if faulted {
            self.finish(
                txn,
                TransactionOutcome::Failed(StorageError::unknown("injected commit failure")),
            );
            return;
        }
        {
            let mut databases = self.databases.borrow_mut();
            if txn.mode == TransactionMode::VersionChange {
                databases.insert(txn.db.clone(), working);
            } else if txn.mode.is_write() {
                if let Some(db) = databases.get_mut(&txn.db) {
                    for (name, store) in working.stores {
                        db.stores.insert(name, store);
                    }
                }
            }
        }
        self.finish(txn, TransactionOutcome::Committed);
    }

    /// Finish `txn` now; cancellations and listeners run as the next task.
    pub(crate) fn finish(&self, txn: &Rc<TxnState>, outcome: TransactionOutcome) {
        if txn.is_finished() {
            return;
        }
        debug!(transaction = txn.id, ?outcome, "transaction finished");
        self.record(EngineEvent::TransactionFinished {
            id: txn.id,
            outcome: outcome.clone(),
        });
        let (jobs, listeners) = txn.finish(outcome.clone());
        self.schedule(move |_| {
            for job in jobs {
                job.cancel();
            }
            for listener in listeners {
                listener(&outcome);
            }
        });
    }

    pub(crate) fn store_fault(&self, db: &str, store: &str) -> bool {
        self.faults
            .borrow()
            .stores
            .contains(&(db.to_string(), store.to_string()))
    }

    pub(crate) fn index_fault(&self, db: &str, store: &str, index: &str) -> bool {
        self.faults.borrow().indexes.contains(&(
            db.to_string(),
            store.to_string(),
            index.to_string(),
        ))
    }

    pub(crate) fn with_database<R>(&self, name: &str, f: impl FnOnce(&DatabaseState) -> R) -> Option<R> {
        self.databases.borrow().get(name).map(f)
    }
}

struct WakeFlag(AtomicBool);

impl Wake for WakeFlag {
    fn wake(self: Arc<Self>) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Description of one index, for inspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexDescription {
    /// Index name.
    pub name: String,
    /// Extracted key path.
    pub key_path: KeyPathSpec,
    /// Unique flag.
    pub unique: bool,
    /// Multi-entry flag.
    pub multi_entry: bool,
}

/// Description of one store, for inspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreDescription {
    /// Store name.
    pub name: String,
    /// Inline key path.
    pub key_path: Option<KeyPathSpec>,
    /// Whether keys are generated.
    pub auto_increment: bool,
    /// Number of records.
    pub record_count: usize,
    /// Indexes, sorted by name.
    pub indexes: Vec<IndexDescription>,
}

/// Description of a committed database, for inspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseDescription {
    /// Database name.
    pub name: String,
    /// Current version.
    pub version: u64,
    /// Stores, sorted by name.
    pub stores: Vec<StoreDescription>,
}

/// An in-memory [`StorageEngine`] with its own event loop.
///
/// Clones share the same engine.
#[derive(Clone)]
pub struct InMemoryEngine {
    inner: Rc<EngineInner>,
}

impl InMemoryEngine {
    /// Create an empty engine.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(EngineInner::new(BTreeMap::new())),
        }
    }

    /// Record [`EngineEvent`]s from now on.
    #[must_use]
    pub fn with_event_log(self) -> Self {
        *self.inner.events.borrow_mut() = Some(Vec::new());
        self
    }

    /// Events recorded so far.
    #[must_use]
    pub fn events(&self) -> Vec<EngineEvent> {
        self.inner.events.borrow().clone().unwrap_or_default()
    }

    /// Forget recorded events.
    pub fn clear_events(&self) {
        if let Some(events) = self.inner.events.borrow_mut().as_mut() {
            events.clear();
        }
    }

    /// Make looking up `store` in an upgrade of `db` fail with an engine
    /// error instead of succeeding or reporting "not found".
    pub fn fail_store_introspection(&self, db: &str, store: &str) {
        self.inner
            .faults
            .borrow_mut()
            .stores
            .insert((db.to_string(), store.to_string()));
    }

    /// Make looking up `index` on `store` of `db` fail with an engine error.
    pub fn fail_index_introspection(&self, db: &str, store: &str, index: &str) {
        self.inner.faults.borrow_mut().indexes.insert((
            db.to_string(),
            store.to_string(),
            index.to_string(),
        ));
    }

    /// Make the next commit on `db` fail.
    pub fn fail_next_commit(&self, db: &str) {
        self.inner.faults.borrow_mut().commits.insert(db.to_string());
    }

    /// Remove every injected fault.
    pub fn clear_faults(&self) {
        *self.inner.faults.borrow_mut() = Faults::default();
    }

    /// Run one task. Returns `false` when there was nothing to run.
    pub fn step(&self) -> bool {
        self.inner.step()
    }

    /// Run tasks until none are left.
    pub fn run_until_idle(&self) {
        while self.inner.step() {}
    }

    /// Whether no task is queued.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.inner.tasks.borrow().is_empty()
    }

    /// Drive the event loop until `future` completes.
    ///
    /// The future is polled whenever it has been woken; otherwise the next
    /// engine task runs.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Stalled`] if the loop runs out of tasks while
    /// the future is still pending.
    pub fn block_on<F: Future>(&self, future: F) -> StorageResult<F::Output> {
        let flag = Arc::new(WakeFlag(AtomicBool::new(true)));
        let waker = Waker::from(Arc::clone(&flag));
        let mut context = Context::from_waker(&waker);
        let mut future = pin!(future);

        loop {
            if flag.0.swap(false, Ordering::SeqCst) {
                // A ready future's turn stays open until the loop is driven
                // again, so transactions it created are still usable.
                if let Poll::Ready(output) = future.as_mut().poll(&mut context) {
                    return Ok(output);
                }
                self.inner.settle_turn();
                continue;
            }
            if !self.inner.step() {
                return Err(StorageError::Stalled);
            }
        }
    }

    /// Close every connection to `db` without waiting for its transactions,
    /// which are aborted. Connections get their close notification.
    pub fn force_close(&self, db: &str) {
        self.inner.force_close(db);
    }

    /// Names of committed databases, sorted.
    #[must_use]
    pub fn database_names(&self) -> Vec<String> {
        self.inner.databases.borrow().keys().cloned().collect()
    }

    /// Describe the committed state of `db`.
    #[must_use]
    pub fn describe(&self, db: &str) -> Option<DatabaseDescription> {
        self.inner.with_database(db, |state| DatabaseDescription {
            name: db.to_string(),
            version: state.version,
            stores: state
                .stores
                .iter()
                .map(|(name, store)| StoreDescription {
                    name: name.clone(),
                    key_path: store.key_path.clone(),
                    auto_increment: store.auto_increment,
                    record_count: store.records.len(),
                    indexes: store
                        .indexes
                        .iter()
                        .map(|(name, index)| IndexDescription {
                            name: name.clone(),
                            key_path: index.key_path.clone(),
                            unique: index.unique,
                            multi_entry: index.multi_entry,
                        })
                        .collect(),
                })
                .collect(),
        })
    }

    /// Serialize every committed database.
    #[must_use]
    pub fn snapshot(&self) -> Vec<u8> {
        snapshot::encode(&self.inner.databases.borrow())
    }

    /// Create an engine holding the databases of a snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Data`] if the snapshot is malformed.
    pub fn from_snapshot(bytes: &[u8]) -> StorageResult<Self> {
        let databases = snapshot::decode(bytes)?;
        Ok(Self {
            inner: Rc::new(EngineInner::new(databases)),
        })
    }
}

impl Default for InMemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryEngine")
            .field("databases", &self.database_names())
            .field("queued_tasks", &self.inner.tasks.borrow().len())
            .finish()
    }
}

impl StorageEngine for InMemoryEngine {
    fn open(&self, name: &str, version: Option<u64>) -> OpenRequest {
        let request = OpenRequest::new();
        self.inner.queue_op(name, PendingOp::open(request.clone(), version));
        request
    }

    fn delete_database(&self, name: &str) -> DeleteRequest {
        let request = DeleteRequest::new();
        self.inner.queue_op(name, PendingOp::delete(request.clone()));
        request
    }

    fn databases(&self) -> Request<Vec<DatabaseInfo>> {
        let request = Request::pending();
        let target = request.clone();
        self.inner.schedule(move |engine| {
            let list = engine
                .databases
                .borrow()
                .iter()
                .map(|(name, db)| DatabaseInfo {
                    name: name.clone(),
                    version: db.version,
                })
                .collect();
            target.settle(Ok(list));
        });
        request
    }
}
