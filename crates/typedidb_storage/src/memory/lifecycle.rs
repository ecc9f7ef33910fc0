//! Connections, opening, upgrading and deleting databases.
//!
//! Opens and deletes of one database name are processed strictly in the
//! order they were requested. An operation that needs the database to
//! itself (an upgrade or a delete) first sends a versionchange notification
//! to every open connection, reports `blocked` if any of them does not start
//! closing, and then parks until they are all closed.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tracing::debug;

use crate::engine::{
    Connection, DeleteRequest, Durability, OpenRequest, TransactionMode, TransactionOutcome,
    VersionChange,
};
use crate::error::StorageError;

use super::handles::{MemoryConnection, MemoryUpgrade};
use super::state::DatabaseState;
use super::transaction::TxnState;
use super::{EngineEvent, EngineInner};

type VersionChangeListener = Box<dyn FnMut(&VersionChange)>;

/// One connection's state.
pub(crate) struct ConnState {
    pub id: u64,
    pub db: String,
    pub version: u64,
    close_pending: Cell<bool>,
    closed: Cell<bool>,
    version_change: RefCell<Vec<VersionChangeListener>>,
    close_listeners: RefCell<Vec<Box<dyn FnOnce()>>>,
}

impl ConnState {
    fn new(id: u64, db: &str, version: u64) -> Self {
        Self {
            id,
            db: db.to_string(),
            version,
            close_pending: Cell::new(false),
            closed: Cell::new(false),
            version_change: RefCell::new(Vec::new()),
            close_listeners: RefCell::new(Vec::new()),
        }
    }

    /// Closing or closed.
    pub fn is_closing(&self) -> bool {
        self.close_pending.get() || self.closed.get()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }

    fn mark_closed(&self) {
        self.close_pending.set(true);
        self.closed.set(true);
    }

    pub fn add_version_change_listener(&self, listener: VersionChangeListener) {
        self.version_change.borrow_mut().push(listener);
    }

    pub fn add_close_listener(&self, listener: Box<dyn FnOnce()>) {
        if !self.is_closed() {
            self.close_listeners.borrow_mut().push(listener);
        }
    }

    fn fire_version_change(&self, change: &VersionChange) {
        let mut listeners = std::mem::take(&mut *self.version_change.borrow_mut());
        for listener in &mut listeners {
            listener(change);
        }
        let mut slot = self.version_change.borrow_mut();
        listeners.append(&mut slot);
        *slot = listeners;
    }
}

enum OpKind {
    Open {
        request: OpenRequest,
        version: Option<u64>,
    },
    Delete {
        request: DeleteRequest,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpPhase {
    Queued,
    Running,
    Blocked(VersionChange),
}

/// A queued open or delete.
pub(crate) struct PendingOp {
    kind: OpKind,
    phase: Cell<OpPhase>,
}

impl PendingOp {
    pub fn open(request: OpenRequest, version: Option<u64>) -> Self {
        Self {
            kind: OpKind::Open { request, version },
            phase: Cell::new(OpPhase::Queued),
        }
    }

    pub fn delete(request: DeleteRequest) -> Self {
        Self {
            kind: OpKind::Delete { request },
            phase: Cell::new(OpPhase::Queued),
        }
    }

    fn fire_blocked(&self, change: &VersionChange) {
        match &self.kind {
            OpKind::Open { request, .. } => request.fire_blocked(change),
            OpKind::Delete { request } => request.fire_blocked(change),
        }
    }
}

impl EngineInner {
    pub(crate) fn queue_op(&self, name: &str, op: PendingOp) {
        let first = {
            let mut lifecycle = self.lifecycle.borrow_mut();
            let queue = lifecycle.entry(name.to_string()).or_default();
            queue.push_back(Rc::new(op));
            queue.len() == 1
        };
        if first {
            let name = name.to_string();
            self.schedule(move |engine| engine.process_front(&name));
        }
    }

    fn front_op(&self, name: &str) -> Option<Rc<PendingOp>> {
        self.lifecycle
            .borrow()
            .get(name)
            .and_then(|queue| queue.front().cloned())
    }

    fn finish_op(&self, name: &str) {
        let more = {
            let mut lifecycle = self.lifecycle.borrow_mut();
            match lifecycle.get_mut(name) {
                Some(queue) => {
                    queue.pop_front();
                    if queue.is_empty() {
                        lifecycle.remove(name);
                        false
                    } else {
                        true
                    }
                }
                None => false,
            }
        };
        if more {
            let name = name.to_string();
            self.schedule(move |engine| engine.process_front(&name));
        }
    }

    fn process_front(self: &Rc<Self>, name: &str) {
        let Some(op) = self.front_op(name) else {
            return;
        };
        op.phase.set(OpPhase::Running);
        match &op.kind {
            OpKind::Open { request, version } => self.process_open(name, &op, request, *version),
            OpKind::Delete { request } => self.process_delete(name, &op, request),
        }
    }

    fn process_open(
        self: &Rc<Self>,
        name: &str,
        op: &Rc<PendingOp>,
        request: &OpenRequest,
        version: Option<u64>,
    ) {
        self.record(EngineEvent::OpenStarted {
            name: name.to_string(),
            version,
        });
        let current = self.with_database(name, |db| db.version);
        let requested = match version {
            Some(0) => {
                request
                    .result()
                    .settle(Err(StorageError::invalid_access("version must be at least 1")));
                self.finish_op(name);
                return;
            }
            Some(version) => version,
            None => current.unwrap_or(1),
        };

        if let Some(current) = current {
            if requested < current {
                request
                    .result()
                    .settle(Err(StorageError::Version { requested, current }));
                self.finish_op(name);
                return;
            }
            if requested == current {
                let conn = self.connect(name, current);
                self.record(EngineEvent::Opened {
                    name: name.to_string(),
                    version: current,
                    connection: conn.id,
                });
                let connection: Rc<dyn Connection> = Rc::new(MemoryConnection::new(self, conn));
                request.result().settle(Ok(connection));
                self.finish_op(name);
                return;
            }
        }

        let change = VersionChange {
            old_version: current.unwrap_or(0),
            new_version: Some(requested),
        };
        if !self.notify_or_park(name, op, change) {
            self.run_upgrade(name, request, change);
        }
    }

    fn process_delete(self: &Rc<Self>, name: &str, op: &Rc<PendingOp>, request: &DeleteRequest) {
        let Some(old_version) = self.with_database(name, |db| db.version) else {
            request.result().settle(Ok(0));
            self.finish_op(name);
            return;
        };
        let change = VersionChange {
            old_version,
            new_version: None,
        };
        if !self.notify_or_park(name, op, change) {
            self.run_delete(name, request);
        }
    }

    /// Ask open connections to close. Returns `true` if the operation has
    /// to wait for them.
    fn notify_or_park(&self, name: &str, op: &Rc<PendingOp>, change: VersionChange) -> bool {
        let open = self.open_connections(name);
        if open.is_empty() {
            return false;
        }
        for conn in &open {
            if !conn.is_closing() {
                self.record(EngineEvent::VersionChangeSent {
                    name: name.to_string(),
                    connection: conn.id,
                });
                conn.fire_version_change(&change);
            }
        }
        if open.iter().any(|conn| !conn.is_closing()) {
            debug!(database = name, "open connections are blocking");
            self.record(EngineEvent::Blocked {
                name: name.to_string(),
            });
            let op = Rc::clone(op);
            self.schedule(move |_| op.fire_blocked(&change));
        }
        op.phase.set(OpPhase::Blocked(change));
        true
    }

    /// Resume parked operations whose database has no open connection left.
    pub(super) fn resume_parked(&self) -> bool {
        let parked: Vec<(String, Rc<PendingOp>, VersionChange)> = self
            .lifecycle
            .borrow()
            .iter()
            .filter_map(|(name, queue)| {
                let op = queue.front()?;
                match op.phase.get() {
                    OpPhase::Blocked(change) => Some((name.clone(), Rc::clone(op), change)),
                    _ => None,
                }
            })
            .collect();

        let mut changed = false;
        for (name, op, change) in parked {
            if !self.open_connections(&name).is_empty() {
                continue;
            }
            op.phase.set(OpPhase::Running);
            changed = true;
            self.schedule(move |engine| match &op.kind {
                OpKind::Open { request, .. } => engine.run_upgrade(&name, request, change),
                OpKind::Delete { request } => engine.run_delete(&name, request),
            });
        }
        changed
    }

    fn run_upgrade(self: &Rc<Self>, name: &str, request: &OpenRequest, change: VersionChange) {
        let new_version = change.new_version.unwrap_or(change.old_version);
        let conn = self.connect(name, new_version);
        let mut working = self
            .with_database(name, DatabaseState::clone)
            .unwrap_or_else(|| DatabaseState::new(0));
        working.version = new_version;

        let txn = Rc::new(TxnState::new(
            self.allocate_id(),
            name,
            conn.id,
            TransactionMode::VersionChange,
            Durability::Default,
            working.store_names(),
        ));
        txn.start(working);
        self.register_transaction(&txn);
        self.record(EngineEvent::UpgradeStarted {
            name: name.to_string(),
            old_version: change.old_version,
            new_version,
        });
        debug!(database = name, old = change.old_version, new = new_version, "upgrade started");

        let engine = Rc::downgrade(self);
        let result = request.result().clone();
        let conn_state = Rc::clone(&conn);
        let db = name.to_string();
        txn.add_listener(Box::new(move |outcome| {
            let Some(engine) = engine.upgrade() else {
                return;
            };
            if *outcome == TransactionOutcome::Committed && !conn_state.is_closing() {
                engine.record(EngineEvent::Opened {
                    name: db.clone(),
                    version: new_version,
                    connection: conn_state.id,
                });
                let connection: Rc<dyn Connection> =
                    Rc::new(MemoryConnection::new(&engine, conn_state));
                result.settle(Ok(connection));
            } else {
                if !conn_state.is_closed() {
                    conn_state.mark_closed();
                    engine.record(EngineEvent::ConnectionClosed {
                        name: db.clone(),
                        connection: conn_state.id,
                    });
                }
                result.settle(Err(StorageError::Aborted));
            }
            engine.finish_op(&db);
        }));

        let upgrade = MemoryUpgrade::new(self, Rc::clone(&txn), change.old_version, new_version);
        if let Err(err) = request.fire_upgrade_needed(&change, &upgrade) {
            debug!(database = name, error = %err, "upgrade handler failed");
            self.finish(&txn, TransactionOutcome::Failed(err));
        }
    }

    fn run_delete(&self, name: &str, request: &DeleteRequest) {
        let removed = self.databases.borrow_mut().remove(name);
        let old_version = removed.map_or(0, |db| db.version);
        debug!(database = name, "database deleted");
        self.record(EngineEvent::DatabaseDeleted {
            name: name.to_string(),
        });
        request.result().settle(Ok(old_version));
        self.finish_op(name);
    }

    fn connect(&self, name: &str, version: u64) -> Rc<ConnState> {
        let conn = Rc::new(ConnState::new(self.allocate_id(), name, version));
        self.connections.borrow_mut().push(Rc::clone(&conn));
        conn
    }

    fn open_connections(&self, name: &str) -> Vec<Rc<ConnState>> {
        self.connections
            .borrow()
            .iter()
            .filter(|conn| conn.db == name && !conn.is_closed())
            .cloned()
            .collect()
    }

    /// Whether `connection` owns a running upgrade.
    pub(crate) fn upgrade_running(&self, connection: u64) -> bool {
        self.transactions.borrow().iter().any(|txn| {
            txn.connection == connection
                && txn.mode == TransactionMode::VersionChange
                && !txn.is_finished()
        })
    }

    /// `close()` on a connection: finish once its transactions are done.
    pub(crate) fn close_connection(&self, conn: &ConnState) {
        if conn.is_closing() {
            return;
        }
        conn.close_pending.set(true);
        let upgrades: Vec<_> = self
            .transactions
            .borrow()
            .iter()
            .filter(|txn| txn.connection == conn.id && txn.mode == TransactionMode::VersionChange)
            .cloned()
            .collect();
        for txn in upgrades {
            self.finish(&txn, TransactionOutcome::Aborted);
        }
    }

    pub(super) fn close_idle_connections(&self) -> bool {
        let mut changed = false;
        {
            let transactions = self.transactions.borrow();
            for conn in self.connections.borrow().iter() {
                if !conn.close_pending.get() || conn.closed.get() {
                    continue;
                }
                let busy = transactions
                    .iter()
                    .any(|txn| txn.connection == conn.id && !txn.is_finished());
                if !busy {
                    conn.closed.set(true);
                    self.record(EngineEvent::ConnectionClosed {
                        name: conn.db.clone(),
                        connection: conn.id,
                    });
                    changed = true;
                }
            }
        }
        self.connections.borrow_mut().retain(|conn| !conn.is_closed());
        changed
    }

    pub(super) fn force_close(&self, name: &str) {
        for conn in self.open_connections(name) {
            conn.close_pending.set(true);
            let owned: Vec<_> = self
                .transactions
                .borrow()
                .iter()
                .filter(|txn| txn.connection == conn.id)
                .cloned()
                .collect();
            for txn in owned {
                self.finish(
                    &txn,
                    TransactionOutcome::Failed(StorageError::unknown(
                        "connection was closed by the engine",
                    )),
                );
            }
            conn.closed.set(true);
            self.record(EngineEvent::ConnectionClosed {
                name: name.to_string(),
                connection: conn.id,
            });
            let listeners = std::mem::take(&mut *conn.close_listeners.borrow_mut());
            self.schedule(move |_| {
                for listener in listeners {
                    listener();
                }
            });
        }
        self.connections.borrow_mut().retain(|conn| !conn.is_closed());
    }
}
