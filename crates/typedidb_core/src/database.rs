//! Opening, closing and deleting databases.
//!
//! A [`DatabaseFactory`] binds a storage engine to a declared [`Schema`].
//! Every open that needs an upgrade reconciles the physical schema inside
//! the upgrade transaction, so a [`Database`] handed out by the factory
//! always has the declared stores and indexes.
//!
//! Opens never wait on other connections: if the engine reports the open as
//! blocked the attempt fails with [`CoreError::OpenBlocked`]. Should the
//! engine still go on to run the upgrade, the late upgrade is rejected; a
//! late success is closed again straight away.

use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::{debug, info, warn};
use typedidb_codec::Key;
use typedidb_storage::{
    Connection, DatabaseInfo, Durability, StorageEngine, StorageError, TransactionMode,
    UpgradeTransaction, VersionChange,
};

use crate::config::{Config, StoreCompatibility};
use crate::error::{CoreError, CoreResult};
use crate::reconcile::{reconcile, ReconcileReport};
use crate::request::{AsyncResult, Completer};
use crate::schema::Schema;
use crate::scope::Scope;

/// Opens typed databases over a storage engine.
#[derive(Clone)]
pub struct DatabaseFactory {
    engine: Rc<dyn StorageEngine>,
    schema: Rc<Schema>,
    config: Config,
}

impl fmt::Debug for DatabaseFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseFactory")
            .field("stores", &self.schema.store_names())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl DatabaseFactory {
    /// Creates a factory with the default configuration.
    ///
    /// # Errors
    ///
    /// [`CoreError::InvalidSchema`] if `schema` does not validate.
    pub fn new(engine: Rc<dyn StorageEngine>, schema: Schema) -> CoreResult<Self> {
        schema.validate()?;
        Ok(Self {
            engine,
            schema: Rc::new(schema),
            config: Config::default(),
        })
    }

    /// Replaces the configuration.
    #[must_use]
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// The declared schema.
    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// The configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Opens `name`, upgrading it to `version` if that is newer than the
    /// stored version. `None` opens at the stored version, creating the
    /// database at version 1 if it does not exist.
    ///
    /// Resolves to [`CoreError::OpenBlocked`] if other connections stay
    /// open, [`CoreError::VersionConflict`] if `version` is older than the
    /// stored one, and [`CoreError::ReconciliationFailed`] if the schema
    /// could not be applied.
    pub fn open(&self, name: &str, version: Option<u64>) -> AsyncResult<Database> {
        let (completer, result) = AsyncResult::channel();
        let attempt = Rc::new(OpenAttempt {
            name: name.to_string(),
            state: Cell::new(AttemptState::Opening),
            report: RefCell::new(None),
            failure: RefCell::new(None),
            completer,
        });
        debug!(database = name, ?version, "opening database");

        let request = self.engine.open(name, version);

        let upgrading = Rc::clone(&attempt);
        let schema = Rc::clone(&self.schema);
        let rule = self.config.store_compatibility;
        request.on_upgrade_needed(move |change, upgrade| {
            upgrading.upgrade(&schema, rule, change, upgrade)
        });

        let blocked = Rc::clone(&attempt);
        request.on_blocked(move |change| blocked.blocked(change));

        let engine = Rc::clone(&self.engine);
        let schema = Rc::clone(&self.schema);
        let config = self.config.clone();
        request.result().on_complete(move |outcome| match outcome {
            Ok(connection) => {
                let report = attempt.take_report();
                attempt.opened(Database::new(engine, connection, schema, config, report));
            }
            Err(err) => attempt.failed(err),
        });
        result
    }

    /// Deletes `name` and everything in it, resolving to the version it had
    /// (0 if it did not exist).
    ///
    /// Fails with [`CoreError::DeleteBlocked`] if open connections do not
    /// close, unless [`Config::wait_on_blocked_delete`] is set.
    pub fn delete_database(&self, name: &str) -> AsyncResult<u64> {
        delete_database(&*self.engine, name, &self.config)
    }

    /// Names and versions of every database.
    pub fn databases(&self) -> AsyncResult<Vec<DatabaseInfo>> {
        let (completer, result) = AsyncResult::channel();
        self.engine.databases().on_complete(move |outcome| {
            completer.complete(outcome.map_err(CoreError::from));
        });
        result
    }

    /// Orders two keys the way the engine does.
    #[must_use]
    pub fn cmp(&self, a: &Key, b: &Key) -> Ordering {
        self.engine.cmp(a, b)
    }
}

fn delete_database(engine: &dyn StorageEngine, name: &str, config: &Config) -> AsyncResult<u64> {
    debug!(database = name, "deleting database");
    let (completer, result) = AsyncResult::channel();
    let request = engine.delete_database(name);

    if !config.wait_on_blocked_delete {
        let blocked = completer.clone();
        let db = name.to_string();
        request.on_blocked(move |_| {
            warn!(database = %db, "delete blocked by open connections");
            blocked.complete(Err(CoreError::DeleteBlocked { name: db }));
        });
    }

    let db = name.to_string();
    request.result().on_complete(move |outcome| {
        if completer.is_completed() {
            debug!(database = %db, "blocked delete went ahead after all");
            return;
        }
        completer.complete(outcome.map_err(|source| CoreError::DeleteFailed { name: db, source }));
    });
    result
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttemptState {
    Opening,
    Blocked,
    Done,
}

/// Bookkeeping for one call to [`DatabaseFactory::open`].
struct OpenAttempt {
    name: String,
    state: Cell<AttemptState>,
    report: RefCell<Option<ReconcileReport>>,
    failure: RefCell<Option<CoreError>>,
    completer: Completer<Database>,
}

impl OpenAttempt {
    fn upgrade(
        &self,
        schema: &Schema,
        rule: StoreCompatibility,
        change: &VersionChange,
        upgrade: &dyn UpgradeTransaction,
    ) -> Result<(), StorageError> {
        if self.state.get() == AttemptState::Blocked {
            debug!(database = %self.name, "rejecting upgrade of a blocked open");
            return Err(StorageError::invalid_state("open already failed as blocked"));
        }
        debug!(
            database = %self.name,
            old_version = change.old_version,
            new_version = ?change.new_version,
            "upgrade needed"
        );
        match reconcile(schema, upgrade, rule) {
            Ok(report) => {
                *self.report.borrow_mut() = Some(report);
                Ok(())
            }
            Err(err) => {
                warn!(database = %self.name, error = %err, "reconciliation failed");
                let source = err
                    .storage_source()
                    .cloned()
                    .unwrap_or_else(|| StorageError::unknown(err.to_string()));
                *self.failure.borrow_mut() = Some(err);
                Err(source)
            }
        }
    }

    fn blocked(&self, change: &VersionChange) {
        if self.state.get() != AttemptState::Opening {
            return;
        }
        self.state.set(AttemptState::Blocked);
        warn!(database = %self.name, "open blocked by open connections");
        self.completer.complete(Err(CoreError::OpenBlocked {
            name: self.name.clone(),
            old_version: change.old_version,
            new_version: change.new_version.unwrap_or(change.old_version),
        }));
    }

    fn take_report(&self) -> Option<ReconcileReport> {
        self.report.borrow_mut().take()
    }

    fn opened(&self, database: Database) {
        if self.state.get() == AttemptState::Blocked {
            debug!(database = %self.name, "closing connection of a blocked open");
            database.close();
            return;
        }
        self.state.set(AttemptState::Done);
        info!(database = %self.name, version = database.version(), "database opened");
        self.completer.complete(Ok(database));
    }

    fn failed(&self, err: StorageError) {
        if self.state.get() == AttemptState::Blocked {
            return;
        }
        self.state.set(AttemptState::Done);
        let error = self.failure.borrow_mut().take().unwrap_or_else(|| match err {
            StorageError::Version { requested, current } => CoreError::VersionConflict {
                name: self.name.clone(),
                requested,
                current,
            },
            source => CoreError::OpenFailed {
                name: self.name.clone(),
                source,
            },
        });
        debug!(database = %self.name, error = %error, "open failed");
        self.completer.complete(Err(error));
    }
}

/// Whether a [`Database`] can still start transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleState {
    /// The connection is open.
    Open,
    /// The connection was closed, by [`Database::close`] or by the engine.
    Closed,
}

type VersionChangeListener = Box<dyn FnMut(&VersionChange)>;

struct DatabaseInner {
    name: String,
    engine: Rc<dyn StorageEngine>,
    connection: Rc<dyn Connection>,
    schema: Rc<Schema>,
    config: Config,
    report: Option<ReconcileReport>,
    state: Cell<HandleState>,
    version_change: RefCell<Vec<VersionChangeListener>>,
    close: RefCell<Vec<Box<dyn FnOnce()>>>,
}

impl DatabaseInner {
    fn close(&self) {
        if self.state.replace(HandleState::Closed) == HandleState::Open {
            debug!(database = %self.name, "closing database");
            self.connection.close();
        }
    }

    fn version_changed(&self, change: &VersionChange) {
        debug!(
            database = %self.name,
            old_version = change.old_version,
            new_version = ?change.new_version,
            "version change requested"
        );
        // Listeners may register further listeners.
        let mut listeners = std::mem::take(&mut *self.version_change.borrow_mut());
        for listener in &mut listeners {
            listener(change);
        }
        let mut slot = self.version_change.borrow_mut();
        listeners.append(&mut slot);
        *slot = listeners;
        drop(slot);

        if self.config.close_on_version_change {
            self.close();
        }
    }

    fn closed_by_engine(&self) {
        self.state.set(HandleState::Closed);
        warn!(database = %self.name, "connection closed by the engine");
        let listeners = std::mem::take(&mut *self.close.borrow_mut());
        for listener in listeners {
            listener();
        }
    }
}

/// An open, schema-reconciled database.
///
/// Dropping the handle closes the connection.
pub struct Database {
    inner: Rc<DatabaseInner>,
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.inner.name)
            .field("version", &self.version())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Database {
    fn new(
        engine: Rc<dyn StorageEngine>,
        connection: Rc<dyn Connection>,
        schema: Rc<Schema>,
        config: Config,
        report: Option<ReconcileReport>,
    ) -> Self {
        let inner = Rc::new(DatabaseInner {
            name: connection.name(),
            engine,
            connection: Rc::clone(&connection),
            schema,
            config,
            report,
            state: Cell::new(HandleState::Open),
            version_change: RefCell::new(Vec::new()),
            close: RefCell::new(Vec::new()),
        });

        let weak: Weak<DatabaseInner> = Rc::downgrade(&inner);
        connection.on_version_change(Box::new(move |change: &VersionChange| {
            if let Some(inner) = weak.upgrade() {
                inner.version_changed(change);
            }
        }));
        let weak: Weak<DatabaseInner> = Rc::downgrade(&inner);
        connection.on_close(Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.closed_by_engine();
            }
        }));
        Self { inner }
    }

    /// Database name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Version the connection was opened at.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.connection.version()
    }

    /// Physical store names, sorted.
    #[must_use]
    pub fn store_names(&self) -> Vec<String> {
        self.inner.connection.object_store_names()
    }

    /// The declared schema.
    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.inner.schema
    }

    /// What reconciliation did, if this open ran an upgrade.
    #[must_use]
    pub fn reconcile_report(&self) -> Option<&ReconcileReport> {
        self.inner.report.as_ref()
    }

    /// Whether the handle is open.
    #[must_use]
    pub fn state(&self) -> HandleState {
        self.inner.state.get()
    }

    /// Whether the handle has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state() == HandleState::Closed
    }

    /// Starts a transaction with the configured default durability.
    ///
    /// # Errors
    ///
    /// See [`transaction_with`](Self::transaction_with).
    pub fn transaction(&self, stores: &[&str], mode: TransactionMode) -> CoreResult<Scope> {
        self.transaction_with(stores, mode, self.inner.config.default_durability)
    }

    /// Starts a transaction over `stores`.
    ///
    /// # Errors
    ///
    /// [`CoreError::EmptyScope`] for no stores, [`CoreError::UnknownStore`]
    /// for a store missing from the schema, [`CoreError::DatabaseClosed`]
    /// after close, and [`CoreError::TransactionOpenFailed`] if the engine
    /// refuses.
    pub fn transaction_with(
        &self,
        stores: &[&str],
        mode: TransactionMode,
        durability: Durability,
    ) -> CoreResult<Scope> {
        if stores.is_empty() {
            return Err(CoreError::EmptyScope);
        }
        let declared = stores
            .iter()
            .map(|name| {
                self.inner
                    .schema
                    .find_store(name)
                    .cloned()
                    .ok_or_else(|| CoreError::UnknownStore {
                        name: (*name).to_string(),
                    })
            })
            .collect::<CoreResult<Vec<_>>>()?;
        if self.is_closed() {
            return Err(CoreError::DatabaseClosed {
                name: self.inner.name.clone(),
            });
        }

        let names: Vec<String> = stores.iter().map(|name| (*name).to_string()).collect();
        let transaction = self
            .inner
            .connection
            .transaction(&names, mode, durability)
            .map_err(|source| CoreError::TransactionOpenFailed { source })?;
        debug!(database = %self.inner.name, stores = ?names, ?mode, "scope opened");
        Ok(Scope::new(
            &self.inner.name,
            declared,
            self.inner.config.check_keys_before_write,
            transaction,
        ))
    }

    /// [`transaction_with`](Self::transaction_with) as a future.
    pub fn open_scope(
        &self,
        stores: &[&str],
        mode: TransactionMode,
        durability: Durability,
    ) -> AsyncResult<Scope> {
        AsyncResult::ready(self.transaction_with(stores, mode, durability))
    }

    /// Closes the connection once its transactions finish. Idempotent.
    pub fn close(&self) {
        self.inner.close();
    }

    /// Closes this handle and deletes the database.
    pub fn delete(self) -> AsyncResult<u64> {
        let engine = Rc::clone(&self.inner.engine);
        let name = self.inner.name.clone();
        let config = self.inner.config.clone();
        drop(self);
        delete_database(&*engine, &name, &config)
    }

    /// Registers a listener for version change requests from other
    /// connections. Runs before the automatic close, if that is enabled.
    pub fn on_version_change(&self, listener: impl FnMut(&VersionChange) + 'static) {
        self.inner
            .version_change
            .borrow_mut()
            .push(Box::new(listener));
    }

    /// Registers a listener for the engine closing the connection on its
    /// own.
    pub fn on_close(&self, listener: impl FnOnce() + 'static) {
        self.inner.close.borrow_mut().push(Box::new(listener));
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        self.inner.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    use typedidb_storage::InMemoryEngine;

    use crate::reconcile::SchemaAction;
    use crate::testing::{factory, open, Person};

    fn holding() -> Config {
        Config::new().close_on_version_change(false)
    }

    #[test]
    fn first_open_creates_declared_stores() {
        let engine = InMemoryEngine::new();
        let db = open(&engine, "app", 1);
        assert_eq!(db.version(), 1);
        assert_eq!(db.store_names(), vec!["blobs", "people"]);
        let report = db.reconcile_report().unwrap();
        assert_eq!(report.old_version, 0);
        assert!(matches!(
            report.actions.as_slice(),
            [
                SchemaAction::CreateStore { .. },
                SchemaAction::CreateIndex { .. },
                SchemaAction::CreateStore { .. },
            ]
        ));
    }

    #[test]
    fn open_without_upgrade_skips_reconciliation() {
        let engine = InMemoryEngine::new();
        drop(open(&engine, "app", 1));
        let db = engine
            .block_on(factory(&engine, Config::default()).open("app", None))
            .unwrap()
            .unwrap();
        assert_eq!(db.version(), 1);
        assert!(db.reconcile_report().is_none());
    }

    #[test]
    fn older_version_is_a_conflict() {
        let engine = InMemoryEngine::new();
        drop(open(&engine, "app", 4));
        let err = engine
            .block_on(factory(&engine, Config::default()).open("app", Some(2)))
            .unwrap()
            .unwrap_err();
        assert_eq!(
            err,
            CoreError::VersionConflict {
                name: "app".to_string(),
                requested: 2,
                current: 4,
            }
        );
        assert_eq!(err.kind(), crate::ErrorKind::Open);
    }

    #[test]
    fn introspection_failure_fails_the_open() {
        let engine = InMemoryEngine::new();
        drop(open(&engine, "app", 1));
        engine.fail_store_introspection("app", "people");
        let err = engine
            .block_on(factory(&engine, Config::default()).open("app", Some(2)))
            .unwrap()
            .unwrap_err();
        assert!(
            matches!(
                &err,
                CoreError::ReconciliationFailed { store, index: None, .. } if store == "people"
            ),
            "{err:?}"
        );
        engine.run_until_idle();
        assert_eq!(engine.describe("app").unwrap().version, 1);
    }

    #[test]
    fn blocked_open_fails_and_never_upgrades() {
        let engine = InMemoryEngine::new();
        let holder = engine
            .block_on(factory(&engine, holding()).open("app", Some(1)))
            .unwrap()
            .unwrap();
        let err = engine
            .block_on(factory(&engine, holding()).open("app", Some(2)))
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, CoreError::OpenBlocked { old_version: 1, new_version: 2, .. }));

        drop(holder);
        engine.run_until_idle();
        assert_eq!(engine.describe("app").unwrap().version, 1);
    }

    #[test]
    fn version_change_closes_by_default() {
        let engine = InMemoryEngine::new();
        let old = open(&engine, "app", 1);
        let notified = Rc::new(Cell::new(0));
        let count = Rc::clone(&notified);
        old.on_version_change(move |_| count.set(count.get() + 1));

        let new = open(&engine, "app", 2);
        assert_eq!(new.version(), 2);
        assert_eq!(notified.get(), 1);
        assert_eq!(old.state(), HandleState::Closed);
        assert_eq!(
            old.transaction(&["people"], TransactionMode::ReadOnly).unwrap_err(),
            CoreError::DatabaseClosed {
                name: "app".to_string()
            }
        );
    }

    #[test]
    fn delete_reports_blocked_connections() {
        let engine = InMemoryEngine::new();
        let factory = factory(&engine, holding());
        let _holder = engine.block_on(factory.open("app", Some(1))).unwrap().unwrap();
        let err = engine
            .block_on(factory.delete_database("app"))
            .unwrap()
            .unwrap_err();
        assert_eq!(
            err,
            CoreError::DeleteBlocked {
                name: "app".to_string()
            }
        );
    }

    #[test]
    fn delete_can_wait_for_connections_to_close() {
        let engine = InMemoryEngine::new();
        let factory = factory(&engine, Config::new().wait_on_blocked_delete(true));
        let holder = engine.block_on(factory.open("app", Some(3))).unwrap().unwrap();
        let deleted = engine.block_on(factory.delete_database("app")).unwrap();
        assert_eq!(deleted, Ok(3));
        assert!(holder.is_closed());
        let names = engine.block_on(factory.databases()).unwrap().unwrap();
        assert!(names.is_empty());
    }

    #[test]
    fn delete_through_the_handle() {
        let engine = InMemoryEngine::new();
        let db = open(&engine, "app", 2);
        let deleted = engine.block_on(db.delete()).unwrap();
        assert_eq!(deleted, Ok(2));
        assert!(engine.describe("app").is_none());
    }

    #[test]
    fn engine_close_notifies_the_handle() {
        let engine = InMemoryEngine::new();
        let db = open(&engine, "app", 1);
        let closed = Rc::new(Cell::new(false));
        let flag = Rc::clone(&closed);
        db.on_close(move || flag.set(true));

        engine.force_close("app");
        engine.run_until_idle();
        assert!(closed.get());
        assert!(db.is_closed());
    }

    #[test]
    fn dropping_the_handle_releases_the_connection() {
        let engine = InMemoryEngine::new();
        drop(
            engine
                .block_on(factory(&engine, holding()).open("app", Some(1)))
                .unwrap()
                .unwrap(),
        );
        let upgraded = engine
            .block_on(factory(&engine, holding()).open("app", Some(2)))
            .unwrap()
            .unwrap();
        assert_eq!(upgraded.version(), 2);
    }

    #[test]
    fn scope_errors_are_checked_in_order() {
        let engine = InMemoryEngine::new();
        let db = open(&engine, "app", 1);
        assert_eq!(
            db.transaction(&[], TransactionMode::ReadOnly).unwrap_err(),
            CoreError::EmptyScope
        );
        assert!(matches!(
            db.transaction(&["people", "ghosts"], TransactionMode::ReadOnly),
            Err(CoreError::UnknownStore { name }) if name == "ghosts"
        ));
        let scope = engine
            .block_on(db.open_scope(&["people"], TransactionMode::ReadWrite, Durability::Strict))
            .unwrap()
            .unwrap();
        assert_eq!(scope.durability(), Durability::Strict);
        assert_eq!(scope.mode(), TransactionMode::ReadWrite);
        let people = scope.store::<Person>("people").unwrap();
        let written = people.put(&Person::new(1, "Ada")).unwrap();
        assert_eq!(engine.block_on(scope.after_commit(written)).unwrap(), Ok(Key::Number(1)));
    }
}
