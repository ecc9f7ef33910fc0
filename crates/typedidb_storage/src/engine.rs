//! The storage engine capability.
//!
//! These traits describe an IndexedDB-shaped engine: callback driven,
//! single threaded, with transactions that commit on their own once no
//! request is outstanding. Everything is object safe so callers can hold an
//! `Rc<dyn StorageEngine>` and swap in a different engine for tests.
//!
//! Handles are reference counted and not `Send`; all callbacks run on the
//! engine's event loop.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use typedidb_codec::{Key, Value};

use crate::error::{StorageError, StorageResult};
use crate::key_path::KeyPathSpec;
use crate::request::Request;

/// Transaction access mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionMode {
    /// Reads only.
    ReadOnly,
    /// Reads and writes.
    ReadWrite,
    /// Schema changes; only created by the engine during an upgrade.
    VersionChange,
}

impl TransactionMode {
    /// Whether the mode allows writes.
    #[must_use]
    pub fn is_write(self) -> bool {
        !matches!(self, Self::ReadOnly)
    }
}

/// Durability hint passed to the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Durability {
    /// Engine default.
    #[default]
    Default,
    /// Flush before reporting commit.
    Strict,
    /// Report commit before flushing.
    Relaxed,
}

/// How a transaction ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionOutcome {
    /// All requests succeeded and the changes are visible.
    Committed,
    /// Rolled back by an explicit `abort`.
    Aborted,
    /// Rolled back because of an error.
    Failed(StorageError),
}

/// Old and new versions carried by upgrade, versionchange and blocked events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionChange {
    /// Version before the change.
    pub old_version: u64,
    /// Version being requested; `None` when the database is being deleted.
    pub new_version: Option<u64>,
}

/// A database listed by [`StorageEngine::databases`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseInfo {
    /// Database name.
    pub name: String,
    /// Current version.
    pub version: u64,
}

/// Parameters for creating an object store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreParameters {
    /// Inline key path, or `None` for out-of-line keys.
    pub key_path: Option<KeyPathSpec>,
    /// Whether the store generates numeric keys.
    pub auto_increment: bool,
}

/// Parameters for creating an index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexParameters {
    /// Reject two records with the same index key.
    pub unique: bool,
    /// Index every element of an array value separately.
    pub multi_entry: bool,
}

/// An engine able to open, list and delete databases.
pub trait StorageEngine {
    /// Start opening `name`.
    ///
    /// `None` opens the current version, or version 1 for a new database.
    /// Nothing fires before control returns to the event loop, so callers
    /// can attach handlers to the returned request first.
    fn open(&self, name: &str, version: Option<u64>) -> OpenRequest;

    /// Start deleting `name`.
    fn delete_database(&self, name: &str) -> DeleteRequest;

    /// List existing databases.
    fn databases(&self) -> Request<Vec<DatabaseInfo>>;

    /// Compare two keys in engine order.
    fn cmp(&self, a: &Key, b: &Key) -> Ordering {
        a.cmp(b)
    }
}

/// An open connection to one database.
pub trait Connection {
    /// Database name.
    fn name(&self) -> String;

    /// Version the connection was opened at.
    fn version(&self) -> u64;

    /// Names of the object stores, sorted.
    fn object_store_names(&self) -> Vec<String>;

    /// Create a transaction over `stores`.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidState` if the connection is closing, `NotFound`
    /// for an unknown store and `InvalidAccess` for an empty scope or a
    /// `VersionChange` mode.
    fn transaction(
        &self,
        stores: &[String],
        mode: TransactionMode,
        durability: Durability,
    ) -> StorageResult<Rc<dyn Transaction>>;

    /// Close once every transaction of this connection has finished.
    fn close(&self);

    /// Whether `close` was called or the engine closed the connection.
    fn is_closed(&self) -> bool;

    /// Called when another request wants to upgrade or delete the database.
    fn on_version_change(&self, listener: Box<dyn FnMut(&VersionChange)>);

    /// Called when the engine closes the connection on its own.
    fn on_close(&self, listener: Box<dyn FnOnce()>);
}

/// A transaction created by [`Connection::transaction`].
pub trait Transaction {
    /// Access mode.
    fn mode(&self) -> TransactionMode;

    /// Durability hint.
    fn durability(&self) -> Durability;

    /// Stores in scope, sorted.
    fn store_names(&self) -> Vec<String>;

    /// Handle to a store in scope.
    ///
    /// # Errors
    ///
    /// `NotFound` if the store is not in scope, `InvalidState` once finished.
    fn object_store(&self, name: &str) -> StorageResult<Rc<dyn ObjectStore>>;

    /// Roll back. Pending requests fail with `Aborted`.
    ///
    /// # Errors
    ///
    /// `InvalidState` if the transaction already finished.
    fn abort(&self) -> StorageResult<()>;

    /// Stop accepting requests and commit once pending ones finish.
    ///
    /// # Errors
    ///
    /// `InvalidState` if the transaction already finished or is committing.
    fn commit(&self) -> StorageResult<()>;

    /// Called once when the transaction finishes.
    ///
    /// Has no effect on a finished transaction.
    fn on_finish(&self, listener: Box<dyn FnOnce(&TransactionOutcome)>);

    /// How the transaction ended, once it has.
    fn outcome(&self) -> Option<TransactionOutcome>;

    /// Whether the transaction has finished.
    fn is_finished(&self) -> bool {
        self.outcome().is_some()
    }
}

/// The exclusive transaction handed to an upgrade handler.
pub trait UpgradeTransaction {
    /// Version before the upgrade; 0 for a new database.
    fn old_version(&self) -> u64;

    /// Version being upgraded to.
    fn new_version(&self) -> u64;

    /// Names of the stores as they currently stand in this upgrade, sorted.
    fn object_store_names(&self) -> Vec<String>;

    /// Handle to an existing store.
    ///
    /// # Errors
    ///
    /// `NotFound` if there is no such store.
    fn object_store(&self, name: &str) -> StorageResult<Rc<dyn ObjectStore>>;

    /// Create a store.
    ///
    /// # Errors
    ///
    /// `Constraint` if the name is taken, `InvalidAccess` for an
    /// auto-increment store with a composite key path.
    fn create_object_store(
        &self,
        name: &str,
        parameters: &StoreParameters,
    ) -> StorageResult<Rc<dyn ObjectStore>>;

    /// Delete a store with its records and indexes.
    ///
    /// # Errors
    ///
    /// `NotFound` if there is no such store.
    fn delete_object_store(&self, name: &str) -> StorageResult<()>;

    /// Abort the upgrade; the open request fails.
    ///
    /// # Errors
    ///
    /// `InvalidState` if the upgrade already finished.
    fn abort(&self) -> StorageResult<()>;
}

/// An object store as seen from one transaction.
pub trait ObjectStore {
    /// Store name.
    fn name(&self) -> String;

    /// Inline key path, if any.
    ///
    /// # Errors
    ///
    /// `InvalidState` if the store was deleted.
    fn key_path(&self) -> StorageResult<Option<KeyPathSpec>>;

    /// Whether keys are generated.
    ///
    /// # Errors
    ///
    /// `InvalidState` if the store was deleted.
    fn auto_increment(&self) -> StorageResult<bool>;

    /// Names of the store's indexes, sorted.
    ///
    /// # Errors
    ///
    /// `InvalidState` if the store was deleted.
    fn index_names(&self) -> StorageResult<Vec<String>>;

    /// Handle to an index.
    ///
    /// # Errors
    ///
    /// `NotFound` if there is no such index.
    fn index(&self, name: &str) -> StorageResult<Rc<dyn Index>>;

    /// Create an index; only inside an upgrade.
    ///
    /// # Errors
    ///
    /// `Constraint` if the name is taken or existing records violate
    /// `unique`, `InvalidAccess` for a multi-entry composite path,
    /// `InvalidState` outside an upgrade.
    fn create_index(
        &self,
        name: &str,
        key_path: &KeyPathSpec,
        parameters: IndexParameters,
    ) -> StorageResult<Rc<dyn Index>>;

    /// Delete an index; only inside an upgrade.
    ///
    /// # Errors
    ///
    /// `NotFound` if there is no such index, `InvalidState` outside an upgrade.
    fn delete_index(&self, name: &str) -> StorageResult<()>;

    /// Insert a record; fails with `Constraint` if the key exists.
    ///
    /// # Errors
    ///
    /// Synchronous failures: `TransactionInactive`, `ReadOnly`, `Data` for a
    /// missing or misplaced key, `DataClone` for an unstorable record.
    fn add(&self, value: Value, key: Option<Key>) -> StorageResult<Request<Key>>;

    /// Insert or replace a record.
    ///
    /// # Errors
    ///
    /// Same synchronous failures as [`ObjectStore::add`].
    fn put(&self, value: Value, key: Option<Key>) -> StorageResult<Request<Key>>;

    /// Read a record by primary key.
    ///
    /// # Errors
    ///
    /// `TransactionInactive` when issued outside an active window.
    fn get(&self, key: Key) -> StorageResult<Request<Option<Value>>>;

    /// Delete a record by primary key.
    ///
    /// # Errors
    ///
    /// `TransactionInactive` or `ReadOnly`.
    fn delete(&self, key: Key) -> StorageResult<Request<()>>;

    /// Count records.
    ///
    /// # Errors
    ///
    /// `TransactionInactive` when issued outside an active window.
    fn count(&self) -> StorageResult<Request<u64>>;

    /// Delete every record.
    ///
    /// # Errors
    ///
    /// `TransactionInactive` or `ReadOnly`.
    fn clear(&self) -> StorageResult<Request<()>>;
}

/// An index as seen from one transaction.
pub trait Index {
    /// Index name.
    fn name(&self) -> String;

    /// Key path the index extracts.
    ///
    /// # Errors
    ///
    /// `InvalidState` if the index was deleted.
    fn key_path(&self) -> StorageResult<KeyPathSpec>;

    /// Whether the index is unique.
    ///
    /// # Errors
    ///
    /// `InvalidState` if the index was deleted.
    fn unique(&self) -> StorageResult<bool>;

    /// Whether the index is multi-entry.
    ///
    /// # Errors
    ///
    /// `InvalidState` if the index was deleted.
    fn multi_entry(&self) -> StorageResult<bool>;

    /// First record (by primary key) whose index key equals `key`.
    ///
    /// # Errors
    ///
    /// `TransactionInactive` when issued outside an active window.
    fn get(&self, key: Key) -> StorageResult<Request<Option<Value>>>;

    /// Primary key of that record.
    ///
    /// # Errors
    ///
    /// `TransactionInactive` when issued outside an active window.
    fn get_key(&self, key: Key) -> StorageResult<Request<Option<Key>>>;

    /// Number of records indexed under `key`.
    ///
    /// # Errors
    ///
    /// `TransactionInactive` when issued outside an active window.
    fn count(&self, key: Key) -> StorageResult<Request<u64>>;
}

type UpgradeHandler = Box<dyn FnOnce(&VersionChange, &dyn UpgradeTransaction) -> StorageResult<()>>;
type BlockedHandler = Box<dyn FnOnce(&VersionChange)>;

#[derive(Default)]
struct OpenHandlers {
    upgrade: Option<UpgradeHandler>,
    blocked: Option<BlockedHandler>,
}

/// The pending result of [`StorageEngine::open`].
///
/// Fires `upgrade_needed` (at most once, inside the upgrade transaction),
/// `blocked` (at most once) and finally settles [`OpenRequest::result`].
#[derive(Clone)]
pub struct OpenRequest {
    handlers: Rc<RefCell<OpenHandlers>>,
    result: Request<Rc<dyn Connection>>,
}

impl OpenRequest {
    /// Create a request with no handlers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: Rc::default(),
            result: Request::pending(),
        }
    }

    /// Handle a version upgrade.
    ///
    /// Returning an error aborts the upgrade and fails the open request
    /// with `Aborted`.
    pub fn on_upgrade_needed(
        &self,
        handler: impl FnOnce(&VersionChange, &dyn UpgradeTransaction) -> StorageResult<()> + 'static,
    ) {
        self.handlers.borrow_mut().upgrade = Some(Box::new(handler));
    }

    /// Handle other connections refusing to close.
    pub fn on_blocked(&self, handler: impl FnOnce(&VersionChange) + 'static) {
        self.handlers.borrow_mut().blocked = Some(Box::new(handler));
    }

    /// The connection, or the reason opening failed.
    #[must_use]
    pub fn result(&self) -> &Request<Rc<dyn Connection>> {
        &self.result
    }

    /// Run the upgrade handler; engines call this once per upgrade.
    ///
    /// # Errors
    ///
    /// Whatever the handler returns.
    pub fn fire_upgrade_needed(
        &self,
        change: &VersionChange,
        upgrade: &dyn UpgradeTransaction,
    ) -> StorageResult<()> {
        let handler = self.handlers.borrow_mut().upgrade.take();
        match handler {
            Some(handler) => handler(change, upgrade),
            None => Ok(()),
        }
    }

    /// Run the blocked handler; engines call this at most once.
    pub fn fire_blocked(&self, change: &VersionChange) {
        let handler = self.handlers.borrow_mut().blocked.take();
        if let Some(handler) = handler {
            handler(change);
        }
    }
}

impl Default for OpenRequest {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for OpenRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenRequest")
            .field("pending", &self.result.is_pending())
            .finish()
    }
}

/// The pending result of [`StorageEngine::delete_database`].
#[derive(Clone)]
pub struct DeleteRequest {
    blocked: Rc<RefCell<Option<BlockedHandler>>>,
    result: Request<u64>,
}

impl DeleteRequest {
    /// Create a request with no handlers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            blocked: Rc::default(),
            result: Request::pending(),
        }
    }

    /// Handle open connections refusing to close.
    pub fn on_blocked(&self, handler: impl FnOnce(&VersionChange) + 'static) {
        *self.blocked.borrow_mut() = Some(Box::new(handler));
    }

    /// The deleted database's old version (0 if it did not exist).
    #[must_use]
    pub fn result(&self) -> &Request<u64> {
        &self.result
    }

    /// Run the blocked handler; engines call this at most once.
    pub fn fire_blocked(&self, change: &VersionChange) {
        let handler = self.blocked.borrow_mut().take();
        if let Some(handler) = handler {
            handler(change);
        }
    }
}

impl Default for DeleteRequest {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DeleteRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeleteRequest")
            .field("pending", &self.result.is_pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn blocked_fires_at_most_once() {
        let request = OpenRequest::new();
        let count = Rc::new(Cell::new(0));
        let counter = Rc::clone(&count);
        request.on_blocked(move |_| counter.set(counter.get() + 1));

        let change = VersionChange {
            old_version: 1,
            new_version: Some(2),
        };
        request.fire_blocked(&change);
        request.fire_blocked(&change);
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn modes() {
        assert!(!TransactionMode::ReadOnly.is_write());
        assert!(TransactionMode::ReadWrite.is_write());
        assert!(TransactionMode::VersionChange.is_write());
        assert_eq!(Durability::default(), Durability::Default);
    }
}
