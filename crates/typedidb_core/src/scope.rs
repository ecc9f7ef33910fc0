//! Transaction scopes and typed store accessors.
//!
//! A [`Scope`] wraps one engine transaction. It hands out
//! [`StoreAccessor`]s for the stores it covers and reports how the
//! transaction ended through [`Scope::completion`]. Every accessor request
//! returns a [`RequestHandle`]; keep the transaction alive by chaining the
//! next request onto it rather than awaiting in between.

use std::marker::PhantomData;
use std::rc::Rc;

use tracing::{debug, trace};
use typedidb_codec::{Key, Value};
use typedidb_storage::{
    Durability, Index, KeyPathSpec, ObjectStore, StorageError, Transaction, TransactionMode,
    TransactionOutcome,
};

use crate::error::{CoreError, CoreResult};
use crate::record::{self, Record};
use crate::request::{AsyncResult, RequestHandle};
use crate::schema::StoreSpec;

/// Where a scope is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeState {
    /// Requests may still be issued.
    Active,
    /// All changes were committed.
    Committed,
    /// Rolled back by an abort.
    Aborted,
    /// Rolled back because a request or the commit failed.
    Errored,
}

fn outcome_result(outcome: &TransactionOutcome) -> CoreResult<()> {
    match outcome {
        TransactionOutcome::Committed => Ok(()),
        TransactionOutcome::Aborted => Err(CoreError::TransactionAborted),
        TransactionOutcome::Failed(source) => Err(CoreError::TransactionFailed {
            source: source.clone(),
        }),
    }
}

struct ScopeInner {
    database: String,
    stores: Vec<String>,
    declared: Vec<StoreSpec>,
    check_keys: bool,
    transaction: Rc<dyn Transaction>,
}

/// A transaction over a fixed set of object stores.
///
/// Clones share the same transaction.
#[derive(Clone)]
pub struct Scope {
    inner: Rc<ScopeInner>,
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("database", &self.inner.database)
            .field("stores", &self.inner.stores)
            .field("state", &self.state())
            .finish()
    }
}

impl Scope {
    pub(crate) fn new(
        database: &str,
        declared: Vec<StoreSpec>,
        check_keys: bool,
        transaction: Rc<dyn Transaction>,
    ) -> Self {
        let stores = transaction.store_names();
        let db = database.to_string();
        transaction.on_finish(Box::new(move |outcome: &TransactionOutcome| {
            debug!(database = %db, ?outcome, "scope finished");
        }));
        Self {
            inner: Rc::new(ScopeInner {
                database: database.to_string(),
                stores,
                declared,
                check_keys,
                transaction,
            }),
        }
    }

    /// Name of the database the scope belongs to.
    #[must_use]
    pub fn database_name(&self) -> &str {
        &self.inner.database
    }

    /// Stores the scope covers, sorted.
    #[must_use]
    pub fn store_names(&self) -> &[String] {
        &self.inner.stores
    }

    /// Access mode.
    #[must_use]
    pub fn mode(&self) -> TransactionMode {
        self.inner.transaction.mode()
    }

    /// Durability hint the transaction was opened with.
    #[must_use]
    pub fn durability(&self) -> Durability {
        self.inner.transaction.durability()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ScopeState {
        match self.inner.transaction.outcome() {
            None => ScopeState::Active,
            Some(TransactionOutcome::Committed) => ScopeState::Committed,
            Some(TransactionOutcome::Aborted) => ScopeState::Aborted,
            Some(TransactionOutcome::Failed(_)) => ScopeState::Errored,
        }
    }

    /// Whether the transaction has committed or rolled back.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.inner.transaction.is_finished()
    }

    fn finished_error(&self) -> CoreError {
        CoreError::ScopeFinished {
            store: self.inner.stores.join(", "),
        }
    }

    /// Typed access to one store of the scope.
    ///
    /// # Errors
    ///
    /// [`CoreError::UnknownStore`] if the store is outside the scope,
    /// [`CoreError::ScopeFinished`] once the transaction has ended.
    pub fn store<R: Record>(&self, name: &str) -> CoreResult<StoreAccessor<R>> {
        let unknown = || CoreError::UnknownStore {
            name: name.to_string(),
        };
        if !self.inner.stores.iter().any(|store| store == name) {
            return Err(unknown());
        }
        let spec = self
            .inner
            .declared
            .iter()
            .find(|spec| spec.name == name)
            .cloned()
            .ok_or_else(unknown)?;
        if self.is_finished() {
            return Err(CoreError::ScopeFinished {
                store: name.to_string(),
            });
        }

        let lookup = |source: StorageError| CoreError::request(name, "objectStore", source);
        let store = self.inner.transaction.object_store(name).map_err(lookup)?;
        let key_path = store.key_path().map_err(lookup)?;
        let auto_increment = store.auto_increment().map_err(lookup)?;
        Ok(StoreAccessor {
            scope: self.clone(),
            spec: Rc::new(spec),
            store,
            key_path,
            auto_increment,
            _record: PhantomData,
        })
    }

    /// Resolves once the transaction ends: `Ok` on commit, otherwise
    /// [`CoreError::TransactionAborted`] or [`CoreError::TransactionFailed`].
    pub fn completion(&self) -> AsyncResult<()> {
        if let Some(outcome) = self.inner.transaction.outcome() {
            return AsyncResult::ready(outcome_result(&outcome));
        }
        let (completer, result) = AsyncResult::channel();
        self.inner.transaction.on_finish(Box::new(move |outcome: &TransactionOutcome| {
            completer.complete(outcome_result(outcome));
        }));
        result
    }

    /// Resolves to the value of `handle` once the transaction has committed.
    ///
    /// If the transaction rolls back the request's own error is preferred,
    /// falling back to the transaction outcome.
    pub fn after_commit<T: Clone + 'static>(&self, handle: RequestHandle<T>) -> AsyncResult<T> {
        let settle = move |outcome: &TransactionOutcome| {
            match (outcome_result(outcome), handle.try_result()) {
                (Ok(()), Some(value)) => value,
                (Ok(()), None) => Err(CoreError::Abandoned),
                (Err(_), Some(Err(request_error))) => Err(request_error),
                (Err(err), _) => Err(err),
            }
        };
        if let Some(outcome) = self.inner.transaction.outcome() {
            return AsyncResult::ready(settle(&outcome));
        }
        let (completer, result) = AsyncResult::channel();
        self.inner.transaction.on_finish(Box::new(move |outcome: &TransactionOutcome| {
            completer.complete(settle(outcome));
        }));
        result
    }

    /// Rolls the transaction back.
    ///
    /// # Errors
    ///
    /// [`CoreError::ScopeFinished`] if it already ended.
    pub fn abort(&self) -> CoreResult<()> {
        if self.is_finished() {
            return Err(self.finished_error());
        }
        trace!(database = %self.inner.database, "aborting scope");
        self.inner.transaction.abort().map_err(CoreError::from)
    }

    /// Asks the engine to commit as soon as outstanding requests finish,
    /// instead of waiting for the transaction to go idle.
    ///
    /// # Errors
    ///
    /// [`CoreError::ScopeFinished`] if it already ended.
    pub fn commit(&self) -> CoreResult<()> {
        if self.is_finished() {
            return Err(self.finished_error());
        }
        self.inner.transaction.commit().map_err(CoreError::from)
    }
}

/// Typed access to one object store within a [`Scope`].
pub struct StoreAccessor<R> {
    scope: Scope,
    spec: Rc<StoreSpec>,
    store: Rc<dyn ObjectStore>,
    key_path: Option<KeyPathSpec>,
    auto_increment: bool,
    _record: PhantomData<fn() -> R>,
}

impl<R> Clone for StoreAccessor<R> {
    fn clone(&self) -> Self {
        Self {
            scope: self.scope.clone(),
            spec: Rc::clone(&self.spec),
            store: Rc::clone(&self.store),
            key_path: self.key_path.clone(),
            auto_increment: self.auto_increment,
            _record: PhantomData,
        }
    }
}

impl<R> std::fmt::Debug for StoreAccessor<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreAccessor")
            .field("store", &self.spec.name)
            .field("key_path", &self.key_path)
            .field("auto_increment", &self.auto_increment)
            .finish_non_exhaustive()
    }
}

impl<R: Record> StoreAccessor<R> {
    /// Store name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// The scope this accessor belongs to.
    #[must_use]
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    fn ensure_active(&self) -> CoreResult<()> {
        if self.scope.is_finished() {
            return Err(CoreError::ScopeFinished {
                store: self.spec.name.clone(),
            });
        }
        Ok(())
    }

    fn failure(&self, operation: &'static str) -> impl Fn(StorageError) -> CoreError {
        let store = self.spec.name.clone();
        move |source| CoreError::request(store.clone(), operation, source)
    }

    fn check_key(&self, value: &Value, explicit: Option<&Key>) -> CoreResult<()> {
        let store = &self.spec.name;
        match (&self.key_path, explicit) {
            (Some(_), Some(_)) => Err(CoreError::key_usage(
                store,
                "records carry their own key; an explicit key is not allowed",
            )),
            (None, None) if !self.auto_increment => Err(CoreError::key_usage(
                store,
                "keys are out-of-line; an explicit key is required",
            )),
            (Some(path), None) => match path.resolve(value) {
                Ok(_) => Ok(()),
                Err(_) if self.auto_increment => Ok(()),
                Err(source) => Err(CoreError::KeyNotFound {
                    store: store.clone(),
                    source,
                }),
            },
            _ => Ok(()),
        }
    }

    fn write(
        &self,
        operation: &'static str,
        record: &R,
        key: Option<Key>,
    ) -> CoreResult<RequestHandle<Key>> {
        self.ensure_active()?;
        let value = record::encode(record)?;
        if self.scope.inner.check_keys {
            self.check_key(&value, key.as_ref())?;
        }
        let fail = self.failure(operation);
        let request = if operation == "put" {
            self.store.put(value, key)
        } else {
            self.store.add(value, key)
        }
        .map_err(&fail)?;
        Ok(RequestHandle::from_request(&request, move |outcome| {
            outcome.map_err(fail)
        }))
    }

    /// Inserts a record; fails if the key is taken.
    ///
    /// # Errors
    ///
    /// Fails synchronously on a finished scope, a record that cannot be
    /// converted, or a key problem; the handle fails with the engine error.
    pub fn add(&self, record: &R) -> CoreResult<RequestHandle<Key>> {
        self.write("add", record, None)
    }

    /// Inserts a record under an explicit out-of-line key.
    ///
    /// # Errors
    ///
    /// See [`add`](Self::add).
    pub fn add_with_key(&self, record: &R, key: impl Into<Key>) -> CoreResult<RequestHandle<Key>> {
        self.write("add", record, Some(key.into()))
    }

    /// Inserts or replaces a record.
    ///
    /// # Errors
    ///
    /// See [`add`](Self::add).
    pub fn put(&self, record: &R) -> CoreResult<RequestHandle<Key>> {
        self.write("put", record, None)
    }

    /// Inserts or replaces a record under an explicit out-of-line key.
    ///
    /// # Errors
    ///
    /// See [`add`](Self::add).
    pub fn put_with_key(&self, record: &R, key: impl Into<Key>) -> CoreResult<RequestHandle<Key>> {
        self.write("put", record, Some(key.into()))
    }

    /// Reads the record stored under `key`.
    ///
    /// # Errors
    ///
    /// Fails synchronously on a finished scope.
    pub fn get(&self, key: impl Into<Key>) -> CoreResult<RequestHandle<Option<R>>> {
        self.ensure_active()?;
        let fail = self.failure("get");
        let request = self.store.get(key.into()).map_err(&fail)?;
        Ok(RequestHandle::from_request(&request, move |outcome| {
            let value = outcome.map_err(fail)?;
            value.as_ref().map(record::decode::<R>).transpose()
        }))
    }

    /// Removes the record stored under `key`, if any.
    ///
    /// # Errors
    ///
    /// Fails synchronously on a finished scope.
    pub fn delete(&self, key: impl Into<Key>) -> CoreResult<RequestHandle<()>> {
        self.ensure_active()?;
        let fail = self.failure("delete");
        let request = self.store.delete(key.into()).map_err(&fail)?;
        Ok(RequestHandle::from_request(&request, move |outcome| {
            outcome.map_err(fail)
        }))
    }

    /// Number of records in the store.
    ///
    /// # Errors
    ///
    /// Fails synchronously on a finished scope.
    pub fn count(&self) -> CoreResult<RequestHandle<u64>> {
        self.ensure_active()?;
        let fail = self.failure("count");
        let request = self.store.count().map_err(&fail)?;
        Ok(RequestHandle::from_request(&request, move |outcome| {
            outcome.map_err(fail)
        }))
    }

    /// Removes every record.
    ///
    /// # Errors
    ///
    /// Fails synchronously on a finished scope.
    pub fn clear(&self) -> CoreResult<RequestHandle<()>> {
        self.ensure_active()?;
        let fail = self.failure("clear");
        let request = self.store.clear().map_err(&fail)?;
        Ok(RequestHandle::from_request(&request, move |outcome| {
            outcome.map_err(fail)
        }))
    }

    /// The key `record` would be stored under, read from the store's key
    /// path.
    ///
    /// # Errors
    ///
    /// [`CoreError::KeyUsage`] for a store with out-of-line keys,
    /// [`CoreError::KeyNotFound`] if the record has no key at the path.
    pub fn key_of(&self, record: &R) -> CoreResult<Key> {
        let Some(path) = &self.key_path else {
            return Err(CoreError::key_usage(
                &self.spec.name,
                "keys are out-of-line; records do not carry them",
            ));
        };
        let value = record::encode(record)?;
        path.resolve(&value).map_err(|source| CoreError::KeyNotFound {
            store: self.spec.name.clone(),
            source,
        })
    }

    fn write_all<I>(&self, records: I, overwrite: bool) -> CoreResult<RequestHandle<Vec<Key>>>
    where
        I: IntoIterator<Item = R>,
    {
        self.ensure_active()?;
        let mut chain = RequestHandle::ready(Ok(Vec::new()));
        for record in records {
            let store = self.clone();
            chain = chain.and_then(move |mut keys: Vec<Key>| {
                let next = if overwrite {
                    store.put(&record)?
                } else {
                    store.add(&record)?
                };
                Ok(next.map(move |key| {
                    keys.push(key);
                    keys
                }))
            });
        }
        Ok(chain)
    }

    /// Adds records one after another, each issued from the completion of
    /// the one before. Resolves to the keys in input order and stops at the
    /// first failure.
    ///
    /// # Errors
    ///
    /// Fails synchronously on a finished scope.
    pub fn add_all<I>(&self, records: I) -> CoreResult<RequestHandle<Vec<Key>>>
    where
        I: IntoIterator<Item = R>,
    {
        self.write_all(records, false)
    }

    /// Like [`add_all`](Self::add_all) with `put` semantics.
    ///
    /// # Errors
    ///
    /// Fails synchronously on a finished scope.
    pub fn put_all<I>(&self, records: I) -> CoreResult<RequestHandle<Vec<Key>>>
    where
        I: IntoIterator<Item = R>,
    {
        self.write_all(records, true)
    }

    /// Typed access to a declared index of this store.
    ///
    /// # Errors
    ///
    /// [`CoreError::UnknownIndex`] if the index is not declared,
    /// [`CoreError::ScopeFinished`] once the transaction has ended.
    pub fn index(&self, name: &str) -> CoreResult<IndexAccessor<R>> {
        if self.spec.find_index(name).is_none() {
            return Err(CoreError::UnknownIndex {
                store: self.spec.name.clone(),
                index: name.to_string(),
            });
        }
        self.ensure_active()?;
        let index = self.store.index(name).map_err(self.failure("index"))?;
        Ok(IndexAccessor {
            store: self.clone(),
            index,
        })
    }
}

/// Typed lookups through one index.
pub struct IndexAccessor<R> {
    store: StoreAccessor<R>,
    index: Rc<dyn Index>,
}

impl<R> Clone for IndexAccessor<R> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            index: Rc::clone(&self.index),
        }
    }
}

impl<R> std::fmt::Debug for IndexAccessor<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexAccessor")
            .field("store", &self.store.spec.name)
            .field("index", &self.index.name())
            .finish()
    }
}

impl<R: Record> IndexAccessor<R> {
    /// Index name.
    #[must_use]
    pub fn name(&self) -> String {
        self.index.name()
    }

    /// The first record whose index key equals `key`.
    ///
    /// # Errors
    ///
    /// Fails synchronously on a finished scope.
    pub fn get(&self, key: impl Into<Key>) -> CoreResult<RequestHandle<Option<R>>> {
        self.store.ensure_active()?;
        let fail = self.store.failure("index.get");
        let request = self.index.get(key.into()).map_err(&fail)?;
        Ok(RequestHandle::from_request(&request, move |outcome| {
            let value = outcome.map_err(fail)?;
            value.as_ref().map(record::decode::<R>).transpose()
        }))
    }

    /// The primary key of the first record whose index key equals `key`.
    ///
    /// # Errors
    ///
    /// Fails synchronously on a finished scope.
    pub fn get_key(&self, key: impl Into<Key>) -> CoreResult<RequestHandle<Option<Key>>> {
        self.store.ensure_active()?;
        let fail = self.store.failure("index.getKey");
        let request = self.index.get_key(key.into()).map_err(&fail)?;
        Ok(RequestHandle::from_request(&request, move |outcome| {
            outcome.map_err(fail)
        }))
    }

    /// Number of records whose index key equals `key`.
    ///
    /// # Errors
    ///
    /// Fails synchronously on a finished scope.
    pub fn count(&self, key: impl Into<Key>) -> CoreResult<RequestHandle<u64>> {
        self.store.ensure_active()?;
        let fail = self.store.failure("index.count");
        let request = self.index.count(key.into()).map_err(&fail)?;
        Ok(RequestHandle::from_request(&request, move |outcome| {
            outcome.map_err(fail)
        }))
    }
}
