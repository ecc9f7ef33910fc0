//! Trait objects handed out by the in-memory engine.

use std::rc::{Rc, Weak};

use typedidb_codec::{Key, Value};

use crate::engine::{
    Connection, Durability, Index, IndexParameters, ObjectStore, StoreParameters, Transaction,
    TransactionMode, TransactionOutcome, UpgradeTransaction, VersionChange,
};
use crate::error::{StorageError, StorageResult};
use crate::key_path::KeyPathSpec;
use crate::request::Request;

use super::lifecycle::ConnState;
use super::state::{IndexMeta, StoreData};
use super::transaction::{Operation, TxnState};
use super::EngineInner;

fn upgrade(engine: &Weak<EngineInner>) -> StorageResult<Rc<EngineInner>> {
    engine
        .upgrade()
        .ok_or_else(|| StorageError::invalid_state("the engine has been dropped"))
}

/// Schema changes need a live, active upgrade transaction.
fn check_schema_change(txn: &TxnState) -> StorageResult<()> {
    if txn.mode != TransactionMode::VersionChange {
        return Err(StorageError::invalid_state(
            "schema changes are only allowed during an upgrade",
        ));
    }
    if txn.is_finished() {
        return Err(StorageError::invalid_state("the upgrade has finished"));
    }
    if !txn.is_active() {
        return Err(StorageError::TransactionInactive);
    }
    Ok(())
}

fn store_handle(
    engine: &Weak<EngineInner>,
    txn: &Rc<TxnState>,
    name: &str,
    id: u64,
) -> Rc<dyn ObjectStore> {
    Rc::new(MemoryStore {
        engine: engine.clone(),
        txn: Rc::clone(txn),
        name: name.to_string(),
        id,
    })
}

/// Look up a store's id as `txn` currently sees it.
fn visible_store_id(engine: &EngineInner, txn: &TxnState, name: &str) -> Option<u64> {
    if let Some(working) = txn.working.borrow().as_ref() {
        if let Some(store) = working.stores.get(name) {
            return Some(store.id);
        }
        if txn.mode == TransactionMode::VersionChange {
            return None;
        }
    }
    engine
        .with_database(&txn.db, |db| db.stores.get(name).map(|store| store.id))
        .flatten()
}

pub(crate) struct MemoryConnection {
    engine: Weak<EngineInner>,
    conn: Rc<ConnState>,
}

impl MemoryConnection {
    pub fn new(engine: &Rc<EngineInner>, conn: Rc<ConnState>) -> Self {
        Self {
            engine: Rc::downgrade(engine),
            conn,
        }
    }
}

impl Connection for MemoryConnection {
    fn name(&self) -> String {
        self.conn.db.clone()
    }

    fn version(&self) -> u64 {
        self.conn.version
    }

    fn object_store_names(&self) -> Vec<String> {
        self.engine
            .upgrade()
            .and_then(|engine| engine.with_database(&self.conn.db, |db| db.store_names()))
            .unwrap_or_default()
    }

    fn transaction(
        &self,
        stores: &[String],
        mode: TransactionMode,
        durability: Durability,
    ) -> StorageResult<Rc<dyn Transaction>> {
        let engine = upgrade(&self.engine)?;
        if self.conn.is_closing() {
            return Err(StorageError::invalid_state("the connection is closing"));
        }
        if mode == TransactionMode::VersionChange {
            return Err(StorageError::invalid_access(
                "upgrade transactions are created by the engine",
            ));
        }
        if engine.upgrade_running(self.conn.id) {
            return Err(StorageError::invalid_state("an upgrade is still running"));
        }

        let mut scope = stores.to_vec();
        scope.sort();
        scope.dedup();
        if scope.is_empty() {
            return Err(StorageError::invalid_access("the transaction scope is empty"));
        }
        let known = self.object_store_names();
        if let Some(missing) = scope.iter().find(|name| !known.contains(name)) {
            return Err(StorageError::not_found("object store", missing.as_str()));
        }

        let txn = Rc::new(TxnState::new(
            engine.allocate_id(),
            &self.conn.db,
            self.conn.id,
            mode,
            durability,
            scope,
        ));
        engine.register_transaction(&txn);
        Ok(Rc::new(MemoryTransaction {
            engine: self.engine.clone(),
            txn,
        }))
    }

    fn close(&self) {
        if let Some(engine) = self.engine.upgrade() {
            engine.close_connection(&self.conn);
        }
    }

    fn is_closed(&self) -> bool {
        self.conn.is_closing()
    }

    fn on_version_change(&self, listener: Box<dyn FnMut(&VersionChange)>) {
        self.conn.add_version_change_listener(listener);
    }

    fn on_close(&self, listener: Box<dyn FnOnce()>) {
        self.conn.add_close_listener(listener);
    }
}

pub(crate) struct MemoryTransaction {
    engine: Weak<EngineInner>,
    txn: Rc<TxnState>,
}

impl Transaction for MemoryTransaction {
    fn mode(&self) -> TransactionMode {
        self.txn.mode
    }

    fn durability(&self) -> Durability {
        self.txn.durability
    }

    fn store_names(&self) -> Vec<String> {
        self.txn.scope.borrow().clone()
    }

    fn object_store(&self, name: &str) -> StorageResult<Rc<dyn ObjectStore>> {
        let engine = upgrade(&self.engine)?;
        if self.txn.is_finished() {
            return Err(StorageError::invalid_state("the transaction has finished"));
        }
        if !self.txn.in_scope(name) {
            return Err(StorageError::not_found("object store", name));
        }
        let id = visible_store_id(&engine, &self.txn, name)
            .ok_or_else(|| StorageError::not_found("object store", name))?;
        Ok(store_handle(&self.engine, &self.txn, name, id))
    }

    fn abort(&self) -> StorageResult<()> {
        let engine = upgrade(&self.engine)?;
        if self.txn.is_finished() {
            return Err(StorageError::invalid_state("the transaction has finished"));
        }
        engine.finish(&self.txn, TransactionOutcome::Aborted);
        Ok(())
    }

    fn commit(&self) -> StorageResult<()> {
        if self.txn.is_finished() || self.txn.commit_requested() {
            return Err(StorageError::invalid_state(
                "the transaction is already committing or finished",
            ));
        }
        self.txn.request_commit();
        Ok(())
    }

    fn on_finish(&self, listener: Box<dyn FnOnce(&TransactionOutcome)>) {
        self.txn.add_listener(listener);
    }

    fn outcome(&self) -> Option<TransactionOutcome> {
        self.txn.outcome()
    }
}

pub(crate) struct MemoryUpgrade {
    engine: Weak<EngineInner>,
    txn: Rc<TxnState>,
    old_version: u64,
    new_version: u64,
}

impl MemoryUpgrade {
    pub fn new(
        engine: &Rc<EngineInner>,
        txn: Rc<TxnState>,
        old_version: u64,
        new_version: u64,
    ) -> Self {
        Self {
            engine: Rc::downgrade(engine),
            txn,
            old_version,
            new_version,
        }
    }
}

impl UpgradeTransaction for MemoryUpgrade {
    fn old_version(&self) -> u64 {
        self.old_version
    }

    fn new_version(&self) -> u64 {
        self.new_version
    }

    fn object_store_names(&self) -> Vec<String> {
        self.txn
            .working
            .borrow()
            .as_ref()
            .map(|working| working.store_names())
            .unwrap_or_default()
    }

    fn object_store(&self, name: &str) -> StorageResult<Rc<dyn ObjectStore>> {
        let engine = upgrade(&self.engine)?;
        if engine.store_fault(&self.txn.db, name) {
            return Err(StorageError::unknown(format!(
                "injected failure reading object store '{name}'"
            )));
        }
        let working = self.txn.working.borrow();
        let state = working
            .as_ref()
            .ok_or_else(|| StorageError::invalid_state("the upgrade has finished"))?;
        let id = state.store(name)?.id;
        Ok(store_handle(&self.engine, &self.txn, name, id))
    }

    fn create_object_store(
        &self,
        name: &str,
        parameters: &StoreParameters,
    ) -> StorageResult<Rc<dyn ObjectStore>> {
        check_schema_change(&self.txn)?;
        let id = {
            let mut working = self.txn.working.borrow_mut();
            let state = working
                .as_mut()
                .ok_or_else(|| StorageError::invalid_state("the upgrade has finished"))?;
            state.create_store(name, parameters)?
        };
        self.txn.scope.borrow_mut().push(name.to_string());
        Ok(store_handle(&self.engine, &self.txn, name, id))
    }

    fn delete_object_store(&self, name: &str) -> StorageResult<()> {
        check_schema_change(&self.txn)?;
        {
            let mut working = self.txn.working.borrow_mut();
            let state = working
                .as_mut()
                .ok_or_else(|| StorageError::invalid_state("the upgrade has finished"))?;
            state.delete_store(name)?;
        }
        self.txn.scope.borrow_mut().retain(|store| store != name);
        Ok(())
    }

    fn abort(&self) -> StorageResult<()> {
        let engine = upgrade(&self.engine)?;
        if self.txn.is_finished() {
            return Err(StorageError::invalid_state("the upgrade has finished"));
        }
        engine.finish(&self.txn, TransactionOutcome::Aborted);
        Ok(())
    }
}

pub(crate) struct MemoryStore {
    engine: Weak<EngineInner>,
    txn: Rc<TxnState>,
    name: String,
    id: u64,
}

impl MemoryStore {
    fn deleted(&self) -> StorageError {
        StorageError::invalid_state(format!("object store '{}' has been deleted", self.name))
    }

    /// Read the store's definition as this transaction sees it.
    fn with_store<R>(&self, f: impl FnOnce(&StoreData) -> R) -> StorageResult<R> {
        {
            let working = self.txn.working.borrow();
            if let Some(state) = working.as_ref() {
                return state
                    .stores
                    .get(&self.name)
                    .filter(|store| store.id == self.id)
                    .map(f)
                    .ok_or_else(|| self.deleted());
            }
        }
        let engine = upgrade(&self.engine)?;
        engine
            .with_database(&self.txn.db, |db| {
                db.stores
                    .get(&self.name)
                    .filter(|store| store.id == self.id)
                    .map(f)
            })
            .flatten()
            .ok_or_else(|| self.deleted())
    }

    fn write(
        &self,
        operation: &'static str,
        value: Value,
        key: Option<Key>,
        overwrite: bool,
    ) -> StorageResult<Request<Key>> {
        let engine = upgrade(&self.engine)?;
        engine.check_request(&self.txn, true)?;
        let key = self.with_store(|store| store.check_key(&value, key))??;
        let name = self.name.clone();
        let (job, request) = Operation::new(&self.name, operation, move |state| {
            state.store_mut(&name)?.write(value, key, overwrite)
        });
        engine.enqueue(&self.txn, Box::new(job));
        Ok(request)
    }

    fn submit<T: Clone + 'static>(
        &self,
        operation: &'static str,
        write: bool,
        body: impl FnOnce(&mut StoreData) -> StorageResult<T> + 'static,
    ) -> StorageResult<Request<T>> {
        let engine = upgrade(&self.engine)?;
        engine.check_request(&self.txn, write)?;
        self.with_store(|_| ())?;
        let name = self.name.clone();
        let (job, request) =
            Operation::new(&self.name, operation, move |state| body(state.store_mut(&name)?));
        engine.enqueue(&self.txn, Box::new(job));
        Ok(request)
    }
}

impl ObjectStore for MemoryStore {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn key_path(&self) -> StorageResult<Option<KeyPathSpec>> {
        self.with_store(|store| store.key_path.clone())
    }

    fn auto_increment(&self) -> StorageResult<bool> {
        self.with_store(|store| store.auto_increment)
    }

    fn index_names(&self) -> StorageResult<Vec<String>> {
        self.with_store(|store| store.indexes.keys().cloned().collect())
    }

    fn index(&self, name: &str) -> StorageResult<Rc<dyn Index>> {
        let engine = upgrade(&self.engine)?;
        if engine.index_fault(&self.txn.db, &self.name, name) {
            return Err(StorageError::unknown(format!(
                "injected failure reading index '{name}'"
            )));
        }
        let id = self
            .with_store(|store| store.indexes.get(name).map(|index| index.id))?
            .ok_or_else(|| StorageError::not_found("index", name))?;
        Ok(Rc::new(MemoryIndex {
            store: MemoryStore {
                engine: self.engine.clone(),
                txn: Rc::clone(&self.txn),
                name: self.name.clone(),
                id: self.id,
            },
            name: name.to_string(),
            id,
        }))
    }

    fn create_index(
        &self,
        name: &str,
        key_path: &KeyPathSpec,
        parameters: IndexParameters,
    ) -> StorageResult<Rc<dyn Index>> {
        check_schema_change(&self.txn)?;
        self.with_store(|_| ())?;
        {
            let mut working = self.txn.working.borrow_mut();
            let state = working
                .as_mut()
                .ok_or_else(|| StorageError::invalid_state("the upgrade has finished"))?;
            state.create_index(&self.name, name, key_path, parameters)?;
        }
        self.index(name)
    }

    fn delete_index(&self, name: &str) -> StorageResult<()> {
        check_schema_change(&self.txn)?;
        let mut working = self.txn.working.borrow_mut();
        let state = working
            .as_mut()
            .ok_or_else(|| StorageError::invalid_state("the upgrade has finished"))?;
        let store = state.store_mut(&self.name)?;
        if store.id != self.id {
            return Err(self.deleted());
        }
        store
            .indexes
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StorageError::not_found("index", name))
    }

    fn add(&self, value: Value, key: Option<Key>) -> StorageResult<Request<Key>> {
        self.write("add", value, key, false)
    }

    fn put(&self, value: Value, key: Option<Key>) -> StorageResult<Request<Key>> {
        self.write("put", value, key, true)
    }

    fn get(&self, key: Key) -> StorageResult<Request<Option<Value>>> {
        self.submit("get", false, move |store| store.read(&key))
    }

    fn delete(&self, key: Key) -> StorageResult<Request<()>> {
        self.submit("delete", true, move |store| {
            store.remove(&key);
            Ok(())
        })
    }

    fn count(&self) -> StorageResult<Request<u64>> {
        self.submit("count", false, |store| Ok(store.records.len() as u64))
    }

    fn clear(&self) -> StorageResult<Request<()>> {
        self.submit("clear", true, |store| {
            store.clear();
            Ok(())
        })
    }
}

pub(crate) struct MemoryIndex {
    store: MemoryStore,
    name: String,
    id: u64,
}

impl MemoryIndex {
    fn with_index<R>(&self, f: impl FnOnce(&IndexMeta) -> R) -> StorageResult<R> {
        self.store
            .with_store(|store| {
                store
                    .indexes
                    .get(&self.name)
                    .filter(|index| index.id == self.id)
                    .map(f)
            })?
            .ok_or_else(|| {
                StorageError::invalid_state(format!("index '{}' has been deleted", self.name))
            })
    }

    fn query<T: Clone + 'static>(
        &self,
        operation: &'static str,
        body: impl FnOnce(&StoreData, &IndexMeta) -> StorageResult<T> + 'static,
    ) -> StorageResult<Request<T>> {
        self.with_index(|_| ())?;
        let index = self.name.clone();
        self.store.submit(operation, false, move |store| {
            let meta = store
                .indexes
                .get(&index)
                .cloned()
                .ok_or_else(|| StorageError::not_found("index", index.as_str()))?;
            body(store, &meta)
        })
    }
}

impl Index for MemoryIndex {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn key_path(&self) -> StorageResult<KeyPathSpec> {
        self.with_index(|index| index.key_path.clone())
    }

    fn unique(&self) -> StorageResult<bool> {
        self.with_index(|index| index.unique)
    }

    fn multi_entry(&self) -> StorageResult<bool> {
        self.with_index(|index| index.multi_entry)
    }

    fn get(&self, key: Key) -> StorageResult<Request<Option<Value>>> {
        self.query("index.get", move |store, meta| {
            Ok(store.lookup(meta, &key)?.map(|(_, value)| value))
        })
    }

    fn get_key(&self, key: Key) -> StorageResult<Request<Option<Key>>> {
        self.query("index.getKey", move |store, meta| {
            Ok(store.lookup(meta, &key)?.map(|(primary, _)| primary))
        })
    }

    fn count(&self, key: Key) -> StorageResult<Request<u64>> {
        self.query("index.count", move |store, meta| store.count_indexed(meta, &key))
    }
}
