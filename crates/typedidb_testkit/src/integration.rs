//! Cross-crate integration scenarios.
//!
//! Each scenario drives a [`TestEnv`] through the core crate and asserts on
//! what the engine committed. They are exposed so other crates can rerun
//! them against their own configuration.

use serde::{Deserialize, Serialize};
use typedidb_core::{
    CoreError, Database, IndexSpec, Key, KeyPathSpec, ReconcileReport, Schema, StoreSpec,
    TransactionMode,
};
use typedidb_storage::{EngineEvent, TransactionOutcome};

use crate::fixtures::TestEnv;

/// A two-field record for reconciliation scenarios.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// First candidate key.
    pub a: String,
    /// Second candidate key.
    pub b: String,
}

impl Item {
    /// Creates an item.
    pub fn new(a: &str, b: &str) -> Self {
        Self {
            a: a.to_string(),
            b: b.to_string(),
        }
    }
}

/// Name of the store used by [`items_schema`].
pub const ITEMS: &str = "items";

/// A schema with a single `items` store.
pub fn items_schema(key_path: &str, auto_increment: bool, index: Option<IndexSpec>) -> Schema {
    let mut store = StoreSpec::new(ITEMS)
        .key_path(KeyPathSpec::parse(key_path).expect("scenario key path"))
        .auto_increment(auto_increment);
    if let Some(index) = index {
        store = store.index(index);
    }
    Schema::new().store(store)
}

/// Writes `items` into the `items` store and waits for the commit.
pub fn seed_items(env: &TestEnv, db: &Database, items: &[Item]) {
    let scope = db
        .transaction(&[ITEMS], TransactionMode::ReadWrite)
        .expect("scope");
    let store = scope.store::<Item>(ITEMS).expect("store");
    let written = store.put_all(items.to_vec()).expect("put_all");
    env.run(scope.after_commit(written)).expect("seed commit");
}

/// Number of committed records in `store` of `db`.
pub fn committed_count(env: &TestEnv, db: &str, store: &str) -> usize {
    env.engine
        .describe(db)
        .and_then(|description| description.stores.into_iter().find(|s| s.name == store))
        .map_or(0, |s| s.record_count)
}

/// Opens `name` at `version` with `schema`, then closes it again.
pub fn open_with(env: &TestEnv, schema: Schema, name: &str, version: u64) -> ReconcileReport {
    let db = env
        .run(env.factory_for(schema).open(name, Some(version)))
        .expect("open");
    let report = db.reconcile_report().cloned().expect("upgrade ran");
    db.close();
    env.settle();
    report
}

/// Reconciliation across reopens.
pub mod reconcile {
    use super::*;
    use typedidb_core::SchemaAction;

    /// Reopening with an identical schema changes nothing.
    pub fn identical_reopen_is_noop(env: &TestEnv, name: &str) {
        let schema = items_schema("a", false, None);
        let first = open_with(env, schema.clone(), name, 1);
        assert!(!first.is_noop());

        let second = open_with(env, schema, name, 2);
        assert!(second.is_noop(), "{second:?}");
        assert_eq!(second.old_version, 1);
        assert_eq!(second.new_version, 2);
    }

    /// A store whose key path and generator both changed is recreated and
    /// loses its records.
    pub fn both_differ_recreates(env: &TestEnv, name: &str) {
        let db = env
            .run(env.factory_for(items_schema("a", false, None)).open(name, Some(1)))
            .expect("open");
        seed_items(env, &db, &[Item::new("x", "y")]);
        db.close();
        env.settle();
        assert_eq!(committed_count(env, name, ITEMS), 1);

        let report = open_with(env, items_schema("b", true, None), name, 2);
        assert_eq!(report.recreated_stores(), vec![ITEMS]);
        assert_eq!(committed_count(env, name, ITEMS), 0);
    }

    /// A store with one matching property keeps its records.
    pub fn one_match_keeps(env: &TestEnv, name: &str) {
        let db = env
            .run(env.factory_for(items_schema("a", false, None)).open(name, Some(1)))
            .expect("open");
        seed_items(env, &db, &[Item::new("x", "y")]);
        db.close();
        env.settle();

        let report = open_with(env, items_schema("a", true, None), name, 2);
        assert_eq!(
            report.actions,
            vec![SchemaAction::KeepStore {
                store: ITEMS.to_string()
            }]
        );
        assert_eq!(committed_count(env, name, ITEMS), 1);
    }

    /// `by_b` on `b`, as first declared by [`changed_index_recreated`].
    pub fn by_b() -> IndexSpec {
        IndexSpec::new("by_b", KeyPathSpec::parse("b").expect("path"))
    }

    /// Redeclaring `by_b` as `changed` recreates the index while the
    /// store's records stay.
    pub fn changed_index_recreated(env: &TestEnv, name: &str, changed: IndexSpec) {
        let db = env
            .run(
                env.factory_for(items_schema("a", false, Some(by_b())))
                    .open(name, Some(1)),
            )
            .expect("open");
        seed_items(env, &db, &[Item::new("x", "y")]);
        db.close();
        env.settle();

        let report = open_with(env, items_schema("a", false, Some(changed.clone())), name, 2);
        assert!(matches!(
            report.actions.as_slice(),
            [
                SchemaAction::KeepStore { .. },
                SchemaAction::RecreateIndex { index, previous, .. },
            ] if index == "by_b" && previous.key_path == by_b().key_path
        ));
        let description = env.engine.describe(name).expect("database");
        let store = &description.stores[0];
        assert_eq!(store.record_count, 1);
        let index = &store.indexes[0];
        assert_eq!(index.key_path, changed.key_path);
        assert_eq!(index.unique, changed.unique);
        assert_eq!(index.multi_entry, changed.multi_entry);
    }
}

/// Typed reads and writes.
pub mod round_trip {
    use super::*;
    use crate::fixtures::{SampleRecord, COMPOSITE_STORE, NESTED_STORE};
    use typedidb_core::Key;

    /// A record keyed by a nested path reads back by that key.
    pub fn nested_key(env: &TestEnv, db: &Database) {
        let scope = db
            .transaction(&[NESTED_STORE], TransactionMode::ReadWrite)
            .expect("scope");
        let store = scope.store::<SampleRecord>(NESTED_STORE).expect("store");
        let reader = store.clone();
        let read = store
            .put(&SampleRecord::hello())
            .expect("put")
            .and_then(move |key| {
                assert_eq!(key, Key::from("hello"));
                reader.get(key)
            });
        let read = env.run(scope.after_commit(read)).expect("read");
        assert_eq!(read, Some(SampleRecord::hello()));
    }

    /// A record keyed by a composite path reads back by the array key.
    pub fn composite_key(env: &TestEnv, db: &Database) {
        let scope = db
            .transaction(&[COMPOSITE_STORE], TransactionMode::ReadWrite)
            .expect("scope");
        let store = scope.store::<SampleRecord>(COMPOSITE_STORE).expect("store");
        let expected = Key::Array(vec![Key::from("hello"), Key::from(5)]);
        assert_eq!(store.key_of(&SampleRecord::hello()).expect("key"), expected);

        let reader = store.clone();
        let lookup = expected.clone();
        let read = store
            .put(&SampleRecord::hello())
            .expect("put")
            .and_then(move |key| {
                assert_eq!(key, lookup);
                reader.get(key)
            });
        let read = env.run(scope.after_commit(read)).expect("read");
        assert_eq!(read, Some(SampleRecord::hello()));
    }
}

/// Continuation chains inside one transaction.
pub mod chaining {
    use super::*;
    use crate::fixtures::{Note, GENERATED_STORE};

    /// Requests `(transaction, store, operation)` in the order they were
    /// issued.
    pub fn issued(env: &TestEnv) -> Vec<(u64, String, &'static str)> {
        env.engine
            .events()
            .into_iter()
            .filter_map(|event| match event {
                EngineEvent::RequestIssued {
                    transaction,
                    store,
                    operation,
                } => Some((transaction, store, operation)),
                _ => None,
            })
            .collect()
    }

    /// How each transaction ended, in order.
    pub fn finished(env: &TestEnv) -> Vec<(u64, TransactionOutcome)> {
        env.engine
            .events()
            .into_iter()
            .filter_map(|event| match event {
                EngineEvent::TransactionFinished { id, outcome } => Some((id, outcome)),
                _ => None,
            })
            .collect()
    }

    /// A dependent request is issued after its predecessor, in the same
    /// transaction, which then commits.
    pub fn chain_preserves_order(env: &TestEnv, db: &Database) {
        env.engine.clear_events();
        let scope = db
            .transaction(&[GENERATED_STORE], TransactionMode::ReadWrite)
            .expect("scope");
        let store = scope.store::<Note>(GENERATED_STORE).expect("store");
        let reader = store.clone();
        let read = store
            .add(&Note::new("first"))
            .expect("add")
            .and_then(move |key| reader.get(key));
        let note = env.run(scope.after_commit(read)).expect("read").expect("note");
        assert_eq!(note.title, "first");
        assert!(note.id.is_some());

        let issued = issued(env);
        let operations: Vec<_> = issued.iter().map(|(_, _, op)| *op).collect();
        assert_eq!(operations, vec!["add", "get"]);
        assert_eq!(issued[0].0, issued[1].0);
        assert_eq!(
            finished(env),
            vec![(issued[0].0, TransactionOutcome::Committed)]
        );
    }

    /// `cont2` carries the first key past a second write to a final read,
    /// all in one transaction.
    pub fn chain_carries_first_key(env: &TestEnv, db: &Database) {
        env.engine.clear_events();
        let scope = db
            .transaction(&[GENERATED_STORE], TransactionMode::ReadWrite)
            .expect("scope");
        let store = scope.store::<Note>(GENERATED_STORE).expect("store");
        let writer = store.clone();
        let reader = store.clone();
        let (first_key, second) = env
            .run(
                store
                    .add(&Note::new("carried A"))
                    .expect("add")
                    .cont2(move |_| writer.add(&Note::new("carried B"))),
            )
            .expect("first add");
        let lookup = first_key.clone();
        let read = second.and_then(move |_| reader.get(lookup));
        let note = env.run(scope.after_commit(read)).expect("read").expect("note");
        assert_eq!(note.title, "carried A");
        assert_eq!(note.id.map(Key::Number), Some(first_key));

        let issued = issued(env);
        let operations: Vec<_> = issued.iter().map(|(_, _, op)| *op).collect();
        assert_eq!(operations, vec!["add", "add", "get"]);
        assert!(issued.iter().all(|(txn, _, _)| *txn == issued[0].0));
        assert_eq!(
            finished(env),
            vec![(issued[0].0, TransactionOutcome::Committed)]
        );
    }

    /// A failing request stops the chain and rolls the transaction back.
    pub fn failure_short_circuits(env: &TestEnv, db: &Database) {
        env.engine.clear_events();
        let before = committed_count(env, db.name(), GENERATED_STORE);
        let scope = db
            .transaction(&[GENERATED_STORE], TransactionMode::ReadWrite)
            .expect("scope");
        let store = scope.store::<Note>(GENERATED_STORE).expect("store");
        let second = store.clone();
        let reader = store.clone();
        let chain = store
            .add(&Note::new("dup"))
            .expect("add")
            .and_then(move |_| second.add(&Note::new("dup")))
            .and_then(move |key| reader.get(key));

        let err = env.run(scope.after_commit(chain)).unwrap_err();
        assert!(
            matches!(
                &err,
                CoreError::RequestFailed { operation: "add", .. }
            ),
            "{err:?}"
        );
        let operations: Vec<_> = issued(env).into_iter().map(|(_, _, op)| op).collect();
        assert_eq!(operations, vec!["add", "add"]);
        assert!(matches!(
            finished(env).as_slice(),
            [(_, TransactionOutcome::Failed(_))]
        ));
        assert_eq!(committed_count(env, db.name(), GENERATED_STORE), before);
    }

    /// A chain of `length` dependent writes keeps its transaction alive to
    /// the end.
    pub fn long_chain_stays_live(env: &TestEnv, db: &Database, length: usize) {
        let scope = db
            .transaction(&[GENERATED_STORE], TransactionMode::ReadWrite)
            .expect("scope");
        let store = scope.store::<Note>(GENERATED_STORE).expect("store");
        let notes = (0..length).map(|i| Note::new(format!("note {i}")));
        let writer = store.clone();
        let counter = store.clone();
        let count = store
            .clear()
            .expect("clear")
            .and_then(move |()| writer.add_all(notes))
            .and_then(move |_| counter.count());
        let count = env.run(scope.after_commit(count)).expect("count");
        assert_eq!(count, length as u64);
    }
}

/// Open, close and delete against other connections.
pub mod lifecycle {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;
    use typedidb_core::VersionChange;

    /// An upgrade held up by a connection that stays open fails as blocked.
    pub fn blocked_open(env: &TestEnv, name: &str) {
        let _holder = env.open(name, Some(1));
        let err = env.try_open(name, Some(2)).unwrap_err();
        assert_eq!(
            err,
            CoreError::OpenBlocked {
                name: name.to_string(),
                old_version: 1,
                new_version: 2,
            }
        );
    }

    /// Asking for an older version reports both versions.
    pub fn version_conflict(env: &TestEnv, name: &str) {
        drop(env.open(name, Some(3)));
        env.settle();
        let err = env.try_open(name, Some(2)).unwrap_err();
        assert_eq!(
            err,
            CoreError::VersionConflict {
                name: name.to_string(),
                requested: 2,
                current: 3,
            }
        );
    }

    /// Deleting under an open connection fails as blocked.
    pub fn blocked_delete(env: &TestEnv, name: &str) {
        let _holder = env.open(name, Some(1));
        let err = env.run(env.factory.delete_database(name)).unwrap_err();
        assert_eq!(
            err,
            CoreError::DeleteBlocked {
                name: name.to_string()
            }
        );
    }

    /// A connection closes itself when another asks to upgrade.
    pub fn closes_on_version_change(env: &TestEnv, name: &str) {
        let old = env.open(name, Some(1));
        let seen: Rc<RefCell<Vec<VersionChange>>> = Rc::default();
        let sink = Rc::clone(&seen);
        old.on_version_change(move |change| sink.borrow_mut().push(change.clone()));

        let new = env.open(name, Some(2));
        assert_eq!(new.version(), 2);
        assert!(old.is_closed());
        let seen = seen.borrow();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].old_version, 1);
        assert_eq!(seen[0].new_version, Some(2));
    }
}

/// Misuse reported synchronously.
pub mod usage {
    use super::*;
    use crate::fixtures::{Note, SampleRecord, GENERATED_STORE, NESTED_STORE, OUT_OF_LINE_STORE};
    use typedidb_core::ErrorKind;

    /// Scopes over nothing, unknown stores or closed handles are refused.
    pub fn bad_scopes(db: &Database) {
        assert_eq!(
            db.transaction(&[], TransactionMode::ReadOnly).unwrap_err(),
            CoreError::EmptyScope
        );
        assert_eq!(
            db.transaction(&["nope"], TransactionMode::ReadOnly).unwrap_err(),
            CoreError::UnknownStore {
                name: "nope".to_string()
            }
        );
        let scope = db
            .transaction(&[NESTED_STORE], TransactionMode::ReadOnly)
            .expect("scope");
        assert!(matches!(
            scope.store::<SampleRecord>(GENERATED_STORE),
            Err(CoreError::UnknownStore { .. })
        ));
        let store = scope.store::<SampleRecord>(NESTED_STORE).expect("store");
        assert!(matches!(
            store.index("missing"),
            Err(CoreError::UnknownIndex { .. })
        ));
    }

    /// Explicit keys, missing keys and read-only writes are rejected.
    pub fn bad_keys(env: &TestEnv, db: &Database) {
        let scope = db
            .transaction(
                &[NESTED_STORE, OUT_OF_LINE_STORE],
                TransactionMode::ReadWrite,
            )
            .expect("scope");
        let nested = scope.store::<SampleRecord>(NESTED_STORE).expect("store");
        let loose = scope.store::<Note>(OUT_OF_LINE_STORE).expect("store");

        let err = nested
            .put_with_key(&SampleRecord::hello(), "other")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Usage);
        let err = loose.add(&Note::new("keyless")).unwrap_err();
        assert!(matches!(err, CoreError::KeyUsage { .. }));
        assert!(loose.add_with_key(&Note::new("keyed"), 1).is_ok());
        env.run(scope.completion()).expect("commit");

        let read_only = db
            .transaction(&[NESTED_STORE], TransactionMode::ReadOnly)
            .expect("scope");
        let store = read_only
            .store::<SampleRecord>(NESTED_STORE)
            .expect("store");
        assert!(matches!(
            store.put(&SampleRecord::hello()),
            Err(CoreError::RequestFailed { .. })
        ));
    }

    /// Accessors refuse work once their scope has ended.
    pub fn finished_scope(env: &TestEnv, db: &Database) {
        let scope = db
            .transaction(&[NESTED_STORE], TransactionMode::ReadWrite)
            .expect("scope");
        let store = scope.store::<SampleRecord>(NESTED_STORE).expect("store");
        env.run(scope.completion()).expect("commit");
        assert!(matches!(
            store.get("hello"),
            Err(CoreError::ScopeFinished { .. })
        ));
        assert!(matches!(scope.abort(), Err(CoreError::ScopeFinished { .. })));
        assert!(matches!(
            scope.store::<SampleRecord>(NESTED_STORE),
            Err(CoreError::ScopeFinished { .. })
        ));
    }

    /// A closed handle cannot start scopes.
    pub fn closed_handle(db: &Database) {
        db.close();
        assert!(matches!(
            db.transaction(&[NESTED_STORE], TransactionMode::ReadOnly),
            Err(CoreError::DatabaseClosed { .. })
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{unique_db_name, with_test_db};
    use typedidb_core::Config;

    fn holding_env() -> TestEnv {
        TestEnv::with_config(
            crate::fixtures::sample_schema(),
            Config::new().close_on_version_change(false),
        )
    }

    #[test]
    fn test_reconcile_scenarios() {
        let env = TestEnv::new();
        reconcile::identical_reopen_is_noop(&env, &unique_db_name("noop"));
        reconcile::both_differ_recreates(&env, &unique_db_name("recreate"));
        reconcile::one_match_keeps(&env, &unique_db_name("keep"));
        reconcile::changed_index_recreated(
            &env,
            &unique_db_name("index"),
            reconcile::by_b().unique(true),
        );
    }

    #[test]
    fn reconcile_changed_index_key_path() {
        let env = holding_env();
        let on_a = IndexSpec::new("by_b", KeyPathSpec::parse("a").unwrap());
        reconcile::changed_index_recreated(&env, &unique_db_name("index_path"), on_a);
    }

    #[test]
    fn reconcile_changed_index_multi_entry() {
        let env = holding_env();
        reconcile::changed_index_recreated(
            &env,
            &unique_db_name("index_multi"),
            reconcile::by_b().multi_entry(true),
        );
    }

    #[test]
    fn test_round_trips() {
        with_test_db(|env, db| {
            round_trip::nested_key(env, db);
            round_trip::composite_key(env, db);
        });
    }

    #[test]
    fn test_chaining() {
        with_test_db(|env, db| {
            chaining::chain_preserves_order(env, db);
            chaining::chain_carries_first_key(env, db);
            chaining::failure_short_circuits(env, db);
            chaining::long_chain_stays_live(env, db, 200);
        });
    }

    #[test]
    fn test_lifecycle() {
        lifecycle::blocked_open(&holding_env(), &unique_db_name("blocked"));
        lifecycle::blocked_delete(&holding_env(), &unique_db_name("delete"));
        let env = TestEnv::new();
        lifecycle::version_conflict(&env, &unique_db_name("conflict"));
        lifecycle::closes_on_version_change(&env, &unique_db_name("versionchange"));
    }

    #[test]
    fn test_usage_errors() {
        with_test_db(|env, db| {
            usage::bad_scopes(db);
            usage::bad_keys(env, db);
            usage::finished_scope(env, db);
            usage::closed_handle(db);
        });
    }
}
