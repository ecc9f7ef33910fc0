//! Schema reconciliation.
//!
//! Runs inside the upgrade transaction of an open and brings the physical
//! schema in line with a declared [`Schema`]:
//!
//! - a declared store that does not exist is created with its indexes
//! - an existing store that passes the [`StoreCompatibility`] rule is kept
//!   and its indexes are reconciled one by one
//! - an incompatible store is deleted and recreated, losing its records
//! - an index whose key path, uniqueness or multi-entry flag differs is
//!   deleted and recreated
//!
//! Stores and indexes that are not declared are left alone. Any failure
//! other than "not found" while reading the physical schema aborts the
//! upgrade rather than being mistaken for absence.

use serde::Serialize;
use tracing::debug;
use typedidb_storage::{
    Index, IndexParameters, KeyPathSpec, ObjectStore, StorageError, StorageResult,
    UpgradeTransaction,
};

use crate::config::StoreCompatibility;
use crate::error::{CoreError, CoreResult};
use crate::schema::{IndexSpec, Schema, StoreSpec};

/// Physical shape of an existing object store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhysicalStore {
    /// Key path the store was created with.
    pub key_path: Option<KeyPathSpec>,
    /// Whether the store generates keys.
    pub auto_increment: bool,
}

impl PhysicalStore {
    fn read(store: &dyn ObjectStore) -> StorageResult<Self> {
        Ok(Self {
            key_path: store.key_path()?,
            auto_increment: store.auto_increment()?,
        })
    }

    /// Whether this store may be kept for `spec` under `rule`.
    #[must_use]
    pub fn compatible_with(&self, spec: &StoreSpec, rule: StoreCompatibility) -> bool {
        rule.accepts(
            self.key_path == spec.key_path,
            self.auto_increment == spec.auto_increment,
        )
    }
}

/// Physical shape of an existing index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhysicalIndex {
    /// Indexed key path.
    pub key_path: KeyPathSpec,
    /// Uniqueness flag.
    pub unique: bool,
    /// Multi-entry flag.
    pub multi_entry: bool,
}

impl PhysicalIndex {
    fn read(index: &dyn Index) -> StorageResult<Self> {
        Ok(Self {
            key_path: index.key_path()?,
            unique: index.unique()?,
            multi_entry: index.multi_entry()?,
        })
    }

    /// Whether this index already matches `spec`.
    #[must_use]
    pub fn matches(&self, spec: &IndexSpec) -> bool {
        self.key_path == spec.key_path
            && self.unique == spec.unique
            && self.multi_entry == spec.multi_entry
    }
}

/// One reconciliation decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum SchemaAction {
    /// The store did not exist and was created.
    CreateStore {
        /// Store name.
        store: String,
    },
    /// The store was compatible and kept with its records.
    KeepStore {
        /// Store name.
        store: String,
    },
    /// The store was incompatible and recreated empty.
    RecreateStore {
        /// Store name.
        store: String,
        /// What it looked like before.
        previous: PhysicalStore,
    },
    /// The index did not exist and was created.
    CreateIndex {
        /// Store name.
        store: String,
        /// Index name.
        index: String,
    },
    /// The index matched and was kept.
    KeepIndex {
        /// Store name.
        store: String,
        /// Index name.
        index: String,
    },
    /// The index differed and was recreated.
    RecreateIndex {
        /// Store name.
        store: String,
        /// Index name.
        index: String,
        /// What it looked like before.
        previous: PhysicalIndex,
    },
}

impl SchemaAction {
    /// Whether the action changed the physical schema.
    #[must_use]
    pub fn is_change(&self) -> bool {
        !matches!(self, Self::KeepStore { .. } | Self::KeepIndex { .. })
    }
}

/// What a reconciliation did, in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    /// Version before the upgrade.
    pub old_version: u64,
    /// Version after the upgrade.
    pub new_version: u64,
    /// Decisions in the order they were applied.
    pub actions: Vec<SchemaAction>,
}

impl ReconcileReport {
    /// Whether nothing was created or recreated.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        !self.actions.iter().any(SchemaAction::is_change)
    }

    /// Stores that were recreated and so lost their records.
    #[must_use]
    pub fn recreated_stores(&self) -> Vec<&str> {
        self.actions
            .iter()
            .filter_map(|action| match action {
                SchemaAction::RecreateStore { store, .. } => Some(store.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// Reconciles the physical schema visible through `upgrade` with `desired`.
///
/// # Errors
///
/// Returns [`CoreError::ReconciliationFailed`] naming the store (and index)
/// whose introspection, creation or deletion failed. The caller is expected
/// to abort the upgrade.
pub fn reconcile(
    desired: &Schema,
    upgrade: &dyn UpgradeTransaction,
    rule: StoreCompatibility,
) -> CoreResult<ReconcileReport> {
    let mut report = ReconcileReport {
        old_version: upgrade.old_version(),
        new_version: upgrade.new_version(),
        actions: Vec::new(),
    };

    for spec in &desired.stores {
        let fail = |source: StorageError| CoreError::reconciliation(&spec.name, None, source);
        match upgrade.object_store(&spec.name) {
            Err(err) if err.is_not_found() => {
                debug!(store = %spec.name, "creating object store");
                report.actions.push(SchemaAction::CreateStore {
                    store: spec.name.clone(),
                });
                create_store(upgrade, spec, &mut report)?;
            }
            Err(err) => return Err(fail(err)),
            Ok(store) => {
                let previous = PhysicalStore::read(&*store).map_err(fail)?;
                if previous.compatible_with(spec, rule) {
                    report.actions.push(SchemaAction::KeepStore {
                        store: spec.name.clone(),
                    });
                    reconcile_indexes(&*store, spec, &mut report)?;
                } else {
                    debug!(
                        store = %spec.name,
                        ?previous,
                        "object store is incompatible, recreating"
                    );
                    upgrade.delete_object_store(&spec.name).map_err(fail)?;
                    report.actions.push(SchemaAction::RecreateStore {
                        store: spec.name.clone(),
                        previous,
                    });
                    create_store(upgrade, spec, &mut report)?;
                }
            }
        }
    }

    debug!(
        old_version = report.old_version,
        new_version = report.new_version,
        actions = report.actions.len(),
        "reconciled schema"
    );
    Ok(report)
}

fn create_store(
    upgrade: &dyn UpgradeTransaction,
    spec: &StoreSpec,
    report: &mut ReconcileReport,
) -> CoreResult<()> {
    let store = upgrade
        .create_object_store(&spec.name, &spec.parameters())
        .map_err(|source| CoreError::reconciliation(&spec.name, None, source))?;
    for index in &spec.indexes {
        create_index(&*store, &spec.name, index)?;
        report.actions.push(SchemaAction::CreateIndex {
            store: spec.name.clone(),
            index: index.name.clone(),
        });
    }
    Ok(())
}

fn create_index(store: &dyn ObjectStore, store_name: &str, spec: &IndexSpec) -> CoreResult<()> {
    let parameters = IndexParameters {
        unique: spec.unique,
        multi_entry: spec.multi_entry,
    };
    store
        .create_index(&spec.name, &spec.key_path, parameters)
        .map_err(|source| CoreError::reconciliation(store_name, Some(spec.name.as_str()), source))?;
    Ok(())
}

fn reconcile_indexes(
    store: &dyn ObjectStore,
    spec: &StoreSpec,
    report: &mut ReconcileReport,
) -> CoreResult<()> {
    for index in &spec.indexes {
        let fail = |source: StorageError| {
            CoreError::reconciliation(&spec.name, Some(index.name.as_str()), source)
        };
        match store.index(&index.name) {
            Err(err) if err.is_not_found() => {
                create_index(store, &spec.name, index)?;
                report.actions.push(SchemaAction::CreateIndex {
                    store: spec.name.clone(),
                    index: index.name.clone(),
                });
            }
            Err(err) => return Err(fail(err)),
            Ok(physical) => {
                let previous = PhysicalIndex::read(&*physical).map_err(fail)?;
                if previous.matches(index) {
                    report.actions.push(SchemaAction::KeepIndex {
                        store: spec.name.clone(),
                        index: index.name.clone(),
                    });
                } else {
                    debug!(store = %spec.name, index = %index.name, "recreating index");
                    store.delete_index(&index.name).map_err(fail)?;
                    create_index(store, &spec.name, index)?;
                    report.actions.push(SchemaAction::RecreateIndex {
                        store: spec.name.clone(),
                        index: index.name.clone(),
                        previous,
                    });
                }
            }
        }
    }
    Ok(())
}
