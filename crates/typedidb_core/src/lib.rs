//! # typedidb Core
//!
//! Typed access to an IndexedDB-shaped storage engine.
//!
//! This crate provides:
//! - A declared [`Schema`] that is reconciled against the physical schema
//!   whenever an open upgrades the database
//! - [`DatabaseFactory`] and [`Database`] for the open, close and delete
//!   lifecycle, with blocked opens reported as errors
//! - [`Scope`]s over engine transactions with typed [`StoreAccessor`]s
//! - [`RequestHandle`] continuations that keep a transaction alive across
//!   a chain of dependent requests
//!
//! ## Example
//!
//! ```rust
//! use std::rc::Rc;
//! use serde::{Deserialize, Serialize};
//! use typedidb_core::{DatabaseFactory, KeyPathSpec, Schema, StoreSpec, TransactionMode};
//! use typedidb_storage::InMemoryEngine;
//!
//! #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
//! struct Note {
//!     id: i64,
//!     text: String,
//! }
//!
//! let engine = InMemoryEngine::new();
//! let schema = Schema::new().store(StoreSpec::new("notes").key_path(KeyPathSpec::parse("id").unwrap()));
//! let factory = DatabaseFactory::new(Rc::new(engine.clone()), schema).unwrap();
//!
//! let db = engine.block_on(factory.open("app", Some(1))).unwrap().unwrap();
//! let scope = db.transaction(&["notes"], TransactionMode::ReadWrite).unwrap();
//! let notes = scope.store::<Note>("notes").unwrap();
//!
//! // The get is issued from inside the add's completion.
//! let note = Note { id: 1, text: "hello".into() };
//! let read = notes
//!     .add(&note)
//!     .unwrap()
//!     .and_then(move |key| notes.get(key));
//! let read = engine.block_on(scope.after_commit(read)).unwrap().unwrap();
//! assert_eq!(read, Some(note));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod database;
mod error;
mod reconcile;
mod record;
mod request;
mod schema;
mod scope;
#[cfg(test)]
mod testing;

pub use config::{Config, StoreCompatibility};
pub use database::{Database, DatabaseFactory, HandleState};
pub use error::{CoreError, CoreResult, ErrorKind};
pub use reconcile::{reconcile, PhysicalIndex, PhysicalStore, ReconcileReport, SchemaAction};
pub use record::Record;
pub use request::{AsyncResult, RequestHandle};
pub use schema::{IndexSpec, Schema, StoreSpec};
pub use scope::{IndexAccessor, Scope, ScopeState, StoreAccessor};

pub use typedidb_codec::{Key, Value};
pub use typedidb_storage::{DatabaseInfo, Durability, KeyPathSpec, TransactionMode, VersionChange};

/// Crate version, for diagnostics.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
