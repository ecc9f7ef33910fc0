//! # typedidb Storage
//!
//! The storage engine capability for typedidb, and an in-memory engine.
//!
//! typedidb sits on top of an IndexedDB-shaped engine: databases are opened
//! at a version, schema changes happen only inside the upgrade transaction
//! of an open, and every data operation is an event-driven [`Request`] that
//! belongs to a transaction. A transaction commits on its own as soon as it
//! has nothing outstanding and control has returned to the event loop.
//!
//! ## Design Principles
//!
//! - The engine is single threaded; handles are `Rc` and callbacks are not
//!   `Send`
//! - Engines store [`Value`](typedidb_codec::Value)s, never typed records
//! - Lookups that miss report [`StorageError::NotFound`], which callers can
//!   tell apart from every other failure
//!
//! ## Available Engines
//!
//! - [`InMemoryEngine`] - Runs the full processing model on a private event
//!   loop; used by tests, benchmarks and the CLI
//!
//! ## Example
//!
//! ```rust
//! use typedidb_storage::{
//!     Durability, InMemoryEngine, KeyPathSpec, StorageEngine, StoreParameters, TransactionMode,
//! };
//! use typedidb_codec::{Key, Value};
//!
//! let engine = InMemoryEngine::new();
//! let open = engine.open("notes", Some(1));
//! open.on_upgrade_needed(|_, upgrade| {
//!     let params = StoreParameters {
//!         key_path: Some(KeyPathSpec::parse("id").unwrap()),
//!         auto_increment: false,
//!     };
//!     upgrade.create_object_store("notes", &params)?;
//!     Ok(())
//! });
//! engine.run_until_idle();
//! let db = open.result().outcome().unwrap().unwrap();
//!
//! let txn = db
//!     .transaction(&["notes".to_string()], TransactionMode::ReadWrite, Durability::Default)
//!     .unwrap();
//! let notes = txn.object_store("notes").unwrap();
//! let record = Value::object([("id", Value::from(1)), ("text", Value::from("hi"))]);
//! let put = notes.put(record, None).unwrap();
//! engine.run_until_idle();
//! assert_eq!(put.outcome(), Some(Ok(Key::from(1))));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod engine;
mod error;
mod key_path;
mod memory;
mod request;

pub use engine::{
    Connection, DatabaseInfo, DeleteRequest, Durability, Index, IndexParameters, ObjectStore,
    OpenRequest, StorageEngine, StoreParameters, Transaction, TransactionMode, TransactionOutcome,
    UpgradeTransaction, VersionChange,
};
pub use error::{StorageError, StorageResult};
pub use key_path::{KeyPath, KeyPathError, KeyPathSpec};
pub use memory::{
    DatabaseDescription, EngineEvent, InMemoryEngine, IndexDescription, StoreDescription,
    SNAPSHOT_FORMAT_VERSION,
};
pub use request::Request;
