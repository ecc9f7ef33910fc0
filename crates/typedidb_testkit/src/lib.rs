//! # typedidb Testkit
//!
//! Test utilities for typedidb.
//!
//! This crate provides:
//! - Test fixtures: an in-memory engine, a sample schema and open helpers
//! - Property-based test generators using proptest
//! - Cross-crate integration scenarios
//! - Fuzz testing harnesses
//! - Stress testing utilities
//! - Shared test vectors
//!
//! ## Usage
//!
//! ```rust
//! use typedidb_testkit::prelude::*;
//! use typedidb_core::TransactionMode;
//!
//! with_test_db(|env, db| {
//!     let scope = db.transaction(&[NESTED_STORE], TransactionMode::ReadWrite).unwrap();
//!     let store = scope.store::<SampleRecord>(NESTED_STORE).unwrap();
//!     let written = store.put(&SampleRecord::hello()).unwrap();
//!     env.run(scope.after_commit(written)).unwrap();
//! });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod fuzz;
pub mod generators;
pub mod integration;
pub mod stress;
pub mod vectors;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::fuzz::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
    pub use crate::stress::*;
    pub use crate::vectors::*;
}

pub use fixtures::*;
pub use fuzz::*;
pub use generators::*;
pub use integration::*;
pub use stress::*;
pub use vectors::*;
