//! Benchmarks for typedidb.
//!
//! Shared helpers live in [`utils`]; the benchmarks themselves are under
//! `benches/`.

pub mod utils;
