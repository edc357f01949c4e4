//! Database access layer.
//!
//! This module provides:
//! - Connection registry and per-URL targets
//! - Schema reflection and caching
//! - Statement rendering per dialect
//! - Merge (native or emulated upsert)
//! - Transaction scopes and query execution
//! - Database dispatch macros for reducing code duplication

#[macro_use]
pub mod macros;
pub mod database;
pub mod executor;
pub mod merge;
pub mod params;
pub mod pool;
pub mod schema;
pub mod script;
pub mod statement;
pub mod transaction;
pub mod types;

pub use database::Database;
pub use executor::QueryExecutor;
pub use merge::MergeEngine;
pub use pool::{ConnectionRegistry, DbPool, Target};
pub use schema::SchemaCatalog;
pub use statement::{SelectOptions, Statement, StatementBuilder};
pub use transaction::{DbTransaction, TransactionScope};
