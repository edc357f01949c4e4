//! Relational database access layer.
//!
//! This library provides a connection registry, a schema reflection cache,
//! dialect-aware CRUD statements and a cross-dialect merge engine for
//! SQL databases (SQLite, PostgreSQL, MySQL).
//!
//! ```no_run
//! use db_access::{ConnectionRegistry, Database, MergeSpec};
//!
//! # async fn demo() -> db_access::DbResult<()> {
//! let registry = ConnectionRegistry::new();
//! let db = Database::connect(&registry, "sqlite:prices.db").await?;
//! let outcome = db.merge(&MergeSpec::new("prices_staging", "prices")).await?;
//! println!("{} rows via {}", outcome.rows_affected, outcome.strategy);
//! registry.close_all().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod models;

pub use config::{Config, PoolOptions};
pub use db::{
    ConnectionRegistry, Database, SchemaCatalog, SelectOptions, StatementBuilder, Target,
    TransactionScope,
};
pub use error::{DbError, DbResult};
pub use models::{
    DatabaseType, MergeOutcome, MergeSpec, MergeStrategy, Predicate, Record, TableHandle,
    TableRef, Value,
};
