//! Data models for the data-access layer.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;
pub mod merge;
pub mod schema;
pub mod value;

// Re-export commonly used types
pub use connection::{DatabaseType, ServerVersion, mask_connection_string};
pub use merge::{MergeOutcome, MergePlan, MergeSpec, MergeStrategy};
pub use schema::{ColumnDefinition, TableHandle, TableRef};
pub use value::{Predicate, Record, Value};
