//! Parameter binding utilities for database queries.
//!
//! This module binds [`Value`]s to database-specific query objects. Each
//! dialect gets its own function because the set of encodable Rust types
//! differs per driver.

use crate::models::Value;
use sqlx::mysql::MySqlArguments;
use sqlx::postgres::PgArguments;
use sqlx::sqlite::SqliteArguments;
use sqlx::{MySql, Postgres, Sqlite};

/// Bind a parameter to a MySQL query.
pub(crate) fn bind_mysql_param<'q>(
    query: sqlx::query::Query<'q, MySql, MySqlArguments>,
    param: &'q Value,
) -> sqlx::query::Query<'q, MySql, MySqlArguments> {
    match param {
        Value::Null => query.bind(None::<String>),
        Value::Bool(v) => query.bind(*v),
        Value::Int(v) => query.bind(*v),
        Value::Float(v) => query.bind(*v),
        Value::Decimal(v) => query.bind(*v),
        Value::Text(v) => query.bind(v.as_str()),
        Value::Bytes(v) => query.bind(v.as_slice()),
        Value::Date(v) => query.bind(*v),
        Value::Timestamp(v) => query.bind(*v),
    }
}

/// Bind a parameter to a PostgreSQL query.
///
/// Statements carry an explicit `CAST` per placeholder, so NULL is sent as
/// untyped text and the server coerces it.
pub(crate) fn bind_postgres_param<'q>(
    query: sqlx::query::Query<'q, Postgres, PgArguments>,
    param: &'q Value,
) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    match param {
        Value::Null => query.bind(None::<String>),
        Value::Bool(v) => query.bind(*v),
        Value::Int(v) => query.bind(*v),
        Value::Float(v) => query.bind(*v),
        Value::Decimal(v) => query.bind(*v),
        Value::Text(v) => query.bind(v.as_str()),
        Value::Bytes(v) => query.bind(v.as_slice()),
        Value::Date(v) => query.bind(*v),
        Value::Timestamp(v) => query.bind(*v),
    }
}

/// Bind a parameter to a SQLite query.
pub(crate) fn bind_sqlite_param<'q>(
    query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    param: &'q Value,
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    match param {
        Value::Null => query.bind(None::<String>),
        Value::Bool(v) => query.bind(*v),
        Value::Int(v) => query.bind(*v),
        Value::Float(v) => query.bind(*v),
        // SQLite has no exact numeric storage class; keep the digits as text
        Value::Decimal(v) => query.bind(v.to_string()),
        Value::Text(v) => query.bind(v.as_str()),
        Value::Bytes(v) => query.bind(v.as_slice()),
        Value::Date(v) => query.bind(*v),
        Value::Timestamp(v) => query.bind(*v),
    }
}
