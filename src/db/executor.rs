//! Statement execution.
//!
//! Everything runs on the connection of an open [`DbTransaction`]; nothing in
//! this module checks a connection out of a pool on its own.
//!
//! # Architecture
//!
//! The executor uses database-specific implementations organized in submodules:
//! - `mysql`: MySQL-specific query and write operations
//! - `postgres`: PostgreSQL-specific query and write operations
//! - `sqlite`: SQLite-specific query and write operations
//!
//! Each submodule provides identical functionality adapted to the database's type system.

use crate::db::statement::Statement;
use crate::db::transaction::DbTransaction;
use crate::db::types::{RowToRecord, rows_to_records};
use crate::error::{DbError, DbResult};
use crate::models::{Record, Value};
use std::time::Instant;
use tracing::debug;

/// Query executor bound to the connection of a transaction.
pub struct QueryExecutor;

impl QueryExecutor {
    /// Run a row-returning statement and decode every row.
    pub async fn fetch_all(
        tx: &mut DbTransaction,
        sql: &str,
        params: &[Value],
    ) -> DbResult<Vec<Record>> {
        let start = Instant::now();
        debug!(sql = %sql, params = params.len(), "Executing query");

        let records = impl_tx_dispatch!(tx, {
            MySql(t) => rows_to_records(&mysql::fetch_all(&mut **t, sql, params).await?)?,
            Postgres(t) => rows_to_records(&postgres::fetch_all(&mut **t, sql, params).await?)?,
            SQLite(t) => rows_to_records(&sqlite::fetch_all(&mut **t, sql, params).await?)?,
        });

        debug!(
            rows = records.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Query completed"
        );
        Ok(records)
    }

    /// Run a row-returning statement and decode the first row, if any.
    pub async fn fetch_optional(
        tx: &mut DbTransaction,
        sql: &str,
        params: &[Value],
    ) -> DbResult<Option<Record>> {
        debug!(sql = %sql, params = params.len(), "Executing query (first row)");

        let row = impl_tx_dispatch!(tx, {
            MySql(t) => mysql::fetch_optional(&mut **t, sql, params)
                .await?
                .map(|r| r.to_record())
                .transpose()?,
            Postgres(t) => postgres::fetch_optional(&mut **t, sql, params)
                .await?
                .map(|r| r.to_record())
                .transpose()?,
            SQLite(t) => sqlite::fetch_optional(&mut **t, sql, params)
                .await?
                .map(|r| r.to_record())
                .transpose()?,
        });
        Ok(row)
    }

    /// Run a statement and return the number of affected rows.
    pub async fn execute(tx: &mut DbTransaction, sql: &str, params: &[Value]) -> DbResult<u64> {
        let start = Instant::now();
        debug!(sql = %sql, params = params.len(), "Executing statement");

        let rows_affected = impl_tx_dispatch!(tx, {
            MySql(t) => mysql::execute(&mut **t, sql, params).await?,
            Postgres(t) => postgres::execute(&mut **t, sql, params).await?,
            SQLite(t) => sqlite::execute(&mut **t, sql, params).await?,
        });

        debug!(
            rows_affected = rows_affected,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Statement completed"
        );
        Ok(rows_affected)
    }

    /// Run a rendered statement that returns rows.
    pub async fn query(tx: &mut DbTransaction, statement: &Statement) -> DbResult<Vec<Record>> {
        Self::fetch_all(tx, &statement.sql, &statement.params).await
    }

    /// Run a rendered statement that modifies rows.
    pub async fn run(tx: &mut DbTransaction, statement: &Statement) -> DbResult<u64> {
        Self::execute(tx, &statement.sql, &statement.params).await
    }
}

// =============================================================================
// Database-Specific Implementations
// =============================================================================
//
// Each module below provides the same interface adapted to its database type.
// The code structure is intentionally parallel to make differences obvious.
// Without parameters the SQL is sent as-is (simple query protocol), which also
// accepts statements the driver cannot prepare.

mod mysql {
    use super::*;
    use crate::db::params::bind_mysql_param;
    use sqlx::mysql::{MySqlConnection, MySqlRow};
    use sqlx::{Executor, MySql};

    fn build<'q>(
        sql: &'q str,
        params: &'q [Value],
    ) -> sqlx::query::Query<'q, MySql, sqlx::mysql::MySqlArguments> {
        params
            .iter()
            .fold(sqlx::query(sql), |query, param| bind_mysql_param(query, param))
    }

    pub async fn fetch_all(
        conn: &mut MySqlConnection,
        sql: &str,
        params: &[Value],
    ) -> DbResult<Vec<MySqlRow>> {
        if params.is_empty() {
            return conn.fetch_all(sql).await.map_err(DbError::from);
        }
        build(sql, params).fetch_all(conn).await.map_err(DbError::from)
    }

    pub async fn fetch_optional(
        conn: &mut MySqlConnection,
        sql: &str,
        params: &[Value],
    ) -> DbResult<Option<MySqlRow>> {
        if params.is_empty() {
            return conn.fetch_optional(sql).await.map_err(DbError::from);
        }
        build(sql, params)
            .fetch_optional(conn)
            .await
            .map_err(DbError::from)
    }

    pub async fn execute(conn: &mut MySqlConnection, sql: &str, params: &[Value]) -> DbResult<u64> {
        let result = if params.is_empty() {
            conn.execute(sql).await
        } else {
            build(sql, params).execute(conn).await
        };
        Ok(result?.rows_affected())
    }
}

mod postgres {
    use super::*;
    use crate::db::params::bind_postgres_param;
    use sqlx::postgres::{PgConnection, PgRow};
    use sqlx::{Executor, Postgres};

    fn build<'q>(
        sql: &'q str,
        params: &'q [Value],
    ) -> sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments> {
        params
            .iter()
            .fold(sqlx::query(sql), |query, param| bind_postgres_param(query, param))
    }

    pub async fn fetch_all(
        conn: &mut PgConnection,
        sql: &str,
        params: &[Value],
    ) -> DbResult<Vec<PgRow>> {
        if params.is_empty() {
            return conn.fetch_all(sql).await.map_err(DbError::from);
        }
        build(sql, params).fetch_all(conn).await.map_err(DbError::from)
    }

    pub async fn fetch_optional(
        conn: &mut PgConnection,
        sql: &str,
        params: &[Value],
    ) -> DbResult<Option<PgRow>> {
        if params.is_empty() {
            return conn.fetch_optional(sql).await.map_err(DbError::from);
        }
        build(sql, params)
            .fetch_optional(conn)
            .await
            .map_err(DbError::from)
    }

    pub async fn execute(conn: &mut PgConnection, sql: &str, params: &[Value]) -> DbResult<u64> {
        let result = if params.is_empty() {
            conn.execute(sql).await
        } else {
            build(sql, params).execute(conn).await
        };
        Ok(result?.rows_affected())
    }
}

mod sqlite {
    use super::*;
    use crate::db::params::bind_sqlite_param;
    use sqlx::sqlite::{SqliteConnection, SqliteRow};
    use sqlx::{Executor, Sqlite};

    fn build<'q>(
        sql: &'q str,
        params: &'q [Value],
    ) -> sqlx::query::Query<'q, Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
        params
            .iter()
            .fold(sqlx::query(sql), |query, param| bind_sqlite_param(query, param))
    }

    pub async fn fetch_all(
        conn: &mut SqliteConnection,
        sql: &str,
        params: &[Value],
    ) -> DbResult<Vec<SqliteRow>> {
        if params.is_empty() {
            return conn.fetch_all(sql).await.map_err(DbError::from);
        }
        build(sql, params).fetch_all(conn).await.map_err(DbError::from)
    }

    pub async fn fetch_optional(
        conn: &mut SqliteConnection,
        sql: &str,
        params: &[Value],
    ) -> DbResult<Option<SqliteRow>> {
        if params.is_empty() {
            return conn.fetch_optional(sql).await.map_err(DbError::from);
        }
        build(sql, params)
            .fetch_optional(conn)
            .await
            .map_err(DbError::from)
    }

    pub async fn execute(
        conn: &mut SqliteConnection,
        sql: &str,
        params: &[Value],
    ) -> DbResult<u64> {
        let result = if params.is_empty() {
            conn.execute(sql).await
        } else {
            build(sql, params).execute(conn).await
        };
        Ok(result?.rows_affected())
    }
}
