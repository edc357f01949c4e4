//! One-call operations against a target.
//!
//! Each method opens a [`TransactionScope`], runs, and commits on success or
//! rolls back on failure before returning. Errors are logged once here, with
//! the operation and table, and passed to the caller unchanged.
//!
//! For several statements in one unit of work use [`Database::begin`] and the
//! scope's methods directly.

use crate::config::PoolOptions;
use crate::db::pool::{ConnectionRegistry, Target};
use crate::db::script;
use crate::db::statement::SelectOptions;
use crate::db::transaction::TransactionScope;
use crate::error::{DbError, DbResult};
use crate::models::{
    DatabaseType, MergeOutcome, MergeSpec, Predicate, Record, TableHandle, TableRef, Value,
};
use std::path::Path;
use std::sync::Arc;
use tracing::error;

/// Handle to one target; cheap to clone.
#[derive(Debug, Clone)]
pub struct Database {
    target: Arc<Target>,
}

/// Log a failed operation once, then hand the result back.
fn log_failure<T>(result: DbResult<T>, operation: &str, table: &str) -> DbResult<T> {
    if let Err(e) = &result {
        error!(operation = operation, table = table, error = %e, "Database operation failed");
    }
    result
}

impl Database {
    pub fn new(target: Arc<Target>) -> Self {
        Self { target }
    }

    /// Acquire `url` from `registry` with default pool options.
    pub async fn connect(registry: &ConnectionRegistry, url: &str) -> DbResult<Self> {
        Ok(Self::new(registry.acquire(url).await?))
    }

    /// Acquire `url` from `registry`; `options` apply only if the target is new.
    pub async fn connect_with(
        registry: &ConnectionRegistry,
        url: &str,
        options: PoolOptions,
    ) -> DbResult<Self> {
        Ok(Self::new(registry.acquire_with(url, options).await?))
    }

    pub fn target(&self) -> &Arc<Target> {
        &self.target
    }

    pub fn db_type(&self) -> DatabaseType {
        self.target.db_type()
    }

    /// Open an explicit transaction scope.
    pub async fn begin(&self) -> DbResult<TransactionScope> {
        self.target.begin().await
    }

    /// Resolve a table through the catalog.
    pub async fn reflect(&self, table: impl Into<TableRef>) -> DbResult<Arc<TableHandle>> {
        let table = table.into();
        if let Some(handle) = self.target.catalog().cached(&table).await {
            return Ok(handle);
        }
        let result = async {
            let mut scope = self.begin().await?;
            let result = scope.reflect(table.clone()).await;
            let handle = scope.finish(result).await?;
            // A concurrent reflect may have published first
            Ok::<_, DbError>(self.target.catalog().cached(&table).await.unwrap_or(handle))
        }
        .await;
        log_failure(result, "reflect", &table.qualified_name())
    }

    /// Alias of [`reflect`](Self::reflect).
    pub async fn get_table(&self, table: impl Into<TableRef>) -> DbResult<Arc<TableHandle>> {
        self.reflect(table).await
    }

    pub async fn select(
        &self,
        table: impl Into<TableRef>,
        options: &SelectOptions,
    ) -> DbResult<Vec<Record>> {
        let table = table.into();
        let result = async {
            let mut scope = self.begin().await?;
            let result = scope.select(table.clone(), options).await;
            scope.finish(result).await
        }
        .await;
        log_failure(result, "select", &table.qualified_name())
    }

    /// Insert a batch in one transaction. An empty batch issues no SQL.
    pub async fn insert(&self, table: impl Into<TableRef>, records: &[Record]) -> DbResult<u64> {
        let table = table.into();
        if records.is_empty() {
            return Ok(0);
        }
        let result = async {
            let mut scope = self.begin().await?;
            let result = scope.insert(table.clone(), records).await;
            scope.finish(result).await
        }
        .await;
        log_failure(result, "insert", &table.qualified_name())
    }

    pub async fn insert_one(&self, table: impl Into<TableRef>, record: Record) -> DbResult<u64> {
        self.insert(table, std::slice::from_ref(&record)).await
    }

    /// Update rows matching `predicate`; pass an empty predicate to touch every row.
    pub async fn update(
        &self,
        table: impl Into<TableRef>,
        predicate: &Predicate,
        values: &Record,
    ) -> DbResult<u64> {
        let table = table.into();
        let result = async {
            let mut scope = self.begin().await?;
            let result = scope.update(table.clone(), predicate, values).await;
            scope.finish(result).await
        }
        .await;
        log_failure(result, "update", &table.qualified_name())
    }

    /// Delete rows matching `predicate`; pass an empty predicate to delete every row.
    pub async fn delete(&self, table: impl Into<TableRef>, predicate: &Predicate) -> DbResult<u64> {
        let table = table.into();
        let result = async {
            let mut scope = self.begin().await?;
            let result = scope.delete(table.clone(), predicate).await;
            scope.finish(result).await
        }
        .await;
        log_failure(result, "delete", &table.qualified_name())
    }

    /// Merge in a single transaction: either every row lands or none does.
    pub async fn merge(&self, spec: &MergeSpec) -> DbResult<MergeOutcome> {
        let result = async {
            let mut scope = self.begin().await?;
            let result = scope.merge(spec).await;
            scope.finish(result).await
        }
        .await;
        log_failure(result, "merge", &spec.target.qualified_name())
    }

    // -------------------------------------------------------------------------
    // Raw SQL
    // -------------------------------------------------------------------------

    pub async fn execute(&self, sql: &str, params: &[Value]) -> DbResult<u64> {
        let result = async {
            let mut scope = self.begin().await?;
            let result = scope.execute(sql, params).await;
            scope.finish(result).await
        }
        .await;
        log_failure(result, "execute", "")
    }

    pub async fn fetch_all(&self, sql: &str, params: &[Value]) -> DbResult<Vec<Record>> {
        let result = async {
            let mut scope = self.begin().await?;
            let result = scope.fetch_all(sql, params).await;
            scope.finish(result).await
        }
        .await;
        log_failure(result, "fetch_all", "")
    }

    pub async fn fetch_one(&self, sql: &str, params: &[Value]) -> DbResult<Option<Record>> {
        let result = async {
            let mut scope = self.begin().await?;
            let result = scope.fetch_one(sql, params).await;
            scope.finish(result).await
        }
        .await;
        log_failure(result, "fetch_one", "")
    }

    /// Run any statement; rows come back only when the statement returns them.
    pub async fn raw_query(&self, sql: &str, params: &[Value]) -> DbResult<Option<Vec<Record>>> {
        if script::returns_rows(sql, self.db_type()) {
            self.fetch_all(sql, params).await.map(Some)
        } else {
            self.execute(sql, params).await.map(|_| None)
        }
    }

    /// Run every statement of `sql` in order, in one transaction.
    ///
    /// Returns the affected-row count per statement.
    pub async fn run_script(&self, sql: &str) -> DbResult<Vec<u64>> {
        let result = async {
            let statements = script::split_statements(sql, self.db_type())?;
            let mut scope = self.begin().await?;
            let result: DbResult<Vec<u64>> = async {
                let mut counts = Vec::with_capacity(statements.len());
                for statement in &statements {
                    counts.push(scope.execute(statement, &[]).await?);
                }
                Ok(counts)
            }
            .await;
            scope.finish(result).await
        }
        .await;
        log_failure(result, "run_script", "")
    }

    /// Read a SQL file and run it with [`run_script`](Self::run_script).
    pub async fn run_script_file(&self, path: impl AsRef<Path>) -> DbResult<Vec<u64>> {
        let path = path.as_ref();
        let sql = tokio::fs::read_to_string(path).await.map_err(|e| {
            let err = DbError::query(format!("Cannot read SQL file '{}': {}", path.display(), e));
            error!(operation = "run_script_file", error = %err, "Database operation failed");
            err
        })?;
        self.run_script(&sql).await
    }
}
