//! Transaction scopes.
//!
//! A [`TransactionScope`] owns one pooled connection with an open transaction.
//! Every CRUD, merge and reflect call runs on that connection. The scope ends
//! with `commit`, `rollback` or `finish`; dropping it unfinished rolls back
//! through the sqlx transaction guard and returns the connection to the pool.
//!
//! Tables reflected inside a scope stay private to it until `commit`, then
//! land in the target's catalog. A rolled back scope publishes nothing.

use crate::db::executor::QueryExecutor;
use crate::db::merge::MergeEngine;
use crate::db::pool::{DbPool, Target};
use crate::db::statement::{SelectOptions, StatementBuilder};
use crate::error::{DbError, DbResult};
use crate::models::{
    DatabaseType, MergeOutcome, MergeSpec, Predicate, Record, TableHandle, TableRef, Value,
};
use sqlx::{MySql, Postgres, Sqlite, Transaction};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Database-specific transaction wrapper.
///
/// This enum wraps database-specific transaction types to provide
/// a unified interface for transaction management.
pub enum DbTransaction {
    /// MySQL transaction
    MySql(Transaction<'static, MySql>),
    /// PostgreSQL transaction
    Postgres(Transaction<'static, Postgres>),
    /// SQLite transaction
    SQLite(Transaction<'static, Sqlite>),
}

impl DbTransaction {
    /// Check a connection out of `pool` and open a transaction on it.
    pub async fn begin(pool: &DbPool) -> DbResult<Self> {
        let tx = impl_db_dispatch!(pool, {
            MySql(p) => DbTransaction::MySql(p.begin().await?),
            Postgres(p) => DbTransaction::Postgres(p.begin().await?),
            SQLite(p) => DbTransaction::SQLite(p.begin().await?),
        });
        Ok(tx)
    }

    /// Get the database type for this transaction.
    pub fn db_type(&self) -> DatabaseType {
        match self {
            DbTransaction::MySql(_) => DatabaseType::MySQL,
            DbTransaction::Postgres(_) => DatabaseType::PostgreSQL,
            DbTransaction::SQLite(_) => DatabaseType::SQLite,
        }
    }

    /// Commit the transaction.
    pub async fn commit(self) -> DbResult<()> {
        impl_tx_dispatch!(self, {
            MySql(tx) => tx.commit().await.map_err(DbError::from),
            Postgres(tx) => tx.commit().await.map_err(DbError::from),
            SQLite(tx) => tx.commit().await.map_err(DbError::from),
        })
    }

    /// Rollback the transaction.
    pub async fn rollback(self) -> DbResult<()> {
        impl_tx_dispatch!(self, {
            MySql(tx) => tx.rollback().await.map_err(DbError::from),
            Postgres(tx) => tx.rollback().await.map_err(DbError::from),
            SQLite(tx) => tx.rollback().await.map_err(DbError::from),
        })
    }
}

impl std::fmt::Debug for DbTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("DbTransaction").field(&self.db_type()).finish()
    }
}

/// One unit of work on one pooled connection.
///
/// Nesting scopes over the same logical unit of work is not supported: each
/// scope is an independent transaction on its own connection.
#[derive(Debug)]
pub struct TransactionScope {
    id: String,
    target: Arc<Target>,
    tx: Option<DbTransaction>,
    /// Handles introspected on this connection, keyed by cache key.
    pending: HashMap<String, Arc<TableHandle>>,
    started: Instant,
}

impl TransactionScope {
    /// Open a scope on a connection from `target`'s pool.
    ///
    /// Waits for a free connection when the pool is exhausted.
    pub async fn begin(target: Arc<Target>) -> DbResult<Self> {
        let tx = DbTransaction::begin(target.pool()).await?;
        let id = format!("tx_{}", uuid::Uuid::new_v4().simple());
        debug!(scope_id = %id, db_type = %target.db_type(), "Transaction started");
        Ok(Self {
            id,
            target,
            tx: Some(tx),
            pending: HashMap::new(),
            started: Instant::now(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn target(&self) -> &Arc<Target> {
        &self.target
    }

    pub fn db_type(&self) -> DatabaseType {
        self.target.db_type()
    }

    /// Statement builder for this scope's dialect.
    pub fn builder(&self) -> StatementBuilder {
        StatementBuilder::new(self.db_type())
    }

    fn tx(&mut self) -> DbResult<&mut DbTransaction> {
        self.tx
            .as_mut()
            .ok_or_else(|| DbError::transaction("Transaction already finished", &self.id))
    }

    fn take(&mut self) -> DbResult<DbTransaction> {
        self.tx
            .take()
            .ok_or_else(|| DbError::transaction("Transaction already finished", &self.id))
    }

    /// Commit, publish reflected tables and release the connection.
    pub async fn commit(mut self) -> DbResult<()> {
        let tx = self.take()?;
        tx.commit().await.map_err(|e| {
            DbError::transaction(format!("Commit failed: {}", e), &self.id)
        })?;
        let pending = std::mem::take(&mut self.pending);
        for (key, handle) in pending {
            self.target.catalog().publish(key, handle).await;
        }
        debug!(
            scope_id = %self.id,
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "Transaction committed"
        );
        Ok(())
    }

    /// Roll back and release the connection.
    pub async fn rollback(mut self) -> DbResult<()> {
        let tx = self.take()?;
        tx.rollback().await.map_err(|e| {
            DbError::transaction(format!("Rollback failed: {}", e), &self.id)
        })?;
        debug!(
            scope_id = %self.id,
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "Transaction rolled back"
        );
        Ok(())
    }

    /// Commit on `Ok`, roll back on `Err`, and hand `result` back.
    ///
    /// When rolling back fails the original error is returned and the
    /// rollback failure is only logged.
    pub async fn finish<T>(self, result: DbResult<T>) -> DbResult<T> {
        match result {
            Ok(value) => {
                self.commit().await?;
                Ok(value)
            }
            Err(e) => {
                let scope_id = self.id.clone();
                if let Err(rollback_err) = self.rollback().await {
                    warn!(
                        scope_id = %scope_id,
                        error = %rollback_err,
                        "Rollback after failure did not complete"
                    );
                }
                Err(e)
            }
        }
    }

    // -------------------------------------------------------------------------
    // Raw SQL
    // -------------------------------------------------------------------------

    /// Run `sql` with bound `params`; returns the affected row count.
    pub async fn execute(&mut self, sql: &str, params: &[Value]) -> DbResult<u64> {
        QueryExecutor::execute(self.tx()?, sql, params).await
    }

    pub async fn fetch_all(&mut self, sql: &str, params: &[Value]) -> DbResult<Vec<Record>> {
        QueryExecutor::fetch_all(self.tx()?, sql, params).await
    }

    /// First row of the result, if any.
    pub async fn fetch_one(&mut self, sql: &str, params: &[Value]) -> DbResult<Option<Record>> {
        QueryExecutor::fetch_optional(self.tx()?, sql, params).await
    }

    // -------------------------------------------------------------------------
    // Catalog
    // -------------------------------------------------------------------------

    /// Resolve a table through the target's catalog, using this connection.
    ///
    /// A miss is introspected here and kept in the scope until `commit`.
    /// Reflecting the same key twice in one scope returns the same `Arc`.
    pub async fn reflect(&mut self, table: impl Into<TableRef>) -> DbResult<Arc<TableHandle>> {
        let table = table.into();
        let key = table.cache_key();
        if let Some(handle) = self.pending.get(&key) {
            return Ok(Arc::clone(handle));
        }
        let target = Arc::clone(&self.target);
        if let Some(handle) = target.catalog().cached(&table).await {
            debug!(scope_id = %self.id, table = %key, "Schema cache hit");
            return Ok(handle);
        }
        let handle = Arc::new(target.catalog().introspect(self.tx()?, &table).await?);
        self.pending.insert(key, Arc::clone(&handle));
        Ok(handle)
    }

    /// Alias of [`reflect`](Self::reflect).
    pub async fn get_table(&mut self, table: impl Into<TableRef>) -> DbResult<Arc<TableHandle>> {
        self.reflect(table).await
    }

    // -------------------------------------------------------------------------
    // CRUD
    // -------------------------------------------------------------------------

    pub async fn select(
        &mut self,
        table: impl Into<TableRef>,
        options: &SelectOptions,
    ) -> DbResult<Vec<Record>> {
        let handle = self.reflect(table).await?;
        let statement = self.builder().select(&handle, options)?;
        QueryExecutor::query(self.tx()?, &statement).await
    }

    /// Insert a batch; returns the number of inserted rows.
    pub async fn insert(&mut self, table: impl Into<TableRef>, records: &[Record]) -> DbResult<u64> {
        let handle = self.reflect(table).await?;
        let statements = self.builder().insert(&handle, records)?;
        let tx = self.tx()?;
        let mut affected = 0;
        for statement in &statements {
            affected += QueryExecutor::run(tx, statement).await?;
        }
        Ok(affected)
    }

    pub async fn insert_one(&mut self, table: impl Into<TableRef>, record: Record) -> DbResult<u64> {
        self.insert(table, std::slice::from_ref(&record)).await
    }

    /// Update rows matching `predicate`. An empty predicate matches every row.
    pub async fn update(
        &mut self,
        table: impl Into<TableRef>,
        predicate: &Predicate,
        values: &Record,
    ) -> DbResult<u64> {
        let handle = self.reflect(table).await?;
        let statement = self.builder().update(&handle, predicate, values)?;
        QueryExecutor::run(self.tx()?, &statement).await
    }

    /// Delete rows matching `predicate`. An empty predicate matches every row.
    pub async fn delete(&mut self, table: impl Into<TableRef>, predicate: &Predicate) -> DbResult<u64> {
        let handle = self.reflect(table).await?;
        let statement = self.builder().delete(&handle, predicate)?;
        QueryExecutor::run(self.tx()?, &statement).await
    }

    /// Reconcile `spec.source` into `spec.target` using the target's strategy.
    pub async fn merge(&mut self, spec: &MergeSpec) -> DbResult<MergeOutcome> {
        MergeEngine::merge(self, spec).await
    }
}

impl Drop for TransactionScope {
    fn drop(&mut self) {
        if self.tx.is_some() {
            warn!(
                scope_id = %self.id,
                elapsed_ms = self.started.elapsed().as_millis() as u64,
                "Transaction scope dropped without commit; rolling back"
            );
        }
    }
}
