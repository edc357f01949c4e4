//! Schema reflection and caching.
//!
//! The [`SchemaCatalog`] maps `schema.table` keys to immutable
//! [`TableHandle`]s. A miss introspects the live database on the caller's
//! transaction connection; a hit hands back the cached `Arc` without touching
//! the database.
//!
//! Introspection and caching are separate steps. A handle read inside a
//! transaction only describes what that transaction sees, so it is published
//! to the catalog once the transaction has committed.
//!
//! # Architecture
//!
//! SQL queries are organized in the `queries` submodule with constants for each
//! database type. Database-specific implementations are in their respective
//! submodules (postgres, mysql, sqlite), each providing the same interface.

use crate::db::transaction::DbTransaction;
use crate::error::{DbError, DbResult};
use crate::models::{ColumnDefinition, TableHandle, TableRef};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Per-target cache of reflected tables.
#[derive(Debug, Default)]
pub struct SchemaCatalog {
    tables: RwLock<HashMap<String, Arc<TableHandle>>>,
}

impl SchemaCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Describe `table` as `tx` sees it. Nothing is cached.
    pub async fn introspect(
        &self,
        tx: &mut DbTransaction,
        table: &TableRef,
    ) -> DbResult<TableHandle> {
        let handle = SchemaInspector::describe_table(tx, table).await?;
        debug!(
            table = %table.cache_key(),
            columns = handle.columns.len(),
            primary_key = ?handle.primary_key,
            "Reflected table"
        );
        Ok(handle)
    }

    /// Cache `handle` under `key` unless another handle got there first.
    ///
    /// Returns the handle now cached, so concurrent publishers converge on
    /// one instance.
    pub async fn publish(&self, key: String, handle: Arc<TableHandle>) -> Arc<TableHandle> {
        let mut tables = self.tables.write().await;
        Arc::clone(tables.entry(key).or_insert(handle))
    }

    /// Cached handle for `table`, without introspecting.
    pub async fn cached(&self, table: &TableRef) -> Option<Arc<TableHandle>> {
        self.tables.read().await.get(&table.cache_key()).cloned()
    }

    pub async fn len(&self) -> usize {
        self.tables.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tables.read().await.is_empty()
    }

    /// Forget one table so the next `reflect` introspects it again.
    pub async fn invalidate(&self, table: &TableRef) -> bool {
        self.tables
            .write()
            .await
            .remove(&table.cache_key())
            .is_some()
    }

    pub async fn clear(&self) {
        self.tables.write().await.clear();
    }
}

/// Live introspection, dispatched per dialect.
struct SchemaInspector;

impl SchemaInspector {
    async fn describe_table(tx: &mut DbTransaction, table: &TableRef) -> DbResult<TableHandle> {
        let columns = impl_tx_dispatch!(tx, {
            MySql(t) => mysql::fetch_columns(&mut **t, table).await?,
            Postgres(t) => postgres::fetch_columns(&mut **t, table).await?,
            SQLite(t) => sqlite::fetch_columns(&mut **t, table).await?,
        });

        if columns.is_empty() {
            return Err(DbError::schema(
                format!("Table '{}' not found", table.qualified_name()),
                table.qualified_name(),
            ));
        }

        let mut keyed: Vec<(i64, &PositionedColumn)> = columns
            .iter()
            .filter_map(|c| c.pk_position.map(|pos| (pos, c)))
            .collect();
        keyed.sort_by_key(|(pos, _)| *pos);
        let primary_key = keyed.iter().map(|(_, c)| c.column.name.clone()).collect();

        Ok(TableHandle::new(
            table.clone(),
            columns.into_iter().map(|c| c.column).collect(),
            primary_key,
        ))
    }
}

/// A reflected column with its position in the primary key, if any.
struct PositionedColumn {
    column: ColumnDefinition,
    pk_position: Option<i64>,
}

impl PositionedColumn {
    fn new(name: String, data_type: String, nullable: bool, pk_position: Option<i64>) -> Self {
        Self {
            column: ColumnDefinition::new(name, data_type, nullable)
                .with_primary_key(pk_position.is_some()),
            pk_position,
        }
    }
}

// =============================================================================
// SQL Query Templates
// =============================================================================

mod queries {
    pub mod postgres {
        pub const DESCRIBE_COLUMNS: &str = r#"
        SELECT
            c.column_name,
            format_type(a.atttypid, a.atttypmod) as column_type,
            c.is_nullable,
            CAST(pk.ordinal_position AS integer) as pk_position
        FROM information_schema.columns c
        JOIN pg_class t ON t.relname = c.table_name
        JOIN pg_namespace n ON n.oid = t.relnamespace AND n.nspname = c.table_schema
        JOIN pg_attribute a ON a.attrelid = t.oid AND a.attname = c.column_name
        LEFT JOIN (
            SELECT kcu.column_name, kcu.ordinal_position
            FROM information_schema.table_constraints tc
            JOIN information_schema.key_column_usage kcu
                ON tc.constraint_name = kcu.constraint_name
                AND tc.table_schema = kcu.table_schema
            WHERE tc.table_name = $1
            AND tc.table_schema = $2
            AND tc.constraint_type = 'PRIMARY KEY'
        ) pk ON c.column_name = pk.column_name
        WHERE c.table_name = $1 AND c.table_schema = $2
        ORDER BY c.ordinal_position
        "#;
    }

    pub mod mysql {
        pub const DESCRIBE_COLUMNS: &str = r#"
        SELECT
            CONVERT(c.COLUMN_NAME USING utf8) AS COLUMN_NAME,
            CONVERT(c.COLUMN_TYPE USING utf8) AS COLUMN_TYPE,
            CONVERT(c.IS_NULLABLE USING utf8) AS IS_NULLABLE,
            CAST(k.ORDINAL_POSITION AS SIGNED) AS PK_POSITION
        FROM information_schema.COLUMNS c
        LEFT JOIN information_schema.KEY_COLUMN_USAGE k
            ON k.TABLE_SCHEMA = c.TABLE_SCHEMA
            AND k.TABLE_NAME = c.TABLE_NAME
            AND k.COLUMN_NAME = c.COLUMN_NAME
            AND k.CONSTRAINT_NAME = 'PRIMARY'
        WHERE c.TABLE_NAME = ? AND c.TABLE_SCHEMA = COALESCE(?, DATABASE())
        ORDER BY c.ORDINAL_POSITION
        "#;
    }
}

// =============================================================================
// Database-Specific Implementations
// =============================================================================

mod postgres {
    use super::*;
    use sqlx::{PgConnection, Row};

    const DEFAULT_SCHEMA: &str = "public";

    pub async fn fetch_columns(
        conn: &mut PgConnection,
        table: &TableRef,
    ) -> DbResult<Vec<PositionedColumn>> {
        let schema_name = table.schema.as_deref().unwrap_or(DEFAULT_SCHEMA);
        let rows = sqlx::query(queries::postgres::DESCRIBE_COLUMNS)
            .bind(&table.name)
            .bind(schema_name)
            .fetch_all(conn)
            .await?;

        rows.iter()
            .map(|row| -> DbResult<PositionedColumn> {
                let name: String = row.try_get("column_name")?;
                let column_type: String = row.try_get("column_type")?;
                let nullable: String = row.try_get("is_nullable")?;
                let pk_position: Option<i32> = row.try_get("pk_position")?;
                Ok(PositionedColumn::new(
                    name,
                    column_type,
                    nullable == "YES",
                    pk_position.map(i64::from),
                ))
            })
            .collect()
    }
}

mod mysql {
    use super::*;
    use sqlx::{MySqlConnection, Row, mysql::MySqlRow};

    /// MySQL may return VARBINARY instead of VARCHAR depending on charset configuration.
    fn get_string(row: &MySqlRow, column: &str) -> String {
        row.try_get::<String, _>(column)
            .ok()
            .or_else(|| {
                row.try_get::<Vec<u8>, _>(column)
                    .ok()
                    .and_then(|bytes| String::from_utf8(bytes).ok())
            })
            .unwrap_or_default()
    }

    pub async fn fetch_columns(
        conn: &mut MySqlConnection,
        table: &TableRef,
    ) -> DbResult<Vec<PositionedColumn>> {
        let rows = sqlx::query(queries::mysql::DESCRIBE_COLUMNS)
            .bind(&table.name)
            .bind(table.schema.as_deref())
            .fetch_all(conn)
            .await?;

        rows.iter()
            .map(|row| -> DbResult<PositionedColumn> {
                let pk_position: Option<i64> = row.try_get("PK_POSITION")?;
                Ok(PositionedColumn::new(
                    get_string(row, "COLUMN_NAME"),
                    get_string(row, "COLUMN_TYPE"),
                    get_string(row, "IS_NULLABLE") == "YES",
                    pk_position,
                ))
            })
            .collect()
    }
}

mod sqlite {
    use super::*;
    use sqlx::{Row, SqliteConnection};

    fn quote_literal(s: &str) -> String {
        s.replace('\'', "''")
    }

    pub async fn fetch_columns(
        conn: &mut SqliteConnection,
        table: &TableRef,
    ) -> DbResult<Vec<PositionedColumn>> {
        let pragma_query = match &table.schema {
            Some(schema) => format!(
                "PRAGMA {}.table_info('{}')",
                schema,
                quote_literal(&table.name)
            ),
            None => format!("PRAGMA table_info('{}')", quote_literal(&table.name)),
        };
        let rows = sqlx::query(&pragma_query).fetch_all(conn).await?;

        rows.iter()
            .map(|row| -> DbResult<PositionedColumn> {
                let name: String = row.try_get("name")?;
                let data_type: String = row.try_get("type")?;
                let notnull: i64 = row.try_get("notnull")?;
                // pk is the 1-based position in the primary key, 0 when not a key column
                let pk: i64 = row.try_get("pk")?;
                Ok(PositionedColumn::new(
                    name,
                    data_type,
                    notnull == 0,
                    (pk > 0).then_some(pk),
                ))
            })
            .collect()
    }
}
