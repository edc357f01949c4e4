//! Reconciling a staging table into a target table.
//!
//! The strategy was fixed when the [`Target`](crate::db::pool::Target) was
//! constructed:
//!
//! - `NativeMerge`: one `MERGE INTO ... USING ...` statement.
//! - `EmulatedSetUpsert`: one `INSERT ... SELECT ... ON CONFLICT` statement
//!   (`ON DUPLICATE KEY UPDATE` on MySQL).
//! - `EmulatedRowUpsert`: one `INSERT ... SELECT ... LIMIT 1 OFFSET n` upsert
//!   per source row.
//!
//! Source values never leave the server: every strategy copies them with
//! `INSERT ... SELECT`, so the stored result does not depend on the strategy.
//! All three run on the caller's transaction scope, so a failure anywhere
//! leaves the target untouched once the scope rolls back.

use crate::db::statement::{Statement, StatementBuilder};
use crate::db::transaction::TransactionScope;
use crate::error::{DbError, DbResult};
use crate::models::{MergeOutcome, MergePlan, MergeSpec, MergeStrategy, TableHandle, Value};
use std::time::Instant;
use tracing::{debug, info};

pub struct MergeEngine;

impl MergeEngine {
    /// Merge `spec.source` into `spec.target` inside `scope`.
    ///
    /// Key resolution happens before any statement is rendered: a target
    /// without a primary key and no explicit keys fails with a schema error
    /// and no DML is issued.
    pub async fn merge(scope: &mut TransactionScope, spec: &MergeSpec) -> DbResult<MergeOutcome> {
        let start = Instant::now();
        let target = scope.reflect(spec.target.clone()).await?;
        let source = scope.reflect(spec.source.clone()).await?;
        let plan = spec.plan(&source, &target)?;

        let strategy = scope.target().merge_strategy().ok_or_else(|| {
            DbError::query(format!(
                "{} {} supports neither MERGE nor upsert",
                scope.db_type(),
                scope.target().server_version().unwrap_or("(unknown version)")
            ))
        })?;

        debug!(
            scope_id = %scope.id(),
            source = %source.qualified_name(),
            target = %target.qualified_name(),
            strategy = %strategy,
            keys = ?plan.keys,
            update_columns = ?plan.update_columns,
            "Merging"
        );

        let builder = scope.builder();
        let rows_affected = match strategy {
            MergeStrategy::NativeMerge => {
                let statement = native_merge(&source, &target, &plan);
                scope.execute(&statement.sql, &statement.params).await?
            }
            MergeStrategy::EmulatedSetUpsert => {
                let statement = set_upsert(&builder, &source, &target, &plan);
                scope.execute(&statement.sql, &statement.params).await?
            }
            MergeStrategy::EmulatedRowUpsert => {
                let count_sql = format!("SELECT COUNT(*) AS n FROM {}", source.qualified_name());
                let rows = scope
                    .fetch_one(&count_sql, &[])
                    .await?
                    .and_then(|row| row.get("n").and_then(Value::as_i64))
                    .unwrap_or(0);
                let statement = row_upsert(&builder, &source, &target, &plan);
                let mut affected = 0;
                for offset in 0..rows {
                    affected += scope
                        .execute(&statement.sql, &[Value::Int(offset)])
                        .await?;
                }
                affected
            }
        };

        info!(
            scope_id = %scope.id(),
            source = %source.qualified_name(),
            target = %target.qualified_name(),
            strategy = %strategy,
            rows_affected = rows_affected,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Merge applied"
        );

        Ok(MergeOutcome {
            strategy,
            rows_affected,
        })
    }
}

/// `MERGE INTO tgt AS t USING src AS s ON (...) [WHEN MATCHED ...] WHEN NOT MATCHED ...`
fn native_merge(source: &TableHandle, target: &TableHandle, plan: &MergePlan) -> Statement {
    let on: Vec<String> = plan
        .keys
        .iter()
        .map(|k| format!("t.{} = s.{}", k, k))
        .collect();
    let mut sql = format!(
        "MERGE INTO {} AS t USING {} AS s ON ({})",
        target.qualified_name(),
        source.qualified_name(),
        on.join(" AND ")
    );

    if !plan.update_columns.is_empty() {
        let set: Vec<String> = plan
            .update_columns
            .iter()
            .map(|c| format!("{} = s.{}", c, c))
            .collect();
        sql.push_str(&format!(" WHEN MATCHED THEN UPDATE SET {}", set.join(", ")));
    }

    let values: Vec<String> = plan
        .insert_columns
        .iter()
        .map(|c| format!("s.{}", c))
        .collect();
    sql.push_str(&format!(
        " WHEN NOT MATCHED THEN INSERT ({}) VALUES ({})",
        plan.insert_columns.join(", "),
        values.join(", ")
    ));
    Statement::new(sql)
}

/// `INSERT INTO tgt (...) SELECT ... FROM src WHERE true ON CONFLICT ...`
fn set_upsert(
    builder: &StatementBuilder,
    source: &TableHandle,
    target: &TableHandle,
    plan: &MergePlan,
) -> Statement {
    let columns = plan.insert_columns.join(", ");
    // WHERE true keeps SQLite from reading ON CONFLICT as a join constraint
    let sql = format!(
        "INSERT INTO {} ({}) SELECT {} FROM {} WHERE true {}",
        target.qualified_name(),
        columns,
        columns,
        source.qualified_name(),
        builder.conflict_clause(&plan.keys, &plan.update_columns)
    );
    Statement::new(sql)
}

/// `INSERT INTO tgt (...) SELECT ... FROM src WHERE true ORDER BY keys
/// LIMIT 1 OFFSET ? <conflict clause>`, run once per source row.
///
/// Source rows sharing a key are applied in an unspecified order.
fn row_upsert(
    builder: &StatementBuilder,
    source: &TableHandle,
    target: &TableHandle,
    plan: &MergePlan,
) -> Statement {
    let columns = plan.insert_columns.join(", ");
    let sql = format!(
        "INSERT INTO {} ({}) SELECT {} FROM {} WHERE true ORDER BY {} LIMIT 1 OFFSET {} {}",
        target.qualified_name(),
        columns,
        columns,
        source.qualified_name(),
        plan.keys.join(", "),
        builder.placeholder(1),
        builder.conflict_clause(&plan.keys, &plan.update_columns)
    );
    Statement::new(sql)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ColumnDefinition, DatabaseType, TableRef};

    fn handle(name: &str, columns: &[&str]) -> TableHandle {
        TableHandle::new(
            TableRef::new(name),
            columns
                .iter()
                .map(|c| ColumnDefinition::new(*c, "integer", true).with_primary_key(*c == "id"))
                .collect(),
            vec!["id".to_string()],
        )
    }

    fn plan(update_columns: &[&str]) -> MergePlan {
        MergePlan {
            keys: vec!["id".to_string()],
            insert_columns: vec!["id".into(), "name".into(), "value".into()],
            update_columns: update_columns.iter().map(|c| c.to_string()).collect(),
        }
    }

    #[test]
    fn test_native_merge_sql() {
        let source = handle("merge_source", &["id", "name", "value"]);
        let target = handle("merge_target", &["id", "name", "value"]);
        let stmt = native_merge(&source, &target, &plan(&["name", "value"]));
        assert_eq!(
            stmt.sql,
            "MERGE INTO merge_target AS t USING merge_source AS s ON (t.id = s.id) \
             WHEN MATCHED THEN UPDATE SET name = s.name, value = s.value \
             WHEN NOT MATCHED THEN INSERT (id, name, value) VALUES (s.id, s.name, s.value)"
        );
        assert!(stmt.params.is_empty());
    }

    #[test]
    fn test_native_merge_without_update_columns_skips_matched_branch() {
        let source = handle("s", &["id", "name", "value"]);
        let target = handle("t", &["id", "name", "value"]);
        let stmt = native_merge(&source, &target, &plan(&[]));
        assert!(!stmt.sql.contains("WHEN MATCHED"));
        assert!(stmt.sql.contains("WHEN NOT MATCHED THEN INSERT"));
    }

    #[test]
    fn test_set_upsert_sql() {
        let source = handle("merge_source", &["id", "name", "value"]);
        let target = handle("merge_target", &["id", "name", "value"]);
        let builder = StatementBuilder::new(DatabaseType::SQLite);
        let stmt = set_upsert(&builder, &source, &target, &plan(&["name"]));
        assert_eq!(
            stmt.sql,
            "INSERT INTO merge_target (id, name, value) SELECT id, name, value FROM merge_source \
             WHERE true ON CONFLICT (id) DO UPDATE SET name = excluded.name"
        );

        let stmt = set_upsert(&builder, &source, &target, &plan(&[]));
        assert!(stmt.sql.ends_with("ON CONFLICT (id) DO NOTHING"));
    }

    #[test]
    fn test_set_upsert_sql_mysql() {
        let source = handle("merge_source", &["id", "name", "value"]);
        let target = handle("merge_target", &["id", "name", "value"]);
        let builder = StatementBuilder::new(DatabaseType::MySQL);
        let stmt = set_upsert(&builder, &source, &target, &plan(&["name"]));
        assert_eq!(
            stmt.sql,
            "INSERT INTO merge_target (id, name, value) SELECT id, name, value FROM merge_source \
             WHERE true ON DUPLICATE KEY UPDATE name = VALUES(name)"
        );
    }

    #[test]
    fn test_row_upsert_sql_binds_only_offset() {
        let source = handle("merge_source", &["id", "name", "value"]);
        let target = handle("merge_target", &["id", "name", "value"]);

        let stmt = row_upsert(
            &StatementBuilder::new(DatabaseType::PostgreSQL),
            &source,
            &target,
            &plan(&["name", "value"]),
        );
        assert_eq!(
            stmt.sql,
            "INSERT INTO merge_target (id, name, value) SELECT id, name, value FROM merge_source \
             WHERE true ORDER BY id LIMIT 1 OFFSET $1 \
             ON CONFLICT (id) DO UPDATE SET name = excluded.name, value = excluded.value"
        );
        assert!(stmt.params.is_empty());

        let stmt = row_upsert(
            &StatementBuilder::new(DatabaseType::SQLite),
            &source,
            &target,
            &plan(&[]),
        );
        assert!(stmt.sql.ends_with("LIMIT 1 OFFSET ? ON CONFLICT (id) DO NOTHING"));
    }
}
