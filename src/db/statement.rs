//! Dialect-specific SQL rendering for CRUD and upsert statements.
//!
//! The builder turns declarative requests (predicates, records, column lists)
//! into a [`Statement`]: SQL text with placeholders plus the values bound to
//! them. Values are always bound. Table and column identifiers are
//! interpolated as given; they are trusted input and are not escaped.

use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, Predicate, Record, TableHandle, Value};

/// Rendered SQL with its bound parameters, in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }
}

/// Options for [`StatementBuilder::select`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectOptions {
    /// Conjunction of equalities; empty matches every row.
    pub predicate: Predicate,
    /// Projection; `None` selects every column.
    pub columns: Option<Vec<String>>,
    /// ORDER BY terms, rendered verbatim (e.g., `"date DESC"`).
    pub order_by: Vec<String>,
    pub limit: Option<u64>,
}

impl SelectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.predicate.insert(column, value);
        self
    }

    pub fn predicate(mut self, predicate: Predicate) -> Self {
        self.predicate = predicate;
        self
    }

    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn order_by(mut self, term: impl Into<String>) -> Self {
        self.order_by.push(term.into());
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Collects bound values and renders the matching placeholders.
struct Binder<'a> {
    db_type: DatabaseType,
    table: &'a TableHandle,
    params: Vec<Value>,
}

impl<'a> Binder<'a> {
    fn new(db_type: DatabaseType, table: &'a TableHandle) -> Self {
        Self {
            db_type,
            table,
            params: Vec::new(),
        }
    }

    /// Bind `value` for `column` and return its placeholder.
    fn bind(&mut self, column: &str, value: Value) -> String {
        self.params.push(value);
        match self.db_type {
            // Cast to the column's type so NULLs and integer widths resolve
            DatabaseType::PostgreSQL => match self.table.column(column) {
                Some(col) => format!(
                    "CAST(${} AS {})",
                    self.params.len(),
                    strip_type_modifiers(&col.data_type)
                ),
                None => format!("${}", self.params.len()),
            },
            DatabaseType::MySQL | DatabaseType::SQLite => "?".to_string(),
        }
    }

    /// Render `WHERE a = ? AND b IS NULL`, or nothing for an empty predicate.
    fn where_clause(&mut self, predicate: &Predicate) -> String {
        if predicate.is_empty() {
            return String::new();
        }
        let conditions: Vec<String> = predicate
            .iter()
            .map(|(column, value)| {
                if value.is_null() {
                    format!("{} IS NULL", column)
                } else {
                    format!("{} = {}", column, self.bind(column, value.clone()))
                }
            })
            .collect();
        format!(" WHERE {}", conditions.join(" AND "))
    }

    fn finish(self, sql: String) -> Statement {
        Statement {
            sql,
            params: self.params,
        }
    }
}

/// Drop length/precision modifiers: `character varying(30)` becomes
/// `character varying`, so a cast never truncates or rounds a bound value.
fn strip_type_modifiers(data_type: &str) -> String {
    let mut out = String::with_capacity(data_type.len());
    let mut depth = 0usize;
    for c in data_type.chars() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            _ if depth == 0 => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Renders statements for one dialect.
#[derive(Debug, Clone, Copy)]
pub struct StatementBuilder {
    db_type: DatabaseType,
}

impl StatementBuilder {
    pub fn new(db_type: DatabaseType) -> Self {
        Self { db_type }
    }

    pub fn db_type(&self) -> DatabaseType {
        self.db_type
    }

    /// `SELECT <columns|*> FROM t [WHERE ...] [ORDER BY ...] [LIMIT n]`
    pub fn select(&self, table: &TableHandle, options: &SelectOptions) -> DbResult<Statement> {
        table.validate_columns(options.predicate.columns(), "predicate")?;

        let projection = match &options.columns {
            Some(columns) if !columns.is_empty() => {
                table.validate_columns(columns.iter().map(String::as_str), "projection")?;
                columns.join(", ")
            }
            _ => "*".to_string(),
        };

        let mut binder = Binder::new(self.db_type, table);
        let mut sql = format!("SELECT {} FROM {}", projection, table.qualified_name());
        sql.push_str(&binder.where_clause(&options.predicate));
        if !options.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&options.order_by.join(", "));
        }
        if let Some(limit) = options.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        Ok(binder.finish(sql))
    }

    /// Multi-row `INSERT`, split so no statement exceeds the dialect's
    /// bind-parameter limit. An empty batch renders nothing.
    ///
    /// Every record must carry the same column set; values are reordered to
    /// the first record's column order.
    pub fn insert(&self, table: &TableHandle, records: &[Record]) -> DbResult<Vec<Statement>> {
        let Some(first) = records.first() else {
            return Ok(Vec::new());
        };
        if first.is_empty() {
            return Err(DbError::query(format!(
                "Insert into '{}' has a record without columns",
                table.qualified_name()
            )));
        }
        table.validate_columns(first.columns(), "insert")?;
        let columns: Vec<&str> = first.columns().collect();

        for (idx, record) in records.iter().enumerate().skip(1) {
            if record.len() != columns.len() || !columns.iter().all(|c| record.contains(c)) {
                return Err(DbError::query(format!(
                    "Insert batch for '{}' mixes column sets: record {} has [{}], expected [{}]",
                    table.qualified_name(),
                    idx,
                    record.columns().collect::<Vec<_>>().join(", "),
                    columns.join(", ")
                )));
            }
        }

        let rows_per_statement = (self.db_type.max_bind_params() / columns.len()).max(1);
        let head = format!(
            "INSERT INTO {} ({}) VALUES ",
            table.qualified_name(),
            columns.join(", ")
        );

        let statements = records
            .chunks(rows_per_statement)
            .map(|chunk| {
                let mut binder = Binder::new(self.db_type, table);
                let tuples: Vec<String> = chunk
                    .iter()
                    .map(|record| {
                        let placeholders: Vec<String> = columns
                            .iter()
                            .map(|c| {
                                let value = record.get(c).cloned().unwrap_or(Value::Null);
                                binder.bind(c, value)
                            })
                            .collect();
                        format!("({})", placeholders.join(", "))
                    })
                    .collect();
                binder.finish(format!("{}{}", head, tuples.join(", ")))
            })
            .collect();
        Ok(statements)
    }

    /// `UPDATE t SET ... [WHERE ...]`. An empty predicate updates every row.
    pub fn update(
        &self,
        table: &TableHandle,
        predicate: &Predicate,
        values: &Record,
    ) -> DbResult<Statement> {
        if values.is_empty() {
            return Err(DbError::query(format!(
                "Update of '{}' has no values to set",
                table.qualified_name()
            )));
        }
        table.validate_columns(values.columns(), "update values")?;
        table.validate_columns(predicate.columns(), "predicate")?;

        let mut binder = Binder::new(self.db_type, table);
        let assignments: Vec<String> = values
            .iter()
            .map(|(column, value)| format!("{} = {}", column, binder.bind(column, value.clone())))
            .collect();
        let mut sql = format!(
            "UPDATE {} SET {}",
            table.qualified_name(),
            assignments.join(", ")
        );
        sql.push_str(&binder.where_clause(predicate));
        Ok(binder.finish(sql))
    }

    /// `DELETE FROM t [WHERE ...]`. An empty predicate deletes every row.
    pub fn delete(&self, table: &TableHandle, predicate: &Predicate) -> DbResult<Statement> {
        table.validate_columns(predicate.columns(), "predicate")?;

        let mut binder = Binder::new(self.db_type, table);
        let mut sql = format!("DELETE FROM {}", table.qualified_name());
        sql.push_str(&binder.where_clause(predicate));
        Ok(binder.finish(sql))
    }

    /// Positional placeholder for the `n`th (1-based) parameter of a
    /// hand-rendered statement.
    pub fn placeholder(&self, n: usize) -> String {
        match self.db_type {
            DatabaseType::PostgreSQL => format!("${}", n),
            DatabaseType::MySQL | DatabaseType::SQLite => "?".to_string(),
        }
    }

    /// The dialect's "on key collision" suffix for an `INSERT`.
    pub fn conflict_clause(&self, keys: &[String], update_columns: &[String]) -> String {
        match self.db_type {
            DatabaseType::PostgreSQL | DatabaseType::SQLite => {
                if update_columns.is_empty() {
                    format!("ON CONFLICT ({}) DO NOTHING", keys.join(", "))
                } else {
                    let set: Vec<String> = update_columns
                        .iter()
                        .map(|c| format!("{} = excluded.{}", c, c))
                        .collect();
                    format!(
                        "ON CONFLICT ({}) DO UPDATE SET {}",
                        keys.join(", "),
                        set.join(", ")
                    )
                }
            }
            DatabaseType::MySQL => {
                let set: Vec<String> = if update_columns.is_empty() {
                    // No-op assignment keeps the existing row untouched
                    keys.iter().take(1).map(|k| format!("{} = {}", k, k)).collect()
                } else {
                    update_columns
                        .iter()
                        .map(|c| format!("{} = VALUES({})", c, c))
                        .collect()
                };
                format!("ON DUPLICATE KEY UPDATE {}", set.join(", "))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ColumnDefinition, TableRef};
    use crate::record;

    fn merge_target() -> TableHandle {
        TableHandle::new(
            TableRef::new("merge_target"),
            vec![
                ColumnDefinition::new("id", "integer", false).with_primary_key(true),
                ColumnDefinition::new("name", "character varying(50)", true),
                ColumnDefinition::new("value", "numeric(12,4)", true),
            ],
            vec!["id".to_string()],
        )
    }

    #[test]
    fn test_select_all() {
        let builder = StatementBuilder::new(DatabaseType::SQLite);
        let stmt = builder
            .select(&merge_target(), &SelectOptions::new())
            .unwrap();
        assert_eq!(stmt.sql, "SELECT * FROM merge_target");
        assert!(stmt.params.is_empty());
    }

    #[test]
    fn test_select_with_predicate_order_and_limit() {
        let builder = StatementBuilder::new(DatabaseType::SQLite);
        let options = SelectOptions::new()
            .filter("name", "Bob")
            .filter("value", Value::Null)
            .columns(["id", "value"])
            .order_by("id DESC")
            .limit(5);
        let stmt = builder.select(&merge_target(), &options).unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT id, value FROM merge_target WHERE name = ? AND value IS NULL ORDER BY id DESC LIMIT 5"
        );
        assert_eq!(stmt.params, vec![Value::Text("Bob".into())]);
    }

    #[test]
    fn test_postgres_placeholders_cast_to_column_type() {
        let builder = StatementBuilder::new(DatabaseType::PostgreSQL);
        let options = SelectOptions::new().filter("id", 1).filter("name", "Bob");
        let stmt = builder.select(&merge_target(), &options).unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT * FROM merge_target WHERE id = CAST($1 AS integer) AND name = CAST($2 AS character varying)"
        );
    }

    #[test]
    fn test_select_rejects_unknown_column() {
        let builder = StatementBuilder::new(DatabaseType::MySQL);
        let err = builder
            .select(&merge_target(), &SelectOptions::new().filter("price", 1))
            .unwrap_err();
        assert!(matches!(err, DbError::Query { .. }));

        let err = builder
            .select(&merge_target(), &SelectOptions::new().columns(["price"]))
            .unwrap_err();
        assert!(matches!(err, DbError::Query { .. }));
    }

    #[test]
    fn test_insert_batch_normalizes_column_order() {
        let builder = StatementBuilder::new(DatabaseType::SQLite);
        let rows = vec![
            record! { "id" => 1, "name" => "Alice" },
            record! { "name" => "Bob", "id" => 2 },
        ];
        let stmts = builder.insert(&merge_target(), &rows).unwrap();
        assert_eq!(stmts.len(), 1);
        assert_eq!(
            stmts[0].sql,
            "INSERT INTO merge_target (id, name) VALUES (?, ?), (?, ?)"
        );
        assert_eq!(
            stmts[0].params,
            vec![
                Value::Int(1),
                Value::Text("Alice".into()),
                Value::Int(2),
                Value::Text("Bob".into())
            ]
        );
    }

    #[test]
    fn test_insert_rejects_mixed_column_sets() {
        let builder = StatementBuilder::new(DatabaseType::SQLite);
        let rows = vec![
            record! { "id" => 1, "name" => "Alice" },
            record! { "id" => 2, "value" => 5 },
        ];
        let err = builder.insert(&merge_target(), &rows).unwrap_err();
        assert!(matches!(err, DbError::Query { .. }));
    }

    #[test]
    fn test_insert_empty_batch_renders_nothing() {
        let builder = StatementBuilder::new(DatabaseType::PostgreSQL);
        assert!(builder.insert(&merge_target(), &[]).unwrap().is_empty());
    }

    #[test]
    fn test_insert_splits_on_bind_limit() {
        let builder = StatementBuilder::new(DatabaseType::SQLite);
        // 3 columns -> 10922 rows per statement under SQLite's 32766 limit
        let rows: Vec<Record> = (0..11_000)
            .map(|i| record! { "id" => i, "name" => "x", "value" => i })
            .collect();
        let stmts = builder.insert(&merge_target(), &rows).unwrap();
        assert_eq!(stmts.len(), 2);
        assert_eq!(stmts[0].params.len(), 10_922 * 3);
        assert_eq!(stmts[1].params.len(), 78 * 3);
    }

    #[test]
    fn test_update_and_delete() {
        let builder = StatementBuilder::new(DatabaseType::MySQL);
        let table = merge_target();
        let stmt = builder
            .update(&table, &record! { "id" => 1 }, &record! { "value" => 100 })
            .unwrap();
        assert_eq!(stmt.sql, "UPDATE merge_target SET value = ? WHERE id = ?");
        assert_eq!(stmt.params, vec![Value::Int(100), Value::Int(1)]);

        let stmt = builder.delete(&table, &Predicate::new()).unwrap();
        assert_eq!(stmt.sql, "DELETE FROM merge_target");
    }

    #[test]
    fn test_update_without_values_fails() {
        let builder = StatementBuilder::new(DatabaseType::SQLite);
        let err = builder
            .update(&merge_target(), &record! { "id" => 1 }, &Record::new())
            .unwrap_err();
        assert!(matches!(err, DbError::Query { .. }));
    }

    #[test]
    fn test_conflict_clause_per_dialect() {
        let keys = vec!["id".to_string()];
        let update = vec!["name".to_string(), "value".to_string()];

        assert_eq!(
            StatementBuilder::new(DatabaseType::SQLite).conflict_clause(&keys, &update),
            "ON CONFLICT (id) DO UPDATE SET name = excluded.name, value = excluded.value"
        );
        assert_eq!(
            StatementBuilder::new(DatabaseType::PostgreSQL).conflict_clause(&keys, &[]),
            "ON CONFLICT (id) DO NOTHING"
        );
        assert_eq!(
            StatementBuilder::new(DatabaseType::MySQL).conflict_clause(&keys, &update),
            "ON DUPLICATE KEY UPDATE name = VALUES(name), value = VALUES(value)"
        );
        assert_eq!(
            StatementBuilder::new(DatabaseType::MySQL).conflict_clause(&keys, &[]),
            "ON DUPLICATE KEY UPDATE id = id"
        );
    }

    #[test]
    fn test_placeholder_per_dialect() {
        assert_eq!(StatementBuilder::new(DatabaseType::PostgreSQL).placeholder(3), "$3");
        assert_eq!(StatementBuilder::new(DatabaseType::MySQL).placeholder(3), "?");
    }

    #[test]
    fn test_strip_type_modifiers() {
        assert_eq!(strip_type_modifiers("numeric(12,4)"), "numeric");
        assert_eq!(
            strip_type_modifiers("timestamp(3) without time zone"),
            "timestamp without time zone"
        );
        assert_eq!(strip_type_modifiers("text"), "text");
    }
}
