//! Schema-related data models.
//!
//! A [`TableHandle`] is the reflected, immutable description of one table:
//! its columns in ordinal order and its primary key in key order.

use crate::error::{DbError, DbResult};
use serde::Serialize;

/// Reference to a table by name and optional schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TableRef {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
}

impl TableRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema: None,
        }
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Set the schema only when one is given.
    pub fn in_schema(mut self, schema: Option<&str>) -> Self {
        self.schema = schema.map(String::from);
        self
    }

    /// Key under which the catalog caches this table: `schema.name` or `name`.
    pub fn cache_key(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", schema, self.name),
            None => self.name.clone(),
        }
    }

    /// Name as interpolated into SQL text. Identifiers are trusted input.
    pub fn qualified_name(&self) -> String {
        self.cache_key()
    }
}

impl From<&str> for TableRef {
    fn from(name: &str) -> Self {
        TableRef::new(name)
    }
}

impl From<String> for TableRef {
    fn from(name: String) -> Self {
        TableRef::new(name)
    }
}

impl std::fmt::Display for TableRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.cache_key())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnDefinition {
    pub name: String,
    /// Full type (e.g., `varchar(30)`, `numeric(12,4)`)
    pub data_type: String,
    pub nullable: bool,
    pub is_primary_key: bool,
}

impl ColumnDefinition {
    /// Create a new column definition.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable,
            is_primary_key: false,
        }
    }

    /// Mark this column as part of the primary key.
    pub fn with_primary_key(mut self, is_pk: bool) -> Self {
        self.is_primary_key = is_pk;
        self
    }
}

/// Cached description of a reflected table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableHandle {
    pub table: TableRef,
    pub columns: Vec<ColumnDefinition>,
    /// Primary-key column names in key order. Empty when the table has none.
    pub primary_key: Vec<String>,
}

impl TableHandle {
    pub fn new(table: TableRef, columns: Vec<ColumnDefinition>, primary_key: Vec<String>) -> Self {
        Self {
            table,
            columns,
            primary_key,
        }
    }

    pub fn name(&self) -> &str {
        &self.table.name
    }

    pub fn schema(&self) -> Option<&str> {
        self.table.schema.as_deref()
    }

    pub fn qualified_name(&self) -> String {
        self.table.qualified_name()
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    /// Columns outside `keys`, in ordinal order.
    pub fn non_key_columns(&self, keys: &[String]) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| !keys.contains(&c.name))
            .map(|c| c.name.clone())
            .collect()
    }

    /// Reject any column this table does not have.
    pub fn validate_columns<'a>(
        &self,
        columns: impl IntoIterator<Item = &'a str>,
        context: &str,
    ) -> DbResult<()> {
        for column in columns {
            if !self.has_column(column) {
                return Err(DbError::query(format!(
                    "Unknown column '{}' in {} for table '{}'",
                    column,
                    context,
                    self.qualified_name()
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prices() -> TableHandle {
        TableHandle::new(
            TableRef::new("prices").with_schema("mkt"),
            vec![
                ColumnDefinition::new("ticker", "text", false).with_primary_key(true),
                ColumnDefinition::new("date", "date", false).with_primary_key(true),
                ColumnDefinition::new("close", "numeric(12,4)", true),
            ],
            vec!["ticker".to_string(), "date".to_string()],
        )
    }

    #[test]
    fn test_cache_key() {
        assert_eq!(TableRef::new("prices").cache_key(), "prices");
        assert_eq!(
            TableRef::new("prices").with_schema("mkt").cache_key(),
            "mkt.prices"
        );
        assert_eq!(TableRef::new("prices").in_schema(None).cache_key(), "prices");
    }

    #[test]
    fn test_non_key_columns() {
        let handle = prices();
        assert_eq!(
            handle.non_key_columns(&handle.primary_key),
            vec!["close".to_string()]
        );
        assert_eq!(
            handle.non_key_columns(&["ticker".to_string()]),
            vec!["date".to_string(), "close".to_string()]
        );
    }

    #[test]
    fn test_validate_columns_rejects_unknown() {
        let handle = prices();
        assert!(handle.validate_columns(["ticker", "close"], "predicate").is_ok());

        let err = handle
            .validate_columns(["ticker", "volume"], "predicate")
            .unwrap_err();
        assert!(matches!(err, DbError::Query { .. }));
        assert!(err.to_string().contains("volume"));
        assert!(err.to_string().contains("mkt.prices"));
    }
}
