//! Merge (upsert) data models.
//!
//! A [`MergeSpec`] names a source and a target table and optionally the key
//! and update columns. Resolving it against the reflected tables yields a
//! [`MergePlan`], which is what the merge engine renders into SQL.

use crate::error::{DbError, DbResult};
use crate::models::connection::{DatabaseType, ServerVersion};
use crate::models::schema::{TableHandle, TableRef};
use serde::{Deserialize, Serialize};

/// How a Target reconciles a source table into a target table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// One `MERGE INTO ... USING ...` statement.
    NativeMerge,
    /// One `INSERT ... SELECT ... <upsert clause>` statement.
    EmulatedSetUpsert,
    /// One `INSERT ... SELECT ... <upsert clause>` per source row.
    EmulatedRowUpsert,
}

impl MergeStrategy {
    /// Strategies a dialect can run, most preferred first.
    ///
    /// An unknown server version is treated as current.
    pub fn capabilities(db_type: DatabaseType, version: Option<ServerVersion>) -> Vec<Self> {
        let at_least = |major: u32, minor: u32| {
            version.is_none_or(|v| v >= ServerVersion::new(major, minor))
        };

        match db_type {
            DatabaseType::PostgreSQL if at_least(15, 0) => vec![
                Self::NativeMerge,
                Self::EmulatedSetUpsert,
                Self::EmulatedRowUpsert,
            ],
            DatabaseType::PostgreSQL if at_least(9, 5) => {
                vec![Self::EmulatedSetUpsert, Self::EmulatedRowUpsert]
            }
            DatabaseType::SQLite if at_least(3, 24) => {
                vec![Self::EmulatedSetUpsert, Self::EmulatedRowUpsert]
            }
            // ON DUPLICATE KEY UPDATE fires on any unique key, not just the
            // merge keys
            DatabaseType::MySQL => vec![Self::EmulatedSetUpsert, Self::EmulatedRowUpsert],
            _ => Vec::new(),
        }
    }

    /// Pick the strategy for a Target: the override if the dialect supports it,
    /// otherwise the preferred capability.
    pub fn select(
        db_type: DatabaseType,
        version: Option<ServerVersion>,
        requested: Option<MergeStrategy>,
    ) -> DbResult<Option<Self>> {
        let capabilities = Self::capabilities(db_type, version);
        match requested {
            Some(strategy) if capabilities.contains(&strategy) => Ok(Some(strategy)),
            Some(strategy) => Err(DbError::query(format!(
                "Merge strategy '{}' is not supported by {}{}",
                strategy,
                db_type,
                version.map(|v| format!(" {}", v)).unwrap_or_default()
            ))),
            None => Ok(capabilities.first().copied()),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NativeMerge => "native_merge",
            Self::EmulatedSetUpsert => "set_upsert",
            Self::EmulatedRowUpsert => "row_upsert",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "native_merge" | "native" | "merge" => Some(Self::NativeMerge),
            "set_upsert" | "emulated_set_upsert" => Some(Self::EmulatedSetUpsert),
            "row_upsert" | "emulated_row_upsert" => Some(Self::EmulatedRowUpsert),
            _ => None,
        }
    }
}

impl std::fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Declarative description of a merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeSpec {
    pub source: TableRef,
    pub target: TableRef,
    /// Defaults to the target's primary key.
    pub keys: Option<Vec<String>>,
    /// Defaults to every shared non-key column.
    pub update_columns: Option<Vec<String>>,
}

impl MergeSpec {
    pub fn new(source: impl Into<TableRef>, target: impl Into<TableRef>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            keys: None,
            update_columns: None,
        }
    }

    pub fn with_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keys = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_update_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.update_columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Resolve keys and columns against the reflected tables.
    ///
    /// Fails before any SQL is rendered when no usable key set exists.
    pub fn plan(&self, source: &TableHandle, target: &TableHandle) -> DbResult<MergePlan> {
        let keys: Vec<String> = match &self.keys {
            Some(keys) => dedup(keys.iter().cloned()),
            None => target.primary_key.clone(),
        };
        if keys.is_empty() {
            return Err(DbError::schema(
                format!(
                    "Target table {} has no primary key defined and no merge keys were given",
                    target.qualified_name()
                ),
                target.qualified_name(),
            ));
        }
        for key in &keys {
            if !target.has_column(key) {
                return Err(DbError::schema(
                    format!("Merge key '{}' is not a column of the target table", key),
                    target.qualified_name(),
                ));
            }
            if !source.has_column(key) {
                return Err(DbError::schema(
                    format!("Merge key '{}' is not a column of the source table", key),
                    source.qualified_name(),
                ));
            }
        }

        let insert_columns: Vec<String> = target
            .column_names()
            .filter(|c| source.has_column(c))
            .map(String::from)
            .collect();

        let update_columns = match &self.update_columns {
            Some(columns) => {
                target.validate_columns(columns.iter().map(String::as_str), "update columns")?;
                source.validate_columns(columns.iter().map(String::as_str), "update columns")?;
                dedup(columns.iter().filter(|c| !keys.contains(c)).cloned())
            }
            None => target
                .non_key_columns(&keys)
                .into_iter()
                .filter(|c| source.has_column(c))
                .collect(),
        };

        Ok(MergePlan {
            keys,
            insert_columns,
            update_columns,
        })
    }
}

/// Resolved merge: what matches, what is inserted, what is rewritten.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergePlan {
    pub keys: Vec<String>,
    /// Target columns present in the source, in target order.
    pub insert_columns: Vec<String>,
    /// Never contains a key column.
    pub update_columns: Vec<String>,
}

/// Result of a completed merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MergeOutcome {
    pub strategy: MergeStrategy,
    /// As reported by the driver; dialects count upserted rows differently.
    pub rows_affected: u64,
}

fn dedup(items: impl Iterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}
