//! Database-agnostic type mappings.
//!
//! Type conversion uses a two-phase approach:
//! 1. `TypeCategory` classifies column types into logical categories
//! 2. Database-specific decoders handle the actual value extraction
//!
//! Every decoded row becomes a [`Record`] whose columns keep the order the
//! query produced them in.

use crate::error::DbResult;
use crate::models::{DatabaseType, Record, Value};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use sqlx::mysql::MySqlRow;
use sqlx::postgres::PgRow;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row, TypeInfo};

// =============================================================================
// Type Classification
// =============================================================================

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Text,
    Binary,
    Date,
    Time,
    Timestamp,
    Uuid,
    Json,
    Null,
    Unknown,
}

/// Classify a database type name into a logical category.
pub fn categorize_type(type_name: &str, db: DatabaseType) -> TypeCategory {
    let lower = type_name.to_lowercase();

    if lower == "null" {
        return TypeCategory::Null;
    }

    // Decimal/Numeric - check first as it overlaps with "numeric" in float checks
    if lower.contains("decimal") || lower.contains("numeric") {
        // SQLite's NUMERIC is an affinity, not an exact type
        if db == DatabaseType::SQLite {
            return TypeCategory::Float;
        }
        return TypeCategory::Decimal;
    }

    // MySQL reports TINYINT(1) as BOOLEAN
    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }

    if lower.starts_with("timestamp") || lower == "datetime" {
        return TypeCategory::Timestamp;
    }

    if lower == "date" {
        return TypeCategory::Date;
    }

    // Zoned times have no chrono mapping and stay Unknown
    if lower == "time" {
        return TypeCategory::Time;
    }

    if lower == "uuid" {
        return TypeCategory::Uuid;
    }

    // Integer types
    if (lower.contains("int") && lower != "interval" && lower != "point")
        || lower.contains("serial")
    {
        return TypeCategory::Integer;
    }

    // Float types
    if lower.contains("float")
        || lower.contains("double")
        || lower == "real"
        || lower == "float4"
        || lower == "float8"
    {
        return TypeCategory::Float;
    }

    if lower == "json" || lower == "jsonb" {
        return TypeCategory::Json;
    }

    if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
        return TypeCategory::Binary;
    }

    if lower.contains("char") || lower.contains("text") || lower == "name" {
        return TypeCategory::Text;
    }

    // enum, interval and anything else: decoded as text when possible
    TypeCategory::Unknown
}

// =============================================================================
// Row to Record Trait
// =============================================================================

/// Trait for converting database rows to ordered records.
pub trait RowToRecord {
    fn to_record(&self) -> DbResult<Record>;
}

macro_rules! impl_row_to_record {
    ($row:ty, $db:expr, $decoder:path) => {
        impl RowToRecord for $row {
            fn to_record(&self) -> DbResult<Record> {
                let mut record = Record::with_capacity(self.columns().len());
                for (idx, col) in self.columns().iter().enumerate() {
                    let category = categorize_type(col.type_info().name(), $db);
                    let value = $decoder(self, idx, category)?;
                    record.push(col.name(), value);
                }
                Ok(record)
            }
        }
    };
}

impl_row_to_record!(MySqlRow, DatabaseType::MySQL, mysql::decode_column);
impl_row_to_record!(PgRow, DatabaseType::PostgreSQL, postgres::decode_column);
impl_row_to_record!(SqliteRow, DatabaseType::SQLite, sqlite::decode_column);

/// Convert a batch of rows.
pub fn rows_to_records<R: RowToRecord>(rows: &[R]) -> DbResult<Vec<Record>> {
    rows.iter().map(RowToRecord::to_record).collect()
}

fn float_value(v: f64) -> Value {
    Value::Float(v)
}

fn time_value(v: NaiveTime) -> Value {
    Value::Text(v.to_string())
}

fn json_value(v: serde_json::Value) -> Value {
    Value::Text(v.to_string())
}

// =============================================================================
// Database-Specific Decoders
// =============================================================================

mod mysql {
    use super::*;

    pub fn decode_column(
        row: &MySqlRow,
        idx: usize,
        category: TypeCategory,
    ) -> Result<Value, sqlx::Error> {
        match category {
            TypeCategory::Null => Ok(Value::Null),
            TypeCategory::Decimal => {
                Ok(row.try_get::<Option<Decimal>, _>(idx)?.into())
            }
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => Ok(row.try_get::<Option<bool>, _>(idx)?.into()),
            TypeCategory::Float => decode_float(row, idx),
            TypeCategory::Binary => Ok(row.try_get::<Option<Vec<u8>>, _>(idx)?.into()),
            TypeCategory::Date => Ok(row.try_get::<Option<NaiveDate>, _>(idx)?.into()),
            TypeCategory::Time => decode_time(row, idx),
            TypeCategory::Timestamp => decode_timestamp(row, idx),
            TypeCategory::Json => Ok(row
                .try_get::<Option<serde_json::Value>, _>(idx)?
                .map(json_value)
                .unwrap_or(Value::Null)),
            TypeCategory::Text | TypeCategory::Uuid | TypeCategory::Unknown => {
                decode_text(row, idx)
            }
        }
    }

    fn decode_integer(row: &MySqlRow, idx: usize) -> Result<Value, sqlx::Error> {
        if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
            return Ok(v.into());
        }
        if let Ok(v) = row.try_get::<Option<i32>, _>(idx) {
            return Ok(v.into());
        }
        if let Ok(v) = row.try_get::<Option<i16>, _>(idx) {
            return Ok(v.into());
        }
        if let Ok(v) = row.try_get::<Option<i8>, _>(idx) {
            return Ok(v.into());
        }
        // Unsigned columns
        if let Ok(v) = row.try_get::<Option<u32>, _>(idx) {
            return Ok(v.into());
        }
        match row.try_get::<Option<u64>, _>(idx)? {
            Some(v) => Ok(i64::try_from(v)
                .map(Value::Int)
                .unwrap_or_else(|_| Value::Decimal(Decimal::from(v)))),
            None => Ok(Value::Null),
        }
    }

    fn decode_float(row: &MySqlRow, idx: usize) -> Result<Value, sqlx::Error> {
        if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
            return Ok(v.map(float_value).unwrap_or(Value::Null));
        }
        Ok(row
            .try_get::<Option<f32>, _>(idx)?
            .map(|v| float_value(v as f64))
            .unwrap_or(Value::Null))
    }

    fn decode_time(row: &MySqlRow, idx: usize) -> Result<Value, sqlx::Error> {
        Ok(row
            .try_get::<Option<NaiveTime>, _>(idx)?
            .map(time_value)
            .unwrap_or(Value::Null))
    }

    fn decode_timestamp(row: &MySqlRow, idx: usize) -> Result<Value, sqlx::Error> {
        if let Ok(v) = row.try_get::<Option<NaiveDateTime>, _>(idx) {
            return Ok(v.into());
        }
        Ok(row
            .try_get::<Option<DateTime<Utc>>, _>(idx)?
            .map(|v| Value::Timestamp(v.naive_utc()))
            .unwrap_or(Value::Null))
    }

    fn decode_text(row: &MySqlRow, idx: usize) -> Result<Value, sqlx::Error> {
        if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
            return Ok(v.into());
        }
        // VARBINARY-backed text and other opaque types
        Ok(row.try_get::<Option<Vec<u8>>, _>(idx)?.into())
    }
}

mod postgres {
    use super::*;
    use sqlx::postgres::PgTypeKind;

    pub fn decode_column(
        row: &PgRow,
        idx: usize,
        category: TypeCategory,
    ) -> Result<Value, sqlx::Error> {
        match category {
            TypeCategory::Null => Ok(Value::Null),
            TypeCategory::Decimal => {
                Ok(row.try_get::<Option<Decimal>, _>(idx)?.into())
            }
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => Ok(row.try_get::<Option<bool>, _>(idx)?.into()),
            TypeCategory::Float => decode_float(row, idx),
            TypeCategory::Binary => Ok(row.try_get::<Option<Vec<u8>>, _>(idx)?.into()),
            TypeCategory::Date => Ok(row.try_get::<Option<NaiveDate>, _>(idx)?.into()),
            TypeCategory::Time => Ok(row
                .try_get::<Option<NaiveTime>, _>(idx)?
                .map(time_value)
                .unwrap_or(Value::Null)),
            TypeCategory::Timestamp => decode_timestamp(row, idx),
            TypeCategory::Uuid => Ok(row
                .try_get::<Option<uuid::Uuid>, _>(idx)?
                .map(|v| Value::Text(v.to_string()))
                .unwrap_or(Value::Null)),
            TypeCategory::Json => Ok(row
                .try_get::<Option<serde_json::Value>, _>(idx)?
                .map(json_value)
                .unwrap_or(Value::Null)),
            TypeCategory::Text => Ok(row.try_get::<Option<String>, _>(idx)?.into()),
            TypeCategory::Unknown => decode_unknown(row, idx),
        }
    }

    fn decode_integer(row: &PgRow, idx: usize) -> Result<Value, sqlx::Error> {
        if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
            return Ok(v.into());
        }
        if let Ok(v) = row.try_get::<Option<i32>, _>(idx) {
            return Ok(v.into());
        }
        Ok(row.try_get::<Option<i16>, _>(idx)?.into())
    }

    fn decode_float(row: &PgRow, idx: usize) -> Result<Value, sqlx::Error> {
        if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
            return Ok(v.map(float_value).unwrap_or(Value::Null));
        }
        Ok(row
            .try_get::<Option<f32>, _>(idx)?
            .map(|v| float_value(v as f64))
            .unwrap_or(Value::Null))
    }

    fn decode_timestamp(row: &PgRow, idx: usize) -> Result<Value, sqlx::Error> {
        if let Ok(v) = row.try_get::<Option<NaiveDateTime>, _>(idx) {
            return Ok(v.into());
        }
        Ok(row
            .try_get::<Option<DateTime<Utc>>, _>(idx)?
            .map(|v| Value::Timestamp(v.naive_utc()))
            .unwrap_or(Value::Null))
    }

    fn decode_unknown(row: &PgRow, idx: usize) -> Result<Value, sqlx::Error> {
        if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
            return Ok(v.into());
        }
        let raw = row.try_get_raw(idx)?;
        if sqlx::ValueRef::is_null(&raw) {
            return Ok(Value::Null);
        }
        let type_info = sqlx::ValueRef::type_info(&raw).into_owned();
        // Enum values travel as their label
        if let PgTypeKind::Enum(_) = type_info.kind() {
            return Ok(row.try_get_unchecked::<Option<String>, _>(idx)?.into());
        }
        Err(sqlx::Error::ColumnDecode {
            index: idx.to_string(),
            source: format!("unsupported column type {}", type_info.name()).into(),
        })
    }
}

mod sqlite {
    use super::*;

    pub fn decode_column(
        row: &SqliteRow,
        idx: usize,
        category: TypeCategory,
    ) -> Result<Value, sqlx::Error> {
        match category {
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => Ok(row.try_get::<Option<bool>, _>(idx)?.into()),
            TypeCategory::Float | TypeCategory::Decimal => decode_float(row, idx),
            TypeCategory::Binary => Ok(row.try_get::<Option<Vec<u8>>, _>(idx)?.into()),
            TypeCategory::Date => match row.try_get::<Option<NaiveDate>, _>(idx) {
                Ok(v) => Ok(v.into()),
                Err(_) => decode_dynamic(row, idx),
            },
            TypeCategory::Timestamp => match row.try_get::<Option<NaiveDateTime>, _>(idx) {
                Ok(v) => Ok(v.into()),
                Err(_) => decode_dynamic(row, idx),
            },
            // Expression columns have no declared type and report NULL
            TypeCategory::Null
            | TypeCategory::Time
            | TypeCategory::Uuid
            | TypeCategory::Json
            | TypeCategory::Text
            | TypeCategory::Unknown => decode_dynamic(row, idx),
        }
    }

    fn decode_integer(row: &SqliteRow, idx: usize) -> Result<Value, sqlx::Error> {
        match row.try_get::<Option<i64>, _>(idx) {
            Ok(v) => Ok(v.into()),
            // Column affinity is only a hint; a cell may still hold text or a real
            Err(_) => decode_dynamic(row, idx),
        }
    }

    fn decode_float(row: &SqliteRow, idx: usize) -> Result<Value, sqlx::Error> {
        match row.try_get::<Option<f64>, _>(idx) {
            Ok(v) => Ok(v.map(float_value).unwrap_or(Value::Null)),
            Err(_) => decode_dynamic(row, idx),
        }
    }

    /// Decode by the storage class of the cell itself.
    fn decode_dynamic(row: &SqliteRow, idx: usize) -> Result<Value, sqlx::Error> {
        let raw = row.try_get_raw(idx)?;
        if sqlx::ValueRef::is_null(&raw) {
            return Ok(Value::Null);
        }
        let storage = sqlx::ValueRef::type_info(&raw).name().to_uppercase();
        match storage.as_str() {
            "INTEGER" => Ok(row.try_get::<Option<i64>, _>(idx)?.into()),
            "REAL" => Ok(row
                .try_get::<Option<f64>, _>(idx)?
                .map(float_value)
                .unwrap_or(Value::Null)),
            "BLOB" => Ok(row.try_get::<Option<Vec<u8>>, _>(idx)?.into()),
            _ => Ok(row.try_get_unchecked::<Option<String>, _>(idx)?.into()),
        }
    }
}
