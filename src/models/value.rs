//! Scalar values and ordered records.
//!
//! [`Value`] is the unit of data crossing the layer boundary: it is bound as a
//! statement parameter on the way in and decoded from result columns on the way
//! out. [`Record`] keeps column order, so rows come back in the order the query
//! produced them.

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

/// A single scalar cell value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    /// NULL value
    Null,
    Bool(bool),
    /// Integer value (stored as i64 for maximum range)
    Int(i64),
    Float(f64),
    /// Exact numeric (DECIMAL/NUMERIC)
    Decimal(Decimal),
    Text(String),
    /// Binary data (base64 encoded in JSON)
    #[serde(serialize_with = "base64_bytes::serialize")]
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
}

impl Value {
    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this value for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Decimal(_) => "decimal",
            Self::Text(_) => "text",
            Self::Bytes(_) => "bytes",
            Self::Date(_) => "date",
            Self::Timestamp(_) => "timestamp",
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Bool(v) => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            Self::Decimal(v) => v.to_string().parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v.as_str()),
            _ => None,
        }
    }

    /// Interpret a command-line literal.
    ///
    /// `null`, `true`/`false`, integers and floats map to their typed variants;
    /// anything else is text. Wrap a value in single quotes to force text.
    pub fn parse_literal(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.len() >= 2 && trimmed.starts_with('\'') && trimmed.ends_with('\'') {
            return Self::Text(trimmed[1..trimmed.len() - 1].to_string());
        }
        if trimmed.eq_ignore_ascii_case("null") {
            return Self::Null;
        }
        if trimmed.eq_ignore_ascii_case("true") {
            return Self::Bool(true);
        }
        if trimmed.eq_ignore_ascii_case("false") {
            return Self::Bool(false);
        }
        if let Ok(v) = trimmed.parse::<i64>() {
            return Self::Int(v);
        }
        if trimmed.chars().any(|c| c.is_ascii_digit()) {
            if let Ok(v) = trimmed.parse::<f64>() {
                return Self::Float(v);
            }
        }
        Self::Text(raw.to_string())
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Decimal(v) => write!(f, "{v}"),
            Self::Text(v) => write!(f, "{v}"),
            Self::Bytes(v) => write!(f, "<{} bytes>", v.len()),
            Self::Date(v) => write!(f, "{v}"),
            Self::Timestamp(v) => write!(f, "{v}"),
        }
    }
}

macro_rules! impl_value_from {
    ($($ty:ty => $variant:ident),+ $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v.into())
                }
            }
        )+
    };
}

impl_value_from!(
    bool => Bool,
    i8 => Int,
    i16 => Int,
    i32 => Int,
    i64 => Int,
    u8 => Int,
    u16 => Int,
    u32 => Int,
    f32 => Float,
    f64 => Float,
    Decimal => Decimal,
    String => Text,
    Vec<u8> => Bytes,
    NaiveDate => Date,
    NaiveDateTime => Timestamp,
);

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Custom serialization for binary data as base64.
mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Serialize, Serializer};

    pub fn serialize<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        STANDARD.encode(bytes).serialize(serializer)
    }
}

/// Ordered mapping from column name to value.
///
/// Used for result rows, insert/update payloads and equality predicates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    entries: Vec<(String, Value)>,
}

/// Conjunction of `column = value` comparisons, evaluated in order.
pub type Predicate = Record;

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Builder-style insert.
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(column, value);
        self
    }

    /// Set a column, replacing an existing entry in place.
    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let column = column.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(c, _)| *c == column) {
            Some((_, existing)) => Some(std::mem::replace(existing, value)),
            None => {
                self.entries.push((column, value));
                None
            }
        }
    }

    /// Append a column without checking for an existing entry.
    ///
    /// Query results may repeat a column name; each occurrence keeps its
    /// position. [`get`](Self::get) returns the first one.
    pub fn push(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        self.entries.push((column.into(), value.into()));
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(c, _)| c == column)
            .map(|(_, v)| v)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.entries.iter().any(|(c, _)| c == column)
    }

    pub fn remove(&mut self, column: &str) -> Option<Value> {
        let idx = self.entries.iter().position(|(c, _)| c == column)?;
        Some(self.entries.remove(idx).1)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(c, _)| c.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.entries.iter().map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(c, v)| (c.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keep only the given columns, in the given order.
    pub fn project(&self, columns: &[&str]) -> Record {
        columns
            .iter()
            .filter_map(|c| self.get(c).map(|v| (c.to_string(), v.clone())))
            .collect()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut record = Record::new();
        for (k, v) in iter {
            record.insert(k, v);
        }
        record
    }
}

impl IntoIterator for Record {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (column, value) in &self.entries {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

/// Build a [`Record`] from `column => value` pairs.
///
/// ```
/// use db_access::record;
///
/// let row = record! { "id" => 1, "name" => "Alice" };
/// assert_eq!(row.len(), 2);
/// ```
#[macro_export]
macro_rules! record {
    () => {
        $crate::models::Record::new()
    };
    ($($column:expr => $value:expr),+ $(,)?) => {{
        let mut record = $crate::models::Record::new();
        $(
            record.insert($column, $value);
        )+
        record
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_preserves_insertion_order() {
        let row = record! { "id" => 1, "name" => "Alice", "value" => 10 };
        let columns: Vec<&str> = row.columns().collect();
        assert_eq!(columns, vec!["id", "name", "value"]);
    }

    #[test]
    fn test_record_insert_replaces_in_place() {
        let mut row = record! { "id" => 1, "name" => "Alice" };
        let previous = row.insert("id", 2);
        assert_eq!(previous, Some(Value::Int(1)));
        assert_eq!(row.get("id"), Some(&Value::Int(2)));
        assert_eq!(row.columns().next(), Some("id"));
        assert_eq!(row.len(), 2);
    }

    #[test]
    fn test_record_project_and_remove() {
        let mut row = record! { "id" => 1, "name" => "Alice", "value" => 10 };
        let projected = row.project(&["value", "id"]);
        assert_eq!(projected.columns().collect::<Vec<_>>(), vec!["value", "id"]);

        assert_eq!(row.remove("name"), Some(Value::Text("Alice".to_string())));
        assert!(!row.contains("name"));
        assert_eq!(row.remove("missing"), None);
    }

    #[test]
    fn test_value_from_option() {
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some("x")), Value::Text("x".to_string()));
    }

    #[test]
    fn test_parse_literal() {
        assert_eq!(Value::parse_literal("null"), Value::Null);
        assert_eq!(Value::parse_literal("TRUE"), Value::Bool(true));
        assert_eq!(Value::parse_literal("42"), Value::Int(42));
        assert_eq!(Value::parse_literal("4.5"), Value::Float(4.5));
        assert_eq!(Value::parse_literal("AAPL"), Value::Text("AAPL".to_string()));
        assert_eq!(Value::parse_literal("'42'"), Value::Text("42".to_string()));
    }

    #[test]
    fn test_record_serializes_in_column_order() {
        let row = record! {
            "ticker" => "MSFT",
            "close" => 410.5,
            "raw" => vec![0xFFu8, 0xFE, 0x00, 0x01],
            "note" => Value::Null,
        };
        let json = serde_json::to_string(&row).unwrap();
        assert_eq!(
            json,
            r#"{"ticker":"MSFT","close":410.5,"raw":"//4AAQ==","note":null}"#
        );
    }

    #[test]
    fn test_value_accessors() {
        assert_eq!(Value::Int(3).as_i64(), Some(3));
        assert_eq!(Value::Int(3).as_f64(), Some(3.0));
        assert_eq!(Value::Text("a".into()).as_str(), Some("a"));
        assert_eq!(Value::Null.as_i64(), None);
        assert_eq!(Value::Bytes(vec![1]).type_name(), "bytes");
    }
}
