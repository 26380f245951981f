//! Column values and rows.
//!
//! [`Value`] is what entities hand to the session on write and what decoded
//! result columns look like on read. [`Row`] keeps column names alongside the
//! values so `from_row` implementations can look columns up by name.

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::types::{ToSql, ToSqlOutput, ValueRef};
use serde::ser::{Serialize, SerializeMap, Serializer};
use tablekit_common::{Error, PostId, ProfileId, Result, UserId};

use crate::schema::ColumnType;

/// Storage format for timestamps. Whole seconds print exactly like
/// `CURRENT_TIMESTAMP`; a fraction is only appended when there is one.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// A dynamically-typed column value.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Bool(bool),
    Timestamp(DateTime<Utc>),
    Blob(Vec<u8>),
}

impl Value {
    /// True for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Convert a raw SQLite value without schema information.
    pub fn from_raw(raw: ValueRef<'_>) -> Self {
        match raw {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::Integer(i),
            ValueRef::Real(f) => Value::Real(f),
            ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => Value::Blob(b.to_vec()),
        }
    }

    /// Convert a raw SQLite value into the representation of a declared column type.
    pub fn decode(raw: ValueRef<'_>, column_type: ColumnType) -> Result<Self> {
        let value = Self::from_raw(raw);
        match (column_type, value) {
            (_, Value::Null) => Ok(Value::Null),
            (ColumnType::Boolean, Value::Integer(i)) => Ok(Value::Bool(i != 0)),
            (ColumnType::Boolean, Value::Text(t)) => match t.as_str() {
                "0" | "false" => Ok(Value::Bool(false)),
                "1" | "true" => Ok(Value::Bool(true)),
                other => Err(Error::decode(format!("'{other}' is not a boolean"))),
            },
            (ColumnType::Timestamp, Value::Text(t)) => parse_timestamp(&t).map(Value::Timestamp),
            (ColumnType::Integer, Value::Text(t)) => t
                .parse::<i64>()
                .map(Value::Integer)
                .map_err(|e| Error::decode(format!("'{t}' is not an integer: {e}"))),
            (ColumnType::String { .. }, Value::Integer(i)) => Ok(Value::Text(i.to_string())),
            (_, value) => Ok(value),
        }
    }
}

/// Parse a stored timestamp, accepting both our own format and SQLite's
/// `CURRENT_TIMESTAMP` output.
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .or_else(|_| DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc)))
        .map_err(|e| Error::decode(format!("'{s}' is not a timestamp: {e}")))
}

/// Format a timestamp the way it is stored.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Encode values as a JSON array for `json_each`, so a list of any length
/// binds as a single parameter. `None` if a value has no JSON form.
pub(crate) fn json_array(values: &[Value]) -> Option<String> {
    let items = values
        .iter()
        .map(|value| match value {
            Value::Null => Some(serde_json::Value::Null),
            Value::Integer(i) => Some((*i).into()),
            Value::Real(f) => serde_json::Number::from_f64(*f).map(serde_json::Value::Number),
            Value::Text(s) => Some(s.as_str().into()),
            Value::Bool(b) => Some(i64::from(*b).into()),
            Value::Timestamp(ts) => Some(format_timestamp(ts).into()),
            Value::Blob(_) => None,
        })
        .collect::<Option<Vec<_>>>()?;
    serde_json::to_string(&items).ok()
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        use rusqlite::types::Value as Sql;
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(Sql::Null),
            Value::Integer(i) => ToSqlOutput::Owned(Sql::Integer(*i)),
            Value::Real(f) => ToSqlOutput::Owned(Sql::Real(*f)),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Bool(b) => ToSqlOutput::Owned(Sql::Integer(i64::from(*b))),
            Value::Timestamp(ts) => ToSqlOutput::Owned(Sql::Text(format_timestamp(ts))),
            Value::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
        })
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Timestamp(v)
    }
}

impl From<UserId> for Value {
    fn from(v: UserId) -> Self {
        Value::Integer(v.get())
    }
}

impl From<ProfileId> for Value {
    fn from(v: ProfileId) -> Self {
        Value::Integer(v.get())
    }
}

impl From<PostId> for Value {
    fn from(v: PostId) -> Self {
        Value::Integer(v.get())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// One result row: column names with their decoded values, in select order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<(String, Value)>,
}

impl Row {
    /// Create an empty row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a column.
    pub fn push(&mut self, name: impl Into<String>, value: Value) {
        self.columns.push((name.into(), value));
    }

    /// Get a column value by name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.columns.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Iterate over `(name, value)` pairs.
    pub fn columns(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    fn require(&self, name: &str) -> Result<&Value> {
        self.get(name)
            .ok_or_else(|| Error::decode(format!("column '{name}' missing from row")))
    }

    /// Get a non-null integer column.
    pub fn get_i64(&self, name: &str) -> Result<i64> {
        match self.require(name)? {
            Value::Integer(i) => Ok(*i),
            other => Err(type_error(name, "an integer", other)),
        }
    }

    /// Get a nullable integer column.
    pub fn get_opt_i64(&self, name: &str) -> Result<Option<i64>> {
        match self.require(name)? {
            Value::Null => Ok(None),
            _ => self.get_i64(name).map(Some),
        }
    }

    /// Get a non-null text column.
    pub fn get_string(&self, name: &str) -> Result<String> {
        match self.require(name)? {
            Value::Text(s) => Ok(s.clone()),
            other => Err(type_error(name, "text", other)),
        }
    }

    /// Get a non-null boolean column. Plain integers are accepted so raw rows decode too.
    pub fn get_bool(&self, name: &str) -> Result<bool> {
        match self.require(name)? {
            Value::Bool(b) => Ok(*b),
            Value::Integer(i) => Ok(*i != 0),
            other => Err(type_error(name, "a boolean", other)),
        }
    }

    /// Get a non-null timestamp column.
    pub fn get_timestamp(&self, name: &str) -> Result<DateTime<Utc>> {
        match self.require(name)? {
            Value::Timestamp(ts) => Ok(*ts),
            Value::Text(s) => parse_timestamp(s),
            other => Err(type_error(name, "a timestamp", other)),
        }
    }
}

fn type_error(name: &str, expected: &str, found: &Value) -> Error {
    Error::decode(format!("column '{name}' is not {expected}: {found:?}"))
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (name, value) in &self.columns {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn decode_boolean_from_integer() {
        let v = Value::decode(ValueRef::Integer(1), ColumnType::Boolean).unwrap();
        assert_eq!(v, Value::Bool(true));
        let v = Value::decode(ValueRef::Integer(0), ColumnType::Boolean).unwrap();
        assert_eq!(v, Value::Bool(false));
    }

    #[test]
    fn decode_current_timestamp_text() {
        let v = Value::decode(ValueRef::Text(b"2024-03-01 12:30:05"), ColumnType::Timestamp)
            .unwrap();
        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 5).unwrap();
        assert_eq!(v, Value::Timestamp(expected));
    }

    #[test]
    fn timestamp_format_roundtrips_micros() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 5).unwrap()
            + chrono::Duration::microseconds(123_456);
        let text = format_timestamp(&ts);
        assert_eq!(text, "2024-03-01 12:30:05.123456");
        assert_eq!(parse_timestamp(&text).unwrap(), ts);
    }

    #[test]
    fn whole_seconds_format_like_current_timestamp() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 5).unwrap();
        assert_eq!(format_timestamp(&ts), "2024-03-01 12:30:05");

        let stored = Value::decode(ValueRef::Text(b"2024-03-01 12:30:05"), ColumnType::Timestamp)
            .unwrap();
        let Value::Timestamp(read_back) = stored else {
            panic!("expected a timestamp");
        };
        assert_eq!(format_timestamp(&read_back), "2024-03-01 12:30:05");
    }

    #[test]
    fn json_array_binds_lists() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 5).unwrap();
        let values = [
            Value::Integer(1),
            Value::Text("mark".into()),
            Value::Bool(true),
            Value::Timestamp(ts),
        ];
        assert_eq!(
            json_array(&values).unwrap(),
            r#"[1,"mark",1,"2024-03-01 12:30:05"]"#
        );
        assert!(json_array(&[Value::Blob(vec![1])]).is_none());
    }

    #[test]
    fn decode_rejects_garbage_timestamp() {
        let err = Value::decode(ValueRef::Text(b"yesterday"), ColumnType::Timestamp).unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[test]
    fn null_passes_through_any_type() {
        for ty in [
            ColumnType::Integer,
            ColumnType::string(10),
            ColumnType::Boolean,
            ColumnType::Timestamp,
        ] {
            assert_eq!(Value::decode(ValueRef::Null, ty).unwrap(), Value::Null);
        }
    }

    #[test]
    fn option_conversion() {
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some("mark")), Value::Text("mark".into()));
        assert_eq!(Value::from(UserId::from(4)), Value::Integer(4));
    }

    #[test]
    fn row_typed_getters() {
        let mut row = Row::new();
        row.push("id", Value::Integer(1));
        row.push("username", Value::Text("mark".into()));
        row.push("is_staff", Value::Integer(0));
        row.push("parent", Value::Null);

        assert_eq!(row.get_i64("id").unwrap(), 1);
        assert_eq!(row.get_string("username").unwrap(), "mark");
        assert!(!row.get_bool("is_staff").unwrap());
        assert_eq!(row.get_opt_i64("parent").unwrap(), None);
        assert!(matches!(row.get_i64("username"), Err(Error::Decode(_))));
        assert!(matches!(row.get_i64("missing"), Err(Error::Decode(_))));
        assert_eq!(row.len(), 4);
    }

    #[test]
    fn row_serializes_as_map() {
        let mut row = Row::new();
        row.push("id", Value::Integer(1));
        row.push("username", Value::Text("admin".into()));
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json, serde_json::json!({"id": 1, "username": "admin"}));
    }
}
