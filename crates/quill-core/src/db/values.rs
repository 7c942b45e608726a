//! Conversions between libSQL values and model fields

use chrono::{DateTime, Utc};
use libsql::{Row, Value};

use crate::error::{Error, Result};
use crate::util::from_micros;

pub fn text_or_null(value: Option<&str>) -> Value {
    value.map_or(Value::Null, |text| Value::Text(text.to_string()))
}

pub fn optional_text(row: &Row, idx: i32) -> Result<Option<String>> {
    match row.get_value(idx)? {
        Value::Null => Ok(None),
        Value::Text(text) => Ok(Some(text)),
        other => Err(unexpected(idx, &other)),
    }
}

pub fn optional_integer(row: &Row, idx: i32) -> Result<Option<i64>> {
    match row.get_value(idx)? {
        Value::Null => Ok(None),
        Value::Integer(value) => Ok(Some(value)),
        other => Err(unexpected(idx, &other)),
    }
}

pub fn timestamp(row: &Row, idx: i32) -> Result<DateTime<Utc>> {
    from_micros(row.get::<i64>(idx)?)
}

pub fn flag(row: &Row, idx: i32) -> Result<bool> {
    Ok(row.get::<i64>(idx)? != 0)
}

fn unexpected(idx: i32, value: &Value) -> Error {
    Error::Database(format!("Unexpected value in column {idx}: {value:?}"))
}
