use crate::definition::FieldType;
use crate::error::DyndbError;
use compact_str::CompactString;
use std::collections::BTreeMap;

/// A stored field value. Date carries an ISO-8601 calendar date string,
/// DateTime an epoch-milliseconds instant.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(CompactString),
    Integer(i64),
    Double(f64),
    Boolean(bool),
    Date(CompactString),
    DateTime(i64),
    Json(serde_json::Value),
    Null,
}

/// One record as returned by the storage engine: field name -> value.
pub type Record = BTreeMap<String, Value>;

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Text(_) => "text",
            Value::Integer(_) => "integer",
            Value::Double(_) => "double",
            Value::Boolean(_) => "boolean",
            Value::Date(_) => "date",
            Value::DateTime(_) => "datetime",
            Value::Json(_) => "json",
            Value::Null => "null",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Text(s) => serde_json::Value::String(s.to_string()),
            Value::Integer(v) => serde_json::Value::from(*v),
            Value::Double(v) => serde_json::Number::from_f64(*v)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Boolean(v) => serde_json::Value::Bool(*v),
            Value::Date(s) => serde_json::Value::String(s.to_string()),
            Value::DateTime(v) => serde_json::Value::from(*v),
            Value::Json(v) => v.clone(),
            Value::Null => serde_json::Value::Null,
        }
    }

    /// Decodes a JSON value under a declared field type. Only schema-level
    /// type checks happen here; rule-level validation is a collaborator
    /// concern.
    pub fn from_json(field_type: FieldType, json: &serde_json::Value) -> Result<Self, DyndbError> {
        if json.is_null() {
            return Ok(Value::Null);
        }
        match field_type {
            FieldType::Text => json
                .as_str()
                .map(|s| Value::Text(s.into()))
                .ok_or_else(|| type_mismatch(field_type, json)),
            FieldType::Integer | FieldType::BigInt => json
                .as_i64()
                .map(Value::Integer)
                .ok_or_else(|| type_mismatch(field_type, json)),
            FieldType::Double => json
                .as_f64()
                .map(Value::Double)
                .ok_or_else(|| type_mismatch(field_type, json)),
            FieldType::Boolean => json
                .as_bool()
                .map(Value::Boolean)
                .ok_or_else(|| type_mismatch(field_type, json)),
            FieldType::Date => json
                .as_str()
                .map(|s| Value::Date(s.into()))
                .ok_or_else(|| type_mismatch(field_type, json)),
            FieldType::DateTime => json
                .as_i64()
                .map(Value::DateTime)
                .ok_or_else(|| type_mismatch(field_type, json)),
            FieldType::Json => Ok(Value::Json(json.clone())),
        }
    }

    /// Coerces a raw query-parameter string into a typed value for a filter
    /// predicate. Failure is an invalid query, not a storage fault.
    pub fn coerce_filter(field_type: FieldType, raw: &str) -> Result<Self, DyndbError> {
        match field_type {
            FieldType::Text => Ok(Value::Text(raw.into())),
            FieldType::Integer | FieldType::BigInt => raw
                .parse::<i64>()
                .map(Value::Integer)
                .map_err(|_| coerce_error(field_type, raw)),
            FieldType::Double => raw
                .parse::<f64>()
                .map(Value::Double)
                .map_err(|_| coerce_error(field_type, raw)),
            FieldType::Boolean => match raw {
                "true" | "1" => Ok(Value::Boolean(true)),
                "false" | "0" => Ok(Value::Boolean(false)),
                _ => Err(coerce_error(field_type, raw)),
            },
            FieldType::Date => Ok(Value::Date(raw.into())),
            FieldType::DateTime => raw
                .parse::<i64>()
                .map(Value::DateTime)
                .map_err(|_| coerce_error(field_type, raw)),
            FieldType::Json => Err(DyndbError::invalid_query(
                "structured fields cannot be used in filters",
            )),
        }
    }

    pub fn to_sql(&self) -> rusqlite::types::Value {
        use rusqlite::types::Value as Sql;
        match self {
            Value::Text(s) => Sql::Text(s.to_string()),
            Value::Integer(v) => Sql::Integer(*v),
            Value::Double(v) => Sql::Real(*v),
            Value::Boolean(v) => Sql::Integer(i64::from(*v)),
            Value::Date(s) => Sql::Text(s.to_string()),
            Value::DateTime(v) => Sql::Integer(*v),
            Value::Json(v) => Sql::Text(v.to_string()),
            Value::Null => Sql::Null,
        }
    }

    /// Reads a column back under its declared type. SQLite affinity is
    /// loose, so numeric columns may come back as either integer or real.
    pub fn from_sql(
        field_type: FieldType,
        value: rusqlite::types::ValueRef<'_>,
    ) -> Result<Self, DyndbError> {
        use rusqlite::types::ValueRef;
        if let ValueRef::Null = value {
            return Ok(Value::Null);
        }
        let out = match (field_type, value) {
            (FieldType::Text, ValueRef::Text(bytes)) => {
                Value::Text(String::from_utf8_lossy(bytes).into())
            }
            (FieldType::Integer | FieldType::BigInt, ValueRef::Integer(v)) => Value::Integer(v),
            (FieldType::Double, ValueRef::Real(v)) => Value::Double(v),
            (FieldType::Double, ValueRef::Integer(v)) => Value::Double(v as f64),
            (FieldType::Boolean, ValueRef::Integer(v)) => Value::Boolean(v != 0),
            (FieldType::Date, ValueRef::Text(bytes)) => {
                Value::Date(String::from_utf8_lossy(bytes).into())
            }
            (FieldType::DateTime, ValueRef::Integer(v)) => Value::DateTime(v),
            (FieldType::Json, ValueRef::Text(bytes)) => {
                let parsed = serde_json::from_slice(bytes)
                    .map_err(|e| DyndbError::Decode(e.to_string()))?;
                Value::Json(parsed)
            }
            (ty, other) => {
                return Err(DyndbError::Decode(format!(
                    "column of declared type {} holds incompatible storage class {}",
                    ty.as_str(),
                    sql_class(&other)
                )))
            }
        };
        Ok(out)
    }
}

fn sql_class(value: &rusqlite::types::ValueRef<'_>) -> &'static str {
    use rusqlite::types::ValueRef;
    match value {
        ValueRef::Null => "null",
        ValueRef::Integer(_) => "integer",
        ValueRef::Real(_) => "real",
        ValueRef::Text(_) => "text",
        ValueRef::Blob(_) => "blob",
    }
}

fn type_mismatch(field_type: FieldType, json: &serde_json::Value) -> DyndbError {
    DyndbError::Validation(format!(
        "expected {} value, got {json}",
        field_type.as_str()
    ))
}

fn coerce_error(field_type: FieldType, raw: &str) -> DyndbError {
    DyndbError::invalid_query(format!(
        "filter value '{raw}' is not a valid {}",
        field_type.as_str()
    ))
}

/// Epoch milliseconds, the timestamp unit used throughout.
pub fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
