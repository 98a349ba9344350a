use serde_json::Value;
use uuid::Uuid;

use crate::error::{DbError, Result};

/// The atomic column types a HarborDB schema can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Real,
    Boolean,
    String,
    Uuid,
}

impl ColumnType {
    /// Parses a type name as it appears in schema JSON.
    pub fn from_name(name: &str) -> Result<ColumnType> {
        match name {
            "integer" => Ok(ColumnType::Integer),
            "real" => Ok(ColumnType::Real),
            "boolean" => Ok(ColumnType::Boolean),
            "string" => Ok(ColumnType::String),
            "uuid" => Ok(ColumnType::Uuid),
            other => Err(DbError::syntax(format!("unknown column type {other:?}"))),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ColumnType::Integer => "integer",
            ColumnType::Real => "real",
            ColumnType::Boolean => "boolean",
            ColumnType::String => "string",
            ColumnType::Uuid => "uuid",
        }
    }

    /// The default datum for a freshly created row's column of this type.
    pub fn default_datum(self) -> Datum {
        match self {
            ColumnType::Integer => Datum::Integer(0),
            ColumnType::Real => Datum::Real(0.0),
            ColumnType::Boolean => Datum::Boolean(false),
            ColumnType::String => Datum::String(String::new()),
            ColumnType::Uuid => Datum::Uuid(Uuid::nil()),
        }
    }
}

/// A single typed column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Datum {
    Integer(i64),
    Real(f64),
    Boolean(bool),
    String(String),
    Uuid(Uuid),
}

impl Datum {
    /// Parses a JSON value as a datum of the given type.
    ///
    /// Shape mismatches are constraint errors: the value came from a record
    /// that named an existing column, so the failure is in the data, not the
    /// delta syntax.
    pub fn from_json(ty: ColumnType, json: &Value) -> Result<Datum> {
        let mismatch = || {
            DbError::Constraint(format!(
                "expected {} value, got {}",
                ty.name(),
                json_type_name(json)
            ))
        };
        match ty {
            ColumnType::Integer => json.as_i64().map(Datum::Integer).ok_or_else(mismatch),
            ColumnType::Real => json.as_f64().map(Datum::Real).ok_or_else(mismatch),
            ColumnType::Boolean => json.as_bool().map(Datum::Boolean).ok_or_else(mismatch),
            ColumnType::String => json
                .as_str()
                .map(|s| Datum::String(s.to_string()))
                .ok_or_else(mismatch),
            ColumnType::Uuid => {
                let s = json.as_str().ok_or_else(mismatch)?;
                let uuid = Uuid::parse_str(s).map_err(|_| {
                    DbError::Constraint(format!("{s:?} is not a valid UUID"))
                })?;
                Ok(Datum::Uuid(uuid))
            }
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Datum::Integer(n) => Value::from(*n),
            Datum::Real(x) => Value::from(*x),
            Datum::Boolean(b) => Value::from(*b),
            Datum::String(s) => Value::from(s.as_str()),
            Datum::Uuid(u) => Value::from(u.to_string()),
        }
    }

    /// Whether this datum equals its type's default. Default-valued columns
    /// are omitted from inserts in the on-disk delta format.
    pub fn is_default(&self, ty: ColumnType) -> bool {
        *self == ty.default_datum()
    }

    /// Renders the datum the way the inspection tool prints column values.
    pub fn to_display_string(&self) -> String {
        match self {
            Datum::Integer(n) => n.to_string(),
            Datum::Real(x) => x.to_string(),
            Datum::Boolean(b) => b.to_string(),
            Datum::String(s) => s.clone(),
            Datum::Uuid(u) => u.to_string(),
        }
    }
}

fn json_type_name(json: &Value) -> &'static str {
    match json {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
