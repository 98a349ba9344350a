use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::error::{DbError, Result};
use crate::value::ColumnType;

/// One column of a table schema.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub ty: ColumnType,
    /// Persistent columns are written to disk; ephemeral ones are not.
    pub persistent: bool,
}

/// The schema of a single table: its name and ordered column map.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSchema {
    pub name: String,
    pub columns: BTreeMap<String, Column>,
}

impl TableSchema {
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.get(name)
    }

    fn from_json(name: &str, json: &Value) -> Result<TableSchema> {
        let obj = as_object(json, "table schema")?;
        let columns_json = obj
            .get("columns")
            .ok_or_else(|| DbError::syntax(format!("table {name} has no columns member")))?;
        let columns_obj = as_object(columns_json, "columns")?;

        let mut columns = BTreeMap::new();
        for (column_name, column_json) in columns_obj {
            if column_name.starts_with('_') {
                return Err(DbError::syntax(format!(
                    "column name {column_name:?} is reserved"
                )));
            }
            let col = as_object(column_json, "column schema")?;
            let ty_name = col
                .get("type")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    DbError::syntax(format!("column {column_name} has no type member"))
                })?;
            let ephemeral = col.get("ephemeral").and_then(Value::as_bool).unwrap_or(false);
            columns.insert(
                column_name.clone(),
                Column {
                    name: column_name.clone(),
                    ty: ColumnType::from_name(ty_name)?,
                    persistent: !ephemeral,
                },
            );
        }

        Ok(TableSchema {
            name: name.to_string(),
            columns,
        })
    }

    fn to_json(&self) -> Value {
        let mut columns = Map::new();
        for column in self.columns.values() {
            let mut col = Map::new();
            col.insert("type".to_string(), Value::from(column.ty.name()));
            if !column.persistent {
                col.insert("ephemeral".to_string(), Value::from(true));
            }
            columns.insert(column.name.clone(), Value::Object(col));
        }
        let mut obj = Map::new();
        obj.insert("columns".to_string(), Value::Object(columns));
        Value::Object(obj)
    }
}

/// A whole database schema: the mandatory first record of every standalone
/// log.
///
/// `version` and `cksum` are properties of the schema as authored; they are
/// carried through verbatim and never recomputed from the file.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    pub name: String,
    pub version: String,
    pub cksum: String,
    pub tables: BTreeMap<String, TableSchema>,
}

impl Schema {
    /// Parses a schema from its JSON representation.
    ///
    /// Table and column names starting with `_` are rejected; the underscore
    /// namespace belongs to the reserved delta keys (`_date`, `_comment`).
    pub fn from_json(json: &Value) -> Result<Schema> {
        let obj = as_object(json, "schema")?;
        let name = obj
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| DbError::syntax("schema has no name member"))?;
        let version = obj
            .get("version")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let cksum = obj.get("cksum").and_then(Value::as_str).unwrap_or_default();
        let tables_json = obj
            .get("tables")
            .ok_or_else(|| DbError::syntax("schema has no tables member"))?;
        let tables_obj = as_object(tables_json, "tables")?;

        let mut tables = BTreeMap::new();
        for (table_name, table_json) in tables_obj {
            if table_name.starts_with('_') {
                return Err(DbError::syntax(format!(
                    "table name {table_name:?} is reserved"
                )));
            }
            tables.insert(
                table_name.clone(),
                TableSchema::from_json(table_name, table_json)?,
            );
        }

        Ok(Schema {
            name: name.to_string(),
            version: version.to_string(),
            cksum: cksum.to_string(),
            tables,
        })
    }

    pub fn to_json(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("name".to_string(), Value::from(self.name.as_str()));
        if !self.version.is_empty() {
            obj.insert("version".to_string(), Value::from(self.version.as_str()));
        }
        if !self.cksum.is_empty() {
            obj.insert("cksum".to_string(), Value::from(self.cksum.as_str()));
        }
        let mut tables = Map::new();
        for table in self.tables.values() {
            tables.insert(table.name.clone(), table.to_json());
        }
        obj.insert("tables".to_string(), Value::Object(tables));
        Value::Object(obj)
    }

    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.get(name)
    }
}

fn as_object<'a>(json: &'a Value, what: &str) -> Result<&'a Map<String, Value>> {
    json.as_object()
        .ok_or_else(|| DbError::syntax(format!("{what} must be a JSON object")))
}
