use std::collections::{BTreeMap, HashMap};

use uuid::Uuid;

use crate::schema::{Schema, TableSchema};
use crate::value::Datum;

/// A single row: its UUID plus one datum per column of the table schema.
///
/// Rows always carry a datum for every column; columns a delta never
/// mentioned hold their type's default.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub uuid: Uuid,
    pub fields: BTreeMap<String, Datum>,
}

impl Row {
    /// Creates a row with the given UUID and default-valued columns.
    pub fn new(schema: &TableSchema, uuid: Uuid) -> Row {
        let fields = schema
            .columns
            .values()
            .map(|c| (c.name.clone(), c.ty.default_datum()))
            .collect();
        Row { uuid, fields }
    }

    pub fn field(&self, column: &str) -> Option<&Datum> {
        self.fields.get(column)
    }
}

/// A table: its schema plus its live rows keyed by UUID.
#[derive(Debug, Clone)]
pub struct Table {
    pub schema: TableSchema,
    pub rows: HashMap<Uuid, Row>,
}

impl Table {
    fn new(schema: TableSchema) -> Table {
        Table {
            schema,
            rows: HashMap::new(),
        }
    }

    pub fn row(&self, uuid: &Uuid) -> Option<&Row> {
        self.rows.get(uuid)
    }
}

/// An in-memory database: a schema and one table per table schema.
#[derive(Debug, Clone)]
pub struct Database {
    pub schema: Schema,
    pub tables: BTreeMap<String, Table>,
}

impl Database {
    /// Creates an empty database from a schema.
    pub fn new(schema: Schema) -> Database {
        let tables = schema
            .tables
            .values()
            .map(|ts| (ts.name.clone(), Table::new(ts.clone())))
            .collect();
        Database { schema, tables }
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }

    pub(crate) fn table_mut(&mut self, name: &str) -> Option<&mut Table> {
        self.tables.get_mut(name)
    }

    /// Total number of live rows across all tables.
    pub fn row_count(&self) -> usize {
        self.tables.values().map(|t| t.rows.len()).sum()
    }
}
