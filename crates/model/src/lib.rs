//! # Model - HarborDB schema, data, and transaction engine
//!
//! The in-memory half of HarborDB: typed column values, schemas parsed from
//! JSON, tables of UUID-keyed rows, and a transaction buffer that validates
//! and applies change sets.
//!
//! This crate knows nothing about files. The `journal` and `storage` crates
//! build the on-disk representation on top of it; they consume transactions
//! through [`Transaction::changes`] and feed replayed deltas back in through
//! the same `Transaction` API.

mod db;
mod error;
mod schema;
mod txn;
mod value;

pub use db::{Database, Row, Table};
pub use error::{DbError, Result};
pub use schema::{Column, Schema, TableSchema};
pub use txn::{Change, Transaction};
pub use value::{ColumnType, Datum};
