use std::io;

use thiserror::Error;

/// Errors that can occur anywhere in the HarborDB core.
///
/// Every fallible operation in `model`, `journal`, and `storage` returns this
/// one type. A local message can be composed with a wrapped cause via
/// [`DbError::wrap`], mirroring how errors accumulate context as they
/// propagate out of the file layer.
#[derive(Debug, Error)]
pub enum DbError {
    /// An I/O failure: open, read, write, rename, fsync, or an integrity
    /// violation in the on-disk log (truncation, checksum or magic mismatch).
    #[error("{msg}")]
    Io {
        msg: String,
        #[source]
        source: Option<io::Error>,
    },

    /// JSON that violates the schema or delta shape.
    #[error("syntax error: {0}")]
    Syntax(String),

    /// A table name absent from the schema.
    #[error("no table named {0}")]
    UnknownTable(String),

    /// A column name absent from its table's schema.
    #[error("no column {column} in table {table}")]
    UnknownColumn { table: String, column: String },

    /// A value that does not satisfy its column's type.
    #[error("constraint violation: {0}")]
    Constraint(String),

    /// A context message wrapped around an inner error.
    #[error("{msg}")]
    Wrapped {
        msg: String,
        #[source]
        inner: Box<DbError>,
    },
}

impl DbError {
    /// Creates an I/O error with a message only (integrity failures that have
    /// no underlying `io::Error`).
    pub fn io(msg: impl Into<String>) -> Self {
        DbError::Io {
            msg: msg.into(),
            source: None,
        }
    }

    /// Creates an I/O error carrying the underlying OS error.
    pub fn io_with(msg: impl Into<String>, source: io::Error) -> Self {
        DbError::Io {
            msg: msg.into(),
            source: Some(source),
        }
    }

    /// Creates a syntax error.
    pub fn syntax(msg: impl Into<String>) -> Self {
        DbError::Syntax(msg.into())
    }

    /// Wraps this error with an additional context message.
    pub fn wrap(self, msg: impl Into<String>) -> Self {
        DbError::Wrapped {
            msg: msg.into(),
            inner: Box::new(self),
        }
    }

    /// Renders this error and its whole cause chain as one string, outermost
    /// message first. This is what the CLI prints to stderr.
    pub fn display_chain(&self) -> String {
        use std::error::Error;

        let mut s = self.to_string();
        let mut cause = self.source();
        while let Some(err) = cause {
            s.push_str(" (");
            s.push_str(&err.to_string());
            s.push(')');
            cause = err.source();
        }
        s
    }
}

impl From<io::Error> for DbError {
    fn from(err: io::Error) -> Self {
        DbError::Io {
            msg: "I/O error".to_string(),
            source: Some(err),
        }
    }
}

/// Result type alias using `DbError`.
pub type Result<T> = std::result::Result<T, DbError>;
