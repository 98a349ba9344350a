//! # harbor-tool - HarborDB database management utility
//!
//! A thin command-line frontend over the `storage` and `journal` crates:
//! create a database from a schema, compact or convert it, report schema
//! metadata, run minimal queries and transactions, and render the log for
//! inspection.
//!
//! ## Commands
//!
//! ```text
//! create [DB [SCHEMA]]            create DB with the given SCHEMA
//! compact [DB [DST]]              compact DB in place (or write a copy to DST)
//! convert [DB [SCHEMA [DST]]]     convert DB to SCHEMA (in place or to DST)
//! needs-conversion [DB [SCHEMA]]  print yes/no
//! db-name|db-version|db-cksum [DB]
//! schema-name|schema-version|schema-cksum [SCHEMA]
//! query [DB] TXN                  read-only: print a table's rows
//! transact [DB] TXN               apply a transaction delta, durably
//! show-log [DB]                   print DB's log entries (-m, -mm for more)
//! ```
//!
//! ## Configuration
//!
//! Default paths come from environment variables:
//!
//! ```text
//! HARBOR_DB       default database path  (default: "harbor.db")
//! HARBOR_SCHEMA   default schema path    (default: "harbor.schema")
//! ```
//!
//! Exit status is 0 on success, 1 on any error (the outermost error message
//! goes to standard error).

mod showlog;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use journal::{Journal, Locking, OpenMode, CLUSTER_MAGIC, DB_MAGIC};
use model::Schema;
use serde_json::Value;
use storage::{delta, read_schema, save_copy, DbFile};

#[derive(Parser)]
#[command(
    name = "harbor-tool",
    about = "HarborDB database management utility",
    version
)]
struct Opts {
    /// Increase show-log verbosity (repeat for more detail).
    #[arg(short = 'm', long = "more", action = ArgAction::Count, global = true)]
    more: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create DB with the given SCHEMA
    Create {
        db: Option<PathBuf>,
        schema: Option<PathBuf>,
    },
    /// Compact DB in place, or write a compacted copy to DST
    Compact {
        db: Option<PathBuf>,
        dst: Option<PathBuf>,
    },
    /// Convert DB to SCHEMA, in place or to DST
    Convert {
        db: Option<PathBuf>,
        schema: Option<PathBuf>,
        dst: Option<PathBuf>,
    },
    /// Report whether DB needs conversion to SCHEMA
    NeedsConversion {
        db: Option<PathBuf>,
        schema: Option<PathBuf>,
    },
    /// Report the name of the schema used by DB
    DbName { db: Option<PathBuf> },
    /// Report the version of the schema used by DB
    DbVersion { db: Option<PathBuf> },
    /// Report the checksum of the schema used by DB
    DbCksum { db: Option<PathBuf> },
    /// Report SCHEMA's name
    SchemaName { schema: Option<PathBuf> },
    /// Report SCHEMA's version
    SchemaVersion { schema: Option<PathBuf> },
    /// Report SCHEMA's checksum
    SchemaCksum { schema: Option<PathBuf> },
    /// Execute a read-only query: `query [DB] '{"table": NAME}'`
    Query {
        #[arg(num_args = 1..=2)]
        args: Vec<String>,
    },
    /// Apply a transaction delta: `transact [DB] '{"TABLE": {...}}'`
    Transact {
        #[arg(num_args = 1..=2)]
        args: Vec<String>,
    },
    /// Print DB's log entries
    ShowLog { db: Option<PathBuf> },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let opts = Opts::parse();
    if let Err(err) = run(opts) {
        eprintln!("harbor-tool: {err:#}");
        std::process::exit(1);
    }
}

fn run(opts: Opts) -> Result<()> {
    match opts.command {
        Command::Create { db, schema } => do_create(&db_or_default(db), &schema_or_default(schema)),
        Command::Compact { db, dst } => compact_or_convert(
            &db_or_default(db),
            dst.as_deref(),
            None,
            concat!("compacted by harbor-tool ", env!("CARGO_PKG_VERSION")),
        ),
        Command::Convert { db, schema, dst } => {
            let new_schema = read_schema_file(&schema_or_default(schema))?;
            compact_or_convert(
                &db_or_default(db),
                dst.as_deref(),
                Some(new_schema),
                concat!("converted by harbor-tool ", env!("CARGO_PKG_VERSION")),
            )
        }
        Command::NeedsConversion { db, schema } => {
            let on_disk = read_schema(db_or_default(db))?;
            let target = read_schema_file(&schema_or_default(schema))?;
            println!("{}", if on_disk == target { "no" } else { "yes" });
            Ok(())
        }
        Command::DbName { db } => {
            println!("{}", read_schema(db_or_default(db))?.name);
            Ok(())
        }
        Command::DbVersion { db } => {
            println!("{}", read_schema(db_or_default(db))?.version);
            Ok(())
        }
        Command::DbCksum { db } => {
            println!("{}", read_schema(db_or_default(db))?.cksum);
            Ok(())
        }
        Command::SchemaName { schema } => {
            println!("{}", read_schema_file(&schema_or_default(schema))?.name);
            Ok(())
        }
        Command::SchemaVersion { schema } => {
            println!("{}", read_schema_file(&schema_or_default(schema))?.version);
            Ok(())
        }
        Command::SchemaCksum { schema } => {
            println!("{}", read_schema_file(&schema_or_default(schema))?.cksum);
            Ok(())
        }
        Command::Query { args } => {
            let (db, txn) = split_db_and_txn(args);
            do_query(&db, &txn)
        }
        Command::Transact { args } => {
            let (db, txn) = split_db_and_txn(args);
            do_transact(&db, &txn)
        }
        Command::ShowLog { db } => do_show_log(&db_or_default(db), opts.more),
    }
}

/// Reads a configuration path from the environment, falling back to
/// `default`.
fn env_or(key: &str, default: &str) -> PathBuf {
    std::env::var_os(key)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(default))
}

fn db_or_default(db: Option<PathBuf>) -> PathBuf {
    db.unwrap_or_else(|| env_or("HARBOR_DB", "harbor.db"))
}

fn schema_or_default(schema: Option<PathBuf>) -> PathBuf {
    schema.unwrap_or_else(|| env_or("HARBOR_SCHEMA", "harbor.schema"))
}

/// `query` and `transact` take `[DB] TXN`: with one argument it is the
/// transaction and the database comes from the environment.
fn split_db_and_txn(mut args: Vec<String>) -> (PathBuf, String) {
    let txn = args.pop().expect("clap enforces at least one argument");
    let db = args.pop().map(PathBuf::from);
    (db_or_default(db), txn)
}

fn read_schema_file(path: &Path) -> Result<Schema> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read schema file {}", path.display()))?;
    let json: Value = serde_json::from_str(&text)
        .with_context(|| format!("{} is not valid JSON", path.display()))?;
    Ok(Schema::from_json(&json)?)
}

fn do_create(db_path: &Path, schema_path: &Path) -> Result<()> {
    let schema = read_schema_file(schema_path)?;

    let mut log = Journal::open(db_path, &[DB_MAGIC], OpenMode::CreateExcl, Locking::Auto)?;
    log.write(&schema.to_json())?;
    log.commit()?;
    Ok(())
}

/// In-place compaction and conversion share one shape: open the source
/// (read-only, converting when a new schema is given), then either swap a
/// compacted log in atomically or save a snapshot copy to `dst`.
fn compact_or_convert(
    src: &Path,
    dst: Option<&Path>,
    new_schema: Option<Schema>,
    comment: &str,
) -> Result<()> {
    let locking = if dst.is_none() { Locking::Yes } else { Locking::No };
    let (db, mut file) = DbFile::open(src, new_schema.as_ref(), true, locking)?;

    match dst {
        None => file.compact(&db)?,
        Some(dst) => save_copy(dst, Some(comment), &db)?,
    }
    Ok(())
}

fn do_query(db_path: &Path, txn: &str) -> Result<()> {
    let (db, _file) = DbFile::open(db_path, None, true, Locking::No)?;

    let request: Value =
        serde_json::from_str(txn).with_context(|| format!("{txn:?} is not valid JSON"))?;
    let Some(table_name) = request.get("table").and_then(Value::as_str) else {
        bail!("query must be of the form {{\"table\": NAME}}");
    };
    let Some(table) = db.table(table_name) else {
        bail!("no table named {table_name}");
    };

    let mut rows = serde_json::Map::new();
    for row in table.rows.values() {
        let mut fields = serde_json::Map::new();
        for (column, datum) in &row.fields {
            fields.insert(column.clone(), datum.to_json());
        }
        rows.insert(row.uuid.to_string(), Value::Object(fields));
    }
    println!("{}", Value::Object(rows));
    Ok(())
}

fn do_transact(db_path: &Path, txn: &str) -> Result<()> {
    let (mut db, mut file) = DbFile::open(db_path, None, false, Locking::Yes)?;

    let request: Value =
        serde_json::from_str(txn).with_context(|| format!("{txn:?} is not valid JSON"))?;
    let txn = delta::decode(&db, &request, false)?;
    file.commit(&mut db, txn, true)?;
    Ok(())
}

fn do_show_log(db_path: &Path, verbosity: u8) -> Result<()> {
    let mut log = Journal::open(
        db_path,
        &[DB_MAGIC, CLUSTER_MAGIC],
        OpenMode::ReadOnly,
        Locking::No,
    )?;
    if log.magic() == DB_MAGIC {
        showlog::show_standalone(&mut log, verbosity)
    } else {
        showlog::show_cluster(&mut log)
    }
}
