//! SQLite status table
//!
//! One connection, opened once and reused by the driver loop. Each assembled
//! row becomes one INSERT in autocommit mode.
//!
//! # Schema
//!
//! ```sql
//! CREATE TABLE rob (
//!     id INTEGER PRIMARY KEY AUTOINCREMENT,
//!     motor_load_1 NUMERIC, motor_load_2 NUMERIC,
//!     battery_V NUMERIC,
//!     pitch_deg NUMERIC, heading_deg NUMERIC, roll_deg NUMERIC,
//!     distance_cm_1 NUMERIC, distance_cm_2 NUMERIC, distance_cm_3 NUMERIC,
//!     state TEXT,
//!     timestamp_s NUMERIC
//! );
//! ```
//!
//! The table normally exists already; [`StatusStore::create_table_if_missing`]
//! is only run when the configuration asks for it.

use crate::expand::Cell;
use crate::row::StatusRow;
use crate::topics::SCHEMA;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, Value, ValueRef};
use rusqlite::{params_from_iter, Connection, ToSql};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to open database {path:?}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },
    #[error("invalid table name `{0}`")]
    InvalidTable(String),
    #[error("insert into `{table}` failed: {source}")]
    Insert {
        table: String,
        #[source]
        source: rusqlite::Error,
    },
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

pub struct StatusStore {
    conn: Connection,
    table: String,
    insert_sql: String,
}

impl StatusStore {
    /// Open (or create) the database file
    pub fn open(path: impl AsRef<Path>, table: &str) -> Result<Self, StoreError> {
        let path = path.as_ref();
        validate_table_name(table)?;
        let conn = Connection::open(path).map_err(|source| StoreError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::with_connection(conn, table))
    }

    /// In-memory database (for testing)
    pub fn open_in_memory(table: &str) -> Result<Self, StoreError> {
        validate_table_name(table)?;
        let conn = Connection::open_in_memory().map_err(|source| StoreError::Open {
            path: PathBuf::from(":memory:"),
            source,
        })?;
        Ok(Self::with_connection(conn, table))
    }

    fn with_connection(conn: Connection, table: &str) -> Self {
        let placeholders: Vec<String> = (1..=SCHEMA.len()).map(|i| format!("?{i}")).collect();
        let insert_sql = format!(
            "INSERT INTO {table}({}) VALUES({})",
            SCHEMA.join(","),
            placeholders.join(",")
        );
        Self {
            conn,
            table: table.to_string(),
            insert_sql,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn create_table_if_missing(&self) -> Result<(), StoreError> {
        let columns: Vec<String> = SCHEMA
            .iter()
            .map(|c| {
                let affinity = if *c == "state" { "TEXT" } else { "NUMERIC" };
                format!("{c} {affinity}")
            })
            .collect();
        self.conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} (id INTEGER PRIMARY KEY AUTOINCREMENT, {})",
                self.table,
                columns.join(", ")
            ),
            [],
        )?;
        Ok(())
    }

    /// Insert one status record
    pub fn append(&self, row: &StatusRow) -> Result<(), StoreError> {
        let insert = |conn: &Connection| -> rusqlite::Result<usize> {
            conn.prepare_cached(&self.insert_sql)?
                .execute(params_from_iter(row.cells()))
        };
        insert(&self.conn).map_err(|source| StoreError::Insert {
            table: self.table.clone(),
            source,
        })?;
        Ok(())
    }

    pub fn count(&self) -> Result<u64, StoreError> {
        let n: i64 = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", self.table), [], |r| r.get(0))?;
        Ok(n as u64)
    }

    /// Most recently inserted record, schema columns only
    pub fn last_row(&self) -> Result<Option<Vec<Cell>>, StoreError> {
        let sql = format!(
            "SELECT {} FROM {} ORDER BY rowid DESC LIMIT 1",
            SCHEMA.join(","),
            self.table
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([])?;
        match rows.next()? {
            Some(r) => {
                let cells = (0..SCHEMA.len())
                    .map(|i| r.get::<_, Cell>(i))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Some(cells))
            }
            None => Ok(None),
        }
    }
}

/// Table names are interpolated into SQL, so only plain identifiers are allowed
pub fn validate_table_name(table: &str) -> Result<(), StoreError> {
    let mut chars = table.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidTable(table.to_string()))
    }
}

impl ToSql for Cell {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Cell::Null => ToSqlOutput::Owned(Value::Null),
            Cell::Integer(i) => ToSqlOutput::Owned(Value::Integer(*i)),
            Cell::Real(f) => ToSqlOutput::Owned(Value::Real(*f)),
            Cell::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
        })
    }
}

impl FromSql for Cell {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value {
            ValueRef::Null => Ok(Cell::Null),
            ValueRef::Integer(i) => Ok(Cell::Integer(i)),
            ValueRef::Real(f) => Ok(Cell::Real(f)),
            ValueRef::Text(bytes) => std::str::from_utf8(bytes)
                .map(|s| Cell::Text(s.to_string()))
                .map_err(|e| FromSqlError::Other(Box::new(e))),
            ValueRef::Blob(_) => Err(FromSqlError::InvalidType),
        }
    }
}
