//! SQLite implementations of the engine's collaborators.
//!
//! # Example
//!
//! ```
//! use scriptlog::{ChangelogStore, ConnectionProvider, DirectorySource, Migrator};
//! use scriptlog::sqlite::{SqliteChangelog, SqliteConnectionProvider};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let scripts = tempfile::tempdir()?;
//! std::fs::write(
//!     scripts.path().join("1_create_users.sql"),
//!     "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT);\n-- //@UNDO\nDROP TABLE users;\n",
//! )?;
//!
//! let db = tempfile::tempdir()?;
//! let provider = SqliteConnectionProvider::new(db.path().join("app.db"));
//! SqliteChangelog::new().create(&mut provider.connection()?)?;
//!
//! let migrator = Migrator::sqlite(provider, DirectorySource::new(scripts.path()));
//! let applied = migrator.pending(&mut std::io::stdout())?;
//! assert_eq!(applied.len(), 1);
//! # Ok(())
//! # }
//! ```

use crate::core::{Change, ChangelogStore, ConnectionProvider, MigrationSource, ScriptExecutor, Transactional};
use crate::error::Error;
use crate::migrator::Migrator;
use crate::script::{split_statements, Delimiter};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags};
use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;

/// Default name of the changelog table.
pub const CHANGELOG_TABLE_NAME: &str = "CHANGELOG";

/// A [Migrator] driving SQLite connections.
pub type SqliteMigrator = Migrator<Connection>;

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
enum Location {
    Path(PathBuf),
    /// A named in-memory database shared by every connection in the process.
    SharedMemory(String),
}

/// Opens a new connection to one SQLite database on every call.
#[derive(Debug, Clone)]
pub struct SqliteConnectionProvider {
    location: Location,
    busy_timeout: Duration,
}

impl SqliteConnectionProvider {
    /// A database file at `path`, created if missing.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            location: Location::Path(path.into()),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }

    /// A named in-memory database. It lives for as long as at least one connection to it is
    /// open, so callers usually keep one connection around for the database's lifetime.
    pub fn shared_memory(name: impl Into<String>) -> Self {
        Self {
            location: Location::SharedMemory(name.into()),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }

    /// How long a connection waits on a locked database before failing.
    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }
}

impl ConnectionProvider for SqliteConnectionProvider {
    type Connection = Connection;

    fn connection(&self) -> Result<Connection, Error> {
        let conn = match &self.location {
            Location::Path(path) => Connection::open(path)?,
            Location::SharedMemory(name) => Connection::open_with_flags(
                format!("file:{}?mode=memory&cache=shared", name),
                OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_CREATE
                    | OpenFlags::SQLITE_OPEN_URI,
            )?,
        };
        conn.busy_timeout(self.busy_timeout)?;
        Ok(conn)
    }

    fn release(&self, conn: Connection) -> Result<(), Error> {
        conn.close().map_err(|(_, e)| e.into())
    }
}

impl Transactional for Connection {
    fn begin(&mut self) -> Result<(), Error> {
        self.execute_batch("BEGIN")?;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), Error> {
        self.execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), Error> {
        self.execute_batch("ROLLBACK")?;
        Ok(())
    }
}

/// The changelog as a table of `(ID, APPLIED_AT, DESCRIPTION)` rows.
///
/// `APPLIED_AT` holds an RFC 3339 timestamp.
#[derive(Debug, Clone)]
pub struct SqliteChangelog {
    table_name: String,
}

impl SqliteChangelog {
    /// A changelog in [CHANGELOG_TABLE_NAME].
    pub fn new() -> Self {
        Self {
            table_name: CHANGELOG_TABLE_NAME.to_string(),
        }
    }

    /// Use `table_name` instead of [CHANGELOG_TABLE_NAME].
    pub fn with_table_name(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = table_name.into();
        self
    }

    /// The table this changelog reads and writes.
    pub fn table_name(&self) -> &str {
        &self.table_name
    }
}

impl Default for SqliteChangelog {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangelogStore<Connection> for SqliteChangelog {
    fn exists(&self, conn: &mut Connection) -> Result<bool, Error> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1 COLLATE NOCASE",
            [&self.table_name],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn read_all(&self, conn: &mut Connection) -> Result<Vec<Change>, Error> {
        let mut stmt = conn.prepare(&format!(
            "SELECT ID, APPLIED_AT, DESCRIPTION FROM {} ORDER BY ID",
            self.table_name
        ))?;

        let changes = stmt
            .query_map([], |row| {
                let id: i64 = row.get(0)?;
                let id = u64::try_from(id).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(
                        0,
                        rusqlite::types::Type::Integer,
                        Box::new(e),
                    )
                })?;
                let applied_at: Option<String> = row.get(1)?;
                let description: Option<String> = row.get(2)?;

                let mut change = Change::new(id, description.unwrap_or_default());
                if let Some(applied_at) = applied_at {
                    let applied_at = DateTime::parse_from_rfc3339(&applied_at)
                        .map_err(|e| {
                            rusqlite::Error::FromSqlConversionFailure(
                                1,
                                rusqlite::types::Type::Text,
                                Box::new(e),
                            )
                        })?
                        .with_timezone(&Utc);
                    change = change.with_applied_at(applied_at);
                }
                Ok(change)
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(changes)
    }

    fn record(
        &self,
        conn: &mut Connection,
        change: &Change,
        applied_at: DateTime<Utc>,
    ) -> Result<(), Error> {
        let id = i64::try_from(change.id).map_err(|_| {
            Error::Generic(format!(
                "Change id {} does not fit in an SQLite integer",
                change.id
            ))
        })?;
        conn.execute(
            &format!(
                "INSERT INTO {} (ID, APPLIED_AT, DESCRIPTION) VALUES (?1, ?2, ?3)",
                self.table_name
            ),
            params![id, applied_at.to_rfc3339(), change.description],
        )?;
        Ok(())
    }

    fn create(&self, conn: &mut Connection) -> Result<(), Error> {
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                ID INTEGER PRIMARY KEY,
                APPLIED_AT TEXT,
                DESCRIPTION TEXT
            )",
            self.table_name
        ))?;
        Ok(())
    }
}

/// Splits a script into statements and executes them one at a time.
#[derive(Debug, Clone, Default)]
pub struct SqliteScriptRunner {
    delimiter: Delimiter,
}

impl SqliteScriptRunner {
    /// A runner splitting scripts on `;` at the end of a line.
    pub fn new() -> Self {
        Self::default()
    }

    /// The token that ends a statement. Defaults to `;`.
    pub fn with_delimiter(mut self, token: impl Into<String>) -> Self {
        self.delimiter.token = token.into();
        self
    }

    /// Only end a statement at a line holding nothing but the delimiter.
    pub fn with_full_line_delimiter(mut self, full_line: bool) -> Self {
        self.delimiter.full_line = full_line;
        self
    }
}

impl ScriptExecutor<Connection> for SqliteScriptRunner {
    fn run_script(&self, conn: &mut Connection, script: &mut dyn Read) -> Result<(), Error> {
        let mut text = String::new();
        script.read_to_string(&mut text)?;

        for statement in split_statements(&text, &self.delimiter)? {
            #[cfg(feature = "tracing")]
            tracing::debug!(statement = %statement, "Executing statement");

            if let Err(e) = conn.execute_batch(&statement) {
                return Err(Error::Statement {
                    statement,
                    source: Box::new(Error::from(e)),
                });
            }
        }
        Ok(())
    }
}

impl Migrator<Connection> {
    /// A migrator for one SQLite database, with the changelog in [CHANGELOG_TABLE_NAME]
    /// on that same database.
    pub fn sqlite(
        connection_provider: SqliteConnectionProvider,
        source: impl MigrationSource + 'static,
    ) -> Self {
        Self::new(
            connection_provider,
            source,
            SqliteChangelog::new(),
            SqliteScriptRunner::new(),
        )
    }
}
