//! Helpers for testing change scripts against a throwaway SQLite database.

use crate::core::ConnectionProvider;
use crate::error::Error;
use crate::hook::{HookContext, MigrationHook};
use crate::sqlite::SqliteConnectionProvider;
use rusqlite::Connection;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

static NEXT_DATABASE: AtomicUsize = AtomicUsize::new(0);

/// A uniquely named in-memory database that lives as long as this value.
///
/// Every connection from [TestDatabase::provider] sees the same data, so a migrator can be
/// pointed at it while the test inspects the results through this handle.
///
/// # Example
///
/// ```
/// # #[cfg(not(feature = "testing"))]
/// # fn main() {}
/// # #[cfg(feature = "testing")]
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// use scriptlog::testing::TestDatabase;
/// use scriptlog::{Change, MemorySource, Migrator};
///
/// let db = TestDatabase::new()?;
/// let source = MemorySource::new().with_change(
///     Change::new(1, "create users"),
///     "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT);",
/// );
///
/// Migrator::sqlite(db.provider(), source).up(None, &mut std::io::sink())?;
///
/// db.assert_table_exists("users")?;
/// let count: i64 = db.query_one("SELECT COUNT(*) FROM CHANGELOG")?;
/// assert_eq!(count, 1);
/// # Ok(())
/// # }
/// ```
pub struct TestDatabase {
    provider: SqliteConnectionProvider,
    conn: Connection,
}

impl TestDatabase {
    /// A fresh in-memory database with a unique name.
    pub fn new() -> Result<Self, Error> {
        let name = format!(
            "scriptlog_test_{}_{}",
            std::process::id(),
            NEXT_DATABASE.fetch_add(1, Ordering::SeqCst)
        );
        let provider = SqliteConnectionProvider::shared_memory(name);
        let conn = provider.connection()?;
        Ok(Self { provider, conn })
    }

    /// A provider of further connections to this database.
    pub fn provider(&self) -> SqliteConnectionProvider {
        self.provider.clone()
    }

    /// The connection that keeps the database alive.
    pub fn connection(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Execute SQL (for setting up test data).
    pub fn execute(&self, sql: &str) -> Result<(), Error> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    /// Query a single value from the database.
    pub fn query_one<T>(&self, sql: &str) -> Result<T, Error>
    where
        T: rusqlite::types::FromSql,
    {
        let result = self.conn.query_row(sql, [], |row| row.get(0))?;
        Ok(result)
    }

    /// Whether `table_name` exists, ignoring case.
    pub fn table_exists(&self, table_name: &str) -> Result<bool, Error> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1 COLLATE NOCASE",
            [table_name],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Assert that a table exists in the database.
    pub fn assert_table_exists(&self, table_name: &str) -> Result<(), Error> {
        if !self.table_exists(table_name)? {
            return Err(Error::Rusqlite(rusqlite::Error::InvalidParameterName(
                format!("Table '{}' does not exist", table_name),
            )));
        }
        Ok(())
    }

    /// Assert that a table does not exist in the database.
    pub fn assert_table_not_exists(&self, table_name: &str) -> Result<(), Error> {
        if self.table_exists(table_name)? {
            return Err(Error::Rusqlite(rusqlite::Error::InvalidParameterName(
                format!("Table '{}' exists but should not", table_name),
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for TestDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestDatabase")
            .field("provider", &self.provider)
            .finish_non_exhaustive()
    }
}

/// A hook that remembers every call it receives, e.g. `"before_each 3"`.
///
/// Clones share the same record.
#[derive(Debug, Clone, Default)]
pub struct RecordingHook {
    events: Arc<Mutex<Vec<String>>>,
}

impl RecordingHook {
    /// A hook with nothing recorded.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call received so far, oldest first.
    pub fn events(&self) -> Vec<String> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn push<C>(&self, point: &str, context: &HookContext<'_, C>) {
        let entry = match context.change() {
            Some(change) => format!("{} {}", point, change.id),
            None => point.to_string(),
        };
        match self.events.lock() {
            Ok(mut events) => events.push(entry),
            Err(poisoned) => poisoned.into_inner().push(entry),
        }
    }
}

impl<C> MigrationHook<C> for RecordingHook {
    fn before(&self, context: HookContext<'_, C>) -> Result<(), Error> {
        self.push("before", &context);
        Ok(())
    }

    fn before_each(&self, context: HookContext<'_, C>) -> Result<(), Error> {
        self.push("before_each", &context);
        Ok(())
    }

    fn after_each(&self, context: HookContext<'_, C>) -> Result<(), Error> {
        self.push("after_each", &context);
        Ok(())
    }

    fn after(&self, context: HookContext<'_, C>) -> Result<(), Error> {
        self.push("after", &context);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn databases_are_isolated() {
        let a = TestDatabase::new().unwrap();
        let b = TestDatabase::new().unwrap();
        a.execute("CREATE TABLE only_in_a (id INTEGER)").unwrap();

        a.assert_table_exists("only_in_a").unwrap();
        b.assert_table_not_exists("only_in_a").unwrap();
    }

    #[test]
    fn provider_connections_share_data() {
        let db = TestDatabase::new().unwrap();
        db.execute("CREATE TABLE users (name TEXT); INSERT INTO users VALUES ('alice');")
            .unwrap();

        let provider = db.provider();
        let other = provider.connection().unwrap();
        let name: String = other
            .query_row("SELECT name FROM users", [], |row| row.get(0))
            .unwrap();
        assert_eq!(name, "alice");
        provider.release(other).unwrap();
    }

    #[test]
    fn table_assertions_report_failures() {
        let db = TestDatabase::new().unwrap();
        let err = db.assert_table_exists("ghost").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid parameter name: Table 'ghost' does not exist"
        );
    }
}
