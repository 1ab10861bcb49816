use crate::error::Error;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::hash::{Hash, Hasher};
use std::io::Read;

/// One change script: its ordering id plus descriptive metadata.
///
/// Two changes are equal if and only if their ids are equal, and changes order by id.
/// The description and filename are labels only, so renaming a change after it has been
/// applied does not make it pending again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Change {
    pub id: u64,
    pub description: String,
    /// Where the script came from. Display only.
    pub filename: Option<String>,
    /// Set on changes read back from a changelog.
    pub applied_at: Option<DateTime<Utc>>,
}

impl Change {
    /// A change with no file name and no application time.
    pub fn new(id: u64, description: impl Into<String>) -> Self {
        Self {
            id,
            description: description.into(),
            filename: None,
            applied_at: None,
        }
    }

    /// The script's file name, used in notices instead of the synthesized one.
    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    /// When the change was recorded in the changelog.
    pub fn with_applied_at(mut self, applied_at: DateTime<Utc>) -> Self {
        self.applied_at = Some(applied_at);
        self
    }

    /// The label used in console notices: the filename when known, otherwise `<id> <description>`.
    pub fn display_name(&self) -> String {
        match &self.filename {
            Some(filename) => filename.clone(),
            None => format!("{} {}", self.id, self.description),
        }
    }
}

impl PartialEq for Change {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Change {}

impl Hash for Change {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl PartialOrd for Change {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Change {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

/// Unit-of-work control on a connection.
pub trait Transactional {
    fn begin(&mut self) -> Result<(), Error>;
    fn commit(&mut self) -> Result<(), Error>;
    fn rollback(&mut self) -> Result<(), Error>;
}

/// Hands out connections to one database.
pub trait ConnectionProvider {
    type Connection;

    fn connection(&self) -> Result<Self::Connection, Error>;

    /// Close a connection obtained from [ConnectionProvider::connection].
    /// The default implementation just drops it.
    fn release(&self, conn: Self::Connection) -> Result<(), Error> {
        drop(conn);
        Ok(())
    }
}

/// Reads and writes the bookkeeping table of applied changes.
pub trait ChangelogStore<C> {
    fn exists(&self, conn: &mut C) -> Result<bool, Error>;

    /// All recorded changes, in no particular order.
    fn read_all(&self, conn: &mut C) -> Result<Vec<Change>, Error>;

    /// Record `change` as applied. Runs inside whatever unit of work is open on `conn`.
    fn record(&self, conn: &mut C, change: &Change, applied_at: DateTime<Utc>)
        -> Result<(), Error>;

    /// Create the bookkeeping table.
    fn create(&self, conn: &mut C) -> Result<(), Error>;
}

/// Enumerates the known change scripts.
pub trait MigrationSource {
    /// Every known change, in any order.
    fn list_all(&self) -> Result<Vec<Change>, Error>;

    /// A fresh reader over the "up" script of `change`.
    fn open_script(&self, change: &Change) -> Result<Box<dyn Read + '_>, Error>;
}

/// Executes a script against a connection, stopping at the first failing statement.
pub trait ScriptExecutor<C> {
    fn run_script(&self, conn: &mut C, script: &mut dyn Read) -> Result<(), Error>;
}

/// Release `conn` back to `provider` after `result` was produced with it.
/// A release failure never replaces an error already in `result`.
pub(crate) fn release_after<P, T>(
    provider: &P,
    conn: P::Connection,
    result: Result<T, Error>,
) -> Result<T, Error>
where
    P: ConnectionProvider + ?Sized,
{
    let released = provider.release(conn);
    match (result, released) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(release_error)) => Err(release_error),
        (Err(error), Ok(())) => Err(error),
        (Err(error), Err(_release_error)) => {
            #[cfg(feature = "tracing")]
            tracing::warn!(error = %_release_error, "Failed to release connection");
            Err(error)
        }
    }
}

/// `========== <caption> ====...` padded to `width` columns.
pub(crate) fn horizontal_line(caption: &str, width: usize) -> String {
    let mut line = String::from("==========");
    let caption = if caption.is_empty() {
        String::new()
    } else {
        format!(" {} ", caption)
    };
    line.push_str(&caption);
    let fill = width.saturating_sub(caption.chars().count() + 10);
    line.push_str(&"=".repeat(fill));
    line
}
