//! # Scriptlog
//!
//! `scriptlog` applies numbered SQL change scripts to a database and keeps a changelog
//! table of which ones have run.
//!
//! [Migrator::pending] applies every change the changelog has no record of, including ones
//! numbered below changes that were already applied (for example scripts merged in from
//! another branch). [Migrator::up] only applies changes newer than the newest recorded one,
//! and [Migrator::status] reports what is applied and what is pending.
//!
//! ## Example
//!
//! ```
//! use scriptlog::{Change, ChangelogStore, ConnectionProvider, MemorySource, Migrator};
//! use scriptlog::sqlite::{SqliteChangelog, SqliteConnectionProvider};
//!
//! let provider = SqliteConnectionProvider::shared_memory("readme");
//! // keep one connection open so the in-memory database outlives the migrator's connections
//! let mut keeper = provider.connection().unwrap();
//! SqliteChangelog::new().create(&mut keeper).unwrap();
//!
//! let source = MemorySource::new()
//!     .with_change(
//!         Change::new(1, "create users"),
//!         "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT);",
//!     )
//!     .with_change(
//!         Change::new(2, "add email"),
//!         "ALTER TABLE users ADD COLUMN email TEXT;",
//!     );
//!
//! let migrator = Migrator::sqlite(provider, source);
//! let mut out = Vec::new();
//! let applied = migrator.pending(&mut out).unwrap();
//! assert_eq!(applied.iter().map(|c| c.id).collect::<Vec<_>>(), vec![1, 2]);
//! assert!(migrator.status().unwrap().pending().next().is_none());
//!
//! // the changelog now holds both changes, so there is nothing left to apply
//! assert!(migrator.pending(&mut out).unwrap().is_empty());
//! ```
//!
//! ## Plugging in other databases
//!
//! The engine only talks to a database through a handful of traits:
//! [ConnectionProvider] hands out connections, [Transactional] brackets each change in a
//! unit of work, [ChangelogStore] reads and writes the changelog, [ScriptExecutor] runs a
//! script, and [MigrationSource] lists the scripts. The `sqlite` feature (on by default)
//! provides all of them for SQLite.
//!
//! ## Tracing
//!
//! With the `tracing` feature, every applied change runs inside a `migration_apply` span
//! carrying the change id and file name, with start, completion and failure events.

#![cfg_attr(docsrs, feature(doc_cfg))]

mod core;
mod error;
pub mod hook;
mod migrator;
pub mod reconcile;
pub mod script;
mod source;
#[cfg(feature = "sqlite")]
#[cfg_attr(docsrs, doc(cfg(feature = "sqlite")))]
pub mod sqlite;
mod status;
#[cfg(test)]
pub(crate) mod test_fakes;
#[cfg(all(feature = "sqlite", any(test, feature = "testing")))]
#[cfg_attr(docsrs, doc(cfg(feature = "testing")))]
pub mod testing;

pub use crate::core::{
    Change, ChangelogStore, ConnectionProvider, MigrationSource, ScriptExecutor, Transactional,
};
pub use error::{Error, MigrationError};
pub use hook::{FnHook, HookContext, MigrationHook, ScriptHook};
pub use migrator::Migrator;
pub use source::{DirectorySource, MemorySource};
pub use status::{StatusEntry, StatusReport};
