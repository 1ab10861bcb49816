//! In-memory stand-ins for the engine's collaborators. Every interesting call is written to a
//! shared [Journal] so tests can assert on the exact order of events.

use crate::core::{Change, ChangelogStore, ConnectionProvider, MigrationSource, ScriptExecutor, Transactional};
use crate::error::Error;
use crate::hook::{HookContext, MigrationHook};
use chrono::{DateTime, Utc};
use std::cell::{Cell, RefCell};
use std::io::Read;
use std::rc::Rc;

#[derive(Debug, Clone, Default)]
pub(crate) struct Journal(Rc<RefCell<Vec<String>>>);

impl Journal {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.borrow_mut().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.borrow().clone()
    }
}

#[derive(Debug)]
pub(crate) struct FakeConn {
    pub name: &'static str,
    journal: Journal,
    fail_commit: bool,
}

impl Transactional for FakeConn {
    fn begin(&mut self) -> Result<(), Error> {
        self.journal.push(format!("begin {}", self.name));
        Ok(())
    }

    fn commit(&mut self) -> Result<(), Error> {
        self.journal.push(format!("commit {}", self.name));
        if self.fail_commit {
            return Err(Error::Generic(format!("commit failed on {}", self.name)));
        }
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), Error> {
        self.journal.push(format!("rollback {}", self.name));
        Ok(())
    }
}

pub(crate) struct FakeProvider {
    name: &'static str,
    journal: Journal,
    fail_connect: bool,
    fail_release: bool,
    fail_commit: bool,
}

impl FakeProvider {
    pub fn new(name: &'static str, journal: &Journal) -> Self {
        Self {
            name,
            journal: journal.clone(),
            fail_connect: false,
            fail_release: false,
            fail_commit: false,
        }
    }

    pub fn failing_connect(mut self) -> Self {
        self.fail_connect = true;
        self
    }

    pub fn failing_release(mut self) -> Self {
        self.fail_release = true;
        self
    }

    pub fn failing_commit(mut self) -> Self {
        self.fail_commit = true;
        self
    }
}

impl ConnectionProvider for FakeProvider {
    type Connection = FakeConn;

    fn connection(&self) -> Result<FakeConn, Error> {
        if self.fail_connect {
            return Err(Error::Generic(format!("cannot connect to {}", self.name)));
        }
        self.journal.push(format!("open {}", self.name));
        Ok(FakeConn {
            name: self.name,
            journal: self.journal.clone(),
            fail_commit: self.fail_commit,
        })
    }

    fn release(&self, conn: FakeConn) -> Result<(), Error> {
        self.journal.push(format!("close {}", conn.name));
        if self.fail_release {
            return Err(Error::Generic(format!("cannot close {}", conn.name)));
        }
        Ok(())
    }
}

pub(crate) struct FakeChangelog {
    exists: Cell<bool>,
    records: Rc<RefCell<Vec<Change>>>,
    fail_record_on: Option<u64>,
    journal: Journal,
}

impl FakeChangelog {
    pub fn new(journal: &Journal, recorded: &[u64]) -> Self {
        Self {
            exists: Cell::new(true),
            records: Rc::new(RefCell::new(
                recorded
                    .iter()
                    .map(|&id| Change::new(id, format!("recorded {}", id)))
                    .collect(),
            )),
            fail_record_on: None,
            journal: journal.clone(),
        }
    }

    pub fn missing(journal: &Journal) -> Self {
        let changelog = Self::new(journal, &[]);
        changelog.exists.set(false);
        changelog
    }

    pub fn failing_record_on(mut self, id: u64) -> Self {
        self.fail_record_on = Some(id);
        self
    }

    /// Handle on the recorded changes that survives moving the store into a migrator.
    pub fn records(&self) -> Rc<RefCell<Vec<Change>>> {
        self.records.clone()
    }
}

impl ChangelogStore<FakeConn> for FakeChangelog {
    fn exists(&self, conn: &mut FakeConn) -> Result<bool, Error> {
        self.journal.push(format!("exists? {}", conn.name));
        Ok(self.exists.get())
    }

    fn read_all(&self, conn: &mut FakeConn) -> Result<Vec<Change>, Error> {
        self.journal.push(format!("read changelog {}", conn.name));
        Ok(self.records.borrow().clone())
    }

    fn record(
        &self,
        conn: &mut FakeConn,
        change: &Change,
        applied_at: DateTime<Utc>,
    ) -> Result<(), Error> {
        self.journal
            .push(format!("record {} on {}", change.id, conn.name));
        if self.fail_record_on == Some(change.id) {
            return Err(Error::Generic(format!("cannot record {}", change.id)));
        }
        self.records
            .borrow_mut()
            .push(change.clone().with_applied_at(applied_at));
        Ok(())
    }

    fn create(&self, conn: &mut FakeConn) -> Result<(), Error> {
        self.journal.push(format!("create changelog {}", conn.name));
        self.exists.set(true);
        Ok(())
    }
}

pub(crate) struct FakeSource {
    changes: Vec<Change>,
    journal: Journal,
}

impl FakeSource {
    /// A source whose script for change `id` is the text `script <id>`.
    pub fn new(journal: &Journal, ids: &[u64]) -> Self {
        Self {
            changes: ids
                .iter()
                .map(|&id| Change::new(id, format!("change {}", id)).with_filename(format!("{}.sql", id)))
                .collect(),
            journal: journal.clone(),
        }
    }
}

/// Reader that logs when it is dropped.
struct TrackedScript {
    id: u64,
    body: std::io::Cursor<Vec<u8>>,
    journal: Journal,
}

impl Read for TrackedScript {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.body.read(buf)
    }
}

impl Drop for TrackedScript {
    fn drop(&mut self) {
        self.journal.push(format!("close script {}", self.id));
    }
}

impl MigrationSource for FakeSource {
    fn list_all(&self) -> Result<Vec<Change>, Error> {
        Ok(self.changes.clone())
    }

    fn open_script(&self, change: &Change) -> Result<Box<dyn Read + '_>, Error> {
        self.journal.push(format!("open script {}", change.id));
        Ok(Box::new(TrackedScript {
            id: change.id,
            body: std::io::Cursor::new(format!("script {}", change.id).into_bytes()),
            journal: self.journal.clone(),
        }))
    }
}

pub(crate) struct FakeRunner {
    journal: Journal,
    fail_on: Option<String>,
}

impl FakeRunner {
    pub fn new(journal: &Journal) -> Self {
        Self {
            journal: journal.clone(),
            fail_on: None,
        }
    }

    /// Fail any script containing `marker`.
    pub fn failing_on(mut self, marker: &str) -> Self {
        self.fail_on = Some(marker.to_string());
        self
    }
}

impl ScriptExecutor<FakeConn> for FakeRunner {
    fn run_script(&self, conn: &mut FakeConn, script: &mut dyn Read) -> Result<(), Error> {
        let mut text = String::new();
        script.read_to_string(&mut text)?;
        self.journal.push(format!("run {}: {}", conn.name, text));
        match &self.fail_on {
            Some(marker) if text.contains(marker.as_str()) => {
                Err(Error::Generic(format!("script failed: {}", text)))
            }
            _ => Ok(()),
        }
    }
}

/// Writes every lifecycle call to the journal, optionally failing one of them.
pub(crate) struct JournalHook {
    journal: Journal,
    fail_at: Option<String>,
}

impl JournalHook {
    pub fn new(journal: &Journal) -> Self {
        Self {
            journal: journal.clone(),
            fail_at: None,
        }
    }

    /// Fail the call whose journal entry equals `entry`, e.g. `"after_each 2"`.
    pub fn failing_at(mut self, entry: &str) -> Self {
        self.fail_at = Some(entry.to_string());
        self
    }

    fn note(&self, point: &str, context: &HookContext<'_, FakeConn>) -> Result<(), Error> {
        let entry = match context.change() {
            Some(change) => format!("{} {}", point, change.id),
            None => point.to_string(),
        };
        self.journal.push(entry.clone());
        if self.fail_at.as_deref() == Some(entry.as_str()) {
            return Err(Error::Generic(format!("hook failed at {}", entry)));
        }
        Ok(())
    }
}

impl MigrationHook<FakeConn> for JournalHook {
    fn before(&self, context: HookContext<'_, FakeConn>) -> Result<(), Error> {
        self.note("before", &context)
    }

    fn before_each(&self, context: HookContext<'_, FakeConn>) -> Result<(), Error> {
        self.note("before_each", &context)
    }

    fn after_each(&self, context: HookContext<'_, FakeConn>) -> Result<(), Error> {
        self.note("after_each", &context)
    }

    fn after(&self, context: HookContext<'_, FakeConn>) -> Result<(), Error> {
        self.note("after", &context)
    }
}
