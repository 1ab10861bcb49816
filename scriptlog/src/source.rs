//! Where change scripts come from.

use crate::core::{Change, MigrationSource};
use crate::error::Error;
use std::collections::BTreeMap;
use std::fs;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

/// Scripts held in memory, keyed by change id.
///
/// Adding a second script with an id already present replaces the first.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    scripts: BTreeMap<u64, (Change, String)>,
}

impl MemorySource {
    /// An empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `change` with its script text.
    pub fn with_change(mut self, change: Change, script: impl Into<String>) -> Self {
        self.push(change, script);
        self
    }

    /// Like [MemorySource::with_change], in place.
    pub fn push(&mut self, change: Change, script: impl Into<String>) {
        self.scripts.insert(change.id, (change, script.into()));
    }
}

impl MigrationSource for MemorySource {
    fn list_all(&self) -> Result<Vec<Change>, Error> {
        Ok(self
            .scripts
            .values()
            .map(|(change, _)| change.clone())
            .collect())
    }

    fn open_script(&self, change: &Change) -> Result<Box<dyn Read + '_>, Error> {
        match self.scripts.get(&change.id) {
            Some((_, script)) => Ok(Box::new(script.as_bytes())),
            None => Err(Error::Generic(format!(
                "No script found for change {}",
                change.id
            ))),
        }
    }
}

/// Files that live next to the change scripts but are not changes themselves.
const RESERVED_FILES: [&str; 2] = ["bootstrap.sql", "onabort.sql"];

/// Scripts stored as `<id>_<description>.sql` files in one directory.
///
/// The description is the part of the name after the first underscore, with underscores
/// read as spaces. Anything after a `-- //@UNDO` line is the undo section and is never run.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    dir: PathBuf,
}

impl DirectorySource {
    /// Scripts are read from `dir` on every listing.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl MigrationSource for DirectorySource {
    fn list_all(&self) -> Result<Vec<Change>, Error> {
        let mut changes: BTreeMap<u64, Change> = BTreeMap::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if !file_name.ends_with(".sql") || RESERVED_FILES.contains(&file_name) {
                continue;
            }
            let change = parse_file_name(file_name)?;
            if let Some(existing) = changes.get(&change.id) {
                return Err(Error::Generic(format!(
                    "Duplicate change id {} in {} and {}",
                    change.id,
                    existing.display_name(),
                    file_name
                )));
            }
            changes.insert(change.id, change);
        }
        Ok(changes.into_values().collect())
    }

    fn open_script(&self, change: &Change) -> Result<Box<dyn Read + '_>, Error> {
        let filename = change.filename.as_deref().ok_or_else(|| {
            Error::Generic(format!("Change {} has no script file", change.id))
        })?;
        let text = fs::read_to_string(self.dir.join(filename))?;
        Ok(Box::new(Cursor::new(up_section(&text).to_string().into_bytes())))
    }
}

fn parse_file_name(file_name: &str) -> Result<Change, Error> {
    let stem = file_name.strip_suffix(".sql").unwrap_or(file_name);
    let (id, words) = stem.split_once('_').unwrap_or((stem, ""));
    let id: u64 = id.parse().map_err(|_| {
        Error::Generic(format!(
            "Could not parse change id from file name: {}",
            file_name
        ))
    })?;
    Ok(Change::new(id, words.replace('_', " ")).with_filename(file_name))
}

/// The script text before the undo marker.
fn up_section(text: &str) -> &str {
    let mut end = 0;
    for line in text.split_inclusive('\n') {
        let is_undo_marker = line
            .trim()
            .strip_prefix("--")
            .map(|rest| rest.trim_start().starts_with("//@UNDO"))
            .unwrap_or(false);
        if is_undo_marker {
            break;
        }
        end += line.len();
    }
    &text[..end]
}
