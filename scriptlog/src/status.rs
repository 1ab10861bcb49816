use crate::core::{horizontal_line, Change};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// One row of a [StatusReport].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusEntry {
    pub id: u64,
    pub description: String,
    pub filename: Option<String>,
    pub applied: bool,
    /// When the change was recorded, if the changelog kept a timestamp.
    pub applied_at: Option<DateTime<Utc>>,
    /// False for changes the changelog recorded but the source no longer has.
    pub in_source: bool,
}

impl StatusEntry {
    pub fn is_pending(&self) -> bool {
        !self.applied
    }
}

/// Every change known to the source or the changelog, in id order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub entries: Vec<StatusEntry>,
}

impl StatusReport {
    pub(crate) fn new(migrations: Vec<Change>, changelog: Vec<Change>) -> Self {
        let mut entries: BTreeMap<u64, StatusEntry> = BTreeMap::new();
        for change in migrations {
            entries.insert(
                change.id,
                StatusEntry {
                    id: change.id,
                    description: change.description,
                    filename: change.filename,
                    applied: false,
                    applied_at: None,
                    in_source: true,
                },
            );
        }
        for record in changelog {
            let applied_at = record.applied_at;
            entries
                .entry(record.id)
                .and_modify(|entry| {
                    entry.applied = true;
                    entry.applied_at = applied_at;
                })
                .or_insert(StatusEntry {
                    id: record.id,
                    description: record.description,
                    filename: record.filename,
                    applied: true,
                    applied_at,
                    in_source: false,
                });
        }
        Self {
            entries: entries.into_values().collect(),
        }
    }

    pub fn pending(&self) -> impl Iterator<Item = &StatusEntry> {
        self.entries.iter().filter(|e| e.is_pending())
    }

    pub fn applied(&self) -> impl Iterator<Item = &StatusEntry> {
        self.entries.iter().filter(|e| !e.is_pending())
    }

    /// Recorded changes whose scripts are gone from the source.
    pub fn missing(&self) -> impl Iterator<Item = &StatusEntry> {
        self.entries.iter().filter(|e| !e.in_source)
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:<14} {:<19} {}", "ID", "Applied At", "Description")?;
        writeln!(f, "{}", horizontal_line("", 80))?;
        for entry in &self.entries {
            let applied_at = match (entry.applied, entry.applied_at) {
                (true, Some(at)) => at.format("%Y-%m-%d %H:%M:%S").to_string(),
                (true, None) => "unknown".to_string(),
                (false, _) => "   ...pending...   ".to_string(),
            };
            write!(f, "{:<14} {:<19} {}", entry.id, applied_at, entry.description)?;
            if !entry.in_source {
                write!(f, " <== MISSING")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn merges_source_and_changelog() {
        let report = StatusReport::new(
            vec![
                Change::new(3, "third"),
                Change::new(1, "first"),
                Change::new(2, "second"),
            ],
            vec![
                Change::new(1, "first (old label)").with_applied_at(at(9)),
                Change::new(0, "dropped").with_applied_at(at(8)),
            ],
        );

        let ids: Vec<u64> = report.entries.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3]);
        assert_eq!(report.entries[1].description, "first");
        assert_eq!(report.entries[1].applied_at, Some(at(9)));
        assert_eq!(report.pending().map(|e| e.id).collect::<Vec<_>>(), vec![2, 3]);
        assert_eq!(report.applied().map(|e| e.id).collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(report.missing().map(|e| e.id).collect::<Vec<_>>(), vec![0]);
    }

    #[test]
    fn renders_table() {
        let report = StatusReport::new(
            vec![Change::new(1000, "create users"), Change::new(1001, "add email")],
            vec![
                Change::new(1000, "create users").with_applied_at(at(10)),
                Change::new(999, "legacy").with_applied_at(at(7)),
            ],
        );

        let text = report.to_string();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "ID             Applied At          Description");
        assert_eq!(lines[1], "=".repeat(80));
        assert_eq!(lines[2], "999            2024-05-01 07:00:00 legacy <== MISSING");
        assert_eq!(lines[3], "1000           2024-05-01 10:00:00 create users");
        assert_eq!(lines[4], "1001              ...pending...    add email");
    }

    #[test]
    fn serializes_to_json() {
        let report = StatusReport::new(vec![Change::new(1, "only")], vec![]);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["entries"][0]["id"], 1);
        assert_eq!(json["entries"][0]["applied_at"], serde_json::Value::Null);
    }
}
