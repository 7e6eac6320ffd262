//! Run summary: an append-only record of what happened to each item.

use std::fmt;

use crate::model::ItemKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Created,
    Updated,
    SkippedUnchanged,
    /// Already handled earlier in this pass; not fetched again.
    SkippedDuplicate,
    /// Already handled earlier in this pass; a lightweight reference was placed.
    Referenced,
    Failed(String),
}

impl SyncOutcome {
    pub fn is_change(&self) -> bool {
        matches!(self, SyncOutcome::Created | SyncOutcome::Updated)
    }
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncOutcome::Created => f.write_str("created"),
            SyncOutcome::Updated => f.write_str("updated"),
            SyncOutcome::SkippedUnchanged => f.write_str("unchanged"),
            SyncOutcome::SkippedDuplicate => f.write_str("duplicate"),
            SyncOutcome::Referenced => f.write_str("referenced"),
            SyncOutcome::Failed(e) => write!(f, "failed: {e}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRecord {
    pub kind: ItemKind,
    pub name: String,
    /// Folder label relative to the storage root.
    pub destination: String,
    pub outcome: SyncOutcome,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutcomeCounts {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub duplicate: usize,
    pub referenced: usize,
    pub failed: usize,
}

/// Records in processing order. There is no way to modify or remove a record
/// once pushed.
#[derive(Debug, Default)]
pub struct SummaryCollector {
    records: Vec<SyncRecord>,
}

impl SummaryCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, kind: ItemKind, name: impl Into<String>, destination: impl Into<String>, outcome: SyncOutcome) {
        self.records.push(SyncRecord {
            kind,
            name: name.into(),
            destination: destination.into(),
            outcome,
        });
    }

    pub fn entries(&self) -> &[SyncRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn counts(&self) -> OutcomeCounts {
        let mut counts = OutcomeCounts::default();
        for record in &self.records {
            match record.outcome {
                SyncOutcome::Created => counts.created += 1,
                SyncOutcome::Updated => counts.updated += 1,
                SyncOutcome::SkippedUnchanged => counts.unchanged += 1,
                SyncOutcome::SkippedDuplicate => counts.duplicate += 1,
                SyncOutcome::Referenced => counts.referenced += 1,
                SyncOutcome::Failed(_) => counts.failed += 1,
            }
        }
        counts
    }

    pub fn has_changes(&self) -> bool {
        self.records.iter().any(|r| r.outcome.is_change())
    }

    pub fn failures(&self) -> impl Iterator<Item = &SyncRecord> {
        self.records
            .iter()
            .filter(|r| matches!(r.outcome, SyncOutcome::Failed(_)))
    }

    /// Records grouped by destination, groups in first-seen order.
    pub fn by_destination(&self) -> Vec<(&str, Vec<&SyncRecord>)> {
        let mut groups: Vec<(&str, Vec<&SyncRecord>)> = Vec::new();
        for record in &self.records {
            match groups.iter_mut().find(|(d, _)| *d == record.destination) {
                Some((_, items)) => items.push(record),
                None => groups.push((record.destination.as_str(), vec![record])),
            }
        }
        groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_insertion_order_and_counts() {
        let mut summary = SummaryCollector::new();
        summary.push(ItemKind::Assignment, "Essay", "Bio/Assignments/Essay", SyncOutcome::Created);
        summary.push(ItemKind::ModuleFile, "a.pdf", "Bio", SyncOutcome::SkippedUnchanged);
        summary.push(ItemKind::LinkedFile, "a.pdf", "Bio/Intro", SyncOutcome::SkippedDuplicate);
        summary.push(ItemKind::Page, "Intro", "Bio/Intro", SyncOutcome::Failed("boom".into()));

        let names: Vec<&str> = summary.entries().iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["Essay", "a.pdf", "a.pdf", "Intro"]);
        let counts = summary.counts();
        assert_eq!((counts.created, counts.unchanged, counts.duplicate, counts.failed), (1, 1, 1, 1));
        assert!(summary.has_changes());
        assert_eq!(summary.failures().count(), 1);
    }

    #[test]
    fn groups_by_destination_in_first_seen_order() {
        let mut summary = SummaryCollector::new();
        summary.push(ItemKind::ModuleFile, "x", "Bio", SyncOutcome::Created);
        summary.push(ItemKind::Page, "p", "Bio/P", SyncOutcome::Created);
        summary.push(ItemKind::ModuleFile, "y", "Bio", SyncOutcome::Updated);
        let groups = summary.by_destination();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, "Bio");
        assert_eq!(groups[0].1.len(), 2);
    }

    #[test]
    fn skips_only_is_not_a_change() {
        let mut summary = SummaryCollector::new();
        summary.push(ItemKind::Bundle, "All Pages.pdf", "Bio/Pages", SyncOutcome::SkippedUnchanged);
        assert!(!summary.has_changes());
    }
}
