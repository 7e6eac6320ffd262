//! Console summary for one course pass.

use course_mirror_core::model::Course;
use course_mirror_core::summary::SummaryCollector;
use std::fmt::Write;

/// Records grouped by destination folder, then a totals line.
pub fn render_summary(course: &Course, summary: &SummaryCollector) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "== {} ==", course.name);
    if summary.is_empty() {
        let _ = writeln!(out, "  nothing to mirror");
        return out;
    }
    for (destination, records) in summary.by_destination() {
        let _ = writeln!(out, "  {destination}/");
        for record in records {
            let _ = writeln!(out, "    [{}] {} ({})", record.outcome, record.name, record.kind);
        }
    }
    let c = summary.counts();
    let _ = writeln!(
        out,
        "  {} created, {} updated, {} unchanged, {} duplicate, {} referenced, {} failed",
        c.created, c.updated, c.unchanged, c.duplicate, c.referenced, c.failed
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use course_mirror_core::model::ItemKind;
    use course_mirror_core::summary::SyncOutcome;

    fn course() -> Course {
        Course {
            id: 1,
            name: "Chemistry".into(),
            code: None,
            access_restricted: false,
        }
    }

    #[test]
    fn groups_records_under_their_folder() {
        let mut summary = SummaryCollector::new();
        summary.push(ItemKind::ModuleFile, "lab.pdf", "Chemistry", SyncOutcome::Created);
        summary.push(ItemKind::Page, "Safety", "Chemistry/Safety", SyncOutcome::SkippedUnchanged);
        summary.push(ItemKind::ModuleFile, "data.csv", "Chemistry", SyncOutcome::Failed("timeout".into()));

        let text = render_summary(&course(), &summary);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "== Chemistry ==");
        assert_eq!(lines[1], "  Chemistry/");
        assert!(lines[2].contains("lab.pdf"));
        assert!(lines[3].contains("failed: timeout"));
        assert_eq!(lines[4], "  Chemistry/Safety/");
        assert!(text.ends_with("1 created, 0 updated, 1 unchanged, 0 duplicate, 0 referenced, 1 failed\n"));
    }

    #[test]
    fn empty_pass_says_so() {
        let text = render_summary(&course(), &SummaryCollector::new());
        assert!(text.contains("nothing to mirror"));
    }
}
