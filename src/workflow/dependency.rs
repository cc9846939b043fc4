//! Dependency resolution over a report snapshot.
//!
//! Lock state is never stored. Every function here recomputes from the
//! snapshot it is given, so dependency sections changing status in a later
//! snapshot can never leave a stale lock behind.

use std::collections::HashMap;

use crate::backend::types::{ReportState, Section, SectionStatus};

/// True iff any declared dependency is not `accepted` in this snapshot.
/// A `depends_on` id naming no section in the report counts as unmet
/// forever: better permanently blocked and visible than generated out of
/// order.
pub fn is_locked(section: &Section, report: &ReportState) -> bool {
    !blocking_dependencies(section, report).is_empty()
}

/// Unmet dependency ids in declaration order, unknown ids included.
pub fn blocking_dependencies(section: &Section, report: &ReportState) -> Vec<String> {
    section
        .depends_on
        .iter()
        .filter(|dep_id| {
            report
                .section(dep_id)
                .map(|dep| !dep.status.is_accepted())
                .unwrap_or(true)
        })
        .cloned()
        .collect()
}

/// Sections a user could act on right now: generatable and unlocked.
pub fn actionable_sections<'a>(report: &'a ReportState) -> Vec<&'a Section> {
    report
        .sections
        .iter()
        .filter(|s| s.status.is_generatable() && !is_locked(s, report))
        .collect()
}

/// Detect a dependency cycle among not-yet-accepted sections. A cycle means
/// the report can never converge without authoring changes server-side, so
/// it is worth diagnosing instead of idling forever.
///
/// Returns the ids forming one cycle, in walk order.
pub fn dependency_cycle(report: &ReportState) -> Option<Vec<String>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        InProgress,
        Done,
    }

    let unresolved: HashMap<&str, &Section> = report
        .sections
        .iter()
        .filter(|s| !s.status.is_accepted())
        .map(|s| (s.section_id.as_str(), s))
        .collect();

    let mut marks: HashMap<&str, Mark> = HashMap::new();

    fn visit<'a>(
        id: &'a str,
        unresolved: &HashMap<&'a str, &'a Section>,
        marks: &mut HashMap<&'a str, Mark>,
        path: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        let Some(section) = unresolved.get(id) else {
            // Accepted or unknown: neither can extend a cycle.
            return None;
        };
        match marks.get(id) {
            Some(Mark::Done) => return None,
            Some(Mark::InProgress) => {
                let start = path.iter().position(|p| *p == id).unwrap_or(0);
                let mut cycle: Vec<String> = path[start..].iter().map(|s| s.to_string()).collect();
                cycle.push(id.to_string());
                return Some(cycle);
            }
            None => {}
        }
        marks.insert(id, Mark::InProgress);
        path.push(id);
        for dep in &section.depends_on {
            if let Some(cycle) = visit(dep.as_str(), unresolved, marks, path) {
                return Some(cycle);
            }
        }
        path.pop();
        marks.insert(id, Mark::Done);
        None
    }

    let mut path = Vec::new();
    for id in unresolved.keys() {
        if let Some(cycle) = visit(id, &unresolved, &mut marks, &mut path) {
            return Some(cycle);
        }
        path.clear();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::types::ReportStatus;

    fn section(id: &str, status: SectionStatus, deps: &[&str]) -> Section {
        Section {
            section_id: id.to_string(),
            title: id.to_string(),
            description: String::new(),
            status,
            content: None,
            revision: 0,
            max_revisions: 3,
            depends_on: deps.iter().map(|d| d.to_string()).collect(),
            history: vec![],
        }
    }

    fn report(sections: Vec<Section>) -> ReportState {
        ReportState {
            session_id: "s-1".to_string(),
            user_confirmed_start: true,
            report_status: ReportStatus::InProgress,
            sections,
        }
    }

    #[test]
    fn test_no_dependencies_is_unlocked() {
        let r = report(vec![section("a", SectionStatus::Planned, &[])]);
        assert!(!is_locked(r.section("a").unwrap(), &r));
    }

    #[test]
    fn test_locked_until_every_dependency_accepted() {
        let r = report(vec![
            section("a", SectionStatus::Accepted, &[]),
            section("b", SectionStatus::Review, &[]),
            section("c", SectionStatus::Planned, &["a", "b"]),
        ]);
        let c = r.section("c").unwrap();
        // No partial credit: one accepted dependency is not enough.
        assert!(is_locked(c, &r));
        assert_eq!(blocking_dependencies(c, &r), vec!["b".to_string()]);

        let mut r2 = r.clone();
        r2.section_mut("b").unwrap().status = SectionStatus::Accepted;
        assert!(!is_locked(r2.section("c").unwrap(), &r2));
    }

    #[test]
    fn test_unknown_dependency_locks_forever() {
        let r = report(vec![section("a", SectionStatus::Planned, &["ghost"])]);
        let a = r.section("a").unwrap();
        assert!(is_locked(a, &r));
        assert_eq!(blocking_dependencies(a, &r), vec!["ghost".to_string()]);
    }

    #[test]
    fn test_lock_recomputes_after_dependency_reset() {
        let mut r = report(vec![
            section("a", SectionStatus::Accepted, &[]),
            section("b", SectionStatus::Planned, &["a"]),
        ]);
        assert!(!is_locked(r.section("b").unwrap(), &r));

        // Retracting the dependency re-locks b on the very next snapshot,
        // with no stored state to invalidate.
        r.section_mut("a").unwrap().status = SectionStatus::Planned;
        assert!(is_locked(r.section("b").unwrap(), &r));
    }

    #[test]
    fn test_actionable_sections() {
        let r = report(vec![
            section("a", SectionStatus::Accepted, &[]),
            section("b", SectionStatus::Planned, &["a"]),
            section("c", SectionStatus::Planned, &["b"]),
            section("d", SectionStatus::Error, &[]),
            section("e", SectionStatus::Generating, &[]),
        ]);
        let ids: Vec<&str> = actionable_sections(&r)
            .iter()
            .map(|s| s.section_id.as_str())
            .collect();
        assert_eq!(ids, vec!["b", "d"]);
    }

    #[test]
    fn test_cycle_detection() {
        let r = report(vec![
            section("a", SectionStatus::Planned, &["b"]),
            section("b", SectionStatus::Planned, &["a"]),
        ]);
        let cycle = dependency_cycle(&r).unwrap();
        assert!(cycle.len() >= 2);

        let acyclic = report(vec![
            section("a", SectionStatus::Planned, &[]),
            section("b", SectionStatus::Planned, &["a"]),
        ]);
        assert_eq!(dependency_cycle(&acyclic), None);
    }

    #[test]
    fn test_accepted_sections_break_cycles() {
        // A cycle through an accepted section is already satisfied on one
        // edge, so it cannot wedge the report.
        let r = report(vec![
            section("a", SectionStatus::Accepted, &["b"]),
            section("b", SectionStatus::Planned, &["a"]),
        ]);
        assert_eq!(dependency_cycle(&r), None);
    }
}
