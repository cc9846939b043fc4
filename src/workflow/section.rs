//! Section lifecycle: `planned → generating → {review, error}`,
//! `review → {generating, accepted}`, `error → generating`,
//! `accepted → planned` (reset only).
//!
//! The transition table is the single source of section rules. The
//! orchestrator runs the `validate_*` functions against its last snapshot for
//! responsiveness; the in-memory backend runs the same functions plus
//! [`transition`] authoritatively. Generation completion and failure are only
//! ever applied from observed server state, never invented client-side.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::backend::types::{HistoryEntry, ReportState, Section, SectionStatus};
use crate::workflow::dependency;

/// Everything that can happen to one section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SectionEvent {
    /// `generate` accepted by the backend; one generation request is in flight.
    StartGeneration,
    /// Async generation resolved with a draft.
    GenerationSucceeded {
        content: String,
        content_snapshot_ref: String,
        model_name: String,
    },
    /// Async generation resolved with a failure. Content is left untouched.
    GenerationFailed { message: String },
    /// Reviewer accepted the draft.
    Approve,
    /// Reviewer rejected the draft; feedback steers the regeneration.
    Reject { feedback: String },
    /// Destructive return to `planned`.
    Reset { force: bool },
}

impl SectionEvent {
    fn describe(&self) -> &'static str {
        match self {
            SectionEvent::StartGeneration => "generate",
            SectionEvent::GenerationSucceeded { .. } => "complete generation",
            SectionEvent::GenerationFailed { .. } => "fail generation",
            SectionEvent::Approve => "approve",
            SectionEvent::Reject { .. } => "reject",
            SectionEvent::Reset { .. } => "reset",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SectionCommandError {
    #[error("no section '{section_id}' in this report")]
    UnknownSection { section_id: String },

    #[error("section '{section_id}' is {status}, cannot {attempted}")]
    WrongStatus {
        section_id: String,
        status: SectionStatus,
        attempted: &'static str,
    },

    /// A generation request is already running; the duplicate is refused,
    /// not queued. Presented as a conflict, not a hard failure.
    #[error("section '{section_id}' is already generating")]
    AlreadyGenerating { section_id: String },

    #[error("section '{section_id}' is blocked by unaccepted dependencies: {blocking:?}")]
    DependenciesUnmet {
        section_id: String,
        blocking: Vec<String>,
    },

    #[error("section '{section_id}' already consumed all {max_revisions} revisions; reset to continue")]
    RevisionBudgetExhausted {
        section_id: String,
        max_revisions: u32,
    },

    #[error("rejection requires non-empty feedback")]
    EmptyFeedback,

    #[error("section '{section_id}' is already accepted")]
    AlreadyAccepted { section_id: String },

    #[error("section '{section_id}' is accepted; resetting it requires force")]
    ForceRequired { section_id: String },
}

/// `generate` precondition: status admits generation and every dependency is
/// accepted in this snapshot.
pub fn validate_generate(
    section: &Section,
    report: &ReportState,
) -> Result<(), SectionCommandError> {
    if section.status == SectionStatus::Generating {
        // Duplicate trigger; the backend answers this with a conflict.
        return Err(SectionCommandError::AlreadyGenerating {
            section_id: section.section_id.clone(),
        });
    }
    if !section.status.is_generatable() {
        return Err(SectionCommandError::WrongStatus {
            section_id: section.section_id.clone(),
            status: section.status,
            attempted: "generate",
        });
    }
    let blocking = dependency::blocking_dependencies(section, report);
    if !blocking.is_empty() {
        return Err(SectionCommandError::DependenciesUnmet {
            section_id: section.section_id.clone(),
            blocking,
        });
    }
    Ok(())
}

/// `submit_review` precondition. Approving an already-accepted section is a
/// distinct no-op error so a doubled accept never looks like a transition.
pub fn validate_review(
    section: &Section,
    accepted: bool,
    feedback: Option<&str>,
) -> Result<(), SectionCommandError> {
    if section.status == SectionStatus::Accepted && accepted {
        return Err(SectionCommandError::AlreadyAccepted {
            section_id: section.section_id.clone(),
        });
    }
    if section.status != SectionStatus::Review {
        return Err(SectionCommandError::WrongStatus {
            section_id: section.section_id.clone(),
            status: section.status,
            attempted: "review",
        });
    }
    if !accepted {
        if feedback.map(str::trim).unwrap_or("").is_empty() {
            return Err(SectionCommandError::EmptyFeedback);
        }
        if section.revision >= section.max_revisions {
            return Err(SectionCommandError::RevisionBudgetExhausted {
                section_id: section.section_id.clone(),
                max_revisions: section.max_revisions,
            });
        }
    }
    Ok(())
}

/// `reset` precondition: structurally always possible, but retracting an
/// accepted section is authorization-gated behind `force`.
pub fn validate_reset(section: &Section, force: bool) -> Result<(), SectionCommandError> {
    if section.status == SectionStatus::Accepted && !force {
        return Err(SectionCommandError::ForceRequired {
            section_id: section.section_id.clone(),
        });
    }
    Ok(())
}

/// Apply one event to a section. Exhaustive over `(status, event)`; anything
/// not listed is a typed refusal with no mutation.
pub fn transition(section: &mut Section, event: &SectionEvent) -> Result<(), SectionCommandError> {
    let from = section.status;
    match (from, event) {
        (SectionStatus::Planned | SectionStatus::Error, SectionEvent::StartGeneration) => {
            section.status = SectionStatus::Generating;
        }

        (SectionStatus::Generating, SectionEvent::GenerationSucceeded {
            content,
            content_snapshot_ref,
            model_name,
        }) => {
            section.status = SectionStatus::Review;
            section.content = Some(content.clone());
            section.history.push(HistoryEntry {
                content_snapshot_ref: content_snapshot_ref.clone(),
                model_name: model_name.clone(),
                timestamp: Utc::now(),
            });
            // Revision accounting happens on rejection, not on completion.
        }

        (SectionStatus::Generating, SectionEvent::GenerationFailed { message }) => {
            debug!(
                section_id = %section.section_id,
                message = %message,
                "generation attempt failed"
            );
            section.status = SectionStatus::Error;
        }

        (SectionStatus::Review, SectionEvent::Approve) => {
            section.status = SectionStatus::Accepted;
        }

        (SectionStatus::Review, SectionEvent::Reject { feedback }) => {
            if feedback.trim().is_empty() {
                return Err(SectionCommandError::EmptyFeedback);
            }
            if section.revision >= section.max_revisions {
                return Err(SectionCommandError::RevisionBudgetExhausted {
                    section_id: section.section_id.clone(),
                    max_revisions: section.max_revisions,
                });
            }
            section.revision += 1;
            section.status = SectionStatus::Generating;
        }

        (_, SectionEvent::Reset { force }) => {
            if from == SectionStatus::Accepted && !force {
                return Err(SectionCommandError::ForceRequired {
                    section_id: section.section_id.clone(),
                });
            }
            section.status = SectionStatus::Planned;
            section.revision = 0;
            section.content = None;
            section.history.clear();
        }

        (SectionStatus::Accepted, SectionEvent::Approve) => {
            return Err(SectionCommandError::AlreadyAccepted {
                section_id: section.section_id.clone(),
            });
        }

        (_, event) => {
            return Err(SectionCommandError::WrongStatus {
                section_id: section.section_id.clone(),
                status: from,
                attempted: event.describe(),
            });
        }
    }

    debug!(
        section_id = %section.section_id,
        from = %from,
        to = %section.status,
        revision = section.revision,
        "section transition"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::types::ReportStatus;

    fn section(id: &str, status: SectionStatus) -> Section {
        Section {
            section_id: id.to_string(),
            title: id.to_string(),
            description: String::new(),
            status,
            content: None,
            revision: 0,
            max_revisions: 2,
            depends_on: vec![],
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

    fn succeeded(n: u32) -> SectionEvent {
        SectionEvent::GenerationSucceeded {
            content: format!("draft {n}"),
            content_snapshot_ref: format!("snap-{n}"),
            model_name: "test-model".to_string(),
        }
    }

    #[test]
    fn test_happy_path_first_draft_is_free() {
        let mut s = section("intro", SectionStatus::Planned);
        transition(&mut s, &SectionEvent::StartGeneration).unwrap();
        assert_eq!(s.status, SectionStatus::Generating);
        transition(&mut s, &succeeded(1)).unwrap();
        assert_eq!(s.status, SectionStatus::Review);
        assert_eq!(s.revision, 0);
        assert_eq!(s.history.len(), 1);
        transition(&mut s, &SectionEvent::Approve).unwrap();
        assert_eq!(s.status, SectionStatus::Accepted);
    }

    #[test]
    fn test_rejection_consumes_revisions_until_ceiling() {
        let mut s = section("methods", SectionStatus::Planned);
        transition(&mut s, &SectionEvent::StartGeneration).unwrap();
        transition(&mut s, &succeeded(1)).unwrap();

        transition(&mut s, &SectionEvent::Reject { feedback: "x".to_string() }).unwrap();
        assert_eq!(s.revision, 1);
        transition(&mut s, &succeeded(2)).unwrap();

        transition(&mut s, &SectionEvent::Reject { feedback: "y".to_string() }).unwrap();
        assert_eq!(s.revision, 2);
        transition(&mut s, &succeeded(3)).unwrap();

        // Third rejection exceeds max_revisions=2: refused, nothing mutated.
        let err = transition(&mut s, &SectionEvent::Reject { feedback: "z".to_string() })
            .unwrap_err();
        assert!(matches!(
            err,
            SectionCommandError::RevisionBudgetExhausted { max_revisions: 2, .. }
        ));
        assert_eq!(s.status, SectionStatus::Review);
        assert_eq!(s.revision, 2);
    }

    #[test]
    fn test_rejection_requires_feedback() {
        let mut s = section("intro", SectionStatus::Review);
        let err = transition(&mut s, &SectionEvent::Reject { feedback: "  ".to_string() })
            .unwrap_err();
        assert_eq!(err, SectionCommandError::EmptyFeedback);
        assert_eq!(s.status, SectionStatus::Review);
    }

    #[test]
    fn test_error_state_allows_retry() {
        let mut s = section("intro", SectionStatus::Planned);
        transition(&mut s, &SectionEvent::StartGeneration).unwrap();
        transition(
            &mut s,
            &SectionEvent::GenerationFailed { message: "engine went away".to_string() },
        )
        .unwrap();
        assert_eq!(s.status, SectionStatus::Error);
        assert_eq!(s.content, None);
        transition(&mut s, &SectionEvent::StartGeneration).unwrap();
        assert_eq!(s.status, SectionStatus::Generating);
    }

    #[test]
    fn test_approve_twice_is_a_noop_error() {
        let mut s = section("intro", SectionStatus::Review);
        transition(&mut s, &SectionEvent::Approve).unwrap();
        let err = transition(&mut s, &SectionEvent::Approve).unwrap_err();
        assert!(matches!(err, SectionCommandError::AlreadyAccepted { .. }));
        assert_eq!(s.status, SectionStatus::Accepted);
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut s = section("intro", SectionStatus::Planned);
        s.max_revisions = 3;
        transition(&mut s, &SectionEvent::StartGeneration).unwrap();
        transition(&mut s, &succeeded(1)).unwrap();
        transition(&mut s, &SectionEvent::Reject { feedback: "more".to_string() }).unwrap();
        transition(&mut s, &succeeded(2)).unwrap();

        transition(&mut s, &SectionEvent::Reset { force: false }).unwrap();
        assert_eq!(s.status, SectionStatus::Planned);
        assert_eq!(s.revision, 0);
        assert_eq!(s.content, None);
        assert!(s.history.is_empty());
    }

    #[test]
    fn test_reset_of_accepted_section_requires_force() {
        let mut s = section("intro", SectionStatus::Accepted);
        let err = transition(&mut s, &SectionEvent::Reset { force: false }).unwrap_err();
        assert!(matches!(err, SectionCommandError::ForceRequired { .. }));
        assert_eq!(s.status, SectionStatus::Accepted);

        transition(&mut s, &SectionEvent::Reset { force: true }).unwrap();
        assert_eq!(s.status, SectionStatus::Planned);
    }

    #[test]
    fn test_generate_rejected_while_generating() {
        let mut s = section("intro", SectionStatus::Generating);
        let err = transition(&mut s, &SectionEvent::StartGeneration).unwrap_err();
        assert!(matches!(err, SectionCommandError::WrongStatus { .. }));

        let r = report(vec![s.clone()]);
        assert!(validate_generate(&s, &r).is_err());
    }

    #[test]
    fn test_validate_generate_checks_dependencies() {
        let a = section("a", SectionStatus::Planned);
        let mut b = section("b", SectionStatus::Planned);
        b.depends_on = vec!["a".to_string()];
        let r = report(vec![a, b.clone()]);

        let err = validate_generate(&b, &r).unwrap_err();
        assert!(matches!(
            err,
            SectionCommandError::DependenciesUnmet { ref blocking, .. } if blocking == &vec!["a".to_string()]
        ));

        let mut r2 = r.clone();
        r2.section_mut("a").unwrap().status = SectionStatus::Accepted;
        assert!(validate_generate(&b, &r2).is_ok());
    }

    #[test]
    fn test_completion_events_invalid_outside_generating() {
        // Completion is observed, never synthesized: applying it to a planned
        // section means our view and the server disagree structurally.
        let mut s = section("intro", SectionStatus::Planned);
        assert!(transition(&mut s, &succeeded(1)).is_err());
        assert!(transition(
            &mut s,
            &SectionEvent::GenerationFailed { message: "x".to_string() }
        )
        .is_err());
    }
}
