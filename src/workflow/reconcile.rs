//! Reconciliation of authoritative server state into the local view.
//!
//! The rule is total: the remote snapshot replaces the local one wholesale.
//! Optimistic local transitions exist only between a command and the next
//! successful fetch; nothing is ever merged field-by-field. An absent report
//! is a valid observation, distinct from a transport failure.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::backend::types::{ReportState, ReportStatus};

/// Outcome of one successful round trip to `get_state`.
#[derive(Debug, Clone, PartialEq)]
pub enum Observation {
    Found(ReportState),
    /// The backend answered and the report does not exist (not yet
    /// initialized). Not an error.
    Absent,
}

/// Locally held, periodically refreshed copy of one report, plus the sync
/// health needed to apply the transient-error escalation rule.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportView {
    pub session_id: String,
    pub state: Option<ReportState>,
    pub last_synced: Option<DateTime<Utc>>,
    /// Whether any fetch has ever succeeded for this report. Until it has,
    /// transport failures escalate instead of being swallowed.
    pub ever_synced: bool,
    pub consecutive_failures: u32,
}

impl ReportView {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            state: None,
            last_synced: None,
            ever_synced: false,
            consecutive_failures: 0,
        }
    }

    /// Status as far as we know; an absent report is uninitialized.
    pub fn report_status(&self) -> ReportStatus {
        self.state
            .as_ref()
            .map(|s| s.report_status)
            .unwrap_or(ReportStatus::Uninitialized)
    }
}

/// Remote always wins. Pure except for the sync timestamp.
pub fn reconcile(view: &ReportView, observation: Observation) -> ReportView {
    let state = match observation {
        Observation::Found(remote) => {
            if let Some(local) = &view.state {
                if local.report_status != remote.report_status {
                    debug!(
                        session_id = %view.session_id,
                        from = %local.report_status,
                        to = %remote.report_status,
                        "report status changed on sync"
                    );
                }
            }
            Some(remote)
        }
        Observation::Absent => None,
    };
    ReportView {
        session_id: view.session_id.clone(),
        state,
        last_synced: Some(Utc::now()),
        ever_synced: true,
        consecutive_failures: 0,
    }
}

/// A fetch failed in transit. The snapshot is kept as-is; only health
/// accounting changes.
pub fn record_sync_failure(view: &ReportView) -> ReportView {
    ReportView {
        consecutive_failures: view.consecutive_failures.saturating_add(1),
        ..view.clone()
    }
}

/// Transient transport errors are swallowed once any sync has succeeded.
/// Before that, `threshold` consecutive failures escalate to a visible error
/// with manual retry.
pub fn should_escalate(view: &ReportView, threshold: u32) -> bool {
    !view.ever_synced && view.consecutive_failures >= threshold
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::types::{Section, SectionStatus};

    fn state(status: ReportStatus, section_status: SectionStatus) -> ReportState {
        ReportState {
            session_id: "s-1".to_string(),
            user_confirmed_start: true,
            report_status: status,
            sections: vec![Section {
                section_id: "intro".to_string(),
                title: "Introduction".to_string(),
                description: String::new(),
                status: section_status,
                content: None,
                revision: 0,
                max_revisions: 3,
                depends_on: vec![],
                history: vec![],
            }],
        }
    }

    #[test]
    fn test_remote_wins_over_optimistic_local() {
        let mut view = ReportView::new("s-1");
        // Optimistic: the UI showed generating right after issuing the command.
        view.state = Some(state(ReportStatus::InProgress, SectionStatus::Generating));

        // Server truth disagrees (the command actually failed server-side).
        let remote = state(ReportStatus::InProgress, SectionStatus::Planned);
        let next = reconcile(&view, Observation::Found(remote.clone()));
        assert_eq!(next.state, Some(remote));
        assert!(next.ever_synced);
        assert_eq!(next.consecutive_failures, 0);
    }

    #[test]
    fn test_reconcile_is_idempotent_on_state() {
        let view = ReportView::new("s-1");
        let remote = state(ReportStatus::InProgress, SectionStatus::Review);
        let once = reconcile(&view, Observation::Found(remote.clone()));
        let twice = reconcile(&once, Observation::Found(remote));
        assert_eq!(once.state, twice.state);
        assert_eq!(once.ever_synced, twice.ever_synced);
        assert_eq!(once.consecutive_failures, twice.consecutive_failures);
    }

    #[test]
    fn test_absent_is_a_valid_observation() {
        let view = ReportView::new("s-1");
        let next = reconcile(&view, Observation::Absent);
        assert_eq!(next.state, None);
        assert!(next.ever_synced);
        assert_eq!(next.report_status(), ReportStatus::Uninitialized);
    }

    #[test]
    fn test_absent_replaces_stale_state() {
        let mut view = ReportView::new("s-1");
        view.state = Some(state(ReportStatus::InProgress, SectionStatus::Review));
        let next = reconcile(&view, Observation::Absent);
        assert_eq!(next.state, None);
    }

    #[test]
    fn test_failure_accounting_and_escalation() {
        let view = ReportView::new("s-1");
        let v1 = record_sync_failure(&view);
        let v2 = record_sync_failure(&v1);
        let v3 = record_sync_failure(&v2);
        assert_eq!(v3.consecutive_failures, 3);
        assert!(!should_escalate(&v2, 3));
        assert!(should_escalate(&v3, 3));

        // After one success, failures are swallowed for good.
        let synced = reconcile(&v3, Observation::Absent);
        let failed_again = record_sync_failure(&synced);
        assert!(!should_escalate(&failed_again, 1));
        // The stale snapshot survives a failed fetch untouched.
        assert_eq!(failed_again.state, synced.state);
    }
}
