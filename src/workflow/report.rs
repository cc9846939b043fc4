//! Report-level status derivation and gating of the finalize/export protocol.
//!
//! The pure part of `report_status` (uninitialized / in_progress /
//! awaiting_final_review) is a function of section statuses and the start
//! gate. The transients (`validating`, `finalizing`) and the terminal
//! `completed`/`failed` outcomes are produced server-side during finalize;
//! locally we only gate actions on them and flag drift on the pure part.

use thiserror::Error;

use crate::backend::types::{ReportState, ReportStatus};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReportGateError {
    #[error("report is {actual}; finalize requires awaiting_final_review")]
    FinalizeUnavailable { actual: ReportStatus },

    #[error("finalize is already underway; wait for the report to leave {actual}")]
    FinalizeOutstanding { actual: ReportStatus },

    #[error("report is {actual}; export requires completed")]
    ExportUnavailable { actual: ReportStatus },

    #[error("report is {actual}; sections can no longer be modified")]
    SectionsImmutable { actual: ReportStatus },
}

/// What the section statuses alone say the report status should be.
/// Transient and terminal finalize states are not derivable; callers compare
/// against this only when the observed status is itself non-transient.
pub fn derived_status(state: &ReportState) -> ReportStatus {
    if !state.user_confirmed_start {
        return ReportStatus::Uninitialized;
    }
    if state.all_accepted() {
        ReportStatus::AwaitingFinalReview
    } else {
        ReportStatus::InProgress
    }
}

/// Observed vs derived disagreement on the pure part of the status function.
/// Returns `Some((observed, derived))` when the server reports a
/// non-finalize-protocol status that section states cannot explain.
pub fn status_drift(state: &ReportState) -> Option<(ReportStatus, ReportStatus)> {
    match state.report_status {
        ReportStatus::Validating
        | ReportStatus::Finalizing
        | ReportStatus::Completed
        | ReportStatus::Failed => None,
        observed => {
            let derived = derived_status(state);
            (observed != derived).then_some((observed, derived))
        }
    }
}

/// Section-mutating commands are valid only outside the finalize protocol
/// and before completion. `failed` stays mutable: remediation is explicitly
/// per-section editing.
pub fn sections_mutable(status: ReportStatus) -> bool {
    !matches!(
        status,
        ReportStatus::Uninitialized
            | ReportStatus::Validating
            | ReportStatus::Finalizing
            | ReportStatus::Completed
    )
}

pub fn ensure_sections_mutable(state: &ReportState) -> Result<(), ReportGateError> {
    if sections_mutable(state.report_status) {
        Ok(())
    } else {
        Err(ReportGateError::SectionsImmutable {
            actual: state.report_status,
        })
    }
}

/// `finalize` is valid exactly once per pass: only from
/// `awaiting_final_review`, and never reissued while a prior finalize is
/// still in `validating`/`finalizing`.
pub fn can_finalize(state: &ReportState) -> Result<(), ReportGateError> {
    match state.report_status {
        ReportStatus::AwaitingFinalReview => Ok(()),
        status if status.is_finalize_transient() => {
            Err(ReportGateError::FinalizeOutstanding { actual: status })
        }
        status => Err(ReportGateError::FinalizeUnavailable { actual: status }),
    }
}

/// Whole-document export is valid only once finalize has succeeded.
pub fn can_export(state: &ReportState) -> Result<(), ReportGateError> {
    match state.report_status {
        ReportStatus::Completed => Ok(()),
        status => Err(ReportGateError::ExportUnavailable { actual: status }),
    }
}

/// Work the server is progressing on its own: an in-flight generation or the
/// finalize protocol. While this is true the sync loop keeps polling.
pub fn has_outstanding_work(state: &ReportState) -> bool {
    state.any_generating() || state.report_status.is_finalize_transient()
}

/// Quiescent reports stop the polling timer: every remaining change requires
/// a local user command, which triggers its own immediate resync.
pub fn is_quiescent(state: Option<&ReportState>) -> bool {
    match state {
        None => true,
        Some(state) => !has_outstanding_work(state),
    }
}
