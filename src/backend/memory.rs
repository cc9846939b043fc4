//! In-process reference backend.
//!
//! Enforces the *server* side of every workflow rule: dependency gating,
//! revision budgets, conflict on duplicate generate, the finalize protocol
//! and export gating. Scenario tests run the real orchestrator against this
//! backend, and `--dry-run` style probes use it without touching a network.
//!
//! Generation normally resolves synchronously into `review` with
//! deterministic content. Tests that need to observe the `generating` and
//! `validating`/`finalizing` windows switch to manual resolution and drive
//! completion through the hook methods.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;
use tracing::debug;

use super::client::ReportBackend;
use super::errors::BackendError;
use super::types::{ExportFormat, ReportState, ReportStatus, Section, SectionStatus};
use crate::workflow::report::{
    can_export, can_finalize, derived_status, ensure_sections_mutable, ReportGateError,
};
use crate::workflow::section::{
    transition, validate_generate, validate_reset, validate_review, SectionCommandError,
    SectionEvent,
};

/// Authoring plan for one section; what `init` instantiates.
#[derive(Debug, Clone)]
pub struct SectionPlan {
    pub section_id: String,
    pub title: String,
    pub description: String,
    pub max_revisions: u32,
    pub depends_on: Vec<String>,
}

impl SectionPlan {
    pub fn new(section_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            section_id: section_id.into(),
            title: title.into(),
            description: String::new(),
            max_revisions: 3,
            depends_on: vec![],
        }
    }

    pub fn depends_on(mut self, deps: &[&str]) -> Self {
        self.depends_on = deps.iter().map(|d| d.to_string()).collect();
        self
    }

    pub fn max_revisions(mut self, max: u32) -> Self {
        self.max_revisions = max;
        self
    }
}

#[derive(Default)]
struct Inner {
    reports: HashMap<String, ReportState>,
    /// Section ids whose next generation attempt resolves to `error`.
    scripted_failures: HashSet<String>,
    /// Sections whose generation stays in `generating` until resolved by hook.
    manual_sections: HashSet<String>,
    /// Reviewer feedback awaiting the next regeneration, steering input only.
    pending_feedback: HashMap<(String, String), String>,
    snapshot_counter: u64,
    manual_finalize: bool,
}

pub struct MemoryBackend {
    plan: Vec<SectionPlan>,
    supported_formats: Vec<ExportFormat>,
    inner: Mutex<Inner>,
}

const MODEL_NAME: &str = "galley-engine-1";

impl MemoryBackend {
    pub fn new(plan: Vec<SectionPlan>) -> Self {
        Self {
            plan,
            supported_formats: vec![ExportFormat::Markdown, ExportFormat::Docx, ExportFormat::Pdf],
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn with_supported_formats(mut self, formats: Vec<ExportFormat>) -> Self {
        self.supported_formats = formats;
        self
    }

    /// Script the next generation attempt of `section_id` to fail.
    pub async fn fail_next_generation(&self, section_id: &str) {
        self.inner
            .lock()
            .await
            .scripted_failures
            .insert(section_id.to_string());
    }

    /// Leave `section_id` in `generating` until [`resolve_generation`] is
    /// called. Models the real asynchronous engine.
    ///
    /// [`resolve_generation`]: MemoryBackend::resolve_generation
    pub async fn hold_generation(&self, section_id: &str) {
        self.inner
            .lock()
            .await
            .manual_sections
            .insert(section_id.to_string());
    }

    /// Resolve a held generation with success or failure.
    pub async fn resolve_generation(
        &self,
        session_id: &str,
        section_id: &str,
        outcome: Result<&str, &str>,
    ) -> Result<(), BackendError> {
        let mut inner = self.inner.lock().await;
        let snapshot_ref = Inner::next_snapshot_ref(&mut inner);
        let report = inner.reports.get_mut(session_id).ok_or(BackendError::NotFound {
            session_id: session_id.to_string(),
        })?;
        let section = report
            .section_mut(section_id)
            .ok_or_else(|| unknown_section(section_id))?;
        let event = match outcome {
            Ok(content) => SectionEvent::GenerationSucceeded {
                content: content.to_string(),
                content_snapshot_ref: snapshot_ref,
                model_name: MODEL_NAME.to_string(),
            },
            Err(message) => SectionEvent::GenerationFailed {
                message: message.to_string(),
            },
        };
        transition(section, &event).map_err(section_error)?;
        Inner::refresh_report_status(report);
        Ok(())
    }

    /// Keep the report in `validating` after finalize until
    /// [`resolve_finalize`] is called.
    ///
    /// [`resolve_finalize`]: MemoryBackend::resolve_finalize
    pub async fn hold_finalize(&self) {
        self.inner.lock().await.manual_finalize = true;
    }

    /// Complete a held finalize with success (`completed`) or failure
    /// (`failed`). Failure touches no section state.
    pub async fn resolve_finalize(
        &self,
        session_id: &str,
        success: bool,
    ) -> Result<(), BackendError> {
        let mut inner = self.inner.lock().await;
        let report = inner.reports.get_mut(session_id).ok_or(BackendError::NotFound {
            session_id: session_id.to_string(),
        })?;
        if !report.report_status.is_finalize_transient() {
            return Err(BackendError::Validation {
                message: format!("report is {}, no finalize outstanding", report.report_status),
            });
        }
        report.report_status = if success {
            ReportStatus::Completed
        } else {
            ReportStatus::Failed
        };
        Ok(())
    }

    fn blank_report(&self, session_id: &str, confirmed: bool) -> ReportState {
        ReportState {
            session_id: session_id.to_string(),
            user_confirmed_start: confirmed,
            report_status: if confirmed {
                ReportStatus::InProgress
            } else {
                ReportStatus::Uninitialized
            },
            sections: self
                .plan
                .iter()
                .map(|p| Section {
                    section_id: p.section_id.clone(),
                    title: p.title.clone(),
                    description: p.description.clone(),
                    status: SectionStatus::Planned,
                    content: None,
                    revision: 0,
                    max_revisions: p.max_revisions,
                    depends_on: p.depends_on.clone(),
                    history: vec![],
                })
                .collect(),
        }
    }
}

impl Inner {
    fn next_snapshot_ref(inner: &mut Inner) -> String {
        inner.snapshot_counter += 1;
        format!("snap-{:04}", inner.snapshot_counter)
    }

    /// Recompute the pure part of the report status after a successful
    /// section mutation. Finalize transients and `completed` are protocol
    /// states and are left alone; `failed` clears once the user edits again.
    fn refresh_report_status(report: &mut ReportState) {
        if report.report_status.is_finalize_transient()
            || report.report_status == ReportStatus::Completed
        {
            return;
        }
        report.report_status = derived_status(report);
    }
}

fn unknown_section(section_id: &str) -> BackendError {
    BackendError::Validation {
        message: format!("no section '{section_id}' in this report"),
    }
}

fn section_error(err: SectionCommandError) -> BackendError {
    BackendError::Validation {
        message: err.to_string(),
    }
}

fn gate_error(err: ReportGateError) -> BackendError {
    match err {
        ReportGateError::FinalizeOutstanding { .. } => BackendError::Conflict {
            message: err.to_string(),
        },
        other => BackendError::Validation {
            message: other.to_string(),
        },
    }
}

#[async_trait]
impl ReportBackend for MemoryBackend {
    async fn init(&self, session_id: &str, confirm: bool) -> Result<ReportState, BackendError> {
        let mut inner = self.inner.lock().await;
        if let Some(existing) = inner.reports.get(session_id) {
            return Ok(existing.clone());
        }
        let report = self.blank_report(session_id, confirm);
        if confirm {
            debug!(session_id, sections = report.sections.len(), "report initialized");
            inner.reports.insert(session_id.to_string(), report.clone());
        }
        // Dry-run probe: show what would be created, store nothing.
        Ok(report)
    }

    async fn get_state(&self, session_id: &str) -> Result<Option<ReportState>, BackendError> {
        Ok(self.inner.lock().await.reports.get(session_id).cloned())
    }

    async fn generate_section(
        &self,
        session_id: &str,
        section_id: &str,
    ) -> Result<Section, BackendError> {
        let mut inner = self.inner.lock().await;

        let feedback = inner
            .pending_feedback
            .remove(&(session_id.to_string(), section_id.to_string()));
        let scripted_failure = inner.scripted_failures.remove(section_id);
        let manual = inner.manual_sections.contains(section_id);
        let snapshot_ref = Inner::next_snapshot_ref(&mut inner);

        let report = inner.reports.get_mut(session_id).ok_or(BackendError::NotFound {
            session_id: session_id.to_string(),
        })?;
        ensure_sections_mutable(report).map_err(gate_error)?;

        let snapshot = report.clone();
        let section = report
            .section_mut(section_id)
            .ok_or_else(|| unknown_section(section_id))?;

        if section.status == SectionStatus::Generating {
            // Duplicate trigger is a conflict, never a queued second run.
            return Err(BackendError::Conflict {
                message: format!("section '{section_id}' is already generating"),
            });
        }
        validate_generate(section, &snapshot).map_err(section_error)?;

        transition(section, &SectionEvent::StartGeneration).map_err(section_error)?;

        if scripted_failure {
            transition(
                section,
                &SectionEvent::GenerationFailed {
                    message: "generation engine reported a failure".to_string(),
                },
            )
            .map_err(section_error)?;
        } else if !manual {
            let content = match feedback {
                Some(feedback) => format!(
                    "Revised draft of '{}' (rev {}) addressing: {}",
                    section.title,
                    section.revision,
                    feedback
                ),
                None => format!("Draft of '{}'", section.title),
            };
            transition(
                section,
                &SectionEvent::GenerationSucceeded {
                    content,
                    content_snapshot_ref: snapshot_ref,
                    model_name: MODEL_NAME.to_string(),
                },
            )
            .map_err(section_error)?;
        }

        let result = section.clone();
        Inner::refresh_report_status(report);
        Ok(result)
    }

    async fn submit_review(
        &self,
        session_id: &str,
        section_id: &str,
        accepted: bool,
        feedback: Option<&str>,
    ) -> Result<Section, BackendError> {
        let mut inner = self.inner.lock().await;
        let scripted_failure = inner.scripted_failures.remove(section_id);
        let manual = inner.manual_sections.contains(section_id);
        let snapshot_ref = Inner::next_snapshot_ref(&mut inner);

        let report = inner.reports.get_mut(session_id).ok_or(BackendError::NotFound {
            session_id: session_id.to_string(),
        })?;
        ensure_sections_mutable(report).map_err(gate_error)?;

        let section = report
            .section_mut(section_id)
            .ok_or_else(|| unknown_section(section_id))?;
        validate_review(section, accepted, feedback).map_err(section_error)?;

        if accepted {
            transition(section, &SectionEvent::Approve).map_err(section_error)?;
        } else {
            let feedback = feedback.expect("validated non-empty").to_string();
            transition(section, &SectionEvent::Reject { feedback: feedback.clone() })
                .map_err(section_error)?;

            // Feedback steers the regeneration the rejection just started.
            if scripted_failure {
                transition(
                    section,
                    &SectionEvent::GenerationFailed {
                        message: "generation engine reported a failure".to_string(),
                    },
                )
                .map_err(section_error)?;
            } else if manual {
                inner
                    .pending_feedback
                    .insert((session_id.to_string(), section_id.to_string()), feedback);
                // Re-borrow for the return clone below.
                let report = inner.reports.get_mut(session_id).expect("held above");
                let result = report.section(section_id).expect("held above").clone();
                Inner::refresh_report_status(report);
                return Ok(result);
            } else {
                let content = format!(
                    "Revised draft of '{}' (rev {}) addressing: {}",
                    section.title, section.revision, feedback
                );
                transition(
                    section,
                    &SectionEvent::GenerationSucceeded {
                        content,
                        content_snapshot_ref: snapshot_ref,
                        model_name: MODEL_NAME.to_string(),
                    },
                )
                .map_err(section_error)?;
            }
        }

        let result = section.clone();
        Inner::refresh_report_status(report);
        Ok(result)
    }

    async fn reset_section(
        &self,
        session_id: &str,
        section_id: &str,
        force: bool,
    ) -> Result<Section, BackendError> {
        let mut inner = self.inner.lock().await;
        let report = inner.reports.get_mut(session_id).ok_or(BackendError::NotFound {
            session_id: session_id.to_string(),
        })?;
        ensure_sections_mutable(report).map_err(gate_error)?;

        let section = report
            .section_mut(section_id)
            .ok_or_else(|| unknown_section(section_id))?;
        validate_reset(section, force).map_err(section_error)?;
        transition(section, &SectionEvent::Reset { force }).map_err(section_error)?;

        let result = section.clone();
        Inner::refresh_report_status(report);
        Ok(result)
    }

    async fn finalize(&self, session_id: &str) -> Result<ReportState, BackendError> {
        let mut inner = self.inner.lock().await;
        let manual = inner.manual_finalize;
        let report = inner.reports.get_mut(session_id).ok_or(BackendError::NotFound {
            session_id: session_id.to_string(),
        })?;
        can_finalize(report).map_err(gate_error)?;

        report.report_status = if manual {
            ReportStatus::Validating
        } else {
            // Assembly and validation run to completion in-process.
            ReportStatus::Completed
        };
        debug!(session_id, status = %report.report_status, "finalize accepted");
        Ok(report.clone())
    }

    async fn export(
        &self,
        session_id: &str,
        format: ExportFormat,
    ) -> Result<Vec<u8>, BackendError> {
        let inner = self.inner.lock().await;
        let report = inner.reports.get(session_id).ok_or(BackendError::NotFound {
            session_id: session_id.to_string(),
        })?;
        can_export(report).map_err(gate_error)?;

        if !self.supported_formats.contains(&format) {
            return Err(BackendError::UnsupportedFormat {
                format: format.to_string(),
            });
        }

        let mut document = String::new();
        for section in &report.sections {
            document.push_str(&format!("# {}\n\n", section.title));
            if let Some(content) = &section.content {
                document.push_str(content);
                document.push_str("\n\n");
            }
        }

        // Markdown is the native assembly; the binary formats wrap it behind
        // a recognizable magic prefix so artifacts stay distinguishable.
        let bytes = match format {
            ExportFormat::Markdown => document.into_bytes(),
            ExportFormat::Pdf => {
                let mut bytes = b"%PDF-1.4\n".to_vec();
                bytes.extend_from_slice(document.as_bytes());
                bytes
            }
            ExportFormat::Docx => {
                let mut bytes = b"PK\x03\x04".to_vec();
                bytes.extend_from_slice(document.as_bytes());
                bytes
            }
        };
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_section_plan() -> Vec<SectionPlan> {
        vec![
            SectionPlan::new("intro", "Introduction"),
            SectionPlan::new("body", "Findings").depends_on(&["intro"]),
        ]
    }

    #[tokio::test]
    async fn test_dry_run_probe_creates_nothing() {
        let backend = MemoryBackend::new(two_section_plan());
        let probe = backend.init("s-1", false).await.unwrap();
        assert_eq!(probe.report_status, ReportStatus::Uninitialized);
        assert!(!probe.user_confirmed_start);
        assert_eq!(backend.get_state("s-1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_confirmed_init_is_idempotent() {
        let backend = MemoryBackend::new(two_section_plan());
        let first = backend.init("s-1", true).await.unwrap();
        assert_eq!(first.report_status, ReportStatus::InProgress);

        backend.generate_section("s-1", "intro").await.unwrap();
        let second = backend.init("s-1", true).await.unwrap();
        // Re-init returns current truth, it does not recreate the report.
        assert_eq!(
            second.section("intro").unwrap().status,
            SectionStatus::Review
        );
    }

    #[tokio::test]
    async fn test_duplicate_generate_conflicts_without_mutation() {
        let backend = MemoryBackend::new(two_section_plan());
        backend.init("s-1", true).await.unwrap();
        backend.hold_generation("intro").await;

        backend.generate_section("s-1", "intro").await.unwrap();
        let err = backend.generate_section("s-1", "intro").await.unwrap_err();
        assert!(err.is_conflict());

        let state = backend.get_state("s-1").await.unwrap().unwrap();
        let intro = state.section("intro").unwrap();
        assert_eq!(intro.status, SectionStatus::Generating);
        assert!(intro.history.is_empty());
    }

    #[tokio::test]
    async fn test_generation_observed_through_polling() {
        let backend = MemoryBackend::new(two_section_plan());
        backend.init("s-1", true).await.unwrap();
        backend.hold_generation("intro").await;
        backend.generate_section("s-1", "intro").await.unwrap();

        backend
            .resolve_generation("s-1", "intro", Ok("drafted text"))
            .await
            .unwrap();
        let state = backend.get_state("s-1").await.unwrap().unwrap();
        let intro = state.section("intro").unwrap();
        assert_eq!(intro.status, SectionStatus::Review);
        assert_eq!(intro.content.as_deref(), Some("drafted text"));
        assert_eq!(intro.history.len(), 1);
        assert_eq!(intro.history[0].model_name, MODEL_NAME);
    }

    #[tokio::test]
    async fn test_finalize_failure_leaves_sections_alone() {
        let backend = MemoryBackend::new(vec![SectionPlan::new("intro", "Introduction")]);
        backend.init("s-1", true).await.unwrap();
        backend.generate_section("s-1", "intro").await.unwrap();
        backend
            .submit_review("s-1", "intro", true, None)
            .await
            .unwrap();

        backend.hold_finalize().await;
        let state = backend.finalize("s-1").await.unwrap();
        assert_eq!(state.report_status, ReportStatus::Validating);

        backend.resolve_finalize("s-1", false).await.unwrap();
        let state = backend.get_state("s-1").await.unwrap().unwrap();
        assert_eq!(state.report_status, ReportStatus::Failed);
        assert_eq!(
            state.section("intro").unwrap().status,
            SectionStatus::Accepted
        );
    }

    #[tokio::test]
    async fn test_unsupported_export_format_fails_cleanly() {
        let backend = MemoryBackend::new(vec![SectionPlan::new("intro", "Introduction")])
            .with_supported_formats(vec![ExportFormat::Markdown]);
        backend.init("s-1", true).await.unwrap();
        backend.generate_section("s-1", "intro").await.unwrap();
        backend
            .submit_review("s-1", "intro", true, None)
            .await
            .unwrap();
        backend.finalize("s-1").await.unwrap();

        let err = backend.export("s-1", ExportFormat::Pdf).await.unwrap_err();
        assert!(matches!(err, BackendError::UnsupportedFormat { .. }));

        let artifact = backend.export("s-1", ExportFormat::Markdown).await.unwrap();
        let text = String::from_utf8(artifact).unwrap();
        assert!(text.contains("# Introduction"));
    }
}
