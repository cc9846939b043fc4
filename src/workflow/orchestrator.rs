//! Validated command issuance.
//!
//! Every command runs the same discipline: an advisory precondition check
//! against the last known snapshot (fast feedback, never trusted), a
//! request-in-flight guard (one outstanding command per section, one
//! finalize per report), the authoritative backend call, and an immediate
//! resynchronization so the local view never trails truth by more than one
//! round trip. The backend's answer is what happened; the advisory check
//! only decides whether asking is worthwhile.

use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{warn, Instrument};

use crate::backend::client::ReportBackend;
use crate::backend::errors::BackendError;
use crate::backend::types::{ExportFormat, ReportState, Section};
use crate::telemetry::{create_command_span, generate_correlation_id};
use crate::workflow::reconcile::ReportView;
use crate::workflow::report::{
    can_export, can_finalize, ensure_sections_mutable, ReportGateError,
};
use crate::workflow::section::{
    validate_generate, validate_reset, validate_review, SectionCommandError,
};
use crate::workflow::store::SharedReportView;
use crate::workflow::sync::sync_once;

#[derive(Debug, Error)]
pub enum CommandError {
    /// A prior command's round trip for this section is still outstanding.
    #[error("a command is already in flight for section '{section_id}'")]
    SectionBusy { section_id: String },

    #[error("a finalize request is already in flight")]
    FinalizeBusy,

    /// Local advisory validation failed; the backend was never asked.
    #[error(transparent)]
    Precondition(#[from] SectionCommandError),

    #[error(transparent)]
    Gate(#[from] ReportGateError),

    /// The backend's authoritative answer.
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl CommandError {
    /// Conflicts mean someone else is already handling it: the caller should
    /// present current truth, not a failure.
    pub fn is_conflict(&self) -> bool {
        matches!(self, CommandError::Backend(e) if e.is_conflict())
            || matches!(
                self,
                CommandError::SectionBusy { .. }
                    | CommandError::FinalizeBusy
                    | CommandError::Precondition(SectionCommandError::AlreadyGenerating { .. })
                    | CommandError::Gate(ReportGateError::FinalizeOutstanding { .. })
            )
    }
}

pub struct ActionOrchestrator {
    backend: Arc<dyn ReportBackend>,
    view: SharedReportView,
    in_flight: Mutex<HashSet<String>>,
    finalize_in_flight: Mutex<bool>,
}

impl ActionOrchestrator {
    pub fn new(backend: Arc<dyn ReportBackend>, view: SharedReportView) -> Self {
        Self {
            backend,
            view,
            in_flight: Mutex::new(HashSet::new()),
            finalize_in_flight: Mutex::new(false),
        }
    }

    /// First fetch on mount/attach. Unlike the polling loop, a failure here
    /// is surfaced: there is no snapshot yet to fall back on.
    pub async fn attach(&self) -> Result<ReportView, CommandError> {
        sync_once(self.backend.as_ref(), &self.view).await?;
        Ok(self.snapshot().await)
    }

    pub async fn snapshot(&self) -> ReportView {
        self.view.read().await.clone()
    }

    /// Create/confirm the report. `confirm = false` probes without creating
    /// persistent state and deliberately skips the resync (there is nothing
    /// new to absorb).
    pub async fn init(&self, confirm: bool) -> Result<ReportState, CommandError> {
        let session_id = self.session_id().await;
        let span = self.command_span("init", None).await;
        async {
            let result = self.backend.init(&session_id, confirm).await;
            if confirm {
                self.resync_after(result.as_ref().err()).await;
            }
            Ok(result?)
        }
        .instrument(span)
        .await
    }

    pub async fn generate(&self, section_id: &str) -> Result<Section, CommandError> {
        let session_id = self.session_id().await;
        let span = self.command_span("generate", Some(section_id)).await;
        async {
            if let Some(state) = self.current_state().await {
                ensure_sections_mutable(&state)?;
                if let Some(section) = state.section(section_id) {
                    validate_generate(section, &state)?;
                }
                // Unknown section locally: the snapshot may be stale, let
                // the backend answer.
            }

            self.with_section_guard(section_id, async {
                let result = self.backend.generate_section(&session_id, section_id).await;
                self.resync_after(result.as_ref().err()).await;
                Ok(result?)
            })
            .await
        }
        .instrument(span)
        .await
    }

    pub async fn submit_review(
        &self,
        section_id: &str,
        accepted: bool,
        feedback: Option<&str>,
    ) -> Result<Section, CommandError> {
        let session_id = self.session_id().await;
        let span = self.command_span("submit_review", Some(section_id)).await;
        async {
            if let Some(state) = self.current_state().await {
                ensure_sections_mutable(&state)?;
                if let Some(section) = state.section(section_id) {
                    validate_review(section, accepted, feedback)?;
                }
            }

            self.with_section_guard(section_id, async {
                let result = self
                    .backend
                    .submit_review(&session_id, section_id, accepted, feedback)
                    .await;
                self.resync_after(result.as_ref().err()).await;
                Ok(result?)
            })
            .await
        }
        .instrument(span)
        .await
    }

    pub async fn reset(&self, section_id: &str, force: bool) -> Result<Section, CommandError> {
        let session_id = self.session_id().await;
        let span = self.command_span("reset", Some(section_id)).await;
        async {
            if let Some(state) = self.current_state().await {
                ensure_sections_mutable(&state)?;
                if let Some(section) = state.section(section_id) {
                    validate_reset(section, force)?;
                }
            }

            self.with_section_guard(section_id, async {
                let result = self
                    .backend
                    .reset_section(&session_id, section_id, force)
                    .await;
                self.resync_after(result.as_ref().err()).await;
                Ok(result?)
            })
            .await
        }
        .instrument(span)
        .await
    }

    pub async fn finalize(&self) -> Result<ReportState, CommandError> {
        let session_id = self.session_id().await;
        let span = self.command_span("finalize", None).await;
        async {
            if let Some(state) = self.current_state().await {
                can_finalize(&state)?;
            }

            {
                let mut busy = self.finalize_in_flight.lock().await;
                if *busy {
                    return Err(CommandError::FinalizeBusy);
                }
                *busy = true;
            }
            let result = self.backend.finalize(&session_id).await;
            self.resync_after(result.as_ref().err()).await;
            *self.finalize_in_flight.lock().await = false;

            Ok(result?)
        }
        .instrument(span)
        .await
    }

    pub async fn export(&self, format: ExportFormat) -> Result<Vec<u8>, CommandError> {
        let session_id = self.session_id().await;
        let span = self.command_span("export", None).await;
        async {
            if let Some(state) = self.current_state().await {
                can_export(&state)?;
            }

            let result = self.backend.export(&session_id, format).await;
            self.resync_after(result.as_ref().err()).await;
            Ok(result?)
        }
        .instrument(span)
        .await
    }

    async fn session_id(&self) -> String {
        self.view.read().await.session_id.clone()
    }

    async fn current_state(&self) -> Option<ReportState> {
        self.view.read().await.state.clone()
    }

    async fn command_span(&self, operation: &str, section_id: Option<&str>) -> tracing::Span {
        let session_id = self.session_id().await;
        create_command_span(
            operation,
            &session_id,
            section_id,
            &generate_correlation_id(),
        )
    }

    /// One outstanding round trip per section. Rapid repeated input gets a
    /// busy error instead of a doubled backend call.
    async fn with_section_guard<T>(
        &self,
        section_id: &str,
        fut: impl std::future::Future<Output = Result<T, CommandError>>,
    ) -> Result<T, CommandError> {
        {
            let mut in_flight = self.in_flight.lock().await;
            if !in_flight.insert(section_id.to_string()) {
                return Err(CommandError::SectionBusy {
                    section_id: section_id.to_string(),
                });
            }
        }
        let result = fut.await;
        self.in_flight.lock().await.remove(section_id);
        result
    }

    /// Resync on success and on every failure that carries information about
    /// current server state. A transport failure is the one case where
    /// re-fetching immediately is pointless: the backend is unreachable.
    async fn resync_after(&self, error: Option<&BackendError>) {
        if matches!(error, Some(BackendError::Transport { .. })) {
            return;
        }
        if let Err(e) = sync_once(self.backend.as_ref(), &self.view).await {
            warn!(error = %e, "post-command resync failed; view may lag one round trip");
        }
    }
}
