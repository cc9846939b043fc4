//! Polling discipline for observing the backend.
//!
//! Generation and finalize run out-of-process in the backend; completion is
//! only ever observed, never pushed. The loop polls while the server is
//! progressing work on its own (a section `generating`, a finalize in
//! `validating`/`finalizing`) and stops the moment every remaining change
//! would require a local user command, since commands trigger their own
//! immediate resync. Tearing the loop down is a pure read with no side
//! effects.

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::backend::client::ReportBackend;
use crate::backend::errors::BackendError;
use crate::workflow::reconcile::{
    reconcile, record_sync_failure, should_escalate, Observation,
};
use crate::workflow::report::is_quiescent;
use crate::workflow::store::SharedReportView;

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Base delay between polls while work is outstanding.
    pub poll_interval_ms: u64,
    /// Ceiling for the backoff applied on consecutive transport failures.
    pub max_backoff_ms: u64,
    /// Consecutive failures tolerated before the first-ever successful sync
    /// escalates to a visible error.
    pub escalation_attempts: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2_000,
            max_backoff_ms: 30_000,
            escalation_attempts: 3,
        }
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    /// No fetch has ever succeeded for this report. Unlike a transient
    /// failure mid-flight, there is no stale snapshot to fall back on.
    #[error(
        "could not reach the backend for session '{session_id}' after {attempts} attempts: {last_error}"
    )]
    NeverSynced {
        session_id: String,
        attempts: u32,
        last_error: String,
    },
}

/// One fetch-and-reconcile round trip. Server state wins wholesale; a
/// transport failure keeps the last snapshot and bumps the failure count.
pub async fn sync_once(
    backend: &dyn ReportBackend,
    view: &SharedReportView,
) -> Result<(), BackendError> {
    let session_id = view.read().await.session_id.clone();
    match backend.get_state(&session_id).await {
        Ok(Some(state)) => {
            let mut guard = view.write().await;
            let next = reconcile(&guard, Observation::Found(state));
            *guard = next;
            Ok(())
        }
        Ok(None) => {
            // Not yet initialized: a real observation, not a failure.
            let mut guard = view.write().await;
            let next = reconcile(&guard, Observation::Absent);
            *guard = next;
            Ok(())
        }
        Err(e) => {
            let mut guard = view.write().await;
            let next = record_sync_failure(&guard);
            *guard = next;
            Err(e)
        }
    }
}

/// Timer-driven observation of one report.
pub struct SyncLoop {
    backend: Arc<dyn ReportBackend>,
    view: SharedReportView,
    config: SyncConfig,
    is_running: Arc<RwLock<bool>>,
}

impl SyncLoop {
    pub fn new(backend: Arc<dyn ReportBackend>, view: SharedReportView, config: SyncConfig) -> Self {
        Self {
            backend,
            view,
            config,
            is_running: Arc::new(RwLock::new(false)),
        }
    }

    /// Poll until the report is quiescent, a stop is requested, or the
    /// first-sync escalation threshold is crossed.
    pub async fn run_until_quiescent(&self) -> Result<(), SyncError> {
        *self.is_running.write().await = true;

        loop {
            if !*self.is_running.read().await {
                debug!("sync loop stopped on request");
                return Ok(());
            }

            match sync_once(self.backend.as_ref(), &self.view).await {
                Ok(()) => {}
                Err(e) => {
                    let guard = self.view.read().await;
                    if should_escalate(&guard, self.config.escalation_attempts) {
                        return Err(SyncError::NeverSynced {
                            session_id: guard.session_id.clone(),
                            attempts: guard.consecutive_failures,
                            last_error: e.to_string(),
                        });
                    }
                    // Transient and survivable: the stale snapshot stands.
                    warn!(
                        session_id = %guard.session_id,
                        consecutive_failures = guard.consecutive_failures,
                        error = %e,
                        "sync failed; keeping last snapshot"
                    );
                }
            }

            let snapshot = self.view.read().await.clone();
            if snapshot.ever_synced && is_quiescent(snapshot.state.as_ref()) {
                info!(
                    session_id = %snapshot.session_id,
                    report_status = %snapshot.report_status(),
                    "report quiescent; stopping poll timer"
                );
                *self.is_running.write().await = false;
                return Ok(());
            }

            tokio::time::sleep(self.next_delay(snapshot.consecutive_failures)).await;
        }
    }

    /// Request the loop to stop at its next iteration. Side-effect free.
    pub async fn stop(&self) {
        *self.is_running.write().await = false;
    }

    /// Base interval, doubled per consecutive failure up to the cap, plus
    /// jitter so a fleet of clients does not stampede a recovering backend.
    fn next_delay(&self, consecutive_failures: u32) -> Duration {
        let base = self.config.poll_interval_ms.max(1);
        let backed_off = base
            .saturating_mul(1u64 << consecutive_failures.min(5))
            .min(self.config.max_backoff_ms.max(base));
        let jitter = rand::rng().random_range(0..=base / 4);
        Duration::from_millis(backed_off + jitter)
    }
}
