//! Session-scoped view storage.
//!
//! Workflow state belongs to one report/session, so views are keyed by
//! session identity and independently lockable. Nothing here is a
//! process-wide singleton; two concurrently open reports never share a lock.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use super::reconcile::ReportView;

/// One session's view, shared between its orchestrator and sync loop.
pub type SharedReportView = Arc<RwLock<ReportView>>;

#[derive(Default)]
pub struct SessionStore {
    views: Mutex<HashMap<String, SharedReportView>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the view for a session.
    pub async fn view(&self, session_id: &str) -> SharedReportView {
        let mut views = self.views.lock().await;
        views
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(ReportView::new(session_id))))
            .clone()
    }

    pub async fn open_sessions(&self) -> Vec<String> {
        self.views.lock().await.keys().cloned().collect()
    }

    /// Drop a session's view. Pure teardown: the backend is not contacted.
    pub async fn close(&self, session_id: &str) {
        self.views.lock().await.remove(session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_views_are_per_session_and_stable() {
        let store = SessionStore::new();
        let a1 = store.view("session-a").await;
        let a2 = store.view("session-a").await;
        let b = store.view("session-b").await;

        assert!(Arc::ptr_eq(&a1, &a2));
        assert!(!Arc::ptr_eq(&a1, &b));

        a1.write().await.consecutive_failures = 7;
        assert_eq!(a2.read().await.consecutive_failures, 7);
        assert_eq!(b.read().await.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_close_forgets_the_session() {
        let store = SessionStore::new();
        let before = store.view("session-a").await;
        before.write().await.consecutive_failures = 3;

        store.close("session-a").await;
        let after = store.view("session-a").await;
        assert_eq!(after.read().await.consecutive_failures, 0);
    }
}
