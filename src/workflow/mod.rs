//! The report generation workflow engine.
//!
//! Layered leaves-first: `section` and `dependency` are pure rules over
//! snapshots, `report` derives aggregate status and gates the terminal
//! protocol, `reconcile`/`sync` keep the local view consistent with the
//! backend, and `orchestrator` is the validated command surface on top.

pub mod dependency;
pub mod orchestrator;
pub mod reconcile;
pub mod report;
pub mod section;
pub mod store;
pub mod sync;

pub use orchestrator::{ActionOrchestrator, CommandError};
pub use reconcile::{reconcile, Observation, ReportView};
pub use report::ReportGateError;
pub use section::{SectionCommandError, SectionEvent};
pub use store::{SessionStore, SharedReportView};
pub use sync::{SyncConfig, SyncError, SyncLoop};
