// Galley Library - Section-Based Report Generation Workflow
// This exposes the core components for testing and integration

pub mod backend;
pub mod config;
pub mod telemetry;
pub mod workflow;

// Re-export key types for easy access
pub use backend::{
    BackendError, ExportFormat, HistoryEntry, HttpBackend, MemoryBackend, ReportBackend,
    ReportState, ReportStatus, Section, SectionPlan, SectionStatus,
};
pub use config::{config, init_config, GalleyConfig};
pub use telemetry::{create_command_span, generate_correlation_id, init_telemetry, shutdown_telemetry};
pub use workflow::{
    ActionOrchestrator, CommandError, Observation, ReportGateError, ReportView,
    SectionCommandError, SectionEvent, SessionStore, SharedReportView, SyncConfig, SyncError,
    SyncLoop,
};
