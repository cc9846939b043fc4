pub mod client;
pub mod errors;
pub mod memory;
pub mod types;

pub use client::{HttpBackend, ReportBackend};
pub use errors::BackendError;
pub use memory::{MemoryBackend, SectionPlan};
pub use types::{ExportFormat, HistoryEntry, ReportState, ReportStatus, Section, SectionStatus};
