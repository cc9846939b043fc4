//! Wire types shared with the report generation backend.
//!
//! The backend owns the authoritative report; everything here is a snapshot
//! shape. Status fields are closed enums so an unexpected wire value is a
//! deserialization error instead of a silently ignored string.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a single report section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionStatus {
    Planned,
    Generating,
    Review,
    Accepted,
    Error,
}

impl SectionStatus {
    /// Section states from which `generate` may be issued.
    pub fn is_generatable(&self) -> bool {
        matches!(self, SectionStatus::Planned | SectionStatus::Error)
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, SectionStatus::Accepted)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SectionStatus::Planned => "planned",
            SectionStatus::Generating => "generating",
            SectionStatus::Review => "review",
            SectionStatus::Accepted => "accepted",
            SectionStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for SectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Report-level lifecycle. `Validating`, `Finalizing` and `Failed` are
/// computed server-side during the finalize protocol; the client only ever
/// observes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Uninitialized,
    InProgress,
    Validating,
    AwaitingFinalReview,
    Finalizing,
    Completed,
    Failed,
}

impl ReportStatus {
    /// True while the backend is running the finalize protocol.
    pub fn is_finalize_transient(&self) -> bool {
        matches!(self, ReportStatus::Validating | ReportStatus::Finalizing)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Uninitialized => "uninitialized",
            ReportStatus::InProgress => "in_progress",
            ReportStatus::Validating => "validating",
            ReportStatus::AwaitingFinalReview => "awaiting_final_review",
            ReportStatus::Finalizing => "finalizing",
            ReportStatus::Completed => "completed",
            ReportStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One prior generation attempt. Informational only; the backend keeps the
/// snapshot content itself, we only see the reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub content_snapshot_ref: String,
    pub model_name: String,
    pub timestamp: DateTime<Utc>,
}

/// One addressable unit of the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub section_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub status: SectionStatus,
    /// Present only once a generation attempt has completed.
    #[serde(default)]
    pub content: Option<String>,
    /// Regenerations consumed. The first draft is free; only rejections count.
    pub revision: u32,
    pub max_revisions: u32,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

impl Section {
    pub fn revisions_remaining(&self) -> u32 {
        self.max_revisions.saturating_sub(self.revision)
    }
}

/// Full authoritative snapshot of one report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportState {
    pub session_id: String,
    pub user_confirmed_start: bool,
    pub report_status: ReportStatus,
    /// Fixed authoring order, not a priority queue.
    pub sections: Vec<Section>,
}

impl ReportState {
    pub fn section(&self, section_id: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.section_id == section_id)
    }

    pub fn section_mut(&mut self, section_id: &str) -> Option<&mut Section> {
        self.sections.iter_mut().find(|s| s.section_id == section_id)
    }

    pub fn any_generating(&self) -> bool {
        self.sections
            .iter()
            .any(|s| s.status == SectionStatus::Generating)
    }

    pub fn all_accepted(&self) -> bool {
        !self.sections.is_empty() && self.sections.iter().all(|s| s.status.is_accepted())
    }
}

/// Export artifact formats the protocol enumerates. Backend support for each
/// may vary; an unsupported request fails with a typed error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    Markdown,
    Docx,
    Pdf,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Markdown => "markdown",
            ExportFormat::Docx => "docx",
            ExportFormat::Pdf => "pdf",
        }
    }

    /// File extension for artifacts written to disk.
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Markdown => "md",
            ExportFormat::Docx => "docx",
            ExportFormat::Pdf => "pdf",
        }
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "markdown" | "md" => Ok(ExportFormat::Markdown),
            "docx" => Ok(ExportFormat::Docx),
            "pdf" => Ok(ExportFormat::Pdf),
            other => Err(format!(
                "unknown export format '{other}' (expected markdown, docx or pdf)"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_wire_spelling() {
        let json = serde_json::to_string(&SectionStatus::Generating).unwrap();
        assert_eq!(json, "\"generating\"");
        let json = serde_json::to_string(&ReportStatus::AwaitingFinalReview).unwrap();
        assert_eq!(json, "\"awaiting_final_review\"");
    }

    #[test]
    fn test_unknown_status_is_a_parse_error() {
        let parsed: Result<SectionStatus, _> = serde_json::from_str("\"queued\"");
        assert!(parsed.is_err());
    }

    #[test]
    fn test_section_optional_fields_default() {
        let section: Section = serde_json::from_value(serde_json::json!({
            "section_id": "intro",
            "title": "Introduction",
            "status": "planned",
            "revision": 0,
            "max_revisions": 3
        }))
        .unwrap();
        assert_eq!(section.content, None);
        assert!(section.depends_on.is_empty());
        assert!(section.history.is_empty());
        assert_eq!(section.revisions_remaining(), 3);
    }

    #[test]
    fn test_export_format_parsing() {
        assert_eq!("md".parse::<ExportFormat>(), Ok(ExportFormat::Markdown));
        assert_eq!("PDF".parse::<ExportFormat>(), Ok(ExportFormat::Pdf));
        assert!("latex".parse::<ExportFormat>().is_err());
    }

    #[test]
    fn test_all_accepted_requires_nonempty_report() {
        let state = ReportState {
            session_id: "s-1".to_string(),
            user_confirmed_start: true,
            report_status: ReportStatus::InProgress,
            sections: vec![],
        };
        assert!(!state.all_accepted());
    }
}
