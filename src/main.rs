use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;

use galley::backend::{ExportFormat, HttpBackend, ReportBackend, ReportState};
use galley::workflow::dependency;
use galley::workflow::report::status_drift;
use galley::workflow::{
    ActionOrchestrator, CommandError, SessionStore, SharedReportView, SyncConfig, SyncLoop,
};

#[derive(Parser)]
#[command(name = "galley")]
#[command(about = "Section-based report generation workflow client")]
#[command(long_about = "Galley drives a research report through its section workflow: \
                       sections are drafted by the remote generation engine, reviewed and \
                       accepted under dependency ordering and revision budgets, then the \
                       finished report is finalized and exported. Start with 'galley status' \
                       to see where a report stands.")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display report status, section lifecycle and actionable sections
    Status {
        /// Research session the report belongs to
        #[arg(long)]
        session: String,
    },
    /// Create/confirm the report for a session
    Init {
        #[arg(long)]
        session: String,
        /// Probe what would be created without creating anything
        #[arg(long, help = "Show the planned report without creating persistent state")]
        dry_run: bool,
    },
    /// Trigger generation of one section
    Generate {
        #[arg(long)]
        session: String,
        /// Section to generate
        section: String,
    },
    /// Accept or reject a drafted section
    Review {
        #[arg(long)]
        session: String,
        section: String,
        /// Accept the draft as final
        #[arg(long, conflicts_with = "reject")]
        accept: bool,
        /// Reject the draft and regenerate
        #[arg(long)]
        reject: bool,
        /// Steering feedback for the regeneration (required with --reject)
        #[arg(long, help = "Why the draft was rejected; passed to the generation engine")]
        feedback: Option<String>,
    },
    /// Destructively return a section to planned
    Reset {
        #[arg(long)]
        session: String,
        section: String,
        /// Required to reset an accepted section
        #[arg(long, help = "Allow resetting a section that was already accepted")]
        force: bool,
    },
    /// Freeze all sections and assemble the complete document
    Finalize {
        #[arg(long)]
        session: String,
    },
    /// Produce a downloadable artifact of a finalized report
    Export {
        #[arg(long)]
        session: String,
        /// Artifact format: markdown, docx or pdf
        #[arg(long, default_value = "markdown")]
        format: ExportFormat,
        /// Output path (defaults to report-<session>.<ext>)
        #[arg(long)]
        out: Option<String>,
    },
    /// Poll the report until it goes quiescent, printing observed changes
    Watch {
        #[arg(long)]
        session: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    galley::init_telemetry()?;
    galley::init_config()?;

    let result = match cli.command {
        Commands::Status { session } => {
            tokio::runtime::Runtime::new()?.block_on(status_command(&session))
        }
        Commands::Init { session, dry_run } => {
            tokio::runtime::Runtime::new()?.block_on(init_command(&session, dry_run))
        }
        Commands::Generate { session, section } => {
            tokio::runtime::Runtime::new()?.block_on(generate_command(&session, &section))
        }
        Commands::Review {
            session,
            section,
            accept,
            reject,
            feedback,
        } => tokio::runtime::Runtime::new()?.block_on(review_command(
            &session,
            &section,
            accept,
            reject,
            feedback.as_deref(),
        )),
        Commands::Reset {
            session,
            section,
            force,
        } => tokio::runtime::Runtime::new()?.block_on(reset_command(&session, &section, force)),
        Commands::Finalize { session } => {
            tokio::runtime::Runtime::new()?.block_on(finalize_command(&session))
        }
        Commands::Export {
            session,
            format,
            out,
        } => tokio::runtime::Runtime::new()?.block_on(export_command(&session, format, out)),
        Commands::Watch { session } => {
            tokio::runtime::Runtime::new()?.block_on(watch_command(&session))
        }
    };

    galley::shutdown_telemetry();
    result
}

/// Wire one session's backend, view and orchestrator from configuration.
async fn open_session(
    session_id: &str,
) -> Result<(
    Arc<dyn ReportBackend>,
    SharedReportView,
    ActionOrchestrator,
    SyncConfig,
)> {
    let config = galley::config()?;
    let backend: Arc<dyn ReportBackend> = Arc::new(HttpBackend::new(
        &config.backend.base_url,
        config.backend.token.clone(),
        config.backend.rate_limit.requests_per_second,
        config.backend.rate_limit.burst_capacity,
    )?);

    let store = SessionStore::new();
    let view = store.view(session_id).await;
    let orchestrator = ActionOrchestrator::new(backend.clone(), view.clone());

    let sync_config = SyncConfig {
        poll_interval_ms: config.sync.poll_interval_ms,
        max_backoff_ms: config.sync.max_backoff_ms,
        escalation_attempts: config.sync.escalation_attempts,
    };
    Ok((backend, view, orchestrator, sync_config))
}

async fn status_command(session_id: &str) -> Result<()> {
    let (_, _, orchestrator, _) = open_session(session_id).await?;
    let view = orchestrator.attach().await.map_err(presentable)?;

    match view.state {
        None => {
            println!("📄 No report exists yet for session '{session_id}'");
            println!("   Run 'galley init --session {session_id}' to create one");
        }
        Some(state) => print_report(&state),
    }
    Ok(())
}

async fn init_command(session_id: &str, dry_run: bool) -> Result<()> {
    let (_, _, orchestrator, _) = open_session(session_id).await?;
    let _ = orchestrator.attach().await;

    let state = orchestrator.init(!dry_run).await.map_err(presentable)?;
    if dry_run {
        println!("🔍 Dry run: the report would contain {} sections", state.sections.len());
        for section in &state.sections {
            println!("   • {} ({})", section.title, section.section_id);
        }
        println!("   Nothing was created");
    } else {
        println!("✅ Report initialized for session '{session_id}'");
        print_report(&state);
    }
    Ok(())
}

async fn generate_command(session_id: &str, section_id: &str) -> Result<()> {
    let (_, _, orchestrator, _) = open_session(session_id).await?;
    orchestrator.attach().await.map_err(presentable)?;

    match orchestrator.generate(section_id).await {
        Ok(section) => {
            println!("🚀 Generation started for '{}' ({})", section.title, section.status);
            println!("   Run 'galley watch --session {session_id}' to follow progress");
            Ok(())
        }
        Err(e) => report_command_error(&orchestrator, e).await,
    }
}

async fn review_command(
    session_id: &str,
    section_id: &str,
    accept: bool,
    reject: bool,
    feedback: Option<&str>,
) -> Result<()> {
    if accept == reject {
        return Err(anyhow!("pass exactly one of --accept or --reject"));
    }
    if reject && feedback.map(str::trim).unwrap_or("").is_empty() {
        return Err(anyhow!("--reject requires non-empty --feedback"));
    }

    let (_, _, orchestrator, _) = open_session(session_id).await?;
    orchestrator.attach().await.map_err(presentable)?;

    match orchestrator.submit_review(section_id, accept, feedback).await {
        Ok(section) => {
            if accept {
                println!("✅ Section '{}' accepted", section.section_id);
            } else {
                println!(
                    "🔄 Section '{}' sent back for regeneration (revision {}/{})",
                    section.section_id, section.revision, section.max_revisions
                );
            }
            Ok(())
        }
        Err(e) => report_command_error(&orchestrator, e).await,
    }
}

async fn reset_command(session_id: &str, section_id: &str, force: bool) -> Result<()> {
    let (_, _, orchestrator, _) = open_session(session_id).await?;
    orchestrator.attach().await.map_err(presentable)?;

    match orchestrator.reset(section_id, force).await {
        Ok(section) => {
            println!(
                "🧹 Section '{}' reset to {} (content and history cleared)",
                section.section_id, section.status
            );
            Ok(())
        }
        Err(e) => report_command_error(&orchestrator, e).await,
    }
}

async fn finalize_command(session_id: &str) -> Result<()> {
    let (_, _, orchestrator, _) = open_session(session_id).await?;
    orchestrator.attach().await.map_err(presentable)?;

    match orchestrator.finalize().await {
        Ok(state) => {
            println!("📦 Finalize accepted; report is now {}", state.report_status);
            if state.report_status.is_finalize_transient() {
                println!("   Run 'galley watch --session {session_id}' to follow assembly");
            }
            Ok(())
        }
        Err(e) => report_command_error(&orchestrator, e).await,
    }
}

async fn export_command(
    session_id: &str,
    format: ExportFormat,
    out: Option<String>,
) -> Result<()> {
    let (_, _, orchestrator, _) = open_session(session_id).await?;
    orchestrator.attach().await.map_err(presentable)?;

    match orchestrator.export(format).await {
        Ok(artifact) => {
            let path = out.unwrap_or_else(|| {
                format!("report-{}.{}", session_id, format.extension())
            });
            tokio::fs::write(&path, &artifact).await?;
            println!("📄 Exported {} bytes of {} to {}", artifact.len(), format, path);
            Ok(())
        }
        Err(e) => report_command_error(&orchestrator, e).await,
    }
}

async fn watch_command(session_id: &str) -> Result<()> {
    let (backend, shared, orchestrator, sync_config) = open_session(session_id).await?;
    let view = orchestrator.attach().await.map_err(presentable)?;
    println!("👀 Watching session '{session_id}' (status: {})", view.report_status());

    let sync_loop = SyncLoop::new(backend, shared.clone(), sync_config);
    sync_loop.run_until_quiescent().await?;

    let settled = shared.read().await.clone();
    match settled.state {
        None => println!("💤 Report does not exist; nothing to watch"),
        Some(state) => {
            println!("💤 Report is quiescent at {}", state.report_status);
            print_report(&state);
        }
    }
    Ok(())
}

/// Conflicts resynchronize and present current truth instead of failing.
async fn report_command_error(
    orchestrator: &ActionOrchestrator,
    error: CommandError,
) -> Result<()> {
    if error.is_conflict() {
        println!("⏳ {error}");
        println!("   Someone or something is already handling this; showing current state");
        if let Some(state) = orchestrator.snapshot().await.state {
            print_report(&state);
        }
        return Ok(());
    }
    Err(presentable(error))
}

fn presentable(error: CommandError) -> anyhow::Error {
    anyhow!("{error}")
}

fn print_report(state: &ReportState) {
    println!();
    println!("📋 Report for session '{}'", state.session_id);
    println!("   Status: {}", state.report_status);

    if let Some((observed, derived)) = status_drift(state) {
        println!("   ⚠️  Server reports {observed} but section states imply {derived}");
    }
    if let Some(cycle) = dependency::dependency_cycle(state) {
        println!(
            "   ⚠️  Dependency cycle: {}; these sections can never unlock",
            cycle.join(" -> ")
        );
    }

    println!();
    for section in &state.sections {
        let blocking = dependency::blocking_dependencies(section, state);
        let lock = if blocking.is_empty() {
            String::new()
        } else {
            format!("  🔒 blocked by {}", blocking.join(", "))
        };
        println!(
            "   {:<24} {:<12} rev {}/{}{}",
            section.section_id,
            section.status.to_string(),
            section.revision,
            section.max_revisions,
            lock
        );
    }

    let actionable = dependency::actionable_sections(state);
    if !actionable.is_empty() {
        let ids: Vec<&str> = actionable.iter().map(|s| s.section_id.as_str()).collect();
        println!();
        println!("   Next up: {}", ids.join(", "));
    }
    println!();
}
