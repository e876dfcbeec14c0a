use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use colored::*;
use setuplive::client::{HttpProgressSource, ReportClient};
use setuplive::poll::{self, ConnectionStatus, PollEvent, Poller};
use setuplive::{
    CompletionNotice, ErrorLogEntry, Phase, ProgressError, ProgressRecord, SessionId, ToolState,
    ToolStatus,
};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use url::Url;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Base URL of the synchronization service
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    base_url: Url,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Watch a session's live progress until it completes
    Watch { session_id: String },
    /// Print a session's error log
    Errors { session_id: String },
    /// Drive a scripted installer run against the service
    Simulate {
        /// Session id to report under; generated when omitted
        #[arg(long)]
        session_id: Option<String>,
        /// Delay between reported steps, in milliseconds
        #[arg(long, default_value_t = 1500)]
        step_delay_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Watch { session_id } => watch(cli.base_url, &session_id).await,
        Commands::Errors { session_id } => errors(cli.base_url, &session_id).await,
        Commands::Simulate {
            session_id,
            step_delay_ms,
        } => simulate(cli.base_url, session_id, step_delay_ms).await,
    }
}

async fn watch(base_url: Url, session_id: &str) -> Result<()> {
    let session = SessionId::from_str(session_id);
    println!(
        "{} {}",
        "Watching session".bold(),
        session.as_str().cyan()
    );

    let cancel = CancellationToken::new();
    let (events_tx, mut events) = mpsc::channel(32);
    let (ticks_tx, mut ticks) = mpsc::channel(8);

    let poller = Poller::new(HttpProgressSource::new(base_url), session);
    let poll_task = tokio::spawn(poller.run(events_tx, cancel.clone()));
    tokio::spawn(poll::elapsed_ticker(ticks_tx, cancel.clone()));

    let mut elapsed = 0u64;
    let mut last_status: Option<ConnectionStatus> = None;
    let mut last_snapshot: Option<ProgressRecord> = None;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("{}", "Interrupted, stopping watch.".yellow());
                break;
            }
            Some(tick) = ticks.recv() => {
                elapsed = tick;
            }
            event = events.recv() => match event {
                None => break,
                Some(PollEvent::Status(status)) => {
                    // The polling status flips every interval; only report changes.
                    if last_status != Some(status) {
                        render_status(status, elapsed);
                        last_status = Some(status);
                    }
                }
                Some(PollEvent::Snapshot(record)) => {
                    if last_snapshot.as_ref() != Some(&record) {
                        render_snapshot(&record, elapsed);
                        last_snapshot = Some(record);
                    }
                }
                Some(PollEvent::Complete(record)) => {
                    render_snapshot(&record, elapsed);
                    println!(
                        "\n{} after {}",
                        "Setup complete".green().bold(),
                        format_elapsed(elapsed)
                    );
                    break;
                }
                Some(PollEvent::GaveUp) => {
                    println!(
                        "\n{}",
                        "Session not found: it doesn't exist or has expired.".red()
                    );
                    break;
                }
            }
        }
    }

    cancel.cancel();
    let _ = poll_task.await;
    Ok(())
}

async fn errors(base_url: Url, session_id: &str) -> Result<()> {
    let client = ReportClient::new(base_url);
    let log = client
        .read_log(&SessionId::from_str(session_id))
        .await
        .context("failed to fetch error log")?;

    if log.is_empty() {
        println!("{}", "No errors logged for this session.".green());
        return Ok(());
    }

    for entry in &log {
        println!(
            "{} {} (step {})",
            "✗".red(),
            entry.tool.bold(),
            entry.step
        );
        println!("  {}", entry.error.red());
        println!("  {} {}", "Fix:".green(), entry.suggested_fix);
    }
    println!("\n{} error(s) total", log.len());
    Ok(())
}

/// Plays a short scripted installer run: progress updates, one failure
/// with a log entry, then completion and a best-effort notification.
async fn simulate(base_url: Url, session_id: Option<String>, step_delay_ms: u64) -> Result<()> {
    let session = match session_id {
        Some(id) => SessionId::from_str(&id),
        None => SessionId::generate(),
    };
    let client = ReportClient::new(base_url);
    let delay = Duration::from_millis(step_delay_ms);

    println!("Simulating installer run for session {}", session.as_str().cyan());

    let tools = ["git", "node", "gh", "claude"];
    let mut tool_status: BTreeMap<String, ToolState> = tools
        .iter()
        .map(|t| (t.to_string(), state(ToolStatus::Pending, None, None)))
        .collect();

    for (i, tool) in tools.iter().enumerate() {
        let step = i as u64 + 1;
        tool_status.insert(tool.to_string(), state(ToolStatus::Installing, None, None));
        client
            .post_record(&record(&session, step, &tool_status, vec![], false))
            .await
            .with_context(|| format!("failed to report step {step}"))?;
        println!("  step {step}: installing {tool}");
        tokio::time::sleep(delay).await;

        // The third tool fails once, to exercise the error paths.
        if *tool == "gh" {
            tool_status.insert(
                tool.to_string(),
                state(ToolStatus::Error, None, Some("not found on PATH")),
            );
            let snapshot_error = ProgressError {
                tool: tool.to_string(),
                error: "not found on PATH".to_string(),
                suggested_fix: "brew install gh or winget install GitHub.cli".to_string(),
            };
            client
                .post_record(&record(
                    &session,
                    step,
                    &tool_status,
                    vec![snapshot_error.clone()],
                    false,
                ))
                .await
                .context("failed to report tool failure")?;
            let ack = client
                .append_log(
                    &session,
                    &ErrorLogEntry {
                        tool: snapshot_error.tool,
                        error: snapshot_error.error,
                        suggested_fix: snapshot_error.suggested_fix,
                        timestamp: Utc::now().to_rfc3339(),
                        step,
                    },
                )
                .await
                .context("failed to append error log entry")?;
            println!("  step {step}: {} ({} logged)", "gh failed".red(), ack.total_errors);
            tokio::time::sleep(delay).await;
        }

        tool_status.insert(
            tool.to_string(),
            state(ToolStatus::Success, Some("1.0.0"), None),
        );
    }

    let final_record = record(&session, tools.len() as u64, &tool_status, vec![], true);
    client
        .post_record(&final_record)
        .await
        .context("failed to report completion")?;

    // Completion notification is best-effort; a failure here is not a
    // failed simulation.
    let notice = CompletionNotice {
        session_id: session.clone(),
        client_email: None,
        os: None,
        tools_installed: Some(tools.len() as u64),
        errors: Some(1),
        duration_seconds: None,
    };
    if client.notify_complete(&notice).await.is_err() {
        println!("  {}", "completion notification failed (ignored)".yellow());
    }

    println!("{} session {}", "Run complete:".green().bold(), session.as_str());
    println!("Watch it with: slive watch {}", session.as_str());
    Ok(())
}

fn state(status: ToolStatus, version: Option<&str>, error: Option<&str>) -> ToolState {
    ToolState {
        status,
        version: version.map(str::to_string),
        error: error.map(str::to_string),
    }
}

fn record(
    session: &SessionId,
    step: u64,
    tool_status: &BTreeMap<String, ToolState>,
    errors: Vec<ProgressError>,
    complete: bool,
) -> ProgressRecord {
    ProgressRecord {
        session_id: session.clone(),
        current_step: step,
        completed_steps: (1..step).collect(),
        current_action: if complete {
            "Setup complete".to_string()
        } else {
            format!("Running setup step {step}")
        },
        tool_status: tool_status.clone(),
        errors,
        timestamp: Utc::now().to_rfc3339(),
        phase: Phase::Phase1,
        complete,
    }
}

fn render_status(status: ConnectionStatus, elapsed: u64) {
    let label = match status {
        ConnectionStatus::Connecting => "Connecting...".dimmed(),
        ConnectionStatus::Polling => "Polling...".dimmed(),
        ConnectionStatus::Connected => "Connected".green(),
        ConnectionStatus::Error => "Connection error, retrying".red(),
        ConnectionStatus::NotFound => "Session not found, waiting...".yellow(),
    };
    println!("[{}] {label}", format_elapsed(elapsed));
}

fn render_snapshot(record: &ProgressRecord, elapsed: u64) {
    println!(
        "\n[{}] step {} · {}",
        format_elapsed(elapsed),
        record.current_step,
        record.current_action.bold()
    );
    for (tool, state) in &record.tool_status {
        let icon = match state.status {
            ToolStatus::Success => "✓".green(),
            ToolStatus::Error => "✗".red(),
            ToolStatus::Installing => "⚙".cyan(),
            ToolStatus::Skipped => "–".dimmed(),
            ToolStatus::Pending => "○".dimmed(),
        };
        let version = state
            .version
            .as_deref()
            .map(|v| format!(" v{v}"))
            .unwrap_or_default();
        print!("  {icon} {tool}{version}");
        if let Some(error) = &state.error {
            print!(" ({})", error.red());
        }
        println!();
    }
    for err in &record.errors {
        println!(
            "  {} {}: {} — {} {}",
            "!".red(),
            err.tool,
            err.error,
            "Fix:".green(),
            err.suggested_fix
        );
    }
}

fn format_elapsed(seconds: u64) -> String {
    format!("{}:{:02}", seconds / 60, seconds % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_elapsed_pads_seconds() {
        assert_eq!(format_elapsed(0), "0:00");
        assert_eq!(format_elapsed(9), "0:09");
        assert_eq!(format_elapsed(61), "1:01");
        assert_eq!(format_elapsed(600), "10:00");
    }

    #[test]
    fn simulated_records_carry_completed_steps() {
        let session = SessionId::from_str("s1");
        let rec = record(&session, 3, &BTreeMap::new(), vec![], false);
        assert_eq!(rec.completed_steps, vec![1, 2]);
        assert!(!rec.complete);
    }
}
