//! Recovery commands: status, recover, test-mode and fix.

use std::time::{Duration, Instant};

use anyhow::Result;
use clap::{Args, ValueEnum};
use serde::{Deserialize, Serialize};
use tabled::Tabled;

use super::config::CliSettings;
use crate::client::ApiClient;
use crate::output::{self, OutputFormat};

// ── API types ───────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub services_online: usize,
    pub total_services: usize,
    pub port_conflicts: usize,
    pub elapsed_time: u64,
    pub progress: u8,
    #[serde(default)]
    pub errors_found: usize,
    #[serde(default)]
    pub errors_fixed: usize,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub severity: String,
    pub remediation_action: String,
    pub message: String,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub id: String,
    pub title: String,
    pub error_id: String,
    pub status: String,
    pub progress: u8,
    #[serde(default)]
    pub failure_reason: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    pub state: String,
    pub message: String,
    pub test_mode: bool,
    #[serde(default)]
    pub stats: Stats,
    #[serde(default)]
    pub diagnostics: Vec<Diagnostic>,
    #[serde(default)]
    pub recovery_steps: Vec<Step>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

impl Status {
    fn is_finished(&self) -> bool {
        matches!(self.state.as_str(), "completed" | "failed")
    }
}

#[derive(Tabled)]
struct DiagnosticRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Type")]
    kind: String,
    #[tabled(rename = "Severity")]
    severity: String,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Message")]
    message: String,
}

#[derive(Tabled)]
struct StepRow {
    #[tabled(rename = "Step")]
    id: String,
    #[tabled(rename = "Title")]
    title: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Progress")]
    progress: String,
    #[tabled(rename = "Failure")]
    failure: String,
}

// ── Status ──────────────────────────────────────────────────────────────────

pub async fn status(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let status: Status = client.get_raw("/api/status").await?;
    match format {
        OutputFormat::Table => render_status(&status),
        _ => output::print_item(&status, format)?,
    }
    Ok(())
}

fn render_status(status: &Status) {
    output::print_header("Recovery Status");
    output::print_detail("State", &output::paint_state(&status.state));
    output::print_detail("Message", &status.message);
    output::print_detail("Test mode", if status.test_mode { "on" } else { "off" });
    if let Some(id) = &status.session_id {
        output::print_detail("Session", id);
    }

    let stats = &status.stats;
    output::print_detail(
        "Services",
        &format!("{}/{} online", stats.services_online, stats.total_services),
    );
    output::print_detail("Port conflicts", &stats.port_conflicts.to_string());
    output::print_detail(
        "Errors",
        &format!("{} found, {} fixed", stats.errors_found, stats.errors_fixed),
    );
    output::print_detail("Progress", &output::progress_bar(stats.progress));
    output::print_detail("Elapsed", &format!("{:.1}s", stats.elapsed_time as f64 / 1000.0));

    output::print_header("Diagnostics");
    let rows: Vec<_> = status
        .diagnostics
        .iter()
        .map(|d| DiagnosticRow {
            id: d.id.clone(),
            kind: d.kind.clone(),
            severity: output::paint_severity(&d.severity),
            action: d.remediation_action.clone(),
            message: d.message.clone(),
        })
        .collect();
    output::print_table(&rows, "No issues detected.");

    if !status.recovery_steps.is_empty() {
        output::print_header("Recovery Steps");
        let rows: Vec<_> = status.recovery_steps.iter().map(step_row).collect();
        output::print_table(&rows, "");
    }

    for warning in &status.warnings {
        output::print_warning(warning);
    }
}

fn step_row(step: &Step) -> StepRow {
    StepRow {
        id: step.id.clone(),
        title: step.title.clone(),
        status: output::paint_state(&step.status),
        progress: output::progress_bar(step.progress),
        failure: step.failure_reason.clone().unwrap_or_default(),
    }
}

// ── Recover ─────────────────────────────────────────────────────────────────

#[derive(Args)]
pub struct RecoverArgs {
    /// Enable fault injection for this and later sessions
    #[arg(long)]
    test_mode: bool,

    /// Poll until the session completes or fails
    #[arg(short, long)]
    wait: bool,

    /// Give up waiting after this many seconds
    #[arg(long)]
    timeout: Option<u64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StartRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    test_mode: Option<bool>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartResponse {
    session_id: String,
}

pub async fn recover(
    args: RecoverArgs,
    settings: &CliSettings,
    client: &ApiClient,
    format: OutputFormat,
) -> Result<()> {
    let request = StartRequest {
        test_mode: args.test_mode.then_some(true),
    };
    let (started, _): (StartResponse, _) = client.post("/api/start-recovery", &request).await?;

    if !args.wait {
        match format {
            OutputFormat::Table => {
                output::print_success(&format!("Recovery started (session {})", started.session_id))
            }
            _ => output::print_item(&serde_json::json!({ "sessionId": started.session_id }), format)?,
        }
        return Ok(());
    }

    if matches!(format, OutputFormat::Table) {
        output::print_info(&format!("Recovery started (session {}); waiting", started.session_id));
    }

    let timeout = Duration::from_secs(args.timeout.unwrap_or_else(|| settings.wait_timeout()));
    let status = wait_for_session(client, &started.session_id, settings.poll_interval(), timeout).await?;

    match format {
        OutputFormat::Table => {
            render_status(&status);
            println!();
            match (status.state.as_str(), status.warnings.is_empty()) {
                ("completed", true) => output::print_success("Recovery completed successfully"),
                ("completed", false) => output::print_warning("Recovery completed with warnings"),
                _ => output::print_error(&format!("Recovery failed: {}", status.message)),
            }
        }
        _ => output::print_item(&status, format)?,
    }

    if status.state == "failed" {
        anyhow::bail!("session {} failed", started.session_id);
    }
    Ok(())
}

async fn wait_for_session(
    client: &ApiClient,
    session_id: &str,
    interval: Duration,
    timeout: Duration,
) -> Result<Status> {
    let deadline = Instant::now() + timeout;
    loop {
        let status: Status = client.get_raw("/api/status").await?;
        let ours = status.session_id.as_deref() == Some(session_id);
        if ours && status.is_finished() {
            return Ok(status);
        }
        if Instant::now() >= deadline {
            anyhow::bail!(
                "session {} still {} after {}s",
                session_id,
                status.state,
                timeout.as_secs()
            );
        }
        tokio::time::sleep(interval).await;
    }
}

// ── Test mode ───────────────────────────────────────────────────────────────

#[derive(Clone, Copy, ValueEnum)]
pub enum Toggle {
    On,
    Off,
}

#[derive(Args)]
pub struct TestModeArgs {
    /// Desired state
    state: Toggle,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TestModeBody {
    test_mode: bool,
}

pub async fn test_mode(args: TestModeArgs, client: &ApiClient, format: OutputFormat) -> Result<()> {
    let request = TestModeBody {
        test_mode: matches!(args.state, Toggle::On),
    };
    let (result, _): (TestModeBody, _) = client.post("/api/toggle-test-mode", &request).await?;

    match format {
        OutputFormat::Table => output::print_success(&format!(
            "Test mode {}",
            if result.test_mode { "enabled" } else { "disabled" }
        )),
        _ => output::print_item(&result, format)?,
    }
    Ok(())
}

// ── Fix ─────────────────────────────────────────────────────────────────────

#[derive(Args)]
pub struct FixArgs {
    /// Diagnostic error id, e.g. port-conflict-3001
    error_id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FixRequest<'a> {
    error_id: &'a str,
}

pub async fn fix(args: FixArgs, client: &ApiClient, format: OutputFormat) -> Result<()> {
    let request = FixRequest {
        error_id: &args.error_id,
    };
    let (step, message): (Step, _) = client.post("/api/fix-error", &request).await?;

    match format {
        OutputFormat::Table => {
            output::print_table(&[step_row(&step)], "");
            let message = message.unwrap_or_else(|| step.status.clone());
            if step.status == "completed" {
                output::print_success(&message);
            } else {
                output::print_error(&message);
            }
        }
        _ => output::print_item(&step, format)?,
    }
    Ok(())
}
