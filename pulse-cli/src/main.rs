//! pulse-cli: terminal frontend for the Pulse reporting API
//!
//! Talks to the HTTP API of a running `pulse-server`. Requests carry the caller
//! identity in the `x-pulse-user-id` header; agent reports require the caller
//! to own the agent.
//!
//! # Subcommands
//! - `metrics <agent_id> [--hours <n>] [--json]`: hourly buckets, most recent first
//! - `summary <agent_id> [--json]`: seven-day rollup
//! - `sessions [--json]`: caller's active sessions
//! - `status`: show server health

use clap::{Parser, Subcommand};
use serde::Deserialize;

const DEFAULT_SERVER: &str = "http://127.0.0.1:8780";
const USER_HEADER: &str = "x-pulse-user-id";

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "pulse-cli", version, about = "Pulse agent usage metrics and live sessions")]
struct Cli {
    /// Pulse HTTP server URL (overrides PULSE_HTTP_URL env var)
    #[arg(long, env = "PULSE_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    /// Caller user ID sent with every request
    #[arg(long, env = "PULSE_USER_ID")]
    user: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Hourly metric buckets for an agent
    Metrics {
        agent_id: String,

        /// Window size in hours (server default applies when omitted)
        #[arg(long)]
        hours: Option<u32>,

        /// Print the raw JSON response
        #[arg(long)]
        json: bool,
    },

    /// Seven-day rollup for an agent
    Summary {
        agent_id: String,

        #[arg(long)]
        json: bool,
    },

    /// Active sessions of the calling user
    Sessions {
        #[arg(long)]
        json: bool,
    },

    /// Show Pulse server status
    Status,
}

// ============================================================================
// API Response Types
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct BucketView {
    pub date: String,
    pub hour: u32,
    #[serde(default)]
    pub sessions: i64,
    #[serde(default)]
    pub utterances: i64,
    #[serde(default)]
    pub responses: i64,
    #[serde(default)]
    pub unique_users: i64,
    #[serde(default)]
    pub error_count: i64,
    #[serde(default)]
    pub avg_latency_ms: i64,
}

#[derive(Debug, Deserialize)]
pub struct MetricsView {
    pub agent_id: String,
    pub hours: u32,
    pub metrics: Vec<BucketView>,
}

#[derive(Debug, Deserialize)]
pub struct SummaryView {
    pub agent_id: String,
    pub buckets: usize,
    pub total_sessions: i64,
    pub total_utterances: i64,
    pub total_responses: i64,
    pub total_unique_users: i64,
    pub total_errors: i64,
    pub new_installs: i64,
    pub uninstalls: i64,
    pub net_installs: i64,
    pub error_rate: f64,
    pub avg_latency_ms: f64,
    pub weighted_avg_latency_ms: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionView {
    pub id: String,
    pub agent_id: String,
    pub connection_id: String,
    pub status: String,
    pub started_at: String,
    pub last_active_at: String,
}

#[derive(Debug, Deserialize)]
pub struct SessionsView {
    pub count: usize,
    pub sessions: Vec<SessionView>,
}

// ============================================================================
// Text Output
// ============================================================================

pub fn format_bucket_header() -> String {
    format!(
        "{:<13} {:>4} {:>8} {:>10} {:>9} {:>6} {:>6} {:>8}",
        "DATE", "HOUR", "SESSIONS", "UTTERANCES", "RESPONSES", "USERS", "ERRORS", "LAT(ms)"
    )
}

pub fn format_bucket_line(b: &BucketView) -> String {
    format!(
        "{:<13} {:>4} {:>8} {:>10} {:>9} {:>6} {:>6} {:>8}",
        b.date, b.hour, b.sessions, b.utterances, b.responses, b.unique_users, b.error_count, b.avg_latency_ms
    )
}

pub fn format_summary(s: &SummaryView) -> Vec<String> {
    vec![
        format!("Agent:             {}", s.agent_id),
        format!("Active hours:      {}", s.buckets),
        format!("Sessions:          {}", s.total_sessions),
        format!("Utterances:        {}", s.total_utterances),
        format!("Responses:         {}", s.total_responses),
        format!("Unique users:      {}", s.total_unique_users),
        format!("Errors:            {} ({:.2}%)", s.total_errors, s.error_rate),
        format!(
            "Installs:          +{} / -{} (net {})",
            s.new_installs, s.uninstalls, s.net_installs
        ),
        format!(
            "Latency:           {:.1} ms avg ({:.1} ms per response)",
            s.avg_latency_ms, s.weighted_avg_latency_ms
        ),
    ]
}

pub fn format_session_line(s: &SessionView) -> String {
    format!(
        "{}  agent={}  conn={}  {}  started {}  last active {}",
        s.id, s.agent_id, s.connection_id, s.status, s.started_at, s.last_active_at
    )
}

// ============================================================================
// HTTP Client Calls
// ============================================================================

/// GET `path` and return the JSON body. Transport failures and non-2xx
/// responses end the process with a message on stderr.
fn get_json(server: &str, user: Option<&str>, path: &str) -> anyhow::Result<serde_json::Value> {
    let client = reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()?;

    let url = format!("{}{}", server, path);
    let mut req = client.get(&url);
    if let Some(user) = user {
        req = req.header(USER_HEADER, user);
    }

    let resp = match req.send() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("pulse-cli: connection failed to {}: {}", url, e);
            std::process::exit(1);
        }
    };

    if !resp.status().is_success() {
        let status = resp.status();
        let body: serde_json::Value = resp.json().unwrap_or_default();
        let msg = body["error"].as_str().unwrap_or("no details");
        eprintln!("pulse-cli: server returned {}: {}", status, msg);
        std::process::exit(1);
    }

    Ok(resp.json()?)
}

fn print_json(value: &serde_json::Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn do_metrics(server: &str, user: Option<&str>, agent_id: &str, hours: Option<u32>, json: bool) -> anyhow::Result<()> {
    let path = match hours {
        Some(h) => format!("/agents/{}/metrics?hours={}", agent_id, h),
        None => format!("/agents/{}/metrics", agent_id),
    };
    let body = get_json(server, user, &path)?;
    if json {
        return print_json(&body);
    }

    let view: MetricsView = serde_json::from_value(body)?;
    if view.metrics.is_empty() {
        eprintln!("No activity for {} in the last {} hours", view.agent_id, view.hours);
        return Ok(());
    }
    println!("{}", format_bucket_header());
    for b in &view.metrics {
        println!("{}", format_bucket_line(b));
    }
    Ok(())
}

fn do_summary(server: &str, user: Option<&str>, agent_id: &str, json: bool) -> anyhow::Result<()> {
    let body = get_json(server, user, &format!("/agents/{}/metrics/summary", agent_id))?;
    if json {
        return print_json(&body);
    }

    let view: SummaryView = serde_json::from_value(body)?;
    for line in format_summary(&view) {
        println!("{}", line);
    }
    Ok(())
}

fn do_sessions(server: &str, user: Option<&str>, json: bool) -> anyhow::Result<()> {
    let body = get_json(server, user, "/sessions/active")?;
    if json {
        return print_json(&body);
    }

    let view: SessionsView = serde_json::from_value(body)?;
    if view.count == 0 {
        eprintln!("No active sessions");
        return Ok(());
    }
    for s in &view.sessions {
        println!("{}", format_session_line(s));
    }
    Ok(())
}

/// Show the server status by calling GET /health.
fn do_status(server: &str) -> anyhow::Result<()> {
    let client = reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()?;

    let url = format!("{}/health", server);
    match client.get(&url).send() {
        Ok(r) if r.status().is_success() => {
            let body: serde_json::Value = r.json().unwrap_or_default();
            println!("Pulse server: {}", body["status"].as_str().unwrap_or("unknown"));
            println!("Version:      {}", body["version"].as_str().unwrap_or("?"));
            println!("Store:        {}", body["store"].as_str().unwrap_or("?"));
            println!("Backend:      {}", body["backend"].as_str().unwrap_or("?"));
            println!("Socket:       {}", body["socket"].as_str().unwrap_or("?"));
        }
        Ok(r) => {
            eprintln!("pulse-cli: server unhealthy (HTTP {})", r.status());
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("pulse-cli: cannot reach {}: {}", url, e);
            std::process::exit(1);
        }
    }

    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let cli = Cli::parse();
    let server = cli.server.trim_end_matches('/').to_string();
    let user = cli.user.as_deref();

    let result = match cli.command {
        Commands::Metrics { agent_id, hours, json } => do_metrics(&server, user, &agent_id, hours, json),
        Commands::Summary { agent_id, json } => do_summary(&server, user, &agent_id, json),
        Commands::Sessions { json } => do_sessions(&server, user, json),
        Commands::Status => do_status(&server),
    };

    if let Err(e) = result {
        eprintln!("pulse-cli: {}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================
