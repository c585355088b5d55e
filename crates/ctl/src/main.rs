//! relayctl
//!
//! Command-line client for the RelayBox control API. Stands in for the chat
//! front-end: every subcommand is one HTTP call against the daemon.

use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::process::ExitCode;
use std::time::Duration;

const DEFAULT_URL: &str = "http://127.0.0.1:7878";
const REQUEST_TIMEOUT_SECS: u64 = 30;

// ============================================================================
// Wire types (mirroring the daemon's control API)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "snake_case")]
enum Mode {
    Plain,
    SingleImage,
    Slideshow,
}

#[derive(Debug, Serialize)]
struct StartBody {
    source: String,
    mode: Mode,
    images: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    endpoint: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
struct StartReply {
    ok: bool,
    outcome: String,
    status: String,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    hint: Option<String>,
    #[serde(default)]
    log_tail: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
struct StopReply {
    stopped: bool,
    status: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
struct SourceSummary {
    original: String,
    kind: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
struct SessionSummary {
    id: String,
    mode: String,
    source: SourceSummary,
    output_endpoint: String,
    #[serde(default)]
    pid: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
struct StatusReply {
    state: String,
    running: bool,
    #[serde(default)]
    session: Option<SessionSummary>,
    #[serde(default)]
    exited: bool,
    #[serde(default)]
    exit_code: Option<i32>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
struct ToolSummary {
    binary: String,
    #[serde(default)]
    version: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
struct StreamSummary {
    state: String,
    running: bool,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
struct UsageSummary {
    cpu_percent: f32,
    memory_used_bytes: u64,
    memory_total_bytes: u64,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
struct EnvReply {
    lan_ip: String,
    encoder: ToolSummary,
    file_server: ToolSummary,
    #[serde(default)]
    file_server_pids: Vec<u32>,
    stream: StreamSummary,
    system: UsageSummary,
}

// ============================================================================
// Command line
// ============================================================================

/// relayctl - control a RelayBox daemon
#[derive(Parser, Debug)]
#[command(name = "relayctl")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Base URL of the control API
    #[arg(long, env = "RELAYCTL_URL", default_value = DEFAULT_URL)]
    url: String,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Start streaming a source
    Start {
        /// Local path, URL, or file-service path
        source: String,
        #[arg(short, long, value_enum, default_value = "plain")]
        mode: Mode,
        /// Image for single-image mode; repeat for a slideshow
        #[arg(short, long = "image")]
        images: Vec<String>,
        /// Broadcast endpoint for this session only
        #[arg(long)]
        endpoint: Option<String>,
    },
    /// Stop the running session
    Stop,
    /// Show the session state
    Status,
    /// Print the tail of the encoder log
    Log {
        #[arg(long, default_value = "1500")]
        max_bytes: u64,
    },
    /// Environment self-check
    Env,
    /// Inspect or toggle an auxiliary service
    Service {
        /// file_server, tunnel or download_agent
        name: String,
        #[arg(value_enum, default_value = "status")]
        action: ServiceAction,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ServiceAction {
    Status,
    Start,
    Stop,
    /// Make the file server reachable from the LAN and restart it
    Repair,
}

// ============================================================================
// Formatting
// ============================================================================

fn api_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

fn format_start(reply: &StartReply) -> String {
    let mut out = if reply.ok {
        format!("started: {}", reply.status)
    } else {
        format!("start {}: {}", reply.outcome.replace('_', " "), reply.status)
    };
    if let Some(reason) = &reply.reason {
        out.push_str(&format!("\nreason: {}", reason));
    }
    if let Some(hint) = &reply.hint {
        out.push_str(&format!("\nhint: {}", hint));
    }
    if let Some(tail) = reply.log_tail.as_deref().filter(|t| !t.trim().is_empty()) {
        out.push_str("\n--- encoder log ---\n");
        out.push_str(tail.trim_end());
    }
    out
}

fn format_status(reply: &StatusReply) -> String {
    match &reply.session {
        Some(session) if reply.running => {
            let pid = session
                .pid
                .map(|p| format!(" pid {}", p))
                .unwrap_or_default();
            format!(
                "{}: {} ({}, {}) -> {}{}\nsession {}",
                reply.state,
                session.source.original,
                session.mode,
                session.source.kind,
                session.output_endpoint,
                pid,
                session.id
            )
        }
        Some(_) if reply.exited => match reply.exit_code {
            Some(code) => format!("{}: encoder exited with code {}", reply.state, code),
            None => format!("{}: encoder was terminated by a signal", reply.state),
        },
        _ => reply.state.clone(),
    }
}

fn format_env(reply: &EnvReply) -> String {
    let tool = |t: &ToolSummary| match &t.version {
        Some(version) => format!("{} {}", t.binary, version),
        None => format!("{} (not installed)", t.binary),
    };
    let file_server = match reply.file_server_pids.first() {
        Some(pid) => format!("running, pid {}", pid),
        None => "stopped".to_string(),
    };
    let stream = if reply.stream.running {
        "streaming"
    } else {
        reply.stream.state.as_str()
    };
    const MB: u64 = 1024 * 1024;

    format!(
        "lan ip:      {}\nencoder:     {}\nstream:      {}\nfile server: {} ({})\ncpu:         {:.1}%\nmemory:      {}MB / {}MB",
        reply.lan_ip,
        tool(&reply.encoder),
        stream,
        tool(&reply.file_server),
        file_server,
        reply.system.cpu_percent,
        reply.system.memory_used_bytes / MB,
        reply.system.memory_total_bytes / MB,
    )
}

// ============================================================================
// Main
// ============================================================================

async fn run(cli: Cli) -> Result<bool, reqwest::Error> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .build()?;

    match cli.command {
        Cmd::Start {
            source,
            mode,
            images,
            endpoint,
        } => {
            let body = StartBody {
                source,
                mode,
                images,
                endpoint,
            };
            let reply: StartReply = client
                .post(api_url(&cli.url, "session/start"))
                .json(&body)
                .send()
                .await?
                .json()
                .await?;
            println!("{}", format_start(&reply));
            Ok(reply.ok)
        }
        Cmd::Stop => {
            let reply: StopReply = client
                .post(api_url(&cli.url, "session/stop"))
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            if reply.stopped {
                println!("stopped ({})", reply.status);
            } else {
                println!("nothing to stop ({})", reply.status);
            }
            Ok(true)
        }
        Cmd::Status => {
            let reply: StatusReply = client
                .get(api_url(&cli.url, "session/status"))
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            println!("{}", format_status(&reply));
            Ok(true)
        }
        Cmd::Log { max_bytes } => {
            let text = client
                .get(api_url(&cli.url, "session/log"))
                .query(&[("max_bytes", max_bytes)])
                .send()
                .await?
                .error_for_status()?
                .text()
                .await?;
            println!("{}", text);
            Ok(true)
        }
        Cmd::Env => {
            let reply: EnvReply = client
                .get(api_url(&cli.url, "env"))
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            println!("{}", format_env(&reply));
            Ok(true)
        }
        Cmd::Service { name, action } => {
            let path = match action {
                ServiceAction::Status => format!("services/{}", name),
                ServiceAction::Start => format!("services/{}/start", name),
                ServiceAction::Stop => format!("services/{}/stop", name),
                ServiceAction::Repair => format!("services/{}/repair", name),
            };
            let request = match action {
                ServiceAction::Status => client.get(api_url(&cli.url, &path)),
                _ => client.post(api_url(&cli.url, &path)),
            };
            let response = request.send().await?;
            let ok = response.status().is_success();
            let reply: serde_json::Value = response.json().await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&reply).unwrap_or_else(|_| reply.to_string())
            );
            Ok(ok)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let url = cli.url.clone();

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("request to {} failed: {}", url, e);
            ExitCode::FAILURE
        }
    }
}
