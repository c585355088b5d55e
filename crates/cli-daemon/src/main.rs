//! CLI entry point for RelayBox
//!
//! Parses command line arguments, sets up logging and starts the daemon.

use clap::Parser;
use relaybox::{ConfigStore, Daemon};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// RelayBox - remote-controlled live-stream relay
#[derive(Parser, Debug)]
#[command(name = "relaybox")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (config.toml)
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Control API address; overrides server.bind
    #[arg(short, long)]
    bind: Option<String>,

    /// Skip the encoder availability check. For testing only.
    #[arg(long, default_value = "false")]
    skip_checks: bool,
}

/// `RUST_LOG` filters (default `info`); `LOG_FORMAT=json` switches to JSON lines
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging();

    info!(config = %args.config.display(), "RelayBox starting");

    let daemon_result = if args.skip_checks {
        warn!("skipping startup checks (--skip-checks enabled)");
        ConfigStore::open(&args.config)
            .map_err(Into::into)
            .and_then(Daemon::new_without_checks)
    } else {
        Daemon::new(&args.config)
    };

    match daemon_result {
        Ok(daemon) => {
            if let Err(e) = daemon.run(args.bind.as_deref()).await {
                error!(error = %e, "daemon error");
                return ExitCode::FAILURE;
            }
            info!("RelayBox stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "failed to initialize daemon");
            ExitCode::FAILURE
        }
    }
}
