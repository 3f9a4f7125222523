mod config;
mod db;
mod error;
mod grading;
mod ingest;
mod ipc;
mod reference;
mod report;
mod stats;
mod store;

use clap::Parser;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Grading sidecar: JSON requests on stdin, one JSON response per line on stdout.
#[derive(Parser)]
#[command(name = "gradebookd", version, about, long_about = None)]
struct Cli {
    /// Workspace directory to open at startup
    #[arg(long, env = "GRADEBOOKD_WORKSPACE")]
    workspace: Option<PathBuf>,

    /// Default log level; RUST_LOG takes precedence
    #[arg(long, env = "GRADEBOOKD_LOG", default_value = "info")]
    log_level: String,
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("gradebookd={}", level)));
    // stdout carries responses; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let mut state = ipc::AppState::default();
    if let Some(path) = cli.workspace.as_deref() {
        ipc::select_workspace(&mut state, path)?;
    }
    info!(version = env!("CARGO_PKG_VERSION"), "gradebookd ready");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                error!(error = %e, "stdin read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // No id to reply to.
                warn!(error = %e, "unparsable request line");
                let resp = serde_json::json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() }
                });
                let _ = writeln!(stdout, "{}", resp);
                let _ = stdout.flush();
                continue;
            }
        };

        debug!(id = %req.id, method = %req.method, "request");
        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
    info!("stdin closed; exiting");
    Ok(())
}
