use std::env;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{debug, error, info};

use netpilot::engine::Runner;
use netpilot::error::ErrorCode;
use netpilot::schema::{status, TaskFile};
use netpilot::session::Connection;
use netpilot::store::OutputStore;

#[derive(Parser)]
#[command(name = "netpilot")]
#[command(version)]
#[command(
    about = "Executes a declarative JSON task file against a network device over SSH/Telnet"
)]
struct Cli {
    /// Path to the task file
    #[arg(short = 't', long = "task", value_name = "FILE")]
    task: PathBuf,

    /// Directory where command outputs are written
    #[arg(short = 'o', long = "output", value_name = "DIR")]
    output: PathBuf,

    /// Enable debug logging
    #[arg(short = 'd', long = "debug")]
    debug: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_level = if cli.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();

    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            error!("{:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let task_path = std::path::absolute(&cli.task).context("Path(s) are unacceptable")?;
    let output_dir = std::path::absolute(&cli.output).context("Path(s) are unacceptable")?;
    debug!("path to task: \"{}\"", task_path.display());
    debug!("path to outputs: \"{}\"", output_dir.display());

    let username = require_env("CLI_USERNAME")?;
    let password = require_env("CLI_PASSWORD")?;

    let file = TaskFile::load(&task_path)?;

    if let Err(code) = file.validate() {
        return persist_failure(file, &task_path, code);
    }

    let connection = match Connection::open(&file.host, &username, &password) {
        Ok(connection) => connection,
        Err(code) => {
            error!("connection to host '{}' failed: {}", file.host, code);
            return persist_failure(file, &task_path, code);
        }
    };
    info!("connection to host '{}' successful", file.host);

    let store = OutputStore::new(output_dir);
    let mut runner = Runner::new(file, task_path, store, connection);
    let outcome = runner.execute();
    runner.finish(outcome)
}

/// Record a failure that happened before any session-driven work, then exit
/// non-zero.
fn persist_failure(mut file: TaskFile, task_path: &Path, code: ErrorCode) -> Result<ExitCode> {
    error!("run aborted: {}", code);
    file.status = status::FAIL.to_string();
    file.error = code.to_string();
    file.save(task_path)?;
    Ok(ExitCode::FAILURE)
}

/// Fetch a required environment variable. Values of secrets (any name
/// containing "password" or "token") never reach the logs.
fn require_env(name: &str) -> Result<String> {
    let value = env::var(name).unwrap_or_default();
    if value.is_empty() {
        bail!(
            "environment variable '{name}' is not set; \
             use 'export {name}=value' to provide it"
        );
    }

    let lowered = name.to_lowercase();
    if lowered.contains("password") || lowered.contains("token") {
        debug!("read environment '{}', value hidden", name);
    } else {
        debug!("read environment '{}' = '{}'", name, value);
    }

    Ok(value)
}
