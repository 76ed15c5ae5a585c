//! Rune - container daemon and client
//!
//! This is the main CLI entry point for Rune.

use clap::Parser;
use runed::cli::{Cli, Frontend};
use runed::daemon::DaemonRuntime;
use runed::engine::Engine;
use runed::{BuildInfo, ExitStatus};
use std::io::Write;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // RUST_LOG wins over -D
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if cli.debug { "debug" } else { "info" })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let build = BuildInfo::current();
    let runtime = DaemonRuntime::new(build);
    let builder = runtime.register(Engine::builder());

    let mut stdout = std::io::stdout();
    let result = Frontend::new(build).dispatch(cli, builder, &mut stdout).await;

    let _ = stdout.flush();

    let status = ExitStatus::from_result(&result);
    if let Some(message) = &status.message {
        match &result {
            Err(runed::RuneError::Status(_)) => eprintln!("{}", message),
            _ => tracing::error!("{}", message),
        }
    }
    std::process::exit(status.code);
}
