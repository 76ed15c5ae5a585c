//! Rune xtask - Build automation tasks
//!
//! ## Usage
//!
//! ```bash
//! # Build the rune binary, stamping the current git commit
//! cargo xtask build
//!
//! # Run unit and integration tests
//! cargo xtask test
//!
//! # Run lints
//! cargo xtask lint
//!
//! # Format code
//! cargo xtask fmt
//!
//! # Everything CI runs
//! cargo xtask ci
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use xshell::{cmd, Shell};

/// Variable the rune binary reads its build commit from at compile time
const GIT_COMMIT_ENV: &str = "RUNE_GITCOMMIT";

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Build automation for the Rune daemon")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the rune binary
    Build {
        /// Build in release mode
        #[arg(long)]
        release: bool,
    },
    /// Run all tests
    Test {
        /// Run tests in release mode
        #[arg(long)]
        release: bool,
        /// Only run tests whose name matches
        filter: Option<String>,
    },
    /// Run lints (clippy and rustfmt check)
    Lint,
    /// Format code
    Fmt {
        /// Check formatting without making changes
        #[arg(long)]
        check: bool,
    },
    /// Generate documentation
    Doc {
        /// Open documentation in browser
        #[arg(long)]
        open: bool,
    },
    /// Clean build artifacts
    Clean,
    /// Install the rune binary locally
    Install,
    /// Run CI checks (lint, test, build)
    Ci,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let sh = Shell::new()?;

    let project_root = project_root()?;
    sh.change_dir(&project_root);

    match cli.command {
        Commands::Build { release } => build(&sh, release)?,
        Commands::Test { release, filter } => test(&sh, release, filter.as_deref())?,
        Commands::Lint => lint(&sh)?,
        Commands::Fmt { check } => fmt(&sh, check)?,
        Commands::Doc { open } => doc(&sh, open)?,
        Commands::Clean => clean(&sh)?,
        Commands::Install => install(&sh)?,
        Commands::Ci => ci(&sh)?,
    }

    Ok(())
}

fn project_root() -> Result<PathBuf> {
    let output = std::process::Command::new("cargo")
        .args(["locate-project", "--workspace", "--message-format=plain"])
        .output()
        .context("Failed to run cargo locate-project")?;

    let path = String::from_utf8(output.stdout)?;
    let manifest = PathBuf::from(path.trim());

    manifest
        .parent()
        .map(|p| p.to_path_buf())
        .context("Failed to find project root")
}

/// Short hash of HEAD, or "unknown" outside a git checkout
fn git_commit(sh: &Shell) -> String {
    cmd!(sh, "git rev-parse --short HEAD")
        .quiet()
        .ignore_stderr()
        .read()
        .map(|commit| commit.trim().to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}

fn build(sh: &Shell, release: bool) -> Result<()> {
    println!("🔨 Building rune...");

    let commit = git_commit(sh);
    let _env = sh.push_env(GIT_COMMIT_ENV, &commit);
    if release {
        cmd!(sh, "cargo build --release --bin rune").run()?;
    } else {
        cmd!(sh, "cargo build --bin rune").run()?;
    }

    println!("✅ Build complete! (commit {})", commit);
    Ok(())
}

fn test(sh: &Shell, release: bool, filter: Option<&str>) -> Result<()> {
    println!("🧪 Running tests...");

    let release_flag = release.then_some("--release");
    let filter = filter.into_iter();
    cmd!(sh, "cargo test --workspace {release_flag...} -- {filter...}").run()?;

    println!("✅ All tests passed!");
    Ok(())
}

fn lint(sh: &Shell) -> Result<()> {
    println!("🔍 Running lints...");

    println!("  Checking formatting...");
    cmd!(sh, "cargo fmt --all -- --check").run()?;

    println!("  Running clippy...");
    cmd!(sh, "cargo clippy --workspace --all-targets -- -D warnings").run()?;

    println!("✅ All lints passed!");
    Ok(())
}

fn fmt(sh: &Shell, check: bool) -> Result<()> {
    println!("🎨 Formatting code...");

    if check {
        cmd!(sh, "cargo fmt --all -- --check").run()?;
    } else {
        cmd!(sh, "cargo fmt --all").run()?;
    }

    println!("✅ Formatting complete!");
    Ok(())
}

fn doc(sh: &Shell, open: bool) -> Result<()> {
    println!("📚 Generating documentation...");

    if open {
        cmd!(sh, "cargo doc --no-deps --open").run()?;
    } else {
        cmd!(sh, "cargo doc --no-deps").run()?;
    }

    println!("✅ Documentation generated!");
    Ok(())
}

fn clean(sh: &Shell) -> Result<()> {
    println!("🧹 Cleaning build artifacts...");
    cmd!(sh, "cargo clean").run()?;
    println!("✅ Clean complete!");
    Ok(())
}

fn install(sh: &Shell) -> Result<()> {
    println!("📥 Installing rune locally...");

    let commit = git_commit(sh);
    let _env = sh.push_env(GIT_COMMIT_ENV, &commit);
    cmd!(sh, "cargo install --path . --bin rune").run()?;

    println!("✅ Installation complete!");
    Ok(())
}

fn ci(sh: &Shell) -> Result<()> {
    println!("🔄 Running CI checks...");

    lint(sh)?;
    test(sh, false, None)?;
    build(sh, true)?;

    println!("✅ CI checks passed!");
    Ok(())
}
