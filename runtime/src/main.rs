// Copyright 2026 Muster Contributors
// SPDX-License-Identifier: Apache-2.0

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use muster_runtime::cli;
use muster_runtime::pipeline::PipelineOutcome;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "muster",
    about = "Muster — training compliance reports from the membership portal",
    version,
    after_help = "Run 'muster <command> --help' for details on each command."
)]
struct Cli {
    /// Output results as JSON (machine-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Suppress non-essential output
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Enable verbose/debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// Config file (default: MUSTER_CONFIG, then ~/.muster/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in and report compliance for a batch of members
    Report(cli::report_cmd::ReportArgs),
    /// Check environment and diagnose issues
    Doctor,
    /// Generate shell completion scripts
    Completions {
        /// Shell type (bash, zsh, fish, powershell)
        shell: Shell,
    },
}

fn init_tracing(json: bool, verbose: bool, quiet: bool) {
    let level = if verbose {
        "debug"
    } else if quiet {
        "error"
    } else if json {
        "info"
    } else {
        // The spinner carries progress in text mode
        "warn"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("muster_runtime={level}")));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set global flags via environment variables so all modules can check them
    if cli.json {
        std::env::set_var("MUSTER_JSON", "1");
    }
    if cli.quiet {
        std::env::set_var("MUSTER_QUIET", "1");
    }
    if cli.no_color {
        std::env::set_var("MUSTER_NO_COLOR", "1");
    }
    init_tracing(cli.json, cli.verbose, cli.quiet);

    let config = cli.config.as_deref();
    let result = match cli.command {
        Commands::Report(args) => cli::report_cmd::run(args, config).await,
        Commands::Doctor => cli::doctor::run(config).await.map(|_| PipelineOutcome::Complete),
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "muster", &mut std::io::stdout());
            Ok(PipelineOutcome::Complete)
        }
    };

    // Exit codes: 0 = complete, 2 = some members incomplete, 1 = no session or error
    match result {
        Ok(PipelineOutcome::Complete) => Ok(()),
        Ok(PipelineOutcome::Partial { .. }) => std::process::exit(2),
        Ok(PipelineOutcome::NoSession) => std::process::exit(1),
        Err(e) => {
            if cli::output::is_json() {
                cli::output::print_json(&serde_json::json!({
                    "error": true,
                    "message": format!("{e:#}"),
                }));
            } else if !cli::output::is_quiet() {
                eprintln!("  Error: {e:#}");
            }
            std::process::exit(1);
        }
    }
}
