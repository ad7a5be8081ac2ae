//! envforge - build-plan compiler for declarative development environments
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use envforge::cli::{Cli, Commands};
use envforge::error::ForgeResult;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> ForgeResult<()> {
    let cli = Cli::parse();

    // 0 = warn, 1 = info, 2+ = debug
    let filter = match cli.verbose {
        0 => EnvFilter::new("envforge=warn"),
        1 => EnvFilter::new("envforge=info"),
        _ => EnvFilter::new("envforge=debug"),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();

    match cli.command {
        Commands::Plan(args) => envforge::cli::plan(args).await,
    }
}
