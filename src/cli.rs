//! CLI argument definitions and command handlers

use crate::backend::{BuildBackend, PlanBackend};
use crate::compiler::Compiler;
use crate::error::{ForgeError, ForgeResult};
use crate::graph::Graph;
use clap::{ArgAction, Parser, Subcommand};
use console::style;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// envforge - development environment build-plan compiler
///
/// Compiles a declarative environment definition into a filesystem build
/// plan for an execution backend.
#[derive(Parser, Debug)]
#[command(name = "envforge")]
#[command(author, version, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Compile an environment definition and print the build plan
    Plan(PlanArgs),
}

/// Arguments for the plan command
#[derive(Parser, Debug)]
pub struct PlanArgs {
    /// Environment definition file (TOML)
    #[arg(short, long, default_value = "envforge.toml", env = "ENVFORGE_FILE")]
    pub file: PathBuf,

    /// Emit the plan as JSON
    #[arg(long)]
    pub json: bool,
}

/// Compile the definition against an in-memory plan backend and render the
/// recorded DAG. Inspection only; nothing is executed.
pub async fn plan(args: PlanArgs) -> ForgeResult<()> {
    if !args.file.exists() {
        return Err(ForgeError::GraphNotFound(args.file));
    }
    let raw = tokio::fs::read_to_string(&args.file)
        .await
        .map_err(|e| ForgeError::io(format!("reading {}", args.file.display()), e))?;
    let graph: Graph = toml::from_str(&raw)?;
    debug!(file = %args.file.display(), "loaded environment definition");

    let backend = Arc::new(PlanBackend::new());
    let base = backend.source("base").await?;
    let compiler = Compiler::new(backend.clone());
    let final_stage = compiler.compile(&graph, &base).await?;

    if args.json {
        println!("{}", backend.to_json()?);
    } else {
        print!("{}", backend.render());
        println!(
            "{} final stage {}",
            style("Plan compiled:").green().bold(),
            final_stage
        );
    }
    Ok(())
}
