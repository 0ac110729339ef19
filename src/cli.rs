//! CLI argument parsing for the config-pack workflow.
//!
//! The CLI is intentionally thin: it wires pack files into the pure engine
//! without embedding policy, so the same core logic can be reused elsewhere.
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Root CLI entrypoint for the menu normalization workflow.
#[derive(Parser, Debug)]
#[command(
    name = "mcanon",
    version,
    about = "Layered menu-configuration normalizer and policy engine",
    after_help = "Commands:\n  normalize --config-pack <dir>   Fold overlays into normalized/config.json\n  check --config-pack <dir>       Run the pipeline without writing artifacts\n  resolve --config-pack <dir> --id <cmd>  Debug one command-id resolution\n\nExamples:\n  mcanon normalize --config-pack ./pack\n  mcanon normalize --config-pack ./pack --enforce-sunset --today 2026-08-06\n  mcanon check --config-pack ./pack --json\n  mcanon resolve --config-pack ./pack --id legacy.save",
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct RootArgs {
    #[command(subcommand)]
    pub command: Command,
}

/// Top-level workflow commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    Normalize(NormalizeArgs),
    Check(CheckArgs),
    Resolve(ResolveArgs),
}

/// Normalize command inputs for a single config pack.
#[derive(Parser, Debug)]
#[command(about = "Normalize a config pack and write the canonical artifact")]
pub struct NormalizeArgs {
    /// Config pack root containing canon, menu, overlays, and outputs
    #[arg(long, value_name = "DIR")]
    pub config_pack: PathBuf,

    /// Emit the full outcome as machine-readable JSON
    #[arg(long)]
    pub json: bool,

    /// Fail deprecated command aliases past their sunset date
    #[arg(long, requires = "today")]
    pub enforce_sunset: bool,

    /// Reference date for sunset enforcement
    #[arg(long, value_name = "YYYY-MM-DD")]
    pub today: Option<String>,

    /// Emit a verbose transcript of the pipeline
    #[arg(long)]
    pub verbose: bool,
}

/// Check command inputs: the normalize pipeline without artifact writes.
#[derive(Parser, Debug)]
#[command(about = "Validate a config pack without writing artifacts")]
pub struct CheckArgs {
    /// Config pack root containing canon, menu, overlays, and outputs
    #[arg(long, value_name = "DIR")]
    pub config_pack: PathBuf,

    /// Emit the full outcome as machine-readable JSON
    #[arg(long)]
    pub json: bool,

    /// Fail deprecated command aliases past their sunset date
    #[arg(long, requires = "today")]
    pub enforce_sunset: bool,

    /// Reference date for sunset enforcement
    #[arg(long, value_name = "YYYY-MM-DD")]
    pub today: Option<String>,

    /// Emit a verbose transcript of the pipeline
    #[arg(long)]
    pub verbose: bool,
}

/// Resolve command inputs for debugging one command id.
#[derive(Parser, Debug)]
#[command(about = "Resolve a command id against the namespace canon")]
pub struct ResolveArgs {
    /// Config pack root supplying the namespace canon
    #[arg(long, value_name = "DIR")]
    pub config_pack: PathBuf,

    /// Command id to resolve
    #[arg(long, value_name = "ID")]
    pub id: String,

    /// Fail deprecated command aliases past their sunset date
    #[arg(long, requires = "today")]
    pub enforce_sunset: bool,

    /// Reference date for sunset enforcement
    #[arg(long, value_name = "YYYY-MM-DD")]
    pub today: Option<String>,
}
