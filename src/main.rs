use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use clap::Parser;

mod canon;
mod cli;
mod configpack;
mod diagnostics;
mod dsl;
mod guard;
mod namespace;
mod node;
mod overlay;
mod pipeline;
mod util;
mod visibility;

use cli::{CheckArgs, Command, NormalizeArgs, ResolveArgs, RootArgs};
use configpack::ConfigPackPaths;
use diagnostics::{Diagnostic, W_CANON_DOCUMENT_DEFAULTED};
use pipeline::NormalizeOutcome;

fn main() -> Result<()> {
    let args = RootArgs::parse();
    match args.command {
        Command::Normalize(args) => cmd_normalize(args),
        Command::Check(args) => cmd_check(args),
        Command::Resolve(args) => cmd_resolve(args),
    }
}

fn cmd_normalize(args: NormalizeArgs) -> Result<()> {
    init_tracing(args.verbose);
    let paths = ConfigPackPaths::new(args.config_pack.clone());
    let (outcome, defaulted) =
        run_pipeline(&paths, args.enforce_sunset, args.today.as_deref())?;
    configpack::write_artifacts(&paths, &outcome, &defaulted)?;
    report_outcome(&outcome, args.json, true)
}

fn cmd_check(args: CheckArgs) -> Result<()> {
    init_tracing(args.verbose);
    let paths = ConfigPackPaths::new(args.config_pack.clone());
    let (outcome, _) = run_pipeline(&paths, args.enforce_sunset, args.today.as_deref())?;
    report_outcome(&outcome, args.json, false)
}

fn cmd_resolve(args: ResolveArgs) -> Result<()> {
    let paths = ConfigPackPaths::new(args.config_pack.clone());
    let loaded = configpack::load_canons(&paths)?;
    let opts = namespace::ResolveOptions {
        enforce_sunset: args.enforce_sunset,
        today: parse_today(args.today.as_deref())?,
    };
    match namespace::resolve(&args.id, &loaded.canons.namespace, opts) {
        Ok(resolution) => {
            println!(
                "{} -> {} (deprecated={}, unmanaged={})",
                args.id, resolution.canonical_id, resolution.deprecated, resolution.unmanaged
            );
            Ok(())
        }
        Err(error) => Err(anyhow!("{}: {}", error.code, error.message)),
    }
}

fn run_pipeline(
    paths: &ConfigPackPaths,
    enforce_sunset: bool,
    today: Option<&str>,
) -> Result<(NormalizeOutcome, Vec<String>)> {
    tracing::debug!(pack = %paths.root().display(), "loading config pack");
    let loaded = configpack::load_canons(paths)?;
    let input = configpack::load_input(paths, enforce_sunset, parse_today(today)?)?;
    let mut outcome = pipeline::normalize(&input, &loaded.canons);
    for name in &loaded.defaulted {
        outcome.diagnostics.warning(Diagnostic::new(
            W_CANON_DOCUMENT_DEFAULTED,
            format!("canon document {name} missing; builtin defaults used"),
        ));
    }
    Ok((outcome, loaded.defaulted))
}

fn report_outcome(outcome: &NormalizeOutcome, json: bool, wrote_artifacts: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(outcome)?);
    } else {
        println!(
            "ok: {} (errors={}, warnings={})",
            outcome.ok,
            outcome.diagnostics.errors.len(),
            outcome.diagnostics.warnings.len()
        );
        println!("overlays applied: {}", outcome.overlay_stack_applied.len());
        println!("input fingerprint: {}", outcome.input_fingerprint_sha256);
        if outcome.ok {
            println!("normalized hash: {}", outcome.normalized_hash_sha256);
        }
        for diagnostic in &outcome.diagnostics.errors {
            println!("error {}: {}", diagnostic.code, diagnostic.message);
        }
        for diagnostic in &outcome.diagnostics.warnings {
            println!("warning {}: {}", diagnostic.code, diagnostic.message);
        }
    }
    if !outcome.ok {
        let verb = if wrote_artifacts {
            "normalization"
        } else {
            "check"
        };
        return Err(anyhow!(
            "{verb} failed with {} errors",
            outcome.diagnostics.errors.len()
        ));
    }
    Ok(())
}

fn parse_today(raw: Option<&str>) -> Result<Option<NaiveDate>> {
    raw.map(|text| {
        NaiveDate::parse_from_str(text, "%Y-%m-%d")
            .with_context(|| format!("parse --today {text} as YYYY-MM-DD"))
    })
    .transpose()
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
