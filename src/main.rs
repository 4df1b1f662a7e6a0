use anyhow::{Context, Result};
use clap::Parser;
use resdoc::cli::{ApplyArgs, Cli, Commands};
use resdoc::input::{load_manifest, resolve_input_mode};
use resdoc::{Manifest, ManifestEngine, UpdateMode, perform_update, reporter};
use std::io::{self, Write};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Exit status for bad arguments or an unreadable manifest.
const USAGE_ERROR: u8 = 2;

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .without_time()
        .init();

    let outcome = match cli.command {
        Commands::Apply(args) => apply(&args),
        Commands::Schema => schema().map(|()| 0),
    };

    match outcome {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(USAGE_ERROR)
        }
    }
}

fn apply(args: &ApplyArgs) -> Result<u8> {
    let mode = resolve_input_mode(args)?;
    let loaded = load_manifest(&mode)?;

    let mut options = loaded.manifest.options.clone();
    args.apply_overrides(&mut options);
    let documents = loaded.manifest.documents.len();

    let update_mode = if args.dry_run {
        UpdateMode::DryRun
    } else {
        UpdateMode::Commit
    };
    let start = reporter::run_start(mode.as_str(), args.dry_run, documents, &options);

    let mut engine = ManifestEngine::new(loaded.manifest, loaded.base_dir);
    let report = perform_update(&mut engine, options, update_mode)?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    if args.json {
        reporter::write_json(&mut out, start, &report)?;
    } else {
        reporter::write_text(&mut out, &report)?;
    }
    out.flush()?;

    Ok(reporter::exit_code(&report) as u8)
}

fn schema() -> Result<()> {
    let schema = schemars::schema_for!(Manifest);
    let text = serde_json::to_string_pretty(&schema).context("serializing manifest schema")?;
    println!("{}", text);
    Ok(())
}
