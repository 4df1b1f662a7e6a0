use crate::options::TransactionOptions;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Apply the result documents of an update as a single transaction.
#[derive(Parser, Debug)]
#[command(name = "resdoc")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable debug diagnostics on stderr
    #[arg(global = true, short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write the documents listed in a manifest, committing all or none
    Apply(ApplyArgs),

    /// Print the JSON schema of the manifest format
    Schema,
}

#[derive(Args, Debug, Default)]
pub struct ApplyArgs {
    /// Manifest file; `-` or omitted reads stdin
    pub manifest: Option<PathBuf>,

    /// Stage every document and show diffs, then roll back
    #[arg(long)]
    pub dry_run: bool,

    /// Emit NDJSON events instead of text
    #[arg(long)]
    pub json: bool,

    /// fsync temporary files before installing them
    #[arg(long)]
    pub sync: bool,

    /// Suffix for backups of replaced documents [default: .bak]
    #[arg(long, value_name = "SUFFIX")]
    pub backup_suffix: Option<String>,
}

impl ApplyArgs {
    /// Command-line flags take precedence over the manifest's `options`.
    pub fn apply_overrides(&self, options: &mut TransactionOptions) {
        if self.sync {
            options.sync = true;
        }
        if let Some(suffix) = &self.backup_suffix {
            options.backup_suffix = suffix.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_apply_flags() {
        let cli = Cli::try_parse_from(["resdoc", "apply", "m.json", "--dry-run", "--backup-suffix", ".orig"]).unwrap();
        let Commands::Apply(args) = cli.command else {
            panic!("expected apply");
        };
        assert_eq!(args.manifest, Some(PathBuf::from("m.json")));
        assert!(args.dry_run);

        let mut options = TransactionOptions::default();
        args.apply_overrides(&mut options);
        assert_eq!(options.backup_suffix, ".orig");
        assert!(!options.sync);
    }

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
