#![forbid(unsafe_code)]

mod cmd;
mod output;

use clap::{Parser, Subcommand};
use output::OutputMode;
use std::env;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "tessera: incremental recalculation and background persistence",
    long_about = None
)]
struct Cli {
    /// Enable verbose logging and print a timing report to stderr.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON output instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    const fn output_mode(&self) -> OutputMode {
        if self.json {
            OutputMode::Json
        } else {
            OutputMode::Human
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Print the refresh plan for a batch",
        long_about = "Apply a batch of commands to an in-memory copy of the project and print the refresh plan it produces. The project file is not modified.",
        after_help = "EXAMPLES:\n    tessera plan --project sheet.json --commands batch.json\n    tessera plan --project sheet.json --commands batch.json --json"
    )]
    Plan(cmd::plan::PlanArgs),

    #[command(
        about = "Execute a batch through a workspace",
        long_about = "Execute a batch as one undoable entry, then optionally save the project back to its file and export it.",
        after_help = "EXAMPLES:\n    tessera apply --project sheet.json --commands batch.json --save\n    tessera apply --project sheet.json --commands batch.json --export --out build/"
    )]
    Apply(cmd::apply::ApplyArgs),

    #[command(
        about = "Export the project once",
        after_help = "EXAMPLES:\n    tessera export --project sheet.json --out build/"
    )]
    Export(cmd::export::ExportArgs),

    #[command(
        about = "Check that undo restores the project",
        long_about = "Execute a batch, undo it, and report whether the project returned to its original state. Exits non-zero when it did not.",
        after_help = "EXAMPLES:\n    tessera undo-check --project sheet.json --commands batch.json --json"
    )]
    UndoCheck(cmd::undo_check::UndoCheckArgs),
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("TESSERA_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if env::var("DEBUG").is_ok() {
            "tessera=debug,info"
        } else {
            "tessera=info,warn"
        })
    });

    let format = env::var("TESSERA_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    if cli.verbose {
        info!("Verbose mode enabled");
    }
    let output = cli.output_mode();

    match cli.command {
        Commands::Plan(ref args) => cmd::plan::run_plan(args, output, cli.verbose),
        Commands::Apply(ref args) => cmd::apply::run_apply(args, output, cli.verbose),
        Commands::Export(ref args) => cmd::export::run_export(args, output, cli.verbose),
        Commands::UndoCheck(ref args) => {
            cmd::undo_check::run_undo_check(args, output, cli.verbose)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn json_flag_parses_after_subcommand() {
        let cli = Cli::parse_from([
            "tessera", "plan", "--project", "p.json", "--commands", "c.json", "--json",
        ]);
        assert!(cli.json);
        assert!(cli.output_mode().is_json());
    }

    #[test]
    fn default_output_is_human() {
        let cli = Cli::parse_from(["tessera", "export", "--project", "p.json", "--out", "o"]);
        assert!(!cli.json);
        assert_eq!(cli.output_mode(), OutputMode::Human);
        match cli.command {
            Commands::Export(args) => {
                assert_eq!(args.out, Path::new("o"));
                assert!(!args.no_manifest);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn apply_flags_parse() {
        let cli = Cli::parse_from([
            "tessera",
            "--verbose",
            "apply",
            "--project",
            "p.json",
            "--commands",
            "c.json",
            "--save",
            "--export",
            "--out",
            "build",
        ]);
        assert!(cli.verbose);
        match cli.command {
            Commands::Apply(args) => {
                assert!(args.save && args.export);
                assert_eq!(args.out.as_deref(), Some(Path::new("build")));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn out_requires_export() {
        let parsed = Cli::try_parse_from([
            "tessera",
            "apply",
            "--project",
            "p.json",
            "--commands",
            "c.json",
            "--out",
            "build",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn undo_check_uses_kebab_case() {
        let cli = Cli::parse_from([
            "tessera",
            "undo-check",
            "--project",
            "p.json",
            "--commands",
            "c.json",
        ]);
        assert!(matches!(cli.command, Commands::UndoCheck(_)));
    }
}
