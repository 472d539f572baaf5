mod diff;
mod exit_codes;
mod rollup;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use devcenter_rollup::RollupError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use exit_codes::*;

#[derive(Parser)]
#[command(name = "devcenter")]
#[command(about = "Roll recipe results up the organization hierarchy")]
#[command(version)]
struct Cli {
    /// Log debug details (overridden by DEVCENTER_LOG)
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Where the organization hierarchy comes from. Exactly one is required.
#[derive(clap::Args, Clone, Debug)]
pub struct HierarchyArgs {
    /// Hierarchy definition (TOML with [[unit]] entries)
    #[arg(long, env = "DEVCENTER_HIERARCHY", conflicts_with = "repos_csv")]
    pub hierarchy: Option<PathBuf>,

    /// Repository listing CSV (origin, path, org1..orgN)
    #[arg(long)]
    pub repos_csv: Option<PathBuf>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Csv,
    Text,
}

#[derive(Subcommand)]
enum Commands {
    /// Aggregate recipe exports into per-organization counts
    #[command(after_help = "\
Examples:
  devcenter rollup --hierarchy org.toml results/*.csv
  devcenter rollup --repos-csv repos.csv --format csv --output rollup.csv results.csv
  cat results.csv | devcenter rollup --hierarchy org.toml -
  devcenter rollup --hierarchy org.toml --config devcenter.toml --strict results/*.csv")]
    Rollup {
        #[command(flatten)]
        hierarchy: HierarchyArgs,

        /// Run configuration (columns, delimiter, diagnostics)
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,

        /// Output format
        #[arg(long, short = 'f', value_enum, default_value = "json")]
        format: OutputFormat,

        /// Write the report to a file instead of stdout
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,

        /// Fail (exit 5) on parse errors or too many unattributed rows
        #[arg(long)]
        strict: bool,

        /// Export files, or `-` for stdin
        #[arg(required = true)]
        inputs: Vec<String>,
    },

    /// Check a hierarchy (and optionally a run config) without reading exports
    #[command(after_help = "\
Examples:
  devcenter validate --hierarchy org.toml
  devcenter validate --repos-csv repos.csv --config devcenter.toml")]
    Validate {
        #[command(flatten)]
        hierarchy: HierarchyArgs,

        /// Run configuration to validate as well
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,
    },

    /// Show which organizations own the given repositories
    #[command(after_help = "\
Examples:
  devcenter resolve --hierarchy org.toml github.com/acme/ledger
  devcenter resolve --repos-csv repos.csv --json github.com/acme/a github.com/acme/b")]
    Resolve {
        #[command(flatten)]
        hierarchy: HierarchyArgs,

        /// Output JSON instead of tab-separated lines
        #[arg(long)]
        json: bool,

        /// Repository identifiers
        #[arg(required = true)]
        repositories: Vec<String>,
    },

    /// Compare two JSON reports cell by cell
    #[command(after_help = "\
Examples:
  devcenter diff last-week.json today.json
  devcenter diff last-week.json today.json --json

Exit codes: 0 = identical, 1 = changed cells")]
    Diff {
        /// Older report
        old: PathBuf,

        /// Newer report
        new: PathBuf,

        /// Output JSON instead of a text listing
        #[arg(long)]
        json: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_json);

    let result = match cli.command {
        Commands::Rollup {
            hierarchy,
            config,
            format,
            output,
            strict,
            inputs,
        } => rollup::cmd_rollup(hierarchy, config, format, output, strict, inputs),
        Commands::Validate { hierarchy, config } => rollup::cmd_validate(hierarchy, config),
        Commands::Resolve {
            hierarchy,
            json,
            repositories,
        } => rollup::cmd_resolve(hierarchy, json, repositories),
        Commands::Diff { old, new, json } => diff::cmd_diff(old, new, json),
    };

    match result {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError { code, message, hint }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}

/// Route `log` records from the engine through a tracing fmt subscriber.
/// `DEVCENTER_LOG` takes precedence over `--verbose`.
fn init_logging(verbose: bool, json: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_env("DEVCENTER_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    let registry = tracing_subscriber::registry().with(filter);
    let result = if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };
    if let Err(e) = result {
        eprintln!("warning: logging disabled: {e}");
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    pub fn usage(msg: impl Into<String>) -> Self {
        Self { code: EXIT_USAGE, message: msg.into(), hint: None }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self { code: EXIT_CONFIG, message: msg.into(), hint: None }
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self { code: EXIT_IO, message: msg.into(), hint: None }
    }

    pub fn strict(msg: impl Into<String>) -> Self {
        Self { code: EXIT_STRICT, message: msg.into(), hint: None }
    }

    /// Add a hint to an existing error.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

impl From<RollupError> for CliError {
    fn from(err: RollupError) -> Self {
        let message = err.to_string();
        match err {
            RollupError::MissingColumn { .. } => Self::config(message)
                .with_hint("map export headers under [input.columns] in the --config file"),
            RollupError::Cycle { .. } | RollupError::UnknownParent { .. } => {
                Self::config(message).with_hint("check `parent` and `also_under` entries in the hierarchy")
            }
            RollupError::Io { .. } | RollupError::Serialize(_) => Self::io(message),
            _ => Self::config(message),
        }
    }
}
