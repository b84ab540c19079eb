//! Kiln CLI, the command-line interface of the Kiln incremental build system.
//!
//! Provides `kiln build` for incremental build passes, `kiln graph` to show
//! the chunk plan, and `kiln invalidate` / `kiln clean` for cache
//! maintenance.

#![warn(missing_docs)]

mod build;
mod cache;
mod command;
mod graph;
mod pipeline;

use std::io::IsTerminal;
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

/// Environment variable overriding the log filter.
const LOG_ENV: &str = "KILN_LOG";

/// Kiln, an incremental module build system.
#[derive(Parser, Debug)]
#[command(name = "kiln", version, about = "Kiln incremental build system")]
pub struct Cli {
    /// Suppress all output except errors.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Enable verbose (debug-level) output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Control colored output.
    #[arg(long, global = true, value_enum, default_value_t = ColorChoice::Auto)]
    pub color: ColorChoice,

    /// Path to a custom `kiln.toml` configuration file.
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// The subcommand to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run an incremental build pass.
    Build(BuildArgs),
    /// Print the chunks of a pass in build order.
    Graph(GraphArgs),
    /// Forget the cached state of one target.
    Invalidate(InvalidateArgs),
    /// Forget all cached state.
    Clean,
}

/// Arguments for the `kiln build` subcommand.
#[derive(Parser, Debug)]
pub struct BuildArgs {
    /// Build test targets as well.
    #[arg(short, long)]
    pub tests: bool,

    /// Build independent chunks concurrently.
    #[arg(short = 'j', long)]
    pub parallel: bool,

    /// Output format of the report.
    #[arg(short, long, value_enum, default_value_t = ReportFormat::Text)]
    pub format: ReportFormat,
}

/// Arguments for the `kiln graph` subcommand.
#[derive(Parser, Debug)]
pub struct GraphArgs {
    /// Include test targets.
    #[arg(short, long)]
    pub tests: bool,

    /// Output format.
    #[arg(short, long, value_enum, default_value_t = ReportFormat::Text)]
    pub format: ReportFormat,
}

/// Arguments for the `kiln invalidate` subcommand.
#[derive(Parser, Debug)]
pub struct InvalidateArgs {
    /// Module name.
    pub module: String,

    /// Invalidate the test target instead of the production target.
    #[arg(short, long)]
    pub tests: bool,
}

/// Controls whether colored output is produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ColorChoice {
    /// Detect from terminal capabilities.
    Auto,
    /// Always produce colored output.
    Always,
    /// Never produce colored output.
    Never,
}

/// Report output format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    /// Human-readable terminal output.
    Text,
    /// Machine-readable JSON output.
    Json,
}

/// Global settings derived from CLI flags.
pub struct GlobalArgs {
    /// Whether to suppress non-error output.
    pub quiet: bool,
    /// Whether to print verbose/debug information.
    pub verbose: bool,
    /// Whether to use colored output.
    pub color: bool,
    /// Optional path to a custom config file.
    pub config: Option<String>,
}

fn main() {
    let cli = Cli::parse();

    let color = match cli.color {
        ColorChoice::Auto => std::io::stderr().is_terminal(),
        ColorChoice::Always => true,
        ColorChoice::Never => false,
    };
    init_tracing(cli.quiet, cli.verbose, color);

    let global = GlobalArgs {
        quiet: cli.quiet,
        verbose: cli.verbose,
        color,
        config: cli.config,
    };

    let result = match cli.command {
        Command::Build(ref args) => build::run(args, &global),
        Command::Graph(ref args) => graph::run(args, &global),
        Command::Invalidate(ref args) => cache::invalidate(args, &global),
        Command::Clean => cache::clean(&global),
    };

    match result {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(1);
        }
    }
}

/// The default log filter for the verbosity flags.
fn default_filter(quiet: bool, verbose: bool) -> &'static str {
    if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "warn"
    }
}

/// Installs the log subscriber. `KILN_LOG` takes precedence over the flags.
fn init_tracing(quiet: bool, verbose: bool, color: bool) {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(default_filter(quiet, verbose)));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(color)
        .with_target(false)
        .try_init();
}
