mod commands;
mod scenario;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

/// Workflow authorization and lifecycle engine.
#[derive(Parser)]
#[command(
    name = "procflow",
    version,
    about = "Workflow authorization and lifecycle engine"
)]
struct Cli {
    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text", value_enum)]
    output: OutputFormat,

    /// Suppress non-essential output
    #[arg(long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate definition resources against the JSON Schema and the
    /// deployment rules
    Validate {
        /// Definition resource files, checked together as one deployment
        #[arg(required = true)]
        resources: Vec<PathBuf>,
    },

    /// Run a scripted scenario against a fresh in-memory engine
    Run {
        /// Path to the scenario JSON file
        scenario: PathBuf,
        /// Engine configuration (TOML)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { resources } => {
            commands::validate::cmd_validate(&resources, cli.output, cli.quiet);
        }
        Commands::Run { scenario, config } => {
            commands::run::cmd_run(&scenario, config.as_deref(), cli.output, cli.quiet);
        }
    }
}

pub(crate) fn report_error(msg: &str, output: OutputFormat, quiet: bool) {
    if quiet {
        return;
    }
    match output {
        OutputFormat::Text => eprintln!("{}", msg),
        OutputFormat::Json => {
            eprintln!("{}", serde_json::json!({ "error": msg }));
        }
    }
}
