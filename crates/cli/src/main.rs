// Stepwise CLI
//
// Design Decision: Use clap derive for ergonomic argument parsing.
// Design Decision: Support text/json/yaml output formats for scripting.
// Design Decision: Operator tool only. It inspects the executor catalog and
// validates workflow definitions; it never triggers a workflow.

mod commands;
mod output;

use clap::{Parser, Subcommand};
use stepwise_core::{init_tracing, TracingConfig};

#[derive(Parser)]
#[command(name = "stepwise")]
#[command(about = "Stepwise CLI - Inspect executors and validate workflow definitions")]
#[command(version)]
pub struct Cli {
    /// Output format
    #[arg(long, short, default_value = "text", value_parser = ["text", "json", "yaml"])]
    pub output: String,

    /// Suppress non-essential output
    #[arg(long, short)]
    pub quiet: bool,

    /// Log filter, e.g. "debug" or "stepwise_executors=debug"
    #[arg(long, env = "RUST_LOG", default_value = "warn")]
    pub log: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Inspect the executor catalog
    Executors {
        #[command(subcommand)]
        command: commands::executors::ExecutorsCommand,
    },

    /// Validate a workflow definition file (YAML or JSON)
    Validate {
        /// Path to the definition file
        file: String,
    },

    /// Show the effective engine configuration
    Config,
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(TracingConfig::from_env().with_filter(&cli.log));
    let output_format = output::OutputFormat::from_str(&cli.output);

    match cli.command {
        Commands::Executors { command } => commands::executors::run(command, output_format),
        Commands::Validate { file } => commands::validate::run(&file, output_format, cli.quiet),
        Commands::Config => commands::config::run(output_format),
    }
}
