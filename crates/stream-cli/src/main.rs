use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use stream_core::EngineConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod loader;

use commands::*;

#[derive(Parser)]
#[command(name = "cqe")]
#[command(author, version, about = "Continuous query engine for data streams", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Engine configuration file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Print per-operator statistics after the run
    #[arg(short, long, global = true)]
    stats: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a plan description
    Run {
        /// Plan file (JSON)
        #[arg(short, long)]
        plan: PathBuf,
    },

    /// Run the built-in sensor pipeline
    Demo {
        /// Random seed of the generator
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Number of readings to generate
        #[arg(short, long, default_value = "1000")]
        tuples: u64,

        /// Value range that cuts a frame
        #[arg(long, default_value = "15.0")]
        threshold: f64,
    },

    /// List the operator types plan descriptions can use
    Operators,

    /// Write the effective engine configuration as JSON
    Config {
        /// Output file
        #[arg(short, long, default_value = "engine.json")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose)?;

    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };
    if cli.stats {
        config = config.with_statistics(true);
    }

    print_banner();

    match cli.command {
        Commands::Run { plan } => run_plan(&plan, config)?,
        Commands::Demo {
            seed,
            tuples,
            threshold,
        } => run_demo(seed, tuples, threshold, config)?,
        Commands::Operators => list_operators()?,
        Commands::Config { output } => write_config(&output, &config)?,
    }

    Ok(())
}

fn init_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        "stream_cli=debug,stream_core=debug,stream_runtime=debug,stream_operators=debug"
    } else {
        "stream_cli=info,stream_runtime=warn,stream_operators=warn"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    Ok(())
}

fn print_banner() {
    println!(
        "{}",
        r#"
   ___ ___  ___
  / __/ _ \| __|
 | (_| (_) | _|
  \___\__\_\___|
    "#
        .bright_cyan()
    );
    println!(
        "{}",
        "Continuous Query Engine v0.1.0".bright_yellow()
    );
}
