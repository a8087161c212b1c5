//! Plume CLI: benchmarks, gradient checks and config tooling.

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "plume")]
#[command(version, about = "Plume: differentiable smoke rendering and advection")]
struct Cli {
    /// Log filter, e.g. `info` or `plume_core=debug`. Overrides RUST_LOG.
    #[arg(long, global = true)]
    log: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run benchmark scenarios.
    Benchmark {
        /// Which scenario to run (uniform_cube, voxel_shift, smoke_rollout, all).
        #[arg(short, long, default_value = "all")]
        scenario: String,

        /// Output CSV file path.
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Compare the adjoint kernels against finite differences.
    Gradcheck {
        /// Inputs perturbed per check.
        #[arg(short = 'n', long, default_value_t = 16)]
        samples: usize,

        #[arg(long, default_value_t = 0)]
        seed: u64,

        /// Write the reports as JSON.
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Print an engine config preset as TOML.
    Config {
        #[arg(value_enum, default_value = "default")]
        preset: commands::ConfigPreset,
    },

    /// Validate an engine config file (TOML).
    Validate {
        path: String,
    },
}

fn main() {
    let cli = Cli::parse();

    let filter = match &cli.log {
        Some(directive) => EnvFilter::new(directive),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let result = match cli.command {
        Commands::Benchmark { scenario, output } => {
            commands::benchmark(&scenario, output.as_deref())
        }
        Commands::Gradcheck {
            samples,
            seed,
            output,
        } => commands::gradcheck(samples, seed, output.as_deref()),
        Commands::Config { preset } => commands::config(preset),
        Commands::Validate { path } => commands::validate(&path),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
