use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use gen_config::gen_config;
use run::run;

mod gen_config;
mod run;

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a default simulation config file
    GenConfig {
        /// File to write the simulation config to
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Run the simulation described by a config file
    Run {
        /// Simulation config file (JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// File to write the recorded time series to (JSON)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Suppress per-event narration
        #[arg(long)]
        quiet: bool,
    },
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Simulate credit-based flow control and priority scheduling in a small switched network.", long_about = None)]
struct Args {
    #[command(subcommand)]
    pub command: Command,
}

fn main() -> Result<()> {
    let args = Args::parse();
    match args.command {
        Command::GenConfig { output } => gen_config(&output),
        Command::Run {
            config,
            output,
            quiet,
        } => run(&config, output.as_deref(), quiet),
    }
}
