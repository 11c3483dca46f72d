//! Topi CLI - inspect and play compiled dialogue.

use anyhow::Result;
use clap::{Parser, Subcommand};
use topi_vm::{Severity, set_log_handler, set_log_severity};
use tracing_subscriber::filter::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(
    name = "topi",
    version,
    about = "Inspect and play compiled Topi dialogue",
    long_about = "Works with compiled Topi dialogue containers.\n\n\
                  Show tables:  topi inspect intro.topi\n\
                  Play a bough: topi play intro.topi --bough main"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show globals, boughs and externs of a container
    Inspect(commands::inspect::InspectCommand),

    /// Play a bough interactively
    Play(commands::play::PlayCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(default.parse()?))
        .with_writer(std::io::stderr)
        .init();

    // VM diagnostics go to stderr so they never mix with dialogue
    set_log_handler(|severity, message| eprintln!("[{severity}] {message}"));
    set_log_severity(if cli.verbose {
        Severity::Debug
    } else {
        Severity::Warn
    });

    match cli.command {
        Commands::Inspect(cmd) => cmd.run(),
        Commands::Play(cmd) => cmd.run().await,
    }
}
