//! fintrack CLI - import bank CSV exports into a local ledger

use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod output;

use commands::{account, config, import, institution, logs, mapper};

/// fintrack - personal finance imports in your terminal
#[derive(Parser)]
#[command(name = "ft", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage institutions
    Institution {
        #[command(subcommand)]
        command: institution::InstitutionCommands,
    },

    /// Manage accounts
    Account {
        #[command(subcommand)]
        command: account::AccountCommands,
    },

    /// Guess, save and list CSV column mappings
    Mapper {
        #[command(subcommand)]
        command: mapper::MapperCommands,
    },

    /// Parse, review, commit and retract CSV imports
    Import {
        #[command(subcommand)]
        command: import::ImportCommands,
    },

    /// Show and change settings
    Config {
        #[command(subcommand)]
        command: config::ConfigCommands,
    },

    /// View and manage the event log
    Logs {
        #[command(subcommand)]
        command: logs::LogsCommands,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            output::error(&format!("Error: {:#}", e));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Institution { command } => institution::run(command),
        Commands::Account { command } => account::run(command),
        Commands::Mapper { command } => mapper::run(command),
        Commands::Import { command } => import::run(command),
        Commands::Config { command } => config::run(command),
        Commands::Logs { command } => logs::run(command),
    }
}
