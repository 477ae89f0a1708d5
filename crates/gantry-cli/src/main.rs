//! Gantry CLI entrypoint.

use clap::Parser;

mod commands;
mod config;
mod executor;
mod handlers;

use commands::{Commands, ConfigCommands};
use config::CliConfig;
use executor::BoxError;

#[derive(Parser)]
#[command(name = "gantry")]
#[command(author, version, about = "Gantry workflow coordinator", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = CliConfig::load().unwrap_or_default();

    match cli.command {
        Commands::Init => handlers::init().await?,
        Commands::Validate { path } => handlers::validate(&path).await?,
        Commands::Plan { path, trigger } => handlers::plan(&path, trigger).await?,
        Commands::Collect { catalog, trigger } => handlers::collect(&catalog, trigger).await?,
        Commands::Run {
            path,
            trigger,
            git_ref,
            verbose,
        } => handlers::run_workflow(&config, &path, trigger, git_ref, verbose).await?,
        Commands::Config { command } => match command {
            ConfigCommands::Show => handlers::show_config(&config)?,
            ConfigCommands::Set { key, value } => handlers::set_config(&key, &value)?,
        },
    }

    Ok(())
}
