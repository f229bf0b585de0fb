//! `surge`: run and inspect website load tests

mod cli;
mod commands;
mod logging;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands, ProfileCommands};
use std::io;
use surge_config::{ConfigLoader, SurgeConfig};
use tracing::{debug, error};

fn load_config(loader: &ConfigLoader) -> Result<SurgeConfig> {
    loader.load().context("Failed to load configuration")
}

async fn dispatch(cli: Cli) -> Result<()> {
    let loader = ConfigLoader::with_dir(&cli.config_dir);
    match cli.command {
        Some(Commands::List) => commands::handle_list(&load_config(&loader)?, &mut io::stdout()),
        Some(Commands::Run(args)) => {
            let config = load_config(&loader)?;
            let report = commands::handle_run(&config, &args).await?;
            debug!("Run {} complete", report.run_id);
            Ok(())
        }
        Some(Commands::Command {
            test,
            profile,
            host,
        }) => commands::handle_command(
            &load_config(&loader)?,
            &test,
            profile.as_deref(),
            host.as_deref(),
            &mut io::stdout(),
        ),
        Some(Commands::Validate) => commands::handle_validate(&loader, &mut io::stdout()),
        Some(Commands::Profile { profile_cmd }) => match profile_cmd {
            ProfileCommands::Use { name } => {
                commands::handle_profile_use(&loader, &name, &mut io::stdout())
            }
        },
        None => {
            // If no subcommand is provided, print help
            use clap::CommandFactory;
            let mut cmd = Cli::command();
            cmd.print_help().context("Failed to print help")?;
            println!();
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init_tracing(cli.log_level.as_deref(), cli.log_format);

    if let Err(e) = dispatch(cli).await {
        error!("{:#}", e);
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}
