mod cli;
mod commands;
mod output;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Command};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::List => commands::list(cli.token, cli.simulate).await,
        Command::Show { ha_id } => commands::show(cli.token, cli.simulate, ha_id).await,
        Command::SetOption { ha_id, option_key, value } => {
            commands::set_option(cli.token, cli.simulate, ha_id, option_key, value).await
        }
        Command::StartProgram { ha_id, program_key } => {
            commands::start_program(cli.token, cli.simulate, ha_id, program_key).await
        }
        Command::StopProgram { ha_id } => commands::stop_program(cli.token, cli.simulate, ha_id).await,
        Command::Watch => commands::watch(cli.token, cli.simulate).await,
    }
}
