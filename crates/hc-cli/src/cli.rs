use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "hc-demo",
    about = "Minimal demo of the Home Connect client library",
    version
)]
pub struct Cli {
    /// OAuth access token for the Home Connect API.
    #[arg(long, env = "HOMECONNECT_TOKEN")]
    pub token: String,

    /// Talk to the Home Connect simulator instead of the production API.
    #[arg(long)]
    pub simulate: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List every paired appliance.
    List,

    /// Show everything known about one appliance.
    Show { ha_id: String },

    /// Set an option on an appliance's currently applied program.
    SetOption { ha_id: String, option_key: String, value: String },

    /// Start or stop the selected program on an appliance.
    StartProgram { ha_id: String, program_key: String },
    StopProgram { ha_id: String },

    /// Stream live events until interrupted.
    Watch,
}
