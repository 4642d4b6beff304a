//! Node healer CLI
//!
//! Inspects node health and remediation state through the controller's
//! HTTP API, and resets nodes halted after repeated failures.

mod client;
mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{nodes, status};

/// Node healer CLI
#[derive(Parser)]
#[command(name = "nhctl")]
#[command(author, version, about = "CLI for the Node Healer controller", long_about = None)]
pub struct Cli {
    /// Controller API URL (can also be set via NODE_HEALER_API_URL env var)
    #[arg(long, env = "NODE_HEALER_API_URL", default_value = "http://localhost:8080")]
    pub api_url: String,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Inspect and reset nodes
    #[command(subcommand)]
    Nodes(NodesCommands),

    /// Show controller health and readiness
    Status,
}

#[derive(Subcommand)]
pub enum NodesCommands {
    /// List the latest evaluation of every node
    List {
        /// Only show nodes in this remediation state (e.g. drain_failed)
        #[arg(long, short)]
        state: Option<String>,
    },

    /// Show the latest evaluation of one node
    Get {
        /// Node name
        name: String,
    },

    /// Clear a failed or halted remediation record
    Reset {
        /// Node name
        name: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let client = client::ApiClient::new(&cli.api_url)?;

    match cli.command {
        Commands::Nodes(nodes_cmd) => match nodes_cmd {
            NodesCommands::List { state } => {
                nodes::list_nodes(&client, state, cli.format).await?;
            }
            NodesCommands::Get { name } => {
                nodes::get_node(&client, &name, cli.format).await?;
            }
            NodesCommands::Reset { name } => {
                nodes::reset_node(&client, &name, cli.format).await?;
            }
        },
        Commands::Status => {
            status::show_status(&client, cli.format).await?;
        }
    }

    Ok(())
}
