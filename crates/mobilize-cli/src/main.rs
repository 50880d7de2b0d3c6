//! Mobilize CLI tool.

use clap::{Parser, Subcommand};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::ApiClient;

#[derive(Parser)]
#[command(name = "mobilize")]
#[command(about = "Mobilize build orchestrator CLI", long_about = None)]
struct Cli {
    /// API server URL
    #[arg(long, env = "MOBILIZE_API_URL", default_value = "http://localhost:3000")]
    api_url: String,

    /// User the requests are made as
    #[arg(long, env = "MOBILIZE_USER", default_value = "anonymous")]
    user: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect and manage build jobs
    Builds {
        #[command(subcommand)]
        command: BuildCommands,
    },
    /// Upload a web project archive for conversion
    Upload {
        /// Path to the zip archive
        archive: String,
        /// Project name (defaults to the archive name)
        #[arg(long)]
        project: Option<String>,
        /// Target platform: ios, android or both
        #[arg(long, default_value = "both")]
        platform: String,
    },
    /// Validate a server configuration file
    Validate {
        /// Path to the configuration file
        #[arg(default_value = "mobilize.kdl")]
        path: String,
    },
}

#[derive(Subcommand)]
enum BuildCommands {
    /// List recent builds
    List {
        /// Maximum number of builds to show
        #[arg(long, default_value = "20")]
        limit: u32,
    },
    /// Show build details
    Show {
        /// Build ID
        id: String,
    },
    /// Poll a build until it finishes
    Watch {
        /// Build ID
        id: String,
        /// Seconds between polls
        #[arg(long, default_value = "3")]
        interval: u64,
    },
    /// Cancel a build
    Cancel {
        /// Build ID
        id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Builds { command } => {
            let client = ApiClient::new(&cli.api_url, &cli.user)?;
            match command {
                BuildCommands::List { limit } => {
                    commands::builds::list(&client, limit).await?;
                }
                BuildCommands::Show { id } => {
                    commands::builds::show(&client, &id).await?;
                }
                BuildCommands::Watch { id, interval } => {
                    commands::builds::watch(&client, &id, Duration::from_secs(interval.max(1)))
                        .await?;
                }
                BuildCommands::Cancel { id } => {
                    commands::builds::cancel(&client, &id).await?;
                }
            }
        }
        Commands::Upload {
            archive,
            project,
            platform,
        } => {
            let client = ApiClient::new(&cli.api_url, &cli.user)?;
            commands::upload::upload(&client, &archive, project, &platform).await?;
        }
        Commands::Validate { path } => {
            commands::validate(&path)?;
        }
    }

    Ok(())
}
