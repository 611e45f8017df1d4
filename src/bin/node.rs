//! Node binary

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use replikv::{Config, Node};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "replikv-node")]
#[command(about = "replicated account/post key-value node")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the node with environment-driven configuration
    Serve {
        /// Dotenv-style file to preload (overrides ENV_PATH)
        #[arg(long)]
        env_file: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Serve { env_file } => {
            let config = Config::load_with(env_file);
            let mut node = Node::start(config).await?;
            tokio::signal::ctrl_c().await?;
            node.stop().await;
        }
    }

    Ok(())
}
