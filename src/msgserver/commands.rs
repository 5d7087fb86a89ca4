// Command handler for the sealchat CLI

use anyhow::{Context, Result};

use crate::config::{ClientConfig, ServerConfig};
use crate::console::runtime;
use crate::msgserver::cli::ChatCommand;
use crate::msgserver::server;

/// Execute a CLI command
pub async fn execute_command(command: ChatCommand) -> Result<()> {
    match command {
        ChatCommand::Serve(args) => handle_serve(args.into()).await,
        ChatCommand::Connect(args) => handle_connect(args.into()).await,
    }
}

async fn handle_serve(config: ServerConfig) -> Result<()> {
    tracing::info!("Starting server on {}", config.listen_addr);
    server::run(config).await.context("Server failed")
}

async fn handle_connect(config: ClientConfig) -> Result<()> {
    runtime::run(config)
        .await
        .context("Console session failed")
}
