// CLI commands for the chat server and console client

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::{ClientConfig, ServerConfig};

/// sealchat command line
#[derive(Debug, Parser)]
#[command(name = "sealchat")]
#[command(about = "Encrypted direct messaging over a line-framed TCP protocol")]
#[command(version)]
pub struct ChatCli {
    #[command(subcommand)]
    pub command: ChatCommand,
}

impl ChatCli {
    /// Default log filter for a command when `RUST_LOG` is unset
    pub fn default_log_filter(&self) -> &'static str {
        match self.command {
            ChatCommand::Serve(_) => "sealchat=info,warn",
            // Keep the interactive console readable
            ChatCommand::Connect(_) => "sealchat=warn",
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum ChatCommand {
    /// Run the chat server
    Serve(ServeArgs),

    /// Connect to a server with the interactive console
    Connect(ConnectArgs),
}

#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Address to listen on
    #[arg(short, long, env = "SEALCHAT_LISTEN", default_value = "127.0.0.1:12000")]
    pub listen: String,

    /// SQLite database file (":memory:" for a throwaway store)
    #[arg(short, long, env = "SEALCHAT_DATABASE", default_value = "sealchat.db")]
    pub database: PathBuf,

    /// Token signing secret (random per start if unset)
    #[arg(long, env = "SEALCHAT_JWT_SECRET", hide_env_values = true)]
    pub jwt_secret: Option<String>,

    /// Token signing algorithm: HS256, HS384 or HS512
    #[arg(long, env = "SEALCHAT_JWT_ALGORITHM", default_value = "HS256")]
    pub jwt_algorithm: String,

    /// Token lifetime in hours
    #[arg(long, env = "SEALCHAT_TOKEN_VALIDITY_HOURS", default_value = "24")]
    pub token_validity_hours: i64,

    /// RSA modulus size for the handshake keypair
    #[arg(long, default_value = "2048")]
    pub rsa_bits: usize,
}

#[derive(Debug, Args)]
pub struct ConnectArgs {
    /// Server address
    #[arg(short, long, env = "SEALCHAT_SERVER", default_value = "127.0.0.1:12000")]
    pub server: String,
}

impl From<ServeArgs> for ServerConfig {
    fn from(args: ServeArgs) -> Self {
        Self {
            listen_addr: args.listen,
            database: args.database,
            jwt_secret: args.jwt_secret,
            jwt_algorithm: args.jwt_algorithm,
            token_validity_hours: args.token_validity_hours,
            rsa_bits: args.rsa_bits,
        }
    }
}

impl From<ConnectArgs> for ClientConfig {
    fn from(args: ConnectArgs) -> Self {
        Self {
            server_addr: args.server,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serve_arguments() {
        let cli = ChatCli::parse_from([
            "sealchat",
            "serve",
            "--listen",
            "0.0.0.0:9000",
            "--database",
            ":memory:",
            "--jwt-secret",
            "s3cret",
            "--jwt-algorithm",
            "HS512",
        ]);
        assert_eq!(cli.default_log_filter(), "sealchat=info,warn");

        let ChatCommand::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        let config = ServerConfig::from(args);
        assert_eq!(config.listen_addr, "0.0.0.0:9000");
        assert!(config.is_in_memory());
        assert_eq!(config.jwt_secret.as_deref(), Some("s3cret"));
        assert_eq!(config.jwt_algorithm, "HS512");
    }

    #[test]
    fn test_connect_arguments() {
        let cli = ChatCli::parse_from(["sealchat", "connect", "-s", "10.0.0.2:12000"]);
        assert_eq!(cli.default_log_filter(), "sealchat=warn");

        let ChatCommand::Connect(args) = cli.command else {
            panic!("expected connect");
        };
        assert_eq!(ClientConfig::from(args).server_addr, "10.0.0.2:12000");
    }

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        ChatCli::command().debug_assert();
    }
}
