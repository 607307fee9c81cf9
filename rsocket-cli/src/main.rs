//! rsocket-cli - Command-line client for RSocket servers
//!
//! Provides both a REPL and one-shot command execution.

mod commands;
mod repl;

use clap::{Parser, Subcommand};
use colored::Colorize;
use rsocket_client::{Client, ClientConfig};
use std::net::SocketAddr;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rsocket-cli")]
#[command(about = "Command-line client for RSocket servers")]
#[command(version)]
struct Cli {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:7878", env = "RSOCKET_SERVER")]
    server: SocketAddr,

    /// Metadata attached to every request payload
    #[arg(short, long, global = true)]
    metadata: Option<String>,

    /// Credit requested up front for streams and channels
    #[arg(short, long, global = true)]
    prefetch: Option<u32>,

    /// Data MIME type announced in SETUP
    #[arg(long, default_value = "text/plain")]
    data_mime_type: String,

    /// Metadata MIME type announced in SETUP
    #[arg(long, default_value = "text/plain")]
    metadata_mime_type: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Start interactive REPL
    Repl,

    /// Send a request and print the response
    RequestResponse {
        /// Request data
        data: String,
    },

    /// Send a request without waiting for a response
    FireAndForget {
        /// Request data
        data: String,
    },

    /// Request a stream and print every item
    Stream {
        /// Request data
        data: String,

        /// Cancel after this many items
        #[arg(short, long)]
        take: Option<usize>,
    },

    /// Open a channel, send the items and print every response
    Channel {
        /// Items to send, in order
        #[arg(required = true)]
        items: Vec<String>,
    },

    /// Push connection-level metadata
    MetadataPush {
        /// Metadata to push
        metadata: String,
    },
}

/// Request options shared by every command.
#[derive(Debug, Clone, Default)]
pub(crate) struct RequestOptions {
    pub metadata: Option<String>,
    pub prefetch: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = ClientConfig::new(cli.server)
        .with_mime_types(cli.metadata_mime_type.clone(), cli.data_mime_type.clone());
    if let Some(prefetch) = cli.prefetch {
        config = config.with_prefetch(prefetch);
    }
    let client = Client::new(config);
    let options = RequestOptions {
        metadata: cli.metadata,
        prefetch: cli.prefetch,
    };

    match cli.command {
        Some(Commands::Repl) | None => {
            repl::run(client, cli.server, options).await?;
        }
        Some(cmd) => {
            // Connect for one-shot command
            client.connect().await.map_err(|e| {
                eprintln!("{}: {}", "Connection failed".red(), e);
                e
            })?;

            let result = commands::execute(&client, cmd, &options).await;

            match result {
                Ok(output) => {
                    if !output.is_empty() {
                        println!("{}", output);
                    }
                }
                Err(e) => {
                    eprintln!("{}: {}", "Error".red(), e);
                    client.close();
                    std::process::exit(1);
                }
            }

            client.close();
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stream_command() {
        let cli = Cli::parse_from(["rsocket-cli", "stream", "hello", "--take", "3", "-m", "meta"]);
        assert_eq!(cli.metadata.as_deref(), Some("meta"));
        match cli.command {
            Some(Commands::Stream { data, take }) => {
                assert_eq!(data, "hello");
                assert_eq!(take, Some(3));
            }
            _ => panic!("expected stream command"),
        }
    }

    #[test]
    fn test_default_server() {
        let cli = Cli::parse_from(["rsocket-cli"]);
        assert_eq!(cli.server.port(), 7878);
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_channel_requires_items() {
        assert!(Cli::try_parse_from(["rsocket-cli", "channel"]).is_err());
    }
}
