//! Interactive REPL.

use crate::commands::{collect_output, format_payload, outbound, payload};
use crate::RequestOptions;
use bytes::Bytes;
use colored::Colorize;
use futures::StreamExt;
use rsocket_client::Client;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{Config, Editor};
use std::net::SocketAddr;
use std::path::PathBuf;

const HELP_TEXT: &str = r#"
Available commands:
  help                          Show this help

  rr <data>                     Request-response
  fnf <data>                    Fire-and-forget
  stream <data> [take]          Request-stream, optionally cancelled after [take] items
  channel <item> [item...]      Request-channel, one payload per item
  push <metadata>               Metadata push

  meta <metadata>               Attach metadata to later requests
  meta                          Stop attaching metadata
  status                        Show connection status

  quit, exit                    Exit the REPL
"#;

pub async fn run(
    client: Client,
    addr: SocketAddr,
    mut options: RequestOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", "rsocket CLI".bold().cyan());
    println!("Connecting to {}...", addr);

    client.connect().await?;
    println!("{}", "Connected!".green());

    let config = Config::builder()
        .history_ignore_space(true)
        .auto_add_history(true)
        .build();
    let mut rl: Editor<(), DefaultHistory> = Editor::with_config(config)?;

    let history_path = home::home_dir()
        .map(|h| h.join(".rsocket_history"))
        .unwrap_or_else(|| PathBuf::from(".rsocket_history"));
    let _ = rl.load_history(&history_path);

    println!("Type 'help' for available commands.\n");

    loop {
        let prompt = format!("{} ", "rsocket>".cyan());
        match rl.readline(&prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                match execute_repl_command(&client, &mut options, line).await {
                    Ok(Some(output)) => println!("{}\n", output),
                    Ok(None) => break, // Exit command
                    Err(e) => println!("{}: {}\n", "Error".red(), e),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("^D");
                break;
            }
            Err(err) => {
                println!("{}: {:?}", "Error".red(), err);
                break;
            }
        }
    }

    let _ = rl.save_history(&history_path);

    client.close();
    println!("{}", "Disconnected.".dimmed());

    Ok(())
}

async fn execute_repl_command(
    client: &Client,
    options: &mut RequestOptions,
    line: &str,
) -> Result<Option<String>, Box<dyn std::error::Error>> {
    let (cmd, rest) = match line.split_once(char::is_whitespace) {
        Some((cmd, rest)) => (cmd.to_lowercase(), rest.trim()),
        None => (line.to_lowercase(), ""),
    };

    match cmd.as_str() {
        "help" | "?" => Ok(Some(HELP_TEXT.to_string())),

        "quit" | "exit" | "q" => Ok(None),

        "status" => {
            let status = if client.is_connected() {
                "connected".green()
            } else {
                "disconnected".red()
            };
            let streams = client
                .requester()
                .map(|r| r.active_streams())
                .unwrap_or(0);
            Ok(Some(format!(
                "{} ({} active streams)",
                status, streams
            )))
        }

        "meta" => {
            if rest.is_empty() {
                options.metadata = None;
                Ok(Some("Metadata cleared".dimmed().to_string()))
            } else {
                options.metadata = Some(rest.to_string());
                Ok(Some(format!("Metadata set to {}", rest.cyan())))
            }
        }

        "rr" | "request-response" => {
            if rest.is_empty() {
                return Ok(Some("Usage: rr <data>".to_string()));
            }
            let response = client.request_response(payload(rest, options)).await?;
            Ok(Some(format_payload(&response)))
        }

        "fnf" | "fire-and-forget" => {
            if rest.is_empty() {
                return Ok(Some("Usage: fnf <data>".to_string()));
            }
            client.fire_and_forget(payload(rest, options)).await?;
            Ok(Some("Sent".green().to_string()))
        }

        "stream" | "s" => {
            let (data, take) = parse_stream_args(rest);
            if data.is_empty() {
                return Ok(Some("Usage: stream <data> [take]".to_string()));
            }
            let mut items = client.request_stream(payload(data, options))?;
            if let Some(prefetch) = options.prefetch {
                items = items.prefetch(prefetch);
            }
            let items = match take {
                Some(n) => items.take(n).boxed(),
                None => items.boxed(),
            };
            Ok(Some(collect_output(items).await?))
        }

        "channel" | "ch" => {
            let items: Vec<String> = rest.split_whitespace().map(str::to_string).collect();
            if items.is_empty() {
                return Ok(Some("Usage: channel <item> [item...]".to_string()));
            }
            let mut responses = client.request_channel(outbound(&items, options))?;
            if let Some(prefetch) = options.prefetch {
                responses = responses.prefetch(prefetch);
            }
            Ok(Some(collect_output(responses.boxed()).await?))
        }

        "push" => {
            if rest.is_empty() {
                return Ok(Some("Usage: push <metadata>".to_string()));
            }
            client.metadata_push(Bytes::from(rest.to_string())).await?;
            Ok(Some("Pushed".green().to_string()))
        }

        _ => Ok(Some(format!(
            "Unknown command: {}. Type 'help' for help.",
            cmd
        ))),
    }
}

/// Splits `<data> [take]`; a trailing number is the take count.
fn parse_stream_args(rest: &str) -> (&str, Option<usize>) {
    if let Some((data, last)) = rest.rsplit_once(char::is_whitespace) {
        if let Ok(take) = last.parse() {
            return (data.trim(), Some(take));
        }
    }
    (rest, None)
}
