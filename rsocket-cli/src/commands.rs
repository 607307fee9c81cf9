//! Command execution.

use crate::{Commands, RequestOptions};
use bytes::Bytes;
use colored::Colorize;
use futures::stream::{self, StreamExt};
use rsocket_client::Client;
use rsocket_core::{Payload, PayloadStream};

/// Executes a command and returns the formatted output.
pub async fn execute(
    client: &Client,
    cmd: Commands,
    options: &RequestOptions,
) -> Result<String, Box<dyn std::error::Error>> {
    match cmd {
        Commands::Repl => Ok(String::new()),

        Commands::RequestResponse { data } => {
            let response = client.request_response(payload(&data, options)).await?;
            Ok(format_payload(&response))
        }

        Commands::FireAndForget { data } => {
            client.fire_and_forget(payload(&data, options)).await?;
            Ok("Sent".green().to_string())
        }

        Commands::Stream { data, take } => {
            let mut items = client.request_stream(payload(&data, options))?;
            if let Some(prefetch) = options.prefetch {
                items = items.prefetch(prefetch);
            }
            let items = match take {
                Some(n) => items.take(n).boxed(),
                None => items.boxed(),
            };
            collect_output(items).await
        }

        Commands::Channel { items } => {
            let mut responses = client.request_channel(outbound(&items, options))?;
            if let Some(prefetch) = options.prefetch {
                responses = responses.prefetch(prefetch);
            }
            collect_output(responses.boxed()).await
        }

        Commands::MetadataPush { metadata } => {
            client.metadata_push(Bytes::from(metadata)).await?;
            Ok("Pushed".green().to_string())
        }
    }
}

/// Builds a request payload from command-line text.
pub fn payload(data: &str, options: &RequestOptions) -> Payload {
    let payload = Payload::new(data.to_string());
    match &options.metadata {
        Some(metadata) => payload.with_metadata(metadata.clone()),
        None => payload,
    }
}

/// Payloads for a channel, one per item.
pub fn outbound(items: &[String], options: &RequestOptions) -> PayloadStream {
    let payloads: Vec<_> = items.iter().map(|item| Ok(payload(item, options))).collect();
    stream::iter(payloads).boxed()
}

/// Drains a response stream into numbered lines, stopping at the first error.
pub async fn collect_output(
    mut items: PayloadStream,
) -> Result<String, Box<dyn std::error::Error>> {
    let mut lines = Vec::new();
    let mut index = 0usize;
    while let Some(item) = items.next().await {
        let payload = item?;
        lines.push(format!(
            "{} {}",
            format!("[{}]", index).cyan(),
            format_payload(&payload)
        ));
        index += 1;
    }
    if lines.is_empty() {
        return Ok("No items".yellow().to_string());
    }
    Ok(lines.join("\n"))
}

/// Formats a payload as text, showing metadata when present.
pub fn format_payload(payload: &Payload) -> String {
    let data = String::from_utf8_lossy(&payload.data).into_owned();
    match &payload.metadata {
        Some(metadata) => format!(
            "{} {}",
            data,
            format!("(metadata: {})", String::from_utf8_lossy(metadata)).dimmed()
        ),
        None => data,
    }
}
