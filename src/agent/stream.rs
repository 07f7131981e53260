//! Agent side of the persistent command stream.
//!
//! Optional low-latency path: connect a WebSocket to the server, execute
//! pushed commands, and answer on the same socket. The polling loop stays
//! active regardless, so a dropped stream only costs latency.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::watch;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::commands::CommandEnvelope;

use super::commands::CommandExecutor;
use super::http::{AgentClient, Backoff};

pub async fn run_command_stream(
    client: AgentClient,
    executor: CommandExecutor,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut backoff = Backoff::default();

    loop {
        if *shutdown.borrow() {
            break;
        }

        match connect_and_serve(&client, &executor, &mut shutdown).await {
            Ok(()) => break, // clean shutdown
            Err(e) => {
                let delay = backoff.next(None);
                warn!("command stream lost ({e}); reconnecting in {}s", delay.as_secs());
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.changed() => break,
                }
            }
        }
    }

    debug!("command stream task stopped");
}

async fn connect_and_serve(
    client: &AgentClient,
    executor: &CommandExecutor,
    shutdown: &mut watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let mut request = client.stream_url().into_client_request()?;
    if let Some(token) = client.token() {
        request
            .headers_mut()
            .insert("Authorization", format!("Bearer {token}").parse()?);
    }

    let (socket, _) = connect_async(request).await?;
    info!("command stream connected");
    let (mut write, mut read) = socket.split();

    loop {
        tokio::select! {
            message = read.next() => {
                let Some(message) = message else {
                    anyhow::bail!("server closed the stream");
                };
                match message? {
                    Message::Text(text) => {
                        let envelope: CommandEnvelope = match serde_json::from_str(&text) {
                            Ok(envelope) => envelope,
                            Err(e) => {
                                warn!("unparseable command frame: {e}");
                                continue;
                            }
                        };
                        let report = executor.execute(&envelope).await;
                        let frame = serde_json::to_string(&report)?;
                        write.send(Message::Text(frame)).await?;
                    }
                    Message::Ping(payload) => {
                        write.send(Message::Pong(payload)).await?;
                    }
                    Message::Close(_) => anyhow::bail!("server closed the stream"),
                    _ => {}
                }
            }
            _ = shutdown.changed() => {
                let _ = write.send(Message::Close(None)).await;
                let _ = tokio::time::timeout(Duration::from_secs(2), read.next()).await;
                return Ok(());
            }
        }
    }
}
