//! Diagnostic signaling client
//!
//! Joins a room on a running relay and logs every event relayed to it. With
//! `--offer` it also plays the offering side: once another peer announces
//! itself with `ready`, the given session description is sent to the room.
//! No peer connection is ever established.

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};

use crate::config::ClientArgs;
use crate::model::message::{ClientEvent, ServerEvent};

pub async fn run(args: ClientArgs) -> Result<()> {
    let mut offer: Option<Value> = args
        .offer
        .as_deref()
        .map(|o| serde_json::from_str(o))
        .transpose()
        .context("--offer must be valid JSON")?;

    let (ws, _) = tokio_tungstenite::connect_async(args.url.as_str())
        .await
        .with_context(|| format!("connecting to {}", args.url))?;
    let (mut ws_sender, mut ws_receiver) = ws.split();
    info!("Connected to relay at {}", args.url);

    let join = ClientEvent::Join {
        room: args.room.clone(),
    };
    ws_sender.send(Message::Text(join.encode()?)).await?;
    info!("Joined room {:?}, waiting for peers...", args.room);

    while let Some(msg) = ws_receiver.next().await {
        let text = match msg? {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };

        match ServerEvent::decode(&text) {
            Ok(ServerEvent::Ready) => {
                info!("Peer ready in {:?}", args.room);
                if let Some(description) = offer.take() {
                    let event = ClientEvent::Offer {
                        room: args.room.clone(),
                        description,
                    };
                    ws_sender.send(Message::Text(event.encode()?)).await?;
                    info!("Sent offer");
                }
            }
            Ok(ServerEvent::Offer { description }) => info!("Received offer: {}", description),
            Ok(ServerEvent::Answer { description }) => info!("Received answer: {}", description),
            Ok(ServerEvent::Candidate { candidate }) => {
                info!("Received ICE candidate: {}", candidate)
            }
            Ok(ServerEvent::Error { message }) => warn!("Relay rejected a message: {}", message),
            Err(e) => warn!("Failed to parse signaling message: {}", e),
        }
    }

    info!("Relay closed the connection");
    Ok(())
}
