use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use client_core::{ChatClient, ClientConfig, ClientEvent, RestStore, SocketSession};
use shared::domain::{RoomId, UserId};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::{wrappers::BroadcastStream, StreamExt};
use tracing::warn;

#[derive(Parser, Debug)]
struct Args {
    /// REST base url of the marketplace backend.
    #[arg(long)]
    server_url: String,
    #[arg(long)]
    user_id: String,
    /// Bearer token for the push gateway, if the backend requires one.
    #[arg(long)]
    access_token: Option<String>,
    /// Room to open directly.
    #[arg(long, conflicts_with = "peer")]
    room: Option<String>,
    /// Peer user to open (or lazily create) a conversation with.
    #[arg(long)]
    peer: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();
    let args = Args::parse();

    let user_id = UserId::new(args.user_id);
    let store = Arc::new(RestStore::new(args.server_url.clone()));
    let transport = SocketSession::new(
        &args.server_url,
        &user_id,
        args.access_token.as_deref(),
    )?;
    let client = ChatClient::with_config(store, transport, user_id, ClientConfig::default());

    client.start().await?;
    match (args.room, args.peer) {
        (Some(room), _) => client.open_room(RoomId::new(room)).await?,
        (None, Some(peer)) => {
            let room = client.open_conversation(&UserId::new(peer)).await?;
            println!("opened room {room}");
        }
        (None, None) => anyhow::bail!("pass --room or --peer"),
    }

    let mut events = BroadcastStream::new(client.subscribe_events());
    let printer = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            let event = match event {
                Ok(event) => event,
                Err(err) => {
                    warn!("event stream lagged: {err}");
                    continue;
                }
            };
            match event {
                ClientEvent::MessagesUpdated { messages, .. } => {
                    if let Some(last) = messages.last() {
                        let who = if last.is_mine {
                            "me"
                        } else {
                            last.sender_name.as_deref().unwrap_or(last.sender_id.as_str())
                        };
                        println!("[{}] {}: {}", last.sent_at, who, last.content);
                    }
                }
                ClientEvent::TypingChanged {
                    user_id, is_typing, ..
                } => {
                    if is_typing {
                        println!("{user_id} is typing...");
                    }
                }
                ClientEvent::ConnectionChanged { connected } => {
                    println!("(connection: {})", if connected { "up" } else { "down" });
                }
                ClientEvent::SendFailed { message_id } => {
                    println!("(send failed for {message_id}; message not delivered)");
                }
                ClientEvent::Error(message) => eprintln!("error: {message}"),
                ClientEvent::ProductsUpdated { .. } => {}
            }
        }
    });

    println!("type a message and press enter; /typing on|off, /quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "" => continue,
            "/quit" => break,
            "/typing on" => client.set_typing(true).await?,
            "/typing off" => client.set_typing(false).await?,
            text => {
                if let Err(err) = client.send_message(text).await {
                    eprintln!("send failed: {err}");
                }
            }
        }
    }

    printer.abort();
    client.shutdown().await;
    Ok(())
}
