//! Single-connection websocket wrapper
//!
//! One call to [`connect`] makes one connection attempt and hands back an
//! event receiver plus a control sender. Reconnect policy deliberately lives
//! with the caller: the worker transitions to Idle on close and a fresh
//! `connect()` (followed by explicit re-subscription) starts over.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::worker::FeedError;

/// A raw inbound data frame
#[derive(Debug, Clone)]
pub enum RawFrame {
    /// JSON text frame
    Text(String),
    /// Compact binary frame
    Binary(Vec<u8>),
}

/// Connection lifecycle and data events
#[derive(Debug, Clone)]
pub enum SocketEvent {
    /// Handshake completed
    Connected,
    /// One inbound data frame
    Frame(RawFrame),
    /// Connection ended (clean close or failure); no further events follow
    Closed,
}

/// Live connection handle
///
/// Dropping `control` (or sending after the peer closed) ends the
/// connection; the driving task then emits [`SocketEvent::Closed`] and
/// exits.
pub struct SocketHandle {
    /// Inbound events in arrival order
    pub events: mpsc::Receiver<SocketEvent>,
    /// Outbound control frames (JSON text)
    pub control: mpsc::Sender<String>,
}

/// Connect to the feed socket and spawn its driving task
pub async fn connect(url: &str, ping_interval: Duration) -> Result<SocketHandle, FeedError> {
    let (ws_stream, _) = connect_async(url)
        .await
        .map_err(|e| FeedError::Connection(e.to_string()))?;

    let (mut sink, mut stream) = ws_stream.split();
    let (event_tx, event_rx) = mpsc::channel(1024);
    let (control_tx, mut control_rx) = mpsc::channel::<String>(64);

    tokio::spawn(async move {
        let _ = event_tx.send(SocketEvent::Connected).await;
        let mut ping = tokio::time::interval(ping_interval);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ping.tick().await; // first tick completes immediately

        loop {
            tokio::select! {
                inbound = stream.next() => match inbound {
                    Some(Ok(Message::Text(text))) => {
                        if event_tx
                            .send(SocketEvent::Frame(RawFrame::Text(text)))
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        if event_tx
                            .send(SocketEvent::Frame(RawFrame::Binary(bytes)))
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        if sink.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {}
                    Some(Ok(Message::Close(frame))) => {
                        tracing::info!(?frame, "feed socket closed by peer");
                        break;
                    }
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "feed socket receive error");
                        break;
                    }
                    None => break,
                },
                outbound = control_rx.recv() => match outbound {
                    Some(text) => {
                        if let Err(e) = sink.send(Message::Text(text)).await {
                            tracing::warn!(error = %e, "failed to send control frame");
                            break;
                        }
                    }
                    None => {
                        // Caller dropped the control sender: close cleanly.
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                },
                _ = ping.tick() => {
                    if sink.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                }
            }
        }

        let _ = event_tx.send(SocketEvent::Closed).await;
    });

    Ok(SocketHandle {
        events: event_rx,
        control: control_tx,
    })
}
