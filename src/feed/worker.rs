//! Feed ingestion worker
//!
//! State machine: Idle -> Connecting -> Streaming -> (Idle on disconnect).
//! While streaming, every inbound message is decoded and appended to the
//! broadcast log as one envelope per message; a message carrying several
//! instruments' updates stays together. The set of logically-desired
//! subscriptions survives a disconnect so the caller can reconnect and
//! explicitly re-issue them.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

use super::protocol::{ControlFrame, SubscriptionMode};
use super::socket::{self, RawFrame, SocketEvent};
use crate::config::FeedConfig;
use crate::log::BroadcastLog;
use crate::tick::{decode_frame, WireFrame};

/// Feed ingestion errors
#[derive(Debug, Error)]
pub enum FeedError {
    /// Control operation attempted without a live connection
    #[error("feed is not connected")]
    NotConnected,
    /// Neither an endpoint nor usable credentials are configured
    #[error("no feed endpoint or credentials configured")]
    MissingCredentials,
    /// The authorization endpoint rejected the request
    #[error("feed authorization failed: {0}")]
    Authorize(String),
    /// Websocket connection failure
    #[error("websocket connection failed: {0}")]
    Connection(String),
    /// The live connection went away mid-operation
    #[error("control channel closed")]
    ControlChannelClosed,
    /// Control frame could not be encoded
    #[error("failed to encode control frame: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Connection state of the worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedState {
    Idle,
    Connecting,
    Streaming,
}

/// Result of a [`FeedWorker::reconcile`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Keys newly subscribed
    pub subscribed: usize,
    /// Keys unsubscribed (protected keys are retained, not counted)
    pub unsubscribed: usize,
}

struct Inner {
    state: FeedState,
    /// Live control-frame sender; cleared on disconnect
    control: Option<mpsc::Sender<String>>,
    /// Logically-desired subscription set, preserved across reconnects
    subscriptions: HashSet<String>,
    /// Bumped on every connect attempt and disconnect. A socket task or an
    /// in-flight connect that no longer holds the current generation must
    /// not touch `state` or `control`.
    generation: u64,
}

/// Owns one live feed connection and its subscription set
pub struct FeedWorker {
    log: BroadcastLog,
    config: FeedConfig,
    /// Session-critical keys that unsubscribe silently retains
    protected: HashSet<String>,
    inner: Arc<Mutex<Inner>>,
}

impl FeedWorker {
    /// Create an idle worker appending to the given log
    pub fn new(log: BroadcastLog, config: FeedConfig) -> Self {
        let protected = config.protected_instruments.iter().cloned().collect();
        Self {
            log,
            config,
            protected,
            inner: Arc::new(Mutex::new(Inner {
                state: FeedState::Idle,
                control: None,
                subscriptions: HashSet::new(),
                generation: 0,
            })),
        }
    }

    /// Current connection state
    pub async fn state(&self) -> FeedState {
        self.inner.lock().await.state
    }

    /// Currently tracked subscription keys
    pub async fn subscriptions(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .inner
            .lock()
            .await
            .subscriptions
            .iter()
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    /// Connect to the upstream socket and start ingesting
    ///
    /// No-op when already connecting or streaming. Fatal configuration
    /// problems (no endpoint, missing credentials, rejected authorization)
    /// surface here; ingestion never starts half-initialized.
    pub async fn connect(&self) -> Result<(), FeedError> {
        let generation = {
            let mut inner = self.inner.lock().await;
            match inner.state {
                FeedState::Streaming | FeedState::Connecting => return Ok(()),
                FeedState::Idle => {
                    inner.state = FeedState::Connecting;
                    inner.generation += 1;
                    inner.generation
                }
            }
        };

        let result = self.establish(generation).await;
        if result.is_err() {
            let mut inner = self.inner.lock().await;
            if inner.generation == generation {
                inner.state = FeedState::Idle;
                inner.control = None;
            }
        }
        result
    }

    async fn establish(&self, generation: u64) -> Result<(), FeedError> {
        let url = self.resolve_url().await?;
        let ping_interval = Duration::from_secs(self.config.ping_interval_secs);
        let handle = socket::connect(&url, ping_interval).await?;

        {
            let mut inner = self.inner.lock().await;
            if inner.generation != generation {
                // disconnect() won the race while the socket was being set
                // up. Dropping the handle closes it before anything flows.
                tracing::debug!("connection attempt superseded, discarding socket");
                return Ok(());
            }
            inner.control = Some(handle.control);
            inner.state = FeedState::Streaming;
        }

        let log = self.log.clone();
        let inner = Arc::clone(&self.inner);
        let mut events = handle.events;
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    SocketEvent::Connected => tracing::info!("feed socket connected"),
                    SocketEvent::Frame(frame) => ingest_frame(&log, frame),
                    SocketEvent::Closed => break,
                }
            }
            release_connection(&inner, generation).await;
        });

        Ok(())
    }

    /// Close the connection and return to Idle
    ///
    /// The desired subscription set is preserved; re-subscribing after the
    /// next connect is an explicit caller action.
    pub async fn disconnect(&self) {
        let mut inner = self.inner.lock().await;
        // Dropping the sender closes the socket task's control channel,
        // which sends a close frame and winds the connection down. Bumping
        // the generation invalidates that task's final cleanup so it cannot
        // tear down a connection established after this call.
        inner.generation += 1;
        inner.control = None;
        inner.state = FeedState::Idle;
    }

    /// Subscribe to instrument keys; already-subscribed keys are skipped
    ///
    /// Returns the number of newly subscribed keys. Subscribing to an
    /// already-subscribed key is a successful no-op.
    pub async fn subscribe(
        &self,
        keys: &[String],
        mode: SubscriptionMode,
    ) -> Result<usize, FeedError> {
        let mut inner = self.inner.lock().await;
        Self::send_subscribe(&mut inner, keys, mode).await
    }

    /// Unsubscribe instrument keys
    ///
    /// Keys on the protected list are silently retained without error.
    /// Returns the number of keys actually unsubscribed.
    pub async fn unsubscribe(&self, keys: &[String]) -> Result<usize, FeedError> {
        let mut inner = self.inner.lock().await;
        Self::send_unsubscribe(&mut inner, &self.protected, keys).await
    }

    /// Reconcile the live subscription set against a desired set
    ///
    /// Issues at most one unsubscribe batch and one subscribe batch.
    pub async fn reconcile(
        &self,
        desired: &HashSet<String>,
        mode: SubscriptionMode,
    ) -> Result<ReconcileReport, FeedError> {
        let mut inner = self.inner.lock().await;
        let to_unsub: Vec<String> = inner
            .subscriptions
            .difference(desired)
            .cloned()
            .collect();
        let to_sub: Vec<String> = desired
            .difference(&inner.subscriptions)
            .cloned()
            .collect();

        let unsubscribed = if to_unsub.is_empty() {
            0
        } else {
            Self::send_unsubscribe(&mut inner, &self.protected, &to_unsub).await?
        };
        let subscribed = if to_sub.is_empty() {
            0
        } else {
            Self::send_subscribe(&mut inner, &to_sub, mode).await?
        };

        Ok(ReconcileReport {
            subscribed,
            unsubscribed,
        })
    }

    /// Re-issue the full tracked subscription set over the live connection
    ///
    /// Used by the caller after a reconnect; the tracked set survives the
    /// disconnect but the upstream session does not.
    pub async fn resubscribe(&self, mode: SubscriptionMode) -> Result<usize, FeedError> {
        let inner = self.inner.lock().await;
        let control = Self::live_control(&inner)?.clone();
        let keys: Vec<String> = inner.subscriptions.iter().cloned().collect();
        if keys.is_empty() {
            return Ok(0);
        }
        let frame = ControlFrame::subscribe(keys.clone(), mode);
        control
            .send(serde_json::to_string(&frame)?)
            .await
            .map_err(|_| FeedError::ControlChannelClosed)?;
        Ok(keys.len())
    }

    async fn send_subscribe(
        inner: &mut Inner,
        keys: &[String],
        mode: SubscriptionMode,
    ) -> Result<usize, FeedError> {
        let control = Self::live_control(inner)?.clone();
        let new_keys: Vec<String> = keys
            .iter()
            .filter(|k| !inner.subscriptions.contains(*k))
            .cloned()
            .collect();
        if new_keys.is_empty() {
            return Ok(0);
        }

        let frame = ControlFrame::subscribe(new_keys.clone(), mode);
        control
            .send(serde_json::to_string(&frame)?)
            .await
            .map_err(|_| FeedError::ControlChannelClosed)?;
        inner.subscriptions.extend(new_keys.iter().cloned());
        tracing::info!(count = new_keys.len(), mode = mode.as_str(), "subscribed");
        Ok(new_keys.len())
    }

    async fn send_unsubscribe(
        inner: &mut Inner,
        protected: &HashSet<String>,
        keys: &[String],
    ) -> Result<usize, FeedError> {
        let control = Self::live_control(inner)?.clone();
        let removable: Vec<String> = keys
            .iter()
            .filter(|k| !protected.contains(*k))
            .cloned()
            .collect();
        let retained = keys.len() - removable.len();
        if retained > 0 {
            tracing::debug!(retained, "protected keys retained on unsubscribe");
        }
        if removable.is_empty() {
            return Ok(0);
        }

        let frame = ControlFrame::unsubscribe(removable.clone());
        control
            .send(serde_json::to_string(&frame)?)
            .await
            .map_err(|_| FeedError::ControlChannelClosed)?;
        for key in &removable {
            inner.subscriptions.remove(key);
        }
        tracing::info!(count = removable.len(), "unsubscribed");
        Ok(removable.len())
    }

    fn live_control(inner: &Inner) -> Result<&mpsc::Sender<String>, FeedError> {
        if inner.state != FeedState::Streaming {
            return Err(FeedError::NotConnected);
        }
        inner.control.as_ref().ok_or(FeedError::NotConnected)
    }

    /// Resolve the socket URL, via the authorization endpoint when one is
    /// configured
    async fn resolve_url(&self) -> Result<String, FeedError> {
        if let Some(authorize_url) = &self.config.authorize_url {
            let token = self
                .config
                .access_token
                .as_deref()
                .filter(|t| !t.is_empty())
                .ok_or(FeedError::MissingCredentials)?;
            return authorize_socket_url(authorize_url, token).await;
        }

        match self.config.endpoint.as_deref() {
            Some(endpoint) if !endpoint.is_empty() => Ok(endpoint.to_string()),
            _ => Err(FeedError::MissingCredentials),
        }
    }

    #[cfg(test)]
    pub(crate) async fn attach_control_for_test(&self, control: mpsc::Sender<String>) {
        let mut inner = self.inner.lock().await;
        inner.generation += 1;
        inner.control = Some(control);
        inner.state = FeedState::Streaming;
    }
}

/// Final cleanup run by a connection's event task
///
/// A task whose generation was superseded by a disconnect or a newer connect
/// must leave the worker untouched.
async fn release_connection(inner: &Mutex<Inner>, generation: u64) {
    let mut guard = inner.lock().await;
    if guard.generation != generation {
        tracing::debug!(generation, "stale connection task exiting");
        return;
    }
    guard.state = FeedState::Idle;
    guard.control = None;
    tracing::info!("feed disconnected");
}

/// Trade an access token for an authorized socket URL
async fn authorize_socket_url(authorize_url: &str, token: &str) -> Result<String, FeedError> {
    #[derive(Deserialize)]
    struct AuthorizeResponse {
        data: AuthorizeData,
    }
    #[derive(Deserialize)]
    struct AuthorizeData {
        authorized_redirect_uri: String,
    }

    let response = reqwest::Client::new()
        .get(authorize_url)
        .bearer_auth(token)
        .header("Accept", "application/json")
        .send()
        .await
        .map_err(|e| FeedError::Authorize(e.to_string()))?;

    if !response.status().is_success() {
        return Err(FeedError::Authorize(format!(
            "authorization endpoint returned {}",
            response.status()
        )));
    }

    let body: AuthorizeResponse = response
        .json()
        .await
        .map_err(|e| FeedError::Authorize(e.to_string()))?;
    Ok(body.data.authorized_redirect_uri)
}

/// Decode one inbound frame and append it to the log
///
/// A message that fails to decode is logged and skipped; a single bad frame
/// never aborts the stream. Binary frames are appended in their JSON
/// representation so every envelope payload has one shape.
fn ingest_frame(log: &BroadcastLog, frame: RawFrame) {
    metrics::counter!("tickflow_feed_messages_total").increment(1);
    match frame {
        RawFrame::Text(text) => match decode_frame(WireFrame::Text(&text)) {
            Ok(envelope) => {
                metrics::counter!("tickflow_feed_instruments_total")
                    .increment(envelope.feeds.len() as u64);
                log.append(text);
            }
            Err(e) => {
                metrics::counter!("tickflow_decode_failures_total").increment(1);
                tracing::warn!(error = %e, "skipping undecodable text frame");
            }
        },
        RawFrame::Binary(bytes) => match decode_frame(WireFrame::Binary(&bytes)) {
            Ok(envelope) => match serde_json::to_string(&envelope) {
                Ok(json) => {
                    metrics::counter!("tickflow_feed_instruments_total")
                        .increment(envelope.feeds.len() as u64);
                    log.append(json);
                }
                Err(e) => {
                    metrics::counter!("tickflow_decode_failures_total").increment(1);
                    tracing::warn!(error = %e, "failed to re-encode binary frame");
                }
            },
            Err(e) => {
                metrics::counter!("tickflow_decode_failures_total").increment(1);
                tracing::warn!(error = %e, "skipping undecodable binary frame");
            }
        },
    }
}
