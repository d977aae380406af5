//! Persistent message channels
//!
//! A channel is a named, ordered, duplex pipe between the relay and one UI
//! endpoint. [`channel`] creates a connected pair: the relay keeps the
//! [`RelayChannel`], the UI side (or a transport adapter such as the WebSocket
//! bridge) keeps the [`RemoteChannel`]. Either side may disconnect at any time;
//! dropping the remote end counts as a disconnect.

use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::error::{RelayError, Result};

/// Anything the relay can post messages to.
pub trait MessageSink: Send + Sync {
    /// Name the channel was opened with.
    fn channel_name(&self) -> &str;

    /// Hand a message to the channel. Fails when the remote end is gone.
    fn post_message(&self, message: Value) -> Result<()>;

    /// Close the channel from the relay side.
    fn disconnect(&self);

    fn is_disconnected(&self) -> bool;
}

#[derive(Debug)]
struct Shared {
    name: String,
    closed: CancellationToken,
}

/// Create a connected channel pair named `name`.
pub fn channel(name: impl Into<String>) -> (RelayChannel, RemoteChannel) {
    let shared = Arc::new(Shared {
        name: name.into(),
        closed: CancellationToken::new(),
    });
    let (to_remote, from_relay) = mpsc::unbounded_channel();
    let (to_relay, from_remote) = mpsc::unbounded_channel();

    let relay = RelayChannel {
        sender: ChannelSender {
            shared: shared.clone(),
            tx: to_remote,
        },
        receiver: ChannelReceiver {
            shared: shared.clone(),
            rx: from_remote,
        },
    };
    let remote = RemoteChannel {
        shared,
        tx: to_relay,
        rx: from_relay,
    };
    (relay, remote)
}

/// Relay-side end of a channel.
#[derive(Debug)]
pub struct RelayChannel {
    sender: ChannelSender,
    receiver: ChannelReceiver,
}

impl RelayChannel {
    pub fn name(&self) -> &str {
        &self.sender.shared.name
    }

    pub fn sender(&self) -> ChannelSender {
        self.sender.clone()
    }

    /// Next inbound message, or `None` once the channel is disconnected.
    pub async fn recv(&mut self) -> Option<Value> {
        self.receiver.recv().await
    }

    pub fn into_parts(self) -> (ChannelSender, ChannelReceiver) {
        (self.sender, self.receiver)
    }
}

/// Cloneable posting half of a relay-side channel.
#[derive(Debug, Clone)]
pub struct ChannelSender {
    shared: Arc<Shared>,
    tx: mpsc::UnboundedSender<Value>,
}

impl ChannelSender {
    /// Resolves once either side has disconnected.
    pub async fn disconnected(&self) {
        self.shared.closed.cancelled().await
    }
}

impl MessageSink for ChannelSender {
    fn channel_name(&self) -> &str {
        &self.shared.name
    }

    fn post_message(&self, message: Value) -> Result<()> {
        if self.shared.closed.is_cancelled() {
            return Err(RelayError::Disconnected(self.shared.name.clone()));
        }
        self.tx
            .send(message)
            .map_err(|_| RelayError::Disconnected(self.shared.name.clone()))
    }

    fn disconnect(&self) {
        self.shared.closed.cancel();
    }

    fn is_disconnected(&self) -> bool {
        self.shared.closed.is_cancelled() || self.tx.is_closed()
    }
}

/// Inbound half of a relay-side channel.
#[derive(Debug)]
pub struct ChannelReceiver {
    shared: Arc<Shared>,
    rx: mpsc::UnboundedReceiver<Value>,
}

impl ChannelReceiver {
    pub async fn recv(&mut self) -> Option<Value> {
        tokio::select! {
            biased;
            msg = self.rx.recv() => msg,
            _ = self.shared.closed.cancelled() => None,
        }
    }
}

/// UI-side end of a channel.
#[derive(Debug)]
pub struct RemoteChannel {
    shared: Arc<Shared>,
    tx: mpsc::UnboundedSender<Value>,
    rx: mpsc::UnboundedReceiver<Value>,
}

impl RemoteChannel {
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn post_message(&self, message: Value) -> Result<()> {
        if self.shared.closed.is_cancelled() {
            return Err(RelayError::Disconnected(self.shared.name.clone()));
        }
        self.tx
            .send(message)
            .map_err(|_| RelayError::Disconnected(self.shared.name.clone()))
    }

    /// Next message from the relay. Queued messages are still drained after the
    /// relay disconnects; `None` means the channel is closed and empty.
    pub async fn recv(&mut self) -> Option<Value> {
        tokio::select! {
            biased;
            msg = self.rx.recv() => msg,
            _ = self.shared.closed.cancelled() => self.rx.try_recv().ok(),
        }
    }

    pub fn disconnect(&self) {
        self.shared.closed.cancel();
    }

    pub fn is_disconnected(&self) -> bool {
        self.shared.closed.is_cancelled()
    }

    pub async fn disconnected(&self) {
        self.shared.closed.cancelled().await
    }
}

impl Drop for RemoteChannel {
    fn drop(&mut self) {
        self.shared.closed.cancel();
    }
}

/// Callback half of a one-shot request. Consumed by the single response.
#[derive(Debug)]
pub struct Responder {
    tx: oneshot::Sender<Value>,
}

impl Responder {
    /// Create a responder and the receiver the caller awaits.
    pub fn new() -> (Self, oneshot::Receiver<Value>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }

    pub(crate) fn send(self, message: Value) -> Result<()> {
        self.tx
            .send(message)
            .map_err(|_| RelayError::Disconnected("one-shot caller".to_string()))
    }
}
