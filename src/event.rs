//! Per-node event system for async event handling.
//!
//! Every node owns an [`EventSender`]; application code observes a node by
//! subscribing receivers from it. The fault relay between nodes does not go
//! through this channel — relays use the explicit subscriptions wired at
//! connection time — but every fault a node observes is also broadcast here
//! so observers can watch it.

use crate::chunk::Chunk;
use crate::fault::{Fault, NodeRef};
use std::fmt;
use std::future::Future;
use tokio::sync::broadcast;

/// Events emitted by a node.
#[derive(Debug, Clone)]
pub enum NodeEvent {
    /// The node produced a chunk on its output.
    Data(Chunk),

    /// The node completed (end-of-output, or end-of-input for a sink).
    End,

    /// The node's own error channel fired.
    Error {
        /// The error message.
        message: String,
        /// Name of the node the error originated at.
        node: String,
    },

    /// A fault was raised at or relayed through this node.
    Fault(Fault),

    /// An upstream peer was connected to this node.
    Connected {
        /// The upstream node.
        peer: NodeRef,
    },

    /// An upstream peer was disconnected from this node.
    Disconnected {
        /// The upstream node.
        peer: NodeRef,
    },
}

impl fmt::Display for NodeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeEvent::Data(chunk) => write!(f, "Data: {chunk}"),
            NodeEvent::End => write!(f, "End"),
            NodeEvent::Error { message, node } => write!(f, "Error in {node}: {message}"),
            NodeEvent::Fault(fault) => write!(f, "{fault}"),
            NodeEvent::Connected { peer } => write!(f, "Connected: {peer}"),
            NodeEvent::Disconnected { peer } => write!(f, "Disconnected: {peer}"),
        }
    }
}

/// Sender for node events.
///
/// Held by the node and its driver task; cloned freely.
#[derive(Clone)]
pub struct EventSender {
    sender: broadcast::Sender<NodeEvent>,
}

impl EventSender {
    /// Create a new event sender with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Send an event.
    ///
    /// Returns the number of receivers that got the event; 0 when nobody
    /// is listening (which is fine).
    pub fn send(&self, event: NodeEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    /// Send a data event.
    pub fn send_data(&self, chunk: Chunk) {
        self.send(NodeEvent::Data(chunk));
    }

    /// Send an end event.
    pub fn send_end(&self) {
        self.send(NodeEvent::End);
    }

    /// Send an error event.
    pub fn send_error(&self, message: impl Into<String>, node: impl Into<String>) {
        self.send(NodeEvent::Error {
            message: message.into(),
            node: node.into(),
        });
    }

    /// Create a receiver for events.
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }
}

impl Default for EventSender {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Receiver for node events.
///
/// Multiple receivers can be created from a single sender.
pub struct EventReceiver {
    receiver: broadcast::Receiver<NodeEvent>,
}

impl EventReceiver {
    /// Receive the next event.
    ///
    /// Returns `None` if the sender has been dropped.
    pub async fn recv(&mut self) -> Option<NodeEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(_)) => {
                    // Missed some events, continue to the next one
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Try to receive an event without blocking.
    pub fn try_recv(&mut self) -> Option<NodeEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }

    /// Wait for completion or an error.
    ///
    /// Returns `Ok(())` on [`NodeEvent::End`], `Err(message)` on the first
    /// [`NodeEvent::Error`]. Other events are skipped.
    pub async fn wait_end(&mut self) -> Result<(), String> {
        while let Some(event) = self.recv().await {
            match event {
                NodeEvent::End => return Ok(()),
                NodeEvent::Error { message, node } => {
                    return Err(format!("Error in {node}: {message}"));
                }
                _ => continue,
            }
        }
        Err("Event channel closed unexpectedly".to_string())
    }
}

/// A stream adapter for receiving events.
///
/// Implements `Stream` for use with async iteration.
pub struct EventStream {
    receiver: EventReceiver,
}

impl EventStream {
    /// Create a new event stream from a receiver.
    pub fn new(receiver: EventReceiver) -> Self {
        Self { receiver }
    }
}

impl futures::Stream for EventStream {
    type Item = NodeEvent;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        let fut = self.receiver.recv();
        tokio::pin!(fut);
        fut.poll(cx)
    }
}

impl EventSender {
    /// Create a stream of events.
    pub fn stream(&self) -> EventStream {
        EventStream::new(self.subscribe())
    }
}
