//! Wiring between nodes: data edges and their fault subscriptions.
//!
//! An edge created by [`connect`] does two things for its lifetime: it
//! pumps chunks from the upstream node's output into the downstream node's
//! input (backpressured by the bounded channel), and it subscribes the
//! downstream node to the upstream node's fault channel. Disconnecting the
//! edge removes exactly that subscription — the fault graph is partitioned
//! at the cut, with no dangling listeners.

use crate::chunk::{Chunk, DataMode};
use crate::error::{Error, Result};
use crate::event::{EventSender, NodeEvent};
use crate::fault::{FaultEntry, FaultHub, NodeRef, SubscriptionId};
use crate::node::FaultAware;
use kanal::{AsyncReceiver, AsyncSender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Message passed between nodes.
#[derive(Debug)]
pub(crate) enum Message {
    /// A data chunk.
    Chunk(Chunk),
    /// End of stream signal.
    Eos,
}

/// Create a bounded node channel with the given backpressure window.
pub(crate) fn channel(capacity: usize) -> (AsyncSender<Message>, AsyncReceiver<Message>) {
    kanal::bounded_async(capacity)
}

/// The receiving side of a node's output channel, shared between the node
/// and whatever edge is currently reading from it.
pub(crate) struct OutputState {
    rx: AsyncReceiver<Message>,
    connected: AtomicBool,
}

impl OutputState {
    pub(crate) fn new(rx: AsyncReceiver<Message>) -> Self {
        Self {
            rx,
            connected: AtomicBool::new(false),
        }
    }
}

/// The producer side of a node, handed to [`connect`].
#[derive(Clone)]
pub struct OutputPort {
    pub(crate) node: NodeRef,
    pub(crate) state: Arc<OutputState>,
    pub(crate) hub: Arc<FaultHub>,
    pub(crate) mode: DataMode,
}

/// The consumer side of a node, handed to [`connect`].
#[derive(Clone)]
pub struct InputPort {
    pub(crate) node: NodeRef,
    pub(crate) tx: AsyncSender<Message>,
    pub(crate) entry: FaultEntry,
    pub(crate) events: EventSender,
    pub(crate) mode: DataMode,
}

/// Both ports of a transform-shaped node, as seen by pipeline composition.
pub struct StagePorts {
    pub(crate) input: InputPort,
    pub(crate) output: OutputPort,
}

/// A node whose output can be wired into a consumer.
pub trait Producer: FaultAware {
    /// The port an edge reads from.
    fn output_port(&self) -> OutputPort;

    /// Wire this node's output into `down`. Equivalent to [`connect`].
    fn pipe(&self, down: &dyn Consumer) -> Result<Link>
    where
        Self: Sized,
    {
        connect(self, down)
    }
}

/// A node whose input can receive from a producer.
///
/// Source nodes do not implement this: they are the only node type that
/// cannot receive upstream faults.
pub trait Consumer: FaultAware {
    /// The port an edge writes into.
    fn input_port(&self) -> InputPort;
}

/// A live edge in the connection graph.
///
/// Dropping the handle leaves the edge wired; only [`Link::disconnect`]
/// removes it.
pub struct Link {
    up: NodeRef,
    down: NodeRef,
    hub: Arc<FaultHub>,
    sub: SubscriptionId,
    state: Arc<OutputState>,
    pump: JoinHandle<()>,
    down_events: EventSender,
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link").finish_non_exhaustive()
    }
}

impl Link {
    /// The upstream endpoint of this edge.
    pub fn upstream(&self) -> &NodeRef {
        &self.up
    }

    /// The downstream endpoint of this edge.
    pub fn downstream(&self) -> &NodeRef {
        &self.down
    }

    /// Tear the edge down.
    ///
    /// Removes the fault subscription (later faults from upstream no longer
    /// reach downstream), stops the data pump, frees the upstream output
    /// for rewiring, and emits `Disconnected` on the downstream node.
    /// In-flight tasks already submitted downstream are unaffected.
    pub fn disconnect(self) {
        self.hub.unsubscribe(self.sub);
        self.pump.abort();
        self.state.connected.store(false, Ordering::SeqCst);
        self.down_events.send(NodeEvent::Disconnected {
            peer: self.up.clone(),
        });
        tracing::debug!("disconnected '{}' -> '{}'", self.up, self.down);
    }
}

/// Wire `up`'s output into `down`'s input.
///
/// Subscribes `down` to `up`'s fault channel for the lifetime of the edge,
/// spawns the data pump, and emits `Connected` on `down`. A producer can
/// feed one downstream at a time; reconnecting after a disconnect creates
/// a fresh subscription.
pub fn connect(up: &dyn Producer, down: &dyn Consumer) -> Result<Link> {
    connect_ports(&up.output_port(), &down.input_port())
}

pub(crate) fn connect_ports(out: &OutputPort, inp: &InputPort) -> Result<Link> {
    if out.state.connected.swap(true, Ordering::SeqCst) {
        return Err(Error::AlreadyConnected(out.node.name().to_string()));
    }

    let sub = out.hub.subscribe(Arc::clone(&inp.entry));

    let rx = out.state.rx.clone();
    let tx = inp.tx.clone();
    let up = out.node.clone();
    let down = inp.node.clone();
    let pump = tokio::spawn(pump(rx, tx, up.clone(), down.clone()));

    inp.events.send(NodeEvent::Connected { peer: up.clone() });
    tracing::debug!("connected '{}' -> '{}'", up, down);

    Ok(Link {
        up,
        down,
        hub: Arc::clone(&out.hub),
        sub,
        state: Arc::clone(&out.state),
        pump,
        down_events: inp.events.clone(),
    })
}

/// Move messages across one edge until end-of-stream.
///
/// A closed upstream channel counts as end-of-stream: the upstream driver
/// stopped without signaling, and downstream must still complete.
async fn pump(
    rx: AsyncReceiver<Message>,
    tx: AsyncSender<Message>,
    up: NodeRef,
    down: NodeRef,
) {
    loop {
        match rx.recv().await {
            Ok(Message::Chunk(chunk)) => {
                if tx.send(Message::Chunk(chunk)).await.is_err() {
                    tracing::warn!("edge '{}' -> '{}': downstream input closed", up, down);
                    break;
                }
            }
            Ok(Message::Eos) => {
                let _ = tx.send(Message::Eos).await;
                break;
            }
            Err(_) => {
                let _ = tx.send(Message::Eos).await;
                break;
            }
        }
    }
    tracing::trace!("pump '{}' -> '{}' stopped", up, down);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeConfig;
    use crate::node::{SinkNode, SourceNode};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::timeout;

    fn collecting_sink(name: &str) -> (SinkNode, Arc<Mutex<Vec<Chunk>>>) {
        let seen: Arc<Mutex<Vec<Chunk>>> = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);
        let sink = SinkNode::new(NodeConfig::named(name), move |chunk: Chunk| {
            sink_seen.lock().unwrap().push(chunk);
            Ok(())
        });
        (sink, seen)
    }

    #[tokio::test]
    async fn test_connect_moves_chunks() {
        let source = SourceNode::new(NodeConfig::named("src"));
        let (sink, seen) = collecting_sink("snk");
        let mut sink_events = sink.subscribe();

        connect(&source, &sink).unwrap();

        source.push(Chunk::from("a")).await.unwrap();
        source.push(Chunk::from("b")).await.unwrap();
        source.finish().await.unwrap();

        timeout(Duration::from_secs(1), sink_events.wait_end())
            .await
            .unwrap()
            .unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].as_text().unwrap(), "a");
        assert_eq!(seen[1].as_text().unwrap(), "b");
    }

    #[tokio::test]
    async fn test_second_connect_rejected() {
        let source = SourceNode::new(NodeConfig::named("src"));
        let (sink_a, _) = collecting_sink("a");
        let (sink_b, _) = collecting_sink("b");

        connect(&source, &sink_a).unwrap();
        let err = connect(&source, &sink_b).unwrap_err();
        assert!(matches!(err, Error::AlreadyConnected(name) if name == "src"));
    }

    #[tokio::test]
    async fn test_reconnect_after_disconnect() {
        let source = SourceNode::new(NodeConfig::named("src"));
        let (sink_a, _) = collecting_sink("a");
        let (sink_b, _) = collecting_sink("b");

        let link = connect(&source, &sink_a).unwrap();
        assert_eq!(source.fault_subscriber_count(), 1);

        link.disconnect();
        assert_eq!(source.fault_subscriber_count(), 0);

        connect(&source, &sink_b).unwrap();
        assert_eq!(source.fault_subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_connect_disconnect_events() {
        let source = SourceNode::new(NodeConfig::named("src"));
        let (sink, _) = collecting_sink("snk");
        let mut events = sink.subscribe();

        let link = connect(&source, &sink).unwrap();
        match events.recv().await.unwrap() {
            NodeEvent::Connected { peer } => assert_eq!(peer.name(), "src"),
            other => panic!("unexpected event: {other}"),
        }

        link.disconnect();
        match events.recv().await.unwrap() {
            NodeEvent::Disconnected { peer } => assert_eq!(peer.name(), "src"),
            other => panic!("unexpected event: {other}"),
        }
    }
}
