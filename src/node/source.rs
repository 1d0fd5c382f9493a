//! Source nodes: one-directional producers.

use crate::chunk::{Chunk, DataMode};
use crate::config::NodeConfig;
use crate::error::{Error, Result};
use crate::link::{channel, Message, OutputPort, OutputState, Producer, StagePorts};
use crate::node::{FaultAware, NodeCore, NodeKind, Stage};
use kanal::AsyncSender;
use std::sync::{Arc, Mutex};

/// A producer handler driven by the node's task.
///
/// Return `Ok(Some(chunk))` to emit, `Ok(None)` to signal end-of-stream,
/// `Err(..)` to surface an error (which stops the driver).
pub trait Produce: Send + 'static {
    /// Produce the next chunk.
    fn produce(&mut self) -> Result<Option<Chunk>>;
}

impl<F> Produce for F
where
    F: FnMut() -> Result<Option<Chunk>> + Send + 'static,
{
    fn produce(&mut self) -> Result<Option<Chunk>> {
        self()
    }
}

/// A one-directional producer.
///
/// Sources originate data and may originate faults, but are the only node
/// type that cannot receive upstream faults — nothing can be piped into
/// them.
///
/// Two modes of operation:
/// - handler-driven via [`SourceNode::with_producer`], where the node's
///   task pulls chunks from a [`Produce`] handler until it reports
///   end-of-stream;
/// - push-driven via [`SourceNode::new`], where application code calls
///   [`push`](SourceNode::push) and [`finish`](SourceNode::finish).
///
/// # Example
///
/// ```rust,ignore
/// let source = SourceNode::new(NodeConfig::named("feed"));
/// connect(&source, &sink)?;
/// source.push(Chunk::from("hello")).await?;
/// source.finish().await?;
/// ```
#[derive(Clone)]
pub struct SourceNode {
    inner: Arc<SourceInner>,
}

struct SourceInner {
    core: NodeCore,
    state: Arc<OutputState>,
    // Push side of the output channel; taken on finish so the channel can
    // close.
    tx: Mutex<Option<AsyncSender<Message>>>,
    mode: DataMode,
}

impl FaultAware for SourceInner {
    fn core(&self) -> &NodeCore {
        &self.core
    }
}

impl SourceNode {
    /// Create a push-driven source.
    pub fn new(config: NodeConfig) -> Self {
        Self::build(config, None)
    }

    /// Create a handler-driven source.
    ///
    /// The handler runs on the node's task immediately; its chunks flow
    /// into the output channel subject to backpressure.
    pub fn with_producer(config: NodeConfig, producer: impl Produce) -> Self {
        Self::build(config, Some(Box::new(producer)))
    }

    fn build(config: NodeConfig, producer: Option<Box<dyn Produce>>) -> Self {
        let (tx, rx) = channel(config.capacity);
        let inner = Arc::new(SourceInner {
            core: NodeCore::new(NodeKind::Source, &config),
            state: Arc::new(OutputState::new(rx)),
            tx: Mutex::new(Some(tx.clone())),
            mode: config.data_mode,
        });

        if let Some(producer) = producer {
            tokio::spawn(drive(Arc::clone(&inner), tx, producer));
        }

        Self { inner }
    }

    /// Push a chunk into the output channel.
    ///
    /// Blocks (asynchronously) when the backpressure window is full.
    pub async fn push(&self, chunk: Chunk) -> Result<()> {
        let tx = self
            .inner
            .tx
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| Error::Closed(self.name().to_string()))?;
        self.inner.core.events().send_data(chunk.clone());
        tx.send(Message::Chunk(chunk))
            .await
            .map_err(|_| Error::Closed(self.name().to_string()))
    }

    /// Signal end-of-stream.
    pub async fn finish(&self) -> Result<()> {
        let tx = self
            .inner
            .tx
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| Error::Closed(self.name().to_string()))?;
        let result = tx
            .send(Message::Eos)
            .await
            .map_err(|_| Error::Closed(self.name().to_string()));
        self.inner.core.events().send_end();
        result
    }

    /// The mode of chunks this source produces.
    pub fn output_mode(&self) -> DataMode {
        self.inner.mode
    }
}

impl FaultAware for SourceNode {
    fn core(&self) -> &NodeCore {
        &self.inner.core
    }
}

impl Producer for SourceNode {
    fn output_port(&self) -> OutputPort {
        OutputPort {
            node: self.node_ref(),
            state: Arc::clone(&self.inner.state),
            hub: Arc::clone(self.inner.core.hub()),
            mode: self.inner.mode,
        }
    }
}

impl Stage for SourceNode {
    fn duplex_ports(&self) -> Option<StagePorts> {
        None
    }
}

async fn drive(inner: Arc<SourceInner>, tx: AsyncSender<Message>, mut producer: Box<dyn Produce>) {
    let name = inner.core.name().to_string();
    tracing::debug!("source '{}' started", name);

    loop {
        match producer.produce() {
            Ok(Some(chunk)) => {
                inner.core.events().send_data(chunk.clone());
                if tx.send(Message::Chunk(chunk)).await.is_err() {
                    tracing::warn!("source '{}': output closed", name);
                    break;
                }
            }
            Ok(None) => {
                tracing::debug!("source '{}' reached end of stream", name);
                let _ = tx.send(Message::Eos).await;
                inner.core.events().send_end();
                break;
            }
            Err(e) => {
                tracing::error!("source '{}' error: {}", name, e);
                inner.raise_error(&e.to_string());
                break;
            }
        }
    }

    // Drop the push side too so the output channel can fully close.
    inner.tx.lock().unwrap().take();
    tracing::debug!("source '{}' finished", name);
}
