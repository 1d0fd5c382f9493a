//! Transform nodes: bidirectional stages.

use crate::chunk::{Chunk, DataMode};
use crate::config::NodeConfig;
use crate::error::{Error, Result};
use crate::link::{
    channel, Consumer, InputPort, Message, OutputPort, OutputState, Producer, StagePorts,
};
use crate::node::{FaultAware, NodeCore, NodeKind, Stage};
use kanal::{AsyncReceiver, AsyncSender};
use std::sync::Arc;

/// A transform handler driven by the node's task.
///
/// Return `Ok(Some(chunk))` to emit downstream, `Ok(None)` to drop the
/// chunk, `Err(..)` to surface an error (which stops the driver).
pub trait Transform: Send + 'static {
    /// Transform one input chunk.
    fn transform(&mut self, chunk: Chunk) -> Result<Option<Chunk>>;
}

impl<F> Transform for F
where
    F: FnMut(Chunk) -> Result<Option<Chunk>> + Send + 'static,
{
    fn transform(&mut self, chunk: Chunk) -> Result<Option<Chunk>> {
        self(chunk)
    }
}

/// A bidirectional stage: consumes from upstream, produces downstream.
///
/// Transforms relay faults arriving from their upstream edge and can
/// originate faults of their own. They are the building block pipelines
/// compose.
#[derive(Clone)]
pub struct TransformNode {
    inner: Arc<TransformInner>,
}

struct TransformInner {
    core: NodeCore,
    in_tx: AsyncSender<Message>,
    state: Arc<OutputState>,
    mode: DataMode,
}

impl FaultAware for TransformInner {
    fn core(&self) -> &NodeCore {
        &self.core
    }
}

impl TransformNode {
    /// Create a transform driven by the given handler.
    pub fn new(config: NodeConfig, transform: impl Transform) -> Self {
        let (in_tx, in_rx) = channel(config.capacity);
        let (out_tx, out_rx) = channel(config.capacity);
        let inner = Arc::new(TransformInner {
            core: NodeCore::new(NodeKind::Transform, &config),
            in_tx,
            state: Arc::new(OutputState::new(out_rx)),
            mode: config.data_mode,
        });

        tokio::spawn(drive(
            Arc::clone(&inner),
            in_rx,
            out_tx,
            Box::new(transform),
        ));

        Self { inner }
    }

    /// Write a chunk directly to this transform's input.
    pub async fn write(&self, chunk: Chunk) -> Result<()> {
        self.inner
            .in_tx
            .send(Message::Chunk(chunk))
            .await
            .map_err(|_| Error::Closed(self.name().to_string()))
    }

    /// Signal end-of-input directly.
    pub async fn finish(&self) -> Result<()> {
        self.inner
            .in_tx
            .send(Message::Eos)
            .await
            .map_err(|_| Error::Closed(self.name().to_string()))
    }

    /// The mode of chunks this transform accepts.
    pub fn input_mode(&self) -> DataMode {
        self.inner.mode
    }

    /// The mode of chunks this transform produces.
    pub fn output_mode(&self) -> DataMode {
        self.inner.mode
    }
}

impl FaultAware for TransformNode {
    fn core(&self) -> &NodeCore {
        &self.inner.core
    }
}

impl Consumer for TransformNode {
    fn input_port(&self) -> InputPort {
        let relay = Arc::clone(&self.inner);
        InputPort {
            node: self.node_ref(),
            tx: self.inner.in_tx.clone(),
            entry: Arc::new(move |fault| relay.core.inject_fault(fault)),
            events: self.inner.core.events().clone(),
            mode: self.inner.mode,
        }
    }
}

impl Producer for TransformNode {
    fn output_port(&self) -> OutputPort {
        OutputPort {
            node: self.node_ref(),
            state: Arc::clone(&self.inner.state),
            hub: Arc::clone(self.inner.core.hub()),
            mode: self.inner.mode,
        }
    }
}

impl Stage for TransformNode {
    fn duplex_ports(&self) -> Option<StagePorts> {
        Some(StagePorts {
            input: self.input_port(),
            output: self.output_port(),
        })
    }
}

async fn drive(
    inner: Arc<TransformInner>,
    in_rx: AsyncReceiver<Message>,
    out_tx: AsyncSender<Message>,
    mut transform: Box<dyn Transform>,
) {
    let name = inner.core.name().to_string();
    tracing::debug!("transform '{}' started", name);

    loop {
        match in_rx.recv().await {
            Ok(Message::Chunk(chunk)) => match transform.transform(chunk) {
                Ok(Some(out)) => {
                    inner.core.events().send_data(out.clone());
                    if out_tx.send(Message::Chunk(out)).await.is_err() {
                        tracing::warn!("transform '{}': output closed", name);
                        break;
                    }
                }
                Ok(None) => {
                    tracing::trace!("transform '{}' filtered out chunk", name);
                }
                Err(e) => {
                    tracing::error!("transform '{}' error: {}", name, e);
                    inner.raise_error(&e.to_string());
                    break;
                }
            },
            Ok(Message::Eos) => {
                tracing::debug!("transform '{}' received end of input", name);
                let _ = out_tx.send(Message::Eos).await;
                inner.core.events().send_end();
                break;
            }
            Err(_) => {
                tracing::debug!("transform '{}': input closed", name);
                let _ = out_tx.send(Message::Eos).await;
                inner.core.events().send_end();
                break;
            }
        }
    }

    tracing::debug!("transform '{}' finished", name);
}
