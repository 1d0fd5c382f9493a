//! Sink nodes: one-directional consumers.

use crate::chunk::{Chunk, DataMode};
use crate::config::NodeConfig;
use crate::error::{Error, Result};
use crate::link::{channel, Consumer, InputPort, Message, StagePorts};
use crate::node::{FaultAware, NodeCore, NodeKind, Stage};
use kanal::{AsyncReceiver, AsyncSender};
use std::sync::Arc;

/// A consumer handler driven by the node's task.
pub trait Consume: Send + 'static {
    /// Consume one chunk.
    fn consume(&mut self, chunk: Chunk) -> Result<()>;
}

impl<F> Consume for F
where
    F: FnMut(Chunk) -> Result<()> + Send + 'static,
{
    fn consume(&mut self, chunk: Chunk) -> Result<()> {
        self(chunk)
    }
}

/// A one-directional consumer.
///
/// Sinks terminate a chain: they accept chunks from whatever is piped into
/// them (or written directly) and relay faults arriving over that edge.
/// The node emits `End` once end-of-input has been processed.
#[derive(Clone)]
pub struct SinkNode {
    inner: Arc<SinkInner>,
}

struct SinkInner {
    core: NodeCore,
    tx: AsyncSender<Message>,
    mode: DataMode,
}

impl FaultAware for SinkInner {
    fn core(&self) -> &NodeCore {
        &self.core
    }
}

impl SinkNode {
    /// Create a sink driven by the given handler.
    pub fn new(config: NodeConfig, consumer: impl Consume) -> Self {
        let (tx, rx) = channel(config.capacity);
        let inner = Arc::new(SinkInner {
            core: NodeCore::new(NodeKind::Sink, &config),
            tx,
            mode: config.data_mode,
        });

        tokio::spawn(drive(Arc::clone(&inner), rx, Box::new(consumer)));

        Self { inner }
    }

    /// Write a chunk directly to this sink's input.
    pub async fn write(&self, chunk: Chunk) -> Result<()> {
        self.inner
            .tx
            .send(Message::Chunk(chunk))
            .await
            .map_err(|_| Error::Closed(self.name().to_string()))
    }

    /// Signal end-of-input directly.
    pub async fn finish(&self) -> Result<()> {
        self.inner
            .tx
            .send(Message::Eos)
            .await
            .map_err(|_| Error::Closed(self.name().to_string()))
    }

    /// The mode of chunks this sink accepts.
    pub fn input_mode(&self) -> DataMode {
        self.inner.mode
    }
}

impl FaultAware for SinkNode {
    fn core(&self) -> &NodeCore {
        &self.inner.core
    }
}

impl Consumer for SinkNode {
    fn input_port(&self) -> InputPort {
        let relay = Arc::clone(&self.inner);
        InputPort {
            node: self.node_ref(),
            tx: self.inner.tx.clone(),
            entry: Arc::new(move |fault| relay.core.inject_fault(fault)),
            events: self.inner.core.events().clone(),
            mode: self.inner.mode,
        }
    }
}

impl Stage for SinkNode {
    fn duplex_ports(&self) -> Option<StagePorts> {
        None
    }
}

async fn drive(inner: Arc<SinkInner>, rx: AsyncReceiver<Message>, mut consumer: Box<dyn Consume>) {
    let name = inner.core.name().to_string();
    tracing::debug!("sink '{}' started", name);

    loop {
        match rx.recv().await {
            Ok(Message::Chunk(chunk)) => {
                if let Err(e) = consumer.consume(chunk) {
                    tracing::error!("sink '{}' error: {}", name, e);
                    inner.raise_error(&e.to_string());
                    break;
                }
            }
            Ok(Message::Eos) => {
                tracing::debug!("sink '{}' received end of input", name);
                inner.core.events().send_end();
                break;
            }
            Err(_) => {
                tracing::debug!("sink '{}': input closed", name);
                inner.core.events().send_end();
                break;
            }
        }
    }

    tracing::debug!("sink '{}' finished", name);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::NodeEvent;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_direct_write_and_finish() {
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);
        let sink = SinkNode::new(NodeConfig::named("out"), move |chunk: Chunk| {
            sink_seen
                .lock()
                .unwrap()
                .push(chunk.as_text().unwrap().into_owned());
            Ok(())
        });
        let mut events = sink.subscribe();

        sink.write(Chunk::from("a")).await.unwrap();
        sink.write(Chunk::from("b")).await.unwrap();
        sink.finish().await.unwrap();

        timeout(Duration::from_secs(1), events.wait_end())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_consume_error_raises() {
        let sink = SinkNode::new(NodeConfig::named("picky"), move |_chunk: Chunk| {
            Err(Error::Task("rejected".into()))
        });
        let mut events = sink.subscribe();

        sink.write(Chunk::from("x")).await.unwrap();

        loop {
            match timeout(Duration::from_secs(1), events.recv())
                .await
                .unwrap()
                .unwrap()
            {
                NodeEvent::Error { message, .. } => {
                    assert!(message.contains("rejected"));
                    break;
                }
                _ => continue,
            }
        }
        assert!(sink.is_faulted());
    }
}
