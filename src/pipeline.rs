//! Pipeline composition: an ordered sequence of transform-shaped nodes
//! behaving as a single transform-shaped node.
//!
//! Members are wired in order with the standard [`connect`] primitive. The
//! first member is the inlet, the last the outlet. Externally the pipeline
//! looks like one node: writes land on the inlet, the outlet's output is
//! the pipeline's output, member errors resurface as the pipeline's own
//! errors, and faults arriving from outside are routed into the inlet so
//! the whole internal chain observes them before they resurface at the
//! outlet. Nesting pipelines inside pipelines recurses through the same
//! indirection, bottoming out at plain transforms.

use crate::chunk::{Chunk, DataMode};
use crate::config::NodeConfig;
use crate::error::{Error, Result};
use crate::event::NodeEvent;
use crate::fault::{Fault, FaultEntry};
use crate::link::{
    connect_ports, Consumer, InputPort, Link, Message, OutputPort, OutputState, Producer,
    StagePorts,
};
use crate::node::{FaultAware, NodeCore, NodeKind, Stage};
use kanal::AsyncSender;
use std::sync::Arc;

/// An ordered, non-empty sequence of transform-shaped nodes composed into
/// a single transform-shaped unit.
///
/// # Example
///
/// ```rust,ignore
/// let decode = TransformNode::new(NodeConfig::named("decode"), decode_fn);
/// let enrich = TransformNode::new(NodeConfig::named("enrich"), enrich_fn);
/// let pipeline = Pipeline::new(
///     vec![Box::new(decode), Box::new(enrich)],
///     NodeConfig::named("ingest"),
/// )?;
/// connect(&source, &pipeline)?;
/// connect(&pipeline, &sink)?;
/// ```
#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<PipelineInner>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline").finish_non_exhaustive()
    }
}

struct PipelineInner {
    core: Arc<NodeCore>,
    // Members and internal links are owned for the pipeline's lifetime;
    // membership is immutable after construction.
    #[allow(dead_code)]
    members: Vec<Box<dyn Stage>>,
    #[allow(dead_code)]
    links: Vec<Link>,
    inlet_tx: AsyncSender<Message>,
    inlet_entry: FaultEntry,
    outlet_state: Arc<OutputState>,
    input_mode: DataMode,
    output_mode: DataMode,
}

impl Pipeline {
    /// Compose `members` in order into one node.
    ///
    /// Fails with [`Error::EmptyPipeline`] on an empty list and
    /// [`Error::InvalidMember`] when a member is not transform-shaped
    /// (sources and sinks cannot sit inside a pipeline).
    ///
    /// The pipeline's consumption mode comes from the first member's input
    /// mode and its production mode from the last member's output mode;
    /// `config.data_mode` is ignored.
    pub fn new(members: Vec<Box<dyn Stage>>, config: NodeConfig) -> Result<Self> {
        if members.is_empty() {
            return Err(Error::EmptyPipeline);
        }

        let mut ports = Vec::with_capacity(members.len());
        for member in &members {
            let port = member.duplex_ports().ok_or_else(|| Error::InvalidMember {
                name: member.name().to_string(),
                kind: member.kind(),
            })?;
            ports.push(port);
        }

        let core = Arc::new(NodeCore::new(NodeKind::Pipeline, &config));

        // Wire members in sequence with the standard connect primitive.
        let mut links = Vec::with_capacity(ports.len().saturating_sub(1));
        for pair in ports.windows(2) {
            links.push(connect_ports(&pair[0].output, &pair[1].input)?);
        }

        // Any member's error resurfaces, unchanged, as the pipeline's own.
        // This is a flat broadcast independent of position, and it stays on
        // the error channel: no fault is derived from a member error.
        for member in &members {
            let mut member_events = member.subscribe();
            let events = core.events().clone();
            tokio::spawn(async move {
                while let Some(event) = member_events.recv().await {
                    if let NodeEvent::Error { message, node } = event {
                        events.send(NodeEvent::Error { message, node });
                    }
                }
            });
        }

        let inlet = &ports[0];
        let outlet = ports.last().expect("members is non-empty");

        // Faults surfacing at the outlet are the pipeline's own occurrence:
        // mark faulted and pass the payload on unchanged, both to event
        // observers and to whatever is wired downstream of the pipeline.
        let resurface = Arc::clone(&core);
        outlet
            .output
            .hub
            .subscribe(Arc::new(move |fault: &Fault| resurface.inject_fault(fault)));

        // Mirror the outlet's data and completion as the pipeline's own.
        {
            let mut outlet_events = members.last().expect("members is non-empty").subscribe();
            let events = core.events().clone();
            let name = core.name().to_string();
            tokio::spawn(async move {
                while let Some(event) = outlet_events.recv().await {
                    match event {
                        NodeEvent::Data(chunk) => events.send_data(chunk),
                        NodeEvent::End => {
                            tracing::debug!("pipeline '{}' reached end of output", name);
                            events.send_end();
                            break;
                        }
                        _ => {}
                    }
                }
            });
        }

        let inner = Arc::new(PipelineInner {
            core,
            inlet_tx: inlet.input.tx.clone(),
            inlet_entry: Arc::clone(&inlet.input.entry),
            outlet_state: Arc::clone(&outlet.output.state),
            input_mode: inlet.input.mode,
            output_mode: outlet.output.mode,
            members,
            links,
        });

        tracing::debug!(
            "pipeline '{}' composed from {} members",
            inner.core.name(),
            inner.members.len()
        );

        Ok(Self { inner })
    }

    /// Write a chunk; it is forwarded to the inlet's input.
    pub async fn write(&self, chunk: Chunk) -> Result<()> {
        self.inner
            .inlet_tx
            .send(Message::Chunk(chunk))
            .await
            .map_err(|_| Error::Closed(self.name().to_string()))
    }

    /// Signal end-of-input; the shutdown propagates through the internal
    /// chain and the pipeline completes when the outlet does.
    pub async fn finish(&self) -> Result<()> {
        self.inner
            .inlet_tx
            .send(Message::Eos)
            .await
            .map_err(|_| Error::Closed(self.name().to_string()))
    }

    /// Number of members.
    pub fn member_count(&self) -> usize {
        self.inner.members.len()
    }

    /// The consumption mode, derived from the inlet's input mode.
    pub fn input_mode(&self) -> DataMode {
        self.inner.input_mode
    }

    /// The production mode, derived from the outlet's output mode.
    pub fn output_mode(&self) -> DataMode {
        self.inner.output_mode
    }
}

impl FaultAware for Pipeline {
    fn core(&self) -> &NodeCore {
        &self.inner.core
    }

    /// Originate a fault at the pipeline.
    ///
    /// The occurrence carries the pipeline as its origin and is fed to the
    /// inlet, so every member observes it before it resurfaces at the
    /// outlet exactly once.
    fn raise_fault(&self, args: Vec<String>) {
        let core = self.core();
        let fault = Fault::new(args, core.node_ref());
        core.mark_faulted();
        tracing::debug!("fault raised at pipeline '{}'", core.name());
        (self.inner.inlet_entry)(&fault);
    }
}

impl Consumer for Pipeline {
    /// The pipeline's input is the inlet's input; incoming fault relays are
    /// wired to the inlet as well, so a nested pipeline participates in the
    /// outer graph's relay through its own members.
    fn input_port(&self) -> InputPort {
        InputPort {
            node: self.node_ref(),
            tx: self.inner.inlet_tx.clone(),
            entry: Arc::clone(&self.inner.inlet_entry),
            events: self.inner.core.events().clone(),
            mode: self.inner.input_mode,
        }
    }
}

impl Producer for Pipeline {
    /// The pipeline's output is the outlet's output; faults it forwards
    /// downstream are the ones resurfacing from the outlet.
    fn output_port(&self) -> OutputPort {
        OutputPort {
            node: self.node_ref(),
            state: Arc::clone(&self.inner.outlet_state),
            hub: Arc::clone(self.inner.core.hub()),
            mode: self.inner.output_mode,
        }
    }
}

impl Stage for Pipeline {
    fn duplex_ports(&self) -> Option<StagePorts> {
        Some(StagePorts {
            input: self.input_port(),
            output: self.output_port(),
        })
    }
}
