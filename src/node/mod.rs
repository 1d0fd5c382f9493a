//! Core node capability: identity, fault state, and dual-channel emission.
//!
//! Every endpoint type (source, sink, transform, pipeline, insulator) is
//! built around one [`NodeCore`] and exposes it through the [`FaultAware`]
//! trait. The trait's default methods hold the single authoritative
//! implementation of the error/fault policy matrix; concrete types only
//! override where their topology demands it (a pipeline routes its own
//! faults through its first member).

mod sink;
mod source;
mod transform;

pub use sink::{Consume, SinkNode};
pub use source::{Produce, SourceNode};
pub use transform::{Transform, TransformNode};

use crate::config::{ErrorPolicy, NodeConfig};
use crate::event::{EventReceiver, EventSender, NodeEvent};
use crate::fault::{Fault, FaultHub, NodeRef};
use crate::link::StagePorts;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

/// The role a node plays in the connection graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// A one-directional producer.
    Source,
    /// A one-directional consumer.
    Sink,
    /// A bidirectional stage.
    Transform,
    /// A composed sequence of transform-shaped members.
    Pipeline,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::Source => write!(f, "source"),
            NodeKind::Sink => write!(f, "sink"),
            NodeKind::Transform => write!(f, "transform"),
            NodeKind::Pipeline => write!(f, "pipeline"),
        }
    }
}

/// State shared by every node type: identity, fault flag, policy, the
/// event channel, and the downstream relay registry.
pub struct NodeCore {
    id: u64,
    name: Arc<str>,
    kind: NodeKind,
    faulted: AtomicBool,
    policy: ErrorPolicy,
    events: EventSender,
    hub: Arc<FaultHub>,
}

impl NodeCore {
    pub(crate) fn new(kind: NodeKind, config: &NodeConfig) -> Self {
        let id = NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed);
        let name: Arc<str> = match &config.name {
            Some(name) => Arc::from(name.as_str()),
            None => Arc::from(Uuid::new_v4().to_string().as_str()),
        };
        Self {
            id,
            name,
            kind,
            faulted: AtomicBool::new(false),
            policy: config.policy,
            events: EventSender::default(),
            hub: Arc::new(FaultHub::new()),
        }
    }

    /// The node's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The node's kind.
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Whether a fault has been observed or originated at this node.
    pub fn is_faulted(&self) -> bool {
        self.faulted.load(Ordering::SeqCst)
    }

    /// A cheap reference identifying this node.
    pub fn node_ref(&self) -> NodeRef {
        NodeRef::new(self.id, Arc::clone(&self.name))
    }

    pub(crate) fn mark_faulted(&self) {
        self.faulted.store(true, Ordering::SeqCst);
    }

    pub(crate) fn policy(&self) -> ErrorPolicy {
        self.policy
    }

    pub(crate) fn events(&self) -> &EventSender {
        &self.events
    }

    pub(crate) fn hub(&self) -> &Arc<FaultHub> {
        &self.hub
    }

    /// The relay path: mark this node faulted and pass the occurrence on
    /// unchanged, both to event observers and to downstream subscribers.
    ///
    /// No origin is appended here — that happens exactly once, at the
    /// point of synthesis in [`FaultAware::raise_fault`].
    pub(crate) fn inject_fault(&self, fault: &Fault) {
        self.mark_faulted();
        tracing::trace!("fault through '{}': {}", self.name, fault);
        self.events.send(NodeEvent::Fault(fault.clone()));
        self.hub.notify(fault);
    }
}

impl fmt::Debug for NodeCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeCore")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("faulted", &self.is_faulted())
            .finish()
    }
}

/// Identity, fault state, and dual-channel emission, shared by every node
/// type.
///
/// The default methods implement the policy matrix: raising a fault marks
/// the node and notifies downstream with the origin appended exactly once;
/// raising an error fires the error channel and/or derives a fault
/// according to the node's [`ErrorPolicy`].
pub trait FaultAware {
    /// The shared node capability backing this endpoint.
    fn core(&self) -> &NodeCore;

    /// The node's name.
    fn name(&self) -> &str {
        self.core().name()
    }

    /// A cheap reference identifying this node.
    fn node_ref(&self) -> NodeRef {
        self.core().node_ref()
    }

    /// Whether a fault has been observed or originated at this node.
    ///
    /// The flag is monotonic: once set it never resets.
    fn is_faulted(&self) -> bool {
        self.core().is_faulted()
    }

    /// Subscribe to this node's events.
    fn subscribe(&self) -> EventReceiver {
        self.core().events().subscribe()
    }

    /// Number of live downstream fault subscriptions.
    ///
    /// Always equal to the number of live outgoing edges wired with
    /// [`connect`](crate::link::connect).
    fn fault_subscriber_count(&self) -> usize {
        self.core().hub().len()
    }

    /// Originate a fault at this node.
    ///
    /// The delivered occurrence carries `args` unchanged plus this node as
    /// its origin; every relay hop preserves both.
    fn raise_fault(&self, args: Vec<String>) {
        let core = self.core();
        let fault = Fault::new(args, core.node_ref());
        tracing::debug!("fault raised at '{}'", core.name());
        core.inject_fault(&fault);
    }

    /// Raise this node's own error.
    ///
    /// Unless the policy is `FaultOnly` the error channel fires; unless it
    /// is `Off` a fault is derived with the message as payload and this
    /// node as origin.
    fn raise_error(&self, message: &str) {
        let core = self.core();
        if core.policy() != ErrorPolicy::FaultOnly {
            core.events().send_error(message, core.name());
        }
        if core.policy() != ErrorPolicy::Off {
            self.raise_fault(vec![message.to_string()]);
        }
    }
}

/// A node that can be a pipeline member.
///
/// Every node type implements this; only transform-shaped nodes (plain
/// transforms, insulators, and pipelines themselves) report duplex ports.
/// Sources and sinks return `None` and are rejected at pipeline
/// construction.
pub trait Stage: FaultAware + Send + Sync {
    /// The role this node plays.
    fn kind(&self) -> NodeKind {
        self.core().kind()
    }

    /// Input and output ports, for transform-shaped nodes.
    fn duplex_ports(&self) -> Option<StagePorts>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::NodeEvent;

    struct TestNode {
        core: NodeCore,
    }

    impl TestNode {
        fn new(config: NodeConfig) -> Self {
            Self {
                core: NodeCore::new(NodeKind::Transform, &config),
            }
        }
    }

    impl FaultAware for TestNode {
        fn core(&self) -> &NodeCore {
            &self.core
        }
    }

    #[test]
    fn test_generated_names_are_unique() {
        let a = TestNode::new(NodeConfig::default());
        let b = TestNode::new(NodeConfig::default());
        assert!(!a.name().is_empty());
        assert_ne!(a.name(), b.name());
        assert_ne!(a.node_ref(), b.node_ref());
    }

    #[test]
    fn test_named() {
        let node = TestNode::new(NodeConfig::named("decoder"));
        assert_eq!(node.name(), "decoder");
        assert_eq!(node.node_ref().name(), "decoder");
    }

    #[tokio::test]
    async fn test_raise_fault_appends_origin_once() {
        let node = TestNode::new(NodeConfig::named("n"));
        let mut events = node.subscribe();

        node.raise_fault(vec!["a".into(), "b".into()]);
        assert!(node.is_faulted());

        match events.recv().await.unwrap() {
            NodeEvent::Fault(fault) => {
                assert_eq!(fault.args(), &["a".to_string(), "b".to_string()]);
                assert_eq!(fault.origin(), &node.node_ref());
            }
            other => panic!("unexpected event: {other}"),
        }
    }

    #[tokio::test]
    async fn test_error_policy_both() {
        let node = TestNode::new(NodeConfig::named("n"));
        let mut events = node.subscribe();

        node.raise_error("boom");

        match events.recv().await.unwrap() {
            NodeEvent::Error { message, node: from } => {
                assert_eq!(message, "boom");
                assert_eq!(from, "n");
            }
            other => panic!("unexpected event: {other}"),
        }
        match events.recv().await.unwrap() {
            NodeEvent::Fault(fault) => {
                assert_eq!(fault.args(), &["boom".to_string()]);
                assert_eq!(fault.origin(), &node.node_ref());
            }
            other => panic!("unexpected event: {other}"),
        }
        assert!(node.is_faulted());
    }

    #[tokio::test]
    async fn test_error_policy_off() {
        let node = TestNode::new(NodeConfig::named("n").with_policy(ErrorPolicy::Off));
        let mut events = node.subscribe();

        node.raise_error("boom");

        assert!(matches!(
            events.try_recv(),
            Some(NodeEvent::Error { .. })
        ));
        assert!(events.try_recv().is_none());
        assert!(!node.is_faulted());
    }

    #[tokio::test]
    async fn test_error_policy_fault_only() {
        let node = TestNode::new(NodeConfig::named("n").with_policy(ErrorPolicy::FaultOnly));
        let mut events = node.subscribe();

        node.raise_error("boom");

        assert!(matches!(events.try_recv(), Some(NodeEvent::Fault(_))));
        assert!(events.try_recv().is_none());
        assert!(node.is_faulted());
    }

    #[test]
    fn test_fault_flag_is_monotonic() {
        let node = TestNode::new(NodeConfig::default());
        node.raise_fault(vec![]);
        node.raise_fault(vec![]);
        assert!(node.is_faulted());
    }
}
