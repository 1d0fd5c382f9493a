//! Fault occurrences and the relay subscription registry.
//!
//! A fault is an advisory signal, distinct from the error channel: it says
//! "a participant of this graph has entered a degraded state" without
//! throwing anything. Faults travel downstream along live edges; each hop
//! marks itself faulted and passes the occurrence on unchanged.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// A cheap, cloneable reference identifying a node.
///
/// Used as the origin carried by a [`Fault`] and as the peer in
/// connect/disconnect events. Two refs are equal when they identify the
/// same node, regardless of how the name was produced.
#[derive(Debug, Clone)]
pub struct NodeRef {
    id: u64,
    name: Arc<str>,
}

impl NodeRef {
    pub(crate) fn new(id: u64, name: Arc<str>) -> Self {
        Self { id, name }
    }

    /// The node's name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl PartialEq for NodeRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for NodeRef {}

impl std::hash::Hash for NodeRef {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// A single fault occurrence.
///
/// The payload is the ordered argument list given when the fault was
/// raised; the origin is the node at which it was synthesized (directly or
/// by error-to-fault conversion). Both are preserved verbatim through
/// every relay hop — only the relaying node's own fault flag changes.
#[derive(Debug, Clone, PartialEq)]
pub struct Fault {
    args: Vec<String>,
    origin: NodeRef,
}

impl Fault {
    pub(crate) fn new(args: Vec<String>, origin: NodeRef) -> Self {
        Self { args, origin }
    }

    /// The ordered fault payload.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// The node at which this fault was first raised.
    pub fn origin(&self) -> &NodeRef {
        &self.origin
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fault [{}] from '{}'", self.args.join(", "), self.origin)
    }
}

/// Callback invoked for each fault reaching a subscriber.
pub(crate) type FaultEntry = Arc<dyn Fn(&Fault) + Send + Sync>;

/// Identifier of one relay subscription, returned by [`FaultHub::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SubscriptionId(u64);

/// Registry of downstream fault relays for one node.
///
/// The composition code subscribes a downstream entry here when an edge is
/// created and unsubscribes exactly that entry when the edge is removed,
/// keeping the subscriber set identical to the live edge set at all times.
#[derive(Default)]
pub(crate) struct FaultHub {
    subscribers: Mutex<Vec<(SubscriptionId, FaultEntry)>>,
    next_id: AtomicU64,
}

impl FaultHub {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register a downstream entry; returns the id needed to remove it.
    pub(crate) fn subscribe(&self, entry: FaultEntry) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers.lock().unwrap().push((id, entry));
        id
    }

    /// Remove exactly one subscription.
    pub(crate) fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers.lock().unwrap().retain(|(sid, _)| *sid != id);
    }

    /// Deliver a fault to every current subscriber, in subscription order.
    ///
    /// Entries are invoked outside the lock: a subscriber may itself notify
    /// further hubs down the chain.
    pub(crate) fn notify(&self, fault: &Fault) {
        let entries: Vec<FaultEntry> = self
            .subscribers
            .lock()
            .unwrap()
            .iter()
            .map(|(_, e)| Arc::clone(e))
            .collect();
        for entry in entries {
            entry(fault);
        }
    }

    /// Number of live subscriptions.
    pub(crate) fn len(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }
}
