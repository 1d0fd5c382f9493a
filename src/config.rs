//! Node configuration.

use crate::chunk::DataMode;

/// Controls what happens when a node's own error is raised.
///
/// Faults derived from errors carry the error message as their payload and
/// the erroring node as their origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorPolicy {
    /// Fire the error channel and derive a fault from it.
    #[default]
    Both,
    /// Suppress the error channel; only the derived fault fires.
    FaultOnly,
    /// Fire the error channel only; no fault is derived.
    Off,
}

/// Configuration shared by every node type.
///
/// Every constructor takes one of these; the builder methods cover the
/// common cases.
///
/// # Example
///
/// ```rust
/// use fault_line::config::{ErrorPolicy, NodeConfig};
///
/// let cfg = NodeConfig::named("decoder")
///     .with_policy(ErrorPolicy::FaultOnly)
///     .with_capacity(64);
/// ```
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Node name; a unique one is generated when absent.
    pub name: Option<String>,
    /// Error-reemission policy.
    pub policy: ErrorPolicy,
    /// Byte-stream vs value-stream mode.
    pub data_mode: DataMode,
    /// Channel capacity between this node and its neighbors (the
    /// backpressure window).
    pub capacity: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: None,
            policy: ErrorPolicy::default(),
            data_mode: DataMode::default(),
            capacity: 16,
        }
    }
}

impl NodeConfig {
    /// Create a config with a caller-supplied name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Set the error-reemission policy.
    pub fn with_policy(mut self, policy: ErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the data mode.
    pub fn with_data_mode(mut self, mode: DataMode) -> Self {
        self.data_mode = mode;
        self
    }

    /// Shorthand for value-stream mode.
    pub fn value_mode(self) -> Self {
        self.with_data_mode(DataMode::Values)
    }

    /// Set the channel capacity.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }
}
