//! Error types for fault-line.

use crate::node::NodeKind;
use thiserror::Error;

/// Result type alias using fault-line's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for fault-line operations.
///
/// Construction errors (`EmptyPipeline`, `InvalidMember`, `MissingProcessor`,
/// `MissingRunFunction`) are returned synchronously from constructors and are
/// never recovered internally. Failures inside handlers and processor tasks
/// are caught by the node drivers and surfaced as `Error` events rather than
/// returned.
#[derive(Error, Debug)]
pub enum Error {
    /// A pipeline was constructed from an empty member list.
    #[error("pipeline needs at least one member")]
    EmptyPipeline,

    /// A pipeline member is not transform-shaped.
    #[error("pipeline member '{name}' is a {kind} node, expected a transform or pipeline")]
    InvalidMember {
        /// Name of the offending member.
        name: String,
        /// The member's actual kind.
        kind: NodeKind,
    },

    /// An insulator was constructed without any processor hooks.
    #[error("insulator needs a processor")]
    MissingProcessor,

    /// An insulator processor has hooks but no per-chunk run function.
    #[error("insulator processor needs a run function")]
    MissingRunFunction,

    /// The producer side of a node already has a live downstream edge.
    #[error("node '{0}' already has a downstream connection")]
    AlreadyConnected(String),

    /// The node's input is closed (end-of-input already signaled).
    #[error("node '{0}' is closed")]
    Closed(String),

    /// A handler or processor task failed.
    #[error("task failed: {0}")]
    Task(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
