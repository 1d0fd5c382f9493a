//! # fault-line
//!
//! A dual-channel signaling layer for chunked, backpressured streaming
//! pipelines. Alongside the ordinary error channel every node carries a
//! second, advisory channel — "fault" — that propagates automatically
//! along whatever topology the nodes are currently wired into, including
//! through multi-stage pipelines and pipelines nested inside pipelines.
//!
//! ## Concepts
//!
//! - **Nodes**: [`SourceNode`](node::SourceNode) produces,
//!   [`SinkNode`](node::SinkNode) consumes,
//!   [`TransformNode`](node::TransformNode) does both. Every node carries
//!   a name, a monotonic fault flag, and the dual-channel emission rules
//!   of [`FaultAware`](node::FaultAware).
//! - **Edges**: [`connect`](link::connect) wires a producer into a
//!   consumer. For the lifetime of the edge the downstream node is
//!   subscribed to the upstream node's fault channel and re-emits what it
//!   receives, payload and origin untouched. Disconnecting removes exactly
//!   that subscription.
//! - **Pipelines**: [`Pipeline`](pipeline::Pipeline) composes an ordered
//!   sequence of transform-shaped nodes into a single node.
//! - **Insulators**: [`Insulator`](insulator::Insulator) drives an
//!   asynchronous [`Processor`](insulator::Processor) per chunk without
//!   coupling flow control to task latency, and drains every outstanding
//!   task before completing.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use fault_line::prelude::*;
//!
//! let source = SourceNode::new(NodeConfig::named("feed"));
//! let upper = TransformNode::new(NodeConfig::named("upper"), |chunk: Chunk| {
//!     let text = chunk.as_text().unwrap().to_uppercase();
//!     Ok(Some(Chunk::from(text)))
//! });
//! let sink = SinkNode::new(NodeConfig::named("out"), |chunk: Chunk| {
//!     println!("{chunk}");
//!     Ok(())
//! });
//!
//! connect(&source, &upper)?;
//! connect(&upper, &sink)?;
//!
//! source.push(Chunk::from("hello")).await?;
//! source.finish().await?;
//! ```
//!
//! Nodes spawn their drivers at construction and therefore must be created
//! inside a Tokio runtime.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod chunk;
pub mod config;
pub mod error;
pub mod event;
pub mod fault;
pub mod insulator;
pub mod link;
pub mod node;
pub mod pipeline;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::chunk::{Chunk, DataMode};
    pub use crate::config::{ErrorPolicy, NodeConfig};
    pub use crate::error::{Error, Result};
    pub use crate::event::{EventReceiver, EventSender, NodeEvent};
    pub use crate::fault::{Fault, NodeRef};
    pub use crate::insulator::{Insulator, Processor};
    pub use crate::link::{connect, Consumer, Link, Producer};
    pub use crate::node::{
        Consume, FaultAware, NodeKind, Produce, SinkNode, SourceNode, Stage, Transform,
        TransformNode,
    };
    pub use crate::pipeline::Pipeline;
}

pub use error::{Error, Result};
