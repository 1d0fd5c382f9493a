//! The insulator: a transform-shaped node driving an externally supplied
//! set of asynchronous tasks, one per chunk.
//!
//! The adapter decouples per-chunk latency from flow control: a chunk's
//! task is submitted without waiting for it to settle, so many chunks can
//! be in flight at once. The cost is ordering — results are pushed
//! downstream in settlement order, not submission order. At end-of-input
//! the adapter drains: it waits for every task in the ledger (plus the
//! finish hook, if any) to settle before completing, exactly once,
//! whether or not any task failed.

use crate::chunk::{Chunk, DataMode};
use crate::config::NodeConfig;
use crate::error::{Error, Result};
use crate::link::{
    channel, Consumer, InputPort, Message, OutputPort, OutputState, Producer, StagePorts,
};
use crate::node::{FaultAware, NodeCore, NodeKind, Stage};
use kanal::{AsyncReceiver, AsyncSender};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::task::{JoinHandle, JoinSet};

type TaskFuture = Pin<Box<dyn Future<Output = Result<Option<Chunk>>> + Send>>;
type RunFn = Box<dyn FnMut(Chunk) -> TaskFuture + Send>;
type HookFn = Box<dyn FnOnce() -> TaskFuture + Send>;

/// The asynchronous hooks an [`Insulator`] drives.
///
/// `run` handles one chunk; `start` runs once before any chunk; `finish`
/// runs once at end-of-input. Each returns an optional chunk that is
/// pushed downstream when present. Hooks signal failure by returning
/// `Err`; the failure is caught and surfaced on the node's error channel.
///
/// # Example
///
/// ```rust,ignore
/// let processor = Processor::new()
///     .start(|| async { Ok(Some(Chunk::from("header"))) })
///     .run(|chunk| async move { Ok(Some(transform(chunk).await?)) })
///     .finish(|| async { Ok(Some(Chunk::from("trailer"))) });
/// let stage = Insulator::new(processor, NodeConfig::named("worker"))?;
/// ```
#[derive(Default)]
pub struct Processor {
    run: Option<RunFn>,
    start: Option<HookFn>,
    finish: Option<HookFn>,
}

impl Processor {
    /// Create an empty processor. At minimum a `run` hook must be added
    /// before it can back an insulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-chunk hook.
    pub fn run<F, Fut>(mut self, mut f: F) -> Self
    where
        F: FnMut(Chunk) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Option<Chunk>>> + Send + 'static,
    {
        self.run = Some(Box::new(move |chunk| Box::pin(f(chunk))));
        self
    }

    /// Set the one-time startup hook.
    pub fn start<F, Fut>(mut self, f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Option<Chunk>>> + Send + 'static,
    {
        self.start = Some(Box::new(move || Box::pin(f())));
        self
    }

    /// Set the one-time shutdown hook.
    pub fn finish<F, Fut>(mut self, f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Option<Chunk>>> + Send + 'static,
    {
        self.finish = Some(Box::new(move || Box::pin(f())));
        self
    }

    fn is_empty(&self) -> bool {
        self.run.is_none() && self.start.is_none() && self.finish.is_none()
    }
}

/// A transform-shaped node whose processing happens on asynchronous tasks.
///
/// Flow control advances independently of task completion: readiness for
/// the next chunk is signaled as soon as the current chunk's task has been
/// submitted. Results are pushed in settlement order. See [`Processor`]
/// for the hook contract.
#[derive(Clone)]
pub struct Insulator {
    inner: Arc<InsulatorInner>,
}

impl std::fmt::Debug for Insulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Insulator").finish_non_exhaustive()
    }
}

struct InsulatorInner {
    core: NodeCore,
    in_tx: AsyncSender<Message>,
    state: Arc<OutputState>,
    mode: DataMode,
}

impl FaultAware for InsulatorInner {
    fn core(&self) -> &NodeCore {
        &self.core
    }
}

impl Insulator {
    /// Create an insulator around `processor`.
    ///
    /// Fails with [`Error::MissingProcessor`] when the processor has no
    /// hooks at all, and [`Error::MissingRunFunction`] when the per-chunk
    /// hook is absent. If a `start` hook is present it is submitted
    /// immediately as the first ledger entry.
    pub fn new(mut processor: Processor, config: NodeConfig) -> Result<Self> {
        if processor.is_empty() {
            return Err(Error::MissingProcessor);
        }
        let Some(run) = processor.run.take() else {
            return Err(Error::MissingRunFunction);
        };

        let (in_tx, in_rx) = channel(config.capacity);
        let (out_tx, out_rx) = channel(config.capacity);
        let inner = Arc::new(InsulatorInner {
            core: NodeCore::new(NodeKind::Transform, &config),
            in_tx,
            state: Arc::new(OutputState::new(out_rx)),
            mode: config.data_mode,
        });

        tokio::spawn(drive(
            Arc::clone(&inner),
            in_rx,
            out_tx,
            run,
            processor.start.take(),
            processor.finish.take(),
        ));

        Ok(Self { inner })
    }

    /// Write a chunk directly to this insulator's input.
    pub async fn write(&self, chunk: Chunk) -> Result<()> {
        self.inner
            .in_tx
            .send(Message::Chunk(chunk))
            .await
            .map_err(|_| Error::Closed(self.name().to_string()))
    }

    /// Signal end-of-input directly; completion follows the drain.
    pub async fn finish(&self) -> Result<()> {
        self.inner
            .in_tx
            .send(Message::Eos)
            .await
            .map_err(|_| Error::Closed(self.name().to_string()))
    }

    /// The mode of chunks this insulator accepts.
    pub fn input_mode(&self) -> DataMode {
        self.inner.mode
    }

    /// The mode of chunks this insulator produces.
    pub fn output_mode(&self) -> DataMode {
        self.inner.mode
    }
}

impl FaultAware for Insulator {
    fn core(&self) -> &NodeCore {
        &self.inner.core
    }
}

impl Consumer for Insulator {
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

impl Producer for Insulator {
    fn output_port(&self) -> OutputPort {
        OutputPort {
            node: self.node_ref(),
            state: Arc::clone(&self.inner.state),
            hub: Arc::clone(self.inner.core.hub()),
            mode: self.inner.mode,
        }
    }
}

impl Stage for Insulator {
    fn duplex_ports(&self) -> Option<StagePorts> {
        Some(StagePorts {
            input: self.input_port(),
            output: self.output_port(),
        })
    }
}

async fn drive(
    inner: Arc<InsulatorInner>,
    in_rx: AsyncReceiver<Message>,
    out_tx: AsyncSender<Message>,
    mut run: RunFn,
    start: Option<HookFn>,
    mut finish: Option<HookFn>,
) {
    let name = inner.core.name().to_string();
    tracing::debug!("insulator '{}' started", name);

    // The ledger: one entry per submitted task, removed as each settles.
    // It only answers "has everything submitted so far completed" — each
    // task pushes its own result the moment it settles.
    let mut ledger: JoinSet<()> = JoinSet::new();

    if let Some(start) = start {
        tracing::trace!("insulator '{}': startup task submitted", name);
        ledger.spawn(task(Arc::clone(&inner), out_tx.clone(), start()));
    }

    let mut finish_task: Option<JoinHandle<Result<Option<Chunk>>>> = None;

    loop {
        match in_rx.recv().await {
            Ok(Message::Chunk(chunk)) => {
                // Submit and move on; do not wait for settlement.
                ledger.spawn(task(Arc::clone(&inner), out_tx.clone(), run(chunk)));
                reap(&inner, &mut ledger);
                tracing::trace!(
                    "insulator '{}': task submitted, {} in ledger",
                    name,
                    ledger.len()
                );
            }
            Ok(Message::Eos) | Err(_) => {
                // The shutdown hook runs concurrently with the outstanding
                // tasks: it may itself be what unblocks them.
                if let Some(finish) = finish.take() {
                    tracing::trace!("insulator '{}': shutdown task submitted", name);
                    finish_task = Some(tokio::spawn(finish()));
                }
                break;
            }
        }
    }

    tracing::debug!(
        "insulator '{}' draining {} outstanding tasks",
        name,
        ledger.len()
    );
    while let Some(settled) = ledger.join_next().await {
        if let Err(join_error) = settled {
            tracing::error!("insulator '{}' task panicked: {}", name, join_error);
            inner.raise_error(&format!("task panicked: {join_error}"));
        }
    }

    // The ledger is drained; now the shutdown result, then completion.
    if let Some(handle) = finish_task {
        match handle.await {
            Ok(Ok(Some(chunk))) => {
                inner.core.events().send_data(chunk.clone());
                let _ = out_tx.send(Message::Chunk(chunk)).await;
            }
            Ok(Ok(None)) => {}
            Ok(Err(e)) => {
                tracing::error!("insulator '{}' shutdown task error: {}", name, e);
                inner.raise_error(&e.to_string());
            }
            Err(join_error) => {
                tracing::error!("insulator '{}' shutdown task panicked: {}", name, join_error);
                inner.raise_error(&format!("task panicked: {join_error}"));
            }
        }
    }

    let _ = out_tx.send(Message::Eos).await;
    inner.core.events().send_end();
    tracing::debug!("insulator '{}' finished", name);
}

/// One ledger task: await the hook's future, push its chunk if present,
/// surface its failure if it had one. Failures never abort the drain.
async fn task(inner: Arc<InsulatorInner>, out_tx: AsyncSender<Message>, fut: TaskFuture) {
    match fut.await {
        Ok(Some(chunk)) => {
            inner.core.events().send_data(chunk.clone());
            if out_tx.send(Message::Chunk(chunk)).await.is_err() {
                tracing::warn!("insulator '{}': output closed", inner.core.name());
            }
        }
        Ok(None) => {}
        Err(e) => {
            tracing::error!("insulator '{}' task error: {}", inner.core.name(), e);
            inner.raise_error(&e.to_string());
        }
    }
}

/// Remove already-settled entries from the ledger, surfacing panics.
fn reap(inner: &Arc<InsulatorInner>, ledger: &mut JoinSet<()>) {
    while let Some(settled) = ledger.try_join_next() {
        if let Err(join_error) = settled {
            tracing::error!(
                "insulator '{}' task panicked: {}",
                inner.core.name(),
                join_error
            );
            inner.raise_error(&format!("task panicked: {join_error}"));
        }
    }
}
