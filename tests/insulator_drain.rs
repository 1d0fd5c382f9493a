//! Integration tests for the insulator's task coordination.
//!
//! These tests verify that:
//! - start/run/finish results all reach downstream, and completion is not
//!   signaled until every submitted task has settled
//! - absent results produce no output yet still count toward the drain
//! - task failures surface as error events without aborting the drain
//! - the shutdown hook runs concurrently with outstanding chunk tasks
//! - output order is settlement order, not submission order

use fault_line::prelude::*;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{sleep, timeout};

fn collecting_sink(name: &str) -> (SinkNode, Arc<Mutex<Vec<String>>>) {
    let _ = tracing_subscriber::fmt().with_env_filter("warn").try_init();

    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink_seen = Arc::clone(&seen);
    let sink = SinkNode::new(NodeConfig::named(name), move |chunk: Chunk| {
        sink_seen
            .lock()
            .unwrap()
            .push(chunk.as_text().unwrap().into_owned());
        Ok(())
    });
    (sink, seen)
}

#[tokio::test]
async fn test_start_run_finish_all_reach_downstream() {
    let processor = Processor::new()
        .start(|| async { Ok(Some(Chunk::from("foo"))) })
        .run(|_chunk| async { Ok(Some(Chunk::from("bar"))) })
        .finish(|| async { Ok(Some(Chunk::from("baz"))) });
    let stage = Insulator::new(processor, NodeConfig::named("worker")).unwrap();
    let (sink, seen) = collecting_sink("snk");
    let mut sink_events = sink.subscribe();

    connect(&stage, &sink).unwrap();

    stage.write(Chunk::from("input")).await.unwrap();
    stage.finish().await.unwrap();

    timeout(Duration::from_secs(1), sink_events.wait_end())
        .await
        .unwrap()
        .unwrap();

    // All three results were pushed before completion was signaled; the
    // shutdown result comes last, after the ledger drained.
    assert_eq!(*seen.lock().unwrap(), vec!["foo", "bar", "baz"]);
}

#[tokio::test]
async fn test_absent_results_still_count_toward_drain() {
    let processor = Processor::new().run(|_chunk| async { Ok(None) });
    let stage = Insulator::new(processor, NodeConfig::named("swallow")).unwrap();
    let (sink, seen) = collecting_sink("snk");
    let mut sink_events = sink.subscribe();

    connect(&stage, &sink).unwrap();

    for text in ["a", "b", "c"] {
        stage.write(Chunk::from(text)).await.unwrap();
    }
    stage.finish().await.unwrap();

    timeout(Duration::from_secs(1), sink_events.wait_end())
        .await
        .unwrap()
        .unwrap();

    assert!(seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_failing_start_surfaces_error_and_still_completes() {
    let processor = Processor::new()
        .start(|| async { Err(Error::Task("no warmup".into())) })
        .run(|chunk| async move { Ok(Some(chunk)) });
    let stage = Insulator::new(processor, NodeConfig::named("cold")).unwrap();
    let mut events = stage.subscribe();

    // Zero chunks written: end the input straight away.
    stage.finish().await.unwrap();

    let mut errors = 0;
    loop {
        match timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap()
            .unwrap()
        {
            NodeEvent::Error { message, .. } => {
                assert!(message.contains("no warmup"));
                errors += 1;
            }
            NodeEvent::End => break,
            _ => continue,
        }
    }
    assert_eq!(errors, 1);
    assert!(stage.is_faulted());
}

#[tokio::test]
async fn test_task_failure_does_not_stop_siblings() {
    let processor = Processor::new().run(|chunk: Chunk| async move {
        let text = chunk.as_text().unwrap().into_owned();
        if text == "bad" {
            return Err(Error::Task("refused".into()));
        }
        Ok(Some(Chunk::from(text)))
    });
    let stage = Insulator::new(processor, NodeConfig::named("mixed")).unwrap();
    let (sink, seen) = collecting_sink("snk");
    let mut stage_events = stage.subscribe();
    let mut sink_events = sink.subscribe();

    connect(&stage, &sink).unwrap();

    stage.write(Chunk::from("good")).await.unwrap();
    stage.write(Chunk::from("bad")).await.unwrap();
    stage.write(Chunk::from("also-good")).await.unwrap();
    stage.finish().await.unwrap();

    timeout(Duration::from_secs(1), sink_events.wait_end())
        .await
        .unwrap()
        .unwrap();

    let mut seen = seen.lock().unwrap().clone();
    seen.sort();
    assert_eq!(seen, vec!["also-good", "good"]);

    let mut errors = 0;
    while let Some(event) = stage_events.try_recv() {
        if matches!(event, NodeEvent::Error { .. }) {
            errors += 1;
        }
    }
    assert_eq!(errors, 1);
}

#[tokio::test]
async fn test_finish_runs_concurrently_and_unblocks_chunk_tasks() {
    let gate = Arc::new(Notify::new());

    let run_gate = Arc::clone(&gate);
    let finish_gate = Arc::clone(&gate);
    let processor = Processor::new()
        .run(move |chunk: Chunk| {
            let gate = Arc::clone(&run_gate);
            async move {
                // Blocked until the shutdown hook opens the gate.
                gate.notified().await;
                Ok(Some(chunk))
            }
        })
        .finish(move || async move {
            finish_gate.notify_one();
            Ok(Some(Chunk::from("done")))
        });
    let stage = Insulator::new(processor, NodeConfig::named("gated")).unwrap();
    let (sink, seen) = collecting_sink("snk");
    let mut sink_events = sink.subscribe();

    connect(&stage, &sink).unwrap();

    stage.write(Chunk::from("pending")).await.unwrap();
    stage.finish().await.unwrap();

    // Were the shutdown hook held back until the ledger drained, this
    // would deadlock and hit the timeout.
    timeout(Duration::from_secs(2), sink_events.wait_end())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(*seen.lock().unwrap(), vec!["pending", "done"]);
}

#[tokio::test]
async fn test_output_order_is_settlement_order() {
    let processor = Processor::new().run(|chunk: Chunk| async move {
        let text = chunk.as_text().unwrap().into_owned();
        if text == "slow" {
            sleep(Duration::from_millis(100)).await;
        }
        Ok(Some(Chunk::from(text)))
    });
    let stage = Insulator::new(processor, NodeConfig::named("racy")).unwrap();
    let (sink, seen) = collecting_sink("snk");
    let mut sink_events = sink.subscribe();

    connect(&stage, &sink).unwrap();

    stage.write(Chunk::from("slow")).await.unwrap();
    stage.write(Chunk::from("fast")).await.unwrap();
    stage.finish().await.unwrap();

    timeout(Duration::from_secs(2), sink_events.wait_end())
        .await
        .unwrap()
        .unwrap();

    // Submitted slow-then-fast, settled fast-then-slow.
    assert_eq!(*seen.lock().unwrap(), vec!["fast", "slow"]);
}

#[tokio::test]
async fn test_insulator_composes_into_pipeline() {
    let upper = TransformNode::new(NodeConfig::named("upper"), |chunk: Chunk| {
        let text = chunk.as_text().unwrap().to_uppercase();
        Ok(Some(Chunk::from(text)))
    });
    let processor = Processor::new().run(|chunk: Chunk| async move {
        let text = chunk.as_text().unwrap().into_owned();
        Ok(Some(Chunk::from(format!("[{text}]"))))
    });
    let stage = Insulator::new(processor, NodeConfig::named("bracket")).unwrap();

    let pipeline = Pipeline::new(
        vec![Box::new(upper), Box::new(stage)],
        NodeConfig::named("p"),
    )
    .unwrap();

    let source = SourceNode::new(NodeConfig::named("src"));
    let (sink, seen) = collecting_sink("snk");
    let mut sink_events = sink.subscribe();

    connect(&source, &pipeline).unwrap();
    connect(&pipeline, &sink).unwrap();

    source.push(Chunk::from("hi")).await.unwrap();
    source.finish().await.unwrap();

    timeout(Duration::from_secs(1), sink_events.wait_end())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(*seen.lock().unwrap(), vec!["[HI]"]);
}
