//! Concurrent test scheduling: a fixed pool of workers pulls dense test
//! numbers from a shared counter until the batch is done or stopped.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use futures::stream::FuturesUnordered;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;

use crate::domain::{StopPolicy, TestResult};
use crate::error::ProcessError;
use crate::events::RunEvent;
use crate::pipeline::TestPipeline;
use crate::resources::ResourceSession;

/// Hard ceiling on workers; past this the candidate processes contend with
/// each other and benchmark timings degrade.
const MAX_WORKERS: usize = 8;

/// Worker pool size for a batch: the requested cap, one less than the
/// machine's parallelism (the host UI keeps a core), and never more
/// workers than tests.
pub fn worker_count(requested: Option<usize>, test_count: u32) -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2);
    requested
        .unwrap_or(MAX_WORKERS)
        .min(MAX_WORKERS)
        .min(cpus.saturating_sub(1).max(1))
        .min(test_count as usize)
        .max(1)
}

/// Runs `test_count` cases through `pipeline` on `workers` concurrent
/// workers. Progress streams through `events` as it happens; the returned
/// results are in completion order and contain exactly the tests that ran
/// to a verdict.
///
/// Test numbers are dense: every worker claims the next unclaimed number,
/// so `1..=test_count` each run at most once with no gaps unless the batch
/// is stopped early.
pub async fn run_batch(
    pipeline: TestPipeline,
    test_count: u32,
    workers: usize,
    stop_policy: StopPolicy,
    session: Arc<ResourceSession>,
    events: mpsc::Sender<RunEvent>,
) -> Vec<TestResult> {
    let next = Arc::new(AtomicU32::new(1));
    let mut pool = FuturesUnordered::new();

    for worker_id in 1..=workers {
        pool.push(worker_loop(
            worker_id,
            pipeline.clone(),
            test_count,
            stop_policy,
            Arc::clone(&next),
            Arc::clone(&session),
            events.clone(),
        ));
    }

    let mut results = Vec::with_capacity(test_count as usize);
    while let Some(mut batch) = pool.next().await {
        results.append(&mut batch);
    }
    results
}

async fn worker_loop(
    worker_id: usize,
    pipeline: TestPipeline,
    test_count: u32,
    stop_policy: StopPolicy,
    next: Arc<AtomicU32>,
    session: Arc<ResourceSession>,
    events: mpsc::Sender<RunEvent>,
) -> Vec<TestResult> {
    let mut results = Vec::new();

    loop {
        if session.is_cancelled() {
            break;
        }
        let test_number = next.fetch_add(1, Ordering::SeqCst);
        if test_number > test_count {
            break;
        }

        let _ = events.send(RunEvent::TestStarted { test_number }).await;
        let _ = events
            .send(RunEvent::WorkerBusy {
                worker_id,
                test_number,
            })
            .await;
        tracing::debug!(worker_id, test_number, "running test");

        match pipeline.run_case(test_number).await {
            Ok(result) => {
                let failed = !result.passed;
                let _ = events
                    .send(RunEvent::TestCompleted {
                        result: result.clone(),
                    })
                    .await;
                results.push(result);
                if failed && stop_policy == StopPolicy::StopOnFirstFailure {
                    tracing::info!(worker_id, test_number, "stopping batch on first failure");
                    session.cancel();
                }
            }
            // An abandoned test produces no result at all.
            Err(ProcessError::Cancelled) => break,
            Err(e) => {
                tracing::warn!(worker_id, test_number, error = %e, "test infrastructure failure");
                break;
            }
        }
    }

    let _ = events.send(RunEvent::WorkerIdle { worker_id }).await;
    results
}
