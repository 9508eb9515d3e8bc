//! Fixed-size fetch pool
//!
//! `submit` never blocks: every job is spawned immediately as a task that first
//! waits for one of `size` semaphore permits, so at most `size` fetches run at once
//! and the rest queue in submission order. Tasks run on the multi-threaded runtime,
//! which gives true parallelism across slots. Completion is tracked through the
//! `JoinSet`, one signal per task.

use std::sync::Arc;
use tokio::sync::{Semaphore, broadcast};
use tokio::task::{JoinError, JoinSet};

use crate::fetcher::JobRunner;
use crate::types::{Event, FetchOutcome, Job, PoolSummary};

/// Bounded set of concurrent fetch slots owned by one Worker Service
pub struct FetchPool {
    runner: Arc<dyn JobRunner>,
    slots: Arc<Semaphore>,
    size: usize,
    tasks: JoinSet<(Job, FetchOutcome)>,
    summary: PoolSummary,
    event_tx: broadcast::Sender<Event>,
}

impl FetchPool {
    /// Create a pool with `size` slots (at least one)
    pub fn new(
        size: usize,
        runner: Arc<dyn JobRunner>,
        event_tx: broadcast::Sender<Event>,
    ) -> Self {
        let size = size.max(1);
        Self {
            runner,
            slots: Arc::new(Semaphore::new(size)),
            size,
            tasks: JoinSet::new(),
            summary: PoolSummary::default(),
            event_tx,
        }
    }

    /// Number of slots
    pub fn size(&self) -> usize {
        self.size
    }

    /// Jobs submitted but not yet reaped (running or waiting for a slot)
    pub fn pending(&self) -> usize {
        self.tasks.len()
    }

    /// Counts so far (only reaped tasks are reflected)
    pub fn summary(&self) -> PoolSummary {
        self.summary
    }

    /// Enqueue a job without waiting for a free slot
    pub fn submit(&mut self, job: Job) {
        self.reap_finished();

        let runner = Arc::clone(&self.runner);
        let slots = Arc::clone(&self.slots);
        let event_tx = self.event_tx.clone();
        self.summary.submitted += 1;

        self.tasks.spawn(async move {
            // The semaphore is never closed, so acquire only fails if that changes
            let _permit = slots.acquire_owned().await;
            let outcome = runner.run(&job).await;
            let _ = event_tx.send(Event::FetchFinished {
                job: job.clone(),
                outcome: outcome.clone(),
            });
            (job, outcome)
        });
    }

    /// Wait for every submitted fetch to reach a terminal state
    pub async fn drain(mut self) -> PoolSummary {
        let total = self.summary.submitted;
        tracing::info!(
            pending = self.tasks.len(),
            total,
            "Waiting for in-flight downloads"
        );

        while let Some(result) = self.tasks.join_next().await {
            self.record(result);
            tracing::info!(
                completed = self.summary.completed(),
                total,
                "Download finished"
            );
        }

        let summary = self.summary;
        let _ = self.event_tx.send(Event::Drained { summary });
        summary
    }

    /// Collect results of tasks that already finished, without waiting
    fn reap_finished(&mut self) {
        while let Some(result) = self.tasks.try_join_next() {
            self.record(result);
        }
    }

    fn record(&mut self, result: Result<(Job, FetchOutcome), JoinError>) {
        match result {
            Ok((job, outcome)) => {
                tracing::debug!(
                    name = %job.name,
                    status = ?outcome.status(),
                    "Fetch reached terminal state"
                );
                self.summary.record(&outcome);
            }
            Err(e) => {
                tracing::error!(error = %e, "Fetch task panicked");
                self.summary.panicked += 1;
            }
        }
    }
}
