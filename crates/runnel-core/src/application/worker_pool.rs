//! Workers pulling descriptors from the shared work queue.

use crate::application::engine_context::EngineContext;
use crate::application::work_executor::WorkExecutor;
use crate::domain::repository::WorkQueue;
use crate::domain::work::WorkDescriptor;
use crate::error::{CoreError, WorkError};
use crate::types::WorkId;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Run one descriptor and acknowledge it unless it must be left to recovery
pub async fn process_work(
    queue: &dyn WorkQueue,
    executor: &WorkExecutor,
    work: WorkDescriptor,
) -> Result<(), CoreError> {
    let span = info_span!("work", work_id = %work.id, kind = work.kind.name());
    let result = executor.execute(&work).instrument(span).await;

    let acknowledge = match &result {
        Ok(()) => true,
        Err(WorkError::Precondition(reason)) => {
            debug!(work = %work, reason = %reason, "Work dropped, precondition no longer holds");
            true
        }
        Err(WorkError::Business(e)) => {
            debug!(work = %work, error = %e, "Work ended with a business failure");
            true
        }
        Err(WorkError::Consistency(reason)) => {
            error!(work = %work, reason = %reason, "Work dropped after a consistency failure");
            true
        }
        Err(WorkError::Infrastructure(e)) => {
            warn!(work = %work, error = %e, "Work left to recovery after an infrastructure failure");
            false
        }
    };
    if acknowledge {
        queue.acknowledge(&work.id).await?;
    }
    Ok(())
}

/// Fixed set of workers sharing one queue
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    shutdown: watch::Sender<bool>,
}

impl WorkerPool {
    /// Spawn `worker_count` workers
    pub fn start(
        worker_count: usize,
        queue: Arc<dyn WorkQueue>,
        executor: WorkExecutor,
        context: Arc<EngineContext>,
        retry_delay: Duration,
    ) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let handles = (0..worker_count)
            .map(|worker_id| {
                let worker = Worker {
                    id: worker_id,
                    queue: queue.clone(),
                    executor: executor.clone(),
                    context: context.clone(),
                    retry_delay,
                    shutdown: shutdown_rx.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect();
        info!(workers = worker_count, "Worker pool started");
        Self { handles, shutdown }
    }

    /// Number of running workers
    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Stop the workers after their current unit of work
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Worker task panicked");
            }
        }
        info!("Worker pool stopped");
    }
}

struct Worker {
    id: usize,
    queue: Arc<dyn WorkQueue>,
    executor: WorkExecutor,
    context: Arc<EngineContext>,
    retry_delay: Duration,
    shutdown: watch::Receiver<bool>,
}

impl Worker {
    async fn run(mut self) {
        debug!(worker = self.id, "Worker started");
        loop {
            if *self.shutdown.borrow() {
                break;
            }
            match self.context.is_paused().await {
                Ok(false) => {}
                Ok(true) => {
                    if self.pause().await {
                        break;
                    }
                    continue;
                }
                Err(e) => {
                    warn!(worker = self.id, error = %e, "Unable to read tenant state");
                    if self.pause().await {
                        break;
                    }
                    continue;
                }
            }

            let work = tokio::select! {
                _ = self.shutdown.changed() => break,
                work = self.queue.dequeue() => work,
            };
            let work = match work {
                Ok(work) => work,
                Err(e) => {
                    warn!(worker = self.id, error = %e, "Unable to dequeue work");
                    if self.pause().await {
                        break;
                    }
                    continue;
                }
            };

            if let Err(e) = self.handle(work).await {
                warn!(worker = self.id, error = %e, "Unable to acknowledge work");
            }
        }
        debug!(worker = self.id, "Worker stopped");
    }

    async fn handle(&self, work: WorkDescriptor) -> Result<(), CoreError> {
        // Paused while this worker waited on the queue
        if self.context.is_paused().await? {
            let original = work.id.clone();
            let mut postponed = work;
            postponed.id = WorkId::generate();
            self.queue.enqueue(postponed).await?;
            return self.queue.acknowledge(&original).await;
        }
        process_work(self.queue.as_ref(), &self.executor, work).await
    }

    /// Wait before retrying; returns true when shutdown was requested
    async fn pause(&mut self) -> bool {
        tokio::select! {
            _ = self.shutdown.changed() => true,
            _ = tokio::time::sleep(self.retry_delay) => false,
        }
    }
}
