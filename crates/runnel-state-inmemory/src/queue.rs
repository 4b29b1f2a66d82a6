//! Work queue with acknowledgement.

use async_trait::async_trait;
use dashmap::DashMap;
use runnel_core::domain::repository::WorkQueue;
use runnel_core::{CoreError, WorkDescriptor, WorkId};
use std::collections::VecDeque;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, trace};

/// FIFO queue keeping dequeued descriptors until they are acknowledged
pub struct InMemoryWorkQueue {
    pending: Mutex<VecDeque<WorkDescriptor>>,
    in_flight: DashMap<WorkId, WorkDescriptor>,
    available: Notify,
}

impl InMemoryWorkQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            in_flight: DashMap::new(),
            available: Notify::new(),
        }
    }

    /// Descriptors dequeued and not acknowledged yet
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Take every in-flight descriptor out of the queue
    pub fn forget_in_flight(&self) -> Vec<WorkDescriptor> {
        let ids: Vec<WorkId> = self.in_flight.iter().map(|entry| entry.key().clone()).collect();
        ids.iter()
            .filter_map(|id| self.in_flight.remove(id).map(|(_, work)| work))
            .collect()
    }

    /// Snapshot of the pending descriptors
    pub async fn snapshot(&self) -> Vec<WorkDescriptor> {
        self.pending.lock().await.iter().cloned().collect()
    }
}

impl Default for InMemoryWorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkQueue for InMemoryWorkQueue {
    async fn enqueue(&self, work: WorkDescriptor) -> Result<(), CoreError> {
        trace!(work_id = %work.id, kind = work.kind.name(), "Work enqueued");
        self.pending.lock().await.push_back(work);
        self.available.notify_one();
        Ok(())
    }

    async fn dequeue(&self) -> Result<WorkDescriptor, CoreError> {
        loop {
            if let Some(work) = self.try_dequeue().await? {
                return Ok(work);
            }
            self.available.notified().await;
        }
    }

    async fn try_dequeue(&self) -> Result<Option<WorkDescriptor>, CoreError> {
        let mut pending = self.pending.lock().await;
        let Some(work) = pending.pop_front() else {
            return Ok(None);
        };
        if !pending.is_empty() {
            // One permit per enqueue may have been coalesced
            self.available.notify_one();
        }
        drop(pending);
        self.in_flight.insert(work.id.clone(), work.clone());
        Ok(Some(work))
    }

    async fn acknowledge(&self, work_id: &WorkId) -> Result<(), CoreError> {
        if self.in_flight.remove(work_id).is_none() {
            debug!(work_id = %work_id, "Acknowledged work was not in flight");
        }
        Ok(())
    }

    async fn recover_unacknowledged(&self) -> Result<usize, CoreError> {
        let mut recovered = 0;
        for work in self.forget_in_flight() {
            if work.can_be_recovered_by_the_recovery_mechanism() {
                self.enqueue(work).await?;
                recovered += 1;
            } else {
                debug!(work_id = %work.id, kind = work.kind.name(), "Unacknowledged work not recoverable, dropped");
            }
        }
        Ok(recovered)
    }

    async fn pending(&self) -> Result<usize, CoreError> {
        Ok(self.pending.lock().await.len())
    }
}
