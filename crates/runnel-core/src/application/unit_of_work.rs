//! Transactions bound to the work they schedule.
//!
//! Work scheduled while a transaction is open is handed to the queue only once
//! the transaction committed. A rolled back transaction schedules nothing.

use crate::domain::repository::{PersistenceService, Transaction, WorkQueue};
use crate::domain::work::WorkDescriptor;
use crate::error::CoreError;
use crate::types::TenantId;
use std::sync::Arc;
use tracing::{debug, error};

/// Open transaction plus the work it schedules
pub struct TransactionScope {
    tx: Box<dyn Transaction>,
    scheduled: Vec<WorkDescriptor>,
    tenant_id: Option<TenantId>,
}

impl TransactionScope {
    /// Wrap an open transaction
    pub fn new(tx: Box<dyn Transaction>, tenant_id: Option<TenantId>) -> Self {
        Self {
            tx,
            scheduled: Vec::new(),
            tenant_id,
        }
    }

    /// The underlying transaction
    pub fn tx(&mut self) -> &mut dyn Transaction {
        self.tx.as_mut()
    }

    /// Schedule work to submit after commit
    pub fn schedule(&mut self, work: WorkDescriptor) {
        let work = match &self.tenant_id {
            Some(tenant_id) if work.tenant_id.is_none() => work.for_tenant(tenant_id.clone()),
            _ => work,
        };
        debug!(work_id = %work.id, work = %work, "Scheduling work on commit");
        self.scheduled.push(work);
    }

    /// Work scheduled so far
    pub fn scheduled(&self) -> &[WorkDescriptor] {
        &self.scheduled
    }

    /// Commit, then submit the scheduled work
    pub async fn commit(mut self, queue: &dyn WorkQueue) -> Result<(), CoreError> {
        self.tx.commit().await?;
        for work in self.scheduled.drain(..) {
            if let Err(e) = queue.enqueue(work.clone()).await {
                error!(work_id = %work.id, error = %e, "Unable to submit committed work, recovery will reschedule it");
                return Err(e);
            }
        }
        Ok(())
    }

    /// Roll back, discarding the scheduled work
    pub async fn rollback(mut self) -> Result<(), CoreError> {
        if !self.scheduled.is_empty() {
            debug!(discarded = self.scheduled.len(), "Discarding work of rolled back transaction");
        }
        self.scheduled.clear();
        self.tx.rollback().await
    }
}

/// Opens [`TransactionScope`]s and submits their work on commit
#[derive(Clone)]
pub struct TransactionService {
    persistence: Arc<dyn PersistenceService>,
    queue: Arc<dyn WorkQueue>,
}

impl TransactionService {
    /// Create the service
    pub fn new(persistence: Arc<dyn PersistenceService>, queue: Arc<dyn WorkQueue>) -> Self {
        Self { persistence, queue }
    }

    /// Open a transaction
    pub async fn begin(&self, tenant_id: Option<TenantId>) -> Result<TransactionScope, CoreError> {
        let tx = self.persistence.begin().await?;
        Ok(TransactionScope::new(tx, tenant_id))
    }

    /// Commit a transaction and submit its work
    pub async fn commit(&self, scope: TransactionScope) -> Result<(), CoreError> {
        scope.commit(self.queue.as_ref()).await
    }

    /// Work queue receiving committed work
    pub fn queue(&self) -> &Arc<dyn WorkQueue> {
        &self.queue
    }
}
