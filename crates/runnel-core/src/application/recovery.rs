//! Restart recovery.
//!
//! Work lost in a crash is rebuilt from two sources: the queue entries that
//! were dequeued but never acknowledged, and the persisted state, which
//! implies the work that must exist for every node to make progress.
//! Duplicates are harmless: their precondition check drops them.

use crate::application::unit_of_work::TransactionService;
use crate::domain::flow_node::FlowNodeInstance;
use crate::domain::message::{MessageInstance, WaitingEvent};
use crate::domain::repository::{queries, SelectListDescriptor};
use crate::domain::state_machine::FlowNodeState;
use crate::domain::work::WorkDescriptor;
use crate::error::CoreError;
use crate::types::{FlowNodeInstanceId, TenantId};
use std::fmt;
use tracing::{debug, info};

/// Result of a recovery scan
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Unacknowledged queue entries handed out again
    pub requeued: usize,
    /// Flow nodes scheduled for execution
    pub executions: usize,
    /// Terminal flow nodes whose container is notified again
    pub notifications: usize,
    /// Matched couples scheduled for delivery
    pub message_couples: usize,
    /// Whether a matching sweep was scheduled
    pub sweep_scheduled: bool,
    /// Nodes whose step runs outside the engine, left until resumed
    pub awaiting_resume: Vec<FlowNodeInstanceId>,
    /// Failed nodes, left for an operator
    pub failed: Vec<FlowNodeInstanceId>,
}

impl RecoveryReport {
    /// Create a new empty report
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of work descriptors scheduled from persisted state
    pub fn scheduled(&self) -> usize {
        self.executions + self.notifications + self.message_couples + usize::from(self.sweep_scheduled)
    }
}

impl fmt::Display for RecoveryReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RecoveryReport {{ requeued: {}, executions: {}, notifications: {}, message_couples: {}, sweep: {}, awaiting_resume: {}, failed: {} }}",
            self.requeued,
            self.executions,
            self.notifications,
            self.message_couples,
            self.sweep_scheduled,
            self.awaiting_resume.len(),
            self.failed.len()
        )
    }
}

/// Rebuilds lost work after a restart
#[derive(Clone)]
pub struct RecoveryService {
    transactions: TransactionService,
}

impl RecoveryService {
    /// Create a new recovery service
    pub fn new(transactions: TransactionService) -> Self {
        Self { transactions }
    }

    /// Requeue unacknowledged work, then schedule the work implied by the
    /// persisted flow nodes, messages and waiting events
    pub async fn recover(&self, tenant_id: Option<TenantId>) -> Result<RecoveryReport, CoreError> {
        let mut report = RecoveryReport::new();
        report.requeued = self.transactions.queue().recover_unacknowledged().await?;

        let mut scope = self.transactions.begin(tenant_id).await?;

        // Flow nodes
        let nodes: Vec<FlowNodeInstance> = scope
            .tx()
            .select_list(&SelectListDescriptor::new(queries::GET_ALL_FLOW_NODES))
            .await?;
        for node in nodes {
            if node.state() == FlowNodeState::Failed {
                report.failed.push(node.id);
            } else if node.terminal {
                scope.schedule(WorkDescriptor::notify_child_finished(&node));
                report.notifications += 1;
            } else if node.lifecycle.executing {
                report.awaiting_resume.push(node.id);
            } else {
                scope.schedule(WorkDescriptor::execute_flow_node(&node));
                report.executions += 1;
            }
        }

        // Matched couples whose delivery was lost
        let locked: Vec<WaitingEvent> = scope
            .tx()
            .select_list(&SelectListDescriptor::new(queries::GET_LOCKED_WAITING_EVENTS).with_parameter("locked", true))
            .await?;
        for event in locked {
            if let Some(message_instance_id) = event.matched_message {
                scope.schedule(WorkDescriptor::execute_message_couple(message_instance_id, event.id));
                report.message_couples += 1;
            }
        }

        // A lost sweep is never replayed, start a new one when messages wait
        let unhandled: Vec<MessageInstance> = scope
            .tx()
            .select_list(
                &SelectListDescriptor::new(queries::GET_UNHANDLED_MESSAGES)
                    .with_parameter("handled", false)
                    .paged(0, 1),
            )
            .await?;
        if !unhandled.is_empty() {
            scope.schedule(WorkDescriptor::match_messages());
            report.sweep_scheduled = true;
        }

        debug!(scheduled = scope.scheduled().len(), "Recovery scan done");
        self.transactions.commit(scope).await?;
        info!(report = %report, "Recovery completed");
        Ok(report)
    }
}
