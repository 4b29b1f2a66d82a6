//! Runs one unit of work inside its transaction.
//!
//! Each descriptor goes through the same stages: precondition check, then
//! execution, then on a business failure the failure is enriched and
//! persisted in a second transaction. Work that lost a commit race is
//! re-enqueued and its precondition decides whether it still applies.

use crate::application::failure_service::FailureService;
use crate::application::flow_node_executor::FlowNodeExecutor;
use crate::application::unit_of_work::{TransactionScope, TransactionService};
use crate::domain::diagnostic::DiagnosticContext;
use crate::domain::flow_node::{FlowNodeInstance, Lifecycle};
use crate::domain::state_machine::FlowNodeState;
use crate::domain::work::{Failure, WorkDescriptor, WorkKind};
use crate::error::{CoreError, ExecutionError, WorkError};
use crate::telemetry;
use crate::types::{FlowNodeInstanceId, MessageInstanceId, TenantId, WaitingEventId, WorkId};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Executes work descriptors
#[derive(Clone)]
pub struct WorkExecutor {
    /// Transaction boundaries
    transactions: TransactionService,

    /// Flow node execution
    executor: FlowNodeExecutor,

    /// Failure persistence
    failures: FailureService,
}

impl WorkExecutor {
    /// Create a new work executor
    pub fn new(transactions: TransactionService, executor: FlowNodeExecutor, failures: FailureService) -> Self {
        Self {
            transactions,
            executor,
            failures,
        }
    }

    /// Run a unit of work.
    ///
    /// `Ok` means the work is done (including when it lost a commit race and
    /// was re-enqueued). Errors tell the caller how to treat the descriptor:
    /// precondition and business failures are final, infrastructure
    /// failures leave the work to recovery.
    pub async fn execute(&self, work: &WorkDescriptor) -> Result<(), WorkError> {
        let started = Instant::now();
        debug!(work = %work, "Executing work");
        let result = self.run(work).await;
        let outcome = match &result {
            Ok(()) => "success",
            Err(e) => e.label(),
        };
        telemetry::record_work(work.kind.name(), outcome, started.elapsed());
        result
    }

    async fn run(&self, work: &WorkDescriptor) -> Result<(), WorkError> {
        if work.custom_transaction() {
            let matched = self
                .executor
                .messages()
                .match_messages(&self.transactions, work.tenant_id.clone())
                .await?;
            telemetry::record_messages_matched(matched);
            return Ok(());
        }

        let mut scope = self.transactions.begin(work.tenant_id.clone()).await?;
        match self.execute_in_scope(&mut scope, work).await {
            Ok(()) => match self.transactions.commit(scope).await {
                Ok(()) => Ok(()),
                Err(CoreError::ConcurrentModification(reason)) => self.retry(work, &reason).await,
                Err(e) => Err(e.into()),
            },
            Err(WorkError::Business(error)) => {
                rollback(scope, work).await;
                self.handle_failure(work, error).await
            }
            Err(e) => {
                rollback(scope, work).await;
                Err(e)
            }
        }
    }

    /// Precondition check then execution, inside the work's transaction
    async fn execute_in_scope(&self, scope: &mut TransactionScope, work: &WorkDescriptor) -> Result<(), WorkError> {
        match &work.kind {
            WorkKind::ExecuteFlowNode {
                flow_node_instance_id,
                expected,
            } => {
                let node = check_precondition(scope, flow_node_instance_id, expected).await?;
                if node.terminal {
                    return Err(WorkError::Precondition(format!(
                        "flow node {} is already terminal ({})",
                        node.id,
                        node.state()
                    )));
                }
                self.executor.execute(scope, node).await
            }
            WorkKind::NotifyChildFinished {
                process_definition_id,
                flow_node_instance_id,
                expected,
            } => {
                let node = check_precondition(scope, flow_node_instance_id, expected).await?;
                let definition = self.executor.definition(process_definition_id).await?;
                self.executor
                    .registry()
                    .notify_child_finished(scope, &definition, node)
                    .await
            }
            WorkKind::ExecuteMessageCouple {
                message_instance_id,
                waiting_event_id,
            } => {
                self.executor
                    .execute_message_couple(scope, message_instance_id, waiting_event_id)
                    .await
            }
            WorkKind::SetInFail {
                flow_node_instance_id,
                failure,
            } => self.mark_failed(scope, flow_node_instance_id, failure).await,
            WorkKind::MatchMessages => Err(WorkError::Consistency(
                "matching sweeps run in their own transactions".to_string(),
            )),
        }
    }

    async fn retry(&self, work: &WorkDescriptor, reason: &str) -> Result<(), WorkError> {
        debug!(work = %work, reason = %reason, "Work lost a commit race, retrying");
        telemetry::record_retry(work.kind.name());
        let mut retry = work.clone();
        retry.id = WorkId::generate();
        self.transactions.queue().enqueue(retry).await?;
        Ok(())
    }

    /// Persist a business failure on the node it belongs to.
    ///
    /// The original error is always returned so the caller can report it.
    async fn handle_failure(&self, work: &WorkDescriptor, error: ExecutionError) -> Result<(), WorkError> {
        let target = work.flow_node_instance_id().cloned().or_else(|| {
            error
                .context()
                .flow_node_instance_id
                .as_deref()
                .map(FlowNodeInstanceId::new)
        });
        let Some(target) = target else {
            match &work.kind {
                WorkKind::ExecuteMessageCouple {
                    message_instance_id,
                    waiting_event_id,
                } => {
                    self.discard_couple(work, message_instance_id, waiting_event_id, &error)
                        .await
                }
                _ => {
                    error!(work = %work, error = %error, "Business failure without a flow node to mark failed, dropping it")
                }
            }
            return Err(WorkError::Business(error));
        };

        let failure = Failure::from_error(error.clone());
        match self.set_in_fail(work.tenant_id.clone(), &target, &failure).await {
            Ok(()) => {}
            Err(WorkError::Infrastructure(e)) => {
                warn!(flow_node_instance_id = %target, error = %e, "Unable to mark flow node failed, scheduling a retry");
                let mut set_in_fail = WorkDescriptor::set_in_fail(target.clone(), failure);
                if let Some(tenant_id) = work.tenant_id.clone() {
                    set_in_fail = set_in_fail.for_tenant(tenant_id);
                }
                if let Err(e) = self.transactions.queue().enqueue(set_in_fail).await {
                    error!(flow_node_instance_id = %target, error = %e, "Unable to schedule the failure of flow node");
                }
            }
            Err(WorkError::Precondition(reason)) => {
                debug!(flow_node_instance_id = %target, reason = %reason, "Flow node not marked failed");
            }
            Err(e) => {
                error!(flow_node_instance_id = %target, error = %e, "Unable to mark flow node failed");
            }
        }
        Err(WorkError::Business(error))
    }

    /// Second transaction of a failed message start or event sub-process
    /// delivery: the waiting event listens again and the message is dropped
    async fn discard_couple(
        &self,
        work: &WorkDescriptor,
        message_instance_id: &MessageInstanceId,
        waiting_event_id: &WaitingEventId,
        error: &ExecutionError,
    ) {
        let discarded = async {
            let mut scope = self.transactions.begin(work.tenant_id.clone()).await?;
            let discarded = match self
                .executor
                .messages()
                .discard_couple(&mut scope, message_instance_id, waiting_event_id)
                .await
            {
                Ok(discarded) => discarded,
                Err(e) => {
                    rollback(scope, work).await;
                    return Err(e);
                }
            };
            self.transactions.commit(scope).await?;
            Ok::<bool, CoreError>(discarded)
        }
        .await;

        match discarded {
            Ok(true) => error!(
                message_id = %message_instance_id,
                waiting_event_id = %waiting_event_id,
                error = %error,
                "Message could not be delivered and was discarded"
            ),
            Ok(false) => debug!(message_id = %message_instance_id, "Couple of the failed delivery already released"),
            // Still locked: recovery schedules the couple again
            Err(e) => error!(
                message_id = %message_instance_id,
                error = %e,
                "Unable to release the couple of a failed delivery"
            ),
        }
    }

    /// Second transaction of a failed work: enrich, mark failed, record
    async fn set_in_fail(
        &self,
        tenant_id: Option<TenantId>,
        target: &FlowNodeInstanceId,
        failure: &Failure,
    ) -> Result<(), WorkError> {
        let mut scope = self.transactions.begin(tenant_id).await?;
        if let Err(e) = self.mark_failed(&mut scope, target, failure).await {
            if let Err(rollback_error) = scope.rollback().await {
                warn!(error = %rollback_error, "Rollback failed");
            }
            return Err(e);
        }
        match self.transactions.commit(scope).await {
            Ok(()) => Ok(()),
            // The node changed meanwhile, the failure is recorded by a dedicated work
            Err(e @ CoreError::ConcurrentModification(_)) => Err(WorkError::Infrastructure(e)),
            Err(e) => Err(e.into()),
        }
    }

    async fn mark_failed(
        &self,
        scope: &mut TransactionScope,
        target: &FlowNodeInstanceId,
        failure: &Failure,
    ) -> Result<(), WorkError> {
        let node: Option<FlowNodeInstance> = scope.tx().select_one(target.as_str()).await?;
        let Some(mut node) = node else {
            return Err(WorkError::Precondition(format!("flow node {} to mark failed is gone", target)));
        };
        if node.state() == FlowNodeState::Failed {
            return Err(WorkError::Precondition(format!("flow node {} is already failed", target)));
        }

        let mut failure = failure.clone();
        failure.error.enrich(&DiagnosticContext {
            process_definition_id: Some(node.process_definition_id.to_string()),
            process_instance_id: Some(node.parent_process_instance_id.to_string()),
            flow_node_instance_id: Some(node.id.to_string()),
            flow_node_name: Some(node.name.clone()),
            ..Default::default()
        });

        self.executor.set_as_failed(scope, &mut node).await?;
        self.failures.create_flow_node_failure(scope.tx(), &node, &failure).await?;
        telemetry::record_flow_node_failed(&failure.scope);
        info!(
            flow_node_instance_id = %node.id,
            name = %node.name,
            scope = %failure.scope,
            error = %failure.error,
            "Flow node failed"
        );
        Ok(())
    }
}

/// Load the targeted node and compare it with the lifecycle captured at
/// scheduling time
async fn check_precondition(
    scope: &mut TransactionScope,
    flow_node_instance_id: &FlowNodeInstanceId,
    expected: &Lifecycle,
) -> Result<FlowNodeInstance, WorkError> {
    let node: Option<FlowNodeInstance> = scope.tx().select_one(flow_node_instance_id.as_str()).await?;
    let Some(node) = node else {
        return Err(WorkError::Precondition(format!(
            "flow node {} not found, likely already executed",
            flow_node_instance_id
        )));
    };
    if !expected.matches(&node.lifecycle) {
        return Err(WorkError::Precondition(format!(
            "flow node {} changed since the work was scheduled: expected {}, found {}",
            flow_node_instance_id, expected, node.lifecycle
        )));
    }
    Ok(node)
}

async fn rollback(scope: TransactionScope, work: &WorkDescriptor) {
    if let Err(e) = scope.rollback().await {
        warn!(work = %work, error = %e, "Rollback failed");
    }
}
