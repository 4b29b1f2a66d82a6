//! Cascade of completions from flow nodes to their containers.
//!
//! A node reaching a terminal state does not notify its container directly:
//! a `NotifyChildFinished` work is scheduled instead, so each hop of the
//! cascade is its own unit of work.

use crate::application::failure_service::FailureService;
use crate::application::flow_node_factory::FlowNodeFactory;
use crate::application::message_correlation::MessageCorrelationService;
use crate::application::transition_evaluator::TransitionConditionEvaluator;
use crate::application::unit_of_work::TransactionScope;
use crate::domain::definition::{
    FlowContainerDefinition, FlowNodeDefinition, GatewayKind, ProcessDefinition, TransitionDefinition,
};
use crate::domain::diagnostic::scope as failure_scope;
use crate::domain::expression::ExpressionContext;
use crate::domain::flow_node::{
    ArchivedFlowNodeInstance, ContainerRef, FlowNodeInstance, ProcessInstance, ProcessInstanceState,
};
use crate::domain::repository::{queries, ArchiveInsertRecord, ArchiveService, SelectListDescriptor};
use crate::domain::state_machine::FlowNodeState;
use crate::domain::work::WorkDescriptor;
use crate::error::{CoreError, ExecutionError, ExecutionErrorKind, WorkError};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};

/// Reacts to flow nodes reaching terminal states
#[derive(Clone)]
pub struct ContainerRegistry {
    /// Transition condition evaluator
    evaluator: TransitionConditionEvaluator,

    /// Creates the targets of taken transitions
    factory: FlowNodeFactory,

    /// Archives failures of finished nodes
    failures: FailureService,

    /// Archive storage for finished nodes
    archive: Arc<dyn ArchiveService>,

    /// Removes event sub-process registrations of completed instances
    messages: MessageCorrelationService,
}

impl ContainerRegistry {
    /// Create a new container registry
    pub fn new(
        evaluator: TransitionConditionEvaluator,
        factory: FlowNodeFactory,
        failures: FailureService,
        archive: Arc<dyn ArchiveService>,
        messages: MessageCorrelationService,
    ) -> Self {
        Self {
            evaluator,
            factory,
            failures,
            archive,
            messages,
        }
    }

    /// Schedule the notification of the node's container once the node is
    /// terminal. Failed nodes stay where they are until an operator acts.
    pub fn node_reached_state(&self, scope: &mut TransactionScope, node: &FlowNodeInstance) {
        if !node.terminal || node.state() == FlowNodeState::Failed {
            return;
        }
        debug!(
            flow_node_instance_id = %node.id,
            state = %node.state(),
            container = %node.container.id(),
            "Flow node reached terminal state, notifying container"
        );
        scope.schedule(WorkDescriptor::notify_child_finished(node));
    }

    /// Let the container react to a finished child: take the outgoing
    /// transitions of a completed child, archive the child, then complete
    /// the container when it has no child left.
    pub async fn notify_child_finished(
        &self,
        scope: &mut TransactionScope,
        definition: &Arc<ProcessDefinition>,
        node: FlowNodeInstance,
    ) -> Result<(), WorkError> {
        if !node.terminal {
            return Err(WorkError::Precondition(format!(
                "flow node {} is not yet completed ({})",
                node.id,
                node.snapshot()
            )));
        }

        let mut process_instance: ProcessInstance =
            scope.tx().get(node.parent_process_instance_id.as_str()).await?;

        // Outgoing transitions
        if node.state() == FlowNodeState::Completed {
            let flow_node = flow_node_definition(definition, &node)?;
            let container = definition.container_of(&flow_node.id).ok_or_else(|| {
                CoreError::ConsistencyError(format!("No container for flow node definition {}", flow_node.id))
            })?;
            let context = ExpressionContext::for_definition(definition.clone())
                .in_container(node.container.clone())
                .with_variables(process_instance.variables.clone());
            let taken = self.select_transitions(container, flow_node, &context).await?;
            for transition in taken {
                self.take_transition(scope, definition, container, &node, transition).await?;
            }
        }

        self.archive_flow_node(scope, &node).await?;
        self.complete_container(scope, &node, &mut process_instance).await
    }

    async fn select_transitions<'d>(
        &self,
        container: &'d FlowContainerDefinition,
        flow_node: &FlowNodeDefinition,
        context: &ExpressionContext,
    ) -> Result<Vec<&'d TransitionDefinition>, WorkError> {
        let outgoing = container.outgoing(&flow_node.id);
        if outgoing.is_empty() {
            return Ok(Vec::new());
        }
        if flow_node.gateway == Some(GatewayKind::Parallel) {
            return Ok(outgoing);
        }

        let default = flow_node
            .default_transition
            .as_ref()
            .and_then(|id| outgoing.iter().copied().find(|t| &t.id == id));
        let mut taken = Vec::new();
        for transition in outgoing.iter().copied().filter(|t| Some(t.id.as_str()) != default.map(|d| d.id.as_str())) {
            let passes = self.evaluator.evaluate_condition(transition, context).await?;
            if passes != Some(false) {
                taken.push(transition);
                if flow_node.gateway == Some(GatewayKind::Exclusive) {
                    break;
                }
            }
        }

        if taken.is_empty() {
            match default {
                Some(default) => taken.push(default),
                None => {
                    return Err(ExecutionError::new(
                        ExecutionErrorKind::NoTransition,
                        format!(
                            "There is no default transition on {}, but no outgoing transition matched",
                            flow_node.name
                        ),
                    )
                    .with_scope(failure_scope::OUTGOING_TRANSITION)
                    .into())
                }
            }
        }
        Ok(taken)
    }

    async fn take_transition(
        &self,
        scope: &mut TransactionScope,
        definition: &ProcessDefinition,
        container: &FlowContainerDefinition,
        source: &FlowNodeInstance,
        transition: &TransitionDefinition,
    ) -> Result<(), WorkError> {
        let target = container.flow_node(&transition.target).ok_or_else(|| {
            CoreError::ConsistencyError(format!(
                "Transition {} targets unknown flow node {}",
                transition.id, transition.target
            ))
        })?;
        debug!(transition = %transition.name, source = %source.name, target = %target.name, "Taking transition");

        let incoming = container.incoming_count(&target.id) as u32;
        if target.gateway == Some(GatewayKind::Parallel) && incoming > 1 {
            return self.merge_token(scope, definition, source, target, incoming).await;
        }
        self.factory
            .instantiate(
                scope,
                &source.parent_process_instance_id,
                definition,
                target,
                source.container.clone(),
            )
            .await?;
        Ok(())
    }

    /// Give one token to the converging gateway of the container, creating it
    /// on the first token. The gateway is scheduled once every branch arrived.
    async fn merge_token(
        &self,
        scope: &mut TransactionScope,
        definition: &ProcessDefinition,
        source: &FlowNodeInstance,
        target: &FlowNodeDefinition,
        incoming: u32,
    ) -> Result<(), WorkError> {
        let query = SelectListDescriptor::new(queries::GET_ACTIVE_GATEWAY)
            .with_parameter("container.id", source.container.id())
            .with_parameter("flow_node_definition_id", target.id.as_str())
            .with_parameter("terminal", false);
        let gateways: Vec<FlowNodeInstance> = scope.tx().select_list(&query).await?;
        let waiting = gateways
            .into_iter()
            .find(|g| g.state() == FlowNodeState::Initializing && g.token_count < incoming);

        let gateway = match waiting {
            Some(mut gateway) => {
                gateway.token_count += 1;
                scope.tx().update(&gateway).await?;
                gateway
            }
            None => {
                let mut gateway = self.factory.create(
                    &source.parent_process_instance_id,
                    definition,
                    target,
                    source.container.clone(),
                )?;
                gateway.token_count = 1;
                self.factory.persist(scope, gateway).await?
            }
        };
        debug!(
            flow_node_instance_id = %gateway.id,
            tokens = gateway.token_count,
            expected = incoming,
            "Token merged into converging gateway"
        );
        if gateway.token_count >= incoming {
            scope.schedule(WorkDescriptor::execute_flow_node(&gateway));
        }
        Ok(())
    }

    async fn archive_flow_node(&self, scope: &mut TransactionScope, node: &FlowNodeInstance) -> Result<(), CoreError> {
        let archive_date = Utc::now();
        self.failures
            .archive_flow_node_failures(scope.tx(), &node.id, archive_date)
            .await?;
        let record = ArchiveInsertRecord::new(&ArchivedFlowNodeInstance::archive(node, archive_date))?;
        self.archive.record_inserts(scope.tx(), archive_date, vec![record]).await?;
        self.failures.delete_flow_node_failures(scope.tx(), &node.id).await?;
        scope.tx().delete::<FlowNodeInstance>(&[node.id.to_string()]).await?;
        debug!(flow_node_instance_id = %node.id, "Flow node archived");
        Ok(())
    }

    async fn complete_container(
        &self,
        scope: &mut TransactionScope,
        node: &FlowNodeInstance,
        process_instance: &mut ProcessInstance,
    ) -> Result<(), WorkError> {
        let query = SelectListDescriptor::new(queries::GET_FLOW_NODES_OF_CONTAINER)
            .with_parameter("container.id", node.container.id())
            .paged(0, 1);
        let remaining: Vec<FlowNodeInstance> = scope.tx().select_list(&query).await?;

        match &node.container {
            ContainerRef::ProcessInstance(_) => {
                if remaining.is_empty() && !process_instance.state.is_terminal() {
                    process_instance.state = if process_instance.interrupted {
                        ProcessInstanceState::Cancelled
                    } else {
                        ProcessInstanceState::Completed
                    };
                    process_instance.ended_at = Some(Utc::now());
                    self.messages
                        .delete_event_sub_process_waiting_events(scope, &process_instance.id)
                        .await?;
                    info!(
                        process_instance_id = %process_instance.id,
                        state = ?process_instance.state,
                        "Process instance finished"
                    );
                }
                // Sibling notifications of one container conflict on this update
                scope.tx().update(&*process_instance).await?;
            }
            ContainerRef::SubProcess(sub_process_id) => {
                let sub_process: Option<FlowNodeInstance> = scope.tx().select_one(sub_process_id.as_str()).await?;
                let Some(sub_process) = sub_process else {
                    return Err(CoreError::ConsistencyError(format!(
                        "Sub-process {} of flow node {} not found",
                        sub_process_id, node.id
                    ))
                    .into());
                };
                scope.tx().update(&sub_process).await?;
                if remaining.is_empty() && !sub_process.terminal {
                    debug!(flow_node_instance_id = %sub_process.id, "Sub-process has no active child left");
                    scope.schedule(WorkDescriptor::execute_flow_node(&sub_process));
                }
            }
        }
        Ok(())
    }
}

fn flow_node_definition<'d>(
    definition: &'d ProcessDefinition,
    node: &FlowNodeInstance,
) -> Result<&'d FlowNodeDefinition, CoreError> {
    definition.flow_node(&node.flow_node_definition_id).ok_or_else(|| {
        CoreError::ConsistencyError(format!(
            "Flow node definition {} not found in process {}",
            node.flow_node_definition_id, definition.id
        ))
    })
}
