//! Drives flow nodes through their state tables.
//!
//! One `ExecuteFlowNode` work runs the action of the node's current state and
//! keeps moving the node forward until it reaches a state where it has to
//! wait (a message, its children, missing tokens), a terminal state, or a
//! behavior reports the step as still in progress.

use crate::application::container_registry::ContainerRegistry;
use crate::application::flow_node_factory::FlowNodeFactory;
use crate::application::message_correlation::{MessageCorrelationService, WaitingEventTarget};
use crate::application::unit_of_work::TransactionScope;
use crate::domain::behavior::{BehaviorOutcome, ConnectorExecutor, FlowNodeBehavior};
use crate::domain::definition::{ConnectorDefinition, FlowNodeDefinition, GatewayKind, Operation, ProcessDefinition};
use crate::domain::diagnostic::{scope as failure_scope, ConnectorEvent, DiagnosticContext};
use crate::domain::expression::{ExpressionContext, ExpressionResolver};
use crate::domain::flow_node::{ContainerRef, FlowNodeInstance, FlowNodeType, ProcessInstance};
use crate::domain::message::{MessageInstance, WaitingEvent, WaitingEventKind};
use crate::domain::repository::{queries, ProcessDefinitionRepository, SelectListDescriptor};
use crate::domain::state_machine::{FlowNodeState, Interruption, StateMachine};
use crate::domain::work::WorkDescriptor;
use crate::error::{CoreError, ExecutionError, ExecutionErrorKind, WorkError};
use crate::types::{FlowNodeDefinitionId, FlowNodeInstanceId, MessageInstanceId, ProcessDefinitionId, WaitingEventId};
use chrono::Utc;
use dashmap::DashMap;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, trace};

/// Result of the action of one state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepOutcome {
    /// The state's step is done, move to the next state
    Proceed,
    /// Stay in the current state until something external resumes the node
    Wait,
    /// The behavior continues outside the engine
    InProgress,
}

/// Executes flow nodes, interruptions and message deliveries
#[derive(Clone)]
pub struct FlowNodeExecutor {
    /// State tables
    state_machine: Arc<StateMachine>,

    /// Deployed process definitions
    definitions: Arc<dyn ProcessDefinitionRepository>,

    /// Creates child nodes and process instances
    factory: FlowNodeFactory,

    /// Notifies containers of finished nodes
    registry: ContainerRegistry,

    /// Messaging
    messages: MessageCorrelationService,

    /// Evaluates connector inputs and outputs
    resolver: Arc<dyn ExpressionResolver>,

    /// Runs connectors, when any is configured
    connectors: Option<Arc<dyn ConnectorExecutor>>,

    /// User logic per flow node definition
    behaviors: Arc<DashMap<FlowNodeDefinitionId, Arc<dyn FlowNodeBehavior>>>,
}

impl FlowNodeExecutor {
    /// Create a new executor
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        state_machine: Arc<StateMachine>,
        definitions: Arc<dyn ProcessDefinitionRepository>,
        factory: FlowNodeFactory,
        registry: ContainerRegistry,
        messages: MessageCorrelationService,
        resolver: Arc<dyn ExpressionResolver>,
        connectors: Option<Arc<dyn ConnectorExecutor>>,
        behaviors: Arc<DashMap<FlowNodeDefinitionId, Arc<dyn FlowNodeBehavior>>>,
    ) -> Self {
        Self {
            state_machine,
            definitions,
            factory,
            registry,
            messages,
            resolver,
            connectors,
            behaviors,
        }
    }

    /// Container registry used for completions
    pub fn registry(&self) -> &ContainerRegistry {
        &self.registry
    }

    /// Messaging service
    pub fn messages(&self) -> &MessageCorrelationService {
        &self.messages
    }

    /// Deployed definition by id
    pub async fn definition(&self, id: &ProcessDefinitionId) -> Result<Arc<ProcessDefinition>, CoreError> {
        self.definitions
            .find_by_id(id)
            .await?
            .ok_or_else(|| CoreError::DefinitionNotFound(id.to_string()))
    }

    /// Run the node from its current state until it has to stop
    pub async fn execute(&self, scope: &mut TransactionScope, mut node: FlowNodeInstance) -> Result<(), WorkError> {
        if node.terminal {
            return Err(WorkError::Precondition(format!(
                "flow node {} is terminal ({})",
                node.id,
                node.state()
            )));
        }
        let definition = self.definition(&node.process_definition_id).await?;

        loop {
            let outcome = if node.lifecycle.executing {
                // The step was started earlier and completed outside the engine
                StepOutcome::Proceed
            } else {
                self.run_state(scope, &definition, &mut node).await?
            };
            trace!(flow_node_instance_id = %node.id, state = %node.state(), outcome = ?outcome, "State action done");

            match outcome {
                StepOutcome::Proceed => {
                    let next = self.state_machine.next_state(&node)?;
                    debug!(
                        flow_node_instance_id = %node.id,
                        from = %node.state(),
                        to = %next,
                        "Flow node changes state"
                    );
                    node.set_state(next);
                    if next.is_terminal() {
                        scope.tx().update(&node).await?;
                        self.registry.node_reached_state(scope, &node);
                        return Ok(());
                    }
                }
                StepOutcome::Wait => {
                    scope.tx().update(&node).await?;
                    return Ok(());
                }
                StepOutcome::InProgress => {
                    node.set_executing(true);
                    scope.tx().update(&node).await?;
                    return Ok(());
                }
            }
        }
    }

    async fn run_state(
        &self,
        scope: &mut TransactionScope,
        definition: &Arc<ProcessDefinition>,
        node: &mut FlowNodeInstance,
    ) -> Result<StepOutcome, WorkError> {
        let flow_node = flow_node_definition(definition, node)?;
        match node.state() {
            FlowNodeState::Initializing | FlowNodeState::InitializingWithBoundary => {
                self.initialize(scope, definition, flow_node, node).await
            }
            FlowNodeState::Waiting => self.wait_for_message(scope, definition, flow_node, node).await,
            FlowNodeState::Executing => self.execute_step(scope, definition, flow_node, node).await,
            FlowNodeState::Completing => {
                if self.has_children(scope, node).await? {
                    Ok(StepOutcome::Wait)
                } else {
                    Ok(StepOutcome::Proceed)
                }
            }
            FlowNodeState::AbortingBoundaryOnCompleting
            | FlowNodeState::AbortingWithBoundary
            | FlowNodeState::CancellingWithBoundary => {
                self.abort_boundary_events(scope, node).await?;
                Ok(StepOutcome::Proceed)
            }
            FlowNodeState::Aborting | FlowNodeState::Cancelling => self.interrupt_children(scope, node).await,
            state => Err(CoreError::InvalidStateTransition(format!(
                "No action for flow node {} in state {}",
                node.id, state
            ))
            .into()),
        }
    }

    async fn initialize(
        &self,
        scope: &mut TransactionScope,
        definition: &Arc<ProcessDefinition>,
        flow_node: &FlowNodeDefinition,
        node: &FlowNodeInstance,
    ) -> Result<StepOutcome, WorkError> {
        if flow_node.gateway == Some(GatewayKind::Parallel) {
            let incoming = definition
                .container_of(&flow_node.id)
                .map_or(0, |container| container.incoming_count(&flow_node.id)) as u32;
            if incoming > 1 && node.token_count < incoming {
                debug!(flow_node_instance_id = %node.id, tokens = node.token_count, expected = incoming, "Gateway waits for tokens");
                return Ok(StepOutcome::Wait);
            }
        }

        if node.state() == FlowNodeState::InitializingWithBoundary {
            for boundary_id in &flow_node.boundary_events {
                let boundary = definition.flow_node(boundary_id).ok_or_else(|| {
                    CoreError::ConsistencyError(format!("Boundary event {} not found", boundary_id))
                })?;
                self.factory
                    .instantiate_boundary_event(scope, node, definition, boundary)
                    .await?;
            }
        }
        Ok(StepOutcome::Proceed)
    }

    async fn wait_for_message(
        &self,
        scope: &mut TransactionScope,
        definition: &Arc<ProcessDefinition>,
        flow_node: &FlowNodeDefinition,
        node: &FlowNodeInstance,
    ) -> Result<StepOutcome, WorkError> {
        if let Some(trigger) = &flow_node.catch_message {
            let kind = if node.node_type == FlowNodeType::BoundaryEvent {
                WaitingEventKind::Boundary
            } else {
                WaitingEventKind::IntermediateCatch
            };
            let process_instance: ProcessInstance = scope.tx().get(node.parent_process_instance_id.as_str()).await?;
            let context = expression_context(definition, node, &process_instance);
            self.messages
                .register_waiting_event(
                    scope,
                    definition,
                    trigger,
                    WaitingEventTarget::FlowNode { node, kind },
                    &context,
                )
                .await?;
        }
        Ok(StepOutcome::Wait)
    }

    async fn execute_step(
        &self,
        scope: &mut TransactionScope,
        definition: &Arc<ProcessDefinition>,
        flow_node: &FlowNodeDefinition,
        node: &FlowNodeInstance,
    ) -> Result<StepOutcome, WorkError> {
        let mut process_instance: ProcessInstance = scope.tx().get(node.parent_process_instance_id.as_str()).await?;
        let initial_variables = process_instance.variables.clone();

        self.run_connectors(ConnectorEvent::OnEnter, definition, flow_node, node, &mut process_instance)
            .await?;

        // User logic
        let behavior = self.behaviors.get(&flow_node.id).map(|b| b.value().clone());
        if let Some(behavior) = behavior {
            let outcome = behavior.execute(node, &mut process_instance.variables).await?;
            if outcome == BehaviorOutcome::InProgress {
                save_variables(scope, &process_instance, &initial_variables).await?;
                debug!(flow_node_instance_id = %node.id, "Flow node behavior in progress");
                return Ok(StepOutcome::InProgress);
            }
        }

        if let Some(trigger) = &flow_node.throw_message {
            let context = expression_context(definition, node, &process_instance);
            self.messages
                .throw_message(scope, trigger, &node.name, &definition.id, &context)
                .await?;
        }

        if flow_node.terminate {
            self.terminate_container(scope, node).await?;
        }

        if let Some(content) = flow_node.sub_process.as_deref() {
            let children: Vec<&FlowNodeDefinition> = if flow_node.triggered_by_event {
                content
                    .flow_nodes
                    .iter()
                    .filter(|n| content.incoming_count(&n.id) == 0 && n.attached_to.is_none())
                    .collect()
            } else {
                content.initial_flow_nodes()
            };
            for child in children {
                self.factory
                    .instantiate(
                        scope,
                        &node.parent_process_instance_id,
                        definition,
                        child,
                        ContainerRef::SubProcess(node.id.clone()),
                    )
                    .await?;
            }
        }

        if node.node_type == FlowNodeType::BoundaryEvent && flow_node.interrupting {
            self.cancel_attached_activity(scope, node).await?;
        }

        self.run_connectors(ConnectorEvent::OnFinish, definition, flow_node, node, &mut process_instance)
            .await?;
        save_variables(scope, &process_instance, &initial_variables).await?;
        Ok(StepOutcome::Proceed)
    }

    async fn run_connectors(
        &self,
        event: ConnectorEvent,
        definition: &Arc<ProcessDefinition>,
        flow_node: &FlowNodeDefinition,
        node: &FlowNodeInstance,
        process_instance: &mut ProcessInstance,
    ) -> Result<(), ExecutionError> {
        for connector in flow_node.connectors.iter().filter(|c| c.activation_event == event) {
            let context = expression_context(definition, node, process_instance);
            let outputs = self.run_connector(connector, &context).await.map_err(|e| {
                ExecutionError::new(
                    ExecutionErrorKind::ConnectorExecution,
                    format!("Connector {} failed on flow node {}", connector.name, node.name),
                )
                .with_connector(&connector.name, &connector.definition_id, event)
                .with_scope(failure_scope::CONNECTOR)
                .caused_by(e)
            })?;
            process_instance.variables.extend(outputs);
        }
        Ok(())
    }

    /// Evaluate inputs, validate, execute, then apply output operations.
    /// Returns the variables written by the output operations.
    async fn run_connector(
        &self,
        connector: &ConnectorDefinition,
        context: &ExpressionContext,
    ) -> Result<Map<String, Value>, ExecutionError> {
        let executor = self.connectors.as_ref().ok_or_else(|| {
            ExecutionError::new(ExecutionErrorKind::ConnectorExecution, "No connector executor is configured")
        })?;

        let mut inputs = Map::new();
        for (input_name, expression) in &connector.inputs {
            let value = self.resolver.evaluate(expression, context).await.map_err(|e| {
                ExecutionError::new(
                    ExecutionErrorKind::ConnectorExecution,
                    format!("Unable to evaluate connector input {}", input_name),
                )
                .with_connector_input(input_name)
                .caused_by(e)
            })?;
            inputs.insert(input_name.clone(), value);
        }

        executor
            .validate(&connector.definition_id, &inputs)
            .await
            .map_err(|e| ExecutionError::new(ExecutionErrorKind::ConnectorValidation, "Connector inputs are invalid").caused_by(e))?;
        let results = executor.execute(&connector.definition_id, inputs).await?;

        let mut output_context = context.clone();
        output_context.extend_variables(&results);
        let mut outputs = Map::new();
        for operation in &connector.outputs {
            let value = self
                .resolver
                .evaluate(&operation.expression, &output_context)
                .await
                .map_err(|e| {
                    ExecutionError::new(
                        ExecutionErrorKind::OperationExecution,
                        format!("Unable to execute output operation on {}", operation.target),
                    )
                    .caused_by(e)
                })?;
            output_context.variables.insert(operation.target.clone(), value.clone());
            outputs.insert(operation.target.clone(), value);
        }
        Ok(outputs)
    }

    async fn has_children(&self, scope: &mut TransactionScope, node: &FlowNodeInstance) -> Result<bool, CoreError> {
        let query = SelectListDescriptor::new(queries::GET_FLOW_NODES_OF_CONTAINER)
            .with_parameter("container.id", node.id.as_str())
            .paged(0, 1);
        let children: Vec<FlowNodeInstance> = scope.tx().select_list(&query).await?;
        Ok(!children.is_empty())
    }

    async fn abort_boundary_events(&self, scope: &mut TransactionScope, node: &FlowNodeInstance) -> Result<(), WorkError> {
        let query = SelectListDescriptor::new(queries::GET_BOUNDARY_EVENTS_OF_ACTIVITY)
            .with_parameter("attached_to", node.id.as_str());
        let boundaries: Vec<FlowNodeInstance> = scope.tx().select_list(&query).await?;
        for boundary in boundaries {
            // The boundary event that fired is executing and completes on its own
            if boundary.state() == FlowNodeState::Executing || boundary.lifecycle.executing {
                continue;
            }
            self.interrupt(scope, boundary, Interruption::Abort).await?;
        }
        Ok(())
    }

    async fn interrupt_children(
        &self,
        scope: &mut TransactionScope,
        node: &FlowNodeInstance,
    ) -> Result<StepOutcome, WorkError> {
        self.messages.delete_waiting_events_of_flow_node(scope, &node.id).await?;
        if node.node_type != FlowNodeType::SubProcess {
            return Ok(StepOutcome::Proceed);
        }

        let query = SelectListDescriptor::new(queries::GET_FLOW_NODES_OF_CONTAINER)
            .with_parameter("container.id", node.id.as_str());
        let children: Vec<FlowNodeInstance> = scope.tx().select_list(&query).await?;
        if children.is_empty() {
            return Ok(StepOutcome::Proceed);
        }
        for child in children {
            self.interrupt(scope, child, Interruption::Abort).await?;
        }
        Ok(StepOutcome::Wait)
    }

    async fn terminate_container(&self, scope: &mut TransactionScope, node: &FlowNodeInstance) -> Result<(), WorkError> {
        let query = SelectListDescriptor::new(queries::GET_FLOW_NODES_OF_CONTAINER)
            .with_parameter("container.id", node.container.id());
        let siblings: Vec<FlowNodeInstance> = scope.tx().select_list(&query).await?;
        debug!(flow_node_instance_id = %node.id, siblings = siblings.len(), "Terminate end event reached");
        for sibling in siblings.into_iter().filter(|s| s.id != node.id) {
            self.interrupt(scope, sibling, Interruption::Abort).await?;
        }
        Ok(())
    }

    async fn cancel_attached_activity(&self, scope: &mut TransactionScope, node: &FlowNodeInstance) -> Result<(), WorkError> {
        let Some(activity_id) = &node.attached_to else {
            return Ok(());
        };
        let activity: Option<FlowNodeInstance> = scope.tx().select_one(activity_id.as_str()).await?;
        if let Some(activity) = activity {
            debug!(flow_node_instance_id = %activity.id, boundary = %node.name, "Interrupting boundary event cancels activity");
            self.interrupt(scope, activity, Interruption::Cancel).await?;
        }
        Ok(())
    }

    /// Abort or cancel a node.
    ///
    /// A node running a step keeps running it: only the flag is recorded and
    /// the node leaves its normal path once the step completes. Returns
    /// whether the node was interrupted by this call.
    pub async fn interrupt(
        &self,
        scope: &mut TransactionScope,
        mut node: FlowNodeInstance,
        interruption: Interruption,
    ) -> Result<bool, WorkError> {
        if node.terminal || node.lifecycle.is_interrupted() {
            return Ok(false);
        }
        match interruption {
            Interruption::Abort => node.lifecycle.aborting = true,
            Interruption::Cancel => node.lifecycle.canceling = true,
        }

        if node.lifecycle.executing {
            debug!(flow_node_instance_id = %node.id, interruption = ?interruption, "Flow node flagged, interruption deferred until its step completes");
            node.last_update = Utc::now();
            scope.tx().update(&node).await?;
            return Ok(true);
        }

        let state = self.state_machine.interruption_state(&node, interruption)?;
        debug!(flow_node_instance_id = %node.id, from = %node.state(), to = %state, "Interrupting flow node");
        node.set_state(state);
        scope.tx().update(&node).await?;
        scope.schedule(WorkDescriptor::execute_flow_node(&node));
        Ok(true)
    }

    /// Move a node to the failed state, dropping its message registrations
    pub async fn set_as_failed(&self, scope: &mut TransactionScope, node: &mut FlowNodeInstance) -> Result<(), CoreError> {
        self.messages.delete_waiting_events_of_flow_node(scope, &node.id).await?;
        node.set_state(FlowNodeState::Failed);
        scope.tx().update(&*node).await?;
        debug!(flow_node_instance_id = %node.id, "Flow node set as failed");
        Ok(())
    }

    /// Create a process instance and its first flow nodes.
    ///
    /// With `start_event`, only that start event is instantiated (message
    /// start); otherwise every initial flow node of the root container is.
    pub async fn start_process_instance(
        &self,
        scope: &mut TransactionScope,
        definition: &Arc<ProcessDefinition>,
        variables: Map<String, Value>,
        start_event: Option<&FlowNodeDefinition>,
    ) -> Result<ProcessInstance, WorkError> {
        let process_instance = self.factory.create_process_instance(scope, definition, variables).await?;
        let container = ContainerRef::ProcessInstance(process_instance.id.clone());

        // Event sub-processes wait for their start message
        let context = ExpressionContext::for_definition(definition.clone())
            .in_container(container.clone())
            .with_variables(process_instance.variables.clone());
        for sub_process in definition.container.flow_nodes.iter().filter(|n| n.triggered_by_event) {
            let start = sub_process
                .sub_process
                .as_deref()
                .and_then(|content| content.flow_nodes.iter().find(|n| n.catch_message.is_some()));
            if let Some((start, trigger)) = start.and_then(|s| s.catch_message.as_ref().map(|t| (s, t))) {
                self.messages
                    .register_waiting_event(
                        scope,
                        definition,
                        trigger,
                        WaitingEventTarget::EventSubProcess {
                            process_instance_id: &process_instance.id,
                            sub_process,
                            start,
                        },
                        &context,
                    )
                    .await?;
            }
        }

        let initial: Vec<&FlowNodeDefinition> = match start_event {
            Some(start_event) => vec![start_event],
            None => definition.container.initial_flow_nodes(),
        };
        for flow_node in initial {
            self.factory
                .instantiate(scope, &process_instance.id, definition, flow_node, container.clone())
                .await?;
        }
        Ok(process_instance)
    }

    /// Register the waiting events of the message start events of a definition
    pub async fn register_start_events(
        &self,
        scope: &mut TransactionScope,
        definition: &Arc<ProcessDefinition>,
    ) -> Result<usize, WorkError> {
        let context = ExpressionContext::for_definition(definition.clone());
        let mut registered = 0;
        for start in definition
            .container
            .flow_nodes
            .iter()
            .filter(|n| n.node_type == FlowNodeType::StartEvent)
        {
            if let Some(trigger) = &start.catch_message {
                self.messages
                    .register_waiting_event(scope, definition, trigger, WaitingEventTarget::Start { flow_node: start }, &context)
                    .await?;
                registered += 1;
            }
        }
        Ok(registered)
    }

    /// Deliver a matched message to the construct that waited for it
    pub async fn execute_message_couple(
        &self,
        scope: &mut TransactionScope,
        message_instance_id: &MessageInstanceId,
        waiting_event_id: &WaitingEventId,
    ) -> Result<(), WorkError> {
        let Some(couple) = self
            .messages
            .consume_couple(scope, message_instance_id, waiting_event_id)
            .await?
        else {
            return Ok(());
        };
        let event = &couple.waiting_event;
        let definition = self.definition(&event.process_definition_id).await?;
        let catching = definition.flow_node(&event.flow_node_definition_id).ok_or_else(|| {
            CoreError::ConsistencyError(format!(
                "Catching flow node {} not found in process {}",
                event.flow_node_definition_id, definition.id
            ))
        })?;
        let operations = catching
            .catch_message
            .as_ref()
            .map(|trigger| trigger.operations.as_slice())
            .unwrap_or_default();
        debug!(
            message_name = %event.message_name,
            kind = ?event.kind,
            flow_node = %event.flow_node_name,
            "Delivering message"
        );

        match event.kind {
            WaitingEventKind::Boundary | WaitingEventKind::IntermediateCatch => {
                let node_id = event.flow_node_instance_id.clone().ok_or_else(|| {
                    CoreError::ConsistencyError(format!("Waiting event {} has no flow node", event.id))
                })?;
                self.deliver_to_flow_node(scope, &definition, &node_id, &couple.message, operations)
                    .await
                    .map_err(|e| match e {
                        WorkError::Business(mut error) => {
                            error.enrich(&DiagnosticContext {
                                flow_node_instance_id: Some(node_id.to_string()),
                                ..Default::default()
                            });
                            WorkError::Business(error)
                        }
                        other => other,
                    })
            }
            WaitingEventKind::Start => {
                let mut variables = Map::new();
                let context = ExpressionContext::for_definition(definition.clone());
                self.messages
                    .apply_operations(operations, &couple.message, &context, &mut variables)
                    .await?;
                let process_instance = self
                    .start_process_instance(scope, &definition, variables, Some(catching))
                    .await?;
                debug!(process_instance_id = %process_instance.id, "Process instance started by message");
                if let Some(trigger) = &catching.catch_message {
                    self.messages
                        .register_waiting_event(
                            scope,
                            &definition,
                            trigger,
                            WaitingEventTarget::Start { flow_node: catching },
                            &context,
                        )
                        .await?;
                }
                Ok(())
            }
            WaitingEventKind::EventSubProcess => self.trigger_event_sub_process(scope, &definition, &couple.message, event, operations).await,
        }
    }

    async fn deliver_to_flow_node(
        &self,
        scope: &mut TransactionScope,
        definition: &Arc<ProcessDefinition>,
        node_id: &FlowNodeInstanceId,
        message: &MessageInstance,
        operations: &[Operation],
    ) -> Result<(), WorkError> {
        let node: Option<FlowNodeInstance> = scope.tx().select_one(node_id.as_str()).await?;
        let Some(mut node) = node else {
            return Err(WorkError::Precondition(format!("flow node {} waiting for the message is gone", node_id)));
        };
        if node.state() != FlowNodeState::Waiting || node.lifecycle.is_interrupted() || node.lifecycle.executing {
            return Err(WorkError::Precondition(format!(
                "flow node {} no longer waits for a message ({})",
                node.id,
                node.snapshot()
            )));
        }

        let mut process_instance: ProcessInstance = scope.tx().get(node.parent_process_instance_id.as_str()).await?;
        if !operations.is_empty() {
            let context = ExpressionContext::for_definition(definition.clone()).in_container(node.container.clone());
            self.messages
                .apply_operations(operations, message, &context, &mut process_instance.variables)
                .await?;
            scope.tx().update(&process_instance).await?;
        }

        let next = self.state_machine.next_state(&node)?;
        node.set_state(next);
        scope.tx().update(&node).await?;
        scope.schedule(WorkDescriptor::execute_flow_node(&node));
        Ok(())
    }

    async fn trigger_event_sub_process(
        &self,
        scope: &mut TransactionScope,
        definition: &Arc<ProcessDefinition>,
        message: &MessageInstance,
        event: &WaitingEvent,
        operations: &[Operation],
    ) -> Result<(), WorkError> {
        let process_instance_id = event.parent_process_instance_id.clone().ok_or_else(|| {
            CoreError::ConsistencyError(format!("Waiting event {} has no process instance", event.id))
        })?;
        let process_instance: Option<ProcessInstance> = scope.tx().select_one(process_instance_id.as_str()).await?;
        let Some(mut process_instance) = process_instance else {
            return Err(WorkError::Precondition(format!("process instance {} is gone", process_instance_id)));
        };
        if process_instance.state.is_terminal() {
            return Err(WorkError::Precondition(format!("process instance {} is finished", process_instance_id)));
        }
        let sub_process_id = event.subprocess_definition_id.clone().ok_or_else(|| {
            CoreError::ConsistencyError(format!("Waiting event {} has no event sub-process", event.id))
        })?;
        let sub_process = definition.flow_node(&sub_process_id).ok_or_else(|| {
            CoreError::ConsistencyError(format!("Event sub-process {} not found", sub_process_id))
        })?;

        let container = ContainerRef::ProcessInstance(process_instance.id.clone());
        let context = ExpressionContext::for_definition(definition.clone()).in_container(container.clone());
        self.messages
            .apply_operations(operations, message, &context, &mut process_instance.variables)
            .await?;
        scope.tx().update(&process_instance).await?;

        if sub_process.interrupting {
            let query = SelectListDescriptor::new(queries::GET_FLOW_NODES_OF_CONTAINER)
                .with_parameter("container.id", process_instance.id.as_str());
            let siblings: Vec<FlowNodeInstance> = scope.tx().select_list(&query).await?;
            for sibling in siblings {
                self.interrupt(scope, sibling, Interruption::Cancel).await?;
            }
        }
        self.factory
            .instantiate(scope, &process_instance.id, definition, sub_process, container)
            .await?;
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

fn expression_context(
    definition: &Arc<ProcessDefinition>,
    node: &FlowNodeInstance,
    process_instance: &ProcessInstance,
) -> ExpressionContext {
    ExpressionContext::for_definition(definition.clone())
        .in_container(node.container.clone())
        .with_variables(process_instance.variables.clone())
}

async fn save_variables(
    scope: &mut TransactionScope,
    process_instance: &ProcessInstance,
    initial: &Map<String, Value>,
) -> Result<(), CoreError> {
    if process_instance.variables != *initial {
        scope.tx().update(process_instance).await?;
    }
    Ok(())
}
