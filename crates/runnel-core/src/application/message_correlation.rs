//! Message correlation: thrown messages are persisted as message instances,
//! catching constructs as waiting events, and a matching sweep pairs them.
//!
//! Every throw and every registration schedules a sweep. Sweeps may run
//! redundantly: a couple is locked by the sweep that matched it and locked
//! records are never matched again.

use crate::application::unit_of_work::{TransactionScope, TransactionService};
use crate::domain::definition::{
    CatchMessageTrigger, CorrelationDefinition, Expression, FlowNodeDefinition, Operation, ProcessDefinition,
    ThrowMessageTrigger,
};
use crate::domain::diagnostic::scope as failure_scope;
use crate::domain::expression::{ExpressionContext, ExpressionResolver};
use crate::domain::flow_node::FlowNodeInstance;
use crate::domain::message::{CorrelationSlots, MessageInstance, WaitingEvent, WaitingEventKind, MAX_CORRELATIONS};
use crate::domain::repository::{queries, SelectListDescriptor, Transaction};
use crate::domain::work::WorkDescriptor;
use crate::error::{CoreError, ExecutionError, ExecutionErrorKind, WorkError};
use crate::types::{
    FlowNodeInstanceId, MessageInstanceId, ProcessDefinitionId, ProcessInstanceId, TenantId, WaitingEventId,
};
use chrono::Utc;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

/// What a waiting event is registered for
#[derive(Debug, Clone, Copy)]
pub enum WaitingEventTarget<'a> {
    /// A running node: receive task, intermediate catch event or boundary event
    FlowNode {
        /// Node waiting for the message
        node: &'a FlowNodeInstance,
        /// Boundary or intermediate catch
        kind: WaitingEventKind,
    },
    /// A message start event of a deployed process
    Start {
        /// Start event definition
        flow_node: &'a FlowNodeDefinition,
    },
    /// The message start event of an event sub-process in a running instance
    EventSubProcess {
        /// Process instance owning the event sub-process
        process_instance_id: &'a ProcessInstanceId,
        /// Event sub-process definition
        sub_process: &'a FlowNodeDefinition,
        /// Start event of the event sub-process
        start: &'a FlowNodeDefinition,
    },
}

/// A locked message and waiting event, removed from persistence
#[derive(Debug, Clone, PartialEq)]
pub struct MessageCouple {
    /// Consumed waiting event
    pub waiting_event: WaitingEvent,
    /// Consumed message
    pub message: MessageInstance,
}

/// Throw and catch side of messaging, plus the matching sweep
#[derive(Clone)]
pub struct MessageCorrelationService {
    resolver: Arc<dyn ExpressionResolver>,
}

impl MessageCorrelationService {
    /// Create a new correlation service
    pub fn new(resolver: Arc<dyn ExpressionResolver>) -> Self {
        Self { resolver }
    }

    /// Persist a thrown message and schedule a matching sweep
    pub async fn throw_message(
        &self,
        scope: &mut TransactionScope,
        trigger: &ThrowMessageTrigger,
        source_node_name: &str,
        process_definition_id: &ProcessDefinitionId,
        context: &ExpressionContext,
    ) -> Result<MessageInstance, WorkError> {
        let message = self
            .build_message(trigger, source_node_name, process_definition_id, context)
            .await
            .map_err(|e| {
                ExecutionError::new(
                    ExecutionErrorKind::MessageHandling,
                    format!("Unable to send message {}", trigger.message_name),
                )
                .with_message_name(&trigger.message_name)
                .with_scope(failure_scope::EVENT)
                .caused_by(e)
            })?;

        scope.tx().insert(&message).await?;
        scope.schedule(WorkDescriptor::match_messages());
        debug!(
            message_id = %message.id,
            message_name = %message.message_name,
            target_process = %message.target_process,
            "Message sent"
        );
        Ok(message)
    }

    /// Persist a message sent from outside any process
    pub async fn send_message(&self, scope: &mut TransactionScope, message: MessageInstance) -> Result<(), CoreError> {
        scope.tx().insert(&message).await?;
        scope.schedule(WorkDescriptor::match_messages());
        debug!(message_id = %message.id, message_name = %message.message_name, "Message received");
        Ok(())
    }

    async fn build_message(
        &self,
        trigger: &ThrowMessageTrigger,
        source_node_name: &str,
        process_definition_id: &ProcessDefinitionId,
        context: &ExpressionContext,
    ) -> Result<MessageInstance, ExecutionError> {
        // Target process and flow node
        let target_process = self.evaluate_string(&trigger.target_process, context).await?;
        let target_flow_node = match &trigger.target_flow_node {
            Some(expression) => Some(self.evaluate_string(expression, context).await?),
            None => None,
        };

        let correlations = self.correlation_slots(&trigger.correlations, context).await?;

        // Message data
        let mut data = Map::new();
        for definition in &trigger.data {
            let value = match &definition.default_value {
                Some(expression) => self.resolver.evaluate(expression, context).await?,
                None => Value::Null,
            };
            data.insert(definition.name.clone(), value);
        }

        Ok(MessageInstance {
            id: MessageInstanceId::generate(),
            message_name: trigger.message_name.clone(),
            target_process,
            target_flow_node,
            correlations,
            flow_node_name: Some(source_node_name.to_string()),
            process_definition_id: Some(process_definition_id.clone()),
            data,
            handled: false,
            created_at: Utc::now(),
        })
    }

    /// Persist a waiting event and schedule a matching sweep.
    ///
    /// Registering a running node twice returns the existing registration.
    pub async fn register_waiting_event(
        &self,
        scope: &mut TransactionScope,
        definition: &ProcessDefinition,
        trigger: &CatchMessageTrigger,
        target: WaitingEventTarget<'_>,
        context: &ExpressionContext,
    ) -> Result<WaitingEvent, WorkError> {
        if let WaitingEventTarget::FlowNode { node, .. } = target {
            let existing = waiting_events_of_flow_node(scope.tx(), &node.id).await?;
            if let Some(event) = existing.into_iter().next() {
                debug!(flow_node_instance_id = %node.id, "Waiting event already registered");
                return Ok(event);
            }
        }

        let correlations = self
            .correlation_slots(&trigger.correlations, context)
            .await
            .map_err(|e| {
                ExecutionError::new(
                    ExecutionErrorKind::MessageHandling,
                    format!("Unable to register waiting event for message {}", trigger.message_name),
                )
                .with_message_name(&trigger.message_name)
                .with_scope(failure_scope::EVENT)
                .caused_by(e)
            })?;
        let event = build_waiting_event(definition, trigger, target, correlations);

        scope.tx().insert(&event).await?;
        scope.schedule(WorkDescriptor::match_messages());
        debug!(
            waiting_event_id = %event.id,
            kind = ?event.kind,
            message_name = %event.message_name,
            "Waiting event registered"
        );
        Ok(event)
    }

    /// Fill the correlation slots: first declared pairs only, sorted by key
    async fn correlation_slots(
        &self,
        correlations: &[CorrelationDefinition],
        context: &ExpressionContext,
    ) -> Result<CorrelationSlots, ExecutionError> {
        let mut pairs = Vec::with_capacity(MAX_CORRELATIONS);
        for correlation in correlations.iter().take(MAX_CORRELATIONS) {
            let key = self.resolver.evaluate(&correlation.key, context).await?;
            let value = self.resolver.evaluate(&correlation.value, context).await?;
            pairs.push((value_as_string(key), value_as_string(value)));
        }
        Ok(CorrelationSlots::from_pairs(pairs))
    }

    async fn evaluate_string(
        &self,
        expression: &Expression,
        context: &ExpressionContext,
    ) -> Result<String, ExecutionError> {
        match self.resolver.evaluate(expression, context).await? {
            Value::String(value) => Ok(value),
            other => Err(ExecutionError::expression(
                &expression.name,
                format!("Expected a string but got {}", other),
            )),
        }
    }

    /// Pair unhandled messages with unlocked waiting events.
    ///
    /// Runs in its own transaction. Each couple is locked and an
    /// `ExecuteMessageCouple` work is scheduled for it. Returns the number of
    /// couples found.
    pub async fn match_messages(
        &self,
        transactions: &TransactionService,
        tenant_id: Option<TenantId>,
    ) -> Result<usize, WorkError> {
        let mut scope = transactions.begin(tenant_id.clone()).await?;
        let matched = match lock_couples(&mut scope).await {
            Ok(matched) => matched,
            Err(e) => {
                scope.rollback().await?;
                return Err(e.into());
            }
        };
        if matched == 0 {
            scope.rollback().await?;
            return Ok(0);
        }

        match transactions.commit(scope).await {
            Ok(()) => {
                info!(couples = matched, "Matched messages with waiting events");
                Ok(matched)
            }
            Err(CoreError::ConcurrentModification(reason)) => {
                // Another sweep locked some of the same records first
                debug!(reason = %reason, "Matching sweep lost a race, scheduling a new one");
                let mut retry = WorkDescriptor::match_messages();
                if let Some(tenant_id) = tenant_id {
                    retry = retry.for_tenant(tenant_id);
                }
                transactions.queue().enqueue(retry).await?;
                Ok(0)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Consume a locked couple: both records are deleted.
    ///
    /// A message that is gone was already consumed and fails as a
    /// precondition, as does one a later sweep locked to another waiting
    /// event. When the waiting event is gone, or now locked to another
    /// message, the message is released for the next sweep and `None` is
    /// returned so the release commits.
    pub async fn consume_couple(
        &self,
        scope: &mut TransactionScope,
        message_instance_id: &MessageInstanceId,
        waiting_event_id: &WaitingEventId,
    ) -> Result<Option<MessageCouple>, WorkError> {
        let message: Option<MessageInstance> = scope.tx().select_one(message_instance_id.as_str()).await?;
        let Some(mut message) = message else {
            return Err(WorkError::Precondition(format!(
                "message instance {} not found, likely already executed",
                message_instance_id
            )));
        };
        let waiting_event: Option<WaitingEvent> = scope.tx().select_one(waiting_event_id.as_str()).await?;
        let waiting_event = match waiting_event {
            Some(event) if event.matched_message.as_ref() == Some(message_instance_id) => event,
            _ => {
                let query = SelectListDescriptor::new(queries::GET_LOCKED_WAITING_EVENTS)
                    .with_parameter("matched_message", message_instance_id.as_str());
                let locked: Vec<WaitingEvent> = scope.tx().select_list(&query).await?;
                if !message.handled || !locked.is_empty() {
                    return Err(WorkError::Precondition(format!(
                        "message instance {} is no longer locked to waiting event {}",
                        message_instance_id, waiting_event_id
                    )));
                }
                message.handled = false;
                scope.tx().update(&message).await?;
                scope.schedule(WorkDescriptor::match_messages());
                debug!(
                    message_id = %message_instance_id,
                    waiting_event_id = %waiting_event_id,
                    "Waiting event of the couple is gone, message released"
                );
                return Ok(None);
            }
        };

        scope.tx().delete::<MessageInstance>(&[message.id.to_string()]).await?;
        scope.tx().delete::<WaitingEvent>(&[waiting_event.id.to_string()]).await?;
        Ok(Some(MessageCouple { waiting_event, message }))
    }

    /// Undo a couple whose delivery failed without a flow node to fail.
    ///
    /// The waiting event is unlocked so it keeps listening and the message,
    /// which cannot be delivered, is discarded. Returns whether the couple
    /// was still locked.
    pub async fn discard_couple(
        &self,
        scope: &mut TransactionScope,
        message_instance_id: &MessageInstanceId,
        waiting_event_id: &WaitingEventId,
    ) -> Result<bool, CoreError> {
        let waiting_event: Option<WaitingEvent> = scope.tx().select_one(waiting_event_id.as_str()).await?;
        let Some(mut waiting_event) = waiting_event else {
            return Ok(false);
        };
        if waiting_event.matched_message.as_ref() != Some(message_instance_id) {
            return Ok(false);
        }
        waiting_event.locked = false;
        waiting_event.matched_message = None;
        scope.tx().update(&waiting_event).await?;
        scope.tx().delete::<MessageInstance>(&[message_instance_id.to_string()]).await?;
        Ok(true)
    }

    /// Apply catch operations: each target variable receives its expression
    /// evaluated against the variables overlaid with the message data
    pub async fn apply_operations(
        &self,
        operations: &[Operation],
        message: &MessageInstance,
        context: &ExpressionContext,
        variables: &mut Map<String, Value>,
    ) -> Result<(), ExecutionError> {
        let mut context = context.clone();
        context.extend_variables(variables);
        context.extend_variables(&message.data);
        for operation in operations {
            let value = self.resolver.evaluate(&operation.expression, &context).await.map_err(|e| {
                ExecutionError::new(
                    ExecutionErrorKind::OperationExecution,
                    format!("Unable to update variable {}", operation.target),
                )
                .with_message_name(&message.message_name)
                .with_scope(failure_scope::EVENT)
                .caused_by(e)
            })?;
            context.variables.insert(operation.target.clone(), value.clone());
            variables.insert(operation.target.clone(), value);
        }
        Ok(())
    }

    /// Delete the waiting events of a node, releasing messages already matched to them
    pub async fn delete_waiting_events_of_flow_node(
        &self,
        scope: &mut TransactionScope,
        flow_node_instance_id: &FlowNodeInstanceId,
    ) -> Result<usize, CoreError> {
        let events = waiting_events_of_flow_node(scope.tx(), flow_node_instance_id).await?;
        delete_waiting_events(scope, events).await
    }

    /// Delete the event sub-process registrations of a process instance
    pub async fn delete_event_sub_process_waiting_events(
        &self,
        scope: &mut TransactionScope,
        process_instance_id: &ProcessInstanceId,
    ) -> Result<usize, CoreError> {
        let query = SelectListDescriptor::new(queries::GET_WAITING_EVENTS_OF_PROCESS_INSTANCE)
            .with_parameter("parent_process_instance_id", process_instance_id.as_str())
            .with_parameter("kind", "EventSubProcess");
        let events: Vec<WaitingEvent> = scope.tx().select_list(&query).await?;
        delete_waiting_events(scope, events).await
    }
}

async fn waiting_events_of_flow_node(
    tx: &mut dyn Transaction,
    flow_node_instance_id: &FlowNodeInstanceId,
) -> Result<Vec<WaitingEvent>, CoreError> {
    let query = SelectListDescriptor::new(queries::GET_WAITING_EVENTS_OF_FLOW_NODE)
        .with_parameter("flow_node_instance_id", flow_node_instance_id.as_str());
    tx.select_list(&query).await
}

async fn delete_waiting_events(scope: &mut TransactionScope, events: Vec<WaitingEvent>) -> Result<usize, CoreError> {
    if events.is_empty() {
        return Ok(0);
    }
    let mut released = false;
    for event in &events {
        if let Some(message_id) = &event.matched_message {
            let message: Option<MessageInstance> = scope.tx().select_one(message_id.as_str()).await?;
            if let Some(mut message) = message {
                message.handled = false;
                scope.tx().update(&message).await?;
                released = true;
            }
        }
    }
    if released {
        scope.schedule(WorkDescriptor::match_messages());
    }
    let ids: Vec<String> = events.iter().map(|event| event.id.to_string()).collect();
    scope.tx().delete::<WaitingEvent>(&ids).await?;
    Ok(ids.len())
}

async fn lock_couples(scope: &mut TransactionScope) -> Result<usize, CoreError> {
    let messages: Vec<MessageInstance> = scope
        .tx()
        .select_list(&SelectListDescriptor::new(queries::GET_UNHANDLED_MESSAGES).with_parameter("handled", false))
        .await?;
    if messages.is_empty() {
        return Ok(0);
    }
    let events: Vec<WaitingEvent> = scope
        .tx()
        .select_list(&SelectListDescriptor::new(queries::GET_UNLOCKED_WAITING_EVENTS).with_parameter("locked", false))
        .await?;

    let mut taken: HashSet<WaitingEventId> = HashSet::new();
    let mut matched = 0;
    for mut message in messages {
        let Some(event) = events
            .iter()
            .find(|event| !taken.contains(&event.id) && event.accepts(&message))
        else {
            continue;
        };
        taken.insert(event.id.clone());

        let mut event = event.clone();
        event.locked = true;
        event.matched_message = Some(message.id.clone());
        message.handled = true;
        scope.tx().update(&event).await?;
        scope.tx().update(&message).await?;
        scope.schedule(WorkDescriptor::execute_message_couple(message.id.clone(), event.id.clone()));
        matched += 1;
    }
    Ok(matched)
}

fn build_waiting_event(
    definition: &ProcessDefinition,
    trigger: &CatchMessageTrigger,
    target: WaitingEventTarget<'_>,
    correlations: CorrelationSlots,
) -> WaitingEvent {
    let (kind, flow_node, flow_node_instance_id, process_instance_id, subprocess_definition_id) = match target {
        WaitingEventTarget::FlowNode { node, kind } => (
            kind,
            (node.flow_node_definition_id.clone(), node.name.clone()),
            Some(node.id.clone()),
            Some(node.parent_process_instance_id.clone()),
            None,
        ),
        WaitingEventTarget::Start { flow_node } => (
            WaitingEventKind::Start,
            (flow_node.id.clone(), flow_node.name.clone()),
            None,
            None,
            None,
        ),
        WaitingEventTarget::EventSubProcess {
            process_instance_id,
            sub_process,
            start,
        } => (
            WaitingEventKind::EventSubProcess,
            (start.id.clone(), start.name.clone()),
            None,
            Some(process_instance_id.clone()),
            Some(sub_process.id.clone()),
        ),
    };
    let (flow_node_definition_id, flow_node_name) = flow_node;

    WaitingEvent {
        id: WaitingEventId::generate(),
        kind,
        message_name: trigger.message_name.clone(),
        process_definition_id: definition.id.clone(),
        process_name: definition.name.clone(),
        flow_node_definition_id,
        flow_node_name,
        flow_node_instance_id,
        parent_process_instance_id: process_instance_id.clone(),
        root_process_instance_id: process_instance_id,
        subprocess_definition_id,
        correlations,
        locked: false,
        matched_message: None,
        created_at: Utc::now(),
    }
}

fn value_as_string(value: Value) -> String {
    match value {
        Value::String(value) => value,
        other => other.to_string(),
    }
}
