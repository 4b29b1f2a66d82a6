use crate::application::unit_of_work::TransactionScope;
use crate::domain::definition::{FlowNodeDefinition, ProcessDefinition};
use crate::domain::flow_node::{ContainerRef, FlowNodeInstance, Lifecycle, ProcessInstance, ProcessInstanceState};
use crate::domain::state_machine::StateMachine;
use crate::domain::work::WorkDescriptor;
use crate::error::CoreError;
use crate::types::{FlowNodeInstanceId, ProcessInstanceId};
use chrono::Utc;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

/// Creates process instances and flow node instances in their initial state
#[derive(Clone)]
pub struct FlowNodeFactory {
    state_machine: Arc<StateMachine>,
}

impl FlowNodeFactory {
    /// Create a new factory
    pub fn new(state_machine: Arc<StateMachine>) -> Self {
        Self { state_machine }
    }

    /// Build a flow node instance in the initial state of its table
    pub fn create(
        &self,
        process_instance_id: &ProcessInstanceId,
        definition: &ProcessDefinition,
        flow_node: &FlowNodeDefinition,
        container: ContainerRef,
    ) -> Result<FlowNodeInstance, CoreError> {
        let with_boundary = flow_node.has_boundary_events();
        let state = self.state_machine.initial_state(flow_node.node_type, with_boundary)?;
        let now = Utc::now();
        Ok(FlowNodeInstance {
            id: FlowNodeInstanceId::generate(),
            name: flow_node.name.clone(),
            node_type: flow_node.node_type,
            lifecycle: Lifecycle::at(state),
            terminal: false,
            parent_process_instance_id: process_instance_id.clone(),
            container,
            process_definition_id: definition.id.clone(),
            flow_node_definition_id: flow_node.id.clone(),
            with_boundary,
            attached_to: None,
            token_count: 0,
            created_at: now,
            last_update: now,
        })
    }

    /// Persist a new flow node and schedule its execution
    pub async fn instantiate(
        &self,
        scope: &mut TransactionScope,
        process_instance_id: &ProcessInstanceId,
        definition: &ProcessDefinition,
        flow_node: &FlowNodeDefinition,
        container: ContainerRef,
    ) -> Result<FlowNodeInstance, CoreError> {
        let node = self.create(process_instance_id, definition, flow_node, container)?;
        self.persist_and_schedule(scope, node).await
    }

    /// Persist a boundary event attached to a running activity
    pub async fn instantiate_boundary_event(
        &self,
        scope: &mut TransactionScope,
        activity: &FlowNodeInstance,
        definition: &ProcessDefinition,
        boundary: &FlowNodeDefinition,
    ) -> Result<FlowNodeInstance, CoreError> {
        let mut node = self.create(
            &activity.parent_process_instance_id,
            definition,
            boundary,
            activity.container.clone(),
        )?;
        node.attached_to = Some(activity.id.clone());
        self.persist_and_schedule(scope, node).await
    }

    /// Persist a node without scheduling it (converging gateway waiting for tokens)
    pub async fn persist(&self, scope: &mut TransactionScope, node: FlowNodeInstance) -> Result<FlowNodeInstance, CoreError> {
        scope.tx().insert(&node).await?;
        Ok(node)
    }

    async fn persist_and_schedule(
        &self,
        scope: &mut TransactionScope,
        node: FlowNodeInstance,
    ) -> Result<FlowNodeInstance, CoreError> {
        scope.tx().insert(&node).await?;
        scope.schedule(WorkDescriptor::execute_flow_node(&node));
        debug!(
            flow_node_instance_id = %node.id,
            name = %node.name,
            node_type = %node.node_type,
            state = %node.state(),
            "Flow node instantiated"
        );
        Ok(node)
    }

    /// Persist a new process instance, without any flow node
    pub async fn create_process_instance(
        &self,
        scope: &mut TransactionScope,
        definition: &ProcessDefinition,
        variables: Map<String, Value>,
    ) -> Result<ProcessInstance, CoreError> {
        let process_instance = ProcessInstance {
            id: ProcessInstanceId::generate(),
            name: definition.name.clone(),
            process_definition_id: definition.id.clone(),
            state: ProcessInstanceState::Started,
            variables,
            started_at: Utc::now(),
            ended_at: None,
            interrupted: false,
        };
        scope.tx().insert(&process_instance).await?;
        debug!(process_instance_id = %process_instance.id, process = %definition.name, "Process instance created");
        Ok(process_instance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::definition::FlowContainerDefinition;
    use crate::domain::flow_node::FlowNodeType;
    use crate::domain::state_machine::FlowNodeState;

    fn definition() -> ProcessDefinition {
        let container = FlowContainerDefinition::new()
            .add_flow_node(FlowNodeDefinition::new("task", "task", FlowNodeType::AutomaticTask))
            .add_flow_node(FlowNodeDefinition::new("receive", "receive", FlowNodeType::ReceiveTask))
            .add_boundary_event(
                "task",
                FlowNodeDefinition::new("cancel", "cancel", FlowNodeType::BoundaryEvent),
            );
        ProcessDefinition::new("p1", "Process", container)
    }

    #[test]
    fn test_nodes_start_in_the_initial_state_of_their_table() {
        let factory = FlowNodeFactory::new(Arc::new(StateMachine::new()));
        let definition = definition();
        let process_instance_id = ProcessInstanceId::new("pi-1");
        let container = ContainerRef::ProcessInstance(process_instance_id.clone());

        let task = definition.flow_node(&"task".into()).unwrap();
        let node = factory
            .create(&process_instance_id, &definition, task, container.clone())
            .unwrap();
        assert!(node.with_boundary);
        assert_eq!(node.state(), FlowNodeState::InitializingWithBoundary);
        assert_eq!(node.lifecycle, Lifecycle::at(FlowNodeState::InitializingWithBoundary));

        let receive = definition.flow_node(&"receive".into()).unwrap();
        let node = factory
            .create(&process_instance_id, &definition, receive, container)
            .unwrap();
        assert!(!node.with_boundary);
        assert_eq!(node.state(), FlowNodeState::Initializing);
        assert_eq!(node.process_definition_id.as_str(), "p1");
        assert!(!node.terminal);
    }
}
