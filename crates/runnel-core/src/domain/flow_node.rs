use crate::domain::state_machine::FlowNodeState;
use crate::types::{FlowNodeDefinitionId, FlowNodeInstanceId, ProcessDefinitionId, ProcessInstanceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of flow node, selects the state table used to execute it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlowNodeType {
    /// Task executed without human interaction
    AutomaticTask,
    /// Task waiting for a message
    ReceiveTask,
    /// Task throwing a message
    SendTask,
    /// Gateway splitting or merging branches
    Gateway,
    /// Start event
    StartEvent,
    /// End event
    EndEvent,
    /// Intermediate event waiting for a message
    IntermediateCatchEvent,
    /// Intermediate event throwing a message
    IntermediateThrowEvent,
    /// Event attached to an activity
    BoundaryEvent,
    /// Embedded sub-process
    SubProcess,
}

impl FlowNodeType {
    /// Every node type
    pub const ALL: [FlowNodeType; 10] = [
        FlowNodeType::AutomaticTask,
        FlowNodeType::ReceiveTask,
        FlowNodeType::SendTask,
        FlowNodeType::Gateway,
        FlowNodeType::StartEvent,
        FlowNodeType::EndEvent,
        FlowNodeType::IntermediateCatchEvent,
        FlowNodeType::IntermediateThrowEvent,
        FlowNodeType::BoundaryEvent,
        FlowNodeType::SubProcess,
    ];

    /// Lower-case label used in failure contexts (`gateway::gatewayName`)
    pub fn label(&self) -> &'static str {
        match self {
            FlowNodeType::AutomaticTask => "automatic_task",
            FlowNodeType::ReceiveTask => "receive_task",
            FlowNodeType::SendTask => "send_task",
            FlowNodeType::Gateway => "gateway",
            FlowNodeType::StartEvent => "start_event",
            FlowNodeType::EndEvent => "end_event",
            FlowNodeType::IntermediateCatchEvent => "intermediate_catch_event",
            FlowNodeType::IntermediateThrowEvent => "intermediate_throw_event",
            FlowNodeType::BoundaryEvent => "boundary_event",
            FlowNodeType::SubProcess => "sub_process",
        }
    }

    /// Whether boundary events can be attached to nodes of this type
    pub fn accepts_boundary_events(&self) -> bool {
        matches!(
            self,
            FlowNodeType::AutomaticTask
                | FlowNodeType::ReceiveTask
                | FlowNodeType::SendTask
                | FlowNodeType::SubProcess
        )
    }
}

impl fmt::Display for FlowNodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Lifecycle of a flow node: canonical state plus in-flight transition flags.
///
/// The whole tuple is the optimistic lock of a flow node: work scheduled for a
/// node carries the lifecycle observed at scheduling time and is only executed
/// while it still [`matches`](Lifecycle::matches) the live one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Lifecycle {
    /// Canonical state
    pub state: FlowNodeState,
    /// The current state's step started but did not complete yet
    pub executing: bool,
    /// The node is being aborted
    pub aborting: bool,
    /// The node is being cancelled
    pub canceling: bool,
}

impl Lifecycle {
    /// Lifecycle of a node entering `state` with no transition in flight
    pub fn at(state: FlowNodeState) -> Self {
        Self {
            state,
            executing: false,
            aborting: false,
            canceling: false,
        }
    }

    /// Precondition check against the live lifecycle
    pub fn matches(&self, live: &Lifecycle) -> bool {
        self.state == live.state
            && self.executing == live.executing
            && self.aborting == live.aborting
            && self.canceling == live.canceling
    }

    /// Whether an abort or cancel is in progress
    pub fn is_interrupted(&self) -> bool {
        self.aborting || self.canceling
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "state: {}, transitioning: {}, aborting: {}, canceling: {}",
            self.state.id(),
            self.executing,
            self.aborting,
            self.canceling
        )
    }
}

/// Container owning a flow node
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id")]
pub enum ContainerRef {
    /// Root container of a process instance
    ProcessInstance(ProcessInstanceId),
    /// Embedded sub-process flow node
    SubProcess(FlowNodeInstanceId),
}

impl ContainerRef {
    /// Raw id of the container
    pub fn id(&self) -> &str {
        match self {
            ContainerRef::ProcessInstance(id) => id.as_str(),
            ContainerRef::SubProcess(id) => id.as_str(),
        }
    }
}

/// Running flow node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowNodeInstance {
    /// Unique identifier
    pub id: FlowNodeInstanceId,
    /// Name copied from the definition
    pub name: String,
    /// Node type
    pub node_type: FlowNodeType,
    /// State and transition flags
    pub lifecycle: Lifecycle,
    /// Whether the current state is terminal
    pub terminal: bool,
    /// Process instance the node belongs to
    pub parent_process_instance_id: ProcessInstanceId,
    /// Container reacting to the node's completion
    pub container: ContainerRef,
    /// Process definition being executed
    pub process_definition_id: ProcessDefinitionId,
    /// Definition of this node
    pub flow_node_definition_id: FlowNodeDefinitionId,
    /// Whether boundary events are attached to the node
    pub with_boundary: bool,
    /// Activity a boundary event is attached to
    pub attached_to: Option<FlowNodeInstanceId>,
    /// Tokens received so far by a converging gateway
    pub token_count: u32,
    /// Creation date
    pub created_at: DateTime<Utc>,
    /// Date of the last state change
    pub last_update: DateTime<Utc>,
}

impl FlowNodeInstance {
    /// Current lifecycle, as captured by work preconditions
    pub fn snapshot(&self) -> Lifecycle {
        self.lifecycle
    }

    /// Current state
    pub fn state(&self) -> FlowNodeState {
        self.lifecycle.state
    }

    /// Move to a new state, clearing the executing flag
    pub fn set_state(&mut self, state: FlowNodeState) {
        self.lifecycle.state = state;
        self.lifecycle.executing = false;
        self.terminal = state.is_terminal();
        self.last_update = Utc::now();
    }

    /// Mark the current step as started but not completed
    pub fn set_executing(&mut self, executing: bool) {
        self.lifecycle.executing = executing;
        self.last_update = Utc::now();
    }
}

/// Archived copy of a finished flow node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchivedFlowNodeInstance {
    /// Identifier of the archived record
    pub id: FlowNodeInstanceId,
    /// Identifier of the live node
    pub source_object_id: FlowNodeInstanceId,
    /// Name
    pub name: String,
    /// Node type
    pub node_type: FlowNodeType,
    /// Final state
    pub state: FlowNodeState,
    /// Process instance the node belonged to
    pub parent_process_instance_id: ProcessInstanceId,
    /// Process definition
    pub process_definition_id: ProcessDefinitionId,
    /// Definition of the node
    pub flow_node_definition_id: FlowNodeDefinitionId,
    /// Date of archiving
    pub archive_date: DateTime<Utc>,
}

impl ArchivedFlowNodeInstance {
    /// Archived copy of a node
    pub fn archive(node: &FlowNodeInstance, archive_date: DateTime<Utc>) -> Self {
        Self {
            id: FlowNodeInstanceId::generate(),
            source_object_id: node.id.clone(),
            name: node.name.clone(),
            node_type: node.node_type,
            state: node.state(),
            parent_process_instance_id: node.parent_process_instance_id.clone(),
            process_definition_id: node.process_definition_id.clone(),
            flow_node_definition_id: node.flow_node_definition_id.clone(),
            archive_date,
        }
    }
}

/// State of a process instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessInstanceState {
    /// Running
    Started,
    /// Every flow node completed
    Completed,
    /// Cancelled by a terminate end event or an operator
    Cancelled,
    /// Aborted
    Aborted,
}

impl ProcessInstanceState {
    /// Whether the instance is finished
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProcessInstanceState::Started)
    }
}

/// Running process instance, root container of its flow nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessInstance {
    /// Unique identifier
    pub id: ProcessInstanceId,
    /// Name of the process definition
    pub name: String,
    /// Process definition being executed
    pub process_definition_id: ProcessDefinitionId,
    /// Current state
    pub state: ProcessInstanceState,
    /// Process variables
    pub variables: serde_json::Map<String, serde_json::Value>,
    /// Start date
    pub started_at: DateTime<Utc>,
    /// End date
    pub ended_at: Option<DateTime<Utc>>,
    /// Set when a terminate end event or an interrupting event cancels the instance
    pub interrupted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_precondition_check() {
        let expected = Lifecycle::at(FlowNodeState::Waiting);
        let mut live = expected;
        assert!(expected.matches(&live));

        live.canceling = true;
        assert!(!expected.matches(&live));

        live.canceling = false;
        live.executing = true;
        assert!(!expected.matches(&live));
    }

    #[test]
    fn test_lifecycle_display_uses_state_code() {
        let lifecycle = Lifecycle::at(FlowNodeState::Executing);
        assert_eq!(
            lifecycle.to_string(),
            format!(
                "state: {}, transitioning: false, aborting: false, canceling: false",
                FlowNodeState::Executing.id()
            )
        );
    }

    #[test]
    fn test_type_labels() {
        assert_eq!(FlowNodeType::Gateway.label(), "gateway");
        assert_eq!(FlowNodeType::ReceiveTask.to_string(), "receive_task");
        assert!(FlowNodeType::SubProcess.accepts_boundary_events());
        assert!(!FlowNodeType::Gateway.accepts_boundary_events());
    }
}
