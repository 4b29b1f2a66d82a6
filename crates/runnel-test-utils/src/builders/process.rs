//! Fluent process definition builder.
//!
//! Flow node ids double as names, so tests can find nodes and address
//! messages with the ids they declared.

use runnel_core::{
    CatchMessageTrigger, ConnectorDefinition, Expression, FlowContainerDefinition, FlowNodeDefinition, FlowNodeType,
    GatewayKind, ProcessDefinition, ThrowMessageTrigger, TransitionDefinition,
};

/// Builds a [`ProcessDefinition`] or the content of a sub-process
#[derive(Debug, Clone, Default)]
pub struct ProcessBuilder {
    id: String,
    name: String,
    container: FlowContainerDefinition,
}

impl ProcessBuilder {
    /// Builder for a process definition
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            container: FlowContainerDefinition::new(),
        }
    }

    /// Builder for the content of a sub-process
    pub fn content() -> Self {
        Self::default()
    }

    /// Add any flow node
    pub fn node(mut self, flow_node: FlowNodeDefinition) -> Self {
        self.container = self.container.add_flow_node(flow_node);
        self
    }

    /// Plain start event
    pub fn start(self, id: &str) -> Self {
        self.node(FlowNodeDefinition::new(id, id, FlowNodeType::StartEvent))
    }

    /// Start event waiting for a message
    pub fn message_start(self, id: &str, trigger: CatchMessageTrigger) -> Self {
        self.node(FlowNodeDefinition::new(id, id, FlowNodeType::StartEvent).with_catch_message(trigger))
    }

    /// Plain end event
    pub fn end(self, id: &str) -> Self {
        self.node(FlowNodeDefinition::new(id, id, FlowNodeType::EndEvent))
    }

    /// End event aborting the other nodes of its container
    pub fn terminate_end(self, id: &str) -> Self {
        self.node(FlowNodeDefinition::new(id, id, FlowNodeType::EndEvent).terminating())
    }

    /// Automatic task
    pub fn task(self, id: &str) -> Self {
        self.node(FlowNodeDefinition::new(id, id, FlowNodeType::AutomaticTask))
    }

    /// Automatic task running a connector
    pub fn task_with_connector(self, id: &str, connector: ConnectorDefinition) -> Self {
        self.node(FlowNodeDefinition::new(id, id, FlowNodeType::AutomaticTask).with_connector(connector))
    }

    /// Task waiting for a message
    pub fn receive_task(self, id: &str, trigger: CatchMessageTrigger) -> Self {
        self.node(FlowNodeDefinition::new(id, id, FlowNodeType::ReceiveTask).with_catch_message(trigger))
    }

    /// Task throwing a message
    pub fn send_task(self, id: &str, trigger: ThrowMessageTrigger) -> Self {
        self.node(FlowNodeDefinition::new(id, id, FlowNodeType::SendTask).with_throw_message(trigger))
    }

    /// Intermediate event waiting for a message
    pub fn catch_event(self, id: &str, trigger: CatchMessageTrigger) -> Self {
        self.node(FlowNodeDefinition::new(id, id, FlowNodeType::IntermediateCatchEvent).with_catch_message(trigger))
    }

    /// Intermediate event throwing a message
    pub fn throw_event(self, id: &str, trigger: ThrowMessageTrigger) -> Self {
        self.node(FlowNodeDefinition::new(id, id, FlowNodeType::IntermediateThrowEvent).with_throw_message(trigger))
    }

    /// Gateway
    pub fn gateway(self, id: &str, kind: GatewayKind) -> Self {
        self.node(FlowNodeDefinition::gateway(id, id, kind))
    }

    /// Message boundary event attached to `activity`
    pub fn boundary_event(mut self, activity: &str, id: &str, trigger: CatchMessageTrigger, interrupting: bool) -> Self {
        let boundary = FlowNodeDefinition::new(id, id, FlowNodeType::BoundaryEvent)
            .with_catch_message(trigger)
            .with_interrupting(interrupting);
        self.container = self.container.add_boundary_event(activity, boundary);
        self
    }

    /// Embedded sub-process
    pub fn sub_process(self, id: &str, content: ProcessBuilder) -> Self {
        self.node(FlowNodeDefinition::new(id, id, FlowNodeType::SubProcess).with_sub_process(content.container, false))
    }

    /// Event sub-process started by the message start event of its content
    pub fn event_sub_process(self, id: &str, content: ProcessBuilder, interrupting: bool) -> Self {
        self.node(
            FlowNodeDefinition::new(id, id, FlowNodeType::SubProcess)
                .with_sub_process(content.container, true)
                .with_interrupting(interrupting),
        )
    }

    /// Unconditional transition
    pub fn flow(mut self, source: &str, target: &str) -> Self {
        self.container = self.container.add_transition(TransitionDefinition::new(source, target));
        self
    }

    /// Chain of unconditional transitions through `ids`
    pub fn sequence(self, ids: &[&str]) -> Self {
        ids.windows(2).fold(self, |builder, pair| builder.flow(pair[0], pair[1]))
    }

    /// Named transition guarded by a condition
    pub fn conditional_flow(mut self, source: &str, target: &str, name: &str, condition: Expression) -> Self {
        let transition = TransitionDefinition::new(source, target)
            .named(name)
            .with_condition(condition);
        self.container = self.container.add_transition(transition);
        self
    }

    /// Transition taken when no other outgoing transition of `source` passes
    pub fn default_flow(mut self, source: &str, target: &str) -> Self {
        let transition = TransitionDefinition::new(source, target);
        let transition_id = transition.id.clone();
        if let Some(node) = self.container.flow_nodes.iter_mut().find(|n| n.id.as_str() == source) {
            node.default_transition = Some(transition_id);
        }
        self.container = self.container.add_transition(transition);
        self
    }

    /// Container built so far
    pub fn container(&self) -> &FlowContainerDefinition {
        &self.container
    }

    /// Finish the process definition
    pub fn build(self) -> ProcessDefinition {
        ProcessDefinition::new(self.id.as_str(), self.name, self.container)
    }
}
