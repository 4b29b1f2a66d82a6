//! Process definitions: the graph of flow nodes and transitions being executed.
//!
//! Only what execution needs is modeled here.

use crate::domain::diagnostic::ConnectorEvent;
use crate::domain::flow_node::FlowNodeType;
use crate::types::{FlowNodeDefinitionId, ProcessDefinitionId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How an expression is interpreted by the resolver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExpressionType {
    /// JSON literal held in the content
    Constant,
    /// Name of a variable visible in the evaluation context
    Variable,
    /// JMESPath query over the evaluation context variables
    Query,
}

/// Declared type of an expression's result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReturnType {
    /// `true` or `false`
    Boolean,
    /// Text
    String,
    /// Whole number
    Integer,
    /// Floating point number
    Decimal,
    /// Any JSON value
    Json,
}

/// Named expression evaluated by the expression resolver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expression {
    /// Name reported in failures
    pub name: String,
    /// Expression body
    pub content: String,
    /// Interpretation of the body
    pub expression_type: ExpressionType,
    /// Declared result type
    pub return_type: ReturnType,
}

impl Expression {
    /// Constant expression returning `value`
    pub fn constant(name: impl Into<String>, value: Value) -> Self {
        let return_type = match &value {
            Value::Bool(_) => ReturnType::Boolean,
            Value::String(_) => ReturnType::String,
            Value::Number(n) if n.is_i64() || n.is_u64() => ReturnType::Integer,
            Value::Number(_) => ReturnType::Decimal,
            _ => ReturnType::Json,
        };
        Self {
            name: name.into(),
            content: value.to_string(),
            expression_type: ExpressionType::Constant,
            return_type,
        }
    }

    /// Constant text expression
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::constant(name, Value::String(value.into()))
    }

    /// Variable lookup
    pub fn variable(name: impl Into<String>, variable: impl Into<String>, return_type: ReturnType) -> Self {
        Self {
            name: name.into(),
            content: variable.into(),
            expression_type: ExpressionType::Variable,
            return_type,
        }
    }

    /// JMESPath query over the context variables
    pub fn query(name: impl Into<String>, query: impl Into<String>, return_type: ReturnType) -> Self {
        Self {
            name: name.into(),
            content: query.into(),
            expression_type: ExpressionType::Query,
            return_type,
        }
    }
}

/// Edge between two flow nodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionDefinition {
    /// Identifier, unique in the process
    pub id: String,
    /// Name, synthesized as `source_->_target` when none is given
    pub name: String,
    /// Source flow node
    pub source: FlowNodeDefinitionId,
    /// Target flow node
    pub target: FlowNodeDefinitionId,
    /// Optional boolean guard
    pub condition: Option<Expression>,
}

impl TransitionDefinition {
    /// Unnamed, unconditional transition
    pub fn new(source: impl Into<FlowNodeDefinitionId>, target: impl Into<FlowNodeDefinitionId>) -> Self {
        let source = source.into();
        let target = target.into();
        let name = synthesized_name(&source, &target);
        Self {
            id: name.clone(),
            name,
            source,
            target,
            condition: None,
        }
    }

    /// Set an explicit name
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self.id.clone_from(&self.name);
        self
    }

    /// Guard the transition with a condition
    pub fn with_condition(mut self, condition: Expression) -> Self {
        self.condition = Some(condition);
        self
    }

    /// Name shown in failures, absent when the name is the synthesized one
    pub fn display_name(&self) -> Option<&str> {
        if self.name == synthesized_name(&self.source, &self.target) {
            None
        } else {
            Some(&self.name)
        }
    }
}

fn synthesized_name(source: &FlowNodeDefinitionId, target: &FlowNodeDefinitionId) -> String {
    format!("{}_->_{}", source, target)
}

/// Correlation key/value pair of a message trigger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationDefinition {
    /// Expression evaluated to the correlation key
    pub key: Expression,
    /// Expression evaluated to the correlation value
    pub value: Expression,
}

/// Data assignment applied to process variables
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    /// Variable receiving the value
    pub target: String,
    /// Expression computing the value
    pub expression: Expression,
}

/// Message-scoped data sent with a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataDefinition {
    /// Data name
    pub name: String,
    /// Initial value
    pub default_value: Option<Expression>,
}

/// Throw side of a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrowMessageTrigger {
    /// Literal message name
    pub message_name: String,
    /// Expression evaluated to the target process name
    pub target_process: Expression,
    /// Expression evaluated to the target flow node name
    pub target_flow_node: Option<Expression>,
    /// Correlations, only the first five are used
    pub correlations: Vec<CorrelationDefinition>,
    /// Data sent with the message
    pub data: Vec<DataDefinition>,
}

/// Catch side of a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatchMessageTrigger {
    /// Literal message name
    pub message_name: String,
    /// Correlations, only the first five are used
    pub correlations: Vec<CorrelationDefinition>,
    /// Operations applied with the message data once matched
    pub operations: Vec<Operation>,
}

/// Connector attached to a flow node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectorDefinition {
    /// Connector instance name
    pub name: String,
    /// Connector implementation
    pub definition_id: String,
    /// When the connector runs
    pub activation_event: ConnectorEvent,
    /// Inputs, evaluated before the connector runs
    pub inputs: Vec<(String, Expression)>,
    /// Operations applied with the connector outputs
    pub outputs: Vec<Operation>,
}

/// Routing behavior of a gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GatewayKind {
    /// First passing transition only
    Exclusive,
    /// Every transition, merging waits for every branch
    Parallel,
    /// Every passing transition
    Inclusive,
}

/// Flow node of a process definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowNodeDefinition {
    /// Identifier, unique in the process
    pub id: FlowNodeDefinitionId,
    /// Name
    pub name: String,
    /// Node type
    pub node_type: FlowNodeType,
    /// Gateway routing, for gateways
    pub gateway: Option<GatewayKind>,
    /// Transition taken when no other passes
    pub default_transition: Option<String>,
    /// Message caught by the node
    pub catch_message: Option<CatchMessageTrigger>,
    /// Message thrown by the node
    pub throw_message: Option<ThrowMessageTrigger>,
    /// Connectors of the node
    pub connectors: Vec<ConnectorDefinition>,
    /// Boundary events attached to this activity
    pub boundary_events: Vec<FlowNodeDefinitionId>,
    /// Activity a boundary event is attached to
    pub attached_to: Option<FlowNodeDefinitionId>,
    /// Whether a boundary event or event sub-process interrupts its scope
    pub interrupting: bool,
    /// Whether an end event terminates the whole process instance
    pub terminate: bool,
    /// Content of a sub-process
    pub sub_process: Option<Box<FlowContainerDefinition>>,
    /// Whether a sub-process is started by an event instead of a transition
    pub triggered_by_event: bool,
}

impl FlowNodeDefinition {
    /// Flow node without any trigger or connector
    pub fn new(id: impl Into<FlowNodeDefinitionId>, name: impl Into<String>, node_type: FlowNodeType) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            node_type,
            gateway: None,
            default_transition: None,
            catch_message: None,
            throw_message: None,
            connectors: Vec::new(),
            boundary_events: Vec::new(),
            attached_to: None,
            interrupting: true,
            terminate: false,
            sub_process: None,
            triggered_by_event: false,
        }
    }

    /// Gateway with the given routing
    pub fn gateway(id: impl Into<FlowNodeDefinitionId>, name: impl Into<String>, kind: GatewayKind) -> Self {
        let mut definition = Self::new(id, name, FlowNodeType::Gateway);
        definition.gateway = Some(kind);
        definition
    }

    /// Catch a message
    pub fn with_catch_message(mut self, trigger: CatchMessageTrigger) -> Self {
        self.catch_message = Some(trigger);
        self
    }

    /// Throw a message
    pub fn with_throw_message(mut self, trigger: ThrowMessageTrigger) -> Self {
        self.throw_message = Some(trigger);
        self
    }

    /// Add a connector
    pub fn with_connector(mut self, connector: ConnectorDefinition) -> Self {
        self.connectors.push(connector);
        self
    }

    /// Set the default transition
    pub fn with_default_transition(mut self, transition_id: impl Into<String>) -> Self {
        self.default_transition = Some(transition_id.into());
        self
    }

    /// Make an end event terminate its process instance
    pub fn terminating(mut self) -> Self {
        self.terminate = true;
        self
    }

    /// Set whether the event interrupts its scope
    pub fn with_interrupting(mut self, interrupting: bool) -> Self {
        self.interrupting = interrupting;
        self
    }

    /// Set the sub-process content
    pub fn with_sub_process(mut self, content: FlowContainerDefinition, triggered_by_event: bool) -> Self {
        self.sub_process = Some(Box::new(content));
        self.triggered_by_event = triggered_by_event;
        self
    }

    /// Whether boundary events are attached to this node
    pub fn has_boundary_events(&self) -> bool {
        !self.boundary_events.is_empty() && self.node_type.accepts_boundary_events()
    }
}

/// Flow nodes and transitions of a process or sub-process
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowContainerDefinition {
    /// Flow nodes
    pub flow_nodes: Vec<FlowNodeDefinition>,
    /// Transitions
    pub transitions: Vec<TransitionDefinition>,
}

impl FlowContainerDefinition {
    /// Empty container
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a flow node
    pub fn add_flow_node(mut self, flow_node: FlowNodeDefinition) -> Self {
        self.flow_nodes.push(flow_node);
        self
    }

    /// Add a transition
    pub fn add_transition(mut self, transition: TransitionDefinition) -> Self {
        self.transitions.push(transition);
        self
    }

    /// Attach a boundary event definition to an activity of this container
    pub fn add_boundary_event(
        mut self,
        activity: impl Into<FlowNodeDefinitionId>,
        mut boundary: FlowNodeDefinition,
    ) -> Self {
        let activity = activity.into();
        if let Some(attached) = self.flow_nodes.iter_mut().find(|n| n.id == activity) {
            attached.boundary_events.push(boundary.id.clone());
        }
        boundary.attached_to = Some(activity);
        self.flow_nodes.push(boundary);
        self
    }

    /// Flow node of this container
    pub fn flow_node(&self, id: &FlowNodeDefinitionId) -> Option<&FlowNodeDefinition> {
        self.flow_nodes.iter().find(|n| &n.id == id)
    }

    /// Transitions leaving a flow node
    pub fn outgoing(&self, id: &FlowNodeDefinitionId) -> Vec<&TransitionDefinition> {
        self.transitions.iter().filter(|t| &t.source == id).collect()
    }

    /// Number of transitions reaching a flow node
    pub fn incoming_count(&self, id: &FlowNodeDefinitionId) -> usize {
        self.transitions.iter().filter(|t| &t.target == id).count()
    }

    /// Flow nodes started when the container starts: no incoming transition,
    /// not a boundary event, not an event sub-process, not a message start.
    pub fn initial_flow_nodes(&self) -> Vec<&FlowNodeDefinition> {
        self.flow_nodes
            .iter()
            .filter(|n| self.incoming_count(&n.id) == 0)
            .filter(|n| n.attached_to.is_none() && !n.triggered_by_event)
            .filter(|n| !(n.node_type == FlowNodeType::StartEvent && n.catch_message.is_some()))
            .collect()
    }

    fn find_recursive(&self, id: &FlowNodeDefinitionId) -> Option<(&FlowContainerDefinition, &FlowNodeDefinition)> {
        if let Some(node) = self.flow_node(id) {
            return Some((self, node));
        }
        self.flow_nodes
            .iter()
            .filter_map(|n| n.sub_process.as_deref())
            .find_map(|content| content.find_recursive(id))
    }
}

/// Deployed process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessDefinition {
    /// Identifier
    pub id: ProcessDefinitionId,
    /// Name, used as message target
    pub name: String,
    /// Version label
    pub version: String,
    /// Root container
    pub container: FlowContainerDefinition,
}

impl ProcessDefinition {
    /// New process definition
    pub fn new(
        id: impl Into<ProcessDefinitionId>,
        name: impl Into<String>,
        container: FlowContainerDefinition,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: "1.0".to_string(),
            container,
        }
    }

    /// Flow node anywhere in the process, sub-processes included
    pub fn flow_node(&self, id: &FlowNodeDefinitionId) -> Option<&FlowNodeDefinition> {
        self.container.find_recursive(id).map(|(_, node)| node)
    }

    /// Container directly holding a flow node
    pub fn container_of(&self, id: &FlowNodeDefinitionId) -> Option<&FlowContainerDefinition> {
        self.container.find_recursive(id).map(|(container, _)| container)
    }

    /// Every flow node of the process, sub-processes included
    pub fn all_flow_nodes(&self) -> Vec<&FlowNodeDefinition> {
        fn collect<'a>(container: &'a FlowContainerDefinition, out: &mut Vec<&'a FlowNodeDefinition>) {
            for node in &container.flow_nodes {
                out.push(node);
                if let Some(content) = node.sub_process.as_deref() {
                    collect(content, out);
                }
            }
        }
        let mut nodes = Vec::new();
        collect(&self.container, &mut nodes);
        nodes
    }
}
