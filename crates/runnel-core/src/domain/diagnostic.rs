//! Diagnostic context accumulated by errors while they propagate.
//!
//! Each layer a failure crosses (connector, operation, expression, message
//! handling, transition evaluation) records one marker here. The context is
//! rendered to a display string only when the failure is persisted.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Separator between a marker type and its value (`input::username`)
pub const TYPE_SEPARATOR: &str = "::";

/// Failure scopes: the human-readable category stored with a failure
pub mod scope {
    /// No scope could be derived from the error
    pub const UNKNOWN: &str = "UNKNOWN";
    /// Failure while computing general flow node information
    pub const GENERAL_INFORMATION: &str = "General information";
    /// Failure while executing an operation
    pub const OPERATION: &str = "Operation";
    /// Failure while handling an event (message, boundary, ...)
    pub const EVENT: &str = "Event";
    /// Failure while handling a loop or multi-instance iteration
    pub const ITERATION: &str = "Iteration";
    /// Failure inside a connector
    pub const CONNECTOR: &str = "Connector";
    /// Failure while initializing data
    pub const DATA_INITIALIZATION: &str = "Data initialization";
    /// Failure while resolving actors
    pub const ACTOR_MAPPING: &str = "Actor mapping";
    /// Failure while evaluating outgoing transitions
    pub const OUTGOING_TRANSITION: &str = "Outgoing transition";
}

/// Moment at which a connector is triggered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectorEvent {
    /// Before the flow node executes its own logic
    OnEnter,
    /// After the flow node executed its own logic
    OnFinish,
}

impl ConnectorEvent {
    /// Upper-case event name, as configured in process definitions
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectorEvent::OnEnter => "ON_ENTER",
            ConnectorEvent::OnFinish => "ON_FINISH",
        }
    }
}

impl fmt::Display for ConnectorEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connector being executed when a failure happened
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectorMarker {
    /// Connector instance name
    pub name: String,
    /// Connector definition id
    pub definition_id: Option<String>,
    /// Activation event of the connector
    pub activation_event: Option<ConnectorEvent>,
}

/// Structured context carried by execution errors
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticContext {
    /// Message being thrown or caught
    pub message_name: Option<String>,
    /// Connector being executed
    pub connector: Option<ConnectorMarker>,
    /// Connector input being evaluated
    pub connector_input: Option<String>,
    /// Display name of the transition being evaluated
    pub transition_name: Option<String>,
    /// `type::name` label of the transition target
    pub transition_target: Option<String>,
    /// Process definition being executed
    pub process_definition_id: Option<String>,
    /// Process instance owning the flow node
    pub process_instance_id: Option<String>,
    /// Flow node instance being executed
    pub flow_node_instance_id: Option<String>,
    /// Flow node definition name
    pub flow_node_name: Option<String>,
}

impl DiagnosticContext {
    /// Create an empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether no marker at all has been recorded
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Fill every marker missing here with the one recorded in `other`.
    ///
    /// Markers already present are kept: the innermost layer that recorded a
    /// marker wins, outer layers only complete it.
    pub fn merge_missing(&mut self, other: &DiagnosticContext) {
        fill(&mut self.message_name, &other.message_name);
        fill(&mut self.connector, &other.connector);
        fill(&mut self.connector_input, &other.connector_input);
        fill(&mut self.transition_name, &other.transition_name);
        fill(&mut self.transition_target, &other.transition_target);
        fill(&mut self.process_definition_id, &other.process_definition_id);
        fill(&mut self.process_instance_id, &other.process_instance_id);
        fill(&mut self.flow_node_instance_id, &other.flow_node_instance_id);
        fill(&mut self.flow_node_name, &other.flow_node_name);
    }

    /// Key/value pairs used when the context is displayed in logs
    pub fn summary(&self) -> Vec<(&'static str, String)> {
        let connector_name = self.connector.as_ref().map(|c| c.name.clone());
        [
            ("PROCESS_DEFINITION_ID", &self.process_definition_id),
            ("PROCESS_INSTANCE_ID", &self.process_instance_id),
            ("FLOW_NODE_INSTANCE_ID", &self.flow_node_instance_id),
            ("FLOW_NODE_NAME", &self.flow_node_name),
            ("MESSAGE_INSTANCE_NAME", &self.message_name),
            ("CONNECTOR_NAME", &connector_name),
            ("CONNECTOR_INPUT_NAME", &self.connector_input),
            ("TRANSITION_NAME", &self.transition_name),
            ("TRANSITION_TARGET_FLOWNODE_NAME", &self.transition_target),
        ]
        .into_iter()
        .filter_map(|(key, value)| value.clone().map(|value| (key, value)))
        .collect()
    }
}

fn fill<T: Clone>(target: &mut Option<T>, source: &Option<T>) {
    if target.is_none() {
        target.clone_from(source);
    }
}

impl fmt::Display for DiagnosticContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, value) in self.summary() {
            write!(f, "{}={} | ", key, value)?;
        }
        Ok(())
    }
}
