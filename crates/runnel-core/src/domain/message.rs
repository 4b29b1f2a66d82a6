use crate::types::{
    FlowNodeDefinitionId, FlowNodeInstanceId, MessageInstanceId, ProcessDefinitionId,
    ProcessInstanceId, WaitingEventId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Number of correlation slots of waiting events and messages.
///
/// Fixed-width limit inherited from the storage layout: extra correlations are
/// ignored.
pub const MAX_CORRELATIONS: usize = 5;

/// Value of an unused correlation slot
pub const NO_CORRELATION: &str = "NONE";

/// Separator between key and value in a correlation slot
pub const CORRELATION_SEPARATOR: &str = "-$-";

/// Correlation slots of a waiting event or message instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationSlots(pub [String; MAX_CORRELATIONS]);

impl Default for CorrelationSlots {
    fn default() -> Self {
        Self(std::array::from_fn(|_| NO_CORRELATION.to_string()))
    }
}

impl CorrelationSlots {
    /// Fill the slots from evaluated key/value pairs.
    ///
    /// Only the first five pairs are kept. They are sorted by key, so two sides
    /// declaring the same correlations in a different order fill the same slots.
    pub fn from_pairs(mut pairs: Vec<(String, String)>) -> Self {
        pairs.truncate(MAX_CORRELATIONS);
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        let mut slots = Self::default();
        for (slot, (key, value)) in slots.0.iter_mut().zip(pairs) {
            *slot = format!("{}{}{}", key, CORRELATION_SEPARATOR, value);
        }
        slots
    }

    /// Slots holding a correlation
    pub fn effective(&self) -> BTreeSet<&str> {
        self.0
            .iter()
            .map(String::as_str)
            .filter(|slot| *slot != NO_CORRELATION)
            .collect()
    }

    /// Whether both sides hold the same correlations
    pub fn correlates_with(&self, other: &CorrelationSlots) -> bool {
        self.effective() == other.effective()
    }
}

/// Construct owning a waiting event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WaitingEventKind {
    /// Boundary event attached to an activity
    Boundary,
    /// Intermediate catch event or receive task
    IntermediateCatch,
    /// Message start event of a process
    Start,
    /// Message start event of an event sub-process
    EventSubProcess,
}

/// Catch-side registration awaiting a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitingEvent {
    /// Identifier
    pub id: WaitingEventId,
    /// Construct owning the registration
    pub kind: WaitingEventKind,
    /// Message awaited
    pub message_name: String,
    /// Process definition of the catching construct
    pub process_definition_id: ProcessDefinitionId,
    /// Name of that process, matched against message targets
    pub process_name: String,
    /// Catching flow node definition
    pub flow_node_definition_id: FlowNodeDefinitionId,
    /// Catching flow node name
    pub flow_node_name: String,
    /// Catching flow node instance (boundary and intermediate kinds)
    pub flow_node_instance_id: Option<FlowNodeInstanceId>,
    /// Process instance of the catching node (all kinds but start)
    pub parent_process_instance_id: Option<ProcessInstanceId>,
    /// Root process instance (all kinds but start)
    pub root_process_instance_id: Option<ProcessInstanceId>,
    /// Event sub-process definition started on match
    pub subprocess_definition_id: Option<FlowNodeDefinitionId>,
    /// Correlations
    pub correlations: CorrelationSlots,
    /// Set by the matching sweep once a message was assigned
    pub locked: bool,
    /// Message assigned by the matching sweep
    pub matched_message: Option<MessageInstanceId>,
    /// Registration date
    pub created_at: DateTime<Utc>,
}

impl WaitingEvent {
    /// Whether `message` is addressed to this registration and carries the
    /// same correlations
    pub fn accepts(&self, message: &MessageInstance) -> bool {
        self.message_name == message.message_name
            && self.process_name == message.target_process
            && message
                .target_flow_node
                .as_ref()
                .map_or(true, |target| *target == self.flow_node_name)
            && self.correlations.correlates_with(&message.correlations)
    }
}

/// Thrown message awaiting a waiting event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageInstance {
    /// Identifier
    pub id: MessageInstanceId,
    /// Message name
    pub message_name: String,
    /// Name of the target process
    pub target_process: String,
    /// Name of the target flow node
    pub target_flow_node: Option<String>,
    /// Correlations
    pub correlations: CorrelationSlots,
    /// Name of the throwing flow node
    pub flow_node_name: Option<String>,
    /// Process definition of the thrower
    pub process_definition_id: Option<ProcessDefinitionId>,
    /// Message-scoped data
    pub data: serde_json::Map<String, serde_json::Value>,
    /// Set by the matching sweep once assigned to a waiting event
    pub handled: bool,
    /// Throw date
    pub created_at: DateTime<Utc>,
}

impl MessageInstance {
    /// Message sent from outside any process
    pub fn new(message_name: impl Into<String>, target_process: impl Into<String>) -> Self {
        Self {
            id: MessageInstanceId::generate(),
            message_name: message_name.into(),
            target_process: target_process.into(),
            target_flow_node: None,
            correlations: CorrelationSlots::default(),
            flow_node_name: None,
            process_definition_id: None,
            data: serde_json::Map::new(),
            handled: false,
            created_at: Utc::now(),
        }
    }

    /// Address a single flow node of the target process
    pub fn to_flow_node(mut self, flow_node_name: impl Into<String>) -> Self {
        self.target_flow_node = Some(flow_node_name.into());
        self
    }

    /// Set the correlations from key/value pairs
    pub fn with_correlations(mut self, pairs: Vec<(String, String)>) -> Self {
        self.correlations = CorrelationSlots::from_pairs(pairs);
        self
    }

    /// Attach a data item
    pub fn with_data(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.data.insert(name.into(), value);
        self
    }
}
