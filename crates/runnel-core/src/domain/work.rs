use crate::domain::diagnostic::scope;
use crate::domain::flow_node::{FlowNodeInstance, Lifecycle};
use crate::error::ExecutionError;
use crate::types::{FlowNodeInstanceId, MessageInstanceId, ProcessDefinitionId, TenantId, WaitingEventId, WorkId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Failure to persist on a flow node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    /// Category of the failure
    pub scope: String,
    /// Error raised by user-authored logic
    pub error: ExecutionError,
}

impl Failure {
    /// Failure whose scope is taken from the error, `UNKNOWN` when it has none
    pub fn from_error(error: ExecutionError) -> Self {
        Self {
            scope: error.scope().unwrap_or(scope::UNKNOWN).to_string(),
            error,
        }
    }
}

/// What a unit of work does
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WorkKind {
    /// Run the current state of a flow node and move it forward
    ExecuteFlowNode {
        /// Node to execute
        flow_node_instance_id: FlowNodeInstanceId,
        /// Lifecycle expected when the work runs
        expected: Lifecycle,
    },
    /// Let the container of a terminal flow node react to its completion
    NotifyChildFinished {
        /// Process definition of the finished node
        process_definition_id: ProcessDefinitionId,
        /// Finished node
        flow_node_instance_id: FlowNodeInstanceId,
        /// Lifecycle expected when the work runs
        expected: Lifecycle,
    },
    /// Match thrown messages with waiting events
    MatchMessages,
    /// Deliver a matched message to its waiting event
    ExecuteMessageCouple {
        /// Matched message
        message_instance_id: MessageInstanceId,
        /// Matched waiting event
        waiting_event_id: WaitingEventId,
    },
    /// Mark a flow node failed and record why
    SetInFail {
        /// Failed node
        flow_node_instance_id: FlowNodeInstanceId,
        /// Failure to record
        failure: Failure,
    },
}

impl WorkKind {
    /// Short name used in logs and metrics
    pub fn name(&self) -> &'static str {
        match self {
            WorkKind::ExecuteFlowNode { .. } => "execute_flow_node",
            WorkKind::NotifyChildFinished { .. } => "notify_child_finished",
            WorkKind::MatchMessages => "match_messages",
            WorkKind::ExecuteMessageCouple { .. } => "execute_message_couple",
            WorkKind::SetInFail { .. } => "set_in_fail",
        }
    }
}

/// Durable unit of deferred execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkDescriptor {
    /// Identifier
    pub id: WorkId,
    /// Tenant the work belongs to
    pub tenant_id: Option<TenantId>,
    /// What to do
    pub kind: WorkKind,
    /// Scheduling date
    pub created_at: DateTime<Utc>,
}

impl WorkDescriptor {
    /// New descriptor of the given kind
    pub fn new(kind: WorkKind) -> Self {
        Self {
            id: WorkId::generate(),
            tenant_id: None,
            kind,
            created_at: Utc::now(),
        }
    }

    /// Execute a node from its current lifecycle
    pub fn execute_flow_node(node: &FlowNodeInstance) -> Self {
        Self::new(WorkKind::ExecuteFlowNode {
            flow_node_instance_id: node.id.clone(),
            expected: node.snapshot(),
        })
    }

    /// Notify the container of a terminal node
    pub fn notify_child_finished(node: &FlowNodeInstance) -> Self {
        Self::new(WorkKind::NotifyChildFinished {
            process_definition_id: node.process_definition_id.clone(),
            flow_node_instance_id: node.id.clone(),
            expected: node.snapshot(),
        })
    }

    /// Run a matching sweep
    pub fn match_messages() -> Self {
        Self::new(WorkKind::MatchMessages)
    }

    /// Deliver a matched couple
    pub fn execute_message_couple(message_instance_id: MessageInstanceId, waiting_event_id: WaitingEventId) -> Self {
        Self::new(WorkKind::ExecuteMessageCouple {
            message_instance_id,
            waiting_event_id,
        })
    }

    /// Record a failure on a node
    pub fn set_in_fail(flow_node_instance_id: FlowNodeInstanceId, failure: Failure) -> Self {
        Self::new(WorkKind::SetInFail {
            flow_node_instance_id,
            failure,
        })
    }

    /// Stamp the tenant
    pub fn for_tenant(mut self, tenant_id: TenantId) -> Self {
        self.tenant_id = Some(tenant_id);
        self
    }

    /// Flow node targeted by the work, if any
    pub fn flow_node_instance_id(&self) -> Option<&FlowNodeInstanceId> {
        match &self.kind {
            WorkKind::ExecuteFlowNode {
                flow_node_instance_id,
                ..
            }
            | WorkKind::NotifyChildFinished {
                flow_node_instance_id,
                ..
            }
            | WorkKind::SetInFail {
                flow_node_instance_id,
                ..
            } => Some(flow_node_instance_id),
            WorkKind::MatchMessages | WorkKind::ExecuteMessageCouple { .. } => None,
        }
    }

    /// Lifecycle the targeted node must still have when the work runs
    pub fn precondition(&self) -> Option<&Lifecycle> {
        match &self.kind {
            WorkKind::ExecuteFlowNode { expected, .. } | WorkKind::NotifyChildFinished { expected, .. } => {
                Some(expected)
            }
            _ => None,
        }
    }

    /// Whether the work opens and commits its own transactions
    pub fn custom_transaction(&self) -> bool {
        matches!(self.kind, WorkKind::MatchMessages)
    }

    /// Whether work lost in a crash must be re-executed on restart.
    ///
    /// A lost sweep is not replayed: recovery starts a new one whenever
    /// unmatched messages remain.
    pub fn can_be_recovered_by_the_recovery_mechanism(&self) -> bool {
        !matches!(self.kind, WorkKind::MatchMessages)
    }
}

impl fmt::Display for WorkDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            WorkKind::ExecuteFlowNode {
                flow_node_instance_id,
                expected,
            } => write!(f, "ExecuteFlowNode: flowNodeInstanceId = {} ({})", flow_node_instance_id, expected),
            WorkKind::NotifyChildFinished {
                flow_node_instance_id,
                expected,
                ..
            } => write!(f, "NotifyChildFinished: flowNodeInstanceId = {} ({})", flow_node_instance_id, expected),
            WorkKind::MatchMessages => write!(f, "MatchMessages"),
            WorkKind::ExecuteMessageCouple {
                message_instance_id,
                waiting_event_id,
            } => write!(
                f,
                "ExecuteMessageCouple: messageInstanceId = {}, waitingEventId = {}",
                message_instance_id, waiting_event_id
            ),
            WorkKind::SetInFail {
                flow_node_instance_id, ..
            } => write!(f, "SetInFail: flowNodeInstanceId = {}", flow_node_instance_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::state_machine::FlowNodeState;

    #[test]
    fn test_descriptor_serializes_with_precondition() {
        let descriptor = WorkDescriptor::new(WorkKind::ExecuteFlowNode {
            flow_node_instance_id: FlowNodeInstanceId::new("n1"),
            expected: Lifecycle::at(FlowNodeState::Executing),
        });

        let json = serde_json::to_value(&descriptor).unwrap();
        assert_eq!(json["kind"]["type"], "ExecuteFlowNode");

        let back: WorkDescriptor = serde_json::from_value(json).unwrap();
        assert_eq!(back, descriptor);
        assert_eq!(back.precondition(), Some(&Lifecycle::at(FlowNodeState::Executing)));
    }

    #[test]
    fn test_recovery_and_transaction_flags() {
        let sweep = WorkDescriptor::match_messages();
        assert!(sweep.custom_transaction());
        assert!(!sweep.can_be_recovered_by_the_recovery_mechanism());

        let fail = WorkDescriptor::set_in_fail(
            FlowNodeInstanceId::new("n1"),
            Failure::from_error(ExecutionError::behavior("boom")),
        );
        assert!(!fail.custom_transaction());
        assert!(fail.can_be_recovered_by_the_recovery_mechanism());
        assert_eq!(fail.flow_node_instance_id().map(|id| id.as_str()), Some("n1"));
    }

    #[test]
    fn test_failure_scope_defaults_to_unknown() {
        let failure = Failure::from_error(ExecutionError::behavior("boom"));
        assert_eq!(failure.scope, "UNKNOWN");

        let scoped = Failure::from_error(ExecutionError::behavior("boom").with_scope(scope::CONNECTOR));
        assert_eq!(scoped.scope, "Connector");
    }
}
