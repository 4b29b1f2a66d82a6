use crate::types::{FailureId, FlowNodeInstanceId, ProcessDefinitionId, ProcessInstanceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Diagnostic record explaining why a flow node failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BpmFailure {
    /// Identifier
    pub id: FailureId,
    /// Process definition of the failed node
    pub process_definition_id: ProcessDefinitionId,
    /// Process instance of the failed node
    pub process_instance_id: ProcessInstanceId,
    /// Failed node
    pub flow_node_instance_id: FlowNodeInstanceId,
    /// Category of the failure
    pub scope: String,
    /// `type::value//type::value` path locating the failure
    pub context: String,
    /// Root cause message
    pub error_message: String,
    /// Bounded rendering of the cause chain
    pub stack_trace: String,
    /// Date of the failure
    pub failure_date: DateTime<Utc>,
}

/// Archived copy of a [`BpmFailure`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchivedBpmFailure {
    /// Identifier of the archived record
    pub id: FailureId,
    /// Identifier of the live failure it was copied from
    pub source_object_id: FailureId,
    /// Process definition of the failed node
    pub process_definition_id: ProcessDefinitionId,
    /// Process instance of the failed node
    pub process_instance_id: ProcessInstanceId,
    /// Failed node
    pub flow_node_instance_id: FlowNodeInstanceId,
    /// Category of the failure
    pub scope: String,
    /// Failure location
    pub context: String,
    /// Root cause message
    pub error_message: String,
    /// Bounded rendering of the cause chain
    pub stack_trace: String,
    /// Date of the original failure
    pub failure_date: DateTime<Utc>,
    /// Date of archiving
    pub archive_date: DateTime<Utc>,
}

impl ArchivedBpmFailure {
    /// Archived copy of a live failure
    pub fn archive(failure: &BpmFailure, archive_date: DateTime<Utc>) -> Self {
        Self {
            id: FailureId::generate(),
            source_object_id: failure.id.clone(),
            process_definition_id: failure.process_definition_id.clone(),
            process_instance_id: failure.process_instance_id.clone(),
            flow_node_instance_id: failure.flow_node_instance_id.clone(),
            scope: failure.scope.clone(),
            context: failure.context.clone(),
            error_message: failure.error_message.clone(),
            stack_trace: failure.stack_trace.clone(),
            failure_date: failure.failure_date,
            archive_date,
        }
    }
}
