//! Failure capture: records why a flow node failed, with enough context to
//! diagnose it without re-running the process.

use crate::domain::diagnostic::{DiagnosticContext, TYPE_SEPARATOR};
use crate::domain::failure::{ArchivedBpmFailure, BpmFailure};
use crate::domain::flow_node::FlowNodeInstance;
use crate::domain::repository::{queries, ArchiveInsertRecord, ArchiveService, SelectListDescriptor, Transaction};
use crate::domain::work::Failure;
use crate::error::{CoreError, ExecutionError, ExecutionErrorKind};
use crate::types::{FailureId, FlowNodeInstanceId};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Separator between the segments of a failure context path
pub const CONTEXT_PATH_SEPARATOR: &str = "//";

/// Service recording flow node failures
#[derive(Clone)]
pub struct FailureService {
    /// Archive storage
    archive: Arc<dyn ArchiveService>,

    /// Maximum number of causes rendered in a stack trace
    stack_trace_depth: usize,
}

impl FailureService {
    /// Create a new failure service
    pub fn new(archive: Arc<dyn ArchiveService>, stack_trace_depth: usize) -> Self {
        Self {
            archive,
            stack_trace_depth: stack_trace_depth.max(1),
        }
    }

    /// Persist a failure for a flow node
    pub async fn create_flow_node_failure(
        &self,
        tx: &mut dyn Transaction,
        node: &FlowNodeInstance,
        failure: &Failure,
    ) -> Result<BpmFailure, CoreError> {
        debug!(flow_node_instance_id = %node.id, scope = %failure.scope, "Adding failure for flow node instance");
        let bpm_failure = BpmFailure {
            id: FailureId::generate(),
            process_definition_id: node.process_definition_id.clone(),
            process_instance_id: node.parent_process_instance_id.clone(),
            flow_node_instance_id: node.id.clone(),
            scope: failure.scope.clone(),
            context: build_context(&failure.error),
            error_message: failure.error.root_cause().message().to_string(),
            stack_trace: render_stack_trace(&failure.error, self.stack_trace_depth),
            failure_date: Utc::now(),
        };
        tx.insert(&bpm_failure).await?;
        Ok(bpm_failure)
    }

    /// First `max_results` failures of a flow node
    pub async fn get_flow_node_failures(
        &self,
        tx: &mut dyn Transaction,
        flow_node_instance_id: &FlowNodeInstanceId,
        max_results: usize,
    ) -> Result<Vec<BpmFailure>, CoreError> {
        let query = SelectListDescriptor::new(queries::GET_FLOW_NODE_FAILURES)
            .with_parameter("flow_node_instance_id", flow_node_instance_id.as_str())
            .paged(0, max_results);
        tx.select_list(&query).await
    }

    /// First `max_results` archived failures of a flow node
    pub async fn get_archived_flow_node_failures(
        &self,
        tx: &mut dyn Transaction,
        flow_node_instance_id: &FlowNodeInstanceId,
        max_results: usize,
    ) -> Result<Vec<ArchivedBpmFailure>, CoreError> {
        let query = SelectListDescriptor::new(queries::GET_ARCHIVED_FLOW_NODE_FAILURES)
            .with_parameter("flow_node_instance_id", flow_node_instance_id.as_str())
            .paged(0, max_results);
        tx.select_list(&query).await
    }

    /// Copy every failure of a flow node to archive storage
    pub async fn archive_flow_node_failures(
        &self,
        tx: &mut dyn Transaction,
        flow_node_instance_id: &FlowNodeInstanceId,
        archive_date: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        debug!(flow_node_instance_id = %flow_node_instance_id, "Archiving failures of flow node instance");
        let records = self
            .get_flow_node_failures(tx, flow_node_instance_id, usize::MAX)
            .await?
            .iter()
            .map(|failure| ArchiveInsertRecord::new(&ArchivedBpmFailure::archive(failure, archive_date)))
            .collect::<Result<Vec<_>, _>>()?;
        if records.is_empty() {
            return Ok(());
        }
        self.archive.record_inserts(tx, archive_date, records).await
    }

    /// Delete the live failures of a flow node
    pub async fn delete_flow_node_failures(
        &self,
        tx: &mut dyn Transaction,
        flow_node_instance_id: &FlowNodeInstanceId,
    ) -> Result<(), CoreError> {
        debug!(flow_node_instance_id = %flow_node_instance_id, "Deleting failures of flow node instance");
        let ids: Vec<String> = self
            .get_flow_node_failures(tx, flow_node_instance_id, usize::MAX)
            .await?
            .into_iter()
            .map(|failure| failure.id.to_string())
            .collect();
        if ids.is_empty() {
            return Ok(());
        }
        tx.delete::<BpmFailure>(&ids).await
    }

    /// Delete the archived failures of several flow nodes
    pub async fn delete_archived_flow_node_failures(
        &self,
        tx: &mut dyn Transaction,
        flow_node_instance_ids: &[FlowNodeInstanceId],
    ) -> Result<(), CoreError> {
        if flow_node_instance_ids.is_empty() {
            return Ok(());
        }
        debug!(count = flow_node_instance_ids.len(), "Deleting archived failures of flow node instances");
        let ids: Vec<Value> = flow_node_instance_ids
            .iter()
            .map(|id| Value::String(id.to_string()))
            .collect();
        let mut parameters = BTreeMap::new();
        parameters.insert("flowNodeInstanceIds".to_string(), Value::Array(ids));
        self.archive
            .delete_from_query(tx, queries::DELETE_ARCHIVED_FAILURES_BY_FLOW_NODE_IDS, parameters)
            .await
    }
}

/// Render the `type::value//type::value` path locating a failure.
///
/// Segments, in order: message, connector (then `output` for an output
/// operation error), connector input, input validation, transition, expression.
pub fn build_context(error: &ExecutionError) -> String {
    let mut context = DiagnosticContext::new();
    for cause in error.chain() {
        context.merge_missing(cause.context());
    }

    let mut segments: Vec<String> = Vec::new();
    if let Some(message_name) = &context.message_name {
        segments.push(format!("message{}{}", TYPE_SEPARATOR, message_name));
    }

    if let Some(connector) = &context.connector {
        let mut segment = connector.name.clone();
        if let Some(definition_id) = &connector.definition_id {
            segment.push_str(TYPE_SEPARATOR);
            segment.push_str(definition_id);
        }
        if let Some(event) = connector.activation_event {
            segment.push_str(TYPE_SEPARATOR);
            segment.push_str(&event.as_str().to_lowercase());
        }
        segments.push(segment);
        if in_chain(error, |kind| matches!(kind, ExecutionErrorKind::OperationExecution)) {
            segments.push("output".to_string());
        }
    }
    if let Some(input) = &context.connector_input {
        segments.push(format!("input{}{}", TYPE_SEPARATOR, input));
    }
    if in_chain(error, |kind| matches!(kind, ExecutionErrorKind::ConnectorValidation)) {
        segments.push("input-validation".to_string());
    }

    if let Some(target) = &context.transition_target {
        if let Some(name) = &context.transition_name {
            segments.push(name.clone());
        }
        segments.push(format!("to{}{}", TYPE_SEPARATOR, target));
    }

    let expression = error.chain().find_map(|e| match e.kind() {
        ExecutionErrorKind::ExpressionEvaluation { expression_name } => Some(expression_name),
        _ => None,
    });
    if let Some(expression_name) = expression {
        segments.push(format!("expression{}{}", TYPE_SEPARATOR, expression_name));
    }

    segments.join(CONTEXT_PATH_SEPARATOR)
}

fn in_chain(error: &ExecutionError, predicate: impl Fn(&ExecutionErrorKind) -> bool) -> bool {
    error.find_in_chain(predicate).is_some()
}

/// Lightweight rendering of the cause chain, bounded to `depth` entries
pub fn render_stack_trace(error: &ExecutionError, depth: usize) -> String {
    let total = error.chain().count();
    let mut lines: Vec<String> = error
        .chain()
        .take(depth)
        .enumerate()
        .map(|(index, e)| {
            let prefix = if index == 0 { "" } else { "Caused by: " };
            format!("{}{}: {}", prefix, kind_label(e.kind()), e.message())
        })
        .collect();
    if total > depth {
        lines.push(format!("\t... {} more", total - depth));
    }
    lines.join("\n")
}

fn kind_label(kind: &ExecutionErrorKind) -> String {
    match kind {
        ExecutionErrorKind::ExpressionEvaluation { expression_name } => {
            format!("ExpressionEvaluation[{}]", expression_name)
        }
        other => format!("{:?}", other),
    }
}
