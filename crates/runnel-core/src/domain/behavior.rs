//! User-authored logic plugged into flow node execution.

use crate::domain::flow_node::FlowNodeInstance;
use crate::error::ExecutionError;
use async_trait::async_trait;
use serde_json::{Map, Value};

/// Result of a flow node behavior
#[derive(Debug, Clone, PartialEq)]
pub enum BehaviorOutcome {
    /// The step is done, the node moves on
    Completed,
    /// The step continues elsewhere; the node stays in its state with the
    /// executing flag set until it is resumed
    InProgress,
}

/// Logic run while a flow node is executing
#[async_trait]
pub trait FlowNodeBehavior: Send + Sync {
    /// Run the logic with the current process variables.
    ///
    /// Variables written to `variables` are saved on the process instance.
    async fn execute(
        &self,
        node: &FlowNodeInstance,
        variables: &mut Map<String, Value>,
    ) -> Result<BehaviorOutcome, ExecutionError>;
}

/// Runs connector implementations
#[async_trait]
pub trait ConnectorExecutor: Send + Sync {
    /// Check the evaluated inputs before execution
    async fn validate(&self, definition_id: &str, inputs: &Map<String, Value>) -> Result<(), ExecutionError>;

    /// Run the connector and return its outputs
    async fn execute(
        &self,
        definition_id: &str,
        inputs: Map<String, Value>,
    ) -> Result<Map<String, Value>, ExecutionError>;
}
