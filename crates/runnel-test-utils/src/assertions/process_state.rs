//! Assertions on process instances and their flow nodes.

use runnel_core::{FlowNodeInstance, FlowNodeState, ProcessInstance, ProcessInstanceState};
use serde_json::Value;
use thiserror::Error;

/// Error type for process state validation failures
#[derive(Debug, Error)]
pub enum ProcessStateValidationError {
    #[error("Invalid process instance state: expected {expected:?}, got {actual:?}")]
    InvalidProcessState {
        expected: ProcessInstanceState,
        actual: ProcessInstanceState,
    },

    #[error("Missing variable: {0}")]
    MissingVariable(String),

    #[error("Invalid value for variable {name}: expected {expected}, got {actual}")]
    InvalidVariableValue { name: String, expected: Value, actual: Value },

    #[error("Flow node {0} not found")]
    MissingFlowNode(String),

    #[error("Invalid state for flow node {name}: expected {expected}, got {actual}")]
    InvalidFlowNodeState {
        name: String,
        expected: FlowNodeState,
        actual: FlowNodeState,
    },

    #[error("Unexpected live flow nodes: {0:?}")]
    UnexpectedFlowNodes(Vec<String>),
}

/// Asserts that a process instance is in the expected state
pub fn assert_process_state(
    instance: &ProcessInstance,
    expected: ProcessInstanceState,
) -> Result<(), ProcessStateValidationError> {
    if instance.state != expected {
        return Err(ProcessStateValidationError::InvalidProcessState {
            expected,
            actual: instance.state,
        });
    }
    Ok(())
}

/// Asserts that a process variable holds the expected value
pub fn assert_variable(
    instance: &ProcessInstance,
    name: &str,
    expected: Value,
) -> Result<(), ProcessStateValidationError> {
    let actual = instance
        .variables
        .get(name)
        .ok_or_else(|| ProcessStateValidationError::MissingVariable(name.to_string()))?;
    if *actual != expected {
        return Err(ProcessStateValidationError::InvalidVariableValue {
            name: name.to_string(),
            expected,
            actual: actual.clone(),
        });
    }
    Ok(())
}

/// Finds the live flow node named `name` and checks its state
pub fn assert_flow_node_state<'a>(
    nodes: &'a [FlowNodeInstance],
    name: &str,
    expected: FlowNodeState,
) -> Result<&'a FlowNodeInstance, ProcessStateValidationError> {
    let node = nodes
        .iter()
        .find(|n| n.name == name)
        .ok_or_else(|| ProcessStateValidationError::MissingFlowNode(name.to_string()))?;
    if node.state() != expected {
        return Err(ProcessStateValidationError::InvalidFlowNodeState {
            name: name.to_string(),
            expected,
            actual: node.state(),
        });
    }
    Ok(node)
}

/// Asserts that no flow node is left
pub fn assert_no_flow_nodes(nodes: &[FlowNodeInstance]) -> Result<(), ProcessStateValidationError> {
    if !nodes.is_empty() {
        return Err(ProcessStateValidationError::UnexpectedFlowNodes(
            nodes.iter().map(|n| format!("{} ({})", n.name, n.state())).collect(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn process_instance() -> ProcessInstance {
        serde_json::from_value(json!({
            "id": "pi-1",
            "name": "Process",
            "process_definition_id": "p1",
            "state": "Started",
            "variables": {"amount": 120},
            "started_at": "2024-01-01T00:00:00Z",
            "ended_at": null,
            "interrupted": false
        }))
        .unwrap()
    }

    #[test]
    fn test_process_state_mismatch_is_reported() {
        let instance = process_instance();
        assert_process_state(&instance, ProcessInstanceState::Started).unwrap();

        let error = assert_process_state(&instance, ProcessInstanceState::Completed).unwrap_err();
        assert!(matches!(error, ProcessStateValidationError::InvalidProcessState { .. }));
    }

    #[test]
    fn test_variable_assertions() {
        let instance = process_instance();
        assert_variable(&instance, "amount", json!(120)).unwrap();
        assert!(matches!(
            assert_variable(&instance, "amount", json!(5)),
            Err(ProcessStateValidationError::InvalidVariableValue { .. })
        ));
        assert!(matches!(
            assert_variable(&instance, "customer", json!("x")),
            Err(ProcessStateValidationError::MissingVariable(_))
        ));
    }

    #[test]
    fn test_no_flow_nodes() {
        assert_no_flow_nodes(&[]).unwrap();
        assert!(matches!(
            assert_flow_node_state(&[], "task", FlowNodeState::Executing),
            Err(ProcessStateValidationError::MissingFlowNode(_))
        ));
    }
}
