//! Flow node behaviors for tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use runnel_core::{BehaviorOutcome, ExecutionError, FlowNodeBehavior, FlowNodeInstance};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Writes one variable and completes
#[derive(Debug, Clone)]
pub struct SetVariableBehavior {
    name: String,
    value: Value,
}

impl SetVariableBehavior {
    /// Behavior writing `value` to `name`
    pub fn new(name: &str, value: Value) -> Self {
        Self {
            name: name.to_string(),
            value,
        }
    }
}

#[async_trait]
impl FlowNodeBehavior for SetVariableBehavior {
    async fn execute(
        &self,
        _node: &FlowNodeInstance,
        variables: &mut Map<String, Value>,
    ) -> Result<BehaviorOutcome, ExecutionError> {
        variables.insert(self.name.clone(), self.value.clone());
        Ok(BehaviorOutcome::Completed)
    }
}

/// Fails every call with a behavior error
#[derive(Debug, Clone)]
pub struct FailingBehavior {
    message: String,
}

impl FailingBehavior {
    /// Behavior failing with `message`
    pub fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

#[async_trait]
impl FlowNodeBehavior for FailingBehavior {
    async fn execute(
        &self,
        _node: &FlowNodeInstance,
        _variables: &mut Map<String, Value>,
    ) -> Result<BehaviorOutcome, ExecutionError> {
        Err(ExecutionError::behavior(&self.message))
    }
}

/// Leaves the step in progress, counting the calls
#[derive(Debug, Default)]
pub struct InProgressBehavior {
    calls: AtomicUsize,
}

impl InProgressBehavior {
    /// New behavior
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times the step was started
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FlowNodeBehavior for InProgressBehavior {
    async fn execute(
        &self,
        _node: &FlowNodeInstance,
        _variables: &mut Map<String, Value>,
    ) -> Result<BehaviorOutcome, ExecutionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(BehaviorOutcome::InProgress)
    }
}

/// Records the names of the nodes it ran for, then completes.
///
/// One recorder can be shared by several flow node definitions to observe
/// execution order.
#[derive(Debug, Clone, Default)]
pub struct RecordingBehavior {
    executed: Arc<Mutex<Vec<String>>>,
}

impl RecordingBehavior {
    /// New recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of the executed nodes, in execution order
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().clone()
    }
}

#[async_trait]
impl FlowNodeBehavior for RecordingBehavior {
    async fn execute(
        &self,
        node: &FlowNodeInstance,
        _variables: &mut Map<String, Value>,
    ) -> Result<BehaviorOutcome, ExecutionError> {
        self.executed.lock().push(node.name.clone());
        Ok(BehaviorOutcome::Completed)
    }
}
