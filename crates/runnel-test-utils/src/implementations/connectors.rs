//! Scripted connector executor.

use async_trait::async_trait;
use parking_lot::Mutex;
use runnel_core::{ConnectorExecutor, ExecutionError};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Scripted reaction of one connector implementation
#[derive(Debug, Clone)]
pub enum ConnectorScript {
    /// Return the given outputs
    Outputs(Map<String, Value>),
    /// Reject the inputs during validation
    RejectInputs(String),
    /// Fail while executing
    Fail(String),
}

/// Connector executor answering each definition id with its script.
///
/// Unknown definition ids fail at execution. Every validated input map is
/// kept for later inspection.
#[derive(Debug, Default)]
pub struct ScriptedConnectorExecutor {
    scripts: HashMap<String, ConnectorScript>,
    received: Mutex<Vec<(String, Map<String, Value>)>>,
}

impl ScriptedConnectorExecutor {
    /// Executor without any script
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a connector implementation
    pub fn with_script(mut self, definition_id: &str, script: ConnectorScript) -> Self {
        self.scripts.insert(definition_id.to_string(), script);
        self
    }

    /// Inputs received, with the definition id, in call order
    pub fn received(&self) -> Vec<(String, Map<String, Value>)> {
        self.received.lock().clone()
    }
}

#[async_trait]
impl ConnectorExecutor for ScriptedConnectorExecutor {
    async fn validate(&self, definition_id: &str, inputs: &Map<String, Value>) -> Result<(), ExecutionError> {
        self.received.lock().push((definition_id.to_string(), inputs.clone()));
        match self.scripts.get(definition_id) {
            Some(ConnectorScript::RejectInputs(reason)) => Err(ExecutionError::behavior(reason)),
            _ => Ok(()),
        }
    }

    async fn execute(
        &self,
        definition_id: &str,
        _inputs: Map<String, Value>,
    ) -> Result<Map<String, Value>, ExecutionError> {
        match self.scripts.get(definition_id) {
            Some(ConnectorScript::Outputs(outputs)) => Ok(outputs.clone()),
            Some(ConnectorScript::Fail(reason)) => Err(ExecutionError::behavior(reason)),
            Some(ConnectorScript::RejectInputs(_)) => Err(ExecutionError::behavior("inputs were rejected")),
            None => Err(ExecutionError::behavior(format!("No connector implementation {}", definition_id))),
        }
    }
}
