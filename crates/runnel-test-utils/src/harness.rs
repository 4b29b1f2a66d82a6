//! Engine harness on the in-memory backend.

use runnel_core::domain::flow_node::ArchivedFlowNodeInstance;
use runnel_core::{
    ConnectorExecutor, CoreError, Engine, EngineBuilder, EngineConfig, FlowNodeBehavior, FlowNodeInstance,
    MessageInstance, ProcessDefinition, ProcessDefinitionId, ProcessInstance, ProcessInstanceId, WaitingEvent,
};
use runnel_state_inmemory::InMemoryBackend;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::util::wait_until;

/// Configuration used by the harness: a single worker, no recovery scan on
/// start and short retry delays
pub fn test_config() -> EngineConfig {
    EngineConfig {
        worker_count: 1,
        retry_delay_ms: 10,
        recover_on_startup: false,
        ..EngineConfig::default()
    }
}

/// Builds a [`TestEngine`]
pub struct TestEngineBuilder {
    backend: InMemoryBackend,
    builder: EngineBuilder,
}

impl TestEngineBuilder {
    /// Register a flow node behavior
    pub fn behavior(mut self, flow_node_definition_id: &str, behavior: Arc<dyn FlowNodeBehavior>) -> Self {
        self.builder = self.builder.behavior(flow_node_definition_id, behavior);
        self
    }

    /// Set the connector executor
    pub fn connectors(mut self, connectors: Arc<dyn ConnectorExecutor>) -> Self {
        self.builder = self.builder.connectors(connectors);
        self
    }

    /// Build the engine
    pub fn build(self) -> Result<TestEngine, CoreError> {
        runnel_monitoring::init_test_tracing();
        Ok(TestEngine {
            engine: self.builder.build()?,
            backend: self.backend,
        })
    }
}

/// Engine wired on an in-memory backend the test can inspect
pub struct TestEngine {
    /// Engine under test
    pub engine: Engine,
    /// Collaborators the engine was built with
    pub backend: InMemoryBackend,
}

impl TestEngine {
    /// Builder with the harness configuration
    pub fn builder() -> TestEngineBuilder {
        Self::builder_with_config(test_config())
    }

    /// Builder with a custom configuration
    pub fn builder_with_config(config: EngineConfig) -> TestEngineBuilder {
        let backend = InMemoryBackend::new();
        let builder = backend.engine_builder(config);
        TestEngineBuilder { backend, builder }
    }

    /// Engine without behaviors nor connectors
    pub fn new() -> Result<Self, CoreError> {
        Self::builder().build()
    }

    /// Deploy a definition and run the work it scheduled
    pub async fn deploy(&self, definition: ProcessDefinition) -> Result<ProcessDefinitionId, CoreError> {
        let id = self.engine.deploy(definition).await?;
        self.engine.run_until_idle().await?;
        Ok(id)
    }

    /// Start a process instance and run it until no work is left
    pub async fn start(
        &self,
        process_definition_id: &ProcessDefinitionId,
        variables: Map<String, Value>,
    ) -> Result<ProcessInstanceId, CoreError> {
        let id = self.engine.start_process(process_definition_id, variables).await?;
        let processed = self.engine.run_until_idle().await?;
        debug!(process_instance_id = %id, processed, "Process instance ran until idle");
        Ok(id)
    }

    /// Send a message and run until no work is left
    pub async fn send(&self, message: MessageInstance) -> Result<(), CoreError> {
        self.engine.send_message(message).await?;
        self.engine.run_until_idle().await?;
        Ok(())
    }

    /// Process instance that must exist
    pub async fn process_instance(&self, id: &ProcessInstanceId) -> Result<ProcessInstance, CoreError> {
        self.engine
            .get_process_instance(id)
            .await?
            .ok_or_else(|| CoreError::EntityNotFound(format!("process instance {}", id)))
    }

    /// Every process instance, in creation order
    pub async fn process_instances(&self) -> Result<Vec<ProcessInstance>, CoreError> {
        self.records("process_instance").await
    }

    /// Live flow nodes of a process instance
    pub async fn flow_nodes(&self, id: &ProcessInstanceId) -> Result<Vec<FlowNodeInstance>, CoreError> {
        self.engine.get_flow_nodes(id).await
    }

    /// Live flow node of a process instance by name
    pub async fn flow_node(&self, id: &ProcessInstanceId, name: &str) -> Result<FlowNodeInstance, CoreError> {
        self.flow_nodes(id)
            .await?
            .into_iter()
            .find(|node| node.name == name)
            .ok_or_else(|| CoreError::EntityNotFound(format!("flow node {} of {}", name, id)))
    }

    /// Archived flow nodes of a process instance, in archiving order
    pub async fn archived_flow_nodes(&self, id: &ProcessInstanceId) -> Result<Vec<ArchivedFlowNodeInstance>, CoreError> {
        let archived: Vec<ArchivedFlowNodeInstance> = self.records("arch_flow_node_instance").await?;
        Ok(archived
            .into_iter()
            .filter(|node| &node.parent_process_instance_id == id)
            .collect())
    }

    /// Names of the archived flow nodes of a process instance
    pub async fn archived_names(&self, id: &ProcessInstanceId) -> Result<Vec<String>, CoreError> {
        Ok(self
            .archived_flow_nodes(id)
            .await?
            .into_iter()
            .map(|node| node.name)
            .collect())
    }

    /// Every waiting event
    pub async fn waiting_events(&self) -> Result<Vec<WaitingEvent>, CoreError> {
        self.records("waiting_event").await
    }

    /// Start the workers and wait until `id` is finished
    pub async fn wait_for_completion(&self, id: &ProcessInstanceId, timeout: Duration) -> Result<bool, CoreError> {
        self.engine.start_workers().await?;
        let finished = wait_until(timeout, move || async move {
            matches!(self.engine.get_process_instance(id).await, Ok(Some(pi)) if pi.state.is_terminal())
        })
        .await;
        Ok(finished)
    }

    async fn records<T: DeserializeOwned>(&self, table: &str) -> Result<Vec<T>, CoreError> {
        self.backend
            .persistence
            .records(table)
            .await
            .into_iter()
            .map(|record| serde_json::from_value(record).map_err(CoreError::from))
            .collect()
    }
}
