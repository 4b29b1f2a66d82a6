//! Process definition store.

use async_trait::async_trait;
use dashmap::DashMap;
use runnel_core::domain::repository::ProcessDefinitionRepository;
use runnel_core::{CoreError, ProcessDefinition, ProcessDefinitionId};
use std::sync::Arc;
use tracing::debug;

/// Deployed definitions, by id and by name
#[derive(Default)]
pub struct InMemoryDefinitionRepository {
    definitions: DashMap<ProcessDefinitionId, Arc<ProcessDefinition>>,
    latest_by_name: DashMap<String, ProcessDefinitionId>,
}

impl InMemoryDefinitionRepository {
    /// Create an empty repository
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProcessDefinitionRepository for InMemoryDefinitionRepository {
    async fn save(&self, definition: ProcessDefinition) -> Result<(), CoreError> {
        debug!(process_definition_id = %definition.id, name = %definition.name, "Process definition saved");
        self.latest_by_name.insert(definition.name.clone(), definition.id.clone());
        self.definitions.insert(definition.id.clone(), Arc::new(definition));
        Ok(())
    }

    async fn find_by_id(&self, id: &ProcessDefinitionId) -> Result<Option<Arc<ProcessDefinition>>, CoreError> {
        Ok(self.definitions.get(id).map(|entry| entry.value().clone()))
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<Arc<ProcessDefinition>>, CoreError> {
        let Some(id) = self.latest_by_name.get(name).map(|entry| entry.value().clone()) else {
            return Ok(None);
        };
        self.find_by_id(&id).await
    }
}
