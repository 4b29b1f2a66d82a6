//! In-memory backend for the Runnel engine
//!
//! This crate provides in-memory implementations of the collaborator
//! contracts defined in runnel-core: transactional persistence, archive
//! storage, the work queue and the process definition store. It is meant for
//! development, tests and embedded deployments where durability across
//! restarts is not required.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod archive;
pub mod definitions;
pub mod persistence;
pub mod queue;

pub use archive::{DeleteQuery, InMemoryArchive};
pub use definitions::InMemoryDefinitionRepository;
pub use persistence::InMemoryPersistence;
pub use queue::InMemoryWorkQueue;

use runnel_core::{EngineBuilder, EngineConfig};
use std::sync::Arc;

/// Provider sharing one set of in-memory collaborators
#[derive(Clone, Default)]
pub struct InMemoryBackend {
    /// Persistence service, also holding the archive tables
    pub persistence: Arc<InMemoryPersistence>,
    /// Archive service
    pub archive: Arc<InMemoryArchive>,
    /// Work queue
    pub queue: Arc<InMemoryWorkQueue>,
    /// Deployed definitions
    pub definitions: Arc<InMemoryDefinitionRepository>,
}

impl InMemoryBackend {
    /// Create a new empty backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine builder wired to this backend
    pub fn engine_builder(&self, config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(config)
            .persistence(self.persistence.clone())
            .archive(self.archive.clone())
            .queue(self.queue.clone())
            .definitions(self.definitions.clone())
    }
}
