//! Contracts of the collaborators the execution core runs against:
//! transactional persistence, archive storage, the work queue and the
//! process definition store.

use crate::domain::definition::ProcessDefinition;
use crate::domain::failure::{ArchivedBpmFailure, BpmFailure};
use crate::domain::flow_node::{ArchivedFlowNodeInstance, FlowNodeInstance, ProcessInstance};
use crate::domain::message::{MessageInstance, WaitingEvent};
use crate::domain::platform::Tenant;
use crate::domain::work::WorkDescriptor;
use crate::error::CoreError;
use crate::types::{ProcessDefinitionId, WorkId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Named queries used by the core
pub mod queries {
    /// Failures of a flow node
    pub const GET_FLOW_NODE_FAILURES: &str = "getFlowNodeFailures";
    /// Archived failures of a flow node
    pub const GET_ARCHIVED_FLOW_NODE_FAILURES: &str = "getArchivedFlowNodeFailures";
    /// Delete archived failures of several flow nodes
    pub const DELETE_ARCHIVED_FAILURES_BY_FLOW_NODE_IDS: &str =
        "deleteArchivedBPMFailuresByFlowNodeInstanceIds";
    /// Flow nodes owned by a container
    pub const GET_FLOW_NODES_OF_CONTAINER: &str = "getFlowNodesOfContainer";
    /// Flow nodes of a process instance
    pub const GET_FLOW_NODES_OF_PROCESS_INSTANCE: &str = "getFlowNodesOfProcessInstance";
    /// Every flow node
    pub const GET_ALL_FLOW_NODES: &str = "getAllFlowNodes";
    /// Boundary events attached to an activity
    pub const GET_BOUNDARY_EVENTS_OF_ACTIVITY: &str = "getBoundaryEventsOfActivity";
    /// Waiting events owned by a flow node
    pub const GET_WAITING_EVENTS_OF_FLOW_NODE: &str = "getWaitingEventsOfFlowNode";
    /// Waiting events of a given kind registered by a process instance
    pub const GET_WAITING_EVENTS_OF_PROCESS_INSTANCE: &str = "getWaitingEventsOfProcessInstance";
    /// Waiting events not yet assigned to a message
    pub const GET_UNLOCKED_WAITING_EVENTS: &str = "getUnlockedWaitingEvents";
    /// Waiting events assigned to a message but not delivered yet
    pub const GET_LOCKED_WAITING_EVENTS: &str = "getLockedWaitingEvents";
    /// Messages not yet assigned to a waiting event
    pub const GET_UNHANDLED_MESSAGES: &str = "getUnhandledMessages";
    /// Converging gateway of a container waiting for tokens
    pub const GET_ACTIVE_GATEWAY: &str = "getActiveGatewayOfContainer";
    /// Default tenant
    pub const GET_DEFAULT_TENANT: &str = "getDefaultTenant";
}

/// Record type stored by the persistence service
pub trait Entity: Serialize + DeserializeOwned + Send + Sync {
    /// Table holding the records
    const TABLE: &'static str;

    /// Identifier of the record
    fn entity_id(&self) -> String;
}

macro_rules! entity {
    ($type:ty, $table:literal) => {
        impl Entity for $type {
            const TABLE: &'static str = $table;

            fn entity_id(&self) -> String {
                self.id.to_string()
            }
        }
    };
}

entity!(FlowNodeInstance, "flow_node_instance");
entity!(ArchivedFlowNodeInstance, "arch_flow_node_instance");
entity!(ProcessInstance, "process_instance");
entity!(WaitingEvent, "waiting_event");
entity!(MessageInstance, "message_instance");
entity!(BpmFailure, "bpm_failure");
entity!(ArchivedBpmFailure, "arch_bpm_failure");
entity!(Tenant, "tenant");

/// Criteria of a list query.
///
/// Parameters are matched against record fields (dotted paths reach nested
/// fields); an array parameter matches any of its values.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectListDescriptor {
    /// Query name
    pub query_name: String,
    /// Field criteria
    pub parameters: BTreeMap<String, Value>,
    /// First record returned
    pub start_index: usize,
    /// Maximum number of records returned
    pub page_size: usize,
}

impl SelectListDescriptor {
    /// Query returning every matching record
    pub fn new(query_name: &str) -> Self {
        Self {
            query_name: query_name.to_string(),
            parameters: BTreeMap::new(),
            start_index: 0,
            page_size: usize::MAX,
        }
    }

    /// Add a field criterion
    pub fn with_parameter(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.parameters.insert(field.to_string(), value.into());
        self
    }

    /// Restrict to one page
    pub fn paged(mut self, start_index: usize, page_size: usize) -> Self {
        self.start_index = start_index;
        self.page_size = page_size;
        self
    }
}

/// Unit of work against the persistence service.
///
/// Writes are only visible to other transactions after [`commit`]. A
/// transaction reads its own writes. Committing fails with
/// [`CoreError::ConcurrentModification`] when a record this transaction read
/// was changed by another one in the meantime.
///
/// [`commit`]: Transaction::commit
#[async_trait]
pub trait Transaction: Send {
    /// Insert a new record
    async fn insert_record(&mut self, table: &str, id: &str, record: Value) -> Result<(), CoreError>;

    /// Read a record by id
    async fn select_record(&mut self, table: &str, id: &str) -> Result<Option<Value>, CoreError>;

    /// Read records matching a query, in insertion order
    async fn select_records(
        &mut self,
        table: &str,
        query: &SelectListDescriptor,
    ) -> Result<Vec<Value>, CoreError>;

    /// Replace an existing record
    async fn update_record(&mut self, table: &str, id: &str, record: Value) -> Result<(), CoreError>;

    /// Delete records by id, missing ones are ignored
    async fn delete_records(&mut self, table: &str, ids: &[String]) -> Result<(), CoreError>;

    /// Make every write durable and visible
    async fn commit(&mut self) -> Result<(), CoreError>;

    /// Discard every write
    async fn rollback(&mut self) -> Result<(), CoreError>;
}

impl<'a> dyn Transaction + 'a {
    /// Insert an entity
    pub async fn insert<E: Entity>(&mut self, entity: &E) -> Result<(), CoreError> {
        let record = serde_json::to_value(entity)?;
        self.insert_record(E::TABLE, &entity.entity_id(), record).await
    }

    /// Read an entity by id
    pub async fn select_one<E: Entity>(&mut self, id: &str) -> Result<Option<E>, CoreError> {
        match self.select_record(E::TABLE, id).await? {
            Some(record) => Ok(Some(serde_json::from_value(record)?)),
            None => Ok(None),
        }
    }

    /// Read an entity that must exist
    pub async fn get<E: Entity>(&mut self, id: &str) -> Result<E, CoreError> {
        self.select_one(id)
            .await?
            .ok_or_else(|| CoreError::EntityNotFound(format!("{} {}", E::TABLE, id)))
    }

    /// Read entities matching a query
    pub async fn select_list<E: Entity>(&mut self, query: &SelectListDescriptor) -> Result<Vec<E>, CoreError> {
        self.select_records(E::TABLE, query)
            .await?
            .into_iter()
            .map(|record| serde_json::from_value(record).map_err(CoreError::from))
            .collect()
    }

    /// Replace an entity
    pub async fn update<E: Entity>(&mut self, entity: &E) -> Result<(), CoreError> {
        let record = serde_json::to_value(entity)?;
        self.update_record(E::TABLE, &entity.entity_id(), record).await
    }

    /// Delete entities by id
    pub async fn delete<E: Entity>(&mut self, ids: &[String]) -> Result<(), CoreError> {
        self.delete_records(E::TABLE, ids).await
    }
}

/// Opens transactions
#[async_trait]
pub trait PersistenceService: Send + Sync {
    /// Begin a new transaction
    async fn begin(&self) -> Result<Box<dyn Transaction>, CoreError>;
}

/// Record written to archive storage
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveInsertRecord {
    /// Archive table
    pub table: &'static str,
    /// Identifier of the archived record
    pub id: String,
    /// Archived record
    pub record: Value,
}

impl ArchiveInsertRecord {
    /// Archive record for an entity
    pub fn new<E: Entity>(entity: &E) -> Result<Self, CoreError> {
        Ok(Self {
            table: E::TABLE,
            id: entity.entity_id(),
            record: serde_json::to_value(entity)?,
        })
    }
}

/// Archive storage, written in the caller's transaction
#[async_trait]
pub trait ArchiveService: Send + Sync {
    /// Archive records at the given date
    async fn record_inserts(
        &self,
        tx: &mut dyn Transaction,
        archive_date: DateTime<Utc>,
        records: Vec<ArchiveInsertRecord>,
    ) -> Result<(), CoreError>;

    /// Delete archived records through a named query
    async fn delete_from_query(
        &self,
        tx: &mut dyn Transaction,
        query_name: &str,
        parameters: BTreeMap<String, Value>,
    ) -> Result<(), CoreError>;
}

/// Durable queue of work descriptors with at-least-once delivery.
///
/// A dequeued descriptor stays owned by the queue until acknowledged; the
/// unacknowledged ones are handed out again by
/// [`recover_unacknowledged`](WorkQueue::recover_unacknowledged).
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Add a descriptor
    async fn enqueue(&self, work: WorkDescriptor) -> Result<(), CoreError>;

    /// Wait for the next descriptor
    async fn dequeue(&self) -> Result<WorkDescriptor, CoreError>;

    /// Next descriptor, if one is available
    async fn try_dequeue(&self) -> Result<Option<WorkDescriptor>, CoreError>;

    /// Mark a descriptor as done
    async fn acknowledge(&self, work_id: &WorkId) -> Result<(), CoreError>;

    /// Put every unacknowledged recoverable descriptor back in the queue
    async fn recover_unacknowledged(&self) -> Result<usize, CoreError>;

    /// Number of descriptors waiting to be dequeued
    async fn pending(&self) -> Result<usize, CoreError>;
}

/// Store of deployed process definitions
#[async_trait]
pub trait ProcessDefinitionRepository: Send + Sync {
    /// Save a definition
    async fn save(&self, definition: ProcessDefinition) -> Result<(), CoreError>;

    /// Definition by id
    async fn find_by_id(&self, id: &ProcessDefinitionId) -> Result<Option<Arc<ProcessDefinition>>, CoreError>;

    /// Latest definition deployed under a name
    async fn find_by_name(&self, name: &str) -> Result<Option<Arc<ProcessDefinition>>, CoreError>;
}
