//! Archive storage sharing the persistence transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use runnel_core::domain::repository::{queries, ArchiveInsertRecord, ArchiveService, SelectListDescriptor, Transaction};
use runnel_core::CoreError;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Delete query: records of `table` whose `field` is one of the values of
/// the `parameter` list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteQuery {
    /// Archive table
    pub table: &'static str,
    /// Query parameter holding the values
    pub parameter: &'static str,
    /// Record field compared with the values
    pub field: &'static str,
}

/// Archive writing into the same in-memory tables as the persistence service
pub struct InMemoryArchive {
    delete_queries: HashMap<&'static str, DeleteQuery>,
}

impl InMemoryArchive {
    /// Archive knowing the delete queries of the engine
    pub fn new() -> Self {
        Self::empty().with_delete_query(
            queries::DELETE_ARCHIVED_FAILURES_BY_FLOW_NODE_IDS,
            DeleteQuery {
                table: "arch_bpm_failure",
                parameter: "flowNodeInstanceIds",
                field: "flow_node_instance_id",
            },
        )
    }

    /// Archive without any delete query
    pub fn empty() -> Self {
        Self {
            delete_queries: HashMap::new(),
        }
    }

    /// Register a delete query
    pub fn with_delete_query(mut self, name: &'static str, query: DeleteQuery) -> Self {
        self.delete_queries.insert(name, query);
        self
    }
}

impl Default for InMemoryArchive {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ArchiveService for InMemoryArchive {
    async fn record_inserts(
        &self,
        tx: &mut dyn Transaction,
        archive_date: DateTime<Utc>,
        records: Vec<ArchiveInsertRecord>,
    ) -> Result<(), CoreError> {
        let count = records.len();
        for record in records {
            tx.insert_record(record.table, &record.id, record.record).await?;
        }
        debug!(records = count, archive_date = %archive_date, "Records archived");
        Ok(())
    }

    async fn delete_from_query(
        &self,
        tx: &mut dyn Transaction,
        query_name: &str,
        parameters: BTreeMap<String, Value>,
    ) -> Result<(), CoreError> {
        let query = self
            .delete_queries
            .get(query_name)
            .ok_or_else(|| CoreError::PersistenceError(format!("Unknown archive delete query {}", query_name)))?;
        let values = match parameters.get(query.parameter) {
            Some(Value::Array(values)) => values.clone(),
            Some(value) => vec![value.clone()],
            None => {
                return Err(CoreError::PersistenceError(format!(
                    "Missing parameter {} for {}",
                    query.parameter, query_name
                )))
            }
        };
        if values.is_empty() {
            return Ok(());
        }

        let selection = SelectListDescriptor::new(query_name).with_parameter(query.field, Value::Array(values));
        let ids: Vec<String> = tx
            .select_records(query.table, &selection)
            .await?
            .iter()
            .filter_map(|record| record.get("id").and_then(Value::as_str).map(str::to_string))
            .collect();
        if !ids.is_empty() {
            tx.delete_records(query.table, &ids).await?;
        }
        debug!(query = query_name, deleted = ids.len(), "Archived records deleted");
        Ok(())
    }
}
