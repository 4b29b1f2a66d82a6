//! Transactional in-memory persistence.
//!
//! Writes are staged in the transaction and applied on commit. Every record
//! a transaction reads or writes is checked at commit against the version it
//! observed first; a difference aborts the commit with
//! [`CoreError::ConcurrentModification`]. Rows returned by list queries are
//! tracked like single reads; rows a query did not return are not.

use async_trait::async_trait;
use runnel_core::domain::repository::{PersistenceService, SelectListDescriptor, Transaction};
use runnel_core::CoreError;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, trace};

type RecordKey = (String, String);

struct StoredRecord {
    version: u64,
    seq: u64,
    value: Value,
}

#[derive(Default)]
struct Store {
    tables: HashMap<String, HashMap<String, StoredRecord>>,
    next_version: u64,
    next_seq: u64,
}

impl Store {
    fn record(&self, table: &str, id: &str) -> Option<&StoredRecord> {
        self.tables.get(table).and_then(|records| records.get(id))
    }

    fn version(&self, key: &RecordKey) -> Option<u64> {
        self.record(&key.0, &key.1).map(|record| record.version)
    }
}

/// Persistence service keeping every table in memory
#[derive(Clone)]
pub struct InMemoryPersistence {
    store: Arc<RwLock<Store>>,
    available: Arc<AtomicBool>,
}

impl InMemoryPersistence {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            store: Arc::new(RwLock::new(Store::default())),
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Simulate an outage: while unavailable, every call fails with
    /// [`CoreError::PersistenceUnavailable`]
    pub fn set_available(&self, available: bool) {
        debug!(available, "Persistence availability changed");
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of committed records in a table
    pub async fn count(&self, table: &str) -> usize {
        self.store.read().await.tables.get(table).map_or(0, HashMap::len)
    }

    /// Committed records of a table, in insertion order
    pub async fn records(&self, table: &str) -> Vec<Value> {
        let store = self.store.read().await;
        let mut records: Vec<&StoredRecord> = store
            .tables
            .get(table)
            .map(|records| records.values().collect())
            .unwrap_or_default();
        records.sort_by_key(|record| record.seq);
        records.into_iter().map(|record| record.value.clone()).collect()
    }
}

impl Default for InMemoryPersistence {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PersistenceService for InMemoryPersistence {
    async fn begin(&self) -> Result<Box<dyn Transaction>, CoreError> {
        check_available(&self.available)?;
        Ok(Box::new(InMemoryTransaction {
            store: self.store.clone(),
            available: self.available.clone(),
            writes: HashMap::new(),
            order: Vec::new(),
            observed: HashMap::new(),
            finished: false,
        }))
    }
}

fn check_available(available: &AtomicBool) -> Result<(), CoreError> {
    if available.load(Ordering::SeqCst) {
        Ok(())
    } else {
        Err(CoreError::PersistenceUnavailable("In-memory store is offline".to_string()))
    }
}

#[derive(Debug, Clone)]
enum Staged {
    Insert(Value),
    Update(Value),
    Delete,
}

struct InMemoryTransaction {
    store: Arc<RwLock<Store>>,
    available: Arc<AtomicBool>,
    writes: HashMap<RecordKey, Staged>,
    /// Keys in the order they were first written
    order: Vec<RecordKey>,
    /// Version seen on first access, `None` when the record did not exist
    observed: HashMap<RecordKey, Option<u64>>,
    finished: bool,
}

impl InMemoryTransaction {
    fn check_open(&self) -> Result<(), CoreError> {
        if self.finished {
            return Err(CoreError::PersistenceError("Transaction already finished".to_string()));
        }
        check_available(&self.available)
    }

    fn observe(&mut self, key: &RecordKey, store: &Store) {
        if !self.observed.contains_key(key) {
            self.observed.insert(key.clone(), store.version(key));
        }
    }

    fn stage(&mut self, key: RecordKey, write: Staged) {
        if !self.writes.contains_key(&key) {
            self.order.push(key.clone());
        }
        self.writes.insert(key, write);
    }

    /// Current value of a record as seen by this transaction
    async fn current(&mut self, key: &RecordKey) -> Option<Value> {
        match self.writes.get(key) {
            Some(Staged::Insert(value)) | Some(Staged::Update(value)) => return Some(value.clone()),
            Some(Staged::Delete) => return None,
            None => {}
        }
        let store = self.store.clone();
        let store = store.read().await;
        self.observe(key, &store);
        store.record(&key.0, &key.1).map(|record| record.value.clone())
    }

    fn reset(&mut self) {
        self.writes.clear();
        self.order.clear();
        self.observed.clear();
        self.finished = true;
    }
}

fn key(table: &str, id: &str) -> RecordKey {
    (table.to_string(), id.to_string())
}

#[async_trait]
impl Transaction for InMemoryTransaction {
    async fn insert_record(&mut self, table: &str, id: &str, record: Value) -> Result<(), CoreError> {
        self.check_open()?;
        let key = key(table, id);
        if self.current(&key).await.is_some() {
            return Err(CoreError::PersistenceError(format!("{} {} already exists", table, id)));
        }
        let write = match self.writes.get(&key) {
            // Deleted then inserted again in the same transaction
            Some(Staged::Delete) => Staged::Update(record),
            _ => Staged::Insert(record),
        };
        self.stage(key, write);
        Ok(())
    }

    async fn select_record(&mut self, table: &str, id: &str) -> Result<Option<Value>, CoreError> {
        self.check_open()?;
        Ok(self.current(&key(table, id)).await)
    }

    async fn select_records(&mut self, table: &str, query: &SelectListDescriptor) -> Result<Vec<Value>, CoreError> {
        self.check_open()?;
        let store = self.store.clone();
        let store = store.read().await;

        // (insertion order, committed version when read from the store, value)
        let mut rows: Vec<(u64, Option<(RecordKey, u64)>, Value)> = Vec::new();
        if let Some(records) = store.tables.get(table) {
            for (id, stored) in records {
                let record_key = key(table, id);
                match self.writes.get(&record_key) {
                    Some(Staged::Delete) => continue,
                    Some(Staged::Insert(value)) | Some(Staged::Update(value)) => {
                        rows.push((stored.seq, None, value.clone()));
                    }
                    None => rows.push((stored.seq, Some((record_key, stored.version)), stored.value.clone())),
                }
            }
        }
        // Records inserted by this transaction come after every committed one
        let mut pending_seq = store.next_seq;
        for staged_key in &self.order {
            if staged_key.0 != table || store.record(&staged_key.0, &staged_key.1).is_some() {
                continue;
            }
            if let Some(Staged::Insert(value)) | Some(Staged::Update(value)) = self.writes.get(staged_key) {
                rows.push((pending_seq, None, value.clone()));
                pending_seq += 1;
            }
        }
        drop(store);

        rows.sort_by_key(|(seq, _, _)| *seq);
        let mut selected = Vec::new();
        for (_, version, value) in rows
            .into_iter()
            .filter(|(_, _, value)| matches_query(value, query))
            .skip(query.start_index)
            .take(query.page_size)
        {
            if let Some((record_key, version)) = version {
                self.observed.entry(record_key).or_insert(Some(version));
            }
            selected.push(value);
        }
        trace!(query = %query.query_name, table, results = selected.len(), "Query executed");
        Ok(selected)
    }

    async fn update_record(&mut self, table: &str, id: &str, record: Value) -> Result<(), CoreError> {
        self.check_open()?;
        let key = key(table, id);
        if self.current(&key).await.is_none() {
            return Err(CoreError::EntityNotFound(format!("{} {}", table, id)));
        }
        let write = match self.writes.get(&key) {
            Some(Staged::Insert(_)) => Staged::Insert(record),
            _ => Staged::Update(record),
        };
        self.stage(key, write);
        Ok(())
    }

    async fn delete_records(&mut self, table: &str, ids: &[String]) -> Result<(), CoreError> {
        self.check_open()?;
        for id in ids {
            let key = key(table, id);
            if self.current(&key).await.is_none() {
                continue;
            }
            if let Some(Staged::Insert(_)) = self.writes.get(&key) {
                self.writes.remove(&key);
                self.order.retain(|staged| *staged != key);
            } else {
                self.stage(key, Staged::Delete);
            }
        }
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), CoreError> {
        self.check_open()?;
        let store = self.store.clone();
        let mut store = store.write().await;

        let conflict = self
            .observed
            .iter()
            .find(|(key, seen)| store.version(key) != **seen)
            .map(|(key, _)| format!("{} {} was modified by another transaction", key.0, key.1));
        if let Some(conflict) = conflict {
            self.reset();
            return Err(CoreError::ConcurrentModification(conflict));
        }

        let writes = self.order.len();
        for key in std::mem::take(&mut self.order) {
            let Some(write) = self.writes.remove(&key) else {
                continue;
            };
            store.next_version += 1;
            let version = store.next_version;
            match write {
                Staged::Insert(value) | Staged::Update(value) => {
                    let seq = match store.record(&key.0, &key.1) {
                        Some(existing) => existing.seq,
                        None => {
                            store.next_seq += 1;
                            store.next_seq
                        }
                    };
                    store
                        .tables
                        .entry(key.0)
                        .or_default()
                        .insert(key.1, StoredRecord { version, seq, value });
                }
                Staged::Delete => {
                    if let Some(records) = store.tables.get_mut(&key.0) {
                        records.remove(&key.1);
                    }
                }
            }
        }
        self.reset();
        trace!(writes, "Transaction committed");
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), CoreError> {
        if !self.writes.is_empty() {
            trace!(discarded = self.writes.len(), "Transaction rolled back");
        }
        self.reset();
        Ok(())
    }
}

/// Whether a record satisfies every criterion of a query.
///
/// Criteria are dotted paths into the record; an array criterion matches any
/// of its values and a criterion on an array field matches any element.
pub fn matches_query(record: &Value, query: &SelectListDescriptor) -> bool {
    query.parameters.iter().all(|(path, expected)| {
        let Some(actual) = lookup(record, path) else {
            return false;
        };
        match (expected, actual) {
            (Value::Array(candidates), _) => candidates.iter().any(|candidate| candidate == actual),
            (_, Value::Array(elements)) => elements.iter().any(|element| element == expected),
            _ => actual == expected,
        }
    })
}

fn lookup<'a>(record: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(record, |value, segment| value.get(segment))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn insert_committed(persistence: &InMemoryPersistence, table: &str, id: &str, record: Value) {
        let mut tx = persistence.begin().await.unwrap();
        tx.insert_record(table, id, record).await.unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_writes_are_visible_after_commit_only() {
        let persistence = InMemoryPersistence::new();
        let mut writer = persistence.begin().await.unwrap();
        writer.insert_record("node", "n-1", json!({"id": "n-1"})).await.unwrap();

        // Read-your-writes
        assert!(writer.select_record("node", "n-1").await.unwrap().is_some());

        let mut reader = persistence.begin().await.unwrap();
        assert!(reader.select_record("node", "n-1").await.unwrap().is_none());

        writer.commit().await.unwrap();
        let mut reader = persistence.begin().await.unwrap();
        assert_eq!(
            reader.select_record("node", "n-1").await.unwrap(),
            Some(json!({"id": "n-1"}))
        );
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let persistence = InMemoryPersistence::new();
        let mut tx = persistence.begin().await.unwrap();
        tx.insert_record("node", "n-1", json!({"id": "n-1"})).await.unwrap();
        tx.rollback().await.unwrap();

        assert_eq!(persistence.count("node").await, 0);
    }

    #[tokio::test]
    async fn test_racing_updates_only_one_commits() {
        let persistence = InMemoryPersistence::new();
        insert_committed(&persistence, "node", "n-1", json!({"id": "n-1", "state": 0})).await;

        let mut first = persistence.begin().await.unwrap();
        let mut second = persistence.begin().await.unwrap();
        first.select_record("node", "n-1").await.unwrap();
        second.select_record("node", "n-1").await.unwrap();
        first.update_record("node", "n-1", json!({"id": "n-1", "state": 1})).await.unwrap();
        second.update_record("node", "n-1", json!({"id": "n-1", "state": 2})).await.unwrap();

        first.commit().await.unwrap();
        let result = second.commit().await;
        assert!(matches!(result, Err(CoreError::ConcurrentModification(_))));
        assert_eq!(persistence.records("node").await, vec![json!({"id": "n-1", "state": 1})]);
    }

    #[tokio::test]
    async fn test_stale_read_aborts_commit() {
        let persistence = InMemoryPersistence::new();
        insert_committed(&persistence, "node", "container", json!({"id": "container"})).await;

        let mut reader = persistence.begin().await.unwrap();
        reader.select_record("node", "container").await.unwrap();
        reader.insert_record("node", "child", json!({"id": "child"})).await.unwrap();

        let mut writer = persistence.begin().await.unwrap();
        writer.update_record("node", "container", json!({"id": "container", "touched": true})).await.unwrap();
        writer.commit().await.unwrap();

        assert!(matches!(
            reader.commit().await,
            Err(CoreError::ConcurrentModification(_))
        ));
        assert_eq!(persistence.count("node").await, 1);
    }

    #[tokio::test]
    async fn test_rows_read_by_query_abort_a_stale_commit() {
        let persistence = InMemoryPersistence::new();
        insert_committed(&persistence, "node", "n-1", json!({"id": "n-1", "state": "Waiting"})).await;
        let query = SelectListDescriptor::new("getAllFlowNodes");

        let mut interrupter = persistence.begin().await.unwrap();
        let rows = interrupter.select_records("node", &query).await.unwrap();
        assert_eq!(rows.len(), 1);

        let mut completer = persistence.begin().await.unwrap();
        completer.select_records("node", &query).await.unwrap();
        completer
            .update_record("node", "n-1", json!({"id": "n-1", "state": "Completed"}))
            .await
            .unwrap();
        completer.commit().await.unwrap();

        interrupter
            .update_record("node", "n-1", json!({"id": "n-1", "state": "Aborting"}))
            .await
            .unwrap();
        assert!(matches!(
            interrupter.commit().await,
            Err(CoreError::ConcurrentModification(_))
        ));
        assert_eq!(
            persistence.records("node").await,
            vec![json!({"id": "n-1", "state": "Completed"})]
        );
    }

    #[tokio::test]
    async fn test_rows_outside_the_page_are_not_tracked() {
        let persistence = InMemoryPersistence::new();
        insert_committed(&persistence, "node", "a", json!({"id": "a"})).await;
        insert_committed(&persistence, "node", "b", json!({"id": "b"})).await;

        let mut reader = persistence.begin().await.unwrap();
        let page = reader
            .select_records("node", &SelectListDescriptor::new("getAllFlowNodes").paged(0, 1))
            .await
            .unwrap();
        assert_eq!(page, vec![json!({"id": "a"})]);
        reader.insert_record("node", "c", json!({"id": "c"})).await.unwrap();

        let mut writer = persistence.begin().await.unwrap();
        writer.update_record("node", "b", json!({"id": "b", "touched": true})).await.unwrap();
        writer.commit().await.unwrap();

        reader.commit().await.unwrap();
        assert_eq!(persistence.count("node").await, 3);
    }

    #[tokio::test]
    async fn test_duplicate_insert_is_rejected() {
        let persistence = InMemoryPersistence::new();
        insert_committed(&persistence, "node", "n-1", json!({"id": "n-1"})).await;

        let mut tx = persistence.begin().await.unwrap();
        let result = tx.insert_record("node", "n-1", json!({"id": "n-1"})).await;
        assert!(matches!(result, Err(CoreError::PersistenceError(_))));
    }

    #[tokio::test]
    async fn test_update_of_missing_record_fails() {
        let persistence = InMemoryPersistence::new();
        let mut tx = persistence.begin().await.unwrap();
        let result = tx.update_record("node", "ghost", json!({})).await;
        assert!(matches!(result, Err(CoreError::EntityNotFound(_))));
    }

    #[tokio::test]
    async fn test_query_matches_nested_fields_in_insertion_order() {
        let persistence = InMemoryPersistence::new();
        for (id, container) in [("a", "p-1"), ("b", "p-2"), ("c", "p-1")] {
            insert_committed(
                &persistence,
                "node",
                id,
                json!({"id": id, "container": {"kind": "ProcessInstance", "id": container}}),
            )
            .await;
        }

        let mut tx = persistence.begin().await.unwrap();
        tx.insert_record("node", "d", json!({"id": "d", "container": {"kind": "ProcessInstance", "id": "p-1"}}))
            .await
            .unwrap();
        tx.delete_records("node", &["a".to_string()]).await.unwrap();

        let query = SelectListDescriptor::new("getFlowNodesOfContainer").with_parameter("container.id", "p-1");
        let ids: Vec<Value> = tx
            .select_records("node", &query)
            .await
            .unwrap()
            .into_iter()
            .map(|record| record["id"].clone())
            .collect();
        assert_eq!(ids, vec![json!("c"), json!("d")]);

        let page = tx.select_records("node", &query.clone().paged(1, 1)).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0]["id"], json!("d"));
    }

    #[test]
    fn test_array_criterion_matches_any_value() {
        let record = json!({"flow_node_instance_id": "n-2", "tags": ["x", "y"]});
        let any_of = SelectListDescriptor::new("q").with_parameter("flow_node_instance_id", json!(["n-1", "n-2"]));
        let member = SelectListDescriptor::new("q").with_parameter("tags", "y");
        let missing = SelectListDescriptor::new("q").with_parameter("state", "ready");

        assert!(matches_query(&record, &any_of));
        assert!(matches_query(&record, &member));
        assert!(!matches_query(&record, &missing));
    }

    #[tokio::test]
    async fn test_outage_fails_every_call() {
        let persistence = InMemoryPersistence::new();
        let mut tx = persistence.begin().await.unwrap();
        tx.insert_record("node", "n-1", json!({"id": "n-1"})).await.unwrap();

        persistence.set_available(false);
        assert!(matches!(tx.commit().await, Err(CoreError::PersistenceUnavailable(_))));
        assert!(matches!(persistence.begin().await, Err(CoreError::PersistenceUnavailable(_))));
        tx.rollback().await.unwrap();

        persistence.set_available(true);
        assert!(persistence.begin().await.is_ok());
        assert_eq!(persistence.count("node").await, 0);
    }
}
