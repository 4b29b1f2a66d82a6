//! Declarative rules applied to every engine API operation.

use crate::error::CoreError;
use dashmap::DashMap;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{trace, warn};

/// Engine API operation names
pub mod operations {
    /// Deploy a process definition
    pub const DEPLOY: &str = "deploy";
    /// Start a process instance
    pub const START_PROCESS: &str = "start_process";
    /// Send a message
    pub const SEND_MESSAGE: &str = "send_message";
    /// Cancel a flow node
    pub const CANCEL_FLOW_NODE: &str = "cancel_flow_node";
    /// Abort a flow node
    pub const ABORT_FLOW_NODE: &str = "abort_flow_node";
    /// Cancel a process instance
    pub const CANCEL_PROCESS_INSTANCE: &str = "cancel_process_instance";
    /// Complete the in-progress step of a flow node
    pub const RESUME_FLOW_NODE: &str = "resume_flow_node";
    /// Former name of [`RESUME_FLOW_NODE`]
    pub const EXECUTE_FLOW_NODE: &str = "execute_flow_node";
    /// Read a flow node
    pub const GET_FLOW_NODE: &str = "get_flow_node";
    /// Read a process instance
    pub const GET_PROCESS_INSTANCE: &str = "get_process_instance";
    /// Read the failures of a flow node
    pub const GET_FLOW_NODE_FAILURES: &str = "get_flow_node_failures";
    /// Read the archived failures of a flow node
    pub const GET_ARCHIVED_FLOW_NODE_FAILURES: &str = "get_archived_flow_node_failures";
    /// Run queued work until the queue is empty
    pub const RUN_UNTIL_IDLE: &str = "run_until_idle";
    /// Recovery scan
    pub const RECOVER: &str = "recover";
    /// Pause the tenant
    pub const PAUSE: &str = "pause";
    /// Resume the tenant
    pub const RESUME: &str = "resume";
}

/// Entity serialized by an operation's lock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockScope {
    /// No lock
    None,
    /// One lock per flow node
    FlowNode,
    /// One lock per process instance
    ProcessInstance,
}

/// Rules of one operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationPolicy {
    /// Whether the operation runs while the tenant is paused
    pub allowed_in_maintenance: bool,
    /// Lock taken around the operation
    pub lock: LockScope,
    /// Replacement to log when the operation is deprecated
    pub deprecated: Option<&'static str>,
}

impl OperationPolicy {
    /// Operation refused while paused, without lock
    pub const fn standard() -> Self {
        Self {
            allowed_in_maintenance: false,
            lock: LockScope::None,
            deprecated: None,
        }
    }

    /// Operation accepted while paused
    pub const fn maintenance() -> Self {
        Self {
            allowed_in_maintenance: true,
            lock: LockScope::None,
            deprecated: None,
        }
    }

    /// Take a lock around the operation
    pub const fn locked(mut self, lock: LockScope) -> Self {
        self.lock = lock;
        self
    }

    /// Log a deprecation warning on each call
    pub const fn deprecated(mut self, replacement: &'static str) -> Self {
        self.deprecated = Some(replacement);
        self
    }
}

/// Policy table and its dispatch function
pub struct PolicyTable {
    policies: HashMap<&'static str, OperationPolicy>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl PolicyTable {
    /// Empty table: every operation is unknown
    pub fn new() -> Self {
        Self {
            policies: HashMap::new(),
            locks: DashMap::new(),
        }
    }

    /// Declare an operation
    pub fn with_operation(mut self, name: &'static str, policy: OperationPolicy) -> Self {
        self.policies.insert(name, policy);
        self
    }

    /// Rules of the engine API
    pub fn engine_defaults() -> Self {
        use operations::*;
        Self::new()
            .with_operation(DEPLOY, OperationPolicy::standard())
            .with_operation(START_PROCESS, OperationPolicy::standard())
            .with_operation(SEND_MESSAGE, OperationPolicy::standard())
            .with_operation(CANCEL_FLOW_NODE, OperationPolicy::standard().locked(LockScope::FlowNode))
            .with_operation(ABORT_FLOW_NODE, OperationPolicy::standard().locked(LockScope::FlowNode))
            .with_operation(
                CANCEL_PROCESS_INSTANCE,
                OperationPolicy::standard().locked(LockScope::ProcessInstance),
            )
            .with_operation(RESUME_FLOW_NODE, OperationPolicy::standard().locked(LockScope::FlowNode))
            .with_operation(
                EXECUTE_FLOW_NODE,
                OperationPolicy::standard()
                    .locked(LockScope::FlowNode)
                    .deprecated(RESUME_FLOW_NODE),
            )
            .with_operation(GET_FLOW_NODE, OperationPolicy::maintenance())
            .with_operation(GET_PROCESS_INSTANCE, OperationPolicy::maintenance())
            .with_operation(GET_FLOW_NODE_FAILURES, OperationPolicy::maintenance())
            .with_operation(GET_ARCHIVED_FLOW_NODE_FAILURES, OperationPolicy::maintenance())
            .with_operation(RUN_UNTIL_IDLE, OperationPolicy::maintenance())
            .with_operation(RECOVER, OperationPolicy::maintenance())
            .with_operation(PAUSE, OperationPolicy::maintenance())
            .with_operation(RESUME, OperationPolicy::maintenance())
    }

    /// Rules of an operation
    pub fn policy(&self, operation: &str) -> Option<&OperationPolicy> {
        self.policies.get(operation)
    }

    /// Run `call` under the rules of `operation`.
    ///
    /// `lock_key` identifies the locked entity and is required when the
    /// operation declares a lock.
    pub async fn dispatch<T, F>(
        &self,
        operation: &str,
        paused: bool,
        lock_key: Option<&str>,
        call: F,
    ) -> Result<T, CoreError>
    where
        F: Future<Output = Result<T, CoreError>>,
    {
        let policy = *self
            .policies
            .get(operation)
            .ok_or_else(|| CoreError::ConsistencyError(format!("Unknown engine operation {}", operation)))?;

        if paused && !policy.allowed_in_maintenance {
            return Err(CoreError::MaintenanceMode(format!(
                "{} is not allowed while the tenant is paused",
                operation
            )));
        }
        if let Some(replacement) = policy.deprecated {
            warn!(operation, replacement, "Deprecated engine operation called");
        }
        trace!(operation, lock = ?policy.lock, "Dispatching engine operation");

        if policy.lock == LockScope::None {
            return call.await;
        }
        let key = lock_key.ok_or_else(|| {
            CoreError::ConsistencyError(format!("Operation {} requires a lock key", operation))
        })?;
        let key = format!("{:?}:{}", policy.lock, key);
        let lock = self.locks.entry(key.clone()).or_default().clone();
        let result = {
            let _guard = lock.lock().await;
            call.await
        };
        drop(lock);
        self.locks.remove_if(&key, |_, lock| Arc::strong_count(lock) == 1);
        result
    }
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self::engine_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_unknown_operation_is_rejected() {
        let table = PolicyTable::new();
        let result = table.dispatch("frobnicate", false, None, async { Ok(1) }).await;
        assert!(matches!(result, Err(CoreError::ConsistencyError(_))));
    }

    #[tokio::test]
    async fn test_maintenance_gate() {
        let table = PolicyTable::engine_defaults();

        let refused = table
            .dispatch(operations::START_PROCESS, true, None, async { Ok(()) })
            .await;
        assert!(matches!(refused, Err(CoreError::MaintenanceMode(_))));

        let allowed = table
            .dispatch(operations::GET_FLOW_NODE, true, None, async { Ok(7) })
            .await;
        assert_eq!(allowed, Ok(7));
    }

    #[tokio::test]
    async fn test_locked_operation_requires_key() {
        let table = PolicyTable::engine_defaults();
        let result = table
            .dispatch(operations::CANCEL_FLOW_NODE, false, None, async { Ok(()) })
            .await;
        assert!(matches!(result, Err(CoreError::ConsistencyError(_))));
    }

    #[tokio::test]
    async fn test_same_key_is_serialized() {
        let table = Arc::new(PolicyTable::engine_defaults());
        let running = Arc::new(AtomicUsize::new(0));
        let overlaps = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let table = table.clone();
            let running = running.clone();
            let overlaps = overlaps.clone();
            handles.push(tokio::spawn(async move {
                table
                    .dispatch(operations::ABORT_FLOW_NODE, false, Some("node-1"), async {
                        if running.fetch_add(1, Ordering::SeqCst) > 0 {
                            overlaps.fetch_add(1, Ordering::SeqCst);
                        }
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        running.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
        assert!(table.locks.is_empty());
    }

    #[test]
    fn test_deprecated_operation_names_replacement() {
        let table = PolicyTable::engine_defaults();
        let policy = table.policy(operations::EXECUTE_FLOW_NODE).unwrap();
        assert_eq!(policy.deprecated, Some(operations::RESUME_FLOW_NODE));
        assert_eq!(policy.lock, LockScope::FlowNode);
    }
}
