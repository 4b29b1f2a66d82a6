/// Transaction scope and scheduled work
pub mod unit_of_work;

/// Failure capture
pub mod failure_service;

/// Transition conditions
pub mod transition_evaluator;

/// Message throw, catch and matching
pub mod message_correlation;

/// Creation of flow nodes and process instances
pub mod flow_node_factory;

/// Container completion cascade
pub mod container_registry;

/// Flow node execution
pub mod flow_node_executor;

/// Work execution pipeline
pub mod work_executor;

/// Worker pool
pub mod worker_pool;

/// Restart recovery
pub mod recovery;

/// Default tenant and maintenance state
pub mod engine_context;

/// Operation policies
pub mod policy;

/// Engine facade
pub mod engine;
