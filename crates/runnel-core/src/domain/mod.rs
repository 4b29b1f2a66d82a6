/// Flow node instances, lifecycle and process instances
pub mod flow_node;

/// Per node-type state tables
pub mod state_machine;

/// Process definitions
pub mod definition;

/// Diagnostic context and failure scopes
pub mod diagnostic;

/// Failure records
pub mod failure;

/// Waiting events, messages and correlations
pub mod message;

/// Work descriptors
pub mod work;

/// Expression evaluation contract
pub mod expression;

/// User-authored logic contracts
pub mod behavior;

/// Tenants
pub mod platform;

/// Collaborator interfaces
pub mod repository;
