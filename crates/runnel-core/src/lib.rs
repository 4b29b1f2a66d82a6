//! Runnel Core - flow-node execution core of the Runnel process engine
//!
//! Flow nodes move through per-type state tables, one unit of work at a
//! time. Each unit of work runs in a single transaction, is guarded by the
//! lifecycle captured when it was scheduled, and schedules its follow-up
//! work on commit. Business failures mark the node failed with a
//! diagnostic record; infrastructure failures leave the work to recovery.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Domain layer - flow nodes, state tables, definitions, messages and contracts
pub mod domain;

/// Application services - execution, messaging, failures and the engine facade
pub mod application;

/// Identifier types
pub mod types;

/// Error types
pub mod error;

/// Engine configuration
pub mod config;

/// Metric names and recording
pub mod telemetry;

// Re-export key types
pub use application::engine::{Engine, EngineBuilder};
pub use application::policy::{LockScope, OperationPolicy, PolicyTable};
pub use application::recovery::RecoveryReport;
pub use config::EngineConfig;
pub use error::{CoreError, ExecutionError, ExecutionErrorKind, WorkError};

pub use domain::behavior::{BehaviorOutcome, ConnectorExecutor, FlowNodeBehavior};
pub use domain::definition::{
    CatchMessageTrigger, ConnectorDefinition, CorrelationDefinition, DataDefinition, Expression, FlowContainerDefinition,
    FlowNodeDefinition, GatewayKind, Operation, ProcessDefinition, ReturnType, ThrowMessageTrigger, TransitionDefinition,
};
pub use domain::diagnostic::ConnectorEvent;
pub use domain::expression::{ExpressionContext, ExpressionResolver, StandardExpressionResolver};
pub use domain::failure::{ArchivedBpmFailure, BpmFailure};
pub use domain::flow_node::{ContainerRef, FlowNodeInstance, FlowNodeType, Lifecycle, ProcessInstance, ProcessInstanceState};
pub use domain::message::{MessageInstance, WaitingEvent, WaitingEventKind};
pub use domain::repository::{ArchiveService, PersistenceService, ProcessDefinitionRepository, Transaction, WorkQueue};
pub use domain::state_machine::{FlowNodeState, Interruption};
pub use domain::work::{WorkDescriptor, WorkKind};
pub use types::*;
