use crate::domain::diagnostic::{ConnectorEvent, ConnectorMarker, DiagnosticContext};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Core error type for the engine's infrastructure and consistency failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Entity not found in persistence
    #[error("Entity not found: {0}")]
    EntityNotFound(String),

    /// Process definition not found
    #[error("Process definition not found: {0}")]
    DefinitionNotFound(String),

    /// Another transaction modified the same record first
    #[error("Concurrent modification: {0}")]
    ConcurrentModification(String),

    /// Persistence service error
    #[error("Persistence error: {0}")]
    PersistenceError(String),

    /// Persistence service unreachable
    #[error("Persistence unavailable: {0}")]
    PersistenceUnavailable(String),

    /// Work queue error
    #[error("Work queue error: {0}")]
    QueueError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// A state transition that the node's table does not allow
    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    /// Operation rejected while the tenant is paused
    #[error("Maintenance mode: {0}")]
    MaintenanceMode(String),

    /// User-authored logic failed during a synchronous engine call
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    /// Inconsistent engine state, caused by a programming error
    #[error("Consistency error: {0}")]
    ConsistencyError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl CoreError {
    /// Whether the error comes from an unavailable or failing collaborator
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            CoreError::PersistenceError(_)
                | CoreError::PersistenceUnavailable(_)
                | CoreError::QueueError(_)
                | CoreError::SerializationError(_)
                | CoreError::Other(_)
        )
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::SerializationError(err.to_string())
    }
}

impl From<config::ConfigError> for CoreError {
    fn from(err: config::ConfigError) -> Self {
        CoreError::ConfigurationError(err.to_string())
    }
}

impl From<String> for CoreError {
    fn from(err: String) -> Self {
        CoreError::Other(err)
    }
}

impl From<&str> for CoreError {
    fn from(err: &str) -> Self {
        CoreError::Other(err.to_string())
    }
}

/// What kind of user-authored logic failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionErrorKind {
    /// An expression could not be evaluated
    ExpressionEvaluation {
        /// Name of the failing expression
        expression_name: String,
    },
    /// An operation (data assignment) failed
    OperationExecution,
    /// Connector inputs were rejected by the connector
    ConnectorValidation,
    /// A connector failed while running
    ConnectorExecution,
    /// A transition condition could not be evaluated
    TransitionConditionEvaluation,
    /// No outgoing transition could be taken
    NoTransition,
    /// Message throw or catch failed
    MessageHandling,
    /// A flow node behavior reported an error
    Behavior,
}

/// Business failure raised by user-authored logic.
///
/// Carries a [`DiagnosticContext`] that each enclosing layer completes, and the
/// error that caused it.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("{context}{message}")]
pub struct ExecutionError {
    kind: ExecutionErrorKind,
    message: String,
    scope: Option<String>,
    context: DiagnosticContext,
    #[source]
    source: Option<Box<ExecutionError>>,
}

impl ExecutionError {
    /// Create an error of the given kind
    pub fn new(kind: ExecutionErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            scope: None,
            context: DiagnosticContext::default(),
            source: None,
        }
    }

    /// Expression evaluation failure
    pub fn expression(expression_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(
            ExecutionErrorKind::ExpressionEvaluation {
                expression_name: expression_name.into(),
            },
            message,
        )
    }

    /// Failure reported by a flow node behavior or connector
    pub fn behavior(message: impl Into<String>) -> Self {
        Self::new(ExecutionErrorKind::Behavior, message)
    }

    /// Set the cause. The cause's markers and scope are inherited where this
    /// error has none of its own.
    pub fn caused_by(mut self, cause: ExecutionError) -> Self {
        self.context.merge_missing(&cause.context);
        if self.scope.is_none() {
            self.scope.clone_from(&cause.scope);
        }
        self.source = Some(Box::new(cause));
        self
    }

    /// Set the failure scope
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Set the failure scope if none was set by an inner layer
    pub fn with_default_scope(mut self, scope: &str) -> Self {
        if self.scope.is_none() {
            self.scope = Some(scope.to_string());
        }
        self
    }

    /// Record the message being handled
    pub fn with_message_name(mut self, name: impl Into<String>) -> Self {
        self.context.message_name = Some(name.into());
        self
    }

    /// Record the connector being executed
    pub fn with_connector(
        mut self,
        name: impl Into<String>,
        definition_id: impl Into<String>,
        activation_event: ConnectorEvent,
    ) -> Self {
        self.context.connector = Some(ConnectorMarker {
            name: name.into(),
            definition_id: Some(definition_id.into()),
            activation_event: Some(activation_event),
        });
        self
    }

    /// Record the connector input being evaluated
    pub fn with_connector_input(mut self, input_name: impl Into<String>) -> Self {
        self.context.connector_input = Some(input_name.into());
        self
    }

    /// Record the transition being evaluated. Absent values are left unset.
    pub fn with_transition(mut self, name: Option<String>, target: Option<String>) -> Self {
        if name.is_some() {
            self.context.transition_name = name;
        }
        if target.is_some() {
            self.context.transition_target = target;
        }
        self
    }

    /// Complete the context with markers known by an outer layer
    pub fn enrich(&mut self, context: &DiagnosticContext) {
        self.context.merge_missing(context);
    }

    /// Kind of failure
    pub fn kind(&self) -> &ExecutionErrorKind {
        &self.kind
    }

    /// Message of this error alone, without context
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Failure scope, if any layer set one
    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    /// Accumulated diagnostic context
    pub fn context(&self) -> &DiagnosticContext {
        &self.context
    }

    /// Direct cause
    pub fn cause(&self) -> Option<&ExecutionError> {
        self.source.as_deref()
    }

    /// This error followed by all of its causes
    pub fn chain(&self) -> impl Iterator<Item = &ExecutionError> {
        std::iter::successors(Some(self), |e| e.cause())
    }

    /// Innermost cause
    pub fn root_cause(&self) -> &ExecutionError {
        self.chain().last().unwrap_or(self)
    }

    /// First error of the chain matching the predicate
    pub fn find_in_chain(
        &self,
        predicate: impl Fn(&ExecutionErrorKind) -> bool,
    ) -> Option<&ExecutionError> {
        self.chain().find(|e| predicate(&e.kind))
    }
}

/// Classification of the outcome of a unit of work
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WorkError {
    /// The work is stale or duplicated and must be dropped
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// User-authored logic failed, the flow node must be marked failed
    #[error(transparent)]
    Business(#[from] ExecutionError),

    /// A collaborator failed, the work is left to the recovery mechanism
    #[error("Infrastructure failure: {0}")]
    Infrastructure(CoreError),

    /// Programming or consistency error
    #[error("Consistency failure: {0}")]
    Consistency(String),
}

impl WorkError {
    /// Short outcome name used in logs and metrics
    pub fn label(&self) -> &'static str {
        match self {
            WorkError::Precondition(_) => "precondition",
            WorkError::Business(_) => "business",
            WorkError::Infrastructure(_) => "infrastructure",
            WorkError::Consistency(_) => "consistency",
        }
    }
}

impl From<CoreError> for WorkError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConcurrentModification(msg) => {
                WorkError::Precondition(format!("concurrent modification: {}", msg))
            }
            CoreError::InvalidStateTransition(_)
            | CoreError::ConsistencyError(_)
            | CoreError::DefinitionNotFound(_)
            | CoreError::ConfigurationError(_) => WorkError::Consistency(err.to_string()),
            other => WorkError::Infrastructure(other),
        }
    }
}

impl From<WorkError> for CoreError {
    fn from(err: WorkError) -> Self {
        match err {
            WorkError::Precondition(msg) => CoreError::InvalidStateTransition(msg),
            WorkError::Business(e) => CoreError::ExecutionFailed(e.to_string()),
            WorkError::Infrastructure(e) => e,
            WorkError::Consistency(msg) => CoreError::ConsistencyError(msg),
        }
    }
}
