//! Engine facade: wires the services together and exposes the API used by
//! embedding applications.

use crate::application::container_registry::ContainerRegistry;
use crate::application::engine_context::EngineContext;
use crate::application::failure_service::FailureService;
use crate::application::flow_node_executor::FlowNodeExecutor;
use crate::application::flow_node_factory::FlowNodeFactory;
use crate::application::message_correlation::MessageCorrelationService;
use crate::application::policy::{operations, PolicyTable};
use crate::application::recovery::{RecoveryReport, RecoveryService};
use crate::application::transition_evaluator::TransitionConditionEvaluator;
use crate::application::unit_of_work::{TransactionScope, TransactionService};
use crate::application::work_executor::WorkExecutor;
use crate::application::worker_pool::{process_work, WorkerPool};
use crate::config::EngineConfig;
use crate::domain::behavior::{ConnectorExecutor, FlowNodeBehavior};
use crate::domain::definition::ProcessDefinition;
use crate::domain::expression::{ExpressionResolver, StandardExpressionResolver};
use crate::domain::failure::{ArchivedBpmFailure, BpmFailure};
use crate::domain::flow_node::{FlowNodeInstance, ProcessInstance, ProcessInstanceState};
use crate::domain::message::MessageInstance;
use crate::domain::repository::{
    queries, ArchiveService, PersistenceService, ProcessDefinitionRepository, SelectListDescriptor, WorkQueue,
};
use crate::domain::state_machine::{Interruption, StateMachine};
use crate::domain::work::WorkDescriptor;
use crate::error::CoreError;
use crate::types::{FlowNodeDefinitionId, FlowNodeInstanceId, MessageInstanceId, ProcessDefinitionId, ProcessInstanceId};
use chrono::Utc;
use dashmap::DashMap;
use serde_json::{Map, Value};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Builds an [`Engine`] from its collaborators
pub struct EngineBuilder {
    config: EngineConfig,
    persistence: Option<Arc<dyn PersistenceService>>,
    archive: Option<Arc<dyn ArchiveService>>,
    queue: Option<Arc<dyn WorkQueue>>,
    definitions: Option<Arc<dyn ProcessDefinitionRepository>>,
    resolver: Option<Arc<dyn ExpressionResolver>>,
    connectors: Option<Arc<dyn ConnectorExecutor>>,
    behaviors: Vec<(FlowNodeDefinitionId, Arc<dyn FlowNodeBehavior>)>,
    policies: Option<PolicyTable>,
}

impl EngineBuilder {
    /// Start from a configuration
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            persistence: None,
            archive: None,
            queue: None,
            definitions: None,
            resolver: None,
            connectors: None,
            behaviors: Vec::new(),
            policies: None,
        }
    }

    /// Persistence service
    pub fn persistence(mut self, persistence: Arc<dyn PersistenceService>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Archive service
    pub fn archive(mut self, archive: Arc<dyn ArchiveService>) -> Self {
        self.archive = Some(archive);
        self
    }

    /// Work queue
    pub fn queue(mut self, queue: Arc<dyn WorkQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Process definition repository
    pub fn definitions(mut self, definitions: Arc<dyn ProcessDefinitionRepository>) -> Self {
        self.definitions = Some(definitions);
        self
    }

    /// Expression resolver, [`StandardExpressionResolver`] when not set
    pub fn resolver(mut self, resolver: Arc<dyn ExpressionResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Connector executor
    pub fn connectors(mut self, connectors: Arc<dyn ConnectorExecutor>) -> Self {
        self.connectors = Some(connectors);
        self
    }

    /// Logic run when nodes of the given definition execute
    pub fn behavior(mut self, flow_node_definition_id: impl Into<FlowNodeDefinitionId>, behavior: Arc<dyn FlowNodeBehavior>) -> Self {
        self.behaviors.push((flow_node_definition_id.into(), behavior));
        self
    }

    /// Replace the default policy table
    pub fn policies(mut self, policies: PolicyTable) -> Self {
        self.policies = Some(policies);
        self
    }

    /// Assemble the engine
    pub fn build(self) -> Result<Engine, CoreError> {
        let config = self.config.validate()?;
        let persistence = self.persistence.ok_or_else(|| missing("persistence service"))?;
        let archive = self.archive.ok_or_else(|| missing("archive service"))?;
        let queue = self.queue.ok_or_else(|| missing("work queue"))?;
        let definitions = self.definitions.ok_or_else(|| missing("process definition repository"))?;
        let resolver = self
            .resolver
            .unwrap_or_else(|| Arc::new(StandardExpressionResolver::new()));

        let behaviors: Arc<DashMap<FlowNodeDefinitionId, Arc<dyn FlowNodeBehavior>>> =
            Arc::new(self.behaviors.into_iter().collect());
        let state_machine = Arc::new(StateMachine::new());
        let transactions = TransactionService::new(persistence, queue);
        let failures = FailureService::new(archive.clone(), config.stack_trace_depth);
        let messages = MessageCorrelationService::new(resolver.clone());
        let factory = FlowNodeFactory::new(state_machine.clone());
        let registry = ContainerRegistry::new(
            TransitionConditionEvaluator::new(resolver.clone()),
            factory.clone(),
            failures.clone(),
            archive,
            messages.clone(),
        );
        let executor = FlowNodeExecutor::new(
            state_machine,
            definitions.clone(),
            factory,
            registry,
            messages,
            resolver,
            self.connectors,
            behaviors.clone(),
        );
        let work_executor = WorkExecutor::new(transactions.clone(), executor.clone(), failures.clone());
        let context = Arc::new(EngineContext::new(transactions.clone(), config.default_tenant_name.clone()));

        Ok(Engine {
            recovery: RecoveryService::new(transactions.clone()),
            policies: self.policies.unwrap_or_else(PolicyTable::engine_defaults),
            workers: Mutex::new(None),
            config,
            transactions,
            executor,
            work_executor,
            failures,
            definitions,
            context,
            behaviors,
        })
    }
}

fn missing(what: &str) -> CoreError {
    CoreError::ConfigurationError(format!("No {} configured", what))
}

/// Process engine
pub struct Engine {
    config: EngineConfig,
    transactions: TransactionService,
    executor: FlowNodeExecutor,
    work_executor: WorkExecutor,
    failures: FailureService,
    recovery: RecoveryService,
    definitions: Arc<dyn ProcessDefinitionRepository>,
    context: Arc<EngineContext>,
    policies: PolicyTable,
    behaviors: Arc<DashMap<FlowNodeDefinitionId, Arc<dyn FlowNodeBehavior>>>,
    workers: Mutex<Option<WorkerPool>>,
}

impl Engine {
    /// Builder for an engine
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Executor of single work descriptors, for callers driving the queue
    /// themselves
    pub fn work_executor(&self) -> &WorkExecutor {
        &self.work_executor
    }

    /// Process-wide state
    pub fn context(&self) -> &Arc<EngineContext> {
        &self.context
    }

    /// Register the logic of a flow node definition
    pub fn register_behavior(&self, flow_node_definition_id: impl Into<FlowNodeDefinitionId>, behavior: Arc<dyn FlowNodeBehavior>) {
        self.behaviors.insert(flow_node_definition_id.into(), behavior);
    }

    /// Run recovery when configured, then start the workers
    pub async fn start(&self) -> Result<(), CoreError> {
        if self.config.recover_on_startup {
            self.recover().await?;
        }
        self.start_workers().await
    }

    /// Stop the workers
    pub async fn shutdown(&self) {
        if let Some(pool) = self.workers.lock().await.take() {
            pool.shutdown().await;
        }
    }

    /// Spawn the worker pool if it is not running
    pub async fn start_workers(&self) -> Result<(), CoreError> {
        let mut workers = self.workers.lock().await;
        if workers.is_some() {
            debug!("Worker pool already running");
            return Ok(());
        }
        *workers = Some(WorkerPool::start(
            self.config.worker_count,
            self.transactions.queue().clone(),
            self.work_executor.clone(),
            self.context.clone(),
            self.config.retry_delay(),
        ));
        Ok(())
    }

    /// Deploy a definition and register its message start events
    pub async fn deploy(&self, definition: ProcessDefinition) -> Result<ProcessDefinitionId, CoreError> {
        self.dispatch(operations::DEPLOY, None, async {
            if self.definitions.find_by_id(&definition.id).await?.is_some() {
                return Err(CoreError::ConsistencyError(format!(
                    "Process definition {} is already deployed",
                    definition.id
                )));
            }
            let id = definition.id.clone();
            self.definitions.save(definition).await?;
            let definition = self.executor.definition(&id).await?;

            let mut scope = self.begin().await?;
            let registered = self.executor.register_start_events(&mut scope, &definition).await;
            let registered = self.finish(scope, registered).await?;
            info!(process_definition_id = %id, name = %definition.name, start_events = registered, "Process definition deployed");
            Ok(id)
        })
        .await
    }

    /// Start a process instance with initial variables
    pub async fn start_process(
        &self,
        process_definition_id: &ProcessDefinitionId,
        variables: Map<String, Value>,
    ) -> Result<ProcessInstanceId, CoreError> {
        self.dispatch(operations::START_PROCESS, None, async {
            let definition = self.executor.definition(process_definition_id).await?;
            let mut scope = self.begin().await?;
            let started = self
                .executor
                .start_process_instance(&mut scope, &definition, variables, None)
                .await;
            let process_instance = self.finish(scope, started).await?;
            info!(process_instance_id = %process_instance.id, process = %definition.name, "Process instance started");
            Ok(process_instance.id)
        })
        .await
    }

    /// Send a message to waiting events or message start events
    pub async fn send_message(&self, message: MessageInstance) -> Result<MessageInstanceId, CoreError> {
        self.dispatch(operations::SEND_MESSAGE, None, async {
            let id = message.id.clone();
            let mut scope = self.begin().await?;
            let sent = self.executor.messages().send_message(&mut scope, message).await;
            self.finish(scope, sent).await?;
            Ok(id)
        })
        .await
    }

    /// Cancel a flow node. Returns false when it is already finished or interrupted.
    pub async fn cancel_flow_node(&self, flow_node_instance_id: &FlowNodeInstanceId) -> Result<bool, CoreError> {
        self.dispatch(
            operations::CANCEL_FLOW_NODE,
            Some(flow_node_instance_id.as_str()),
            self.interrupt_flow_node(flow_node_instance_id, Interruption::Cancel),
        )
        .await
    }

    /// Abort a flow node. Returns false when it is already finished or interrupted.
    pub async fn abort_flow_node(&self, flow_node_instance_id: &FlowNodeInstanceId) -> Result<bool, CoreError> {
        self.dispatch(
            operations::ABORT_FLOW_NODE,
            Some(flow_node_instance_id.as_str()),
            self.interrupt_flow_node(flow_node_instance_id, Interruption::Abort),
        )
        .await
    }

    async fn interrupt_flow_node(
        &self,
        flow_node_instance_id: &FlowNodeInstanceId,
        interruption: Interruption,
    ) -> Result<bool, CoreError> {
        self.with_retries(|| async move {
            let mut scope = self.begin().await?;
            let interrupted = match load_flow_node(&mut scope, flow_node_instance_id).await {
                Ok(node) => self.executor.interrupt(&mut scope, node, interruption).await.map_err(CoreError::from),
                Err(e) => Err(e),
            };
            self.finish(scope, interrupted).await
        })
        .await
    }

    /// Cancel every active node of a process instance; it ends `Cancelled`
    pub async fn cancel_process_instance(&self, process_instance_id: &ProcessInstanceId) -> Result<(), CoreError> {
        self.dispatch(
            operations::CANCEL_PROCESS_INSTANCE,
            Some(process_instance_id.as_str()),
            self.with_retries(|| async move {
                let mut scope = self.begin().await?;
                let cancelled = self.cancel_in_scope(&mut scope, process_instance_id).await;
                self.finish(scope, cancelled).await
            }),
        )
        .await
    }

    async fn cancel_in_scope(
        &self,
        scope: &mut TransactionScope,
        process_instance_id: &ProcessInstanceId,
    ) -> Result<(), CoreError> {
        let process_instance: Option<ProcessInstance> = scope.tx().select_one(process_instance_id.as_str()).await?;
        let mut process_instance =
            process_instance.ok_or_else(|| CoreError::EntityNotFound(format!("process instance {}", process_instance_id)))?;
        if process_instance.state.is_terminal() || process_instance.interrupted {
            return Err(CoreError::InvalidStateTransition(format!(
                "process instance {} is already {:?}",
                process_instance_id, process_instance.state
            )));
        }

        let query = SelectListDescriptor::new(queries::GET_FLOW_NODES_OF_CONTAINER)
            .with_parameter("container.id", process_instance_id.as_str());
        let nodes: Vec<FlowNodeInstance> = scope.tx().select_list(&query).await?;
        process_instance.interrupted = true;
        if nodes.is_empty() {
            process_instance.state = ProcessInstanceState::Cancelled;
            process_instance.ended_at = Some(Utc::now());
        }
        scope.tx().update(&process_instance).await?;
        for node in nodes {
            self.executor.interrupt(scope, node, Interruption::Cancel).await?;
        }
        info!(process_instance_id = %process_instance_id, "Process instance cancellation requested");
        Ok(())
    }

    /// Complete the in-progress step of a node, merging `variables` into its
    /// process instance
    pub async fn resume_flow_node(
        &self,
        flow_node_instance_id: &FlowNodeInstanceId,
        variables: Map<String, Value>,
    ) -> Result<(), CoreError> {
        self.dispatch(
            operations::RESUME_FLOW_NODE,
            Some(flow_node_instance_id.as_str()),
            self.resume_in_scope(flow_node_instance_id, variables),
        )
        .await
    }

    /// Complete the in-progress step of a node without adding variables.
    ///
    /// Same rules as [`resume_flow_node`](Engine::resume_flow_node): the node
    /// must have a step in progress.
    pub async fn execute_flow_node(&self, flow_node_instance_id: &FlowNodeInstanceId) -> Result<(), CoreError> {
        self.dispatch(
            operations::EXECUTE_FLOW_NODE,
            Some(flow_node_instance_id.as_str()),
            self.resume_in_scope(flow_node_instance_id, Map::new()),
        )
        .await
    }

    async fn resume_in_scope(
        &self,
        flow_node_instance_id: &FlowNodeInstanceId,
        variables: Map<String, Value>,
    ) -> Result<(), CoreError> {
        let variables = &variables;
        self.with_retries(|| async move {
            let mut scope = self.begin().await?;
            let resumed = resume(&mut scope, flow_node_instance_id, variables).await;
            self.finish(scope, resumed).await
        })
        .await
    }

    /// Live flow node
    pub async fn get_flow_node(&self, flow_node_instance_id: &FlowNodeInstanceId) -> Result<Option<FlowNodeInstance>, CoreError> {
        self.dispatch(operations::GET_FLOW_NODE, None, async {
            let mut scope = self.begin().await?;
            let node: Result<Option<FlowNodeInstance>, CoreError> =
                scope.tx().select_one(flow_node_instance_id.as_str()).await;
            self.read(scope, node).await
        })
        .await
    }

    /// Process instance
    pub async fn get_process_instance(&self, process_instance_id: &ProcessInstanceId) -> Result<Option<ProcessInstance>, CoreError> {
        self.dispatch(operations::GET_PROCESS_INSTANCE, None, async {
            let mut scope = self.begin().await?;
            let process_instance: Result<Option<ProcessInstance>, CoreError> =
                scope.tx().select_one(process_instance_id.as_str()).await;
            self.read(scope, process_instance).await
        })
        .await
    }

    /// Live flow nodes of a process instance
    pub async fn get_flow_nodes(&self, process_instance_id: &ProcessInstanceId) -> Result<Vec<FlowNodeInstance>, CoreError> {
        self.dispatch(operations::GET_FLOW_NODE, None, async {
            let mut scope = self.begin().await?;
            let query = SelectListDescriptor::new(queries::GET_FLOW_NODES_OF_PROCESS_INSTANCE)
                .with_parameter("parent_process_instance_id", process_instance_id.as_str());
            let nodes: Result<Vec<FlowNodeInstance>, CoreError> = scope.tx().select_list(&query).await;
            self.read(scope, nodes).await
        })
        .await
    }

    /// Failures recorded on a live flow node, at most `failure_page_size`
    pub async fn get_flow_node_failures(&self, flow_node_instance_id: &FlowNodeInstanceId) -> Result<Vec<BpmFailure>, CoreError> {
        self.dispatch(operations::GET_FLOW_NODE_FAILURES, None, async {
            let mut scope = self.begin().await?;
            let failures = self
                .failures
                .get_flow_node_failures(scope.tx(), flow_node_instance_id, self.config.failure_page_size)
                .await;
            self.read(scope, failures).await
        })
        .await
    }

    /// Failures of an archived flow node, at most `failure_page_size`
    pub async fn get_archived_flow_node_failures(
        &self,
        flow_node_instance_id: &FlowNodeInstanceId,
    ) -> Result<Vec<ArchivedBpmFailure>, CoreError> {
        self.dispatch(operations::GET_ARCHIVED_FLOW_NODE_FAILURES, None, async {
            let mut scope = self.begin().await?;
            let failures = self
                .failures
                .get_archived_flow_node_failures(scope.tx(), flow_node_instance_id, self.config.failure_page_size)
                .await;
            self.read(scope, failures).await
        })
        .await
    }

    /// Run queued work on the calling task until the queue is empty.
    /// Returns the number of descriptors processed.
    pub async fn run_until_idle(&self) -> Result<usize, CoreError> {
        self.dispatch(operations::RUN_UNTIL_IDLE, None, async {
            let queue = self.transactions.queue();
            let mut processed = 0;
            while !self.context.is_paused().await? {
                let Some(work) = queue.try_dequeue().await? else {
                    break;
                };
                process_work(queue.as_ref(), &self.work_executor, work).await?;
                processed += 1;
            }
            debug!(processed, "Work queue idle");
            Ok(processed)
        })
        .await
    }

    /// Rebuild the work lost by a crash
    pub async fn recover(&self) -> Result<RecoveryReport, CoreError> {
        self.dispatch(operations::RECOVER, None, async {
            let tenant_id = self.context.tenant_id().await?;
            self.recovery.recover(Some(tenant_id)).await
        })
        .await
    }

    /// Pause the tenant: only maintenance operations are accepted and
    /// workers stop picking up work
    pub async fn pause(&self) -> Result<(), CoreError> {
        self.dispatch(operations::PAUSE, None, self.context.set_paused(true)).await
    }

    /// Resume a paused tenant
    pub async fn resume(&self) -> Result<(), CoreError> {
        self.dispatch(operations::RESUME, None, self.context.set_paused(false)).await
    }

    async fn dispatch<T, F>(&self, operation: &str, lock_key: Option<&str>, call: F) -> Result<T, CoreError>
    where
        F: Future<Output = Result<T, CoreError>>,
    {
        let paused = self.context.is_paused().await?;
        self.policies.dispatch(operation, paused, lock_key, call).await
    }

    async fn begin(&self) -> Result<TransactionScope, CoreError> {
        let tenant_id = self.context.tenant_id().await?;
        self.transactions.begin(Some(tenant_id)).await
    }

    /// Commit on success, roll back on error
    async fn finish<T, E>(&self, scope: TransactionScope, result: Result<T, E>) -> Result<T, CoreError>
    where
        CoreError: From<E>,
    {
        match result {
            Ok(value) => {
                self.transactions.commit(scope).await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_error) = scope.rollback().await {
                    warn!(error = %rollback_error, "Rollback failed");
                }
                Err(e.into())
            }
        }
    }

    /// Read-only transaction
    async fn read<T>(&self, scope: TransactionScope, result: Result<T, CoreError>) -> Result<T, CoreError> {
        scope.rollback().await?;
        result
    }

    /// Retry a transactional call that lost a commit race
    async fn with_retries<T, F, Fut>(&self, mut call: F) -> Result<T, CoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CoreError>>,
    {
        let mut attempt = 1;
        loop {
            match call().await {
                Err(CoreError::ConcurrentModification(reason)) if attempt < self.config.interrupt_attempts => {
                    debug!(attempt, reason = %reason, "Concurrent modification, retrying");
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

async fn load_flow_node(
    scope: &mut TransactionScope,
    flow_node_instance_id: &FlowNodeInstanceId,
) -> Result<FlowNodeInstance, CoreError> {
    let node: Option<FlowNodeInstance> = scope.tx().select_one(flow_node_instance_id.as_str()).await?;
    node.ok_or_else(|| CoreError::EntityNotFound(format!("flow node {}", flow_node_instance_id)))
}

async fn resume(
    scope: &mut TransactionScope,
    flow_node_instance_id: &FlowNodeInstanceId,
    variables: &Map<String, Value>,
) -> Result<(), CoreError> {
    let node = load_flow_node(scope, flow_node_instance_id).await?;
    if node.terminal || !node.lifecycle.executing {
        return Err(CoreError::InvalidStateTransition(format!(
            "flow node {} has no step in progress ({})",
            flow_node_instance_id,
            node.snapshot()
        )));
    }
    if !variables.is_empty() {
        let mut process_instance: ProcessInstance = scope.tx().get(node.parent_process_instance_id.as_str()).await?;
        process_instance
            .variables
            .extend(variables.iter().map(|(k, v)| (k.clone(), v.clone())));
        scope.tx().update(&process_instance).await?;
    }
    scope.schedule(WorkDescriptor::execute_flow_node(&node));
    debug!(flow_node_instance_id = %node.id, "Flow node resumed");
    Ok(())
}
