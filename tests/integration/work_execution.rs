//! Single work descriptors run through the engine's work executor: stale
//! descriptors, failure recording and released messages

use async_trait::async_trait;
use runnel_core::domain::repository::Entity;
use runnel_core::{
    BehaviorOutcome, ExecutionError, FlowNodeBehavior, FlowNodeInstance, FlowNodeState, MessageInstance,
    PersistenceService, ProcessInstanceState, WaitingEventId, WorkDescriptor, WorkError, WorkKind, WorkQueue,
};
use runnel_state_inmemory::InMemoryPersistence;
use runnel_test_utils::assertions::{assert_process_state, assert_variable};
use runnel_test_utils::implementations::{FailingBehavior, InProgressBehavior};
use runnel_test_utils::{variables, TestEngine};
use runnel_tests::fixtures;
use serde_json::{json, Map, Value};
use std::sync::Arc;

/// Run queued work until the next descriptor executing the node named `name`,
/// which is returned without being executed
async fn next_work_for(test: &TestEngine, name: &str) -> WorkDescriptor {
    loop {
        let work = test
            .backend
            .queue
            .try_dequeue()
            .await
            .unwrap()
            .unwrap_or_else(|| panic!("no work left for {}", name));
        if let WorkKind::ExecuteFlowNode { flow_node_instance_id, .. } = &work.kind {
            let node = test.engine.get_flow_node(flow_node_instance_id).await.unwrap();
            if node.map_or(false, |node| node.name == name) {
                return work;
            }
        }
        test.engine.work_executor().execute(&work).await.unwrap();
        test.backend.queue.acknowledge(&work.id).await.unwrap();
    }
}

/// Fails after taking the store offline, so the failure cannot be recorded
/// right away
struct FailDuringOutage {
    persistence: Arc<InMemoryPersistence>,
}

#[async_trait]
impl FlowNodeBehavior for FailDuringOutage {
    async fn execute(
        &self,
        _node: &FlowNodeInstance,
        _variables: &mut Map<String, Value>,
    ) -> Result<BehaviorOutcome, ExecutionError> {
        self.persistence.set_available(false);
        Err(ExecutionError::behavior("declined during outage"))
    }
}

#[tokio::test]
async fn test_replayed_descriptor_is_rejected_without_side_effects() {
    let test = TestEngine::new().unwrap();
    let definition_id = test.deploy(fixtures::linear()).await.unwrap();
    test.engine
        .start_process(&definition_id, variables(json!({})))
        .await
        .unwrap();

    let work = next_work_for(&test, "start").await;
    let node_id = work.flow_node_instance_id().unwrap().clone();
    test.engine.work_executor().execute(&work).await.unwrap();

    let node = test.engine.get_flow_node(&node_id).await.unwrap();
    let pending = test.backend.queue.snapshot().await;
    assert!(!pending.is_empty());

    let replay = test.engine.work_executor().execute(&work).await;
    assert!(matches!(replay, Err(WorkError::Precondition(_))));
    assert_eq!(test.engine.get_flow_node(&node_id).await.unwrap(), node);
    assert_eq!(test.backend.queue.snapshot().await, pending);
}

#[tokio::test]
async fn test_failure_is_recorded_after_the_step_is_rolled_back() {
    let test = TestEngine::builder()
        .behavior("charge", Arc::new(FailingBehavior::new("card declined")))
        .build()
        .unwrap();
    let definition_id = test.deploy(fixtures::single_task("payment", "Payment")).await.unwrap();
    let id = test
        .engine
        .start_process(&definition_id, variables(json!({})))
        .await
        .unwrap();

    let work = next_work_for(&test, "charge").await;
    let node_id = work.flow_node_instance_id().unwrap().clone();
    let result = test.engine.work_executor().execute(&work).await;
    assert!(matches!(result, Err(WorkError::Business(_))));

    let node = test.engine.get_flow_node(&node_id).await.unwrap().unwrap();
    assert_eq!(node.state(), FlowNodeState::Failed);
    let failures = test.engine.get_flow_node_failures(&node_id).await.unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].error_message, "card declined");

    // The work of the failed step never reached the queue
    assert_eq!(test.backend.queue.pending().await.unwrap(), 0);
    let instance = test.process_instance(&id).await.unwrap();
    assert_process_state(&instance, ProcessInstanceState::Started).unwrap();
}

#[tokio::test]
async fn test_failure_recorded_later_when_the_store_is_down() {
    let test = TestEngine::new().unwrap();
    test.engine.register_behavior(
        "charge",
        Arc::new(FailDuringOutage {
            persistence: test.backend.persistence.clone(),
        }),
    );
    let definition_id = test.deploy(fixtures::single_task("payment", "Payment")).await.unwrap();
    test.engine
        .start_process(&definition_id, variables(json!({})))
        .await
        .unwrap();

    let work = next_work_for(&test, "charge").await;
    let node_id = work.flow_node_instance_id().unwrap().clone();
    let result = test.engine.work_executor().execute(&work).await;
    assert!(matches!(result, Err(WorkError::Business(_))));

    let pending = test.backend.queue.snapshot().await;
    assert_eq!(pending.len(), 1);
    assert!(matches!(
        &pending[0].kind,
        WorkKind::SetInFail { flow_node_instance_id, .. } if *flow_node_instance_id == node_id
    ));

    test.backend.persistence.set_available(true);
    test.engine.run_until_idle().await.unwrap();

    let node = test.engine.get_flow_node(&node_id).await.unwrap().unwrap();
    assert_eq!(node.state(), FlowNodeState::Failed);
    let failures = test.engine.get_flow_node_failures(&node_id).await.unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].error_message, "declined during outage");
}

#[tokio::test]
async fn test_cancel_during_a_step_takes_effect_when_it_is_resumed() {
    let behavior = Arc::new(InProgressBehavior::new());
    let test = TestEngine::builder()
        .behavior("charge", behavior.clone())
        .build()
        .unwrap();
    let definition_id = test.deploy(fixtures::single_task("payment", "Payment")).await.unwrap();
    let id = test.start(&definition_id, variables(json!({}))).await.unwrap();
    let charge = test.flow_node(&id, "charge").await.unwrap();

    assert!(test.engine.cancel_flow_node(&charge.id).await.unwrap());
    test.engine.run_until_idle().await.unwrap();

    // The step keeps running, only the flag is recorded
    let flagged = test.engine.get_flow_node(&charge.id).await.unwrap().unwrap();
    assert_eq!(flagged.state(), FlowNodeState::Executing);
    assert!(flagged.lifecycle.executing);
    assert!(flagged.lifecycle.canceling);
    assert!(!test.engine.cancel_flow_node(&charge.id).await.unwrap());

    test.engine
        .resume_flow_node(&charge.id, variables(json!({"receipt": "R-1"})))
        .await
        .unwrap();
    test.engine.run_until_idle().await.unwrap();

    assert_eq!(behavior.calls(), 1);
    let archived = test.archived_flow_nodes(&id).await.unwrap();
    let charge = archived.iter().find(|n| n.name == "charge").unwrap();
    assert_eq!(charge.state, FlowNodeState::Cancelled);
    assert!(!archived.iter().any(|n| n.name == "end"));
}

#[tokio::test]
async fn test_message_of_a_vanished_waiting_event_is_released() {
    let test = TestEngine::new().unwrap();
    let definition_id = test.deploy(fixtures::shipping()).await.unwrap();

    let message = MessageInstance::new("shipped", "Shipping")
        .with_correlations(vec![("orderId".to_string(), "A-1".to_string())])
        .with_data("carrier", json!("DHL"));
    let message_id = message.id.clone();
    test.send(message).await.unwrap();

    // Locked by a sweep to a waiting event deleted since
    let mut tx = test.backend.persistence.begin().await.unwrap();
    let mut record = tx
        .select_record(MessageInstance::TABLE, message_id.as_str())
        .await
        .unwrap()
        .unwrap();
    record["handled"] = json!(true);
    tx.update_record(MessageInstance::TABLE, message_id.as_str(), record)
        .await
        .unwrap();
    tx.commit().await.unwrap();

    test.backend
        .queue
        .enqueue(WorkDescriptor::execute_message_couple(
            message_id.clone(),
            WaitingEventId::new("gone"),
        ))
        .await
        .unwrap();
    test.engine.run_until_idle().await.unwrap();

    let records = test.backend.persistence.records(MessageInstance::TABLE).await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["handled"], json!(false));

    // The released message reaches the next matching waiting event
    let id = test.start(&definition_id, variables(json!({"order": "A-1"}))).await.unwrap();
    let instance = test.process_instance(&id).await.unwrap();
    assert_process_state(&instance, ProcessInstanceState::Completed).unwrap();
    assert_variable(&instance, "carrier", json!("DHL")).unwrap();
}
