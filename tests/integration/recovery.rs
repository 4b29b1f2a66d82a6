//! Work lost to outages and restarts is rebuilt by recovery

use runnel_core::{CoreError, FlowNodeState, MessageInstance, ProcessInstanceState};
use runnel_state_inmemory::{InMemoryBackend, InMemoryWorkQueue};
use runnel_test_utils::assertions::{assert_flow_node_state, assert_process_state};
use runnel_test_utils::harness::test_config;
use runnel_test_utils::implementations::{FailingBehavior, InProgressBehavior};
use runnel_test_utils::{variables, TestEngine};
use runnel_tests::fixtures;
use serde_json::json;
use std::sync::Arc;

#[tokio::test]
async fn test_work_interrupted_by_an_outage_is_recovered() {
    let test = TestEngine::new().unwrap();
    let definition_id = test.deploy(fixtures::linear()).await.unwrap();
    let id = test
        .engine
        .start_process(&definition_id, variables(json!({})))
        .await
        .unwrap();

    test.backend.persistence.set_available(false);
    let processed = test.engine.run_until_idle().await.unwrap();
    assert!(processed > 0);
    // Infrastructure failures are never acknowledged
    assert_eq!(test.backend.queue.in_flight(), processed);

    let unavailable = test.engine.get_process_instance(&id).await;
    assert!(matches!(unavailable, Err(CoreError::PersistenceUnavailable(_))));

    test.backend.persistence.set_available(true);
    let report = test.engine.recover().await.unwrap();
    assert_eq!(report.requeued, processed);
    assert!(report.executions >= 1);
    assert_eq!(test.backend.queue.in_flight(), 0);

    test.engine.run_until_idle().await.unwrap();
    let instance = test.process_instance(&id).await.unwrap();
    assert_process_state(&instance, ProcessInstanceState::Completed).unwrap();
    assert_eq!(test.archived_names(&id).await.unwrap().len(), 4);
}

#[tokio::test]
async fn test_restart_rebuilds_lost_work() {
    let test = TestEngine::new().unwrap();
    let definition_id = test.deploy(fixtures::shipping()).await.unwrap();
    let id = test.start(&definition_id, variables(json!({"order": "A-1"}))).await.unwrap();

    // Sent, but the matching sweep is lost with the queue
    test.engine
        .send_message(
            MessageInstance::new("shipped", "Shipping")
                .with_correlations(vec![("orderId".to_string(), "A-1".to_string())])
                .with_data("carrier", json!("UPS")),
        )
        .await
        .unwrap();

    let restarted = InMemoryBackend {
        queue: Arc::new(InMemoryWorkQueue::new()),
        ..test.backend.clone()
    };
    let engine = restarted.engine_builder(test_config()).build().unwrap();

    let report = engine.recover().await.unwrap();
    assert_eq!(report.requeued, 0);
    assert!(report.sweep_scheduled);
    assert!(report.executions >= 1);

    engine.run_until_idle().await.unwrap();
    let instance = engine.get_process_instance(&id).await.unwrap().unwrap();
    assert_process_state(&instance, ProcessInstanceState::Completed).unwrap();
    assert_eq!(instance.variables.get("carrier"), Some(&json!("UPS")));
}

#[tokio::test]
async fn test_recovery_leaves_failed_and_in_progress_nodes_alone() {
    let test = TestEngine::builder()
        .behavior("charge", Arc::new(FailingBehavior::new("declined")))
        .behavior("validate", Arc::new(InProgressBehavior::new()))
        .build()
        .unwrap();
    let failing = test.deploy(fixtures::single_task("payment", "Payment")).await.unwrap();
    let in_progress = test.deploy(fixtures::linear()).await.unwrap();
    let failed_id = test.start(&failing, variables(json!({}))).await.unwrap();
    let running_id = test.start(&in_progress, variables(json!({}))).await.unwrap();

    let charge = test.flow_node(&failed_id, "charge").await.unwrap();
    let validate = test.flow_node(&running_id, "validate").await.unwrap();

    let report = test.engine.recover().await.unwrap();
    assert_eq!(report.failed, vec![charge.id.clone()]);
    assert_eq!(report.awaiting_resume, vec![validate.id.clone()]);
    assert_eq!(report.executions, 0);

    test.engine.run_until_idle().await.unwrap();
    let nodes = test.flow_nodes(&failed_id).await.unwrap();
    assert_flow_node_state(&nodes, "charge", FlowNodeState::Failed).unwrap();
    let nodes = test.flow_nodes(&running_id).await.unwrap();
    assert_flow_node_state(&nodes, "validate", FlowNodeState::Executing).unwrap();
}
