//! Exclusive and parallel gateways

use runnel_core::ProcessInstanceState;
use runnel_test_utils::assertions::assert_process_state;
use runnel_test_utils::implementations::RecordingBehavior;
use runnel_test_utils::{variables, TestEngine};
use runnel_tests::fixtures;
use serde_json::json;
use std::sync::Arc;

#[tokio::test]
async fn test_exclusive_gateway_takes_the_passing_condition() {
    let test = TestEngine::new().unwrap();
    let definition_id = test.deploy(fixtures::amount_routing()).await.unwrap();

    let id = test.start(&definition_id, variables(json!({"amount": 120}))).await.unwrap();

    let archived = test.archived_names(&id).await.unwrap();
    assert!(archived.contains(&"review".to_string()));
    assert!(!archived.contains(&"autoApprove".to_string()));
    let instance = test.process_instance(&id).await.unwrap();
    assert_process_state(&instance, ProcessInstanceState::Completed).unwrap();
}

#[tokio::test]
async fn test_exclusive_gateway_falls_back_to_default() {
    let test = TestEngine::new().unwrap();
    let definition_id = test.deploy(fixtures::amount_routing()).await.unwrap();

    let id = test.start(&definition_id, variables(json!({"amount": 40}))).await.unwrap();

    let archived = test.archived_names(&id).await.unwrap();
    assert!(archived.contains(&"autoApprove".to_string()));
    assert!(!archived.contains(&"review".to_string()));
}

#[tokio::test]
async fn test_parallel_branches_merge_once() {
    let recorder = RecordingBehavior::new();
    let test = TestEngine::builder()
        .behavior("pack", Arc::new(recorder.clone()))
        .behavior("invoice", Arc::new(recorder.clone()))
        .build()
        .unwrap();
    let definition_id = test.deploy(fixtures::split_and_merge()).await.unwrap();

    let id = test.start(&definition_id, variables(json!({}))).await.unwrap();

    let mut executed = recorder.executed();
    executed.sort_unstable();
    assert_eq!(executed, vec!["invoice".to_string(), "pack".to_string()]);

    let archived = test.archived_names(&id).await.unwrap();
    assert_eq!(archived.iter().filter(|n| *n == "join").count(), 1);
    assert_eq!(archived.iter().filter(|n| *n == "end").count(), 1);
    let instance = test.process_instance(&id).await.unwrap();
    assert_process_state(&instance, ProcessInstanceState::Completed).unwrap();
}
