//! Process instances following their sequence flows to the end

use runnel_core::{FlowNodeState, ProcessInstanceState};
use runnel_test_utils::assertions::{assert_no_flow_nodes, assert_process_state, assert_variable};
use runnel_test_utils::implementations::{RecordingBehavior, SetVariableBehavior};
use runnel_test_utils::{variables, TestEngine};
use runnel_tests::fixtures;
use serde_json::json;
use std::sync::Arc;

#[tokio::test]
async fn test_linear_process_completes() {
    let test = TestEngine::new().unwrap();
    let definition_id = test.deploy(fixtures::linear()).await.unwrap();

    let id = test.start(&definition_id, variables(json!({"orderId": "A-1"}))).await.unwrap();

    let instance = test.process_instance(&id).await.unwrap();
    assert_process_state(&instance, ProcessInstanceState::Completed).unwrap();
    assert!(instance.ended_at.is_some());
    assert_variable(&instance, "orderId", json!("A-1")).unwrap();
    assert_no_flow_nodes(&test.flow_nodes(&id).await.unwrap()).unwrap();

    let archived = test.archived_flow_nodes(&id).await.unwrap();
    let mut names: Vec<&str> = archived.iter().map(|n| n.name.as_str()).collect();
    names.sort_unstable();
    assert_eq!(names, vec!["end", "ship", "start", "validate"]);
    assert!(archived.iter().all(|n| n.state == FlowNodeState::Completed));
}

#[tokio::test]
async fn test_behaviors_run_in_sequence_and_write_variables() {
    let recorder = RecordingBehavior::new();
    let test = TestEngine::builder()
        .behavior("validate", Arc::new(recorder.clone()))
        .behavior("ship", Arc::new(SetVariableBehavior::new("trackingNumber", json!("TRK-9"))))
        .build()
        .unwrap();
    let definition_id = test.deploy(fixtures::linear()).await.unwrap();

    let id = test.start(&definition_id, variables(json!({}))).await.unwrap();

    assert_eq!(recorder.executed(), vec!["validate".to_string()]);
    let instance = test.process_instance(&id).await.unwrap();
    assert_process_state(&instance, ProcessInstanceState::Completed).unwrap();
    assert_variable(&instance, "trackingNumber", json!("TRK-9")).unwrap();
}

#[tokio::test]
async fn test_sub_process_completes_after_its_content() {
    let recorder = RecordingBehavior::new();
    let test = TestEngine::builder()
        .behavior("inner", Arc::new(recorder.clone()))
        .build()
        .unwrap();
    let definition_id = test.deploy(fixtures::with_sub_process()).await.unwrap();

    let id = test.start(&definition_id, variables(json!({}))).await.unwrap();

    assert_eq!(recorder.executed(), vec!["inner".to_string()]);
    let instance = test.process_instance(&id).await.unwrap();
    assert_process_state(&instance, ProcessInstanceState::Completed).unwrap();

    let archived = test.archived_names(&id).await.unwrap();
    for name in ["start", "sub", "innerStart", "inner", "innerEnd", "end"] {
        assert!(archived.iter().any(|n| n == name), "{} was not archived", name);
    }
    // The sub-process finishes only once its content is archived
    let position = |name: &str| archived.iter().position(|n| n == name).unwrap();
    assert!(position("innerEnd") < position("sub"));
}

#[tokio::test]
async fn test_unknown_definition_is_rejected() {
    let test = TestEngine::new().unwrap();
    let result = test
        .engine
        .start_process(&"missing".into(), variables(json!({})))
        .await;
    assert!(matches!(result, Err(runnel_core::CoreError::DefinitionNotFound(_))));
}
