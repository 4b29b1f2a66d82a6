//! Interrupted flow nodes: boundary events, terminate end events, cancelled
//! instances and steps completed outside the engine

use runnel_core::{CoreError, FlowNodeState, MessageInstance, ProcessInstanceState};
use runnel_test_utils::assertions::{assert_flow_node_state, assert_process_state, assert_variable};
use runnel_test_utils::implementations::InProgressBehavior;
use runnel_test_utils::{variables, TestEngine};
use runnel_tests::fixtures;
use serde_json::json;
use std::sync::Arc;

#[tokio::test]
async fn test_interrupting_boundary_event_cancels_its_activity() {
    let test = TestEngine::new().unwrap();
    let definition_id = test.deploy(fixtures::review_with_escalation()).await.unwrap();
    let id = test.start(&definition_id, variables(json!({}))).await.unwrap();

    let nodes = test.flow_nodes(&id).await.unwrap();
    let review = assert_flow_node_state(&nodes, "review", FlowNodeState::Waiting).unwrap();
    assert!(review.with_boundary);
    let escalation = assert_flow_node_state(&nodes, "escalation", FlowNodeState::Waiting).unwrap();
    assert_eq!(escalation.attached_to.as_ref(), Some(&review.id));

    test.send(MessageInstance::new("escalate", "Review")).await.unwrap();

    let archived = test.archived_flow_nodes(&id).await.unwrap();
    let review = archived.iter().find(|n| n.name == "review").unwrap();
    assert_eq!(review.state, FlowNodeState::Cancelled);
    assert!(archived.iter().any(|n| n.name == "escalated"));
    assert!(!archived.iter().any(|n| n.name == "done"));

    let instance = test.process_instance(&id).await.unwrap();
    assert_process_state(&instance, ProcessInstanceState::Completed).unwrap();
    assert!(test.waiting_events().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_completed_activity_aborts_its_boundary_event() {
    let test = TestEngine::new().unwrap();
    let definition_id = test.deploy(fixtures::review_with_escalation()).await.unwrap();
    let id = test.start(&definition_id, variables(json!({}))).await.unwrap();

    test.send(MessageInstance::new("approve", "Review")).await.unwrap();

    let archived = test.archived_flow_nodes(&id).await.unwrap();
    let escalation = archived.iter().find(|n| n.name == "escalation").unwrap();
    assert_eq!(escalation.state, FlowNodeState::Aborted);
    assert!(archived.iter().any(|n| n.name == "done"));
    assert!(!archived.iter().any(|n| n.name == "escalated"));

    let instance = test.process_instance(&id).await.unwrap();
    assert_process_state(&instance, ProcessInstanceState::Completed).unwrap();
    assert!(test.waiting_events().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_terminate_end_event_aborts_other_branches() {
    let test = TestEngine::new().unwrap();
    let definition_id = test.deploy(fixtures::terminated_early()).await.unwrap();

    let id = test.start(&definition_id, variables(json!({}))).await.unwrap();

    let archived = test.archived_flow_nodes(&id).await.unwrap();
    let wait = archived.iter().find(|n| n.name == "wait").unwrap();
    assert_eq!(wait.state, FlowNodeState::Aborted);
    assert!(archived.iter().any(|n| n.name == "stop"));
    assert!(!archived.iter().any(|n| n.name == "end"));

    let instance = test.process_instance(&id).await.unwrap();
    assert_process_state(&instance, ProcessInstanceState::Completed).unwrap();
    assert!(test.waiting_events().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_cancelled_instance_ends_cancelled() {
    let test = TestEngine::new().unwrap();
    let definition_id = test.deploy(fixtures::waiting()).await.unwrap();
    let id = test.start(&definition_id, variables(json!({}))).await.unwrap();

    test.engine.cancel_process_instance(&id).await.unwrap();
    test.engine.run_until_idle().await.unwrap();

    let instance = test.process_instance(&id).await.unwrap();
    assert_process_state(&instance, ProcessInstanceState::Cancelled).unwrap();
    assert!(instance.interrupted);
    let archived = test.archived_flow_nodes(&id).await.unwrap();
    let wait = archived.iter().find(|n| n.name == "awaitSignal").unwrap();
    assert_eq!(wait.state, FlowNodeState::Cancelled);
    assert!(test.waiting_events().await.unwrap().is_empty());

    let again = test.engine.cancel_process_instance(&id).await;
    assert!(matches!(again, Err(CoreError::InvalidStateTransition(_))));
}

#[tokio::test]
async fn test_cancel_flow_node_only_interrupts_once() {
    let test = TestEngine::new().unwrap();
    let definition_id = test.deploy(fixtures::waiting()).await.unwrap();
    let id = test.start(&definition_id, variables(json!({}))).await.unwrap();
    let wait = test.flow_node(&id, "awaitSignal").await.unwrap();

    assert!(test.engine.cancel_flow_node(&wait.id).await.unwrap());
    assert!(!test.engine.abort_flow_node(&wait.id).await.unwrap());
    test.engine.run_until_idle().await.unwrap();

    // The cancelled node is archived and its container moves on
    let archived = test.archived_flow_nodes(&id).await.unwrap();
    assert_eq!(
        archived.iter().find(|n| n.name == "awaitSignal").map(|n| n.state),
        Some(FlowNodeState::Cancelled)
    );
    assert!(test.engine.get_flow_node(&wait.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_in_progress_step_is_resumed_with_variables() {
    let behavior = Arc::new(InProgressBehavior::new());
    let test = TestEngine::builder()
        .behavior("charge", behavior.clone())
        .build()
        .unwrap();
    let definition_id = test.deploy(fixtures::single_task("payment", "Payment")).await.unwrap();
    let id = test.start(&definition_id, variables(json!({}))).await.unwrap();

    let nodes = test.flow_nodes(&id).await.unwrap();
    let charge = assert_flow_node_state(&nodes, "charge", FlowNodeState::Executing).unwrap();
    assert!(charge.lifecycle.executing);
    assert_eq!(behavior.calls(), 1);

    test.engine
        .resume_flow_node(&charge.id, variables(json!({"receipt": "R-1"})))
        .await
        .unwrap();
    test.engine.run_until_idle().await.unwrap();

    // The behavior is not run a second time
    assert_eq!(behavior.calls(), 1);
    let instance = test.process_instance(&id).await.unwrap();
    assert_process_state(&instance, ProcessInstanceState::Completed).unwrap();
    assert_variable(&instance, "receipt", json!("R-1")).unwrap();
}

#[tokio::test]
async fn test_resume_requires_a_step_in_progress() {
    let test = TestEngine::new().unwrap();
    let definition_id = test.deploy(fixtures::waiting()).await.unwrap();
    let id = test.start(&definition_id, variables(json!({}))).await.unwrap();
    let wait = test.flow_node(&id, "awaitSignal").await.unwrap();

    let result = test.engine.resume_flow_node(&wait.id, variables(json!({}))).await;
    assert!(matches!(result, Err(CoreError::InvalidStateTransition(_))));
    let result = test.engine.execute_flow_node(&wait.id).await;
    assert!(matches!(result, Err(CoreError::InvalidStateTransition(_))));
}
