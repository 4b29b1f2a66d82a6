//! Business failures: failed flow nodes and their failure records

use runnel_core::domain::diagnostic::scope;
use runnel_core::{ConnectorEvent, FlowNodeState, ProcessInstanceState};
use runnel_test_utils::assertions::{
    assert_failure, assert_failure_message, assert_flow_node_state, assert_process_state, assert_variable,
    single_failure,
};
use runnel_test_utils::implementations::{ConnectorScript, FailingBehavior, ScriptedConnectorExecutor};
use runnel_test_utils::mocks::connector_returning;
use runnel_test_utils::{variables, TestEngine};
use runnel_tests::fixtures;
use serde_json::json;
use std::sync::Arc;

#[tokio::test]
async fn test_failing_condition_marks_the_source_failed() {
    let test = TestEngine::new().unwrap();
    let definition_id = test.deploy(fixtures::approval_check()).await.unwrap();

    // `approved` is never set
    let id = test.start(&definition_id, variables(json!({}))).await.unwrap();

    let nodes = test.flow_nodes(&id).await.unwrap();
    let check = assert_flow_node_state(&nodes, "check", FlowNodeState::Failed).unwrap();
    assert!(check.terminal);

    let failures = test.engine.get_flow_node_failures(&check.id).await.unwrap();
    let failure = single_failure(&failures).unwrap();
    assert_failure(
        failure,
        scope::OUTGOING_TRANSITION,
        "toApproved//to::end_event::approvedEnd//expression::approvedCheck",
    )
    .unwrap();
    assert_failure_message(failure, "approved").unwrap();
    assert_eq!(failure.process_instance_id, id);

    // Neither end event was reached, the instance stays open
    let archived = test.archived_names(&id).await.unwrap();
    assert!(!archived.iter().any(|n| n.ends_with("End")));
    let instance = test.process_instance(&id).await.unwrap();
    assert_process_state(&instance, ProcessInstanceState::Started).unwrap();
}

#[tokio::test]
async fn test_passing_condition_is_not_a_failure() {
    let test = TestEngine::new().unwrap();
    let definition_id = test.deploy(fixtures::approval_check()).await.unwrap();

    let id = test.start(&definition_id, variables(json!({"approved": true}))).await.unwrap();

    let instance = test.process_instance(&id).await.unwrap();
    assert_process_state(&instance, ProcessInstanceState::Completed).unwrap();
    assert!(test.archived_names(&id).await.unwrap().contains(&"approvedEnd".to_string()));
}

#[tokio::test]
async fn test_behavior_failure_is_recorded() {
    let test = TestEngine::builder()
        .behavior("charge", Arc::new(FailingBehavior::new("boom")))
        .build()
        .unwrap();
    let definition_id = test.deploy(fixtures::single_task("payment", "Payment")).await.unwrap();

    let id = test.start(&definition_id, variables(json!({}))).await.unwrap();

    let nodes = test.flow_nodes(&id).await.unwrap();
    let charge = assert_flow_node_state(&nodes, "charge", FlowNodeState::Failed).unwrap();
    let failures = test.engine.get_flow_node_failures(&charge.id).await.unwrap();
    let failure = single_failure(&failures).unwrap();
    assert_failure(failure, scope::UNKNOWN, "").unwrap();
    assert_eq!(failure.error_message, "boom");
    assert!(!failure.stack_trace.is_empty());

    let instance = test.process_instance(&id).await.unwrap();
    assert_process_state(&instance, ProcessInstanceState::Started).unwrap();
}

#[tokio::test]
async fn test_connector_outputs_become_variables() {
    let mut outputs = serde_json::Map::new();
    outputs.insert("status".to_string(), json!(202));
    let test = TestEngine::builder()
        .connectors(Arc::new(connector_returning(outputs)))
        .build()
        .unwrap();
    let definition_id = test
        .deploy(fixtures::with_connector(fixtures::notifier("http", ConnectorEvent::OnFinish)))
        .await
        .unwrap();

    let id = test.start(&definition_id, variables(json!({}))).await.unwrap();

    let instance = test.process_instance(&id).await.unwrap();
    assert_process_state(&instance, ProcessInstanceState::Completed).unwrap();
    assert_variable(&instance, "status", json!(202)).unwrap();
}

#[tokio::test]
async fn test_connector_receives_evaluated_inputs() {
    let mut outputs = serde_json::Map::new();
    outputs.insert("status".to_string(), json!(200));
    let connectors = Arc::new(ScriptedConnectorExecutor::new().with_script("http", ConnectorScript::Outputs(outputs)));
    let test = TestEngine::builder().connectors(connectors.clone()).build().unwrap();
    let definition_id = test
        .deploy(fixtures::with_connector(fixtures::notifier("http", ConnectorEvent::OnEnter)))
        .await
        .unwrap();

    test.start(&definition_id, variables(json!({}))).await.unwrap();

    let received = connectors.received();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].0, "http");
    assert_eq!(received[0].1.get("url"), Some(&json!("https://example.org/hook")));
}

#[tokio::test]
async fn test_rejected_connector_inputs_fail_the_node() {
    let connectors = Arc::new(
        ScriptedConnectorExecutor::new().with_script("mail", ConnectorScript::RejectInputs("no recipient".to_string())),
    );
    let test = TestEngine::builder().connectors(connectors).build().unwrap();
    let definition_id = test
        .deploy(fixtures::with_connector(fixtures::notifier("mail", ConnectorEvent::OnEnter)))
        .await
        .unwrap();

    let id = test.start(&definition_id, variables(json!({}))).await.unwrap();

    let nodes = test.flow_nodes(&id).await.unwrap();
    let notify = assert_flow_node_state(&nodes, "notify", FlowNodeState::Failed).unwrap();
    let failures = test.engine.get_flow_node_failures(&notify.id).await.unwrap();
    let failure = single_failure(&failures).unwrap();
    assert_failure(failure, scope::CONNECTOR, "notifier::mail::on_enter//input-validation").unwrap();
    assert_failure_message(failure, "no recipient").unwrap();
}

#[tokio::test]
async fn test_missing_connector_executor_fails_the_node() {
    let test = TestEngine::new().unwrap();
    let definition_id = test
        .deploy(fixtures::with_connector(fixtures::notifier("http", ConnectorEvent::OnFinish)))
        .await
        .unwrap();

    let id = test.start(&definition_id, variables(json!({}))).await.unwrap();

    let nodes = test.flow_nodes(&id).await.unwrap();
    let notify = assert_flow_node_state(&nodes, "notify", FlowNodeState::Failed).unwrap();
    let failures = test.engine.get_flow_node_failures(&notify.id).await.unwrap();
    let failure = single_failure(&failures).unwrap();
    assert_eq!(failure.scope, scope::CONNECTOR);
    assert!(failure.context.starts_with("notifier::http::on_finish"));
}
