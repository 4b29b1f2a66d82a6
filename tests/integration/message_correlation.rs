//! Messages delivered to catch events, message start events and event
//! sub-processes

use runnel_core::domain::repository::Entity;
use runnel_core::{FlowNodeState, MessageInstance, ProcessInstanceState, WaitingEventKind};
use runnel_test_utils::assertions::{assert_flow_node_state, assert_process_state, assert_variable};
use runnel_test_utils::implementations::RecordingBehavior;
use runnel_test_utils::{variables, TestEngine};
use runnel_tests::fixtures;
use serde_json::json;
use std::sync::Arc;

fn shipped(order: &str) -> MessageInstance {
    MessageInstance::new("shipped", "Shipping")
        .with_correlations(vec![("orderId".to_string(), order.to_string())])
        .with_data("carrier", json!("DHL"))
}

#[tokio::test]
async fn test_catch_event_waits_for_its_correlated_message() {
    let test = TestEngine::new().unwrap();
    let definition_id = test.deploy(fixtures::shipping()).await.unwrap();
    let first = test.start(&definition_id, variables(json!({"order": "A-1"}))).await.unwrap();
    let second = test.start(&definition_id, variables(json!({"order": "B-2"}))).await.unwrap();

    let nodes = test.flow_nodes(&first).await.unwrap();
    assert_flow_node_state(&nodes, "awaitShipment", FlowNodeState::Waiting).unwrap();
    let events = test.waiting_events().await.unwrap();
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.kind == WaitingEventKind::IntermediateCatch));

    test.send(shipped("B-2")).await.unwrap();

    let instance = test.process_instance(&second).await.unwrap();
    assert_process_state(&instance, ProcessInstanceState::Completed).unwrap();
    assert_variable(&instance, "carrier", json!("DHL")).unwrap();

    let instance = test.process_instance(&first).await.unwrap();
    assert_process_state(&instance, ProcessInstanceState::Started).unwrap();
    assert!(instance.variables.get("carrier").is_none());
    assert_eq!(test.waiting_events().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_uncorrelated_message_stays_pending() {
    let test = TestEngine::new().unwrap();
    let definition_id = test.deploy(fixtures::shipping()).await.unwrap();
    let id = test.start(&definition_id, variables(json!({"order": "A-1"}))).await.unwrap();

    test.send(shipped("Z-9")).await.unwrap();
    test.send(MessageInstance::new("shipped", "Billing")).await.unwrap();

    let nodes = test.flow_nodes(&id).await.unwrap();
    assert_flow_node_state(&nodes, "awaitShipment", FlowNodeState::Waiting).unwrap();

    // A message arriving later than its waiting event is still delivered
    test.send(shipped("A-1")).await.unwrap();
    let instance = test.process_instance(&id).await.unwrap();
    assert_process_state(&instance, ProcessInstanceState::Completed).unwrap();
}

#[tokio::test]
async fn test_message_start_event_creates_an_instance() {
    let test = TestEngine::new().unwrap();
    test.deploy(fixtures::order_intake()).await.unwrap();

    let events = test.waiting_events().await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, WaitingEventKind::Start);
    assert!(test.process_instances().await.unwrap().is_empty());

    test.send(MessageInstance::new("newOrder", "OrderIntake").with_data("amount", json!(42)))
        .await
        .unwrap();

    let instances = test.process_instances().await.unwrap();
    assert_eq!(instances.len(), 1);
    assert_process_state(&instances[0], ProcessInstanceState::Completed).unwrap();
    assert_variable(&instances[0], "amount", json!(42)).unwrap();
    assert!(test
        .archived_names(&instances[0].id)
        .await
        .unwrap()
        .contains(&"onOrder".to_string()));

    // The start event listens again for the next message
    let events = test.waiting_events().await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, WaitingEventKind::Start);

    test.send(MessageInstance::new("newOrder", "OrderIntake").with_data("amount", json!(7)))
        .await
        .unwrap();
    assert_eq!(test.process_instances().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_undeliverable_start_message_is_discarded() {
    let test = TestEngine::new().unwrap();
    test.deploy(fixtures::order_intake()).await.unwrap();

    // Without an amount the start event operation cannot be evaluated
    test.send(MessageInstance::new("newOrder", "OrderIntake")).await.unwrap();

    assert!(test.process_instances().await.unwrap().is_empty());
    assert!(test.backend.persistence.records(MessageInstance::TABLE).await.is_empty());
    let events = test.waiting_events().await.unwrap();
    assert_eq!(events.len(), 1);
    assert!(!events[0].locked);
    assert!(events[0].matched_message.is_none());

    // The start event still accepts the next message
    test.send(MessageInstance::new("newOrder", "OrderIntake").with_data("amount", json!(42)))
        .await
        .unwrap();
    let instances = test.process_instances().await.unwrap();
    assert_eq!(instances.len(), 1);
    assert_variable(&instances[0], "amount", json!(42)).unwrap();
}

#[tokio::test]
async fn test_interrupting_event_sub_process_replaces_the_flow() {
    let recorder = RecordingBehavior::new();
    let test = TestEngine::builder()
        .behavior("refund", Arc::new(recorder.clone()))
        .build()
        .unwrap();
    let definition_id = test.deploy(fixtures::order_with_cancellation_handler()).await.unwrap();
    let id = test.start(&definition_id, variables(json!({}))).await.unwrap();

    let events = test.waiting_events().await.unwrap();
    assert!(events.iter().any(|e| e.kind == WaitingEventKind::EventSubProcess));
    let nodes = test.flow_nodes(&id).await.unwrap();
    assert_flow_node_state(&nodes, "awaitPayment", FlowNodeState::Waiting).unwrap();

    test.send(MessageInstance::new("cancelOrder", "Order")).await.unwrap();

    assert_eq!(recorder.executed(), vec!["refund".to_string()]);
    let archived = test.archived_flow_nodes(&id).await.unwrap();
    let payment = archived.iter().find(|n| n.name == "awaitPayment").unwrap();
    assert_eq!(payment.state, FlowNodeState::Cancelled);
    assert!(archived.iter().any(|n| n.name == "handled"));
    assert!(!archived.iter().any(|n| n.name == "end"));

    let instance = test.process_instance(&id).await.unwrap();
    assert_process_state(&instance, ProcessInstanceState::Completed).unwrap();
    assert!(test.waiting_events().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_event_sub_process_registration_ends_with_the_instance() {
    let test = TestEngine::new().unwrap();
    let definition_id = test.deploy(fixtures::order_with_cancellation_handler()).await.unwrap();
    let id = test.start(&definition_id, variables(json!({}))).await.unwrap();
    assert_eq!(test.waiting_events().await.unwrap().len(), 2);

    test.send(MessageInstance::new("payment", "Order")).await.unwrap();

    let instance = test.process_instance(&id).await.unwrap();
    assert_process_state(&instance, ProcessInstanceState::Completed).unwrap();
    assert!(test.waiting_events().await.unwrap().is_empty());
}
