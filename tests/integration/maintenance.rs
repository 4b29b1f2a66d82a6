//! Paused tenants and deployment rules

use runnel_core::{CoreError, ProcessInstanceState};
use runnel_test_utils::assertions::assert_process_state;
use runnel_test_utils::{variables, TestEngine};
use runnel_tests::fixtures;
use serde_json::json;

#[tokio::test]
async fn test_paused_tenant_only_accepts_maintenance_operations() {
    let test = TestEngine::new().unwrap();
    let definition_id = test.deploy(fixtures::waiting()).await.unwrap();
    let id = test.start(&definition_id, variables(json!({}))).await.unwrap();

    test.engine.pause().await.unwrap();

    let result = test.engine.start_process(&definition_id, variables(json!({}))).await;
    assert!(matches!(result, Err(CoreError::MaintenanceMode(_))));
    let result = test.engine.cancel_process_instance(&id).await;
    assert!(matches!(result, Err(CoreError::MaintenanceMode(_))));
    let result = test.engine.deploy(fixtures::linear()).await;
    assert!(matches!(result, Err(CoreError::MaintenanceMode(_))));

    // Reads and recovery stay available
    let instance = test.process_instance(&id).await.unwrap();
    assert_process_state(&instance, ProcessInstanceState::Started).unwrap();
    assert_eq!(test.flow_nodes(&id).await.unwrap().len(), 1);
    test.engine.recover().await.unwrap();
    // Work is held while paused
    assert_eq!(test.engine.run_until_idle().await.unwrap(), 0);

    test.engine.resume().await.unwrap();
    test.engine.run_until_idle().await.unwrap();
    test.engine.cancel_process_instance(&id).await.unwrap();
    test.engine.run_until_idle().await.unwrap();

    let instance = test.process_instance(&id).await.unwrap();
    assert_process_state(&instance, ProcessInstanceState::Cancelled).unwrap();
}

#[tokio::test]
async fn test_definition_is_deployed_once() {
    let test = TestEngine::new().unwrap();
    test.deploy(fixtures::linear()).await.unwrap();

    let result = test.engine.deploy(fixtures::linear()).await;
    assert!(matches!(result, Err(CoreError::ConsistencyError(_))));
}
