//! Process instances driven by the worker pool instead of `run_until_idle`

use runnel_core::{EngineConfig, ProcessInstanceState};
use runnel_test_utils::assertions::assert_process_state;
use runnel_test_utils::harness::test_config;
use runnel_test_utils::implementations::RecordingBehavior;
use runnel_test_utils::{variables, TestEngine};
use runnel_tests::fixtures;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_workers_complete_started_instances() {
    let recorder = RecordingBehavior::new();
    let config = EngineConfig {
        worker_count: 3,
        ..test_config()
    };
    let test = TestEngine::builder_with_config(config)
        .behavior("ship", Arc::new(recorder.clone()))
        .build()
        .unwrap();
    let definition_id = test.deploy(fixtures::linear()).await.unwrap();

    let mut ids = Vec::new();
    for order in 0..5 {
        let id = test
            .engine
            .start_process(&definition_id, variables(json!({ "order": order })))
            .await
            .unwrap();
        ids.push(id);
    }

    for id in &ids {
        assert!(test.wait_for_completion(id, TIMEOUT).await.unwrap(), "{} did not complete", id);
        let instance = test.process_instance(id).await.unwrap();
        assert_process_state(&instance, ProcessInstanceState::Completed).unwrap();
    }
    assert_eq!(recorder.executed().len(), 5);
    test.engine.shutdown().await;
}

#[tokio::test]
async fn test_paused_workers_hold_work_until_resumed() {
    let test = TestEngine::new().unwrap();
    let definition_id = test.deploy(fixtures::linear()).await.unwrap();
    let id = test
        .engine
        .start_process(&definition_id, variables(json!({})))
        .await
        .unwrap();

    test.engine.pause().await.unwrap();
    assert!(!test.wait_for_completion(&id, Duration::from_millis(100)).await.unwrap());
    assert!(test.archived_names(&id).await.unwrap().is_empty());

    test.engine.resume().await.unwrap();
    assert!(test.wait_for_completion(&id, TIMEOUT).await.unwrap());
    let instance = test.process_instance(&id).await.unwrap();
    assert_process_state(&instance, ProcessInstanceState::Completed).unwrap();
    test.engine.shutdown().await;
}
