//! Mocks of the behavior, connector and expression traits.

use async_trait::async_trait;
use mockall::mock;
use runnel_core::{
    BehaviorOutcome, ConnectorExecutor, ExecutionError, Expression, ExpressionContext, ExpressionResolver,
    FlowNodeBehavior, FlowNodeInstance,
};
use serde_json::{Map, Value};

mock! {
    pub FlowNodeBehavior {}

    #[async_trait]
    impl FlowNodeBehavior for FlowNodeBehavior {
        async fn execute(
            &self,
            node: &FlowNodeInstance,
            variables: &mut Map<String, Value>,
        ) -> Result<BehaviorOutcome, ExecutionError>;
    }
}

mock! {
    pub ConnectorExecutor {}

    #[async_trait]
    impl ConnectorExecutor for ConnectorExecutor {
        async fn validate(&self, definition_id: &str, inputs: &Map<String, Value>) -> Result<(), ExecutionError>;
        async fn execute(
            &self,
            definition_id: &str,
            inputs: Map<String, Value>,
        ) -> Result<Map<String, Value>, ExecutionError>;
    }
}

mock! {
    pub ExpressionResolver {}

    #[async_trait]
    impl ExpressionResolver for ExpressionResolver {
        async fn evaluate(&self, expression: &Expression, context: &ExpressionContext) -> Result<Value, ExecutionError>;
        async fn evaluate_all(&self, expressions: &[Expression], context: &ExpressionContext) -> Result<Vec<Value>, ExecutionError>;
    }
}

/// Behavior mock completing every call
pub fn completing_behavior() -> MockFlowNodeBehavior {
    let mut behavior = MockFlowNodeBehavior::new();
    behavior.expect_execute().returning(|_, _| Ok(BehaviorOutcome::Completed));
    behavior
}

/// Connector mock accepting any input and returning `outputs`
pub fn connector_returning(outputs: Map<String, Value>) -> MockConnectorExecutor {
    let mut connector = MockConnectorExecutor::new();
    connector.expect_validate().returning(|_, _| Ok(()));
    connector.expect_execute().returning(move |_, _| Ok(outputs.clone()));
    connector
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_connector_returning() {
        let mut outputs = Map::new();
        outputs.insert("status".to_string(), json!("ok"));
        let connector = connector_returning(outputs.clone());

        connector.validate("http", &Map::new()).await.unwrap();
        assert_eq!(connector.execute("http", Map::new()).await.unwrap(), outputs);
    }
}
