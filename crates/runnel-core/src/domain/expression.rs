//! Expression evaluation contract.

use crate::domain::definition::{Expression, ExpressionType, ProcessDefinition, ReturnType};
use crate::domain::flow_node::ContainerRef;
use crate::error::ExecutionError;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Where an expression is evaluated
#[derive(Debug, Clone, Default)]
pub struct ExpressionContext {
    /// Container of the evaluating construct
    pub container: Option<ContainerRef>,
    /// Process definition, used to resolve flow node names
    pub process_definition: Option<Arc<ProcessDefinition>>,
    /// Variables visible to the expression
    pub variables: Map<String, Value>,
}

impl ExpressionContext {
    /// Context with only a process definition
    pub fn for_definition(process_definition: Arc<ProcessDefinition>) -> Self {
        Self {
            process_definition: Some(process_definition),
            ..Default::default()
        }
    }

    /// Set the container
    pub fn in_container(mut self, container: ContainerRef) -> Self {
        self.container = Some(container);
        self
    }

    /// Set the visible variables
    pub fn with_variables(mut self, variables: Map<String, Value>) -> Self {
        self.variables = variables;
        self
    }

    /// Add variables, replacing existing ones with the same name
    pub fn extend_variables(&mut self, variables: &Map<String, Value>) {
        for (name, value) in variables {
            self.variables.insert(name.clone(), value.clone());
        }
    }
}

/// Evaluates expressions. Failures carry the expression name
/// (`ExecutionErrorKind::ExpressionEvaluation`).
#[async_trait]
pub trait ExpressionResolver: Send + Sync {
    /// Evaluate one expression
    async fn evaluate(&self, expression: &Expression, context: &ExpressionContext) -> Result<Value, ExecutionError>;

    /// Evaluate several expressions, in order
    async fn evaluate_all(
        &self,
        expressions: &[Expression],
        context: &ExpressionContext,
    ) -> Result<Vec<Value>, ExecutionError> {
        futures::future::try_join_all(expressions.iter().map(|expression| self.evaluate(expression, context))).await
    }
}

/// Resolver for constants, variables and JMESPath queries over the context
/// variables
#[derive(Debug, Default, Clone)]
pub struct StandardExpressionResolver;

impl StandardExpressionResolver {
    /// Create a resolver
    pub fn new() -> Self {
        Self
    }

    fn resolve(expression: &Expression, context: &ExpressionContext) -> Result<Value, ExecutionError> {
        let value = match expression.expression_type {
            ExpressionType::Constant => serde_json::from_str::<Value>(&expression.content)
                .unwrap_or_else(|_| Value::String(expression.content.clone())),
            ExpressionType::Variable => context.variables.get(&expression.content).cloned().ok_or_else(|| {
                ExecutionError::expression(
                    &expression.name,
                    format!("Variable '{}' is not defined", expression.content),
                )
            })?,
            ExpressionType::Query => {
                let compiled = jmespath::compile(&expression.content).map_err(|e| {
                    ExecutionError::expression(
                        &expression.name,
                        format!("Failed to compile JMESPath expression {}: {}", expression.content, e),
                    )
                })?;
                let data = Value::Object(context.variables.clone());
                let result = compiled.search(data).map_err(|e| {
                    ExecutionError::expression(
                        &expression.name,
                        format!("Failed to evaluate JMESPath expression {}: {}", expression.content, e),
                    )
                })?;
                serde_json::to_value(&*result).map_err(|e| ExecutionError::expression(&expression.name, e.to_string()))?
            }
        };
        check_return_type(expression, value)
    }
}

fn check_return_type(expression: &Expression, value: Value) -> Result<Value, ExecutionError> {
    let valid = match expression.return_type {
        ReturnType::Boolean => value.is_boolean(),
        ReturnType::String => value.is_string(),
        ReturnType::Integer => value.is_i64() || value.is_u64(),
        ReturnType::Decimal => value.is_number(),
        ReturnType::Json => true,
    };
    if valid {
        Ok(value)
    } else {
        Err(ExecutionError::expression(
            &expression.name,
            format!(
                "Expression {} returned {} which is not a {:?}",
                expression.name, value, expression.return_type
            ),
        ))
    }
}

#[async_trait]
impl ExpressionResolver for StandardExpressionResolver {
    async fn evaluate(&self, expression: &Expression, context: &ExpressionContext) -> Result<Value, ExecutionError> {
        Self::resolve(expression, context)
    }
}
