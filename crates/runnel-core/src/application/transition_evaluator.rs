use crate::domain::definition::{ReturnType, TransitionDefinition};
use crate::domain::diagnostic::{scope, TYPE_SEPARATOR};
use crate::domain::expression::{ExpressionContext, ExpressionResolver};
use crate::error::{ExecutionError, ExecutionErrorKind};
use serde_json::Value;
use std::sync::Arc;
use tracing::trace;

/// Evaluates the boolean conditions guarding transitions
#[derive(Clone)]
pub struct TransitionConditionEvaluator {
    resolver: Arc<dyn ExpressionResolver>,
}

impl TransitionConditionEvaluator {
    /// Create a new evaluator
    pub fn new(resolver: Arc<dyn ExpressionResolver>) -> Self {
        Self { resolver }
    }

    /// Evaluate the condition of a transition.
    ///
    /// Returns `None` when the transition has no condition, which callers treat
    /// as always passing. The resolver is only invoked for boolean conditions.
    pub async fn evaluate_condition(
        &self,
        transition: &TransitionDefinition,
        context: &ExpressionContext,
    ) -> Result<Option<bool>, ExecutionError> {
        let Some(condition) = &transition.condition else {
            return Ok(None);
        };

        if condition.return_type != ReturnType::Boolean {
            return Err(condition_error(
                transition,
                context,
                "Condition expression must return a boolean",
                ExecutionError::expression(
                    &condition.name,
                    format!(
                        "Invalid return type {:?} for condition expression {}, expected Boolean",
                        condition.return_type, condition.name
                    ),
                ),
            ));
        }

        let value = self
            .resolver
            .evaluate(condition, context)
            .await
            .map_err(|e| condition_error(transition, context, "Unable to evaluate transition condition", e))?;
        trace!(transition = %transition.name, value = %value, "Evaluated transition condition");

        match value {
            Value::Bool(passes) => Ok(Some(passes)),
            other => Err(condition_error(
                transition,
                context,
                "Condition expression must return a boolean",
                ExecutionError::expression(&condition.name, format!("Condition returned {}", other)),
            )),
        }
    }
}

fn condition_error(
    transition: &TransitionDefinition,
    context: &ExpressionContext,
    message: &str,
    cause: ExecutionError,
) -> ExecutionError {
    ExecutionError::new(ExecutionErrorKind::TransitionConditionEvaluation, message)
        .with_transition(
            transition.display_name().map(str::to_string),
            target_label(transition, context),
        )
        .with_scope(scope::OUTGOING_TRANSITION)
        .caused_by(cause)
}

/// `type::name` of the transition target, when it can be resolved
fn target_label(transition: &TransitionDefinition, context: &ExpressionContext) -> Option<String> {
    let definition = context.process_definition.as_ref()?;
    let target = definition.flow_node(&transition.target)?;
    Some(format!("{}{}{}", target.node_type.label(), TYPE_SEPARATOR, target.name))
}
