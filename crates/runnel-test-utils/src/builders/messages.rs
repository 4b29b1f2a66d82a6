//! Message triggers.

use runnel_core::{CatchMessageTrigger, CorrelationDefinition, Expression, ReturnType, ThrowMessageTrigger};

/// Catch trigger without correlation nor operation
pub fn catch(message_name: &str) -> CatchMessageTrigger {
    CatchMessageTrigger {
        message_name: message_name.to_string(),
        correlations: Vec::new(),
        operations: Vec::new(),
    }
}

/// Throw trigger addressed to a process by name
pub fn throw(message_name: &str, target_process: &str) -> ThrowMessageTrigger {
    ThrowMessageTrigger {
        message_name: message_name.to_string(),
        target_process: Expression::text("targetProcess", target_process),
        target_flow_node: None,
        correlations: Vec::new(),
        data: Vec::new(),
    }
}

/// Correlation whose value is read from a process variable
pub fn correlation(key: &str, variable: &str) -> CorrelationDefinition {
    CorrelationDefinition {
        key: Expression::text(format!("{}Key", key), key),
        value: Expression::variable(format!("{}Value", key), variable, ReturnType::String),
    }
}
