//! Assertions on flow node failure records.

use runnel_core::BpmFailure;
use thiserror::Error;

/// Error type for failure record validation
#[derive(Debug, Error)]
pub enum FailureValidationError {
    #[error("Expected {expected} failure records, got {actual}")]
    UnexpectedCount { expected: usize, actual: usize },

    #[error("Invalid failure scope: expected {expected}, got {actual}")]
    InvalidScope { expected: String, actual: String },

    #[error("Invalid failure context: expected {expected}, got {actual}")]
    InvalidContext { expected: String, actual: String },

    #[error("Failure message {actual:?} does not contain {expected:?}")]
    InvalidMessage { expected: String, actual: String },
}

/// Asserts that exactly one failure was recorded and returns it
pub fn single_failure(failures: &[BpmFailure]) -> Result<&BpmFailure, FailureValidationError> {
    match failures {
        [failure] => Ok(failure),
        _ => Err(FailureValidationError::UnexpectedCount {
            expected: 1,
            actual: failures.len(),
        }),
    }
}

/// Asserts the scope and the context path of a failure
pub fn assert_failure(failure: &BpmFailure, scope: &str, context: &str) -> Result<(), FailureValidationError> {
    if failure.scope != scope {
        return Err(FailureValidationError::InvalidScope {
            expected: scope.to_string(),
            actual: failure.scope.clone(),
        });
    }
    if failure.context != context {
        return Err(FailureValidationError::InvalidContext {
            expected: context.to_string(),
            actual: failure.context.clone(),
        });
    }
    Ok(())
}

/// Asserts that the root cause message of a failure contains `fragment`
pub fn assert_failure_message(failure: &BpmFailure, fragment: &str) -> Result<(), FailureValidationError> {
    if !failure.error_message.contains(fragment) {
        return Err(FailureValidationError::InvalidMessage {
            expected: fragment.to_string(),
            actual: failure.error_message.clone(),
        });
    }
    Ok(())
}
