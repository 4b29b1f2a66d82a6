//! Identifier types shared across the engine.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            /// Wrap an existing identifier
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Generate a fresh random identifier
            pub fn generate() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            /// Borrow the raw identifier
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }
    };
}

string_id!(
    /// Identifier of a running flow node
    FlowNodeInstanceId
);
string_id!(
    /// Identifier of a process instance
    ProcessInstanceId
);
string_id!(
    /// Identifier of a deployed process definition
    ProcessDefinitionId
);
string_id!(
    /// Identifier of a flow node inside a process definition
    FlowNodeDefinitionId
);
string_id!(
    /// Identifier of a persisted failure record
    FailureId
);
string_id!(
    /// Identifier of a waiting event registration
    WaitingEventId
);
string_id!(
    /// Identifier of a thrown message
    MessageInstanceId
);
string_id!(
    /// Identifier of a unit of work
    WorkId
);
string_id!(
    /// Identifier of a tenant
    TenantId
);
