use crate::types::TenantId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tenant owning process executions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    /// Identifier
    pub id: TenantId,
    /// Name
    pub name: String,
    /// Whether this is the tenant used when none is given
    pub default_tenant: bool,
    /// Paused tenants only accept maintenance operations
    pub paused: bool,
    /// Creation date
    pub created_at: DateTime<Utc>,
}

impl Tenant {
    /// New default tenant
    pub fn default_tenant(name: impl Into<String>) -> Self {
        Self {
            id: TenantId::generate(),
            name: name.into(),
            default_tenant: true,
            paused: false,
            created_at: Utc::now(),
        }
    }
}
