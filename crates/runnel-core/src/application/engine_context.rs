use crate::application::unit_of_work::TransactionService;
use crate::domain::platform::Tenant;
use crate::domain::repository::{queries, SelectListDescriptor};
use crate::error::CoreError;
use crate::types::TenantId;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Process-wide engine state: the default tenant and its pause flag.
///
/// The tenant is loaded lazily on first use, created when the store has none.
pub struct EngineContext {
    /// Transaction boundaries
    transactions: TransactionService,

    /// Name given to the tenant created on first start
    default_tenant_name: String,

    /// Cached default tenant
    tenant: RwLock<Option<Tenant>>,
}

impl EngineContext {
    /// Create a new context
    pub fn new(transactions: TransactionService, default_tenant_name: impl Into<String>) -> Self {
        Self {
            transactions,
            default_tenant_name: default_tenant_name.into(),
            tenant: RwLock::new(None),
        }
    }

    /// Default tenant, loaded or created on first call
    pub async fn tenant(&self) -> Result<Tenant, CoreError> {
        if let Some(tenant) = self.tenant.read().await.as_ref() {
            return Ok(tenant.clone());
        }

        let mut cached = self.tenant.write().await;
        if let Some(tenant) = cached.as_ref() {
            return Ok(tenant.clone());
        }
        let tenant = self.load_or_create().await?;
        *cached = Some(tenant.clone());
        Ok(tenant)
    }

    /// Identifier of the default tenant
    pub async fn tenant_id(&self) -> Result<TenantId, CoreError> {
        Ok(self.tenant().await?.id)
    }

    /// Whether the tenant only accepts maintenance operations
    pub async fn is_paused(&self) -> Result<bool, CoreError> {
        Ok(self.tenant().await?.paused)
    }

    /// Pause or resume the tenant
    pub async fn set_paused(&self, paused: bool) -> Result<(), CoreError> {
        let tenant_id = self.tenant_id().await?;
        let mut scope = self.transactions.begin(Some(tenant_id.clone())).await?;
        let mut tenant: Tenant = scope.tx().get(tenant_id.as_str()).await?;
        tenant.paused = paused;
        scope.tx().update(&tenant).await?;
        self.transactions.commit(scope).await?;

        info!(tenant_id = %tenant.id, paused, "Tenant pause state changed");
        *self.tenant.write().await = Some(tenant);
        Ok(())
    }

    /// Forget the cached tenant; the next call reloads it
    pub async fn clear(&self) {
        *self.tenant.write().await = None;
    }

    async fn load_or_create(&self) -> Result<Tenant, CoreError> {
        let mut scope = self.transactions.begin(None).await?;
        let query = SelectListDescriptor::new(queries::GET_DEFAULT_TENANT)
            .with_parameter("default_tenant", true)
            .paged(0, 1);
        let existing: Vec<Tenant> = scope.tx().select_list(&query).await?;
        if let Some(tenant) = existing.into_iter().next() {
            scope.rollback().await?;
            debug!(tenant_id = %tenant.id, "Default tenant loaded");
            return Ok(tenant);
        }

        let tenant = Tenant::default_tenant(&self.default_tenant_name);
        scope.tx().insert(&tenant).await?;
        self.transactions.commit(scope).await?;
        info!(tenant_id = %tenant.id, name = %tenant.name, "Default tenant created");
        Ok(tenant)
    }
}
