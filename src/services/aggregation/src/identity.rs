//! Identity service client: user and tenant lookups

use crate::client::ServiceClient;
use crate::wrapper::{take_list, take_object, ResourceWrapper};
use async_trait::async_trait;
use horizon_shared::ApiResult;
use serde_json::Value;

const SERVICE: &str = "identity";

crate::api_wrapper!(
    /// Identity user
    User,
    "User",
    ["id", "name", "email", "enabled", "tenantId", "default_project_id"]
);

crate::api_wrapper!(
    /// Identity tenant (project)
    Tenant,
    "Tenant",
    ["id", "name", "description", "enabled"]
);

#[async_trait]
pub trait IdentityApi: Send + Sync {
    async fn user_get(&self, user_id: &str) -> ApiResult<User>;

    async fn user_list(&self) -> ApiResult<Vec<User>>;

    async fn tenant_get(&self, tenant_id: &str) -> ApiResult<Tenant>;

    /// Tenants plus whether the backend has more pages
    async fn tenant_list(&self) -> ApiResult<(Vec<Tenant>, bool)>;
}

/// HTTP implementation of `IdentityApi` on the admin interface
#[derive(Debug, Clone)]
pub struct IdentityClient {
    client: ServiceClient,
}

impl IdentityClient {
    /// Create a new identity client
    pub fn new(client: ServiceClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl IdentityApi for IdentityClient {
    async fn user_get(&self, user_id: &str) -> ApiResult<User> {
        let body: Value = self
            .client
            .get_json(&format!("users/{}", user_id), &[])
            .await?;
        User::wrap(take_object(body, SERVICE, "user")?)
    }

    async fn user_list(&self) -> ApiResult<Vec<User>> {
        let body: Value = self.client.get_json("users", &[]).await?;
        User::wrap_all(take_list(body, SERVICE, "users")?)
    }

    async fn tenant_get(&self, tenant_id: &str) -> ApiResult<Tenant> {
        let body: Value = self
            .client
            .get_json(&format!("tenants/{}", tenant_id), &[])
            .await?;
        Tenant::wrap(take_object(body, SERVICE, "tenant")?)
    }

    async fn tenant_list(&self) -> ApiResult<(Vec<Tenant>, bool)> {
        let body: Value = self.client.get_json("tenants", &[]).await?;
        let has_more = body
            .get("tenants_links")
            .and_then(Value::as_array)
            .map(|links| !links.is_empty())
            .unwrap_or(false);
        let tenants = Tenant::wrap_all(take_list(body, SERVICE, "tenants")?)?;
        Ok((tenants, has_more))
    }
}
