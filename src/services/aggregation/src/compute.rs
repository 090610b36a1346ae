//! Compute service client and wrappers

use crate::client::ServiceClient;
use crate::floating_ip::{FloatingIp, FloatingIpPool};
use crate::image::ImageApi;
use crate::quota::QuotaSet;
use crate::wrapper::{coerce_i64, take_list, take_object, ApiResource, AttrSet, ResourceWrapper};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use horizon_shared::{ApiError, ApiResult};
use once_cell::sync::OnceCell;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

/// Image name reported when the image service cannot resolve a server image
pub const IMAGE_NOT_FOUND: &str = "(not found)";

const SERVICE: &str = "compute";

// ============================================================================
// WRAPPERS
// ============================================================================

/// Compute instance
#[derive(Debug, Clone, Serialize)]
#[serde(transparent)]
pub struct Server {
    resource: ApiResource,
    #[serde(skip)]
    image_name: tokio::sync::OnceCell<String>,
}

impl ResourceWrapper for Server {
    const KIND: &'static str = "Server";
    const ATTRS: AttrSet = AttrSet::Fixed(&[
        "addresses",
        "attrs",
        "id",
        "image",
        "links",
        "metadata",
        "name",
        "private_ip",
        "public_ip",
        "status",
        "uuid",
        "VirtualInterfaces",
        "flavor",
        "key_name",
        "tenant_id",
        "user_id",
        "OS-EXT-STS:power_state",
        "OS-EXT-STS:task_state",
        "OS-EXT-SRV-ATTR:instance_name",
        "OS-EXT-SRV-ATTR:host",
    ]);

    fn from_resource(resource: ApiResource) -> Self {
        Self {
            resource,
            image_name: tokio::sync::OnceCell::new(),
        }
    }

    fn resource(&self) -> &ApiResource {
        &self.resource
    }
}

impl std::ops::Deref for Server {
    type Target = ApiResource;

    fn deref(&self) -> &Self::Target {
        &self.resource
    }
}

impl Server {
    /// Flavor id the server was booted from
    pub fn flavor_id(&self) -> ApiResult<String> {
        match self.get("flavor")?.get("id") {
            Some(Value::String(id)) => Ok(id.clone()),
            Some(Value::Number(id)) => Ok(id.to_string()),
            _ => Err(ApiError::missing(Self::KIND, "flavor.id")),
        }
    }

    /// Image id; volume-booted servers have none
    pub fn image_id(&self) -> Option<String> {
        self.get_opt("image")
            .and_then(|image| image.get("id"))
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    /// Hypervisor-side instance name
    pub fn internal_name(&self) -> &str {
        self.opt_str("OS-EXT-SRV-ATTR:instance_name").unwrap_or("")
    }

    /// Image name, resolved once through the image service.
    ///
    /// Any failure yields `"(not found)"`.
    pub async fn image_name(&self, images: &dyn ImageApi) -> &str {
        self.image_name
            .get_or_init(|| async {
                let image_id = match self.image_id() {
                    Some(id) => id,
                    None => return IMAGE_NOT_FOUND.to_string(),
                };
                match images.image_get(&image_id).await {
                    Ok(image) => image.name().to_string(),
                    Err(e) => {
                        debug!(image_id = %image_id, error = %e, "image lookup failed");
                        IMAGE_NOT_FOUND.to_string()
                    }
                }
            })
            .await
            .as_str()
    }
}

crate::api_wrapper!(
    /// Instance size template
    Flavor,
    "Flavor",
    [
        "id",
        "name",
        "vcpus",
        "ram",
        "disk",
        "swap",
        "OS-FLV-EXT-DATA:ephemeral",
        "os-flavor-access:is_public",
        "rxtx_factor",
        "links",
    ]
);

impl Flavor {
    pub fn vcpus(&self) -> i64 {
        self.get_i64("vcpus").unwrap_or(0)
    }

    pub fn ram(&self) -> i64 {
        self.get_i64("ram").unwrap_or(0)
    }

    /// Value of a numeric flavor field, zero when absent
    pub fn field(&self, field: &str) -> i64 {
        self.get_i64(field).unwrap_or(0)
    }
}

crate::api_wrapper!(
    /// Simple tenant usage report
    Usage,
    "Usage",
    [
        "start",
        "server_usages",
        "stop",
        "tenant_id",
        "total_local_gb_usage",
        "total_memory_mb_usage",
        "total_vcpus_usage",
        "total_hours",
    ]
);

/// Aggregate figures of a usage report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageSummary {
    pub instances: i64,
    pub memory_mb: i64,
    pub vcpus: f64,
    pub vcpu_hours: f64,
    pub local_gb: i64,
    pub disk_gb_hours: f64,
}

impl Usage {
    fn active_servers(&self) -> impl Iterator<Item = &Value> {
        self.get_opt("server_usages")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter(|s| s.get("ended_at").map(Value::is_null).unwrap_or(true))
    }

    fn sum_active(&self, field: &str) -> i64 {
        self.active_servers()
            .filter_map(|s| s.get(field).and_then(coerce_i64))
            .sum()
    }

    fn float(&self, attr: &str) -> f64 {
        self.get_opt(attr)
            .and_then(|v| match v {
                Value::String(s) => s.parse().ok(),
                other => other.as_f64(),
            })
            .unwrap_or(0.0)
    }

    /// Servers that have not ended
    pub fn total_active_instances(&self) -> i64 {
        self.active_servers().count() as i64
    }

    pub fn vcpus(&self) -> i64 {
        self.sum_active("vcpus")
    }

    pub fn local_gb(&self) -> i64 {
        self.sum_active("local_gb")
    }

    pub fn memory_mb(&self) -> i64 {
        self.sum_active("memory_mb")
    }

    pub fn vcpu_hours(&self) -> f64 {
        self.float("total_hours")
    }

    pub fn disk_gb_hours(&self) -> f64 {
        self.float("total_local_gb_usage")
    }

    pub fn summary(&self) -> UsageSummary {
        UsageSummary {
            instances: self.total_active_instances(),
            memory_mb: self.memory_mb(),
            vcpus: self.float("total_vcpus_usage"),
            vcpu_hours: self.vcpu_hours(),
            local_gb: self.local_gb(),
            disk_gb_hours: self.disk_gb_hours(),
        }
    }
}

/// Security group with its rules wrapped on first access
#[derive(Debug, Clone, Serialize)]
#[serde(transparent)]
pub struct SecurityGroup {
    resource: ApiResource,
    #[serde(skip)]
    rules: OnceCell<Vec<SecurityGroupRule>>,
}

impl ResourceWrapper for SecurityGroup {
    const KIND: &'static str = "SecurityGroup";
    const ATTRS: AttrSet = AttrSet::Fixed(&["id", "name", "description", "tenant_id"]);

    fn from_resource(resource: ApiResource) -> Self {
        Self {
            resource,
            rules: OnceCell::new(),
        }
    }

    fn resource(&self) -> &ApiResource {
        &self.resource
    }
}

impl std::ops::Deref for SecurityGroup {
    type Target = ApiResource;

    fn deref(&self) -> &Self::Target {
        &self.resource
    }
}

impl SecurityGroup {
    /// Rules of the group, wrapped once and memoised
    pub fn rules(&self) -> ApiResult<&[SecurityGroupRule]> {
        self.rules
            .get_or_try_init(|| match self.resource.payload().get("rules") {
                Some(Value::Array(rules)) => SecurityGroupRule::wrap_all(rules.clone()),
                Some(Value::Null) | None => Ok(Vec::new()),
                Some(_) => Err(ApiError::missing(Self::KIND, "rules")),
            })
            .map(Vec::as_slice)
    }

    /// Replace the memoised rules
    pub fn set_rules(&mut self, rules: Vec<SecurityGroupRule>) {
        self.rules = OnceCell::with_value(rules);
    }
}

crate::api_wrapper!(
    /// One ingress rule of a security group
    SecurityGroupRule,
    "SecurityGroupRule",
    ["id", "ip_protocol", "from_port", "to_port", "ip_range", "group", "parent_group_id"]
);

impl fmt::Display for SecurityGroupRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let from = port(self.get_opt("from_port"));
        let to = port(self.get_opt("to_port"));
        let group = self
            .get_opt("group")
            .and_then(|g| g.get("name"))
            .and_then(Value::as_str);

        match group {
            Some(group) => write!(f, "ALLOW {}:{} from {}", from, to, group),
            None => {
                let cidr = self
                    .get_opt("ip_range")
                    .and_then(|r| r.get("cidr"))
                    .and_then(Value::as_str)
                    .unwrap_or("");
                write!(f, "ALLOW {}:{} from {}", from, to, cidr)
            }
        }
    }
}

fn port(value: Option<&Value>) -> String {
    match value {
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::String(s)) => s.clone(),
        _ => String::new(),
    }
}

// ============================================================================
// CLIENT
// ============================================================================

/// Compute operations the aggregation layer relies on
#[async_trait]
pub trait ComputeApi: Send + Sync {
    async fn server_get(&self, instance_id: &str) -> ApiResult<Server>;

    /// Servers of the bound tenant, or of every tenant when `all_tenants`
    async fn server_list(&self, all_tenants: bool) -> ApiResult<Vec<Server>>;

    async fn flavor_list(&self) -> ApiResult<Vec<Flavor>>;

    async fn flavor_get(&self, flavor_id: &str) -> ApiResult<Flavor>;

    async fn tenant_quota_get(&self, tenant_id: &str) -> ApiResult<QuotaSet>;

    async fn default_quota_get(&self, tenant_id: &str) -> ApiResult<QuotaSet>;

    async fn usage_get(
        &self,
        tenant_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> ApiResult<Usage>;

    async fn usage_list(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> ApiResult<Vec<Usage>>;

    async fn security_group_list(&self) -> ApiResult<Vec<SecurityGroup>>;

    async fn security_group_get(&self, group_id: &str) -> ApiResult<SecurityGroup>;

    async fn server_security_groups(&self, instance_id: &str) -> ApiResult<Vec<SecurityGroup>>;

    /// Raw absolute limits; `-1` marks an unlimited value
    async fn absolute_limits(&self, reserved: bool) -> ApiResult<BTreeMap<String, i64>>;

    async fn floating_ip_pools(&self) -> ApiResult<Vec<FloatingIpPool>>;

    async fn floating_ip_list(&self) -> ApiResult<Vec<FloatingIp>>;

    async fn floating_ip_get(&self, floating_ip_id: &str) -> ApiResult<FloatingIp>;

    async fn floating_ip_create(&self, pool: &str) -> ApiResult<FloatingIp>;

    async fn floating_ip_delete(&self, floating_ip_id: &str) -> ApiResult<()>;

    async fn add_floating_ip(&self, server_id: &str, address: &str) -> ApiResult<()>;

    async fn remove_floating_ip(&self, server_id: &str, address: &str) -> ApiResult<()>;
}

/// HTTP implementation of `ComputeApi`
#[derive(Debug, Clone)]
pub struct ComputeClient {
    client: ServiceClient,
}

impl ComputeClient {
    /// Create a new compute client
    pub fn new(client: ServiceClient) -> Self {
        Self { client }
    }

    async fn get(&self, path: &str, query: &[(String, String)]) -> ApiResult<Value> {
        self.client.get_json(path, query).await
    }

    async fn quota_set(&self, path: &str) -> ApiResult<QuotaSet> {
        let body = self.get(path, &[]).await?;
        QuotaSet::from_value(take_object(body, SERVICE, "quota_set")?)
    }
}

fn usage_window(start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<(String, String)> {
    vec![
        ("start".to_string(), start.format("%Y-%m-%dT%H:%M:%S").to_string()),
        ("end".to_string(), end.format("%Y-%m-%dT%H:%M:%S").to_string()),
    ]
}

/// Compute floating IPs are keyed by instance; the port is the instance
fn nova_floating_ip(value: Value) -> ApiResult<FloatingIp> {
    let text = |key: &str| -> Option<String> {
        match value.get(key) {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        }
    };
    let id = text("id").ok_or_else(|| ApiError::missing("FloatingIp", "id"))?;
    let ip = text("ip").ok_or_else(|| ApiError::missing("FloatingIp", "ip"))?;
    let instance_id = text("instance_id");

    Ok(FloatingIp {
        id,
        ip,
        fixed_ip: text("fixed_ip"),
        port_id: instance_id.clone(),
        instance_id,
        pool: text("pool"),
    })
}

#[async_trait]
impl ComputeApi for ComputeClient {
    async fn server_get(&self, instance_id: &str) -> ApiResult<Server> {
        let body = self.get(&format!("servers/{}", instance_id), &[]).await?;
        Server::wrap(take_object(body, SERVICE, "server")?)
    }

    async fn server_list(&self, all_tenants: bool) -> ApiResult<Vec<Server>> {
        let query = if all_tenants {
            vec![("all_tenants".to_string(), "True".to_string())]
        } else {
            vec![(
                "project_id".to_string(),
                self.client.tenant_id().to_string(),
            )]
        };
        debug!(all_tenants, "server_list");
        let body = self.get("servers/detail", &query).await?;
        Server::wrap_all(take_list(body, SERVICE, "servers")?)
    }

    async fn flavor_list(&self) -> ApiResult<Vec<Flavor>> {
        let body = self.get("flavors/detail", &[]).await?;
        Flavor::wrap_all(take_list(body, SERVICE, "flavors")?)
    }

    async fn flavor_get(&self, flavor_id: &str) -> ApiResult<Flavor> {
        let body = self.get(&format!("flavors/{}", flavor_id), &[]).await?;
        Flavor::wrap(take_object(body, SERVICE, "flavor")?)
    }

    async fn tenant_quota_get(&self, tenant_id: &str) -> ApiResult<QuotaSet> {
        self.quota_set(&format!("os-quota-sets/{}", tenant_id)).await
    }

    async fn default_quota_get(&self, tenant_id: &str) -> ApiResult<QuotaSet> {
        self.quota_set(&format!("os-quota-sets/{}/defaults", tenant_id))
            .await
    }

    async fn usage_get(
        &self,
        tenant_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> ApiResult<Usage> {
        let body = self
            .get(
                &format!("os-simple-tenant-usage/{}", tenant_id),
                &usage_window(start, end),
            )
            .await?;
        Usage::wrap(take_object(body, SERVICE, "tenant_usage")?)
    }

    async fn usage_list(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> ApiResult<Vec<Usage>> {
        let mut query = usage_window(start, end);
        query.push(("detailed".to_string(), "1".to_string()));
        let body = self.get("os-simple-tenant-usage", &query).await?;
        Usage::wrap_all(take_list(body, SERVICE, "tenant_usages")?)
    }

    async fn security_group_list(&self) -> ApiResult<Vec<SecurityGroup>> {
        let body = self.get("os-security-groups", &[]).await?;
        SecurityGroup::wrap_all(take_list(body, SERVICE, "security_groups")?)
    }

    async fn security_group_get(&self, group_id: &str) -> ApiResult<SecurityGroup> {
        let body = self
            .get(&format!("os-security-groups/{}", group_id), &[])
            .await?;
        SecurityGroup::wrap(take_object(body, SERVICE, "security_group")?)
    }

    async fn server_security_groups(&self, instance_id: &str) -> ApiResult<Vec<SecurityGroup>> {
        let body = self
            .get(&format!("servers/{}/os-security-groups", instance_id), &[])
            .await?;
        let groups = SecurityGroup::wrap_all(take_list(body, SERVICE, "security_groups")?)?;
        // malformed rules fail the listing instead of the first reader
        for group in &groups {
            group.rules()?;
        }
        Ok(groups)
    }

    async fn absolute_limits(&self, reserved: bool) -> ApiResult<BTreeMap<String, i64>> {
        let query = if reserved {
            vec![("reserved".to_string(), "1".to_string())]
        } else {
            Vec::new()
        };
        let body = self.get("limits", &query).await?;
        let absolute = body
            .get("limits")
            .and_then(|l| l.get("absolute"))
            .and_then(Value::as_object)
            .ok_or_else(|| ApiError::unavailable(SERVICE, "response has no absolute limits"))?;

        Ok(absolute
            .iter()
            .filter_map(|(name, value)| coerce_i64(value).map(|v| (name.clone(), v)))
            .collect())
    }

    async fn floating_ip_pools(&self) -> ApiResult<Vec<FloatingIpPool>> {
        let body = self.get("os-floating-ip-pools", &[]).await?;
        take_list(body, SERVICE, "floating_ip_pools")?
            .into_iter()
            .map(|pool| {
                let name = pool
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| ApiError::missing("FloatingIpPool", "name"))?;
                Ok(FloatingIpPool {
                    id: name.to_string(),
                    name: name.to_string(),
                })
            })
            .collect()
    }

    async fn floating_ip_list(&self) -> ApiResult<Vec<FloatingIp>> {
        let body = self.get("os-floating-ips", &[]).await?;
        take_list(body, SERVICE, "floating_ips")?
            .into_iter()
            .map(nova_floating_ip)
            .collect()
    }

    async fn floating_ip_get(&self, floating_ip_id: &str) -> ApiResult<FloatingIp> {
        let body = self
            .get(&format!("os-floating-ips/{}", floating_ip_id), &[])
            .await?;
        nova_floating_ip(take_object(body, SERVICE, "floating_ip")?)
    }

    async fn floating_ip_create(&self, pool: &str) -> ApiResult<FloatingIp> {
        let body: Value = self
            .client
            .post_json("os-floating-ips", &json!({ "pool": pool }))
            .await?;
        nova_floating_ip(take_object(body, SERVICE, "floating_ip")?)
    }

    async fn floating_ip_delete(&self, floating_ip_id: &str) -> ApiResult<()> {
        self.client
            .delete(&format!("os-floating-ips/{}", floating_ip_id))
            .await
    }

    async fn add_floating_ip(&self, server_id: &str, address: &str) -> ApiResult<()> {
        self.client
            .post_action(
                &format!("servers/{}/action", server_id),
                &json!({ "addFloatingIp": { "address": address } }),
            )
            .await
    }

    async fn remove_floating_ip(&self, server_id: &str, address: &str) -> ApiResult<()> {
        self.client
            .post_action(
                &format!("servers/{}/action", server_id),
                &json!({ "removeFloatingIp": { "address": address } }),
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{Image, ImageListRequest};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingImages {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl ImageApi for CountingImages {
        async fn image_get(&self, image_id: &str) -> ApiResult<Image> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ApiError::not_found("image", image_id));
            }
            Image::wrap(json!({"id": image_id, "name": "cirros"}))
        }

        async fn image_list(&self, _request: &ImageListRequest) -> ApiResult<Vec<Image>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_image_name_is_resolved_once() {
        let images = CountingImages {
            calls: AtomicUsize::new(0),
            fail: false,
        };
        let server = Server::wrap(json!({"id": "s1", "image": {"id": "img-1"}})).unwrap();

        assert_eq!(server.image_name(&images).await, "cirros");
        assert_eq!(server.image_name(&images).await, "cirros");
        assert_eq!(images.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_image_name_sentinel_on_error() {
        let images = CountingImages {
            calls: AtomicUsize::new(0),
            fail: true,
        };
        let server = Server::wrap(json!({"id": "s1", "image": {"id": "gone"}})).unwrap();
        assert_eq!(server.image_name(&images).await, IMAGE_NOT_FOUND);

        let booted_from_volume = Server::wrap(json!({"id": "s2", "image": ""})).unwrap();
        assert_eq!(booted_from_volume.image_name(&images).await, IMAGE_NOT_FOUND);
    }

    #[test]
    fn test_usage_counts_only_active_servers() {
        let usage = Usage::wrap(json!({
            "tenant_id": "t1",
            "total_hours": 12.5,
            "total_local_gb_usage": 40.0,
            "total_vcpus_usage": 3.0,
            "server_usages": [
                {"vcpus": 2, "local_gb": 20, "memory_mb": 2048, "ended_at": null},
                {"vcpus": 1, "local_gb": 10, "memory_mb": 512, "ended_at": null},
                {"vcpus": 8, "local_gb": 80, "memory_mb": 8192, "ended_at": "2013-06-01T00:00:00"}
            ]
        }))
        .unwrap();

        assert_eq!(usage.total_active_instances(), 2);
        assert_eq!(usage.vcpus(), 3);
        assert_eq!(usage.local_gb(), 30);
        assert_eq!(usage.memory_mb(), 2560);
        assert_eq!(usage.vcpu_hours(), 12.5);
        assert_eq!(usage.disk_gb_hours(), 40.0);
        assert_eq!(usage.summary().vcpus, 3.0);
    }

    #[test]
    fn test_security_group_rules_memo() {
        let mut group = SecurityGroup::wrap(json!({
            "id": 1,
            "name": "default",
            "rules": [
                {"id": 10, "ip_protocol": "tcp", "from_port": 22, "to_port": 22,
                 "ip_range": {"cidr": "0.0.0.0/0"}, "group": {}},
                {"id": 11, "ip_protocol": "tcp", "from_port": 80, "to_port": 80,
                 "ip_range": {}, "group": {"name": "web"}}
            ]
        }))
        .unwrap();

        let rules = group.rules().unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].to_string(), "ALLOW 22:22 from 0.0.0.0/0");
        assert_eq!(rules[1].to_string(), "ALLOW 80:80 from web");

        let first = rules[0].clone();
        group.set_rules(vec![first]);
        assert_eq!(group.rules().unwrap().len(), 1);
        // the payload itself is untouched
        assert_eq!(
            group.resource().payload()["rules"].as_array().unwrap().len(),
            2
        );
    }

    #[test]
    fn test_nova_floating_ip_port_is_instance() {
        let fip = nova_floating_ip(json!({
            "id": 3, "ip": "172.24.4.3", "fixed_ip": "10.0.0.4",
            "instance_id": "vm-1", "pool": "public"
        }))
        .unwrap();
        assert_eq!(fip.id, "3");
        assert_eq!(fip.port_id.as_deref(), Some("vm-1"));
        assert_eq!(fip.instance_id.as_deref(), Some("vm-1"));
    }

    #[test]
    fn test_server_flavor_id() {
        let server = Server::wrap(json!({"id": "s1", "flavor": {"id": 42}})).unwrap();
        assert_eq!(server.flavor_id().unwrap(), "42");
        let broken = Server::wrap(json!({"id": "s1"})).unwrap();
        assert!(broken.flavor_id().is_err());
    }
}
