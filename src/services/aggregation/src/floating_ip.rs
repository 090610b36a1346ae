//! Floating IP management over two incompatible backend models
//!
//! The compute service manages floating IPs as pool addresses bound to an
//! instance. The network service binds them to a port and a fixed IP on that
//! port. `FloatingIpBackend` picks one at construction time and both sides
//! answer the same `FloatingIpManager` contract.
//!
//! Target ids are opaque to callers. Whatever `list_targets` hands out is
//! accepted unchanged by `associate`.

use crate::client::ClientFactory;
use crate::compute::ComputeApi;
use crate::network::NetworkApi;
use async_trait::async_trait;
use horizon_shared::{ApiError, ApiResult, RequestContext, ServiceType};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Separator between port id and fixed IP in port-bound target ids
const TARGET_SEPARATOR: char = '_';

// ============================================================================
// RECORDS
// ============================================================================

/// Floating IP normalised across backends
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FloatingIp {
    pub id: String,
    /// Routable address
    pub ip: String,
    /// Fixed address the floating IP is mapped to, if associated
    pub fixed_ip: Option<String>,
    /// Port (network service) or instance (compute service) holding the IP
    pub port_id: Option<String>,
    pub instance_id: Option<String>,
    pub pool: Option<String>,
}

impl FloatingIp {
    pub fn is_associated(&self) -> bool {
        self.port_id.is_some()
    }
}

/// Allocation pool as shown to users
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FloatingIpPool {
    pub id: String,
    pub name: String,
}

/// Something a floating IP can be associated with
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FloatingIpTarget {
    /// Opaque target id accepted by `associate`
    pub id: String,
    pub name: String,
}

// ============================================================================
// MANAGER CONTRACT
// ============================================================================

#[async_trait]
pub trait FloatingIpManager: Send + Sync {
    async fn list_pools(&self) -> ApiResult<Vec<FloatingIpPool>>;

    async fn list(&self) -> ApiResult<Vec<FloatingIp>>;

    async fn get(&self, floating_ip_id: &str) -> ApiResult<FloatingIp>;

    async fn allocate(&self, pool: &str) -> ApiResult<FloatingIp>;

    async fn release(&self, floating_ip_id: &str) -> ApiResult<()>;

    /// Bind a floating IP to a target id from `list_targets`
    async fn associate(&self, floating_ip_id: &str, target_id: &str) -> ApiResult<()>;

    async fn disassociate(&self, floating_ip_id: &str, target_id: Option<&str>) -> ApiResult<()>;

    async fn list_targets(&self) -> ApiResult<Vec<FloatingIpTarget>>;

    /// Target id for an instance, `None` when it has nothing to bind to
    async fn get_target_id_by_instance(&self, instance_id: &str) -> ApiResult<Option<String>>;

    fn is_simple_associate_supported(&self) -> bool;
}

// ============================================================================
// COMPUTE-BACKED (SIMPLE) MANAGER
// ============================================================================

/// Pool addresses bound directly to instances
pub struct SimpleFloatingIpManager {
    compute: Arc<dyn ComputeApi>,
    simple_ip_management: bool,
}

impl SimpleFloatingIpManager {
    /// Create a new compute-backed manager
    pub fn new(compute: Arc<dyn ComputeApi>, simple_ip_management: bool) -> Self {
        Self {
            compute,
            simple_ip_management,
        }
    }
}

#[async_trait]
impl FloatingIpManager for SimpleFloatingIpManager {
    async fn list_pools(&self) -> ApiResult<Vec<FloatingIpPool>> {
        self.compute.floating_ip_pools().await
    }

    async fn list(&self) -> ApiResult<Vec<FloatingIp>> {
        self.compute.floating_ip_list().await
    }

    async fn get(&self, floating_ip_id: &str) -> ApiResult<FloatingIp> {
        self.compute.floating_ip_get(floating_ip_id).await
    }

    async fn allocate(&self, pool: &str) -> ApiResult<FloatingIp> {
        self.compute.floating_ip_create(pool).await
    }

    async fn release(&self, floating_ip_id: &str) -> ApiResult<()> {
        self.compute.floating_ip_delete(floating_ip_id).await
    }

    async fn associate(&self, floating_ip_id: &str, target_id: &str) -> ApiResult<()> {
        // the target is the instance itself
        let server = self.compute.server_get(target_id).await?;
        let fip = self.compute.floating_ip_get(floating_ip_id).await?;
        debug!(floating_ip = %fip.ip, server_id = %target_id, "associate floating ip");
        self.compute.add_floating_ip(&server.id()?, &fip.ip).await
    }

    async fn disassociate(&self, floating_ip_id: &str, _target_id: Option<&str>) -> ApiResult<()> {
        let fip = self.compute.floating_ip_get(floating_ip_id).await?;
        let instance_id = fip.instance_id.as_deref().ok_or_else(|| ApiError::BadRequest {
            service: "compute".to_string(),
            message: format!("floating ip {} is not associated", fip.ip),
        })?;
        let server = self.compute.server_get(instance_id).await?;
        debug!(floating_ip = %fip.ip, server_id = %instance_id, "disassociate floating ip");
        self.compute.remove_floating_ip(&server.id()?, &fip.ip).await
    }

    async fn list_targets(&self) -> ApiResult<Vec<FloatingIpTarget>> {
        self.compute
            .server_list(false)
            .await?
            .iter()
            .map(|server| {
                let id = server.id()?;
                Ok(FloatingIpTarget {
                    name: format!("{} ({})", server.name(), id),
                    id,
                })
            })
            .collect()
    }

    async fn get_target_id_by_instance(&self, instance_id: &str) -> ApiResult<Option<String>> {
        Ok(Some(instance_id.to_string()))
    }

    fn is_simple_associate_supported(&self) -> bool {
        self.simple_ip_management
    }
}

// ============================================================================
// NETWORK-BACKED (PORT-BOUND) MANAGER
// ============================================================================

/// Floating IPs bound to a (port, fixed IP) pair
pub struct PortBoundFloatingIpManager {
    network: Arc<dyn NetworkApi>,
    compute: Arc<dyn ComputeApi>,
}

impl PortBoundFloatingIpManager {
    /// Create a new network-backed manager
    pub fn new(network: Arc<dyn NetworkApi>, compute: Arc<dyn ComputeApi>) -> Self {
        Self { network, compute }
    }

    async fn with_instance(&self, mut fip: FloatingIp) -> ApiResult<FloatingIp> {
        fip.instance_id = match &fip.port_id {
            Some(port_id) => Some(self.network.port_get(port_id).await?.device_id().to_string()),
            None => None,
        };
        Ok(fip)
    }
}

/// Encode a port-bound target id
pub fn encode_target_id(port_id: &str, ip_address: &str) -> String {
    format!("{}{}{}", port_id, TARGET_SEPARATOR, ip_address)
}

/// Split a port-bound target id on its first separator
pub fn decode_target_id(target_id: &str) -> ApiResult<(&str, &str)> {
    target_id
        .split_once(TARGET_SEPARATOR)
        .ok_or_else(|| ApiError::BadRequest {
            service: "network".to_string(),
            message: format!("malformed floating ip target '{}'", target_id),
        })
}

#[async_trait]
impl FloatingIpManager for PortBoundFloatingIpManager {
    async fn list_pools(&self) -> ApiResult<Vec<FloatingIpPool>> {
        let params = [("router:external".to_string(), "True".to_string())];
        self.network
            .list_networks(&params)
            .await?
            .iter()
            .map(|network| {
                Ok(FloatingIpPool {
                    id: network.id()?,
                    name: network.name().to_string(),
                })
            })
            .collect()
    }

    async fn list(&self) -> ApiResult<Vec<FloatingIp>> {
        let (fips, ports) =
            tokio::try_join!(self.network.floating_ip_list(), self.network.port_list(&[]))?;

        // instance ids live on the port as device_id
        let mut devices = HashMap::with_capacity(ports.len());
        for port in &ports {
            devices.insert(port.id()?, port.device_id().to_string());
        }

        Ok(fips
            .into_iter()
            .map(|mut fip| {
                fip.instance_id = fip
                    .port_id
                    .as_ref()
                    .and_then(|port_id| devices.get(port_id).cloned());
                fip
            })
            .collect())
    }

    async fn get(&self, floating_ip_id: &str) -> ApiResult<FloatingIp> {
        let fip = self.network.floating_ip_get(floating_ip_id).await?;
        self.with_instance(fip).await
    }

    async fn allocate(&self, pool: &str) -> ApiResult<FloatingIp> {
        self.network.floating_ip_create(pool).await
    }

    async fn release(&self, floating_ip_id: &str) -> ApiResult<()> {
        self.network.floating_ip_delete(floating_ip_id).await
    }

    async fn associate(&self, floating_ip_id: &str, target_id: &str) -> ApiResult<()> {
        let (port_id, ip_address) = decode_target_id(target_id)?;
        debug!(floating_ip_id = %floating_ip_id, port_id = %port_id, "associate floating ip");
        self.network
            .floating_ip_update(
                floating_ip_id,
                json!({ "port_id": port_id, "fixed_ip_address": ip_address }),
            )
            .await
    }

    async fn disassociate(&self, floating_ip_id: &str, _target_id: Option<&str>) -> ApiResult<()> {
        self.network
            .floating_ip_update(floating_ip_id, json!({ "port_id": Value::Null }))
            .await
    }

    async fn list_targets(&self) -> ApiResult<Vec<FloatingIpTarget>> {
        let (ports, servers) =
            tokio::try_join!(self.network.port_list(&[]), self.compute.server_list(false))?;

        let mut names = HashMap::with_capacity(servers.len());
        for server in &servers {
            names.insert(server.id()?, server.name().to_string());
        }

        let mut targets = Vec::new();
        for port in &ports {
            if port.device_owner().starts_with("network:") {
                continue;
            }
            let port_id = port.id()?;
            let server_name = names
                .get(port.device_id())
                .map(String::as_str)
                .unwrap_or_else(|| port.device_id());
            for ip in port.fixed_ip_addresses() {
                targets.push(FloatingIpTarget {
                    id: encode_target_id(&port_id, ip),
                    name: format!("{}: {}", server_name, ip),
                });
            }
        }
        Ok(targets)
    }

    async fn get_target_id_by_instance(&self, instance_id: &str) -> ApiResult<Option<String>> {
        if instance_id.is_empty() {
            return Ok(None);
        }
        let params = [("device_id".to_string(), instance_id.to_string())];
        let ports = self.network.port_list(&params).await?;
        let port = match ports.first() {
            Some(port) => port,
            None => return Ok(None),
        };
        // one port may carry several addresses; the first one wins
        Ok(port
            .fixed_ip_addresses()
            .first()
            .map(|ip| port.id().map(|port_id| encode_target_id(&port_id, ip)))
            .transpose()?)
    }

    fn is_simple_associate_supported(&self) -> bool {
        false
    }
}

// ============================================================================
// BACKEND SELECTION
// ============================================================================

/// Floating IP manager selected from the service catalog
pub enum FloatingIpBackend {
    Simple(SimpleFloatingIpManager),
    PortBound(PortBoundFloatingIpManager),
}

impl FloatingIpBackend {
    /// Port-bound when the catalog publishes a network service
    pub fn for_context(ctx: &RequestContext, factory: &ClientFactory) -> ApiResult<Self> {
        let compute: Arc<dyn ComputeApi> = Arc::new(factory.compute(ctx)?);
        if ctx.catalog().has_service(ServiceType::Network) {
            let network: Arc<dyn NetworkApi> = Arc::new(factory.network(ctx)?);
            Ok(FloatingIpBackend::PortBound(PortBoundFloatingIpManager::new(
                network, compute,
            )))
        } else {
            Ok(FloatingIpBackend::Simple(SimpleFloatingIpManager::new(
                compute,
                ctx.config().simple_ip_management(),
            )))
        }
    }

    fn manager(&self) -> &dyn FloatingIpManager {
        match self {
            FloatingIpBackend::Simple(manager) => manager,
            FloatingIpBackend::PortBound(manager) => manager,
        }
    }
}

#[async_trait]
impl FloatingIpManager for FloatingIpBackend {
    async fn list_pools(&self) -> ApiResult<Vec<FloatingIpPool>> {
        self.manager().list_pools().await
    }

    async fn list(&self) -> ApiResult<Vec<FloatingIp>> {
        self.manager().list().await
    }

    async fn get(&self, floating_ip_id: &str) -> ApiResult<FloatingIp> {
        self.manager().get(floating_ip_id).await
    }

    async fn allocate(&self, pool: &str) -> ApiResult<FloatingIp> {
        self.manager().allocate(pool).await
    }

    async fn release(&self, floating_ip_id: &str) -> ApiResult<()> {
        self.manager().release(floating_ip_id).await
    }

    async fn associate(&self, floating_ip_id: &str, target_id: &str) -> ApiResult<()> {
        self.manager().associate(floating_ip_id, target_id).await
    }

    async fn disassociate(&self, floating_ip_id: &str, target_id: Option<&str>) -> ApiResult<()> {
        self.manager().disassociate(floating_ip_id, target_id).await
    }

    async fn list_targets(&self) -> ApiResult<Vec<FloatingIpTarget>> {
        self.manager().list_targets().await
    }

    async fn get_target_id_by_instance(&self, instance_id: &str) -> ApiResult<Option<String>> {
        self.manager().get_target_id_by_instance(instance_id).await
    }

    fn is_simple_associate_supported(&self) -> bool {
        self.manager().is_simple_associate_supported()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::compute::{Flavor, SecurityGroup, Server, Usage};
    use crate::network::{Network, Params, Port, Router, Subnet};
    use crate::quota::QuotaSet;
    use crate::wrapper::ResourceWrapper;
    use chrono::{DateTime, Utc};
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// Compute fake recording floating IP actions
    #[derive(Default)]
    pub(crate) struct FakeCompute {
        pub servers: Vec<Value>,
        pub flavors: Vec<Value>,
        pub floating_ips: Vec<FloatingIp>,
        pub quota: Value,
        pub actions: Mutex<Vec<String>>,
        pub flavor_gets: Mutex<Vec<String>>,
        pub flavor_error: Option<ApiError>,
    }

    #[async_trait]
    impl ComputeApi for FakeCompute {
        async fn server_get(&self, instance_id: &str) -> ApiResult<Server> {
            self.servers
                .iter()
                .find(|s| s["id"] == instance_id)
                .cloned()
                .map(Server::wrap)
                .unwrap_or_else(|| Err(ApiError::not_found("compute", instance_id)))
        }

        async fn server_list(&self, _all_tenants: bool) -> ApiResult<Vec<Server>> {
            Server::wrap_all(self.servers.clone())
        }

        async fn flavor_list(&self) -> ApiResult<Vec<Flavor>> {
            Flavor::wrap_all(self.flavors.clone())
        }

        async fn flavor_get(&self, flavor_id: &str) -> ApiResult<Flavor> {
            self.flavor_gets.lock().unwrap().push(flavor_id.to_string());
            Err(self
                .flavor_error
                .clone()
                .unwrap_or_else(|| ApiError::not_found("compute", flavor_id)))
        }

        async fn tenant_quota_get(&self, _tenant_id: &str) -> ApiResult<QuotaSet> {
            QuotaSet::from_value(self.quota.clone())
        }

        async fn default_quota_get(&self, _tenant_id: &str) -> ApiResult<QuotaSet> {
            QuotaSet::from_value(self.quota.clone())
        }

        async fn usage_get(
            &self,
            tenant_id: &str,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> ApiResult<Usage> {
            Err(ApiError::not_found("compute", tenant_id))
        }

        async fn usage_list(
            &self,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> ApiResult<Vec<Usage>> {
            Ok(Vec::new())
        }

        async fn security_group_list(&self) -> ApiResult<Vec<SecurityGroup>> {
            Ok(Vec::new())
        }

        async fn security_group_get(&self, group_id: &str) -> ApiResult<SecurityGroup> {
            Err(ApiError::not_found("compute", group_id))
        }

        async fn server_security_groups(&self, _instance_id: &str) -> ApiResult<Vec<SecurityGroup>> {
            Ok(Vec::new())
        }

        async fn absolute_limits(&self, _reserved: bool) -> ApiResult<BTreeMap<String, i64>> {
            Ok(BTreeMap::from([
                ("maxTotalCores".to_string(), 20),
                ("maxTotalInstances".to_string(), -1),
            ]))
        }

        async fn floating_ip_pools(&self) -> ApiResult<Vec<FloatingIpPool>> {
            Ok(vec![FloatingIpPool {
                id: "nova".to_string(),
                name: "nova".to_string(),
            }])
        }

        async fn floating_ip_list(&self) -> ApiResult<Vec<FloatingIp>> {
            Ok(self.floating_ips.clone())
        }

        async fn floating_ip_get(&self, floating_ip_id: &str) -> ApiResult<FloatingIp> {
            self.floating_ips
                .iter()
                .find(|f| f.id == floating_ip_id)
                .cloned()
                .ok_or_else(|| ApiError::not_found("compute", floating_ip_id))
        }

        async fn floating_ip_create(&self, pool: &str) -> ApiResult<FloatingIp> {
            self.actions.lock().unwrap().push(format!("create {}", pool));
            Ok(FloatingIp {
                id: "new".to_string(),
                ip: "172.24.4.99".to_string(),
                fixed_ip: None,
                port_id: None,
                instance_id: None,
                pool: Some(pool.to_string()),
            })
        }

        async fn floating_ip_delete(&self, floating_ip_id: &str) -> ApiResult<()> {
            self.actions
                .lock()
                .unwrap()
                .push(format!("delete {}", floating_ip_id));
            Ok(())
        }

        async fn add_floating_ip(&self, server_id: &str, address: &str) -> ApiResult<()> {
            self.actions
                .lock()
                .unwrap()
                .push(format!("add {} {}", server_id, address));
            Ok(())
        }

        async fn remove_floating_ip(&self, server_id: &str, address: &str) -> ApiResult<()> {
            self.actions
                .lock()
                .unwrap()
                .push(format!("remove {} {}", server_id, address));
            Ok(())
        }
    }

    /// Network fake recording floating IP updates
    #[derive(Default)]
    struct FakeNetwork {
        ports: Vec<Value>,
        floating_ips: Vec<FloatingIp>,
        updates: Mutex<Vec<(String, Value)>>,
        port_queries: Mutex<Vec<Vec<(String, String)>>>,
    }

    #[async_trait]
    impl NetworkApi for FakeNetwork {
        async fn list_networks(&self, params: &Params) -> ApiResult<Vec<Network>> {
            assert!(params.contains(&("router:external".to_string(), "True".to_string())));
            Network::wrap_all(vec![json!({"id": "ext-net", "name": "public"})])
        }

        async fn show_network(&self, network_id: &str) -> ApiResult<Network> {
            Err(ApiError::not_found("network", network_id))
        }

        async fn subnet_list(&self, _params: &Params) -> ApiResult<Vec<Subnet>> {
            Ok(Vec::new())
        }

        async fn subnet_get(&self, subnet_id: &str) -> ApiResult<Subnet> {
            Err(ApiError::not_found("network", subnet_id))
        }

        async fn port_list(&self, params: &Params) -> ApiResult<Vec<Port>> {
            self.port_queries.lock().unwrap().push(params.to_vec());
            let device = params
                .iter()
                .find(|(k, _)| k == "device_id")
                .map(|(_, v)| v.clone());
            self.ports
                .iter()
                .filter(|p| match &device {
                    Some(device) => p["device_id"] == device.as_str(),
                    None => true,
                })
                .cloned()
                .map(Port::from_payload)
                .collect()
        }

        async fn port_get(&self, port_id: &str) -> ApiResult<Port> {
            self.ports
                .iter()
                .find(|p| p["id"] == port_id)
                .cloned()
                .map(Port::from_payload)
                .unwrap_or_else(|| Err(ApiError::not_found("network", port_id)))
        }

        async fn router_list(&self, _params: &Params) -> ApiResult<Vec<Router>> {
            Ok(Vec::new())
        }

        async fn floating_ip_list(&self) -> ApiResult<Vec<FloatingIp>> {
            Ok(self.floating_ips.clone())
        }

        async fn floating_ip_get(&self, floating_ip_id: &str) -> ApiResult<FloatingIp> {
            self.floating_ips
                .iter()
                .find(|f| f.id == floating_ip_id)
                .cloned()
                .ok_or_else(|| ApiError::not_found("network", floating_ip_id))
        }

        async fn floating_ip_create(&self, floating_network_id: &str) -> ApiResult<FloatingIp> {
            Ok(FloatingIp {
                id: "f-new".to_string(),
                ip: "172.24.4.50".to_string(),
                fixed_ip: None,
                port_id: None,
                instance_id: None,
                pool: Some(floating_network_id.to_string()),
            })
        }

        async fn floating_ip_update(&self, floating_ip_id: &str, update: Value) -> ApiResult<()> {
            self.updates
                .lock()
                .unwrap()
                .push((floating_ip_id.to_string(), update));
            Ok(())
        }

        async fn floating_ip_delete(&self, _floating_ip_id: &str) -> ApiResult<()> {
            Ok(())
        }
    }

    fn fip(id: &str, ip: &str, port_id: Option<&str>) -> FloatingIp {
        FloatingIp {
            id: id.to_string(),
            ip: ip.to_string(),
            fixed_ip: None,
            port_id: port_id.map(str::to_string),
            instance_id: port_id.map(str::to_string),
            pool: None,
        }
    }

    fn port_bound() -> (Arc<FakeNetwork>, PortBoundFloatingIpManager) {
        let network = Arc::new(FakeNetwork {
            ports: vec![
                json!({
                    "id": "p1", "device_id": "vm-1", "device_owner": "compute:nova",
                    "admin_state_up": true,
                    "fixed_ips": [{"ip_address": "10.0.0.5"}]
                }),
                json!({
                    "id": "p-router", "device_id": "r1", "device_owner": "network:router_interface",
                    "admin_state_up": true,
                    "fixed_ips": [{"ip_address": "10.0.0.1"}]
                }),
            ],
            floating_ips: vec![
                FloatingIp {
                    instance_id: None,
                    ..fip("f1", "172.24.4.10", Some("p1"))
                },
                fip("f2", "172.24.4.11", None),
            ],
            ..Default::default()
        });
        let compute = Arc::new(FakeCompute {
            servers: vec![json!({"id": "vm-1", "name": "vm1"})],
            ..Default::default()
        });
        let manager = PortBoundFloatingIpManager::new(network.clone(), compute);
        (network, manager)
    }

    #[tokio::test]
    async fn test_port_bound_associate_uses_listed_target() {
        let (network, manager) = port_bound();

        let targets = manager.list_targets().await.unwrap();
        assert_eq!(
            targets,
            vec![FloatingIpTarget {
                id: "p1_10.0.0.5".to_string(),
                name: "vm1: 10.0.0.5".to_string(),
            }]
        );

        manager.associate("f1", &targets[0].id).await.unwrap();

        let updates = network.updates.lock().unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].0, "f1");
        assert_eq!(
            updates[0].1,
            json!({"port_id": "p1", "fixed_ip_address": "10.0.0.5"})
        );
    }

    #[tokio::test]
    async fn test_port_bound_list_injects_instance() {
        let (_, manager) = port_bound();
        let fips = manager.list().await.unwrap();

        assert_eq!(fips[0].instance_id.as_deref(), Some("vm-1"));
        assert_eq!(fips[1].instance_id, None);

        let single = manager.get("f1").await.unwrap();
        assert_eq!(single.instance_id.as_deref(), Some("vm-1"));
    }

    #[tokio::test]
    async fn test_port_bound_disassociate_clears_port() {
        let (network, manager) = port_bound();
        manager.disassociate("f1", None).await.unwrap();

        let updates = network.updates.lock().unwrap();
        assert_eq!(updates[0].1, json!({"port_id": null}));
    }

    #[tokio::test]
    async fn test_port_bound_target_by_instance() {
        let (_, manager) = port_bound();
        assert_eq!(
            manager.get_target_id_by_instance("vm-1").await.unwrap(),
            Some("p1_10.0.0.5".to_string())
        );
        assert_eq!(manager.get_target_id_by_instance("vm-9").await.unwrap(), None);
        assert_eq!(manager.get_target_id_by_instance("").await.unwrap(), None);
        assert!(!manager.is_simple_associate_supported());
    }

    #[tokio::test]
    async fn test_port_bound_pools_are_external_networks() {
        let (_, manager) = port_bound();
        let pools = manager.list_pools().await.unwrap();
        assert_eq!(
            pools,
            vec![FloatingIpPool {
                id: "ext-net".to_string(),
                name: "public".to_string()
            }]
        );

        let allocated = manager.allocate("ext-net").await.unwrap();
        assert_eq!(allocated.pool.as_deref(), Some("ext-net"));
    }

    #[test]
    fn test_target_id_splits_on_first_separator() {
        assert_eq!(
            decode_target_id("port_with_underscores_10.0.0.5").unwrap(),
            ("port", "with_underscores_10.0.0.5")
        );
        assert!(matches!(
            decode_target_id("no-separator"),
            Err(ApiError::BadRequest { .. })
        ));
    }

    fn simple(simple_ip_management: bool) -> (Arc<FakeCompute>, SimpleFloatingIpManager) {
        let compute = Arc::new(FakeCompute {
            servers: vec![json!({"id": "vm-1", "name": "web"})],
            floating_ips: vec![
                fip("1", "172.24.4.3", None),
                fip("2", "172.24.4.4", Some("vm-1")),
            ],
            ..Default::default()
        });
        let manager = SimpleFloatingIpManager::new(compute.clone(), simple_ip_management);
        (compute, manager)
    }

    #[tokio::test]
    async fn test_simple_associate_round_trips_instance_id() {
        let (compute, manager) = simple(true);

        let targets = manager.list_targets().await.unwrap();
        assert_eq!(targets[0].id, "vm-1");
        assert_eq!(targets[0].name, "web (vm-1)");

        let target = manager.get_target_id_by_instance("vm-1").await.unwrap();
        assert_eq!(target.as_deref(), Some("vm-1"));

        manager.associate("1", &targets[0].id).await.unwrap();
        manager.disassociate("2", None).await.unwrap();

        let actions = compute.actions.lock().unwrap();
        assert_eq!(
            *actions,
            vec![
                "add vm-1 172.24.4.3".to_string(),
                "remove vm-1 172.24.4.4".to_string()
            ]
        );
        assert!(manager.is_simple_associate_supported());
    }

    #[tokio::test]
    async fn test_simple_disassociate_requires_instance() {
        let (_, manager) = simple(false);
        let err = manager.disassociate("1", None).await.unwrap_err();
        assert!(matches!(err, ApiError::BadRequest { .. }));
        assert!(!manager.is_simple_associate_supported());
    }

    #[tokio::test]
    async fn test_backend_delegates() {
        let (compute, manager) = simple(true);
        let backend = FloatingIpBackend::Simple(manager);

        backend.allocate("nova").await.unwrap();
        backend.release("1").await.unwrap();
        assert_eq!(backend.list().await.unwrap().len(), 2);
        assert_eq!(backend.list_pools().await.unwrap()[0].name, "nova");

        let actions = compute.actions.lock().unwrap();
        assert_eq!(
            *actions,
            vec!["create nova".to_string(), "delete 1".to_string()]
        );
    }
}
