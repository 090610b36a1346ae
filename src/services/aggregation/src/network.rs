//! Network service client and wrappers
//!
//! Neutron-style API: networks, subnets, ports, routers and port-bound
//! floating IPs. Listing helpers that join several calls (subnet expansion,
//! tenant plus shared networks) are free functions over `NetworkApi`.

use crate::client::ServiceClient;
use crate::floating_ip::FloatingIp;
use crate::wrapper::{take_list, take_object, ApiResource, AttrSet, ResourceWrapper};
use async_trait::async_trait;
use horizon_shared::{ApiError, ApiResult};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::debug;

const SERVICE: &str = "network";

/// Query parameters passed through to list calls
pub type Params = [(String, String)];

fn admin_state(resource: &mut ApiResource) {
    let up = resource
        .payload()
        .get("admin_state_up")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    resource.derive("admin_state", json!(if up { "UP" } else { "DOWN" }));
}

/// Human-friendly IP version
pub fn ipver_str(ip_version: i64) -> &'static str {
    match ip_version {
        4 => "IPv4",
        6 => "IPv6",
        _ => "",
    }
}

crate::api_wrapper!(
    /// Subnet with its `ipver_str` derived field
    Subnet,
    "Subnet",
    open
);

impl Subnet {
    /// Wrap a subnet payload, deriving `ipver_str`
    pub fn from_payload(payload: Value) -> ApiResult<Self> {
        let mut subnet = Self::wrap(payload)?;
        let version = subnet.get_i64("ip_version").unwrap_or(0);
        subnet.0.derive("ipver_str", json!(ipver_str(version)));
        Ok(subnet)
    }
}

crate::api_wrapper!(
    /// Port with its `admin_state` derived field
    Port,
    "Port",
    open
);

impl Port {
    pub fn from_payload(payload: Value) -> ApiResult<Self> {
        let mut port = Self::wrap(payload)?;
        admin_state(&mut port.0);
        Ok(port)
    }

    pub fn device_id(&self) -> &str {
        self.opt_str("device_id").unwrap_or("")
    }

    pub fn device_owner(&self) -> &str {
        self.opt_str("device_owner").unwrap_or("")
    }

    /// Fixed IP addresses bound to the port, in order
    pub fn fixed_ip_addresses(&self) -> Vec<&str> {
        self.get_opt("fixed_ips")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|ip| ip.get("ip_address").and_then(Value::as_str))
            .collect()
    }
}

crate::api_wrapper!(
    /// Router
    Router,
    "Router",
    open
);

/// Network with subnets expanded into wrappers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Network {
    #[serde(flatten)]
    resource: ApiResource,
    /// Expanded subnets; ids unknown to the subnet listing are skipped
    #[serde(rename = "subnet_details")]
    subnets: Vec<Subnet>,
}

impl ResourceWrapper for Network {
    const KIND: &'static str = "Network";
    const ATTRS: AttrSet = AttrSet::Open;

    fn from_resource(mut resource: ApiResource) -> Self {
        admin_state(&mut resource);
        Self {
            resource,
            subnets: Vec::new(),
        }
    }

    fn resource(&self) -> &ApiResource {
        &self.resource
    }
}

impl std::ops::Deref for Network {
    type Target = ApiResource;

    fn deref(&self) -> &Self::Target {
        &self.resource
    }
}

impl Network {
    /// Subnet ids as listed on the network payload
    pub fn subnet_ids(&self) -> Vec<String> {
        self.get_opt("subnets")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|s| s.as_str().map(str::to_string))
            .collect()
    }

    pub fn subnets(&self) -> &[Subnet] {
        &self.subnets
    }

    pub fn with_subnets(mut self, subnets: Vec<Subnet>) -> Self {
        self.subnets = subnets;
        self
    }

    pub fn set_id_as_name_if_empty(&mut self, len: Option<usize>) {
        self.resource.set_id_as_name_if_empty(len);
    }
}

/// Network operations
#[async_trait]
pub trait NetworkApi: Send + Sync {
    async fn list_networks(&self, params: &Params) -> ApiResult<Vec<Network>>;

    async fn show_network(&self, network_id: &str) -> ApiResult<Network>;

    async fn subnet_list(&self, params: &Params) -> ApiResult<Vec<Subnet>>;

    async fn subnet_get(&self, subnet_id: &str) -> ApiResult<Subnet>;

    async fn port_list(&self, params: &Params) -> ApiResult<Vec<Port>>;

    async fn port_get(&self, port_id: &str) -> ApiResult<Port>;

    async fn router_list(&self, params: &Params) -> ApiResult<Vec<Router>>;

    /// Floating IPs as stored; `instance_id` is left unset
    async fn floating_ip_list(&self) -> ApiResult<Vec<FloatingIp>>;

    async fn floating_ip_get(&self, floating_ip_id: &str) -> ApiResult<FloatingIp>;

    async fn floating_ip_create(&self, floating_network_id: &str) -> ApiResult<FloatingIp>;

    /// Partial update of a floating IP (`port_id`, `fixed_ip_address`)
    async fn floating_ip_update(&self, floating_ip_id: &str, update: Value) -> ApiResult<()>;

    async fn floating_ip_delete(&self, floating_ip_id: &str) -> ApiResult<()>;
}

/// List networks with their subnets expanded from one subnet listing
pub async fn network_list(api: &dyn NetworkApi, params: &Params) -> ApiResult<Vec<Network>> {
    debug!(params = ?params, "network_list");
    let (networks, subnets) = tokio::try_join!(api.list_networks(params), api.subnet_list(&[]))?;

    let mut by_id = HashMap::with_capacity(subnets.len());
    for subnet in subnets {
        by_id.insert(subnet.id()?, subnet);
    }

    Ok(networks
        .into_iter()
        .map(|network| {
            let expanded = network
                .subnet_ids()
                .iter()
                .filter_map(|id| by_id.get(id).cloned())
                .collect();
            network.with_subnets(expanded)
        })
        .collect())
}

/// Networks owned by the tenant followed by shared networks
pub async fn network_list_for_tenant(
    api: &dyn NetworkApi,
    tenant_id: &str,
    params: &Params,
) -> ApiResult<Vec<Network>> {
    debug!(tenant_id = %tenant_id, params = ?params, "network_list_for_tenant");

    // admin tokens see every tenant's networks unless tenant_id is given
    let mut owned: Vec<(String, String)> = params.to_vec();
    owned.push(("tenant_id".to_string(), tenant_id.to_string()));
    owned.push(("shared".to_string(), "false".to_string()));

    let mut shared: Vec<(String, String)> = params.to_vec();
    shared.push(("shared".to_string(), "true".to_string()));

    let (mut networks, shared) =
        tokio::try_join!(network_list(api, &owned), network_list(api, &shared))?;
    networks.extend(shared);
    Ok(networks)
}

/// One network, optionally with each subnet fetched individually
pub async fn network_get(
    api: &dyn NetworkApi,
    network_id: &str,
    expand_subnet: bool,
) -> ApiResult<Network> {
    let network = api.show_network(network_id).await?;
    if !expand_subnet {
        return Ok(network);
    }

    let mut subnets = Vec::new();
    for subnet_id in network.subnet_ids() {
        subnets.push(api.subnet_get(&subnet_id).await?);
    }
    Ok(network.with_subnets(subnets))
}

/// HTTP implementation of `NetworkApi`
#[derive(Debug, Clone)]
pub struct NetworkClient {
    client: ServiceClient,
}

impl NetworkClient {
    /// Create a new network client
    pub fn new(client: ServiceClient) -> Self {
        Self { client }
    }

    async fn list(&self, resource: &str, params: &Params) -> ApiResult<Vec<Value>> {
        let body: Value = self
            .client
            .get_json(&format!("v2.0/{}", resource), params)
            .await?;
        take_list(body, SERVICE, resource)
    }

    async fn show(&self, resource: &str, key: &str, id: &str) -> ApiResult<Value> {
        let body: Value = self
            .client
            .get_json(&format!("v2.0/{}/{}", resource, id), &[])
            .await?;
        take_object(body, SERVICE, key)
    }
}

/// Normalise a stored floating IP to the shared record
pub(crate) fn neutron_floating_ip(value: &Value) -> ApiResult<FloatingIp> {
    let text = |key: &str| value.get(key).and_then(Value::as_str).map(str::to_string);
    Ok(FloatingIp {
        id: text("id").ok_or_else(|| ApiError::missing("FloatingIp", "id"))?,
        ip: text("floating_ip_address")
            .ok_or_else(|| ApiError::missing("FloatingIp", "floating_ip_address"))?,
        fixed_ip: text("fixed_ip_address"),
        port_id: text("port_id"),
        instance_id: None,
        pool: text("floating_network_id"),
    })
}

#[async_trait]
impl NetworkApi for NetworkClient {
    async fn list_networks(&self, params: &Params) -> ApiResult<Vec<Network>> {
        Network::wrap_all(self.list("networks", params).await?)
    }

    async fn show_network(&self, network_id: &str) -> ApiResult<Network> {
        Network::wrap(self.show("networks", "network", network_id).await?)
    }

    async fn subnet_list(&self, params: &Params) -> ApiResult<Vec<Subnet>> {
        debug!(params = ?params, "subnet_list");
        self.list("subnets", params)
            .await?
            .into_iter()
            .map(Subnet::from_payload)
            .collect()
    }

    async fn subnet_get(&self, subnet_id: &str) -> ApiResult<Subnet> {
        Subnet::from_payload(self.show("subnets", "subnet", subnet_id).await?)
    }

    async fn port_list(&self, params: &Params) -> ApiResult<Vec<Port>> {
        debug!(params = ?params, "port_list");
        self.list("ports", params)
            .await?
            .into_iter()
            .map(Port::from_payload)
            .collect()
    }

    async fn port_get(&self, port_id: &str) -> ApiResult<Port> {
        Port::from_payload(self.show("ports", "port", port_id).await?)
    }

    async fn router_list(&self, params: &Params) -> ApiResult<Vec<Router>> {
        Router::wrap_all(self.list("routers", params).await?)
    }

    async fn floating_ip_list(&self) -> ApiResult<Vec<FloatingIp>> {
        self.list("floatingips", &[])
            .await?
            .iter()
            .map(neutron_floating_ip)
            .collect()
    }

    async fn floating_ip_get(&self, floating_ip_id: &str) -> ApiResult<FloatingIp> {
        neutron_floating_ip(&self.show("floatingips", "floatingip", floating_ip_id).await?)
    }

    async fn floating_ip_create(&self, floating_network_id: &str) -> ApiResult<FloatingIp> {
        let body: Value = self
            .client
            .post_json(
                "v2.0/floatingips",
                &json!({ "floatingip": { "floating_network_id": floating_network_id } }),
            )
            .await?;
        neutron_floating_ip(&take_object(body, SERVICE, "floatingip")?)
    }

    async fn floating_ip_update(&self, floating_ip_id: &str, update: Value) -> ApiResult<()> {
        let _: Value = self
            .client
            .put_json(
                &format!("v2.0/floatingips/{}", floating_ip_id),
                &json!({ "floatingip": update }),
            )
            .await?;
        Ok(())
    }

    async fn floating_ip_delete(&self, floating_ip_id: &str) -> ApiResult<()> {
        self.client
            .delete(&format!("v2.0/floatingips/{}", floating_ip_id))
            .await
    }
}
