//! Metering aggregation
//!
//! `CeilometerUsage` lists metering resources, resolves their owners through
//! the identity service and attaches per-meter statistics to each of them.
//! Statistics are fetched by a bounded pool of workers, one per resource;
//! each worker walks its meters serially. The call returns only after every
//! worker has finished.
//!
//! A meter attaches under its name with `.` replaced by `_`. A meter with no
//! statistics, or whose lookup failed recoverably, attaches as null.

use crate::client::{ClientFactory, ServiceClient};
use crate::identity::{IdentityApi, Tenant, User};
use crate::wrapper::{ApiResource, AttrSet, ResourceWrapper};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use horizon_shared::{ApiError, ApiResult, RequestContext};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const SERVICE: &str = "metering";

/// Separator of the composite resource id
const ID_SEPARATOR: &str = "__";

// ============================================================================
// QUERIES
// ============================================================================

/// Comparison operator of a query term
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl QueryOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryOp::Eq => "eq",
            QueryOp::Ne => "ne",
            QueryOp::Lt => "lt",
            QueryOp::Le => "le",
            QueryOp::Gt => "gt",
            QueryOp::Ge => "ge",
        }
    }
}

/// One `field op value` clause
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryTerm {
    pub field: String,
    pub op: QueryOp,
    pub value: String,
}

impl QueryTerm {
    pub fn new(field: impl Into<String>, op: QueryOp, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(field, QueryOp::Eq, value)
    }
}

/// Conjunction of query terms
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Query(Vec<QueryTerm>);

impl Query {
    pub fn new(terms: Vec<QueryTerm>) -> Self {
        Self(terms)
    }

    pub fn terms(&self) -> &[QueryTerm] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn push(&mut self, term: QueryTerm) {
        self.0.push(term);
    }

    /// This query followed by the terms of `other`
    pub fn and(&self, other: &Query) -> Query {
        let mut terms = self.0.clone();
        terms.extend(other.0.iter().cloned());
        Query(terms)
    }

    /// Repeated `q.field` / `q.op` / `q.value` parameters
    pub fn to_params(&self) -> Vec<(String, String)> {
        self.0
            .iter()
            .flat_map(|term| {
                [
                    ("q.field".to_string(), term.field.clone()),
                    ("q.op".to_string(), term.op.as_str().to_string()),
                    ("q.value".to_string(), term.value.clone()),
                ]
            })
            .collect()
    }
}

/// Equality query over project, user and resource ids; empty ids are skipped
pub fn make_query(tenant_ids: &[&str], user_ids: &[&str], resource_ids: &[&str]) -> Query {
    let mut query = Query::default();
    for (field, ids) in [
        ("project_id", tenant_ids),
        ("user_id", user_ids),
        ("resource_id", resource_ids),
    ] {
        for id in ids.iter().filter(|id| !id.is_empty()) {
            query.push(QueryTerm::eq(field, *id));
        }
    }
    query
}

// ============================================================================
// WRAPPERS
// ============================================================================

crate::api_wrapper!(
    /// Meter published for a resource
    Meter,
    "Meter",
    ["name", "type", "unit", "resource_id", "user_id", "project_id"]
);

crate::api_wrapper!(
    /// Single meter sample
    Sample,
    "Sample",
    [
        "counter_name",
        "user_id",
        "resource_id",
        "timestamp",
        "resource_metadata",
        "source",
        "counter_unit",
        "counter_volume",
        "project_id",
        "counter_type",
    ]
);

impl Sample {
    fn metadata(&self, key: &str) -> Option<&str> {
        self.get_opt("resource_metadata")
            .and_then(|m| m.get(key))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Instance display name, falling back to its id
    pub fn instance(&self) -> Option<&str> {
        self.metadata("display_name")
            .or_else(|| self.metadata("instance_id"))
    }

    pub fn name(&self) -> &str {
        self.metadata("name")
            .or_else(|| self.metadata("display_name"))
            .unwrap_or("")
    }
}

crate::api_wrapper!(
    /// Aggregated statistic of one meter over a period
    Statistic,
    "Statistic",
    [
        "period",
        "period_start",
        "period_end",
        "count",
        "min",
        "max",
        "sum",
        "avg",
        "duration",
        "duration_start",
        "duration_end",
    ]
);

impl Statistic {
    pub fn value(&self, kind: StatKind) -> Option<f64> {
        self.get_opt(kind.as_str()).and_then(Value::as_f64)
    }
}

/// Statistic aggregate attached when only one value is wanted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatKind {
    Avg,
    Max,
    Min,
    Sum,
    Count,
}

impl StatKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatKind::Avg => "avg",
            StatKind::Max => "max",
            StatKind::Min => "min",
            StatKind::Sum => "sum",
            StatKind::Count => "count",
        }
    }
}

impl fmt::Display for StatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StatKind {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "avg" => Ok(StatKind::Avg),
            "max" => Ok(StatKind::Max),
            "min" => Ok(StatKind::Min),
            "sum" => Ok(StatKind::Sum),
            "count" => Ok(StatKind::Count),
            other => Err(ApiError::BadRequest {
                service: SERVICE.to_string(),
                message: format!("unknown statistic '{}'", other),
            }),
        }
    }
}

/// Value attached for one meter
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MeterValue {
    /// One aggregate of the first statistic
    Scalar(f64),
    /// Every statistic returned for the meter
    Statistics(Vec<Statistic>),
}

/// Attribute name a meter attaches under
pub fn meter_field(meter: &str) -> String {
    meter.replace('.', "_")
}

/// Something statistics can be attached to
pub trait StatisticsTarget: Send {
    /// Query identifying the target's samples
    fn query(&self) -> &Query;

    /// Store the value of `meter` under its mangled name
    fn attach(&mut self, meter: &str, value: Option<MeterValue>);
}

/// Metering resource with its owner names and attached meters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resource {
    /// `"<project>__<user>__<resource>"`
    id: String,
    #[serde(skip)]
    resource: ApiResource,
    resource_id: String,
    project_id: String,
    user_id: String,
    #[serde(skip)]
    query: Query,
    tenant: Option<Tenant>,
    user: Option<User>,
    #[serde(flatten)]
    meters: BTreeMap<String, Option<MeterValue>>,
}

impl ResourceWrapper for Resource {
    const KIND: &'static str = "Resource";
    const ATTRS: AttrSet = AttrSet::Fixed(&[
        "resource_id",
        "source",
        "user_id",
        "project_id",
        "metadata",
        "links",
    ]);

    fn from_resource(resource: ApiResource) -> Self {
        // null ids become empty strings so the composite id stays readable
        let text = |attr: &str| resource.opt_str(attr).unwrap_or("").to_string();
        let project_id = text("project_id");
        let user_id = text("user_id");
        let resource_id = text("resource_id");

        Self {
            id: [project_id.as_str(), user_id.as_str(), resource_id.as_str()]
                .join(ID_SEPARATOR),
            query: make_query(&[&project_id], &[&user_id], &[&resource_id]),
            resource,
            resource_id,
            project_id,
            user_id,
            tenant: None,
            user: None,
            meters: BTreeMap::new(),
        }
    }

    fn resource(&self) -> &ApiResource {
        &self.resource
    }
}

impl std::ops::Deref for Resource {
    type Target = ApiResource;

    fn deref(&self) -> &Self::Target {
        &self.resource
    }
}

impl Resource {
    /// Composite id; shadows the payload id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Display name from the resource metadata
    pub fn name(&self) -> &str {
        let metadata = self.resource.get_opt("metadata");
        ["name", "display_name"]
            .iter()
            .filter_map(|key| metadata.and_then(|m| m.get(*key)).and_then(Value::as_str))
            .find(|name| !name.is_empty())
            .unwrap_or("")
    }

    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn tenant(&self) -> Option<&Tenant> {
        self.tenant.as_ref()
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    /// Meter names the resource publishes (`links[].rel`)
    pub fn link_rels(&self) -> Vec<&str> {
        self.resource
            .get_opt("links")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|link| link.get("rel").and_then(Value::as_str))
            .collect()
    }

    /// Attached value of a meter, by meter or field name
    pub fn meter(&self, meter: &str) -> Option<&Option<MeterValue>> {
        self.meters.get(&meter_field(meter))
    }

    pub fn meters(&self) -> &BTreeMap<String, Option<MeterValue>> {
        &self.meters
    }
}

impl StatisticsTarget for Resource {
    fn query(&self) -> &Query {
        &self.query
    }

    fn attach(&mut self, meter: &str, value: Option<MeterValue>) {
        self.meters.insert(meter_field(meter), value);
    }
}

/// Several resources aggregated under a caller-chosen id
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceAggregate {
    id: String,
    #[serde(skip)]
    query: Query,
    #[serde(flatten)]
    meters: BTreeMap<String, Option<MeterValue>>,
}

impl ResourceAggregate {
    /// Aggregate defined directly by a query
    pub fn from_query(id: impl Into<String>, query: Query) -> Self {
        Self {
            id: id.into(),
            query,
            meters: BTreeMap::new(),
        }
    }

    /// Aggregate over lists of ids; an empty list leaves that dimension open
    pub fn from_ids(
        id: impl Into<String>,
        tenant_ids: &[&str],
        user_ids: &[&str],
        resource_ids: &[&str],
    ) -> Self {
        Self::from_query(id, make_query(tenant_ids, user_ids, resource_ids))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn meter(&self, meter: &str) -> Option<&Option<MeterValue>> {
        self.meters.get(&meter_field(meter))
    }

    pub fn meters(&self) -> &BTreeMap<String, Option<MeterValue>> {
        &self.meters
    }
}

impl StatisticsTarget for ResourceAggregate {
    fn query(&self) -> &Query {
        &self.query
    }

    fn attach(&mut self, meter: &str, value: Option<MeterValue>) {
        self.meters.insert(meter_field(meter), value);
    }
}

// ============================================================================
// USAGE DESCRIPTORS
// ============================================================================

/// Which meters a global usage table shows and how resources are selected
#[derive(Debug, Clone, PartialEq)]
pub struct UsageDescriptor {
    pub name: &'static str,
    pub meters: &'static [&'static str],
    /// Server-side resource filter; without one, resources are filtered by
    /// the meters they publish
    pub default_query: Option<Query>,
    pub stats_attr: Option<StatKind>,
    pub output_fields: &'static [&'static str],
}

impl UsageDescriptor {
    pub fn disk() -> Self {
        Self {
            name: "disk",
            meters: &[
                "disk.read.bytes",
                "disk.read.requests",
                "disk.write.bytes",
                "disk.write.requests",
            ],
            default_query: Some(Query::new(vec![QueryTerm::eq(
                "metadata.OS-EXT-AZ:availability_zone",
                "nova",
            )])),
            stats_attr: Some(StatKind::Avg),
            output_fields: &[
                "id",
                "tenant",
                "user",
                "resource",
                "disk_read_bytes",
                "disk_read_requests",
                "disk_write_bytes",
                "disk_write_requests",
            ],
        }
    }

    pub fn network_traffic() -> Self {
        Self {
            name: "network_traffic",
            meters: &[
                "network.incoming.bytes",
                "network.incoming.packets",
                "network.outgoing.bytes",
                "network.outgoing.packets",
            ],
            default_query: None,
            stats_attr: Some(StatKind::Avg),
            output_fields: &[
                "id",
                "tenant",
                "user",
                "resource",
                "network_incoming_bytes",
                "network_incoming_packets",
                "network_outgoing_bytes",
                "network_outgoing_packets",
            ],
        }
    }

    pub fn network() -> Self {
        Self {
            name: "network",
            meters: &[
                "network",
                "network_create",
                "subnet",
                "subnet_create",
                "port",
                "port_create",
                "router",
                "router_create",
                "ip_floating",
                "ip_floating_create",
            ],
            default_query: None,
            stats_attr: Some(StatKind::Max),
            output_fields: &[
                "id",
                "tenant",
                "user",
                "resource",
                "network",
                "network_create",
                "subnet",
                "subnet_create",
                "port",
                "port_create",
                "router",
                "router_create",
                "ip_floating",
                "ip_floating_create",
            ],
        }
    }

    pub fn object_store() -> Self {
        Self {
            name: "object_store",
            meters: &[
                "storage.objects",
                "storage.objects.size",
                "storage.objects.incoming.bytes",
                "storage.objects.outgoing.bytes",
            ],
            default_query: None,
            stats_attr: Some(StatKind::Avg),
            output_fields: &[
                "id",
                "tenant",
                "user",
                "resource",
                "storage_objects",
                "storage_objects_size",
                "storage_objects_outgoing_bytes",
                "storage_objects_incoming_bytes",
            ],
        }
    }

    /// Built-in descriptor by name
    pub fn by_name(name: &str) -> Option<Self> {
        match name {
            "disk" => Some(Self::disk()),
            "network_traffic" => Some(Self::network_traffic()),
            "network" => Some(Self::network()),
            "object_store" => Some(Self::object_store()),
            _ => None,
        }
    }

    /// Whether a resource publishes any of the descriptor's meters
    pub fn matches(&self, resource: &Resource) -> bool {
        resource
            .link_rels()
            .iter()
            .any(|rel| self.meters.contains(rel))
    }

    fn record(&self, resource: &Resource) -> UsageRecord {
        let mut payload = Map::new();
        payload.insert("id".to_string(), Value::String(resource.id().to_string()));
        payload.insert(
            "tenant".to_string(),
            resource
                .tenant()
                .map(|t| Value::String(t.name().to_string()))
                .unwrap_or(Value::Null),
        );
        payload.insert(
            "user".to_string(),
            resource
                .user()
                .map(|u| Value::String(u.name().to_string()))
                .unwrap_or(Value::Null),
        );
        payload.insert(
            "resource".to_string(),
            Value::String(resource.resource_id().to_string()),
        );
        for (field, value) in resource.meters() {
            let value = value
                .as_ref()
                .map(|v| serde_json::to_value(v).unwrap_or(Value::Null))
                .unwrap_or(Value::Null);
            payload.insert(field.clone(), value);
        }

        UsageRecord(ApiResource::from_map(
            self.name,
            AttrSet::Fixed(self.output_fields),
            payload,
        ))
    }
}

/// Row of a global usage table, projected onto the descriptor's fields
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct UsageRecord(ApiResource);

impl std::ops::Deref for UsageRecord {
    type Target = ApiResource;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

// ============================================================================
// CLIENT
// ============================================================================

#[async_trait]
pub trait MeteringApi: Send + Sync {
    async fn resource_list(&self, query: Option<&Query>) -> ApiResult<Vec<Resource>>;

    async fn sample_list(&self, meter: &str, query: Option<&Query>) -> ApiResult<Vec<Sample>>;

    async fn meter_list(&self, query: Option<&Query>) -> ApiResult<Vec<Meter>>;

    /// Statistics of one meter; with a `period` (seconds) one per period
    async fn statistic_list(
        &self,
        meter: &str,
        query: Option<&Query>,
        period: Option<u64>,
    ) -> ApiResult<Vec<Statistic>>;
}

/// HTTP implementation of `MeteringApi` (v2 API)
#[derive(Debug, Clone)]
pub struct MeteringClient {
    client: ServiceClient,
}

impl MeteringClient {
    /// Create a new metering client
    pub fn new(client: ServiceClient) -> Self {
        Self { client }
    }

    async fn list(&self, path: &str, params: &[(String, String)]) -> ApiResult<Vec<Value>> {
        debug!(path = %path, params = ?params, "metering request");
        self.client.get_json(path, params).await
    }
}

fn query_params(query: Option<&Query>) -> Vec<(String, String)> {
    query.map(Query::to_params).unwrap_or_default()
}

#[async_trait]
impl MeteringApi for MeteringClient {
    async fn resource_list(&self, query: Option<&Query>) -> ApiResult<Vec<Resource>> {
        Resource::wrap_all(self.list("v2/resources", &query_params(query)).await?)
    }

    async fn sample_list(&self, meter: &str, query: Option<&Query>) -> ApiResult<Vec<Sample>> {
        Sample::wrap_all(
            self.list(&format!("v2/meters/{}", meter), &query_params(query))
                .await?,
        )
    }

    async fn meter_list(&self, query: Option<&Query>) -> ApiResult<Vec<Meter>> {
        Meter::wrap_all(self.list("v2/meters", &query_params(query)).await?)
    }

    async fn statistic_list(
        &self,
        meter: &str,
        query: Option<&Query>,
        period: Option<u64>,
    ) -> ApiResult<Vec<Statistic>> {
        let mut params = query_params(query);
        if let Some(period) = period {
            params.push(("period".to_string(), period.to_string()));
        }
        Statistic::wrap_all(
            self.list(&format!("v2/meters/{}/statistics", meter), &params)
                .await?,
        )
    }
}

// ============================================================================
// AGGREGATOR
// ============================================================================

/// Which statistics to attach and how
#[derive(Debug, Clone, Default)]
pub struct StatisticsRequest<'a> {
    pub meters: &'a [&'a str],
    /// Seconds; without one a single aggregate statistic is returned
    pub period: Option<u64>,
    /// Attach one aggregate instead of the statistic list
    pub stats_attr: Option<StatKind>,
    /// Extra terms such as a time window
    pub additional_query: Option<&'a Query>,
}

/// Resource filter applied after listing
pub type ResourceFilter<'a> = &'a (dyn Fn(&Resource) -> bool + Send + Sync);

/// Per-request metering aggregator with shared identity caches
pub struct CeilometerUsage {
    metering: Arc<dyn MeteringApi>,
    identity: Arc<dyn IdentityApi>,
    /// Users by id; write-once per key
    users: DashMap<String, User>,
    /// Tenants by id; write-once per key
    tenants: DashMap<String, Tenant>,
    max_workers: usize,
    cancellation: CancellationToken,
    deadline: Option<Instant>,
}

impl CeilometerUsage {
    /// Create a new aggregator
    pub fn new(
        metering: Arc<dyn MeteringApi>,
        identity: Arc<dyn IdentityApi>,
        max_workers: usize,
    ) -> Self {
        Self {
            metering,
            identity,
            users: DashMap::new(),
            tenants: DashMap::new(),
            max_workers: max_workers.max(1),
            cancellation: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Aggregator bound to the context's clients, deadline and cancellation
    pub fn for_context(ctx: &RequestContext, factory: &ClientFactory) -> ApiResult<Self> {
        let usage = Self::new(
            Arc::new(factory.metering(ctx)?),
            Arc::new(factory.identity(ctx)?),
            ctx.config().metering_max_workers,
        );
        Ok(usage
            .with_cancellation(ctx.cancellation().clone())
            .with_deadline(ctx.deadline()))
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    fn past_deadline(&self) -> bool {
        self.deadline
            .map(|deadline| Instant::now() >= deadline)
            .unwrap_or(false)
    }

    fn check_cancelled(&self) -> ApiResult<()> {
        if self.cancellation.is_cancelled() {
            return Err(ApiError::cancelled("metering request cancelled"));
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Identity caches
    // ------------------------------------------------------------------------

    /// User by id, fetched once and cached
    pub async fn get_user(&self, user_id: &str) -> ApiResult<User> {
        if let Some(user) = self.users.get(user_id) {
            return Ok(user.clone());
        }
        // concurrent misses may fetch twice; the value written is the same
        let user = self.identity.user_get(user_id).await?;
        self.users.insert(user_id.to_string(), user.clone());
        Ok(user)
    }

    /// Tenant by id, fetched once and cached
    pub async fn get_tenant(&self, tenant_id: &str) -> ApiResult<Tenant> {
        if let Some(tenant) = self.tenants.get(tenant_id) {
            return Ok(tenant.clone());
        }
        let tenant = self.identity.tenant_get(tenant_id).await?;
        self.tenants.insert(tenant_id.to_string(), tenant.clone());
        Ok(tenant)
    }

    /// Fill the user cache from one listing
    pub async fn preload_all_users(&self) -> ApiResult<()> {
        for user in self.identity.user_list().await? {
            self.users.insert(user.id()?, user);
        }
        Ok(())
    }

    /// Fill the tenant cache from one listing
    pub async fn preload_all_tenants(&self) -> ApiResult<()> {
        let (tenants, _more) = self.identity.tenant_list().await?;
        for tenant in tenants {
            self.tenants.insert(tenant.id()?, tenant);
        }
        Ok(())
    }

    pub fn cached_users(&self) -> usize {
        self.users.len()
    }

    pub fn cached_tenants(&self) -> usize {
        self.tenants.len()
    }

    async fn attach_owners(&self, mut resource: Resource) -> ApiResult<Resource> {
        if !resource.project_id.is_empty() {
            let lookup = self.get_tenant(&resource.project_id).await;
            resource.tenant = owner_lookup(lookup, "tenant", &resource.project_id)?;
        }
        if !resource.user_id.is_empty() {
            let lookup = self.get_user(&resource.user_id).await;
            resource.user = owner_lookup(lookup, "user", &resource.user_id)?;
        }
        Ok(resource)
    }

    // ------------------------------------------------------------------------
    // Resources
    // ------------------------------------------------------------------------

    /// Resources matching `query`, optionally filtered and with owner names
    pub async fn resources(
        &self,
        query: Option<&Query>,
        filter: Option<ResourceFilter<'_>>,
        with_users_and_tenants: bool,
    ) -> ApiResult<Vec<Resource>> {
        self.check_cancelled()?;
        let mut resources = self.metering.resource_list(query).await?;
        if let Some(filter) = filter {
            resources.retain(|resource| filter(resource));
        }
        debug!(count = resources.len(), "metering resources listed");

        if !with_users_and_tenants {
            return Ok(resources);
        }

        let resolved: Vec<ApiResult<Resource>> = stream::iter(resources)
            .map(|resource| self.attach_owners(resource))
            .buffered(self.max_workers)
            .collect()
            .await;
        resolved.into_iter().collect()
    }

    /// Resources with statistics attached for every requested meter
    pub async fn resources_with_statistics(
        &self,
        query: Option<&Query>,
        filter: Option<ResourceFilter<'_>>,
        request: &StatisticsRequest<'_>,
        with_users_and_tenants: bool,
    ) -> ApiResult<Vec<Resource>> {
        let resources = self
            .resources(query, filter, with_users_and_tenants)
            .await?;
        self.process_list(resources, request).await
    }

    /// Aggregates defined by named queries
    pub fn resource_aggregates(&self, queries: BTreeMap<String, Query>) -> Vec<ResourceAggregate> {
        queries
            .into_iter()
            .map(|(id, query)| ResourceAggregate::from_query(id, query))
            .collect()
    }

    pub async fn resource_aggregates_with_statistics(
        &self,
        queries: BTreeMap<String, Query>,
        request: &StatisticsRequest<'_>,
    ) -> ApiResult<Vec<ResourceAggregate>> {
        let aggregates = self.resource_aggregates(queries);
        self.process_list(aggregates, request).await
    }

    /// Attach every requested meter to one target, serially.
    ///
    /// Recoverable failures attach null; `NotAuthorized` and cancellation
    /// end the worker with an error.
    pub async fn update_with_statistics<T: StatisticsTarget>(
        &self,
        target: &mut T,
        request: &StatisticsRequest<'_>,
    ) -> ApiResult<()> {
        if request.meters.is_empty() {
            return Ok(());
        }

        let query = match request.additional_query {
            Some(additional) => target.query().and(additional),
            None => target.query().clone(),
        };

        for meter in request.meters {
            self.check_cancelled()?;
            if self.past_deadline() {
                target.attach(meter, None);
                continue;
            }

            let lookup = tokio::select! {
                biased;
                _ = self.cancellation.cancelled() => {
                    return Err(ApiError::cancelled("metering request cancelled"));
                }
                lookup = self.metering.statistic_list(meter, Some(&query), request.period) => lookup,
            };

            let value = match lookup {
                Ok(statistics) => attachment(statistics, request.stats_attr),
                Err(err @ ApiError::NotAuthorized { .. }) => return Err(err),
                Err(err) if self.cancellation.is_cancelled() => return Err(err),
                Err(err) => {
                    warn!(meter = %meter, error = %err, "statistics unavailable; attaching null");
                    None
                }
            };
            target.attach(meter, value);
        }
        Ok(())
    }

    /// Run one worker per target through the bounded pool and join
    async fn process_list<T: StatisticsTarget>(
        &self,
        targets: Vec<T>,
        request: &StatisticsRequest<'_>,
    ) -> ApiResult<Vec<T>> {
        self.check_cancelled()?;

        let workers = stream::iter(targets)
            .map(|mut target| async move {
                let result = self.update_with_statistics(&mut target, request).await;
                (target, result)
            })
            .buffered(self.max_workers)
            .collect::<Vec<_>>();

        let finished = tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => {
                return Err(ApiError::cancelled("metering request cancelled"));
            }
            finished = workers => finished,
        };

        let mut targets = Vec::with_capacity(finished.len());
        for (target, result) in finished {
            result?;
            targets.push(target);
        }
        Ok(targets)
    }

    // ------------------------------------------------------------------------
    // Global usage tables
    // ------------------------------------------------------------------------

    /// Resources shaped by a usage descriptor.
    ///
    /// The explicit query wins over the descriptor's default query; with
    /// neither, resources are filtered by the meters they publish.
    pub async fn global_data_get(
        &self,
        descriptor: &UsageDescriptor,
        query: Option<&Query>,
        with_statistics: bool,
        additional_query: Option<&Query>,
        with_users_and_tenants: bool,
    ) -> ApiResult<Vec<UsageRecord>> {
        let query = query
            .filter(|q| !q.is_empty())
            .or_else(|| descriptor.default_query.as_ref().filter(|q| !q.is_empty()));
        let by_meters = |resource: &Resource| descriptor.matches(resource);
        let filter: Option<ResourceFilter<'_>> = match query {
            Some(_) => None,
            None => Some(&by_meters),
        };

        let resources = if with_statistics {
            let request = StatisticsRequest {
                meters: descriptor.meters,
                period: None,
                stats_attr: descriptor.stats_attr,
                additional_query,
            };
            self.resources_with_statistics(query, filter, &request, with_users_and_tenants)
                .await?
        } else {
            self.resources(query, filter, with_users_and_tenants)
                .await?
        };

        Ok(resources.iter().map(|r| descriptor.record(r)).collect())
    }

    pub async fn global_disk_usage(
        &self,
        query: Option<&Query>,
        with_statistics: bool,
        additional_query: Option<&Query>,
    ) -> ApiResult<Vec<UsageRecord>> {
        self.global_data_get(
            &UsageDescriptor::disk(),
            query,
            with_statistics,
            additional_query,
            true,
        )
        .await
    }

    pub async fn global_network_traffic_usage(
        &self,
        query: Option<&Query>,
        with_statistics: bool,
        additional_query: Option<&Query>,
    ) -> ApiResult<Vec<UsageRecord>> {
        self.global_data_get(
            &UsageDescriptor::network_traffic(),
            query,
            with_statistics,
            additional_query,
            true,
        )
        .await
    }

    pub async fn global_network_usage(
        &self,
        query: Option<&Query>,
        with_statistics: bool,
        additional_query: Option<&Query>,
    ) -> ApiResult<Vec<UsageRecord>> {
        self.global_data_get(
            &UsageDescriptor::network(),
            query,
            with_statistics,
            additional_query,
            true,
        )
        .await
    }

    pub async fn global_object_store_usage(
        &self,
        query: Option<&Query>,
        with_statistics: bool,
        additional_query: Option<&Query>,
    ) -> ApiResult<Vec<UsageRecord>> {
        self.global_data_get(
            &UsageDescriptor::object_store(),
            query,
            with_statistics,
            additional_query,
            true,
        )
        .await
    }

    /// Query identifying the resource behind a composite id; a malformed id
    /// yields an empty query
    pub fn query_from_object_id(&self, object_id: &str) -> Query {
        let parts: Vec<&str> = object_id.split(ID_SEPARATOR).collect();
        match parts.as_slice() {
            [tenant_id, user_id, resource_id] => {
                make_query(&[tenant_id], &[user_id], &[resource_id])
            }
            _ => Query::default(),
        }
    }
}

/// Owner name lookup; only authorization and cancellation failures propagate
fn owner_lookup<T>(lookup: ApiResult<T>, kind: &str, id: &str) -> ApiResult<Option<T>> {
    match lookup {
        Ok(value) => Ok(Some(value)),
        Err(err @ ApiError::NotAuthorized { .. }) | Err(err @ ApiError::Cancelled { .. }) => {
            Err(err)
        }
        Err(err) => {
            warn!(kind = %kind, id = %id, error = %err, "owner lookup failed");
            Ok(None)
        }
    }
}

fn attachment(statistics: Vec<Statistic>, stats_attr: Option<StatKind>) -> Option<MeterValue> {
    if statistics.is_empty() {
        return None;
    }
    match stats_attr {
        Some(kind) => statistics
            .first()
            .and_then(|s| s.value(kind))
            .map(MeterValue::Scalar),
        None => Some(MeterValue::Statistics(statistics)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct FakeMetering {
        resources: Vec<Value>,
        /// Statistics by meter; a meter absent here fails
        statistics: HashMap<String, Vec<Value>>,
        unauthorized_meter: Option<String>,
        queries: Mutex<Vec<(String, Query)>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    #[async_trait]
    impl MeteringApi for FakeMetering {
        async fn resource_list(&self, _query: Option<&Query>) -> ApiResult<Vec<Resource>> {
            Resource::wrap_all(self.resources.clone())
        }

        async fn sample_list(&self, _meter: &str, _query: Option<&Query>) -> ApiResult<Vec<Sample>> {
            Ok(Vec::new())
        }

        async fn meter_list(&self, _query: Option<&Query>) -> ApiResult<Vec<Meter>> {
            Ok(Vec::new())
        }

        async fn statistic_list(
            &self,
            meter: &str,
            query: Option<&Query>,
            _period: Option<u64>,
        ) -> ApiResult<Vec<Statistic>> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::task::yield_now().await;
            tokio::task::yield_now().await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            self.queries
                .lock()
                .unwrap()
                .push((meter.to_string(), query.cloned().unwrap_or_default()));

            if self.unauthorized_meter.as_deref() == Some(meter) {
                return Err(ApiError::NotAuthorized {
                    reason: "token expired".to_string(),
                });
            }
            match self.statistics.get(meter) {
                Some(stats) => Statistic::wrap_all(stats.clone()),
                None => Err(ApiError::unavailable(SERVICE, "statistics backend error")),
            }
        }
    }

    #[derive(Default)]
    struct FakeIdentity {
        tenant_calls: AtomicUsize,
        user_calls: AtomicUsize,
    }

    #[async_trait]
    impl IdentityApi for FakeIdentity {
        async fn user_get(&self, user_id: &str) -> ApiResult<User> {
            self.user_calls.fetch_add(1, Ordering::SeqCst);
            if user_id == "ghost" {
                return Err(ApiError::not_found("identity", user_id));
            }
            User::wrap(json!({"id": user_id, "name": format!("user-{}", user_id)}))
        }

        async fn user_list(&self) -> ApiResult<Vec<User>> {
            User::wrap_all(vec![
                json!({"id": "u1", "name": "alice"}),
                json!({"id": "u2", "name": "bob"}),
            ])
        }

        async fn tenant_get(&self, tenant_id: &str) -> ApiResult<Tenant> {
            self.tenant_calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            Tenant::wrap(json!({"id": tenant_id, "name": format!("tenant-{}", tenant_id)}))
        }

        async fn tenant_list(&self) -> ApiResult<(Vec<Tenant>, bool)> {
            Ok((Tenant::wrap_all(vec![json!({"id": "t1", "name": "demo"})])?, false))
        }
    }

    fn resource(project: &str, user: &str, id: &str, rels: &[&str]) -> Value {
        let links: Vec<Value> = rels.iter().map(|rel| json!({"rel": rel})).collect();
        json!({
            "resource_id": id,
            "project_id": project,
            "user_id": user,
            "metadata": {"display_name": format!("vm-{}", id)},
            "links": links
        })
    }

    fn stat(avg: f64) -> Value {
        json!({"avg": avg, "max": avg * 2.0, "count": 3})
    }

    fn usage(metering: FakeMetering, max_workers: usize) -> (Arc<FakeMetering>, Arc<FakeIdentity>, CeilometerUsage) {
        let metering = Arc::new(metering);
        let identity = Arc::new(FakeIdentity::default());
        let usage = CeilometerUsage::new(metering.clone(), identity.clone(), max_workers);
        (metering, identity, usage)
    }

    const DISK_METERS: &[&str] = &["disk.read.bytes", "disk.write.bytes"];

    #[tokio::test]
    async fn test_failing_meter_attaches_null() {
        let (_, _, usage) = usage(
            FakeMetering {
                resources: vec![resource("t1", "u1", "r1", &[])],
                statistics: HashMap::from([("disk.read.bytes".to_string(), vec![stat(42.0)])]),
                ..Default::default()
            },
            4,
        );
        let request = StatisticsRequest {
            meters: DISK_METERS,
            stats_attr: Some(StatKind::Avg),
            ..Default::default()
        };

        let resources = usage
            .resources_with_statistics(None, None, &request, false)
            .await
            .unwrap();

        let r = &resources[0];
        assert_eq!(r.meter("disk.read.bytes"), Some(&Some(MeterValue::Scalar(42.0))));
        assert_eq!(r.meters().get("disk_write_bytes"), Some(&None));
    }

    #[tokio::test]
    async fn test_empty_statistics_attach_null_and_full_list_without_attr() {
        let (_, _, usage) = usage(
            FakeMetering {
                resources: vec![resource("t1", "u1", "r1", &[])],
                statistics: HashMap::from([
                    ("disk.read.bytes".to_string(), vec![stat(1.0), stat(2.0)]),
                    ("disk.write.bytes".to_string(), Vec::new()),
                ]),
                ..Default::default()
            },
            4,
        );
        let request = StatisticsRequest {
            meters: DISK_METERS,
            ..Default::default()
        };

        let resources = usage
            .resources_with_statistics(None, None, &request, false)
            .await
            .unwrap();

        match resources[0].meter("disk.read.bytes") {
            Some(Some(MeterValue::Statistics(stats))) => assert_eq!(stats.len(), 2),
            other => panic!("unexpected attachment: {:?}", other),
        }
        assert_eq!(resources[0].meter("disk.write.bytes"), Some(&None));
    }

    #[tokio::test]
    async fn test_statistics_query_identifies_resource() {
        let (metering, _, usage) = usage(
            FakeMetering {
                resources: vec![resource("t1", "u1", "r1", &[])],
                statistics: HashMap::from([("cpu_util".to_string(), vec![stat(5.0)])]),
                ..Default::default()
            },
            1,
        );
        let window = Query::new(vec![QueryTerm::new("timestamp", QueryOp::Ge, "2024-01-01T00:00:00")]);
        let request = StatisticsRequest {
            meters: &["cpu_util"],
            stats_attr: Some(StatKind::Max),
            additional_query: Some(&window),
            ..Default::default()
        };

        let resources = usage
            .resources_with_statistics(None, None, &request, false)
            .await
            .unwrap();
        assert_eq!(resources[0].meter("cpu_util"), Some(&Some(MeterValue::Scalar(10.0))));

        let queries = metering.queries.lock().unwrap();
        let terms = queries[0].1.terms();
        assert_eq!(terms.len(), 4);
        assert_eq!(terms[0], QueryTerm::eq("project_id", "t1"));
        assert_eq!(terms[3].op, QueryOp::Ge);
    }

    #[tokio::test]
    async fn test_composite_id_round_trip() {
        let (_, _, usage) = usage(FakeMetering::default(), 1);

        let query = usage.query_from_object_id("t1__u1__r1");
        assert_eq!(
            query.terms(),
            &[
                QueryTerm::eq("project_id", "t1"),
                QueryTerm::eq("user_id", "u1"),
                QueryTerm::eq("resource_id", "r1"),
            ]
        );

        let r = Resource::wrap(resource("t1", "u1", "r1", &[])).unwrap();
        assert_eq!(r.id(), "t1__u1__r1");
        assert_eq!(usage.query_from_object_id(r.id()), *r.query());

        assert!(usage.query_from_object_id("t1__u1").is_empty());
        assert!(usage.query_from_object_id("a__b__c__d").is_empty());
        assert!(usage.query_from_object_id("").is_empty());
    }

    #[tokio::test]
    async fn test_tenant_cache_under_fan_out() {
        let (_, identity, usage) = usage(FakeMetering::default(), 8);

        let lookups = (0..100).map(|_| usage.get_tenant("t1"));
        let tenants = futures::future::join_all(lookups).await;

        assert!(identity.tenant_calls.load(Ordering::SeqCst) <= 100);
        for tenant in tenants {
            assert_eq!(tenant.unwrap().name(), "tenant-t1");
        }
        assert_eq!(usage.cached_tenants(), 1);

        // a warm cache issues no further calls
        let calls = identity.tenant_calls.load(Ordering::SeqCst);
        usage.get_tenant("t1").await.unwrap();
        assert_eq!(identity.tenant_calls.load(Ordering::SeqCst), calls);
    }

    #[tokio::test]
    async fn test_preload_fills_caches() {
        let (_, identity, usage) = usage(FakeMetering::default(), 1);
        usage.preload_all_users().await.unwrap();
        usage.preload_all_tenants().await.unwrap();

        assert_eq!(usage.cached_users(), 2);
        assert_eq!(usage.get_user("u2").await.unwrap().name(), "bob");
        assert_eq!(usage.get_tenant("t1").await.unwrap().name(), "demo");
        assert_eq!(identity.user_calls.load(Ordering::SeqCst), 0);
        assert_eq!(identity.tenant_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_owner_lookup_failure_leaves_owner_empty() {
        let (_, _, usage) = usage(
            FakeMetering {
                resources: vec![resource("t1", "ghost", "r1", &[]), resource("", "u1", "r2", &[])],
                ..Default::default()
            },
            2,
        );

        let resources = usage.resources(None, None, true).await.unwrap();
        assert_eq!(resources[0].tenant().unwrap().name(), "tenant-t1");
        assert!(resources[0].user().is_none());
        assert!(resources[1].tenant().is_none());
        assert_eq!(resources[1].id(), "__u1__r2");
        assert_eq!(resources[1].name(), "vm-r2");
    }

    #[tokio::test]
    async fn test_worker_pool_is_bounded() {
        let resources = (0..10)
            .map(|i| resource("t1", "u1", &format!("r{}", i), &[]))
            .collect();
        let (metering, _, usage) = usage(
            FakeMetering {
                resources,
                statistics: HashMap::from([
                    ("disk.read.bytes".to_string(), vec![stat(1.0)]),
                    ("disk.write.bytes".to_string(), vec![stat(1.0)]),
                ]),
                ..Default::default()
            },
            3,
        );
        let request = StatisticsRequest {
            meters: DISK_METERS,
            stats_attr: Some(StatKind::Avg),
            ..Default::default()
        };

        let resources = usage
            .resources_with_statistics(None, None, &request, false)
            .await
            .unwrap();

        assert_eq!(resources.len(), 10);
        assert!(resources.iter().all(|r| r.meters().len() == 2));
        assert!(metering.max_in_flight.load(Ordering::SeqCst) <= 3);
        assert_eq!(metering.queries.lock().unwrap().len(), 20);
    }

    #[tokio::test]
    async fn test_unauthorized_meter_fails_whole_call() {
        let (_, _, usage) = usage(
            FakeMetering {
                resources: vec![resource("t1", "u1", "r1", &[]), resource("t1", "u1", "r2", &[])],
                statistics: HashMap::from([("disk.read.bytes".to_string(), vec![stat(1.0)])]),
                unauthorized_meter: Some("disk.write.bytes".to_string()),
                ..Default::default()
            },
            2,
        );
        let request = StatisticsRequest {
            meters: DISK_METERS,
            ..Default::default()
        };

        let err = usage
            .resources_with_statistics(None, None, &request, false)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotAuthorized { .. }));
    }

    #[tokio::test]
    async fn test_cancelled_call_returns_cancelled() {
        let token = CancellationToken::new();
        let (metering, _, usage) = usage(
            FakeMetering {
                resources: vec![resource("t1", "u1", "r1", &[])],
                ..Default::default()
            },
            2,
        );
        let usage = usage.with_cancellation(token.clone());
        token.cancel();

        let request = StatisticsRequest {
            meters: DISK_METERS,
            ..Default::default()
        };
        let err = usage
            .resources_with_statistics(None, None, &request, false)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Cancelled { .. }));
        assert!(metering.queries.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_expired_deadline_attaches_null() {
        let (metering, _, usage) = usage(
            FakeMetering {
                resources: vec![resource("t1", "u1", "r1", &[])],
                statistics: HashMap::from([("disk.read.bytes".to_string(), vec![stat(1.0)])]),
                ..Default::default()
            },
            2,
        );
        let past = Instant::now()
            .checked_sub(Duration::from_secs(1))
            .unwrap_or_else(Instant::now);
        let usage = usage.with_deadline(Some(past));

        let request = StatisticsRequest {
            meters: DISK_METERS,
            stats_attr: Some(StatKind::Avg),
            ..Default::default()
        };
        let resources = usage
            .resources_with_statistics(None, None, &request, false)
            .await
            .unwrap();

        assert_eq!(resources[0].meter("disk.read.bytes"), Some(&None));
        assert_eq!(resources[0].meter("disk.write.bytes"), Some(&None));
        assert!(metering.queries.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_inputs_are_well_formed() {
        let (_, _, usage) = usage(FakeMetering::default(), 2);
        let request = StatisticsRequest {
            meters: DISK_METERS,
            ..Default::default()
        };
        let resources = usage
            .resources_with_statistics(None, None, &request, true)
            .await
            .unwrap();
        assert!(resources.is_empty());

        let mut aggregate = ResourceAggregate::from_ids("all", &["t1"], &[], &[]);
        usage
            .update_with_statistics(&mut aggregate, &StatisticsRequest::default())
            .await
            .unwrap();
        assert!(aggregate.meters().is_empty());
    }

    #[tokio::test]
    async fn test_global_usage_filters_by_published_meters() {
        let (_, _, usage) = usage(
            FakeMetering {
                resources: vec![
                    resource("t1", "u1", "r1", &["network.incoming.bytes"]),
                    resource("t1", "u1", "r2", &["cpu"]),
                ],
                statistics: HashMap::from([
                    ("network.incoming.bytes".to_string(), vec![stat(7.0)]),
                    ("network.incoming.packets".to_string(), vec![stat(1.0)]),
                    ("network.outgoing.bytes".to_string(), vec![stat(2.0)]),
                    ("network.outgoing.packets".to_string(), Vec::new()),
                ]),
                ..Default::default()
            },
            2,
        );

        let records = usage
            .global_network_traffic_usage(None, true, None)
            .await
            .unwrap();

        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.get_str("id").unwrap(), "t1__u1__r1");
        assert_eq!(record.get_str("tenant").unwrap(), "tenant-t1");
        assert_eq!(record.get_str("user").unwrap(), "user-u1");
        assert_eq!(record.get("network_incoming_bytes").unwrap(), &json!(7.0));
        assert!(record.get("network_outgoing_packets").unwrap().is_null());

        let rendered = serde_json::to_value(record).unwrap();
        assert_eq!(rendered.as_object().unwrap().len(), 8);
    }

    #[tokio::test]
    async fn test_resource_aggregates_with_statistics() {
        let (metering, _, usage) = usage(
            FakeMetering {
                statistics: HashMap::from([("storage.objects".to_string(), vec![stat(3.0)])]),
                ..Default::default()
            },
            2,
        );
        let queries = BTreeMap::from([
            ("t1".to_string(), make_query(&["t1"], &[], &[])),
            ("t2".to_string(), make_query(&["t2"], &[], &[])),
        ]);
        let request = StatisticsRequest {
            meters: &["storage.objects"],
            stats_attr: Some(StatKind::Avg),
            ..Default::default()
        };

        let aggregates = usage
            .resource_aggregates_with_statistics(queries, &request)
            .await
            .unwrap();

        assert_eq!(aggregates.len(), 2);
        assert_eq!(aggregates[0].id(), "t1");
        assert_eq!(
            aggregates[1].meter("storage.objects"),
            Some(&Some(MeterValue::Scalar(3.0)))
        );
        assert_eq!(metering.queries.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_query_params_and_make_query() {
        let query = make_query(&["t1", "t2"], &[""], &["r1"]);
        assert_eq!(query.terms().len(), 3);
        assert_eq!(
            query.to_params()[..3],
            [
                ("q.field".to_string(), "project_id".to_string()),
                ("q.op".to_string(), "eq".to_string()),
                ("q.value".to_string(), "t1".to_string()),
            ]
        );
        assert_eq!(
            serde_json::to_value(&query).unwrap()[2],
            json!({"field": "resource_id", "op": "eq", "value": "r1"})
        );
    }

    #[test]
    fn test_sample_names() {
        let sample = Sample::wrap(json!({
            "counter_name": "cpu",
            "resource_metadata": {"instance_id": "i-1", "name": "", "display_name": "web"}
        }))
        .unwrap();
        assert_eq!(sample.instance(), Some("web"));
        assert_eq!(sample.name(), "web");

        let bare = Sample::wrap(json!({"resource_metadata": {"instance_id": "i-1"}})).unwrap();
        assert_eq!(bare.instance(), Some("i-1"));
        assert_eq!(bare.name(), "");
    }

    #[test]
    fn test_descriptor_lookup() {
        assert_eq!(UsageDescriptor::by_name("disk").unwrap().stats_attr, Some(StatKind::Avg));
        assert!(UsageDescriptor::by_name("disk").unwrap().default_query.is_some());
        assert_eq!(UsageDescriptor::by_name("network").unwrap().stats_attr, Some(StatKind::Max));
        assert!(UsageDescriptor::by_name("cpu").is_none());
        assert_eq!("max".parse::<StatKind>().unwrap(), StatKind::Max);
        assert!("median".parse::<StatKind>().is_err());
    }
}
