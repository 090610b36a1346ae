//! Quota sets and tenant usage reconciliation
//!
//! Quota limits are extended integers: a null, missing or negative limit is
//! unlimited and absorbs subtraction. Usage rows keep
//! `available + used = quota` whenever the quota is finite.

use crate::client::ClientFactory;
use crate::compute::{ComputeApi, Flavor, Server};
use crate::floating_ip::{FloatingIpBackend, FloatingIpManager};
use crate::volume::{Volume, VolumeApi};
use crate::wrapper::coerce_i64;
use futures::future::try_join_all;
use horizon_shared::{ApiError, ApiResult, RequestContext, ServiceType};
use serde::ser::Serializer;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

// ============================================================================
// LIMITS
// ============================================================================

/// Quota limit or availability
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    Finite(i64),
    Unlimited,
}

impl Limit {
    /// Negative values mark an unlimited quota
    pub fn from_i64(value: i64) -> Self {
        if value < 0 {
            Limit::Unlimited
        } else {
            Limit::Finite(value)
        }
    }

    /// Coerce a backend value; null, missing and non-numeric values are
    /// unlimited
    pub fn from_value(value: Option<&Value>) -> Self {
        value
            .and_then(coerce_i64)
            .map(Limit::from_i64)
            .unwrap_or(Limit::Unlimited)
    }

    pub fn is_unlimited(&self) -> bool {
        matches!(self, Limit::Unlimited)
    }

    pub fn finite(&self) -> Option<i64> {
        match self {
            Limit::Finite(value) => Some(*value),
            Limit::Unlimited => None,
        }
    }
}

impl std::ops::Sub<i64> for Limit {
    type Output = Limit;

    fn sub(self, used: i64) -> Limit {
        match self {
            Limit::Finite(limit) => Limit::Finite(limit - used),
            Limit::Unlimited => Limit::Unlimited,
        }
    }
}

impl fmt::Display for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Limit::Finite(value) => write!(f, "{}", value),
            Limit::Unlimited => f.write_str("unlimited"),
        }
    }
}

impl Serialize for Limit {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Limit::Finite(value) => serializer.serialize_i64(*value),
            Limit::Unlimited => serializer.serialize_str("unlimited"),
        }
    }
}

/// One named quota
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Quota {
    pub name: String,
    pub limit: Limit,
}

/// Ordered quota set of one tenant
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct QuotaSet {
    items: Vec<Quota>,
}

impl QuotaSet {
    /// Build from a quota-set object; the `id` key is not a quota
    pub fn from_value(value: Value) -> ApiResult<Self> {
        let map = match value {
            Value::Object(map) => map,
            _ => return Err(ApiError::unavailable("compute", "quota set is not an object")),
        };
        let items = map
            .iter()
            .filter(|(name, _)| name.as_str() != "id")
            .map(|(name, value)| Quota {
                name: name.clone(),
                limit: Limit::from_value(Some(value)),
            })
            .collect();
        Ok(Self { items })
    }

    /// Limit for `name`; absent quotas are unlimited
    pub fn get(&self, name: &str) -> Limit {
        self.items
            .iter()
            .find(|q| q.name == name)
            .map(|q| q.limit)
            .unwrap_or(Limit::Unlimited)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Quota> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

// ============================================================================
// USAGE ROWS
// ============================================================================

/// Resource kinds tracked against the tenant quota
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Instances,
    Cores,
    Ram,
    Gigabytes,
    Volumes,
    FloatingIps,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 6] = [
        ResourceKind::Instances,
        ResourceKind::Cores,
        ResourceKind::Ram,
        ResourceKind::Gigabytes,
        ResourceKind::Volumes,
        ResourceKind::FloatingIps,
    ];

    /// Quota name of this kind
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Instances => "instances",
            ResourceKind::Cores => "cores",
            ResourceKind::Ram => "ram",
            ResourceKind::Gigabytes => "gigabytes",
            ResourceKind::Volumes => "volumes",
            ResourceKind::FloatingIps => "floating_ips",
        }
    }

    /// Flavor fields summed per instance
    pub fn flavor_fields(&self) -> &'static [&'static str] {
        match self {
            ResourceKind::Cores => &["vcpus"],
            ResourceKind::Ram => &["ram"],
            _ => &[],
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Usage of one resource kind against its quota
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageRow {
    pub used: i64,
    pub quota: Limit,
    pub available: Limit,
    pub flavor_fields: &'static [&'static str],
}

impl UsageRow {
    fn new(used: i64, quota: Limit, flavor_fields: &'static [&'static str]) -> Self {
        Self {
            used,
            quota,
            available: quota - used,
            flavor_fields,
        }
    }
}

/// Usage rows keyed by resource kind
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct QuotaUsages {
    rows: BTreeMap<ResourceKind, UsageRow>,
}

impl QuotaUsages {
    pub fn get(&self, kind: ResourceKind) -> Option<&UsageRow> {
        self.rows.get(&kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ResourceKind, &UsageRow)> {
        self.rows.iter()
    }
}

// ============================================================================
// RECONCILER
// ============================================================================

/// Joins compute, floating IP and volume listings into quota usage rows
pub struct QuotaReconciler {
    compute: Arc<dyn ComputeApi>,
    floating_ips: Arc<dyn FloatingIpManager>,
    /// Absent when the catalog publishes no volume service
    volumes: Option<Arc<dyn VolumeApi>>,
    tenant_id: String,
}

impl QuotaReconciler {
    /// Create a new reconciler over explicit service handles
    pub fn new(
        compute: Arc<dyn ComputeApi>,
        floating_ips: Arc<dyn FloatingIpManager>,
        volumes: Option<Arc<dyn VolumeApi>>,
        tenant_id: impl Into<String>,
    ) -> Self {
        Self {
            compute,
            floating_ips,
            volumes,
            tenant_id: tenant_id.into(),
        }
    }

    /// Bind the services published in the context's catalog
    pub fn for_context(ctx: &RequestContext, factory: &ClientFactory) -> ApiResult<Self> {
        let compute: Arc<dyn ComputeApi> = Arc::new(factory.compute(ctx)?);
        let floating_ips: Arc<dyn FloatingIpManager> =
            Arc::new(FloatingIpBackend::for_context(ctx, factory)?);
        let volumes: Option<Arc<dyn VolumeApi>> =
            if ctx.catalog().has_service(ServiceType::Volume) {
                Some(Arc::new(factory.volume(ctx)?))
            } else {
                None
            };
        Ok(Self::new(compute, floating_ips, volumes, ctx.tenant_id()))
    }

    async fn volume_list(&self) -> ApiResult<Vec<Volume>> {
        match &self.volumes {
            Some(volumes) => volumes.volume_list(false).await,
            None => Ok(Vec::new()),
        }
    }

    /// Current usage against quota for the bound tenant
    pub async fn tenant_quota_usages(&self) -> ApiResult<QuotaUsages> {
        let (instances, floating_ips, volumes, flavors, quotas) = tokio::try_join!(
            self.compute.server_list(false),
            self.floating_ips.list(),
            self.volume_list(),
            self.compute.flavor_list(),
            self.compute.tenant_quota_get(&self.tenant_id),
        )?;
        debug!(
            tenant_id = %self.tenant_id,
            instances = instances.len(),
            volumes = volumes.len(),
            "tenant_quota_usages"
        );

        let flavors = self.resolve_flavors(&instances, flavors).await?;

        let mut flavor_totals: HashMap<&'static str, i64> = HashMap::new();
        for instance in &instances {
            let flavor = match instance.flavor_id() {
                Ok(flavor_id) => flavors.get(&flavor_id).and_then(Option::as_ref),
                Err(err) => {
                    warn!(
                        instance_id = %instance.id().unwrap_or_default(),
                        error = %err,
                        "instance has no flavor; counting zero usage"
                    );
                    None
                }
            };
            for kind in ResourceKind::ALL {
                for field in kind.flavor_fields() {
                    *flavor_totals.entry(*field).or_insert(0) +=
                        flavor.map(|f| f.field(field)).unwrap_or(0);
                }
            }
        }

        let mut gigabytes = 0;
        for volume in &volumes {
            gigabytes += volume.size()?;
        }

        let mut rows = BTreeMap::new();
        for kind in ResourceKind::ALL {
            let used = match kind {
                ResourceKind::Instances => instances.len() as i64,
                ResourceKind::Gigabytes => gigabytes,
                ResourceKind::Volumes => volumes.len() as i64,
                ResourceKind::FloatingIps => floating_ips.len() as i64,
                ResourceKind::Cores | ResourceKind::Ram => kind
                    .flavor_fields()
                    .iter()
                    .map(|field| flavor_totals.get(field).copied().unwrap_or(0))
                    .sum(),
            };
            rows.insert(
                kind,
                UsageRow::new(used, quotas.get(kind.as_str()), kind.flavor_fields()),
            );
        }

        Ok(QuotaUsages { rows })
    }

    /// Flavor per id; unknown flavors are fetched once each and a failed
    /// lookup contributes nothing
    async fn resolve_flavors(
        &self,
        instances: &[Server],
        listed: Vec<Flavor>,
    ) -> ApiResult<HashMap<String, Option<Flavor>>> {
        let mut flavors = HashMap::with_capacity(listed.len());
        for flavor in listed {
            flavors.insert(flavor.id()?, Some(flavor));
        }

        let mut unknown = HashSet::new();
        for instance in instances {
            if let Ok(flavor_id) = instance.flavor_id() {
                if !flavors.contains_key(&flavor_id) {
                    unknown.insert(flavor_id);
                }
            }
        }

        let lookups = unknown.into_iter().map(|flavor_id| async move {
            match self.compute.flavor_get(&flavor_id).await {
                Ok(flavor) => Ok((flavor_id, Some(flavor))),
                Err(err @ ApiError::NotAuthorized { .. }) | Err(err @ ApiError::Cancelled { .. }) => {
                    Err(err)
                }
                Err(err) => {
                    warn!(flavor_id = %flavor_id, error = %err, "unable to resolve flavor; counting zero usage");
                    Ok((flavor_id, None))
                }
            }
        });
        flavors.extend(try_join_all(lookups).await?);

        Ok(flavors)
    }
}

/// Absolute limits of the bound tenant; `-1` becomes unlimited
pub async fn tenant_absolute_limits(
    compute: &dyn ComputeApi,
    reserved: bool,
) -> ApiResult<BTreeMap<String, Limit>> {
    Ok(compute
        .absolute_limits(reserved)
        .await?
        .into_iter()
        .map(|(name, value)| (name, Limit::from_i64(value)))
        .collect())
}
