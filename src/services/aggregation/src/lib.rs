//! Service aggregation layer for the cloud dashboard
//!
//! The web layer builds a `RequestContext` per inbound request and calls into
//! this crate to federate the compute, network, image, volume, identity and
//! metering services behind a uniform resource model.
//!
//! ## Architecture
//!
//! ```text
//! AggregationService
//! ├── ClientFactory (per-request service clients, shared connection pools)
//! ├── ResourceWrappers (attribute projections over backend payloads)
//! ├── FloatingIpBackend (compute-only or port-bound floating IPs)
//! ├── QuotaReconciler (quota + usage + flavor reservations)
//! ├── CeilometerUsage (parallel metering statistics with identity caches)
//! └── ErrorHandler (handled / escalated outcomes for views)
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use aggregation::AggregationService;
//! use horizon_shared::RequestContext;
//!
//! async fn quotas(ctx: &RequestContext) -> horizon_shared::ApiResult<()> {
//!     let service = AggregationService::new();
//!     let usages = service.tenant_quota_usages(ctx).await?;
//!     println!("{}", serde_json::to_string_pretty(&usages).unwrap_or_default());
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod compute;
pub mod error_handler;
pub mod floating_ip;
pub mod identity;
pub mod image;
pub mod metering;
pub mod network;
pub mod quota;
pub mod telemetry;
pub mod volume;
pub mod wrapper;

// Re-export commonly used types
pub use client::{ClientFactory, ServiceClient};
pub use compute::{ComputeApi, Flavor, Server};
pub use error_handler::{ErrorHandler, ErrorResponse, Escalation, HandleOptions, Handled};
pub use floating_ip::{
    FloatingIp, FloatingIpBackend, FloatingIpManager, FloatingIpPool, FloatingIpTarget,
};
pub use image::{Image, ImagePage};
pub use metering::{
    CeilometerUsage, MeterValue, Query, QueryOp, QueryTerm, Resource, ResourceAggregate,
    StatKind, StatisticsRequest, UsageDescriptor, UsageRecord,
};
pub use network::Network;
pub use quota::{Limit, QuotaReconciler, QuotaUsages, ResourceKind, UsageRow};
pub use volume::VolumeView;
pub use wrapper::{ApiResource, AttrSet, ResourceWrapper};

use horizon_shared::{ApiResult, RequestContext};
use std::collections::BTreeMap;

/// Entry point for view callers; every operation takes the request context
/// first
#[derive(Debug, Clone, Default)]
pub struct AggregationService {
    factory: ClientFactory,
    errors: ErrorHandler,
}

impl AggregationService {
    /// Create a new aggregation service
    pub fn new() -> Self {
        Self::default()
    }

    /// Service backed by an existing factory, such as one built with
    /// `ClientFactory::from_config`
    pub fn with_factory(factory: ClientFactory) -> Self {
        Self {
            factory,
            errors: ErrorHandler::new(),
        }
    }

    pub fn factory(&self) -> &ClientFactory {
        &self.factory
    }

    pub fn errors(&self) -> &ErrorHandler {
        &self.errors
    }

    /// Quota usage rows for the context's tenant
    pub async fn tenant_quota_usages(&self, ctx: &RequestContext) -> ApiResult<QuotaUsages> {
        QuotaReconciler::for_context(ctx, &self.factory)?
            .tenant_quota_usages()
            .await
    }

    pub async fn tenant_absolute_limits(
        &self,
        ctx: &RequestContext,
        reserved: bool,
    ) -> ApiResult<BTreeMap<String, Limit>> {
        let compute = self.factory.compute(ctx)?;
        quota::tenant_absolute_limits(&compute, reserved).await
    }

    /// Floating IP manager matching the context's catalog
    pub fn floating_ips(&self, ctx: &RequestContext) -> ApiResult<FloatingIpBackend> {
        FloatingIpBackend::for_context(ctx, &self.factory)
    }

    /// Metering aggregator bound to the context's deadline and cancellation
    pub fn metering(&self, ctx: &RequestContext) -> ApiResult<CeilometerUsage> {
        CeilometerUsage::for_context(ctx, &self.factory)
    }

    pub async fn server_list(&self, ctx: &RequestContext, all_tenants: bool) -> ApiResult<Vec<Server>> {
        self.factory.compute(ctx)?.server_list(all_tenants).await
    }

    pub async fn image_list_detailed(
        &self,
        ctx: &RequestContext,
        marker: Option<&str>,
        filters: BTreeMap<String, String>,
        paginate: bool,
    ) -> ApiResult<ImagePage> {
        let images = self.factory.image(ctx)?;
        image::image_list_detailed(&images, ctx.config(), marker, filters, paginate).await
    }

    pub async fn network_list_for_tenant(&self, ctx: &RequestContext) -> ApiResult<Vec<Network>> {
        let networks = self.factory.network(ctx)?;
        network::network_list_for_tenant(&networks, ctx.tenant_id(), &[]).await
    }

    pub async fn volume_list(
        &self,
        ctx: &RequestContext,
        all_tenants: bool,
    ) -> ApiResult<Vec<VolumeView>> {
        let volumes = self.factory.volume(ctx)?;
        let compute = self.factory.compute(ctx)?;
        volume::volume_list_with_servers(&volumes, &compute, all_tenants).await
    }
}
