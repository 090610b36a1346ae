//! Per-request context handed to the aggregation layer
//!
//! A `RequestContext` is created by the web layer for one inbound request and
//! dropped when that request ends. It is immutable; clones share the catalog
//! and settings by `Arc`.

use crate::config::{ConfigGate, EndpointInterface};
use crate::types::error::{ApiError, ApiResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

// ============================================================================
// IDENTITY
// ============================================================================

/// Identity token issued at login
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    id: String,
    expires: Option<DateTime<Utc>>,
}

impl Token {
    pub fn new(id: impl Into<String>, expires: Option<DateTime<Utc>>) -> Self {
        Self {
            id: id.into(),
            expires,
        }
    }

    /// Raw token id. Only clients may read this; never log it.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn expires(&self) -> Option<DateTime<Utc>> {
        self.expires
    }

    /// Whether the token expired before `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires.map(|e| e <= now).unwrap_or(false)
    }

    /// Loggable form: the first four characters followed by a mask
    pub fn masked(&self) -> String {
        let prefix: String = self.id.chars().take(4).collect();
        format!("{}***", prefix)
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("id", &self.masked())
            .field("expires", &self.expires)
            .finish()
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.masked())
    }
}

// ============================================================================
// SERVICE CATALOG
// ============================================================================

/// Backend services the dashboard federates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceType {
    Identity,
    Compute,
    Image,
    Volume,
    ObjectStore,
    Network,
    Orchestration,
    Metering,
}

impl ServiceType {
    /// Catalog type name
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::Identity => "identity",
            ServiceType::Compute => "compute",
            ServiceType::Image => "image",
            ServiceType::Volume => "volume",
            ServiceType::ObjectStore => "object-store",
            ServiceType::Network => "network",
            ServiceType::Orchestration => "orchestration",
            ServiceType::Metering => "metering",
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ServiceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "identity" => Ok(ServiceType::Identity),
            "compute" => Ok(ServiceType::Compute),
            "image" => Ok(ServiceType::Image),
            "volume" => Ok(ServiceType::Volume),
            "object-store" => Ok(ServiceType::ObjectStore),
            // load balancer, VPN and firewall are served by the network endpoint
            "network" | "loadbalancer" | "vpn" | "firewall" => Ok(ServiceType::Network),
            "orchestration" => Ok(ServiceType::Orchestration),
            "metering" => Ok(ServiceType::Metering),
            _ => Err(format!("Unknown service type: {}", s)),
        }
    }
}

/// One endpoint record of a catalog entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEndpoint {
    /// Region the endpoint belongs to
    #[serde(default)]
    pub region: Option<String>,
    /// Public URL
    #[serde(rename = "publicURL")]
    pub public_url: String,
    /// Admin URL
    #[serde(rename = "adminURL", default)]
    pub admin_url: Option<String>,
    /// Internal URL
    #[serde(rename = "internalURL", default)]
    pub internal_url: Option<String>,
}

impl CatalogEndpoint {
    pub fn public(url: impl Into<String>) -> Self {
        Self {
            region: None,
            public_url: url.into(),
            admin_url: None,
            internal_url: None,
        }
    }

    /// URL for an interface, falling back to the public URL
    pub fn url(&self, interface: EndpointInterface) -> &str {
        let candidate = match interface {
            EndpointInterface::Public => None,
            EndpointInterface::Admin => self.admin_url.as_deref(),
            EndpointInterface::Internal => self.internal_url.as_deref(),
        };
        candidate.unwrap_or(&self.public_url)
    }
}

/// Service type to endpoint directory returned by identity at login
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceCatalog {
    services: HashMap<String, Vec<CatalogEndpoint>>,
}

impl ServiceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an endpoint for a service type
    pub fn with_endpoint(mut self, service: ServiceType, endpoint: CatalogEndpoint) -> Self {
        self.services
            .entry(service.as_str().to_string())
            .or_default()
            .push(endpoint);
        self
    }

    /// Whether the catalog publishes a service type
    pub fn has_service(&self, service: ServiceType) -> bool {
        self.services
            .get(service.as_str())
            .map(|eps| !eps.is_empty())
            .unwrap_or(false)
    }

    /// Resolve a URL for a service, optionally restricted to a region
    pub fn url_for(
        &self,
        service: ServiceType,
        interface: EndpointInterface,
        region: Option<&str>,
    ) -> Option<&str> {
        let endpoints = self.services.get(service.as_str())?;
        let endpoint = match region {
            Some(region) => endpoints
                .iter()
                .find(|e| e.region.as_deref() == Some(region)),
            None => endpoints.first(),
        }?;
        Some(endpoint.url(interface))
    }
}

// ============================================================================
// TRANSPORT POLICY AND ORIGIN
// ============================================================================

/// TLS behaviour every client must apply
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TlsPolicy {
    /// Skip certificate verification
    pub insecure: bool,
    /// CA bundle to trust in addition to the system roots
    pub ca_file: Option<PathBuf>,
}

/// Where the inbound request came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestOrigin {
    /// Full path including query string
    pub full_path: String,
    /// Whether the caller is an XMLHttpRequest
    pub ajax: bool,
}

impl Default for RequestOrigin {
    fn default() -> Self {
        Self {
            full_path: "/".to_string(),
            ajax: false,
        }
    }
}

// ============================================================================
// REQUEST CONTEXT
// ============================================================================

/// Immutable per-request context
#[derive(Debug, Clone)]
pub struct RequestContext {
    token: Token,
    tenant_id: String,
    user_id: String,
    username: String,
    catalog: Arc<ServiceCatalog>,
    config: Arc<ConfigGate>,
    tls_policy: TlsPolicy,
    superuser: bool,
    origin: RequestOrigin,
    deadline: Option<Instant>,
    cancellation: CancellationToken,
}

impl RequestContext {
    /// Start building a context
    pub fn builder(
        token: Token,
        tenant_id: impl Into<String>,
        catalog: Arc<ServiceCatalog>,
        config: Arc<ConfigGate>,
    ) -> RequestContextBuilder {
        RequestContextBuilder {
            token,
            tenant_id: tenant_id.into(),
            user_id: String::new(),
            username: String::new(),
            catalog,
            config,
            superuser: false,
            origin: RequestOrigin::default(),
            deadline: None,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn token(&self) -> &Token {
        &self.token
    }

    pub fn token_id(&self) -> &str {
        self.token.id()
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn catalog(&self) -> &ServiceCatalog {
        &self.catalog
    }

    pub fn config(&self) -> &ConfigGate {
        &self.config
    }

    pub fn tls_policy(&self) -> &TlsPolicy {
        &self.tls_policy
    }

    pub fn is_superuser(&self) -> bool {
        self.superuser
    }

    pub fn origin(&self) -> &RequestOrigin {
        &self.origin
    }

    /// Endpoint for a service on the configured interface
    pub fn endpoint_for(&self, service: ServiceType) -> ApiResult<String> {
        self.endpoint_for_interface(service, self.config.endpoint_type)
    }

    /// Endpoint for a service on an explicit interface.
    ///
    /// Overrides from the settings win over the catalog.
    pub fn endpoint_for_interface(
        &self,
        service: ServiceType,
        interface: EndpointInterface,
    ) -> ApiResult<String> {
        if let Some(url) = self.config.endpoint_overrides.get(service.as_str()) {
            return Ok(url.clone());
        }

        self.catalog
            .url_for(service, interface, self.config.region.as_deref())
            .map(|url| url.to_string())
            .ok_or_else(|| ApiError::EndpointNotFound {
                service: service.to_string(),
            })
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, if one is set
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn is_past_deadline(&self) -> bool {
        self.remaining().map(|r| r.is_zero()).unwrap_or(false)
    }

    /// Token observed by every outstanding call of this request
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Cancel every outstanding call of this request
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }
}

/// Builder for `RequestContext`
#[derive(Debug)]
pub struct RequestContextBuilder {
    token: Token,
    tenant_id: String,
    user_id: String,
    username: String,
    catalog: Arc<ServiceCatalog>,
    config: Arc<ConfigGate>,
    superuser: bool,
    origin: RequestOrigin,
    deadline: Option<Instant>,
    cancellation: CancellationToken,
}

impl RequestContextBuilder {
    pub fn user(mut self, user_id: impl Into<String>, username: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self.username = username.into();
        self
    }

    pub fn superuser(mut self, superuser: bool) -> Self {
        self.superuser = superuser;
        self
    }

    pub fn origin(mut self, full_path: impl Into<String>, ajax: bool) -> Self {
        self.origin = RequestOrigin {
            full_path: full_path.into(),
            ajax,
        };
        self
    }

    pub fn deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Deadline relative to now
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn build(self) -> RequestContext {
        let tls_policy = self.config.tls_policy();
        RequestContext {
            token: self.token,
            tenant_id: self.tenant_id,
            user_id: self.user_id,
            username: self.username,
            catalog: self.catalog,
            config: self.config,
            tls_policy,
            superuser: self.superuser,
            origin: self.origin,
            deadline: self.deadline,
            cancellation: self.cancellation,
        }
    }
}
