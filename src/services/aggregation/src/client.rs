//! Per-request service client factory
//!
//! A `ServiceClient` is a cheap handle bound to one request: the endpoint
//! resolved from the catalog, the caller's token and the TLS policy. The
//! underlying `reqwest::Client` (connection pool) is shared between requests
//! with the same transport settings; nothing request-specific lives in it.

use crate::compute::ComputeClient;
use crate::identity::IdentityClient;
use crate::image::ImageClient;
use crate::metering::MeteringClient;
use crate::network::NetworkClient;
use crate::volume::VolumeClient;
use dashmap::DashMap;
use horizon_shared::{
    ApiError, ApiResult, ConfigGate, EndpointInterface, RequestContext, ServiceType, TlsPolicy,
};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

/// Transport settings a pooled HTTP client is keyed by
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct TransportKey {
    tls: TlsPolicy,
    timeout: Duration,
}

/// Builds typed clients bound to a request context
#[derive(Debug, Clone, Default)]
pub struct ClientFactory {
    /// Connection pools by transport settings
    pools: Arc<DashMap<TransportKey, reqwest::Client>>,
    /// PEM contents of the CA bundles loaded so far
    ca_bundles: Arc<DashMap<PathBuf, Arc<Vec<u8>>>>,
}

impl ClientFactory {
    /// Create a new client factory
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory with the configured CA bundle already loaded
    pub async fn from_config(config: &ConfigGate) -> ApiResult<Self> {
        let factory = Self::new();
        if let Some(ca_file) = &config.ssl_cacert {
            factory.load_ca_bundle(ca_file).await?;
        }
        Ok(factory)
    }

    /// Read a CA bundle once so clients trusting it can be built without
    /// touching the filesystem
    pub async fn load_ca_bundle(&self, path: &Path) -> ApiResult<()> {
        let pem = tokio::fs::read(path)
            .await
            .map_err(|e| ApiError::Configuration {
                message: format!("Failed to read CA bundle {}: {}", path.display(), e),
            })?;
        debug!(path = %path.display(), bytes = pem.len(), "CA bundle loaded");
        self.ca_bundles.insert(path.to_path_buf(), Arc::new(pem));
        Ok(())
    }

    /// Client for a service on the configured interface
    pub fn client_for(&self, ctx: &RequestContext, service: ServiceType) -> ApiResult<ServiceClient> {
        let endpoint = ctx.endpoint_for(service)?;
        self.bind(ctx, service, endpoint)
    }

    /// Client for a service on an explicit interface
    pub fn client_for_interface(
        &self,
        ctx: &RequestContext,
        service: ServiceType,
        interface: EndpointInterface,
    ) -> ApiResult<ServiceClient> {
        let endpoint = ctx.endpoint_for_interface(service, interface)?;
        self.bind(ctx, service, endpoint)
    }

    pub fn compute(&self, ctx: &RequestContext) -> ApiResult<ComputeClient> {
        Ok(ComputeClient::new(self.client_for(ctx, ServiceType::Compute)?))
    }

    pub fn network(&self, ctx: &RequestContext) -> ApiResult<NetworkClient> {
        Ok(NetworkClient::new(self.client_for(ctx, ServiceType::Network)?))
    }

    pub fn image(&self, ctx: &RequestContext) -> ApiResult<ImageClient> {
        Ok(ImageClient::new(self.client_for(ctx, ServiceType::Image)?))
    }

    pub fn volume(&self, ctx: &RequestContext) -> ApiResult<VolumeClient> {
        Ok(VolumeClient::new(self.client_for(ctx, ServiceType::Volume)?))
    }

    /// Identity client on the admin interface, as user and tenant lookups
    /// require
    pub fn identity(&self, ctx: &RequestContext) -> ApiResult<IdentityClient> {
        Ok(IdentityClient::new(self.client_for_interface(
            ctx,
            ServiceType::Identity,
            EndpointInterface::Admin,
        )?))
    }

    pub fn metering(&self, ctx: &RequestContext) -> ApiResult<MeteringClient> {
        Ok(MeteringClient::new(self.client_for(ctx, ServiceType::Metering)?))
    }

    fn bind(
        &self,
        ctx: &RequestContext,
        service: ServiceType,
        endpoint: String,
    ) -> ApiResult<ServiceClient> {
        let base = parse_endpoint(service, &endpoint)?;
        let http = self.pool(ctx.tls_policy(), ctx.config().request_timeout())?;

        debug!(
            service = %service,
            endpoint = %base,
            token = %ctx.token(),
            tenant_id = %ctx.tenant_id(),
            "service client created"
        );

        Ok(ServiceClient {
            service,
            base,
            token: ctx.token_id().to_string(),
            tenant_id: ctx.tenant_id().to_string(),
            http,
            deadline: ctx.deadline(),
            cancellation: ctx.cancellation().clone(),
        })
    }

    fn pool(&self, tls: &TlsPolicy, timeout: Duration) -> ApiResult<reqwest::Client> {
        let key = TransportKey {
            tls: tls.clone(),
            timeout,
        };
        if let Some(client) = self.pools.get(&key) {
            return Ok(client.clone());
        }

        let client = self.build_http_client(tls, timeout)?;
        self.pools.insert(key, client.clone());
        Ok(client)
    }

    fn build_http_client(&self, tls: &TlsPolicy, timeout: Duration) -> ApiResult<reqwest::Client> {
        let mut builder = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(tls.insecure);

        if let Some(ca_file) = &tls.ca_file {
            let pem = self
                .ca_bundles
                .get(ca_file)
                .map(|entry| Arc::clone(entry.value()))
                .ok_or_else(|| ApiError::Configuration {
                    message: format!("CA bundle {} was not loaded", ca_file.display()),
                })?;
            let certificate =
                reqwest::Certificate::from_pem(&pem).map_err(|e| ApiError::Configuration {
                    message: format!("Invalid CA bundle {}: {}", ca_file.display(), e),
                })?;
            builder = builder.add_root_certificate(certificate);
        }

        builder.build().map_err(|e| ApiError::Configuration {
            message: format!("Failed to create HTTP client: {}", e),
        })
    }
}

fn parse_endpoint(service: ServiceType, endpoint: &str) -> ApiResult<Url> {
    // relative paths join below the endpoint path, so it must end in '/'
    let normalized = if endpoint.ends_with('/') {
        endpoint.to_string()
    } else {
        format!("{}/", endpoint)
    };
    Url::parse(&normalized).map_err(|e| ApiError::Configuration {
        message: format!("Invalid {} endpoint '{}': {}", service, endpoint, e),
    })
}

/// HTTP+JSON handle bound to one service, token and request
#[derive(Debug, Clone)]
pub struct ServiceClient {
    service: ServiceType,
    base: Url,
    token: String,
    tenant_id: String,
    http: reqwest::Client,
    deadline: Option<Instant>,
    cancellation: CancellationToken,
}

impl ServiceClient {
    pub fn service(&self) -> ServiceType {
        self.service
    }

    pub fn endpoint(&self) -> &Url {
        &self.base
    }

    /// Tenant the bound token is scoped to
    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    /// Resolve a path: relative paths extend the endpoint path, absolute
    /// paths replace it
    pub fn url(&self, path: &str) -> ApiResult<Url> {
        self.base.join(path).map_err(|e| ApiError::BadRequest {
            service: self.service.to_string(),
            message: format!("invalid path '{}': {}", path, e),
        })
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(String, String)],
    ) -> ApiResult<T> {
        let request = self.request(Method::GET, path)?.query(query);
        self.guarded(async {
            let response = self.send(request, path).await?;
            self.decode(response).await
        })
        .await
    }

    pub async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> ApiResult<T> {
        let request = self.request(Method::POST, path)?.json(body);
        self.guarded(async {
            let response = self.send(request, path).await?;
            self.decode(response).await
        })
        .await
    }

    pub async fn put_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> ApiResult<T> {
        let request = self.request(Method::PUT, path)?.json(body);
        self.guarded(async {
            let response = self.send(request, path).await?;
            self.decode(response).await
        })
        .await
    }

    /// POST whose response body is ignored (server actions answer 202)
    pub async fn post_action<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> ApiResult<()> {
        let request = self.request(Method::POST, path)?.json(body);
        self.guarded(async { self.send(request, path).await.map(|_| ()) })
            .await
    }

    pub async fn delete(&self, path: &str) -> ApiResult<()> {
        let request = self.request(Method::DELETE, path)?;
        self.guarded(async { self.send(request, path).await.map(|_| ()) })
            .await
    }

    fn request(&self, method: Method, path: &str) -> ApiResult<RequestBuilder> {
        let url = self.url(path)?;
        Ok(self
            .http
            .request(method, url)
            .header("X-Auth-Token", &self.token)
            .bearer_auth(&self.token)
            .header(reqwest::header::ACCEPT, "application/json"))
    }

    async fn send(&self, request: RequestBuilder, path: &str) -> ApiResult<Response> {
        let response = request.send().await.map_err(|e| self.transport_error(e))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(self.status_error(status, path, &body))
    }

    async fn decode<T: DeserializeOwned>(&self, response: Response) -> ApiResult<T> {
        let bytes = response.bytes().await.map_err(|e| self.transport_error(e))?;
        serde_json::from_slice(&bytes).map_err(|e| ApiError::BackendUnavailable {
            service: self.service.to_string(),
            status: None,
            message: format!("invalid response body: {}", e),
        })
    }

    /// Run a call under the request deadline and cancellation token
    async fn guarded<T, F>(&self, call: F) -> ApiResult<T>
    where
        F: Future<Output = ApiResult<T>>,
    {
        if self.cancellation.is_cancelled() {
            return Err(ApiError::cancelled("request cancelled"));
        }

        let deadline = self.deadline;
        let service = self.service;
        let timed = async move {
            match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline.into(), call)
                    .await
                    .unwrap_or_else(|_| {
                        Err(ApiError::cancelled(format!(
                            "deadline exceeded calling {}",
                            service
                        )))
                    }),
                None => call.await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => Err(ApiError::cancelled("request cancelled")),
            result = timed => result,
        }
    }

    fn transport_error(&self, error: reqwest::Error) -> ApiError {
        if error.is_timeout() {
            return ApiError::cancelled(format!("{} request timed out", self.service));
        }
        ApiError::BackendUnavailable {
            service: self.service.to_string(),
            status: error.status().map(|s| s.as_u16()),
            message: error.to_string(),
        }
    }

    fn status_error(&self, status: StatusCode, path: &str, body: &str) -> ApiError {
        let service = self.service.to_string();
        let message = backend_message(body).unwrap_or_else(|| status.to_string());
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ApiError::NotAuthorized {
                reason: format!("{} rejected the token: {}", service, message),
            },
            StatusCode::NOT_FOUND => ApiError::NotFound {
                service,
                resource: path.to_string(),
            },
            StatusCode::CONFLICT => ApiError::Conflict { service, message },
            StatusCode::BAD_REQUEST => ApiError::BadRequest { service, message },
            _ => ApiError::BackendUnavailable {
                service,
                status: Some(status.as_u16()),
                message,
            },
        }
    }
}

/// Best-effort extraction of the message services put in error bodies,
/// e.g. `{"itemNotFound": {"message": "..."}}` or `{"NeutronError": "..."}`
fn backend_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    let object = value.as_object()?;
    object.values().find_map(|inner| match inner {
        Value::String(s) => Some(s.clone()),
        Value::Object(fields) => fields
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    })
}
