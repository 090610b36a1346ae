//! Shared type definitions
//!
//! `context` models what the web layer hands to the core for one request;
//! `error` is the taxonomy every backend failure is classified into.

pub mod context;
pub mod error;

pub use context::{
    CatalogEndpoint, RequestContext, RequestContextBuilder, RequestOrigin, ServiceCatalog,
    ServiceType, TlsPolicy, Token,
};

pub use error::{ApiError, ApiResult, ErrorKind};
