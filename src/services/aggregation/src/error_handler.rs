//! Error dispatch for view callers
//!
//! A leaf failure is either handled (the view continues with a default value
//! and an optional user message) or escalated. Escalations are typed values
//! the web layer turns into a response with `respond`.

use horizon_shared::{ApiError, ApiResult, ErrorKind, RequestContext};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{error, info, warn};
use url::Url;

/// Header carrying the login location for AJAX callers
pub const REDIRECT_HEADER: &str = "X-Horizon-Location";

/// Base used to resolve relative login URLs
const LOCAL_BASE: &str = "http://localhost/";

/// How a caller wants recoverable failures treated
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandleOptions {
    /// Swallow the error without a user message
    pub ignore: bool,
    /// Redirect here instead of continuing
    pub redirect: Option<String>,
}

impl HandleOptions {
    pub fn ignore() -> Self {
        Self {
            ignore: true,
            redirect: None,
        }
    }

    pub fn redirect(location: impl Into<String>) -> Self {
        Self {
            ignore: false,
            redirect: Some(location.into()),
        }
    }
}

/// Outcome of a handled error; the view continues
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Handled {
    /// Message to surface, if any
    pub message: Option<String>,
    pub kind: ErrorKind,
}

/// Outcome the view cannot continue from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Escalation {
    /// Token rejected; the user must log in again
    Login,
    NotFound,
    Redirect { location: String },
    Fatal(ApiError),
}

/// HTTP response the web layer should emit for an escalation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorResponse {
    pub status: u16,
    pub location: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub message: Option<String>,
}

impl ErrorResponse {
    fn new(status: u16) -> Self {
        Self {
            status,
            location: None,
            headers: BTreeMap::new(),
            message: None,
        }
    }

    fn redirect(location: String) -> Self {
        let mut response = Self::new(302);
        response
            .headers
            .insert("Location".to_string(), location.clone());
        response.location = Some(location);
        response
    }
}

/// Classifies errors and decides whether the view may continue
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorHandler;

impl ErrorHandler {
    /// Create a new error handler
    pub fn new() -> Self {
        Self
    }

    /// Handle one error raised during a view
    pub fn handle(
        &self,
        ctx: &RequestContext,
        err: ApiError,
        options: &HandleOptions,
    ) -> Result<Handled, Escalation> {
        let kind = err.kind();
        match kind {
            ErrorKind::NotAuthorized => {
                info!(
                    path = %ctx.origin().full_path,
                    tenant_id = %ctx.tenant_id(),
                    error = %err,
                    "token rejected; escalating to login"
                );
                Err(Escalation::Login)
            }
            ErrorKind::NotFound => {
                if options.ignore {
                    return Ok(Handled {
                        message: None,
                        kind,
                    });
                }
                match &options.redirect {
                    Some(location) => Err(Escalation::Redirect {
                        location: location.clone(),
                    }),
                    None => Err(Escalation::NotFound),
                }
            }
            ErrorKind::Redirect => match err {
                ApiError::Redirect { location, .. } => Err(Escalation::Redirect { location }),
                other => Err(Escalation::Fatal(other)),
            },
            ErrorKind::Recoverable => {
                warn!(
                    path = %ctx.origin().full_path,
                    error = %err,
                    "recoverable backend failure"
                );
                if let Some(location) = &options.redirect {
                    return Err(Escalation::Redirect {
                        location: location.clone(),
                    });
                }
                let message = if options.ignore {
                    None
                } else {
                    Some(err.user_message().to_string())
                };
                Ok(Handled { message, kind })
            }
            ErrorKind::Fatal => {
                error!(path = %ctx.origin().full_path, error = %err, "fatal backend error");
                Err(Escalation::Fatal(err))
            }
        }
    }

    /// Run `handle` on a failed result, substituting the default value when
    /// the error is handled
    pub fn recover<T: Default>(
        &self,
        ctx: &RequestContext,
        result: ApiResult<T>,
        options: &HandleOptions,
    ) -> Result<(T, Option<Handled>), Escalation> {
        match result {
            Ok(value) => Ok((value, None)),
            Err(err) => self
                .handle(ctx, err, options)
                .map(|handled| (T::default(), Some(handled))),
        }
    }

    /// Response for an escalation
    pub fn respond(&self, ctx: &RequestContext, escalation: &Escalation) -> ErrorResponse {
        match escalation {
            Escalation::Login => {
                let location = login_location(&ctx.config().login_url, &ctx.origin().full_path);
                if ctx.origin().ajax {
                    let mut response = ErrorResponse::new(401);
                    response
                        .headers
                        .insert(REDIRECT_HEADER.to_string(), location);
                    response.message = Some(
                        ApiError::NotAuthorized {
                            reason: String::new(),
                        }
                        .user_message()
                        .to_string(),
                    );
                    response
                } else {
                    ErrorResponse::redirect(location)
                }
            }
            Escalation::NotFound => ErrorResponse::new(404),
            Escalation::Redirect { location } => ErrorResponse::redirect(location.clone()),
            Escalation::Fatal(err) => {
                let mut response = ErrorResponse::new(500);
                response.message = Some(err.user_message().to_string());
                response
            }
        }
    }
}

/// Login URL with `next` set to the originating path, unless the request
/// already targets the login page
fn login_location(login_url: &str, full_path: &str) -> String {
    let login_path = login_url.split('?').next().unwrap_or(login_url);
    let origin_path = full_path.split('?').next().unwrap_or(full_path);
    if origin_path == login_path {
        return login_url.to_string();
    }

    let absolute = Url::parse(login_url).is_ok();
    let parsed = match Url::parse(login_url)
        .or_else(|_| Url::parse(LOCAL_BASE).and_then(|base| base.join(login_url)))
    {
        Ok(url) => url,
        Err(_) => return login_url.to_string(),
    };

    let mut url = parsed;
    url.query_pairs_mut().append_pair("next", full_path);

    if absolute {
        url.to_string()
    } else {
        match url.query() {
            Some(query) => format!("{}?{}", url.path(), query),
            None => url.path().to_string(),
        }
    }
}
