//! Security Hooks
//!
//! Pluggable authentication and authorization invoked before dispatch. The
//! hooks answer a boolean; translation into HTTP outcomes happens here, at
//! the request boundary, and nowhere else: not authenticated maps to 401,
//! not authorized to 403, a hook failure to 500 with a generic message.
//! Unset hooks allow.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::HeaderMap;
use thiserror::Error;

use super::error::ApiError;

/// Request-scoped context handed to the security hooks
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Query parameters of the request (e.g. `token`)
    pub parameters: HashMap<String, String>,
    /// Request headers
    pub headers: HeaderMap,
    /// Peer address, when known
    pub remote_addr: Option<SocketAddr>,
    /// Identity claims established so far
    pub claims: Vec<String>,
}

impl RequestContext {
    pub fn new(
        parameters: HashMap<String, String>,
        headers: HeaderMap,
        remote_addr: Option<SocketAddr>,
    ) -> Self {
        Self {
            parameters,
            headers,
            remote_addr,
            claims: Vec::new(),
        }
    }

    /// Query parameter by key
    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(String::as_str)
    }
}

/// Failure inside a security hook. Never shown to clients; the boundary
/// reports a generic 500 and logs the detail.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct SecurityError(pub String);

/// Decides whether a request carries a valid identity
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn is_authenticated(&self, context: &RequestContext) -> Result<bool, SecurityError>;
}

/// Decides whether an authenticated identity may proceed
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn is_authorized(&self, context: &RequestContext) -> Result<bool, SecurityError>;
}

/// Run the authenticator, mapping its outcome to the request boundary:
/// no hook or `true` passes, `false` is 401, an error is 500.
pub async fn check_authentication(
    authenticator: Option<&Arc<dyn Authenticator>>,
    context: &RequestContext,
) -> Result<(), ApiError> {
    let Some(authenticator) = authenticator else {
        return Ok(());
    };

    match authenticator.is_authenticated(context).await {
        Ok(true) => Ok(()),
        Ok(false) => Err(ApiError::Unauthorized),
        Err(error) => Err(ApiError::Internal(error.to_string())),
    }
}

/// Run the authorizer, mapping its outcome to the request boundary:
/// no hook or `true` passes, `false` is 403, an error is 500.
pub async fn check_authorization(
    authorizer: Option<&Arc<dyn Authorizer>>,
    context: &RequestContext,
) -> Result<(), ApiError> {
    let Some(authorizer) = authorizer else {
        return Ok(());
    };

    match authorizer.is_authorized(context).await {
        Ok(true) => Ok(()),
        Ok(false) => Err(ApiError::Forbidden),
        Err(error) => Err(ApiError::Internal(error.to_string())),
    }
}
