use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};

use crate::config::TenantConfig;
use crate::error::{AppError, Result};
use crate::AppState;

/// Request-derived values every handler needs: the tenant hostname (realm),
/// the externally visible base URL, and the tenant metadata when the
/// hostname is one we serve.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub hostname: String,
    pub base_url: String,
    pub tenant: Option<TenantConfig>,
}

impl RequestContext {
    /// Account-bearing routes only work on configured tenants
    pub fn require_tenant(&self) -> Result<&TenantConfig> {
        self.tenant
            .as_ref()
            .ok_or_else(|| AppError::NotFound("Unknown hostname".to_string()))
    }
}

/// Resolves {hostname, base_url, tenant} from the Host and X-Forwarded-Proto
/// headers and attaches it to the request. Unknown hostnames pass through so
/// the discovery endpoints can answer them per protocol.
pub async fn request_context(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let headers = request.headers();

    let host = headers
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("localhost")
        .to_string();
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|h| h.to_str().ok())
        .unwrap_or("http")
        .to_string();

    let hostname = host.split(':').next().unwrap_or(&host).to_string();
    let tenant = state.config.tenants.get(&hostname).cloned();
    if tenant.is_none() {
        tracing::debug!("No tenant configured for hostname {}", hostname);
    }

    let ctx = RequestContext {
        hostname,
        base_url: format!("{}://{}", scheme, host),
        tenant,
    };
    request.extensions_mut().insert(ctx);

    next.run(request).await
}
