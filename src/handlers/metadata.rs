use axum::{http::HeaderMap, response::IntoResponse, Extension, Json};
use serde::Serialize;

use crate::config::IconConfig;
use crate::error::{AppError, Result};
use crate::handlers::require_webidentity;
use crate::middleware::context::RequestContext;

#[derive(Serialize)]
struct WellKnownResponse {
    provider_urls: Vec<String>,
}

#[derive(Serialize)]
struct ConfigDocument {
    accounts_endpoint: String,
    client_metadata_endpoint: String,
    id_assertion_endpoint: String,
    revocation_endpoint: String,
    login_url: String,
    branding: BrandingDocument,
}

#[derive(Serialize)]
struct BrandingDocument {
    background_color: String,
    color: String,
    icons: Vec<IconConfig>,
}

/// GET /.well-known/web-identity
pub async fn well_known(Extension(ctx): Extension<RequestContext>) -> impl IntoResponse {
    if ctx.tenant.is_some() {
        Json(WellKnownResponse {
            provider_urls: vec![format!("{}/fedcm.json", ctx.base_url)],
        })
        .into_response()
    } else {
        "hello from other domains".into_response()
    }
}

/// GET /fedcm.json — the FedCM provider configuration document
pub async fn config_document(
    Extension(ctx): Extension<RequestContext>,
    headers: HeaderMap,
) -> Result<Json<impl Serialize>> {
    require_webidentity(&headers)?;
    let tenant = ctx
        .tenant
        .as_ref()
        .ok_or_else(|| AppError::NotFound("Configuration not found".to_string()))?;

    let branding = &tenant.branding;
    let icons = branding
        .icons
        .iter()
        .map(|icon| IconConfig {
            url: icon.url.replace("{base_url}", &ctx.base_url),
            size: icon.size,
        })
        .collect();

    Ok(Json(ConfigDocument {
        accounts_endpoint: format!("{}/fedcm/accounts_endpoint", ctx.base_url),
        client_metadata_endpoint: format!("{}/fedcm/client_metadata_endpoint", ctx.base_url),
        id_assertion_endpoint: format!("{}/fedcm/token_endpoint", ctx.base_url),
        revocation_endpoint: format!("{}/fedcm/revocation_endpoint", ctx.base_url),
        login_url: format!("{}/", ctx.base_url),
        branding: BrandingDocument {
            background_color: branding.background_color.clone(),
            color: branding.color.clone(),
            icons,
        },
    }))
}
