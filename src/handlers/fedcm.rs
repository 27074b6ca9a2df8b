use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Extension, Form, Json,
};
use axum_extra::extract::cookie::CookieJar;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::handlers::require_webidentity;
use crate::middleware::context::RequestContext;
use crate::models::{AccountsResponse, FedCmAccount, ScopeList};
use crate::services::assertion::{
    AssertionIssuer, AssertionOutcome, AssertionRequest, FetchMetadata,
};
use crate::services::SessionManager;
use crate::AppState;

#[derive(Serialize)]
struct ClientMetadataResponse {
    privacy_policy_url: String,
    terms_of_service_url: String,
}

#[derive(Debug, Deserialize)]
pub struct TokenEndpointForm {
    pub client_id: String,
    #[serde(default)]
    pub nonce: Option<String>,
    pub account_id: String,
    #[serde(default)]
    pub disclosure_text_shown: bool,
    #[serde(default)]
    pub scope: Option<String>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum TokenEndpointResponse {
    Token { token: String },
    Continue { continue_on: String },
    Empty {},
}

#[derive(Debug, Deserialize)]
pub struct RevocationForm {
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub account_hint: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AuthorizeForm {
    pub client_id: String,
    pub scope: String,
    #[serde(default)]
    pub nonce: Option<String>,
}

/// GET /fedcm/client_metadata_endpoint
pub async fn client_metadata(
    Extension(ctx): Extension<RequestContext>,
) -> Result<Json<impl Serialize>> {
    if ctx.tenant.is_none() {
        return Err(AppError::BadRequest("Unsupported hostname".to_string()));
    }
    Ok(Json(ClientMetadataResponse {
        privacy_policy_url: format!("https://{}/privacy_policy.html", ctx.hostname),
        terms_of_service_url: format!("https://{}/terms_of_service.html", ctx.hostname),
    }))
}

/// GET /fedcm/accounts_endpoint
pub async fn accounts(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<Response> {
    ctx.require_tenant()?;
    require_webidentity(&headers)?;

    let (session, jar) = SessionManager::acquire(&state.db, &state.config, jar).await?;

    let accounts = match session.logged_in_user() {
        Some(user) => vec![FedCmAccount::from(user)],
        None => Vec::new(),
    };
    Ok((jar, Json(AccountsResponse { accounts })).into_response())
}

/// POST /fedcm/token_endpoint — the FedCM id_assertion_endpoint
pub async fn token(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    headers: HeaderMap,
    jar: CookieJar,
    Form(form): Form<TokenEndpointForm>,
) -> Result<Response> {
    ctx.require_tenant()?;

    let (mut session, jar) = SessionManager::acquire(&state.db, &state.config, jar).await?;

    let fetch = FetchMetadata {
        sec_fetch_dest: headers.get("sec-fetch-dest").and_then(|h| h.to_str().ok()),
        origin: headers.get(header::ORIGIN).and_then(|h| h.to_str().ok()),
    };
    let request = AssertionRequest {
        client_id: form.client_id,
        nonce: form.nonce,
        account_id: form.account_id,
        disclosure_text_shown: form.disclosure_text_shown,
        scope: form.scope.as_deref().map(ScopeList::parse),
    };

    let outcome =
        AssertionIssuer::issue(&state.db, &state.config, &mut session, &ctx, fetch, request).await;
    SessionManager::persist(&state.db, &session).await?;

    let body = match outcome? {
        AssertionOutcome::Empty => TokenEndpointResponse::Empty {},
        AssertionOutcome::Token(token) => TokenEndpointResponse::Token { token },
        AssertionOutcome::ContinueOn(continue_on) => {
            TokenEndpointResponse::Continue { continue_on }
        }
    };
    Ok((jar, Json(body)).into_response())
}

/// POST /fedcm/revocation_endpoint — acknowledged, nothing revoked
pub async fn revocation(Form(form): Form<RevocationForm>) -> StatusCode {
    AssertionIssuer::revoke(form.client_id.as_deref(), form.account_hint.as_deref());
    StatusCode::NO_CONTENT
}

/// POST /fedcm/authorize_endpoint — extended-scope grant after user approval
pub async fn authorize(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    jar: CookieJar,
    Form(form): Form<AuthorizeForm>,
) -> Result<Response> {
    ctx.require_tenant()?;

    let (mut session, jar) = SessionManager::acquire(&state.db, &state.config, jar).await?;

    let scope = ScopeList::parse(&form.scope);
    let grant = AssertionIssuer::authorize(
        &state.db,
        &state.config,
        &mut session,
        &form.client_id,
        form.nonce,
        &scope,
    )
    .await;
    SessionManager::persist(&state.db, &session).await?;

    Ok((jar, Json(grant?)).into_response())
}
