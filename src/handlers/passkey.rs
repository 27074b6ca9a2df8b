use axum::{
    extract::State,
    http::StatusCode,
    response::{AppendHeaders, IntoResponse, Response},
    Extension, Json,
};
use axum_extra::extract::cookie::CookieJar;
use serde::{Deserialize, Serialize};
use webauthn_rs::prelude::{PublicKeyCredential, RegisterPublicKeyCredential};

use crate::error::{AppError, Result};
use crate::handlers::{LOGIN_STATUS_LOGGED_IN, SET_LOGIN_HEADER};
use crate::middleware::context::RequestContext;
use crate::services::{CeremonyEngine, SessionManager};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct RegistrationOptionsRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AuthenticationOptionsRequest {
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Serialize)]
struct VerifiedResponse {
    verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// POST /api/auth/generate-registration-options
pub async fn generate_registration_options(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    jar: CookieJar,
    Json(req): Json<RegistrationOptionsRequest>,
) -> Result<Response> {
    ctx.require_tenant()?;
    let (mut session, jar) = SessionManager::acquire(&state.db, &state.config, jar).await?;

    let options = CeremonyEngine::start_registration(
        &state.db,
        &mut session,
        &ctx,
        req.email.as_deref().unwrap_or_default(),
        req.name.as_deref().unwrap_or_default(),
    )
    .await?;

    SessionManager::persist(&state.db, &session).await?;
    Ok((jar, Json(options)).into_response())
}

/// POST /api/auth/verify-registration
pub async fn verify_registration(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    jar: CookieJar,
    Json(credential): Json<RegisterPublicKeyCredential>,
) -> Result<Response> {
    ctx.require_tenant()?;
    let (mut session, jar) = SessionManager::acquire(&state.db, &state.config, jar).await?;

    let outcome =
        CeremonyEngine::finish_registration(&state.db, &state.config, &mut session, &ctx, credential)
            .await;
    // The ceremony state was consumed either way; keep the row in step
    SessionManager::persist(&state.db, &session).await?;

    match outcome {
        Ok(_) => Ok((
            jar,
            AppendHeaders([(SET_LOGIN_HEADER, LOGIN_STATUS_LOGGED_IN)]),
            Json(VerifiedResponse {
                verified: true,
                error: None,
            }),
        )
            .into_response()),
        Err(AppError::VerificationFailed(message)) => Ok((
            StatusCode::BAD_REQUEST,
            jar,
            Json(VerifiedResponse {
                verified: false,
                error: Some(message),
            }),
        )
            .into_response()),
        Err(e) => Err(e),
    }
}

/// POST /api/auth/generate-authentication-options
pub async fn generate_authentication_options(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    jar: CookieJar,
    Json(req): Json<AuthenticationOptionsRequest>,
) -> Result<Response> {
    ctx.require_tenant()?;
    let (mut session, jar) = SessionManager::acquire(&state.db, &state.config, jar).await?;

    let options =
        CeremonyEngine::start_authentication(&state.db, &mut session, &ctx, req.email).await?;

    SessionManager::persist(&state.db, &session).await?;
    Ok((jar, Json(options)).into_response())
}

/// POST /api/auth/verify-authentication
pub async fn verify_authentication(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    jar: CookieJar,
    Json(credential): Json<PublicKeyCredential>,
) -> Result<Response> {
    ctx.require_tenant()?;
    let (mut session, jar) = SessionManager::acquire(&state.db, &state.config, jar).await?;

    let outcome = CeremonyEngine::finish_authentication(
        &state.db,
        &state.config,
        &mut session,
        &ctx,
        credential,
    )
    .await;
    SessionManager::persist(&state.db, &session).await?;

    match outcome {
        Ok(_) => Ok((
            jar,
            AppendHeaders([(SET_LOGIN_HEADER, LOGIN_STATUS_LOGGED_IN)]),
            Json(VerifiedResponse {
                verified: true,
                error: None,
            }),
        )
            .into_response()),
        Err(AppError::VerificationFailed(message)) => Ok((
            StatusCode::BAD_REQUEST,
            jar,
            Json(VerifiedResponse {
                verified: false,
                error: Some(message),
            }),
        )
            .into_response()),
        Err(e) => Err(e),
    }
}
