use axum::{
    extract::State,
    response::{AppendHeaders, IntoResponse, Redirect, Response},
    Extension, Form, Json,
};
use axum_extra::extract::cookie::CookieJar;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::handlers::{LOGIN_STATUS_LOGGED_IN, LOGIN_STATUS_LOGGED_OUT, SET_LOGIN_HEADER};
use crate::middleware::context::RequestContext;
use crate::services::{AccountService, SessionManager};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub secret: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SigninRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub secret: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RemoveClientRequest {
    pub client_id: String,
}

#[derive(Serialize)]
struct MessageResponse {
    message: String,
}

/// POST /api/auth/signup
pub async fn signup(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    jar: CookieJar,
    Json(req): Json<SignupRequest>,
) -> Result<Response> {
    ctx.require_tenant()?;
    let (mut session, jar) = SessionManager::acquire(&state.db, &state.config, jar).await?;

    let snapshot = AccountService::signup(
        &state.db,
        &ctx,
        req.email.as_deref().unwrap_or_default(),
        req.name.as_deref().unwrap_or_default(),
        req.secret.as_deref().unwrap_or_default(),
    )
    .await?;

    session.set_logged_in(snapshot, state.config.login_ttl());
    SessionManager::persist(&state.db, &session).await?;

    Ok((
        jar,
        AppendHeaders([(SET_LOGIN_HEADER, LOGIN_STATUS_LOGGED_IN)]),
        Redirect::to("/"),
    )
        .into_response())
}

/// POST /api/auth/signin
pub async fn signin(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    jar: CookieJar,
    Json(req): Json<SigninRequest>,
) -> Result<Response> {
    ctx.require_tenant()?;
    let (mut session, jar) = SessionManager::acquire(&state.db, &state.config, jar).await?;

    let snapshot = AccountService::signin(
        &state.db,
        &ctx,
        req.email.as_deref().unwrap_or_default(),
        req.secret.as_deref().unwrap_or_default(),
    )
    .await?;

    session.set_logged_in(snapshot, state.config.login_ttl());
    SessionManager::persist(&state.db, &session).await?;

    Ok((
        jar,
        AppendHeaders([(SET_LOGIN_HEADER, LOGIN_STATUS_LOGGED_IN)]),
        Redirect::to("/"),
    )
        .into_response())
}

/// POST /api/auth/signout
pub async fn signout(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<Response> {
    let (session, jar) = SessionManager::acquire(&state.db, &state.config, jar).await?;
    let jar = SessionManager::destroy(&state.db, &state.config, session, jar).await?;

    Ok((
        jar,
        AppendHeaders([(SET_LOGIN_HEADER, LOGIN_STATUS_LOGGED_OUT)]),
        Redirect::to("/"),
    )
        .into_response())
}

/// POST /api/auth/remove_client — withdraw consent for a relying party
pub async fn remove_client(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    jar: CookieJar,
    Form(req): Form<RemoveClientRequest>,
) -> Result<Response> {
    ctx.require_tenant()?;
    let (mut session, jar) = SessionManager::acquire(&state.db, &state.config, jar).await?;

    let account_id = session
        .logged_in_user()
        .map(|u| u.account_id.clone())
        .ok_or_else(|| AppError::Unauthorized("Not signed in".to_string()))?;

    let clients =
        AccountService::remove_approved_client(&state.db, &account_id, &req.client_id).await?;
    if let Some(login) = session.login.as_mut() {
        login.user.approved_clients = clients;
    }
    SessionManager::persist(&state.db, &session).await?;

    Ok((jar, Redirect::to("/")).into_response())
}

/// POST /api/auth/expire-session-outofband — expire the login without
/// signalling the browser (no Set-Login header)
pub async fn expire_session_outofband(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<Response> {
    let (mut session, jar) = SessionManager::acquire(&state.db, &state.config, jar).await?;

    if session.logged_in_user().is_none() {
        return Err(AppError::BadRequest("No current session".to_string()));
    }

    session.expire_login_now();
    SessionManager::persist(&state.db, &session).await?;

    Ok((
        jar,
        Json(MessageResponse {
            message: "Session expired successfully".to_string(),
        }),
    )
        .into_response())
}

/// POST /api/auth/delete-user — delete the logged-in account and its devices
pub async fn delete_user(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<Response> {
    let (session, jar) = SessionManager::acquire(&state.db, &state.config, jar).await?;

    let account_id = session
        .logged_in_user()
        .map(|u| u.account_id.clone())
        .ok_or_else(|| AppError::Unauthorized("Not signed in".to_string()))?;

    AccountService::delete_account(&state.db, &account_id).await?;
    let jar = SessionManager::destroy(&state.db, &state.config, session, jar).await?;

    Ok((
        jar,
        AppendHeaders([(SET_LOGIN_HEADER, LOGIN_STATUS_LOGGED_OUT)]),
        Redirect::to("/"),
    )
        .into_response())
}
