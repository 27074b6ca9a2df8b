use chrono::{Duration, Utc};
use url::Url;
use uuid::Uuid;

use crate::config::Config;
use crate::db::Database;
use crate::error::{AppError, Result};
use crate::middleware::context::RequestContext;
use crate::models::{
    AccessTokenClaims, AssertionClaims, CeremonySession, IdTokenClaims, IdentityToken, ScopeList,
    SessionUser,
};
use crate::services::account::AccountService;

/// Identity-assertion request as it arrives at the token endpoint
#[derive(Debug)]
pub struct AssertionRequest {
    pub client_id: String,
    pub nonce: Option<String>,
    pub account_id: String,
    pub disclosure_text_shown: bool,
    pub scope: Option<ScopeList>,
}

/// Fetch metadata of the inbound request, supplied by the HTTP boundary
#[derive(Debug, Clone, Copy)]
pub struct FetchMetadata<'a> {
    pub sec_fetch_dest: Option<&'a str>,
    pub origin: Option<&'a str>,
}

/// What the token endpoint answers with. `Empty` is the FedCM-defined
/// "no identity available" response, not an error.
#[derive(Debug)]
pub enum AssertionOutcome {
    Empty,
    Token(String),
    ContinueOn(String),
}

/// Grant minted by the interactive authorization step
#[derive(Debug, serde::Serialize)]
pub struct AuthorizeGrant {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
}

const WEBIDENTITY_DEST: &str = "webidentity";

/// FedCM assertion issuer: validates the request context against the client
/// registry and the live session, tracks consent, and mints signed tokens.
pub struct AssertionIssuer;

impl AssertionIssuer {
    pub async fn issue(
        db: &Database,
        config: &Config,
        session: &mut CeremonySession,
        ctx: &RequestContext,
        fetch: FetchMetadata<'_>,
        req: AssertionRequest,
    ) -> Result<AssertionOutcome> {
        let Some(login) = session.logged_in_user().cloned() else {
            return Ok(AssertionOutcome::Empty);
        };

        if fetch.sec_fetch_dest != Some(WEBIDENTITY_DEST) {
            return Err(AppError::InvalidRequestContext);
        }

        let client_ok = config
            .clients
            .get(&req.client_id)
            .map(|c| fetch.origin == Some(c.origin.as_str()))
            .unwrap_or(false);
        if !client_ok {
            tracing::error!(
                "Invalid Origin: {} for client_id: {}",
                fetch.origin.unwrap_or("<none>"),
                req.client_id
            );
            return Err(AppError::InvalidOrigin);
        }

        // A different account may have signed in at this IDP since the
        // account picker was shown
        if req.account_id != login.account_id {
            tracing::error!(
                "Invalid account_id: {} (session holds {})",
                req.account_id,
                login.account_id
            );
            return Err(AppError::AccountMismatch);
        }

        if req.disclosure_text_shown {
            let clients =
                AccountService::add_approved_client(db, &login.account_id, &req.client_id).await?;
            if let Some(state) = session.login.as_mut() {
                state.user.approved_clients = clients;
            }
        }

        match &req.scope {
            Some(scope) if scope.has_extended() => {
                // Capabilities beyond the identity claims need an interactive
                // authorization step; hand the browser a continuation URL
                Ok(AssertionOutcome::ContinueOn(Self::authorize_url(
                    ctx, &req, scope,
                )?))
            }
            Some(scope) => {
                let token = Self::scoped_id_token(config, &login, req.nonce.clone(), scope)?;
                Ok(AssertionOutcome::Token(token))
            }
            None => {
                let token = if config.token.legacy_full_disclosure {
                    Self::full_assertion(config, &login, req.nonce.clone())?
                } else {
                    // Minimal-disclosure rendition of the no-scope path
                    Self::scoped_id_token(config, &login, req.nonce.clone(), &ScopeList::parse(""))?
                };
                Ok(AssertionOutcome::Token(token))
            }
        }
    }

    /// Interactive authorization grant for scopes beyond the standard set.
    /// The POST arrives from the IDP's own authorization page after the user
    /// approved, so FedCM fetch metadata is not expected here.
    pub async fn authorize(
        db: &Database,
        config: &Config,
        session: &mut CeremonySession,
        client_id: &str,
        nonce: Option<String>,
        scope: &ScopeList,
    ) -> Result<AuthorizeGrant> {
        let Some(login) = session.logged_in_user().cloned() else {
            return Err(AppError::Unauthorized("No active session".to_string()));
        };

        if !config.clients.contains_key(client_id) {
            return Err(AppError::BadRequest(format!("Unknown client: {}", client_id)));
        }

        let clients = AccountService::add_approved_client(db, &login.account_id, client_id).await?;
        if let Some(state) = session.login.as_mut() {
            state.user.approved_clients = clients;
        }

        let extended = scope.extended();
        let access_token = if extended.is_empty() {
            None
        } else {
            let now = Utc::now();
            let claims = AccessTokenClaims {
                sub: login.account_id.clone(),
                client_id: client_id.to_string(),
                scope: extended.join(" "),
                jti: Uuid::new_v4().to_string(),
                iat: now.timestamp(),
                exp: (now + Duration::minutes(config.token.access_token_expire_minutes as i64))
                    .timestamp(),
            };
            Some(IdentityToken::AccessToken(claims).sign(&config.token.secret)?)
        };

        let wants_identity = ["openid", "profile", "email", "name", "picture"]
            .iter()
            .any(|s| scope.contains(s));
        let id_token = if wants_identity {
            Some(Self::scoped_id_token(config, &login, nonce, scope)?)
        } else {
            None
        };

        tracing::info!(
            "Authorized client {} for account {} (scope: {})",
            client_id,
            login.account_id,
            scope
        );
        Ok(AuthorizeGrant {
            access_token,
            id_token,
        })
    }

    /// Revocation acknowledgement. Deliberately does not touch the approved
    /// client set; explicit removal goes through the account endpoints.
    pub fn revoke(client_id: Option<&str>, account_hint: Option<&str>) {
        tracing::info!(
            "Revocation signal for client {:?}, account hint {:?}",
            client_id,
            account_hint
        );
    }

    /// Legacy no-scope assertion: every identity claim, unconditionally
    fn full_assertion(
        config: &Config,
        login: &SessionUser,
        nonce: Option<String>,
    ) -> Result<String> {
        let now = Utc::now();
        let claims = AssertionClaims {
            sub: login.account_id.clone(),
            nonce,
            iat: now.timestamp(),
            exp: (now + Duration::hours(config.token.assertion_expire_hours as i64)).timestamp(),
            email: login.email.clone(),
            name: login.name.clone(),
            picture: login.picture.clone(),
        };
        IdentityToken::Assertion(claims).sign(&config.token.secret)
    }

    /// Scope-derived token: only the claims the scope names are disclosed
    fn scoped_id_token(
        config: &Config,
        login: &SessionUser,
        nonce: Option<String>,
        scope: &ScopeList,
    ) -> Result<String> {
        let now = Utc::now();
        let claims = IdTokenClaims {
            sub: login.account_id.clone(),
            nonce,
            iat: now.timestamp(),
            exp: (now + Duration::hours(config.token.assertion_expire_hours as i64)).timestamp(),
            email: scope.contains("email").then(|| login.email.clone()),
            name: scope.contains("name").then(|| login.name.clone()),
            picture: scope.contains("picture").then(|| login.picture.clone()),
        };
        IdentityToken::IdToken(claims).sign(&config.token.secret)
    }

    fn authorize_url(
        ctx: &RequestContext,
        req: &AssertionRequest,
        scope: &ScopeList,
    ) -> Result<String> {
        let mut url = Url::parse(&ctx.base_url)
            .map_err(|_| AppError::Internal(format!("Invalid request origin: {}", ctx.base_url)))?;
        url.set_path("/fedcm/authorize");
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("client_id", &req.client_id);
            pairs.append_pair("scope", &scope.to_string());
            if let Some(nonce) = &req.nonce {
                pairs.append_pair("nonce", nonce);
            }
        }
        Ok(url.into())
    }
}
