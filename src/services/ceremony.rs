use base64::Engine;
use chrono::Utc;
use url::Url;
use uuid::Uuid;
use webauthn_rs::prelude::*;
use webauthn_rs_proto::UserVerificationPolicy;

use crate::config::Config;
use crate::db::{devices, users, Database};
use crate::error::{AppError, Result};
use crate::middleware::context::RequestContext;
use crate::models::{
    CeremonySession, NewDevice, NewUser, PendingAuthentication, SessionUser,
};
use crate::services::account::AccountService;

/// WebAuthn ceremony engine. Challenges live in the ceremony session between
/// the start and finish call of each operation; starting a new ceremony of a
/// kind supersedes the previous one, and finishing consumes the state whether
/// verification passes or not.
pub struct CeremonyEngine;

impl CeremonyEngine {
    /// The relying party is the tenant of the current request: RP ID is the
    /// hostname, the expected origin is derived from scheme and host.
    fn webauthn_for(ctx: &RequestContext) -> Result<Webauthn> {
        let tenant = ctx.require_tenant()?;
        let rp_origin = Url::parse(&ctx.base_url)
            .map_err(|_| AppError::Internal(format!("Invalid request origin: {}", ctx.base_url)))?;
        let rp_name = format!("{} - {}", tenant.display_name, ctx.hostname);

        WebauthnBuilder::new(&ctx.hostname, &rp_origin)
            .map_err(|e| AppError::Internal(format!("WebAuthn config error: {:?}", e)))?
            .rp_name(&rp_name)
            .build()
            .map_err(|e| AppError::Internal(format!("WebAuthn build error: {:?}", e)))
    }

    fn encode_credential_id(raw: &[u8]) -> String {
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(raw)
    }

    /// Builds a registration challenge for a new account. The candidate
    /// account is parked in the session and nothing is persisted until the
    /// attestation response verifies.
    pub async fn start_registration(
        db: &Database,
        session: &mut CeremonySession,
        ctx: &RequestContext,
        email: &str,
        name: &str,
    ) -> Result<CreationChallengeResponse> {
        let email = email.trim();
        let name = name.trim();
        if email.is_empty() || name.is_empty() {
            return Err(AppError::BadRequest("Email and name are required".to_string()));
        }

        if users::find_by_email(db, email, &ctx.hostname).await?.is_some() {
            return Err(AppError::Conflict(
                "An account with this email already exists".to_string(),
            ));
        }

        let account_id = Uuid::new_v4();
        let candidate = NewUser {
            id: account_id.to_string(),
            email: email.to_string(),
            name: name.to_string(),
            realm: ctx.hostname.clone(),
            avatar_url: AccountService::avatar_url(email),
            secret_hash: None,
        };

        let webauthn = Self::webauthn_for(ctx)?;
        let (mut ccr, reg_state) = webauthn
            .start_passkey_registration(account_id, email, name, None)
            .map_err(|e| AppError::BadRequest(format!("start registration failed: {:?}", e)))?;

        // Advertise platform authenticators only
        if let Some(selection) = ccr.public_key.authenticator_selection.as_mut() {
            selection.authenticator_attachment = Some(AuthenticatorAttachment::Platform);
            selection.user_verification = UserVerificationPolicy::Required;
        }

        session.begin_registration(candidate, reg_state);
        Ok(ccr)
    }

    /// Verifies the attestation response against the pending candidate. On
    /// success the account and its first device are persisted and the session
    /// transitions to logged in.
    pub async fn finish_registration(
        db: &Database,
        config: &Config,
        session: &mut CeremonySession,
        ctx: &RequestContext,
        credential: RegisterPublicKeyCredential,
    ) -> Result<SessionUser> {
        // Consumed up front: the challenge is single-use on every outcome
        let pending = session.take_pending_registration().ok_or_else(|| {
            AppError::InvalidCeremonyState("no registration ceremony in flight".to_string())
        })?;

        let webauthn = Self::webauthn_for(ctx)?;
        let passkey = webauthn
            .finish_passkey_registration(&credential, &pending.state)
            .map_err(|e| {
                tracing::warn!(
                    "Registration verification failed for {}: {:?}",
                    pending.user.email,
                    e
                );
                AppError::VerificationFailed(format!("{:?}", e))
            })?;

        // Re-checked here: the candidate was built before the authenticator
        // round trip and another signup may have won the meantime
        if users::find_by_email(db, &pending.user.email, &ctx.hostname)
            .await?
            .is_some()
        {
            return Err(AppError::Conflict(
                "An account with this email already exists".to_string(),
            ));
        }

        let user = users::insert(db, &pending.user).await?;

        let transports = credential
            .response
            .transports
            .as_ref()
            .and_then(|t| serde_json::to_string(t).ok());
        let credential_json = serde_json::to_string(&passkey)
            .map_err(|_| AppError::Internal("Serialize passkey failed".to_string()))?;

        devices::insert(
            db,
            &NewDevice {
                credential_id: Self::encode_credential_id(passkey.cred_id().as_ref()),
                account_id: user.id.clone(),
                credential_json,
                transports,
            },
        )
        .await?;

        let snapshot = SessionUser::from(&user);
        session.set_logged_in(snapshot.clone(), config.login_ttl());
        tracing::info!("Registered new account {} in realm {}", user.id, user.realm);
        Ok(snapshot)
    }

    /// Builds an authentication challenge. With a resolvable email the allow
    /// list narrows to that account's devices; otherwise any discoverable
    /// credential may answer, and a supplied-but-unknown email is kept as a
    /// hint to be checked at verification time.
    pub async fn start_authentication(
        db: &Database,
        session: &mut CeremonySession,
        ctx: &RequestContext,
        email: Option<String>,
    ) -> Result<RequestChallengeResponse> {
        let webauthn = Self::webauthn_for(ctx)?;
        let email = email.map(|e| e.trim().to_string()).filter(|e| !e.is_empty());

        let (mut rcr, pending) = match email {
            Some(email) => {
                let mut passkeys: Vec<Passkey> = Vec::new();
                if let Some(user) = users::find_by_email(db, &email, &ctx.hostname).await? {
                    for device in devices::for_account(db, &user.id).await? {
                        let passkey: Passkey = serde_json::from_str(&device.credential_json)
                            .map_err(|_| {
                                AppError::Internal("Deserialize passkey failed".to_string())
                            })?;
                        passkeys.push(passkey);
                    }
                }

                if passkeys.is_empty() {
                    let (rcr, state) = webauthn.start_discoverable_authentication().map_err(|e| {
                        AppError::BadRequest(format!("start authentication failed: {:?}", e))
                    })?;
                    (
                        rcr,
                        PendingAuthentication::Discoverable {
                            email_hint: Some(email),
                            state,
                        },
                    )
                } else {
                    let (rcr, state) =
                        webauthn.start_passkey_authentication(&passkeys).map_err(|e| {
                            AppError::BadRequest(format!("start authentication failed: {:?}", e))
                        })?;
                    (rcr, PendingAuthentication::Targeted { email, state })
                }
            }
            None => {
                let (rcr, state) = webauthn.start_discoverable_authentication().map_err(|e| {
                    AppError::BadRequest(format!("start authentication failed: {:?}", e))
                })?;
                (
                    rcr,
                    PendingAuthentication::Discoverable {
                        email_hint: None,
                        state,
                    },
                )
            }
        };

        rcr.public_key.user_verification = UserVerificationPolicy::Required;

        session.begin_authentication(pending);
        Ok(rcr)
    }

    /// Verifies an assertion response against the pending challenge, resolves
    /// the owning account and device, persists the verifier-accepted counter
    /// and transitions the session to logged in.
    pub async fn finish_authentication(
        db: &Database,
        config: &Config,
        session: &mut CeremonySession,
        ctx: &RequestContext,
        credential: PublicKeyCredential,
    ) -> Result<SessionUser> {
        let pending = session.take_pending_authentication().ok_or_else(|| {
            AppError::InvalidCeremonyState("no authentication ceremony in flight".to_string())
        })?;

        let webauthn = Self::webauthn_for(ctx)?;
        let raw_id: &[u8] = credential.raw_id.as_ref();
        let credential_id = Self::encode_credential_id(raw_id);

        let (user, device, result) = match pending {
            PendingAuthentication::Targeted { email, state } => {
                let user = users::find_by_email(db, &email, &ctx.hostname)
                    .await?
                    .ok_or(AppError::UnknownAuthenticator)?;
                let device = devices::for_account(db, &user.id)
                    .await?
                    .into_iter()
                    .find(|d| d.credential_id == credential_id)
                    .ok_or(AppError::UnknownAuthenticator)?;

                let result = webauthn
                    .finish_passkey_authentication(&credential, &state)
                    .map_err(|e| {
                        tracing::warn!(
                            "Authentication verification failed for {}: {:?}",
                            user.email,
                            e
                        );
                        AppError::VerificationFailed("Authentication failed".to_string())
                    })?;
                (user, device, result)
            }
            PendingAuthentication::Discoverable { email_hint, state } => {
                // The response's credential id is the lookup key; the owning
                // account is resolved from the device record
                let device = devices::find_by_credential_id(db, &credential_id)
                    .await?
                    .ok_or(AppError::UnknownAuthenticator)?;
                let user = users::find_by_account_id(db, &device.account_id)
                    .await?
                    .ok_or(AppError::UnknownAuthenticator)?;
                if user.realm != ctx.hostname {
                    return Err(AppError::UnknownAuthenticator);
                }
                if let Some(hint) = email_hint {
                    if user.email != hint {
                        return Err(AppError::UnknownAuthenticator);
                    }
                }

                let passkey: Passkey = serde_json::from_str(&device.credential_json)
                    .map_err(|_| AppError::Internal("Deserialize passkey failed".to_string()))?;
                let result = webauthn
                    .finish_discoverable_authentication(
                        &credential,
                        state,
                        &[DiscoverableKey::from(&passkey)],
                    )
                    .map_err(|e| {
                        tracing::warn!(
                            "Authentication verification failed for {}: {:?}",
                            user.email,
                            e
                        );
                        AppError::VerificationFailed("Authentication failed".to_string())
                    })?;
                (user, device, result)
            }
        };

        let mut passkey: Passkey = serde_json::from_str(&device.credential_json)
            .map_err(|_| AppError::Internal("Deserialize passkey failed".to_string()))?;
        passkey.update_credential(&result);
        let credential_json = serde_json::to_string(&passkey)
            .map_err(|_| AppError::Internal("Serialize passkey failed".to_string()))?;
        devices::record_authentication(
            db,
            &device.credential_id,
            &credential_json,
            result.counter() as i64,
        )
        .await?;

        let snapshot = SessionUser::from(&user);
        session.set_logged_in(snapshot.clone(), config.login_ttl());
        tracing::debug!(
            "Account {} authenticated with device {} at {}",
            user.id,
            device.credential_id,
            Utc::now()
        );
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TenantConfig;

    fn test_ctx() -> RequestContext {
        RequestContext {
            hostname: "idp.example".to_string(),
            base_url: "https://idp.example".to_string(),
            tenant: Some(TenantConfig::default()),
        }
    }

    fn bogus_attestation() -> RegisterPublicKeyCredential {
        serde_json::from_value(serde_json::json!({
            "id": "AAAA",
            "rawId": "AAAA",
            "response": {
                "attestationObject": "AAAA",
                "clientDataJSON": "e30"
            },
            "type": "public-key",
            "extensions": {}
        }))
        .unwrap()
    }

    fn bogus_assertion(raw_id: &str) -> PublicKeyCredential {
        serde_json::from_value(serde_json::json!({
            "id": raw_id,
            "rawId": raw_id,
            "response": {
                "authenticatorData": "AAAA",
                "clientDataJSON": "e30",
                "signature": "AAAA",
                "userHandle": null
            },
            "type": "public-key",
            "extensions": {}
        }))
        .unwrap()
    }

    async fn seed_user(db: &Database, email: &str) -> crate::models::User {
        users::insert(
            db,
            &NewUser {
                id: Uuid::new_v4().to_string(),
                email: email.to_string(),
                name: "Alice".to_string(),
                realm: "idp.example".to_string(),
                avatar_url: AccountService::avatar_url(email),
                secret_hash: None,
            },
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn registration_options_park_a_candidate() {
        let db = Database::open_in_memory().await.unwrap();
        let mut session = CeremonySession::new("s1".to_string());
        let ctx = test_ctx();

        let ccr =
            CeremonyEngine::start_registration(&db, &mut session, &ctx, "alice@example.com", "Alice")
                .await
                .unwrap();

        assert_eq!(ccr.public_key.rp.id, "idp.example");
        assert_eq!(ccr.public_key.user.name, "alice@example.com");
        let selection = ccr.public_key.authenticator_selection.as_ref().unwrap();
        assert!(matches!(
            selection.authenticator_attachment,
            Some(AuthenticatorAttachment::Platform)
        ));

        let pending = session.pending_registration.as_ref().unwrap();
        assert_eq!(pending.user.email, "alice@example.com");
        assert_eq!(pending.user.realm, "idp.example");
        // Provisional only: nothing reached the store
        assert!(users::find_by_email(&db, "alice@example.com", "idp.example")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn registration_requires_email_and_name() {
        let db = Database::open_in_memory().await.unwrap();
        let mut session = CeremonySession::new("s1".to_string());
        let ctx = test_ctx();

        let missing =
            CeremonyEngine::start_registration(&db, &mut session, &ctx, " ", "Alice").await;
        assert!(matches!(missing, Err(AppError::BadRequest(_))));
        assert!(session.pending_registration.is_none());
    }

    #[tokio::test]
    async fn registration_rejects_existing_account() {
        let db = Database::open_in_memory().await.unwrap();
        seed_user(&db, "alice@example.com").await;
        let mut session = CeremonySession::new("s1".to_string());
        let ctx = test_ctx();

        let conflict = CeremonyEngine::start_registration(
            &db,
            &mut session,
            &ctx,
            "alice@example.com",
            "Alice",
        )
        .await;
        assert!(matches!(conflict, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn reissued_registration_challenge_supersedes_the_previous_one() {
        let db = Database::open_in_memory().await.unwrap();
        let mut session = CeremonySession::new("s1".to_string());
        let ctx = test_ctx();

        let first =
            CeremonyEngine::start_registration(&db, &mut session, &ctx, "a@example.com", "A")
                .await
                .unwrap();
        let second =
            CeremonyEngine::start_registration(&db, &mut session, &ctx, "b@example.com", "B")
                .await
                .unwrap();

        assert_ne!(first.public_key.challenge, second.public_key.challenge);
        // Only the latest candidate survives, and only once
        let pending = session.take_pending_registration().unwrap();
        assert_eq!(pending.user.email, "b@example.com");
        assert!(session.take_pending_registration().is_none());
    }

    #[tokio::test]
    async fn verify_without_pending_registration_is_rejected() {
        let db = Database::open_in_memory().await.unwrap();
        let config = Config::default();
        let mut session = CeremonySession::new("s1".to_string());
        let ctx = test_ctx();

        let result = CeremonyEngine::finish_registration(
            &db,
            &config,
            &mut session,
            &ctx,
            bogus_attestation(),
        )
        .await;
        assert!(matches!(result, Err(AppError::InvalidCeremonyState(_))));
    }

    #[tokio::test]
    async fn failed_registration_clears_state_and_persists_nothing() {
        let db = Database::open_in_memory().await.unwrap();
        let config = Config::default();
        let mut session = CeremonySession::new("s1".to_string());
        let ctx = test_ctx();

        CeremonyEngine::start_registration(&db, &mut session, &ctx, "alice@example.com", "Alice")
            .await
            .unwrap();

        let result = CeremonyEngine::finish_registration(
            &db,
            &config,
            &mut session,
            &ctx,
            bogus_attestation(),
        )
        .await;
        assert!(matches!(result, Err(AppError::VerificationFailed(_))));

        // Cleared on failure, no partial state behind
        assert!(session.pending_registration.is_none());
        assert!(session.logged_in_user().is_none());
        assert!(users::find_by_email(&db, "alice@example.com", "idp.example")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn authentication_options_for_unknown_email_keep_the_hint() {
        let db = Database::open_in_memory().await.unwrap();
        let mut session = CeremonySession::new("s1".to_string());
        let ctx = test_ctx();

        CeremonyEngine::start_authentication(
            &db,
            &mut session,
            &ctx,
            Some("ghost@example.com".to_string()),
        )
        .await
        .unwrap();

        match session.pending_authentication.as_ref().unwrap() {
            PendingAuthentication::Discoverable { email_hint, .. } => {
                assert_eq!(email_hint.as_deref(), Some("ghost@example.com"));
            }
            PendingAuthentication::Targeted { .. } => panic!("expected discoverable flow"),
        }
    }

    #[tokio::test]
    async fn authentication_options_without_email_are_discoverable() {
        let db = Database::open_in_memory().await.unwrap();
        let mut session = CeremonySession::new("s1".to_string());
        let ctx = test_ctx();

        let rcr = CeremonyEngine::start_authentication(&db, &mut session, &ctx, None)
            .await
            .unwrap();

        assert!(matches!(
            rcr.public_key.user_verification,
            UserVerificationPolicy::Required
        ));
        assert!(matches!(
            session.pending_authentication,
            Some(PendingAuthentication::Discoverable {
                email_hint: None,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn reissued_authentication_challenge_supersedes_the_previous_one() {
        let db = Database::open_in_memory().await.unwrap();
        let mut session = CeremonySession::new("s1".to_string());
        let ctx = test_ctx();

        let first = CeremonyEngine::start_authentication(&db, &mut session, &ctx, None)
            .await
            .unwrap();
        let second = CeremonyEngine::start_authentication(&db, &mut session, &ctx, None)
            .await
            .unwrap();

        assert_ne!(first.public_key.challenge, second.public_key.challenge);
        assert!(session.take_pending_authentication().is_some());
        assert!(session.take_pending_authentication().is_none());
    }

    #[tokio::test]
    async fn verify_without_pending_authentication_is_rejected() {
        let db = Database::open_in_memory().await.unwrap();
        let config = Config::default();
        let mut session = CeremonySession::new("s1".to_string());
        let ctx = test_ctx();

        let result = CeremonyEngine::finish_authentication(
            &db,
            &config,
            &mut session,
            &ctx,
            bogus_assertion("AAAA"),
        )
        .await;
        assert!(matches!(result, Err(AppError::InvalidCeremonyState(_))));
    }

    #[tokio::test]
    async fn unknown_credential_fails_and_clears_state() {
        let db = Database::open_in_memory().await.unwrap();
        let config = Config::default();
        let mut session = CeremonySession::new("s1".to_string());
        let ctx = test_ctx();

        CeremonyEngine::start_authentication(&db, &mut session, &ctx, None)
            .await
            .unwrap();

        let result = CeremonyEngine::finish_authentication(
            &db,
            &config,
            &mut session,
            &ctx,
            bogus_assertion("AAAA"),
        )
        .await;
        assert!(matches!(result, Err(AppError::UnknownAuthenticator)));
        assert!(session.pending_authentication.is_none());
        assert!(session.logged_in_user().is_none());
    }
}
