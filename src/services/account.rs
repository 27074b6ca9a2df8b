use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::db::{devices, users, Database};
use crate::error::{AppError, Result};
use crate::middleware::context::RequestContext;
use crate::models::{NewUser, SessionUser};

/// Password-based account operations plus the consent bookkeeping shared
/// with the assertion issuer.
pub struct AccountService;

impl AccountService {
    /// Create a password-based account and report the login snapshot
    pub async fn signup(
        db: &Database,
        ctx: &RequestContext,
        email: &str,
        name: &str,
        secret: &str,
    ) -> Result<SessionUser> {
        let email = email.trim();
        if email.is_empty() || name.trim().is_empty() || secret.is_empty() {
            return Err(AppError::BadRequest(
                "Email, name, and secret are required".to_string(),
            ));
        }

        if users::find_by_email(db, email, &ctx.hostname).await?.is_some() {
            return Err(AppError::Conflict(
                "An account with this email already exists".to_string(),
            ));
        }

        let user = users::insert(
            db,
            &NewUser {
                id: Uuid::new_v4().to_string(),
                email: email.to_string(),
                name: name.trim().to_string(),
                realm: ctx.hostname.clone(),
                avatar_url: Self::avatar_url(email),
                secret_hash: Some(Self::hash_secret(secret)?),
            },
        )
        .await?;

        tracing::info!("Created account {} in realm {}", user.id, user.realm);
        Ok(SessionUser::from(&user))
    }

    /// Password sign-in. Unknown account, wrong secret and passkey-only
    /// account all answer the same way.
    pub async fn signin(
        db: &Database,
        ctx: &RequestContext,
        email: &str,
        secret: &str,
    ) -> Result<SessionUser> {
        if email.is_empty() || secret.is_empty() {
            return Err(AppError::BadRequest(
                "Email and password are required".to_string(),
            ));
        }

        let user = users::find_by_email(db, email, &ctx.hostname)
            .await?
            .ok_or_else(|| AppError::Unauthorized("Invalid email or password".to_string()))?;

        let verified = match user.secret_hash.as_deref() {
            Some(hash) => Self::verify_secret(secret, hash)?,
            None => false,
        };
        if !verified {
            return Err(AppError::Unauthorized(
                "Invalid email or password".to_string(),
            ));
        }

        Ok(SessionUser::from(&user))
    }

    /// Record consent for a client. Membership semantics: adding an already
    /// approved client changes nothing. Returns the resulting set.
    pub async fn add_approved_client(
        db: &Database,
        account_id: &str,
        client_id: &str,
    ) -> Result<Vec<String>> {
        let user = users::find_by_account_id(db, account_id)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

        let mut clients = user.approved_clients();
        if clients.iter().any(|c| c == client_id) {
            return Ok(clients);
        }
        clients.push(client_id.to_string());

        users::update_approved_clients(db, account_id, &clients, user.revision).await?;
        Ok(clients)
    }

    pub async fn remove_approved_client(
        db: &Database,
        account_id: &str,
        client_id: &str,
    ) -> Result<Vec<String>> {
        let user = users::find_by_account_id(db, account_id)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

        let mut clients = user.approved_clients();
        let before = clients.len();
        clients.retain(|c| c != client_id);
        if clients.len() == before {
            return Ok(clients);
        }

        users::update_approved_clients(db, account_id, &clients, user.revision).await?;
        Ok(clients)
    }

    /// Delete an account and every device bound to it
    pub async fn delete_account(db: &Database, account_id: &str) -> Result<()> {
        devices::delete_for_account(db, account_id).await?;
        users::delete(db, account_id).await?;
        tracing::info!("Deleted account {}", account_id);
        Ok(())
    }

    /// Deterministic avatar derived from the email digest
    pub fn avatar_url(email: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(email.as_bytes());
        let seed = hex::encode(hasher.finalize());
        format!("https://api.dicebear.com/7.x/bottts/png?seed={}", seed)
    }

    fn hash_secret(secret: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default()
            .hash_password(secret.as_bytes(), &salt)
            .map_err(|e| AppError::Internal(format!("Password hashing failed: {}", e)))?
            .to_string();
        Ok(hash)
    }

    fn verify_secret(secret: &str, hash: &str) -> Result<bool> {
        let parsed = PasswordHash::new(hash)
            .map_err(|e| AppError::Internal(format!("Invalid password hash: {}", e)))?;
        Ok(Argon2::default()
            .verify_password(secret.as_bytes(), &parsed)
            .is_ok())
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

    #[tokio::test]
    async fn signup_then_signin_round_trips() {
        let db = Database::open_in_memory().await.unwrap();
        let ctx = test_ctx();

        let created = AccountService::signup(&db, &ctx, "alice@example.com", "Alice", "hunter2")
            .await
            .unwrap();
        let signed_in = AccountService::signin(&db, &ctx, "alice@example.com", "hunter2")
            .await
            .unwrap();
        assert_eq!(created.account_id, signed_in.account_id);

        let wrong = AccountService::signin(&db, &ctx, "alice@example.com", "nope").await;
        assert!(matches!(wrong, Err(AppError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn duplicate_signup_conflicts() {
        let db = Database::open_in_memory().await.unwrap();
        let ctx = test_ctx();

        AccountService::signup(&db, &ctx, "alice@example.com", "Alice", "hunter2")
            .await
            .unwrap();
        let dup = AccountService::signup(&db, &ctx, "alice@example.com", "Alice", "other").await;
        assert!(matches!(dup, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn passkey_only_account_rejects_password_signin() {
        let db = Database::open_in_memory().await.unwrap();
        let ctx = test_ctx();

        users::insert(
            &db,
            &NewUser {
                id: Uuid::new_v4().to_string(),
                email: "bob@example.com".to_string(),
                name: "Bob".to_string(),
                realm: "idp.example".to_string(),
                avatar_url: AccountService::avatar_url("bob@example.com"),
                secret_hash: None,
            },
        )
        .await
        .unwrap();

        let result = AccountService::signin(&db, &ctx, "bob@example.com", "anything").await;
        assert!(matches!(result, Err(AppError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn approved_clients_add_and_remove_are_idempotent() {
        let db = Database::open_in_memory().await.unwrap();
        let ctx = test_ctx();

        let user = AccountService::signup(&db, &ctx, "alice@example.com", "Alice", "hunter2")
            .await
            .unwrap();

        let added = AccountService::add_approved_client(&db, &user.account_id, "rp1")
            .await
            .unwrap();
        assert_eq!(added, vec!["rp1".to_string()]);

        let again = AccountService::add_approved_client(&db, &user.account_id, "rp1")
            .await
            .unwrap();
        assert_eq!(again, vec!["rp1".to_string()]);

        let removed = AccountService::remove_approved_client(&db, &user.account_id, "rp1")
            .await
            .unwrap();
        assert!(removed.is_empty());

        let removed_again = AccountService::remove_approved_client(&db, &user.account_id, "rp1")
            .await
            .unwrap();
        assert!(removed_again.is_empty());
    }

    #[tokio::test]
    async fn delete_account_removes_user_and_devices() {
        let db = Database::open_in_memory().await.unwrap();
        let ctx = test_ctx();

        let user = AccountService::signup(&db, &ctx, "alice@example.com", "Alice", "hunter2")
            .await
            .unwrap();
        devices::insert(
            &db,
            &crate::models::NewDevice {
                credential_id: "cred-1".to_string(),
                account_id: user.account_id.clone(),
                credential_json: "{}".to_string(),
                transports: None,
            },
        )
        .await
        .unwrap();

        AccountService::delete_account(&db, &user.account_id).await.unwrap();

        assert!(users::find_by_account_id(&db, &user.account_id)
            .await
            .unwrap()
            .is_none());
        assert!(devices::find_by_credential_id(&db, "cred-1")
            .await
            .unwrap()
            .is_none());
    }
}
