use chrono::Utc;

use crate::db::Database;
use crate::error::{AppError, Result};
use crate::models::{NewUser, User};

/// Look up an account by email within a realm. Absence is not an error.
pub async fn find_by_email(db: &Database, email: &str, realm: &str) -> Result<Option<User>> {
    let user = sqlx::query_as("SELECT * FROM users WHERE email = ? AND realm = ?")
        .bind(email)
        .bind(realm)
        .fetch_optional(db.pool())
        .await?;
    Ok(user)
}

pub async fn find_by_account_id(db: &Database, account_id: &str) -> Result<Option<User>> {
    let user = sqlx::query_as("SELECT * FROM users WHERE id = ?")
        .bind(account_id)
        .fetch_optional(db.pool())
        .await?;
    Ok(user)
}

pub async fn insert(db: &Database, user: &NewUser) -> Result<User> {
    let now = Utc::now().to_rfc3339();
    sqlx::query(
        r#"
        INSERT INTO users (id, email, name, realm, avatar_url, secret_hash, approved_clients, revision, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, '[]', 0, ?, ?)
        "#,
    )
    .bind(&user.id)
    .bind(&user.email)
    .bind(&user.name)
    .bind(&user.realm)
    .bind(&user.avatar_url)
    .bind(user.secret_hash.as_deref())
    .bind(&now)
    .bind(&now)
    .execute(db.pool())
    .await?;

    let stored = find_by_account_id(db, &user.id)
        .await?
        .ok_or_else(|| AppError::Internal("User vanished after insert".to_string()))?;
    Ok(stored)
}

/// Replace the approved-client set, guarded by the revision the caller read.
/// A lost race surfaces as a retryable conflict, never a silent overwrite.
pub async fn update_approved_clients(
    db: &Database,
    account_id: &str,
    clients: &[String],
    expected_revision: i64,
) -> Result<()> {
    let serialized = serde_json::to_string(clients)
        .map_err(|_| AppError::Internal("Serialize approved clients failed".to_string()))?;
    let now = Utc::now().to_rfc3339();

    let affected = sqlx::query(
        r#"
        UPDATE users SET approved_clients = ?, revision = revision + 1, updated_at = ?
        WHERE id = ? AND revision = ?
        "#,
    )
    .bind(&serialized)
    .bind(&now)
    .bind(account_id)
    .bind(expected_revision)
    .execute(db.pool())
    .await?
    .rows_affected();

    if affected == 0 {
        return Err(AppError::StoreConflict(format!(
            "approved_clients update for account {} lost a revision race",
            account_id
        )));
    }
    Ok(())
}

pub async fn delete(db: &Database, account_id: &str) -> Result<()> {
    sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(account_id)
        .execute(db.pool())
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(email: &str, realm: &str) -> NewUser {
        NewUser {
            id: uuid::Uuid::new_v4().to_string(),
            email: email.to_string(),
            name: "Alice".to_string(),
            realm: realm.to_string(),
            avatar_url: "https://example.com/a.png".to_string(),
            secret_hash: None,
        }
    }

    #[tokio::test]
    async fn email_is_unique_per_realm() {
        let db = Database::open_in_memory().await.unwrap();
        insert(&db, &new_user("alice@example.com", "idp.example"))
            .await
            .unwrap();

        // Same email in another realm is a distinct account
        insert(&db, &new_user("alice@example.com", "idp2.example"))
            .await
            .unwrap();

        // Same (email, realm) pair is rejected by the store
        let dup = insert(&db, &new_user("alice@example.com", "idp.example")).await;
        assert!(matches!(dup, Err(AppError::Database(_))));

        let found = find_by_email(&db, "alice@example.com", "idp.example")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.realm, "idp.example");
        assert!(find_by_email(&db, "alice@example.com", "missing.example")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn approved_clients_update_checks_revision() {
        let db = Database::open_in_memory().await.unwrap();
        let user = insert(&db, &new_user("alice@example.com", "idp.example"))
            .await
            .unwrap();

        update_approved_clients(&db, &user.id, &["rp1".to_string()], user.revision)
            .await
            .unwrap();

        // A second writer holding the stale revision loses the race
        let stale = update_approved_clients(&db, &user.id, &["rp2".to_string()], user.revision).await;
        assert!(matches!(stale, Err(AppError::StoreConflict(_))));

        let reloaded = find_by_account_id(&db, &user.id).await.unwrap().unwrap();
        assert_eq!(reloaded.approved_clients(), vec!["rp1".to_string()]);
        assert_eq!(reloaded.revision, user.revision + 1);
    }
}
