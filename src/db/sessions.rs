use chrono::Utc;
use sqlx::Row;

use crate::db::Database;
use crate::error::{AppError, Result};
use crate::models::{CeremonySession, LoginState, PendingAuthentication, PendingRegistration};

fn to_json<T: serde::Serialize>(value: &Option<T>) -> Result<Option<String>> {
    value
        .as_ref()
        .map(|v| serde_json::to_string(v))
        .transpose()
        .map_err(|_| AppError::Internal("Serialize session state failed".to_string()))
}

fn from_json<T: serde::de::DeserializeOwned>(value: Option<String>) -> Option<T> {
    value.and_then(|json| serde_json::from_str(&json).ok())
}

pub async fn create(db: &Database) -> Result<CeremonySession> {
    let session = CeremonySession::new(uuid::Uuid::new_v4().to_string());
    let now = Utc::now().to_rfc3339();
    sqlx::query(
        "INSERT INTO sessions (id, registration_json, authentication_json, login_json, created_at, updated_at) VALUES (?, NULL, NULL, NULL, ?, ?)",
    )
    .bind(&session.id)
    .bind(&now)
    .bind(&now)
    .execute(db.pool())
    .await?;
    Ok(session)
}

pub async fn load(db: &Database, id: &str) -> Result<Option<CeremonySession>> {
    let row = sqlx::query(
        "SELECT registration_json, authentication_json, login_json FROM sessions WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(db.pool())
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let mut session = CeremonySession::new(id.to_string());
    session.pending_registration =
        from_json::<PendingRegistration>(row.try_get("registration_json")?);
    session.pending_authentication =
        from_json::<PendingAuthentication>(row.try_get("authentication_json")?);
    session.login = from_json::<LoginState>(row.try_get("login_json")?);
    Ok(Some(session))
}

pub async fn save(db: &Database, session: &CeremonySession) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    sqlx::query(
        r#"
        UPDATE sessions
        SET registration_json = ?, authentication_json = ?, login_json = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(to_json(&session.pending_registration)?)
    .bind(to_json(&session.pending_authentication)?)
    .bind(to_json(&session.login)?)
    .bind(&now)
    .bind(&session.id)
    .execute(db.pool())
    .await?;
    Ok(())
}

pub async fn delete(db: &Database, id: &str) -> Result<()> {
    sqlx::query("DELETE FROM sessions WHERE id = ?")
        .bind(id)
        .execute(db.pool())
        .await?;
    Ok(())
}

/// Drop sessions untouched for the given number of hours. Abandoned
/// ceremonies and expired logins go with them.
pub async fn purge_stale(db: &Database, max_age_hours: i64) -> Result<u64> {
    let cutoff = (Utc::now() - chrono::Duration::hours(max_age_hours)).to_rfc3339();
    let affected = sqlx::query("DELETE FROM sessions WHERE updated_at < ?")
        .bind(&cutoff)
        .execute(db.pool())
        .await?
        .rows_affected();
    Ok(affected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SessionUser;

    #[tokio::test]
    async fn login_state_round_trips() {
        let db = Database::open_in_memory().await.unwrap();
        let mut session = create(&db).await.unwrap();

        session.set_logged_in(
            SessionUser {
                account_id: "acct-1".to_string(),
                email: "alice@example.com".to_string(),
                name: "Alice".to_string(),
                picture: "https://example.com/a.png".to_string(),
                approved_clients: vec!["rp1".to_string()],
            },
            chrono::Duration::minutes(5),
        );
        save(&db, &session).await.unwrap();

        let loaded = load(&db, &session.id).await.unwrap().unwrap();
        let user = loaded.logged_in_user().unwrap();
        assert_eq!(user.account_id, "acct-1");
        assert_eq!(user.approved_clients, vec!["rp1".to_string()]);
    }

    #[tokio::test]
    async fn unknown_session_id_is_absent() {
        let db = Database::open_in_memory().await.unwrap();
        assert!(load(&db, "nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn purge_drops_only_stale_rows() {
        let db = Database::open_in_memory().await.unwrap();
        let session = create(&db).await.unwrap();

        assert_eq!(purge_stale(&db, 1).await.unwrap(), 0);

        // Backdate the row past the cutoff
        let old = (Utc::now() - chrono::Duration::hours(48)).to_rfc3339();
        sqlx::query("UPDATE sessions SET updated_at = ? WHERE id = ?")
            .bind(&old)
            .bind(&session.id)
            .execute(db.pool())
            .await
            .unwrap();

        assert_eq!(purge_stale(&db, 24).await.unwrap(), 1);
        assert!(load(&db, &session.id).await.unwrap().is_none());
    }
}
