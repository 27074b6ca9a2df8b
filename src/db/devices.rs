use chrono::Utc;

use crate::db::Database;
use crate::error::Result;
use crate::models::{AuthenticatorDevice, NewDevice};

pub async fn insert(db: &Database, device: &NewDevice) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    sqlx::query(
        r#"
        INSERT INTO authenticator_devices (credential_id, account_id, credential_json, counter, transports, created_at, last_used_at)
        VALUES (?, ?, ?, 0, ?, ?, NULL)
        "#,
    )
    .bind(&device.credential_id)
    .bind(&device.account_id)
    .bind(&device.credential_json)
    .bind(device.transports.as_deref())
    .bind(&now)
    .execute(db.pool())
    .await?;
    Ok(())
}

pub async fn for_account(db: &Database, account_id: &str) -> Result<Vec<AuthenticatorDevice>> {
    let devices =
        sqlx::query_as("SELECT * FROM authenticator_devices WHERE account_id = ? ORDER BY created_at")
            .bind(account_id)
            .fetch_all(db.pool())
            .await?;
    Ok(devices)
}

pub async fn find_by_credential_id(
    db: &Database,
    credential_id: &str,
) -> Result<Option<AuthenticatorDevice>> {
    let device = sqlx::query_as("SELECT * FROM authenticator_devices WHERE credential_id = ?")
        .bind(credential_id)
        .fetch_optional(db.pool())
        .await?;
    Ok(device)
}

/// Persist the verifier-accepted state after a successful authentication:
/// the updated passkey blob, its counter, and the use timestamp.
pub async fn record_authentication(
    db: &Database,
    credential_id: &str,
    credential_json: &str,
    counter: i64,
) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    sqlx::query(
        r#"
        UPDATE authenticator_devices
        SET credential_json = ?, counter = ?, last_used_at = ?
        WHERE credential_id = ?
        "#,
    )
    .bind(credential_json)
    .bind(counter)
    .bind(&now)
    .bind(credential_id)
    .execute(db.pool())
    .await?;
    Ok(())
}

pub async fn delete_for_account(db: &Database, account_id: &str) -> Result<()> {
    sqlx::query("DELETE FROM authenticator_devices WHERE account_id = ?")
        .bind(account_id)
        .execute(db.pool())
        .await?;
    Ok(())
}
