use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Account row. One account per (email, realm); the id is the stable
/// reference used by devices, sessions and issued tokens.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    pub realm: String,
    pub avatar_url: String,
    pub secret_hash: Option<String>,
    pub approved_clients: String,
    pub revision: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl User {
    pub fn approved_clients(&self) -> Vec<String> {
        serde_json::from_str(&self.approved_clients).unwrap_or_default()
    }
}

/// A not-yet-persisted account, either a signup or a registration candidate
/// held in the session while its ceremony is in flight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUser {
    pub id: String,
    pub email: String,
    pub name: String,
    pub realm: String,
    pub avatar_url: String,
    pub secret_hash: Option<String>,
}

/// Denormalized account snapshot carried in the session once login succeeds.
/// A copy, not a live reference: `approved_clients` is refreshed explicitly
/// when consent changes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionUser {
    pub account_id: String,
    pub email: String,
    pub name: String,
    pub picture: String,
    pub approved_clients: Vec<String>,
}

impl From<&User> for SessionUser {
    fn from(user: &User) -> Self {
        Self {
            account_id: user.id.clone(),
            email: user.email.clone(),
            name: user.name.clone(),
            picture: user.avatar_url.clone(),
            approved_clients: user.approved_clients(),
        }
    }
}

impl From<&NewUser> for SessionUser {
    fn from(user: &NewUser) -> Self {
        Self {
            account_id: user.id.clone(),
            email: user.email.clone(),
            name: user.name.clone(),
            picture: user.avatar_url.clone(),
            approved_clients: Vec::new(),
        }
    }
}

/// Account representation of the FedCM accounts endpoint
#[derive(Debug, Serialize)]
pub struct FedCmAccount {
    pub id: String,
    pub name: String,
    pub given_name: String,
    pub email: String,
    pub picture: String,
    pub approved_clients: Vec<String>,
}

impl From<&SessionUser> for FedCmAccount {
    fn from(user: &SessionUser) -> Self {
        Self {
            id: user.account_id.clone(),
            name: user.name.clone(),
            given_name: user.name.clone(),
            email: user.email.clone(),
            picture: user.picture.clone(),
            approved_clients: user.approved_clients.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AccountsResponse {
    pub accounts: Vec<FedCmAccount>,
}
