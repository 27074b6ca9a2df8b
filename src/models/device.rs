use sqlx::FromRow;

/// Authenticator device row, one per physical authenticator.
/// `credential_json` is the serialized webauthn-rs passkey (public key,
/// counter, transports); `counter` mirrors the last verifier-accepted value.
#[derive(Debug, Clone, FromRow)]
pub struct AuthenticatorDevice {
    pub credential_id: String,
    pub account_id: String,
    pub credential_json: String,
    pub counter: i64,
    pub transports: Option<String>,
    pub created_at: String,
    pub last_used_at: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewDevice {
    pub credential_id: String,
    pub account_id: String,
    pub credential_json: String,
    pub transports: Option<String>,
}
