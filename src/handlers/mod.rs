use axum::http::HeaderMap;

use crate::error::{AppError, Result};

pub mod auth;
pub mod fedcm;
pub mod metadata;
pub mod passkey;

/// IDP Sign-In Status header, propagated out-of-band to the browser
pub const SET_LOGIN_HEADER: &str = "Set-Login";
pub const LOGIN_STATUS_LOGGED_IN: &str = "logged-in";
pub const LOGIN_STATUS_LOGGED_OUT: &str = "logged-out";

/// FedCM endpoints only answer browser-initiated web-identity fetches
pub(crate) fn require_webidentity(headers: &HeaderMap) -> Result<()> {
    let dest = headers.get("sec-fetch-dest").and_then(|h| h.to_str().ok());
    if dest != Some("webidentity") {
        return Err(AppError::InvalidRequestContext);
    }
    Ok(())
}
