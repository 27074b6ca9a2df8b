use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::Utc;

use crate::config::Config;
use crate::db::{sessions, Database};
use crate::error::Result;
use crate::models::CeremonySession;

/// Binds ceremony sessions to the opaque session cookie. All ceremony and
/// login state lives server-side; the cookie carries only the key.
pub struct SessionManager;

impl SessionManager {
    /// Load the session named by the cookie, creating one (and setting the
    /// cookie) on first contact. An expired login is cleared here, lazily.
    pub async fn acquire(
        db: &Database,
        config: &Config,
        jar: CookieJar,
    ) -> Result<(CeremonySession, CookieJar)> {
        if let Some(cookie) = jar.get(&config.session.cookie_name) {
            if let Some(mut session) = sessions::load(db, cookie.value()).await? {
                if session.expire_login_if_due(Utc::now()) {
                    tracing::debug!("Login session {} expired", session.id);
                    sessions::save(db, &session).await?;
                }
                return Ok((session, jar));
            }
        }

        let session = sessions::create(db).await?;
        let cookie = Self::build_cookie(config, session.id.clone());
        Ok((session, jar.add(cookie)))
    }

    pub async fn persist(db: &Database, session: &CeremonySession) -> Result<()> {
        sessions::save(db, session).await
    }

    /// Drop the session row and the cookie
    pub async fn destroy(
        db: &Database,
        config: &Config,
        session: CeremonySession,
        jar: CookieJar,
    ) -> Result<CookieJar> {
        sessions::delete(db, &session.id).await?;
        let removal = Cookie::build((config.session.cookie_name.clone(), String::new()))
            .path("/")
            .build();
        Ok(jar.remove(removal))
    }

    // FedCM fetches are cross-site: the cookie must be SameSite=None, which
    // requires Secure. Local development falls back to Lax.
    fn build_cookie(config: &Config, value: String) -> Cookie<'static> {
        let same_site = if config.session.cookie_secure {
            SameSite::None
        } else {
            SameSite::Lax
        };
        Cookie::build((config.session.cookie_name.clone(), value))
            .http_only(true)
            .secure(config.session.cookie_secure)
            .same_site(same_site)
            .path("/")
            .build()
    }
}
