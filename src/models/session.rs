use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use webauthn_rs::prelude::{DiscoverableAuthentication, PasskeyAuthentication, PasskeyRegistration};

use crate::models::user::{NewUser, SessionUser};

/// Candidate account plus its registration ceremony state. Nothing is
/// persisted until the attestation response verifies.
#[derive(Debug, Serialize, Deserialize)]
pub struct PendingRegistration {
    pub user: NewUser,
    pub state: PasskeyRegistration,
}

/// In-flight authentication ceremony. `Targeted` narrows the allow list to a
/// known account's devices; `Discoverable` lets any resident credential
/// respond, keeping the email hint when one was supplied but did not resolve
/// to an account.
#[derive(Debug, Serialize, Deserialize)]
pub enum PendingAuthentication {
    Targeted {
        email: String,
        state: PasskeyAuthentication,
    },
    Discoverable {
        email_hint: Option<String>,
        state: DiscoverableAuthentication,
    },
}

/// Authenticated account snapshot plus its absolute expiration, checked
/// lazily on session load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginState {
    pub user: SessionUser,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Per-browser-session ceremony and login state. Kept server-side, keyed by
/// an opaque cookie; passed explicitly into and out of every engine call.
#[derive(Debug)]
pub struct CeremonySession {
    pub id: String,
    pub pending_registration: Option<PendingRegistration>,
    pub pending_authentication: Option<PendingAuthentication>,
    pub login: Option<LoginState>,
}

impl CeremonySession {
    pub fn new(id: String) -> Self {
        Self {
            id,
            pending_registration: None,
            pending_authentication: None,
            login: None,
        }
    }

    /// Starts a registration ceremony. A prior unconsumed one of the same
    /// kind is superseded: no verification may succeed against it afterwards.
    pub fn begin_registration(&mut self, user: NewUser, state: PasskeyRegistration) {
        self.pending_registration = Some(PendingRegistration { user, state });
    }

    /// Consumes the pending registration. Called at the top of verification
    /// so the state is cleared on success and failure alike.
    pub fn take_pending_registration(&mut self) -> Option<PendingRegistration> {
        self.pending_registration.take()
    }

    pub fn begin_authentication(&mut self, pending: PendingAuthentication) {
        self.pending_authentication = Some(pending);
    }

    pub fn take_pending_authentication(&mut self) -> Option<PendingAuthentication> {
        self.pending_authentication.take()
    }

    pub fn set_logged_in(&mut self, user: SessionUser, ttl: Duration) {
        self.login = Some(LoginState {
            user,
            expires_at: Some(Utc::now() + ttl),
        });
    }

    /// Treats the login as expired when the deadline passed or is absent.
    /// Returns true when state was cleared and the row needs persisting.
    pub fn expire_login_if_due(&mut self, now: DateTime<Utc>) -> bool {
        let expired = match &self.login {
            Some(login) => match login.expires_at {
                Some(deadline) => deadline < now,
                None => true,
            },
            None => false,
        };
        if expired {
            self.login = None;
        }
        expired
    }

    /// Expires the login at the next access without signalling the browser
    pub fn expire_login_now(&mut self) {
        if let Some(login) = self.login.as_mut() {
            login.expires_at = Some(Utc::now());
        }
    }

    pub fn logged_in_user(&self) -> Option<&SessionUser> {
        self.login.as_ref().map(|l| &l.user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(id: &str) -> SessionUser {
        SessionUser {
            account_id: id.to_string(),
            email: format!("{}@example.com", id),
            name: "Test".to_string(),
            picture: "https://example.com/a.png".to_string(),
            approved_clients: Vec::new(),
        }
    }

    #[test]
    fn login_expires_after_deadline() {
        let mut session = CeremonySession::new("s1".to_string());
        session.set_logged_in(snapshot("alice"), Duration::minutes(5));
        assert!(!session.expire_login_if_due(Utc::now()));
        assert!(session.logged_in_user().is_some());

        assert!(session.expire_login_if_due(Utc::now() + Duration::minutes(6)));
        assert!(session.logged_in_user().is_none());
    }

    #[test]
    fn login_without_deadline_is_expired() {
        let mut session = CeremonySession::new("s1".to_string());
        session.set_logged_in(snapshot("alice"), Duration::minutes(5));
        session.login.as_mut().unwrap().expires_at = None;

        assert!(session.expire_login_if_due(Utc::now()));
        assert!(session.logged_in_user().is_none());
    }

    #[test]
    fn out_of_band_expiry_takes_effect_on_next_check() {
        let mut session = CeremonySession::new("s1".to_string());
        session.set_logged_in(snapshot("alice"), Duration::minutes(5));
        session.expire_login_now();

        assert!(session.expire_login_if_due(Utc::now() + Duration::seconds(1)));
        assert!(session.logged_in_user().is_none());
    }

    #[test]
    fn pending_state_is_consumed_once() {
        let mut session = CeremonySession::new("s1".to_string());
        assert!(session.take_pending_registration().is_none());
        assert!(session.take_pending_authentication().is_none());
    }
}
