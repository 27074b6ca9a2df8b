use jsonwebtoken::{encode, EncodingKey, Header};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Scope tokens a relying party may request alongside the standard FedCM
/// identity claims. Accepts both the form-encoded space-separated shape and a
/// JSON array.
#[derive(Debug, Clone, PartialEq)]
pub struct ScopeList(Vec<String>);

const STANDARD_SCOPES: &[&str] = &["openid", "profile", "email", "name", "picture"];

impl ScopeList {
    pub fn parse(raw: &str) -> Self {
        Self(raw.split_whitespace().map(|s| s.to_string()).collect())
    }

    pub fn contains(&self, scope: &str) -> bool {
        self.0.iter().any(|s| s == scope)
    }

    /// Scope tokens outside the standard identity set. Any of these routes
    /// the request to the interactive authorization flow.
    pub fn extended(&self) -> Vec<String> {
        self.0
            .iter()
            .filter(|s| !STANDARD_SCOPES.contains(&s.as_str()))
            .cloned()
            .collect()
    }

    pub fn has_extended(&self) -> bool {
        !self.extended().is_empty()
    }
}

impl std::fmt::Display for ScopeList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.join(" "))
    }
}

impl<'de> Deserialize<'de> for ScopeList {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            One(String),
            Many(Vec<String>),
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::One(s) => ScopeList::parse(&s),
            Repr::Many(v) => ScopeList(v),
        })
    }
}

impl Serialize for ScopeList {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// Legacy no-scope assertion: the full identity claim set, unconditionally
#[derive(Debug, Serialize, Deserialize)]
pub struct AssertionClaims {
    pub sub: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    pub iat: i64,
    pub exp: i64,
    pub email: String,
    pub name: String,
    pub picture: String,
}

/// Scope-derived ID token: only the claims the scope names
#[derive(Debug, Serialize, Deserialize)]
pub struct IdTokenClaims {
    pub sub: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    pub iat: i64,
    pub exp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
}

/// Access token for non-standard scopes granted via the authorization flow
#[derive(Debug, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    pub sub: String,
    pub client_id: String,
    pub scope: String,
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
}

/// The token kinds this IDP mints. Each variant carries a fixed claim set;
/// there is no conditional field assembly outside this union.
#[derive(Debug)]
pub enum IdentityToken {
    Assertion(AssertionClaims),
    IdToken(IdTokenClaims),
    AccessToken(AccessTokenClaims),
}

impl IdentityToken {
    pub fn sign(&self, secret: &str) -> Result<String> {
        let key = EncodingKey::from_secret(secret.as_bytes());
        let header = Header::default();
        let token = match self {
            IdentityToken::Assertion(claims) => encode(&header, claims, &key)?,
            IdentityToken::IdToken(claims) => encode(&header, claims, &key)?,
            IdentityToken::AccessToken(claims) => encode(&header, claims, &key)?,
        };
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{decode, DecodingKey, Validation};

    #[test]
    fn scope_parses_space_separated_string() {
        let scope = ScopeList::parse("openid email calendar.read");
        assert!(scope.contains("email"));
        assert!(!scope.contains("name"));
        assert_eq!(scope.extended(), vec!["calendar.read".to_string()]);
    }

    #[test]
    fn scope_deserializes_from_string_and_array() {
        let from_str: ScopeList = serde_json::from_value(serde_json::json!("email name")).unwrap();
        assert!(from_str.contains("email") && from_str.contains("name"));

        let from_array: ScopeList =
            serde_json::from_value(serde_json::json!(["email", "picture"])).unwrap();
        assert!(from_array.contains("picture"));
        assert!(!from_array.has_extended());
    }

    #[test]
    fn standard_scopes_are_not_extended() {
        let scope = ScopeList::parse("openid profile email name picture");
        assert!(!scope.has_extended());
    }

    #[test]
    fn assertion_token_round_trips_with_all_claims() {
        let now = chrono::Utc::now().timestamp();
        let token = IdentityToken::Assertion(AssertionClaims {
            sub: "acct-1".to_string(),
            nonce: Some("n-123".to_string()),
            iat: now,
            exp: now + 3600,
            email: "alice@example.com".to_string(),
            name: "Alice".to_string(),
            picture: "https://example.com/a.png".to_string(),
        })
        .sign("secret")
        .unwrap();

        let decoded = decode::<AssertionClaims>(
            &token,
            &DecodingKey::from_secret(b"secret"),
            &Validation::default(),
        )
        .unwrap();
        assert_eq!(decoded.claims.sub, "acct-1");
        assert_eq!(decoded.claims.email, "alice@example.com");
        assert_eq!(decoded.claims.nonce.as_deref(), Some("n-123"));
    }

    #[test]
    fn id_token_omits_unrequested_claims() {
        let now = chrono::Utc::now().timestamp();
        let token = IdentityToken::IdToken(IdTokenClaims {
            sub: "acct-1".to_string(),
            nonce: None,
            iat: now,
            exp: now + 3600,
            email: Some("alice@example.com".to_string()),
            name: None,
            picture: None,
        })
        .sign("secret")
        .unwrap();

        let decoded = decode::<serde_json::Value>(
            &token,
            &DecodingKey::from_secret(b"secret"),
            &Validation::default(),
        )
        .unwrap();
        assert_eq!(decoded.claims["email"], "alice@example.com");
        assert!(decoded.claims.get("name").is_none());
        assert!(decoded.claims.get("picture").is_none());
    }
}
