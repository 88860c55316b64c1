//! Bearer-token authentication for socket connections.
//!
//! Tokens are HS256 JWTs issued by the platform's HTTP authentication
//! service. They are verified once at connect time and re-validated on
//! every heartbeat through the connection's session.

use axum::http::{HeaderMap, header::AUTHORIZATION};
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

use crate::{
    ConnectionId, UserId,
    config::Config,
    error::{AuthError, PermissionError, RealtimeError},
};

pub const ADMIN_ROLE: &str = "admin";
pub const WILDCARD_PERMISSION: &str = "*";

/// JWT claims structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User ID
    pub sub: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
    /// Issued at time (Unix timestamp)
    #[serde(default)]
    pub iat: u64,
}

impl Claims {
    pub fn new(user_id: impl Into<String>, ttl_secs: u64) -> Self {
        let now = Utc::now().timestamp().max(0) as u64;
        Self {
            sub: user_id.into(),
            username: None,
            email: None,
            roles: Vec::new(),
            permissions: Vec::new(),
            exp: now + ttl_secs,
            iat: now,
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles = roles.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_permissions<I, S>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.permissions = permissions.into_iter().map(Into::into).collect();
        self
    }
}

/// The verified identity behind a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    pub username: Option<String>,
    pub email: Option<String>,
    pub roles: HashSet<String>,
    pub permissions: HashSet<String>,
    pub expires_at: u64,
}

impl From<Claims> for Identity {
    fn from(claims: Claims) -> Self {
        Self {
            user_id: claims.sub,
            username: claims.username,
            email: claims.email,
            roles: claims.roles.into_iter().collect(),
            permissions: claims.permissions.into_iter().collect(),
            expires_at: claims.exp,
        }
    }
}

impl Identity {
    pub fn is_admin(&self) -> bool {
        self.roles.contains(ADMIN_ROLE) || self.permissions.contains(WILDCARD_PERMISSION)
    }

    /// Checks the action allow-list. Actions without an entry are open to every
    /// authenticated user.
    pub fn allows(&self, action: &'static str) -> Result<(), PermissionError> {
        match required_permission(action) {
            Some(permission) if !self.is_admin() && !self.permissions.contains(permission) => {
                Err(PermissionError {
                    user_id: self.user_id.clone(),
                    action,
                    permission,
                })
            }
            _ => Ok(()),
        }
    }
}

/// Permission an action requires, keyed by message type.
pub fn required_permission(action: &str) -> Option<&'static str> {
    match action {
        "cell_update" => Some("sheets.edit"),
        "ai_request" => Some("ai.use"),
        "subscribe_notifications" | "notification_read" => Some("notifications.read"),
        "file_upload_start" | "file_upload_progress" => Some("files.upload"),
        _ => None,
    }
}

/// Token from the `token` query parameter, falling back to `Authorization: Bearer`.
pub fn extract_token(query_token: Option<&str>, headers: &HeaderMap) -> Option<String> {
    if let Some(token) = query_token.map(str::trim).filter(|t| !t.is_empty()) {
        return Some(token.to_string());
    }
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}

#[derive(Debug, Clone)]
pub struct Session {
    pub identity: Identity,
    token: String,
    pub opened_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

pub struct Authenticator {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    sessions: RwLock<HashMap<ConnectionId, Session>>,
}

impl Authenticator {
    pub fn new(config: &Config) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = config.jwt_leeway_secs;
        Self {
            encoding_key: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            validation,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Signs `claims` with the shared secret.
    pub fn issue_token(&self, claims: &Claims) -> Result<String, AuthError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|e| AuthError::Invalid(e.to_string()))
    }

    /// Verifies signature and expiry and extracts the identity.
    pub fn verify(&self, token: Option<&str>) -> Result<Identity, AuthError> {
        let token = token.ok_or(AuthError::MissingToken)?;
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::Invalid(e.to_string()),
            }
        })?;
        if data.claims.sub.trim().is_empty() {
            return Err(AuthError::Invalid("token has no subject".to_string()));
        }
        Ok(data.claims.into())
    }

    pub async fn open_session(&self, connection_id: &ConnectionId, identity: Identity, token: String) {
        let now = Utc::now();
        self.sessions.write().await.insert(
            connection_id.clone(),
            Session {
                identity,
                token,
                opened_at: now,
                last_activity: now,
            },
        );
    }

    /// Re-validates the session's token and records activity. Credentials are not rotated.
    pub async fn refresh_session(&self, connection_id: &ConnectionId) -> Result<Identity, AuthError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(connection_id)
            .ok_or_else(|| AuthError::NoSession(connection_id.clone()))?;
        let identity = self.verify(Some(&session.token))?;
        session.identity = identity.clone();
        session.last_activity = Utc::now();
        Ok(identity)
    }

    pub async fn close_session(&self, connection_id: &ConnectionId) -> bool {
        self.sessions.write().await.remove(connection_id).is_some()
    }

    pub async fn session(&self, connection_id: &ConnectionId) -> Option<Session> {
        self.sessions.read().await.get(connection_id).cloned()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn check_permission(
        &self,
        connection_id: &ConnectionId,
        action: &'static str,
    ) -> Result<(), RealtimeError> {
        if required_permission(action).is_none() {
            return Ok(());
        }
        let sessions = self.sessions.read().await;
        let session = sessions
            .get(connection_id)
            .ok_or_else(|| AuthError::NoSession(connection_id.clone()))?;
        session.identity.allows(action)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn authenticator() -> Authenticator {
        let config = Config {
            jwt_secret: "test-secret".into(),
            jwt_leeway_secs: 0,
            ..Config::default()
        };
        Authenticator::new(&config)
    }

    #[test]
    fn test_verify_round_trips_claims() {
        let auth = authenticator();
        let claims = Claims::new("user-7", 3600)
            .with_username("ada")
            .with_roles(["editor"])
            .with_permissions(["sheets.edit"]);
        let token = auth.issue_token(&claims).unwrap();

        let identity = auth.verify(Some(&token)).unwrap();
        assert_eq!(identity.user_id, "user-7");
        assert_eq!(identity.username.as_deref(), Some("ada"));
        assert!(identity.permissions.contains("sheets.edit"));
        assert!(!identity.is_admin());
    }

    #[test]
    fn test_verify_rejects_missing_bad_and_expired_tokens() {
        let auth = authenticator();
        assert!(matches!(auth.verify(None), Err(AuthError::MissingToken)));
        assert!(matches!(auth.verify(Some("invalid.token.here")), Err(AuthError::Invalid(_))));

        let mut claims = Claims::new("user-7", 0);
        claims.exp = claims.iat.saturating_sub(120);
        let expired = auth.issue_token(&claims).unwrap();
        assert!(matches!(auth.verify(Some(&expired)), Err(AuthError::Expired)));

        let other = Authenticator::new(&Config {
            jwt_secret: "another-secret".into(),
            ..Config::default()
        });
        let foreign = other.issue_token(&Claims::new("user-7", 3600)).unwrap();
        assert!(matches!(auth.verify(Some(&foreign)), Err(AuthError::Invalid(_))));
    }

    #[test]
    fn test_permission_allow_list() {
        let editor = Identity::from(Claims::new("u1", 60).with_permissions(["sheets.edit"]));
        assert!(editor.allows("cell_update").is_ok());
        assert!(editor.allows("cursor_move").is_ok());
        let err = editor.allows("ai_request").unwrap_err();
        assert_eq!(err.permission, "ai.use");

        let admin = Identity::from(Claims::new("root", 60).with_roles([ADMIN_ROLE]));
        assert!(admin.allows("file_upload_start").is_ok());
    }

    #[test]
    fn test_extract_token_prefers_query() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer header-token"));
        assert_eq!(extract_token(Some("query-token"), &headers).as_deref(), Some("query-token"));
        assert_eq!(extract_token(None, &headers).as_deref(), Some("header-token"));
        assert_eq!(extract_token(Some(""), &HeaderMap::new()), None);
    }

    #[tokio::test]
    async fn test_sessions_refresh_and_close() {
        let auth = authenticator();
        let token = auth.issue_token(&Claims::new("u1", 3600)).unwrap();
        let identity = auth.verify(Some(&token)).unwrap();
        let connection_id = "c1".to_string();

        auth.open_session(&connection_id, identity, token).await;
        assert_eq!(auth.refresh_session(&connection_id).await.unwrap().user_id, "u1");
        assert!(auth.check_permission(&connection_id, "ping").await.is_ok());
        assert!(matches!(
            auth.check_permission(&connection_id, "cell_update").await,
            Err(RealtimeError::Permission(_))
        ));

        assert!(auth.close_session(&connection_id).await);
        assert!(matches!(
            auth.check_permission(&connection_id, "ai_request").await,
            Err(RealtimeError::Auth(AuthError::NoSession(_)))
        ));
        assert!(matches!(
            auth.refresh_session(&connection_id).await,
            Err(AuthError::NoSession(_))
        ));
    }
}
