//! Bearer-token sessions
//!
//! Users are read once from a JSON file. A successful login issues a random
//! 32-byte hex token that is valid for the configured TTL. Expired tokens are
//! purged when they are next presented and on every login.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use rand::RngCore;
use serde::Deserialize;
use tokio::time::Instant;

use crate::error::{GatewayError, GatewayResult};
use crate::model::CallerIdentity;
use crate::server::error::ApiError;
use crate::server::AppState;

/// An entry of the users file
#[derive(Debug, Clone, Deserialize)]
pub struct UserAccount {
    pub id: String,
    pub password: String,
    pub display_name: String,
    #[serde(default = "default_role")]
    pub role: String,
}

fn default_role() -> String {
    "coordinator".to_string()
}

impl UserAccount {
    fn identity(&self) -> CallerIdentity {
        CallerIdentity::new(&self.id, &self.display_name, &self.role)
    }
}

#[derive(Debug, Clone)]
struct Session {
    caller: CallerIdentity,
    issued_at: Instant,
}

/// Why a token was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenRejection {
    Unknown,
    Expired,
}

/// Known users and their live sessions
pub struct SessionStore {
    users: HashMap<String, UserAccount>,
    sessions: RwLock<HashMap<String, Session>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(users: impl IntoIterator<Item = UserAccount>, ttl: Duration) -> Self {
        Self {
            users: users.into_iter().map(|u| (u.id.clone(), u)).collect(),
            sessions: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Load users from a JSON array file
    pub fn load(path: impl AsRef<Path>, ttl: Duration) -> GatewayResult<Self> {
        let path = path.as_ref();
        let source = path.display().to_string();
        let content = std::fs::read_to_string(path)
            .map_err(|e| GatewayError::data_load(&source, e.to_string()))?;
        let users: Vec<UserAccount> = serde_json::from_str(&content)
            .map_err(|e| GatewayError::data_load(&source, format!("invalid users file: {}", e)))?;

        tracing::info!(path = %source, users = users.len(), "Users loaded");
        Ok(Self::new(users, ttl))
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    /// Check credentials and open a session. Returns the token and the caller.
    pub fn login(&self, username: &str, password: &str) -> Option<(String, CallerIdentity)> {
        let user = self.users.get(username.trim())?;
        if user.password != password.trim() {
            return None;
        }

        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        let token = hex::encode(bytes);

        let caller = user.identity();
        let now = Instant::now();
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);

        // tokens never presented again are only dropped here
        let before = sessions.len();
        sessions.retain(|_, s| now.saturating_duration_since(s.issued_at) <= self.ttl);
        let purged = before - sessions.len();

        sessions.insert(
            token.clone(),
            Session {
                caller: caller.clone(),
                issued_at: now,
            },
        );
        drop(sessions);

        tracing::info!(caller = %caller.id, purged, "Session opened");
        Some((token, caller))
    }

    /// The caller behind `token`, if the session is live
    pub fn validate(&self, token: &str) -> Result<CallerIdentity, TokenRejection> {
        let now = Instant::now();
        {
            let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
            match sessions.get(token) {
                None => return Err(TokenRejection::Unknown),
                Some(session) if now.saturating_duration_since(session.issued_at) <= self.ttl => {
                    return Ok(session.caller.clone())
                }
                Some(_) => {}
            }
        }

        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(token);
        Err(TokenRejection::Expired)
    }

    /// Revoke a token. Returns whether it was live.
    pub fn logout(&self, token: &str) -> bool {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(token)
            .is_some()
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Bearer token presented with a request, stored as a request extension
#[derive(Debug, Clone)]
pub struct SessionToken(pub String);

fn bearer_token(request: &Request) -> Option<&str> {
    request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Resolve the bearer token to a `CallerIdentity` extension, or 401.
pub async fn require_session(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(&request)
        .ok_or_else(|| {
            ApiError::Unauthorized("authentication required: send Authorization: Bearer <token>".to_string())
        })?
        .to_string();

    let caller = state.sessions.validate(&token).map_err(|rejection| match rejection {
        TokenRejection::Unknown => ApiError::Unauthorized("invalid or expired token".to_string()),
        TokenRejection::Expired => ApiError::Unauthorized("token expired, log in again".to_string()),
    })?;

    request.extensions_mut().insert(caller);
    request.extensions_mut().insert(SessionToken(token));
    Ok(next.run(request).await)
}

/// Admin-only gate. Runs after `require_session`.
pub async fn require_admin(request: Request, next: Next) -> Result<Response, ApiError> {
    match request.extensions().get::<CallerIdentity>() {
        Some(caller) if caller.is_admin() => Ok(next.run(request).await),
        Some(caller) => {
            tracing::warn!(caller = %caller.id, "Admin route refused");
            Err(ApiError::Forbidden("administrator role required".to_string()))
        }
        None => Err(ApiError::Unauthorized("authentication required".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(ttl: Duration) -> SessionStore {
        SessionStore::new(
            vec![
                UserAccount {
                    id: "orlando".to_string(),
                    password: "secret".to_string(),
                    display_name: "Orlando".to_string(),
                    role: "coordinator".to_string(),
                },
                UserAccount {
                    id: "admin".to_string(),
                    password: "root".to_string(),
                    display_name: "Administrator".to_string(),
                    role: "admin".to_string(),
                },
            ],
            ttl,
        )
    }

    #[tokio::test]
    async fn test_login_issues_hex_token() {
        let sessions = store(Duration::from_secs(60));
        let (token, caller) = sessions.login(" orlando ", "secret").unwrap();
        assert_eq!(token.len(), 64);
        assert!(token.bytes().all(|b| b.is_ascii_hexdigit()));
        assert_eq!(caller.id, "orlando");
        assert!(!caller.is_admin());
        assert_eq!(sessions.validate(&token).unwrap(), caller);

        let (other, _) = sessions.login("orlando", "secret").unwrap();
        assert_ne!(token, other);
    }

    #[tokio::test]
    async fn test_bad_credentials() {
        let sessions = store(Duration::from_secs(60));
        assert!(sessions.login("orlando", "wrong").is_none());
        assert!(sessions.login("nobody", "secret").is_none());
        assert_eq!(sessions.active_sessions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_token_is_purged() {
        let sessions = store(Duration::from_secs(60));
        let (token, _) = sessions.login("admin", "root").unwrap();

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(sessions.validate(&token).is_ok());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(sessions.validate(&token), Err(TokenRejection::Expired));
        assert_eq!(sessions.active_sessions(), 0);
        assert_eq!(sessions.validate(&token), Err(TokenRejection::Unknown));
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_sweeps_abandoned_sessions() {
        let sessions = store(Duration::from_secs(60));
        for _ in 0..5 {
            sessions.login("orlando", "secret").unwrap();
        }
        assert_eq!(sessions.active_sessions(), 5);

        tokio::time::advance(Duration::from_secs(30)).await;
        let (recent, _) = sessions.login("admin", "root").unwrap();

        tokio::time::advance(Duration::from_secs(31)).await;
        let (latest, _) = sessions.login("orlando", "secret").unwrap();
        assert_eq!(sessions.active_sessions(), 2);
        assert!(sessions.validate(&recent).is_ok());
        assert!(sessions.validate(&latest).is_ok());
    }

    #[tokio::test]
    async fn test_logout_revokes() {
        let sessions = store(Duration::from_secs(60));
        let (token, _) = sessions.login("orlando", "secret").unwrap();
        assert!(sessions.logout(&token));
        assert!(!sessions.logout(&token));
        assert_eq!(sessions.validate(&token), Err(TokenRejection::Unknown));
    }

    #[test]
    fn test_load_users_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.json");
        std::fs::write(
            &path,
            r#"[{"id": "ana", "password": "pw", "display_name": "Ana"}]"#,
        )
        .unwrap();

        let sessions = SessionStore::load(&path, Duration::from_secs(60)).unwrap();
        assert_eq!(sessions.user_count(), 1);

        let err = SessionStore::load(dir.path().join("missing.json"), Duration::from_secs(60));
        assert!(matches!(err, Err(GatewayError::DataLoad { .. })));
    }
}
