use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{Html, IntoResponse, Response};
use axum::{Form, Json};
use chrono::{DateTime, Duration, Utc};
use pbkdf2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use pbkdf2::Pbkdf2;
use rand::{thread_rng, Rng};
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use crate::io::{read_io_file, write_io_file};
use crate::state::AppState;
use crate::{breaks, proceeds, Error, Payload};

pub const ADMIN_USERNAME: &str = "admin";
pub const DEFAULT_PASSWORD: &str = "password";
pub const SESSION_COOKIE: &str = "session";

/// Paths reachable without a session, each with everything below it.
pub const PUBLIC_PATHS: [&str; 3] = ["/login", "/auth", "/logout"];

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum AuthResult {
    Success,
    SessionExpired,
    InvalidSession,
}

/// Longest accepted session lifetime, one year.
pub const MAX_SESSION_AGE_SECS: i64 = 365 * 24 * 60 * 60;

/// Live administrator sessions, keyed by session id.
pub struct Sessions {
    max_age: Duration,
    active: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl Sessions {
    pub fn new(max_age_secs: i64) -> Result<Self, Error> {
        let max_age = Some(max_age_secs)
            .filter(|secs| (1..=MAX_SESSION_AGE_SECS).contains(secs))
            .and_then(Duration::try_seconds)
            .ok_or_else(|| {
                Error::invalid(format!(
                    "Session lifetime must be between 1 and {} seconds, got {}",
                    MAX_SESSION_AGE_SECS, max_age_secs
                ))
            })?;
        Ok(Self {
            max_age,
            active: RwLock::new(HashMap::new()),
        })
    }

    pub fn max_age_secs(&self) -> i64 {
        self.max_age.num_seconds()
    }

    pub async fn open(&self) -> Result<String, Error> {
        let ssid_bytes: [u8; 32] = thread_rng().gen();

        let mut hasher: Sha256 = Digest::new();
        hasher.update(ssid_bytes);
        let ssid = hex::encode(hasher.finalize());

        let now = Utc::now();
        let expires_at = now
            .checked_add_signed(self.max_age)
            .ok_or_else(|| Error::internal("SessionError", "Session expiry out of range"))?;

        let mut active = self.active.write().await;
        active.retain(|_, expires_at| *expires_at > now);
        active.insert(ssid.clone(), expires_at);
        Ok(ssid)
    }

    pub async fn active_count(&self) -> usize {
        self.active.read().await.len()
    }

    pub async fn check(&self, session_id: Option<&str>) -> AuthResult {
        let ssid = match session_id {
            Some(ssid) if !ssid.is_empty() => ssid,
            _ => return AuthResult::InvalidSession,
        };

        let expires_at = match self.active.read().await.get(ssid) {
            Some(expires_at) => *expires_at,
            None => return AuthResult::InvalidSession,
        };
        if Utc::now() > expires_at {
            self.active.write().await.remove(ssid);
            return AuthResult::SessionExpired;
        }
        AuthResult::Success
    }

    pub async fn drop_session(&self, session_id: &str) -> bool {
        self.active.write().await.remove(session_id).is_some()
    }
}

/// The administrator password, kept as a PBKDF2 hash. A file holding a bare
/// password is still accepted and gets hashed on the next change.
pub struct PasswordFile {
    path: PathBuf,
}

impl PasswordFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    async fn stored(&self) -> Result<Option<String>, Error> {
        let bytes = match read_io_file(&self.path).await? {
            Some(bytes) => bytes,
            None => return Ok(None),
        };
        let text = String::from_utf8_lossy(&bytes);
        Ok(Some(
            text.trim_end_matches(|c| c == '\r' || c == '\n').to_string(),
        ))
    }

    pub async fn verify(&self, candidate: &str) -> Result<bool, Error> {
        let stored = match self.stored().await? {
            Some(stored) => stored,
            None => return Ok(candidate == DEFAULT_PASSWORD),
        };
        let matches = match PasswordHash::new(&stored) {
            Ok(hash) => Pbkdf2.verify_password(candidate.as_bytes(), &hash).is_ok(),
            Err(_) => stored == candidate,
        };
        Ok(matches)
    }

    pub async fn replace(&self, password: &str) -> Result<(), Error> {
        let hash = Pbkdf2
            .hash_password(password.as_bytes(), &SaltString::generate(&mut OsRng))?
            .to_string();
        write_io_file(&self.path, hash.as_bytes()).await?;
        Ok(())
    }
}

pub fn is_public(path: &str) -> bool {
    PUBLIC_PATHS.iter().any(|public| {
        path == *public
            || path
                .strip_prefix(public)
                .map_or(false, |rest| rest.starts_with('/'))
    })
}

pub fn session_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.to_string())
}

fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}

fn found_with_cookie(location: &str, cookie: String) -> Response {
    (
        StatusCode::FOUND,
        [
            (header::LOCATION, location.to_string()),
            (header::SET_COOKIE, cookie),
        ],
    )
        .into_response()
}

pub async fn require_session(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    if is_public(request.uri().path()) {
        return next.run(request).await;
    }

    let ssid = session_cookie(request.headers());
    match state.sessions.check(ssid.as_deref()).await {
        AuthResult::Success => next.run(request).await,
        result => {
            log::debug!(
                "{:?} for {} {}, redirecting to login",
                result,
                request.method(),
                request.uri().path()
            );
            found("/login")
        }
    }
}

const LOGIN_PAGE: &str = r#"<!DOCTYPE html>
<html lang="fr">
<head><meta charset="utf-8"><title>Auto École - Connexion</title></head>
<body>
<form method="post" action="/auth">
<label>Nom d'utilisateur <input name="username" autocomplete="username"></label>
<label>Mot de passe <input name="password" type="password" autocomplete="current-password"></label>
<button type="submit">Se connecter</button>
</form>
</body>
</html>
"#;

pub async fn login_page() -> Html<&'static str> {
    Html(LOGIN_PAGE)
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginAdmin {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

pub async fn authenticate(
    State(state): State<Arc<AppState>>,
    Form(login): Form<LoginAdmin>,
) -> Result<Response, Error> {
    if login.username != ADMIN_USERNAME || !state.passwords.verify(&login.password).await? {
        log::warn!("Failed login attempt for `{}`", login.username);
        return Ok(found("/login?error=1"));
    }

    let ssid = state.sessions.open().await?;
    log::info!("Administrator logged in");
    let cookie = format!(
        "{}={}; Path=/; HttpOnly; SameSite=Strict; Max-Age={}",
        SESSION_COOKIE,
        ssid,
        state.sessions.max_age_secs()
    );
    Ok(found_with_cookie("/", cookie))
}

pub async fn logout(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Some(ssid) = session_cookie(&headers) {
        state.sessions.drop_session(&ssid).await;
    }
    let cookie = format!("{}=; Path=/; HttpOnly; SameSite=Strict; Max-Age=0", SESSION_COOKIE);
    found_with_cookie("/login", cookie)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePassword {
    #[serde(default)]
    current_password: String,
    #[serde(default)]
    new_password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PasswordChanged {
    message: &'static str,
}

pub async fn change_password(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ChangePassword>, JsonRejection>,
) -> Payload<PasswordChanged> {
    let Json(change) = payload?;
    if change.current_password.is_empty() || change.new_password.is_empty() {
        return breaks(Error::invalid(
            "Current password and new password are required",
        ));
    }
    if !state.passwords.verify(&change.current_password).await? {
        return breaks(Error::AuthenticationFailure {
            message: "Current password is incorrect".to_string(),
        });
    }

    state.passwords.replace(&change.new_password).await?;
    log::info!("Administrator password changed");
    proceeds(PasswordChanged {
        message: "Password updated successfully",
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn public_paths_cover_their_subpaths_only() {
        assert!(is_public("/login"));
        assert!(is_public("/auth"));
        assert!(is_public("/logout/now"));
        assert!(!is_public("/loginx"));
        assert!(!is_public("/students"));
        assert!(!is_public("/"));
    }

    #[test]
    fn session_cookie_is_found_among_others() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; session=abc123; lang=fr"),
        );
        assert_eq!(session_cookie(&headers).as_deref(), Some("abc123"));
        assert_eq!(session_cookie(&HeaderMap::new()), None);
    }

    #[tokio::test]
    async fn sessions_expire_and_can_be_dropped() {
        let sessions = Sessions::new(3600).unwrap();
        let ssid = sessions.open().await.unwrap();
        assert_eq!(ssid.len(), 64);
        assert_eq!(sessions.check(Some(&ssid)).await, AuthResult::Success);
        assert_eq!(sessions.check(Some("other")).await, AuthResult::InvalidSession);
        assert_eq!(sessions.check(None).await, AuthResult::InvalidSession);

        assert!(sessions.drop_session(&ssid).await);
        assert_eq!(sessions.check(Some(&ssid)).await, AuthResult::InvalidSession);

        let stale = Utc::now() - Duration::seconds(1);
        sessions.active.write().await.insert("stale".to_string(), stale);
        assert_eq!(sessions.check(Some("stale")).await, AuthResult::SessionExpired);
        assert_eq!(sessions.check(Some("stale")).await, AuthResult::InvalidSession);
    }

    #[tokio::test]
    async fn opening_a_session_sweeps_expired_ones() {
        let sessions = Sessions::new(3600).unwrap();
        let stale = Utc::now() - Duration::seconds(1);
        for ssid in ["old-1", "old-2", "old-3"] {
            sessions.active.write().await.insert(ssid.to_string(), stale);
        }

        let ssid = sessions.open().await.unwrap();
        assert_eq!(sessions.active_count().await, 1);
        assert_eq!(sessions.check(Some(&ssid)).await, AuthResult::Success);
    }

    #[test]
    fn session_lifetime_must_be_in_range() {
        assert!(Sessions::new(0).is_err());
        assert!(Sessions::new(-1).is_err());
        assert!(Sessions::new(i64::MAX).is_err());
        assert!(Sessions::new(100_000_000_000_000).is_err());
        assert!(Sessions::new(MAX_SESSION_AGE_SECS).is_ok());
    }

    #[tokio::test]
    async fn password_file_defaults_then_stores_a_hash() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("password.txt");
        let passwords = PasswordFile::new(path.clone());

        assert!(passwords.verify(DEFAULT_PASSWORD).await.unwrap());
        passwords.replace("s3cret").await.unwrap();

        let stored = std::fs::read_to_string(&path).unwrap();
        assert!(stored.starts_with("$pbkdf2"));
        assert!(passwords.verify("s3cret").await.unwrap());
        assert!(!passwords.verify(DEFAULT_PASSWORD).await.unwrap());
    }

    #[tokio::test]
    async fn plaintext_password_files_still_verify() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("password.txt");
        std::fs::write(&path, "legacy\n").unwrap();
        let passwords = PasswordFile::new(path);

        assert!(passwords.verify("legacy").await.unwrap());
        assert!(!passwords.verify("password").await.unwrap());
    }
}
