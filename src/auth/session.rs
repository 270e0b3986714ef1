//! Client-side session carried in a signed cookie.
//!
//! The session holds at most the authenticated user id and, while an external
//! login is in flight, the anti-forgery nonce sent to the provider as `state`.

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts, HeaderMap, HeaderValue},
};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use tracing::debug;

use crate::{config::SessionConfig, error::ApiError, state::AppState};

pub const SESSION_COOKIE: &str = "quillpost_session";
const ISSUER: &str = "quillpost-session";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth_state: Option<String>,
}

impl Session {
    pub fn is_empty(&self) -> bool {
        self.uid.is_none() && self.oauth_state.is_none()
    }

    pub fn clear(&mut self) {
        *self = Session::default();
    }

    /// Replaces whatever the session held with a single authenticated user.
    pub fn login(&mut self, user_id: i64) {
        self.clear();
        self.uid = Some(user_id);
    }

    /// Generates a fresh anti-forgery nonce, discarding any previous one.
    pub fn begin_oauth(&mut self) -> String {
        let mut raw = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut raw);
        let nonce = hex::encode(raw);
        self.oauth_state = Some(nonce.clone());
        nonce
    }

    /// Removes the nonce; it is single-use whatever the caller does next.
    pub fn take_oauth_state(&mut self) -> Option<String> {
        self.oauth_state.take()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SessionClaims {
    #[serde(flatten)]
    session: Session,
    iat: usize,
    exp: usize,
    iss: String,
}

#[derive(Clone)]
pub struct SessionKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
    secure: bool,
}

impl FromRef<AppState> for SessionKeys {
    fn from_ref(state: &AppState) -> Self {
        Self::new(&state.config.session)
    }
}

impl SessionKeys {
    pub fn new(cfg: &SessionConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(cfg.secret.as_bytes()),
            decoding: DecodingKey::from_secret(cfg.secret.as_bytes()),
            ttl: Duration::days(cfg.ttl_days),
            secure: cfg.cookie_secure,
        }
    }

    pub fn encode(&self, session: &Session) -> anyhow::Result<String> {
        let now = OffsetDateTime::now_utc();
        let claims = SessionClaims {
            session: session.clone(),
            iat: now.unix_timestamp() as usize,
            exp: (now + self.ttl).unix_timestamp() as usize,
            iss: ISSUER.to_string(),
        };
        Ok(encode(&Header::default(), &claims, &self.encoding)?)
    }

    pub fn decode(&self, token: &str) -> anyhow::Result<Session> {
        let mut validation = Validation::default();
        validation.set_issuer(&[ISSUER]);
        let data = decode::<SessionClaims>(token, &self.decoding, &validation)?;
        Ok(data.claims.session)
    }

    /// Reads the session cookie; a missing, forged or expired cookie is an empty session.
    pub fn read(&self, headers: &HeaderMap) -> Session {
        let Some(token) = cookie_value(headers, SESSION_COOKIE) else {
            return Session::default();
        };
        match self.decode(token) {
            Ok(session) => session,
            Err(e) => {
                debug!(error = %e, "discarding unreadable session cookie");
                Session::default()
            }
        }
    }

    /// `Set-Cookie` value persisting `session`; an empty session expires the cookie.
    pub fn cookie(&self, session: &Session) -> anyhow::Result<HeaderValue> {
        let (value, max_age) = if session.is_empty() {
            (String::new(), 0)
        } else {
            (self.encode(session)?, self.ttl.whole_seconds())
        };
        let mut cookie =
            format!("{SESSION_COOKIE}={value}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age}");
        if self.secure {
            cookie.push_str("; Secure");
        }
        Ok(HeaderValue::from_str(&cookie)?)
    }
}

fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v)
        .filter(|v| !v.is_empty())
}

/// The session as read at the start of the request. Handlers that change it
/// must send back `SessionKeys::cookie`.
#[async_trait]
impl<S> FromRequestParts<S> for Session
where
    S: Send + Sync,
    SessionKeys: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(session) = parts.extensions.get::<Session>() {
            return Ok(session.clone());
        }
        Ok(SessionKeys::from_ref(state).read(&parts.headers))
    }
}
