//! In-memory stores and stubs standing in for Postgres, SMTP and the OAuth
//! provider in tests.

use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use axum::{extract::FromRef, response::Response};
use time::OffsetDateTime;
use tokio::sync::Mutex;

use crate::{
    auth::{
        oauth::IdentityProvider,
        repo::UserRepo,
        repo_types::{ExternalProfile, NewLocalUser, User},
        session::{Session, SessionKeys, SESSION_COOKIE},
    },
    config::GithubConfig,
    mail::Mailer,
    signer::IssuedToken,
    state::AppState,
    subscribers::{repo::SubscriberRepo, repo_types::Subscriber},
};

#[derive(Default)]
pub struct InMemoryUsers {
    rows: Mutex<Vec<User>>,
}

fn blank_user(id: i64) -> User {
    let now = OffsetDateTime::now_utc();
    User {
        id,
        email: None,
        password_hash: None,
        telephone: None,
        nickname: None,
        avatar_url: None,
        github_login_id: None,
        github_url: None,
        is_admin: false,
        locked: false,
        created_at: now,
        updated_at: now,
    }
}

fn next_id<T>(rows: &[T], id: impl Fn(&T) -> i64) -> i64 {
    rows.iter().map(id).max().unwrap_or(0) + 1
}

#[async_trait]
impl UserRepo for InMemoryUsers {
    async fn find_by_id(&self, id: i64) -> anyhow::Result<Option<User>> {
        Ok(self.rows.lock().await.iter().find(|u| u.id == id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        Ok(self
            .rows
            .lock()
            .await
            .iter()
            .find(|u| u.email.as_deref() == Some(email))
            .cloned())
    }

    async fn find_by_external_id(&self, login: &str) -> anyhow::Result<Option<User>> {
        Ok(self
            .rows
            .lock()
            .await
            .iter()
            .find(|u| u.github_login_id.as_deref() == Some(login))
            .cloned())
    }

    async fn list(&self) -> anyhow::Result<Vec<User>> {
        Ok(self.rows.lock().await.clone())
    }

    async fn create_local(&self, new: NewLocalUser) -> anyhow::Result<Option<User>> {
        let mut rows = self.rows.lock().await;
        if rows.iter().any(|u| u.email.as_deref() == Some(new.email.as_str())) {
            return Ok(None);
        }
        let mut user = blank_user(next_id(&rows, |u| u.id));
        user.email = Some(new.email);
        user.telephone = Some(new.telephone);
        user.password_hash = Some(new.password_hash);
        user.is_admin = !rows.iter().any(|u| u.is_admin);
        rows.push(user.clone());
        Ok(Some(user))
    }

    async fn first_or_create_external(&self, profile: &ExternalProfile) -> anyhow::Result<User> {
        let mut rows = self.rows.lock().await;
        if let Some(u) = rows
            .iter()
            .find(|u| u.github_login_id.as_deref() == Some(profile.login.as_str()))
        {
            return Ok(u.clone());
        }
        let mut user = blank_user(next_id(&rows, |u| u.id));
        user.github_login_id = Some(profile.login.clone());
        user.avatar_url = profile.avatar_url.clone();
        user.github_url = profile.html_url.clone();
        rows.push(user.clone());
        Ok(user)
    }

    async fn bind_external(
        &self,
        user_id: i64,
        profile: &ExternalProfile,
    ) -> anyhow::Result<Option<User>> {
        let mut rows = self.rows.lock().await;
        let taken = rows.iter().any(|u| {
            u.id != user_id && u.github_login_id.as_deref() == Some(profile.login.as_str())
        });
        if taken {
            return Ok(None);
        }
        Ok(rows.iter_mut().find(|u| u.id == user_id).map(|u| {
            u.github_login_id = Some(profile.login.clone());
            u.avatar_url = profile.avatar_url.clone();
            u.github_url = profile.html_url.clone();
            u.clone()
        }))
    }

    async fn clear_external(&self, user_id: i64) -> anyhow::Result<()> {
        if let Some(u) = self.rows.lock().await.iter_mut().find(|u| u.id == user_id) {
            u.github_login_id = None;
        }
        Ok(())
    }

    async fn set_email(&self, user_id: i64, email: Option<&str>) -> anyhow::Result<Option<User>> {
        let mut rows = self.rows.lock().await;
        if let Some(email) = email {
            if rows
                .iter()
                .any(|u| u.id != user_id && u.email.as_deref() == Some(email))
            {
                return Ok(None);
            }
        }
        Ok(rows.iter_mut().find(|u| u.id == user_id).map(|u| {
            u.email = email.map(str::to_string);
            u.clone()
        }))
    }

    async fn update_profile(
        &self,
        user_id: i64,
        avatar_url: &str,
        nickname: &str,
    ) -> anyhow::Result<()> {
        if let Some(u) = self.rows.lock().await.iter_mut().find(|u| u.id == user_id) {
            u.avatar_url = Some(avatar_url.to_string());
            u.nickname = Some(nickname.to_string());
        }
        Ok(())
    }

    async fn toggle_lock(&self, user_id: i64) -> anyhow::Result<Option<User>> {
        Ok(self
            .rows
            .lock()
            .await
            .iter_mut()
            .find(|u| u.id == user_id)
            .map(|u| {
                u.locked = !u.locked;
                u.clone()
            }))
    }
}

#[derive(Default)]
pub struct InMemorySubscribers {
    rows: Mutex<Vec<Subscriber>>,
}

impl InMemorySubscribers {
    /// Applies `f` to the row `id` if `pred` holds, returning the updated row.
    async fn update_if(
        &self,
        id: i64,
        pred: impl Fn(&Subscriber) -> bool,
        f: impl FnOnce(&mut Subscriber),
    ) -> Option<Subscriber> {
        let mut rows = self.rows.lock().await;
        let row = rows.iter_mut().find(|s| s.id == id && pred(s))?;
        f(row);
        row.updated_at = OffsetDateTime::now_utc();
        Some(row.clone())
    }
}

fn install(row: &mut Subscriber, token: &IssuedToken) {
    row.secret_key = token.nonce.clone();
    row.signature = token.signature.clone();
    row.out_time = token.expires_at;
}

#[async_trait]
impl SubscriberRepo for InMemorySubscribers {
    async fn find_by_id(&self, id: i64) -> anyhow::Result<Option<Subscriber>> {
        Ok(self.rows.lock().await.iter().find(|s| s.id == id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<Subscriber>> {
        Ok(self.rows.lock().await.iter().find(|s| s.email == email).cloned())
    }

    async fn find_by_signature(&self, signature: &str) -> anyhow::Result<Option<Subscriber>> {
        if signature.is_empty() {
            return Ok(None);
        }
        Ok(self
            .rows
            .lock()
            .await
            .iter()
            .find(|s| s.signature == signature)
            .cloned())
    }

    async fn list(&self) -> anyhow::Result<Vec<Subscriber>> {
        Ok(self.rows.lock().await.clone())
    }

    async fn list_active(&self) -> anyhow::Result<Vec<Subscriber>> {
        Ok(self
            .rows
            .lock()
            .await
            .iter()
            .filter(|s| s.verified && s.subscribed)
            .cloned()
            .collect())
    }

    async fn count_active(&self) -> anyhow::Result<i64> {
        Ok(self.list_active().await?.len() as i64)
    }

    async fn insert_pending(&self, email: &str, token: &IssuedToken) -> anyhow::Result<Option<Subscriber>> {
        let mut rows = self.rows.lock().await;
        if rows.iter().any(|s| s.email == email) {
            return Ok(None);
        }
        let now = OffsetDateTime::now_utc();
        let mut row = Subscriber {
            id: next_id(&rows, |s| s.id),
            email: email.to_string(),
            verified: false,
            subscribed: false,
            secret_key: String::new(),
            signature: String::new(),
            out_time: now,
            created_at: now,
            updated_at: now,
        };
        install(&mut row, token);
        rows.push(row.clone());
        Ok(Some(row))
    }

    async fn reissue_if_expired(
        &self,
        id: i64,
        now: OffsetDateTime,
        token: &IssuedToken,
    ) -> anyhow::Result<Option<Subscriber>> {
        Ok(self
            .update_if(id, |s| !s.verified && s.out_time <= now, |s| install(s, token))
            .await)
    }

    async fn resubscribe(&self, id: i64) -> anyhow::Result<Option<Subscriber>> {
        Ok(self
            .update_if(id, |s| s.verified && !s.subscribed, |s| s.subscribed = true)
            .await)
    }

    async fn activate(
        &self,
        id: i64,
        signature: &str,
        now: OffsetDateTime,
    ) -> anyhow::Result<Option<Subscriber>> {
        Ok(self
            .update_if(
                id,
                |s| s.signature == signature && !s.verified && s.out_time > now,
                |s| {
                    s.verified = true;
                    s.subscribed = true;
                    s.out_time = now;
                },
            )
            .await)
    }

    async fn expire_token(&self, id: i64, signature: &str, now: OffsetDateTime) -> anyhow::Result<()> {
        self.update_if(id, |s| s.signature == signature, |s| s.out_time = now)
            .await;
        Ok(())
    }

    async fn replace_token(&self, id: i64, token: &IssuedToken) -> anyhow::Result<Option<Subscriber>> {
        Ok(self
            .update_if(id, |s| s.verified && s.subscribed, |s| install(s, token))
            .await)
    }

    async fn unsubscribe(
        &self,
        id: i64,
        signature: &str,
        now: OffsetDateTime,
    ) -> anyhow::Result<Option<Subscriber>> {
        Ok(self
            .update_if(
                id,
                |s| s.signature == signature && s.verified && s.subscribed && s.out_time > now,
                |s| s.subscribed = false,
            )
            .await)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Records every message; fails all sends while `fail(true)` is set.
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<SentMail>>,
    failing: AtomicBool,
}

impl RecordingMailer {
    pub async fn sent(&self) -> Vec<SentMail> {
        self.sent.lock().await.clone()
    }

    pub fn fail(&self, on: bool) {
        self.failing.store(on, Ordering::SeqCst);
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> anyhow::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("smtp unavailable");
        }
        self.sent.lock().await.push(SentMail {
            to: to.to_string(),
            subject: subject.to_string(),
            body: html_body.to_string(),
        });
        Ok(())
    }
}

enum StubBehavior {
    FailExchange,
    Slow(Duration),
    Return(ExternalProfile),
}

pub struct StubIdentity {
    behavior: StubBehavior,
}

impl StubIdentity {
    pub fn failing_exchange() -> Self {
        Self {
            behavior: StubBehavior::FailExchange,
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            behavior: StubBehavior::Slow(delay),
        }
    }

    pub fn returning(profile: ExternalProfile) -> Self {
        Self {
            behavior: StubBehavior::Return(profile),
        }
    }
}

#[async_trait]
impl IdentityProvider for StubIdentity {
    async fn exchange_code(&self, _cfg: &GithubConfig, code: &str) -> anyhow::Result<String> {
        match &self.behavior {
            StubBehavior::FailExchange => anyhow::bail!("bad_verification_code"),
            StubBehavior::Slow(delay) => {
                tokio::time::sleep(*delay).await;
                Ok(format!("token-for-{code}"))
            }
            StubBehavior::Return(_) => Ok(format!("token-for-{code}")),
        }
    }

    async fn fetch_profile(&self, _cfg: &GithubConfig, _token: &str) -> anyhow::Result<ExternalProfile> {
        match &self.behavior {
            StubBehavior::Return(profile) => Ok(profile.clone()),
            _ => anyhow::bail!("no profile"),
        }
    }
}

/// `Cookie` header value carrying a session for `uid`.
pub fn cookie_for(state: &AppState, uid: i64) -> String {
    let mut session = Session::default();
    session.login(uid);
    let token = SessionKeys::from_ref(state).encode(&session).unwrap();
    format!("{SESSION_COOKIE}={token}")
}

pub async fn json_body(res: Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
