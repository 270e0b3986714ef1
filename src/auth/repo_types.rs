use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;

/// User record in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i64,
    pub email: Option<String>,          // unique when present
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,  // Argon2 PHC string, absent for external-only accounts
    pub telephone: Option<String>,
    pub nickname: Option<String>,
    pub avatar_url: Option<String>,
    pub github_login_id: Option<String>, // unique when present
    pub github_url: Option<String>,
    pub is_admin: bool,
    pub locked: bool,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl User {
    pub fn has_email(&self) -> bool {
        self.email.as_deref().is_some_and(|e| !e.is_empty())
    }

    pub fn has_external_identity(&self) -> bool {
        self.github_login_id.as_deref().is_some_and(|g| !g.is_empty())
    }
}

/// Fields for a locally registered account.
#[derive(Debug, Clone)]
pub struct NewLocalUser {
    pub email: String,
    pub telephone: String,
    pub password_hash: String,
}

/// Profile attributes taken from the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct ExternalProfile {
    pub login: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub html_url: Option<String>,
}
