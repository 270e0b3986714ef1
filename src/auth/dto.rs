use serde::{Deserialize, Serialize};

use super::repo_types::User;

/// Form body for `POST /user/login`.
#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub email: String,
    pub password: String,
}

/// Form body for `POST /user/register`.
#[derive(Debug, Deserialize)]
pub struct RegisterForm {
    pub email: String,
    pub telephone: String,
    pub password: String,
    /// Confirmation, must equal `password`.
    pub password2: String,
}

#[derive(Debug, Deserialize)]
pub struct EmailForm {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct ProfileForm {
    #[serde(rename = "avatarUrl", default)]
    pub avatar_url: String,
    #[serde(rename = "nickName", default)]
    pub nick_name: String,
}

/// Query of `GET /oauth2callback`.
#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
}

/// Public part of the user returned to the client.
#[derive(Debug, Serialize)]
pub struct PublicUser {
    pub id: i64,
    pub email: Option<String>,
    pub nickname: Option<String>,
    pub avatar_url: Option<String>,
    pub github_login_id: Option<String>,
    pub github_url: Option<String>,
    pub is_admin: bool,
    pub locked: bool,
}

impl From<User> for PublicUser {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            email: u.email,
            nickname: u.nickname,
            avatar_url: u.avatar_url,
            github_login_id: u.github_login_id,
            github_url: u.github_url,
            is_admin: u.is_admin,
            locked: u.locked,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub succeed: bool,
    pub user: PublicUser,
}

#[derive(Debug, Serialize)]
pub struct UserListResponse {
    pub succeed: bool,
    pub users: Vec<PublicUser>,
}
