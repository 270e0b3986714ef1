use lazy_static::lazy_static;
use regex::Regex;
use tracing::{info, warn};

use super::{
    dto::{LoginForm, ProfileForm, RegisterForm},
    password::{hash_password, verify_dummy, verify_password},
    repo::UserRepo,
    repo_types::{NewLocalUser, User},
};
use crate::error::{ApiError, ApiResult};

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub(crate) fn is_valid_telephone(telephone: &str) -> bool {
    lazy_static! {
        static ref PHONE_RE: Regex = Regex::new(r"^1[34578][0-9]{9}$").unwrap();
    }
    PHONE_RE.is_match(telephone)
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn valid_password_length(password: &str) -> bool {
    (6..=12).contains(&password.chars().count())
}

/// Email + password login. The locked check runs only after the credential
/// matched, so a locked account is reported as such.
pub async fn login(users: &dyn UserRepo, form: &LoginForm) -> ApiResult<User> {
    let email = normalize_email(&form.email);
    if !is_valid_email(&email) || !valid_password_length(&form.password) {
        return Err(ApiError::validation("input params error"));
    }

    // misses still pay for one Argon2 verification
    let Some(user) = users.find_by_email(&email).await? else {
        verify_dummy(&email, &form.password);
        warn!(email = %email, "login unknown email");
        return Err(ApiError::InvalidCredentials);
    };
    let Some(stored) = user.password_hash.as_deref() else {
        verify_dummy(&email, &form.password);
        warn!(user_id = user.id, "login on account without password");
        return Err(ApiError::InvalidCredentials);
    };
    if !verify_password(&email, &form.password, stored)? {
        warn!(user_id = user.id, "login invalid password");
        return Err(ApiError::InvalidCredentials);
    }
    if user.locked {
        warn!(user_id = user.id, "login on locked account");
        return Err(ApiError::AccountLocked);
    }

    info!(user_id = user.id, "user logged in");
    Ok(user)
}

/// Creates a local account. While the site has no administrator, the new
/// account becomes one; the store decides this together with the insert.
pub async fn register(users: &dyn UserRepo, form: &RegisterForm) -> ApiResult<User> {
    let email = normalize_email(&form.email);
    if !is_valid_email(&email) {
        return Err(ApiError::validation("invalid email"));
    }
    if !is_valid_telephone(form.telephone.trim()) {
        return Err(ApiError::validation("invalid telephone"));
    }
    if !valid_password_length(&form.password) {
        return Err(ApiError::validation("password must be 6 to 12 characters"));
    }
    if form.password != form.password2 {
        return Err(ApiError::validation("passwords do not match"));
    }

    let new = NewLocalUser {
        password_hash: hash_password(&email, &form.password)?,
        email,
        telephone: form.telephone.trim().to_string(),
    };
    let user = users.create_local(new).await?.ok_or(ApiError::EmailTaken)?;
    info!(user_id = user.id, is_admin = user.is_admin, "user registered");
    Ok(user)
}

pub async fn update_profile(users: &dyn UserRepo, user: &User, form: &ProfileForm) -> ApiResult<()> {
    users
        .update_profile(user.id, form.avatar_url.trim(), form.nick_name.trim())
        .await?;
    Ok(())
}

pub async fn bind_email(users: &dyn UserRepo, user: &User, email: &str) -> ApiResult<User> {
    let email = normalize_email(email);
    if !is_valid_email(&email) {
        return Err(ApiError::validation("input param err"));
    }
    if user.has_email() {
        return Err(ApiError::Conflict("email have bound".into()));
    }
    if users.find_by_email(&email).await?.is_some() {
        return Err(ApiError::EmailTaken);
    }
    users
        .set_email(user.id, Some(&email))
        .await?
        .ok_or(ApiError::EmailTaken)
}

pub async fn unbind_email(users: &dyn UserRepo, user: &User) -> ApiResult<()> {
    if !user.has_email() {
        return Err(ApiError::Conflict("email haven't bound".into()));
    }
    users.set_email(user.id, None).await?;
    Ok(())
}

pub async fn unbind_external(users: &dyn UserRepo, user: &User) -> ApiResult<()> {
    if !user.has_external_identity() {
        return Err(ApiError::Conflict("github haven't bound".into()));
    }
    users.clear_external(user.id).await?;
    info!(user_id = user.id, "external identity unbound");
    Ok(())
}

pub async fn toggle_lock(users: &dyn UserRepo, user_id: i64) -> ApiResult<User> {
    let user = users.toggle_lock(user_id).await?.ok_or(ApiError::NotFound)?;
    info!(user_id, locked = user.locked, "lock state changed");
    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryUsers;

    fn register_form(email: &str, password: &str) -> RegisterForm {
        RegisterForm {
            email: email.into(),
            telephone: "13812345678".into(),
            password: password.into(),
            password2: password.into(),
        }
    }

    fn login_form(email: &str, password: &str) -> LoginForm {
        LoginForm {
            email: email.into(),
            password: password.into(),
        }
    }

    #[test]
    fn validators() {
        assert!(is_valid_email("c@x.com"));
        assert!(!is_valid_email("c@x"));
        assert!(!is_valid_email("not an email"));
        assert!(is_valid_telephone("13812345678"));
        assert!(!is_valid_telephone("12812345678"));
        assert!(!is_valid_telephone("1381234567"));
    }

    #[tokio::test]
    async fn register_then_login() {
        let users = InMemoryUsers::default();
        let created = register(&users, &register_form("C@X.com ", "secret1")).await.unwrap();
        assert_eq!(created.email.as_deref(), Some("c@x.com"));
        assert!(created.is_admin, "first account administers the site");

        let user = login(&users, &login_form("c@x.com", "secret1")).await.unwrap();
        assert_eq!(user.id, created.id);

        let second = register(&users, &register_form("d@x.com", "secret1")).await.unwrap();
        assert!(!second.is_admin);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_registrations_make_one_admin() {
        use std::sync::Arc;
        use tokio::sync::Barrier;

        let users = Arc::new(InMemoryUsers::default());
        let barrier = Arc::new(Barrier::new(8));
        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let (users, barrier) = (users.clone(), barrier.clone());
                tokio::spawn(async move {
                    barrier.wait().await;
                    register(users.as_ref(), &register_form(&format!("u{i}@x.com"), "secret1")).await
                })
            })
            .collect();
        let mut admins = 0;
        for task in tasks {
            if task.await.unwrap().unwrap().is_admin {
                admins += 1;
            }
        }
        assert_eq!(admins, 1);
        assert_eq!(users.list().await.unwrap().iter().filter(|u| u.is_admin).count(), 1);
    }

    #[tokio::test]
    async fn github_first_account_does_not_take_the_admin_seat() {
        let users = InMemoryUsers::default();
        let external = users
            .first_or_create_external(&crate::auth::repo_types::ExternalProfile {
                login: "octo".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(!external.is_admin);

        let local = register(&users, &register_form("c@x.com", "secret1")).await.unwrap();
        assert!(local.is_admin);
    }

    #[tokio::test]
    async fn register_rejects_taken_email_and_bad_input() {
        let users = InMemoryUsers::default();
        register(&users, &register_form("c@x.com", "secret1")).await.unwrap();

        let err = register(&users, &register_form("c@x.com", "other12")).await.unwrap_err();
        assert!(matches!(err, ApiError::EmailTaken));

        let err = register(&users, &register_form("c@x.com", "12345")).await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));

        let mut mismatch = register_form("e@x.com", "secret1");
        mismatch.password2 = "secret2".into();
        assert!(matches!(register(&users, &mismatch).await, Err(ApiError::Validation(_))));
    }

    #[tokio::test]
    async fn wrong_password_and_unknown_email_look_the_same() {
        let users = InMemoryUsers::default();
        register(&users, &register_form("c@x.com", "secret1")).await.unwrap();

        let wrong = login(&users, &login_form("c@x.com", "secret2")).await.unwrap_err();
        let unknown = login(&users, &login_form("z@x.com", "secret1")).await.unwrap_err();
        assert_eq!(wrong.to_string(), unknown.to_string());
        assert!(matches!(wrong, ApiError::InvalidCredentials));
    }

    #[tokio::test]
    async fn unknown_email_costs_a_password_verification() {
        use std::time::Instant;

        let users = InMemoryUsers::default();
        register(&users, &register_form("c@x.com", "secret1")).await.unwrap();
        // warm the lazily built throwaway hash
        let _ = login(&users, &login_form("w@x.com", "secret1")).await;

        let started = Instant::now();
        let _ = login(&users, &login_form("c@x.com", "secret2")).await;
        let wrong = started.elapsed();

        let started = Instant::now();
        let err = login(&users, &login_form("z@x.com", "secret2")).await.unwrap_err();
        let unknown = started.elapsed();

        assert!(matches!(err, ApiError::InvalidCredentials));
        assert!(unknown * 4 >= wrong, "unknown {unknown:?} vs wrong password {wrong:?}");
    }

    #[tokio::test]
    async fn account_without_password_is_rejected_like_unknown() {
        let users = InMemoryUsers::default();
        let external = users
            .first_or_create_external(&crate::auth::repo_types::ExternalProfile {
                login: "octo".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        bind_email(&users, &external, "octo@x.com").await.unwrap();

        let err = login(&users, &login_form("octo@x.com", "secret1")).await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidCredentials));
    }

    #[tokio::test]
    async fn locked_user_cannot_log_in_with_correct_password() {
        let users = InMemoryUsers::default();
        let user = register(&users, &register_form("c@x.com", "secret1")).await.unwrap();
        toggle_lock(&users, user.id).await.unwrap();

        let err = login(&users, &login_form("c@x.com", "secret1")).await.unwrap_err();
        assert!(matches!(err, ApiError::AccountLocked));

        let unlocked = toggle_lock(&users, user.id).await.unwrap();
        assert!(!unlocked.locked);
        assert!(login(&users, &login_form("c@x.com", "secret1")).await.is_ok());
    }

    #[tokio::test]
    async fn email_binding_rules() {
        let users = InMemoryUsers::default();
        let taken = register(&users, &register_form("c@x.com", "secret1")).await.unwrap();
        let external = users
            .first_or_create_external(&crate::auth::repo_types::ExternalProfile {
                login: "octo".into(),
                ..Default::default()
            })
            .await
            .unwrap();

        let err = bind_email(&users, &external, "c@x.com").await.unwrap_err();
        assert!(matches!(err, ApiError::EmailTaken));

        let bound = bind_email(&users, &external, "octo@x.com").await.unwrap();
        assert_eq!(bound.email.as_deref(), Some("octo@x.com"));
        assert!(matches!(
            bind_email(&users, &bound, "again@x.com").await,
            Err(ApiError::Conflict(_))
        ));

        unbind_email(&users, &bound).await.unwrap();
        let reloaded = users.find_by_id(bound.id).await.unwrap().unwrap();
        assert_eq!(reloaded.email, None);
        assert!(unbind_email(&users, &reloaded).await.is_err());

        assert!(matches!(unbind_external(&users, &taken).await, Err(ApiError::Conflict(_))));
        unbind_external(&users, &reloaded).await.unwrap();
        let reloaded = users.find_by_id(bound.id).await.unwrap().unwrap();
        assert!(!reloaded.has_external_identity());
    }

    #[tokio::test]
    async fn toggle_lock_unknown_user() {
        let users = InMemoryUsers::default();
        assert!(matches!(toggle_lock(&users, 404).await, Err(ApiError::NotFound)));
    }
}
