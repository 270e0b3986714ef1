use std::time::Duration;

use axum::{
    extract::{FromRef, Path, Query, State},
    http::header,
    middleware,
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde_json::{json, Value};
use tracing::{error, info, instrument};

use super::{
    dto::{CallbackQuery, EmailForm, LoginForm, ProfileForm, PublicUser, RegisterForm, UserListResponse, UserResponse},
    extractors::{require_admin, require_authenticated, AuthUser, CurrentUser},
    linking,
    oauth::{self, Provider},
    repo_types::User,
    services,
    session::{Session, SessionKeys},
};
use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
};

const LOGIN_PAGE: &str = "/user/login";

pub fn public_routes(signup_enabled: bool) -> Router<AppState> {
    let router = Router::new()
        .route("/auth/:provider", get(auth_begin))
        .route("/oauth2callback", get(oauth_callback))
        .route("/user/login", post(login))
        .route("/user/logout", get(logout));
    if signup_enabled {
        router.route("/user/register", post(register))
    } else {
        router
    }
}

pub fn member_routes() -> Router<AppState> {
    Router::new()
        .route("/me", get(get_me))
        .route("/profile", post(update_profile))
        .route("/profile/email/bind", post(bind_email))
        .route("/profile/email/unbind", post(unbind_email))
        .route("/profile/github/unbind", post(unbind_github))
        .route_layer(middleware::from_fn(require_authenticated))
}

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users))
        .route("/user/:id/lock", post(lock_user))
        .route_layer(middleware::from_fn(require_admin))
}

fn landing(user: &User) -> &'static str {
    if user.is_admin {
        "/admin/index"
    } else {
        "/"
    }
}

fn ack() -> Json<Value> {
    Json(json!({ "succeed": true }))
}

/// Attaches the session cookie to `res`.
fn with_session(keys: &SessionKeys, session: &Session, res: impl IntoResponse) -> Response {
    match keys.cookie(session) {
        Ok(cookie) => ([(header::SET_COOKIE, cookie)], res).into_response(),
        Err(e) => {
            error!(error = %e, "session cookie encode failed");
            ApiError::Internal(e).into_response()
        }
    }
}

#[instrument(skip(state, session))]
pub async fn auth_begin(
    State(state): State<AppState>,
    mut session: Session,
    Path(provider): Path<String>,
) -> Response {
    match Provider::parse(&provider) {
        Some(p) if p.is_wired() => {
            let nonce = session.begin_oauth();
            match oauth::authorize_url(&state.config.github, &nonce) {
                Ok(url) => with_session(&SessionKeys::from_ref(&state), &session, Redirect::to(&url)),
                Err(e) => ApiError::Internal(e).into_response(),
            }
        }
        Some(_) => ApiError::NotImplemented.into_response(),
        None => Redirect::to(LOGIN_PAGE).into_response(),
    }
}

#[instrument(skip_all)]
pub async fn oauth_callback(
    State(state): State<AppState>,
    mut session: Session,
    CurrentUser(current): CurrentUser,
    Query(query): Query<CallbackQuery>,
) -> Response {
    let keys = SessionKeys::from_ref(&state);
    let had_nonce = session.oauth_state.is_some();

    if let Err(e) = linking::check_state(&mut session, query.state.as_deref()) {
        // abort without redirect; a nonce that was present is still spent
        return if had_nonce {
            with_session(&keys, &session, e)
        } else {
            e.into_response()
        };
    }

    let code = query.code.unwrap_or_default();
    if code.is_empty() {
        error!("oauth callback without code");
        return with_session(&keys, &session, Redirect::to(LOGIN_PAGE));
    }

    let timeout = Duration::from_secs(state.config.github.timeout_secs);
    let profile = match linking::fetch_external_profile(
        state.identity.as_ref(),
        &state.config.github,
        &code,
        timeout,
    )
    .await
    {
        Ok(profile) => profile,
        Err(_) => return with_session(&keys, &session, Redirect::to(LOGIN_PAGE)),
    };

    match linking::link_or_login(state.users.as_ref(), current.as_ref(), &profile).await {
        Ok(user) => {
            session.login(user.id);
            with_session(&keys, &session, Redirect::to(landing(&user)))
        }
        Err(e) => with_session(&keys, &session, e),
    }
}

#[instrument(skip(state, session, form))]
pub async fn login(
    State(state): State<AppState>,
    mut session: Session,
    Form(form): Form<LoginForm>,
) -> ApiResult<Response> {
    let user = services::login(state.users.as_ref(), &form).await?;
    session.login(user.id);
    Ok(with_session(
        &SessionKeys::from_ref(&state),
        &session,
        Redirect::to(landing(&user)),
    ))
}

#[instrument(skip(state, form))]
pub async fn register(
    State(state): State<AppState>,
    Form(form): Form<RegisterForm>,
) -> ApiResult<Json<UserResponse>> {
    let user = services::register(state.users.as_ref(), &form).await?;
    Ok(Json(UserResponse {
        succeed: true,
        user: user.into(),
    }))
}

#[instrument(skip_all)]
pub async fn logout(State(state): State<AppState>, mut session: Session) -> Response {
    session.clear();
    with_session(&SessionKeys::from_ref(&state), &session, Redirect::to(LOGIN_PAGE))
}

pub async fn get_me(AuthUser(user): AuthUser) -> Json<UserResponse> {
    Json(UserResponse {
        succeed: true,
        user: user.into(),
    })
}

#[instrument(skip(state, user, form), fields(user_id = user.id))]
pub async fn update_profile(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Form(form): Form<ProfileForm>,
) -> ApiResult<Json<Value>> {
    services::update_profile(state.users.as_ref(), &user, &form).await?;
    Ok(Json(json!({
        "succeed": true,
        "user": { "avatarUrl": form.avatar_url, "nickName": form.nick_name },
    })))
}

#[instrument(skip(state, user, form), fields(user_id = user.id))]
pub async fn bind_email(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Form(form): Form<EmailForm>,
) -> ApiResult<Json<Value>> {
    services::bind_email(state.users.as_ref(), &user, &form.email).await?;
    info!("email bound");
    Ok(ack())
}

#[instrument(skip(state, user), fields(user_id = user.id))]
pub async fn unbind_email(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> ApiResult<Json<Value>> {
    services::unbind_email(state.users.as_ref(), &user).await?;
    Ok(ack())
}

#[instrument(skip(state, user), fields(user_id = user.id))]
pub async fn unbind_github(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> ApiResult<Json<Value>> {
    services::unbind_external(state.users.as_ref(), &user).await?;
    Ok(ack())
}

#[instrument(skip(state))]
pub async fn list_users(State(state): State<AppState>) -> ApiResult<Json<UserListResponse>> {
    let users = state.users.list().await?;
    Ok(Json(UserListResponse {
        succeed: true,
        users: users.into_iter().map(PublicUser::from).collect(),
    }))
}

#[instrument(skip(state))]
pub async fn lock_user(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<UserResponse>> {
    let user = services::toggle_lock(state.users.as_ref(), id).await?;
    Ok(Json(UserResponse {
        succeed: true,
        user: user.into(),
    }))
}
