use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{debug, error, warn};

use super::{
    repo_types::User,
    session::{Session, SessionKeys},
};
use crate::{error::ApiError, state::AppState};

/// Identity resolved once per request from the session.
#[derive(Debug, Clone, Default)]
pub struct CurrentUser(pub Option<User>);

/// Runs before routing: reads the session cookie, loads the user it names and
/// attaches both to the request. A stale, unknown or locked user leaves the
/// request anonymous.
pub async fn resolve_identity(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let session = SessionKeys::from_ref(&state).read(req.headers());

    let user = match session.uid {
        None => None,
        Some(uid) => match state.users.find_by_id(uid).await {
            Ok(Some(user)) if user.locked => {
                debug!(user_id = uid, "session belongs to a locked account");
                None
            }
            Ok(Some(user)) => Some(user),
            Ok(None) => {
                debug!(user_id = uid, "session names an unknown user");
                None
            }
            Err(e) => {
                error!(error = %e, user_id = uid, "identity lookup failed");
                None
            }
        },
    };

    req.extensions_mut().insert(session);
    req.extensions_mut().insert(CurrentUser(user));
    next.run(req).await
}

fn attached_user(req: &Request) -> Option<&User> {
    req.extensions()
        .get::<CurrentUser>()
        .and_then(|c| c.0.as_ref())
}

/// Guard: some user must be attached.
pub async fn require_authenticated(req: Request, next: Next) -> Response {
    if attached_user(&req).is_some() {
        return next.run(req).await;
    }
    warn!(uri = %req.uri(), "anonymous request to a members-only route");
    ApiError::Forbidden.into_response()
}

/// Guard: the attached user must be an administrator.
pub async fn require_admin(req: Request, next: Next) -> Response {
    if attached_user(&req).is_some_and(|u| u.is_admin) {
        return next.run(req).await;
    }
    warn!(uri = %req.uri(), "request to an admin route without admin scope");
    ApiError::Forbidden.into_response()
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for CurrentUser {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts.extensions.get::<CurrentUser>().cloned().unwrap_or_default())
    }
}

/// The authenticated user; rejects anonymous requests.
pub struct AuthUser(pub User);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .and_then(|c| c.0.clone())
            .map(AuthUser)
            .ok_or(ApiError::Forbidden)
    }
}
