use std::time::Duration;

use tracing::{error, info, warn};

use super::{
    oauth::IdentityProvider,
    repo::UserRepo,
    repo_types::{ExternalProfile, User},
    session::Session,
};
use crate::{
    config::GithubConfig,
    error::{ApiError, ApiResult},
};

/// Consumes the session nonce and compares it with the `state` echoed by the
/// provider. The nonce is gone afterwards whatever the result.
pub fn check_state(session: &mut Session, returned: Option<&str>) -> ApiResult<()> {
    let expected = session.take_oauth_state();
    match (expected.as_deref(), returned) {
        (Some(expected), Some(returned)) if !returned.is_empty() && expected == returned => Ok(()),
        (expected, _) => {
            warn!(
                has_session_state = expected.is_some(),
                has_returned_state = returned.is_some_and(|r| !r.is_empty()),
                "oauth state check failed"
            );
            Err(ApiError::StateMismatch)
        }
    }
}

/// Exchanges the code and fetches the profile within `timeout`. Nothing is
/// written here, so a failure or timeout leaves no partial state behind.
pub async fn fetch_external_profile(
    provider: &dyn IdentityProvider,
    cfg: &GithubConfig,
    code: &str,
    timeout: Duration,
) -> ApiResult<ExternalProfile> {
    let exchange = async {
        let token = provider.exchange_code(cfg, code).await.map_err(|e| {
            error!(error = %e, "oauth code exchange failed");
            ApiError::Upstream(format!("token exchange: {e}"))
        })?;
        provider.fetch_profile(cfg, &token).await.map_err(|e| {
            error!(error = %e, "oauth profile fetch failed");
            ApiError::Upstream(format!("profile fetch: {e}"))
        })
    };

    tokio::time::timeout(timeout, exchange).await.unwrap_or_else(|_| {
        error!(timeout_secs = timeout.as_secs(), "oauth provider timed out");
        Err(ApiError::Upstream("provider timed out".into()))
    })
}

/// Decides what an external profile means for the current request.
///
/// With a signed-in user the profile is bound to that account, unless another
/// account already owns it. Without one, the account bound to the profile is
/// used, or created. Locked accounts are refused on both paths.
pub async fn link_or_login(
    users: &dyn UserRepo,
    current: Option<&User>,
    profile: &ExternalProfile,
) -> ApiResult<User> {
    if let Some(current) = current {
        if current.locked {
            return Err(ApiError::AccountLocked);
        }
        if let Some(owner) = users.find_by_external_id(&profile.login).await? {
            if owner.id != current.id {
                warn!(user_id = current.id, owner_id = owner.id, "external identity bound elsewhere");
                return Err(ApiError::IdentityAlreadyBound);
            }
        }
        let user = users
            .bind_external(current.id, profile)
            .await?
            .ok_or(ApiError::IdentityAlreadyBound)?;
        info!(user_id = user.id, "external identity linked");
        return Ok(user);
    }

    let user = users.first_or_create_external(profile).await?;
    if user.locked {
        warn!(user_id = user.id, "locked account tried external login");
        return Err(ApiError::AccountLocked);
    }
    info!(user_id = user.id, "external login");
    Ok(user)
}
