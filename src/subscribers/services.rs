use time::{Duration, OffsetDateTime};
use tracing::{error, info, warn};

use super::{
    repo::SubscriberRepo,
    repo_types::{Lifecycle, Subscriber},
};
use crate::{
    auth::services::{is_valid_email, normalize_email},
    config::SubscriptionConfig,
    error::{ApiError, ApiResult},
    mail::Mailer,
    signer::{IssuedToken, TokenSigner},
    state::AppState,
};

/// What a subscribe request did. Errors are reported separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    /// New pending entry, activation mail sent.
    Created,
    /// Pending with a live link, or already subscribed. Nothing changed.
    AlreadyPending,
    /// Pending with an expired link; a fresh one was mailed.
    Reactivated,
    /// Verified earlier, subscribed again without a new link.
    Resubscribed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CampaignReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Subscriber lifecycle over borrowed dependencies.
pub struct Subscriptions<'a> {
    repo: &'a dyn SubscriberRepo,
    mailer: &'a dyn Mailer,
    signer: &'a TokenSigner,
    cfg: &'a SubscriptionConfig,
    site: &'a str,
}

impl<'a> Subscriptions<'a> {
    pub fn new(
        repo: &'a dyn SubscriberRepo,
        mailer: &'a dyn Mailer,
        signer: &'a TokenSigner,
        cfg: &'a SubscriptionConfig,
        site: &'a str,
    ) -> Self {
        Self {
            repo,
            mailer,
            signer,
            cfg,
            site,
        }
    }

    pub fn from_state(state: &'a AppState) -> Self {
        Self::new(
            state.subscribers.as_ref(),
            state.mailer.as_ref(),
            &state.signer,
            &state.config.subscription,
            &state.config.site_domain,
        )
    }

    fn activation_token(&self, email: &str, now: OffsetDateTime) -> IssuedToken {
        self.signer
            .issue_at(email, Duration::minutes(self.cfg.activation_ttl_minutes), now)
    }

    pub fn activation_link(&self, signature: &str) -> String {
        format!("{}/active?sid={}", self.site, signature)
    }

    pub fn unsubscribe_link(&self, signature: &str) -> String {
        format!("{}/unsubscribe?sid={}", self.site, signature)
    }

    pub async fn subscribe(&self, email: &str, now: OffsetDateTime) -> ApiResult<SubscribeOutcome> {
        let email = normalize_email(email);
        if !is_valid_email(&email) {
            return Err(ApiError::validation("invalid email"));
        }

        let Some(existing) = self.repo.find_by_email(&email).await? else {
            let token = self.activation_token(&email, now);
            return match self.repo.insert_pending(&email, &token).await? {
                Some(sub) => {
                    self.send_activation(&sub, &token, now).await?;
                    info!(subscriber_id = sub.id, "subscriber created");
                    Ok(SubscribeOutcome::Created)
                }
                // a concurrent request created it first
                None => Ok(SubscribeOutcome::AlreadyPending),
            };
        };

        match existing.lifecycle() {
            Lifecycle::PendingVerification if existing.token_live_at(now) => {
                Ok(SubscribeOutcome::AlreadyPending)
            }
            Lifecycle::PendingVerification => {
                let token = self.activation_token(&email, now);
                match self.repo.reissue_if_expired(existing.id, now, &token).await? {
                    Some(sub) => {
                        self.send_activation(&sub, &token, now).await?;
                        info!(subscriber_id = sub.id, "activation link reissued");
                        Ok(SubscribeOutcome::Reactivated)
                    }
                    None => Ok(SubscribeOutcome::AlreadyPending),
                }
            }
            Lifecycle::VerifiedUnsubscribed => match self.repo.resubscribe(existing.id).await? {
                Some(sub) => {
                    info!(subscriber_id = sub.id, "subscriber resubscribed");
                    Ok(SubscribeOutcome::Resubscribed)
                }
                None => Ok(SubscribeOutcome::AlreadyPending),
            },
            Lifecycle::Subscribed => Ok(SubscribeOutcome::AlreadyPending),
        }
    }

    /// Mails the activation link. On failure the token just claimed is
    /// expired so that the next subscribe request issues a new one.
    async fn send_activation(
        &self,
        sub: &Subscriber,
        token: &IssuedToken,
        now: OffsetDateTime,
    ) -> ApiResult<()> {
        let link = self.activation_link(&token.signature);
        let body = format!(
            "<p>Thanks for subscribing.</p>\
             <p><a href=\"{link}\">Confirm your subscription</a></p>\
             <p>This link expires in {} minutes.</p>",
            self.cfg.activation_ttl_minutes
        );
        if let Err(e) = self.mailer.send(&sub.email, "Confirm your subscription", &body).await {
            error!(error = %e, subscriber_id = sub.id, "activation mail failed");
            self.repo.expire_token(sub.id, &token.signature, now).await?;
            return Err(ApiError::Upstream(format!("activation mail: {e}")));
        }
        Ok(())
    }

    pub async fn activate(&self, sid: &str, now: OffsetDateTime) -> ApiResult<Subscriber> {
        if sid.is_empty() {
            return Err(ApiError::InvalidLink);
        }
        let Some(sub) = self.repo.find_by_signature(sid).await? else {
            warn!("activation with unknown signature");
            return Err(ApiError::InvalidLink);
        };
        if sub.verified {
            warn!(subscriber_id = sub.id, "activation of a verified subscriber");
            return Err(ApiError::InvalidLink);
        }
        if !sub.token_live_at(now) {
            warn!(subscriber_id = sub.id, "activation with expired link");
            return Err(ApiError::ExpiredLink);
        }
        if !self.signer.matches(&sub.email, &sub.secret_key, sub.out_time, sid) {
            warn!(subscriber_id = sub.id, "activation signature does not verify");
            return Err(ApiError::InvalidLink);
        }

        let Some(activated) = self.repo.activate(sub.id, sid, now).await? else {
            // lost to a concurrent activation or a reissue
            warn!(subscriber_id = sub.id, "activation with expired link");
            return Err(ApiError::ExpiredLink);
        };
        info!(subscriber_id = activated.id, "subscriber activated");
        Ok(activated)
    }

    /// Unsubscribe links are good for `unsubscribe_ttl_days` after the mail
    /// that carried them, and only while the row still reproduces the
    /// signature.
    pub async fn unsubscribe(&self, sid: &str, now: OffsetDateTime) -> ApiResult<Subscriber> {
        let Some(sub) = self.repo.find_by_signature(sid).await? else {
            warn!("unsubscribe with unknown signature");
            return Err(ApiError::UnsubscribeFailed);
        };
        if sub.lifecycle() != Lifecycle::Subscribed {
            warn!(subscriber_id = sub.id, "unsubscribe of an inactive subscriber");
            return Err(ApiError::UnsubscribeFailed);
        }
        if !sub.token_live_at(now) {
            warn!(subscriber_id = sub.id, "unsubscribe with expired link");
            return Err(ApiError::UnsubscribeFailed);
        }
        if !self.signer.matches(&sub.email, &sub.secret_key, sub.out_time, sid) {
            warn!(subscriber_id = sub.id, "unsubscribe signature does not verify");
            return Err(ApiError::UnsubscribeFailed);
        }

        let sub = self
            .repo
            .unsubscribe(sub.id, sid, now)
            .await?
            .ok_or(ApiError::UnsubscribeFailed)?;
        info!(subscriber_id = sub.id, "subscriber unsubscribed");
        Ok(sub)
    }

    /// Issues a fresh unsubscribe token for an active subscriber and mails
    /// `content` with the link appended. `Ok(false)` when the subscriber went
    /// inactive in the meantime.
    async fn deliver(
        &self,
        sub: &Subscriber,
        subject: &str,
        content: &str,
        now: OffsetDateTime,
    ) -> anyhow::Result<bool> {
        let token = self.signer.issue_at(
            &sub.email,
            Duration::days(self.cfg.unsubscribe_ttl_days),
            now,
        );
        if self.repo.replace_token(sub.id, &token).await?.is_none() {
            return Ok(false);
        }
        let body = format!(
            "{content}<hr/><p><a href=\"{}\">Unsubscribe</a></p>",
            self.unsubscribe_link(&token.signature)
        );
        self.mailer.send(&sub.email, subject, &body).await?;
        Ok(true)
    }

    /// Mails every verified and subscribed subscriber. Individual failures
    /// are logged and counted.
    pub async fn send_campaign(
        &self,
        subject: &str,
        content: &str,
        now: OffsetDateTime,
    ) -> ApiResult<CampaignReport> {
        let audience = self.repo.list_active().await?;
        if audience.is_empty() {
            return Err(ApiError::Conflict("no subscribers!".into()));
        }

        let mut report = CampaignReport::default();
        for sub in &audience {
            match self.deliver(sub, subject, content, now).await {
                Ok(true) => report.delivered += 1,
                Ok(false) => {}
                Err(e) => {
                    error!(error = %e, subscriber_id = sub.id, "campaign mail failed");
                    report.failed += 1;
                }
            }
        }
        info!(delivered = report.delivered, failed = report.failed, "campaign sent");
        Ok(report)
    }

    pub async fn send_direct(
        &self,
        id: i64,
        subject: &str,
        content: &str,
        now: OffsetDateTime,
    ) -> ApiResult<()> {
        let sub = self.repo.find_by_id(id).await?.ok_or(ApiError::NotFound)?;
        if sub.lifecycle() != Lifecycle::Subscribed {
            return Err(ApiError::Conflict("subscriber is not active".into()));
        }
        match self.deliver(&sub, subject, content, now).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(ApiError::Conflict("subscriber is not active".into())),
            Err(e) => Err(ApiError::Upstream(format!("direct mail: {e}"))),
        }
    }
}
