use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;

use super::repo_types::Subscriber;
use crate::signer::IssuedToken;

const SUBSCRIBER_COLUMNS: &str =
    "id, email, verified, subscribed, secret_key, signature, out_time, created_at, updated_at";

/// Subscriber persistence. Every state transition is a single conditional
/// write; `None` means the expected state no longer held.
#[async_trait]
pub trait SubscriberRepo: Send + Sync {
    async fn find_by_id(&self, id: i64) -> anyhow::Result<Option<Subscriber>>;
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<Subscriber>>;
    async fn find_by_signature(&self, signature: &str) -> anyhow::Result<Option<Subscriber>>;
    async fn list(&self) -> anyhow::Result<Vec<Subscriber>>;
    /// Verified and subscribed entries only.
    async fn list_active(&self) -> anyhow::Result<Vec<Subscriber>>;
    async fn count_active(&self) -> anyhow::Result<i64>;

    /// Creates a pending entry; `None` if the email already exists.
    async fn insert_pending(&self, email: &str, token: &IssuedToken) -> anyhow::Result<Option<Subscriber>>;

    /// Replaces the token of an unverified entry whose token expired by `now`.
    async fn reissue_if_expired(
        &self,
        id: i64,
        now: OffsetDateTime,
        token: &IssuedToken,
    ) -> anyhow::Result<Option<Subscriber>>;

    /// Verified but unsubscribed -> subscribed.
    async fn resubscribe(&self, id: i64) -> anyhow::Result<Option<Subscriber>>;

    /// Pending -> subscribed. Spends the token by moving its expiry to `now`.
    async fn activate(
        &self,
        id: i64,
        signature: &str,
        now: OffsetDateTime,
    ) -> anyhow::Result<Option<Subscriber>>;

    /// Ends the life of `signature` at `now`, if it is still the stored one.
    async fn expire_token(&self, id: i64, signature: &str, now: OffsetDateTime) -> anyhow::Result<()>;

    /// Installs a new token on an active entry.
    async fn replace_token(&self, id: i64, token: &IssuedToken) -> anyhow::Result<Option<Subscriber>>;

    /// Verified and subscribed -> unsubscribed, if `signature` is the stored
    /// one and has not expired by `now`.
    async fn unsubscribe(
        &self,
        id: i64,
        signature: &str,
        now: OffsetDateTime,
    ) -> anyhow::Result<Option<Subscriber>>;
}

#[derive(Clone)]
pub struct PgSubscriberRepo {
    db: PgPool,
}

impl PgSubscriberRepo {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    async fn fetch_where(&self, clause: &str, value: &str) -> anyhow::Result<Option<Subscriber>> {
        let row = sqlx::query_as::<_, Subscriber>(&format!(
            "SELECT {SUBSCRIBER_COLUMNS} FROM subscribers WHERE {clause}"
        ))
        .bind(value)
        .fetch_optional(&self.db)
        .await?;
        Ok(row)
    }
}

#[async_trait]
impl SubscriberRepo for PgSubscriberRepo {
    async fn find_by_id(&self, id: i64) -> anyhow::Result<Option<Subscriber>> {
        let row = sqlx::query_as::<_, Subscriber>(&format!(
            "SELECT {SUBSCRIBER_COLUMNS} FROM subscribers WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .context("find subscriber by id")?;
        Ok(row)
    }

    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<Subscriber>> {
        self.fetch_where("email = $1", email)
            .await
            .context("find subscriber by email")
    }

    async fn find_by_signature(&self, signature: &str) -> anyhow::Result<Option<Subscriber>> {
        self.fetch_where("signature = $1 AND signature <> ''", signature)
            .await
            .context("find subscriber by signature")
    }

    async fn list(&self) -> anyhow::Result<Vec<Subscriber>> {
        let rows = sqlx::query_as::<_, Subscriber>(&format!(
            "SELECT {SUBSCRIBER_COLUMNS} FROM subscribers ORDER BY id"
        ))
        .fetch_all(&self.db)
        .await
        .context("list subscribers")?;
        Ok(rows)
    }

    async fn list_active(&self) -> anyhow::Result<Vec<Subscriber>> {
        let rows = sqlx::query_as::<_, Subscriber>(&format!(
            "SELECT {SUBSCRIBER_COLUMNS} FROM subscribers WHERE verified AND subscribed ORDER BY id"
        ))
        .fetch_all(&self.db)
        .await
        .context("list active subscribers")?;
        Ok(rows)
    }

    async fn count_active(&self) -> anyhow::Result<i64> {
        let (n,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM subscribers WHERE verified AND subscribed")
                .fetch_one(&self.db)
                .await
                .context("count subscribers")?;
        Ok(n)
    }

    async fn insert_pending(&self, email: &str, token: &IssuedToken) -> anyhow::Result<Option<Subscriber>> {
        let row = sqlx::query_as::<_, Subscriber>(&format!(
            r#"
            INSERT INTO subscribers (email, secret_key, signature, out_time)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (email) DO NOTHING
            RETURNING {SUBSCRIBER_COLUMNS}
            "#
        ))
        .bind(email)
        .bind(&token.nonce)
        .bind(&token.signature)
        .bind(token.expires_at)
        .fetch_optional(&self.db)
        .await
        .context("insert subscriber")?;
        Ok(row)
    }

    async fn reissue_if_expired(
        &self,
        id: i64,
        now: OffsetDateTime,
        token: &IssuedToken,
    ) -> anyhow::Result<Option<Subscriber>> {
        let row = sqlx::query_as::<_, Subscriber>(&format!(
            r#"
            UPDATE subscribers
               SET secret_key = $3, signature = $4, out_time = $5, updated_at = now()
             WHERE id = $1 AND NOT verified AND out_time <= $2
            RETURNING {SUBSCRIBER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(now)
        .bind(&token.nonce)
        .bind(&token.signature)
        .bind(token.expires_at)
        .fetch_optional(&self.db)
        .await
        .context("reissue subscriber token")?;
        Ok(row)
    }

    async fn resubscribe(&self, id: i64) -> anyhow::Result<Option<Subscriber>> {
        let row = sqlx::query_as::<_, Subscriber>(&format!(
            r#"
            UPDATE subscribers SET subscribed = TRUE, updated_at = now()
             WHERE id = $1 AND verified AND NOT subscribed
            RETURNING {SUBSCRIBER_COLUMNS}
            "#
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .context("resubscribe")?;
        Ok(row)
    }

    async fn activate(
        &self,
        id: i64,
        signature: &str,
        now: OffsetDateTime,
    ) -> anyhow::Result<Option<Subscriber>> {
        let row = sqlx::query_as::<_, Subscriber>(&format!(
            r#"
            UPDATE subscribers
               SET verified = TRUE, subscribed = TRUE, out_time = $3, updated_at = now()
             WHERE id = $1 AND signature = $2 AND NOT verified AND out_time > $3
            RETURNING {SUBSCRIBER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(signature)
        .bind(now)
        .fetch_optional(&self.db)
        .await
        .context("activate subscriber")?;
        Ok(row)
    }

    async fn expire_token(&self, id: i64, signature: &str, now: OffsetDateTime) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE subscribers SET out_time = $3, updated_at = now() WHERE id = $1 AND signature = $2",
        )
        .bind(id)
        .bind(signature)
        .bind(now)
        .execute(&self.db)
        .await
        .context("expire subscriber token")?;
        Ok(())
    }

    async fn replace_token(&self, id: i64, token: &IssuedToken) -> anyhow::Result<Option<Subscriber>> {
        let row = sqlx::query_as::<_, Subscriber>(&format!(
            r#"
            UPDATE subscribers
               SET secret_key = $2, signature = $3, out_time = $4, updated_at = now()
             WHERE id = $1 AND verified AND subscribed
            RETURNING {SUBSCRIBER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&token.nonce)
        .bind(&token.signature)
        .bind(token.expires_at)
        .fetch_optional(&self.db)
        .await
        .context("replace subscriber token")?;
        Ok(row)
    }

    async fn unsubscribe(
        &self,
        id: i64,
        signature: &str,
        now: OffsetDateTime,
    ) -> anyhow::Result<Option<Subscriber>> {
        let row = sqlx::query_as::<_, Subscriber>(&format!(
            r#"
            UPDATE subscribers SET subscribed = FALSE, updated_at = now()
             WHERE id = $1 AND signature = $2 AND verified AND subscribed AND out_time > $3
            RETURNING {SUBSCRIBER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(signature)
        .bind(now)
        .fetch_optional(&self.db)
        .await
        .context("unsubscribe")?;
        Ok(row)
    }
}
