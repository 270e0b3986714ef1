use serde::Serialize;
use sqlx::FromRow;
use time::OffsetDateTime;

/// Mailing-list entry. `secret_key`, `signature` and `out_time` form the one
/// live link token of this subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct Subscriber {
    pub id: i64,
    pub email: String,
    pub verified: bool,
    pub subscribed: bool,
    #[serde(skip_serializing)]
    pub secret_key: String,
    #[serde(skip_serializing)]
    pub signature: String,
    pub out_time: OffsetDateTime,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    PendingVerification,
    VerifiedUnsubscribed,
    Subscribed,
}

impl Subscriber {
    pub fn lifecycle(&self) -> Lifecycle {
        match (self.verified, self.subscribed) {
            (false, _) => Lifecycle::PendingVerification,
            (true, false) => Lifecycle::VerifiedUnsubscribed,
            (true, true) => Lifecycle::Subscribed,
        }
    }

    pub fn token_live_at(&self, now: OffsetDateTime) -> bool {
        now < self.out_time
    }
}
