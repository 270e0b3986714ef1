//! Signed, expiring link tokens.
//!
//! A token is the triple `(nonce, signature, expires_at)` derived from an
//! identity string. Only the signature travels in a link; the caller keeps the
//! nonce and expiry next to the identity and re-verifies by recomputation.

use anyhow::anyhow;
use hmac::{digest::KeyInit, Hmac, Mac};
use sha2::Sha256;
use time::{Duration, OffsetDateTime, UtcOffset};
use tracing::debug;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub nonce: String,
    pub signature: String,
    pub expires_at: OffsetDateTime,
}

/// Keyed with a server-side secret that is never stored per record.
#[derive(Clone)]
pub struct TokenSigner {
    keyed: HmacSha256,
}

impl std::fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSigner").finish_non_exhaustive()
    }
}

impl TokenSigner {
    pub fn new(secret: impl AsRef<[u8]>) -> anyhow::Result<Self> {
        let keyed = <HmacSha256 as KeyInit>::new_from_slice(secret.as_ref())
            .map_err(|e| anyhow!("token signer key: {e}"))?;
        Ok(Self { keyed })
    }

    fn mac(&self, identity: &str, nonce: &str, expires_at: OffsetDateTime) -> HmacSha256 {
        let mut mac = self.keyed.clone();
        mac.update(identity.as_bytes());
        mac.update(nonce.as_bytes());
        mac.update(expiry_field(expires_at).as_bytes());
        mac
    }

    pub fn sign(&self, identity: &str, nonce: &str, expires_at: OffsetDateTime) -> String {
        hex::encode(self.mac(identity, nonce, expires_at).finalize().into_bytes())
    }

    pub fn issue(&self, identity: &str, ttl: Duration) -> IssuedToken {
        self.issue_at(identity, ttl, OffsetDateTime::now_utc())
    }

    pub fn issue_at(&self, identity: &str, ttl: Duration, now: OffsetDateTime) -> IssuedToken {
        let nonce = Uuid::new_v4().simple().to_string();
        let expires_at = now + ttl;
        let signature = self.sign(identity, &nonce, expires_at);
        debug!(expires_at = %expires_at, "link token issued");
        IssuedToken {
            nonce,
            signature,
            expires_at,
        }
    }

    /// Recomputes the signature, ignoring the clock.
    pub fn matches(
        &self,
        identity: &str,
        nonce: &str,
        expires_at: OffsetDateTime,
        signature: &str,
    ) -> bool {
        let Ok(raw) = hex::decode(signature) else {
            return false;
        };
        self.mac(identity, nonce, expires_at).verify_slice(&raw).is_ok()
    }

    pub fn verify(
        &self,
        identity: &str,
        nonce: &str,
        expires_at: OffsetDateTime,
        signature: &str,
    ) -> bool {
        self.verify_at(identity, nonce, expires_at, signature, OffsetDateTime::now_utc())
    }

    pub fn verify_at(
        &self,
        identity: &str,
        nonce: &str,
        expires_at: OffsetDateTime,
        signature: &str,
        now: OffsetDateTime,
    ) -> bool {
        now < expires_at && self.matches(identity, nonce, expires_at, signature)
    }
}

/// `YYYYMMDDhhmmss` in UTC; whole seconds only.
fn expiry_field(at: OffsetDateTime) -> String {
    let at = at.to_offset(UtcOffset::UTC);
    format!(
        "{:04}{:02}{:02}{:02}{:02}{:02}",
        at.year(),
        u8::from(at.month()),
        at.day(),
        at.hour(),
        at.minute(),
        at.second()
    )
}
