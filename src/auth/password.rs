use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use lazy_static::lazy_static;
use rand::rngs::OsRng;
use tracing::error;
use uuid::Uuid;

lazy_static! {
    // Hash of a random credential no login form can produce (passwords are
    // at most 12 characters). Used to spend the same Argon2 work on misses.
    static ref DUMMY_HASH: Option<String> =
        hash_password("", &Uuid::new_v4().simple().to_string()).ok();
}

// The credential is bound to the login email as well as the password.
fn credential(email: &str, password: &str) -> String {
    format!("{email}{password}")
}

pub fn hash_password(email: &str, password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(credential(email, password).as_bytes(), &salt)
        .map_err(|e| {
            error!(error = %e, "argon2 hash_password error");
            anyhow::anyhow!(e.to_string())
        })?
        .to_string();
    Ok(hash)
}

pub fn verify_password(email: &str, password: &str, hash: &str) -> anyhow::Result<bool> {
    let parsed = PasswordHash::new(hash).map_err(|e| {
        error!(error = %e, "argon2 parse hash error");
        anyhow::anyhow!(e.to_string())
    })?;
    Ok(Argon2::default()
        .verify_password(credential(email, password).as_bytes(), &parsed)
        .is_ok())
}

/// Runs a full verification against a throwaway hash so a login for an
/// unknown account costs as much as one with a wrong password.
pub fn verify_dummy(email: &str, password: &str) {
    if let Some(hash) = DUMMY_HASH.as_deref() {
        let _ = verify_password(email, password, hash);
    }
}
