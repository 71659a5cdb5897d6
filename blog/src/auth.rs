//! Signed session cookies and password digests.
//!
//! A session value is `<user id>-<expires>-<hex hmac>`, where the MAC covers
//! the id, the stored password digest and the expiry. Changing the password
//! invalidates every issued session.

use crate::models::User;
use hmac::digest::InvalidLength;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

pub const SESSION_COOKIE: &str = "awesession";

/// Seconds a session stays valid.
pub const SESSION_MAX_AGE: i64 = 86400;

/// Digest stored in place of the password.
pub fn password_digest(email: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(email.trim().to_lowercase().as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Clone)]
pub struct Sessions {
    key: HmacSha256,
}

/// Parts of a session value whose signature is not yet checked.
#[derive(Debug, PartialEq)]
pub struct SessionClaim<'a> {
    pub user_id: &'a str,
    pub expires: i64,
    signature: &'a str,
}

impl Sessions {
    pub fn new(secret: &str) -> Result<Self, InvalidLength> {
        Ok(Sessions {
            key: HmacSha256::new_from_slice(secret.as_bytes())?,
        })
    }

    fn mac(&self, user_id: &str, password: &str, expires: i64) -> HmacSha256 {
        let mut mac = self.key.clone();
        mac.update(format!("{}-{}-{}", user_id, password, expires).as_bytes());
        mac
    }

    /// Session value for `user`, valid until `now + SESSION_MAX_AGE`.
    pub fn issue(&self, user: &User, now: i64) -> String {
        let id = user.id.as_deref().unwrap_or_default();
        let expires = now + SESSION_MAX_AGE;
        let signature = hex::encode(self.mac(id, &user.password, expires).finalize().into_bytes());
        format!("{}-{}-{}", id, expires, signature)
    }

    /// Split a cookie value; `None` when malformed or expired.
    pub fn claim<'a>(&self, value: &'a str, now: i64) -> Option<SessionClaim<'a>> {
        let mut parts = value.rsplitn(3, '-');
        let signature = parts.next()?;
        let expires: i64 = parts.next()?.parse().ok()?;
        let user_id = parts.next().filter(|id| !id.is_empty())?;
        if expires < now {
            tracing::debug!(user_id, "session expired");
            return None;
        }
        Some(SessionClaim {
            user_id,
            expires,
            signature,
        })
    }

    /// Check the claim against the user it names.
    pub fn verify(&self, claim: &SessionClaim<'_>, user: &User) -> bool {
        let Ok(signature) = hex::decode(claim.signature) else {
            return false;
        };
        self.mac(claim.user_id, &user.password, claim.expires)
            .verify_slice(&signature)
            .is_ok()
    }
}
