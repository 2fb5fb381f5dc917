//! # OAuth Identity Entity
//!
//! Link between a [`User`](super::User) and an account at an external
//! identity provider. Several identities per provider are allowed; callers
//! wanting upsert semantics look up by `(user, provider)` first.
//!
//! Token fields hold whatever the identity service stores in them, which is
//! Secret Engine ciphertext in production. The `Debug` output never prints
//! them.

use crate::domain::errors::{DomainResult, require_max_len, require_non_blank};
use crate::domain::value_objects::patch::{Patchable, fields};
use crate::domain::value_objects::{AttributeMap, OAuthIdentityId, Timestamp, UserId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// An identity at an external OAuth provider.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuthIdentity {
    /// Identifier.
    pub id: OAuthIdentityId,
    /// Owning user.
    pub user_id: UserId,
    /// Provider name, e.g. `google`.
    pub provider: String,
    /// User id at the provider.
    pub provider_user_id: String,
    /// Access token (stored form).
    pub access_token: String,
    /// Refresh token (stored form).
    pub refresh_token: Option<String>,
    /// Access token expiry.
    pub expires_at: Option<Timestamp>,
    /// Provider profile data.
    pub info: AttributeMap,
    /// Creation time.
    pub created_at: Timestamp,
    /// Last modification time.
    pub updated_at: Timestamp,
    /// Soft-deletion marker.
    pub deleted_at: Option<Timestamp>,
}

impl OAuthIdentity {
    /// Creates a new identity.
    #[must_use]
    pub fn new(
        user_id: UserId,
        provider: impl Into<String>,
        provider_user_id: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        let now = Timestamp::now();
        Self {
            id: OAuthIdentityId::new_v4(),
            user_id,
            provider: provider.into(),
            provider_user_id: provider_user_id.into(),
            access_token: access_token.into(),
            refresh_token: None,
            expires_at: None,
            info: AttributeMap::new(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    /// Sets the refresh token.
    #[must_use]
    pub fn with_refresh_token(mut self, token: impl Into<String>) -> Self {
        self.refresh_token = Some(token.into());
        self
    }

    /// Sets the access token expiry.
    #[must_use]
    pub fn with_expires_at(mut self, expires_at: Timestamp) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Returns true if the access token has expired at `now`.
    ///
    /// Identities without an expiry never expire.
    #[must_use]
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at.is_some_and(|exp| !exp.is_after(&now))
    }

    /// Returns true once soft-deleted.
    #[inline]
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Checks structural invariants.
    ///
    /// # Errors
    ///
    /// Returns the first violated rule.
    pub fn validate(&self) -> DomainResult<()> {
        require_non_blank("provider", &self.provider)?;
        require_max_len("provider", &self.provider, 32)?;
        require_non_blank("provider_user_id", &self.provider_user_id)?;
        require_non_blank("access_token", &self.access_token)?;
        Ok(())
    }
}

impl fmt::Debug for OAuthIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthIdentity")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("provider", &self.provider)
            .field("provider_user_id", &self.provider_user_id)
            .field("access_token", &"<redacted>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .field("expires_at", &self.expires_at)
            .field("deleted_at", &self.deleted_at)
            .finish_non_exhaustive()
    }
}

impl Patchable for OAuthIdentity {
    const ENTITY: &'static str = "OAuthIdentity";
    // Tokens rotate through `update_tokens` only.
    const IMMUTABLE_FIELDS: &'static [&'static str] = &[
        "id",
        "user_id",
        "provider",
        "provider_user_id",
        "access_token",
        "refresh_token",
        "expires_at",
        "created_at",
        "updated_at",
        "deleted_at",
    ];

    fn apply_field(&mut self, field: &str, value: &Value) -> DomainResult<bool> {
        match field {
            "info" => self.info = fields::attributes("info", value)?,
            _ => return Ok(false),
        }
        Ok(true)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_tokens() {
        let id = OAuthIdentity::new(UserId::new_v4(), "google", "123", "secret-token")
            .with_refresh_token("refresh-secret");
        let dbg = format!("{id:?}");
        assert!(!dbg.contains("secret-token"));
        assert!(!dbg.contains("refresh-secret"));
        assert!(dbg.contains("google"));
    }

    #[test]
    fn expiry() {
        let now = Timestamp::now();
        let id = OAuthIdentity::new(UserId::new_v4(), "github", "1", "t");
        assert!(!id.is_expired(now));
        assert!(id.clone().with_expires_at(now.sub_secs(1)).is_expired(now));
        assert!(!id.with_expires_at(now.add_secs(60)).is_expired(now));
    }

    #[test]
    fn validate_requires_token() {
        let id = OAuthIdentity::new(UserId::new_v4(), "github", "1", "");
        assert!(id.validate().is_err());
    }
}
