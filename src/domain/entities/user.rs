//! # User Entity
//!
//! The tenant root. A user owns, transitively, every identity, binding,
//! trading, sub-account, transaction and activity log that carries its id.
//!
//! # Examples
//!
//! ```
//! use trade_accounts::domain::entities::User;
//!
//! let user = User::new("alice", "alice@example.com");
//! assert!(user.validate().is_ok());
//! assert!(!user.is_deleted());
//! ```

use crate::domain::errors::{DomainError, DomainResult, require_max_len, require_non_blank};
use crate::domain::value_objects::patch::{Patchable, fields};
use crate::domain::value_objects::{AttributeMap, Timestamp, UserId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Maximum username length.
pub const MAX_USERNAME_LEN: usize = 64;

/// Maximum email length.
pub const MAX_EMAIL_LEN: usize = 255;

/// A registered user.
///
/// `username` and `email` are unique among live users and compared
/// case-sensitively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// Identifier.
    pub id: UserId,
    /// Unique login name.
    pub username: String,
    /// Unique email address.
    pub email: String,
    /// Optional avatar URI.
    pub avatar_url: Option<String>,
    /// User preferences.
    pub settings: AttributeMap,
    /// Free-form profile data.
    pub info: AttributeMap,
    /// Creation time.
    pub created_at: Timestamp,
    /// Last modification time.
    pub updated_at: Timestamp,
    /// Soft-deletion marker.
    pub deleted_at: Option<Timestamp>,
}

impl User {
    /// Creates a new live user.
    #[must_use]
    pub fn new(username: impl Into<String>, email: impl Into<String>) -> Self {
        let now = Timestamp::now();
        Self {
            id: UserId::new_v4(),
            username: username.into(),
            email: email.into(),
            avatar_url: None,
            settings: AttributeMap::new(),
            info: AttributeMap::new(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    /// Sets the avatar URI.
    #[must_use]
    pub fn with_avatar_url(mut self, url: impl Into<String>) -> Self {
        self.avatar_url = Some(url.into());
        self
    }

    /// Replaces the settings map.
    #[must_use]
    pub fn with_settings(mut self, settings: AttributeMap) -> Self {
        self.settings = settings;
        self
    }

    /// Returns true once the user has been soft-deleted.
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
        require_non_blank("username", &self.username)?;
        require_max_len("username", &self.username, MAX_USERNAME_LEN)?;
        if self.username.chars().any(char::is_whitespace) {
            return Err(DomainError::invalid("username", "must not contain whitespace"));
        }
        require_non_blank("email", &self.email)?;
        require_max_len("email", &self.email, MAX_EMAIL_LEN)?;
        if !self.email.contains('@') {
            return Err(DomainError::invalid("email", "must contain '@'"));
        }
        Ok(())
    }
}

impl Patchable for User {
    const ENTITY: &'static str = "User";
    const IMMUTABLE_FIELDS: &'static [&'static str] =
        &["id", "created_at", "updated_at", "deleted_at"];

    fn apply_field(&mut self, field: &str, value: &Value) -> DomainResult<bool> {
        match field {
            "username" => self.username = fields::string("username", value)?,
            "email" => self.email = fields::string("email", value)?,
            "avatar_url" => self.avatar_url = fields::opt_string("avatar_url", value)?,
            "settings" => self.settings = fields::attributes("settings", value)?,
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
    use crate::domain::value_objects::Patch;
    use serde_json::json;

    #[test]
    fn new_user_is_valid() {
        assert!(User::new("alice", "a@x").validate().is_ok());
    }

    #[test]
    fn blank_username_rejected() {
        assert_eq!(
            User::new(" ", "a@x").validate(),
            Err(DomainError::MissingField("username"))
        );
    }

    #[test]
    fn email_needs_at_sign() {
        assert!(User::new("alice", "alice").validate().is_err());
    }

    #[test]
    fn patch_rejects_id() {
        let mut u = User::new("alice", "a@x");
        let err = u.apply_patch(&Patch::new().set("id", json!("x"))).unwrap_err();
        assert!(matches!(err, DomainError::ImmutableField { .. }));
    }

    #[test]
    fn patch_clears_avatar() {
        let mut u = User::new("alice", "a@x").with_avatar_url("https://a");
        u.apply_patch(&Patch::new().set("avatar_url", Value::Null)).unwrap();
        assert!(u.avatar_url.is_none());
    }
}
