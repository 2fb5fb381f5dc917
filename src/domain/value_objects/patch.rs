//! # Partial Updates
//!
//! A [`Patch`] is a JSON object mapping field names to new values. Entities
//! implement [`Patchable`] to declare which fields are immutable on the
//! generic update path and how each writable field is decoded.
//!
//! Applying a patch is all-or-nothing from the caller's point of view:
//! immutable keys are rejected before any field is touched, and the
//! repositories apply patches to a copy that is only written back after
//! `validate()` succeeds.
//!
//! # Examples
//!
//! ```
//! use serde_json::json;
//! use trade_accounts::domain::entities::User;
//! use trade_accounts::domain::value_objects::patch::{Patch, Patchable};
//!
//! let mut user = User::new("alice", "a@x");
//! user.apply_patch(&Patch::new().set("avatar_url", json!("https://img/a.png"))).unwrap();
//! assert_eq!(user.avatar_url.as_deref(), Some("https://img/a.png"));
//!
//! let err = user.apply_patch(&Patch::new().set("id", json!("x"))).unwrap_err();
//! assert!(err.to_string().contains("immutable"));
//! ```

use crate::domain::errors::{DomainError, DomainResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Column name → new value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Patch(Map<String, Value>);

impl Patch {
    /// Creates an empty patch.
    #[must_use]
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Builds a patch from a JSON object. Returns `None` for non-objects.
    #[must_use]
    pub fn from_json(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    /// Adds a field, builder style.
    #[must_use]
    pub fn set(mut self, field: impl Into<String>, value: Value) -> Self {
        self.0.insert(field.into(), value);
        self
    }

    /// Returns the value for a field.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Returns true if the patch touches `field`.
    #[must_use]
    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    /// Iterates over `(field, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Returns true if the patch is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// An entity that accepts partial updates.
pub trait Patchable {
    /// Entity name used in error messages.
    const ENTITY: &'static str;

    /// Fields that the generic update path refuses to write.
    const IMMUTABLE_FIELDS: &'static [&'static str];

    /// Applies one writable field.
    ///
    /// Returns `Ok(false)` if the entity has no such field.
    ///
    /// # Errors
    ///
    /// Returns a `DomainError` when the value has the wrong shape.
    fn apply_field(&mut self, field: &str, value: &Value) -> DomainResult<bool>;

    /// Applies a whole patch.
    ///
    /// # Errors
    ///
    /// - `DomainError::ImmutableField` if any key is immutable (checked
    ///   before any field is written)
    /// - `DomainError::UnknownField` for keys the entity does not have
    /// - any error from [`Patchable::apply_field`]
    fn apply_patch(&mut self, patch: &Patch) -> DomainResult<()> {
        if let Some((field, _)) = patch
            .iter()
            .find(|(k, _)| Self::IMMUTABLE_FIELDS.contains(&k.as_str()))
        {
            return Err(DomainError::immutable(Self::ENTITY, field.clone()));
        }
        for (field, value) in patch.iter() {
            if !self.apply_field(field, value)? {
                return Err(DomainError::unknown_field(Self::ENTITY, field.clone()));
            }
        }
        Ok(())
    }
}

/// Decoders for patch values.
pub mod fields {
    use super::*;
    use crate::domain::value_objects::attributes::AttributeMap;
    use crate::domain::value_objects::enums::ParseEnumError;
    use crate::domain::value_objects::timestamp::Timestamp;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    /// Required string.
    ///
    /// # Errors
    ///
    /// Returns `InvalidField` when the value is not a string.
    pub fn string(field: &'static str, value: &Value) -> DomainResult<String> {
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| DomainError::invalid(field, "expected a string"))
    }

    /// String or `null`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidField` for any other type.
    pub fn opt_string(field: &'static str, value: &Value) -> DomainResult<Option<String>> {
        match value {
            Value::Null => Ok(None),
            Value::String(s) => Ok(Some(s.clone())),
            _ => Err(DomainError::invalid(field, "expected a string or null")),
        }
    }

    /// Boolean.
    ///
    /// # Errors
    ///
    /// Returns `InvalidField` when the value is not a boolean.
    pub fn boolean(field: &'static str, value: &Value) -> DomainResult<bool> {
        value
            .as_bool()
            .ok_or_else(|| DomainError::invalid(field, "expected a boolean"))
    }

    /// Decimal given as a JSON string or number.
    ///
    /// # Errors
    ///
    /// Returns `InvalidField` when the value does not parse.
    pub fn decimal(field: &'static str, value: &Value) -> DomainResult<Decimal> {
        let parsed = match value {
            Value::String(s) => Decimal::from_str(s).ok(),
            Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
            _ => None,
        };
        parsed.ok_or_else(|| DomainError::invalid(field, "expected a decimal"))
    }

    /// Decimal or `null`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidField` when the value does not parse.
    pub fn opt_decimal(field: &'static str, value: &Value) -> DomainResult<Option<Decimal>> {
        if value.is_null() {
            return Ok(None);
        }
        decimal(field, value).map(Some)
    }

    /// A string-backed enum.
    ///
    /// # Errors
    ///
    /// Returns `InvalidField` for non-strings and `InvalidEnum` for unknown
    /// variants.
    pub fn enumeration<T>(field: &'static str, value: &Value) -> DomainResult<T>
    where
        T: FromStr<Err = ParseEnumError>,
    {
        let s = value
            .as_str()
            .ok_or_else(|| DomainError::invalid(field, "expected a string"))?;
        Ok(T::from_str(s)?)
    }

    /// A UUID-backed identifier given as a string.
    ///
    /// # Errors
    ///
    /// Returns `InvalidField` when the value is not a UUID string.
    pub fn id<T>(field: &'static str, value: &Value) -> DomainResult<T>
    where
        T: FromStr<Err = uuid::Error>,
    {
        value
            .as_str()
            .and_then(|s| T::from_str(s).ok())
            .ok_or_else(|| DomainError::invalid(field, "expected a UUID"))
    }

    /// A JSON object (or `null` for an empty map).
    ///
    /// # Errors
    ///
    /// Returns `InvalidField` for any other type.
    pub fn attributes(field: &'static str, value: &Value) -> DomainResult<AttributeMap> {
        AttributeMap::from_json(value.clone())
            .ok_or_else(|| DomainError::invalid(field, "expected an object"))
    }

    /// RFC 3339 timestamp or `null`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidField` when the value does not parse.
    pub fn opt_timestamp(field: &'static str, value: &Value) -> DomainResult<Option<Timestamp>> {
        if value.is_null() {
            return Ok(None);
        }
        serde_json::from_value::<Timestamp>(value.clone())
            .map(Some)
            .map_err(|_| DomainError::invalid(field, "expected an RFC 3339 timestamp"))
    }
}
