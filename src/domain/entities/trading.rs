//! # Trading Entity
//!
//! A user-owned trading configuration bound to one exchange binding. The
//! binding must be public or owned by the same user; repositories enforce
//! that on create and whenever the binding reference changes.

use crate::domain::entities::exchange_binding::BindingSummary;
use crate::domain::errors::{DomainResult, require_max_len, require_non_blank};
use crate::domain::value_objects::patch::{Patchable, fields};
use crate::domain::value_objects::{
    AttributeMap, ExchangeBindingId, Timestamp, TradingId, TradingStatus, TradingType, UserId,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Maximum trading name length.
pub const MAX_TRADING_NAME_LEN: usize = 100;

/// A trading configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trading {
    /// Identifier.
    pub id: TradingId,
    /// Owner.
    pub user_id: UserId,
    /// Bound exchange binding.
    pub exchange_binding_id: ExchangeBindingId,
    /// Display name.
    pub name: String,
    /// Real, virtual or backtest.
    pub trading_type: TradingType,
    /// Lifecycle status.
    pub status: TradingStatus,
    /// Strategy or bot parameters.
    pub settings: AttributeMap,
    /// Free-form attributes.
    pub info: AttributeMap,
    /// Creation time.
    pub created_at: Timestamp,
    /// Last modification time.
    pub updated_at: Timestamp,
    /// Soft-deletion marker.
    pub deleted_at: Option<Timestamp>,
    /// The bound binding, filled in on reads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binding: Option<BindingSummary>,
}

impl Trading {
    /// Creates an active trading.
    #[must_use]
    pub fn new(
        user_id: UserId,
        exchange_binding_id: ExchangeBindingId,
        name: impl Into<String>,
        trading_type: TradingType,
    ) -> Self {
        let now = Timestamp::now();
        Self {
            id: TradingId::new_v4(),
            user_id,
            exchange_binding_id,
            name: name.into(),
            trading_type,
            status: TradingStatus::Active,
            settings: AttributeMap::new(),
            info: AttributeMap::new(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
            binding: None,
        }
    }

    /// Sets the initial status.
    #[must_use]
    pub fn with_status(mut self, status: TradingStatus) -> Self {
        self.status = status;
        self
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
        require_non_blank("name", &self.name)?;
        require_max_len("name", &self.name, MAX_TRADING_NAME_LEN)
    }
}

impl Patchable for Trading {
    const ENTITY: &'static str = "Trading";
    const IMMUTABLE_FIELDS: &'static [&'static str] = &[
        "id",
        "user_id",
        "binding",
        "created_at",
        "updated_at",
        "deleted_at",
    ];

    fn apply_field(&mut self, field: &str, value: &Value) -> DomainResult<bool> {
        match field {
            "name" => self.name = fields::string("name", value)?,
            "trading_type" | "type" => {
                self.trading_type = fields::enumeration("trading_type", value)?;
            }
            "status" => self.status = fields::enumeration("status", value)?,
            "exchange_binding_id" => {
                self.exchange_binding_id = fields::id("exchange_binding_id", value)?;
            }
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
    use crate::domain::errors::DomainError;
    use crate::domain::value_objects::Patch;
    use serde_json::json;

    #[test]
    fn new_is_active() {
        let t = Trading::new(
            UserId::new_v4(),
            ExchangeBindingId::new_v4(),
            "grid",
            TradingType::Virtual,
        );
        assert_eq!(t.status, TradingStatus::Active);
        assert!(t.validate().is_ok());
    }

    #[test]
    fn binding_reference_is_patchable() {
        let mut t =
            Trading::new(UserId::new_v4(), ExchangeBindingId::new_v4(), "grid", TradingType::Real);
        let other = ExchangeBindingId::new_v4();
        t.apply_patch(&Patch::new().set("exchange_binding_id", json!(other.to_string())))
            .unwrap();
        assert_eq!(t.exchange_binding_id, other);
    }

    #[test]
    fn owner_is_immutable() {
        let mut t =
            Trading::new(UserId::new_v4(), ExchangeBindingId::new_v4(), "grid", TradingType::Real);
        let err = t
            .apply_patch(&Patch::new().set("user_id", json!(UserId::new_v4().to_string())))
            .unwrap_err();
        assert!(matches!(err, DomainError::ImmutableField { .. }));
    }

    #[test]
    fn type_alias_accepted() {
        let mut t =
            Trading::new(UserId::new_v4(), ExchangeBindingId::new_v4(), "grid", TradingType::Real);
        t.apply_patch(&Patch::new().set("type", json!("backtest"))).unwrap();
        assert_eq!(t.trading_type, TradingType::Backtest);
    }
}
