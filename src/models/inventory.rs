use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

macro_rules! platform_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }
    };
}

platform_id!(
    /// Platform id of a purchasable variant.
    VariantId
);
platform_id!(
    /// Platform id of the product owning a set of variants.
    ProductId
);
platform_id!(
    /// Platform id of the inventory item behind a variant.
    InventoryItemId
);
platform_id!(
    /// Platform id of a stock location.
    LocationId
);

/// A quantity was negative, fractional, or not a number at all.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid quantity: {0}")]
pub struct InvalidQuantity(pub String);

/// Validated stock quantity (non-negative integer)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Quantity(u32);

impl Quantity {
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    pub fn get(self) -> u32 {
        self.0
    }

    /// Validate a quantity taken from a JSON payload.
    ///
    /// Accepts integral numbers only; `5.0` is accepted, `5.5`, `-1` and `"5"` are not.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, InvalidQuantity> {
        let number = value
            .as_number()
            .ok_or_else(|| InvalidQuantity(format!("{} is not a number", value)))?;

        if let Some(n) = number.as_i64() {
            return Self::try_from(n);
        }
        if number.as_u64().is_some() {
            return Err(InvalidQuantity(format!("{} is out of range", number)));
        }
        match number.as_f64() {
            Some(f) if f < 0.0 => Err(InvalidQuantity(format!("{} is negative", number))),
            Some(f) if f.fract() != 0.0 => {
                Err(InvalidQuantity(format!("{} is not an integer", number)))
            }
            Some(f) if f <= u32::MAX as f64 => Ok(Self(f as u32)),
            _ => Err(InvalidQuantity(format!("{} is out of range", number))),
        }
    }
}

impl TryFrom<i64> for Quantity {
    type Error = InvalidQuantity;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        if value < 0 {
            return Err(InvalidQuantity(format!("{} is negative", value)));
        }
        u32::try_from(value)
            .map(Self)
            .map_err(|_| InvalidQuantity(format!("{} is out of range", value)))
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A variant as seen by the engine: its size letter plus the platform handles
/// needed to read and write its stock.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VariantRef {
    pub size_letter: String,
    pub variant_id: VariantId,
    pub inventory_item_id: InventoryItemId,
}

impl VariantRef {
    pub fn new(
        size_letter: impl Into<String>,
        variant_id: impl Into<VariantId>,
        inventory_item_id: impl Into<InventoryItemId>,
    ) -> Self {
        Self {
            size_letter: size_letter.into(),
            variant_id: variant_id.into(),
            inventory_item_id: inventory_item_id.into(),
        }
    }
}

impl fmt::Display for VariantRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (#{})", self.size_letter, self.variant_id)
    }
}

/// Variant lookup result: the ref plus the product it belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantRecord {
    pub variant: VariantRef,
    pub product_id: ProductId,
}

/// Current stock of one variant, fetched fresh for every synchronization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryLevel {
    pub variant: VariantRef,
    pub quantity: Quantity,
    pub fetched_at: DateTime<Utc>,
}

/// Where a synchronization request came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSource {
    Webhook,
    Manual,
}

impl fmt::Display for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventSource::Webhook => write!(f, "webhook"),
            EventSource::Manual => write!(f, "manual"),
        }
    }
}

/// Raw inbound notification, before quantity validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(alias = "variantId")]
    pub variant_id: VariantId,

    #[serde(alias = "newQuantity")]
    pub new_quantity: serde_json::Value,
}

/// Validated inventory-change event, consumed once by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncEvent {
    pub variant_id: VariantId,
    pub new_quantity: Quantity,
    pub received_at: DateTime<Utc>,
    pub source: EventSource,
}

impl SyncEvent {
    pub fn new(variant_id: VariantId, new_quantity: Quantity, source: EventSource) -> Self {
        Self {
            variant_id,
            new_quantity,
            received_at: Utc::now(),
            source,
        }
    }

    /// Validate a notification into an event.
    pub fn from_notification(
        notification: &Notification,
        source: EventSource,
    ) -> Result<Self, InvalidQuantity> {
        let quantity = Quantity::from_json(&notification.new_quantity)?;
        Ok(Self::new(notification.variant_id, quantity, source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_quantity_from_json_accepts_integers() {
        assert_eq!(Quantity::from_json(&json!(5)).unwrap(), Quantity::new(5));
        assert_eq!(Quantity::from_json(&json!(0)).unwrap(), Quantity::new(0));
        assert_eq!(Quantity::from_json(&json!(7.0)).unwrap(), Quantity::new(7));
    }

    #[test]
    fn test_quantity_from_json_rejects_invalid() {
        assert!(Quantity::from_json(&json!(-1)).is_err());
        assert!(Quantity::from_json(&json!(2.5)).is_err());
        assert!(Quantity::from_json(&json!(-3.0)).is_err());
        assert!(Quantity::from_json(&json!("5")).is_err());
        assert!(Quantity::from_json(&json!(null)).is_err());
        assert!(Quantity::from_json(&json!(u64::MAX)).is_err());
    }

    #[test]
    fn test_quantity_from_json_reasons() {
        let reason = |value| Quantity::from_json(&value).unwrap_err().to_string();

        assert!(reason(json!(1e300)).ends_with("is out of range"));
        assert!(reason(json!(5_000_000_000.0)).ends_with("is out of range"));
        assert!(reason(json!(2.5)).ends_with("is not an integer"));
        assert!(reason(json!(-2.5)).ends_with("is negative"));
    }

    #[test]
    fn test_quantity_try_from_i64() {
        assert_eq!(Quantity::try_from(12).unwrap().get(), 12);
        let err = Quantity::try_from(-4).unwrap_err();
        assert!(err.to_string().contains("negative"));
        assert!(Quantity::try_from(i64::MAX).is_err());
    }

    #[test]
    fn test_notification_accepts_camel_case() {
        let n: Notification =
            serde_json::from_str(r#"{"variantId": 42, "newQuantity": 3}"#).unwrap();
        assert_eq!(n.variant_id, VariantId(42));

        let event = SyncEvent::from_notification(&n, EventSource::Webhook).unwrap();
        assert_eq!(event.new_quantity, Quantity::new(3));
        assert_eq!(event.source, EventSource::Webhook);
    }

    #[test]
    fn test_notification_with_bad_quantity_rejected() {
        let n: Notification =
            serde_json::from_str(r#"{"variant_id": 42, "new_quantity": -2}"#).unwrap();
        assert!(SyncEvent::from_notification(&n, EventSource::Manual).is_err());
    }

    #[test]
    fn test_variant_ref_display() {
        let v = VariantRef::new("J", 1002, 2002);
        assert_eq!(v.to_string(), "J (#1002)");
    }
}
