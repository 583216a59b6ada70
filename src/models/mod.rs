//! Data models for stocksync.
//!
//! This module contains the core data structures used throughout the crate:
//! - [`SyncConfig`]: Global switch, Shopify credentials and size-letter groups loaded from `stocksync.yaml`
//! - [`VariantRef`], [`InventoryLevel`], [`Quantity`]: Variant handles and validated stock levels
//! - [`SyncEvent`], [`Notification`]: Inbound inventory-change events
//! - [`LogEntry`], [`Severity`]: Activity log lines shown to operators
//!
//! # Architecture Note
//!
//! Config and log types derive `Serialize`/`Deserialize` for YAML persistence.
//! Inventory levels are never persisted; they are re-fetched for every synchronization.

pub mod activity;
pub mod config;
pub mod inventory;

pub use activity::{LogEntry, Severity};
pub use config::{DEFAULT_API_VERSION, ShopifySettings, SyncConfig, SyncTuning};
pub use inventory::{
    EventSource, InvalidQuantity, InventoryItemId, InventoryLevel, LocationId, Notification,
    ProductId, Quantity, SyncEvent, VariantId, VariantRecord, VariantRef,
};
