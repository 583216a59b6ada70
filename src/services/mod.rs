//! Services module - business logic for group stock synchronization.
//!
//! The services are framework-agnostic: no HTTP server, no dashboard. Everything
//! outbound goes through the [`AdminApi`] seam so the engine can run against the
//! real platform ([`ShopifyApi`]) or an in-memory fake in tests.
//!
//! # Components
//!
//! - [`GroupRegistry`]: size letter to group resolution over a validated partition
//! - [`InventoryClient`]: timeout, retry with exponential backoff and quantity
//!   validation on top of an [`AdminApi`]
//! - [`ShopifyApi`]: reqwest transport for the Shopify Admin REST API
//! - [`planner::plan`]: pure target computation, the trigger's quantity wins
//! - [`SyncEngine`]: per-group serialized orchestration and the event dispatcher
//! - [`ActivityLog`]: bounded, newest-first record of outcomes
//! - [`Ingress`]: validation of inbound notifications onto the event channel
//!
//! # Usage Example
//!
//! ```ignore
//! let (ingress, events) = Ingress::channel(256, activity.clone(), metrics.clone());
//! let dispatcher = Arc::clone(&engine).spawn_dispatcher(events);
//!
//! ingress.submit_json(r#"{"variant_id": 1001, "new_quantity": 5}"#, EventSource::Manual);
//! ```

pub mod activity;
pub mod engine;
pub mod ingress;
pub mod inventory;
pub mod planner;
pub mod registry;
pub mod shopify;

pub use activity::{ActivityLog, DEFAULT_LOG_CAPACITY};
pub use engine::{SyncEngine, SyncFailure, SyncOutcome, SyncReport, WriteFailure};
pub use ingress::{Ack, Ingress};
pub use inventory::{AdminApi, ApiError, InventoryClient, RetryPolicy};
pub use planner::{PlannedWrite, SyncPlan};
pub use registry::{ConfigError, Group, GroupRegistry};
pub use shopify::ShopifyApi;
