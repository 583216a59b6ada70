// stocksync - Group stock synchronization for size-letter variants on Shopify
//
// This is the library crate containing the engine, its collaborators and data structures.
// The binary crate (main.rs) feeds manual triggers from stdin.

pub mod config;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod services;
pub mod state;

// Re-export commonly used types for convenience
pub use config::{ConfigStore, EnvOverrides};
pub use metrics::Metrics;
pub use models::{EventSource, LogEntry, Notification, Quantity, Severity, SyncConfig, SyncEvent};
pub use services::{ActivityLog, Ingress, InventoryClient, SyncEngine, SyncOutcome};
pub use state::{GroupPhase, SyncStateChange, SyncStateManager};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
