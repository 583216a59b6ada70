use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Shopify Admin API version used when the config does not pin one.
pub const DEFAULT_API_VERSION: &str = "2024-01";

/// Persisted configuration from `stocksync.yaml`
///
/// Holds the global switch, platform credentials, and the size-letter groups.
/// Groups are kept in declaration order so listings and logs stay stable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub shopify: ShopifySettings,

    /// Which variant option slot (1..=3) carries the size letter.
    #[serde(default = "default_size_option")]
    pub size_option: u8,

    /// Group name -> member size letters.
    #[serde(default = "default_groups")]
    pub groups: IndexMap<String, Vec<String>>,

    #[serde(default)]
    pub sync: SyncTuning,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            shopify: ShopifySettings::default(),
            size_option: default_size_option(),
            groups: default_groups(),
            sync: SyncTuning::default(),
        }
    }
}

impl SyncConfig {
    /// Check whether the store identifier and access token are both set.
    pub fn has_credentials(&self) -> bool {
        !self.shopify.store.trim().is_empty() && !self.shopify.access_token.trim().is_empty()
    }
}

/// Store identifier and credential for the Shopify Admin API
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct ShopifySettings {
    /// Shop domain, e.g. `my-shop.myshopify.com`.
    #[serde(default)]
    pub store: String,

    #[serde(default)]
    pub access_token: String,

    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// Location whose levels are synchronized. Discovered from the shop when unset.
    #[serde(default)]
    pub location_id: Option<u64>,
}

impl Default for ShopifySettings {
    fn default() -> Self {
        Self {
            store: String::new(),
            access_token: String::new(),
            api_version: default_api_version(),
            location_id: None,
        }
    }
}

// Keep the token out of logs.
impl fmt::Debug for ShopifySettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShopifySettings")
            .field("store", &self.store)
            .field(
                "access_token",
                &if self.access_token.is_empty() { "" } else { "***" },
            )
            .field("api_version", &self.api_version)
            .field("location_id", &self.location_id)
            .finish()
    }
}

/// Retry, timeout and buffer sizing for the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncTuning {
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_log_capacity")]
    pub log_capacity: usize,

    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for SyncTuning {
    fn default() -> Self {
        Self {
            retry_attempts: default_retry_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            log_capacity: default_log_capacity(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_size_option() -> u8 {
    1
}

fn default_api_version() -> String {
    DEFAULT_API_VERSION.to_string()
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    250
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_log_capacity() -> usize {
    100
}

fn default_channel_capacity() -> usize {
    256
}

/// Ring-size groups shipped with a fresh install.
pub fn default_groups() -> IndexMap<String, Vec<String>> {
    let mut groups = IndexMap::new();
    groups.insert("XS".to_string(), letters(&["I", "J", "K"]));
    groups.insert("S".to_string(), letters(&["L", "M", "N"]));
    groups.insert("M".to_string(), letters(&["O", "P", "R"]));
    groups.insert("L".to_string(), letters(&["S", "T", "U"]));
    groups
}

fn letters(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}
