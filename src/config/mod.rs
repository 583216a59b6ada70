use crate::models::{LogEntry, SyncConfig};
use crate::services::registry::{ConfigError, GroupRegistry};
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use serde::Deserialize;
use std::fs;
use std::sync::{Mutex, RwLock};

/// Environment variable prefix for overrides, e.g. `STOCKSYNC_SHOPIFY__ACCESS_TOKEN`.
pub const ENV_PREFIX: &str = "STOCKSYNC";

/// Values taken from the environment.
///
/// Overrides are applied to every [`ConfigStore::snapshot`] but never written
/// back to disk, so a token supplied through the environment stays out of the file.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EnvOverrides {
    #[serde(default)]
    pub enabled: Option<bool>,

    #[serde(default)]
    pub shopify: ShopifyOverrides,

    /// Directory holding `stocksync.yaml` and `activity.yaml`.
    #[serde(default)]
    pub config_dir: Option<String>,

    #[serde(default)]
    pub log_dir: Option<String>,

    #[serde(default)]
    pub debug: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ShopifyOverrides {
    #[serde(default)]
    pub store: Option<String>,

    #[serde(default)]
    pub access_token: Option<String>,

    #[serde(default)]
    pub api_version: Option<String>,

    #[serde(default)]
    pub location_id: Option<u64>,
}

impl EnvOverrides {
    /// Read overrides from `STOCKSYNC_*` variables.
    pub fn from_env() -> Result<Self> {
        Self::from_env_prefix(ENV_PREFIX)
    }

    /// Read overrides from variables with a custom prefix (`{PREFIX}_SHOPIFY__STORE`, ...).
    pub fn from_env_prefix(prefix: &str) -> Result<Self> {
        config::Config::builder()
            .add_source(
                config::Environment::with_prefix(prefix)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read environment overrides")?
            .try_deserialize()
            .context("Failed to parse environment overrides")
    }

    fn apply(&self, config: &mut SyncConfig) {
        if let Some(enabled) = self.enabled {
            config.enabled = enabled;
        }
        if let Some(store) = &self.shopify.store {
            config.shopify.store = store.clone();
        }
        if let Some(token) = &self.shopify.access_token {
            config.shopify.access_token = token.clone();
        }
        if let Some(version) = &self.shopify.api_version {
            config.shopify.api_version = version.clone();
        }
        if let Some(location) = self.shopify.location_id {
            config.shopify.location_id = Some(location);
        }
    }
}

/// Configuration store for `stocksync.yaml` and the persisted activity log.
///
/// The file config is held in memory. Reads go through [`snapshot`](Self::snapshot);
/// every mutation goes through [`update`](Self::update), which serializes writers,
/// validates, persists, and only then publishes the new config.
#[derive(Debug)]
pub struct ConfigStore {
    config_dir: Utf8PathBuf,
    config_path: Utf8PathBuf,
    activity_path: Utf8PathBuf,
    overrides: EnvOverrides,
    current: RwLock<SyncConfig>,
    write_lock: Mutex<()>,
}

impl ConfigStore {
    /// Open the store in `config_dir` with overrides from the environment.
    pub fn new<P: AsRef<Utf8Path>>(config_dir: P) -> Result<Self> {
        Self::open(config_dir, EnvOverrides::from_env()?)
    }

    /// Open the store in `config_dir` with explicit overrides.
    ///
    /// Creates the directory if needed. A missing config file is replaced by
    /// the defaults, which are written to disk.
    pub fn open<P: AsRef<Utf8Path>>(config_dir: P, overrides: EnvOverrides) -> Result<Self> {
        let config_dir = config_dir.as_ref().to_path_buf();

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)
                .with_context(|| format!("Failed to create config directory: {}", config_dir))?;
        }

        let config_path = config_dir.join("stocksync.yaml");
        let activity_path = config_dir.join("activity.yaml");

        let config = if config_path.exists() {
            let file_contents = fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read config: {}", config_path))?;
            let config: SyncConfig = serde_yaml_ng::from_str(&file_contents)
                .with_context(|| format!("Failed to parse config: {}", config_path))?;
            validate(&config).with_context(|| format!("Invalid config: {}", config_path))?;
            tracing::info!("Loaded config from {}", config_path);
            config
        } else {
            tracing::warn!("Config file not found at {}, using defaults", config_path);
            let config = SyncConfig::default();
            write_yaml(&config_path, &config)?;
            config
        };

        Ok(Self {
            config_dir,
            config_path,
            activity_path,
            overrides,
            current: RwLock::new(config),
            write_lock: Mutex::new(()),
        })
    }

    /// Current effective config (file values with environment overrides applied).
    pub fn snapshot(&self) -> SyncConfig {
        let mut config = self.current.read().unwrap().clone();
        self.overrides.apply(&mut config);
        config
    }

    /// Apply a mutation: validate, persist, then publish.
    ///
    /// Concurrent callers are serialized, so no update is lost. On error the
    /// previous config stays in effect.
    pub fn update<F>(&self, mutate: F) -> Result<SyncConfig>
    where
        F: FnOnce(&mut SyncConfig),
    {
        let _guard = self.write_lock.lock().unwrap();

        let mut next = self.current.read().unwrap().clone();
        mutate(&mut next);

        validate(&next).context("Rejected config update")?;
        write_yaml(&self.config_path, &next)?;

        *self.current.write().unwrap() = next;
        tracing::info!("Saved config to {}", self.config_path);
        Ok(self.snapshot())
    }

    /// Turn synchronization on or off.
    pub fn set_enabled(&self, enabled: bool) -> Result<SyncConfig> {
        self.update(|config| config.enabled = enabled)
    }

    /// Replace the group partition. Overlapping groups are rejected.
    pub fn set_groups(&self, groups: IndexMap<String, Vec<String>>) -> Result<SyncConfig> {
        self.update(|config| config.groups = groups)
    }

    /// Set the store identifier and access token.
    pub fn set_credentials(&self, store: &str, access_token: &str) -> Result<SyncConfig> {
        self.update(|config| {
            config.shopify.store = store.trim().to_string();
            config.shopify.access_token = access_token.trim().to_string();
        })
    }

    /// Load persisted activity entries, newest first. Missing file means no entries.
    pub fn load_activity(&self) -> Result<Vec<LogEntry>> {
        if !self.activity_path.exists() {
            return Ok(Vec::new());
        }

        let file_contents = fs::read_to_string(&self.activity_path)
            .with_context(|| format!("Failed to read activity log: {}", self.activity_path))?;

        serde_yaml_ng::from_str(&file_contents)
            .with_context(|| format!("Failed to parse activity log: {}", self.activity_path))
    }

    /// Persist activity entries, newest first.
    pub fn save_activity(&self, entries: &[LogEntry]) -> Result<()> {
        write_yaml(&self.activity_path, entries)
    }

    /// Get the configuration directory path.
    pub fn config_dir(&self) -> &Utf8Path {
        &self.config_dir
    }

    pub fn config_path(&self) -> &Utf8Path {
        &self.config_path
    }
}

/// Check that a config can drive the engine.
pub fn validate(config: &SyncConfig) -> Result<(), ConfigError> {
    if !(1..=3).contains(&config.size_option) {
        return Err(ConfigError::InvalidSizeOption(config.size_option));
    }
    GroupRegistry::from_groups(&config.groups)?;
    Ok(())
}

fn write_yaml<T: serde::Serialize + ?Sized>(path: &Utf8Path, value: &T) -> Result<()> {
    let yaml_string =
        serde_yaml_ng::to_string(value).with_context(|| format!("Failed to serialize {}", path))?;

    // Write-then-rename so a crash never leaves a truncated file
    let tmp_path = path.with_extension("yaml.tmp");
    fs::write(&tmp_path, yaml_string)
        .with_context(|| format!("Failed to write {}", tmp_path))?;
    fs::rename(&tmp_path, path).with_context(|| format!("Failed to replace {}", path))?;
    Ok(())
}
