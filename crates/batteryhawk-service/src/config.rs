//! Configuration: three JSON sections (`system`, `devices`, `vehicles`)
//! loaded from a directory, with environment-variable overrides and
//! file-watch hot-reload.
//!
//! Devices and vehicles are the [`batteryhawk_core`] registries' own
//! persisted shape; this module owns reading/writing those files and
//! implements the registries' persistence traits so a registry mutation
//! writes straight through to disk. The `system` section is this crate's
//! own schema (bluetooth, discovery, storage, mqtt, api, logging,
//! vehicle association).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use notify::{Event as NotifyEvent, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::fs;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info, warn};

use batteryhawk_core::registry::SectionPersistence;
use batteryhawk_core::vehicle_registry::VehicleSectionPersistence;
use batteryhawk_types::{Device, Vehicle};

/// `BATTERYHAWK_CONFIG_DIR` overrides the default config directory.
pub const CONFIG_DIR_ENV_VAR: &str = "BATTERYHAWK_CONFIG_DIR";

/// Default configuration directory when unset.
pub fn default_config_dir() -> PathBuf {
    std::env::var_os(CONFIG_DIR_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/data"))
}

/// Section identifiers, matching the three config files on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Section {
    System,
    Devices,
    Vehicles,
}

impl Section {
    fn filename(self) -> &'static str {
        match self {
            Section::System => "system.json",
            Section::Devices => "devices.json",
            Section::Vehicles => "vehicles.json",
        }
    }

    fn env_key(self) -> &'static str {
        match self {
            Section::System => "system",
            Section::Devices => "devices",
            Section::Vehicles => "vehicles",
        }
    }

    fn from_env_key(key: &str) -> Option<Self> {
        match key {
            "system" => Some(Section::System),
            "devices" => Some(Section::Devices),
            "vehicles" => Some(Section::Vehicles),
            _ => None,
        }
    }

    fn all() -> [Section; 3] {
        [Section::System, Section::Devices, Section::Vehicles]
    }
}

/// `system.bluetooth`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BluetoothConfig {
    pub adapter: Option<String>,
    pub max_concurrent_connections: usize,
    /// Maximum age of an open session before the pool's cleanup task closes
    /// it, mirroring [`batteryhawk_core::PoolConfig::connection_timeout`].
    pub connection_timeout_seconds: f64,
    pub test_mode: bool,
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        Self {
            adapter: None,
            max_concurrent_connections: 3,
            connection_timeout_seconds: 30.0,
            test_mode: false,
        }
    }
}

/// `system.discovery.auto_configure.rules.<family>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoConfigRuleConfig {
    pub auto_configure: bool,
    pub default_name_template: String,
    pub polling_interval: u32,
}

impl Default for AutoConfigRuleConfig {
    fn default() -> Self {
        Self {
            auto_configure: true,
            default_name_template: "{family}-{suffix}".to_string(),
            polling_interval: batteryhawk_types::device::DEFAULT_POLLING_INTERVAL_S,
        }
    }
}

/// `system.discovery.auto_configure`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoConfigureConfig {
    pub enabled: bool,
    pub confidence_threshold: f64,
    pub rules: HashMap<String, AutoConfigRuleConfig>,
}

impl Default for AutoConfigureConfig {
    fn default() -> Self {
        let mut rules = HashMap::new();
        rules.insert("bm2".to_string(), AutoConfigRuleConfig::default());
        rules.insert("bm6".to_string(), AutoConfigRuleConfig::default());
        Self {
            enabled: true,
            confidence_threshold: 0.7,
            rules,
        }
    }
}

/// `system.discovery`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub initial_scan: bool,
    pub scan_duration: u64,
    pub periodic_interval: u64,
    /// When true, a scan returns as soon as a mac the pool has never
    /// connected to is observed, instead of always running the full
    /// `scan_duration` (spec.md §4.5).
    pub stop_on_new_device: bool,
    pub auto_configure: AutoConfigureConfig,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            initial_scan: true,
            scan_duration: 10,
            periodic_interval: 12 * 3600,
            stop_on_new_device: false,
            auto_configure: AutoConfigureConfig::default(),
        }
    }
}

/// `system.storage.error_recovery`, mirroring [`batteryhawk_store::resilient::ResilientConfig`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorRecoveryConfig {
    pub max_retry_attempts: u32,
    pub retry_delay_seconds: f64,
    pub retry_backoff_multiplier: f64,
    pub max_retry_delay_seconds: f64,
    pub buffer_max_size: usize,
    pub buffer_flush_interval_seconds: f64,
    pub connection_timeout_seconds: f64,
    pub health_check_interval_seconds: f64,
}

impl Default for ErrorRecoveryConfig {
    fn default() -> Self {
        Self {
            max_retry_attempts: 3,
            retry_delay_seconds: 1.0,
            retry_backoff_multiplier: 2.0,
            max_retry_delay_seconds: 60.0,
            buffer_max_size: 10_000,
            buffer_flush_interval_seconds: 30.0,
            connection_timeout_seconds: 30.0,
            health_check_interval_seconds: 60.0,
        }
    }
}

/// `system.storage`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: String,
    pub enabled: bool,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout: u64,
    pub retries: u32,
    pub retention_policies: HashMap<String, String>,
    pub error_recovery: ErrorRecoveryConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: "json".to_string(),
            enabled: true,
            host: None,
            port: None,
            database: None,
            username: None,
            password: None,
            timeout: 30,
            retries: 3,
            retention_policies: HashMap::new(),
            error_recovery: ErrorRecoveryConfig::default(),
        }
    }
}

/// `system.mqtt`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub enabled: bool,
    pub broker: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub topic_prefix: String,
    pub qos: u8,
    pub keepalive: u64,
    pub tls: bool,
    pub max_retries: u32,
    pub initial_retry_delay: f64,
    pub max_retry_delay: f64,
    pub backoff_multiplier: f64,
    pub jitter_factor: f64,
    pub connection_timeout: u64,
    pub health_check_interval: u64,
    pub message_queue_size: usize,
    pub message_retry_limit: u32,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            broker: "localhost".to_string(),
            port: 1883,
            username: None,
            password: None,
            topic_prefix: "batteryhawk".to_string(),
            qos: 1,
            keepalive: 60,
            tls: false,
            max_retries: 5,
            initial_retry_delay: 1.0,
            max_retry_delay: 60.0,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
            connection_timeout: 30,
            health_check_interval: 60,
            message_queue_size: 1000,
            message_retry_limit: 5,
        }
    }
}

/// `system.api`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub debug: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "0.0.0.0".to_string(),
            port: 8080,
            debug: false,
        }
    }
}

/// A single vehicle-association rule under `system.vehicle_association`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VehicleAssociationEntry {
    pub id: Option<String>,
    pub name: Option<String>,
    #[serde(default)]
    pub association_rules: AssociationRules,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssociationRules {
    pub device_type: Option<String>,
    pub name_pattern: Option<String>,
    pub mac_pattern: Option<String>,
}

/// `system.vehicle_association`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VehicleAssociationConfig {
    pub vehicles: Vec<VehicleAssociationEntry>,
}

/// `system.logging`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// API key and rate-limit settings, ambient to every section above but
/// kept out of the hot-reloadable `system` JSON since changing them
/// mid-flight would yank auth out from under in-flight requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub api_key_enabled: bool,
    pub api_key: Option<String>,
    pub rate_limit_enabled: bool,
    pub rate_limit_requests: u32,
    pub rate_limit_window_secs: u64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            api_key_enabled: false,
            api_key: None,
            rate_limit_enabled: false,
            rate_limit_requests: 100,
            rate_limit_window_secs: 60,
        }
    }
}

/// The full `system` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub version: String,
    pub logging: LoggingConfig,
    pub bluetooth: BluetoothConfig,
    pub discovery: DiscoveryConfig,
    pub storage: StorageConfig,
    pub mqtt: MqttConfig,
    pub api: ApiConfig,
    pub vehicle_association: VehicleAssociationConfig,
    #[serde(skip)]
    pub security: SecurityConfig,
}

const SYSTEM_VERSION: &str = "1.0";

fn default_system_value() -> Value {
    serde_json::json!({
        "version": SYSTEM_VERSION,
        "logging": LoggingConfig::default(),
        "bluetooth": BluetoothConfig::default(),
        "discovery": DiscoveryConfig::default(),
        "storage": StorageConfig::default(),
        "mqtt": MqttConfig::default(),
        "api": ApiConfig::default(),
        "vehicle_association": VehicleAssociationConfig::default(),
    })
}

fn default_devices_value() -> Value {
    serde_json::json!({"version": SYSTEM_VERSION, "devices": {}})
}

fn default_vehicles_value() -> Value {
    serde_json::json!({"version": SYSTEM_VERSION, "vehicles": {}, "next_seq": 1})
}

/// Recursively fill in keys present in `default` but absent from `config`.
fn merge_defaults(config: &mut Value, default: &Value) {
    let (Value::Object(config), Value::Object(default)) = (config, default) else {
        return;
    };
    for (k, v) in default {
        match config.get_mut(k) {
            None => {
                config.insert(k.clone(), v.clone());
            }
            Some(existing) => merge_defaults(existing, v),
        }
    }
}

/// Errors from loading, saving, or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("failed to parse {path}: {source}")]
    Parse { path: PathBuf, source: serde_json::Error },
    #[error("failed to write {path}: {source}")]
    Write { path: PathBuf, source: std::io::Error },
    #[error("unknown config section: {0}")]
    UnknownSection(String),
    #[error("invalid value for {field}: {message}")]
    Validation { field: String, message: String },
}

/// Result of a section reload, handed to registered listeners.
pub type ReloadListener = Arc<dyn Fn(Section, &Value) + Send + Sync>;

/// Owns the three JSON config sections on disk, environment overrides,
/// and the file-watch hot-reload loop.
pub struct ConfigManager {
    dir: PathBuf,
    system: RwLock<SystemConfig>,
    devices_raw: RwLock<Value>,
    vehicles_raw: RwLock<Value>,
    listeners: RwLock<Vec<ReloadListener>>,
    // Held only to keep the watcher alive for the manager's lifetime;
    // never read back out.
    _watcher: tokio::sync::Mutex<Option<notify::RecommendedWatcher>>,
}

impl ConfigManager {
    /// Load all three sections from `dir`, creating defaults for any that
    /// are missing, and start the hot-reload watcher.
    pub async fn load(dir: impl Into<PathBuf>) -> Result<Arc<Self>, ConfigError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await.map_err(|e| ConfigError::Write {
            path: dir.clone(),
            source: e,
        })?;

        let mut system_value = load_json_or_default(&dir, Section::System, default_system_value()).await?;
        merge_defaults(&mut system_value, &default_system_value());
        let devices_value = load_json_or_default(&dir, Section::Devices, default_devices_value()).await?;
        let vehicles_value = load_json_or_default(&dir, Section::Vehicles, default_vehicles_value()).await?;

        let mut system: SystemConfig = serde_json::from_value(system_value).map_err(|e| ConfigError::Parse {
            path: dir.join(Section::System.filename()),
            source: e,
        })?;

        apply_env_overrides(Section::System, &mut system)?;
        system.security = security_from_env();

        let manager = Arc::new(Self {
            dir: dir.clone(),
            system: RwLock::new(system),
            devices_raw: RwLock::new(devices_value),
            vehicles_raw: RwLock::new(vehicles_value),
            listeners: RwLock::new(Vec::new()),
            _watcher: tokio::sync::Mutex::new(None),
        });

        manager.save_section(Section::System).await?;

        let watcher = manager.clone().spawn_watcher()?;
        *manager._watcher.lock().await = Some(watcher);
        Ok(manager)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn system(&self) -> SystemConfig {
        self.system.read().await.clone()
    }

    /// Merge-update the `system` section's allowed subsections, then
    /// persist and notify listeners. `patch` must be an object whose keys
    /// are section names (`logging`, `bluetooth`, `discovery`, `storage`,
    /// `mqtt`, `api`).
    pub async fn patch_system(&self, patch: &Value) -> Result<SystemConfig, ConfigError> {
        const ALLOWED: &[&str] = &["logging", "bluetooth", "discovery", "storage", "mqtt", "api"];
        let Value::Object(fields) = patch else {
            return Err(ConfigError::Validation {
                field: "system".to_string(),
                message: "patch body must be a JSON object".to_string(),
            });
        };
        for key in fields.keys() {
            if !ALLOWED.contains(&key.as_str()) {
                return Err(ConfigError::UnknownSection(key.clone()));
            }
        }

        let mut current = serde_json::to_value(&*self.system.read().await).unwrap_or_else(|_| Value::Null);
        merge_defaults(&mut current, patch);
        if let Value::Object(current_obj) = &mut current {
            if let Value::Object(patch_obj) = patch {
                for (k, v) in patch_obj {
                    current_obj.insert(k.clone(), v.clone());
                }
            }
        }

        let mut updated: SystemConfig = serde_json::from_value(current).map_err(|e| ConfigError::Parse {
            path: self.dir.join(Section::System.filename()),
            source: e,
        })?;
        updated.security = self.system.read().await.security.clone();
        *self.system.write().await = updated.clone();
        self.save_section(Section::System).await?;
        self.notify_listeners(Section::System).await;
        Ok(updated)
    }

    async fn save_section(&self, section: Section) -> Result<(), ConfigError> {
        let value = match section {
            Section::System => serde_json::to_value(&*self.system.read().await),
            Section::Devices => Ok(self.devices_raw.read().await.clone()),
            Section::Vehicles => Ok(self.vehicles_raw.read().await.clone()),
        }
        .unwrap_or(Value::Null);
        write_json_atomic(&self.dir, section, &value).await
    }

    async fn reload_section(&self, section: Section) -> Result<(), ConfigError> {
        let path = self.dir.join(section.filename());
        let value = read_json(&path).await?;
        match section {
            Section::System => {
                let mut value = value;
                merge_defaults(&mut value, &default_system_value());
                let mut config: SystemConfig = serde_json::from_value(value).map_err(|e| ConfigError::Parse {
                    path,
                    source: e,
                })?;
                apply_env_overrides(Section::System, &mut config)?;
                config.security = security_from_env();
                *self.system.write().await = config;
            }
            Section::Devices => {
                *self.devices_raw.write().await = value;
            }
            Section::Vehicles => {
                *self.vehicles_raw.write().await = value;
            }
        }
        Ok(())
    }

    pub async fn register_listener(&self, cb: ReloadListener) {
        self.listeners.write().await.push(cb);
    }

    async fn notify_listeners(&self, section: Section) {
        let value = match section {
            Section::System => serde_json::to_value(&*self.system.read().await).unwrap_or(Value::Null),
            Section::Devices => self.devices_raw.read().await.clone(),
            Section::Vehicles => self.vehicles_raw.read().await.clone(),
        };
        for listener in self.listeners.read().await.iter() {
            listener(section, &value);
        }
    }

    fn spawn_watcher(self: Arc<Self>) -> Result<notify::RecommendedWatcher, ConfigError> {
        let (tx, mut rx) = mpsc::unbounded_channel::<NotifyEvent>();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<NotifyEvent>| {
            if let Ok(event) = res {
                let _ = tx.send(event);
            }
        })
        .map_err(|e| ConfigError::Write {
            path: self.dir.clone(),
            source: std::io::Error::other(e),
        })?;
        watcher
            .watch(&self.dir, RecursiveMode::NonRecursive)
            .map_err(|e| ConfigError::Write {
                path: self.dir.clone(),
                source: std::io::Error::other(e),
            })?;

        let manager = self;
        tokio::spawn(async move {
            // Debounce bursts of events for the same file (editors often
            // write-then-rename, firing multiple notifications per save).
            let mut pending: Option<Section> = None;
            loop {
                let event = tokio::select! {
                    event = rx.recv() => match event {
                        Some(event) => event,
                        None => break,
                    },
                    _ = tokio::time::sleep(std::time::Duration::from_millis(200)), if pending.is_some() => {
                        if let Some(section) = pending.take() {
                            debug!(?section, "config file changed, reloading");
                            if let Err(e) = manager.reload_section(section).await {
                                error!(%e, "failed to reload config section");
                            } else {
                                manager.notify_listeners(section).await;
                            }
                        }
                        continue;
                    }
                };
                for path in event.paths {
                    let Some(name) = path.file_name().and_then(|n| n.to_str()) else { continue };
                    let section = Section::all().into_iter().find(|s| s.filename() == name);
                    if let Some(section) = section {
                        pending = Some(section);
                    }
                }
            }
        });

        Ok(watcher)
    }
}

async fn load_json_or_default(dir: &Path, section: Section, default: Value) -> Result<Value, ConfigError> {
    let path = dir.join(section.filename());
    if !path.exists() {
        write_json_atomic(dir, section, &default).await?;
        return Ok(default);
    }
    match read_json(&path).await {
        Ok(value) => Ok(value),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to load config, restoring default");
            write_json_atomic(dir, section, &default).await?;
            Ok(default)
        }
    }
}

async fn read_json(path: &Path) -> Result<Value, ConfigError> {
    let contents = fs::read_to_string(path).await.map_err(|e| ConfigError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;
    serde_json::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}

async fn write_json_atomic(dir: &Path, section: Section, value: &Value) -> Result<(), ConfigError> {
    let path = dir.join(section.filename());
    let tmp_path = dir.join(format!("{}.tmp", section.filename()));
    let body = serde_json::to_string_pretty(value).unwrap_or_default();
    fs::write(&tmp_path, body).await.map_err(|e| ConfigError::Write {
        path: tmp_path.clone(),
        source: e,
    })?;
    fs::rename(&tmp_path, &path).await.map_err(|e| ConfigError::Write { path, source: e })
}

/// Reads API-key and rate-limit settings directly from the environment.
/// Kept out of the JSON `system` section (and its hot-reload path) so an
/// edit to `system.json` can never silently disable authentication.
fn security_from_env() -> SecurityConfig {
    let mut security = SecurityConfig::default();
    if let Ok(key) = std::env::var("BATTERYHAWK_API_KEY") {
        if !key.is_empty() {
            security.api_key_enabled = true;
            security.api_key = Some(key);
        }
    }
    if let Ok(v) = std::env::var("BATTERYHAWK_RATE_LIMIT_ENABLED") {
        security.rate_limit_enabled = v.eq_ignore_ascii_case("true") || v == "1";
    }
    if let Ok(v) = std::env::var("BATTERYHAWK_RATE_LIMIT_REQUESTS") {
        if let Ok(n) = v.parse() {
            security.rate_limit_requests = n;
        }
    }
    if let Ok(v) = std::env::var("BATTERYHAWK_RATE_LIMIT_WINDOW_SECS") {
        if let Ok(n) = v.parse() {
            security.rate_limit_window_secs = n;
        }
    }
    security
}

/// Apply `BATTERYHAWK_<SECTION>_<KEY1>_<KEY2>=<value>` overrides for the
/// `system` section. Values are parsed as JSON where possible, falling
/// back to the raw string.
fn apply_env_overrides(section: Section, config: &mut SystemConfig) -> Result<(), ConfigError> {
    let mut value = serde_json::to_value(&*config).map_err(|e| ConfigError::Validation {
        field: "system".to_string(),
        message: e.to_string(),
    })?;

    for (key, raw) in std::env::vars() {
        let Some(rest) = key.strip_prefix("BATTERYHAWK_") else { continue };
        let parts: Vec<String> = rest.to_ascii_lowercase().split('_').map(str::to_string).collect();
        let Some((head, keys)) = parts.split_first() else { continue };
        if Section::from_env_key(head) != Some(section) || keys.is_empty() {
            continue;
        }

        let parsed: Value = serde_json::from_str(&raw).unwrap_or_else(|_| Value::String(raw.clone()));
        if let Value::Object(root) = &mut value {
            let mut cursor = root;
            for k in &keys[..keys.len() - 1] {
                let next = cursor
                    .entry(k.clone())
                    .or_insert_with(|| Value::Object(serde_json::Map::new()));
                let Value::Object(next) = next else {
                    warn!(env = %key, "config override path is not an object, skipping");
                    continue;
                };
                cursor = next;
            }
            cursor.insert(keys[keys.len() - 1].clone(), parsed);
            info!(env = %key, "applied configuration override");
        }
    }

    merge_defaults(&mut value, &default_system_value());
    *config = serde_json::from_value(value).map_err(|e| ConfigError::Validation {
        field: "system".to_string(),
        message: e.to_string(),
    })?;
    Ok(())
}

/// Bridges [`ConfigManager`]'s `devices` section to the device registry's
/// persistence trait.
pub struct DevicesPersistence {
    manager: Arc<ConfigManager>,
}

impl DevicesPersistence {
    pub fn new(manager: Arc<ConfigManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl SectionPersistence for DevicesPersistence {
    async fn persist(&self, devices: &HashMap<String, Device>) -> batteryhawk_core::Result<()> {
        let value = serde_json::json!({"version": SYSTEM_VERSION, "devices": devices});
        *self.manager.devices_raw.write().await = value;
        self.manager.save_section(Section::Devices).await.map_err(|e| {
            batteryhawk_core::Error::InvalidConfig(e.to_string())
        })?;
        Ok(())
    }
}

/// Bridges [`ConfigManager`]'s `vehicles` section to the vehicle
/// registry's persistence trait.
pub struct VehiclesPersistence {
    manager: Arc<ConfigManager>,
}

impl VehiclesPersistence {
    pub fn new(manager: Arc<ConfigManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl VehicleSectionPersistence for VehiclesPersistence {
    async fn persist(&self, vehicles: &HashMap<String, Vehicle>) -> batteryhawk_core::Result<()> {
        let next_seq = self
            .manager
            .vehicles_raw
            .read()
            .await
            .get("next_seq")
            .and_then(Value::as_u64)
            .unwrap_or(1);
        let value = serde_json::json!({
            "version": SYSTEM_VERSION,
            "vehicles": vehicles,
            "next_seq": next_seq,
        });
        *self.manager.vehicles_raw.write().await = value;
        self.manager.save_section(Section::Vehicles).await.map_err(|e| {
            batteryhawk_core::Error::InvalidConfig(e.to_string())
        })?;
        Ok(())
    }
}

/// Read the persisted `devices` section into a map, for registry startup.
pub async fn load_devices(manager: &ConfigManager) -> HashMap<String, Device> {
    let raw = manager.devices_raw.read().await;
    raw.get("devices")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default()
}

/// Read the persisted `vehicles` section and next-sequence counter, for
/// registry startup.
pub async fn load_vehicles(manager: &ConfigManager) -> (HashMap<String, Vehicle>, u64) {
    let raw = manager.vehicles_raw.read().await;
    let vehicles = raw
        .get("vehicles")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default();
    let next_seq = raw.get("next_seq").and_then(Value::as_u64).unwrap_or(1);
    (vehicles, next_seq)
}
