//! Application configuration for kbsync.
//!
//! User config lives at `~/.kbsync/kbsync.toml`.
//! CLI flags override config file values, which override defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{KbSyncError, Result};
use crate::types::{EntityType, SourceKind};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "kbsync.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".kbsync";

/// Default database file name inside the config directory.
const DB_FILE_NAME: &str = "kbsync.db";

pub const WIKIDATA_ENDPOINT: &str = "https://query.wikidata.org/sparql";
pub const DBPEDIA_ENDPOINT: &str = "https://dbpedia.org/sparql";

// ---------------------------------------------------------------------------
// Config structs (matching kbsync.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Local store settings.
    #[serde(default)]
    pub store: StoreConfig,

    /// Freshness and sync policy.
    #[serde(default)]
    pub sync: SyncConfig,

    /// Remote SPARQL endpoints.
    #[serde(default)]
    pub endpoints: EndpointsConfig,

    /// Region bounding box used by the cleanup pass.
    #[serde(default)]
    pub region: RegionConfig,
}

/// `[store]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Database path. Defaults to `~/.kbsync/kbsync.db` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// `[sync]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Seconds after a successful sync before a type is stale.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    /// Per-type TTL overrides, keyed by entity type name.
    #[serde(default)]
    pub ttl_overrides: BTreeMap<String, u64>,

    /// Seconds to wait after a failed sync before trying again.
    #[serde(default = "default_failure_cooldown_secs")]
    pub failure_cooldown_secs: u64,

    /// Upper bound on a whole sync pass.
    #[serde(default = "default_overall_timeout_secs")]
    pub overall_timeout_secs: u64,

    /// How long a caller waits for somebody else's in-flight sync.
    #[serde(default = "default_lock_wait_secs")]
    pub lock_wait_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            ttl_overrides: BTreeMap::new(),
            failure_cooldown_secs: default_failure_cooldown_secs(),
            overall_timeout_secs: default_overall_timeout_secs(),
            lock_wait_secs: default_lock_wait_secs(),
        }
    }
}

fn default_ttl_secs() -> u64 {
    6 * 60 * 60
}
fn default_failure_cooldown_secs() -> u64 {
    60
}
fn default_overall_timeout_secs() -> u64 {
    45
}
fn default_lock_wait_secs() -> u64 {
    50
}

/// `[endpoints]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointsConfig {
    #[serde(default = "default_wikidata")]
    pub wikidata: EndpointConfig,

    #[serde(default = "default_dbpedia")]
    pub dbpedia: EndpointConfig,
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            wikidata: default_wikidata(),
            dbpedia: default_dbpedia(),
        }
    }
}

fn default_wikidata() -> EndpointConfig {
    EndpointConfig::with_url(WIKIDATA_ENDPOINT)
}
fn default_dbpedia() -> EndpointConfig {
    EndpointConfig::with_url(DBPEDIA_ENDPOINT)
}

/// `[endpoints.<source>]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub url: String,

    /// Per-request timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Retries after the first attempt for transient failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Minimum ms between consecutive requests to this endpoint.
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl EndpointConfig {
    fn with_url(url: &str) -> Self {
        Self {
            url: url.into(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            min_interval_ms: default_min_interval_ms(),
            enabled: true,
        }
    }
}

fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    2
}
fn default_min_interval_ms() -> u64 {
    250
}
fn default_true() -> bool {
    true
}

/// `[region]` section: records with a centroid outside this box are
/// removed by `kbsync clean`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegionConfig {
    #[serde(default = "default_min_lat")]
    pub min_lat: f64,
    #[serde(default = "default_max_lat")]
    pub max_lat: f64,
    #[serde(default = "default_min_lon")]
    pub min_lon: f64,
    #[serde(default = "default_max_lon")]
    pub max_lon: f64,
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            min_lat: default_min_lat(),
            max_lat: default_max_lat(),
            min_lon: default_min_lon(),
            max_lon: default_max_lon(),
        }
    }
}

// Ecuador including Galápagos.
fn default_min_lat() -> f64 {
    -5.0
}
fn default_max_lat() -> f64 {
    2.0
}
fn default_min_lon() -> f64 {
    -92.0
}
fn default_max_lon() -> f64 {
    -75.0
}

// ---------------------------------------------------------------------------
// Runtime settings (derived from config)
// ---------------------------------------------------------------------------

/// Runtime sync policy.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub ttl: Duration,
    pub ttl_overrides: BTreeMap<EntityType, Duration>,
    pub failure_cooldown: Duration,
    pub overall_timeout: Duration,
    pub lock_wait: Duration,
}

impl SyncSettings {
    /// TTL for one entity type, honoring overrides.
    pub fn ttl_for(&self, entity_type: EntityType) -> Duration {
        self.ttl_overrides
            .get(&entity_type)
            .copied()
            .unwrap_or(self.ttl)
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for SyncSettings {
    fn from(config: &AppConfig) -> Self {
        let sync = &config.sync;
        Self {
            ttl: Duration::from_secs(sync.ttl_secs),
            ttl_overrides: sync
                .ttl_overrides
                .iter()
                .filter_map(|(name, secs)| match name.parse::<EntityType>() {
                    Ok(ty) => Some((ty, Duration::from_secs(*secs))),
                    Err(_) => {
                        tracing::warn!(%name, "ignoring ttl override for unknown entity type");
                        None
                    }
                })
                .collect(),
            failure_cooldown: Duration::from_secs(sync.failure_cooldown_secs),
            overall_timeout: Duration::from_secs(sync.overall_timeout_secs),
            lock_wait: Duration::from_secs(sync.lock_wait_secs),
        }
    }
}

/// Runtime settings for one remote endpoint.
#[derive(Debug, Clone)]
pub struct EndpointSettings {
    pub source: SourceKind,
    pub url: url::Url,
    pub timeout: Duration,
    pub max_retries: u32,
    pub min_interval: Duration,
    pub enabled: bool,
}

impl EndpointSettings {
    /// Resolve the settings for every configured source, in priority order.
    pub fn all(config: &AppConfig) -> Result<Vec<EndpointSettings>> {
        SourceKind::ALL
            .into_iter()
            .map(|source| Self::for_source(config, source))
            .collect()
    }

    pub fn for_source(config: &AppConfig, source: SourceKind) -> Result<EndpointSettings> {
        let raw = match source {
            SourceKind::Wikidata => &config.endpoints.wikidata,
            SourceKind::Dbpedia => &config.endpoints.dbpedia,
        };
        let url = url::Url::parse(&raw.url).map_err(|e| {
            KbSyncError::config(format!("invalid {source} endpoint url '{}': {e}", raw.url))
        })?;
        Ok(Self {
            source,
            url,
            timeout: Duration::from_secs(raw.timeout_secs),
            max_retries: raw.max_retries,
            min_interval: Duration::from_millis(raw.min_interval_ms),
            enabled: raw.enabled,
        })
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.kbsync/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| KbSyncError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.kbsync/kbsync.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Resolve the database path: explicit config value, else `~/.kbsync/kbsync.db`.
pub fn database_path(config: &AppConfig) -> Result<PathBuf> {
    match &config.store.path {
        Some(path) => Ok(PathBuf::from(path)),
        None => Ok(config_dir()?.join(DB_FILE_NAME)),
    }
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| KbSyncError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| KbSyncError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| KbSyncError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let content = render_config(&AppConfig::default())?;

    std::fs::write(&path, content).map_err(|e| KbSyncError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Render a config as TOML.
pub fn render_config(config: &AppConfig) -> Result<String> {
    toml::to_string_pretty(config).map_err(|e| KbSyncError::config(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let toml_str = render_config(&AppConfig::default()).expect("serialize default config");
        assert!(toml_str.contains("ttl_secs = 21600"));
        assert!(toml_str.contains(WIKIDATA_ENDPOINT));
        assert!(toml_str.contains(DBPEDIA_ENDPOINT));
    }

    #[test]
    fn config_roundtrip() {
        let toml_str = render_config(&AppConfig::default()).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.sync.ttl_secs, 21_600);
        assert_eq!(parsed.endpoints.dbpedia.max_retries, 2);
        assert_eq!(parsed.region, RegionConfig::default());
    }

    #[test]
    fn partial_config_uses_defaults() {
        let toml_str = r#"
[store]
path = "/tmp/kb.db"

[sync]
ttl_secs = 600

[sync.ttl_overrides]
plaza = 60

[endpoints.dbpedia]
url = "http://localhost:8890/sparql"
enabled = false
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.store.path.as_deref(), Some("/tmp/kb.db"));
        assert_eq!(config.sync.failure_cooldown_secs, 60);
        assert!(!config.endpoints.dbpedia.enabled);
        assert_eq!(config.endpoints.dbpedia.timeout_secs, 30);
        assert_eq!(config.endpoints.wikidata.url, WIKIDATA_ENDPOINT);

        let settings = SyncSettings::from(&config);
        assert_eq!(settings.ttl_for(EntityType::Province), Duration::from_secs(600));
        assert_eq!(settings.ttl_for(EntityType::Plaza), Duration::from_secs(60));
    }

    #[test]
    fn endpoint_settings_from_app_config() {
        let app = AppConfig::default();
        let all = EndpointSettings::all(&app).expect("settings");
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].source, SourceKind::Wikidata);
        assert_eq!(all[0].timeout, Duration::from_secs(30));
        assert_eq!(all[1].min_interval, Duration::from_millis(250));
    }

    #[test]
    fn invalid_endpoint_url_is_config_error() {
        let mut app = AppConfig::default();
        app.endpoints.wikidata.url = "not a url".into();
        let err = EndpointSettings::for_source(&app, SourceKind::Wikidata).unwrap_err();
        assert!(err.to_string().contains("invalid wikidata endpoint url"));
    }

    #[test]
    fn default_region_covers_galapagos() {
        let region = RegionConfig::default();
        assert!(region.min_lon <= -91.0 && region.max_lon >= -76.0);
        assert!(region.min_lat <= -1.5 && region.max_lat >= 1.0);
    }
}
