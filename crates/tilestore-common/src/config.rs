//! Engine configuration.
//!
//! Loaded once at process start from a YAML or JSON file and then shared
//! read-only (typically behind an `Arc`). Values may reference environment
//! variables with `${VAR}` or `${VAR:-default}`.
//!
//! ```yaml
//! storage_client_config:
//!   local:
//!     type: fs
//!     configure_params:
//!       base_directory: /data/tilestore
//! metadata_config:
//!   db_config:
//!     backend: postgres
//!     host: localhost
//!     port: 5432
//!     database: tilestore
//!     user: tilestore
//!     password: ${TILESTORE_DB_PASSWORD}
//!   datasource_config:
//!     landsat:
//!       alias: ls
//!       authority: [create, read, write, delete]
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{StoreError, StoreResult};

/// Environment variable naming the configuration file.
pub const CONFIG_PATH_ENV: &str = "TILESTORE_CONFIG_PATH";

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Named storage endpoints.
    pub storage_client_config: BTreeMap<String, StorageClientConfig>,

    /// Endpoint used by datasources that do not name one. Defaults to the
    /// first endpoint in name order.
    #[serde(default)]
    pub default_storage: Option<String>,

    pub metadata_config: MetadataConfig,

    #[serde(default)]
    pub engine: EngineSettings,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// One storage endpoint: `{type, configure_params}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "configure_params", rename_all = "snake_case")]
pub enum StorageClientConfig {
    /// Local or network-mounted filesystem rooted at `base_directory`.
    Fs { base_directory: PathBuf },

    /// Any S3-compatible object store.
    S3 {
        endpoint: String,
        bucket: String,
        access_key: String,
        secret_key: String,
        #[serde(default = "default_region")]
        region: String,
        #[serde(default)]
        allow_http: bool,
    },

    /// Ceph RADOS gateway, addressed as `http://{host}:{port}/{bucket}`.
    CephRgw {
        host: String,
        port: u16,
        bucket: String,
        access_key: String,
        secret_key: String,
    },

    /// Process-local store, for tests and embedding.
    Memory,
}

impl StorageClientConfig {
    pub fn type_name(&self) -> &'static str {
        match self {
            StorageClientConfig::Fs { .. } => "fs",
            StorageClientConfig::S3 { .. } => "s3",
            StorageClientConfig::CephRgw { .. } => "ceph_rgw",
            StorageClientConfig::Memory => "memory",
        }
    }
}

fn default_region() -> String {
    "us-east-1".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataConfig {
    pub db_config: DbConfig,
    pub datasource_config: BTreeMap<String, DatasourceConfig>,
    #[serde(default)]
    pub cache_config: CacheConfig,
}

/// Document store connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbConfig {
    #[serde(default)]
    pub backend: DbBackend,
    #[serde(default = "default_db_host")]
    pub host: String,
    #[serde(default = "default_db_port")]
    pub port: u16,
    #[serde(default = "default_db_name")]
    pub database: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_max_pool_size")]
    pub max_pool_size: u32,
}

impl DbConfig {
    /// Connection URL for the Postgres backend.
    pub fn connection_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.database
        )
    }
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            backend: DbBackend::default(),
            host: default_db_host(),
            port: default_db_port(),
            database: default_db_name(),
            user: String::new(),
            password: String::new(),
            max_pool_size: default_max_pool_size(),
        }
    }
}

fn default_db_host() -> String {
    "localhost".to_string()
}

fn default_db_port() -> u16 {
    5432
}

fn default_db_name() -> String {
    "tilestore".to_string()
}

fn default_max_pool_size() -> u32 {
    10
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DbBackend {
    #[default]
    Postgres,
    Memory,
}

/// Per-datasource alias and permitted actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasourceConfig {
    pub alias: String,
    #[serde(default)]
    pub authority: Vec<Action>,
    /// Endpoint new datasets are stored on.
    #[serde(default)]
    pub storage: Option<String>,
}

impl DatasourceConfig {
    pub fn permits(&self, action: Action) -> bool {
        self.authority.contains(&action)
    }
}

/// An action gated by datasource authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Create,
    Read,
    Write,
    Delete,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Action::Create => "create",
            Action::Read => "read",
            Action::Write => "write",
            Action::Delete => "delete",
        };
        f.write_str(s)
    }
}

impl FromStr for Action {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "create" => Ok(Action::Create),
            "read" => Ok(Action::Read),
            "write" => Ok(Action::Write),
            "delete" => Ok(Action::Delete),
            other => Err(StoreError::Config(format!("unknown action '{}'", other))),
        }
    }
}

/// Tile cache settings. A size of zero disables caching.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Cache budget in bytes of decoded samples.
    #[serde(default)]
    pub max_cache_size: usize,
}

/// Tile codec compression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    None,
    #[default]
    Deflate,
}

/// Region engine tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Tiles fetched concurrently by one region read.
    pub read_concurrency: usize,
    pub compression: Compression,
    /// zlib level (0-9).
    pub compression_level: u32,
    /// Longest edge, in pixels, a single region request may have.
    /// Unlimited when unset.
    pub max_region_edge: Option<usize>,
    /// Tile size used when a band is created without one.
    pub default_tile_size: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            read_concurrency: 8,
            compression: Compression::Deflate,
            compression_level: 6,
            max_region_edge: None,
            default_tile_size: 2048,
        }
    }
}

impl EngineSettings {
    pub fn validate(&self) -> Result<(), String> {
        if self.read_concurrency == 0 {
            return Err("read_concurrency must be greater than 0".to_string());
        }
        if self.compression_level > 9 {
            return Err("compression_level must be between 0 and 9".to_string());
        }
        if self.max_region_edge == Some(0) {
            return Err("max_region_edge must be greater than 0".to_string());
        }
        if self.default_tile_size == 0 {
            return Err("default_tile_size must be greater than 0".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `trace`, `debug`, `info`, `warn` or `error`, or a full filter directive.
    pub level: String,
    /// `json` or `pretty`.
    pub format: String,
    /// Include the event target in output.
    pub target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            target: true,
        }
    }
}

impl EngineConfig {
    /// Load from a `.yaml`/`.yml` or `.json` file and validate.
    pub fn load(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            StoreError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        let expanded = expand_env_vars(&content)?;

        let config: EngineConfig = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&expanded).map_err(|e| {
                StoreError::Config(format!("failed to parse {}: {}", path.display(), e))
            })?,
            Some("yaml") | Some("yml") => serde_yaml::from_str(&expanded)?,
            _ => {
                return Err(StoreError::Config(format!(
                    "unsupported config format: {}",
                    path.display()
                )))
            }
        };

        config.validate().map_err(StoreError::Config)?;
        Ok(config)
    }

    /// Load from the first existing candidate: `explicit`, then
    /// `$TILESTORE_CONFIG_PATH`, then the default locations.
    pub fn discover(explicit: Option<&Path>) -> StoreResult<Self> {
        let candidates = candidate_paths(explicit);
        for candidate in &candidates {
            if candidate.is_file() {
                return Self::load(candidate);
            }
        }
        Err(StoreError::Config(format!(
            "no configuration file found; set {} or create one of {:?}",
            CONFIG_PATH_ENV, candidates
        )))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.storage_client_config.is_empty() {
            return Err("storage_client_config must define at least one endpoint".to_string());
        }
        if self.metadata_config.datasource_config.is_empty() {
            return Err("datasource_config must define at least one datasource".to_string());
        }
        if let Some(default) = &self.default_storage {
            if !self.storage_client_config.contains_key(default) {
                return Err(format!("default_storage '{}' is not a configured endpoint", default));
            }
        }

        let mut aliases = HashSet::new();
        for (name, ds) in &self.metadata_config.datasource_config {
            if ds.alias.is_empty() || ds.alias.contains('/') {
                return Err(format!("datasource '{}' has an invalid alias '{}'", name, ds.alias));
            }
            if !aliases.insert(ds.alias.as_str()) {
                return Err(format!("alias '{}' is used by more than one datasource", ds.alias));
            }
            if let Some(storage) = &ds.storage {
                if !self.storage_client_config.contains_key(storage) {
                    return Err(format!(
                        "datasource '{}' references unknown storage '{}'",
                        name, storage
                    ));
                }
            }
        }

        if self.metadata_config.db_config.max_pool_size == 0 {
            return Err("max_pool_size must be greater than 0".to_string());
        }

        self.engine.validate()
    }

    /// Name of the endpoint used when a datasource does not specify one.
    pub fn default_storage_name(&self) -> Option<&str> {
        self.default_storage
            .as_deref()
            .or_else(|| self.storage_client_config.keys().next().map(String::as_str))
    }

    /// Endpoint name a datasource stores its data on.
    pub fn storage_for(&self, datasource: &str) -> Option<&str> {
        self.metadata_config
            .datasource_config
            .get(datasource)
            .and_then(|ds| ds.storage.as_deref())
            .or_else(|| self.default_storage_name())
    }
}

fn candidate_paths(explicit: Option<&Path>) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(p) = explicit {
        paths.push(p.to_path_buf());
    }
    if let Ok(p) = std::env::var(CONFIG_PATH_ENV) {
        if !p.is_empty() {
            paths.push(PathBuf::from(p));
        }
    }
    paths.push(PathBuf::from("/etc/tilestore_config.json"));
    paths.push(PathBuf::from("/etc/tilestore_config.yaml"));
    if let Ok(home) = std::env::var("HOME") {
        paths.push(Path::new(&home).join(".tilestore_config.json"));
        paths.push(Path::new(&home).join(".tilestore_config.yaml"));
    }
    paths.push(PathBuf::from("tilestore_config.yaml"));
    paths.push(PathBuf::from("tilestore_config.json"));
    paths
}

/// Substitute `${VAR}` and `${VAR:-default}` references.
fn expand_env_vars(content: &str) -> StoreResult<String> {
    let mut result = String::with_capacity(content.len());
    let mut rest = content;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find('}').ok_or_else(|| {
            StoreError::Config(format!("unclosed variable substitution: ${{{}", after))
        })?;
        result.push_str(&resolve_var_expr(&after[..end])?);
        rest = &after[end + 1..];
    }
    result.push_str(rest);

    Ok(result)
}

fn resolve_var_expr(expr: &str) -> StoreResult<String> {
    if let Some((var_name, default)) = expr.split_once(":-") {
        match std::env::var(var_name.trim()) {
            Ok(val) if !val.is_empty() => Ok(val),
            _ => Ok(default.to_string()),
        }
    } else {
        std::env::var(expr.trim())
            .map_err(|_| StoreError::Config(format!("environment variable {} not set", expr)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
storage_client_config:
  local:
    type: fs
    configure_params:
      base_directory: /tmp/tilestore
  scratch:
    type: memory
  rgw:
    type: ceph_rgw
    configure_params:
      host: 10.0.0.5
      port: 7480
      bucket: tiles
      access_key: ak
      secret_key: sk
metadata_config:
  db_config:
    backend: memory
  datasource_config:
    landsat:
      alias: ls
      authority: [create, read, write, delete]
    archive:
      alias: arc
      authority: [read]
      storage: rgw
  cache_config:
    max_cache_size: 1048576
engine:
  read_concurrency: 4
  max_region_edge: 8192
"#;

    fn sample() -> EngineConfig {
        serde_yaml::from_str(SAMPLE).unwrap()
    }

    #[test]
    fn test_parse_sample() {
        let config = sample();
        assert!(config.validate().is_ok());
        assert_eq!(config.storage_client_config.len(), 3);
        assert_eq!(config.storage_client_config["scratch"], StorageClientConfig::Memory);
        assert_eq!(config.storage_client_config["rgw"].type_name(), "ceph_rgw");
        assert_eq!(config.metadata_config.cache_config.max_cache_size, 1048576);
        assert_eq!(config.engine.read_concurrency, 4);
        assert_eq!(config.engine.max_region_edge, Some(8192));
        assert_eq!(EngineSettings::default().max_region_edge, None);

        let ls = &config.metadata_config.datasource_config["landsat"];
        assert!(ls.permits(Action::Delete));
        let arc = &config.metadata_config.datasource_config["archive"];
        assert!(!arc.permits(Action::Write));
    }

    #[test]
    fn test_storage_selection() {
        let config = sample();
        // First endpoint in name order
        assert_eq!(config.default_storage_name(), Some("local"));
        assert_eq!(config.storage_for("landsat"), Some("local"));
        assert_eq!(config.storage_for("archive"), Some("rgw"));
    }

    #[test]
    fn test_duplicate_alias_rejected() {
        let mut config = sample();
        config
            .metadata_config
            .datasource_config
            .get_mut("archive")
            .unwrap()
            .alias = "ls".to_string();
        assert!(config.validate().unwrap_err().contains("alias"));
    }

    #[test]
    fn test_unknown_storage_rejected() {
        let mut config = sample();
        config
            .metadata_config
            .datasource_config
            .get_mut("archive")
            .unwrap()
            .storage = Some("missing".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_json_file() {
        let config = sample();
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        file.write_all(serde_json::to_string(&config).unwrap().as_bytes())
            .unwrap();

        let loaded = EngineConfig::load(file.path()).unwrap();
        assert_eq!(loaded.storage_client_config, config.storage_client_config);
    }

    #[test]
    fn test_unknown_extension_rejected() {
        let file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        assert!(EngineConfig::load(file.path()).is_err());
    }

    #[test]
    fn test_expand_env_vars_with_default() {
        let out = expand_env_vars("host: ${TILESTORE_TEST_UNSET_VAR:-db.local}").unwrap();
        assert_eq!(out, "host: db.local");
    }

    #[test]
    fn test_expand_env_vars_missing_required() {
        assert!(expand_env_vars("${TILESTORE_TEST_UNSET_VAR}").is_err());
        assert!(expand_env_vars("${UNCLOSED").is_err());
    }
}
