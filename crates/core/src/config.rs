//! Configuration management for the discovery client.
//!
//! The configuration is an explicit value built once at startup and handed
//! to the components that need it. It can be read from TOML or from the
//! client's JSON `config.json`; both share the same shape, and keys this
//! crate does not know about (client id, redirect URL, ...) are ignored.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use url::Url;

use crate::error::ConfigError;

/// Default response cache capacity (10 MiB).
pub const DEFAULT_CACHE_CAPACITY_BYTES: u64 = 10 * 1024 * 1024;

/// Default HTTP request timeout.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Name of the cache directory created under the user cache root.
pub const CACHE_DIR_NAME: &str = "DiscoveryData";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub transport: TransportConfig,
}

/// Locations of the signed discovery documents and the keys that sign them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    pub server_list: Url,
    pub server_list_signature: Url,
    pub organization_list: Url,
    pub organization_list_signature: Url,
    /// Base64 encoded 42-byte minisign public key blobs
    pub signature_public_keys: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Directory for the on-disk tier; `None` selects the platform cache dir
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default = "default_capacity")]
    pub capacity_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub user_agent: Option<String>,
}

fn default_capacity() -> u64 {
    DEFAULT_CACHE_CAPACITY_BYTES
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            directory: None,
            capacity_bytes: DEFAULT_CACHE_CAPACITY_BYTES,
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            user_agent: None,
        }
    }
}

impl CacheConfig {
    /// Resolves the cache directory, falling back to `$XDG_CACHE_HOME`,
    /// then `$HOME/.cache`, then the system temp dir.
    pub fn resolved_directory(&self) -> PathBuf {
        if let Some(dir) = &self.directory {
            return dir.clone();
        }

        let root = std::env::var_os("XDG_CACHE_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".cache")))
            .unwrap_or_else(std::env::temp_dir);

        root.join("eduvpn").join(CACHE_DIR_NAME)
    }
}

impl Config {
    /// Loads configuration from a file. Files ending in `.json` are parsed
    /// as JSON, everything else as TOML.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        let config = if is_json {
            Self::from_json_str(&content)?
        } else {
            Self::from_toml_str(&content)?
        };

        tracing::debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(content).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the structural requirements that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let discovery = &self.discovery;
        for (field, url) in [
            ("discovery.server_list", &discovery.server_list),
            ("discovery.server_list_signature", &discovery.server_list_signature),
            ("discovery.organization_list", &discovery.organization_list),
            (
                "discovery.organization_list_signature",
                &discovery.organization_list_signature,
            ),
        ] {
            validate_url(field, url)?;
        }

        if discovery.signature_public_keys.is_empty() {
            return Err(ConfigError::Invalid {
                field: "discovery.signature_public_keys".to_string(),
                reason: "at least one public key is required".to_string(),
            });
        }

        if self.cache.capacity_bytes == 0 {
            return Err(ConfigError::Invalid {
                field: "cache.capacity_bytes".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        if self.transport.timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "transport.timeout_secs".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        Ok(())
    }
}

/// Discovery URLs must be https. Plain http is tolerated for loopback hosts
/// so local mirrors and test servers work.
fn validate_url(field: &str, url: &Url) -> Result<(), ConfigError> {
    match url.scheme() {
        "https" => Ok(()),
        "http" if is_loopback(url) => Ok(()),
        scheme => Err(ConfigError::Invalid {
            field: field.to_string(),
            reason: format!("unsupported scheme '{}' in {}", scheme, url),
        }),
    }
}

fn is_loopback(url: &Url) -> bool {
    match url.host_str() {
        Some("localhost") => true,
        Some(host) => host
            .trim_start_matches('[')
            .trim_end_matches(']')
            .parse::<IpAddr>()
            .map(|ip| ip.is_loopback())
            .unwrap_or(false),
        None => false,
    }
}
