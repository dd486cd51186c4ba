//! Configuration management for the offline cache engine

use crate::error::{EngineError, Result};
use crate::models::GenerationKind;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use url::Url;

/// Configuration for the offline cache engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Prefix shared by every generation name (default: "app")
    #[serde(default = "default_cache_prefix")]
    pub cache_prefix: String,

    /// Version tag embedded in every generation name (default: "v1")
    /// Changing it yields a fresh, empty set of generations.
    #[serde(default = "default_cache_version")]
    pub cache_version: String,

    /// Origin the client application is served from
    #[serde(default = "default_origin")]
    pub origin: String,

    /// Path prefix identifying API calls (default: "/api/")
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,

    /// Hostname or path fragments that are never intercepted
    #[serde(default = "default_bypass")]
    pub bypass: Vec<String>,

    /// Hosts known to serve images from outside the origin
    #[serde(default = "default_external_image_domains")]
    pub external_image_domains: Vec<String>,

    /// File extensions classified as images (without the dot)
    #[serde(default = "default_image_extensions")]
    pub image_extensions: Vec<String>,

    /// File extensions classified as static assets (without the dot)
    #[serde(default = "default_static_extensions")]
    pub static_extensions: Vec<String>,

    /// Query keys that mark an image-processing request
    #[serde(default = "default_image_query_params")]
    pub image_query_params: Vec<String>,

    /// Exact paths treated as the web app manifest
    #[serde(default = "default_manifest_paths")]
    pub manifest_paths: Vec<String>,

    /// Path prefixes under which icons live
    #[serde(default = "default_icon_prefixes")]
    pub icon_prefixes: Vec<String>,

    /// Critical assets pre-warmed into the static generation at install
    #[serde(default = "default_precache")]
    pub precache: Vec<String>,

    /// Root document served as the offline shell for navigations
    #[serde(default = "default_shell_path")]
    pub shell_path: String,

    /// Per-request network timeout in seconds (default: 10)
    #[serde(default = "default_network_timeout")]
    pub network_timeout_secs: u64,

    /// Cache storage backend
    #[serde(default)]
    pub storage: StorageConfig,

    /// Address the proxy adapter listens on
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Path of the control endpoint exposed by the proxy adapter
    #[serde(default = "default_control_path")]
    pub control_path: String,

    /// Notification shape used for push events
    #[serde(default)]
    pub notification: NotificationConfig,

    /// Metrics endpoint configuration (optional)
    #[serde(default)]
    pub metrics_endpoint: Option<MetricsEndpointConfig>,
}

/// Cache storage backend configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    /// Backend type: "memory" or "disk" (default: "memory")
    #[serde(default = "default_backend")]
    pub backend: String,

    /// Directory for the disk backend
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,

    /// Memory budget of the disk backend's in-memory front, in bytes
    /// (default: 64 MiB)
    #[serde(default = "default_l1_max_size_bytes")]
    pub l1_max_size_bytes: usize,
}

/// Fixed notification shape rendered for push payloads
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationConfig {
    #[serde(default = "default_notification_title")]
    pub title: String,

    /// Body used when the push carries no text
    #[serde(default = "default_notification_body")]
    pub default_body: String,

    #[serde(default = "default_notification_icon")]
    pub icon: String,

    #[serde(default = "default_notification_badge")]
    pub badge: String,
}

/// Configuration for the metrics HTTP endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsEndpointConfig {
    /// Whether to enable the metrics endpoint (default: false)
    #[serde(default)]
    pub enabled: bool,

    /// Address to bind the metrics endpoint to (default: "127.0.0.1:9090")
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            cache_dir: default_cache_dir(),
            l1_max_size_bytes: default_l1_max_size_bytes(),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            title: default_notification_title(),
            default_body: default_notification_body(),
            icon: default_notification_icon(),
            badge: default_notification_badge(),
        }
    }
}

impl Default for MetricsEndpointConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: default_metrics_address(),
        }
    }
}

// Default value functions for serde
fn default_cache_prefix() -> String {
    "app".to_string()
}

fn default_cache_version() -> String {
    "v1".to_string()
}

fn default_origin() -> String {
    "http://localhost:8080".to_string()
}

fn default_api_prefix() -> String {
    "/api/".to_string()
}

fn default_bypass() -> Vec<String> {
    to_strings(&["google-analytics.com", "googletagmanager.com", "/gtag/js"])
}

fn default_external_image_domains() -> Vec<String> {
    to_strings(&["images.unsplash.com", "res.cloudinary.com", "imgix.net"])
}

fn default_image_extensions() -> Vec<String> {
    to_strings(&["png", "jpg", "jpeg", "gif", "webp", "avif", "svg", "ico", "bmp"])
}

fn default_static_extensions() -> Vec<String> {
    to_strings(&["js", "mjs", "css", "woff", "woff2", "ttf", "otf", "eot", "map", "webmanifest"])
}

fn default_image_query_params() -> Vec<String> {
    to_strings(&["w", "h", "width", "height", "q", "quality", "fm", "format"])
}

fn default_manifest_paths() -> Vec<String> {
    to_strings(&["/manifest.json", "/manifest.webmanifest"])
}

fn default_icon_prefixes() -> Vec<String> {
    to_strings(&["/icons/"])
}

fn default_precache() -> Vec<String> {
    to_strings(&[
        "/",
        "/manifest.json",
        "/icons/icon-192x192.png",
        "/icons/icon-512x512.png",
    ])
}

fn default_shell_path() -> String {
    "/".to_string()
}

fn default_network_timeout() -> u64 {
    10
}

fn default_backend() -> String {
    "memory".to_string()
}

fn default_cache_dir() -> String {
    "/var/cache/offline-cache".to_string()
}

fn default_l1_max_size_bytes() -> usize {
    64 * 1024 * 1024
}

fn default_listen_address() -> String {
    "127.0.0.1:8787".to_string()
}

fn default_control_path() -> String {
    "/__offline-cache/control".to_string()
}

fn default_notification_title() -> String {
    "New update".to_string()
}

fn default_notification_body() -> String {
    "You have a new notification".to_string()
}

fn default_notification_icon() -> String {
    "/icons/icon-192x192.png".to_string()
}

fn default_notification_badge() -> String {
    "/icons/icon-72x72.png".to_string()
}

fn default_metrics_address() -> String {
    "127.0.0.1:9090".to_string()
}

fn to_strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            cache_prefix: default_cache_prefix(),
            cache_version: default_cache_version(),
            origin: default_origin(),
            api_prefix: default_api_prefix(),
            bypass: default_bypass(),
            external_image_domains: default_external_image_domains(),
            image_extensions: default_image_extensions(),
            static_extensions: default_static_extensions(),
            image_query_params: default_image_query_params(),
            manifest_paths: default_manifest_paths(),
            icon_prefixes: default_icon_prefixes(),
            precache: default_precache(),
            shell_path: default_shell_path(),
            network_timeout_secs: default_network_timeout(),
            storage: StorageConfig::default(),
            listen_address: default_listen_address(),
            control_path: default_control_path(),
            notification: NotificationConfig::default(),
            metrics_endpoint: None,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a YAML file
    ///
    /// # Returns
    /// * `Ok(EngineConfig)` if loading and validation succeed
    /// * `Err(EngineError)` if the file cannot be read or the config is invalid
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            EngineError::Config(format!("Failed to read config file: {}", e))
        })?;

        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from a YAML string
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: EngineConfig = serde_yaml::from_str(content).map_err(|e| {
            EngineError::Config(format!("Failed to parse config file: {}", e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    ///
    /// # Validation Rules
    /// - cache_prefix and cache_version must be non-empty and limited to
    ///   `[A-Za-z0-9._]` (they become directory names on disk)
    /// - origin must be an absolute http(s) URL
    /// - api_prefix and shell_path must start with `/`
    /// - network_timeout_secs must be > 0
    /// - storage backend must be "memory" or "disk"
    /// - the disk backend needs a cache_dir and a non-zero L1 budget
    pub fn validate(&self) -> Result<()> {
        validate_name_part("cache_prefix", &self.cache_prefix)?;
        validate_name_part("cache_version", &self.cache_version)?;

        let origin = self.origin_url()?;
        if origin.host_str().is_none() {
            return Err(EngineError::Config(format!(
                "origin must include a host, got '{}'",
                self.origin
            )));
        }

        if !self.api_prefix.starts_with('/') {
            return Err(EngineError::Config(format!(
                "api_prefix must start with '/', got '{}'",
                self.api_prefix
            )));
        }

        if !self.shell_path.starts_with('/') {
            return Err(EngineError::Config(format!(
                "shell_path must start with '/', got '{}'",
                self.shell_path
            )));
        }

        if self.network_timeout_secs == 0 {
            return Err(EngineError::Config(
                "network_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.bypass.iter().any(|fragment| fragment.is_empty()) {
            return Err(EngineError::Config(
                "bypass entries must not be empty".to_string(),
            ));
        }

        for entry in &self.precache {
            if origin.join(entry).is_err() {
                return Err(EngineError::Config(format!(
                    "precache entry '{}' is not a valid URL or path",
                    entry
                )));
            }
        }

        match self.storage.backend.as_str() {
            "memory" => {}
            "disk" => {
                if self.storage.cache_dir.is_empty() {
                    return Err(EngineError::Config(
                        "storage.cache_dir is required when backend is 'disk'".to_string(),
                    ));
                }
                if self.storage.l1_max_size_bytes == 0 {
                    return Err(EngineError::Config(
                        "storage.l1_max_size_bytes must be greater than 0".to_string(),
                    ));
                }
            }
            other => {
                return Err(EngineError::Config(format!(
                    "Invalid storage backend '{}', must be 'memory' or 'disk'",
                    other
                )));
            }
        }

        Ok(())
    }

    /// Parsed origin URL
    pub fn origin_url(&self) -> Result<Url> {
        let url = Url::parse(&self.origin).map_err(|e| {
            EngineError::Config(format!("origin '{}' is not a valid URL: {}", self.origin, e))
        })?;

        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(EngineError::Config(format!(
                "origin must use http or https, got '{}'",
                other
            ))),
        }
    }

    /// Name of the generation holding the given kind of content
    ///
    /// Format: `{cache_prefix}-{kind}-{cache_version}`
    pub fn generation_name(&self, kind: GenerationKind) -> String {
        format!("{}-{}-{}", self.cache_prefix, kind.as_str(), self.cache_version)
    }

    /// Names of every generation belonging to the current version
    pub fn current_generations(&self) -> Vec<String> {
        GenerationKind::ALL
            .iter()
            .map(|kind| self.generation_name(*kind))
            .collect()
    }

    /// Whether a generation name belongs to the current version
    pub fn is_current_generation(&self, name: &str) -> bool {
        GenerationKind::ALL
            .iter()
            .any(|kind| self.generation_name(*kind) == name)
    }
}

fn validate_name_part(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(EngineError::Config(format!("{} must not be empty", field)));
    }

    let valid = value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_');
    if !valid {
        return Err(EngineError::Config(format!(
            "{} may only contain letters, digits, '.' and '_', got '{}'",
            field, value
        )));
    }

    Ok(())
}
