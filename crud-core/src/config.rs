//! Configuration management using Figment
//!
//! Configuration is loaded from multiple sources with the following precedence (highest to lowest):
//! 1. Environment variables (prefix: `CRUD_`, nested keys separated by `__`)
//! 2. Current working directory: ./config.toml
//! 3. XDG config directory: ~/.config/crud-core/{service_name}/config.toml
//! 4. System directory: /etc/crud-core/{service_name}/config.toml
//! 5. Default values
//!
//! ```toml
//! [service]
//! name = "inventory"
//! environment = "production"
//!
//! [pagination]
//! default_per_page = 25
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,

    #[serde(default)]
    pub pagination: PaginationConfig,

    /// What error responses may reveal outside production
    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,

    /// Database configuration (optional)
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub name: String,

    /// Log level or `EnvFilter` directive (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Environment (dev, staging, production)
    #[serde(default = "default_environment")]
    pub environment: String,
}

/// Page window defaults applied to inbound list requests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginationConfig {
    #[serde(default = "default_page")]
    pub default_page: u64,

    #[serde(default = "default_per_page")]
    pub default_per_page: u64,

    /// Upper bound for a client-requested page size
    #[serde(default = "default_max_per_page")]
    pub max_per_page: u64,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            default_page: default_page(),
            default_per_page: default_per_page(),
            max_per_page: default_max_per_page(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticsConfig {
    /// Substring identifying application frames in captured stack traces
    #[serde(default = "default_app_frame_marker")]
    pub app_frame_marker: String,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            app_frame_marker: default_app_frame_marker(),
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database connection URL
    pub url: String,

    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_secs: u64,
}

/// Whether error responses may carry diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentMode {
    Production,
    #[default]
    Development,
}

impl DeploymentMode {
    pub fn is_production(self) -> bool {
        self == DeploymentMode::Production
    }
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_environment() -> String {
    "dev".to_string()
}

fn default_page() -> u64 {
    1
}

fn default_per_page() -> u64 {
    20
}

fn default_max_per_page() -> u64 {
    100
}

fn default_app_frame_marker() -> String {
    "crud_core".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_connection_timeout() -> u64 {
    10
}

impl Config {
    /// Load configuration from all sources
    ///
    /// The service name is inferred from the binary name.
    pub fn load() -> Result<Self> {
        let service_name = std::env::current_exe()
            .ok()
            .and_then(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .unwrap_or_else(|| "crud-core".to_string());

        Self::load_for_service(&service_name)
    }

    /// Load configuration for a specific service name
    pub fn load_for_service(service_name: &str) -> Result<Self> {
        let config_paths = Self::find_config_paths(service_name);

        let mut figment = Figment::new().merge(Serialized::defaults(Config::named(service_name)));

        // Lowest priority first so later files override earlier ones
        for path in config_paths.iter().rev() {
            if path.exists() {
                tracing::info!("Loading configuration from: {}", path.display());
                figment = figment.merge(Toml::file(path));
            }
        }

        Ok(Self::with_env(figment).extract()?)
    }

    /// Load configuration from a specific file, bypassing the search path
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(path.as_ref()));

        Ok(Self::with_env(figment).extract()?)
    }

    fn with_env(figment: Figment) -> Figment {
        figment.merge(Env::prefixed("CRUD_").split("__"))
    }

    /// Config file locations in priority order (highest first)
    fn find_config_paths(service_name: &str) -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("config.toml")];

        let xdg_dirs = xdg::BaseDirectories::with_prefix("crud-core");
        if let Some(path) = xdg_dirs.find_config_file(Path::new(service_name).join("config.toml")) {
            paths.push(path);
        }

        paths.push(
            PathBuf::from("/etc/crud-core")
                .join(service_name)
                .join("config.toml"),
        );

        paths
    }

    fn named(service_name: &str) -> Self {
        let mut config = Config::default();
        config.service.name = service_name.to_string();
        config
    }

    /// `production` environments hide traces and request payloads
    pub fn deployment_mode(&self) -> DeploymentMode {
        if self.service.environment.eq_ignore_ascii_case("production") {
            DeploymentMode::Production
        } else {
            DeploymentMode::Development
        }
    }

    pub fn database_url(&self) -> Option<&str> {
        self.database.as_ref().map(|db| db.url.as_str())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service: ServiceConfig {
                name: "crud-core".to_string(),
                log_level: default_log_level(),
                environment: default_environment(),
            },
            pagination: PaginationConfig::default(),
            diagnostics: DiagnosticsConfig::default(),
            database: None,
        }
    }
}

/// Page window requested by a client, e.g. `?page=2&per_page=50`
///
/// Deserialize it from the query string, then call [`PageRequest::resolve`]
/// to fill in defaults and clamp it to the configured bounds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct PageRequest {
    #[serde(default)]
    pub page: Option<u64>,
    #[serde(default)]
    pub per_page: Option<u64>,
}

impl PageRequest {
    /// `(page, per_page)`, both at least 1 and `per_page` at most `max_per_page`
    pub fn resolve(&self, config: &PaginationConfig) -> (u64, u64) {
        let page = self.page.unwrap_or(config.default_page).max(1);
        let per_page = self
            .per_page
            .unwrap_or(config.default_per_page)
            .clamp(1, config.max_per_page.max(1));
        (page, per_page)
    }
}
