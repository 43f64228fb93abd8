//! Compiler configuration loading

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;
use wmbusgen_core::catalog::DEFAULT_SOURCE_EXTENSIONS;
use wmbusgen_core::{
    NamePattern, VersionTagResolver, DEFAULT_SENTINELS, DEFAULT_VENDOR, UNITS_HEADER,
};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub components: ComponentsConfig,
    #[serde(default)]
    pub version_tag: VersionTagConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentsConfig {
    /// Directory holding the driver catalog and component sources
    #[serde(default = "default_components_path")]
    pub path: PathBuf,
    /// File name prefix of driver sources
    #[serde(default = "default_driver_prefix")]
    pub driver_prefix: String,
    /// File extension of driver sources
    #[serde(default = "default_driver_extension")]
    pub driver_extension: String,
    /// Catalog names reserved for fallback drivers
    #[serde(default = "default_sentinels")]
    pub sentinels: Vec<String>,
    /// Extensions of files handed to the downstream build
    #[serde(default = "default_source_extensions")]
    pub source_extensions: Vec<String>,
    /// Vendored unit list, relative to `path`
    #[serde(default = "default_units_header")]
    pub units_header: PathBuf,
}

impl Default for ComponentsConfig {
    fn default() -> Self {
        Self {
            path: default_components_path(),
            driver_prefix: default_driver_prefix(),
            driver_extension: default_driver_extension(),
            sentinels: default_sentinels(),
            source_extensions: default_source_extensions(),
            units_header: default_units_header(),
        }
    }
}

impl ComponentsConfig {
    pub fn name_pattern(&self) -> NamePattern {
        NamePattern {
            prefix: self.driver_prefix.clone(),
            extension: self.driver_extension.clone(),
        }
    }

    pub fn units_path(&self) -> PathBuf {
        self.path.join(&self.units_header)
    }
}

fn default_components_path() -> PathBuf {
    PathBuf::from("./components/wmbus_common")
}

fn default_driver_prefix() -> String {
    NamePattern::default().prefix
}

fn default_driver_extension() -> String {
    NamePattern::default().extension
}

fn default_sentinels() -> Vec<String> {
    DEFAULT_SENTINELS.iter().map(|s| s.to_string()).collect()
}

fn default_source_extensions() -> Vec<String> {
    DEFAULT_SOURCE_EXTENSIONS.iter().map(|s| s.to_string()).collect()
}

fn default_units_header() -> PathBuf {
    PathBuf::from(UNITS_HEADER)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionTagConfig {
    /// Library whose merge commits carry the tag
    #[serde(default = "default_vendor")]
    pub vendor: String,
    /// Directory to search the history of (defaults to the components path)
    #[serde(default)]
    pub search_root: Option<PathBuf>,
    /// Fixed tag, skips the history lookup
    #[serde(default)]
    pub tag: Option<String>,
}

impl Default for VersionTagConfig {
    fn default() -> Self {
        Self {
            vendor: default_vendor(),
            search_root: None,
            tag: None,
        }
    }
}

fn default_vendor() -> String {
    DEFAULT_VENDOR.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Pretty print the JSON build plan
    #[serde(default = "default_true")]
    pub pretty: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            pretty: default_true(),
        }
    }
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Resolver for the vendored library tag
    pub fn tag_resolver(&self) -> VersionTagResolver {
        match &self.version_tag.tag {
            Some(tag) => VersionTagResolver::fixed(tag.clone()),
            None => {
                let root = self
                    .version_tag
                    .search_root
                    .clone()
                    .unwrap_or_else(|| self.components.path.clone());
                VersionTagResolver::git(root, self.version_tag.vendor.clone())
            }
        }
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(Config::default())
    }
}
