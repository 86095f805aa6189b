use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::discovery::DiscoveryFilter;
use crate::providers::ProviderOptions;

/// On-disk configuration (`config.toml` under the user config dir). Every
/// field is optional; CLI flags override whatever is set here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Default tool working directory when `--dir` is not given.
    #[serde(default)]
    pub workdir: Option<String>,

    #[serde(default)]
    pub provider: ProviderSection,

    #[serde(default)]
    pub discovery: DiscoverySection,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderSection {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscoverySection {
    /// Browse window in seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Service cache TTL in seconds.
    #[serde(default)]
    pub cache_ttl_secs: Option<u64>,
    #[serde(default)]
    pub filter: Option<DiscoveryFilter>,
}

impl Config {
    pub fn config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "brutus")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load the config file if present; defaults otherwise.
    pub fn load() -> Result<Self> {
        let Some(path) = Self::config_path() else {
            return Ok(Self::default());
        };
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("cannot read {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        toml::from_str(raw).context("invalid config")
    }

    /// Configured working directory with `~` expanded.
    pub fn workdir(&self) -> Option<PathBuf> {
        self.workdir
            .as_deref()
            .map(|raw| PathBuf::from(shellexpand::tilde(raw).into_owned()))
    }

    pub fn cache_ttl(&self) -> Duration {
        self.discovery
            .cache_ttl_secs
            .map_or(crate::discovery::cache::DEFAULT_TTL, Duration::from_secs)
    }

    /// Merge config values over the provider defaults.
    pub fn provider_options(&self) -> ProviderOptions {
        let defaults = ProviderOptions::default();
        ProviderOptions {
            model: self.provider.model.clone(),
            max_tokens: self.provider.max_tokens.unwrap_or(defaults.max_tokens),
            discovery_timeout: self
                .discovery
                .timeout_secs
                .map_or(defaults.discovery_timeout, Duration::from_secs),
            filter: self.discovery.filter.clone().unwrap_or_default(),
        }
    }
}
