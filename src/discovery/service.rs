use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::DiscoveryError;

/// A single LLM backend discovered on the local network.
///
/// Built from the TXT record of a `_saturn._tcp` advertisement. Unknown TXT
/// keys are preserved in `extra` but never participate in filtering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaturnService {
    pub name: String,
    pub host: String,
    pub port: u16,

    /// Lower is preferred. Advertised range 0..100.
    pub priority: u32,
    /// Free text; "healthy" is the honored value.
    pub health_status: String,

    /// 0 = unknown.
    pub max_concurrent: u32,
    pub current_load: u32,

    pub api_type: String,
    pub features: Vec<String>,
    pub api_base: String,
    pub ephemeral_key: String,
    pub models: Vec<String>,
    pub gpu: String,
    pub vram_gb: u32,

    pub saturn_version: String,
    pub security: String,
    pub health_endpoint: String,

    /// Unrecognized TXT keys, kept verbatim.
    pub extra: HashMap<String, String>,
}

impl SaturnService {
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
            priority: 100,
            health_status: String::new(),
            max_concurrent: 0,
            current_load: 0,
            api_type: "openai".into(),
            features: Vec::new(),
            api_base: String::new(),
            ephemeral_key: String::new(),
            models: Vec::new(),
            gpu: String::new(),
            vram_gb: 0,
            saturn_version: String::new(),
            security: String::new(),
            health_endpoint: String::new(),
            extra: HashMap::new(),
        }
    }

    /// Build a service from the key/value pairs of a TXT record.
    ///
    /// Integer fields fall back to their defaults on absent or unparseable
    /// values; CSV fields are split, trimmed, lowercased, with empty tokens
    /// dropped.
    pub fn from_txt(
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        txt: &HashMap<String, String>,
    ) -> Self {
        let mut service = Self::new(name, host, port);

        for (key, value) in txt {
            match key.as_str() {
                "saturn_version" => service.saturn_version = value.trim().to_string(),
                "priority" => service.priority = parse_int(value, 100),
                "api" => {
                    let api = value.trim().to_lowercase();
                    if !api.is_empty() {
                        service.api_type = api;
                    }
                }
                "api_base" => service.api_base = value.trim().to_string(),
                "ephemeral_key" => service.ephemeral_key = value.trim().to_string(),
                "features" => service.features = parse_csv(value),
                "max_concurrent" => service.max_concurrent = parse_int(value, 0),
                "current_load" => service.current_load = parse_int(value, 0),
                "health" => service.health_status = value.trim().to_lowercase(),
                "security" => service.security = value.trim().to_lowercase(),
                "health_endpoint" => service.health_endpoint = value.trim().to_string(),
                "models" => service.models = parse_csv(value),
                "gpu" => service.gpu = value.trim().to_string(),
                "vram_gb" => service.vram_gb = parse_int(value, 0),
                _ => {
                    service.extra.insert(key.clone(), value.clone());
                }
            }
        }

        service
    }

    /// Render the service back into TXT key/value pairs. Defaults that carry
    /// no information (empty strings, zero counters) are omitted; `priority`
    /// and `api` are always present since they always have a value.
    pub fn to_txt(&self) -> HashMap<String, String> {
        let mut txt = HashMap::new();
        txt.insert("priority".into(), self.priority.to_string());
        txt.insert("api".into(), self.api_type.clone());
        if !self.saturn_version.is_empty() {
            txt.insert("saturn_version".into(), self.saturn_version.clone());
        }
        if !self.api_base.is_empty() {
            txt.insert("api_base".into(), self.api_base.clone());
        }
        if !self.ephemeral_key.is_empty() {
            txt.insert("ephemeral_key".into(), self.ephemeral_key.clone());
        }
        if !self.features.is_empty() {
            txt.insert("features".into(), self.features.join(","));
        }
        if self.max_concurrent > 0 {
            txt.insert("max_concurrent".into(), self.max_concurrent.to_string());
        }
        if self.current_load > 0 {
            txt.insert("current_load".into(), self.current_load.to_string());
        }
        if !self.health_status.is_empty() {
            txt.insert("health".into(), self.health_status.clone());
        }
        if !self.security.is_empty() {
            txt.insert("security".into(), self.security.clone());
        }
        if !self.health_endpoint.is_empty() {
            txt.insert("health_endpoint".into(), self.health_endpoint.clone());
        }
        if !self.models.is_empty() {
            txt.insert("models".into(), self.models.join(","));
        }
        if !self.gpu.is_empty() {
            txt.insert("gpu".into(), self.gpu.clone());
        }
        if self.vram_gb > 0 {
            txt.insert("vram_gb".into(), self.vram_gb.to_string());
        }
        for (key, value) in &self.extra {
            txt.insert(key.clone(), value.clone());
        }
        txt
    }

    /// Remaining request slots, or 0 when unknown or full.
    pub fn available_capacity(&self) -> u32 {
        self.max_concurrent.saturating_sub(self.current_load)
    }

    /// Fraction of advertised capacity in use; 0.0 when capacity is unknown.
    pub fn load_fraction(&self) -> f64 {
        if self.max_concurrent == 0 {
            0.0
        } else {
            f64::from(self.current_load) / f64::from(self.max_concurrent)
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.health_status == "healthy"
    }

    pub fn has_feature(&self, feature: &str) -> bool {
        self.features.iter().any(|f| f == feature)
    }

    /// Preference score. Higher wins. Deterministic for a given record.
    pub fn score(&self) -> f64 {
        let load = self.load_fraction();
        let mut score = 100.0;
        score -= 50.0 * load;
        if load >= 1.0 {
            score -= 100.0;
        }
        score += 10.0 * f64::from(100 - self.priority.min(100)) / 10.0;
        if self.is_healthy() {
            score += 20.0;
        } else if !self.health_status.is_empty() {
            score -= 30.0;
        }
        score
    }

    /// Chat-completions base URL: the advertised `api_base` override, or the
    /// plain host/port target.
    pub fn base_url(&self) -> String {
        if self.api_base.is_empty() {
            format!("http://{}:{}/v1", self.host, self.port)
        } else {
            self.api_base.trim_end_matches('/').to_string()
        }
    }
}

fn parse_int(value: &str, default: u32) -> u32 {
    value.trim().parse().unwrap_or(default)
}

fn parse_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|token| token.trim().to_lowercase())
        .filter(|token| !token.is_empty())
        .collect()
}

/// Selection criteria applied to discovered services.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryFilter {
    /// Every listed feature must be advertised.
    #[serde(default)]
    pub required_features: Vec<String>,
    /// At least one listed feature must be advertised (ignored when empty).
    #[serde(default)]
    pub any_features: Vec<String>,
    /// Exact api family match (ignored when empty).
    #[serde(default)]
    pub api_type: String,
    #[serde(default)]
    pub min_priority: u32,
    #[serde(default = "default_max_priority")]
    pub max_priority: u32,
    /// Accept only services reporting "healthy" or no health at all.
    #[serde(default)]
    pub require_healthy: bool,
}

fn default_max_priority() -> u32 {
    100
}

impl Default for DiscoveryFilter {
    fn default() -> Self {
        Self {
            required_features: Vec::new(),
            any_features: Vec::new(),
            api_type: String::new(),
            min_priority: 0,
            max_priority: default_max_priority(),
            require_healthy: false,
        }
    }
}

impl DiscoveryFilter {
    pub fn matches(&self, service: &SaturnService) -> bool {
        if !self
            .required_features
            .iter()
            .all(|f| service.has_feature(f))
        {
            return false;
        }
        if !self.any_features.is_empty() && !self.any_features.iter().any(|f| service.has_feature(f))
        {
            return false;
        }
        if !self.api_type.is_empty() && service.api_type != self.api_type {
            return false;
        }
        if service.priority < self.min_priority || service.priority > self.max_priority {
            return false;
        }
        if self.require_healthy
            && !service.health_status.is_empty()
            && !service.is_healthy()
        {
            return false;
        }
        true
    }
}

/// Apply a filter. Pure; input order preserved.
pub fn filter(services: &[SaturnService], criteria: &DiscoveryFilter) -> Vec<SaturnService> {
    services
        .iter()
        .filter(|s| criteria.matches(s))
        .cloned()
        .collect()
}

/// Sort best-first by score, breaking ties lexicographically by name.
pub fn sort_by_score(services: &mut [SaturnService]) {
    services.sort_by(|a, b| {
        b.score()
            .partial_cmp(&a.score())
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.name.cmp(&b.name))
    });
}

/// Filter, sort, return the best match.
pub fn select(
    services: &[SaturnService],
    criteria: &DiscoveryFilter,
) -> Result<SaturnService, DiscoveryError> {
    let mut matching = filter(services, criteria);
    sort_by_score(&mut matching);
    matching
        .into_iter()
        .next()
        .ok_or(DiscoveryError::NoServiceMatches)
}
