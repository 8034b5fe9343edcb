use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::{
    CENTER_REGION_METERS, DEFAULT_PORT, INDEX_RETRIES, INDEX_RETRY_BACKOFF_MS, INDEX_TIMEOUT_MS,
    MAX_INDEX_RETRIES, QUERY_RADIUS_KM, ROUTE_SPAN_METERS,
};
use crate::controller::{ControllerConfig, IndexCallPolicy};
use crate::viewport::ViewportConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub port: u16,
    #[serde(default)]
    pub auto_open_browser: bool,
    pub query_radius_km: f64,
    pub center_region_meters: f64,
    pub route_span_meters: f64,
    pub index_timeout_ms: u64,
    pub index_retries: u32,
    #[serde(default = "default_snapshot_enabled")]
    pub snapshot_enabled: bool,
}

fn default_snapshot_enabled() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            auto_open_browser: false,
            query_radius_km: QUERY_RADIUS_KM,
            center_region_meters: CENTER_REGION_METERS,
            route_span_meters: ROUTE_SPAN_METERS,
            index_timeout_ms: INDEX_TIMEOUT_MS,
            index_retries: INDEX_RETRIES,
            snapshot_enabled: true,
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    /// Reads `key = value` lines. Unknown keys and unparsable values keep
    /// their defaults; a missing file yields the defaults.
    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            return Ok(Settings::default());
        }
        let content = std::fs::read_to_string(config_path).context("Failed to read config file")?;
        Ok(Self::parse(&content))
    }

    pub fn parse(content: &str) -> Self {
        let mut settings = Settings::default();
        let mut config_map = HashMap::new();

        for line in content.lines() {
            let line = line.trim();
            if line.starts_with('#') || line.is_empty() {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                config_map.insert(key.trim(), value.trim().trim_matches('"'));
            }
        }

        fn assign<T: std::str::FromStr>(map: &HashMap<&str, &str>, key: &str, slot: &mut T) {
            if let Some(parsed) = map.get(key).and_then(|v| v.parse().ok()) {
                *slot = parsed;
            }
        }

        assign(&config_map, "port", &mut settings.port);
        assign(&config_map, "auto_open_browser", &mut settings.auto_open_browser);
        assign(&config_map, "query_radius_km", &mut settings.query_radius_km);
        assign(&config_map, "center_region_meters", &mut settings.center_region_meters);
        assign(&config_map, "route_span_meters", &mut settings.route_span_meters);
        assign(&config_map, "index_timeout_ms", &mut settings.index_timeout_ms);
        assign(&config_map, "index_retries", &mut settings.index_retries);
        assign(&config_map, "snapshot_enabled", &mut settings.snapshot_enabled);

        settings
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).context("Creating config directory")?;
        }

        let mut content = String::new();
        content.push_str("# PokeFinder Configuration File\n");
        content.push_str(&format!("port = {}\n", self.port));
        content.push_str(&format!("auto_open_browser = {}\n", self.auto_open_browser));
        content.push_str(&format!("query_radius_km = {}\n", self.query_radius_km));
        content.push_str(&format!("center_region_meters = {}\n", self.center_region_meters));
        content.push_str(&format!("route_span_meters = {}\n", self.route_span_meters));
        content.push_str(&format!("index_timeout_ms = {}\n", self.index_timeout_ms));
        content.push_str(&format!("index_retries = {}\n", self.index_retries));
        content.push_str(&format!("snapshot_enabled = {}\n", self.snapshot_enabled));

        std::fs::write(config_path, content).context("Failed to write to config file")?;
        Ok(())
    }

    /// Rejects values the controller or viewport cannot run with.
    pub fn validate(&self) -> Result<()> {
        fn positive(name: &str, value: f64) -> Result<()> {
            if !value.is_finite() || value <= 0.0 {
                bail!("{name} must be a positive number, got {value}");
            }
            Ok(())
        }

        if self.port == 0 {
            bail!("port must be non-zero");
        }
        positive("query_radius_km", self.query_radius_km)?;
        positive("center_region_meters", self.center_region_meters)?;
        positive("route_span_meters", self.route_span_meters)?;
        if self.index_timeout_ms == 0 {
            bail!("index_timeout_ms must be non-zero");
        }
        if self.index_retries > MAX_INDEX_RETRIES {
            bail!("index_retries must be at most {MAX_INDEX_RETRIES}, got {}", self.index_retries);
        }
        Ok(())
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            query_radius_km: self.query_radius_km,
            policy: IndexCallPolicy {
                timeout: Duration::from_millis(self.index_timeout_ms),
                retries: self.index_retries,
                backoff: Duration::from_millis(INDEX_RETRY_BACKOFF_MS),
            },
        }
    }

    pub fn viewport_config(&self) -> ViewportConfig {
        ViewportConfig {
            center_region_meters: self.center_region_meters,
            route_span_meters: self.route_span_meters,
        }
    }

    pub fn config_path() -> PathBuf {
        let mut path = std::env::current_exe()
            .unwrap_or_default()
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();

        if path.ends_with("target/debug") || path.ends_with("target/release") {
            path.pop();
            path.pop();
        }
        path.push("pokefinder.ini");
        path
    }
}
