use crate::provider::CatalogTrack;
use crate::proxy::{DEFAULT_CONTENT_TYPE, DEFAULT_USER_AGENT};
use crate::scheduler::DEFAULT_TICK_INTERVAL;
use crate::session::{DEFAULT_MAX_RESOLVE_ATTEMPTS, PartySettings};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_DIR: &str = "tuneparty";
const CONFIG_FILE: &str = "party.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartyConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_max_resolve_attempts")]
    pub max_resolve_attempts: u32,
    #[serde(default = "default_loop_mode")]
    pub loop_mode: bool,
    #[serde(default = "default_max_listeners")]
    pub max_listeners: usize,
    #[serde(default = "default_proxy_content_type")]
    pub proxy_content_type: String,
    #[serde(default = "default_proxy_user_agent")]
    pub proxy_user_agent: String,
    #[serde(default)]
    pub catalog: Vec<CatalogTrack>,
}

fn default_bind_addr() -> String {
    String::from("0.0.0.0:7878")
}

fn default_tick_interval_ms() -> u64 {
    u64::try_from(DEFAULT_TICK_INTERVAL.as_millis()).unwrap_or(1_000)
}

fn default_max_resolve_attempts() -> u32 {
    DEFAULT_MAX_RESOLVE_ATTEMPTS
}

fn default_loop_mode() -> bool {
    true
}

fn default_max_listeners() -> usize {
    64
}

fn default_proxy_content_type() -> String {
    String::from(DEFAULT_CONTENT_TYPE)
}

fn default_proxy_user_agent() -> String {
    String::from(DEFAULT_USER_AGENT)
}

impl Default for PartyConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            tick_interval_ms: default_tick_interval_ms(),
            max_resolve_attempts: default_max_resolve_attempts(),
            loop_mode: default_loop_mode(),
            max_listeners: default_max_listeners(),
            proxy_content_type: default_proxy_content_type(),
            proxy_user_agent: default_proxy_user_agent(),
            catalog: Vec::new(),
        }
    }
}

impl PartyConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn party_settings(&self) -> PartySettings {
        PartySettings {
            max_resolve_attempts: self.max_resolve_attempts,
            loop_mode: self.loop_mode,
            proxy_content_type: self.proxy_content_type.clone(),
            proxy_user_agent: self.proxy_user_agent.clone(),
        }
    }
}

pub fn config_root() -> Result<PathBuf> {
    if let Ok(override_dir) = env::var("TUNEPARTY_CONFIG_DIR") {
        return Ok(PathBuf::from(override_dir));
    }

    let home = env::var("HOME").context("HOME is not set")?;
    Ok(PathBuf::from(home).join(".config").join(APP_DIR))
}

pub fn config_path() -> Result<PathBuf> {
    Ok(config_root()?.join(CONFIG_FILE))
}

pub fn load_config(path: Option<&Path>) -> Result<PartyConfig> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => config_path()?,
    };
    if !path.exists() {
        tracing::info!(path = %path.display(), "no config file, using defaults");
        return Ok(PartyConfig::default());
    }

    let raw = fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config: PartyConfig = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    Ok(config)
}

pub fn save_config(config: &PartyConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(config)?;
    fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}
