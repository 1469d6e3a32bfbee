use anyhow::Context;
use serde::{Deserialize, Serialize};

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::consts::{APP_DIR_NAME, CONFIG_FILE_NAME, DISCONNECT_GRACE, HANDSHAKE_TIMEOUT};
use crate::identity::Scope;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceConfig {
    #[serde(default = "default_app_name")]
    pub app_name: String,
    #[serde(default)]
    pub vendor: String,
    /// One instance per machine instead of one per user.
    #[serde(default)]
    pub global: bool,
    /// Try to take over as master when the running master does not answer.
    #[serde(default)]
    pub auto_recovery: bool,

    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    #[serde(default = "default_disconnect_grace_ms")]
    pub disconnect_grace_ms: u64,
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,

    /// Overrides where the lock file and socket are placed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_dir: Option<PathBuf>,
}

fn default_app_name() -> String {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "app".to_string())
}

fn default_handshake_timeout_ms() -> u64 {
    HANDSHAKE_TIMEOUT.as_millis() as u64
}

fn default_disconnect_grace_ms() -> u64 {
    DISCONNECT_GRACE.as_millis() as u64
}

fn default_max_payload_bytes() -> usize {
    wire::DEFAULT_MAX_PAYLOAD_BYTES
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
            vendor: String::new(),
            global: false,
            auto_recovery: false,
            handshake_timeout_ms: default_handshake_timeout_ms(),
            disconnect_grace_ms: default_disconnect_grace_ms(),
            max_payload_bytes: default_max_payload_bytes(),
            runtime_dir: None,
        }
    }
}

impl InstanceConfig {
    pub fn new(app_name: &str, vendor: &str) -> Self {
        Self {
            app_name: app_name.to_string(),
            vendor: vendor.to_string(),
            ..Self::default()
        }
    }

    pub fn scope(&self) -> Scope {
        Scope::from_global(self.global)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn disconnect_grace(&self) -> Duration {
        Duration::from_millis(self.disconnect_grace_ms)
    }
}

pub fn config_path() -> PathBuf {
    let base = dirs::config_dir().unwrap_or_else(|| PathBuf::from(".config"));
    base.join(APP_DIR_NAME).join(CONFIG_FILE_NAME)
}

/// Load from an explicit path (must exist) or the default path (may be absent).
pub fn load_config(explicit: Option<&Path>) -> anyhow::Result<InstanceConfig> {
    let path = match explicit {
        Some(p) => p.to_path_buf(),
        None => {
            let p = config_path();
            if !p.exists() {
                log::debug!("config: none at {}, using defaults", p.display());
                return Ok(InstanceConfig::default());
            }
            p
        }
    };
    let s = std::fs::read_to_string(&path)
        .with_context(|| format!("read config {}", path.display()))?;
    let cfg: InstanceConfig = toml::from_str(&s).context("parse config")?;
    Ok(cfg)
}
