use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::mcp::{FetchOptions, SessionOptions};

#[derive(Debug, Default, Deserialize)]
pub struct UserConfig {
    pub logging: Option<LoggingCfg>,
    pub fetch: Option<FetchCfg>,
    pub estimate: Option<EstimateCfg>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LoggingCfg {
    pub to_file: Option<bool>,
    pub dir: Option<String>,
    pub json: Option<bool>,
    pub compact: Option<bool>,
    pub pretty: Option<bool>,
    pub level: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct FetchCfg {
    pub timeout_ms: Option<u64>,           // whole run; 0 disables
    pub handshake_timeout_ms: Option<u64>,
    pub request_timeout_ms: Option<u64>,   // per list page
    pub env: Option<HashMap<String, String>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct EstimateCfg {
    pub mode: Option<String>, // "flat" | "weighted"
    pub label: Option<String>,
    pub factor: Option<f64>,
    pub weights: Option<WeightsCfg>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WeightsCfg {
    pub tools: Option<f64>,
    pub prompts: Option<f64>,
    pub resources: Option<f64>,
    pub templates: Option<f64>,
}

pub const DEFAULT_TIMEOUT_MS: u64 = 60_000;

impl FetchCfg {
    /// Fetch options with `timeout_ms` (if given) overriding the configured
    /// overall timeout.
    pub fn to_options(&self, timeout_ms: Option<u64>) -> FetchOptions {
        let defaults = SessionOptions::default();
        let overall = timeout_ms
            .or(self.timeout_ms)
            .unwrap_or(DEFAULT_TIMEOUT_MS);
        FetchOptions {
            session: SessionOptions {
                handshake_timeout: self
                    .handshake_timeout_ms
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.handshake_timeout),
                request_timeout: self
                    .request_timeout_ms
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.request_timeout),
                ..defaults
            },
            overall_timeout: (overall > 0).then(|| Duration::from_millis(overall)),
        }
    }
}

/// Home directory for config and logs: `$TOKENMETER_HOME`, else
/// `$HOME/.mcp-tokenmeter`, else `./.mcp-tokenmeter`.
pub fn resolve_home(explicit: &str) -> PathBuf {
    if !explicit.is_empty() {
        return expand_home(explicit);
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".mcp-tokenmeter");
    }
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(".mcp-tokenmeter")
}

pub fn load_user_config(home: &Path) -> anyhow::Result<Option<UserConfig>> {
    let path = home.join("config.toml");
    if !path.exists() {
        return Ok(None);
    }
    let s = std::fs::read_to_string(&path)?;
    let cfg: UserConfig = toml::from_str(&s)?;
    Ok(Some(cfg))
}

pub fn expand_home(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/")
        && let Ok(home) = std::env::var("HOME")
    {
        return PathBuf::from(home).join(stripped);
    }
    PathBuf::from(path)
}
