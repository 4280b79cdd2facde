use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_USER_AGENT: &str = "cfdw/0.1";
/// Working pages live under this prefix in the project namespace.
pub const DEFAULT_WORKING_PREFIX: &str = "Categories for discussion/Working";
/// On-wiki JSON document naming the cfd/update template sets.
pub const DEFAULT_REGISTRY_PAGE: &str = "User:Cfdw bot/config/templates.json";
/// Delay between finishing a rewrite fan-out and checking emptiness; the
/// membership index is only eventually consistent with fresh edits.
pub const DEFAULT_PUT_THROTTLE_MS: u64 = 10_000;

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct CfdwConfig {
    #[serde(default)]
    pub wiki: WikiSection,
    #[serde(default)]
    pub cfd: CfdSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WikiSection {
    pub api_url: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct CfdSection {
    pub working_prefix: Option<String>,
    pub registry_page: Option<String>,
    pub put_throttle_ms: Option<u64>,
}

impl CfdwConfig {
    /// Resolve the wiki API URL: env WIKI_API_URL > config > None.
    pub fn api_url(&self) -> Option<String> {
        if let Ok(value) = env::var("WIKI_API_URL") {
            let trimmed = value.trim().to_string();
            if !trimmed.is_empty() {
                return Some(trimmed);
            }
        }
        self.wiki.api_url.clone()
    }

    /// Resolve user agent: env WIKI_USER_AGENT > config > default.
    pub fn user_agent(&self) -> String {
        if let Ok(value) = env::var("WIKI_USER_AGENT") {
            let trimmed = value.trim().to_string();
            if !trimmed.is_empty() {
                return trimmed;
            }
        }
        self.wiki
            .user_agent
            .clone()
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }

    pub fn working_prefix(&self) -> &str {
        self.cfd
            .working_prefix
            .as_deref()
            .unwrap_or(DEFAULT_WORKING_PREFIX)
    }

    pub fn registry_page(&self) -> &str {
        self.cfd
            .registry_page
            .as_deref()
            .unwrap_or(DEFAULT_REGISTRY_PAGE)
    }

    /// Resolve the emptiness-check delay: env CFDW_PUT_THROTTLE_MS > config
    /// > default.
    pub fn put_throttle(&self) -> Duration {
        if let Ok(value) = env::var("CFDW_PUT_THROTTLE_MS")
            && let Ok(parsed) = value.trim().parse::<u64>()
        {
            return Duration::from_millis(parsed);
        }
        Duration::from_millis(
            self.cfd.put_throttle_ms.unwrap_or(DEFAULT_PUT_THROTTLE_MS),
        )
    }
}

/// Load a CfdwConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<CfdwConfig> {
    if !config_path.exists() {
        return Ok(CfdwConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: CfdwConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}
