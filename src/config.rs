use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::chart::DEFAULT_CHART_BASE;
use crate::template::{Combo, StateKey};

const DEFAULT_TEMPLATE_DIRS: &str = "templates:assets/templates:public/templates";

#[derive(Debug, Error)]
#[error("invalid {var}={value:?}: {reason}")]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub template_dirs: Vec<PathBuf>,
    pub template_prefix: String,
    pub default_combo: Combo,
    /// TrueType files for body and bold text; Helvetica when unset.
    pub font_path: Option<PathBuf>,
    pub font_bold_path: Option<PathBuf>,
    pub chart_base_url: String,
    pub chart_timeout: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            template_dirs: split_dirs(DEFAULT_TEMPLATE_DIRS),
            template_prefix: "report".into(),
            default_combo: Combo {
                dom: StateKey::C,
                second: StateKey::T,
            },
            font_path: None,
            font_bold_path: None,
            chart_base_url: DEFAULT_CHART_BASE.into(),
            chart_timeout: Duration::from_secs(8),
        }
    }
}

fn split_dirs(raw: &str) -> Vec<PathBuf> {
    raw.split(':')
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(PathBuf::from)
        .collect()
}

impl AppConfig {
    /// Reads the process environment. Call `dotenv` first to pick up `.env`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(raw) = get("PORT") {
            config.port = raw.trim().parse().map_err(|e: std::num::ParseIntError| ConfigError {
                var: "PORT",
                value: raw.clone(),
                reason: e.to_string(),
            })?;
        }
        if let Some(raw) = get("TEMPLATE_DIRS") {
            config.template_dirs = split_dirs(&raw);
        }
        if let Some(raw) = get("TEMPLATE_PREFIX") {
            config.template_prefix = raw.trim().to_string();
        }
        if let Some(raw) = get("DEFAULT_COMBO") {
            config.default_combo = raw.parse().map_err(|reason| ConfigError {
                var: "DEFAULT_COMBO",
                value: raw.clone(),
                reason,
            })?;
        }
        config.font_path = get("FONT_PATH").map(PathBuf::from);
        config.font_bold_path = get("FONT_BOLD_PATH").map(PathBuf::from);
        if let Some(raw) = get("CHART_BASE_URL") {
            config.chart_base_url = raw.trim().to_string();
        }
        if let Some(raw) = get("CHART_TIMEOUT_SECS") {
            let secs: u64 = raw.trim().parse().map_err(|e: std::num::ParseIntError| ConfigError {
                var: "CHART_TIMEOUT_SECS",
                value: raw.clone(),
                reason: e.to_string(),
            })?;
            config.chart_timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }
}
