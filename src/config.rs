#![forbid(unsafe_code)]

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
};

use crate::harvest::PageSizes;

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_DB_PATH: &str = "harvest.db";
pub const DEFAULT_CONFIG_PATH: &str = "harvest.toml";
pub const DEFAULT_API_BASE_URL: &str = "https://www.googleapis.com/youtube/v3";

const API_KEY_VAR: &str = "YOUTUBE_API_KEY";
const DB_PATH_VAR: &str = "HARVEST_DB_PATH";
const CONFIG_PATH_VAR: &str = "HARVEST_CONFIG";

/// Remote client tuning read from `harvest.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ApiTuning {
    pub api_base_url: String,
    pub timeout_secs: u64,
    pub playlist_page_size: u32,
    pub playlist_item_page_size: u32,
    pub comment_page_size: u32,
}

impl Default for ApiTuning {
    fn default() -> Self {
        let pages = PageSizes::default();
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            timeout_secs: 30,
            playlist_page_size: pages.playlists,
            playlist_item_page_size: pages.playlist_items,
            comment_page_size: pages.comments,
        }
    }
}

impl ApiTuning {
    /// Page sizes clamped to what the API accepts for each listing.
    pub fn page_sizes(&self) -> PageSizes {
        PageSizes {
            playlists: self.playlist_page_size.clamp(1, 50),
            playlist_items: self.playlist_item_page_size.clamp(1, 50),
            comments: self.comment_page_size.clamp(1, 100),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub api_key: Option<String>,
    pub db_path: PathBuf,
    pub tuning: ApiTuning,
}

impl Settings {
    pub fn require_api_key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .ok_or_else(|| anyhow!("{API_KEY_VAR} not set (use --api-key or the .env file)"))
    }
}

#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub api_key: Option<String>,
    pub db_path: Option<PathBuf>,
    pub env_path: Option<PathBuf>,
    pub config_path: Option<PathBuf>,
}

pub fn resolve_settings(overrides: SettingsOverrides) -> Result<Settings> {
    let env_path = overrides
        .env_path
        .as_deref()
        .unwrap_or_else(|| Path::new(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(env_path)?;
    build_settings(&file_vars, env_var_string, overrides)
}

fn build_settings(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: SettingsOverrides,
) -> Result<Settings> {
    let api_key = non_blank(overrides.api_key)
        .or_else(|| lookup_value(API_KEY_VAR, file_vars, &env_lookup));
    let db_path = overrides
        .db_path
        .or_else(|| lookup_value(DB_PATH_VAR, file_vars, &env_lookup).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH));
    let config_path = overrides
        .config_path
        .or_else(|| lookup_value(CONFIG_PATH_VAR, file_vars, &env_lookup).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let tuning = load_tuning(&config_path)?;
    Ok(Settings {
        api_key,
        db_path,
        tuning,
    })
}

/// A missing file means defaults; a file that does not parse is an error.
pub fn load_tuning(path: &Path) -> Result<ApiTuning> {
    if !path.exists() {
        return Ok(ApiTuning::default());
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("Parsing {}", path.display()))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_var_string(key: &str) -> Option<String> {
    non_blank(env::var(key).ok())
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key).or_else(|| non_blank(file_vars.get(key).cloned()))
}

/// Reads `KEY=value` lines, tolerating `export ` prefixes, comments and
/// single or double quotes around the value.
pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        vars.insert(key.to_string(), unquote(raw.trim()).to_string());
    }
    Ok(vars)
}

fn unquote(value: &str) -> &str {
    ['"', '\'']
        .into_iter()
        .find_map(|quote| value.strip_prefix(quote)?.strip_suffix(quote))
        .unwrap_or(value)
}
