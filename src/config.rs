use std::fs;
use std::path::PathBuf;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::AcquireError;
use crate::recipe::RecipeSpec;

pub const DEFAULT_CONFIG_FILE: &str = "kira-acquire.json";
pub const WORKING_DIRECTORY_ENV: &str = "KIRA_ACQUIRE_DIR";
pub const DEFAULT_WORKING_DIRECTORY: &str = "~/.cache/kira-acquire";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FetchTool {
    #[default]
    Native,
    Curl,
    Wget,
    Lftp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchSettings {
    #[serde(default)]
    pub tool: FetchTool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            tool: FetchTool::Native,
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Settings every [`Pipeline`](crate::pipeline::Pipeline) is constructed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquireConfig {
    pub working_directory: String,
    pub redo: bool,
    pub fetch: FetchSettings,
}

impl Default for AcquireConfig {
    fn default() -> Self {
        Self {
            working_directory: DEFAULT_WORKING_DIRECTORY.to_string(),
            redo: false,
            fetch: FetchSettings::default(),
        }
    }
}

impl AcquireConfig {
    pub fn in_directory(dir: impl Into<String>) -> Self {
        Self {
            working_directory: dir.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub working_directory: Option<String>,
    #[serde(default)]
    pub redo: Option<bool>,
    #[serde(default)]
    pub fetch: Option<FetchSettings>,
    #[serde(default)]
    pub pipelines: Vec<RecipeSpec>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub settings: AcquireConfig,
    pub pipelines: Vec<RecipeSpec>,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, AcquireError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Err(AcquireError::MissingConfig);
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| AcquireError::ConfigRead(config_path.display().to_string()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| AcquireError::ConfigParse(err.to_string()))?;

        let mut resolved = Self::resolve_config(config)?;
        if let Ok(dir) = std::env::var(WORKING_DIRECTORY_ENV) {
            if !dir.trim().is_empty() {
                resolved.settings.working_directory = dir.trim().to_string();
            }
        }
        Ok(resolved)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, AcquireError> {
        let defaults = AcquireConfig::default();
        let settings = AcquireConfig {
            working_directory: config
                .working_directory
                .unwrap_or(defaults.working_directory),
            redo: config.redo.unwrap_or(defaults.redo),
            fetch: config.fetch.unwrap_or(defaults.fetch),
        };

        let mut seen = std::collections::HashSet::new();
        for recipe in &config.pipelines {
            if recipe.name.trim().is_empty() {
                return Err(AcquireError::InvalidConfiguration(
                    "pipeline name must not be empty".to_string(),
                ));
            }
            if !seen.insert(recipe.name.as_str()) {
                return Err(AcquireError::InvalidConfiguration(format!(
                    "duplicate pipeline name: {}",
                    recipe.name
                )));
            }
        }

        Ok(ResolvedConfig {
            settings,
            pipelines: config.pipelines,
        })
    }
}

fn default_timeout_secs() -> u64 {
    60
}
