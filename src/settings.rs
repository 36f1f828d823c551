use crate::errors::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub log: LogSettings,
    pub query: QuerySettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct DatabaseSettings {
    pub path: PathBuf,
    pub run_post_deployment: bool,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/spans-metrics.db"),
            run_post_deployment: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct LogSettings {
    pub level: String,
    pub json: bool,
    /// Daily rolling files are written here when set; stderr otherwise.
    pub directory: Option<PathBuf>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            directory: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct QuerySettings {
    pub default_limit: u32,
    pub max_limit: u32,
    pub default_interval_seconds: i64,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            default_limit: 50,
            max_limit: 10_000,
            default_interval_seconds: 3_600,
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> AppResult<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("{}: {}", path.display(), err)))?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> AppResult<Self> {
        let settings: Settings = if raw.trim().is_empty() {
            Settings::default()
        } else {
            serde_yaml::from_str(raw)?
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> AppResult<()> {
        let query = &self.query;
        if query.default_limit == 0 || query.max_limit == 0 {
            return Err(AppError::Config("query limits must be positive".to_string()));
        }
        if query.default_limit > query.max_limit {
            return Err(AppError::Config(format!(
                "default_limit {} exceeds max_limit {}",
                query.default_limit, query.max_limit
            )));
        }
        if query.default_interval_seconds <= 0 || query.default_interval_seconds % 60 != 0 {
            return Err(AppError::Config(format!(
                "default_interval_seconds must be a positive multiple of 60, got {}",
                query.default_interval_seconds
            )));
        }
        Ok(())
    }
}
