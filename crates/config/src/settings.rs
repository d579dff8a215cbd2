// postindex.toml settings

use std::fs;
use std::path::{Path, PathBuf};

use postindex_recon::{Language, ReclaimPolicy, DEFAULT_CHUNK_SIZE};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const CONFIG_FILE_NAME: &str = "postindex.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub source: SourceSettings,
    pub sync: SyncSettings,
    pub query: QuerySettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseSettings {
    /// SQLite database file. Required.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SourceSettings {
    /// Default snapshot for `sync` when no file is given.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncSettings {
    pub chunk_size: usize,
    pub reclaim: ReclaimPolicy,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            reclaim: ReclaimPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QuerySettings {
    pub language: Language,
    pub address_separator: String,
    pub page_size: usize,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            language: Language::default(),
            address_separator: postindex_recon::address::DEFAULT_SEPARATOR.to_string(),
            page_size: postindex_recon::query::DEFAULT_PAGE_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingSettings {
    /// error, warn, info, debug or trace
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self { level: "info".to_string() }
    }
}

const LOG_LEVELS: &[&str] = &["error", "warn", "info", "debug", "trace"];

impl Settings {
    /// Default settings file location
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("postindex")
            .join(CONFIG_FILE_NAME)
    }

    pub fn from_toml(input: &str) -> Result<Self, ConfigError> {
        let settings: Self = toml::from_str(input).map_err(|e| ConfigError::Parse(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load `path`. A missing file yields defaults unless `required`.
    pub fn load(path: &Path, required: bool) -> Result<Self, ConfigError> {
        if !path.exists() {
            if required {
                return Err(ConfigError::NotFound(path.to_path_buf()));
            }
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let mut settings = Self::from_toml(&contents)?;
        settings.resolve_relative_paths(path);
        Ok(settings)
    }

    /// Relative paths in the file are relative to the file's directory.
    fn resolve_relative_paths(&mut self, config_path: &Path) {
        let Some(base) = config_path.parent() else { return };
        for path in [&mut self.database.path, &mut self.source.path].into_iter().flatten() {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sync.chunk_size == 0 {
            return Err(ConfigError::Invalid("sync.chunk_size must be at least 1".into()));
        }
        if self.query.page_size == 0 {
            return Err(ConfigError::Invalid("query.page_size must be at least 1".into()));
        }
        if !LOG_LEVELS.contains(&self.logging.level.to_ascii_lowercase().as_str()) {
            return Err(ConfigError::Invalid(format!(
                "logging.level '{}' is not one of {}",
                self.logging.level,
                LOG_LEVELS.join(", ")
            )));
        }
        Ok(())
    }

    pub fn database_path(&self) -> Result<&Path, ConfigError> {
        self.database.path.as_deref().ok_or(ConfigError::MissingDatabase)
    }

    /// Commented starter file written by `init`.
    pub fn template(database: &Path) -> String {
        format!(
            r#"# postindex settings

[database]
path = "{}"

[source]
# path = "postindex.xlsx"

[sync]
chunk_size = {DEFAULT_CHUNK_SIZE}
# "unobserved" removes keys missing from the snapshot,
# "stale" removes rows not checked during the run
reclaim = "unobserved"

[query]
language = "ukr"
address_separator = ", "
page_size = 50

[logging]
level = "info"
"#,
            database.display().to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    }

    /// Write the starter file unless one already exists.
    pub fn create_default_file(path: &Path, database: &Path) -> Result<bool, ConfigError> {
        if path.exists() {
            return Ok(false);
        }
        let io_err = |e: std::io::Error| ConfigError::Io { path: path.to_path_buf(), message: e.to_string() };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        fs::write(path, Self::template(database)).map_err(io_err)?;
        Ok(true)
    }
}
