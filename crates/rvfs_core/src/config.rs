//! User-level configuration.
//!
//! Layering, lowest to highest: built-in defaults under `~/.heimdall`, the
//! optional `~/.heimdall/rvfs.json` file, then `RVFS_*` environment variables.

use crate::logging::{default_log_level, parse_level};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

/// Directory under the home directory holding every rvfs artifact.
pub const HOME_DIR_NAME: &str = ".heimdall";
/// Config file name inside [`HOME_DIR_NAME`].
pub const CONFIG_FILE_NAME: &str = "rvfs.json";

pub const ENV_PROJECTS_HOME: &str = "RVFS_PROJECTS_HOME";
pub const ENV_LOG_DIR: &str = "RVFS_LOG_DIR";
pub const ENV_LOG_LEVEL: &str = "RVFS_LOG_LEVEL";

/// Errors from configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    /// No home directory could be determined for defaults.
    HomeUnavailable,
    /// Config file exists but could not be read.
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Config file is not valid JSON for [`ConfigFile`].
    Malformed {
        path: PathBuf,
        source: serde_json::Error,
    },
    /// A field or override holds an unusable value.
    InvalidValue { field: &'static str, message: String },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HomeUnavailable => write!(f, "cannot determine the home directory"),
            Self::Io { path, source } => {
                write!(f, "cannot read config `{}`: {source}", path.display())
            }
            Self::Malformed { path, source } => {
                write!(f, "malformed config `{}`: {source}", path.display())
            }
            Self::InvalidValue { field, message } => write!(f, "invalid `{field}`: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Malformed { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// On-disk shape of `rvfs.json`; every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub projects_home: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
}

/// Fully resolved configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RvfsConfig {
    /// Fallback directory searched for project bundles.
    pub projects_home: PathBuf,
    /// Rolling log directory.
    pub log_dir: PathBuf,
    /// Canonical log level name.
    pub log_level: String,
}

impl RvfsConfig {
    /// Defaults rooted at `home`.
    pub fn defaults_for(home: &Path) -> Self {
        let base = home.join(HOME_DIR_NAME);
        Self {
            projects_home: base.join("projects"),
            log_dir: base.join("logs"),
            log_level: default_log_level().to_string(),
        }
    }

    /// Loads from the user's home directory and process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let home = dirs::home_dir().ok_or(ConfigError::HomeUnavailable)?;
        Self::load_with(&home, |key| std::env::var(key).ok())
    }

    /// Loads with an explicit home directory and environment lookup.
    ///
    /// A missing config file is not an error; an unreadable or malformed one is.
    pub fn load_with<F>(home: &Path, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::defaults_for(home);
        let path = home.join(HOME_DIR_NAME).join(CONFIG_FILE_NAME);
        if let Some(file) = read_config_file(&path)? {
            config.merge(file)?;
        }
        config.merge(ConfigFile {
            projects_home: non_empty_env(&env, ENV_PROJECTS_HOME).map(PathBuf::from),
            log_dir: non_empty_env(&env, ENV_LOG_DIR).map(PathBuf::from),
            log_level: non_empty_env(&env, ENV_LOG_LEVEL),
        })?;
        Ok(config)
    }

    fn merge(&mut self, layer: ConfigFile) -> Result<(), ConfigError> {
        if let Some(projects_home) = layer.projects_home {
            self.projects_home = projects_home;
        }
        if let Some(log_dir) = layer.log_dir {
            self.log_dir = log_dir;
        }
        if let Some(level) = layer.log_level {
            self.log_level = parse_level(&level)
                .map_err(|message| ConfigError::InvalidValue {
                    field: "log_level",
                    message,
                })?
                .to_string();
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<Option<ConfigFile>, ConfigError> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    serde_json::from_str(&text)
        .map(Some)
        .map_err(|source| ConfigError::Malformed {
            path: path.to_path_buf(),
            source,
        })
}

fn non_empty_env<F>(env: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    env(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
