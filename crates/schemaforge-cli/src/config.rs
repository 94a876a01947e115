use std::path::{Path, PathBuf};

use schemaforge_core::CompileOptions;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration file read when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "schemaforge.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("toml decode error: {0}")]
    TomlDecode(#[from] toml::de::Error),
    #[error("missing setting: {0}")]
    Missing(&'static str),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Contents of `schemaforge.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub domain: Option<String>,
    pub registry: Option<PathBuf>,
    pub search_paths: Vec<PathBuf>,
    pub connection: Option<String>,
    pub sloppy: bool,
    pub autocommit: bool,
    pub concurrent_indices: bool,
}

/// Values given on the command line. Flags only ever switch options on.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub domain: Option<String>,
    pub registry: Option<PathBuf>,
    pub search_paths: Vec<PathBuf>,
    pub connection: Option<String>,
    pub sloppy: bool,
    pub autocommit: bool,
    pub concurrent_indices: bool,
}

/// Effective settings of one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub domain: String,
    pub registry: Option<PathBuf>,
    pub search_paths: Vec<PathBuf>,
    pub connection: Option<String>,
    pub sloppy: bool,
    pub autocommit: bool,
    pub concurrent_indices: bool,
}

/// Reads the given configuration file, or `schemaforge.toml` in the working
/// directory when present.
pub fn load_config(path: Option<&Path>) -> ConfigResult<FileConfig> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => {
            let default = PathBuf::from(DEFAULT_CONFIG_FILE);
            if !default.is_file() {
                return Ok(FileConfig::default());
            }
            default
        }
    };
    let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;
    Ok(toml::from_str(&content)?)
}

impl Settings {
    pub fn resolve(file: FileConfig, overrides: Overrides) -> ConfigResult<Self> {
        let domain = overrides
            .domain
            .or(file.domain)
            .ok_or(ConfigError::Missing("domain"))?;
        let mut search_paths = if overrides.search_paths.is_empty() {
            file.search_paths
        } else {
            overrides.search_paths
        };
        if search_paths.is_empty() {
            search_paths.push(PathBuf::from("."));
        }

        Ok(Self {
            domain,
            registry: overrides.registry.or(file.registry),
            search_paths,
            connection: overrides.connection.or(file.connection),
            sloppy: overrides.sloppy || file.sloppy,
            autocommit: overrides.autocommit || file.autocommit,
            concurrent_indices: overrides.concurrent_indices || file.concurrent_indices,
        })
    }

    /// Connection string required by database commands.
    pub fn connection(&self) -> ConfigResult<&str> {
        self.connection
            .as_deref()
            .ok_or(ConfigError::Missing("connection"))
    }

    pub fn compile_options(&self) -> CompileOptions {
        CompileOptions {
            sloppy: self.sloppy,
            concurrent_indices: self.concurrent_indices,
        }
    }
}
