//! Project configuration for blasctl.
//!
//! The configuration lists the native libraries a controller manages. It
//! lives in a `blasctl.toml` file:
//!
//! ```toml
//! [[libraries]]
//! name = "openblas"
//! path = "/usr/lib/x86_64-linux-gnu/libopenblas.so.0"
//!
//! [[libraries]]
//! path = "vendor/libblis.so"
//! version_prefix = "BLIS"
//! [libraries.symbols]
//! get_num_threads = "bli_thread_get_num_threads"
//! set_num_threads = "bli_thread_set_num_threads"
//! get_config = "bli_info_get_version_str"
//! ```
//!
//! # Resolution Algorithm
//!
//! 1. `BLASCTL_CONFIG_PATH` environment variable
//! 2. Start directory (usually the current directory)
//! 3. Parent directories (walk up to filesystem root)
//! 4. XDG config directory (`~/.config/blasctl/blasctl.toml`)
//!
//! # Library paths
//!
//! A relative `path` with more than one component is resolved against the
//! directory holding the config file. A bare file name such as
//! `libopenblas.so.0` is passed to the platform loader unchanged so its
//! search path applies; such an entry cannot carry a `checksum`. Library
//! locations are never guessed.

use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::target::LibraryTarget;

/// File name searched for in each directory.
pub const CONFIG_FILE_NAME: &str = "blasctl.toml";

/// Environment variable pointing at an explicit config file.
pub const CONFIG_PATH_ENV: &str = "BLASCTL_CONFIG_PATH";

/// Errors that can occur during configuration resolution or loading.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// I/O error when reading a config file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error when a config file is malformed.
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file not found.
    #[error("config file not found: {0}")]
    NotFound(PathBuf),

    /// The file parsed but describes an unusable setup.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Libraries to control, as read from `blasctl.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub libraries: Vec<LibraryTarget>,
}

impl Config {
    /// Loads and validates the config file at `path`.
    ///
    /// # Errors
    ///
    /// Returns `Err(ConfigError)` if:
    /// - The file does not exist (`NotFound`) or cannot be read (`Io`)
    /// - The file cannot be parsed as TOML
    /// - A library entry is invalid
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ConfigError::NotFound(path.to_path_buf()),
            _ => ConfigError::Io(e),
        })?;

        let mut config = Self::parse(&contents)?;
        let root_dir = path.parent().unwrap_or_else(|| Path::new("."));
        config.anchor_relative_paths(root_dir);

        Ok(config)
    }

    /// Parses and validates config text. Paths are left as written.
    ///
    /// # Errors
    ///
    /// Returns `Err(ConfigError)` if the text is not valid TOML or a library
    /// entry is invalid.
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Finds a config using the resolution algorithm, starting from the
    /// current directory.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(Config))` if a config file was found and loaded
    /// - `Ok(None)` if no config file exists anywhere on the search path
    ///
    /// # Errors
    ///
    /// Returns `Err(ConfigError)` if:
    /// - `BLASCTL_CONFIG_PATH` points to a missing file
    /// - A found config file cannot be read or parsed
    pub fn resolve() -> Result<Option<Self>, ConfigError> {
        let current = std::env::current_dir()?;
        Self::resolve_from(&current)
    }

    /// Like [`Config::resolve`], walking up from `start` instead of the
    /// current directory.
    ///
    /// # Errors
    ///
    /// See [`Config::resolve`].
    pub fn resolve_from(start: &Path) -> Result<Option<Self>, ConfigError> {
        resolve_with(start, env_override(), xdg_config_path())
    }

    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use = "iterator should be consumed to access enabled libraries"]
    pub fn enabled_libraries(&self) -> impl Iterator<Item = &LibraryTarget> {
        self.libraries.iter().filter(|l| l.enabled)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (index, library) in self.libraries.iter().enumerate() {
            if library.path.as_os_str().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "library #{index} ({}) has an empty path",
                    library.name.as_deref().unwrap_or("<unnamed>")
                )));
            }
            if library.checksum.is_some()
                && library.path.is_relative()
                && library.path.components().count() == 1
            {
                return Err(ConfigError::Invalid(format!(
                    "library #{index} ({}) has a checksum but no directory in its path",
                    library.name.as_deref().unwrap_or("<unnamed>")
                )));
            }
        }
        Ok(())
    }

    fn anchor_relative_paths(&mut self, root_dir: &Path) {
        for library in &mut self.libraries {
            if library.path.is_relative() && library.path.components().count() > 1 {
                library.path = root_dir.join(&library.path);
            }
        }
    }
}

// ===== Resolution helpers =====

fn resolve_with(
    start: &Path,
    env_path: Option<PathBuf>,
    xdg_path: Option<PathBuf>,
) -> Result<Option<Config>, ConfigError> {
    // Step 1: Environment variable override
    if let Some(path) = env_path {
        if !path.exists() {
            return Err(ConfigError::NotFound(path));
        }
        return Config::load(&path).map(Some);
    }

    // Step 2 + 3: Start directory, then its parents
    for dir in start.ancestors() {
        let candidate = dir.join(CONFIG_FILE_NAME);
        if candidate.is_file() {
            return Config::load(&candidate).map(Some);
        }
    }

    // Step 4: XDG config directory
    if let Some(path) = xdg_path
        && path.is_file()
    {
        return Config::load(&path).map(Some);
    }

    Ok(None)
}

fn env_override() -> Option<PathBuf> {
    std::env::var_os(CONFIG_PATH_ENV)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

fn xdg_config_path() -> Option<PathBuf> {
    Some(dirs::config_dir()?.join("blasctl").join(CONFIG_FILE_NAME))
}
