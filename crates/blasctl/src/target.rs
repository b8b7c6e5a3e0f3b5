//! Descriptors for the native libraries a controller should manage.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Identifier OpenBLAS puts first in its `openblas_get_config` string.
pub const OPENBLAS_VERSION_PREFIX: &str = "OpenBLAS";

/// Names of the three optional entry points probed in a library.
///
/// Every field falls back to the OpenBLAS symbol name when omitted, so a
/// config only has to spell out the symbols it renames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SymbolNames {
    /// `unsigned int (void)` returning the current thread count.
    pub get_num_threads: String,

    /// `void (unsigned int)` applying a new thread count.
    pub set_num_threads: String,

    /// `const char *(void)` returning the build configuration string.
    pub get_config: String,
}

impl SymbolNames {
    #[must_use]
    pub fn openblas() -> Self {
        Self {
            get_num_threads: "openblas_get_num_threads".to_string(),
            set_num_threads: "openblas_set_num_threads".to_string(),
            get_config: "openblas_get_config".to_string(),
        }
    }
}

impl Default for SymbolNames {
    fn default() -> Self {
        Self::openblas()
    }
}

/// A native library to load, plus how to talk to it.
///
/// `path` is handed to the platform loader untouched, so a bare file name is
/// resolved through the loader's search path. A target with a `checksum`
/// needs a path with a directory component (`./libfoo.so` works), since the
/// file that gets hashed must be the one that gets loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryTarget {
    /// Display name used in logs and [`LibraryInfo`](crate::LibraryInfo).
    pub name: Option<String>,

    pub path: PathBuf,

    #[serde(default)]
    pub symbols: SymbolNames,

    /// First whitespace-separated token the config string must carry for a
    /// version to be reported.
    #[serde(default = "default_version_prefix")]
    pub version_prefix: String,

    /// Expected SHA-256 of the library file, lowercase hex.
    pub checksum: Option<String>,

    /// Defaults to `true` if not specified in the config.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl LibraryTarget {
    /// Target for an OpenBLAS build at `path`, using the stock symbol names.
    pub fn openblas(path: impl Into<PathBuf>) -> Self {
        Self {
            name: None,
            path: path.into(),
            symbols: SymbolNames::openblas(),
            version_prefix: default_version_prefix(),
            checksum: None,
            enabled: true,
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_symbols(mut self, symbols: SymbolNames) -> Self {
        self.symbols = symbols;
        self
    }

    #[must_use]
    pub fn with_version_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.version_prefix = prefix.into();
        self
    }

    #[must_use]
    pub fn with_checksum(mut self, checksum: impl Into<String>) -> Self {
        self.checksum = Some(checksum.into());
        self
    }

    /// The configured name, or the library file name when none was given.
    #[must_use]
    pub fn display_name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        file_name_or_path(&self.path)
    }
}

fn file_name_or_path(path: &Path) -> String {
    path.file_name()
        .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned())
}

fn default_version_prefix() -> String {
    OPENBLAS_VERSION_PREFIX.to_string()
}

fn default_enabled() -> bool {
    true
}
