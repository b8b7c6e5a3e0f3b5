//! Query and temporarily limit the thread count of native BLAS libraries.
//!
//! Numerical libraries such as OpenBLAS run their own worker threads. This
//! crate loads such a library at runtime, probes it for the optional
//! OpenBLAS-style entry points (thread-count getter, setter, config string)
//! and lets a caller cap its thread count for the duration of a scope.
//!
//! # Key Components
//!
//! - **Loading**: [`LibraryHandle`] opens one library with local symbol
//!   visibility and resolves its entry points once
//! - **Capabilities**: [`ThreadControl`] is the interface the limiter works
//!   against; every capability is optional
//! - **Scopes**: [`ThreadLimiter`] and [`threadpool_limits`] apply a limit and
//!   put the previous values back on every exit path
//! - **Configuration**: [`Config`] reads the library list from
//!   `blasctl.toml`
//!
//! # Example
//!
//! ```no_run
//! use blasctl::{LibraryTarget, ThreadpoolController};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let targets = [LibraryTarget::openblas("/usr/lib/x86_64-linux-gnu/libopenblas.so.0")];
//!
//! let limiter = ThreadpoolController::load(&targets)?.limit(1);
//! for info in limiter.controller().info() {
//!     println!("{} {:?} threads={:?}", info.name, info.version, info.num_threads);
//! }
//! // previous thread counts return here
//! drop(limiter);
//! # Ok(())
//! # }
//! ```
//!
//! # Thread Safety
//!
//! Nothing here coordinates between threads. Two scopes overlapping on the
//! same native library race inside that library; keep scopes on one thread
//! or serialize them.

mod config;
mod control;
mod controller;
pub mod env;
mod library;
mod limiter;
mod target;

/// Configuration file discovery and parsing.
pub use config::{CONFIG_FILE_NAME, CONFIG_PATH_ENV, Config, ConfigError};

/// Capability interface and info snapshots.
pub use control::{LibraryInfo, ThreadControl};

pub use controller::ThreadpoolController;

/// Native library loading.
///
/// Provides [`LibraryHandle`] for opening a library with local symbol
/// visibility and optional checksum verification.
pub use library::{LibraryHandle, LoadError};

/// Scoped limits.
pub use limiter::{ThreadLimiter, threadpool_limits};

/// Target descriptors.
pub use target::{LibraryTarget, OPENBLAS_VERSION_PREFIX, SymbolNames};
