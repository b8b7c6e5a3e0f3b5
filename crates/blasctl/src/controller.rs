//! Collections of controlled libraries.

use tracing::info;

use crate::{
    config::Config,
    control::{LibraryInfo, ThreadControl},
    library::{LibraryHandle, LoadError},
    limiter::ThreadLimiter,
    target::LibraryTarget,
};

/// Owns every library a limit should apply to.
///
/// Built fresh for each scope; nothing is shared between controllers except
/// the native libraries themselves.
#[derive(Debug)]
pub struct ThreadpoolController<C = LibraryHandle> {
    libraries: Vec<C>,
}

impl ThreadpoolController<LibraryHandle> {
    /// Loads every enabled target, in order.
    ///
    /// # Errors
    ///
    /// Returns the first [`LoadError`]. Libraries loaded before the failure
    /// are unloaded again.
    pub fn load<'a>(
        targets: impl IntoIterator<Item = &'a LibraryTarget>,
    ) -> Result<Self, LoadError> {
        let libraries = targets
            .into_iter()
            .filter(|target| target.enabled)
            .map(LibraryHandle::load)
            .collect::<Result<Vec<_>, _>>()?;

        info!(library_count = libraries.len(), "Thread controller ready");

        Ok(Self { libraries })
    }

    /// Loads the enabled libraries listed in `config`.
    ///
    /// # Errors
    ///
    /// See [`ThreadpoolController::load`].
    pub fn from_config(config: &Config) -> Result<Self, LoadError> {
        Self::load(config.enabled_libraries())
    }
}

impl<C: ThreadControl> ThreadpoolController<C> {
    #[must_use]
    pub fn new(libraries: Vec<C>) -> Self {
        Self { libraries }
    }

    /// Snapshot of every library, in load order.
    #[must_use]
    pub fn info(&self) -> Vec<LibraryInfo> {
        self.libraries.iter().map(ThreadControl::info).collect()
    }

    /// Applies `num_threads` to every library that has a setter.
    pub fn set_limits(&self, num_threads: u32) {
        for library in &self.libraries {
            library.set_thread_count(num_threads);
        }
    }

    /// Enters a scope limiting every library to `num_threads`.
    ///
    /// The previous values come back when the returned guard is dropped or
    /// [`ThreadLimiter::restore`] is called.
    pub fn limit(self, num_threads: u32) -> ThreadLimiter<C> {
        ThreadLimiter::enter(self, num_threads)
    }

    /// Runs `workload` with every library limited to `num_threads`.
    ///
    /// Restoration also happens when `workload` panics.
    pub fn with_limit<T>(
        self,
        num_threads: u32,
        workload: impl FnOnce(&ThreadLimiter<C>) -> T,
    ) -> T {
        let limiter = self.limit(num_threads);
        let output = workload(&limiter);
        limiter.restore();
        output
    }

    #[must_use]
    pub fn libraries(&self) -> &[C] {
        &self.libraries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.libraries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.libraries.is_empty()
    }

    #[must_use]
    pub fn into_libraries(self) -> Vec<C> {
        self.libraries
    }
}
