//! Scoped thread limits with guaranteed restoration.
//!
//! A [`ThreadLimiter`] moves through `Idle → Active → Restored`:
//!
//! - **Idle**: a [`ThreadpoolController`] has loaded its libraries.
//! - **Active**: [`ThreadLimiter::enter`] recorded every library's thread
//!   count and applied the limit.
//! - **Restored**: [`ThreadLimiter::restore`] or `Drop` put the recorded
//!   counts back. This happens on every exit path, including early returns
//!   and panics, and happens at most once.
//!
//! Libraries that reported no thread count on entry are left alone on exit.
//!
//! Scopes are not coordinated across threads: two overlapping scopes on the
//! same native library race inside that library.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info, warn};

use crate::{
    control::ThreadControl,
    controller::ThreadpoolController,
    library::{LibraryHandle, LoadError},
    target::LibraryTarget,
};

/// Guard holding a thread limit until it is restored or dropped.
#[must_use = "if unused, the previous thread counts are restored immediately"]
pub struct ThreadLimiter<C: ThreadControl = LibraryHandle> {
    controller: ThreadpoolController<C>,
    originals: Vec<Option<u32>>,
    restored: AtomicBool,
}

impl ThreadLimiter<LibraryHandle> {
    /// Loads `targets` and limits each of them to `num_threads`.
    ///
    /// # Errors
    ///
    /// Returns a [`LoadError`] if any enabled target fails to load. No
    /// thread count has been touched in that case.
    pub fn new<'a>(
        targets: impl IntoIterator<Item = &'a LibraryTarget>,
        num_threads: u32,
    ) -> Result<Self, LoadError> {
        let controller = ThreadpoolController::load(targets)?;
        Ok(Self::enter(controller, num_threads))
    }
}

impl<C: ThreadControl> ThreadLimiter<C> {
    /// Snapshots every library's thread count, then applies `num_threads`.
    pub fn enter(controller: ThreadpoolController<C>, num_threads: u32) -> Self {
        let originals: Vec<Option<u32>> = controller
            .libraries()
            .iter()
            .map(ThreadControl::get_thread_count)
            .collect();

        info!(
            num_threads,
            library_count = controller.len(),
            "Entering thread limit scope"
        );

        controller.set_limits(num_threads);

        Self {
            controller,
            originals,
            restored: AtomicBool::new(false),
        }
    }

    /// Applies a different limit inside the scope.
    ///
    /// The values recorded on entry are unaffected.
    pub fn set_limit(&self, num_threads: u32) {
        if self.is_restored() {
            warn!(num_threads, "Thread limit scope already restored; ignoring");
            return;
        }
        self.controller.set_limits(num_threads);
    }

    /// Puts back the thread counts recorded on entry.
    ///
    /// Idempotent: only the first call (or the drop, if this is never
    /// called) touches the libraries.
    pub fn restore(&self) {
        if self.restored.swap(true, Ordering::SeqCst) {
            return;
        }

        for (library, original) in self.controller.libraries().iter().zip(&self.originals) {
            match original {
                Some(num_threads) => {
                    debug!(path = %library.path(), num_threads, "Restoring thread count");
                    library.set_thread_count(*num_threads);
                }
                None => {
                    debug!(path = %library.path(), "No recorded thread count; leaving as is");
                }
            }
        }

        info!("Thread limit scope restored");
    }

    /// Thread counts recorded on entry, in library order.
    #[must_use]
    pub fn originals(&self) -> &[Option<u32>] {
        &self.originals
    }

    #[must_use]
    pub fn is_restored(&self) -> bool {
        self.restored.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn controller(&self) -> &ThreadpoolController<C> {
        &self.controller
    }
}

impl<C: ThreadControl> Drop for ThreadLimiter<C> {
    fn drop(&mut self) {
        self.restore();
    }
}

/// Runs `workload` with every enabled target limited to `num_threads`.
///
/// The libraries are loaded for this call only and unloaded afterwards.
/// Their thread counts are restored before this returns, or while unwinding
/// if `workload` panics.
///
/// # Errors
///
/// Returns a [`LoadError`] if a target fails to load; `workload` does not
/// run in that case. Errors produced by `workload` itself travel inside `T`.
///
/// # Example
///
/// ```no_run
/// use blasctl::{LibraryTarget, threadpool_limits};
///
/// let target = LibraryTarget::openblas("/usr/lib/x86_64-linux-gnu/libopenblas.so.0");
/// let sum = threadpool_limits([&target], 1, |_| {
///     // single-threaded BLAS work here
///     (1..=10).sum::<u32>()
/// })?;
/// assert_eq!(sum, 55);
/// # Ok::<(), blasctl::LoadError>(())
/// ```
pub fn threadpool_limits<'a, T>(
    targets: impl IntoIterator<Item = &'a LibraryTarget>,
    num_threads: u32,
    workload: impl FnOnce(&ThreadLimiter) -> T,
) -> Result<T, LoadError> {
    let controller = ThreadpoolController::load(targets)?;
    Ok(controller.with_limit(num_threads, workload))
}
