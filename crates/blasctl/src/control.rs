//! Capability interface shared by every thread-controllable library.

use serde::Serialize;

/// Point-in-time description of one controlled library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LibraryInfo {
    pub name: String,
    pub path: String,
    pub version: Option<String>,
    pub num_threads: Option<u32>,
}

/// Optional thread-control capabilities of a native library.
///
/// Every capability may be missing. A missing getter or version probe
/// reports `None`; a missing setter turns [`set_thread_count`] into a
/// no-op. None of these are errors.
///
/// [`set_thread_count`]: ThreadControl::set_thread_count
pub trait ThreadControl {
    /// Name used in logs and [`LibraryInfo`].
    fn name(&self) -> &str;

    /// Where the library was loaded from.
    fn path(&self) -> &str;

    /// Current thread count, read live from the library.
    fn get_thread_count(&self) -> Option<u32>;

    fn set_thread_count(&self, num_threads: u32);

    fn get_version(&self) -> Option<String>;

    fn info(&self) -> LibraryInfo {
        LibraryInfo {
            name: self.name().to_string(),
            path: self.path().to_string(),
            version: self.get_version(),
            num_threads: self.get_thread_count(),
        }
    }
}

impl<C: ThreadControl + ?Sized> ThreadControl for Box<C> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn path(&self) -> &str {
        (**self).path()
    }

    fn get_thread_count(&self) -> Option<u32> {
        (**self).get_thread_count()
    }

    fn set_thread_count(&self, num_threads: u32) {
        (**self).set_thread_count(num_threads);
    }

    fn get_version(&self) -> Option<String> {
        (**self).get_version()
    }
}
