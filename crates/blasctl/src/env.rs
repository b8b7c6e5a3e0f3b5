//! Process environment setup for embedding applications.

use tracing::debug;

/// Variable read by Intel's OpenMP runtime when a second copy loads.
pub const KMP_DUPLICATE_LIB_OK: &str = "KMP_DUPLICATE_LIB_OK";

/// Lets two copies of the Intel OpenMP runtime coexist in one process.
///
/// Sets `KMP_DUPLICATE_LIB_OK=True` unless the variable is already set, in
/// which case the existing value wins. Returns `true` if the variable was
/// set by this call. Nothing is undone later.
///
/// Loading a library never calls this; it is a startup decision for the
/// application.
///
/// # Safety
///
/// Mutates the process environment. Call it once at startup, before any
/// other thread exists that could read or write environment variables.
pub unsafe fn allow_duplicate_openmp_runtime() -> bool {
    if std::env::var_os(KMP_DUPLICATE_LIB_OK).is_some() {
        debug!(variable = KMP_DUPLICATE_LIB_OK, "Already set; leaving as is");
        return false;
    }

    // SAFETY: upheld by the caller.
    unsafe { std::env::set_var(KMP_DUPLICATE_LIB_OK, "True") };
    debug!(variable = KMP_DUPLICATE_LIB_OK, "Set to True");
    true
}
