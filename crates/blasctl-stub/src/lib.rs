//! Fake native library exporting OpenBLAS-style thread-control symbols.
//!
//! Built as a `cdylib` and loaded by the `blasctl` integration tests. It
//! exports three symbol families so a single binary can stand in for
//! several library shapes through symbol-name overrides:
//!
//! - `openblas_*`: getter, setter and config string (`"OpenBLAS 0.3.26 ..."`)
//! - `setonly_*`: a setter with no matching getter
//! - `otherlib_*`: a config string with a foreign prefix
//!
//! The `stub_*` symbols expose call counters so tests can observe what the
//! library saw.

use std::{
    ffi::{c_char, c_uint},
    sync::atomic::{AtomicU32, Ordering},
};

/// Thread count reported before anyone calls the setter.
const INITIAL_THREADS: u32 = 6;

static OPENBLAS_THREADS: AtomicU32 = AtomicU32::new(INITIAL_THREADS);
static OPENBLAS_SET_CALLS: AtomicU32 = AtomicU32::new(0);

static SETONLY_CALLS: AtomicU32 = AtomicU32::new(0);
static SETONLY_LAST: AtomicU32 = AtomicU32::new(0);

#[unsafe(no_mangle)]
pub extern "C" fn openblas_get_num_threads() -> c_uint {
    OPENBLAS_THREADS.load(Ordering::SeqCst)
}

#[unsafe(no_mangle)]
pub extern "C" fn openblas_set_num_threads(num_threads: c_uint) {
    OPENBLAS_SET_CALLS.fetch_add(1, Ordering::SeqCst);
    OPENBLAS_THREADS.store(num_threads, Ordering::SeqCst);
}

#[unsafe(no_mangle)]
pub extern "C" fn openblas_get_config() -> *const c_char {
    c"OpenBLAS 0.3.26 NO_AFFINITY Haswell MAX_THREADS=64".as_ptr()
}

#[unsafe(no_mangle)]
pub extern "C" fn setonly_set_num_threads(num_threads: c_uint) {
    SETONLY_CALLS.fetch_add(1, Ordering::SeqCst);
    SETONLY_LAST.store(num_threads, Ordering::SeqCst);
}

#[unsafe(no_mangle)]
pub extern "C" fn otherlib_get_config() -> *const c_char {
    c"SomeOtherLib 1.0".as_ptr()
}

#[unsafe(no_mangle)]
pub extern "C" fn stub_openblas_set_calls() -> c_uint {
    OPENBLAS_SET_CALLS.load(Ordering::SeqCst)
}

#[unsafe(no_mangle)]
pub extern "C" fn stub_setonly_calls() -> c_uint {
    SETONLY_CALLS.load(Ordering::SeqCst)
}

#[unsafe(no_mangle)]
pub extern "C" fn stub_setonly_last() -> c_uint {
    SETONLY_LAST.load(Ordering::SeqCst)
}
