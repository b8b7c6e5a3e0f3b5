//! Dynamic loading of native thread-controllable libraries.

use std::{
    ffi::{CStr, c_char, c_uint},
    path::Path,
};

use libloading::Library;
use tracing::{debug, info};

use crate::{
    control::ThreadControl,
    target::{LibraryTarget, SymbolNames},
};

type GetNumThreadsFn = unsafe extern "C" fn() -> c_uint;
type SetNumThreadsFn = unsafe extern "C" fn(c_uint);
type GetConfigFn = unsafe extern "C" fn() -> *const c_char;

/// Errors that can occur when loading a native library.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum LoadError {
    /// The target path is empty, or is a bare file name paired with a
    /// checksum.
    #[error("invalid path: {0:?}")]
    InvalidPath(String),

    /// The loader rejected the file, or the file could not be read.
    #[error("failed to load library {path}: {reason}")]
    LibraryLoad { path: String, reason: String },

    /// Checksum mismatch.
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },
}

/// Reasons a capability probe came back empty. Never surfaced to callers.
#[derive(Debug, thiserror::Error)]
pub(crate) enum ProbeError {
    #[error("symbol `{0}` is not exported")]
    SymbolMissing(String),

    #[error("config accessor returned a null pointer")]
    NullConfig,

    #[error("config string is not valid UTF-8")]
    InvalidUtf8,

    #[error("expected config prefix `{expected}`, found `{found}`")]
    VersionParseMismatch { expected: String, found: String },
}

/// Entry points resolved once when the library is opened.
#[derive(Debug, Clone, Copy, Default)]
struct EntryPoints {
    get_num_threads: Option<GetNumThreadsFn>,
    set_num_threads: Option<SetNumThreadsFn>,
    get_config: Option<GetConfigFn>,
}

impl EntryPoints {
    fn resolve(library: &Library, symbols: &SymbolNames, path: &str) -> Self {
        Self {
            get_num_threads: resolve_symbol(library, &symbols.get_num_threads, path),
            set_num_threads: resolve_symbol(library, &symbols.set_num_threads, path),
            get_config: resolve_symbol(library, &symbols.get_config, path),
        }
    }
}

/// A loaded native library and its thread-control entry points.
///
/// The library is unloaded when this struct is dropped. The entry points
/// are plain function pointers into it and never outlive it.
#[derive(Debug)]
pub struct LibraryHandle {
    name: String,
    path: String,
    entry_points: EntryPoints,
    version: Option<String>,
    library: Library,
}

impl LibraryHandle {
    /// Loads the library described by `target` with local symbol
    /// visibility and resolves its entry points.
    ///
    /// Missing entry points are not an error: the corresponding capability
    /// reports "unknown" or does nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The path is empty
    /// - A checksum is set and the path is a bare file name
    /// - The checksum does not match
    /// - The platform loader rejects the file
    pub fn load(target: &LibraryTarget) -> Result<Self, LoadError> {
        let path = target.path.as_path();
        if path.as_os_str().is_empty() {
            return Err(LoadError::InvalidPath(path.display().to_string()));
        }
        let path_str = path.display().to_string();

        info!(path = %path_str, "Loading native library");

        if let Some(expected_checksum) = &target.checksum {
            // The loader searches its own path for a bare file name, so the
            // bytes hashed here could come from a different file.
            if is_bare_file_name(path) {
                return Err(LoadError::InvalidPath(format!(
                    "{path_str}: checksum requires a path with a directory component"
                )));
            }
            verify_checksum(path, expected_checksum)?;
            debug!(path = %path_str, checksum = %expected_checksum, "Checksum verified");
        }

        let library = open_local(path).map_err(|e| LoadError::LibraryLoad {
            path: path_str.clone(),
            reason: e.to_string(),
        })?;

        let entry_points = EntryPoints::resolve(&library, &target.symbols, &path_str);
        let handle = Self::from_parts(
            target.display_name(),
            path_str,
            library,
            entry_points,
            &target.symbols,
            &target.version_prefix,
        );

        debug!(
            path = %handle.path,
            version = handle.version.as_deref().unwrap_or("unknown"),
            get = handle.supports_get(),
            set = handle.supports_set(),
            "Library loaded successfully"
        );

        Ok(handle)
    }

    /// Loads an OpenBLAS build from `path` using the stock symbol names.
    ///
    /// # Errors
    ///
    /// See [`LibraryHandle::load`].
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        Self::load(&LibraryTarget::openblas(path.as_ref()))
    }

    fn from_parts(
        name: String,
        path: String,
        library: Library,
        entry_points: EntryPoints,
        symbols: &SymbolNames,
        version_prefix: &str,
    ) -> Self {
        let version = match probe_version(entry_points.get_config, symbols, version_prefix) {
            Ok(version) => Some(version),
            Err(err) => {
                debug!(path = %path, reason = %err, "Version unknown");
                None
            }
        };

        Self {
            name,
            path,
            entry_points,
            version,
            library,
        }
    }

    /// Current thread count, or `None` when the library has no getter.
    #[must_use]
    pub fn get_thread_count(&self) -> Option<u32> {
        let get_num_threads = self.entry_points.get_num_threads?;
        // SAFETY: the symbol was resolved from `self.library`, which is still
        // loaded, and the getter convention is `unsigned int (void)`.
        Some(unsafe { get_num_threads() })
    }

    /// Applies `num_threads`, or does nothing when the library has no setter.
    pub fn set_thread_count(&self, num_threads: u32) {
        let Some(set_num_threads) = self.entry_points.set_num_threads else {
            debug!(path = %self.path, num_threads, "No setter exported; ignoring");
            return;
        };
        debug!(path = %self.path, num_threads, "Setting thread count");
        // SAFETY: resolved from the still-loaded `self.library`; the setter
        // convention is `void (unsigned int)`.
        unsafe { set_num_threads(num_threads) };
    }

    /// Version parsed from the library's config string at load time.
    #[must_use]
    pub fn get_version(&self) -> Option<String> {
        self.version.clone()
    }

    #[must_use]
    pub fn supports_get(&self) -> bool {
        self.entry_points.get_num_threads.is_some()
    }

    #[must_use]
    pub fn supports_set(&self) -> bool {
        self.entry_points.set_num_threads.is_some()
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl ThreadControl for LibraryHandle {
    fn name(&self) -> &str {
        &self.name
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn get_thread_count(&self) -> Option<u32> {
        LibraryHandle::get_thread_count(self)
    }

    fn set_thread_count(&self, num_threads: u32) {
        LibraryHandle::set_thread_count(self, num_threads);
    }

    fn get_version(&self) -> Option<String> {
        LibraryHandle::get_version(self)
    }
}

impl Drop for LibraryHandle {
    fn drop(&mut self) {
        debug!(path = %self.path, library = ?self.library, "Unloading native library");
    }
}

#[cfg(unix)]
fn open_local(path: &Path) -> Result<Library, libloading::Error> {
    use libloading::os::unix::{Library as UnixLibrary, RTLD_LOCAL, RTLD_NOW};

    // SAFETY: loading runs the library's initializers. Callers choose which
    // libraries to load; we only keep its symbols out of the global scope.
    unsafe { UnixLibrary::open(Some(path), RTLD_NOW | RTLD_LOCAL) }.map(Library::from)
}

#[cfg(not(unix))]
fn open_local(path: &Path) -> Result<Library, libloading::Error> {
    // SAFETY: see the unix variant; Windows has no global symbol namespace.
    unsafe { Library::new(path) }
}

fn resolve_symbol<T: Copy>(library: &Library, name: &str, path: &str) -> Option<T> {
    // SAFETY: every `T` used here is the C signature fixed by the symbol
    // naming convention, and the pointer is only called while `library` is
    // alive.
    match unsafe { library.get::<T>(name.as_bytes()) } {
        Ok(symbol) => {
            debug!(path = %path, symbol = %name, "Resolved symbol");
            Some(*symbol)
        }
        Err(err) => {
            let reason = ProbeError::SymbolMissing(name.to_string());
            debug!(path = %path, reason = %reason, error = %err, "Capability unavailable");
            None
        }
    }
}

fn is_bare_file_name(path: &Path) -> bool {
    path.is_relative() && path.components().count() == 1
}

fn verify_checksum(path: &Path, expected: &str) -> Result<(), LoadError> {
    let file_bytes = std::fs::read(path).map_err(|e| LoadError::LibraryLoad {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    let digest = sha256::digest(&file_bytes[..]);
    if digest.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(LoadError::ChecksumMismatch {
            expected: expected.to_string(),
            actual: digest,
        })
    }
}

fn probe_version(
    get_config: Option<GetConfigFn>,
    symbols: &SymbolNames,
    prefix: &str,
) -> Result<String, ProbeError> {
    let get_config =
        get_config.ok_or_else(|| ProbeError::SymbolMissing(symbols.get_config.clone()))?;

    // SAFETY: resolved from the loaded library; the accessor convention is
    // `const char *(void)`.
    let raw = unsafe { get_config() };
    if raw.is_null() {
        return Err(ProbeError::NullConfig);
    }

    // SAFETY: non-null and, by convention, a NUL-terminated string owned by
    // the library for its whole lifetime.
    let config = unsafe { CStr::from_ptr(raw) }
        .to_str()
        .map_err(|_| ProbeError::InvalidUtf8)?;

    parse_version(config, prefix)
}

/// Extracts `<version>` from `"<prefix> <version> ..."`.
fn parse_version(config: &str, prefix: &str) -> Result<String, ProbeError> {
    let mut tokens = config.split_whitespace();
    match (tokens.next(), tokens.next()) {
        (Some(first), Some(version)) if first == prefix => Ok(version.to_string()),
        (first, _) => Err(ProbeError::VersionParseMismatch {
            expected: prefix.to_string(),
            found: first.unwrap_or_default().to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_load_error_display_messages() {
        // Arrange
        let library_load = LoadError::LibraryLoad {
            path: "/x/libfoo.so".to_string(),
            reason: "boom".to_string(),
        };
        let checksum = LoadError::ChecksumMismatch {
            expected: "aa".to_string(),
            actual: "bb".to_string(),
        };
        let invalid_path = LoadError::InvalidPath(String::new());

        // Act & Assert
        assert_eq!(
            library_load.to_string(),
            "failed to load library /x/libfoo.so: boom"
        );
        assert_eq!(checksum.to_string(), "checksum mismatch: expected aa, got bb");
        assert_eq!(invalid_path.to_string(), "invalid path: \"\"");
    }

    #[test]
    fn test_load_error_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<LoadError>();
        assert_send_sync::<LibraryHandle>();
    }

    #[test]
    fn test_load_nonexistent_file_returns_library_load_error() {
        let result = LibraryHandle::open("/nonexistent/path/to/libopenblas.so");

        let Err(err) = result else {
            panic!("expected loading nonexistent file to fail");
        };
        assert!(matches!(err, LoadError::LibraryLoad { .. }));
    }

    #[test]
    fn test_load_empty_path_returns_invalid_path() {
        let result = LibraryHandle::open("");

        assert!(matches!(result, Err(LoadError::InvalidPath(_))));
    }

    #[test]
    fn test_load_non_library_file_returns_library_load_error() {
        let mut file = tempfile::Builder::new()
            .suffix(std::env::consts::DLL_SUFFIX)
            .tempfile()
            .unwrap();
        file.write_all(b"definitely not an ELF, Mach-O or PE image")
            .unwrap();

        let result = LibraryHandle::open(file.path());

        let Err(err) = result else {
            panic!("expected loading a text file to fail");
        };
        let LoadError::LibraryLoad { path, .. } = err else {
            panic!("expected LibraryLoad");
        };
        assert_eq!(path, file.path().display().to_string());
    }

    #[test]
    fn test_checksum_is_verified_before_loading() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"payload").unwrap();
        let target = LibraryTarget::openblas(file.path()).with_checksum("0".repeat(64));

        let result = LibraryHandle::load(&target);

        let Err(LoadError::ChecksumMismatch { expected, actual }) = result else {
            panic!("expected a checksum mismatch");
        };
        assert_eq!(expected, "0".repeat(64));
        assert_eq!(actual, sha256::digest(&b"payload"[..]));
    }

    #[test]
    fn test_checksum_with_bare_file_name_is_rejected_before_hashing() {
        // Arrange - a file in the working directory whose digest matches
        let mut file = tempfile::Builder::new()
            .prefix("libblasctl-cwd-")
            .suffix(std::env::consts::DLL_SUFFIX)
            .tempfile_in(".")
            .unwrap();
        file.write_all(b"not the library the loader would pick")
            .unwrap();
        let bare_name = file.path().file_name().unwrap().to_owned();
        let digest = sha256::digest(&b"not the library the loader would pick"[..]);
        let target = LibraryTarget::openblas(&bare_name).with_checksum(digest);

        // Act
        let result = LibraryHandle::load(&target);

        // Assert
        let Err(LoadError::InvalidPath(message)) = result else {
            panic!("expected InvalidPath for a bare file name with a checksum");
        };
        assert!(message.contains("checksum requires a path"));
    }

    #[test]
    fn test_bare_file_name_without_checksum_goes_to_loader() {
        let result = LibraryHandle::open("libblasctl-not-installed.so");

        assert!(matches!(result, Err(LoadError::LibraryLoad { .. })));
    }

    #[test]
    fn test_checksum_with_relative_path_hashes_the_loaded_file() {
        // Arrange
        let mut file = tempfile::Builder::new()
            .prefix("libblasctl-rel-")
            .suffix(std::env::consts::DLL_SUFFIX)
            .tempfile_in(".")
            .unwrap();
        file.write_all(b"relative payload").unwrap();
        let relative = Path::new(".").join(file.path().file_name().unwrap());
        let digest = sha256::digest(&b"relative payload"[..]);

        // Act
        let target = LibraryTarget::openblas(&relative);
        let matching = LibraryHandle::load(&target.clone().with_checksum(digest));
        let wrong = LibraryHandle::load(&target.with_checksum("0".repeat(64)));

        // Assert - the digest matched, so the loader saw the same text file
        let Err(LoadError::LibraryLoad { path, .. }) = matching else {
            panic!("expected the loader to reject the matching text file");
        };
        assert_eq!(path, relative.display().to_string());
        let Err(LoadError::ChecksumMismatch { actual, .. }) = wrong else {
            panic!("expected a checksum mismatch");
        };
        assert_eq!(actual, sha256::digest(&b"relative payload"[..]));
    }

    #[test]
    fn test_parse_version_accepts_matching_prefix() {
        let version = parse_version("OpenBLAS 0.3.21 DYNAMIC_ARCH NO_AFFINITY Zen", "OpenBLAS");

        assert_eq!(version.unwrap(), "0.3.21");
    }

    #[test]
    fn test_parse_version_rejects_other_prefix() {
        let err = parse_version("SomeOtherLib 1.0", "OpenBLAS").unwrap_err();

        let ProbeError::VersionParseMismatch { expected, found } = err else {
            panic!("expected VersionParseMismatch");
        };
        assert_eq!(expected, "OpenBLAS");
        assert_eq!(found, "SomeOtherLib");
    }

    #[test]
    fn test_parse_version_rejects_prefix_without_version() {
        assert!(parse_version("OpenBLAS", "OpenBLAS").is_err());
        assert!(parse_version("", "OpenBLAS").is_err());
        assert!(parse_version("   ", "OpenBLAS").is_err());
    }

    #[test]
    fn test_probe_version_without_symbol_reports_symbol_missing() {
        let err = probe_version(None, &SymbolNames::openblas(), "OpenBLAS").unwrap_err();

        assert!(matches!(err, ProbeError::SymbolMissing(name) if name == "openblas_get_config"));
    }

    #[test]
    fn test_probe_version_handles_null_and_invalid_utf8() {
        unsafe extern "C" fn null_config() -> *const c_char {
            std::ptr::null()
        }
        unsafe extern "C" fn latin1_config() -> *const c_char {
            c"OpenBLAS 0.3\xff".as_ptr()
        }

        let null = probe_version(Some(null_config), &SymbolNames::openblas(), "OpenBLAS");
        let latin1 = probe_version(Some(latin1_config), &SymbolNames::openblas(), "OpenBLAS");

        assert!(matches!(null, Err(ProbeError::NullConfig)));
        assert!(matches!(latin1, Err(ProbeError::InvalidUtf8)));
    }

    #[cfg(unix)]
    mod handle {
        use std::sync::atomic::{AtomicU32, Ordering};

        use super::*;

        /// A handle over the running process with hand-picked entry points.
        fn test_handle(entry_points: EntryPoints, prefix: &str) -> LibraryHandle {
            let library: Library = libloading::os::unix::Library::this().into();
            LibraryHandle::from_parts(
                "test-lib".to_string(),
                "test-path".to_string(),
                library,
                entry_points,
                &SymbolNames::openblas(),
                prefix,
            )
        }

        #[test]
        fn test_getter_and_setter_round_trip_through_entry_points() {
            // Arrange - test-local static to avoid interference
            static THREADS: AtomicU32 = AtomicU32::new(12);

            unsafe extern "C" fn get() -> c_uint {
                THREADS.load(Ordering::SeqCst)
            }
            unsafe extern "C" fn set(n: c_uint) {
                THREADS.store(n, Ordering::SeqCst);
            }

            let handle = test_handle(
                EntryPoints {
                    get_num_threads: Some(get),
                    set_num_threads: Some(set),
                    get_config: None,
                },
                "OpenBLAS",
            );

            // Act
            let before = handle.get_thread_count();
            handle.set_thread_count(3);

            // Assert
            assert_eq!(before, Some(12));
            assert_eq!(handle.get_thread_count(), Some(3));
            assert!(handle.supports_get());
            assert!(handle.supports_set());
            assert_eq!(handle.name(), "test-lib");
            assert_eq!(handle.path(), "test-path");
        }

        #[test]
        fn test_missing_entry_points_degrade_to_unknown_and_no_op() {
            let handle = test_handle(EntryPoints::default(), "OpenBLAS");

            handle.set_thread_count(4);

            assert_eq!(handle.get_thread_count(), None);
            assert_eq!(handle.get_version(), None);
            assert!(!handle.supports_get());
            assert!(!handle.supports_set());
        }

        #[test]
        fn test_version_is_probed_with_target_prefix() {
            unsafe extern "C" fn config() -> *const c_char {
                c"OpenBLAS 0.3.26 NO_AFFINITY".as_ptr()
            }
            let entry_points = EntryPoints {
                get_config: Some(config),
                ..EntryPoints::default()
            };

            let matching = test_handle(entry_points, "OpenBLAS");
            let foreign = test_handle(entry_points, "MKL");

            assert_eq!(matching.get_version().as_deref(), Some("0.3.26"));
            assert_eq!(foreign.get_version(), None);
        }

        #[test]
        fn test_info_reports_live_thread_count() {
            static THREADS: AtomicU32 = AtomicU32::new(2);

            unsafe extern "C" fn get() -> c_uint {
                THREADS.load(Ordering::SeqCst)
            }

            let handle = test_handle(
                EntryPoints {
                    get_num_threads: Some(get),
                    ..EntryPoints::default()
                },
                "OpenBLAS",
            );

            let first = ThreadControl::info(&handle);
            THREADS.store(9, Ordering::SeqCst);
            let second = ThreadControl::info(&handle);

            assert_eq!(first.num_threads, Some(2));
            assert_eq!(second.num_threads, Some(9));
            assert_eq!(second.name, "test-lib");
        }

        #[test]
        fn test_symbols_absent_from_process_resolve_to_none() {
            let library: Library = libloading::os::unix::Library::this().into();
            let symbols = SymbolNames {
                get_num_threads: "blasctl_test_absent_getter".to_string(),
                set_num_threads: "blasctl_test_absent_setter".to_string(),
                get_config: "blasctl_test_absent_config".to_string(),
            };

            let entry_points = EntryPoints::resolve(&library, &symbols, "self");

            assert!(entry_points.get_num_threads.is_none());
            assert!(entry_points.set_num_threads.is_none());
            assert!(entry_points.get_config.is_none());
        }
    }
}
