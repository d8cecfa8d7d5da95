//! Program artifact loading and symbol binding.
//!
//! A compiled control program is a platform dynamic library exporting a
//! fixed symbol contract. The loader opens it with immediate binding and
//! local visibility, resolves the required symbol set into a struct of
//! bound callables, and records optional debug symbols as absent when the
//! compiler did not emit them. The loader never executes program code;
//! running `config_init`/`glue_vars` is the lifecycle manager's job.

use crate::debug::DebugTarget;
use libloading::os::unix::{Library, RTLD_LOCAL, RTLD_NOW};
use plc_common::consts::{ARTIFACT_PREFIX, ARTIFACT_SUFFIX};
use plc_image::ImageTablePointers;
use std::ffi::{c_char, c_void, CStr};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Program load failures.
#[derive(Debug, Error)]
pub enum LoadError {
    /// No artifact at the given path (or no artifact in the build dir).
    #[error("program artifact not found: {0:?}")]
    NotFound(PathBuf),

    /// The artifact exists but the dynamic loader rejected it.
    #[error("program artifact {path:?} is malformed: {detail}")]
    Malformed { path: PathBuf, detail: String },

    /// A required symbol is not exported.
    #[error("program artifact {path:?}: required symbol `{symbol}` missing")]
    SymbolMissing {
        path: PathBuf,
        symbol: &'static str,
    },
}

/// The bound symbol set.
///
/// Raw function pointers copied out of the library; they stay valid while
/// the owning [`ProgramHandle`] (and therefore the `Library`) is alive.
#[derive(Debug)]
struct ProgramSymbols {
    config_init: unsafe extern "C" fn(),
    config_run: unsafe extern "C" fn(u32),
    glue_vars: unsafe extern "C" fn(),
    update_time: unsafe extern "C" fn(),
    set_buffer_pointers: unsafe extern "C" fn(*const ImageTablePointers),
    /// Address of the program's `uint64_t *common_ticktime_ns` pointer
    /// variable. Reading the period takes two loads: the pointer value
    /// stored in the global, then the u64 it targets. Both are re-read
    /// every cycle so a running program can retarget or rewrite its own
    /// period.
    common_ticktime_ns: *const *const u64,

    // ── Optional debug symbols ──
    set_endianness: Option<unsafe extern "C" fn(u8)>,
    get_var_count: Option<unsafe extern "C" fn() -> u16>,
    get_var_size: Option<unsafe extern "C" fn(u16) -> usize>,
    get_var_addr: Option<unsafe extern "C" fn(u16) -> *mut c_void>,
    set_trace: Option<unsafe extern "C" fn(u16, u8, *const c_void)>,
}

/// A loaded program: the open artifact plus its bound symbol table.
///
/// Dropping the handle unbinds everything and closes the artifact.
#[derive(Debug)]
pub struct ProgramHandle {
    path: PathBuf,
    md5: String,
    symbols: ProgramSymbols,
    _lib: Library,
}

// SAFETY: the symbol table is immutable after binding, and every call
// that touches program memory is serialized by callers through the
// image-table mutex.
unsafe impl Send for ProgramHandle {}
unsafe impl Sync for ProgramHandle {}

impl ProgramHandle {
    /// Open an artifact and bind its symbols.
    ///
    /// Immediate binding (`RTLD_NOW`): unresolved references fail here,
    /// not mid-cycle. Local visibility (`RTLD_LOCAL`): program symbols do
    /// not leak into the process namespace.
    ///
    /// # Errors
    /// [`LoadError`] with the failing path and, for symbol failures, the
    /// first missing required symbol. Optional symbols are recorded as
    /// unbound.
    pub fn open(path: &Path) -> Result<Self, LoadError> {
        if !path.exists() {
            return Err(LoadError::NotFound(path.to_path_buf()));
        }

        let lib =
            unsafe { Library::open(Some(path), RTLD_NOW | RTLD_LOCAL) }.map_err(|e| {
                LoadError::Malformed {
                    path: path.to_path_buf(),
                    detail: e.to_string(),
                }
            })?;

        let missing = |symbol: &'static str| LoadError::SymbolMissing {
            path: path.to_path_buf(),
            symbol,
        };

        // SAFETY: symbol types match the program ABI contract; the raw
        // pointers are only used while `lib` is alive (owned below).
        let symbols = unsafe {
            let config_init = *lib
                .get::<unsafe extern "C" fn()>(b"config_init\0")
                .map_err(|_| missing("config_init"))?;
            let config_run = *lib
                .get::<unsafe extern "C" fn(u32)>(b"config_run\0")
                .map_err(|_| missing("config_run"))?;
            let glue_vars = *lib
                .get::<unsafe extern "C" fn()>(b"glue_vars\0")
                .map_err(|_| missing("glue_vars"))?;
            let update_time = *lib
                .get::<unsafe extern "C" fn()>(b"update_time\0")
                .map_err(|_| missing("update_time"))?;
            let set_buffer_pointers = *lib
                .get::<unsafe extern "C" fn(*const ImageTablePointers)>(
                    b"set_buffer_pointers\0",
                )
                .map_err(|_| missing("set_buffer_pointers"))?;

            // Data symbol, itself a pointer variable: the Symbol deref
            // only relabels the dlsym address, so what is kept here is
            // the address of the program's `uint64_t *` global, not yet
            // the period storage it points at.
            let ticktime_sym = lib
                .get::<*mut *mut u64>(b"common_ticktime_ns\0")
                .map_err(|_| missing("common_ticktime_ns"))?;
            let common_ticktime_ns = *ticktime_sym as *const *const u64;

            ProgramSymbols {
                config_init,
                config_run,
                glue_vars,
                update_time,
                set_buffer_pointers,
                common_ticktime_ns,
                set_endianness: lib
                    .get::<unsafe extern "C" fn(u8)>(b"set_endianness\0")
                    .ok()
                    .map(|s| *s),
                get_var_count: lib
                    .get::<unsafe extern "C" fn() -> u16>(b"get_var_count\0")
                    .ok()
                    .map(|s| *s),
                get_var_size: lib
                    .get::<unsafe extern "C" fn(u16) -> usize>(b"get_var_size\0")
                    .ok()
                    .map(|s| *s),
                get_var_addr: lib
                    .get::<unsafe extern "C" fn(u16) -> *mut c_void>(b"get_var_addr\0")
                    .ok()
                    .map(|s| *s),
                set_trace: lib
                    .get::<unsafe extern "C" fn(u16, u8, *const c_void)>(b"set_trace\0")
                    .ok()
                    .map(|s| *s),
            }
        };

        // `program_md5` is a NUL-terminated char array; the symbol address
        // is the first character.
        // SAFETY: contract above; the bytes are copied out immediately.
        let md5 = unsafe {
            let md5_sym = lib
                .get::<*const c_char>(b"program_md5\0")
                .map_err(|_| missing("program_md5"))?;
            CStr::from_ptr(*md5_sym).to_string_lossy().into_owned()
        };

        Ok(Self {
            path: path.to_path_buf(),
            md5,
            symbols,
            _lib: lib,
        })
    }

    /// Path the artifact was loaded from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// ASCII MD5 of the compiled program.
    pub fn md5(&self) -> &str {
        &self.md5
    }

    /// Current program period [ns], re-read on every call.
    ///
    /// The ABI symbol is a pointer variable, so two loads happen here:
    /// the pointer value out of the global, then the period it targets.
    /// Returns 0 (caller substitutes the default period) while the
    /// program has not pointed the global at its storage yet. The value
    /// is nanoseconds throughout; conversions happen only at reporting
    /// edges.
    pub fn ticktime_ns(&self) -> u64 {
        // SAFETY: the global lives in the library image owned by this
        // handle; both loads are volatile because `config_run` may
        // retarget the pointer or rewrite the period.
        unsafe {
            let period = self.symbols.common_ticktime_ns.read_volatile();
            if period.is_null() {
                0
            } else {
                period.read_volatile()
            }
        }
    }

    /// Install the image-table base addresses into the program.
    pub fn set_buffer_pointers(&self, pointers: &ImageTablePointers) {
        // SAFETY: ABI contract; the program copies the record.
        unsafe { (self.symbols.set_buffer_pointers)(pointers) }
    }

    /// Run the program's one-time initialization.
    pub fn config_init(&self) {
        // SAFETY: ABI contract; caller serializes via the lifecycle.
        unsafe { (self.symbols.config_init)() }
    }

    /// Let the program write its variable addresses into the tables.
    ///
    /// Callers must hold the image-table mutex.
    pub fn glue_vars(&self) {
        // SAFETY: ABI contract; caller holds the image mutex.
        unsafe { (self.symbols.glue_vars)() }
    }

    /// Execute one program scan.
    ///
    /// Callers must hold the image-table mutex.
    pub fn config_run(&self, tick: u32) {
        // SAFETY: ABI contract; caller holds the image mutex.
        unsafe { (self.symbols.config_run)(tick) }
    }

    /// Advance the program's internal timers.
    ///
    /// Callers must hold the image-table mutex.
    pub fn update_time(&self) {
        // SAFETY: ABI contract; caller holds the image mutex.
        unsafe { (self.symbols.update_time)() }
    }
}

impl DebugTarget for ProgramHandle {
    fn variable_count(&self) -> Option<u16> {
        // SAFETY: ABI contract.
        self.symbols.get_var_count.map(|f| unsafe { f() })
    }

    fn variable_size(&self, idx: u16) -> Option<usize> {
        // SAFETY: ABI contract.
        self.symbols.get_var_size.map(|f| unsafe { f(idx) })
    }

    fn copy_value(&self, idx: u16, out: &mut [u8]) -> Option<usize> {
        let size = self.variable_size(idx)?;
        let addr = self.symbols.get_var_addr.map(|f| unsafe { f(idx) })?;
        if addr.is_null() || size > out.len() {
            return None;
        }
        // SAFETY: the program reports `size` valid bytes at `addr`; the
        // caller holds the image mutex, so no scan is mutating them.
        unsafe {
            std::ptr::copy_nonoverlapping(addr.cast::<u8>(), out.as_mut_ptr(), size);
        }
        Some(size)
    }

    fn set_trace(&self, idx: u16, force: bool, value: &[u8]) -> bool {
        let Some(f) = self.symbols.set_trace else {
            return false;
        };
        let ptr = if value.is_empty() {
            std::ptr::null()
        } else {
            value.as_ptr().cast::<c_void>()
        };
        // SAFETY: ABI contract; the program copies the forced value.
        unsafe { f(idx, force as u8, ptr) };
        true
    }

    fn set_endianness(&self, reversed: bool) {
        if let Some(f) = self.symbols.set_endianness {
            // SAFETY: ABI contract.
            unsafe { f(reversed as u8) };
        }
    }

    fn md5(&self) -> &str {
        &self.md5
    }
}

/// Pick the newest artifact in `dir`.
///
/// Matches `libplc_*.so`. The compile step stamps a nanosecond timestamp
/// into new artifact names, so the lexicographically greatest name is the
/// newest.
///
/// # Errors
/// [`LoadError::NotFound`] when the directory has no matching artifact.
pub fn discover_latest(dir: &Path) -> Result<PathBuf, LoadError> {
    let entries = fs::read_dir(dir).map_err(|_| LoadError::NotFound(dir.to_path_buf()))?;

    let mut best: Option<PathBuf> = None;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !name.starts_with(ARTIFACT_PREFIX) || !name.ends_with(ARTIFACT_SUFFIX) {
            continue;
        }
        let path = entry.path();
        match &best {
            Some(b) if b.file_name() >= path.file_name() => {}
            _ => best = Some(path),
        }
    }

    best.ok_or_else(|| LoadError::NotFound(dir.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn discover_picks_lexicographically_newest() {
        let tmp = TempDir::new().unwrap();
        File::create(tmp.path().join("libplc_1111.so")).unwrap();
        File::create(tmp.path().join("libplc_2222.so")).unwrap();
        File::create(tmp.path().join("libplc_0999.so")).unwrap();

        let latest = discover_latest(tmp.path()).unwrap();
        assert_eq!(latest.file_name().unwrap(), "libplc_2222.so");
    }

    #[test]
    fn discover_ignores_non_artifacts() {
        let tmp = TempDir::new().unwrap();
        File::create(tmp.path().join("libplc_1.txt")).unwrap();
        File::create(tmp.path().join("zzz_other.so")).unwrap();

        let err = discover_latest(tmp.path()).unwrap_err();
        assert!(matches!(err, LoadError::NotFound(_)));
    }

    #[test]
    fn discover_missing_dir_is_not_found() {
        let err = discover_latest(Path::new("/nonexistent/build")).unwrap_err();
        assert!(matches!(err, LoadError::NotFound(_)));
    }

    #[test]
    fn open_missing_artifact_is_not_found() {
        let err = ProgramHandle::open(Path::new("/nonexistent/libplc_x.so")).unwrap_err();
        assert!(matches!(err, LoadError::NotFound(_)));
    }

    #[test]
    fn open_garbage_artifact_is_malformed() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("libplc_bad.so");
        let mut f = File::create(&path).unwrap();
        f.write_all(b"definitely not an ELF shared object").unwrap();

        let err = ProgramHandle::open(&path).unwrap_err();
        assert!(matches!(err, LoadError::Malformed { .. }));
    }

    // The fixture artifacts are compiled by build.rs from
    // tests/fixtures/*.c and bound here exactly the way production binds
    // a compiler-produced program.

    fn fixture(name: &str) -> std::path::PathBuf {
        Path::new(env!("OUT_DIR")).join(name)
    }

    /// One sequential pass over the full fixture: the program globals are
    /// process-wide, so everything that mutates them lives in this single
    /// test.
    #[test]
    fn binds_real_artifact() {
        use plc_image::SharedImage;

        let handle = ProgramHandle::open(&fixture("libplc_fixture.so")).unwrap();

        // The period symbol is a pointer variable; a handle that kept the
        // global's own address here would return that address's bytes,
        // not 10 ms.
        assert_eq!(handle.ticktime_ns(), 10_000_000);
        assert_eq!(handle.md5(), "abcdef1234567890123456789012345678");

        // Bind against real image tables.
        let image = SharedImage::new().unwrap();
        {
            let mut guard = image.lock();
            handle.set_buffer_pointers(&image.table_pointers());
            handle.config_init();
            handle.glue_vars();

            // glue_vars bound exactly two slots into program memory.
            let filled = guard.fill_null_with_scratch();
            assert_eq!(filled, plc_image::ImageTables::SLOT_COUNT - 2);
            assert!(!guard.tables().int_out[0].is_null());
            assert!(!guard.tables().byte_in[0].is_null());

            // Two scans tick the program's counter variable, observable
            // through the glued output slot.
            handle.config_run(0);
            handle.config_run(1);
            handle.update_time();
            let counter = guard.tables().int_out[0];
            // SAFETY: slot glued to the program's counter variable above.
            unsafe { assert_eq!(*counter, 2) };
        }

        // Debug surface.
        assert_eq!(handle.variable_count(), Some(2));
        assert_eq!(handle.variable_size(0), Some(2));
        assert_eq!(handle.variable_size(1), Some(1));

        let mut out = [0u8; 2];
        assert_eq!(handle.copy_value(0, &mut out), Some(2));
        assert_eq!(u16::from_ne_bytes(out), 2);

        assert!(handle.set_trace(0, true, &out));
        handle.set_endianness(true);
    }

    #[test]
    fn minimal_artifact_has_no_debug_surface() {
        let handle = ProgramHandle::open(&fixture("libplc_min.so")).unwrap();

        assert_eq!(handle.ticktime_ns(), 50_000_000);
        assert_eq!(handle.md5(), "00000000000000000000000000000000");

        // Optional symbols are recorded as unbound, not errors.
        assert_eq!(handle.variable_count(), None);
        assert_eq!(handle.variable_size(0), None);
        let mut out = [0u8; 8];
        assert_eq!(handle.copy_value(0, &mut out), None);
        assert!(!handle.set_trace(0, true, &[]));
        handle.set_endianness(false); // no-op when unbound
    }
}
