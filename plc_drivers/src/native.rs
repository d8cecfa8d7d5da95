//! Native plugins: dynamic libraries with C entry points.
//!
//! `init` is the only mandatory entry point; the rest are recorded as
//! absent when the library does not export them. `cycle_start` and
//! `cycle_end` are invoked from the scan thread while the image-table
//! mutex is held, so they must stay short and allocation-free.

use crate::args::PluginRuntimeArgs;
use crate::error::PluginError;
use libloading::os::unix::{Library, RTLD_LOCAL, RTLD_NOW};
use std::path::Path;

/// `init(args) -> 0` on success.
pub type InitFn = unsafe extern "C" fn(*mut PluginRuntimeArgs) -> libc::c_int;
/// `start`/`stop`/`cleanup` return 0 on success.
pub type LifecycleFn = unsafe extern "C" fn() -> libc::c_int;
/// Per-cycle hooks; no status, failures are the plugin's to log.
pub type CycleFn = unsafe extern "C" fn();

/// A loaded native plugin.
///
/// The bound function pointers stay valid while `_lib` is alive, which is
/// the lifetime of this struct.
#[derive(Debug)]
pub struct NativePlugin {
    init: InitFn,
    pub start: Option<LifecycleFn>,
    pub stop: Option<LifecycleFn>,
    pub cycle_start: Option<CycleFn>,
    pub cycle_end: Option<CycleFn>,
    pub cleanup: Option<LifecycleFn>,
    _lib: Library,
}

impl NativePlugin {
    /// Open the plugin library and bind its entry points.
    ///
    /// Immediate binding (`RTLD_NOW`) with local visibility
    /// (`RTLD_LOCAL`), so a plugin with unresolved references fails here
    /// rather than mid-cycle, and plugin symbols cannot shadow each other.
    ///
    /// # Errors
    /// [`PluginError::Load`] when the library cannot be opened,
    /// [`PluginError::SymbolMissing`] when `init` is not exported.
    pub fn load(name: &str, path: &Path) -> Result<Self, PluginError> {
        let lib = unsafe { Library::open(Some(path), RTLD_NOW | RTLD_LOCAL) }.map_err(|e| {
            PluginError::Load {
                name: name.to_string(),
                path: path.to_path_buf(),
                reason: e.to_string(),
            }
        })?;

        let init: InitFn = unsafe {
            lib.get::<InitFn>(b"init\0")
                .map(|s| *s)
                .map_err(|_| PluginError::SymbolMissing {
                    name: name.to_string(),
                    symbol: "init",
                })?
        };

        let start = unsafe { lib.get::<LifecycleFn>(b"start\0").ok().map(|s| *s) };
        let stop = unsafe { lib.get::<LifecycleFn>(b"stop\0").ok().map(|s| *s) };
        let cycle_start = unsafe { lib.get::<CycleFn>(b"cycle_start\0").ok().map(|s| *s) };
        let cycle_end = unsafe { lib.get::<CycleFn>(b"cycle_end\0").ok().map(|s| *s) };
        let cleanup = unsafe { lib.get::<LifecycleFn>(b"cleanup\0").ok().map(|s| *s) };

        Ok(Self {
            init,
            start,
            stop,
            cycle_start,
            cycle_end,
            cleanup,
            _lib: lib,
        })
    }

    /// Invoke the mandatory `init` entry point.
    ///
    /// # Safety
    /// `args` must point at a live [`PluginRuntimeArgs`] block that
    /// outlives the plugin instance.
    pub unsafe fn init(&self, args: *mut PluginRuntimeArgs) -> libc::c_int {
        (self.init)(args)
    }
}
