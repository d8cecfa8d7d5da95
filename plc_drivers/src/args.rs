//! The runtime-arguments record handed to every plugin at `init`.
//!
//! The record crosses the C ABI (and, wrapped in a capsule, the Python
//! ABI), so its layout is frozen: `#[repr(C)]`, the field order below, and
//! pointer-width integers only where documented. The host owns one block
//! per plugin instance; the pointer stays valid until the instance is
//! destroyed.

use plc_common::consts::{BOOL_BITS, IMAGE_TABLE_SIZE};
use plc_image::{image_mutex_lock, image_mutex_unlock, ImageTablePointers, SharedImage};
use std::ffi::{CStr, CString};
use std::path::Path;
use tracing::{debug, error, info, warn};

/// Stable plugin ABI record.
///
/// Field order is part of the contract:
/// thirteen image-table base pointers, the image mutex with its lock and
/// unlock entry points, the table capacity constants, the per-plugin
/// config path, and four leveled log entry points.
#[repr(C)]
pub struct PluginRuntimeArgs {
    pub bool_in: *mut [*mut u8; BOOL_BITS],
    pub bool_out: *mut [*mut u8; BOOL_BITS],
    pub byte_in: *mut *mut u8,
    pub byte_out: *mut *mut u8,
    pub int_in: *mut *mut u16,
    pub int_out: *mut *mut u16,
    pub dint_in: *mut *mut u32,
    pub dint_out: *mut *mut u32,
    pub lint_in: *mut *mut u64,
    pub lint_out: *mut *mut u64,
    pub int_mem: *mut *mut u16,
    pub dint_mem: *mut *mut u32,
    pub lint_mem: *mut *mut u64,

    pub mutex: *mut libc::pthread_mutex_t,
    pub lock: unsafe extern "C" fn(*mut libc::pthread_mutex_t) -> libc::c_int,
    pub unlock: unsafe extern "C" fn(*mut libc::pthread_mutex_t) -> libc::c_int,

    /// Slots per table (1024).
    pub table_size: u32,
    /// Bits per Boolean slot (8).
    pub bool_bits: u32,

    /// NUL-terminated path of the per-plugin configuration file.
    pub config_path: *const libc::c_char,

    pub log_error: unsafe extern "C" fn(*const libc::c_char),
    pub log_warn: unsafe extern "C" fn(*const libc::c_char),
    pub log_info: unsafe extern "C" fn(*const libc::c_char),
    pub log_debug: unsafe extern "C" fn(*const libc::c_char),
}

#[cfg(target_pointer_width = "64")]
static_assertions::const_assert_eq!(std::mem::size_of::<PluginRuntimeArgs>(), 176);
static_assertions::const_assert_eq!(std::mem::align_of::<PluginRuntimeArgs>(), 8);

/// Owns a [`PluginRuntimeArgs`] and the storage its pointers reference.
pub struct ArgsBlock {
    args: PluginRuntimeArgs,
    /// Referenced by `args.config_path`; the CString's heap buffer is
    /// stable regardless of where the block itself moves.
    _config_path: CString,
}

// SAFETY: the embedded pointers reference process-lifetime storage (the
// shared image tables) or storage owned by this block; the record itself
// is immutable after construction.
unsafe impl Send for ArgsBlock {}
unsafe impl Sync for ArgsBlock {}

impl ArgsBlock {
    /// Build the record for one plugin.
    pub fn new(image: &SharedImage, config_path: &Path) -> Box<Self> {
        let config_path = CString::new(config_path.to_string_lossy().as_bytes())
            .unwrap_or_else(|_| CString::from(c""));
        let p: ImageTablePointers = image.table_pointers();

        Box::new(Self {
            args: PluginRuntimeArgs {
                bool_in: p.bool_in,
                bool_out: p.bool_out,
                byte_in: p.byte_in,
                byte_out: p.byte_out,
                int_in: p.int_in,
                int_out: p.int_out,
                dint_in: p.dint_in,
                dint_out: p.dint_out,
                lint_in: p.lint_in,
                lint_out: p.lint_out,
                int_mem: p.int_mem,
                dint_mem: p.dint_mem,
                lint_mem: p.lint_mem,
                mutex: image.raw_mutex(),
                lock: image_mutex_lock,
                unlock: image_mutex_unlock,
                table_size: IMAGE_TABLE_SIZE as u32,
                bool_bits: BOOL_BITS as u32,
                config_path: config_path.as_ptr(),
                log_error: plugin_log_error,
                log_warn: plugin_log_warn,
                log_info: plugin_log_info,
                log_debug: plugin_log_debug,
            },
            _config_path: config_path,
        })
    }

    /// Raw pointer handed to the plugin's `init`.
    ///
    /// Valid as long as this block is alive.
    pub fn as_ptr(&mut self) -> *mut PluginRuntimeArgs {
        &mut self.args
    }
}

// ─── Plugin log entry points ────────────────────────────────────────

unsafe fn plugin_message(msg: *const libc::c_char) -> Option<String> {
    if msg.is_null() {
        return None;
    }
    Some(CStr::from_ptr(msg).to_string_lossy().into_owned())
}

/// ERROR-level log entry point for plugins.
///
/// # Safety
/// `msg` must be NULL or a valid NUL-terminated string.
pub unsafe extern "C" fn plugin_log_error(msg: *const libc::c_char) {
    if let Some(m) = plugin_message(msg) {
        error!(target: "plugin", "{m}");
    }
}

/// WARN-level log entry point for plugins.
///
/// # Safety
/// Same contract as [`plugin_log_error`].
pub unsafe extern "C" fn plugin_log_warn(msg: *const libc::c_char) {
    if let Some(m) = plugin_message(msg) {
        warn!(target: "plugin", "{m}");
    }
}

/// INFO-level log entry point for plugins.
///
/// # Safety
/// Same contract as [`plugin_log_error`].
pub unsafe extern "C" fn plugin_log_info(msg: *const libc::c_char) {
    if let Some(m) = plugin_message(msg) {
        info!(target: "plugin", "{m}");
    }
}

/// DEBUG-level log entry point for plugins.
///
/// # Safety
/// Same contract as [`plugin_log_error`].
pub unsafe extern "C" fn plugin_log_debug(msg: *const libc::c_char) {
    if let Some(m) = plugin_message(msg) {
        debug!(target: "plugin", "{m}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_block_wires_all_pointers() {
        let image = SharedImage::new().unwrap();
        let mut block = ArgsBlock::new(&image, Path::new("./modbus.conf"));
        let args = unsafe { &*block.as_ptr() };

        assert!(!args.bool_in.is_null());
        assert!(!args.lint_mem.is_null());
        assert_eq!(args.mutex, image.raw_mutex());
        assert_eq!(args.table_size, IMAGE_TABLE_SIZE as u32);
        assert_eq!(args.bool_bits, BOOL_BITS as u32);

        let path = unsafe { CStr::from_ptr(args.config_path) };
        assert_eq!(path.to_str().unwrap(), "./modbus.conf");
    }

    #[test]
    fn exported_lock_functions_work_through_args() {
        let image = SharedImage::new().unwrap();
        let mut block = ArgsBlock::new(&image, Path::new("./x.conf"));
        let args = unsafe { &*block.as_ptr() };
        unsafe {
            assert_eq!((args.lock)(args.mutex), 0);
            assert_eq!((args.unlock)(args.mutex), 0);
        }
    }

    #[test]
    fn log_entry_points_tolerate_null() {
        unsafe {
            plugin_log_error(std::ptr::null());
            plugin_log_info(std::ptr::null());
        }
    }
}
