//! Image tables, scratch pool and the shared owning wrapper.
//!
//! Every table holds `IMAGE_TABLE_SIZE` slots of *pointers* into
//! program-owned memory. The control program allocates the storage and its
//! `glue_vars` routine writes variable addresses into these slots; plugins
//! observe and mutate the pointed-to cells. A slot is either bound to
//! program memory, bound to a process-local scratch cell, or NULL — and it
//! is only NULL between an unload and the next scratch fill, while the
//! mutex is held.

use crate::mutex::{PiMutex, PiMutexGuard};
use plc_common::consts::{BOOL_BITS, IMAGE_TABLE_SIZE};
use std::cell::UnsafeCell;
use std::io;
use std::ptr;

/// Pointer tables for all thirteen IEC slices.
///
/// `#[repr(C)]`: the base addresses are handed across the C ABI to the
/// program (`set_buffer_pointers`) and to native plugins.
#[repr(C)]
pub struct ImageTables {
    pub bool_in: [[*mut u8; BOOL_BITS]; IMAGE_TABLE_SIZE],
    pub bool_out: [[*mut u8; BOOL_BITS]; IMAGE_TABLE_SIZE],
    pub byte_in: [*mut u8; IMAGE_TABLE_SIZE],
    pub byte_out: [*mut u8; IMAGE_TABLE_SIZE],
    pub int_in: [*mut u16; IMAGE_TABLE_SIZE],
    pub int_out: [*mut u16; IMAGE_TABLE_SIZE],
    pub dint_in: [*mut u32; IMAGE_TABLE_SIZE],
    pub dint_out: [*mut u32; IMAGE_TABLE_SIZE],
    pub lint_in: [*mut u64; IMAGE_TABLE_SIZE],
    pub lint_out: [*mut u64; IMAGE_TABLE_SIZE],
    pub int_mem: [*mut u16; IMAGE_TABLE_SIZE],
    pub dint_mem: [*mut u32; IMAGE_TABLE_SIZE],
    pub lint_mem: [*mut u64; IMAGE_TABLE_SIZE],
}

impl ImageTables {
    /// Total slot count across all tables.
    pub const SLOT_COUNT: usize =
        2 * IMAGE_TABLE_SIZE * BOOL_BITS + 11 * IMAGE_TABLE_SIZE;

    fn zeroed() -> Self {
        // SAFETY: all fields are raw pointers; the all-zeros pattern is NULL.
        unsafe { std::mem::zeroed() }
    }
}

/// Zero-initialized fallback cells, one per image slot.
///
/// Installed into NULL slots so concurrent plugin reads/writes can never
/// fault. The pool lives inside [`SharedImage`] and therefore outlives
/// every pointer handed to a plugin.
#[repr(C)]
pub struct ScratchPool {
    bool_in: [[u8; BOOL_BITS]; IMAGE_TABLE_SIZE],
    bool_out: [[u8; BOOL_BITS]; IMAGE_TABLE_SIZE],
    byte_in: [u8; IMAGE_TABLE_SIZE],
    byte_out: [u8; IMAGE_TABLE_SIZE],
    int_in: [u16; IMAGE_TABLE_SIZE],
    int_out: [u16; IMAGE_TABLE_SIZE],
    dint_in: [u32; IMAGE_TABLE_SIZE],
    dint_out: [u32; IMAGE_TABLE_SIZE],
    lint_in: [u64; IMAGE_TABLE_SIZE],
    lint_out: [u64; IMAGE_TABLE_SIZE],
    int_mem: [u16; IMAGE_TABLE_SIZE],
    dint_mem: [u32; IMAGE_TABLE_SIZE],
    lint_mem: [u64; IMAGE_TABLE_SIZE],
}

impl ScratchPool {
    fn zeroed() -> Self {
        // SAFETY: all fields are integers; all-zeros is valid.
        unsafe { std::mem::zeroed() }
    }
}

/// The thirteen base addresses, in documented field order.
///
/// `#[repr(C)]`: this is the record passed to the program's
/// `set_buffer_pointers` and embedded in the plugin runtime arguments.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct ImageTablePointers {
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
}

static_assertions::const_assert_eq!(
    std::mem::size_of::<ImageTablePointers>(),
    13 * std::mem::size_of::<usize>()
);

/// The owned image tables plus their priority-inheriting mutex.
///
/// One instance per process, shared as `Arc<SharedImage>` between the
/// lifecycle manager, the scan engine and the plugin host. The tables are
/// conceptually a singleton because the program ABI has a single buffer
/// contract, but they are modeled as an owned value, not a global.
pub struct SharedImage {
    mutex: PiMutex,
    tables: UnsafeCell<ImageTables>,
    scratch: UnsafeCell<ScratchPool>,
}

// SAFETY: `tables` and `scratch` are only dereferenced while holding
// `mutex` (see ImageGuard); base-address computation does not read cells.
unsafe impl Send for SharedImage {}
unsafe impl Sync for SharedImage {}

impl SharedImage {
    /// Create the tables (all slots NULL) and the PI mutex.
    ///
    /// # Errors
    /// Fails only if the mutex cannot be initialized.
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            mutex: PiMutex::new()?,
            tables: UnsafeCell::new(ImageTables::zeroed()),
            scratch: UnsafeCell::new(ScratchPool::zeroed()),
        })
    }

    /// Acquire the image-table mutex.
    pub fn lock(&self) -> ImageGuard<'_> {
        ImageGuard {
            shared: self,
            _held: self.mutex.lock(),
        }
    }

    /// Raw mutex handle for the plugin ABI.
    pub fn raw_mutex(&self) -> *mut libc::pthread_mutex_t {
        self.mutex.raw()
    }

    /// The thirteen base addresses.
    ///
    /// Addresses are stable for the lifetime of the `SharedImage`; no lock
    /// is needed because no slot content is read.
    pub fn table_pointers(&self) -> ImageTablePointers {
        let t = self.tables.get();
        // SAFETY: only raw addresses of the arrays are taken.
        unsafe {
            ImageTablePointers {
                bool_in: ptr::addr_of_mut!((*t).bool_in).cast(),
                bool_out: ptr::addr_of_mut!((*t).bool_out).cast(),
                byte_in: ptr::addr_of_mut!((*t).byte_in).cast(),
                byte_out: ptr::addr_of_mut!((*t).byte_out).cast(),
                int_in: ptr::addr_of_mut!((*t).int_in).cast(),
                int_out: ptr::addr_of_mut!((*t).int_out).cast(),
                dint_in: ptr::addr_of_mut!((*t).dint_in).cast(),
                dint_out: ptr::addr_of_mut!((*t).dint_out).cast(),
                lint_in: ptr::addr_of_mut!((*t).lint_in).cast(),
                lint_out: ptr::addr_of_mut!((*t).lint_out).cast(),
                int_mem: ptr::addr_of_mut!((*t).int_mem).cast(),
                dint_mem: ptr::addr_of_mut!((*t).dint_mem).cast(),
                lint_mem: ptr::addr_of_mut!((*t).lint_mem).cast(),
            }
        }
    }
}

/// Exclusive access to the tables while the PI mutex is held.
pub struct ImageGuard<'a> {
    shared: &'a SharedImage,
    _held: PiMutexGuard<'a>,
}

impl ImageGuard<'_> {
    /// Set every slot in every table to NULL.
    ///
    /// Used immediately after an unload, before the next load binds fresh
    /// addresses. Callers must re-fill with scratch before releasing the
    /// tables back to plugins.
    pub fn clear(&mut self) {
        // SAFETY: exclusive access via the held mutex.
        unsafe {
            *self.shared.tables.get() = ImageTables::zeroed();
        }
    }

    /// Install a scratch cell into every NULL slot.
    ///
    /// Idempotent: a second call right after a first fills zero slots.
    /// Returns the number of slots filled.
    pub fn fill_null_with_scratch(&mut self) -> usize {
        // SAFETY: exclusive access via the held mutex; scratch cells live
        // as long as the SharedImage and therefore outlive every consumer.
        let t = unsafe { &mut *self.shared.tables.get() };
        let s = unsafe { &mut *self.shared.scratch.get() };
        let mut filled = 0usize;

        for i in 0..IMAGE_TABLE_SIZE {
            for b in 0..BOOL_BITS {
                if t.bool_in[i][b].is_null() {
                    t.bool_in[i][b] = &mut s.bool_in[i][b];
                    filled += 1;
                }
                if t.bool_out[i][b].is_null() {
                    t.bool_out[i][b] = &mut s.bool_out[i][b];
                    filled += 1;
                }
            }
        }

        macro_rules! fill_table {
            ($table:ident) => {
                for i in 0..IMAGE_TABLE_SIZE {
                    if t.$table[i].is_null() {
                        t.$table[i] = &mut s.$table[i];
                        filled += 1;
                    }
                }
            };
        }

        fill_table!(byte_in);
        fill_table!(byte_out);
        fill_table!(int_in);
        fill_table!(int_out);
        fill_table!(dint_in);
        fill_table!(dint_out);
        fill_table!(lint_in);
        fill_table!(lint_out);
        fill_table!(int_mem);
        fill_table!(dint_mem);
        fill_table!(lint_mem);

        filled
    }

    /// Direct table access for binding checks.
    pub fn tables(&mut self) -> &mut ImageTables {
        // SAFETY: exclusive access via the held mutex.
        unsafe { &mut *self.shared.tables.get() }
    }
}
