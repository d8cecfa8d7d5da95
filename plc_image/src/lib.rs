//! I/O image tables and their locking protocol.
//!
//! The image tables are the shared memory the control program and the
//! plugin drivers exchange: fixed-capacity arrays of *pointers* into
//! program-owned storage, one table per IEC data width. The tables are an
//! owned value behind [`SharedImage`], never process-global state; plugins
//! receive the thirteen base addresses plus the raw handle of the
//! priority-inheriting mutex that guards every access.
//!
//! # Locking discipline
//!
//! - The scan thread holds the mutex around the plugin cycle hooks and the
//!   program tick.
//! - Plugin threads hold it for bounded bursts when they touch any slot.
//! - Critical sections must stay short; there is no timeout on
//!   acquisition.

mod mutex;
mod tables;

pub use mutex::{image_mutex_lock, image_mutex_unlock, PiMutex, PiMutexGuard};
pub use tables::{ImageGuard, ImageTablePointers, ImageTables, ScratchPool, SharedImage};
