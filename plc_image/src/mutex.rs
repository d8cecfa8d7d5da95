//! Priority-inheriting pthread mutex.
//!
//! The image-table mutex crosses the C ABI: native plugins receive its raw
//! address plus `extern "C"` lock/unlock entry points, so it must be a
//! `pthread_mutex_t` rather than a Rust-native lock. The mutex is created
//! with `PTHREAD_PRIO_INHERIT`: when the SCHED_FIFO scan thread blocks on
//! it, the holding plugin thread temporarily inherits the scan thread's
//! priority. Without that protocol a low-priority plugin can invert
//! priority under the scan cycle and miss deadlines.

use std::cell::UnsafeCell;
use std::io;

/// A heap-pinned `pthread_mutex_t` with the priority-inheritance protocol.
pub struct PiMutex {
    inner: Box<UnsafeCell<libc::pthread_mutex_t>>,
}

// SAFETY: pthread mutexes are made for cross-thread use; the cell is only
// handed to pthread_mutex_* functions.
unsafe impl Send for PiMutex {}
unsafe impl Sync for PiMutex {}

impl PiMutex {
    /// Create and initialize the mutex.
    ///
    /// # Errors
    /// Returns the OS error if attribute or mutex initialization fails.
    pub fn new() -> io::Result<Self> {
        let inner = Box::new(UnsafeCell::new(unsafe {
            std::mem::zeroed::<libc::pthread_mutex_t>()
        }));

        unsafe {
            let mut attr = std::mem::zeroed::<libc::pthread_mutexattr_t>();
            let rc = libc::pthread_mutexattr_init(&mut attr);
            if rc != 0 {
                return Err(io::Error::from_raw_os_error(rc));
            }

            #[cfg(target_os = "linux")]
            {
                let rc = libc::pthread_mutexattr_setprotocol(
                    &mut attr,
                    libc::PTHREAD_PRIO_INHERIT,
                );
                if rc != 0 {
                    libc::pthread_mutexattr_destroy(&mut attr);
                    return Err(io::Error::from_raw_os_error(rc));
                }
            }

            let rc = libc::pthread_mutex_init(inner.get(), &attr);
            libc::pthread_mutexattr_destroy(&mut attr);
            if rc != 0 {
                return Err(io::Error::from_raw_os_error(rc));
            }
        }

        Ok(Self { inner })
    }

    /// Block until the mutex is held.
    pub fn lock(&self) -> PiMutexGuard<'_> {
        let rc = unsafe { libc::pthread_mutex_lock(self.inner.get()) };
        if rc != 0 {
            // An EDEADLK/EINVAL here means the lock discipline is broken;
            // there is no recovery story, matching pthread semantics.
            panic!(
                "pthread_mutex_lock failed: {}",
                io::Error::from_raw_os_error(rc)
            );
        }
        PiMutexGuard { mutex: self }
    }

    /// Raw handle handed to plugins together with
    /// [`image_mutex_lock`] / [`image_mutex_unlock`].
    ///
    /// The address is stable for the lifetime of the `PiMutex` (the
    /// `pthread_mutex_t` is boxed).
    pub fn raw(&self) -> *mut libc::pthread_mutex_t {
        self.inner.get()
    }
}

impl Drop for PiMutex {
    fn drop(&mut self) {
        unsafe {
            libc::pthread_mutex_destroy(self.inner.get());
        }
    }
}

/// RAII guard; unlocks on drop.
pub struct PiMutexGuard<'a> {
    mutex: &'a PiMutex,
}

impl Drop for PiMutexGuard<'_> {
    fn drop(&mut self) {
        unsafe {
            libc::pthread_mutex_unlock(self.mutex.inner.get());
        }
    }
}

/// Lock entry point exported across the plugin ABI.
///
/// # Safety
/// `mutex` must be the handle obtained from [`PiMutex::raw`] and the
/// owning `PiMutex` must still be alive.
pub unsafe extern "C" fn image_mutex_lock(mutex: *mut libc::pthread_mutex_t) -> libc::c_int {
    libc::pthread_mutex_lock(mutex)
}

/// Unlock entry point exported across the plugin ABI.
///
/// # Safety
/// Same contract as [`image_mutex_lock`]; the calling thread must hold the
/// mutex.
pub unsafe extern "C" fn image_mutex_unlock(mutex: *mut libc::pthread_mutex_t) -> libc::c_int {
    libc::pthread_mutex_unlock(mutex)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn lock_unlock_single_thread() {
        let m = PiMutex::new().unwrap();
        drop(m.lock());
        drop(m.lock());
    }

    #[test]
    fn excludes_across_threads() {
        let m = Arc::new(PiMutex::new().unwrap());
        let counter = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let m = Arc::clone(&m);
            let counter = Arc::clone(&counter);
            handles.push(std::thread::spawn(move || {
                for _ in 0..1000 {
                    let _g = m.lock();
                    let v = counter.load(Ordering::Relaxed);
                    counter.store(v + 1, Ordering::Relaxed);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(counter.load(Ordering::Relaxed), 4000);
    }

    #[test]
    fn c_trampolines_match_guard() {
        let m = PiMutex::new().unwrap();
        unsafe {
            assert_eq!(image_mutex_lock(m.raw()), 0);
            assert_eq!(image_mutex_unlock(m.raw()), 0);
        }
    }
}
