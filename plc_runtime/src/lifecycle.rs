//! The authoritative lifecycle state machine.
//!
//! Binds the program loader, the scan engine and the plugin host into
//! coherent start/stop transitions:
//!
//! ```text
//!                     set(RUNNING)                 set(STOPPED)
//!  EMPTY ─────────── INIT ──────► RUNNING ───────────────────► STOPPED
//!    ▲                │             │                              │
//!    │                │             │ load failure                 │ set(RUNNING)
//!    └──────────── ERROR ◄──────────┘                              ▼
//!                                                               RUNNING
//! ```
//!
//! Transitions are serialized by a dedicated mutex; the state cell itself
//! is locked only for reads and flips, so the scan thread's per-cycle
//! state check never contends with a long-running transition body.

use crate::engine::ScanEngine;
use crate::loader::{discover_latest, ProgramHandle};
use crate::stats::ScanStats;
use parking_lot::{Mutex, RwLock};
use plc_common::state::RuntimeState;
use plc_drivers::PluginHost;
use plc_image::SharedImage;
use std::path::PathBuf;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

/// The lifecycle state behind its mutex.
///
/// Shared with the scan engine (per-cycle check), the watchdog and the
/// control endpoint.
pub struct StateCell {
    state: Mutex<RuntimeState>,
}

impl StateCell {
    pub fn new(initial: RuntimeState) -> Self {
        Self {
            state: Mutex::new(initial),
        }
    }

    pub fn get(&self) -> RuntimeState {
        *self.state.lock()
    }

    /// Flip the state; every real transition is logged at INFO.
    pub fn set(&self, next: RuntimeState) {
        let mut state = self.state.lock();
        if *state != next {
            info!("lifecycle: {} -> {}", *state, next);
            *state = next;
        }
    }
}

/// Outcome of a `set(RUNNING)` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// The scan engine is now running.
    Started,
    /// Refused: already running (nothing changed).
    AlreadyRunning,
    /// No artifact in the build directory; state is now `EMPTY`.
    NoArtifact,
    /// The artifact failed to load or bind; state is now `ERROR`.
    LoadFailed,
}

/// The lifecycle manager.
pub struct Lifecycle {
    state: Arc<StateCell>,
    /// Serializes whole transitions (not just state flips).
    transition: Mutex<()>,
    engine_thread: Mutex<Option<JoinHandle<()>>>,
    program: RwLock<Option<Arc<ProgramHandle>>>,
    image: Arc<SharedImage>,
    host: Arc<PluginHost>,
    stats: Arc<ScanStats>,
    heartbeat: Arc<AtomicU64>,
    tick: Arc<AtomicU64>,
    build_dir: PathBuf,
    rt_priority: i32,
}

impl Lifecycle {
    pub fn new(
        image: Arc<SharedImage>,
        host: Arc<PluginHost>,
        build_dir: PathBuf,
        rt_priority: i32,
    ) -> Self {
        Self {
            state: Arc::new(StateCell::new(RuntimeState::Stopped)),
            transition: Mutex::new(()),
            engine_thread: Mutex::new(None),
            program: RwLock::new(None),
            image,
            host,
            stats: Arc::new(ScanStats::new()),
            heartbeat: Arc::new(AtomicU64::new(0)),
            tick: Arc::new(AtomicU64::new(0)),
            build_dir,
            rt_priority,
        }
    }

    pub fn state(&self) -> RuntimeState {
        self.state.get()
    }

    pub fn state_cell(&self) -> Arc<StateCell> {
        Arc::clone(&self.state)
    }

    pub fn stats(&self) -> Arc<ScanStats> {
        Arc::clone(&self.stats)
    }

    pub fn heartbeat(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.heartbeat)
    }

    /// Current cycle counter, as carried in debug response headers.
    pub fn tick_value(&self) -> u32 {
        self.tick.load(std::sync::atomic::Ordering::Relaxed) as u32
    }

    /// The loaded program, if any. Debug frame processing goes through
    /// this handle, under the image mutex.
    pub fn program(&self) -> Option<Arc<ProgramHandle>> {
        self.program.read().clone()
    }

    /// The shared image tables.
    pub fn image(&self) -> &SharedImage {
        &self.image
    }

    /// Request transition to `RUNNING`.
    ///
    /// Discovers the newest artifact, loads and binds it, glues the image
    /// tables, then spawns the scan engine thread. On failure the state
    /// reflects the cause (`EMPTY` or `ERROR`) and nothing is spawned.
    pub fn set_running(&self) -> StartOutcome {
        let _transition = self.transition.lock();

        if self.state.get() == RuntimeState::Running {
            debug!("start refused: already running");
            return StartOutcome::AlreadyRunning;
        }

        let artifact = match discover_latest(&self.build_dir) {
            Ok(path) => path,
            Err(e) => {
                warn!("no program artifact available: {e}");
                self.state.set(RuntimeState::Empty);
                return StartOutcome::NoArtifact;
            }
        };

        self.state.set(RuntimeState::Init);

        let handle = match ProgramHandle::open(&artifact) {
            Ok(h) => Arc::new(h),
            Err(e) => {
                error!("program load failed: {e}");
                self.state.set(RuntimeState::Error);
                return StartOutcome::LoadFailed;
            }
        };
        info!(
            "loaded program {:?} (md5 {})",
            artifact.file_name().unwrap_or_default(),
            handle.md5()
        );

        // Bind the program to the image tables. glue_vars writes program
        // addresses into the slots; the scratch fill afterwards guarantees
        // no plugin can dereference a NULL slot.
        {
            let mut image = self.image.lock();
            handle.set_buffer_pointers(&self.image.table_pointers());
            handle.config_init();
            handle.glue_vars();
            let filled = image.fill_null_with_scratch();
            debug!("image tables: {filled} slot(s) scratch-filled");
        }

        self.tick.store(0, std::sync::atomic::Ordering::Relaxed);
        *self.program.write() = Some(Arc::clone(&handle));
        self.state.set(RuntimeState::Running);

        let engine = ScanEngine {
            state: Arc::clone(&self.state),
            program: handle,
            image: Arc::clone(&self.image),
            host: Arc::clone(&self.host),
            stats: Arc::clone(&self.stats),
            heartbeat: Arc::clone(&self.heartbeat),
            tick: Arc::clone(&self.tick),
            rt_priority: self.rt_priority,
        };
        match std::thread::Builder::new()
            .name("plc-scan".to_string())
            .spawn(move || engine.run())
        {
            Ok(join) => {
                *self.engine_thread.lock() = Some(join);
                StartOutcome::Started
            }
            Err(e) => {
                error!("failed to spawn scan thread: {e}");
                *self.program.write() = None;
                self.state.set(RuntimeState::Error);
                StartOutcome::LoadFailed
            }
        }
    }

    /// Request transition to `STOPPED`.
    ///
    /// Only meaningful from `RUNNING`: flips the state, joins the scan
    /// thread, resets the image tables (scratch-filled so plugin threads
    /// never observe a NULL or dangling slot), then destroys the program
    /// handle. Returns `false` (nothing changed) from any other state.
    pub fn set_stopped(&self) -> bool {
        let _transition = self.transition.lock();

        if self.state.get() != RuntimeState::Running {
            return false;
        }
        self.state.set(RuntimeState::Stopped);

        if let Some(join) = self.engine_thread.lock().take() {
            if join.join().is_err() {
                error!("scan thread panicked during shutdown");
            }
        }

        // Unbind program memory from the tables before the handle (and
        // with it the program's storage) is destroyed.
        {
            let mut image = self.image.lock();
            image.clear();
            let filled = image.fill_null_with_scratch();
            debug!("image tables: cleared, {filled} slot(s) scratch-filled");
        }

        *self.program.write() = None;
        true
    }
}
