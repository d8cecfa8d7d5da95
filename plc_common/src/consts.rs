//! Capacities, well-known paths and protocol limits.
//!
//! These constants are the single source of truth for buffer sizes shared
//! between the scan engine, the plugin ABI and the control protocol.

/// Slots per image table (one per IEC address, every width).
pub const IMAGE_TABLE_SIZE: usize = 1024;

/// Bits per Boolean image slot (`%IX0.0` .. `%IX0.7`).
pub const BOOL_BITS: usize = 8;

/// Maximum plugin entries accepted from `plugins.conf`.
pub const MAX_PLUGINS: usize = 16;

/// Maximum accepted control-socket command line, including the LF.
pub const MAX_COMMAND_LEN: usize = 8 * 1024;

/// Maximum control-socket response line, including the LF.
pub const MAX_RESPONSE_LEN: usize = 16 * 1024;

/// Capacity of the in-place debug frame buffer. A full frame hex-encodes
/// to `3 * MAX_DEBUG_FRAME` characters, which stays inside
/// [`MAX_RESPONSE_LEN`] together with the `DEBUG:` prefix.
pub const MAX_DEBUG_FRAME: usize = 4096;

const _: () = assert!(3 * MAX_DEBUG_FRAME + "DEBUG:".len() + 1 <= MAX_RESPONSE_LEN);

/// Pending log records kept while the log socket peer is unreachable.
pub const LOG_RING_CAPACITY: usize = 1024;

/// Default control socket path.
pub const CONTROL_SOCKET_PATH: &str = "/run/runtime/plc_runtime.socket";

/// Default log transport socket path.
pub const LOG_SOCKET_PATH: &str = "/run/runtime/plc_log.socket";

/// Default directory scanned for compiled program artifacts.
pub const BUILD_DIR: &str = "./build";

/// Default plugin configuration file.
pub const PLUGIN_CONFIG_PATH: &str = "./plugins.conf";

/// Artifact file name shape: `libplc_<stamp>.so`.
pub const ARTIFACT_PREFIX: &str = "libplc_";
/// Artifact file name suffix.
pub const ARTIFACT_SUFFIX: &str = ".so";

/// Watchdog polling period.
pub const WATCHDOG_PERIOD_SECS: u64 = 2;

/// Process exit status used by the watchdog on heartbeat stall.
pub const WATCHDOG_EXIT_CODE: i32 = 2;

/// Default SCHED_FIFO priority for the scan thread (mid-range).
pub const SCAN_RT_PRIORITY: i32 = 50;

/// Fallback scan period when a program publishes a zero ticktime [ns].
pub const DEFAULT_TICKTIME_NS: u64 = 50_000_000;

/// Retry delay after a failed control-socket accept.
pub const ACCEPT_RETRY_SECS: u64 = 1;
