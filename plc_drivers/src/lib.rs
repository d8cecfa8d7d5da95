//! Plugin driver host.
//!
//! Field I/O in the runtime is plugin-driven: native plugins are dynamic
//! libraries with C entry points invoked from the scan cycle, scripted
//! plugins are Python modules running their own threads. Both kinds
//! exchange data with the control program exclusively through the image
//! tables, under the shared priority-inheriting mutex.
//!
//! # Module Structure
//!
//! - [`config`] - `plugins.conf` parsing
//! - [`args`] - The `#[repr(C)]` runtime-arguments record handed to plugins
//! - [`native`] - Dynamic-library plugins with per-cycle hooks
//! - [`scripted`] - Python plugins (behind the `python` feature)
//! - [`host`] - Lifecycle sweeps over the configured plugin set

pub mod args;
pub mod config;
mod error;
pub mod host;
pub mod native;
pub mod scripted;

pub use config::{parse_config_file, PluginConfig, PluginKind};
pub use error::PluginError;
pub use host::PluginHost;
