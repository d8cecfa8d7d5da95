//! Error types for plugin loading and lifecycle sweeps.

use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by the plugin driver host.
#[derive(Debug, Error)]
pub enum PluginError {
    /// The plugin configuration file could not be read.
    #[error("failed to read plugin config {path:?}: {source}")]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A configuration line is malformed.
    #[error("plugin config {path:?}, line {line}: {reason}")]
    ConfigParse {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    /// The plugin artifact could not be opened or bound.
    #[error("failed to load plugin '{name}' from {path:?}: {reason}")]
    Load {
        name: String,
        path: PathBuf,
        reason: String,
    },

    /// A mandatory entry point is missing.
    #[error("plugin '{name}': required entry point `{symbol}` is missing")]
    SymbolMissing { name: String, symbol: &'static str },

    /// The plugin's `init` reported failure.
    #[error("plugin '{name}': init returned {code}")]
    InitFailed { name: String, code: i32 },

    /// A scripted plugin was configured but Python support is not built in.
    #[error("scripted plugin '{name}' requires the `python` build feature")]
    PythonDisabled { name: String },

    /// A Python call raised.
    #[cfg(feature = "python")]
    #[error("scripted plugin '{name}': {source}")]
    Python {
        name: String,
        source: pyo3::PyErr,
    },
}
