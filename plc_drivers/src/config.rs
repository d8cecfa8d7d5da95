//! Plugin configuration file parsing.
//!
//! `plugins.conf` is plain text, one plugin per LF-terminated line, fields
//! comma-separated in order:
//!
//! ```text
//! name, path, enabled, type, per_plugin_config_path, venv_path?
//! ```
//!
//! `enabled` and `type` are decimal integers (`type`: 0 = native,
//! 1 = scripted). Lines starting with `#` and blank lines are ignored;
//! fields after the sixth are ignored. At most [`MAX_PLUGINS`] entries are
//! accepted; extra entries are dropped with a warning.

use crate::error::PluginError;
use plc_common::consts::MAX_PLUGINS;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Plugin implementation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginKind {
    /// Dynamic library with C entry points, called from the scan cycle.
    Native,
    /// Python module running its own threads (assumed non-realtime).
    Scripted,
}

/// One parsed `plugins.conf` entry.
#[derive(Debug, Clone)]
pub struct PluginConfig {
    pub name: String,
    pub path: PathBuf,
    pub enabled: bool,
    pub kind: PluginKind,
    /// Path handed opaquely to the plugin; its format is the plugin's
    /// concern.
    pub config_path: PathBuf,
    /// Virtualenv root, only meaningful for scripted plugins.
    pub venv_path: Option<PathBuf>,
}

/// Parse a plugin configuration file.
///
/// # Errors
/// Returns [`PluginError::ConfigRead`] if the file cannot be read and
/// [`PluginError::ConfigParse`] on the first malformed line.
pub fn parse_config_file(
    path: &Path,
) -> Result<heapless::Vec<PluginConfig, MAX_PLUGINS>, PluginError> {
    let content = fs::read_to_string(path).map_err(|e| PluginError::ConfigRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut entries: heapless::Vec<PluginConfig, MAX_PLUGINS> = heapless::Vec::new();

    for (idx, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let entry = parse_line(line).map_err(|reason| PluginError::ConfigParse {
            path: path.to_path_buf(),
            line: idx + 1,
            reason,
        })?;

        if entries.push(entry).is_err() {
            warn!(
                "plugin config {:?}: more than {} entries, ignoring the rest",
                path, MAX_PLUGINS
            );
            break;
        }
    }

    Ok(entries)
}

/// Parse one non-comment line.
fn parse_line(line: &str) -> Result<PluginConfig, String> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() < 5 {
        return Err(format!("expected at least 5 fields, got {}", fields.len()));
    }

    let name = fields[0];
    if name.is_empty() {
        return Err("empty plugin name".to_string());
    }

    let enabled: u8 = fields[2]
        .parse()
        .map_err(|_| format!("enabled must be a decimal integer, got `{}`", fields[2]))?;

    let kind = match fields[3]
        .parse::<u8>()
        .map_err(|_| format!("type must be a decimal integer, got `{}`", fields[3]))?
    {
        0 => PluginKind::Native,
        1 => PluginKind::Scripted,
        other => return Err(format!("unknown plugin type {other}")),
    };

    let venv_path = fields
        .get(5)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from);

    Ok(PluginConfig {
        name: name.to_string(),
        path: PathBuf::from(fields[1]),
        enabled: enabled != 0,
        kind,
        config_path: PathBuf::from(fields[4]),
        venv_path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_conf(content: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn parses_native_and_scripted_entries() {
        let f = write_conf(
            "# field I/O drivers\n\
             modbus, ./drivers/libmodbus_drv.so, 1, 0, ./modbus.conf\n\
             \n\
             dashboard, ./drivers/dashboard.py, 1, 1, ./dash.conf, ./venv\n",
        );
        let entries = parse_config_file(f.path()).unwrap();
        assert_eq!(entries.len(), 2);

        assert_eq!(entries[0].name, "modbus");
        assert_eq!(entries[0].kind, PluginKind::Native);
        assert!(entries[0].enabled);
        assert_eq!(entries[0].venv_path, None);

        assert_eq!(entries[1].kind, PluginKind::Scripted);
        assert_eq!(entries[1].venv_path, Some(PathBuf::from("./venv")));
    }

    #[test]
    fn disabled_entry_keeps_flag() {
        let f = write_conf("spare, ./spare.so, 0, 0, ./spare.conf\n");
        let entries = parse_config_file(f.path()).unwrap();
        assert!(!entries[0].enabled);
    }

    #[test]
    fn extra_fields_are_ignored() {
        let f = write_conf("m, ./m.so, 1, 0, ./m.conf, , future-field, another\n");
        let entries = parse_config_file(f.path()).unwrap();
        assert_eq!(entries.len(), 1);
        // Empty sixth field means no venv.
        assert_eq!(entries[0].venv_path, None);
    }

    #[test]
    fn short_line_is_rejected() {
        let f = write_conf("m, ./m.so, 1\n");
        let err = parse_config_file(f.path()).unwrap_err();
        assert!(matches!(err, PluginError::ConfigParse { line: 1, .. }));
    }

    #[test]
    fn bad_enabled_field_is_rejected() {
        let f = write_conf("m, ./m.so, yes, 0, ./m.conf\n");
        assert!(parse_config_file(f.path()).is_err());
    }

    #[test]
    fn unknown_type_is_rejected() {
        let f = write_conf("m, ./m.so, 1, 7, ./m.conf\n");
        let err = parse_config_file(f.path()).unwrap_err();
        match err {
            PluginError::ConfigParse { reason, .. } => {
                assert!(reason.contains("unknown plugin type"))
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn entry_cap_is_enforced() {
        let mut content = String::new();
        for i in 0..20 {
            content.push_str(&format!("p{i}, ./p{i}.so, 1, 0, ./p{i}.conf\n"));
        }
        let f = write_conf(&content);
        let entries = parse_config_file(f.path()).unwrap();
        assert_eq!(entries.len(), MAX_PLUGINS);
    }

    #[test]
    fn missing_file_is_read_error() {
        let err = parse_config_file(Path::new("/nonexistent/plugins.conf")).unwrap_err();
        assert!(matches!(err, PluginError::ConfigRead { .. }));
    }
}
