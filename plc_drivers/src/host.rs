//! The plugin driver host.
//!
//! Owns the configured plugin set and runs the lifecycle sweeps:
//! `init` → `start` → (per-cycle `cycle_start`/`cycle_end` from the scan
//! thread) → `stop` → `cleanup`. Sweeps run in configuration order.
//!
//! Error policy: a failed `init` aborts the whole init sweep and is fatal
//! for the call (not the process); `start`, `stop` and `cleanup` failures
//! are logged per plugin and the sweep continues.

use crate::args::ArgsBlock;
use crate::config::{parse_config_file, PluginConfig, PluginKind};
use crate::error::PluginError;
use crate::native::NativePlugin;
use crate::scripted::ScriptedPlugin;
use parking_lot::RwLock;
use plc_common::consts::MAX_PLUGINS;
use plc_image::SharedImage;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

enum PluginBinding {
    Native(NativePlugin),
    Scripted(ScriptedPlugin),
}

/// One loaded, enabled plugin.
struct PluginInstance {
    config: PluginConfig,
    binding: PluginBinding,
    /// Runtime-arguments block; the plugin keeps its pointer until destroy.
    args: Box<ArgsBlock>,
    running: bool,
}

/// Host over the configured plugin set.
///
/// Shared as `Arc<PluginHost>`: the scan thread calls the cycle hooks,
/// the main thread drives init/start/stop/restart/destroy. The plugin
/// table lock is only write-held during lifecycle sweeps; the per-cycle
/// read acquisition is uncontended in steady state.
pub struct PluginHost {
    image: Arc<SharedImage>,
    plugins: RwLock<heapless::Vec<PluginInstance, MAX_PLUGINS>>,
}

impl std::fmt::Debug for PluginHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginHost")
            .field("plugin_count", &self.plugin_count())
            .finish()
    }
}

impl PluginHost {
    /// A host with no plugins (no config file deployed).
    pub fn empty(image: Arc<SharedImage>) -> Self {
        Self {
            image,
            plugins: RwLock::new(heapless::Vec::new()),
        }
    }

    /// Parse the configuration file and load every enabled plugin.
    ///
    /// Scripted entries in a build without the `python` feature are
    /// skipped with a warning; any other load failure is an error.
    ///
    /// # Errors
    /// Configuration and native-plugin load errors.
    pub fn from_config_file(path: &Path, image: Arc<SharedImage>) -> Result<Self, PluginError> {
        let configs = parse_config_file(path)?;
        let host = Self::empty(image);
        host.load_instances(configs)?;
        info!(
            "plugin host: {} plugin(s) loaded from {:?}",
            host.plugin_count(),
            path
        );
        Ok(host)
    }

    /// Number of loaded plugins.
    pub fn plugin_count(&self) -> usize {
        self.plugins.read().len()
    }

    fn load_instances(
        &self,
        configs: heapless::Vec<PluginConfig, MAX_PLUGINS>,
    ) -> Result<(), PluginError> {
        let mut plugins = self.plugins.write();
        for config in configs {
            if !config.enabled {
                debug!("plugin '{}' disabled, skipping", config.name);
                continue;
            }

            let binding = match config.kind {
                PluginKind::Native => {
                    PluginBinding::Native(NativePlugin::load(&config.name, &config.path)?)
                }
                PluginKind::Scripted => {
                    match ScriptedPlugin::load(
                        &config.name,
                        &config.path,
                        config.venv_path.as_deref(),
                    ) {
                        Ok(p) => PluginBinding::Scripted(p),
                        Err(PluginError::PythonDisabled { name }) => {
                            warn!(
                                "scripted plugin '{name}' skipped: built without `python`"
                            );
                            continue;
                        }
                        Err(e) => return Err(e),
                    }
                }
            };

            let args = ArgsBlock::new(&self.image, &config.config_path);
            let instance = PluginInstance {
                config,
                binding,
                args,
                running: false,
            };
            if plugins.push(instance).is_err() {
                // Unreachable: the parser caps entries at MAX_PLUGINS.
                warn!("plugin table full, ignoring remaining entries");
                break;
            }
        }
        Ok(())
    }

    /// Initialize every plugin, in configuration order.
    ///
    /// # Errors
    /// The first failing `init` aborts the sweep.
    pub fn init(&self) -> Result<(), PluginError> {
        let mut plugins = self.plugins.write();
        for inst in plugins.iter_mut() {
            let args_ptr = inst.args.as_ptr();
            match &inst.binding {
                PluginBinding::Native(n) => {
                    // SAFETY: the args block lives in the instance and
                    // outlives the plugin binding.
                    let code = unsafe { n.init(args_ptr) };
                    if code != 0 {
                        return Err(PluginError::InitFailed {
                            name: inst.config.name.clone(),
                            code,
                        });
                    }
                }
                PluginBinding::Scripted(s) => {
                    // SAFETY: as above.
                    unsafe { s.init(args_ptr)? };
                }
            }
            info!("plugin '{}' initialized", inst.config.name);
        }
        Ok(())
    }

    /// Start every plugin. Failures are logged; the sweep continues.
    pub fn start(&self) {
        let mut plugins = self.plugins.write();
        for inst in plugins.iter_mut() {
            let ok = match &inst.binding {
                PluginBinding::Native(n) => match n.start {
                    Some(f) => {
                        // SAFETY: symbol bound from the live library.
                        let code = unsafe { f() };
                        if code != 0 {
                            error!("plugin '{}': start returned {code}", inst.config.name);
                        }
                        code == 0
                    }
                    None => true,
                },
                PluginBinding::Scripted(s) => match s.start() {
                    Ok(()) => true,
                    Err(e) => {
                        error!("{e}");
                        false
                    }
                },
            };
            if ok {
                inst.running = true;
                info!("plugin '{}' started", inst.config.name);
            }
        }
    }

    /// Invoke `cycle_start` on running native plugins.
    ///
    /// Called from the scan thread with the image-table mutex held.
    /// Scripted plugins have no cycle hooks.
    pub fn cycle_start(&self) {
        let plugins = self.plugins.read();
        for inst in plugins.iter() {
            if !inst.running {
                continue;
            }
            if let PluginBinding::Native(n) = &inst.binding {
                if let Some(f) = n.cycle_start {
                    // SAFETY: symbol bound from the live library.
                    unsafe { f() };
                }
            }
        }
    }

    /// Invoke `cycle_end` on running native plugins.
    ///
    /// Called from the scan thread with the image-table mutex held.
    pub fn cycle_end(&self) {
        let plugins = self.plugins.read();
        for inst in plugins.iter() {
            if !inst.running {
                continue;
            }
            if let PluginBinding::Native(n) = &inst.binding {
                if let Some(f) = n.cycle_end {
                    // SAFETY: symbol bound from the live library.
                    unsafe { f() };
                }
            }
        }
    }

    /// Stop every running plugin. Failures are logged; the sweep
    /// continues and the `running` flag is cleared regardless.
    ///
    /// After this returns, no scripted plugin code is invoked again
    /// except `cleanup`.
    pub fn stop(&self) {
        let mut plugins = self.plugins.write();
        for inst in plugins.iter_mut() {
            if !inst.running {
                continue;
            }
            match &inst.binding {
                PluginBinding::Native(n) => {
                    if let Some(f) = n.stop {
                        // SAFETY: symbol bound from the live library.
                        let code = unsafe { f() };
                        if code != 0 {
                            error!("plugin '{}': stop returned {code}", inst.config.name);
                        }
                    }
                }
                PluginBinding::Scripted(s) => {
                    if let Err(e) = s.stop() {
                        error!("{e}");
                    }
                }
            }
            inst.running = false;
            info!("plugin '{}' stopped", inst.config.name);
        }
    }

    /// Stop, clean up, reload the configuration and start again.
    ///
    /// If the reload fails at any step, the host is left stopped (and,
    /// past the parse step, empty).
    ///
    /// # Errors
    /// Parse, load and init errors from the fresh configuration.
    pub fn restart(&self, config_path: &Path) -> Result<(), PluginError> {
        info!("plugin host: restart requested");
        self.stop();
        self.cleanup_all();
        self.plugins.write().clear();

        let configs = parse_config_file(config_path)?;
        self.load_instances(configs)?;
        self.init()?;
        self.start();
        Ok(())
    }

    /// Stop and clean up everything; unload all plugin artifacts.
    pub fn destroy(&self) {
        self.stop();
        self.cleanup_all();
        self.plugins.write().clear();
        info!("plugin host destroyed");
    }

    fn cleanup_all(&self) {
        let plugins = self.plugins.write();
        for inst in plugins.iter() {
            match &inst.binding {
                PluginBinding::Native(n) => {
                    if let Some(f) = n.cleanup {
                        // SAFETY: symbol bound from the live library.
                        let code = unsafe { f() };
                        if code != 0 {
                            error!("plugin '{}': cleanup returned {code}", inst.config.name);
                        }
                    }
                }
                PluginBinding::Scripted(s) => {
                    if let Err(e) = s.cleanup() {
                        error!("{e}");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn image() -> Arc<SharedImage> {
        Arc::new(SharedImage::new().unwrap())
    }

    #[test]
    fn empty_host_sweeps_are_noops() {
        let host = PluginHost::empty(image());
        assert!(host.init().is_ok());
        host.start();
        host.cycle_start();
        host.cycle_end();
        host.stop();
        host.destroy();
        assert_eq!(host.plugin_count(), 0);
    }

    #[test]
    fn disabled_entries_are_not_loaded() {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(f, "spare, /nonexistent/libspare.so, 0, 0, ./spare.conf").unwrap();

        let host = PluginHost::from_config_file(f.path(), image()).unwrap();
        assert_eq!(host.plugin_count(), 0);
    }

    #[cfg(not(feature = "python"))]
    #[test]
    fn scripted_entries_are_skipped_without_python() {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(f, "dash, ./dash.py, 1, 1, ./dash.conf, ./venv").unwrap();

        let host = PluginHost::from_config_file(f.path(), image()).unwrap();
        assert_eq!(host.plugin_count(), 0);
    }

    #[test]
    fn broken_native_plugin_fails_the_load() {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(f, "ghost, /nonexistent/libghost.so, 1, 0, ./ghost.conf").unwrap();

        let err = PluginHost::from_config_file(f.path(), image()).unwrap_err();
        assert!(matches!(err, PluginError::Load { .. }));
    }

    #[test]
    fn restart_with_missing_config_leaves_host_stopped_and_empty() {
        let host = PluginHost::empty(image());
        let err = host.restart(Path::new("/nonexistent/plugins.conf"));
        assert!(err.is_err());
        assert_eq!(host.plugin_count(), 0);
    }
}
