//! Scripted plugins: Python modules with a five-method lifecycle.
//!
//! Scripted plugins are assumed non-realtime: they have no per-cycle
//! hooks. `start_loop` must return immediately; any long-running work
//! belongs to threads the plugin spawns itself, which synchronize with
//! the scan cycle solely via the image-table mutex from the runtime
//! arguments capsule.
//!
//! Python support is compiled in only with the `python` feature; without
//! it the host skips scripted entries with a warning.

#[cfg(feature = "python")]
pub use imp::ScriptedPlugin;

#[cfg(not(feature = "python"))]
pub use stub::ScriptedPlugin;

#[cfg(feature = "python")]
mod imp {
    use crate::args::PluginRuntimeArgs;
    use crate::error::PluginError;
    use pyo3::prelude::*;
    use pyo3::types::PyModule;
    use std::ffi::{CStr, CString};
    use std::fs;
    use std::path::{Path, PathBuf};
    use tracing::debug;

    /// Capsule name checked by plugins via `PyCapsule_GetPointer`.
    const CAPSULE_NAME: &CStr = c"plc_runtime.args";

    /// A loaded Python plugin module.
    pub struct ScriptedPlugin {
        name: String,
        module: Py<PyModule>,
        start_loop: Option<Py<PyAny>>,
        stop_loop: Option<Py<PyAny>>,
        cleanup: Option<Py<PyAny>>,
    }

    impl ScriptedPlugin {
        /// Load the module from `path`, optionally extending `sys.path`
        /// with the virtualenv's site-packages directories first.
        ///
        /// # Errors
        /// [`PluginError::SymbolMissing`] when the module has no `init`;
        /// [`PluginError::Python`] on any interpreter error.
        pub fn load(
            name: &str,
            path: &Path,
            venv: Option<&Path>,
        ) -> Result<Self, PluginError> {
            let code = fs::read_to_string(path).map_err(|e| PluginError::Load {
                name: name.to_string(),
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

            Python::with_gil(|py| {
                if let Some(venv) = venv {
                    extend_sys_path(py, venv).map_err(|e| PluginError::Python {
                        name: name.to_string(),
                        source: e,
                    })?;
                }

                let to_c = |s: &str| {
                    CString::new(s.as_bytes()).map_err(|_| PluginError::Load {
                        name: name.to_string(),
                        path: path.to_path_buf(),
                        reason: "interior NUL in module source or path".to_string(),
                    })
                };
                let code_c = to_c(&code)?;
                let file_c = to_c(&path.to_string_lossy())?;
                let mod_c = to_c(name)?;

                let module = PyModule::from_code(py, &code_c, &file_c, &mod_c).map_err(
                    |e| PluginError::Python {
                        name: name.to_string(),
                        source: e,
                    },
                )?;

                if module.getattr("init").is_err() {
                    return Err(PluginError::SymbolMissing {
                        name: name.to_string(),
                        symbol: "init",
                    });
                }

                let optional = |attr: &str| module.getattr(attr).ok().map(Bound::unbind);
                let start_loop = optional("start_loop");
                let stop_loop = optional("stop_loop");
                let cleanup = optional("cleanup");

                debug!(
                    "scripted plugin '{}' loaded (start_loop={}, stop_loop={}, cleanup={})",
                    name,
                    start_loop.is_some(),
                    stop_loop.is_some(),
                    cleanup.is_some()
                );

                Ok(Self {
                    name: name.to_string(),
                    module: module.unbind(),
                    start_loop,
                    stop_loop,
                    cleanup,
                })
            })
        }

        /// Invoke the mandatory `init(capsule)`.
        ///
        /// The capsule wraps the runtime-arguments pointer; its lifetime is
        /// tied to the plugin instance, which owns the referenced block.
        ///
        /// # Safety
        /// `args` must point at a live `PluginRuntimeArgs` block that
        /// outlives this instance.
        pub unsafe fn init(&self, args: *mut PluginRuntimeArgs) -> Result<(), PluginError> {
            Python::with_gil(|py| {
                // SAFETY: `args` is valid per this function's contract; the
                // capsule only carries the pointer, it takes no ownership.
                let capsule = unsafe {
                    let raw = pyo3::ffi::PyCapsule_New(
                        args.cast::<libc::c_void>(),
                        CAPSULE_NAME.as_ptr(),
                        None,
                    );
                    Bound::from_owned_ptr_or_err(py, raw).map_err(|e| self.py_err(e))?
                };
                self.module
                    .bind(py)
                    .getattr("init")
                    .and_then(|f| f.call1((capsule,)))
                    .map_err(|e| self.py_err(e))?;
                Ok(())
            })
        }

        /// Invoke `start_loop` if present; must return immediately.
        pub fn start(&self) -> Result<(), PluginError> {
            self.call_optional(&self.start_loop)
        }

        /// Invoke `stop_loop` if present. After this returns, the host
        /// performs no further invocations except `cleanup`.
        pub fn stop(&self) -> Result<(), PluginError> {
            self.call_optional(&self.stop_loop)
        }

        /// Invoke `cleanup` if present.
        pub fn cleanup(&self) -> Result<(), PluginError> {
            self.call_optional(&self.cleanup)
        }

        fn call_optional(&self, f: &Option<Py<PyAny>>) -> Result<(), PluginError> {
            let Some(f) = f else {
                return Ok(());
            };
            Python::with_gil(|py| {
                f.bind(py).call0().map_err(|e| self.py_err(e))?;
                Ok(())
            })
        }

        fn py_err(&self, source: PyErr) -> PluginError {
            PluginError::Python {
                name: self.name.clone(),
                source,
            }
        }
    }

    /// Prepend the venv's site-packages directories to `sys.path`.
    fn extend_sys_path(py: Python<'_>, venv: &Path) -> PyResult<()> {
        let sys_path = py.import("sys")?.getattr("path")?;
        for sp in site_packages_dirs(venv) {
            sys_path.call_method1("insert", (0, sp.to_string_lossy().into_owned()))?;
        }
        Ok(())
    }

    /// `<venv>/lib/python*/site-packages`, whatever versions exist.
    fn site_packages_dirs(venv: &Path) -> Vec<PathBuf> {
        let mut dirs = Vec::new();
        if let Ok(entries) = fs::read_dir(venv.join("lib")) {
            for entry in entries.flatten() {
                let sp = entry.path().join("site-packages");
                if sp.is_dir() {
                    dirs.push(sp);
                }
            }
        }
        dirs
    }
}

#[cfg(not(feature = "python"))]
mod stub {
    use crate::args::PluginRuntimeArgs;
    use crate::error::PluginError;
    use std::path::Path;

    /// Placeholder used when Python support is not compiled in.
    ///
    /// `load` always fails, so no instance of this type ever exists; the
    /// lifecycle methods keep the host code monomorphic across features.
    pub struct ScriptedPlugin {
        _name: String,
    }

    impl ScriptedPlugin {
        pub fn load(
            name: &str,
            _path: &Path,
            _venv: Option<&Path>,
        ) -> Result<Self, PluginError> {
            Err(PluginError::PythonDisabled {
                name: name.to_string(),
            })
        }

        /// # Safety
        /// Never called; no instance can be constructed.
        pub unsafe fn init(&self, _args: *mut PluginRuntimeArgs) -> Result<(), PluginError> {
            Ok(())
        }

        pub fn start(&self) -> Result<(), PluginError> {
            Ok(())
        }

        pub fn stop(&self) -> Result<(), PluginError> {
            Ok(())
        }

        pub fn cleanup(&self) -> Result<(), PluginError> {
            Ok(())
        }
    }
}
