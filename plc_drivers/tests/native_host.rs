//! Host tests against real compiled plugins.
//!
//! The fixture plugins are shared objects built by build.rs; the host
//! loads them across the production ABI, so the runtime-arguments layout,
//! the mutex entry points and the lifecycle sweeps are all exercised for
//! real.

use plc_drivers::{PluginError, PluginHost};
use plc_image::SharedImage;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("OUT_DIR")).join(name)
}

fn write_conf(dir: &TempDir, lines: &[String]) -> PathBuf {
    let path = dir.path().join("plugins.conf");
    let mut f = std::fs::File::create(&path).unwrap();
    writeln!(f, "# test fixture plugins").unwrap();
    for line in lines {
        writeln!(f, "{line}").unwrap();
    }
    path
}

fn filled_image() -> Arc<SharedImage> {
    let image = Arc::new(SharedImage::new().unwrap());
    image.lock().fill_null_with_scratch();
    image
}

/// The fixture plugin's globals are process-wide, so every sweep over it
/// lives in this one sequential test: load → init → start → cycles →
/// stop → destroy → restart from a fresh configuration.
#[test]
fn full_native_plugin_lifecycle() {
    let dir = TempDir::new().unwrap();
    let conf = write_conf(
        &dir,
        &[format!(
            "counter, {}, 1, 0, ./counter.conf",
            fixture("libplugin_fixture.so").display()
        )],
    );

    let image = filled_image();
    let host = PluginHost::from_config_file(&conf, Arc::clone(&image)).unwrap();
    assert_eq!(host.plugin_count(), 1);

    host.init().unwrap();
    host.start();

    host.cycle_start();
    host.cycle_start();
    host.cycle_start();
    host.cycle_end();
    host.cycle_end();

    {
        let mut guard = image.lock();
        let tables = guard.tables();
        // SAFETY: all slots were scratch-filled before init; the fixture
        // writes through the handed-out base pointers.
        unsafe {
            assert_eq!(*tables.byte_in[0], 3, "cycle_start count");
            assert_eq!(*tables.byte_out[0], 2, "cycle_end count");
            assert_eq!(*tables.byte_out[1], 0x5A, "start stamp");
        }
    }

    host.stop();
    {
        let mut guard = image.lock();
        // SAFETY: as above.
        unsafe { assert_eq!(*guard.tables().byte_out[2], 0xE5, "stop stamp") };
    }

    // Hooks on a stopped plugin are skipped.
    host.cycle_start();
    {
        let mut guard = image.lock();
        // SAFETY: as above.
        unsafe { assert_eq!(*guard.tables().byte_in[0], 3) };
    }

    host.destroy();
    assert_eq!(host.plugin_count(), 0);

    // Reload the same configuration; the sweep sequence works again.
    host.restart(&conf).unwrap();
    assert_eq!(host.plugin_count(), 1);
    host.cycle_start();
    {
        let mut guard = image.lock();
        // SAFETY: as above; the scratch cell keeps its earlier count.
        unsafe { assert_eq!(*guard.tables().byte_in[0], 4) };
    }
    host.destroy();
}

#[test]
fn failing_init_aborts_the_sweep() {
    let dir = TempDir::new().unwrap();
    let conf = write_conf(
        &dir,
        &[format!(
            "bad, {}, 1, 0, ./bad.conf",
            fixture("libplugin_badinit.so").display()
        )],
    );

    let host = PluginHost::from_config_file(&conf, filled_image()).unwrap();
    let err = host.init().unwrap_err();
    match err {
        PluginError::InitFailed { name, code } => {
            assert_eq!(name, "bad");
            assert_eq!(code, 3);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn missing_init_symbol_fails_the_load() {
    let dir = TempDir::new().unwrap();
    let conf = write_conf(
        &dir,
        &[format!(
            "noinit, {}, 1, 0, ./noinit.conf",
            fixture("libplugin_noinit.so").display()
        )],
    );

    let err = PluginHost::from_config_file(&conf, filled_image()).unwrap_err();
    match err {
        PluginError::SymbolMissing { name, symbol } => {
            assert_eq!(name, "noinit");
            assert_eq!(symbol, "init");
        }
        other => panic!("unexpected error: {other}"),
    }
}
