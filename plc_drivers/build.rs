//! Compiles the test fixture plugins.
//!
//! Real shared objects with the native plugin entry points, so the host
//! tests load them across the same ABI production plugins use.

use std::env;
use std::path::PathBuf;
use std::process::Command;

fn main() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR not set"));
    let compiler = cc::Build::new().get_compiler();

    for (src, lib) in [
        ("tests/fixtures/plugin.c", "libplugin_fixture.so"),
        ("tests/fixtures/plugin_badinit.c", "libplugin_badinit.so"),
        ("tests/fixtures/plugin_noinit.c", "libplugin_noinit.so"),
    ] {
        println!("cargo:rerun-if-changed={src}");
        let dst = out_dir.join(lib);
        let status = Command::new(compiler.path())
            .args(["-shared", "-fPIC", "-O1", "-o"])
            .arg(&dst)
            .arg(src)
            .status()
            .unwrap_or_else(|e| panic!("failed to run C compiler for {src}: {e}"));
        assert!(status.success(), "fixture compile failed for {src}");
    }
}
