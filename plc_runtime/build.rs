//! Compiles the test fixture control programs.
//!
//! The fixtures are real shared objects exporting the program symbol
//! contract, so the loader and engine tests bind them exactly the way
//! production binds a compiler-produced artifact.

use std::env;
use std::path::PathBuf;
use std::process::Command;

fn main() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR not set"));
    let compiler = cc::Build::new().get_compiler();

    for (src, lib) in [
        ("tests/fixtures/program.c", "libplc_fixture.so"),
        ("tests/fixtures/program_min.c", "libplc_min.so"),
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
