//! End-to-end control protocol tests over a real Unix socket.
//!
//! The endpoint is served against a lifecycle whose build directory is an
//! empty temp dir, so program-less behavior (STATUS, STATS, failed START,
//! debug errors) is exercised exactly as a fresh deployment would see it.

use plc_drivers::PluginHost;
use plc_image::SharedImage;
use plc_runtime::control::ControlEndpoint;
use plc_runtime::lifecycle::Lifecycle;
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tempfile::TempDir;

struct Harness {
    socket: PathBuf,
    _dir: TempDir,
}

fn spawn_endpoint() -> Harness {
    let dir = TempDir::new().unwrap();
    let build_dir = dir.path().join("build");
    std::fs::create_dir(&build_dir).unwrap();

    let image = Arc::new(SharedImage::new().unwrap());
    let host = Arc::new(PluginHost::empty(Arc::clone(&image)));
    let lifecycle = Arc::new(Lifecycle::new(image, host, build_dir, 50));

    let socket = dir.path().join("ctl.sock");
    let running = Arc::new(AtomicBool::new(true));
    let endpoint = ControlEndpoint::bind(&socket, lifecycle, running).unwrap();
    std::thread::spawn(move || endpoint.run());

    Harness { socket, _dir: dir }
}

/// Send one command, read one LF-terminated response.
fn roundtrip(stream: &mut UnixStream, command: &str) -> String {
    stream.write_all(command.as_bytes()).unwrap();
    stream.write_all(b"\n").unwrap();

    let mut reader = BufReader::new(stream.try_clone().unwrap());
    let mut line = String::new();
    reader.read_line(&mut line).unwrap();
    assert!(line.ends_with('\n'), "response must be LF-terminated");
    line.trim_end().to_string()
}

fn connect(h: &Harness) -> UnixStream {
    // The endpoint thread may still be entering accept().
    for _ in 0..50 {
        if let Ok(s) = UnixStream::connect(&h.socket) {
            return s;
        }
        std::thread::sleep(std::time::Duration::from_millis(10));
    }
    panic!("control endpoint did not come up");
}

#[test]
fn ping() {
    let h = spawn_endpoint();
    let mut c = connect(&h);
    assert_eq!(roundtrip(&mut c, "PING"), "PING:OK");
}

#[test]
fn status_and_failed_start_sequence() {
    let h = spawn_endpoint();
    let mut c = connect(&h);

    assert_eq!(roundtrip(&mut c, "STATUS"), "STATUS:STOPPED");
    // Empty build dir: the start attempt lands in EMPTY.
    assert_eq!(roundtrip(&mut c, "START"), "START:ERROR");
    assert_eq!(roundtrip(&mut c, "STATUS"), "STATUS:EMPTY");
    // From EMPTY a stop changes nothing.
    assert_eq!(roundtrip(&mut c, "STOP"), "STOP:ERROR");
    assert_eq!(roundtrip(&mut c, "STATUS"), "STATUS:EMPTY");
}

#[test]
fn stats_before_any_cycle() {
    let h = spawn_endpoint();
    let mut c = connect(&h);

    let resp = roundtrip(&mut c, "STATS");
    let json = resp.strip_prefix("STATS:").expect("STATS: prefix");
    let value: serde_json::Value = serde_json::from_str(json).unwrap();

    assert_eq!(value["scan_count"], 0);
    assert_eq!(value["overruns"], 0);
    for field in [
        "scan_time_min_us",
        "scan_time_avg_us",
        "scan_time_max_us",
        "cycle_time_min_us",
        "cycle_time_avg_us",
        "cycle_time_max_us",
        "latency_min_us",
        "latency_avg_us",
        "latency_max_us",
    ] {
        assert!(value[field].is_null(), "{field} must be null before cycles");
    }
}

#[test]
fn unknown_command_and_case_sensitivity() {
    let h = spawn_endpoint();
    let mut c = connect(&h);

    assert_eq!(roundtrip(&mut c, "REBOOT"), "COMMAND:ERROR");
    assert_eq!(roundtrip(&mut c, "ping"), "COMMAND:ERROR");
    // The connection stays usable after an error response.
    assert_eq!(roundtrip(&mut c, "PING"), "PING:OK");
}

#[test]
fn debug_error_paths() {
    let h = spawn_endpoint();
    let mut c = connect(&h);

    assert_eq!(roundtrip(&mut c, "DEBUG:zz"), "DEBUG:ERROR_PARSING");
    assert_eq!(roundtrip(&mut c, "DEBUG:"), "DEBUG:ERROR_PARSING");
    // Well-formed frame, but no program is loaded.
    assert_eq!(roundtrip(&mut c, "DEBUG:41"), "DEBUG:ERROR_PROCESSING");
}

#[test]
fn sequential_clients_are_served() {
    let h = spawn_endpoint();
    {
        let mut c = connect(&h);
        assert_eq!(roundtrip(&mut c, "PING"), "PING:OK");
    }
    // First client disconnected; a new one must be accepted.
    let mut c = connect(&h);
    assert_eq!(roundtrip(&mut c, "STATUS"), "STATUS:STOPPED");
}
