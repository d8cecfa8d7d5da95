//! The control endpoint: line-oriented text commands over a local stream
//! socket.
//!
//! One client is served at a time; commands are LF-terminated, responses
//! too. Every error response carries a token suffix so the tool ecosystem
//! can switch on it without parsing free text.
//!
//! | Command | Response |
//! |---|---|
//! | `PING` | `PING:OK` |
//! | `STATUS` | `STATUS:<STATE>` |
//! | `START` | `START:OK` / `START:ERROR` / `START:ERROR_ALREADY_RUNNING` |
//! | `STOP` | `STOP:OK` / `STOP:ERROR` |
//! | `STATS` | `STATS:{json}` |
//! | `DEBUG:<hex>` | `DEBUG:<hex>` / `DEBUG:ERROR_PARSING` / `DEBUG:ERROR_PROCESSING` |
//! | anything else | `COMMAND:ERROR` |

use crate::debug::{format_hex, parse_hex, process_frame};
use crate::lifecycle::{Lifecycle, StartOutcome};
use plc_common::consts::{ACCEPT_RETRY_SECS, MAX_COMMAND_LEN, MAX_DEBUG_FRAME};
use plc_common::state::RuntimeState;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// The control socket server.
pub struct ControlEndpoint {
    listener: UnixListener,
    lifecycle: Arc<Lifecycle>,
    running: Arc<AtomicBool>,
}

impl ControlEndpoint {
    /// Bind the well-known socket path, removing a stale socket first.
    ///
    /// # Errors
    /// I/O errors from unlink/bind; a bind failure is fatal for startup.
    pub fn bind(
        path: &Path,
        lifecycle: Arc<Lifecycle>,
        running: Arc<AtomicBool>,
    ) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        let listener = UnixListener::bind(path)?;
        info!("control endpoint listening on {:?}", path);
        Ok(Self {
            listener,
            lifecycle,
            running,
        })
    }

    /// Accept and serve clients until the stop flag clears.
    pub fn run(self) {
        while self.running.load(Ordering::Relaxed) {
            match self.listener.accept() {
                Ok((stream, _)) => {
                    debug!("control client connected");
                    if let Err(e) = self.serve(stream) {
                        debug!("control client error: {e}");
                    }
                    debug!("control client disconnected");
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("control accept failed: {e}");
                    std::thread::sleep(Duration::from_secs(ACCEPT_RETRY_SECS));
                }
            }
        }
    }

    fn serve(&self, stream: UnixStream) -> io::Result<()> {
        let mut reader = BufReader::new(stream.try_clone()?);
        let mut writer = stream;
        let mut line: Vec<u8> = Vec::with_capacity(256);

        loop {
            line.clear();
            let n = reader
                .by_ref()
                .take((MAX_COMMAND_LEN + 1) as u64)
                .read_until(b'\n', &mut line)?;
            if n == 0 {
                return Ok(()); // EOF
            }
            if line.len() > MAX_COMMAND_LEN {
                writer.write_all(b"COMMAND:ERROR\n")?;
                return Ok(()); // oversized command, drop the client
            }

            let command = String::from_utf8_lossy(&line);
            let response = dispatch(command.trim_end(), &self.lifecycle);
            writer.write_all(response.as_bytes())?;
            writer.write_all(b"\n")?;
        }
    }
}

/// Execute one command line and build the response (without the LF).
pub fn dispatch(command: &str, lifecycle: &Lifecycle) -> String {
    match command {
        "PING" => "PING:OK".to_string(),
        "STATUS" => format!("STATUS:{}", lifecycle.state()),
        "START" => match lifecycle.set_running() {
            StartOutcome::Started => "START:OK".to_string(),
            StartOutcome::AlreadyRunning => "START:ERROR_ALREADY_RUNNING".to_string(),
            StartOutcome::NoArtifact | StartOutcome::LoadFailed => "START:ERROR".to_string(),
        },
        "STOP" => {
            if lifecycle.set_stopped() || lifecycle.state() == RuntimeState::Stopped {
                "STOP:OK".to_string()
            } else {
                "STOP:ERROR".to_string()
            }
        }
        "STATS" => format!("STATS:{}", lifecycle.stats().snapshot().to_json()),
        _ => match command.strip_prefix("DEBUG:") {
            Some(payload) => dispatch_debug(payload, lifecycle),
            None => "COMMAND:ERROR".to_string(),
        },
    }
}

/// Decode, process and re-encode one debug frame.
fn dispatch_debug(payload: &str, lifecycle: &Lifecycle) -> String {
    let Some(frame) = parse_hex(payload) else {
        return "DEBUG:ERROR_PARSING".to_string();
    };
    if frame.is_empty() || frame.len() > MAX_DEBUG_FRAME {
        return "DEBUG:ERROR_PARSING".to_string();
    }

    let Some(program) = lifecycle.program() else {
        return "DEBUG:ERROR_PROCESSING".to_string();
    };

    let mut buf = vec![0u8; MAX_DEBUG_FRAME];
    buf[..frame.len()].copy_from_slice(&frame);

    // Debug reads and writes touch program memory, so they take the same
    // mutex as the scan cycle.
    let new_len = {
        let _image = lifecycle.image().lock();
        process_frame(&mut buf, frame.len(), program.as_ref(), lifecycle.tick_value())
    };

    if new_len == 0 {
        return "DEBUG:ERROR_PROCESSING".to_string();
    }
    format!("DEBUG:{}", format_hex(&buf[..new_len]))
}
