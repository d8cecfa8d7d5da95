//! Structured log transport to the out-of-process sink.
//!
//! Inside the process, `tracing` is the facade everywhere. This module
//! adds a subscriber layer that renders each event to the wire record
//! (`{"timestamp","level","message"}`) and pushes it into a bounded ring;
//! a dedicated transport thread drains the ring over a Unix stream
//! socket, one JSON object per line, reconnecting on failure. While the
//! peer is unreachable the ring keeps the most recent
//! [`LOG_RING_CAPACITY`] records, overwriting the oldest.

use parking_lot::Mutex;
use plc_common::consts::LOG_RING_CAPACITY;
use plc_common::log::{LogLevel, LogRecord};
use std::io::{self, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

/// Bounded, oldest-overwriting record buffer.
pub struct LogRing {
    ring: Mutex<heapless::Deque<LogRecord, LOG_RING_CAPACITY>>,
}

impl LogRing {
    pub fn new() -> Self {
        Self {
            ring: Mutex::new(heapless::Deque::new()),
        }
    }

    /// Append a record, evicting the oldest when full.
    pub fn push(&self, record: LogRecord) {
        let mut ring = self.ring.lock();
        if ring.is_full() {
            ring.pop_front();
        }
        let _ = ring.push_back(record);
    }

    /// Take the oldest pending record.
    pub fn pop(&self) -> Option<LogRecord> {
        self.ring.lock().pop_front()
    }

    /// Put an undelivered record back at the front.
    pub fn requeue(&self, record: LogRecord) {
        let mut ring = self.ring.lock();
        if ring.is_full() {
            ring.pop_back();
        }
        let _ = ring.push_front(record);
    }

    pub fn len(&self) -> usize {
        self.ring.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.lock().is_empty()
    }
}

impl Default for LogRing {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Subscriber layer ───────────────────────────────────────────────

/// Renders events into the ring.
pub struct SocketLayer {
    ring: Arc<LogRing>,
}

impl SocketLayer {
    pub fn new(ring: Arc<LogRing>) -> Self {
        Self { ring }
    }
}

impl<S: Subscriber> Layer<S> for SocketLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor(String::new());
        event.record(&mut visitor);

        let level = match *event.metadata().level() {
            Level::ERROR => LogLevel::Error,
            Level::WARN => LogLevel::Warn,
            Level::INFO => LogLevel::Info,
            _ => LogLevel::Debug,
        };
        self.ring.push(LogRecord::now(level, visitor.0));
    }
}

/// Extracts the `message` field.
struct MessageVisitor(String);

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            use std::fmt::Write as _;
            let _ = write!(self.0, "{value:?}");
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.0.push_str(value);
        }
    }
}

// ─── Transport thread ───────────────────────────────────────────────

/// Spawn the transport thread.
///
/// # Errors
/// Thread spawn failure only; an unreachable peer is never fatal.
pub fn spawn_transport(
    ring: Arc<LogRing>,
    path: PathBuf,
    running: Arc<AtomicBool>,
) -> io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("plc-log-transport".to_string())
        .spawn(move || transport_loop(&ring, &path, &running))
}

fn transport_loop(ring: &LogRing, path: &std::path::Path, running: &AtomicBool) {
    let mut stream: Option<UnixStream> = None;
    let mut was_connected = false;

    while running.load(Ordering::Relaxed) {
        if stream.is_none() {
            match UnixStream::connect(path) {
                Ok(s) => {
                    // Log only on the edge; a reconnect storm must not
                    // flood the ring it is trying to drain.
                    if !was_connected {
                        tracing::debug!("log transport connected to {:?}", path);
                    }
                    was_connected = true;
                    stream = Some(s);
                }
                Err(_) => {
                    was_connected = false;
                    std::thread::sleep(Duration::from_secs(1));
                    continue;
                }
            }
        }

        match ring.pop() {
            None => std::thread::sleep(Duration::from_millis(100)),
            Some(record) => {
                let Ok(mut line) = serde_json::to_string(&record) else {
                    continue;
                };
                line.push('\n');

                if let Some(s) = stream.as_mut() {
                    if s.write_all(line.as_bytes()).is_err() {
                        // Peer gone; keep the record and reconnect.
                        ring.requeue(record);
                        stream = None;
                        std::thread::sleep(Duration::from_secs(1));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader};
    use std::os::unix::net::UnixListener;
    use tracing_subscriber::layer::SubscriberExt;

    fn record(msg: &str) -> LogRecord {
        LogRecord::now(LogLevel::Info, msg.to_string())
    }

    #[test]
    fn ring_overwrites_oldest_when_full() {
        let ring = LogRing::new();
        for i in 0..(LOG_RING_CAPACITY + 10) {
            ring.push(record(&format!("m{i}")));
        }
        assert_eq!(ring.len(), LOG_RING_CAPACITY);
        // The first ten records were evicted.
        assert_eq!(ring.pop().unwrap().message, "m10");
    }

    #[test]
    fn requeue_restores_order() {
        let ring = LogRing::new();
        ring.push(record("a"));
        ring.push(record("b"));
        let a = ring.pop().unwrap();
        ring.requeue(a);
        assert_eq!(ring.pop().unwrap().message, "a");
        assert_eq!(ring.pop().unwrap().message, "b");
    }

    #[test]
    fn layer_captures_formatted_events() {
        let ring = Arc::new(LogRing::new());
        let subscriber =
            tracing_subscriber::registry().with(SocketLayer::new(Arc::clone(&ring)));

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("cycle {} done", 7);
            tracing::error!("bad {}", "plugin");
        });

        let first = ring.pop().unwrap();
        assert_eq!(first.level, "INFO");
        assert_eq!(first.message, "cycle 7 done");
        let second = ring.pop().unwrap();
        assert_eq!(second.level, "ERROR");
        assert_eq!(second.message, "bad plugin");
    }

    #[test]
    fn transport_delivers_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("log.sock");
        let listener = UnixListener::bind(&sock).unwrap();

        let ring = Arc::new(LogRing::new());
        ring.push(record("hello sink"));

        let running = Arc::new(AtomicBool::new(true));
        let handle =
            spawn_transport(Arc::clone(&ring), sock.clone(), Arc::clone(&running)).unwrap();

        let (peer, _) = listener.accept().unwrap();
        let mut line = String::new();
        BufReader::new(peer).read_line(&mut line).unwrap();

        let value: serde_json::Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(value["level"], "INFO");
        assert_eq!(value["message"], "hello sink");
        assert!(value["timestamp"].is_string());

        running.store(false, Ordering::Relaxed);
        handle.join().unwrap();
    }
}
