//! # PLC Runtime binary
//!
//! Brings up the execution core: configuration, logging, image tables,
//! plugin drivers, lifecycle manager, control endpoint, watchdog and the
//! optional statistics reporter; then supervises signals until shutdown.
//!
//! # Usage
//!
//! ```bash
//! # Reference deployment paths
//! plc_runtime
//!
//! # Explicit config, verbose console logging
//! plc_runtime -c /etc/plc/runtime.toml -v
//! ```
//!
//! SIGINT stops the runtime cleanly (exit 0); SIGHUP reloads the plugin
//! configuration; a heartbeat stall makes the watchdog exit non-zero.

#![deny(warnings)]

use clap::Parser;
use plc_common::config::RuntimeConfig;
use plc_common::consts::WATCHDOG_PERIOD_SECS;
use plc_drivers::PluginHost;
use plc_image::SharedImage;
use plc_runtime::control::ControlEndpoint;
use plc_runtime::lifecycle::Lifecycle;
use plc_runtime::logsink::{spawn_transport, LogRing, SocketLayer};
use plc_runtime::reporter::spawn_reporter;
use plc_runtime::watchdog::Watchdog;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn, Level};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Real-time PLC execution core
#[derive(Parser, Debug)]
#[command(name = "plc_runtime")]
#[command(version)]
#[command(about = "Real-time PLC execution core")]
#[command(long_about = None)]
struct Args {
    /// Path to the runtime configuration file (runtime.toml)
    #[arg(short, long, default_value = "./runtime.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output console logs in JSON format
    #[arg(long)]
    json: bool,
}

/// SIGHUP latch; the supervisor loop consumes it.
static SIGHUP_PENDING: AtomicBool = AtomicBool::new(false);

extern "C" fn on_sighup(_: libc::c_int) {
    SIGHUP_PENDING.store(true, Ordering::Relaxed);
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Err(e) = run() {
        error!("runtime startup failed: {e}");
        std::process::exit(1);
    }
    Ok(())
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = RuntimeConfig::load_or_default(&args.config)?;

    let ring = Arc::new(LogRing::new());
    setup_tracing(&args, Arc::clone(&ring));

    info!("PLC runtime v{} starting...", env!("CARGO_PKG_VERSION"));

    let running = Arc::new(AtomicBool::new(true));

    // Log transport to the out-of-process sink; unreachable peer only
    // buffers, it never blocks startup.
    let transport = spawn_transport(
        Arc::clone(&ring),
        config.log_socket.clone(),
        Arc::clone(&running),
    )?;

    // Image tables + plugin drivers.
    let image = Arc::new(SharedImage::new()?);
    let host = match PluginHost::from_config_file(&config.plugin_config, Arc::clone(&image)) {
        Ok(host) => Arc::new(host),
        Err(e) => {
            warn!("plugin configuration not loaded: {e}");
            Arc::new(PluginHost::empty(Arc::clone(&image)))
        }
    };
    match host.init() {
        Ok(()) => host.start(),
        Err(e) => error!("plugin init aborted: {e}"),
    }

    // Lifecycle manager.
    let lifecycle = Arc::new(Lifecycle::new(
        Arc::clone(&image),
        Arc::clone(&host),
        config.build_dir.clone(),
        config.rt_priority,
    ));

    if config.autostart {
        info!("autostart requested");
        let outcome = lifecycle.set_running();
        info!("autostart outcome: {outcome:?}");
    }

    // Watchdog.
    let watchdog = Watchdog {
        heartbeat: lifecycle.heartbeat(),
        state: lifecycle.state_cell(),
        running: Arc::clone(&running),
        period: Duration::from_secs(WATCHDOG_PERIOD_SECS),
    }
    .spawn()?;

    // Optional statistics reporter.
    let reporter = if config.stats_interval_secs > 0 {
        Some(spawn_reporter(
            lifecycle.stats(),
            config.stats_interval_secs,
            Arc::clone(&running),
        )?)
    } else {
        None
    };

    // Control endpoint.
    let endpoint = ControlEndpoint::bind(
        &config.control_socket,
        Arc::clone(&lifecycle),
        Arc::clone(&running),
    )?;
    std::thread::Builder::new()
        .name("plc-control".to_string())
        .spawn(move || endpoint.run())?;

    // Signals.
    {
        let running = Arc::clone(&running);
        ctrlc::set_handler(move || {
            running.store(false, Ordering::Relaxed);
        })?;
    }
    register_sighup()?;

    info!("PLC runtime up (state {})", lifecycle.state());

    // Supervisor loop: watch the stop flag and the SIGHUP latch.
    while running.load(Ordering::Relaxed) {
        if SIGHUP_PENDING.swap(false, Ordering::Relaxed) {
            info!("SIGHUP received, restarting plugin drivers");
            if let Err(e) = host.restart(&config.plugin_config) {
                error!("plugin restart failed: {e}");
            }
        }
        std::thread::sleep(Duration::from_millis(200));
    }

    // Shutdown: stop the program, tear down plugins, join monitors.
    info!("shutdown requested");
    lifecycle.set_stopped();
    host.destroy();

    let _ = watchdog.join();
    if let Some(reporter) = reporter {
        let _ = reporter.join();
    }
    let _ = transport.join();

    info!("PLC runtime shutdown complete");
    Ok(())
}

/// Console layer plus the socket sink layer.
fn setup_tracing(args: &Args, ring: Arc<LogRing>) {
    let level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let filter = EnvFilter::from_default_env().add_directive(level.into());
    let sink = SocketLayer::new(ring);

    if args.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .with(sink)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .with(sink)
            .init();
    }
}

/// Route SIGHUP into the restart latch.
fn register_sighup() -> Result<(), Box<dyn std::error::Error>> {
    use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

    let action = SigAction::new(
        SigHandler::Handler(on_sighup),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    // SAFETY: the handler only stores into an atomic.
    unsafe { sigaction(Signal::SIGHUP, &action) }?;
    Ok(())
}
