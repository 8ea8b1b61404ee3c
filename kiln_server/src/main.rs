//! # kiln Regulation Server
//!
//! Binary entry point: loads and validates the TOML configuration,
//! connects both instrument links, binds the command listener, and hands
//! everything to the single-threaded scheduler.
//!
//! One client session at a time. When a client disconnects the server
//! returns to accept-and-wait; regulation keeps running between sessions
//! so a dropped connection never interrupts a bake.

use clap::Parser;
use kiln_common::config::{ConfigLoader, LogLevel, ServerConfig};
use kiln_devices::probe::TempProbe;
use kiln_devices::supply::PowerSupply;
use kiln_devices::transport::TcpTransport;
use kiln_server::scheduler::{Regulator, SessionEnd};
use kiln_server::state::ControlState;
use std::net::TcpListener;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{Level, info, warn};
use tracing_subscriber::EnvFilter;

/// Pause between accept polls while no client is attached.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// kiln — remote laboratory heater regulation server
#[derive(Parser, Debug)]
#[command(name = "kiln_server")]
#[command(version)]
#[command(about = "Closed-loop heater regulation with a remote text command protocol")]
struct Args {
    /// Path to the server configuration TOML.
    #[arg(default_value = "config/kiln.toml")]
    config: PathBuf,

    /// Override the command listener address (`host:port`) from the
    /// config file.
    #[arg(long, value_name = "ADDR")]
    bind: Option<String>,

    /// Enable verbose logging (DEBUG level).
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format.
    #[arg(long)]
    json: bool,
}

fn main() {
    let args = Args::parse();

    if let Err(e) = run(&args) {
        // Tracing is initialized after the config loads; failures before
        // that still need to land somewhere.
        eprintln!("FATAL: {e}");
        process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = ServerConfig::load(&args.config)?;
    config.validate()?;
    setup_tracing(args, config.shared.log_level);

    info!(
        service = %config.shared.service_name,
        "kiln v{} starting",
        env!("CARGO_PKG_VERSION")
    );

    // Instrument links. Both carry a bounded per-call read timeout so no
    // device call can stall the loop indefinitely.
    let supply_transport = TcpTransport::connect(
        &config.supply.addr,
        Duration::from_millis(config.supply.io_timeout_ms),
    )?;
    let mut supply = PowerSupply::new(
        supply_transport,
        config.supply.channel,
        config.supply.max_voltage,
        config.supply.max_current,
    );
    let identity = supply.idn()?;
    info!(addr = %config.supply.addr, %identity, "supply connected");

    let probe_transport = TcpTransport::connect(
        &config.probe.addr,
        Duration::from_millis(config.probe.io_timeout_ms),
    )?;
    let probe = TempProbe::new(probe_transport, config.probe.max_attempts);
    info!(addr = %config.probe.addr, "probe connected");

    let state = ControlState::from_config(&config.control);
    let mut regulator = Regulator::new(state, supply, probe);

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    let bind = args
        .bind
        .clone()
        .unwrap_or_else(|| format!("{}:{}", config.listener.bind, config.listener.port));
    let listener = TcpListener::bind(&bind)?;
    listener.set_nonblocking(true)?;
    info!(%bind, "listening for command client");

    while running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                info!(%peer, "client connected");
                stream.set_nonblocking(true)?;
                let mut port = stream;
                match regulator.run_session(&mut port, &running) {
                    Ok(SessionEnd::Disconnected) => {
                        info!(%peer, "session closed, waiting for a new client");
                    }
                    Ok(SessionEnd::ShuttingDown) => break,
                    Err(e) => warn!(%peer, "session failed: {e}"),
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                // No client attached: keep the control loop alive so an
                // active bake survives a dropped connection.
                regulator.tick(Instant::now());
                std::thread::sleep(ACCEPT_BACKOFF);
            }
            Err(e) => return Err(e.into()),
        }
    }

    // Leave the rig safe on the way out.
    info!("shutdown signal received");
    if let Err(e) = regulator.supply.stop() {
        warn!("could not stop supply during shutdown: {e}");
    }
    info!("kiln shutdown complete");
    Ok(())
}

/// Setup the tracing subscriber: `--verbose` wins, then the config file's
/// log level; `RUST_LOG` directives layer on top of either.
fn setup_tracing(args: &Args, config_level: LogLevel) {
    let level = if args.verbose {
        Level::DEBUG
    } else {
        match config_level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .compact()
            .init();
    }
}
