//! usb-monitor
//!
//! Watches the USB bus by polling: two snapshots a fixed delay apart are
//! diffed and every appeared or disappeared device is reported as a
//! connect/remove event to the terminal UI, the console and an event log.

use anyhow::{Context, Result};
use clap::Parser;
use common::{
    DeviceIdentity, MonitorBridge, MonitorCommand, MonitorEvent, StopReason,
    create_monitor_bridge, setup_logging, setup_logging_to,
};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::signal;
use tracing::{debug, error, info, warn};
use usb_monitor::config::MonitorConfig;
use usb_monitor::sink::{ConsoleSink, EventLogger, EventSink, SinkSet, TracingSink};
use usb_monitor::tui;
use usb_monitor::usb::spawn_monitor_worker;

#[derive(Parser, Debug)]
#[command(name = "usb-monitor")]
#[command(author, version, about = "USB device monitor - report devices as they come and go")]
#[command(long_about = "
Polls the USB bus and reports every device that is connected or removed.
Each cycle takes a snapshot, waits the configured delay, takes another
snapshot and reports the difference.

EXAMPLES:
    # Interactive terminal UI
    usb-monitor

    # Monitor without the UI until Ctrl+C
    usb-monitor --headless

    # Print connected devices and exit
    usb-monitor --list-devices

    # Poll every 250ms with debug logging
    usb-monitor --delay-ms 250 --log-level debug

CONFIGURATION:
    The monitor looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/usb-monitor/monitor.toml
    3. /etc/usb-monitor/monitor.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// List connected USB devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Monitor without the terminal UI
    #[arg(long)]
    headless: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Delay between the two snapshots of a cycle, in milliseconds
    #[arg(long, value_name = "MS")]
    delay_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = MonitorConfig::default();
        let path = MonitorConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let mut config = if let Some(ref path) = args.config {
        MonitorConfig::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        MonitorConfig::load_or_default()
    };

    if let Some(level) = args.log_level {
        config.monitor.log_level = level;
    }
    if let Some(delay_ms) = args.delay_ms {
        config.poll.delay_ms = delay_ms;
    }
    config.validate().context("Invalid command line options")?;

    let headless = args.headless || config.monitor.headless;
    let interactive = !headless && !args.list_devices;

    if interactive {
        let path = diagnostics_log_path();
        let file = open_diagnostics_log(&path)?;
        setup_logging_to(&config.monitor.log_level, Mutex::new(file))
            .context("Failed to setup logging")?;
    } else {
        setup_logging(&config.monitor.log_level).context("Failed to setup logging")?;
    }

    info!("usb-monitor v{}", env!("CARGO_PKG_VERSION"));
    info!("Log level: {}", config.monitor.log_level);

    let (bridge, worker) = create_monitor_bridge();
    let worker_handle =
        spawn_monitor_worker(worker, &config).context("Failed to spawn monitor thread")?;

    let result = if args.list_devices {
        list_devices_mode(&bridge).await
    } else if headless {
        info!("Running headless");
        run_headless(&config, &bridge).await
    } else {
        run_tui(&config, &bridge).await
    };

    info!("Shutting down monitor thread...");
    if let Err(e) = bridge.send_command(MonitorCommand::Shutdown).await {
        // Already gone if libusb failed to initialise
        warn!("Failed to send Shutdown command: {}", e);
    }

    match worker_handle.join() {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Monitor thread failed: {}", e),
        Err(e) => error!("Monitor thread panicked: {:?}", e),
    }

    result
}

/// Print connected devices and exit
async fn list_devices_mode(bridge: &MonitorBridge) -> Result<()> {
    let devices = bridge
        .list_devices()
        .await
        .context("Failed to list devices")?;

    print!("{}", format_device_list(&devices));
    Ok(())
}

/// Render the device info listing
fn format_device_list(devices: &[DeviceIdentity]) -> String {
    if devices.is_empty() {
        return "No USB devices connected.\n".to_string();
    }

    let mut out = String::from("Connected USB Devices:\n");
    for device in devices {
        out.push_str(&format!(
            "\nVendor ID: {}, Product ID: {} ({:04x}:{:04x})\n",
            device.vendor_id, device.product_id, device.vendor_id, device.product_id
        ));
        out.push_str(&format!(
            "  Bus {:03} Device {:03}\n",
            device.bus_number, device.device_address
        ));
        out.push_str(&format!(
            "  Manufacturer: {}\n",
            device.manufacturer.as_deref().unwrap_or("Unknown")
        ));
        out.push_str(&format!(
            "  Product: {}\n",
            device.product.as_deref().unwrap_or("Unknown")
        ));
        out.push_str(&format!(
            "  Serial Number: {}\n",
            device.serial_number.as_deref().unwrap_or("Unknown")
        ));
    }
    out
}

/// Monitor until Ctrl+C, reporting to the console, tracing and event log
async fn run_headless(config: &MonitorConfig, bridge: &MonitorBridge) -> Result<()> {
    let logger = EventLogger::new(config.event_log.clone());

    let mut sinks = SinkSet::new();
    sinks.push(ConsoleSink);
    sinks.push(TracingSink);
    if let Some(ref logger) = logger {
        info!("Event log: {}", config.event_log.resolved_path().display());
        sinks.push(logger.handle());
    }

    bridge
        .send_command(MonitorCommand::Start)
        .await
        .context("Failed to send Start command")?;

    println!("Monitoring started... (Ctrl+C to stop)");

    let result = loop {
        tokio::select! {
            ctrl_c = signal::ctrl_c() => {
                if let Err(e) = ctrl_c {
                    error!("Error waiting for Ctrl+C: {}", e);
                }
                info!("Received Ctrl+C, stopping...");
                break Ok(());
            }

            event = bridge.recv_event() => {
                match event {
                    Ok(MonitorEvent::Device(device_event)) => sinks.on_event(&device_event),
                    Ok(MonitorEvent::PollFailed { error, halted }) => {
                        warn!("Enumeration failed: {}", error);
                        if halted {
                            eprintln!("Enumeration failed: {}", error);
                        }
                    }
                    Ok(MonitorEvent::Stopped { reason: StopReason::PollError }) => {
                        break Err(anyhow::anyhow!("Monitoring halted after an enumeration error"));
                    }
                    Ok(event) => debug!("Monitor event: {:?}", event),
                    Err(e) => break Err(anyhow::Error::new(e).context("Monitor thread exited")),
                }
            }
        }
    };

    if let Err(e) = bridge.send_command(MonitorCommand::Stop).await {
        warn!("Failed to send Stop command: {}", e);
    }
    println!("Monitoring stopped.");

    if let Some(logger) = logger {
        logger.close().await;
    }

    result
}

/// Run the interactive terminal UI
async fn run_tui(config: &MonitorConfig, bridge: &MonitorBridge) -> Result<()> {
    let logger = EventLogger::new(config.event_log.clone());

    let mut sinks = SinkSet::new();
    sinks.push(TracingSink);
    if let Some(ref logger) = logger {
        sinks.push(logger.handle());
    }

    let result = tui::run(bridge.clone(), sinks, config.poll.delay()).await;

    if let Some(logger) = logger {
        logger.close().await;
    }

    result
}

/// File receiving diagnostics while the terminal UI owns the screen
fn diagnostics_log_path() -> PathBuf {
    dirs::state_dir()
        .or_else(dirs::cache_dir)
        .map(|dir| dir.join("usb-monitor").join("usb-monitor.log"))
        .unwrap_or_else(|| PathBuf::from("usb-monitor.log"))
}

fn open_diagnostics_log(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create log directory: {}", parent.display()))?;
    }

    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file: {}", path.display()))
}
