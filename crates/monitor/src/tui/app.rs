//! TUI application state
//!
//! Holds the log pane, monitoring state and counters, and translates user
//! actions into requests for the monitor thread.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use common::{
    DeviceEvent, DeviceIdentity, DeviceListReceiver, EventKind, MonitorBridge, MonitorCommand,
    MonitorEvent, StopReason,
};
use crossterm::{
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{Terminal, backend::CrosstermBackend};
use std::io::{self, Stdout};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use super::events::{Action, Event, EventHandler};
use super::ui;
use crate::sink::{EventSink, SinkSet};

/// Maximum number of lines kept in the log pane
const MAX_LOG_LINES: usize = 5000;

/// Placeholder for a descriptor string that could not be read
const UNKNOWN: &str = "Unknown";

const LISTING_NOTICE: &str = "Listing devices...";

/// Answer to a queued device listing, as received from its oneshot
type DeviceListReply =
    std::result::Result<common::Result<Vec<DeviceIdentity>>, oneshot::error::RecvError>;

/// Styling class of a log line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Info,
    Connected,
    Removed,
    Error,
}

/// One line of the log pane
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub kind: LineKind,
    pub text: String,
}

/// Monitoring state as shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Idle,
    Starting,
    Monitoring,
    Stopping,
}

/// Current dialog/popup being displayed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialog {
    None,
    Help,
}

/// Work the run loop must hand to the monitor thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    Start,
    Stop,
    ListDevices,
}

/// Application state
pub struct App {
    lines: Vec<LogLine>,
    /// Lines scrolled up from the newest line (0 = follow)
    scroll_offset: usize,
    status: Status,
    dialog: Dialog,
    should_quit: bool,
    connected_count: u64,
    removed_count: u64,
    /// Transient message shown in the status bar
    notice: Option<String>,
    /// A device listing has been requested and not answered yet
    listing: bool,
    poll_delay: Duration,
    start_time: Instant,
}

impl App {
    pub fn new(poll_delay: Duration) -> Self {
        Self {
            lines: Vec::new(),
            scroll_offset: 0,
            status: Status::Idle,
            dialog: Dialog::None,
            should_quit: false,
            connected_count: 0,
            removed_count: 0,
            notice: None,
            listing: false,
            poll_delay,
            start_time: Instant::now(),
        }
    }

    pub fn lines(&self) -> &[LogLine] {
        &self.lines
    }

    pub fn scroll_offset(&self) -> usize {
        self.scroll_offset
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn dialog(&self) -> Dialog {
        self.dialog
    }

    pub fn should_quit(&self) -> bool {
        self.should_quit
    }

    pub fn connected_count(&self) -> u64 {
        self.connected_count
    }

    pub fn removed_count(&self) -> u64 {
        self.removed_count
    }

    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    pub fn is_listing(&self) -> bool {
        self.listing
    }

    pub fn poll_delay(&self) -> Duration {
        self.poll_delay
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    fn is_active(&self) -> bool {
        matches!(self.status, Status::Starting | Status::Monitoring)
    }

    /// Handle user action
    ///
    /// Returns the request to send to the monitor thread, if any.
    pub fn handle_action(&mut self, action: Action) -> Option<Request> {
        if self.dialog != Dialog::None {
            match action {
                Action::Quit | Action::CloseDialog | Action::ShowHelp => {
                    self.dialog = Dialog::None;
                }
                _ => {}
            }
            return None;
        }

        match action {
            Action::Quit => {
                self.should_quit = true;
                None
            }
            Action::Start => {
                if self.is_active() {
                    return None;
                }
                self.lines.clear();
                self.scroll_offset = 0;
                self.push(LineKind::Info, "Monitoring started...");
                self.status = Status::Starting;
                self.notice = None;
                Some(Request::Start)
            }
            Action::Stop => {
                if !self.is_active() {
                    return None;
                }
                self.status = Status::Stopping;
                Some(Request::Stop)
            }
            Action::DeviceInfo => {
                if self.status != Status::Idle {
                    self.notice = Some("Stop monitoring to list devices".to_string());
                    return None;
                }
                self.notice = Some(LISTING_NOTICE.to_string());
                if self.listing {
                    return None;
                }
                self.listing = true;
                Some(Request::ListDevices)
            }
            Action::Clear => {
                self.lines.clear();
                self.scroll_offset = 0;
                None
            }
            Action::ScrollUp => {
                let max = self.lines.len().saturating_sub(1);
                self.scroll_offset = (self.scroll_offset + 1).min(max);
                None
            }
            Action::ScrollDown => {
                self.scroll_offset = self.scroll_offset.saturating_sub(1);
                None
            }
            Action::ScrollEnd => {
                self.scroll_offset = 0;
                None
            }
            Action::ShowHelp => {
                self.dialog = Dialog::Help;
                None
            }
            Action::CloseDialog | Action::None => None,
        }
    }

    /// Apply an event from the monitor thread
    pub fn handle_monitor_event(&mut self, event: &MonitorEvent) {
        match event {
            MonitorEvent::Started => {
                self.status = Status::Monitoring;
            }
            MonitorEvent::Stopped { reason } => {
                self.status = Status::Idle;
                let text = match reason {
                    StopReason::Requested | StopReason::Shutdown => "Monitoring stopped.",
                    StopReason::PollError => "Monitoring stopped after an enumeration error.",
                };
                self.push(LineKind::Info, text);
            }
            MonitorEvent::Device(device_event) => self.push_device_event(device_event),
            MonitorEvent::PollFailed { error, halted } => {
                debug!("Poll failed (halted: {}): {}", halted, error);
                self.push(LineKind::Error, format!("Enumeration failed: {}", error));
            }
        }
    }

    fn push_device_event(&mut self, event: &DeviceEvent) {
        let (kind, counter) = match event.kind {
            EventKind::Connected => (LineKind::Connected, &mut self.connected_count),
            EventKind::Removed => (LineKind::Removed, &mut self.removed_count),
        };
        *counter += 1;

        let time: DateTime<Local> = event.timestamp.into();
        self.push(kind, format!("{} {}", time.format("%H:%M:%S"), event));
    }

    /// Append the result of a device info query
    pub fn show_device_list(&mut self, devices: &[DeviceIdentity]) {
        self.push(LineKind::Info, "");
        self.push(LineKind::Info, "Connected USB Devices:");

        if devices.is_empty() {
            self.push(LineKind::Info, "No USB devices connected.");
            return;
        }

        for device in devices {
            self.push(LineKind::Info, "");
            self.push(
                LineKind::Info,
                format!(
                    "Vendor ID: {}, Product ID: {} ({:04x}:{:04x}, bus {:03} address {:03})",
                    device.vendor_id,
                    device.product_id,
                    device.vendor_id,
                    device.product_id,
                    device.bus_number,
                    device.device_address
                ),
            );
            self.push(
                LineKind::Info,
                format!(
                    "Manufacturer: {}",
                    device.manufacturer.as_deref().unwrap_or(UNKNOWN)
                ),
            );
            self.push(
                LineKind::Info,
                format!("Product: {}", device.product.as_deref().unwrap_or(UNKNOWN)),
            );
            self.push(
                LineKind::Info,
                format!(
                    "Serial Number: {}",
                    device.serial_number.as_deref().unwrap_or(UNKNOWN)
                ),
            );
        }
    }

    /// Apply the answer to a device listing request
    pub fn finish_device_list(&mut self, result: Result<Vec<DeviceIdentity>>) {
        self.listing = false;
        if self.notice.as_deref() == Some(LISTING_NOTICE) {
            self.notice = None;
        }

        match result {
            Ok(devices) => self.show_device_list(&devices),
            Err(e) => {
                warn!("{:#}", e);
                self.show_error(format!("{:#}", e));
            }
        }
    }

    /// Report a failure on the log pane
    pub fn show_error(&mut self, message: impl Into<String>) {
        self.push(LineKind::Error, message);
    }

    fn push(&mut self, kind: LineKind, text: impl Into<String>) {
        self.lines.push(LogLine {
            kind,
            text: text.into(),
        });

        if self.lines.len() > MAX_LOG_LINES {
            let excess = self.lines.len() - MAX_LOG_LINES;
            self.lines.drain(..excess);
        }

        // Keep the view anchored when scrolled back
        if self.scroll_offset > 0 {
            self.scroll_offset = (self.scroll_offset + 1).min(self.lines.len().saturating_sub(1));
        }
    }
}

/// Terminal wrapper for setup/teardown
pub struct Tui {
    terminal: Terminal<CrosstermBackend<Stdout>>,
}

impl Tui {
    pub fn new() -> Result<Self> {
        let backend = CrosstermBackend::new(io::stdout());
        let terminal = Terminal::new(backend)?;
        Ok(Self { terminal })
    }

    /// Enter TUI mode (raw mode, alternate screen)
    pub fn enter(&mut self) -> Result<()> {
        enable_raw_mode()?;
        execute!(io::stdout(), EnterAlternateScreen)?;
        self.terminal.hide_cursor()?;
        self.terminal.clear()?;
        Ok(())
    }

    /// Exit TUI mode (restore terminal state)
    pub fn exit(&mut self) -> Result<()> {
        disable_raw_mode()?;
        execute!(io::stdout(), LeaveAlternateScreen)?;
        self.terminal.show_cursor()?;
        Ok(())
    }

    pub fn draw(&mut self, app: &App) -> Result<()> {
        self.terminal.draw(|frame| {
            ui::render(frame, app);
        })?;
        Ok(())
    }
}

impl Drop for Tui {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
        let _ = self.terminal.show_cursor();
    }
}

/// Forward a request to the monitor thread
///
/// A device listing is only queued; its answer arrives through the returned
/// receiver so the UI keeps running while the monitor thread enumerates.
async fn dispatch(
    bridge: &MonitorBridge,
    request: Request,
) -> Result<Option<DeviceListReceiver>> {
    match request {
        Request::Start => bridge
            .send_command(MonitorCommand::Start)
            .await
            .context("Failed to send Start command")?,
        Request::Stop => bridge
            .send_command(MonitorCommand::Stop)
            .await
            .context("Failed to send Stop command")?,
        Request::ListDevices => {
            let pending = bridge
                .request_devices()
                .await
                .context("Failed to request device list")?;
            return Ok(Some(pending));
        }
    }
    Ok(None)
}

/// Run the TUI application
///
/// Device events are handed to `sinks` as well as the log pane. Returns
/// when the user quits; stopping the monitor thread is left to the caller.
pub async fn run(bridge: MonitorBridge, mut sinks: SinkSet, poll_delay: Duration) -> Result<()> {
    let mut tui = Tui::new()?;
    tui.enter()?;

    let mut app = App::new(poll_delay);
    let mut events = EventHandler::new(Duration::from_millis(250));
    let mut worker_alive = true;
    let (list_tx, mut list_rx) = mpsc::unbounded_channel::<DeviceListReply>();

    loop {
        if let Err(e) = tui.draw(&app) {
            error!("Failed to draw UI: {:#}", e);
            break;
        }

        tokio::select! {
            event = events.next() => {
                match event {
                    Some(Event::Key(key)) => {
                        if let Some(request) = app.handle_action(Action::from(key)) {
                            match dispatch(&bridge, request).await {
                                Ok(Some(pending)) => {
                                    let list_tx = list_tx.clone();
                                    tokio::spawn(async move {
                                        let _ = list_tx.send(pending.await);
                                    });
                                }
                                Ok(None) => {}
                                Err(e) if request == Request::ListDevices => {
                                    app.finish_device_list(Err(e));
                                }
                                Err(e) => {
                                    warn!("{:#}", e);
                                    app.show_error(format!("{:#}", e));
                                }
                            }
                        }
                    }
                    Some(Event::Resize) | Some(Event::Tick) => {}
                    None => break,
                }
            }

            Some(listing) = list_rx.recv() => {
                let devices = listing
                    .context("Monitor thread dropped the device list request")
                    .and_then(|result| result.context("Failed to list devices"));
                app.finish_device_list(devices);
            }

            monitor_event = bridge.recv_event(), if worker_alive => {
                match monitor_event {
                    Ok(event) => {
                        if let MonitorEvent::Device(ref device_event) = event {
                            sinks.on_event(device_event);
                        }
                        app.handle_monitor_event(&event);
                    }
                    Err(e) => {
                        warn!("Monitor event channel closed: {:#}", e);
                        app.show_error("Monitor thread exited.");
                        worker_alive = false;
                    }
                }
            }
        }

        if app.should_quit() {
            break;
        }
    }

    tui.exit()?;

    Ok(())
}
