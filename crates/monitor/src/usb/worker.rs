//! Monitor worker thread
//!
//! Dedicated thread that owns the enumeration provider and runs the poll
//! loop. It talks to the Tokio side only through the channel bridge, so a
//! slow enumeration never blocks the terminal UI and a stop command is seen
//! within one wait slice.
//!
//! Each monitoring cycle takes snapshot A, waits the configured delay, takes
//! snapshot B, diffs (A, B) and emits one event per change. A stop or start
//! received mid-cycle abandons the cycle without emitting its events.

use crate::config::{ErrorPolicy, MonitorConfig};
use crate::usb::provider::{DeviceProvider, RusbProvider};
use common::{
    DeviceSnapshot, IdentityPolicy, MonitorCommand, MonitorEvent, MonitorWorker, StopReason,
    diff_snapshots,
};
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, info, warn};

/// Granularity at which commands are checked during the delay
const WAIT_SLICE: Duration = Duration::from_millis(50);

/// Poll loop options
#[derive(Debug, Clone, Copy)]
pub struct PollOptions {
    /// Delay between the two snapshots of a cycle
    pub delay: Duration,
    pub on_error: ErrorPolicy,
    pub identity: IdentityPolicy,
}

impl PollOptions {
    pub fn from_config(config: &MonitorConfig) -> Self {
        Self {
            delay: config.poll.delay(),
            on_error: config.poll.on_error,
            identity: config.usb.identity,
        }
    }
}

/// Scheduler state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Idle,
    Monitoring,
}

/// Outcome of handling a command or a wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    /// Carry on with the current cycle
    Continue,
    /// State changed; the current cycle must be abandoned
    Restart,
    /// Leave the run loop
    Shutdown,
}

/// Monitor worker thread
///
/// Owns the provider and the Idle/Monitoring state machine.
pub struct MonitorWorkerThread<P: DeviceProvider> {
    provider: P,
    worker: MonitorWorker,
    options: PollOptions,
    state: MonitorState,
}

impl<P: DeviceProvider> MonitorWorkerThread<P> {
    pub fn new(provider: P, worker: MonitorWorker, options: PollOptions) -> Self {
        Self {
            provider,
            worker,
            options,
            state: MonitorState::Idle,
        }
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    /// Run until a Shutdown command arrives or the bridge is dropped
    ///
    /// While idle the thread blocks on the command channel; while
    /// monitoring it runs poll cycles back to back.
    pub fn run(mut self) -> common::Result<()> {
        info!(
            "Monitor worker started (delay {:?}, identity {:?})",
            self.options.delay, self.options.identity
        );

        loop {
            let flow = match self.state {
                MonitorState::Idle => match self.worker.recv_command() {
                    Ok(cmd) => self.handle_command(cmd),
                    Err(e) => {
                        debug!("Command channel closed: {}", e);
                        Flow::Shutdown
                    }
                },
                MonitorState::Monitoring => self.poll_cycle(),
            };

            if flow == Flow::Shutdown {
                break;
            }
        }

        info!("Monitor worker stopped");
        Ok(())
    }

    /// Handle a command from the control surface
    fn handle_command(&mut self, cmd: MonitorCommand) -> Flow {
        match cmd {
            MonitorCommand::Start => {
                if self.state == MonitorState::Monitoring {
                    debug!("Start ignored, already monitoring");
                    return Flow::Continue;
                }
                info!("Monitoring started");
                self.state = MonitorState::Monitoring;
                self.emit(MonitorEvent::Started).and(Flow::Restart)
            }

            MonitorCommand::Stop => {
                if self.state == MonitorState::Idle {
                    debug!("Stop ignored, not monitoring");
                    return Flow::Continue;
                }
                info!("Monitoring stopped");
                self.state = MonitorState::Idle;
                self.emit(MonitorEvent::Stopped {
                    reason: StopReason::Requested,
                })
                .and(Flow::Restart)
            }

            MonitorCommand::ListDevices { response } => {
                let result = self.provider.list_devices();
                if let Ok(devices) = &result {
                    debug!("Listing {} devices", devices.len());
                }
                let _ = response.send(result);
                Flow::Continue
            }

            MonitorCommand::Shutdown => {
                info!("Monitor worker shutting down");
                if self.state == MonitorState::Monitoring {
                    self.state = MonitorState::Idle;
                    let _ = self.worker.send_event(MonitorEvent::Stopped {
                        reason: StopReason::Shutdown,
                    });
                }
                Flow::Shutdown
            }
        }
    }

    /// One snapshot -> delay -> snapshot -> diff cycle
    fn poll_cycle(&mut self) -> Flow {
        match self.drain_commands() {
            Flow::Continue => {}
            Flow::Restart => return Flow::Continue,
            Flow::Shutdown => return Flow::Shutdown,
        }

        let previous = match self.take_snapshot() {
            Ok(snapshot) => snapshot,
            Err(e) => return self.handle_poll_error(e),
        };

        match self.wait(self.options.delay) {
            Flow::Continue => {}
            Flow::Restart => return Flow::Continue,
            Flow::Shutdown => return Flow::Shutdown,
        }

        let current = match self.take_snapshot() {
            Ok(snapshot) => snapshot,
            Err(e) => return self.handle_poll_error(e),
        };

        let diff = diff_snapshots(&previous, &current);
        if diff.is_empty() {
            return Flow::Continue;
        }

        debug!(
            "Cycle found {} connected, {} removed",
            diff.appeared.len(),
            diff.disappeared.len()
        );

        for event in diff.into_events(SystemTime::now()) {
            if self.emit(MonitorEvent::Device(event)) == Flow::Shutdown {
                return Flow::Shutdown;
            }
        }

        Flow::Continue
    }

    fn take_snapshot(&mut self) -> common::Result<DeviceSnapshot> {
        let devices = self.provider.list_devices()?;
        Ok(DeviceSnapshot::from_devices(devices, self.options.identity))
    }

    /// Apply the configured enumeration error policy
    fn handle_poll_error(&mut self, error: common::Error) -> Flow {
        match self.options.on_error {
            ErrorPolicy::Skip => {
                warn!("Device enumeration failed, skipping cycle: {}", error);
                if self.emit(MonitorEvent::PollFailed {
                    error: error.to_string(),
                    halted: false,
                }) == Flow::Shutdown
                {
                    return Flow::Shutdown;
                }
                // Wait one delay before the next attempt
                match self.wait(self.options.delay) {
                    Flow::Shutdown => Flow::Shutdown,
                    _ => Flow::Continue,
                }
            }
            ErrorPolicy::Stop => {
                warn!("Device enumeration failed, stopping monitoring: {}", error);
                self.state = MonitorState::Idle;
                let flow = self.emit(MonitorEvent::PollFailed {
                    error: error.to_string(),
                    halted: true,
                });
                if flow == Flow::Shutdown {
                    return flow;
                }
                self.emit(MonitorEvent::Stopped {
                    reason: StopReason::PollError,
                })
            }
        }
    }

    /// Handle every queued command without blocking
    fn drain_commands(&mut self) -> Flow {
        let mut outcome = Flow::Continue;
        loop {
            match self.worker.try_recv_command() {
                Ok(Some(cmd)) => match self.handle_command(cmd) {
                    Flow::Shutdown => return Flow::Shutdown,
                    Flow::Restart => outcome = Flow::Restart,
                    Flow::Continue => {}
                },
                Ok(None) => return outcome,
                Err(e) => {
                    debug!("Command channel closed: {}", e);
                    return Flow::Shutdown;
                }
            }
        }
    }

    /// Sleep for `delay`, handling commands every [`WAIT_SLICE`]
    fn wait(&mut self, delay: Duration) -> Flow {
        let deadline = Instant::now() + delay;

        loop {
            match self.drain_commands() {
                Flow::Continue => {}
                other => return other,
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Flow::Continue;
            }
            std::thread::sleep(remaining.min(WAIT_SLICE));
        }
    }

    /// Send an event; a closed bridge means nobody is listening any more
    fn emit(&self, event: MonitorEvent) -> Flow {
        match self.worker.send_event(event) {
            Ok(()) => Flow::Continue,
            Err(e) => {
                debug!("Event channel closed: {}", e);
                Flow::Shutdown
            }
        }
    }
}

impl Flow {
    /// `other` unless this is Shutdown
    fn and(self, other: Flow) -> Flow {
        match self {
            Flow::Shutdown => Flow::Shutdown,
            _ => other,
        }
    }
}

/// Spawn the monitor worker thread backed by libusb
///
/// The provider is created on the new thread; a libusb initialisation
/// failure is returned through the join handle.
pub fn spawn_monitor_worker(
    worker: MonitorWorker,
    config: &MonitorConfig,
) -> std::io::Result<std::thread::JoinHandle<common::Result<()>>> {
    let filters = config.usb.filters.clone();
    let include_root_hubs = config.usb.include_root_hubs;
    let options = PollOptions::from_config(config);

    std::thread::Builder::new()
        .name("monitor-worker".to_string())
        .spawn(move || {
            let provider = RusbProvider::new(filters, include_root_hubs)?;
            MonitorWorkerThread::new(provider, worker, options).run()
        })
}
