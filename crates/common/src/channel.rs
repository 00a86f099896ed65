//! Async channel bridge between the Tokio runtime and the monitor thread

use crate::usb_types::{DeviceEvent, DeviceIdentity};
use async_channel::{Receiver, Sender, TryRecvError, bounded};

/// Pending reply to a [`MonitorCommand::ListDevices`] request
pub type DeviceListReceiver = tokio::sync::oneshot::Receiver<crate::Result<Vec<DeviceIdentity>>>;

/// Commands from the control surface to the monitor thread
#[derive(Debug)]
pub enum MonitorCommand {
    /// Begin polling (Idle -> Monitoring)
    Start,

    /// Stop polling (Monitoring -> Idle)
    Stop,

    /// Enumerate connected devices once, with descriptor strings
    ListDevices {
        /// Channel to send response back
        response: tokio::sync::oneshot::Sender<crate::Result<Vec<DeviceIdentity>>>,
    },

    /// Shutdown the monitor thread gracefully
    Shutdown,
}

/// Why monitoring ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// A stop command was received
    Requested,
    /// Enumeration failed and the configured policy halts monitoring
    PollError,
    /// The monitor thread is shutting down
    Shutdown,
}

/// Events from the monitor thread
#[derive(Debug, Clone)]
pub enum MonitorEvent {
    /// Monitoring started
    Started,

    /// Monitoring stopped
    Stopped {
        reason: StopReason,
    },

    /// A device was connected or removed
    Device(DeviceEvent),

    /// A poll cycle failed to enumerate devices
    PollFailed {
        /// Error description
        error: String,
        /// Whether monitoring was halted because of it
        halted: bool,
    },
}

/// Handle for Tokio runtime (async)
#[derive(Clone)]
pub struct MonitorBridge {
    cmd_tx: Sender<MonitorCommand>,
    event_rx: Receiver<MonitorEvent>,
}

impl MonitorBridge {
    /// Send a command to the monitor thread
    pub async fn send_command(&self, cmd: MonitorCommand) -> crate::Result<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Receive an event from the monitor thread
    pub async fn recv_event(&self) -> crate::Result<MonitorEvent> {
        self.event_rx
            .recv()
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Ask the monitor thread for the connected devices
    pub async fn list_devices(&self) -> crate::Result<Vec<DeviceIdentity>> {
        let rx = self.request_devices().await?;
        rx.await
            .map_err(|e| crate::Error::Channel(e.to_string()))?
    }

    /// Queue a device listing without waiting for the enumeration
    ///
    /// The returned receiver resolves once the monitor thread has answered.
    pub async fn request_devices(&self) -> crate::Result<DeviceListReceiver> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.send_command(MonitorCommand::ListDevices { response: tx })
            .await?;
        Ok(rx)
    }
}

/// Handle for the monitor thread (blocking)
pub struct MonitorWorker {
    cmd_rx: Receiver<MonitorCommand>,
    event_tx: Sender<MonitorEvent>,
}

impl MonitorWorker {
    /// Receive a command (blocking)
    pub fn recv_command(&self) -> crate::Result<MonitorCommand> {
        self.cmd_rx
            .recv_blocking()
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Try to receive a command without blocking
    ///
    /// Returns an error once every bridge handle has been dropped.
    pub fn try_recv_command(&self) -> crate::Result<Option<MonitorCommand>> {
        match self.cmd_rx.try_recv() {
            Ok(cmd) => Ok(Some(cmd)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(e @ TryRecvError::Closed) => Err(crate::Error::Channel(e.to_string())),
        }
    }

    /// Send an event to Tokio runtime (blocking)
    pub fn send_event(&self, event: MonitorEvent) -> crate::Result<()> {
        self.event_tx
            .send_blocking(event)
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }
}

/// Create the channel bridge between Tokio and the monitor thread
///
/// Returns (MonitorBridge for Tokio, MonitorWorker for the monitor thread)
pub fn create_monitor_bridge() -> (MonitorBridge, MonitorWorker) {
    let (cmd_tx, cmd_rx) = bounded(64);
    let (event_tx, event_rx) = bounded(256);

    (
        MonitorBridge { cmd_tx, event_rx },
        MonitorWorker { cmd_rx, event_tx },
    )
}
