//! Append-only event log
//!
//! Writes one line per device event to a log file, either in the classic
//! text format (`2024-01-01 12:00:00 - Device Connected - Vendor ID: ...`)
//! or as JSON lines. Files are rotated by size when configured.

use crate::config::{EventLogConfig, LogFormat};
use crate::sink::EventSink;
use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use common::{DeviceEvent, EventKind};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Format a timestamp the way the event log prefixes lines
pub fn format_timestamp(timestamp: SystemTime) -> String {
    let local: DateTime<Local> = timestamp.into();
    local.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// A structured event log entry (JSON format)
#[derive(Debug, Clone, Serialize)]
pub struct EventLogEntry {
    pub timestamp: String,
    pub event: EventKind,
    pub vendor_id: u16,
    pub product_id: u16,
    pub serial_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    pub bus_number: u8,
    pub device_address: u8,
}

impl From<&DeviceEvent> for EventLogEntry {
    fn from(event: &DeviceEvent) -> Self {
        let identity = &event.identity;
        Self {
            timestamp: format_timestamp(event.timestamp),
            event: event.kind,
            vendor_id: identity.vendor_id,
            product_id: identity.product_id,
            serial_number: identity.serial_number.clone(),
            manufacturer: identity.manufacturer.clone(),
            product: identity.product.clone(),
            bus_number: identity.bus_number,
            device_address: identity.device_address,
        }
    }
}

/// Render one log line (without trailing newline)
pub fn format_line(event: &DeviceEvent, format: LogFormat) -> Result<String> {
    match format {
        LogFormat::Text => Ok(format!("{} - {}", format_timestamp(event.timestamp), event)),
        LogFormat::Json => serde_json::to_string(&EventLogEntry::from(event))
            .context("Failed to serialize event log entry"),
    }
}

/// Message sent to the background writer
enum LogMessage {
    Log(DeviceEvent),
    Shutdown,
}

/// Event logger that writes to a file in a background task
pub struct EventLogger {
    sender: mpsc::UnboundedSender<LogMessage>,
    task: JoinHandle<()>,
}

impl EventLogger {
    /// Create a new event logger
    ///
    /// Returns None if event logging is disabled. Must be called from within
    /// a Tokio runtime.
    pub fn new(config: EventLogConfig) -> Option<Self> {
        if !config.enabled {
            return None;
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        let writer = EventLogWriter::new(config);

        let task = tokio::spawn(async move {
            writer.run(receiver).await;
        });

        Some(Self { sender, task })
    }

    /// Sink that queues events for this logger
    pub fn handle(&self) -> EventLogHandle {
        EventLogHandle {
            sender: self.sender.clone(),
        }
    }

    /// Write out queued events and stop the background writer
    pub async fn close(self) {
        let _ = self.sender.send(LogMessage::Shutdown);
        if let Err(e) = self.task.await {
            error!("Event log writer task failed: {}", e);
        }
    }
}

/// Cloneable sink feeding an [`EventLogger`]
#[derive(Clone)]
pub struct EventLogHandle {
    sender: mpsc::UnboundedSender<LogMessage>,
}

impl EventSink for EventLogHandle {
    fn on_event(&mut self, event: &DeviceEvent) {
        if let Err(e) = self.sender.send(LogMessage::Log(event.clone())) {
            warn!("Failed to queue event log entry: {}", e);
        }
    }
}

/// File writer for event log lines
pub struct EventLogWriter {
    config: EventLogConfig,
    path: PathBuf,
    file: Option<BufWriter<File>>,
    current_file_size: u64,
    /// Rotate once the live file reaches this size
    max_bytes: Option<u64>,
}

impl EventLogWriter {
    pub fn new(config: EventLogConfig) -> Self {
        let path = config.resolved_path();
        let max_bytes = config.max_size_mb.map(|mb| mb as u64 * 1024 * 1024);
        Self {
            config,
            path,
            file: None,
            current_file_size: 0,
            max_bytes,
        }
    }

    /// Open or reopen the log file in append mode
    fn open_file(&mut self) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create event log directory: {:?}", parent))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open event log: {:?}", self.path))?;

        self.current_file_size = file.metadata().map(|m| m.len()).unwrap_or(0);
        self.file = Some(BufWriter::new(file));

        debug!("Opened event log: {:?}", self.path);
        Ok(())
    }

    /// Append one event
    pub fn write_event(&mut self, event: &DeviceEvent) -> Result<()> {
        if self.file.is_none() {
            self.open_file()?;
        }

        let line = format!("{}\n", format_line(event, self.config.format)?);

        if let Some(ref mut writer) = self.file {
            writer
                .write_all(line.as_bytes())
                .context("Failed to write event log entry")?;
            writer.flush().context("Failed to flush event log")?;
            self.current_file_size += line.len() as u64;
        }

        if self.should_rotate() {
            self.rotate()?;
        }

        Ok(())
    }

    fn should_rotate(&self) -> bool {
        match self.max_bytes {
            Some(max_bytes) => self.current_file_size >= max_bytes,
            None => false,
        }
    }

    /// Shift `log.N` to `log.N+1`, drop the oldest, move the live file to `log.1`
    fn rotate(&mut self) -> Result<()> {
        self.file = None;

        let max_files = self.config.max_files.unwrap_or(5);

        let oldest = Self::rotated_path(&self.path, max_files);
        if oldest.exists() {
            std::fs::remove_file(&oldest).ok();
        }
        for i in (1..max_files).rev() {
            let old_path = Self::rotated_path(&self.path, i);
            if old_path.exists() {
                std::fs::rename(&old_path, Self::rotated_path(&self.path, i + 1)).ok();
            }
        }

        if self.path.exists() {
            std::fs::rename(&self.path, Self::rotated_path(&self.path, 1)).ok();
        }

        debug!("Rotated event log: {:?}", self.path);
        self.open_file()
    }

    /// Get the path for a rotated log file
    fn rotated_path(base: &Path, index: u32) -> PathBuf {
        let file_name = base
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("usb_monitor.log");

        base.with_file_name(format!("{}.{}", file_name, index))
    }

    async fn run(mut self, mut receiver: mpsc::UnboundedReceiver<LogMessage>) {
        while let Some(message) = receiver.recv().await {
            match message {
                LogMessage::Log(event) => {
                    if let Err(e) = self.write_event(&event) {
                        error!("Failed to write event log entry: {:#}", e);
                    }
                }
                LogMessage::Shutdown => {
                    debug!("Event logger shutting down");
                    break;
                }
            }
        }

        if let Some(ref mut writer) = self.file {
            let _ = writer.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::{identity, identity_without_serial};

    fn config_for(path: PathBuf, format: LogFormat) -> EventLogConfig {
        EventLogConfig {
            enabled: true,
            path,
            format,
            max_size_mb: None,
            max_files: Some(3),
        }
    }

    fn connected(serial: &str) -> DeviceEvent {
        DeviceEvent::new(
            EventKind::Connected,
            identity(serial, 0x1234, 0x5678),
            SystemTime::now(),
        )
    }

    #[test]
    fn test_timestamp_format() {
        let stamp = format_timestamp(SystemTime::now());
        // YYYY-MM-DD HH:MM:SS
        assert_eq!(stamp.len(), 19);
        assert_eq!(&stamp[4..5], "-");
        assert_eq!(&stamp[10..11], " ");
        assert_eq!(&stamp[13..14], ":");
    }

    #[test]
    fn test_text_line_format() {
        let line = format_line(&connected("X1"), LogFormat::Text).unwrap();
        assert!(line.ends_with(
            " - Device Connected - Vendor ID: 4660, Product ID: 22136, Serial Number: X1"
        ));
    }

    #[test]
    fn test_json_line_format() {
        let event = DeviceEvent::new(
            EventKind::Removed,
            identity_without_serial(0xABCD, 0x0001, 2, 7),
            SystemTime::now(),
        );
        let line = format_line(&event, LogFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();

        assert_eq!(value["event"], "removed");
        assert_eq!(value["vendor_id"], 0xABCD);
        assert_eq!(value["serial_number"], serde_json::Value::Null);
        assert_eq!(value["bus_number"], 2);
        assert!(value.get("manufacturer").is_none());
    }

    #[test]
    fn test_writer_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("events.log");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "existing line\n").unwrap();

        let mut writer = EventLogWriter::new(config_for(path.clone(), LogFormat::Text));
        writer.write_event(&connected("A")).unwrap();
        writer.write_event(&connected("B")).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "existing line");
        assert!(lines[1].ends_with("Serial Number: A"));
        assert!(lines[2].ends_with("Serial Number: B"));
    }

    #[test]
    fn test_rotated_path() {
        let base = PathBuf::from("/var/log/usb_monitor.log");
        assert_eq!(
            EventLogWriter::rotated_path(&base, 1),
            PathBuf::from("/var/log/usb_monitor.log.1")
        );
        assert_eq!(
            EventLogWriter::rotated_path(&base, 3),
            PathBuf::from("/var/log/usb_monitor.log.3")
        );
    }

    #[test]
    fn test_rotation_moves_live_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.log");

        let mut writer = EventLogWriter::new(config_for(path.clone(), LogFormat::Text));
        writer.write_event(&connected("FIRST")).unwrap();
        writer.rotate().unwrap();
        writer.write_event(&connected("SECOND")).unwrap();

        let rotated = std::fs::read_to_string(EventLogWriter::rotated_path(&path, 1)).unwrap();
        let live = std::fs::read_to_string(&path).unwrap();
        assert!(rotated.contains("FIRST"));
        assert!(live.contains("SECOND"));
        assert!(!live.contains("FIRST"));
    }

    #[test]
    fn test_size_limit_rotates_and_prunes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.log");

        let mut config = config_for(path.clone(), LogFormat::Text);
        config.max_size_mb = Some(1);
        config.max_files = Some(2);
        let mut writer = EventLogWriter::new(config);
        assert_eq!(writer.max_bytes, Some(1024 * 1024));

        // Every line crosses the limit
        writer.max_bytes = Some(1);
        for serial in ["E00", "E01", "E02", "E03", "E04"] {
            writer.write_event(&connected(serial)).unwrap();
        }

        let first = std::fs::read_to_string(EventLogWriter::rotated_path(&path, 1)).unwrap();
        let second = std::fs::read_to_string(EventLogWriter::rotated_path(&path, 2)).unwrap();
        assert!(first.contains("Serial Number: E04"));
        assert!(second.contains("Serial Number: E03"));
        assert!(!EventLogWriter::rotated_path(&path, 3).exists());

        let live = std::fs::read_to_string(&path).unwrap();
        assert!(live.is_empty());
        for kept in [&first, &second] {
            assert!(!kept.contains("E00"));
            assert!(!kept.contains("E02"));
        }
    }

    #[tokio::test]
    async fn test_logger_writes_in_background() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.log");

        let logger = EventLogger::new(config_for(path.clone(), LogFormat::Text)).unwrap();
        let mut handle = logger.handle();
        handle.on_event(&connected("BG1"));
        handle.on_event(&connected("BG2"));
        logger.close().await;

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("Serial Number: BG1"));
        assert!(content.contains("Serial Number: BG2"));
    }

    #[tokio::test]
    async fn test_disabled_logger() {
        let mut config = config_for(PathBuf::from("unused.log"), LogFormat::Text);
        config.enabled = false;
        assert!(EventLogger::new(config).is_none());
    }
}
