//! Monitor configuration management

use anyhow::{Context, Result, anyhow};
use common::IdentityPolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default)]
    pub monitor: MonitorSettings,
    #[serde(default)]
    pub poll: PollSettings,
    #[serde(default)]
    pub usb: UsbSettings,
    /// Event log file configuration
    #[serde(default)]
    pub event_log: EventLogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorSettings {
    pub log_level: String,
    /// Run without the terminal UI and start monitoring immediately
    #[serde(default)]
    pub headless: bool,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            headless: false,
        }
    }
}

/// What the poll loop does when device enumeration fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    /// Report the failure and try again next cycle
    #[default]
    Skip,
    /// Report the failure and return to idle
    Stop,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollSettings {
    /// Delay between the two snapshots of a cycle, in milliseconds
    #[serde(default = "PollSettings::default_delay_ms")]
    pub delay_ms: u64,
    #[serde(default)]
    pub on_error: ErrorPolicy,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            delay_ms: Self::default_delay_ms(),
            on_error: ErrorPolicy::default(),
        }
    }
}

impl PollSettings {
    fn default_delay_ms() -> u64 {
        1000
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsbSettings {
    /// VID:PID patterns; empty means every device is monitored
    #[serde(default)]
    pub filters: Vec<String>,
    /// Include root hubs (VID 0x1d6b, class 9) in snapshots
    #[serde(default = "UsbSettings::default_include_root_hubs")]
    pub include_root_hubs: bool,
    /// How devices are matched between snapshots
    #[serde(default)]
    pub identity: IdentityPolicy,
}

impl Default for UsbSettings {
    fn default() -> Self {
        Self {
            filters: Vec::new(),
            include_root_hubs: Self::default_include_root_hubs(),
            identity: IdentityPolicy::default(),
        }
    }
}

impl UsbSettings {
    fn default_include_root_hubs() -> bool {
        true
    }
}

/// Event log line format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// `<timestamp> - <kind> - Vendor ID: ..., Product ID: ..., Serial Number: ...`
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// Event log configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogConfig {
    #[serde(default = "EventLogConfig::default_enabled")]
    pub enabled: bool,
    /// Path to the event log file (`~` is expanded)
    #[serde(default = "EventLogConfig::default_path")]
    pub path: PathBuf,
    #[serde(default)]
    pub format: LogFormat,
    /// Maximum log file size in MB before rotation
    #[serde(default)]
    pub max_size_mb: Option<u32>,
    /// Maximum number of rotated files to keep
    #[serde(default)]
    pub max_files: Option<u32>,
}

impl Default for EventLogConfig {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            path: Self::default_path(),
            format: LogFormat::default(),
            max_size_mb: None,
            max_files: Some(5),
        }
    }
}

impl EventLogConfig {
    fn default_enabled() -> bool {
        true
    }

    fn default_path() -> PathBuf {
        PathBuf::from("usb_monitor.log")
    }

    /// Path with `~` expanded
    pub fn resolved_path(&self) -> PathBuf {
        let raw = self.path.to_string_lossy();
        PathBuf::from(shellexpand::tilde(&raw).as_ref())
    }
}

impl MonitorConfig {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            PathBuf::from(shellexpand::tilde(&p.to_string_lossy()).as_ref())
        } else {
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/usb-monitor/monitor.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config = Self::parse(&content)
            .with_context(|| format!("Invalid config file: {}", config_path.display()))?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Parse and validate a TOML document
    pub fn parse(content: &str) -> Result<Self> {
        let config: MonitorConfig =
            toml::from_str(content).context("Failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::debug!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("usb-monitor").join("monitor.toml")
        } else {
            PathBuf::from(".config/usb-monitor/monitor.toml")
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.monitor.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.monitor.log_level,
                valid_levels.join(", ")
            ));
        }

        if self.poll.delay_ms == 0 {
            return Err(anyhow!("poll.delay_ms must be greater than 0"));
        }

        for filter in &self.usb.filters {
            Self::validate_filter(filter)?;
        }

        if self.event_log.enabled && self.event_log.path.as_os_str().is_empty() {
            return Err(anyhow!("event_log.path must not be empty"));
        }

        if self.event_log.max_files == Some(0) {
            return Err(anyhow!("event_log.max_files must be at least 1"));
        }

        Ok(())
    }

    /// Validate a USB device filter pattern (VID:PID)
    fn validate_filter(filter: &str) -> Result<()> {
        let parts: Vec<&str> = filter.split(':').collect();
        if parts.len() != 2 {
            return Err(anyhow!(
                "Invalid filter format '{}', expected VID:PID (e.g., '0x1234:0x5678' or '0x1234:*')",
                filter
            ));
        }

        let (vid, pid) = (parts[0], parts[1]);

        if vid != "*" {
            Self::validate_hex_id(vid, "VID")?;
        }

        if pid != "*" {
            Self::validate_hex_id(pid, "PID")?;
        }

        Ok(())
    }

    /// Validate a hex ID (VID or PID)
    fn validate_hex_id(id: &str, name: &str) -> Result<()> {
        if !id.starts_with("0x") && !id.starts_with("0X") {
            return Err(anyhow!(
                "Invalid {} '{}', must start with '0x' (e.g., '0x1234')",
                name,
                id
            ));
        }

        let hex_part = &id[2..];
        if hex_part.is_empty() || hex_part.len() > 4 {
            return Err(anyhow!(
                "Invalid {} '{}', hex part must be 1-4 digits",
                name,
                id
            ));
        }

        u16::from_str_radix(hex_part, 16)
            .map_err(|_| anyhow!("Invalid {} '{}', not a valid hex number", name, id))?;

        Ok(())
    }
}
