//! Driver configuration management

use anyhow::{Context, Result, anyhow};
use common::{YUREX_PRODUCT_ID, YUREX_VENDOR_ID, is_yurex};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverConfig {
    pub driver: DriverSettings,
    #[serde(default)]
    pub usb: UsbSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverSettings {
    #[serde(default = "DriverSettings::default_log_level")]
    pub log_level: String,
    /// Prefix of published names, e.g. "misc/yurex"
    #[serde(default = "DriverSettings::default_name_prefix")]
    pub name_prefix: String,
    /// Maximum number of devices attached at once
    #[serde(default = "DriverSettings::default_max_devices")]
    pub max_devices: usize,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
            name_prefix: Self::default_name_prefix(),
            max_devices: Self::default_max_devices(),
        }
    }
}

impl DriverSettings {
    fn default_log_level() -> String {
        "info".to_string()
    }

    fn default_name_prefix() -> String {
        "misc/yurex".to_string()
    }

    fn default_max_devices() -> usize {
        16
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsbSettings {
    /// Further restricts the YUREX devices driven, as "VID:PID"
    /// ("0x0c45:0x1010", "0c45:*"); empty drives every YUREX
    #[serde(default = "UsbSettings::default_filters")]
    pub filters: Vec<String>,
    /// Timeout for command (SET_REPORT) transfers
    #[serde(default = "UsbSettings::default_control_timeout")]
    pub control_timeout_ms: u64,
    /// How long one interrupt read waits before checking for cancellation
    #[serde(default = "UsbSettings::default_interrupt_poll")]
    pub interrupt_poll_ms: u64,
}

impl Default for UsbSettings {
    fn default() -> Self {
        Self {
            filters: Self::default_filters(),
            control_timeout_ms: Self::default_control_timeout(),
            interrupt_poll_ms: Self::default_interrupt_poll(),
        }
    }
}

impl UsbSettings {
    fn default_filters() -> Vec<String> {
        vec![format!("{:#06x}:{:#06x}", YUREX_VENDOR_ID, YUREX_PRODUCT_ID)]
    }

    fn default_control_timeout() -> u64 {
        1000
    }

    fn default_interrupt_poll() -> u64 {
        100
    }

    pub fn control_timeout(&self) -> Duration {
        Duration::from_millis(self.control_timeout_ms)
    }

    pub fn interrupt_poll(&self) -> Duration {
        Duration::from_millis(self.interrupt_poll_ms)
    }

    /// True for a YUREX that the filters select
    pub fn allows(&self, vid: u16, pid: u16) -> bool {
        is_yurex(vid, pid) && check_filter(vid, pid, &self.filters)
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            driver: DriverSettings::default(),
            usb: UsbSettings::default(),
        }
    }
}

impl DriverConfig {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            p
        } else {
            // Try standard locations in order
            let candidates = vec![Self::default_path(), PathBuf::from("/etc/yurex/driver.toml")];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config = Self::from_toml(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Parse and validate a TOML document
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: DriverConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    ///
    /// The error behind a fallback is handed back for the caller to report,
    /// since this usually runs before logging is set up.
    pub fn load_or_default() -> (Self, Option<anyhow::Error>) {
        Self::with_fallback(Self::load(None))
    }

    /// Defaults in place of a failed load
    pub fn with_fallback(loaded: Result<Self>) -> (Self, Option<anyhow::Error>) {
        match loaded {
            Ok(config) => (config, None),
            Err(e) => (Self::default(), Some(e)),
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
            config_dir.join("yurex").join("driver.toml")
        } else {
            PathBuf::from(".config/yurex/driver.toml")
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.driver.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.driver.log_level,
                valid_levels.join(", ")
            ));
        }

        if self.driver.name_prefix.trim_matches('/').is_empty() {
            return Err(anyhow!("name_prefix must not be empty"));
        }

        if self.driver.max_devices == 0 {
            return Err(anyhow!("max_devices must be at least 1"));
        }

        if self.usb.interrupt_poll_ms == 0 || self.usb.control_timeout_ms == 0 {
            return Err(anyhow!("USB timeouts must be greater than 0"));
        }

        for filter in &self.usb.filters {
            Self::validate_filter(filter)?;
        }

        Ok(())
    }

    /// Validate a USB device filter pattern (VID:PID)
    fn validate_filter(filter: &str) -> Result<()> {
        let parts: Vec<&str> = filter.split(':').collect();
        if parts.len() != 2 {
            return Err(anyhow!(
                "Invalid filter format '{}', expected VID:PID (e.g., '0x0c45:0x1010' or '0x0c45:*')",
                filter
            ));
        }

        if parts[0] == "*" && parts[1] == "*" {
            return Err(anyhow!(
                "Filter '{}' matches every device, name a vendor or product",
                filter
            ));
        }

        Self::validate_hex_id(parts[0], "VID")?;
        Self::validate_hex_id(parts[1], "PID")?;
        Ok(())
    }

    fn validate_hex_id(id: &str, name: &str) -> Result<()> {
        if id == "*" {
            return Ok(());
        }

        let hex = id.trim_start_matches("0x");
        u16::from_str_radix(hex, 16)
            .map(|_| ())
            .map_err(|_| anyhow!("Invalid {} '{}', expected 16-bit hex or '*'", name, id))
    }

    /// Check whether a VID/PID pair is a YUREX selected by the filters
    pub fn matches(&self, vid: u16, pid: u16) -> bool {
        self.usb.allows(vid, pid)
    }
}

/// Check if a VID/PID pair is allowed by the filters
///
/// No filters allows every pair; the YUREX identity is checked separately.
fn check_filter(vid: u16, pid: u16, filters: &[String]) -> bool {
    if filters.is_empty() {
        return true;
    }

    filters.iter().any(|filter| {
        let Some((filter_vid, filter_pid)) = filter.split_once(':') else {
            return false;
        };
        id_matches(filter_vid, vid) && id_matches(filter_pid, pid)
    })
}

fn id_matches(pattern: &str, id: u16) -> bool {
    pattern == "*"
        || u16::from_str_radix(pattern.trim_start_matches("0x"), 16)
            .map(|v| v == id)
            .unwrap_or(false)
}
