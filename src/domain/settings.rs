use crate::domain::address::BoardAddress;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How often the log file rolls over
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    #[default]
    Daily,
    Hourly,
    Minutely,
    Never,
}

/// Log output options. Missing fields take their default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// `EnvFilter` directive, used when `RUST_LOG` is unset
    pub level: String,
    pub console_logging_enabled: bool,
    pub file_logging_enabled: bool,
    pub log_dir: String,
    pub file_name_prefix: String,
    pub rotation: LogRotation,
    pub show_file_line: bool,
    pub show_thread_ids: bool,
    pub show_target: bool,
    /// Console only; file output is always plain
    pub ansi_colors: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            console_logging_enabled: true,
            file_logging_enabled: true,
            log_dir: "logs".to_string(),
            file_name_prefix: "metawear_controller".to_string(),
            rotation: LogRotation::default(),
            show_file_line: true,
            show_thread_ids: false,
            show_target: true,
            ansi_colors: true,
        }
    }
}

/// Waits the board's BLE stack needs between dependent commands.
///
/// These come from observed firmware behaviour; shortening them makes
/// configuration and route binding fail intermittently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettleDelays {
    #[serde(default = "default_after_interval_change_ms")]
    pub after_interval_change_ms: u64,
    #[serde(default = "default_after_route_bind_ms")]
    pub after_route_bind_ms: u64,
    #[serde(default = "default_before_calibration_read_ms")]
    pub before_calibration_read_ms: u64,
    #[serde(default = "default_between_starts_ms")]
    pub between_starts_ms: u64,
    #[serde(default = "default_after_module_stop_ms")]
    pub after_module_stop_ms: u64,
}

impl Default for SettleDelays {
    fn default() -> Self {
        Self {
            after_interval_change_ms: default_after_interval_change_ms(),
            after_route_bind_ms: default_after_route_bind_ms(),
            before_calibration_read_ms: default_before_calibration_read_ms(),
            between_starts_ms: default_between_starts_ms(),
            after_module_stop_ms: default_after_module_stop_ms(),
        }
    }
}

impl SettleDelays {
    /// No waiting at all, for simulated transports
    pub fn none() -> Self {
        Self {
            after_interval_change_ms: 0,
            after_route_bind_ms: 0,
            before_calibration_read_ms: 0,
            between_starts_ms: 0,
            after_module_stop_ms: 0,
        }
    }

    pub fn after_interval_change(&self) -> Duration {
        Duration::from_millis(self.after_interval_change_ms)
    }

    pub fn after_route_bind(&self) -> Duration {
        Duration::from_millis(self.after_route_bind_ms)
    }

    pub fn before_calibration_read(&self) -> Duration {
        Duration::from_millis(self.before_calibration_read_ms)
    }

    pub fn between_starts(&self) -> Duration {
        Duration::from_millis(self.between_starts_ms)
    }

    pub fn after_module_stop(&self) -> Duration {
        Duration::from_millis(self.after_module_stop_ms)
    }
}

fn default_after_interval_change_ms() -> u64 {
    1500
}
fn default_after_route_bind_ms() -> u64 {
    1500
}
fn default_before_calibration_read_ms() -> u64 {
    500
}
fn default_between_starts_ms() -> u64 {
    500
}
fn default_after_module_stop_ms() -> u64 {
    500
}

/// BLE connection interval requested before streaming
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConnectionInterval {
    pub min_ms: f32,
    pub max_ms: f32,
}

impl Default for ConnectionInterval {
    fn default() -> Self {
        Self {
            min_ms: 7.5,
            max_ms: 7.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    // Logging Settings
    #[serde(default)]
    pub log_settings: LogSettings,

    // Connection Settings
    #[serde(default = "default_min_battery_level")]
    pub min_battery_level: u8,
    #[serde(default)]
    pub known_board_addresses: Vec<BoardAddress>,
    #[serde(default)]
    pub last_connected_address: Option<BoardAddress>,

    // Streaming Settings
    #[serde(default)]
    pub connection_interval: ConnectionInterval,
    #[serde(default)]
    pub settle_delays: SettleDelays,
    #[serde(default = "default_true")]
    pub check_calibration: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_settings: LogSettings::default(),
            min_battery_level: default_min_battery_level(),
            known_board_addresses: Vec::new(),
            last_connected_address: None,
            connection_interval: ConnectionInterval::default(),
            settle_delays: SettleDelays::default(),
            check_calibration: true,
        }
    }
}

fn default_min_battery_level() -> u8 {
    20
}

fn default_true() -> bool {
    true
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::with_path(settings_path))
    }

    /// Load settings from an explicit file, falling back to defaults
    pub fn with_path(settings_path: PathBuf) -> Self {
        let settings = Self::load_from_file(&settings_path).unwrap_or_default();
        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("MetaWearController");
        fs::create_dir_all(&path)?;
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    pub fn add_known_address(&mut self, address: BoardAddress) -> anyhow::Result<()> {
        if !self.settings.known_board_addresses.contains(&address) {
            self.settings.known_board_addresses.push(address);
            self.save()?;
        }
        Ok(())
    }

    pub fn set_last_connected(&mut self, address: BoardAddress) -> anyhow::Result<()> {
        self.settings.last_connected_address = Some(address);
        self.save()
    }
}
