use crate::domain::input::{ButtonMap, SpeedBand};
use crate::infrastructure::bluetooth::protocol::{self, Color};
use crate::infrastructure::bluetooth::session::SessionConfig;
use crate::infrastructure::bluetooth::telemetry;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_false")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_true")]
    pub show_file_line: bool,
    #[serde(default = "default_false")]
    pub show_thread_ids: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_false(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_true(),
            show_thread_ids: default_false(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "ollie_remote".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

/// Radio and wake-sequence settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkSettings {
    /// Advertised name prefix of the robot ("2B-" for Ollie)
    pub device_name_prefix: String,
    pub scan_timeout_ms: u64,
    pub tx_power: u8,
    pub subscribe_telemetry: bool,
    pub min_voltage: f32,
    pub max_voltage: f32,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            device_name_prefix: "2B-".to_string(),
            scan_timeout_ms: 15_000,
            tx_power: protocol::DEFAULT_TX_POWER,
            subscribe_telemetry: true,
            min_voltage: telemetry::DEFAULT_MIN_VOLTAGE,
            max_voltage: telemetry::DEFAULT_MAX_VOLTAGE,
        }
    }
}

/// Stick handling, speed limits and button timing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriveSettings {
    pub deadzone: f32,
    pub speed_bands: Vec<SpeedBand>,
    /// Analog buttons count as pressed above this value
    pub analog_threshold: f32,
    pub debounce_ms: u64,
    pub stop_watchdog_ms: u64,
    pub min_speed_fraction: f32,
    pub speed_step: f32,
    pub normal_cap: f32,
    pub expert_cap: f32,
    /// Starting colour, scaled by the speed fraction on the robot
    pub color: Color,
}

impl Default for DriveSettings {
    fn default() -> Self {
        Self {
            deadzone: 0.15,
            speed_bands: vec![
                SpeedBand::new(0.2, 85),
                SpeedBand::new(0.65, 170),
                SpeedBand::new(0.9, 255),
            ],
            analog_threshold: 0.5,
            debounce_ms: 50,
            stop_watchdog_ms: 250,
            min_speed_fraction: 0.1,
            speed_step: 0.1,
            normal_cap: 0.6,
            expert_cap: 1.0,
            color: Color::new(0, 191, 255),
        }
    }
}

/// Hold-to-aim gesture
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AimSettings {
    pub hold_ms: u64,
    pub spin_power: u8,
    /// Degrees per second at full stick deflection
    pub turn_rate: f32,
    pub back_led_brightness: u8,
}

impl Default for AimSettings {
    fn default() -> Self {
        Self {
            hold_ms: 2_000,
            spin_power: 60,
            turn_rate: 120.0,
            back_led_brightness: 255,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub log_settings: LogSettings,
    #[serde(default)]
    pub link: LinkSettings,
    #[serde(default)]
    pub drive: DriveSettings,
    #[serde(default)]
    pub aim: AimSettings,
    #[serde(default)]
    pub buttons: ButtonMap,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_false")]
    pub auto_reconnect: bool,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_settings: LogSettings::default(),
            link: LinkSettings::default(),
            drive: DriveSettings::default(),
            aim: AimSettings::default(),
            buttons: ButtonMap::default(),
            poll_interval_ms: default_poll_interval_ms(),
            auto_reconnect: false,
            reconnect_delay_ms: default_reconnect_delay_ms(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    16
}
fn default_reconnect_delay_ms() -> u64 {
    2000
}

impl Settings {
    /// Reject values the control loop cannot work with
    pub fn validate(&self) -> anyhow::Result<()> {
        let drive = &self.drive;
        if !(0.0..1.0).contains(&drive.deadzone) {
            anyhow::bail!("deadzone must be in [0, 1), got {}", drive.deadzone);
        }
        if drive.speed_bands.is_empty() {
            anyhow::bail!("at least one speed band is required");
        }
        if drive
            .speed_bands
            .windows(2)
            .any(|w| w[0].threshold >= w[1].threshold)
        {
            anyhow::bail!("speed band thresholds must be strictly increasing");
        }
        if drive.min_speed_fraction <= 0.0
            || drive.min_speed_fraction > drive.normal_cap.min(drive.expert_cap)
        {
            anyhow::bail!("speed caps must not be below the minimum speed fraction");
        }
        if drive.normal_cap > 1.0 || drive.expert_cap > 1.0 {
            anyhow::bail!("speed caps must not exceed 1.0");
        }
        if self.link.min_voltage >= self.link.max_voltage {
            anyhow::bail!(
                "min_voltage ({}) must be below max_voltage ({})",
                self.link.min_voltage,
                self.link.max_voltage
            );
        }
        if self.poll_interval_ms == 0 {
            anyhow::bail!("poll_interval_ms must be positive");
        }
        Ok(())
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            tx_power: self.link.tx_power,
            subscribe_telemetry: self.link.subscribe_telemetry,
            sop2: protocol::SOP2_DEFAULT,
            min_voltage: self.link.min_voltage,
            max_voltage: self.link.max_voltage,
        }
    }
}

/// Read-only settings loader; nothing is ever written back
pub struct SettingsService {
    settings: Settings,
    settings_path: Option<PathBuf>,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path();
        let settings = match &settings_path {
            Some(path) if path.exists() => Self::load_from_file(path)?,
            _ => Settings::default(),
        };
        settings.validate()?;

        Ok(Self {
            settings,
            settings_path,
        })
    }

    fn get_settings_path() -> Option<PathBuf> {
        let mut path = dirs::config_dir()?;
        path.push("OllieRemote");
        path.push("settings.json");
        Some(path)
    }

    pub fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn path(&self) -> Option<&Path> {
        self.settings_path.as_deref()
    }
}
