// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Configuration file handling.
//!
//! Daemon settings live in `config.toml` inside the settings directory:
//! `/etc/curvefan` when running as root, the user's config directory
//! otherwise. Profiles are kept in a `profiles` directory next to it.

use crate::controller::{self, RampSettings};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const APP_NAME: &str = "curvefan";

/// Settings directory used when running as root.
pub const SYSTEM_SETTINGS_DIR: &str = "/etc/curvefan";

pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Default control socket when running as root.
pub const SYSTEM_SOCKET_PATH: &str = "/run/curvefan.sock";

/// Default seconds between control loop ticks.
pub const DEFAULT_INTERVAL_SECS: f64 = 10.0;

pub const DEFAULT_LOG_LEVEL: &str = "info";

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,

    #[serde(default)]
    pub ramp: RampConfig,
}

/// Daemon-specific settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Seconds between control loop ticks.
    pub interval: f64,

    /// Start the control loop as soon as the daemon is up.
    pub auto_start: bool,

    /// Profile applied at startup, if any.
    pub profile_file: Option<PathBuf>,

    /// Path for the Unix domain socket.
    pub socket_path: PathBuf,

    /// `env_logger` filter used when `RUST_LOG` is not set.
    pub log_level: String,

    /// Root of the hwmon sysfs tree.
    pub hwmon_root: PathBuf,

    /// Directory holding saved `.cfp` profiles.
    pub profiles_dir: PathBuf,

    /// Hand the fans back to automatic control on shutdown.
    pub restore_on_exit: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL_SECS,
            auto_start: false,
            profile_file: None,
            socket_path: default_socket_path(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            hwmon_root: PathBuf::from(crate::hwmon::HWMON_ROOT),
            profiles_dir: settings_dir().join("profiles"),
            restore_on_exit: true,
        }
    }
}

impl DaemonConfig {
    /// The tick interval, rejected if out of range.
    pub fn interval(&self) -> crate::Result<Duration> {
        crate::manager::interval_from_secs(self.interval)
    }
}

/// How duty changes are stepped on the hardware.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RampConfig {
    /// Percentage points per intermediate write.
    pub step_percent: u8,

    /// Pause after each intermediate write, in milliseconds.
    pub step_interval_ms: u64,
}

impl Default for RampConfig {
    fn default() -> Self {
        Self {
            step_percent: controller::DEFAULT_STEP_PERCENT,
            step_interval_ms: controller::DEFAULT_STEP_INTERVAL.as_millis() as u64,
        }
    }
}

impl RampConfig {
    pub fn settings(&self) -> RampSettings {
        RampSettings {
            step_percent: self.step_percent.max(1),
            step_interval: Duration::from_millis(self.step_interval_ms),
        }
    }
}

// ---------------------------------------------------------------------------
// Locations
// ---------------------------------------------------------------------------

fn is_root() -> bool {
    nix::unistd::geteuid().is_root()
}

/// Directory holding `config.toml` and the profiles directory.
pub fn settings_dir() -> PathBuf {
    if is_root() {
        return PathBuf::from(SYSTEM_SETTINGS_DIR);
    }
    dirs::config_dir()
        .map(|dir| dir.join(APP_NAME))
        .unwrap_or_else(|| PathBuf::from(SYSTEM_SETTINGS_DIR))
}

fn default_socket_path() -> PathBuf {
    if is_root() {
        return PathBuf::from(SYSTEM_SOCKET_PATH);
    }
    dirs::runtime_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(format!("{APP_NAME}.sock"))
}

/// Resolve the config file path from CLI arg or default.
pub fn resolve_config_path(cli_path: Option<&Path>) -> PathBuf {
    cli_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| settings_dir().join(CONFIG_FILE_NAME))
}

// ---------------------------------------------------------------------------
// Load / Save
// ---------------------------------------------------------------------------

/// Load config from a TOML file, or return the default if the file doesn't exist.
pub fn load_config(path: &Path) -> io::Result<Config> {
    if !path.exists() {
        log::info!("No config file at {}, using defaults", path.display());
        return Ok(Config::default());
    }

    let contents = fs::read_to_string(path)?;
    let config: Config = toml::from_str(&contents).map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Failed to parse config: {e}"),
        )
    })?;

    log::info!("Loaded config from {}", path.display());
    Ok(config)
}

/// Save config to a TOML file, creating parent directories if needed.
pub fn save_config(path: &Path, config: &Config) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let contents = toml::to_string_pretty(config).map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Failed to serialize config: {e}"),
        )
    })?;

    fs::write(path, contents)?;
    log::info!("Saved config to {}", path.display());
    Ok(())
}
