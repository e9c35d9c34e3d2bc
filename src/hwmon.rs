// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! hwmon sysfs discovery and control.
//!
//! Scans an hwmon root (normally `/sys/class/hwmon/`) for temperature
//! inputs and PWM outputs. Every hwmon directory exposing `pwmN` files
//! becomes one [`HwmonDevice`]; every `tempN_input` becomes one
//! [`HwmonSensor`].

use crate::controller::Device;
use crate::curve;
use crate::error::{Error, Result};
use crate::sensor::{Sensor, Signature};
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const HWMON_ROOT: &str = "/sys/class/hwmon";

const MAX_PWM_CHANNELS: u32 = 16;
const MAX_TEMP_INPUTS: u32 = 32;

/// Readings outside this band are treated as glitches once a first
/// reading has been accepted.
const PLAUSIBLE_TEMP_C: (f64, f64) = (10.0, 99.0);

/// `pwmN_enable` value for manual control.
const PWM_ENABLE_MANUAL: &str = "1";

/// `pwmN_enable` value handing the output back to the chip's automatic mode.
const PWM_ENABLE_AUTO: &str = "2";

// ---------------------------------------------------------------------------
// Temperature sensors
// ---------------------------------------------------------------------------

/// A `tempN_input` file.
#[derive(Debug)]
pub struct HwmonSensor {
    chip: String,
    folder: PathBuf,
    feature: String,
    label: String,
    input_path: PathBuf,
    current: Mutex<f64>,
}

impl HwmonSensor {
    pub fn new(chip: &str, folder: &Path, feature: &str, label: Option<String>) -> Self {
        Self {
            chip: chip.to_string(),
            folder: folder.to_path_buf(),
            feature: feature.to_string(),
            label: label.unwrap_or_else(|| format!("{chip}_{feature}")),
            input_path: folder.join(format!("{feature}_input")),
            current: Mutex::new(0.0),
        }
    }

    fn read_input(&self) -> Result<f64> {
        let raw = read_trimmed(&self.input_path).ok_or_else(|| {
            Error::hardware(&self.label, format!("cannot read {}", self.input_path.display()))
        })?;
        let millic: i64 = raw
            .parse()
            .map_err(|_| Error::hardware(&self.label, format!("invalid sensor data '{raw}'")))?;
        Ok(millic as f64 / 1000.0)
    }

    /// Accept `value` unless it is implausible compared to the reading we hold.
    fn accept(&self, current: f64, value: f64) -> Result<f64> {
        let (low, high) = PLAUSIBLE_TEMP_C;
        if current == 0.0 || (low < value && value < high) {
            Ok(value)
        } else {
            Err(Error::InvalidSensorReading {
                sensor: self.label.clone(),
                value,
            })
        }
    }
}

impl Sensor for HwmonSensor {
    fn name(&self) -> &str {
        &self.label
    }

    fn temperature(&self) -> f64 {
        let mut current = crate::controller::lock(&self.current);
        match self.read_input().and_then(|value| self.accept(*current, value)) {
            Ok(value) => {
                log::debug!("Sensor '{}' reads {value}°C", self.label);
                *current = value;
            }
            Err(e) => log::warn!("{e}, keeping {}°C", *current),
        }
        *current
    }

    fn signature(&self) -> Signature {
        Signature::new([
            "HwmonSensor".to_string(),
            self.chip.clone(),
            self.folder.display().to_string(),
            self.feature.clone(),
            self.label.clone(),
        ])
    }
}

/// Scan `root` and return all temperature inputs, sorted by path.
pub fn discover_temp_sensors(root: &Path) -> io::Result<Vec<HwmonSensor>> {
    let mut sensors = Vec::new();

    for hwmon_dir in hwmon_dirs(root)? {
        let chip = read_trimmed(&hwmon_dir.join("name")).unwrap_or_default();

        for n in 1..=MAX_TEMP_INPUTS {
            let feature = format!("temp{n}");
            if !hwmon_dir.join(format!("{feature}_input")).exists() {
                break;
            }
            let label = read_trimmed(&hwmon_dir.join(format!("{feature}_label")));
            log::debug!("Adding feature {feature} of chip '{chip}' at {}", hwmon_dir.display());
            sensors.push(HwmonSensor::new(&chip, &hwmon_dir, &feature, label));
        }
    }

    Ok(sensors)
}

// ---------------------------------------------------------------------------
// PWM devices
// ---------------------------------------------------------------------------

/// An hwmon chip with one or more `pwmN` outputs.
#[derive(Debug)]
pub struct HwmonDevice {
    name: String,
    dir: PathBuf,
    connected: bool,
    /// Outputs switched to manual mode by this device.
    claimed: BTreeSet<u32>,
}

impl HwmonDevice {
    pub fn new(dir: &Path) -> Self {
        let chip = read_trimmed(&dir.join("name")).unwrap_or_default();
        let basename = dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        Self {
            name: format!("{chip} ({basename})"),
            dir: dir.to_path_buf(),
            connected: false,
            claimed: BTreeSet::new(),
        }
    }

    fn channel_index(&self, channel: &str) -> Result<u32> {
        channel
            .strip_prefix("pwm")
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| Error::ChannelNotFound(channel.to_string()))
    }

    fn io_err(&self, e: io::Error) -> Error {
        Error::hardware(&self.name, e)
    }

    fn set_enable(&self, n: u32, value: &str) -> Result<()> {
        let enable = self.dir.join(format!("pwm{n}_enable"));
        if enable.exists() {
            fs::write(&enable, value).map_err(|e| self.io_err(e))?;
        }
        Ok(())
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.connected {
            Ok(())
        } else {
            Err(Error::hardware(&self.name, "not connected"))
        }
    }
}

impl Device for HwmonDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn class(&self) -> &'static str {
        "HwmonController"
    }

    fn connect(&mut self) -> Result<()> {
        if !self.dir.is_dir() {
            return Err(Error::hardware(
                &self.name,
                format!("{} is gone", self.dir.display()),
            ));
        }
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        self.connected = false;
        Ok(())
    }

    /// Return every output this device took over to automatic control.
    fn release(&mut self) -> Result<()> {
        self.ensure_connected()?;
        let claimed = std::mem::take(&mut self.claimed);
        for n in claimed {
            self.set_enable(n, PWM_ENABLE_AUTO)?;
            log::info!("'{}': pwm{n} returned to automatic control", self.name);
        }
        Ok(())
    }

    fn detect_channels(&mut self) -> Result<Vec<String>> {
        self.ensure_connected()?;
        Ok((1..=MAX_PWM_CHANNELS)
            .take_while(|n| self.dir.join(format!("pwm{n}")).exists())
            .map(|n| format!("pwm{n}"))
            .collect())
    }

    fn read_rpm(&mut self, channel: &str) -> Result<u32> {
        self.ensure_connected()?;
        let n = self.channel_index(channel)?;
        let path = self.dir.join(format!("fan{n}_input"));
        if !path.exists() {
            return Ok(0);
        }
        let raw = fs::read_to_string(&path).map_err(|e| self.io_err(e))?;
        raw.trim()
            .parse()
            .map_err(|_| Error::hardware(&self.name, format!("invalid RPM '{}'", raw.trim())))
    }

    fn read_duty(&mut self, channel: &str) -> Result<Option<u8>> {
        self.ensure_connected()?;
        let n = self.channel_index(channel)?;
        let raw = fs::read_to_string(self.dir.join(format!("pwm{n}"))).map_err(|e| self.io_err(e))?;
        let pwm: u8 = raw
            .trim()
            .parse()
            .map_err(|_| Error::hardware(&self.name, format!("invalid PWM '{}'", raw.trim())))?;
        Ok(Some(curve::pwm_to_percentage(pwm)))
    }

    fn write_duty(&mut self, channel: &str, percent: u8) -> Result<()> {
        self.ensure_connected()?;
        let n = self.channel_index(channel)?;
        if !self.claimed.contains(&n) {
            self.set_enable(n, PWM_ENABLE_MANUAL)?;
            self.claimed.insert(n);
        }
        let pwm = curve::percentage_to_pwm(percent);
        fs::write(self.dir.join(format!("pwm{n}")), format!("{pwm}")).map_err(|e| self.io_err(e))
    }
}

/// Scan `root` and return one device per hwmon directory with PWM outputs.
pub fn discover_devices(root: &Path) -> io::Result<Vec<HwmonDevice>> {
    let devices: Vec<HwmonDevice> = hwmon_dirs(root)?
        .into_iter()
        .filter(|dir| dir.join("pwm1").exists())
        .map(|dir| HwmonDevice::new(&dir))
        .collect();
    for device in &devices {
        log::info!("Fan controller '{}' found", device.name);
    }
    Ok(devices)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn hwmon_dirs(root: &Path) -> io::Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(root)? {
        dirs.push(entry?.path());
    }
    dirs.sort();
    Ok(dirs)
}

fn read_trimmed(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}
