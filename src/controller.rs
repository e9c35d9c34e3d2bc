// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Serialized hardware access for fan controller devices.
//!
//! Every device sits behind its own mutex. Each hardware call takes the
//! lock, connects, runs, and disconnects again, so no two channels on the
//! same bus ever talk to it at the same time and the lock is never held
//! across more than one write.

use crate::curve::{self, FanCurve, FanMode};
use crate::error::{Error, Result};
use crate::profile::ChannelProfile;
use crate::pwm_fan::PwmFan;
use crate::sensor::{Sensor, SensorRegistry};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

/// Default ramp step in percentage points.
pub const DEFAULT_STEP_PERCENT: u8 = 10;

/// Default pause between ramp steps.
pub const DEFAULT_STEP_INTERVAL: Duration = Duration::from_millis(25);

/// Lock a mutex, recovering the data if a panicking thread poisoned it.
pub(crate) fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Device capability
// ---------------------------------------------------------------------------

/// Low-level access to one physical fan controller.
///
/// Calls other than `connect` are only issued between a successful
/// `connect` and the matching `disconnect`.
pub trait Device: Send {
    fn name(&self) -> &str;

    /// Stable class name stored in profiles to match saved controllers.
    fn class(&self) -> &'static str;

    fn connect(&mut self) -> Result<()>;

    fn disconnect(&mut self) -> Result<()>;

    /// One-time setup after discovery.
    fn initialize(&mut self) -> Result<()> {
        Ok(())
    }

    fn detect_channels(&mut self) -> Result<Vec<String>>;

    fn read_rpm(&mut self, channel: &str) -> Result<u32>;

    /// Duty percentage currently applied, for devices that can report it.
    fn read_duty(&mut self, _channel: &str) -> Result<Option<u8>> {
        Ok(None)
    }

    /// Apply a duty percentage (0-100) to a channel.
    fn write_duty(&mut self, channel: &str, percent: u8) -> Result<()>;

    /// Hand the outputs back to the hardware's own control.
    fn release(&mut self) -> Result<()> {
        Ok(())
    }
}

/// A connected device. Disconnects when dropped, on every exit path.
struct BusSession<'a> {
    device: MutexGuard<'a, Box<dyn Device>>,
}

impl<'a> BusSession<'a> {
    fn open(bus: &'a Mutex<Box<dyn Device>>) -> Result<Self> {
        let mut device = lock(bus);
        if let Err(e) = device.connect() {
            if let Err(close_err) = device.disconnect() {
                log::debug!("Disconnect after failed connect also failed: {close_err}");
            }
            return Err(e);
        }
        Ok(Self { device })
    }

    fn device(&mut self) -> &mut dyn Device {
        &mut **self.device
    }
}

impl Drop for BusSession<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.device.disconnect() {
            log::warn!("Failed to disconnect from '{}': {e}", self.device.name());
        }
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// Stepping used when moving a channel to a new duty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RampSettings {
    pub step_percent: u8,
    pub step_interval: Duration,
}

impl Default for RampSettings {
    fn default() -> Self {
        Self {
            step_percent: DEFAULT_STEP_PERCENT,
            step_interval: DEFAULT_STEP_INTERVAL,
        }
    }
}

/// Snapshot of one channel for status queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelStatus {
    pub channel: String,
    pub valid: bool,
    pub mode: FanMode,
    pub pwm: u8,
    pub percent: u8,
    pub rpm: u32,
    pub temperature: f64,
}

/// A fan controller device and the PWM channels it exposes.
pub struct FanController {
    name: String,
    class: &'static str,
    bus: Mutex<Box<dyn Device>>,
    channels: Mutex<BTreeMap<String, PwmFan>>,
    valid: AtomicBool,
    ramp: RampSettings,
}

impl std::fmt::Debug for FanController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanController")
            .field("name", &self.name)
            .field("class", &self.class)
            .field("channels", &self.channel_ids())
            .field("valid", &self.is_valid())
            .finish()
    }
}

impl FanController {
    /// Initialise `device` and discover its channels. Every channel starts
    /// with the zero curve bound to `default_sensor`.
    pub fn probe(
        device: Box<dyn Device>,
        ramp: RampSettings,
        default_sensor: Arc<dyn Sensor>,
    ) -> Result<Self> {
        let controller = Self {
            name: device.name().to_string(),
            class: device.class(),
            bus: Mutex::new(device),
            channels: Mutex::new(BTreeMap::new()),
            valid: AtomicBool::new(false),
            ramp,
        };

        let detected = controller.with_bus(|device| {
            device.initialize()?;
            device.detect_channels()
        })?;
        log::info!(
            "Fan controller '{}' initialized with channels {detected:?}",
            controller.name
        );

        {
            let mut channels = lock(&controller.channels);
            for channel in detected {
                let fan = PwmFan::new(
                    channel.clone(),
                    FanCurve::zero_rpm_curve(),
                    Arc::clone(&default_sensor),
                );
                channels.insert(channel, fan);
            }
        }
        controller.valid.store(true, Ordering::SeqCst);
        Ok(controller)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn class(&self) -> &'static str {
        self.class
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::SeqCst)
    }

    /// Return the device to its own fan control. Callers park the channels
    /// first.
    pub fn release(&self) -> Result<()> {
        if !self.is_valid() {
            return Ok(());
        }
        self.with_bus(|device| device.release())?;
        log::info!("Fan controller '{}' returned to automatic control", self.name);
        Ok(())
    }

    /// Stop issuing hardware commands to this controller.
    pub fn close(&self) {
        if self.valid.swap(false, Ordering::SeqCst) {
            log::info!("Fan controller '{}' released", self.name);
        }
    }

    fn with_bus<T>(&self, f: impl FnOnce(&mut dyn Device) -> Result<T>) -> Result<T> {
        let mut session = BusSession::open(&self.bus)?;
        f(session.device())
    }

    // -----------------------------------------------------------------------
    // Channels
    // -----------------------------------------------------------------------

    /// Channel ids in stable (sorted) order.
    pub fn channel_ids(&self) -> Vec<String> {
        lock(&self.channels).keys().cloned().collect()
    }

    pub fn with_channel<R>(&self, channel: &str, f: impl FnOnce(&mut PwmFan) -> R) -> Result<R> {
        let mut channels = lock(&self.channels);
        let fan = channels
            .get_mut(channel)
            .ok_or_else(|| Error::ChannelNotFound(channel.to_string()))?;
        Ok(f(fan))
    }

    /// Bind every channel back to `sensor` with the zero curve.
    pub fn reset_channels(&self, sensor: Arc<dyn Sensor>) {
        for fan in lock(&self.channels).values_mut() {
            fan.temp_sensor = Arc::clone(&sensor);
            fan.fan_curve = FanCurve::zero_rpm_curve();
        }
    }

    /// Current RPM of a channel, 0 if it cannot be read.
    pub fn channel_speed(&self, channel: &str) -> u32 {
        if !self.is_valid() {
            return 0;
        }
        match self.with_bus(|device| device.read_rpm(channel)) {
            Ok(rpm) => rpm,
            Err(e) => {
                log::warn!("Problem getting speed for channel '{channel}': {e}");
                0
            }
        }
    }

    pub fn channel_status(&self, channel: &str) -> Result<ChannelStatus> {
        let (mode, pwm, percent, temperature) = self.with_channel(channel, |fan| {
            (
                fan.fan_curve.fan_mode(),
                fan.current_pwm(),
                fan.current_percent(),
                fan.last_temperature(),
            )
        })?;
        Ok(ChannelStatus {
            channel: channel.to_string(),
            valid: self.is_valid(),
            mode,
            pwm,
            percent,
            rpm: self.channel_speed(channel),
            temperature,
        })
    }

    // -----------------------------------------------------------------------
    // Speed control
    // -----------------------------------------------------------------------

    fn write_duty(&self, channel: &str, percent: u8) -> Result<()> {
        self.with_bus(|device| device.write_duty(channel, percent))
    }

    /// Move `channel` from `from_percent` to `target_percent` in steps.
    ///
    /// Intermediate writes move by the configured step in the direction of
    /// the target; a final write lands exactly on `target_percent`. Each
    /// write takes the bus lock on its own. The first failure abandons the
    /// ramp and returns `false`.
    pub fn set_channel_speed(
        &self,
        channel: &str,
        target_percent: u8,
        from_percent: u8,
        temperature: f64,
    ) -> bool {
        if !self.is_valid() {
            return false;
        }
        let target_percent = target_percent.min(curve::MAX_PERCENTAGE);
        log::info!(
            "Setting fan speed of channel '{channel}' from {from_percent}% to {target_percent}% \
             for temperature {temperature}°C"
        );

        let step = i16::from(self.ramp.step_percent.max(1));
        let from = i16::from(from_percent.min(curve::MAX_PERCENTAGE));
        let delta = i16::from(target_percent) - from;
        let direction = delta.signum();
        let steps = delta.abs() / step;

        let mut duty = from;
        for _ in 0..steps {
            duty += direction * step;
            if let Err(e) = self.write_duty(channel, duty as u8) {
                log::error!("Problem in setting speed for channel '{channel}' at {duty}%: {e}");
                return false;
            }
            if !self.ramp.step_interval.is_zero() {
                thread::sleep(self.ramp.step_interval);
            }
        }

        match self.write_duty(channel, target_percent) {
            Ok(()) => true,
            Err(e) => {
                log::error!(
                    "Problem in setting speed for channel '{channel}' to {target_percent}%: {e}"
                );
                false
            }
        }
    }

    /// Ramp one channel down to 0.
    pub fn stop_channel(&self, channel: &str) -> bool {
        let Ok(from) = self.with_channel(channel, |fan| fan.current_percent()) else {
            log::warn!("Cannot stop unknown channel '{channel}'");
            return false;
        };
        log::info!("Stopping channel '{channel}'");
        if !self.set_channel_speed(channel, 0, from, 0.0) {
            return false;
        }
        self.with_channel(channel, |fan| fan.set_current_pwm(0)).is_ok()
    }

    pub fn stop_all_channels(&self) {
        for channel in self.channel_ids() {
            if !self.stop_channel(&channel) {
                log::warn!("Channel '{channel}' of '{}' could not be stopped", self.name);
            }
        }
    }

    /// Evaluate every channel once and apply changed targets.
    ///
    /// Hardware failures only skip the affected channel; the tracked duty
    /// is committed after a successful write and left alone otherwise.
    pub fn update_channels(&self) -> Result<()> {
        if !self.is_valid() {
            return Ok(());
        }
        for channel in self.channel_ids() {
            let observed = match self.with_bus(|device| device.read_duty(&channel)) {
                Ok(duty) => duty,
                Err(e) => {
                    log::warn!("Could not read duty of channel '{channel}': {e}");
                    None
                }
            };

            let (update, from_percent) = self.with_channel(&channel, |fan| {
                let update = fan.update_pwm(observed);
                (update, fan.current_percent())
            })?;
            if !update.changed {
                continue;
            }

            if self.set_channel_speed(&channel, update.percent, from_percent, update.temperature) {
                self.with_channel(&channel, |fan| fan.set_current_pwm(update.pwm))?;
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Profiles
    // -----------------------------------------------------------------------

    /// Curve and sensor identity of every channel.
    pub fn channel_profiles(&self) -> BTreeMap<String, ChannelProfile> {
        lock(&self.channels)
            .iter()
            .map(|(channel, fan)| {
                let profile = ChannelProfile {
                    curve: fan.fan_curve.get_graph_points_from_curve(),
                    sensor: fan.temp_sensor.signature(),
                };
                (channel.clone(), profile)
            })
            .collect()
    }

    /// Rebind channels to saved sensors and curves.
    ///
    /// Channels missing from `saved`, and channels whose saved sensor is no
    /// longer present, are left untouched.
    pub fn apply_channel_profiles(
        &self,
        saved: &BTreeMap<String, ChannelProfile>,
        sensors: &SensorRegistry,
    ) {
        for (channel, fan) in lock(&self.channels).iter_mut() {
            let Some(config) = saved.get(channel) else {
                continue;
            };
            match sensors.find_by_signature(&config.sensor) {
                Some(sensor) => {
                    fan.temp_sensor = sensor;
                    fan.fan_curve.set_curve_from_graph_points(&config.curve);
                    log::debug!("Channel '{channel}' bound to sensor {}", config.sensor);
                }
                None => log::warn!(
                    "Sensor {} for channel '{channel}' not found, keeping current settings",
                    config.sensor
                ),
            }
        }
    }
}
