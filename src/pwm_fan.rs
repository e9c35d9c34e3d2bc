// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Per-channel fan state and target duty computation.

use crate::curve::{self, FanCurve, FanMode};
use crate::error::Error;
use crate::sensor::Sensor;
use std::sync::Arc;

/// Outcome of one [`PwmFan::update_pwm`] evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PwmUpdate {
    /// Whether `pwm` differs from the duty currently tracked for the fan.
    pub changed: bool,
    pub pwm: u8,
    pub percent: u8,
    /// Temperature the target was computed from.
    pub temperature: f64,
}

/// A single PWM fan channel: its curve, its sensor and the last duty
/// confirmed written to hardware.
#[derive(Debug, Clone)]
pub struct PwmFan {
    name: String,
    pub fan_curve: FanCurve,
    pub temp_sensor: Arc<dyn Sensor>,
    current_pwm: u8,
    temperature: f64,
}

impl PwmFan {
    pub fn new(name: impl Into<String>, fan_curve: FanCurve, temp_sensor: Arc<dyn Sensor>) -> Self {
        Self {
            name: name.into(),
            fan_curve,
            temp_sensor,
            current_pwm: 0,
            temperature: 0.0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn current_pwm(&self) -> u8 {
        self.current_pwm
    }

    pub fn current_percent(&self) -> u8 {
        curve::pwm_to_percentage(self.current_pwm)
    }

    /// Record a duty that was successfully written to hardware.
    pub fn set_current_pwm(&mut self, pwm: u8) {
        self.current_pwm = pwm;
    }

    /// Temperature used by the most recent evaluation.
    pub fn last_temperature(&self) -> f64 {
        self.temperature
    }

    /// Compute the target duty for this tick.
    ///
    /// `observed_percent` is the duty read back from hardware, if the device
    /// can report it. A mismatch with the tracked duty means something else
    /// changed the fan, so the tracked value is resynchronised first.
    pub fn update_pwm(&mut self, observed_percent: Option<u8>) -> PwmUpdate {
        if let Some(observed) = observed_percent {
            if observed != self.current_percent() {
                log::warn!(
                    "'{}': hardware duty {}% differs from tracked {}%, resynchronising",
                    self.name,
                    observed,
                    self.current_percent()
                );
                self.current_pwm = curve::percentage_to_pwm(observed);
            }
        }

        let (new_pwm, temp) = match self.fan_curve.fan_mode() {
            FanMode::Off => (0, 0.0),
            FanMode::Fixed => match self.fan_curve.ranges().first() {
                Some(range) => (range.pwm_end, 0.0),
                None => (0, 0.0),
            },
            FanMode::Curve => {
                let temp = self.temp_sensor.temperature();
                let Some(range) = self.fan_curve.get_range_from_temp(temp) else {
                    log::warn!("'{}': {}", self.name, Error::NoMatchingRange { temp });
                    self.temperature = temp;
                    return self.unchanged(temp);
                };

                log::debug!(
                    "'{}': current temp {temp}°C (+{}°C hysteresis) in range [{}°C] to [{}°C]",
                    self.name,
                    range.hysteresis,
                    range.low_temp,
                    range.high_temp
                );
                let mut effective = temp.max(range.low_temp);
                if range.hysteresis > 0.0 {
                    effective += range.hysteresis;
                }
                (range.duty_at(effective), effective)
            }
        };

        self.temperature = temp;
        let changed = new_pwm != self.current_pwm;
        if changed {
            log::debug!("'{}': new target PWM {new_pwm} (was {})", self.name, self.current_pwm);
        } else {
            log::debug!("'{}': target PWM unchanged at {new_pwm}", self.name);
        }

        PwmUpdate {
            changed,
            pwm: new_pwm,
            percent: curve::pwm_to_percentage(new_pwm),
            temperature: temp,
        }
    }

    fn unchanged(&self, temperature: f64) -> PwmUpdate {
        PwmUpdate {
            changed: false,
            pwm: self.current_pwm,
            percent: self.current_percent(),
            temperature,
        }
    }
}
