// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Fan curve definitions and range selection.
//!
//! A curve is an ordered list of [`TempRange`] segments, each mapping a
//! temperature interval linearly onto a PWM duty interval (0-255).
//! Configuration and profiles speak percentages (0-100); conversion to the
//! hardware domain happens once, when a range is built.

use serde::{Deserialize, Serialize};

pub const MIN_TEMP: f64 = 0.0;
pub const MAX_TEMP: f64 = 100.0;
pub const MIN_PWM: u8 = 0;
pub const MAX_PWM: u8 = 255;
pub const MAX_PERCENTAGE: u8 = 100;

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

/// Convert a duty percentage (0-100) to a PWM value (0-255).
pub fn percentage_to_pwm(percent: u8) -> u8 {
    let percent = percent.min(MAX_PERCENTAGE);
    (f64::from(percent) / f64::from(MAX_PERCENTAGE) * f64::from(MAX_PWM)).round() as u8
}

/// Convert a PWM value (0-255) to a duty percentage (0-100).
pub fn pwm_to_percentage(pwm: u8) -> u8 {
    (f64::from(pwm) / f64::from(MAX_PWM) * f64::from(MAX_PERCENTAGE)).round() as u8
}

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

/// How a curve drives its fan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FanMode {
    /// No ranges, or a single range ending at duty 0.
    Off,
    /// A single range with a non-zero duty.
    Fixed,
    /// More than one range.
    Curve,
}

/// One linear segment of a fan curve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TempRange {
    pub low_temp: f64,
    pub high_temp: f64,
    pub pwm_start: u8,
    pub pwm_end: u8,
    /// Extra degrees added to readings while this range is active.
    pub hysteresis: f64,
}

impl TempRange {
    /// Build a range from percentage duty bounds.
    pub fn new(
        low_temp: f64,
        high_temp: f64,
        start_percent: u8,
        end_percent: u8,
        hysteresis: f64,
    ) -> Self {
        Self {
            low_temp,
            high_temp,
            pwm_start: percentage_to_pwm(start_percent),
            pwm_end: percentage_to_pwm(end_percent),
            hysteresis: hysteresis.max(0.0),
        }
    }

    /// Linearly interpolate the duty for `temp` inside this range.
    ///
    /// Readings below `low_temp` use `pwm_start`, readings above `high_temp`
    /// use `pwm_end`. A zero-width range always yields `pwm_start`.
    pub fn duty_at(&self, temp: f64) -> u8 {
        let width = self.high_temp - self.low_temp;
        if width <= 0.0 {
            return self.pwm_start;
        }
        let frac = ((temp - self.low_temp) / width).clamp(0.0, 1.0);
        let start = f64::from(self.pwm_start);
        let end = f64::from(self.pwm_end);
        (start + frac * (end - start)).round().clamp(0.0, f64::from(MAX_PWM)) as u8
    }
}

/// A `[temperature, percent]` pair as edited in the UI and stored in profiles.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GraphPoint(pub f64, pub u8);

impl GraphPoint {
    pub fn temp(&self) -> f64 {
        self.0
    }

    pub fn percent(&self) -> u8 {
        self.1
    }
}

/// Named curve shapes offered alongside the zero, fixed and full presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CurvePreset {
    Linear,
    Exponential,
    SemiExponential,
    Logistic,
    SemiLogistic,
}

impl CurvePreset {
    pub fn curve(self) -> FanCurve {
        match self {
            CurvePreset::Linear => FanCurve::linear_curve(),
            CurvePreset::Exponential => FanCurve::exponential_curve(),
            CurvePreset::SemiExponential => FanCurve::semi_exponential_curve(),
            CurvePreset::Logistic => FanCurve::logistic_curve(),
            CurvePreset::SemiLogistic => FanCurve::semi_logistic_curve(),
        }
    }
}

/// An ordered list of temperature ranges.
///
/// The curve remembers the range selected by the previous lookup so that
/// its hysteresis can bias the next one. Each fan owns its curve; the cache
/// is never shared between channels.
#[derive(Debug, Clone, Default)]
pub struct FanCurve {
    ranges: Vec<TempRange>,
    active: Option<usize>,
}

impl FanCurve {
    pub fn new(ranges: Vec<TempRange>) -> Self {
        Self { ranges, active: None }
    }

    pub fn zero_rpm_curve() -> Self {
        Self::new(vec![TempRange::new(MIN_TEMP, MAX_TEMP, 0, 0, 0.0)])
    }

    pub fn fixed_speed_curve(percent: u8) -> Self {
        Self::new(vec![TempRange::new(MIN_TEMP, MAX_TEMP, percent, percent, 0.0)])
    }

    pub fn full_speed_curve() -> Self {
        Self::fixed_speed_curve(MAX_PERCENTAGE)
    }

    pub fn linear_curve() -> Self {
        Self::from_segments(&[
            (0.0, 20.0, 0, 20),
            (20.0, 40.0, 20, 40),
            (40.0, 60.0, 40, 60),
            (60.0, 80.0, 60, 80),
            (80.0, 100.0, 80, 100),
        ])
    }

    pub fn exponential_curve() -> Self {
        Self::from_segments(&[
            (0.0, 20.0, 0, 0),
            (20.0, 40.0, 0, 10),
            (40.0, 60.0, 10, 30),
            (60.0, 80.0, 30, 60),
            (80.0, 100.0, 60, 100),
        ])
    }

    pub fn semi_exponential_curve() -> Self {
        Self::from_segments(&[
            (0.0, 0.0, 0, 20),
            (0.0, 20.0, 20, 20),
            (20.0, 50.0, 20, 30),
            (50.0, 80.0, 30, 60),
            (80.0, 100.0, 60, 100),
        ])
    }

    pub fn logistic_curve() -> Self {
        Self::from_segments(&[
            (0.0, 20.0, 0, 10),
            (20.0, 40.0, 10, 35),
            (40.0, 60.0, 35, 70),
            (60.0, 80.0, 70, 90),
            (80.0, 100.0, 90, 100),
        ])
    }

    pub fn semi_logistic_curve() -> Self {
        Self::from_segments(&[
            (0.0, 40.0, 0, 0),
            (40.0, 40.0, 40, 40),
            (40.0, 60.0, 40, 70),
            (60.0, 80.0, 70, 90),
            (80.0, 100.0, 90, 100),
        ])
    }

    fn from_segments(segments: &[(f64, f64, u8, u8)]) -> Self {
        Self::new(
            segments
                .iter()
                .map(|&(low, high, start, end)| TempRange::new(low, high, start, end, 0.0))
                .collect(),
        )
    }

    /// Build a curve from graph points (see [`FanCurve::set_curve_from_graph_points`]).
    pub fn from_graph_points(points: &[GraphPoint]) -> Self {
        let mut curve = Self::default();
        curve.set_curve_from_graph_points(points);
        curve
    }

    pub fn fan_mode(&self) -> FanMode {
        match self.ranges.as_slice() {
            [] => FanMode::Off,
            [only] if only.pwm_end == 0 => FanMode::Off,
            [_] => FanMode::Fixed,
            _ => FanMode::Curve,
        }
    }

    pub fn ranges(&self) -> &[TempRange] {
        &self.ranges
    }

    pub fn add_range(&mut self, range: TempRange) {
        self.ranges.push(range);
    }

    /// Duty percentage of a fixed-speed curve, 0 for any other mode.
    pub fn curve_fixed_speed(&self) -> u8 {
        match (self.fan_mode(), self.ranges.last()) {
            (FanMode::Fixed, Some(range)) => pwm_to_percentage(range.pwm_end),
            _ => 0,
        }
    }

    /// Select the range for `temp`.
    ///
    /// Returns the first range whose `high_temp` is strictly greater than
    /// the (possibly biased) temperature. If the previous lookup selected a
    /// range with hysteresis, that amount is added to `temp` first, which
    /// holds the fan in its current tier until the temperature drops past
    /// the boundary by more than the hysteresis.
    pub fn get_range_from_temp(&mut self, temp: f64) -> Option<TempRange> {
        let mut temp = temp;
        if let Some(active) = self.active.and_then(|i| self.ranges.get(i)) {
            if active.hysteresis > 0.0 {
                temp += active.hysteresis;
            }
        }

        self.active = self.ranges.iter().position(|range| temp < range.high_temp);
        self.active.map(|i| self.ranges[i])
    }

    /// Graph points describing this curve: the first range's start followed
    /// by the end of every range.
    pub fn get_graph_points_from_curve(&self) -> Vec<GraphPoint> {
        let Some(first) = self.ranges.first() else {
            return Vec::new();
        };
        std::iter::once(GraphPoint(first.low_temp, pwm_to_percentage(first.pwm_start)))
            .chain(
                self.ranges
                    .iter()
                    .map(|range| GraphPoint(range.high_temp, pwm_to_percentage(range.pwm_end))),
            )
            .collect()
    }

    /// Replace all ranges with contiguous segments between consecutive
    /// points. Fewer than two points yields the zero curve.
    pub fn set_curve_from_graph_points(&mut self, points: &[GraphPoint]) {
        self.ranges.clear();
        self.active = None;

        if points.len() < 2 {
            self.add_range(TempRange::new(MIN_TEMP, MAX_TEMP, 0, 0, 0.0));
            return;
        }

        for pair in points.windows(2) {
            let (from, to) = (pair[0], pair[1]);
            self.add_range(TempRange::new(
                from.temp(),
                to.temp(),
                from.percent(),
                to.percent(),
                0.0,
            ));
        }
    }
}
