// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! curvefan: maps temperatures to fan duty cycles through piecewise curves
//! and applies them to hardware channels on a fixed tick.

pub mod config;
pub mod controller;
pub mod curve;
pub mod error;
pub mod hwmon;
pub mod manager;
pub mod profile;
pub mod protocol;
pub mod pwm_fan;
pub mod sensor;
pub mod signals;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Error, Result};
