// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Error type shared by the curve engine, the hardware layer and the manager.

use std::io;
use std::path::PathBuf;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    // ------------------------------------------------------------------
    // Hardware
    // ------------------------------------------------------------------
    #[error("hardware error on {device}: {reason}")]
    Hardware { device: String, reason: String },

    #[error("unknown channel '{0}'")]
    ChannelNotFound(String),

    #[error("no fan controller at index {0}")]
    ControllerNotFound(usize),

    // ------------------------------------------------------------------
    // Sensors and curves
    // ------------------------------------------------------------------
    #[error("implausible reading {value}°C from sensor '{sensor}'")]
    InvalidSensorReading { sensor: String, value: f64 },

    #[error("no sensor at index {0}")]
    SensorNotFound(usize),

    #[error("no temperature range covers {temp}°C")]
    NoMatchingRange { temp: f64 },

    // ------------------------------------------------------------------
    // Control loop
    // ------------------------------------------------------------------
    #[error("fan manager tick aborted: {0}")]
    TickAborted(String),

    // ------------------------------------------------------------------
    // Profiles and configuration
    // ------------------------------------------------------------------
    #[error("profile '{0}' is not registered")]
    ProfileNotFound(String),

    #[error("invalid profile name '{0}': expected a plain file name")]
    InvalidProfileName(String),

    #[error("failed to read profile {path}: {source}")]
    ProfileRead { path: PathBuf, source: io::Error },

    #[error("failed to write profile {path}: {source}")]
    ProfileWrite { path: PathBuf, source: io::Error },

    #[error("failed to parse profile {path}: {source}")]
    ProfileParse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Wrap an I/O failure from a device into a hardware error.
    pub fn hardware(device: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Error::Hardware {
            device: device.into(),
            reason: err.to_string(),
        }
    }
}
