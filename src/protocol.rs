// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Client-daemon protocol over Unix domain sockets.
//!
//! Messages are newline-delimited JSON. The client sends a [`Request`]
//! and the daemon replies with a [`Response`].

use crate::controller::ChannelStatus;
use crate::curve::{CurvePreset, FanCurve, GraphPoint};
use crate::sensor::Signature;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ---------------------------------------------------------------------------
// Requests (client -> daemon)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Running state, active profile and every channel of the active controller.
    GetStatus,

    /// Registered temperature sensors, in index order.
    ListSensors,

    /// Bind a channel to a sensor and curve, optionally saving the result.
    ApplyFanMode {
        channel: String,
        sensor_index: usize,
        curve: CurveSpec,
        #[serde(default)]
        save_to: Option<String>,
    },

    ListProfiles,

    /// Register an external profile file.
    LoadProfile { path: PathBuf },

    SaveProfile { name: String },

    /// Apply a registered profile; `null` resets every channel.
    SetProfile { name: Option<String> },

    SetInterval { seconds: f64 },

    Start,

    Stop,
}

/// Curve description carried by [`Request::ApplyFanMode`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CurveSpec {
    Off,
    Fixed { percent: u8 },
    Full,
    Preset { name: CurvePreset },
    Points { points: Vec<GraphPoint> },
}

impl CurveSpec {
    pub fn to_curve(&self) -> FanCurve {
        match self {
            CurveSpec::Off => FanCurve::zero_rpm_curve(),
            CurveSpec::Fixed { percent } => FanCurve::fixed_speed_curve(*percent),
            CurveSpec::Full => FanCurve::full_speed_curve(),
            CurveSpec::Preset { name } => name.curve(),
            CurveSpec::Points { points } => FanCurve::from_graph_points(points),
        }
    }
}

// ---------------------------------------------------------------------------
// Responses (daemon -> client)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Status {
        running: bool,
        interval: f64,
        controller: Option<String>,
        active_profile: Option<String>,
        channels: Vec<ChannelStatus>,
    },

    Sensors { sensors: Vec<SensorInfo> },

    Profiles {
        profiles: Vec<String>,
        active: Option<String>,
    },

    /// Operation succeeded.
    Ok { message: String },

    /// Operation failed.
    Error { message: String },
}

impl Response {
    pub fn ok(message: impl Into<String>) -> Self {
        Response::Ok {
            message: message.into(),
        }
    }

    pub fn error(message: impl std::fmt::Display) -> Self {
        Response::Error {
            message: message.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorInfo {
    pub index: usize,
    pub name: String,
    pub temperature: f64,
    pub signature: Signature,
}

// ---------------------------------------------------------------------------
// Serialization helpers
// ---------------------------------------------------------------------------

/// Encode a message as a newline-delimited JSON string.
pub fn encode<T: Serialize>(msg: &T) -> Result<String, serde_json::Error> {
    let mut s = serde_json::to_string(msg)?;
    s.push('\n');
    Ok(s)
}

/// Decode a message from a JSON string (newline-trimmed).
pub fn decode<'a, T: Deserialize<'a>>(s: &'a str) -> Result<T, serde_json::Error> {
    serde_json::from_str(s.trim())
}
