// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Temperature sensor capability and the sensor registry.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// One element of a sensor signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SignaturePart {
    Number(i64),
    Text(String),
}

impl From<&str> for SignaturePart {
    fn from(s: &str) -> Self {
        SignaturePart::Text(s.to_string())
    }
}

impl From<String> for SignaturePart {
    fn from(s: String) -> Self {
        SignaturePart::Text(s)
    }
}

impl From<i64> for SignaturePart {
    fn from(n: i64) -> Self {
        SignaturePart::Number(n)
    }
}

/// Stable, order-sensitive identity of a sensor, used to rebind profiles
/// across restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Signature(pub Vec<SignaturePart>);

impl Signature {
    pub fn new<I, P>(parts: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<SignaturePart>,
    {
        Self(parts.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|p| match p {
                SignaturePart::Number(n) => n.to_string(),
                SignaturePart::Text(s) => s.clone(),
            })
            .collect();
        write!(f, "[{}]", parts.join(", "))
    }
}

/// A source of temperature readings.
///
/// Implementations reject implausible readings by returning the last
/// accepted value instead.
pub trait Sensor: Send + Sync {
    /// Human-readable name.
    fn name(&self) -> &str;

    /// Current temperature in degrees Celsius.
    fn temperature(&self) -> f64;

    fn signature(&self) -> Signature;
}

impl fmt::Debug for dyn Sensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sensor")
            .field("name", &self.name())
            .field("signature", &self.signature())
            .finish()
    }
}

/// Placeholder bound to channels that have no real sensor yet.
#[derive(Debug, Default)]
pub struct DummySensor;

impl Sensor for DummySensor {
    fn name(&self) -> &str {
        "<none>"
    }

    fn temperature(&self) -> f64 {
        0.0
    }

    fn signature(&self) -> Signature {
        Signature(vec![
            "DummySensor".into(),
            "dummy".into(),
            "".into(),
            "<none>".into(),
            SignaturePart::Number(0),
        ])
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// The sensors known to this process. Index 0 is always the dummy sensor.
#[derive(Debug, Clone)]
pub struct SensorRegistry {
    sensors: Vec<Arc<dyn Sensor>>,
}

impl Default for SensorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorRegistry {
    pub fn new() -> Self {
        Self {
            sensors: vec![Arc::new(DummySensor)],
        }
    }

    pub fn add(&mut self, sensor: Arc<dyn Sensor>) {
        log::debug!("Registering sensor '{}' {}", sensor.name(), sensor.signature());
        self.sensors.push(sensor);
    }

    pub fn dummy(&self) -> Arc<dyn Sensor> {
        Arc::clone(&self.sensors[0])
    }

    pub fn get(&self, index: usize) -> Option<Arc<dyn Sensor>> {
        self.sensors.get(index).cloned()
    }

    pub fn find_by_signature(&self, signature: &Signature) -> Option<Arc<dyn Sensor>> {
        self.sensors
            .iter()
            .find(|s| &s.signature() == signature)
            .cloned()
    }

    /// Position of `sensor` in the registry, compared by identity.
    pub fn index_of(&self, sensor: &Arc<dyn Sensor>) -> Option<usize> {
        self.sensors.iter().position(|s| Arc::ptr_eq(s, sensor))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Sensor>> {
        self.sensors.iter()
    }

    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }
}
