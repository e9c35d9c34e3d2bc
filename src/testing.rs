// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Test doubles for sensors and devices.

use crate::controller::Device;
use crate::error::{Error, Result};
use crate::sensor::{Sensor, Signature};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// A sensor whose temperature is set by the test.
#[derive(Debug)]
pub struct TestSensor {
    name: String,
    temp: Mutex<f64>,
}

impl TestSensor {
    pub fn new(name: &str, temp: f64) -> Self {
        Self {
            name: name.to_string(),
            temp: Mutex::new(temp),
        }
    }

    pub fn set(&self, temp: f64) {
        *self.temp.lock().unwrap() = temp;
    }
}

impl Sensor for TestSensor {
    fn name(&self) -> &str {
        &self.name
    }

    fn temperature(&self) -> f64 {
        *self.temp.lock().unwrap()
    }

    fn signature(&self) -> Signature {
        Signature::new(["TestSensor", self.name.as_str()])
    }
}

/// A sensor that panics when read, once armed.
#[derive(Debug, Default)]
pub struct PanickingSensor {
    armed: std::sync::atomic::AtomicBool,
}

impl PanickingSensor {
    pub fn arm(&self) {
        self.armed.store(true, std::sync::atomic::Ordering::SeqCst);
    }
}

impl Sensor for PanickingSensor {
    fn name(&self) -> &str {
        "panicking"
    }

    fn temperature(&self) -> f64 {
        if self.armed.load(std::sync::atomic::Ordering::SeqCst) {
            panic!("sensor exploded");
        }
        45.0
    }

    fn signature(&self) -> Signature {
        Signature::new(["PanickingSensor"])
    }
}

// ---------------------------------------------------------------------------
// Mock device
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct MockState {
    connected: bool,
    connects: usize,
    disconnects: usize,
    releases: usize,
    writes: Vec<(String, u8)>,
    duty: BTreeMap<String, u8>,
    fail_after: Option<usize>,
    report_duty: bool,
}

/// Shared view of a [`MockDevice`] kept by the test after the device is boxed.
#[derive(Debug, Clone)]
pub struct MockHandle(Arc<Mutex<MockState>>);

impl MockHandle {
    pub fn written_duties(&self, channel: &str) -> Vec<u8> {
        let state = self.0.lock().unwrap();
        state
            .writes
            .iter()
            .filter(|(c, _)| c == channel)
            .map(|(_, d)| *d)
            .collect()
    }

    pub fn clear_writes(&self) {
        self.0.lock().unwrap().writes.clear();
    }

    pub fn connects(&self) -> usize {
        self.0.lock().unwrap().connects
    }

    pub fn disconnects(&self) -> usize {
        self.0.lock().unwrap().disconnects
    }

    pub fn releases(&self) -> usize {
        self.0.lock().unwrap().releases
    }

    /// Fail every write once `n` writes have been recorded.
    pub fn fail_writes_after(&self, n: usize) {
        self.0.lock().unwrap().fail_after = Some(n);
    }

    pub fn allow_writes(&self) {
        self.0.lock().unwrap().fail_after = None;
    }

    pub fn report_duty(&self, enabled: bool) {
        self.0.lock().unwrap().report_duty = enabled;
    }

    pub fn set_duty(&self, channel: &str, percent: u8) {
        self.0.lock().unwrap().duty.insert(channel.to_string(), percent);
    }

    pub fn duty(&self, channel: &str) -> u8 {
        self.0.lock().unwrap().duty.get(channel).copied().unwrap_or(0)
    }
}

/// In-memory device recording every duty write.
#[derive(Debug)]
pub struct MockDevice {
    name: String,
    channels: Vec<String>,
    state: Arc<Mutex<MockState>>,
}

impl MockDevice {
    pub fn new(name: &str, channels: &[&str]) -> (Self, MockHandle) {
        let state = Arc::new(Mutex::new(MockState::default()));
        let device = Self {
            name: name.to_string(),
            channels: channels.iter().map(|c| c.to_string()).collect(),
            state: Arc::clone(&state),
        };
        (device, MockHandle(state))
    }

    fn require_connection(&self) -> Result<()> {
        if self.state.lock().unwrap().connected {
            Ok(())
        } else {
            Err(Error::hardware(&self.name, "not connected"))
        }
    }
}

impl Device for MockDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn class(&self) -> &'static str {
        "MockController"
    }

    fn connect(&mut self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.connected = true;
        state.connects += 1;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.connected = false;
        state.disconnects += 1;
        Ok(())
    }

    fn detect_channels(&mut self) -> Result<Vec<String>> {
        self.require_connection()?;
        Ok(self.channels.clone())
    }

    fn read_rpm(&mut self, channel: &str) -> Result<u32> {
        self.require_connection()?;
        let state = self.state.lock().unwrap();
        Ok(u32::from(state.duty.get(channel).copied().unwrap_or(0)) * 20)
    }

    fn read_duty(&mut self, channel: &str) -> Result<Option<u8>> {
        self.require_connection()?;
        let state = self.state.lock().unwrap();
        if !state.report_duty {
            return Ok(None);
        }
        Ok(Some(state.duty.get(channel).copied().unwrap_or(0)))
    }

    fn write_duty(&mut self, channel: &str, percent: u8) -> Result<()> {
        self.require_connection()?;
        let mut state = self.state.lock().unwrap();
        if let Some(limit) = state.fail_after {
            if state.writes.len() >= limit {
                return Err(Error::hardware(&self.name, "write rejected"));
            }
        }
        state.writes.push((channel.to_string(), percent));
        state.duty.insert(channel.to_string(), percent);
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        self.require_connection()?;
        self.state.lock().unwrap().releases += 1;
        Ok(())
    }
}
