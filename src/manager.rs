// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! The fan manager: owns the controllers, runs the tick loop on a worker
//! thread and exposes the control surface used by the daemon.
//!
//! The worker ticks once immediately, then waits for the interval (or a
//! termination request) before every further tick. Ticks never overlap.
//! When the loop ends, for whatever reason, every channel is ramped to 0
//! before the worker exits. An unexpected failure inside a tick ends the
//! loop and is reported through the abort callback.

use crate::controller::{ChannelStatus, FanController, lock};
use crate::curve::{FanCurve, GraphPoint};
use crate::error::{Error, Result};
use crate::profile::{ControllerProfile, Profile, ProfileData, ProfileStore};
use crate::sensor::SensorRegistry;
use crate::signals::TermSignal;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Called when the worker exits; the argument is `true` if it aborted.
pub type ManagerCallback = Box<dyn Fn(bool) + Send + Sync>;

/// Shortest accepted tick interval, in seconds.
pub const MIN_INTERVAL_SECS: f64 = 0.1;

/// Longest accepted tick interval, in seconds.
pub const MAX_INTERVAL_SECS: f64 = 86_400.0;

/// Validate a tick interval given in seconds.
pub fn interval_from_secs(seconds: f64) -> Result<Duration> {
    if !(MIN_INTERVAL_SECS..=MAX_INTERVAL_SECS).contains(&seconds) {
        return Err(Error::Config(format!(
            "interval must be between {MIN_INTERVAL_SECS}s and {MAX_INTERVAL_SECS}s, got {seconds}"
        )));
    }
    Duration::try_from_secs_f64(seconds)
        .map_err(|e| Error::Config(format!("interval {seconds}: {e}")))
}

struct Shared {
    controllers: Vec<FanController>,
    sensors: SensorRegistry,
    profiles: Mutex<ProfileStore>,
    active_profile: Mutex<Option<String>>,
    active_controller: AtomicUsize,
    interval_ms: AtomicU64,
    term: Arc<TermSignal>,
    running: AtomicBool,
    tick_lock: Mutex<()>,
    callback: Mutex<Option<ManagerCallback>>,
}

impl Shared {
    fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.load(Ordering::SeqCst))
    }

    fn tick(&self) -> Result<()> {
        let _serial = lock(&self.tick_lock);
        if !self.running.load(Ordering::SeqCst) {
            return Ok(());
        }
        for controller in &self.controllers {
            controller.update_channels()?;
        }
        Ok(())
    }

    /// Run one tick, turning a panic into an error.
    fn guarded_tick(&self) -> Result<()> {
        panic::catch_unwind(AssertUnwindSafe(|| self.tick()))
            .unwrap_or_else(|payload| Err(Error::TickAborted(panic_message(payload.as_ref()))))
    }

    fn run(&self) -> bool {
        log::info!("Fan manager running with interval {:?}", self.interval());
        let mut aborted = false;
        let mut outcome = self.guarded_tick();
        loop {
            if let Err(e) = outcome {
                log::error!("Unhandled error in fan manager: {e}");
                log::error!("Aborting fan manager");
                aborted = true;
                break;
            }
            if self.term.wait(self.interval()) {
                break;
            }
            outcome = self.guarded_tick();
        }

        {
            let _serial = lock(&self.tick_lock);
            self.running.store(false, Ordering::SeqCst);
            let parked = panic::catch_unwind(AssertUnwindSafe(|| {
                for controller in &self.controllers {
                    controller.stop_all_channels();
                }
            }));
            if let Err(payload) = parked {
                log::error!(
                    "Error while stopping fan channels: {}",
                    panic_message(payload.as_ref())
                );
            }
        }
        self.term.reset();

        if let Some(callback) = lock(&self.callback).as_ref() {
            callback(aborted);
        }
        aborted
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

pub struct FanManager {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<bool>>>,
}

impl FanManager {
    pub fn new(
        controllers: Vec<FanController>,
        sensors: SensorRegistry,
        profiles: ProfileStore,
        interval: Duration,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                controllers,
                sensors,
                profiles: Mutex::new(profiles),
                active_profile: Mutex::new(None),
                active_controller: AtomicUsize::new(0),
                interval_ms: AtomicU64::new(interval.as_millis() as u64),
                term: Arc::new(TermSignal::new()),
                running: AtomicBool::new(false),
                tick_lock: Mutex::new(()),
                callback: Mutex::new(None),
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn set_callback(&self, callback: impl Fn(bool) + Send + Sync + 'static) {
        *lock(&self.shared.callback) = Some(Box::new(callback));
    }

    /// The flag the worker waits on. Requesting it ends the loop after the
    /// current tick, exactly like [`FanManager::stop`] minus the join.
    pub fn terminate_handle(&self) -> Arc<TermSignal> {
        Arc::clone(&self.shared.term)
    }

    // -----------------------------------------------------------------------
    // Controllers
    // -----------------------------------------------------------------------

    pub fn has_controller(&self) -> bool {
        !self.shared.controllers.is_empty()
    }

    pub fn controller_count(&self) -> usize {
        self.shared.controllers.len()
    }

    pub fn controller_names(&self) -> Vec<String> {
        self.shared.controllers.iter().map(|c| c.name().to_string()).collect()
    }

    /// Select the controller that channel operations address.
    pub fn set_active_controller(&self, index: usize) -> bool {
        if index < self.shared.controllers.len() {
            self.shared.active_controller.store(index, Ordering::SeqCst);
            true
        } else {
            log::warn!("Fan controller with index {index} not found");
            false
        }
    }

    pub fn active_controller_name(&self) -> Option<String> {
        self.active().ok().map(|c| c.name().to_string())
    }

    fn active(&self) -> Result<&FanController> {
        let index = self.shared.active_controller.load(Ordering::SeqCst);
        self.shared
            .controllers
            .get(index)
            .ok_or(Error::ControllerNotFound(index))
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub fn start(&self) {
        let mut worker = lock(&self.worker);
        if self.is_running() {
            log::warn!("Cannot start fan manager - fan manager thread is already running");
            return;
        }
        if let Some(finished) = worker.take() {
            let _ = finished.join();
        }

        self.shared.term.reset();
        self.shared.running.store(true, Ordering::SeqCst);
        let shared = Arc::clone(&self.shared);
        match thread::Builder::new()
            .name("fan-manager".to_string())
            .spawn(move || shared.run())
        {
            Ok(handle) => {
                *worker = Some(handle);
                log::info!("Fan manager thread started");
            }
            Err(e) => {
                self.shared.running.store(false, Ordering::SeqCst);
                log::error!("Failed to start fan manager thread: {e}");
            }
        }
    }

    /// Request termination and wait for the worker to park the fans.
    pub fn stop(&self) {
        let Some(handle) = lock(&self.worker).take() else {
            return;
        };
        if self.is_running() {
            self.shared.term.request();
        }
        match handle.join() {
            Ok(true) => log::warn!("Fan manager thread had aborted"),
            Ok(false) => log::info!("Fan manager thread stopped"),
            Err(_) => log::error!("Fan manager thread panicked"),
        }
    }

    pub fn toggle(&self, run: bool) {
        if run {
            self.start();
        } else {
            self.stop();
        }
    }

    /// Stop the worker (parking every fan) and invalidate the controllers.
    /// With `restore_auto`, each device is first handed back to its own
    /// automatic fan control.
    pub fn close(&self, restore_auto: bool) {
        self.stop();
        for controller in &self.shared.controllers {
            if restore_auto {
                if let Err(e) = controller.release() {
                    log::warn!(
                        "Could not restore automatic control on '{}': {e}",
                        controller.name()
                    );
                }
            }
            controller.close();
        }
    }

    /// Evaluate every channel once, if the manager is running.
    pub fn tick(&self) -> Result<()> {
        self.shared.guarded_tick()
    }

    fn force_tick(&self) {
        if let Err(e) = self.shared.guarded_tick() {
            log::error!("Immediate update failed: {e}");
        }
    }

    pub fn interval(&self) -> Duration {
        self.shared.interval()
    }

    /// Change the tick interval; takes effect from the next wait. Values
    /// outside the accepted range are rejected and the interval is kept.
    pub fn update_interval(&self, seconds: f64) -> Result<()> {
        let interval = interval_from_secs(seconds)?;
        self.shared
            .interval_ms
            .store(interval.as_millis() as u64, Ordering::SeqCst);
        log::info!("Fan manager interval set to {seconds}s");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Channels
    // -----------------------------------------------------------------------

    pub fn sensors(&self) -> &SensorRegistry {
        &self.shared.sensors
    }

    pub fn channel_ids(&self) -> Vec<String> {
        self.active().map(|c| c.channel_ids()).unwrap_or_default()
    }

    /// Bind `channel` of the active controller to a sensor and curve, then
    /// update the hardware right away.
    pub fn apply_fan_mode(
        &self,
        channel: &str,
        sensor_index: usize,
        curve: FanCurve,
    ) -> Result<()> {
        let sensor = self
            .shared
            .sensors
            .get(sensor_index)
            .ok_or(Error::SensorNotFound(sensor_index))?;
        let mode = curve.fan_mode();
        self.active()?.with_channel(channel, |fan| {
            fan.temp_sensor = sensor;
            fan.fan_curve = curve;
        })?;
        log::info!("Channel '{channel}' set to {mode:?} mode with sensor {sensor_index}");
        self.force_tick();
        Ok(())
    }

    pub fn channel_status(&self, channel: &str) -> Result<ChannelStatus> {
        self.active()?.channel_status(channel)
    }

    /// Registry index of the sensor bound to `channel`.
    pub fn channel_sensor(&self, channel: &str) -> Result<usize> {
        let sensor = self
            .active()?
            .with_channel(channel, |fan| Arc::clone(&fan.temp_sensor))?;
        Ok(self.shared.sensors.index_of(&sensor).unwrap_or(0))
    }

    pub fn channel_curve(&self, channel: &str) -> Result<Vec<GraphPoint>> {
        self.active()?
            .with_channel(channel, |fan| fan.fan_curve.get_graph_points_from_curve())
    }

    // -----------------------------------------------------------------------
    // Profiles
    // -----------------------------------------------------------------------

    pub fn profile_names(&self) -> Vec<String> {
        lock(&self.shared.profiles).names()
    }

    pub fn active_profile(&self) -> Option<String> {
        lock(&self.shared.active_profile).clone()
    }

    /// Register an external `.cfp` file and return its name.
    pub fn load_profile(&self, path: &Path) -> Result<String> {
        lock(&self.shared.profiles).register(path)
    }

    /// Save the current channel configuration under `name`.
    pub fn save_profile(&self, name: &str) -> Result<String> {
        let profile = self.serialize_profile();
        lock(&self.shared.profiles).save(name, &profile)
    }

    pub fn remove_profile(&self, name: &str) -> Result<()> {
        lock(&self.shared.profiles).remove(name)?;
        let mut active = lock(&self.shared.active_profile);
        if active.as_deref() == Some(name) {
            *active = None;
        }
        Ok(())
    }

    /// Reset every channel, apply the named profile (if any) and update the
    /// hardware. On failure the channels stay reset and the error is
    /// returned.
    pub fn set_profile(&self, name: Option<&str>) -> Result<Option<String>> {
        for controller in &self.shared.controllers {
            controller.reset_channels(self.shared.sensors.dummy());
        }

        let result = match name.filter(|n| !n.is_empty()) {
            None => Ok(None),
            Some(name) => {
                let data = lock(&self.shared.profiles).read(name);
                data.map(|data| {
                    self.apply_profile(&data);
                    log::info!("Profile '{name}' applied");
                    Some(name.to_string())
                })
            }
        };

        *lock(&self.shared.active_profile) = result.as_ref().ok().cloned().flatten();
        self.force_tick();
        result
    }

    /// The current configuration as a profile document.
    pub fn serialize_profile(&self) -> Profile {
        Profile::new(
            self.shared
                .controllers
                .iter()
                .enumerate()
                .map(|(id, controller)| ControllerProfile {
                    id,
                    name: controller.name().to_string(),
                    class: controller.class().to_string(),
                    channels: controller.channel_profiles(),
                })
                .collect(),
        )
    }

    fn apply_profile(&self, data: &ProfileData) {
        let sensors = &self.shared.sensors;
        match data {
            ProfileData::Versioned(profile) => {
                for (index, controller) in self.shared.controllers.iter().enumerate() {
                    let Some(saved) = profile.controllers.get(index) else {
                        log::debug!("Profile has no entry for controller {index}");
                        continue;
                    };
                    if saved.class != controller.class() {
                        log::warn!(
                            "Profile controller {index} is a '{}', not a '{}'; skipping",
                            saved.class,
                            controller.class()
                        );
                        continue;
                    }
                    controller.apply_channel_profiles(&saved.channels, sensors);
                }
            }
            ProfileData::Legacy(channels) => {
                if let Some(controller) = self.shared.controllers.first() {
                    controller.apply_channel_profiles(channels, sensors);
                }
            }
        }
    }
}

impl Drop for FanManager {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::RampSettings;
    use crate::curve::FanMode;
    use crate::sensor::Sensor;
    use crate::testing::{MockDevice, MockHandle, PanickingSensor, TestSensor};
    use std::time::Instant;
    use tempfile::TempDir;

    const IMMEDIATE: RampSettings = RampSettings {
        step_percent: 10,
        step_interval: Duration::ZERO,
    };

    fn wait_until(condition: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    /// A manager over `names.len()` mock controllers, each with fan1 and fan2.
    fn manager_over(
        names: &[&str],
        ramp: RampSettings,
        sensors: SensorRegistry,
        profiles_dir: &Path,
        interval: Duration,
    ) -> (FanManager, Vec<MockHandle>) {
        let mut controllers = Vec::new();
        let mut handles = Vec::new();
        for name in names {
            let (device, handle) = MockDevice::new(name, &["fan1", "fan2"]);
            let controller =
                FanController::probe(Box::new(device), ramp, sensors.dummy()).unwrap();
            controllers.push(controller);
            handles.push(handle);
        }
        let profiles = ProfileStore::new(profiles_dir);
        (FanManager::new(controllers, sensors, profiles, interval), handles)
    }

    fn manager_with(
        sensors: SensorRegistry,
        profiles_dir: &Path,
        interval: Duration,
    ) -> (FanManager, MockHandle) {
        let (manager, mut handles) =
            manager_over(&["mock"], IMMEDIATE, sensors, profiles_dir, interval);
        (manager, handles.remove(0))
    }

    fn idle(sensors: SensorRegistry, dir: &Path) -> (FanManager, MockHandle) {
        manager_with(sensors, dir, Duration::from_secs(60))
    }

    fn sensor(name: &str, temp: f64) -> Arc<dyn Sensor> {
        Arc::new(TestSensor::new(name, temp))
    }

    fn registry_with(sensors: Vec<Arc<dyn Sensor>>) -> SensorRegistry {
        let mut registry = SensorRegistry::new();
        for sensor in sensors {
            registry.add(sensor);
        }
        registry
    }

    #[test]
    fn test_apply_fan_mode_while_stopped_does_not_touch_hardware() {
        let dir = TempDir::new().unwrap();
        let (manager, handle) = idle(SensorRegistry::new(), dir.path());
        manager.apply_fan_mode("fan1", 0, FanCurve::fixed_speed_curve(60)).unwrap();
        assert!(handle.written_duties("fan1").is_empty());
        assert_eq!(manager.channel_status("fan1").unwrap().mode, FanMode::Fixed);
    }

    #[test]
    fn test_apply_fan_mode_ticks_immediately() {
        let dir = TempDir::new().unwrap();
        let (manager, handle) = idle(SensorRegistry::new(), dir.path());
        manager.start();
        manager.apply_fan_mode("fan1", 0, FanCurve::fixed_speed_curve(60)).unwrap();

        assert_eq!(manager.channel_status("fan1").unwrap().percent, 60);
        assert_eq!(handle.duty("fan1"), 60);
        manager.stop();
    }

    #[test]
    fn test_apply_fan_mode_rejects_unknown_targets() {
        let dir = TempDir::new().unwrap();
        let (manager, _) = idle(SensorRegistry::new(), dir.path());
        assert!(matches!(
            manager.apply_fan_mode("fan1", 7, FanCurve::zero_rpm_curve()),
            Err(Error::SensorNotFound(7))
        ));
        assert!(matches!(
            manager.apply_fan_mode("fan9", 0, FanCurve::zero_rpm_curve()),
            Err(Error::ChannelNotFound(_))
        ));
    }

    #[test]
    fn test_start_and_stop_are_idempotent() {
        let dir = TempDir::new().unwrap();
        let (manager, _) = idle(SensorRegistry::new(), dir.path());
        manager.stop();
        assert!(!manager.is_running());

        manager.start();
        manager.start();
        assert!(manager.is_running());

        let started = Instant::now();
        manager.stop();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!manager.is_running());
        manager.stop();
    }

    #[test]
    fn test_stop_parks_fans_and_reports_clean_exit() {
        let dir = TempDir::new().unwrap();
        let (manager, handle) =
            manager_with(SensorRegistry::new(), dir.path(), Duration::from_millis(10));
        let reports = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&reports);
        manager.set_callback(move |aborted| sink.lock().unwrap().push(aborted));

        manager.apply_fan_mode("fan1", 0, FanCurve::fixed_speed_curve(70)).unwrap();
        manager.start();
        assert!(wait_until(|| handle.duty("fan1") == 70));

        manager.stop();
        assert_eq!(handle.duty("fan1"), 0);
        assert_eq!(manager.channel_status("fan1").unwrap().pwm, 0);
        assert_eq!(*reports.lock().unwrap(), vec![false]);
    }

    #[test]
    fn test_termination_request_ends_loop() {
        let dir = TempDir::new().unwrap();
        let (manager, _) = idle(SensorRegistry::new(), dir.path());
        manager.start();
        manager.terminate_handle().request();
        assert!(wait_until(|| !manager.is_running()));
        manager.stop();

        // a fresh start is possible after a signal-driven exit
        manager.start();
        assert!(manager.is_running());
        manager.stop();
    }

    #[test]
    fn test_tick_failure_aborts_once_and_parks_fans() {
        let dir = TempDir::new().unwrap();
        let bomb = Arc::new(PanickingSensor::default());
        let sensors = registry_with(vec![bomb.clone() as Arc<dyn Sensor>, sensor("cpu", 50.0)]);
        let (manager, handle) = manager_with(sensors, dir.path(), Duration::from_millis(10));

        let aborts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&aborts);
        manager.set_callback(move |aborted| {
            if aborted {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        manager.apply_fan_mode("fan1", 1, FanCurve::linear_curve()).unwrap();
        manager.apply_fan_mode("fan2", 2, FanCurve::linear_curve()).unwrap();
        manager.start();
        assert!(wait_until(|| handle.duty("fan2") == 50));

        bomb.arm();
        assert!(wait_until(|| !manager.is_running()));
        manager.stop();

        assert_eq!(aborts.load(Ordering::SeqCst), 1);
        for channel in ["fan1", "fan2"] {
            assert_eq!(manager.channel_status(channel).unwrap().pwm, 0);
            assert_eq!(handle.duty(channel), 0);
        }
    }

    #[test]
    fn test_profile_round_trip_rebinds_sensor() {
        let dir = TempDir::new().unwrap();
        let points = vec![GraphPoint(0.0, 0), GraphPoint(50.0, 50), GraphPoint(100.0, 100)];

        let sensors = registry_with(vec![sensor("cpu", 40.0)]);
        let (original, _) = idle(sensors, dir.path());
        original
            .apply_fan_mode("fan1", 1, FanCurve::from_graph_points(&points))
            .unwrap();
        assert_eq!(original.save_profile("balanced").unwrap(), "balanced");

        // a fresh process: different registry order, same sensor identity
        let sensors = registry_with(vec![
            sensor("gpu", 60.0),
            sensor("cpu", 40.0),
        ]);
        let other_dir = TempDir::new().unwrap();
        let (restored, _) = idle(sensors, other_dir.path());
        let name = restored.load_profile(&dir.path().join("balanced.cfp")).unwrap();
        assert_eq!(restored.set_profile(Some(&name)).unwrap(), Some("balanced".to_string()));

        assert_eq!(restored.channel_curve("fan1").unwrap(), points);
        assert_eq!(restored.channel_sensor("fan1").unwrap(), 2);
        assert_eq!(restored.channel_sensor("fan2").unwrap(), 0);
        assert_eq!(restored.active_profile().as_deref(), Some("balanced"));
    }

    #[test]
    fn test_profile_with_missing_sensor_leaves_channel_reset() {
        let dir = TempDir::new().unwrap();
        let sensors = registry_with(vec![sensor("cpu", 40.0)]);
        let (original, _) = idle(sensors, dir.path());
        original.apply_fan_mode("fan1", 1, FanCurve::linear_curve()).unwrap();
        original.save_profile("p").unwrap();

        let (restored, _) = idle(SensorRegistry::new(), dir.path());
        restored.load_profile(&dir.path().join("p.cfp")).unwrap();
        restored.set_profile(Some("p")).unwrap();
        assert_eq!(restored.channel_sensor("fan1").unwrap(), 0);
        assert_eq!(restored.channel_status("fan1").unwrap().mode, FanMode::Off);
    }

    #[test]
    fn test_set_unknown_profile_fails_softly() {
        let dir = TempDir::new().unwrap();
        let (manager, _) = idle(SensorRegistry::new(), dir.path());
        manager.apply_fan_mode("fan1", 0, FanCurve::fixed_speed_curve(30)).unwrap();

        assert!(matches!(manager.set_profile(Some("ghost")), Err(Error::ProfileNotFound(_))));
        assert_eq!(manager.active_profile(), None);
        assert_eq!(manager.channel_status("fan1").unwrap().mode, FanMode::Off);

        assert_eq!(manager.set_profile(None).unwrap(), None);
    }

    #[test]
    fn test_class_mismatch_is_skipped() {
        let dir = TempDir::new().unwrap();
        let sensors = registry_with(vec![sensor("cpu", 40.0)]);
        let (manager, _) = idle(sensors, dir.path());
        manager.apply_fan_mode("fan1", 1, FanCurve::linear_curve()).unwrap();
        let mut profile = manager.serialize_profile();
        profile.controllers[0].class = "SomethingElse".to_string();

        manager.set_profile(None).unwrap();
        manager.apply_profile(&ProfileData::Versioned(profile));
        assert_eq!(manager.channel_sensor("fan1").unwrap(), 0);
    }

    #[test]
    fn test_update_interval() {
        let dir = TempDir::new().unwrap();
        let (manager, _) = idle(SensorRegistry::new(), dir.path());
        manager.update_interval(2.5).unwrap();
        assert_eq!(manager.interval(), Duration::from_millis(2500));
    }

    #[test]
    fn test_invalid_interval_is_rejected_and_kept() {
        let dir = TempDir::new().unwrap();
        let (manager, _) = idle(SensorRegistry::new(), dir.path());
        manager.update_interval(2.5).unwrap();

        for seconds in [f64::INFINITY, f64::NEG_INFINITY, f64::NAN, 0.0, -1.0, 1e12] {
            assert!(
                matches!(manager.update_interval(seconds), Err(Error::Config(_))),
                "{seconds} accepted"
            );
            assert_eq!(manager.interval(), Duration::from_millis(2500));
        }
    }

    #[test]
    fn test_interval_bounds() {
        assert_eq!(interval_from_secs(MIN_INTERVAL_SECS).unwrap(), Duration::from_millis(100));
        assert_eq!(interval_from_secs(MAX_INTERVAL_SECS).unwrap(), Duration::from_secs(86_400));
        assert!(interval_from_secs(0.05).is_err());
        assert!(interval_from_secs(f64::INFINITY).is_err());
    }

    #[test]
    fn test_close_restores_automatic_control_when_asked() {
        let dir = TempDir::new().unwrap();
        let (manager, handle) =
            manager_with(SensorRegistry::new(), dir.path(), Duration::from_millis(10));
        manager.apply_fan_mode("fan1", 0, FanCurve::fixed_speed_curve(40)).unwrap();
        manager.start();
        assert!(wait_until(|| handle.duty("fan1") == 40));

        manager.close(true);
        assert_eq!(handle.duty("fan1"), 0);
        assert_eq!(handle.releases(), 1);
        assert!(!manager.channel_status("fan1").unwrap().valid);
    }

    #[test]
    fn test_close_can_leave_manual_control() {
        let dir = TempDir::new().unwrap();
        let (manager, handle) = idle(SensorRegistry::new(), dir.path());
        manager.close(false);
        assert_eq!(handle.releases(), 0);
        assert!(!manager.channel_status("fan1").unwrap().valid);
    }

    #[test]
    fn test_legacy_profile_applies_to_first_controller() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("old.cfp");
        std::fs::write(
            &path,
            r#"{"fan1": {"curve": [[0, 0], [100, 100]], "sensor": ["TestSensor", "cpu"]}}"#,
        )
        .unwrap();

        let sensors = registry_with(vec![sensor("cpu", 40.0)]);
        let interval = Duration::from_secs(60);
        let (manager, _) =
            manager_over(&["first", "second"], IMMEDIATE, sensors, dir.path(), interval);
        let name = manager.load_profile(&path).unwrap();
        assert_eq!(manager.set_profile(Some(&name)).unwrap(), Some("old".to_string()));

        assert_eq!(manager.channel_sensor("fan1").unwrap(), 1);
        assert_eq!(
            manager.channel_curve("fan1").unwrap(),
            vec![GraphPoint(0.0, 0), GraphPoint(100.0, 100)]
        );
        assert_eq!(manager.channel_sensor("fan2").unwrap(), 0);

        assert!(manager.set_active_controller(1));
        for channel in ["fan1", "fan2"] {
            assert_eq!(manager.channel_sensor(channel).unwrap(), 0);
            assert_eq!(manager.channel_status(channel).unwrap().mode, FanMode::Off);
        }
    }

    #[test]
    fn test_profile_with_fewer_controllers_resets_the_rest() {
        let dir = TempDir::new().unwrap();
        let sensors = registry_with(vec![sensor("cpu", 40.0)]);
        let (single, _) = idle(sensors, dir.path());
        single.apply_fan_mode("fan1", 1, FanCurve::linear_curve()).unwrap();
        single.save_profile("single").unwrap();

        let sensors = registry_with(vec![sensor("cpu", 40.0)]);
        let interval = Duration::from_secs(60);
        let (manager, _) =
            manager_over(&["first", "second"], IMMEDIATE, sensors, dir.path(), interval);

        // stale settings on the controller the profile does not cover
        assert!(manager.set_active_controller(1));
        manager.apply_fan_mode("fan2", 1, FanCurve::full_speed_curve()).unwrap();

        manager.load_profile(&dir.path().join("single.cfp")).unwrap();
        assert_eq!(manager.set_profile(Some("single")).unwrap(), Some("single".to_string()));
        assert_eq!(manager.channel_sensor("fan2").unwrap(), 0);
        assert_eq!(manager.channel_status("fan2").unwrap().mode, FanMode::Off);

        assert!(manager.set_active_controller(0));
        assert_eq!(manager.channel_sensor("fan1").unwrap(), 1);
        assert_eq!(manager.channel_status("fan1").unwrap().mode, FanMode::Curve);
    }

    #[test]
    fn test_termination_mid_ramp_finishes_ramp_then_parks() {
        let dir = TempDir::new().unwrap();
        let cpu = Arc::new(TestSensor::new("cpu", 99.0));
        let sensors = registry_with(vec![cpu.clone() as Arc<dyn Sensor>]);
        let slow = RampSettings {
            step_percent: 10,
            step_interval: Duration::from_millis(20),
        };
        let interval = Duration::from_millis(5);
        let (manager, handles) = manager_over(&["mock"], slow, sensors, dir.path(), interval);
        let handle = &handles[0];

        manager.apply_fan_mode("fan1", 1, FanCurve::linear_curve()).unwrap();
        manager.start();
        assert!(wait_until(|| !handle.written_duties("fan1").is_empty()));
        assert!(handle.written_duties("fan1").len() < 10);

        manager.terminate_handle().request();
        cpu.set(30.0);
        assert!(wait_until(|| !manager.is_running()));
        manager.stop();

        assert_eq!(
            handle.written_duties("fan1"),
            vec![10, 20, 30, 40, 50, 60, 70, 80, 90, 99, 89, 79, 69, 59, 49, 39, 29, 19, 9, 0]
        );
    }

    #[test]
    fn test_active_controller_selection() {
        let dir = TempDir::new().unwrap();
        let (manager, _) = idle(SensorRegistry::new(), dir.path());
        assert!(manager.has_controller());
        assert_eq!(manager.controller_names(), vec!["mock"]);
        assert!(manager.set_active_controller(0));
        assert!(!manager.set_active_controller(3));
        assert_eq!(manager.channel_ids(), vec!["fan1", "fan2"]);
    }
}
