// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! curvefan-daemon: system service that owns the fan controllers, runs the
//! control loop, and accepts commands from clients over a Unix domain socket.

use anyhow::Context;
use clap::Parser;
use curvefan::config::{self, Config};
use curvefan::controller::{Device, FanController};
use curvefan::hwmon;
use curvefan::manager::FanManager;
use curvefan::profile::ProfileStore;
use curvefan::protocol::{self, Request, Response, SensorInfo};
use curvefan::sensor::{Sensor, SensorRegistry};
use curvefan::signals;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Notify;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "curvefan-daemon", about = "Temperature-driven fan control daemon")]
struct Cli {
    /// Path to the configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the socket path.
    #[arg(short, long)]
    socket: Option<PathBuf>,

    /// Seconds between control loop ticks.
    #[arg(short, long)]
    interval: Option<f64>,

    /// Profile file to register at startup.
    #[arg(short, long)]
    profile: Option<PathBuf>,

    /// Apply the startup profile and start the control loop immediately.
    #[arg(long)]
    autostart: bool,

    /// Log filter used when RUST_LOG is not set.
    #[arg(long)]
    log_level: Option<String>,

    /// Root of the hwmon sysfs tree.
    #[arg(long)]
    hwmon_root: Option<PathBuf>,

    /// Directory holding saved profiles.
    #[arg(long)]
    profiles_dir: Option<PathBuf>,

    /// Write the effective configuration back to the config file.
    #[arg(long)]
    save_config: bool,
}

impl Cli {
    fn apply_overrides(&self, cfg: &mut Config) {
        let daemon = &mut cfg.daemon;
        if let Some(socket) = &self.socket {
            daemon.socket_path = socket.clone();
        }
        if let Some(interval) = self.interval {
            daemon.interval = interval;
        }
        if let Some(profile) = &self.profile {
            daemon.profile_file = Some(profile.clone());
        }
        if self.autostart {
            daemon.auto_start = true;
        }
        if let Some(level) = &self.log_level {
            daemon.log_level = level.clone();
        }
        if let Some(root) = &self.hwmon_root {
            daemon.hwmon_root = root.clone();
        }
        if let Some(dir) = &self.profiles_dir {
            daemon.profiles_dir = dir.clone();
        }
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = config::resolve_config_path(cli.config.as_deref());
    let loaded = config::load_config(&config_path);
    let mut cfg = loaded.as_ref().cloned().unwrap_or_default();
    cli.apply_overrides(&mut cfg);

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(&cfg.daemon.log_level),
    )
    .init();
    match &loaded {
        Ok(_) => log::info!("Using config {}", config_path.display()),
        Err(e) => log::warn!("Could not load config: {e}, using defaults"),
    }

    if cli.save_config {
        config::save_config(&config_path, &cfg)
            .with_context(|| format!("saving config to {}", config_path.display()))?;
    }

    let manager = Arc::new(build_manager(&cfg)?);
    manager.set_callback(|aborted| {
        if aborted {
            log::error!("Fan control loop aborted, all fans were stopped");
        }
    });

    if let Some(profile) = &cfg.daemon.profile_file {
        match manager.load_profile(profile) {
            Ok(name) => {
                log::info!("Registered startup profile '{name}'");
                if cfg.daemon.auto_start {
                    if let Err(e) = manager.set_profile(Some(&name)) {
                        log::error!("Could not apply profile '{name}': {e}");
                    }
                }
            }
            Err(e) => log::error!("Could not register startup profile: {e}"),
        }
    }
    if cfg.daemon.auto_start {
        manager.start();
    }

    let socket_path = cfg.daemon.socket_path.clone();
    let listener = bind_socket(&socket_path)?;
    log::info!("Listening on {}", socket_path.display());

    let shutdown = Arc::new(Notify::new());
    let signal_handle = {
        let term = manager.terminate_handle();
        let shutdown = shutdown.clone();
        signals::spawn_listener(move |_| {
            term.request();
            shutdown.notify_one();
        })
        .context("installing signal handlers")?
    };

    // Accept client connections
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        tokio::spawn(handle_client(stream, manager.clone()));
                    }
                    Err(e) => {
                        log::error!("Failed to accept connection: {e}");
                    }
                }
            }
            _ = shutdown.notified() => {
                log::info!("Daemon shutting down");
                break;
            }
        }
    }

    signal_handle.close();
    let closing = manager.clone();
    let restore_auto = cfg.daemon.restore_on_exit;
    if let Err(e) = tokio::task::spawn_blocking(move || closing.close(restore_auto)).await {
        log::error!("Failed to stop fan manager: {e}");
    }

    let _ = std::fs::remove_file(&socket_path);
    Ok(())
}

/// Discover sensors and controllers and assemble the manager.
fn build_manager(cfg: &Config) -> anyhow::Result<FanManager> {
    let root = &cfg.daemon.hwmon_root;

    let mut sensors = SensorRegistry::new();
    match hwmon::discover_temp_sensors(root) {
        Ok(found) => {
            for sensor in found {
                sensors.add(Arc::new(sensor));
            }
        }
        Err(e) => log::error!("Failed to discover temp sensors: {e}"),
    }

    let devices = hwmon::discover_devices(root).unwrap_or_else(|e| {
        log::error!("Failed to discover fan controllers: {e}");
        Vec::new()
    });
    let ramp = cfg.ramp.settings();
    let controllers: Vec<FanController> = devices
        .into_iter()
        .filter_map(|device| {
            let name = device.name().to_string();
            FanController::probe(Box::new(device), ramp, sensors.dummy())
                .map_err(|e| log::warn!("Skipping fan controller '{name}': {e}"))
                .ok()
        })
        .collect();

    log::info!(
        "Discovered {} fan controller(s) and {} temp sensor(s)",
        controllers.len(),
        sensors.len() - 1
    );
    if controllers.is_empty() {
        anyhow::bail!("no supported fan controller found under {}", root.display());
    }

    let profiles = ProfileStore::enumerate(&cfg.daemon.profiles_dir).unwrap_or_else(|e| {
        log::warn!(
            "Could not read profiles directory {}: {e}",
            cfg.daemon.profiles_dir.display()
        );
        ProfileStore::new(&cfg.daemon.profiles_dir)
    });

    let interval = cfg
        .daemon
        .interval()
        .context("invalid daemon interval")?;
    Ok(FanManager::new(controllers, sensors, profiles, interval))
}

fn bind_socket(path: &Path) -> anyhow::Result<UnixListener> {
    // Clean up old socket file
    let _ = std::fs::remove_file(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let listener = UnixListener::bind(path).with_context(|| format!("binding {}", path.display()))?;

    // Make socket accessible to non-root users
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o666);
        std::fs::set_permissions(path, perms)?;
    }
    Ok(listener)
}

// ---------------------------------------------------------------------------
// Client connection handler
// ---------------------------------------------------------------------------

async fn handle_client(stream: UnixStream, manager: Arc<FanManager>) {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let response = match protocol::decode::<Request>(&line) {
            Ok(req) => {
                let manager = manager.clone();
                tokio::task::spawn_blocking(move || process_request(req, &manager))
                    .await
                    .unwrap_or_else(|e| Response::error(format!("Request handler failed: {e}")))
            }
            Err(e) => Response::error(format!("Invalid request: {e}")),
        };

        let encoded = match protocol::encode(&response) {
            Ok(s) => s,
            Err(e) => {
                log::error!("Failed to encode response: {e}");
                continue;
            }
        };

        if writer.write_all(encoded.as_bytes()).await.is_err() {
            break; // Client disconnected
        }
    }
}

/// Run one request against the manager. Blocks on hardware and disk.
fn process_request(req: Request, manager: &FanManager) -> Response {
    match req {
        Request::GetStatus => Response::Status {
            running: manager.is_running(),
            interval: manager.interval().as_secs_f64(),
            controller: manager.active_controller_name(),
            active_profile: manager.active_profile(),
            channels: manager
                .channel_ids()
                .iter()
                .filter_map(|channel| manager.channel_status(channel).ok())
                .collect(),
        },

        Request::ListSensors => Response::Sensors {
            sensors: manager
                .sensors()
                .iter()
                .enumerate()
                .map(|(index, sensor)| SensorInfo {
                    index,
                    name: sensor.name().to_string(),
                    temperature: sensor.temperature(),
                    signature: sensor.signature(),
                })
                .collect(),
        },

        Request::ApplyFanMode {
            channel,
            sensor_index,
            curve,
            save_to,
        } => {
            if let Err(e) = manager.apply_fan_mode(&channel, sensor_index, curve.to_curve()) {
                return Response::error(format!("Failed to apply fan mode: {e}"));
            }
            match save_to {
                None => Response::ok(format!("Applied fan mode to '{channel}'")),
                Some(name) => match manager.save_profile(&name) {
                    Ok(saved) => Response::ok(format!(
                        "Applied fan mode to '{channel}' and saved profile '{saved}'"
                    )),
                    Err(e) => Response::error(format!(
                        "Applied fan mode but failed to save profile: {e}"
                    )),
                },
            }
        }

        Request::ListProfiles => Response::Profiles {
            profiles: manager.profile_names(),
            active: manager.active_profile(),
        },

        Request::LoadProfile { path } => match manager.load_profile(&path) {
            Ok(name) => Response::ok(format!("Registered profile '{name}'")),
            Err(e) => Response::error(format!("Failed to load profile: {e}")),
        },

        Request::SaveProfile { name } => match manager.save_profile(&name) {
            Ok(saved) => Response::ok(format!("Profile '{saved}' saved")),
            Err(e) => Response::error(format!("Failed to save profile: {e}")),
        },

        Request::SetProfile { name } => match manager.set_profile(name.as_deref()) {
            Ok(Some(active)) => Response::ok(format!("Profile '{active}' applied")),
            Ok(None) => Response::ok("All channels reset"),
            Err(e) => Response::error(format!("Failed to set profile: {e}")),
        },

        Request::SetInterval { seconds } => match manager.update_interval(seconds) {
            Ok(()) => Response::ok(format!("Interval set to {seconds}s")),
            Err(e) => Response::error(e),
        },

        Request::Start => {
            manager.start();
            Response::ok("Fan manager started")
        }

        Request::Stop => {
            manager.stop();
            Response::ok("Fan manager stopped")
        }
    }
}
