// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Profile documents and the on-disk profile store.
//!
//! A profile records, per controller and channel, the curve as graph
//! points and the signature of the sensor driving it. Files are UTF-8 JSON
//! with a `.cfp` extension:
//!
//! ```json
//! {"version": "1", "controllers": [{"id": 0, "name": "...", "class": "...",
//!   "channels": {"pwm1": {"curve": [[0, 0], [100, 100]], "sensor": [...]}}}]}
//! ```
//!
//! Older single-controller files are a flat `{channel: {...}}` map.

use crate::curve::GraphPoint;
use crate::error::{Error, Result};
use crate::sensor::Signature;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const PROFILE_EXTENSION: &str = "cfp";
pub const PROFILE_VERSION: &str = "1";

// ---------------------------------------------------------------------------
// Document types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelProfile {
    pub curve: Vec<GraphPoint>,
    pub sensor: Signature,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerProfile {
    pub id: usize,
    pub name: String,
    pub class: String,
    #[serde(default)]
    pub channels: BTreeMap<String, ChannelProfile>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub version: String,
    #[serde(default)]
    pub controllers: Vec<ControllerProfile>,
}

impl Profile {
    pub fn new(controllers: Vec<ControllerProfile>) -> Self {
        Self {
            version: PROFILE_VERSION.to_string(),
            controllers,
        }
    }
}

/// A parsed profile file in either supported shape.
#[derive(Debug, Clone, PartialEq)]
pub enum ProfileData {
    Versioned(Profile),
    /// Flat per-channel map for single-controller systems.
    Legacy(BTreeMap<String, ChannelProfile>),
}

impl ProfileData {
    /// Parse profile JSON. Documents without a known `version` are read as
    /// the legacy flat map; entries that are not channel settings are
    /// skipped.
    pub fn parse(path: &Path, text: &str) -> Result<Self> {
        let parse_err = |source| Error::ProfileParse {
            path: path.to_path_buf(),
            source,
        };

        let value: serde_json::Value = serde_json::from_str(text).map_err(parse_err)?;
        if value.get("version").and_then(|v| v.as_str()) == Some(PROFILE_VERSION) {
            let profile = serde_json::from_value(value).map_err(parse_err)?;
            return Ok(ProfileData::Versioned(profile));
        }

        let entries: serde_json::Map<String, serde_json::Value> =
            serde_json::from_value(value).map_err(parse_err)?;
        let channels = entries
            .into_iter()
            .filter_map(|(channel, entry)| match serde_json::from_value(entry) {
                Ok(config) => Some((channel, config)),
                Err(e) => {
                    log::debug!("Skipping '{channel}' in legacy profile {}: {e}", path.display());
                    None
                }
            })
            .collect();
        Ok(ProfileData::Legacy(channels))
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Registered profiles by name (file stem) and the directory new ones are
/// saved to.
#[derive(Debug, Clone)]
pub struct ProfileStore {
    dir: PathBuf,
    profiles: BTreeMap<String, PathBuf>,
}

impl ProfileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            profiles: BTreeMap::new(),
        }
    }

    /// Create the store and register every `.cfp` file in `dir`.
    pub fn enumerate(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let mut store = Self::new(dir);
        fs::create_dir_all(&store.dir)?;
        for entry in fs::read_dir(&store.dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == PROFILE_EXTENSION) {
                store.add_profile(&path);
            }
        }
        log::info!("Found {} profile(s) in {}", store.profiles.len(), store.dir.display());
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Register a profile file and return its name.
    pub fn add_profile(&mut self, path: &Path) -> String {
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        self.profiles.insert(name.clone(), path.to_path_buf());
        name
    }

    /// Register an existing `.cfp` file from outside the store directory.
    pub fn register(&mut self, path: &Path) -> Result<String> {
        if path.extension() != Some(OsStr::new(PROFILE_EXTENSION)) {
            return Err(Error::InvalidProfileName(path.display().to_string()));
        }
        if !path.is_file() {
            return Err(Error::ProfileNotFound(path.display().to_string()));
        }
        Ok(self.add_profile(path))
    }

    pub fn names(&self) -> Vec<String> {
        self.profiles.keys().cloned().collect()
    }

    pub fn path_of(&self, name: &str) -> Option<&Path> {
        self.profiles.get(name).map(PathBuf::as_path)
    }

    pub fn read(&self, name: &str) -> Result<ProfileData> {
        let path = self
            .path_of(name)
            .ok_or_else(|| Error::ProfileNotFound(name.to_string()))?;
        let text = fs::read_to_string(path).map_err(|source| Error::ProfileRead {
            path: path.to_path_buf(),
            source,
        })?;
        ProfileData::parse(path, &text)
    }

    /// Write `profile` as `<dir>/<name>.cfp` and register it.
    ///
    /// The document is written to a temporary file next to the target and
    /// renamed over it, so readers never see a partial file.
    pub fn save(&mut self, name: &str, profile: &Profile) -> Result<String> {
        if !is_plain_name(name) {
            return Err(Error::InvalidProfileName(name.to_string()));
        }
        let mut path = self.dir.join(name);
        if path.extension().is_none_or(|ext| ext != PROFILE_EXTENSION) {
            path = self.dir.join(format!("{name}.{PROFILE_EXTENSION}"));
        }

        let write_err = |source| Error::ProfileWrite {
            path: path.clone(),
            source,
        };
        let json = serde_json::to_string_pretty(profile)
            .map_err(|e| write_err(io::Error::new(io::ErrorKind::InvalidData, e)))?;

        log::info!("Saving profile '{}'", path.display());
        let tmp = path.with_extension(format!("{PROFILE_EXTENSION}.tmp"));
        fs::write(&tmp, json).map_err(write_err)?;
        fs::rename(&tmp, &path).map_err(write_err)?;

        Ok(self.add_profile(&path))
    }

    /// Delete a profile file and forget it.
    pub fn remove(&mut self, name: &str) -> Result<()> {
        let path = self
            .profiles
            .get(name)
            .cloned()
            .ok_or_else(|| Error::ProfileNotFound(name.to_string()))?;
        fs::remove_file(&path).map_err(|source| Error::ProfileWrite {
            path: path.clone(),
            source,
        })?;
        self.profiles.remove(name);
        Ok(())
    }
}

/// A single, non-empty path component: no separators, no `.` or `..`.
fn is_plain_name(name: &str) -> bool {
    !name.trim().is_empty() && Path::new(name).file_name() == Some(OsStr::new(name))
}
