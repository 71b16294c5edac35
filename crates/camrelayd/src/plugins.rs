//! Motion plugins: stage movers attached to a camera by device id.
//!
//! Plugin tables live in a directory as `*.toml` files:
//!
//! ```toml
//! device_id = "DEV_000F314C6B39"   # optional when the file is named DEV_..._plugin_NN.toml
//! name = "Sample stage YZ"
//! version = "0.0.1"
//!
//! [x]
//! device = "p02/motor/eh1.01"
//! conversion = 0.001
//!
//! [y]
//! device = "p02/motor/eh1.02"
//! conversion = -0.001
//! ```
//!
//! Moves are dry runs: each axis logs and tracks its relative move.

use crate::config::is_valid_device_id;
use camrelay_hw::PendingTally;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

const DEFAULT_MOVE_TIMEOUT_MS: u64 = 5000;

#[derive(Error, Debug)]
pub enum PluginError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("bad plugin table {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("{0}: no valid device id in the table or the file name")]
    NoDevice(PathBuf),
    #[error("failed to start move on {axis}: {source}")]
    Spawn {
        axis: String,
        #[source]
        source: std::io::Error,
    },
    #[error("axis moves still running after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginDescription {
    pub name: String,
    pub version: String,
}

/// A stage that can move the imaged object.
pub trait MotionPlugin: Send + Sync {
    fn describe(&self) -> PluginDescription;
    /// Relative move in image units. Returns once every axis has finished.
    fn move_by(&self, dx: f64, dy: f64) -> Result<(), PluginError>;
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AxisTable {
    /// Motor device name.
    pub device: String,
    /// Motor units per image unit.
    pub conversion: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct PluginTable {
    device_id: Option<String>,
    name: String,
    #[serde(default = "default_version")]
    version: String,
    x: Option<AxisTable>,
    y: Option<AxisTable>,
    #[serde(default = "default_move_timeout")]
    move_timeout_ms: u64,
}

fn default_version() -> String {
    "0.0.1".into()
}

fn default_move_timeout() -> u64 {
    DEFAULT_MOVE_TIMEOUT_MS
}

#[derive(Debug, Clone)]
struct Axis {
    device: String,
    conversion: f64,
    position: Arc<Mutex<f64>>,
}

impl Axis {
    fn new(table: AxisTable) -> Self {
        Self {
            device: table.device,
            conversion: table.conversion,
            position: Arc::new(Mutex::new(0.0)),
        }
    }

    fn position(&self) -> f64 {
        *self.position.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Two-axis mover. One thread per moving axis; `move_by` waits for all of
/// them before returning.
#[derive(Debug)]
pub struct AxisMover {
    description: PluginDescription,
    x: Option<Axis>,
    y: Option<Axis>,
    moves: PendingTally,
    timeout: Duration,
}

impl AxisMover {
    pub fn new(
        description: PluginDescription,
        x: Option<AxisTable>,
        y: Option<AxisTable>,
        timeout: Duration,
    ) -> Self {
        Self {
            description,
            x: x.map(Axis::new),
            y: y.map(Axis::new),
            moves: PendingTally::new(),
            timeout,
        }
    }

    /// Accumulated positions of the x and y motors.
    pub fn positions(&self) -> (Option<f64>, Option<f64>) {
        (
            self.x.as_ref().map(Axis::position),
            self.y.as_ref().map(Axis::position),
        )
    }

    fn start(&self, axis: &Axis, delta: f64) -> Result<(), PluginError> {
        let token = self.moves.enter();
        let axis = axis.clone();
        let device = axis.device.clone();
        let step = axis.conversion * delta;
        std::thread::Builder::new()
            .name("camrelay-axis".into())
            .spawn(move || {
                let _token = token;
                let mut pos = axis.position.lock().unwrap_or_else(|e| e.into_inner());
                let old = *pos;
                *pos += step;
                tracing::info!(
                    device = %axis.device,
                    old = format_args!("{old:6.4}"),
                    new = format_args!("{:6.4}", *pos),
                    "relative move (dry run)"
                );
            })
            .map(drop)
            .map_err(|source| PluginError::Spawn {
                axis: device,
                source,
            })
    }
}

impl MotionPlugin for AxisMover {
    fn describe(&self) -> PluginDescription {
        self.description.clone()
    }

    fn move_by(&self, dx: f64, dy: f64) -> Result<(), PluginError> {
        for (label, axis, delta) in [("x", &self.x, dx), ("y", &self.y, dy)] {
            if delta == 0.0 {
                continue;
            }
            match axis {
                Some(axis) => self.start(axis, delta)?,
                None => tracing::warn!(
                    plugin = %self.description.name,
                    axis = label,
                    delta,
                    "no motor configured for axis"
                ),
            }
        }
        if self.moves.wait_idle(self.timeout) {
            Ok(())
        } else {
            Err(PluginError::Timeout(self.timeout))
        }
    }
}

/// Motion plugins keyed by camera device id.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: BTreeMap<String, Vec<Arc<dyn MotionPlugin>>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, device_id: &str, plugin: Arc<dyn MotionPlugin>) {
        self.plugins
            .entry(device_id.to_string())
            .or_default()
            .push(plugin);
    }

    pub fn for_device(&self, device_id: &str) -> &[Arc<dyn MotionPlugin>] {
        self.plugins.get(device_id).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn device_ids(&self) -> impl Iterator<Item = &str> {
        self.plugins.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.plugins.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Load every `*.toml` table in `dir`, in file-name order. Broken tables
    /// are logged and skipped.
    pub fn from_dir(dir: &Path) -> Result<Self, PluginError> {
        let io_err = |source| PluginError::Io {
            path: dir.to_path_buf(),
            source,
        };
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
            .map_err(io_err)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "toml"))
            .collect();
        paths.sort();

        let mut registry = Self::new();
        for path in paths {
            match load_table(&path) {
                Ok((device_id, plugin)) => {
                    tracing::info!(
                        device = %device_id,
                        plugin = %plugin.describe().name,
                        path = %path.display(),
                        "motion plugin loaded"
                    );
                    registry.register(&device_id, plugin);
                }
                Err(e) => tracing::warn!(error = %e, "skipping motion plugin"),
            }
        }
        Ok(registry)
    }
}

fn load_table(path: &Path) -> Result<(String, Arc<dyn MotionPlugin>), PluginError> {
    let text = std::fs::read_to_string(path).map_err(|source| PluginError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let table: PluginTable = toml::from_str(&text).map_err(|source| PluginError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    let device_id = table
        .device_id
        .clone()
        .or_else(|| device_id_from_file_name(path))
        .filter(|id| is_valid_device_id(id))
        .ok_or_else(|| PluginError::NoDevice(path.to_path_buf()))?;
    let mover = AxisMover::new(
        PluginDescription {
            name: table.name,
            version: table.version,
        },
        table.x,
        table.y,
        Duration::from_millis(table.move_timeout_ms),
    );
    Ok((device_id, Arc::new(mover)))
}

/// `DEV_000F314C6B39_plugin_01.toml` → `DEV_000F314C6B39`
fn device_id_from_file_name(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?;
    let (id, _) = stem.split_once("_plugin")?;
    Some(id.to_string())
}
