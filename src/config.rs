//! Tracking and statistics parameters, with defaults and JSON loading.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::enums::{Separator, TableLayout, TrajectoryMode};
use crate::interpolator::{DEFAULT_SPLINE_ORDER, MAX_SPLINE_ORDER};
use crate::streamline::StoppingPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Spline order {0} is not supported (valid orders are 0..=5)")]
    InvalidSplineOrder(usize),

    #[error("Integration step length must be finite and positive, got {0}")]
    InvalidStepLength(f64),

    #[error("{name} must be finite and non-negative, got {value}")]
    NegativeValue { name: &'static str, value: f64 },

    #[error("Minimum path length {min} exceeds maximum propagation distance {max}")]
    PathLengthRange { min: f64, max: f64 },

    #[error("Seed sample step must be positive, got {0}")]
    InvalidSampleStep(f64),

    #[error("Failed to parse configuration: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
}

fn non_negative(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || value < 0.0 {
        return Err(ConfigError::NegativeValue { name, value });
    }
    Ok(())
}

/// Parameters of streamline integration and trajectory collection.
///
/// ### Default Values
/// - `spline_order`: `3`
/// - `integration_step_length`: `0.5` mm
/// - `maximum_propagation_distance`: `800` mm
/// - `minimum_path_length`: `20` mm
/// - `radius_of_curvature`: `0.8` mm
/// - `stopping_policy`: linear measure below `0.25`
/// - `trajectory_mode`: one trajectory per seed
/// - `output_tensors`: `true`
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingParameters {
    pub spline_order: usize,

    /// Distance between consecutive points (mm).
    pub integration_step_length: f64,

    /// Longest arclength a single direction may reach (mm).
    pub maximum_propagation_distance: f64,

    /// Polylines shorter than this are discarded by the collector (mm).
    pub minimum_path_length: f64,

    /// Integration halts where the local radius of curvature drops below this (mm).
    pub radius_of_curvature: f64,

    pub stopping_policy: StoppingPolicy,

    pub trajectory_mode: TrajectoryMode,

    /// Attach the interpolated tensor to every output point.
    pub output_tensors: bool,
}

impl Default for TrackingParameters {
    fn default() -> Self {
        Self {
            spline_order: DEFAULT_SPLINE_ORDER,
            integration_step_length: 0.5,
            maximum_propagation_distance: 800.0,
            minimum_path_length: 20.0,
            radius_of_curvature: 0.8,
            stopping_policy: StoppingPolicy::default(),
            trajectory_mode: TrajectoryMode::OneTrajectoryPerSeed,
            output_tensors: true,
        }
    }
}

impl TrackingParameters {
    /// Check the parameters before any integration runs
    ///
    /// # Errors
    ///
    /// Returns error if the spline order is unsupported, the step length is not
    /// positive, a length or threshold is negative, or the minimum path length
    /// exceeds the maximum propagation distance
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.spline_order > MAX_SPLINE_ORDER {
            return Err(ConfigError::InvalidSplineOrder(self.spline_order));
        }
        let h = self.integration_step_length;
        if !h.is_finite() || h <= 0.0 {
            return Err(ConfigError::InvalidStepLength(h));
        }
        non_negative("maximum_propagation_distance", self.maximum_propagation_distance)?;
        non_negative("minimum_path_length", self.minimum_path_length)?;
        non_negative("radius_of_curvature", self.radius_of_curvature)?;
        non_negative("stopping threshold", self.stopping_policy.threshold)?;
        if self.minimum_path_length > self.maximum_propagation_distance {
            return Err(ConfigError::PathLengthRange {
                min: self.minimum_path_length,
                max: self.maximum_propagation_distance,
            });
        }
        Ok(())
    }
}

/// Inclusive range of plausible values for a measure.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClampRange {
    pub min: f64,
    pub max: f64,
}

impl ClampRange {
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Measure names whose out-of-range values are excluded from statistics.
/// An array matches an entry when its name contains the entry's key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClampTable(BTreeMap<String, ClampRange>);

impl Default for ClampTable {
    fn default() -> Self {
        let unit = ClampRange { min: 0.0, max: 1.0 };
        let mut table = BTreeMap::new();
        table.insert("FractionalAnisotropy".to_string(), unit);
        table.insert(
            "RelativeAnisotropy".to_string(),
            ClampRange {
                min: 0.0,
                max: std::f64::consts::SQRT_2,
            },
        );
        table.insert("LinearMeasure".to_string(), unit);
        table.insert("PlanarMeasure".to_string(), unit);
        table.insert("SphericalMeasure".to_string(), unit);
        Self(table)
    }
}

impl ClampTable {
    pub fn empty() -> Self {
        Self(BTreeMap::new())
    }

    pub fn insert(&mut self, key: impl Into<String>, range: ClampRange) {
        self.0.insert(key.into(), range);
    }

    pub fn range_for(&self, array_name: &str) -> Option<ClampRange> {
        self.0
            .iter()
            .find(|(key, _)| array_name.contains(key.as_str()))
            .map(|(_, range)| *range)
    }
}

/// Parameters of the statistics pipeline.
///
/// ### Default Values
/// - `more_statistics`: `true`
/// - `separator`: comma
/// - `layout`: column hierarchy
/// - `print_all_statistics`: `false`
/// - `clamp`: FA, Linear/Planar/Spherical measure in `[0, 1]`, RA in `[0, √2]`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatisticsParameters {
    /// Also compute min, max, median and variance.
    pub more_statistics: bool,
    pub separator: Separator,
    pub layout: TableLayout,
    /// Render per-fiber rows alongside the cluster rows.
    pub print_all_statistics: bool,
    pub clamp: ClampTable,
}

impl Default for StatisticsParameters {
    fn default() -> Self {
        Self {
            more_statistics: true,
            separator: Separator::Comma,
            layout: TableLayout::ColumnHierarchy,
            print_all_statistics: false,
            clamp: ClampTable::default(),
        }
    }
}

/// Complete configuration file.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub tracking: TrackingParameters,
    pub statistics: StatisticsParameters,
}

impl Config {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(json)?;
        config.tracking.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to a JSON file; missing fields take their defaults
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read, is not valid JSON or holds
    /// invalid tracking parameters
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let json = fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }
}
