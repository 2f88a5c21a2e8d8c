//! Scalar invariants of a diffusion tensor.
//!
//! Every measure is a pure function of the (clamped, descending) eigenvalues.
//! [`TensorMeasureKind`] is the single catalog shared by fiber coloring,
//! measure maps, stopping policies and the statistics pipeline.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::enums::ThresholdMode;
use crate::tensor::{Eigensystem, Tensor};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TensorMeasureKind {
    Trace,
    MeanDiffusivity,
    RelativeAnisotropy,
    FractionalAnisotropy,
    LinearMeasure,
    PlanarMeasure,
    SphericalMeasure,
    MinEigenvalue,
    MidEigenvalue,
    MaxEigenvalue,
    ParallelDiffusivity,
    PerpendicularDiffusivity,
}

type MeasureFn = fn(&[f64; 3]) -> f64;

const MEASURE_TABLE: [(TensorMeasureKind, &str, MeasureFn); 12] = [
    (TensorMeasureKind::Trace, "Trace", trace),
    (TensorMeasureKind::MeanDiffusivity, "MeanDiffusivity", mean_diffusivity),
    (TensorMeasureKind::RelativeAnisotropy, "RelativeAnisotropy", relative_anisotropy),
    (TensorMeasureKind::FractionalAnisotropy, "FractionalAnisotropy", fractional_anisotropy),
    (TensorMeasureKind::LinearMeasure, "LinearMeasure", linear_measure),
    (TensorMeasureKind::PlanarMeasure, "PlanarMeasure", planar_measure),
    (TensorMeasureKind::SphericalMeasure, "SphericalMeasure", spherical_measure),
    (TensorMeasureKind::MinEigenvalue, "MinEigenvalue", min_eigenvalue),
    (TensorMeasureKind::MidEigenvalue, "MidEigenvalue", mid_eigenvalue),
    (TensorMeasureKind::MaxEigenvalue, "MaxEigenvalue", max_eigenvalue),
    (TensorMeasureKind::ParallelDiffusivity, "ParallelDiffusivity", max_eigenvalue),
    (
        TensorMeasureKind::PerpendicularDiffusivity,
        "PerpendicularDiffusivity",
        perpendicular_diffusivity,
    ),
];

impl TensorMeasureKind {
    /// The operations evaluated per tensor array by the statistics pipeline.
    pub const STATISTICS_OPERATIONS: [TensorMeasureKind; 10] = [
        TensorMeasureKind::Trace,
        TensorMeasureKind::MeanDiffusivity,
        TensorMeasureKind::RelativeAnisotropy,
        TensorMeasureKind::FractionalAnisotropy,
        TensorMeasureKind::LinearMeasure,
        TensorMeasureKind::PlanarMeasure,
        TensorMeasureKind::SphericalMeasure,
        TensorMeasureKind::MinEigenvalue,
        TensorMeasureKind::MidEigenvalue,
        TensorMeasureKind::MaxEigenvalue,
    ];

    pub fn all() -> impl Iterator<Item = TensorMeasureKind> {
        MEASURE_TABLE.iter().map(|(kind, _, _)| *kind)
    }

    fn entry(self) -> &'static (TensorMeasureKind, &'static str, MeasureFn) {
        // The table is indexed by discriminant.
        &MEASURE_TABLE[self as usize]
    }

    pub fn name(self) -> &'static str {
        self.entry().1
    }

    /// Evaluates the measure on eigenvalues sorted descending. Negative
    /// eigenvalues are clamped to zero first.
    pub fn from_eigenvalues(self, values: &[f64; 3]) -> f64 {
        let clamped = values.map(|v| v.max(0.0));
        (self.entry().2)(&clamped)
    }

    pub fn from_eigensystem(self, eig: &Eigensystem) -> f64 {
        self.from_eigenvalues(&eig.values)
    }

    /// NaN when the tensor has no eigensystem.
    pub fn evaluate(self, tensor: &Tensor) -> f64 {
        tensor
            .eigensystem()
            .map_or(f64::NAN, |eig| self.from_eigensystem(&eig))
    }

    /// Range a well-formed tensor produces, for measures that have one.
    pub fn expected_range(self) -> Option<(f64, f64)> {
        match self {
            TensorMeasureKind::FractionalAnisotropy
            | TensorMeasureKind::LinearMeasure
            | TensorMeasureKind::PlanarMeasure
            | TensorMeasureKind::SphericalMeasure => Some((0.0, 1.0)),
            TensorMeasureKind::RelativeAnisotropy => Some((0.0, std::f64::consts::SQRT_2)),
            _ => None,
        }
    }
}

impl From<ThresholdMode> for TensorMeasureKind {
    fn from(mode: ThresholdMode) -> Self {
        match mode {
            ThresholdMode::FractionalAnisotropy => TensorMeasureKind::FractionalAnisotropy,
            ThresholdMode::LinearMeasure => TensorMeasureKind::LinearMeasure,
            ThresholdMode::PlanarMeasure => TensorMeasureKind::PlanarMeasure,
            ThresholdMode::SphericalMeasure => TensorMeasureKind::SphericalMeasure,
        }
    }
}

impl fmt::Display for TensorMeasureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown tensor measure: {0}")]
pub struct UnknownMeasure(pub String);

impl FromStr for TensorMeasureKind {
    type Err = UnknownMeasure;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MEASURE_TABLE
            .iter()
            .find(|(_, name, _)| *name == s)
            .map(|(kind, _, _)| *kind)
            .ok_or_else(|| UnknownMeasure(s.to_string()))
    }
}

pub fn trace(l: &[f64; 3]) -> f64 {
    l[0] + l[1] + l[2]
}

pub fn mean_diffusivity(l: &[f64; 3]) -> f64 {
    trace(l) / 3.0
}

fn deviation_norm(l: &[f64; 3]) -> f64 {
    let mean = mean_diffusivity(l);
    l.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>().sqrt()
}

pub fn fractional_anisotropy(l: &[f64; 3]) -> f64 {
    let magnitude = l.iter().map(|v| v * v).sum::<f64>().sqrt();
    if magnitude == 0.0 {
        return 0.0;
    }
    (1.5_f64).sqrt() * deviation_norm(l) / magnitude
}

pub fn relative_anisotropy(l: &[f64; 3]) -> f64 {
    let mean = mean_diffusivity(l);
    if mean == 0.0 {
        return 0.0;
    }
    deviation_norm(l) / (3.0_f64.sqrt() * mean)
}

pub fn linear_measure(l: &[f64; 3]) -> f64 {
    let t = trace(l);
    if t == 0.0 { 0.0 } else { (l[0] - l[1]) / t }
}

pub fn planar_measure(l: &[f64; 3]) -> f64 {
    let t = trace(l);
    if t == 0.0 { 0.0 } else { 2.0 * (l[1] - l[2]) / t }
}

pub fn spherical_measure(l: &[f64; 3]) -> f64 {
    let t = trace(l);
    if t == 0.0 { 0.0 } else { 3.0 * l[2] / t }
}

pub fn min_eigenvalue(l: &[f64; 3]) -> f64 {
    l[2]
}

pub fn mid_eigenvalue(l: &[f64; 3]) -> f64 {
    l[1]
}

pub fn max_eigenvalue(l: &[f64; 3]) -> f64 {
    l[0]
}

pub fn perpendicular_diffusivity(l: &[f64; 3]) -> f64 {
    0.5 * (l[1] + l[2])
}

/// Direction-encoded color: |major eigenvector| weighted by FA, in `[0, 1]`.
pub fn orientation_color(eig: &Eigensystem) -> [f64; 3] {
    let fa = fractional_anisotropy(&eig.clamped_values()).clamp(0.0, 1.0);
    eig.major().map(|c| (c.abs() * fa).clamp(0.0, 1.0))
}
