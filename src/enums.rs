use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Orientation {
    Axial,
    Coronal,
    Sagittal,
}

/// Scalar measure that gates termination of a streamline.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThresholdMode {
    FractionalAnisotropy,
    #[default]
    LinearMeasure,
    PlanarMeasure,
    SphericalMeasure,
}

/// How the two integration directions of one seed are emitted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrajectoryMode {
    /// Backward trajectory reversed and joined with the forward one at the seed.
    #[default]
    OneTrajectoryPerSeed,
    /// Each direction becomes its own polyline.
    TwoTrajectoriesPerSeed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IntegrationDirection {
    Forward,
    Backward,
}

impl IntegrationDirection {
    pub fn sign(self) -> f64 {
        match self {
            IntegrationDirection::Forward => 1.0,
            IntegrationDirection::Backward => -1.0,
        }
    }
}

/// Why a trajectory stopped growing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TerminationReason {
    BelowThreshold,
    OutOfBounds,
    TooCurved,
    MaxLengthReached,
    /// The interpolated tensor had no usable eigensystem (NaN/inf components).
    Degenerate,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Separator {
    Tab,
    #[default]
    Comma,
    Space,
}

impl Separator {
    pub fn as_str(self) -> &'static str {
        match self {
            Separator::Tab => "\t",
            Separator::Comma => ",",
            Separator::Space => " ",
        }
    }
}

/// Layout of a rendered statistics table.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableLayout {
    /// Header row of measure names, one row per identifier.
    #[default]
    ColumnHierarchy,
    /// Three rows: identifiers, measure names, values.
    RowHierarchy,
}
