//! # DTI-tract library
//!
//! This crate serves a high-level API for diffusion tensor tractography:
//! following white-matter fibers through a field of diffusion tensors and
//! summarising what was found along them.
//!
//! A [`TensorField`] is loaded from flat 6- or 9-component tensor buffers.
//! The field is turned into B-spline coefficients once and then shared
//! read-only by every seed, so seeds are integrated in parallel using rayon.
//! Every seed produces one polyline (or two, one per direction) following the
//! major eigenvector until one of the stopping conditions holds:
//!  - the selected anisotropy measure drops below the threshold
//!  - the path leaves the field
//!  - the path bends tighter than the configured radius of curvature
//!  - the maximum propagation distance is reached
//!
//!  Fibers can carry the interpolated tensor at every point. From those the
//!  library derives per-point measures (FA, trace, Westin measures and more),
//!  direction-encoded colors and per-bundle / per-cluster statistics tables.
//!  Positions are in the field's scaled voxel frame (voxel index times
//!  spacing); [`Affine`] maps seeds in and fibers out of world space.
//!
//!   Contributions are highly welcome!
//!
//! # Roadmap
//!
//!  - Tensor-field readers (NRRD, NIfTI)
//!  - Fiber bundle writers (VTK polydata, TrackVis)
//!  - Runge-Kutta integration
//!
//! # Examples
//!
//! ## Tracking through a synthetic field
//!
//! Build a circular fiber phantom, seed a small region on the arc, track and
//! print the FA statistics of the resulting bundle.
//!
//! ```no_run
//! # use dti_tract::{phantom, StatisticsParameters, StatisticsSession};
//! # use dti_tract::{Tractography, TrackingParameters};
//! # use dti_tract::seeding::region_seeds;
//! let arc = phantom::ArcPhantom { center: [20.0, 20.0], ..Default::default() };
//! let field = phantom::circular_arc([40, 40, 5], [1.0; 3], &arc)
//!     .expect("should have built the phantom");
//! let tracker = Tractography::new(&field, TrackingParameters::default())
//!     .expect("should have computed interpolation coefficients");
//! let seeds = region_seeds([20.0, 32.0, 2.0], 2.0, 1.0).expect("should have seeded the region");
//! let output = tracker.track(&seeds).expect("should have tracked the seeds");
//!
//! let mut statistics = StatisticsSession::new(StatisticsParameters::default());
//! statistics.add_bundle("arc", &output.bundle);
//! println!("{}", statistics.render());
//! ```

pub mod coloring;
pub mod config;
pub mod downsample;
pub mod enums;
pub mod fiber;
pub mod field;
pub mod field_loader;
pub mod hyperstreamline;
pub mod interpolator;
pub mod measure_map;
pub mod measures;
pub mod phantom;
pub mod seeding;
pub mod statistics;
pub mod streamline;
pub mod tensor;
pub mod tractography;
pub mod transform;

pub use coloring::TensorToColor;
pub use config::{ClampTable, Config, ConfigError, StatisticsParameters, TrackingParameters};
pub use enums::{Orientation, TerminationReason, ThresholdMode, TrajectoryMode};
pub use fiber::FiberBundle;
pub use field::TensorField;
pub use field_loader::{ComponentLayout, FieldError, FieldLoader};
pub use interpolator::{BSplineInterpolator, InterpolationError};
pub use measure_map::MeasureMap;
pub use measures::TensorMeasureKind;
pub use statistics::{StatisticsError, StatisticsSession};
pub use streamline::{EigenvectorSource, StoppingPolicy, StreamlineIntegrator};
pub use tensor::Tensor;
pub use tractography::{Tractography, TractographyError, TractographyOutput};
pub use transform::Affine;
