use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rayon::prelude::*;
use thiserror::Error;
use tracing::info;

use crate::config::{ConfigError, TrackingParameters};
use crate::enums::TerminationReason;
use crate::fiber::{FiberBundle, FiberError};
use crate::field::TensorField;
use crate::field_loader::FieldError;
use crate::hyperstreamline::{Hyperstreamline, HyperstreamlineAssembler};
use crate::interpolator::{BSplineInterpolator, InterpolationError};
use crate::streamline::{BSplineTensorSource, StreamlineIntegrator};

/// Name of the per-point tensor array attached to tracked fibers.
pub const TENSOR_ARRAY_NAME: &str = "Tensors";

#[derive(Debug, Error)]
pub enum TractographyError {
    #[error(transparent)]
    Field(#[from] FieldError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Interpolation(#[from] InterpolationError),

    #[error(transparent)]
    Fiber(#[from] FiberError),
}

/// Fibers of one batch plus bookkeeping about what was dropped.
#[derive(Clone, Debug, Default)]
pub struct TractographyOutput {
    pub bundle: FiberBundle,
    pub seeds_processed: usize,
    /// Polylines shorter than the minimum path length (empty ones included).
    pub discarded: usize,
    pub cancelled: bool,
    pub terminations: BTreeMap<String, usize>,
}

/// Batch driver: one interpolator per field, shared by every seed.
pub struct Tractography {
    parameters: TrackingParameters,
    source: BSplineTensorSource,
}

impl Tractography {
    /// Validate the parameters and compute B-spline coefficients for `field`
    ///
    /// # Errors
    ///
    /// Returns error if the parameters are invalid or coefficients cannot be
    /// computed
    pub fn new(
        field: &TensorField,
        parameters: TrackingParameters,
    ) -> Result<Self, TractographyError> {
        parameters.validate()?;
        let interpolator = BSplineInterpolator::for_tensor_field(field, parameters.spline_order)?;
        Ok(Self {
            parameters,
            source: BSplineTensorSource::new(Arc::new(interpolator)),
        })
    }

    pub fn parameters(&self) -> &TrackingParameters {
        &self.parameters
    }

    pub fn source(&self) -> &BSplineTensorSource {
        &self.source
    }

    pub fn track(&self, seeds: &[[f64; 3]]) -> Result<TractographyOutput, TractographyError> {
        self.track_with_cancel(seeds, &AtomicBool::new(false))
    }

    /// Track every seed in parallel; `cancel` is checked before each seed.
    /// Seeds that were not started contribute nothing.
    pub fn track_with_cancel(
        &self,
        seeds: &[[f64; 3]],
        cancel: &AtomicBool,
    ) -> Result<TractographyOutput, TractographyError> {
        let integrator = StreamlineIntegrator::new(&self.source, &self.parameters);
        let assembler = HyperstreamlineAssembler::new(
            integrator,
            self.parameters.trajectory_mode,
            self.parameters.output_tensors,
        );

        let per_seed: Vec<Option<Vec<Hyperstreamline>>> = seeds
            .par_iter()
            .map(|seed| {
                if cancel.load(Ordering::Relaxed) {
                    return None;
                }
                Some(assembler.assemble(*seed))
            })
            .collect();

        let output = self.collect(per_seed)?;
        info!(
            seeds = seeds.len(),
            processed = output.seeds_processed,
            kept = output.bundle.num_fibers(),
            discarded = output.discarded,
            cancelled = output.cancelled,
            "tractography finished"
        );
        Ok(output)
    }

    /// Keep polylines reaching the minimum path length, in seed order.
    fn collect(
        &self,
        per_seed: Vec<Option<Vec<Hyperstreamline>>>,
    ) -> Result<TractographyOutput, TractographyError> {
        let mut output = TractographyOutput::default();
        let mut tensors = Vec::new();

        for lines in per_seed {
            let Some(lines) = lines else {
                output.cancelled = true;
                continue;
            };
            output.seeds_processed += 1;
            for line in lines {
                for (_, reason) in &line.terminations {
                    *output.terminations.entry(reason_name(*reason).to_string()).or_default() += 1;
                }
                if line.is_empty() || line.length < self.parameters.minimum_path_length {
                    output.discarded += 1;
                    continue;
                }
                output.bundle.push_line(&line.points);
                if let Some(t) = line.tensors {
                    tensors.extend(t);
                }
            }
        }

        if self.parameters.output_tensors {
            output.bundle.set_tensor_array(TENSOR_ARRAY_NAME, tensors)?;
        }
        Ok(output)
    }
}

fn reason_name(reason: TerminationReason) -> &'static str {
    match reason {
        TerminationReason::BelowThreshold => "BelowThreshold",
        TerminationReason::OutOfBounds => "OutOfBounds",
        TerminationReason::TooCurved => "TooCurved",
        TerminationReason::MaxLengthReached => "MaxLengthReached",
        TerminationReason::Degenerate => "Degenerate",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enums::{ThresholdMode, TrajectoryMode};
    use crate::phantom;
    use crate::streamline::StoppingPolicy;

    fn x_field() -> TensorField {
        phantom::uniform_linear([20, 5, 5], [1.0; 3], [1.0, 0.0, 0.0], 1.7e-3, 0.2e-3).unwrap()
    }

    #[test]
    fn test_rejects_invalid_parameters() {
        let params = TrackingParameters {
            integration_step_length: -1.0,
            ..Default::default()
        };
        assert!(matches!(
            Tractography::new(&x_field(), params),
            Err(TractographyError::Config(ConfigError::InvalidStepLength(_)))
        ));
    }

    #[test]
    fn test_min_length_collector() {
        let params = TrackingParameters {
            minimum_path_length: 10.0,
            ..Default::default()
        };
        let tracker = Tractography::new(&x_field(), params).unwrap();
        // The field spans x in [-0.5, 19.5]: the full line is 20 mm.
        let output = tracker.track(&[[10.0, 2.0, 2.0], [4.0, 2.0, 2.0]]).unwrap();
        assert_eq!(output.seeds_processed, 2);
        assert_eq!(output.bundle.num_fibers(), 2);
        assert_eq!(output.discarded, 0);
        let tensors = output.bundle.tensor_array(TENSOR_ARRAY_NAME).unwrap();
        assert_eq!(tensors.len(), output.bundle.num_points());

        let strict = TrackingParameters {
            minimum_path_length: 25.0,
            ..Default::default()
        };
        let tracker = Tractography::new(&x_field(), strict).unwrap();
        let output = tracker.track(&[[10.0, 2.0, 2.0]]).unwrap();
        assert_eq!(output.bundle.num_fibers(), 0);
        assert_eq!(output.discarded, 1);
    }

    #[test]
    fn test_two_trajectories_per_seed() {
        let params = TrackingParameters {
            minimum_path_length: 1.0,
            trajectory_mode: TrajectoryMode::TwoTrajectoriesPerSeed,
            output_tensors: false,
            stopping_policy: StoppingPolicy::new(ThresholdMode::FractionalAnisotropy, 0.2),
            ..Default::default()
        };
        let tracker = Tractography::new(&x_field(), params).unwrap();
        let output = tracker.track(&[[10.0, 2.0, 2.0]]).unwrap();
        assert_eq!(output.bundle.num_fibers(), 2);
        assert!(output.bundle.tensor_array(TENSOR_ARRAY_NAME).is_none());
        assert_eq!(output.terminations.get("OutOfBounds"), Some(&2));
    }

    #[test]
    fn test_cancelled_batch_is_empty() {
        let tracker = Tractography::new(&x_field(), TrackingParameters::default()).unwrap();
        let cancel = AtomicBool::new(true);
        let output = tracker.track_with_cancel(&[[10.0, 2.0, 2.0]; 4], &cancel).unwrap();
        assert!(output.cancelled);
        assert_eq!(output.seeds_processed, 0);
        assert_eq!(output.bundle.num_fibers(), 0);
    }
}
