//! Step-wise integration along the major eigenvector of a tensor field.
//!
//! Positions are in the field's scaled-IJK frame (voxel index times
//! spacing), so step lengths and arclengths are in millimetres.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::TrackingParameters;
use crate::enums::{IntegrationDirection, TerminationReason, ThresholdMode};
use crate::interpolator::BSplineInterpolator;
use crate::measures::TensorMeasureKind;
use crate::tensor::{Eigensystem, Tensor, dot};

/// Partial final steps shorter than this are not emitted.
const MIN_PARTIAL_STEP: f64 = 1e-9;

/// Scalar measure and threshold gating termination.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoppingPolicy {
    pub mode: ThresholdMode,
    pub threshold: f64,
}

impl Default for StoppingPolicy {
    fn default() -> Self {
        Self {
            mode: ThresholdMode::LinearMeasure,
            threshold: 0.25,
        }
    }
}

impl StoppingPolicy {
    pub fn new(mode: ThresholdMode, threshold: f64) -> Self {
        Self { mode, threshold }
    }

    pub fn measure(&self, eig: &Eigensystem) -> f64 {
        TensorMeasureKind::from(self.mode).from_eigensystem(eig)
    }

    /// NaN measures never pass.
    pub fn passes(&self, value: f64) -> bool {
        value >= self.threshold
    }
}

/// Result of sampling the tensor field at one position.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FieldSample {
    Tensor { tensor: Tensor, eigensystem: Eigensystem },
    /// The tensor has no usable eigensystem.
    Degenerate,
    /// The position has no resolvable region of support.
    Outside,
}

/// Supplies tensors and eigensystems at continuous scaled-IJK positions.
pub trait EigenvectorSource: Send + Sync {
    fn sample(&self, position: [f64; 3]) -> FieldSample;

    /// Centre of the sampled domain, used to orient the first step.
    fn center(&self) -> [f64; 3];
}

/// Eigenvector source backed by a B-spline interpolated tensor field.
#[derive(Clone)]
pub struct BSplineTensorSource {
    interpolator: Arc<BSplineInterpolator>,
    spacing: [f64; 3],
}

impl BSplineTensorSource {
    pub fn new(interpolator: Arc<BSplineInterpolator>) -> Self {
        let spacing = interpolator.spacing();
        Self { interpolator, spacing }
    }

    pub fn interpolator(&self) -> &BSplineInterpolator {
        &self.interpolator
    }
}

impl EigenvectorSource for BSplineTensorSource {
    fn sample(&self, position: [f64; 3]) -> FieldSample {
        let index = [0, 1, 2].map(|d| position[d] / self.spacing[d]);
        let Ok(tensor) = self.interpolator.evaluate_tensor(index) else {
            return FieldSample::Outside;
        };
        match tensor.eigensystem() {
            Some(eigensystem) => FieldSample::Tensor { tensor, eigensystem },
            None => FieldSample::Degenerate,
        }
    }

    fn center(&self) -> [f64; 3] {
        let extent = self.interpolator.extent();
        [0, 1, 2].map(|d| (extent[d] as f64 - 1.0) / 2.0 * self.spacing[d])
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StreamlinePoint {
    pub position: [f64; 3],
    pub tensor: Option<Tensor>,
    pub arclength: f64,
    /// Unit step direction taken from this point.
    pub direction: [f64; 3],
}

/// Points of one integration direction from one seed.
#[derive(Clone, Debug, PartialEq)]
pub struct Trajectory {
    pub direction: IntegrationDirection,
    pub seed: [f64; 3],
    pub points: Vec<StreamlinePoint>,
    pub termination: TerminationReason,
}

impl Trajectory {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn arclength(&self) -> f64 {
        self.points.last().map_or(0.0, |p| p.arclength)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum IntegrationState {
    Seeded,
    Stepping {
        position: [f64; 3],
        previous: [f64; 3],
        arclength: f64,
    },
    Terminated(TerminationReason),
}

pub struct StreamlineIntegrator<'a, S: EigenvectorSource> {
    source: &'a S,
    step_length: f64,
    maximum_propagation_distance: f64,
    radius_of_curvature: f64,
    stopping: StoppingPolicy,
    record_tensors: bool,
}

impl<'a, S: EigenvectorSource> StreamlineIntegrator<'a, S> {
    pub fn new(source: &'a S, parameters: &TrackingParameters) -> Self {
        Self {
            source,
            step_length: parameters.integration_step_length,
            maximum_propagation_distance: parameters.maximum_propagation_distance,
            radius_of_curvature: parameters.radius_of_curvature,
            stopping: parameters.stopping_policy,
            record_tensors: parameters.output_tensors,
        }
    }

    pub fn source(&self) -> &S {
        self.source
    }

    /// Upper bound on the number of steps of any trajectory.
    pub fn max_steps(&self) -> usize {
        (self.maximum_propagation_distance / self.step_length).floor() as usize + 1
    }

    /// Sign of the eigenvector for the first step: forward points toward the
    /// domain centre; on a tie, the largest component is made positive.
    pub fn initial_direction(
        &self,
        seed: [f64; 3],
        major: [f64; 3],
        direction: IntegrationDirection,
    ) -> [f64; 3] {
        let center = self.source.center();
        let to_center = [center[0] - seed[0], center[1] - seed[1], center[2] - seed[2]];
        let alignment = dot(major, to_center);
        let forward_sign = if alignment > 0.0 {
            1.0
        } else if alignment < 0.0 {
            -1.0
        } else {
            let largest = (0..3)
                .max_by(|&a, &b| major[a].abs().total_cmp(&major[b].abs()))
                .unwrap_or(0);
            if major[largest] < 0.0 { -1.0 } else { 1.0 }
        };
        let sign = forward_sign * direction.sign();
        major.map(|c| c * sign)
    }

    /// Run one direction from `seed` until a termination condition holds.
    pub fn integrate(&self, seed: [f64; 3], direction: IntegrationDirection) -> Trajectory {
        let mut points = Vec::new();
        let mut state = IntegrationState::Seeded;
        let max_steps = self.max_steps();
        let h = self.step_length;

        let termination = loop {
            let (position, previous, arclength) = match state {
                IntegrationState::Terminated(reason) => break reason,
                IntegrationState::Seeded => (seed, None, 0.0),
                IntegrationState::Stepping {
                    position,
                    previous,
                    arclength,
                } => (position, Some(previous), arclength),
            };

            if points.len() > max_steps {
                state = IntegrationState::Terminated(TerminationReason::MaxLengthReached);
                continue;
            }

            let (tensor, eig) = match self.source.sample(position) {
                FieldSample::Tensor { tensor, eigensystem } => (tensor, eigensystem),
                FieldSample::Degenerate => {
                    state = IntegrationState::Terminated(TerminationReason::Degenerate);
                    continue;
                }
                FieldSample::Outside => {
                    state = IntegrationState::Terminated(TerminationReason::OutOfBounds);
                    continue;
                }
            };

            if !self.stopping.passes(self.stopping.measure(&eig)) {
                state = IntegrationState::Terminated(TerminationReason::BelowThreshold);
                continue;
            }

            let major = eig.major();
            let step = match previous {
                None => self.initial_direction(seed, major, direction),
                Some(prev) if dot(prev, major) < 0.0 => major.map(|c| -c),
                Some(_) => major,
            };

            if let Some(prev) = previous {
                if self.radius_of_curvature_between(prev, step) < self.radius_of_curvature {
                    state = IntegrationState::Terminated(TerminationReason::TooCurved);
                    continue;
                }
            }

            points.push(StreamlinePoint {
                position,
                tensor: self.record_tensors.then_some(tensor),
                arclength,
                direction: step,
            });

            if arclength + h > self.maximum_propagation_distance {
                let remaining = self.maximum_propagation_distance - arclength;
                if remaining > MIN_PARTIAL_STEP {
                    self.push_partial_step(&mut points, position, step, arclength, remaining);
                }
                state = IntegrationState::Terminated(TerminationReason::MaxLengthReached);
                continue;
            }

            state = IntegrationState::Stepping {
                position: advance(position, step, h),
                previous: step,
                arclength: arclength + h,
            };
        };

        debug!(
            ?seed,
            ?direction,
            ?termination,
            points = points.len(),
            "trajectory terminated"
        );

        Trajectory {
            direction,
            seed,
            points,
            termination,
        }
    }

    /// Radius of the circle through the two step directions, `h / θ` in mm.
    fn radius_of_curvature_between(&self, previous: [f64; 3], next: [f64; 3]) -> f64 {
        let angle = dot(previous, next).clamp(-1.0, 1.0).acos();
        if angle == 0.0 {
            f64::INFINITY
        } else {
            self.step_length / angle
        }
    }

    fn push_partial_step(
        &self,
        points: &mut Vec<StreamlinePoint>,
        position: [f64; 3],
        step: [f64; 3],
        arclength: f64,
        remaining: f64,
    ) {
        let end = advance(position, step, remaining);
        // The final point still needs a resolvable tensor.
        if let FieldSample::Tensor { tensor, .. } = self.source.sample(end) {
            points.push(StreamlinePoint {
                position: end,
                tensor: self.record_tensors.then_some(tensor),
                arclength: arclength + remaining,
                direction: step,
            });
        }
    }
}

fn advance(p: [f64; 3], v: [f64; 3], h: f64) -> [f64; 3] {
    [p[0] + h * v[0], p[1] + h * v[1], p[2] + h * v[2]]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phantom;

    /// Analytic source: stick tensors along a fixed direction inside a box.
    struct Uniform {
        tensor: Tensor,
        size: f64,
    }

    impl EigenvectorSource for Uniform {
        fn sample(&self, p: [f64; 3]) -> FieldSample {
            if p.iter().any(|c| *c < 0.0 || *c > self.size) {
                return FieldSample::Outside;
            }
            match self.tensor.eigensystem() {
                Some(eigensystem) => FieldSample::Tensor {
                    tensor: self.tensor,
                    eigensystem,
                },
                None => FieldSample::Degenerate,
            }
        }

        fn center(&self) -> [f64; 3] {
            [self.size / 2.0; 3]
        }
    }

    /// Major direction rotates by a fixed angle per mm around z.
    struct Spiral {
        radians_per_mm: f64,
    }

    impl EigenvectorSource for Spiral {
        fn sample(&self, p: [f64; 3]) -> FieldSample {
            let angle = p[0] * self.radians_per_mm;
            let tensor = phantom::stick_tensor([angle.cos(), angle.sin(), 0.0], 1.7e-3, 0.2e-3);
            let eigensystem = tensor.eigensystem().unwrap();
            FieldSample::Tensor { tensor, eigensystem }
        }

        fn center(&self) -> [f64; 3] {
            [100.0, 0.0, 0.0]
        }
    }

    fn parameters() -> TrackingParameters {
        TrackingParameters {
            integration_step_length: 0.5,
            maximum_propagation_distance: 800.0,
            radius_of_curvature: 0.8,
            stopping_policy: StoppingPolicy::new(ThresholdMode::FractionalAnisotropy, 0.1),
            ..TrackingParameters::default()
        }
    }

    fn x_stick(size: f64) -> Uniform {
        Uniform {
            tensor: phantom::stick_tensor([1.0, 0.0, 0.0], 1.7e-3, 0.2e-3),
            size,
        }
    }

    #[test]
    fn test_stops_at_field_boundary() {
        let source = x_stick(10.0);
        let params = parameters();
        let integrator = StreamlineIntegrator::new(&source, &params);

        let forward = integrator.integrate([4.0, 5.0, 5.0], IntegrationDirection::Forward);
        assert_eq!(forward.termination, TerminationReason::OutOfBounds);
        // Forward heads toward the centre (+x), 4.0 ..= 10.0 in 0.5 mm steps.
        assert_eq!(forward.len(), 13);
        assert!((forward.arclength() - 6.0).abs() < 1e-12);
        for pair in forward.points.windows(2) {
            let d: f64 = (0..3).map(|i| (pair[1].position[i] - pair[0].position[i]).powi(2)).sum();
            assert!((d.sqrt() - 0.5).abs() < 1e-12);
        }

        let backward = integrator.integrate([4.0, 5.0, 5.0], IntegrationDirection::Backward);
        assert_eq!(backward.len(), 9);
        assert!(backward.points[1].position[0] < 4.0);
    }

    #[test]
    fn test_max_length_adds_partial_step() {
        let source = x_stick(100.0);
        let params = TrackingParameters {
            maximum_propagation_distance: 1.2,
            ..parameters()
        };
        let integrator = StreamlineIntegrator::new(&source, &params);
        let t = integrator.integrate([10.0, 10.0, 10.0], IntegrationDirection::Forward);
        assert_eq!(t.termination, TerminationReason::MaxLengthReached);
        let lengths: Vec<f64> = t.points.iter().map(|p| p.arclength).collect();
        assert_eq!(lengths.len(), 4);
        assert!((lengths[3] - 1.2).abs() < 1e-12);
        assert!(t.len() <= integrator.max_steps() + 1);
    }

    #[test]
    fn test_isotropic_seed_is_below_threshold() {
        let source = Uniform {
            tensor: Tensor::diagonal(1e-3, 1e-3, 1e-3),
            size: 2.0,
        };
        let params = parameters();
        let integrator = StreamlineIntegrator::new(&source, &params);
        let t = integrator.integrate([1.0; 3], IntegrationDirection::Forward);
        assert_eq!(t.termination, TerminationReason::BelowThreshold);
        assert!(t.is_empty());
    }

    #[test]
    fn test_nan_tensor_is_degenerate() {
        let source = Uniform {
            tensor: Tensor::new(f64::NAN, 0.0, 0.0, 1.0, 0.0, 1.0),
            size: 2.0,
        };
        let params = parameters();
        let t = StreamlineIntegrator::new(&source, &params)
            .integrate([1.0; 3], IntegrationDirection::Forward);
        assert_eq!(t.termination, TerminationReason::Degenerate);
    }

    #[test]
    fn test_sharp_turns_are_too_curved() {
        // 2 rad/mm with 0.5 mm steps turns about 1 rad per step: radius 0.5 mm.
        let source = Spiral { radians_per_mm: 2.0 };
        let params = parameters();
        let t = StreamlineIntegrator::new(&source, &params)
            .integrate([0.0; 3], IntegrationDirection::Forward);
        assert_eq!(t.termination, TerminationReason::TooCurved);
        assert_eq!(t.len(), 1);

        // A gentle turn keeps going until the length limit.
        let gentle = Spiral { radians_per_mm: 0.05 };
        let params = TrackingParameters {
            maximum_propagation_distance: 20.0,
            ..parameters()
        };
        let t = StreamlineIntegrator::new(&gentle, &params)
            .integrate([0.0; 3], IntegrationDirection::Forward);
        assert_eq!(t.termination, TerminationReason::MaxLengthReached);
        for pair in t.points.windows(2) {
            assert!(dot(pair[0].direction, pair[1].direction) >= 0.0);
        }
    }

    #[test]
    fn test_directions_are_opposite_at_seed() {
        let source = Uniform {
            tensor: phantom::stick_tensor([0.0, 1.0, 0.0], 1.7e-3, 0.2e-3),
            size: 10.0,
        };
        let params = parameters();
        let integrator = StreamlineIntegrator::new(&source, &params);
        // Seed on the centre plane: tie broken by the largest component.
        let f = integrator.integrate([5.0; 3], IntegrationDirection::Forward);
        let b = integrator.integrate([5.0; 3], IntegrationDirection::Backward);
        assert_eq!(f.points[0].direction[1], 1.0);
        assert_eq!(b.points[0].direction[1], -1.0);
        assert_eq!(f.points[0].position, b.points[0].position);
    }

    #[test]
    fn test_bspline_source_on_uniform_field() {
        let field =
            phantom::uniform_linear([6, 6, 6], [2.0; 3], [0.0, 0.0, 1.0], 1.7e-3, 0.2e-3).unwrap();
        let interp = Arc::new(BSplineInterpolator::for_tensor_field(&field, 3).unwrap());
        let source = BSplineTensorSource::new(interp);
        assert_eq!(source.center(), [5.0; 3]);
        assert!(matches!(source.sample([5.0, 5.0, 5.0]), FieldSample::Tensor { .. }));
        // Domain ends half a voxel past the last sample: 5.5 * 2 mm.
        assert_eq!(source.sample([5.0, 5.0, 11.5]), FieldSample::Outside);
        assert!(matches!(source.sample([5.0, 5.0, 11.0]), FieldSample::Tensor { .. }));
    }
}
