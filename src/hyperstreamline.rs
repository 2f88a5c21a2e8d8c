use crate::enums::{IntegrationDirection, TerminationReason, TrajectoryMode};
use crate::streamline::{EigenvectorSource, StreamlineIntegrator, Trajectory};
use crate::tensor::Tensor;

/// A polyline produced from one seed, before length filtering.
#[derive(Clone, Debug, PartialEq)]
pub struct Hyperstreamline {
    pub seed: [f64; 3],
    pub points: Vec<[f64; 3]>,
    /// Aligned with `points` when tensors are recorded.
    pub tensors: Option<Vec<Tensor>>,
    pub length: f64,
    pub terminations: Vec<(IntegrationDirection, TerminationReason)>,
}

impl Hyperstreamline {
    fn from_trajectory(trajectory: &Trajectory, output_tensors: bool) -> Self {
        let points = trajectory.points.iter().map(|p| p.position).collect();
        let tensors =
            output_tensors.then(|| collect_tensors(trajectory.points.iter().map(|p| p.tensor)));
        Self {
            seed: trajectory.seed,
            points,
            tensors,
            length: trajectory.arclength(),
            terminations: vec![(trajectory.direction, trajectory.termination)],
        }
    }

    /// Backward trajectory reversed, then the forward one, sharing the seed point.
    fn joined(backward: &Trajectory, forward: &Trajectory, output_tensors: bool) -> Self {
        let skip = usize::from(!backward.is_empty() && !forward.is_empty());
        let ordered: Vec<_> = backward
            .points
            .iter()
            .rev()
            .chain(forward.points.iter().skip(skip))
            .collect();

        Self {
            seed: forward.seed,
            points: ordered.iter().map(|p| p.position).collect(),
            tensors: output_tensors.then(|| collect_tensors(ordered.iter().map(|p| p.tensor))),
            length: backward.arclength() + forward.arclength(),
            terminations: vec![
                (backward.direction, backward.termination),
                (forward.direction, forward.termination),
            ],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

fn collect_tensors(tensors: impl Iterator<Item = Option<Tensor>>) -> Vec<Tensor> {
    tensors.map(|t| t.unwrap_or_default()).collect()
}

/// Runs both integration directions from a seed and combines them.
pub struct HyperstreamlineAssembler<'a, S: EigenvectorSource> {
    integrator: StreamlineIntegrator<'a, S>,
    mode: TrajectoryMode,
    output_tensors: bool,
}

impl<'a, S: EigenvectorSource> HyperstreamlineAssembler<'a, S> {
    pub fn new(
        integrator: StreamlineIntegrator<'a, S>,
        mode: TrajectoryMode,
        output_tensors: bool,
    ) -> Self {
        Self {
            integrator,
            mode,
            output_tensors,
        }
    }

    pub fn integrator(&self) -> &StreamlineIntegrator<'a, S> {
        &self.integrator
    }

    /// One polyline in [`TrajectoryMode::OneTrajectoryPerSeed`], two otherwise.
    /// Polylines are returned even when empty or short.
    pub fn assemble(&self, seed: [f64; 3]) -> Vec<Hyperstreamline> {
        let forward = self.integrator.integrate(seed, IntegrationDirection::Forward);
        let backward = self.integrator.integrate(seed, IntegrationDirection::Backward);

        match self.mode {
            TrajectoryMode::OneTrajectoryPerSeed => {
                vec![Hyperstreamline::joined(&backward, &forward, self.output_tensors)]
            }
            TrajectoryMode::TwoTrajectoriesPerSeed => vec![
                Hyperstreamline::from_trajectory(&forward, self.output_tensors),
                Hyperstreamline::from_trajectory(&backward, self.output_tensors),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackingParameters;
    use crate::phantom;
    use crate::streamline::FieldSample;

    struct Box10(Tensor);

    impl EigenvectorSource for Box10 {
        fn sample(&self, p: [f64; 3]) -> FieldSample {
            if p.iter().any(|c| *c < 0.0 || *c > 10.0) {
                return FieldSample::Outside;
            }
            FieldSample::Tensor {
                tensor: self.0,
                eigensystem: self.0.eigensystem().unwrap(),
            }
        }

        fn center(&self) -> [f64; 3] {
            [5.0; 3]
        }
    }

    fn x_box() -> Box10 {
        Box10(phantom::stick_tensor([1.0, 0.0, 0.0], 1.7e-3, 0.2e-3))
    }

    #[test]
    fn test_one_trajectory_joins_at_seed() {
        let source = x_box();
        let params = TrackingParameters {
            integration_step_length: 1.0,
            ..TrackingParameters::default()
        };
        let assembler = HyperstreamlineAssembler::new(
            StreamlineIntegrator::new(&source, &params),
            TrajectoryMode::OneTrajectoryPerSeed,
            true,
        );
        let lines = assembler.assemble([3.0, 5.0, 5.0]);
        assert_eq!(lines.len(), 1);
        let line = &lines[0];
        // 0..=10 along x with the seed point appearing once.
        assert_eq!(line.points.len(), 11);
        assert_eq!(line.points[0][0], 0.0);
        assert_eq!(line.points[10][0], 10.0);
        assert_eq!(line.points[3], [3.0, 5.0, 5.0]);
        assert_eq!(line.tensors.as_ref().unwrap().len(), 11);
        assert!((line.length - 10.0).abs() < 1e-12);
        assert_eq!(line.terminations.len(), 2);
    }

    #[test]
    fn test_two_trajectories_keep_directions_apart() {
        let source = x_box();
        let params = TrackingParameters {
            integration_step_length: 1.0,
            output_tensors: false,
            ..TrackingParameters::default()
        };
        let assembler = HyperstreamlineAssembler::new(
            StreamlineIntegrator::new(&source, &params),
            TrajectoryMode::TwoTrajectoriesPerSeed,
            false,
        );
        let lines = assembler.assemble([3.0, 5.0, 5.0]);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].points.len(), 8);
        assert_eq!(lines[1].points.len(), 4);
        assert_eq!(lines[0].points[0], lines[1].points[0]);
        assert!(lines[0].tensors.is_none());
    }

    #[test]
    fn test_isotropic_seed_gives_empty_line() {
        let source = Box10(Tensor::diagonal(1e-3, 1e-3, 1e-3));
        let params = TrackingParameters::default();
        let assembler = HyperstreamlineAssembler::new(
            StreamlineIntegrator::new(&source, &params),
            TrajectoryMode::OneTrajectoryPerSeed,
            true,
        );
        let lines = assembler.assemble([5.0; 3]);
        assert!(lines[0].is_empty());
        assert!(
            lines[0]
                .terminations
                .iter()
                .all(|(_, reason)| *reason == TerminationReason::BelowThreshold)
        );
    }
}
