//! Seed point generation in the tracker's scaled-IJK frame.

use ndarray::Array3;
use rayon::prelude::*;

use crate::config::ConfigError;
use crate::enums::ThresholdMode;
use crate::streamline::{EigenvectorSource, FieldSample, StoppingPolicy};
use crate::transform::Affine;

/// Regular grid of seeds filling a cube around `center`
///
/// # Arguments
///
/// * `center` - Centre of the region
/// * `region_size` - Edge length of the cube; `0` yields the centre only
/// * `sample_step` - Distance between neighbouring seeds
///
/// # Errors
///
/// Returns error if `sample_step` is not positive
pub fn region_seeds(
    center: [f64; 3],
    region_size: f64,
    sample_step: f64,
) -> Result<Vec<[f64; 3]>, ConfigError> {
    if !sample_step.is_finite() || sample_step <= 0.0 {
        return Err(ConfigError::InvalidSampleStep(sample_step));
    }
    let half = region_size.abs() / 2.0;
    let count = (2.0 * half / sample_step + 1e-9).floor() as usize + 1;
    let offsets: Vec<f64> = (0..count).map(|i| -half + i as f64 * sample_step).collect();

    let mut seeds = Vec::with_capacity(count * count * count);
    for &z in &offsets {
        for &y in &offsets {
            for &x in &offsets {
                seeds.push([center[0] + x, center[1] + y, center[2] + z]);
            }
        }
    }
    Ok(seeds)
}

/// Seeds on a grid of `resolution` label voxels where the label map equals
/// `label`, mapped into scaled-IJK by `label_to_scaled`.
///
/// # Errors
///
/// Returns error if `resolution` is not positive
pub fn label_seeds(
    labels: &Array3<u16>,
    label: u16,
    label_to_scaled: &Affine,
    resolution: f64,
) -> Result<Vec<[f64; 3]>, ConfigError> {
    if !resolution.is_finite() || resolution <= 0.0 {
        return Err(ConfigError::InvalidSampleStep(resolution));
    }
    let (nx, ny, nz) = labels.dim();
    let steps = |n: usize| ((n as f64 - 1.0).max(0.0) / resolution + 1e-9).floor() as usize + 1;

    let mut seeds = Vec::new();
    for k in 0..steps(nz) {
        for j in 0..steps(ny) {
            for i in 0..steps(nx) {
                let p = [i as f64 * resolution, j as f64 * resolution, k as f64 * resolution];
                let voxel = [p[0].round() as usize, p[1].round() as usize, p[2].round() as usize];
                if labels.get(voxel).copied() == Some(label) {
                    seeds.push(label_to_scaled.transform_point(p));
                }
            }
        }
    }
    Ok(seeds)
}

/// Keep seeds whose interpolated `mode` measure reaches `start_threshold`.
pub fn filter_by_start_threshold<S: EigenvectorSource>(
    seeds: &[[f64; 3]],
    source: &S,
    mode: ThresholdMode,
    start_threshold: f64,
) -> Vec<[f64; 3]> {
    let policy = StoppingPolicy::new(mode, start_threshold);
    seeds
        .par_iter()
        .filter(|seed| match source.sample(**seed) {
            FieldSample::Tensor { eigensystem, .. } => policy.passes(policy.measure(&eigensystem)),
            _ => false,
        })
        .copied()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackingParameters;
    use crate::phantom;
    use crate::tractography::Tractography;

    #[test]
    fn test_region_grid() {
        let seeds = region_seeds([1.0, 2.0, 3.0], 2.0, 1.0).unwrap();
        assert_eq!(seeds.len(), 27);
        assert_eq!(seeds[0], [0.0, 1.0, 2.0]);
        assert_eq!(seeds[26], [2.0, 3.0, 4.0]);

        assert_eq!(region_seeds([1.0; 3], 0.0, 0.5).unwrap(), vec![[1.0; 3]]);
        assert!(matches!(region_seeds([0.0; 3], 1.0, 0.0), Err(ConfigError::InvalidSampleStep(_))));
    }

    #[test]
    fn test_label_seeds_follow_label_and_transform() {
        let mut labels = Array3::<u16>::zeros((4, 4, 4));
        labels[[1, 2, 3]] = 5;
        labels[[2, 2, 3]] = 5;
        labels[[0, 0, 0]] = 1;

        let seeds = label_seeds(&labels, 5, &Affine::scale([2.0, 2.0, 2.0]), 1.0).unwrap();
        assert_eq!(seeds, vec![[2.0, 4.0, 6.0], [4.0, 4.0, 6.0]]);

        // Half-voxel resolution samples each labelled voxel more than once.
        let dense = label_seeds(&labels, 5, &Affine::identity(), 0.5).unwrap();
        assert!(dense.len() > 2);
    }

    #[test]
    fn test_start_threshold_filters_isotropic_seeds() {
        let arc = phantom::ArcPhantom::default();
        let field = phantom::circular_arc([20, 20, 3], [1.0; 3], &arc).unwrap();
        let tracker = Tractography::new(&field, TrackingParameters::default()).unwrap();

        let seeds = [[12.0, 1.0, 1.0], [3.0, 3.0, 1.0]];
        let kept =
            filter_by_start_threshold(&seeds, tracker.source(), ThresholdMode::LinearMeasure, 0.3);
        assert_eq!(kept, vec![[12.0, 1.0, 1.0]]);
    }
}
