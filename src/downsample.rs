//! Fiber bundle reduction: coarser point spacing, length limits and a
//! random subset of lines.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::fiber::FiberBundle;

/// Lines with fewer points are not used to estimate the step size.
const STEP_ESTIMATE_MIN_POINTS: usize = 5;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownsampleParameters {
    /// Requested distance between output points (mm).
    pub output_step: f64,
    /// Percentage of lines to keep, in `(0, 100]`.
    pub percent: f64,
    pub min_points: usize,
    pub min_length: f64,
    pub max_length: f64,
    /// Seed of the line permutation.
    pub seed: u64,
}

impl Default for DownsampleParameters {
    fn default() -> Self {
        Self {
            output_step: 2.0,
            percent: 100.0,
            min_points: 3,
            min_length: 10.0,
            max_length: 250.0,
            seed: 0,
        }
    }
}

/// Mean segment length over the interior of the first line with at least
/// five points; `0` when there is none.
pub fn estimate_step_size(bundle: &FiberBundle) -> f64 {
    let Some(line) = bundle.lines().find(|l| l.len() >= STEP_ESTIMATE_MIN_POINTS) else {
        return 0.0;
    };
    // The first segment may be shorter than the rest.
    let inner = &line[1..];
    let segments: Vec<f64> = inner
        .windows(2)
        .map(|w| {
            let d = [w[1][0] - w[0][0], w[1][1] - w[0][1], w[1][2] - w[0][2]];
            (d[0] * d[0] + d[1] * d[1] + d[2] * d[2]).sqrt()
        })
        .collect();
    segments.iter().sum::<f64>() / segments.len() as f64
}

/// Downsample a bundle. The output step is the largest multiple of the
/// input step not above `output_step`; endpoints are always kept. Kept
/// lines stay in input order.
pub fn downsample(bundle: &FiberBundle, parameters: &DownsampleParameters) -> FiberBundle {
    let in_step = estimate_step_size(bundle);

    let stride = if in_step > 0.0 && parameters.output_step >= in_step {
        ((parameters.output_step / in_step).floor() as usize).max(1)
    } else {
        1
    };
    let (min_points, max_points) = if in_step > 0.0 {
        (
            parameters
                .min_points
                .max((parameters.min_length / in_step).floor() as usize),
            (parameters.max_length / in_step).floor() as usize,
        )
    } else {
        (parameters.min_points, usize::MAX)
    };

    let total = bundle.num_fibers();
    let keep = (total as f64 * parameters.percent.clamp(0.0, 100.0) / 100.0) as usize;

    let mut order: Vec<usize> = (0..total).collect();
    order.shuffle(&mut StdRng::seed_from_u64(parameters.seed));

    let mut selected: Vec<usize> = Vec::with_capacity(keep);
    for line in order {
        if selected.len() >= keep {
            break;
        }
        let Some(range) = bundle.line_range(line) else {
            continue;
        };
        if (min_points..=max_points).contains(&range.len()) {
            selected.push(line);
        }
    }
    selected.sort_unstable();

    let lines = selected.iter().filter_map(|&l| bundle.line_range(l)).map(|range| {
        let last = range.end.saturating_sub(1);
        range
            .enumerate()
            .filter(|(i, p)| i % stride == 0 || *p == last)
            .map(|(_, p)| p)
            .collect::<Vec<usize>>()
    });
    let out = bundle.extract(lines);

    info!(
        input_step = in_step,
        stride,
        min_points,
        max_points,
        input_fibers = total,
        output_fibers = out.num_fibers(),
        "fiber bundle downsampled"
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(n: usize, step: f64, y: f64) -> Vec<[f64; 3]> {
        (0..n).map(|i| [i as f64 * step, y, 0.0]).collect()
    }

    #[test]
    fn test_step_estimate_skips_short_lines() {
        let bundle = FiberBundle::from_lines([line(3, 5.0, 0.0), line(6, 0.5, 1.0)]);
        assert!((estimate_step_size(&bundle) - 0.5).abs() < 1e-12);
        assert_eq!(estimate_step_size(&FiberBundle::from_lines([line(4, 1.0, 0.0)])), 0.0);
    }

    #[test]
    fn test_keeps_every_nth_point_and_endpoint() {
        let mut bundle = FiberBundle::from_lines([line(10, 1.0, 0.0)]);
        bundle
            .set_scalar_array("s", (0..10).map(|i| i as f64).collect())
            .unwrap();
        let params = DownsampleParameters {
            output_step: 2.5,
            min_points: 0,
            min_length: 0.0,
            ..Default::default()
        };
        let out = downsample(&bundle, &params);
        assert_eq!(out.scalar_array("s").unwrap(), &[0.0, 2.0, 4.0, 6.0, 8.0, 9.0]);

        // Smaller output step than input step keeps everything.
        let fine = DownsampleParameters {
            output_step: 0.1,
            ..params
        };
        assert_eq!(downsample(&bundle, &fine).num_points(), 10);
    }

    #[test]
    fn test_length_limits_and_percentage() {
        let lines: Vec<Vec<[f64; 3]>> = (0..10)
            .map(|i| line(if i == 0 { 2 } else { 20 }, 1.0, i as f64))
            .collect();
        let bundle = FiberBundle::from_lines(lines);

        let params = DownsampleParameters {
            output_step: 1.0,
            min_points: 3,
            min_length: 0.0,
            max_length: 100.0,
            percent: 100.0,
            seed: 7,
        };
        assert_eq!(downsample(&bundle, &params).num_fibers(), 9);

        let short_max = DownsampleParameters {
            max_length: 10.0,
            ..params
        };
        assert_eq!(downsample(&bundle, &short_max).num_fibers(), 0);

        let half = DownsampleParameters { percent: 50.0, ..params };
        let a = downsample(&bundle, &half);
        let b = downsample(&bundle, &half);
        assert_eq!(a.num_fibers(), 5);
        assert_eq!(a, b);
    }
}
