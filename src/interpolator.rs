//! B-spline interpolation of scalar and tensor volumes.
//!
//! Coefficients are computed once by recursive (causal + anticausal)
//! prefiltering along each axis with mirror boundary extension. Evaluation
//! sums coefficients over the `(order + 1)^3` region of support around a
//! continuous voxel index.

use crate::field::TensorField;
use crate::tensor::Tensor;

use ndarray::{Array3, Axis, Zip};
use thiserror::Error;

pub const MAX_SPLINE_ORDER: usize = 5;
pub const DEFAULT_SPLINE_ORDER: usize = 3;
const SUPPORT: usize = MAX_SPLINE_ORDER + 1;

/// Truncation tolerance of the causal initialisation sum.
const PREFILTER_TOLERANCE: f64 = 1e-10;

#[derive(Debug, Error, PartialEq)]
pub enum InterpolationError {
    #[error("Spline order {0} is not supported (valid orders are 0..=5)")]
    InvalidSplineOrder(usize),

    #[error("No input volume has been set")]
    MissingInput,

    #[error("B-spline coefficients have not been computed")]
    CoefficientsNotComputed,

    #[error("Coordinate {0:?} is outside the interpolation domain")]
    OutOfBounds([f64; 3]),

    #[error("Component {index} requested but the input has {count}")]
    InvalidComponent { index: usize, count: usize },
}

/// Grid indices (already mirror-folded) and weights along each axis.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RegionOfSupport {
    pub indices: [[usize; SUPPORT]; 3],
    pub weights: [[f64; SUPPORT]; 3],
    pub derivative_weights: [[f64; SUPPORT]; 3],
    /// `order + 1` entries of each row are used.
    pub len: usize,
}

/// Fold an index into `[0, extent)` by whole-sample mirror reflection
/// (`-1 -> 1`, `extent -> extent - 2`), repeated as needed.
pub fn fold_mirror_index(index: i64, extent: usize) -> usize {
    if extent <= 1 {
        return 0;
    }
    let period = 2 * (extent as i64 - 1);
    let r = index.rem_euclid(period);
    if r >= extent as i64 { (period - r) as usize } else { r as usize }
}

/// Centred B-spline basis function of the given order.
pub fn bspline_basis(order: usize, t: f64) -> f64 {
    let a = t.abs();
    match order {
        0 => {
            if (-0.5..0.5).contains(&t) {
                1.0
            } else {
                0.0
            }
        }
        1 => (1.0 - a).max(0.0),
        2 => {
            if a < 0.5 {
                0.75 - a * a
            } else if a < 1.5 {
                0.5 * (1.5 - a) * (1.5 - a)
            } else {
                0.0
            }
        }
        3 => {
            if a < 1.0 {
                2.0 / 3.0 - a * a + 0.5 * a * a * a
            } else if a < 2.0 {
                (2.0 - a).powi(3) / 6.0
            } else {
                0.0
            }
        }
        4 => {
            let a2 = a * a;
            if a < 0.5 {
                115.0 / 192.0 - 5.0 / 8.0 * a2 + 0.25 * a2 * a2
            } else if a < 1.5 {
                55.0 / 96.0 + 5.0 / 24.0 * a - 1.25 * a2 + 5.0 / 6.0 * a2 * a - a2 * a2 / 6.0
            } else if a < 2.5 {
                (2.5 - a).powi(4) / 24.0
            } else {
                0.0
            }
        }
        5 => {
            let a2 = a * a;
            let a4 = a2 * a2;
            if a < 1.0 {
                11.0 / 20.0 - 0.5 * a2 + 0.25 * a4 - a4 * a / 12.0
            } else if a < 2.0 {
                17.0 / 40.0 + 0.625 * a - 1.75 * a2 + 1.25 * a2 * a - 0.375 * a4 + a4 * a / 24.0
            } else if a < 3.0 {
                (3.0 - a).powi(5) / 120.0
            } else {
                0.0
            }
        }
        _ => 0.0,
    }
}

/// Derivative of the order-`order` basis: `β(n-1)(t + ½) − β(n-1)(t − ½)`.
fn bspline_basis_derivative(order: usize, t: f64) -> f64 {
    if order == 0 {
        return 0.0;
    }
    bspline_basis(order - 1, t + 0.5) - bspline_basis(order - 1, t - 0.5)
}

fn poles(order: usize) -> Vec<f64> {
    match order {
        2 => vec![8.0_f64.sqrt() - 3.0],
        3 => vec![3.0_f64.sqrt() - 2.0],
        4 => vec![
            (664.0 - 438976.0_f64.sqrt()).sqrt() + 304.0_f64.sqrt() - 19.0,
            (664.0 + 438976.0_f64.sqrt()).sqrt() - 304.0_f64.sqrt() - 19.0,
        ],
        5 => vec![
            (67.5 - (17745.0_f64 / 4.0).sqrt()).sqrt() + (105.0_f64 / 4.0).sqrt() - 6.5,
            (67.5 + (17745.0_f64 / 4.0).sqrt()).sqrt() - (105.0_f64 / 4.0).sqrt() - 6.5,
        ],
        _ => Vec::new(),
    }
}

fn initial_causal_coefficient(c: &[f64], z: f64) -> f64 {
    let n = c.len();
    let horizon = (PREFILTER_TOLERANCE.ln() / z.abs().ln()).ceil() as usize;
    if horizon < n {
        let mut zn = z;
        let mut sum = c[0];
        for value in c.iter().take(horizon).skip(1) {
            sum += zn * value;
            zn *= z;
        }
        sum
    } else {
        let mut zn = z;
        let iz = 1.0 / z;
        let mut z2n = z.powi(n as i32 - 1);
        let mut sum = c[0] + z2n * c[n - 1];
        z2n *= z2n * iz;
        for value in c.iter().take(n - 1).skip(1) {
            sum += (zn + z2n) * value;
            zn *= z;
            z2n *= iz;
        }
        sum / (1.0 - zn * zn)
    }
}

fn initial_anticausal_coefficient(c: &[f64], z: f64) -> f64 {
    let n = c.len();
    (z / (z * z - 1.0)) * (z * c[n - 2] + c[n - 1])
}

/// In-place conversion of one line of samples into spline coefficients.
fn prefilter_line(c: &mut [f64], poles: &[f64]) {
    let n = c.len();
    if n < 2 || poles.is_empty() {
        return;
    }
    let gain: f64 = poles.iter().map(|z| (1.0 - z) * (1.0 - 1.0 / z)).product();
    c.iter_mut().for_each(|v| *v *= gain);

    for &z in poles {
        c[0] = initial_causal_coefficient(c, z);
        for i in 1..n {
            c[i] += z * c[i - 1];
        }
        c[n - 1] = initial_anticausal_coefficient(c, z);
        for i in (0..n - 1).rev() {
            c[i] = z * (c[i + 1] - c[i]);
        }
    }
}

fn prefilter_volume(volume: &mut Array3<f64>, order: usize) {
    let poles = poles(order);
    if poles.is_empty() {
        return;
    }
    for axis in 0..3 {
        Zip::from(volume.lanes_mut(Axis(axis))).par_for_each(|mut lane| {
            let mut line = lane.to_vec();
            prefilter_line(&mut line, &poles);
            for (dst, src) in lane.iter_mut().zip(line) {
                *dst = src;
            }
        });
    }
}

pub struct BSplineInterpolator {
    spline_order: usize,
    extent: [usize; 3],
    spacing: [f64; 3],
    samples: Vec<Array3<f64>>,
    coefficients: Option<Vec<Array3<f64>>>,
}

impl BSplineInterpolator {
    pub fn new(spline_order: usize) -> Result<Self, InterpolationError> {
        Self::validate_order(spline_order)?;
        Ok(Self {
            spline_order,
            extent: [0; 3],
            spacing: [1.0; 3],
            samples: Vec::new(),
            coefficients: None,
        })
    }

    /// Interpolator over the six components of a tensor field, coefficients
    /// computed.
    pub fn for_tensor_field(
        field: &TensorField,
        spline_order: usize,
    ) -> Result<Self, InterpolationError> {
        let mut interpolator = Self::new(spline_order)?;
        interpolator.set_input_tensor_field(field);
        interpolator.compute_coefficients()?;
        Ok(interpolator)
    }

    fn validate_order(order: usize) -> Result<(), InterpolationError> {
        if order > MAX_SPLINE_ORDER {
            return Err(InterpolationError::InvalidSplineOrder(order));
        }
        Ok(())
    }

    /// Capture a scalar volume. Invalidates any computed coefficients.
    pub fn set_input_scalar(&mut self, volume: &Array3<f64>, spacing: [f64; 3]) {
        let (nx, ny, nz) = volume.dim();
        self.extent = [nx, ny, nz];
        self.spacing = spacing;
        self.samples = vec![volume.to_owned()];
        self.coefficients = None;
    }

    /// Capture the six components of a tensor field. Invalidates any
    /// computed coefficients.
    pub fn set_input_tensor_field(&mut self, field: &TensorField) {
        self.extent = field.extent();
        self.spacing = field.spacing();
        self.samples = (0..6).map(|c| field.component(c)).collect();
        self.coefficients = None;
    }

    pub fn spline_order(&self) -> usize {
        self.spline_order
    }

    /// Changing the order invalidates computed coefficients.
    pub fn set_spline_order(&mut self, order: usize) -> Result<(), InterpolationError> {
        Self::validate_order(order)?;
        if order != self.spline_order {
            self.spline_order = order;
            self.coefficients = None;
        }
        Ok(())
    }

    pub fn extent(&self) -> [usize; 3] {
        self.extent
    }

    pub fn spacing(&self) -> [f64; 3] {
        self.spacing
    }

    pub fn component_count(&self) -> usize {
        self.samples.len()
    }

    pub fn has_coefficients(&self) -> bool {
        self.coefficients.is_some()
    }

    pub fn coefficients(&self, component: usize) -> Option<&Array3<f64>> {
        self.coefficients.as_ref()?.get(component)
    }

    pub fn compute_coefficients(&mut self) -> Result<(), InterpolationError> {
        if self.samples.is_empty() || self.extent.contains(&0) {
            return Err(InterpolationError::MissingInput);
        }
        let order = self.spline_order;
        let coefficients = self
            .samples
            .iter()
            .map(|samples| {
                let mut c = samples.clone();
                prefilter_volume(&mut c, order);
                c
            })
            .collect();
        self.coefficients = Some(coefficients);
        Ok(())
    }

    /// Indices and weights for a continuous voxel index `x`, valid within
    /// `[-0.5, extent - 0.5]` on every axis.
    pub fn region_of_support(&self, x: [f64; 3]) -> Result<RegionOfSupport, InterpolationError> {
        let order = self.spline_order;
        let inside = (0..3).all(|d| {
            x[d].is_finite() && x[d] >= -0.5 && x[d] <= self.extent[d] as f64 - 0.5
        });
        if !inside || self.extent.contains(&0) {
            return Err(InterpolationError::OutOfBounds(x));
        }

        let offset = if order % 2 == 1 { 0.0 } else { 0.5 };
        let mut region = RegionOfSupport {
            indices: [[0; SUPPORT]; 3],
            weights: [[0.0; SUPPORT]; 3],
            derivative_weights: [[0.0; SUPPORT]; 3],
            len: order + 1,
        };
        for d in 0..3 {
            let start = (x[d] + offset).floor() as i64 - (order / 2) as i64;
            for k in 0..=order {
                let index = start + k as i64;
                let t = x[d] - index as f64;
                region.indices[d][k] = fold_mirror_index(index, self.extent[d]);
                region.weights[d][k] = bspline_basis(order, t);
                region.derivative_weights[d][k] = bspline_basis_derivative(order, t);
            }
        }
        Ok(region)
    }

    fn checked_coefficients(&self, component: usize) -> Result<&Array3<f64>, InterpolationError> {
        let coefficients = self
            .coefficients
            .as_ref()
            .ok_or(InterpolationError::CoefficientsNotComputed)?;
        coefficients
            .get(component)
            .ok_or(InterpolationError::InvalidComponent {
                index: component,
                count: coefficients.len(),
            })
    }

    #[inline]
    fn weighted_sum(
        coefficients: &Array3<f64>,
        region: &RegionOfSupport,
        wx: &[f64; SUPPORT],
        wy: &[f64; SUPPORT],
        wz: &[f64; SUPPORT],
    ) -> f64 {
        let n = region.len;
        let mut sum = 0.0;
        for k in 0..n {
            let iz = region.indices[2][k];
            for j in 0..n {
                let iy = region.indices[1][j];
                let wyz = wy[j] * wz[k];
                if wyz == 0.0 {
                    continue;
                }
                for i in 0..n {
                    sum += coefficients[[region.indices[0][i], iy, iz]] * wx[i] * wyz;
                }
            }
        }
        sum
    }

    /// Interpolated value of the first component.
    pub fn evaluate(&self, x: [f64; 3]) -> Result<f64, InterpolationError> {
        self.evaluate_component(0, x)
    }

    pub fn evaluate_component(
        &self,
        component: usize,
        x: [f64; 3],
    ) -> Result<f64, InterpolationError> {
        let coefficients = self.checked_coefficients(component)?;
        let region = self.region_of_support(x)?;
        let w = &region.weights;
        Ok(Self::weighted_sum(coefficients, &region, &w[0], &w[1], &w[2]))
    }

    /// Value and partial derivatives (per voxel index unit) of the first component.
    pub fn evaluate_gradient(&self, x: [f64; 3]) -> Result<(f64, [f64; 3]), InterpolationError> {
        self.evaluate_component_gradient(0, x)
    }

    pub fn evaluate_component_gradient(
        &self,
        component: usize,
        x: [f64; 3],
    ) -> Result<(f64, [f64; 3]), InterpolationError> {
        let coefficients = self.checked_coefficients(component)?;
        let region = self.region_of_support(x)?;
        let w = &region.weights;
        let dw = &region.derivative_weights;

        let value = Self::weighted_sum(coefficients, &region, &w[0], &w[1], &w[2]);
        let gradient = [
            Self::weighted_sum(coefficients, &region, &dw[0], &w[1], &w[2]),
            Self::weighted_sum(coefficients, &region, &w[0], &dw[1], &w[2]),
            Self::weighted_sum(coefficients, &region, &w[0], &w[1], &dw[2]),
        ];
        Ok((value, gradient))
    }

    /// Interpolated tensor; requires a six-component input.
    pub fn evaluate_tensor(&self, x: [f64; 3]) -> Result<Tensor, InterpolationError> {
        let coefficients = self
            .coefficients
            .as_ref()
            .ok_or(InterpolationError::CoefficientsNotComputed)?;
        if coefficients.len() != 6 {
            return Err(InterpolationError::InvalidComponent {
                index: 5,
                count: coefficients.len(),
            });
        }
        let region = self.region_of_support(x)?;
        let w = &region.weights;
        let mut out = [0.0; 6];
        for (slot, c) in out.iter_mut().zip(coefficients.iter()) {
            *slot = Self::weighted_sum(c, &region, &w[0], &w[1], &w[2]);
        }
        Ok(Tensor(out))
    }
}
