//! Synthetic tensor fields with known fiber geometry.

use crate::field::TensorField;
use crate::field_loader::{FieldError, FieldLoader};
use crate::tensor::{Tensor, normalized};

/// Cylindrically symmetric tensor `perp · I + (par − perp) · d dᵀ`.
pub fn stick_tensor(direction: [f64; 3], parallel: f64, perpendicular: f64) -> Tensor {
    let d = normalized(direction);
    let delta = parallel - perpendicular;
    Tensor::new(
        perpendicular + delta * d[0] * d[0],
        delta * d[0] * d[1],
        delta * d[0] * d[2],
        perpendicular + delta * d[1] * d[1],
        delta * d[1] * d[2],
        perpendicular + delta * d[2] * d[2],
    )
}

pub fn isotropic(
    extent: [usize; 3],
    spacing: [f64; 3],
    diffusivity: f64,
) -> Result<TensorField, FieldError> {
    let tensor = Tensor::diagonal(diffusivity, diffusivity, diffusivity);
    FieldLoader::load_from_fn(extent, spacing, |_| tensor)
}

/// Every voxel carries the same stick tensor along `direction`.
pub fn uniform_linear(
    extent: [usize; 3],
    spacing: [f64; 3],
    direction: [f64; 3],
    parallel: f64,
    perpendicular: f64,
) -> Result<TensorField, FieldError> {
    let tensor = stick_tensor(direction, parallel, perpendicular);
    FieldLoader::load_from_fn(extent, spacing, |_| tensor)
}

/// Geometry of a half-circle fiber tract lying in axial planes, on the
/// `+y` side of its centre.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ArcPhantom {
    /// Arc centre in scaled-IJK space (mm).
    pub center: [f64; 2],
    pub radius: f64,
    /// Half width of the tract around the arc (mm).
    pub half_width: f64,
    pub parallel: f64,
    pub perpendicular: f64,
    /// Diffusivity of the isotropic background.
    pub background: f64,
}

impl Default for ArcPhantom {
    fn default() -> Self {
        Self {
            center: [0.0, 0.0],
            radius: 12.0,
            half_width: 3.0,
            parallel: 1.7e-3,
            perpendicular: 0.3e-3,
            background: 0.8e-3,
        }
    }
}

/// Tangential stick tensors inside a half annulus, isotropic elsewhere.
pub fn circular_arc(
    extent: [usize; 3],
    spacing: [f64; 3],
    arc: &ArcPhantom,
) -> Result<TensorField, FieldError> {
    FieldLoader::load_from_fn(extent, spacing, |[i, j, _]| {
        let x = i as f64 * spacing[0] - arc.center[0];
        let y = j as f64 * spacing[1] - arc.center[1];
        let r = (x * x + y * y).sqrt();
        if r > 0.0 && y >= 0.0 && (r - arc.radius).abs() <= arc.half_width {
            stick_tensor([-y, x, 0.0], arc.parallel, arc.perpendicular)
        } else {
            Tensor::diagonal(arc.background, arc.background, arc.background)
        }
    })
}
