use crate::{field::TensorField, tensor::Tensor, transform::Affine};

use ndarray::Array3;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error, PartialEq)]
pub enum FieldError {
    #[error("Tensor field extent must be non-zero, got {0:?}")]
    EmptyExtent([usize; 3]),

    #[error("Spacing must be finite and non-zero, got {0:?}")]
    InvalidSpacing([f64; 3]),

    #[error("Expected {expected} values for the given extent, got {actual}")]
    BufferLength { expected: usize, actual: usize },

    #[error("Unsupported number of tensor components: {0} (expected 6 or 9)")]
    UnsupportedComponents(usize),

    #[error("Voxel-to-world transform is singular")]
    SingularTransform,
}

/// Memory layout of the per-voxel tensor samples.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ComponentLayout {
    /// `(xx, xy, xz, yy, yz, zz)`
    UpperTriangular,
    /// Full 3x3 row-major, symmetry assumed.
    RowMajor,
}

impl ComponentLayout {
    pub fn from_count(count: usize) -> Result<Self, FieldError> {
        match count {
            6 => Ok(ComponentLayout::UpperTriangular),
            9 => Ok(ComponentLayout::RowMajor),
            n => Err(FieldError::UnsupportedComponents(n)),
        }
    }

    pub fn len(self) -> usize {
        match self {
            ComponentLayout::UpperTriangular => 6,
            ComponentLayout::RowMajor => 9,
        }
    }
}

/// Relative asymmetry of a 9-component tensor above which a load warns.
const ASYMMETRY_TOLERANCE: f64 = 1e-6;

pub struct FieldLoader;

impl FieldLoader {
    /// Build a tensor field from a flat, x-fastest sample buffer
    ///
    /// # Arguments
    ///
    /// * `extent` - Number of voxels along i, j, k
    /// * `values` - `extent` product times `layout.len()` values
    /// * `layout` - Per-voxel component layout
    /// * `spacing` - Voxel size along i, j, k
    /// * `ijk_to_world` - Voxel-to-world transform
    ///
    /// # Errors
    ///
    /// Returns error if the extent is empty, the spacing has a zero component,
    /// the buffer length does not match or the transform is singular
    pub fn load_from_components(
        extent: [usize; 3],
        values: &[f64],
        layout: ComponentLayout,
        spacing: [f64; 3],
        ijk_to_world: Affine,
    ) -> Result<TensorField, FieldError> {
        Self::validate_extent(extent)?;
        Self::validate_spacing(spacing)?;
        if ijk_to_world.inverse().is_none() {
            return Err(FieldError::SingularTransform);
        }

        let voxels = extent[0] * extent[1] * extent[2];
        let expected = voxels * layout.len();
        if values.len() != expected {
            return Err(FieldError::BufferLength {
                expected,
                actual: values.len(),
            });
        }

        let data = Self::build_tensor_array(extent, values, layout);
        TensorField::new(data, spacing, ijk_to_world)
    }

    /// Build a tensor field from a closure evaluated at every voxel index
    pub fn load_from_fn(
        extent: [usize; 3],
        spacing: [f64; 3],
        f: impl Fn([usize; 3]) -> Tensor,
    ) -> Result<TensorField, FieldError> {
        Self::validate_extent(extent)?;
        Self::validate_spacing(spacing)?;
        let data =
            Array3::from_shape_fn((extent[0], extent[1], extent[2]), |(i, j, k)| f([i, j, k]));
        TensorField::new(data, spacing, Affine::scale(spacing))
    }

    pub(crate) fn validate_extent(extent: [usize; 3]) -> Result<(), FieldError> {
        if extent.contains(&0) {
            return Err(FieldError::EmptyExtent(extent));
        }
        Ok(())
    }

    pub(crate) fn validate_spacing(spacing: [f64; 3]) -> Result<(), FieldError> {
        if spacing.iter().any(|s| *s == 0.0 || !s.is_finite()) {
            return Err(FieldError::InvalidSpacing(spacing));
        }
        Ok(())
    }

    fn build_tensor_array(
        extent: [usize; 3],
        values: &[f64],
        layout: ComponentLayout,
    ) -> Array3<Tensor> {
        let [nx, ny, _] = extent;
        let stride = layout.len();
        let mut worst_asymmetry = 0.0_f64;

        let data = Array3::from_shape_fn((extent[0], extent[1], extent[2]), |(i, j, k)| {
            let offset = (i + nx * (j + ny * k)) * stride;
            let chunk = &values[offset..offset + stride];
            match layout {
                ComponentLayout::UpperTriangular => {
                    Tensor::new(chunk[0], chunk[1], chunk[2], chunk[3], chunk[4], chunk[5])
                }
                ComponentLayout::RowMajor => {
                    let mut m = [0.0; 9];
                    m.copy_from_slice(chunk);
                    let scale = m.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
                    if scale > 0.0 {
                        worst_asymmetry = worst_asymmetry.max(Tensor::asymmetry(&m) / scale);
                    }
                    Tensor::from_row_major(&m)
                }
            }
        });

        if worst_asymmetry > ASYMMETRY_TOLERANCE {
            warn!(
                asymmetry = worst_asymmetry,
                "non-symmetric tensors found, using (T + Tᵀ)/2"
            );
        }
        data
    }
}
