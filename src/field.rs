use crate::field_loader::{FieldError, FieldLoader};
use crate::measures::TensorMeasureKind;
use crate::tensor::Tensor;
use crate::transform::Affine;

use ndarray::{Array3, Zip};

/// A regular grid of symmetric diffusion tensors.
///
/// Immutable once built; shared read-only by every integration running on it.
#[derive(Clone, Debug)]
pub struct TensorField {
    data: Array3<Tensor>,
    spacing: [f64; 3],
    ijk_to_world: Affine,
}

impl TensorField {
    pub fn new(
        data: Array3<Tensor>,
        spacing: [f64; 3],
        ijk_to_world: Affine,
    ) -> Result<Self, FieldError> {
        let (nx, ny, nz) = data.dim();
        FieldLoader::validate_extent([nx, ny, nz])?;
        FieldLoader::validate_spacing(spacing)?;
        Ok(Self {
            data,
            spacing,
            ijk_to_world,
        })
    }

    /// Get the dimensions of the field (i, j, k)
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    pub fn extent(&self) -> [usize; 3] {
        let (nx, ny, nz) = self.data.dim();
        [nx, ny, nz]
    }

    /// Get a reference to the underlying data
    pub fn data(&self) -> &Array3<Tensor> {
        &self.data
    }

    pub fn spacing(&self) -> [f64; 3] {
        self.spacing
    }

    /// World position of voxel (0, 0, 0).
    pub fn origin(&self) -> [f64; 3] {
        self.ijk_to_world.transform_point([0.0; 3])
    }

    pub fn ijk_to_world(&self) -> &Affine {
        &self.ijk_to_world
    }

    #[inline]
    pub fn tensor(&self, i: usize, j: usize, k: usize) -> Tensor {
        self.data[[i, j, k]]
    }

    /// One of the six tensor components as a scalar volume.
    pub fn component(&self, index: usize) -> Array3<f64> {
        self.data.map(|t| t.component(index))
    }

    /// Continuous voxel index of a point in scaled-IJK space.
    #[inline]
    pub fn scaled_to_index(&self, p: [f64; 3]) -> [f64; 3] {
        [p[0] / self.spacing[0], p[1] / self.spacing[1], p[2] / self.spacing[2]]
    }

    #[inline]
    pub fn index_to_scaled(&self, x: [f64; 3]) -> [f64; 3] {
        [x[0] * self.spacing[0], x[1] * self.spacing[1], x[2] * self.spacing[2]]
    }

    /// Whether a continuous voxel index lies in the sampled region
    /// `[-0.5, n - 0.5]` along every axis.
    pub fn contains_index(&self, x: [f64; 3]) -> bool {
        let extent = self.extent();
        (0..3).all(|d| x[d].is_finite() && x[d] >= -0.5 && x[d] <= extent[d] as f64 - 0.5)
    }

    /// Centre of the grid in scaled-IJK space.
    pub fn center_scaled(&self) -> [f64; 3] {
        let extent = self.extent();
        self.index_to_scaled([0, 1, 2].map(|d| (extent[d] as f64 - 1.0) / 2.0))
    }

    /// Scaled-IJK to world (RAS).
    pub fn scaled_ijk_to_world(&self) -> Affine {
        let inv_spacing = self.spacing.map(|s| 1.0 / s);
        self.ijk_to_world.compose(&Affine::scale(inv_spacing))
    }

    /// Evaluate a measure at every voxel in parallel.
    pub fn measure_volume(&self, kind: TensorMeasureKind) -> Array3<f64> {
        Zip::from(&self.data).par_map_collect(|t| kind.evaluate(t))
    }
}
