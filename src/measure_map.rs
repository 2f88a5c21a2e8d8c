use crate::enums::Orientation;
use crate::field::TensorField;
use crate::measures::TensorMeasureKind;

use image::ImageBuffer;
use image::Luma;
use ndarray::Array3;
use ndarray::ArrayView2;
use ndarray::s;
use rayon::prelude::*;

/// One scalar tensor measure evaluated at every voxel of a field.
#[derive(Clone, Debug)]
pub struct MeasureMap {
    pub kind: TensorMeasureKind,
    pub data: Array3<f64>,
    pub spacing: [f64; 3],
}

impl MeasureMap {
    pub fn from_field(field: &TensorField, kind: TensorMeasureKind) -> Self {
        Self {
            kind,
            data: field.measure_volume(kind),
            spacing: field.spacing(),
        }
    }

    /// Get the dimensions of the map (i, j, k)
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    /// Get a reference to the underlying data
    pub fn data(&self) -> &Array3<f64> {
        &self.data
    }

    /// Voxels where the measure reaches `threshold`; NaN voxels are excluded.
    pub fn mask(&self, threshold: f64) -> Array3<bool> {
        self.data.map(|v| *v >= threshold)
    }

    /// Smallest and largest finite value, `None` if there is none.
    pub fn finite_range(&self) -> Option<(f64, f64)> {
        self.data
            .iter()
            .filter(|v| v.is_finite())
            .fold(None, |acc, &v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }

    /// Slice perpendicular to the given axis: axial fixes k, coronal fixes j,
    /// sagittal fixes i.
    pub fn get_slice_from_axis(
        &self,
        index: usize,
        orientation: &Orientation,
    ) -> Option<ArrayView2<'_, f64>> {
        if !self.is_valid_index(index, orientation) {
            return None;
        }
        let slice = match orientation {
            Orientation::Axial => self.data.slice(s![.., .., index]),
            Orientation::Coronal => self.data.slice(s![.., index, ..]),
            Orientation::Sagittal => self.data.slice(s![index, .., ..]),
        };
        Some(slice)
    }

    #[inline]
    fn normalize_to_u8(value: f64, window: (f64, f64)) -> u8 {
        let (lo, hi) = window;
        if !value.is_finite() || hi <= lo {
            return 0;
        }
        (((value - lo) / (hi - lo)) * 255.0).round().clamp(0.0, 255.0) as u8
    }

    /// 8-bit grayscale image of one slice through a linear window `(lo, hi)`.
    /// Image rows follow the second array axis of the slice.
    pub fn get_image_from_axis(
        &self,
        index: usize,
        orientation: Orientation,
        window: (f64, f64),
    ) -> Option<ImageBuffer<Luma<u8>, Vec<u8>>> {
        let slice = self.get_slice_from_axis(index, &orientation)?;
        Self::slice_to_image(&slice, window)
    }

    fn slice_to_image(
        slice: &ArrayView2<'_, f64>,
        window: (f64, f64),
    ) -> Option<ImageBuffer<Luma<u8>, Vec<u8>>> {
        let (width, height) = slice.dim();
        // Row-major pixels: transpose so that x runs along the first axis.
        let transposed = slice.t();
        let pixel_data: Vec<u8> = transposed
            .as_standard_layout()
            .as_slice()?
            .par_iter()
            .map(|&v| Self::normalize_to_u8(v, window))
            .collect();
        ImageBuffer::from_raw(width as u32, height as u32, pixel_data)
    }

    fn is_valid_index(&self, index: usize, orientation: &Orientation) -> bool {
        let dim = self.data.dim();
        let max_index = match orientation {
            Orientation::Axial => dim.2,
            Orientation::Coronal => dim.1,
            Orientation::Sagittal => dim.0,
        };
        index < max_index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field_loader::FieldLoader;
    use crate::tensor::Tensor;

    fn ramp_map() -> MeasureMap {
        // Trace grows along i.
        let field = FieldLoader::load_from_fn([4, 3, 2], [1.0; 3], |[i, _, _]| {
            let d = i as f64;
            Tensor::diagonal(d, d, d)
        })
        .unwrap();
        MeasureMap::from_field(&field, TensorMeasureKind::Trace)
    }

    #[test]
    fn test_slices_and_bounds() {
        let map = ramp_map();
        assert_eq!(map.get_slice_from_axis(0, &Orientation::Axial).unwrap().dim(), (4, 3));
        assert_eq!(map.get_slice_from_axis(2, &Orientation::Coronal).unwrap().dim(), (4, 2));
        assert_eq!(map.get_slice_from_axis(3, &Orientation::Sagittal).unwrap().dim(), (3, 2));
        assert!(map.get_slice_from_axis(2, &Orientation::Axial).is_none());
    }

    #[test]
    fn test_image_window() {
        let map = ramp_map();
        assert_eq!(map.finite_range(), Some((0.0, 9.0)));
        let image = map.get_image_from_axis(1, Orientation::Axial, (0.0, 9.0)).unwrap();
        assert_eq!(image.dimensions(), (4, 3));
        assert_eq!(image.get_pixel(0, 0)[0], 0);
        assert_eq!(image.get_pixel(3, 2)[0], 255);
        assert_eq!(image.get_pixel(1, 1)[0], 85);
    }

    #[test]
    fn test_mask() {
        let map = ramp_map();
        let mask = map.mask(6.0);
        assert_eq!(mask.iter().filter(|m| **m).count(), 2 * 3 * 2);
    }
}
