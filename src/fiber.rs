use std::collections::BTreeMap;
use std::ops::Range;

use thiserror::Error;

use crate::tensor::Tensor;
use crate::transform::Affine;

#[derive(Debug, Error, PartialEq)]
pub enum FiberError {
    #[error("Array '{name}' has {actual} values but the bundle has {expected} points")]
    ArrayLength {
        name: String,
        expected: usize,
        actual: usize,
    },
}

/// Polyline fiber geometry with per-point data arrays aligned by point index.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FiberBundle {
    points: Vec<[f64; 3]>,
    lines: Vec<Range<usize>>,
    scalars: BTreeMap<String, Vec<f64>>,
    tensors: BTreeMap<String, Vec<Tensor>>,
    colors: Option<Vec<[u8; 3]>>,
}

impl FiberBundle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_lines<I, L>(lines: I) -> Self
    where
        I: IntoIterator<Item = L>,
        L: AsRef<[[f64; 3]]>,
    {
        let mut bundle = Self::new();
        for line in lines {
            bundle.push_line(line.as_ref());
        }
        bundle
    }

    /// Append a polyline. Existing per-point arrays are not extended, so
    /// arrays should be attached after all lines are in place.
    pub fn push_line(&mut self, points: &[[f64; 3]]) -> usize {
        let start = self.points.len();
        self.points.extend_from_slice(points);
        self.lines.push(start..self.points.len());
        self.lines.len() - 1
    }

    pub fn num_points(&self) -> usize {
        self.points.len()
    }

    pub fn num_fibers(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn points(&self) -> &[[f64; 3]] {
        &self.points
    }

    pub fn line_range(&self, index: usize) -> Option<Range<usize>> {
        self.lines.get(index).cloned()
    }

    pub fn line(&self, index: usize) -> Option<&[[f64; 3]]> {
        self.lines.get(index).map(|r| &self.points[r.clone()])
    }

    pub fn lines(&self) -> impl Iterator<Item = &[[f64; 3]]> {
        self.lines.iter().map(|r| &self.points[r.clone()])
    }

    fn check_len(&self, name: &str, actual: usize) -> Result<(), FiberError> {
        if actual != self.points.len() {
            return Err(FiberError::ArrayLength {
                name: name.to_string(),
                expected: self.points.len(),
                actual,
            });
        }
        Ok(())
    }

    pub fn set_scalar_array(
        &mut self,
        name: impl Into<String>,
        values: Vec<f64>,
    ) -> Result<(), FiberError> {
        let name = name.into();
        self.check_len(&name, values.len())?;
        self.scalars.insert(name, values);
        Ok(())
    }

    pub fn set_tensor_array(
        &mut self,
        name: impl Into<String>,
        values: Vec<Tensor>,
    ) -> Result<(), FiberError> {
        let name = name.into();
        self.check_len(&name, values.len())?;
        self.tensors.insert(name, values);
        Ok(())
    }

    pub fn set_colors(&mut self, colors: Vec<[u8; 3]>) -> Result<(), FiberError> {
        self.check_len("colors", colors.len())?;
        self.colors = Some(colors);
        Ok(())
    }

    pub fn scalar_array(&self, name: &str) -> Option<&[f64]> {
        self.scalars.get(name).map(Vec::as_slice)
    }

    pub fn tensor_array(&self, name: &str) -> Option<&[Tensor]> {
        self.tensors.get(name).map(Vec::as_slice)
    }

    pub fn scalar_arrays(&self) -> impl Iterator<Item = (&str, &[f64])> {
        self.scalars.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn tensor_arrays(&self) -> impl Iterator<Item = (&str, &[Tensor])> {
        self.tensors.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn colors(&self) -> Option<&[[u8; 3]]> {
        self.colors.as_deref()
    }

    /// Arclength of one polyline.
    pub fn fiber_length(&self, index: usize) -> f64 {
        self.line(index).map_or(0.0, polyline_length)
    }

    /// Mean arclength over lines with at least two points; NaN when there are none.
    pub fn mean_length(&self) -> f64 {
        let lengths: Vec<f64> = self
            .lines()
            .filter(|l| l.len() >= 2)
            .map(polyline_length)
            .collect();
        if lengths.is_empty() {
            return f64::NAN;
        }
        lengths.iter().sum::<f64>() / lengths.len() as f64
    }

    pub fn transform_points(&mut self, affine: &Affine) {
        for p in self.points.iter_mut() {
            *p = affine.transform_point(*p);
        }
    }

    /// Apply `R T Rᵀ` to every tensor array.
    pub fn rotate_tensors(&mut self, rotation: &[[f64; 3]; 3]) {
        for values in self.tensors.values_mut() {
            for t in values.iter_mut() {
                *t = t.rotate(rotation);
            }
        }
    }

    /// Build a new bundle from lists of point indices, one list per output
    /// line. Every per-point array is carried along.
    pub(crate) fn extract<I>(&self, lines: I) -> FiberBundle
    where
        I: IntoIterator<Item = Vec<usize>>,
    {
        let mut out = FiberBundle::new();
        let mut selected = Vec::new();
        for indices in lines {
            let start = out.points.len();
            out.points.extend(indices.iter().map(|&i| self.points[i]));
            out.lines.push(start..out.points.len());
            selected.extend(indices);
        }
        for (name, values) in &self.scalars {
            out.scalars.insert(name.clone(), selected.iter().map(|&i| values[i]).collect());
        }
        for (name, values) in &self.tensors {
            out.tensors.insert(name.clone(), selected.iter().map(|&i| values[i]).collect());
        }
        out.colors = self
            .colors
            .as_ref()
            .map(|c| selected.iter().map(|&i| c[i]).collect());
        out
    }

    /// Copy of the lines at the given indices, in the given order.
    pub fn subset(&self, line_indices: &[usize]) -> FiberBundle {
        self.extract(
            line_indices
                .iter()
                .filter_map(|&l| self.line_range(l))
                .map(|r| r.collect()),
        )
    }
}

pub fn polyline_length(points: &[[f64; 3]]) -> f64 {
    points
        .windows(2)
        .map(|w| {
            let d = [w[1][0] - w[0][0], w[1][1] - w[0][1], w[1][2] - w[0][2]];
            (d[0] * d[0] + d[1] * d[1] + d[2] * d[2]).sqrt()
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn straight(n: usize, step: f64, y: f64) -> Vec<[f64; 3]> {
        (0..n).map(|i| [i as f64 * step, y, 0.0]).collect()
    }

    #[test]
    fn test_counts_and_lengths() {
        let bundle = FiberBundle::from_lines([
            straight(5, 0.5, 0.0),
            straight(3, 1.0, 1.0),
            straight(1, 1.0, 2.0),
        ]);
        assert_eq!(bundle.num_fibers(), 3);
        assert_eq!(bundle.num_points(), 9);
        assert_eq!(bundle.fiber_length(0), 2.0);
        // The single-point line does not contribute to the mean.
        assert_eq!(bundle.mean_length(), 2.0);
        assert!(FiberBundle::new().mean_length().is_nan());
    }

    #[test]
    fn test_arrays_must_align_with_points() {
        let mut bundle = FiberBundle::from_lines([straight(3, 1.0, 0.0)]);
        assert!(bundle.set_scalar_array("FA", vec![0.1, 0.2, 0.3]).is_ok());
        assert_eq!(
            bundle.set_scalar_array("MD", vec![0.1]),
            Err(FiberError::ArrayLength {
                name: "MD".into(),
                expected: 3,
                actual: 1
            })
        );
    }

    #[test]
    fn test_extract_carries_arrays() {
        let mut bundle = FiberBundle::from_lines([straight(3, 1.0, 0.0), straight(2, 1.0, 5.0)]);
        bundle.set_scalar_array("s", vec![0.0, 1.0, 2.0, 3.0, 4.0]).unwrap();
        bundle
            .set_tensor_array("Tensors", vec![Tensor::diagonal(1.0, 1.0, 1.0); 5])
            .unwrap();

        let second = bundle.subset(&[1]);
        assert_eq!(second.num_fibers(), 1);
        assert_eq!(second.scalar_array("s").unwrap(), &[3.0, 4.0]);
        assert_eq!(second.tensor_array("Tensors").unwrap().len(), 2);
        assert_eq!(second.line(0).unwrap()[0], [0.0, 5.0, 0.0]);
    }

    #[test]
    fn test_subset_skips_unknown_lines() {
        let mut bundle = FiberBundle::from_lines([straight(3, 1.0, 0.0), straight(2, 1.0, 5.0)]);
        bundle.set_scalar_array("s", vec![0.0, 1.0, 2.0, 3.0, 4.0]).unwrap();

        let picked = bundle.subset(&[7, 1, 2]);
        assert_eq!(picked.num_fibers(), 1);
        assert_eq!(picked.scalar_array("s").unwrap(), &[3.0, 4.0]);
        assert!(bundle.subset(&[5]).is_empty());
    }

    #[test]
    fn test_transform_and_rotate() {
        let mut bundle = FiberBundle::from_lines([straight(2, 1.0, 0.0)]);
        bundle
            .set_tensor_array("Tensors", vec![Tensor::diagonal(2.0, 1.0, 1.0); 2])
            .unwrap();
        bundle.transform_points(&Affine::translation([1.0, 0.0, 0.0]));
        assert_eq!(bundle.points()[1], [2.0, 0.0, 0.0]);

        // Quarter turn about z swaps the x and y diagonal entries.
        bundle.rotate_tensors(&[[0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]]);
        let t = bundle.tensor_array("Tensors").unwrap()[0];
        assert!((t.component(0) - 1.0).abs() < 1e-12);
        assert!((t.component(3) - 2.0).abs() < 1e-12);
    }
}
