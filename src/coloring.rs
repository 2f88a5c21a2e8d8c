//! Per-point scalar and RGB arrays derived from a bundle's tensor arrays.

use rayon::prelude::*;
use tracing::warn;

use crate::fiber::{FiberBundle, FiberError};
use crate::measures::{TensorMeasureKind, orientation_color};
use crate::tensor::Tensor;

/// Name of the scalar array holding `kind` computed from tensor array `tensors`.
pub fn measure_array_name(tensors: &str, kind: TensorMeasureKind) -> String {
    format!("{tensors}.{kind}")
}

/// Evaluate `kind` at every tensor; NaN where there is no eigensystem.
pub fn measure_values(tensors: &[Tensor], kind: TensorMeasureKind) -> Vec<f64> {
    tensors.par_iter().map(|t| kind.evaluate(t)).collect()
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TensorToColor {
    pub operation: TensorMeasureKind,
}

impl Default for TensorToColor {
    fn default() -> Self {
        Self {
            operation: TensorMeasureKind::FractionalAnisotropy,
        }
    }
}

impl TensorToColor {
    pub fn new(operation: TensorMeasureKind) -> Self {
        Self { operation }
    }

    /// Add a `"<tensors>.<operation>"` scalar array for every tensor array
    /// in the bundle and return the new array names.
    pub fn apply(&self, bundle: &mut FiberBundle) -> Result<Vec<String>, FiberError> {
        let computed: Vec<(String, Vec<f64>)> = bundle
            .tensor_arrays()
            .map(|(name, tensors)| {
                (
                    measure_array_name(name, self.operation),
                    measure_values(tensors, self.operation),
                )
            })
            .collect();
        if computed.is_empty() {
            warn!(operation = %self.operation, "bundle has no tensor arrays to color");
        }

        let mut names = Vec::with_capacity(computed.len());
        for (name, values) in computed {
            bundle.set_scalar_array(name.clone(), values)?;
            names.push(name);
        }
        Ok(names)
    }

    /// Direction-encoded RGB colors from the named tensor array. Returns
    /// `false` when the bundle has no such array.
    pub fn color_by_orientation(
        bundle: &mut FiberBundle,
        tensors: &str,
    ) -> Result<bool, FiberError> {
        let Some(values) = bundle.tensor_array(tensors) else {
            return Ok(false);
        };
        let colors: Vec<[u8; 3]> = values
            .par_iter()
            .map(|t| {
                t.eigensystem().map_or([0, 0, 0], |eig| {
                    orientation_color(&eig).map(|c| (c * 255.0).round() as u8)
                })
            })
            .collect();
        bundle.set_colors(colors)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phantom::stick_tensor;

    fn bundle_with_tensors(tensors: Vec<Tensor>) -> FiberBundle {
        let points: Vec<[f64; 3]> = (0..tensors.len()).map(|i| [i as f64, 0.0, 0.0]).collect();
        let mut bundle = FiberBundle::from_lines([points]);
        bundle.set_tensor_array("Tensors", tensors).unwrap();
        bundle
    }

    #[test]
    fn test_apply_names_arrays_after_tensor_and_operation() {
        let mut bundle = bundle_with_tensors(vec![
            Tensor::diagonal(1.0, 1.0, 1.0),
            stick_tensor([1.0, 0.0, 0.0], 1.0, 0.0),
            Tensor::new(f64::NAN, 0.0, 0.0, 1.0, 0.0, 1.0),
        ]);
        let names = TensorToColor::default().apply(&mut bundle).unwrap();
        assert_eq!(names, vec!["Tensors.FractionalAnisotropy".to_string()]);
        let fa = bundle.scalar_array("Tensors.FractionalAnisotropy").unwrap();
        assert_eq!(fa[0], 0.0);
        assert!((fa[1] - 1.0).abs() < 1e-12);
        assert!(fa[2].is_nan());
    }

    #[test]
    fn test_orientation_colors() {
        let mut bundle = bundle_with_tensors(vec![stick_tensor([0.0, 0.0, 1.0], 1.0, 0.0)]);
        assert!(TensorToColor::color_by_orientation(&mut bundle, "Tensors").unwrap());
        assert_eq!(bundle.colors().unwrap()[0], [0, 0, 255]);
        assert!(!TensorToColor::color_by_orientation(&mut bundle, "Missing").unwrap());
    }
}
