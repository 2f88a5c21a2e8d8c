//! Affine 4x4 transforms between world (RAS), voxel (IJK) and the
//! spacing-scaled voxel frame the tracker integrates in.
//!
//! Seeds are pre-transformed by the caller into scaled-IJK; fiber points are
//! transformed back with the inverse.

/// Row-major homogeneous transform with an implicit `[0, 0, 0, 1]` last row.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Affine {
    pub m: [[f64; 4]; 4],
}

impl Default for Affine {
    fn default() -> Self {
        Self::identity()
    }
}

impl Affine {
    pub fn identity() -> Self {
        Self {
            m: [
                [1.0, 0.0, 0.0, 0.0],
                [0.0, 1.0, 0.0, 0.0],
                [0.0, 0.0, 1.0, 0.0],
                [0.0, 0.0, 0.0, 1.0],
            ],
        }
    }

    pub fn from_rows(m: [[f64; 4]; 4]) -> Self {
        Self { m }
    }

    pub fn scale(s: [f64; 3]) -> Self {
        let mut a = Self::identity();
        for (i, v) in s.iter().enumerate() {
            a.m[i][i] = *v;
        }
        a
    }

    pub fn translation(t: [f64; 3]) -> Self {
        let mut a = Self::identity();
        for (i, v) in t.iter().enumerate() {
            a.m[i][3] = *v;
        }
        a
    }

    /// `self · other`: applies `other` first.
    pub fn compose(&self, other: &Affine) -> Affine {
        let mut out = [[0.0; 4]; 4];
        for (r, row) in out.iter_mut().enumerate() {
            for (c, cell) in row.iter_mut().enumerate() {
                *cell = (0..4).map(|k| self.m[r][k] * other.m[k][c]).sum();
            }
        }
        Affine { m: out }
    }

    pub fn linear(&self) -> [[f64; 3]; 3] {
        let m = &self.m;
        [
            [m[0][0], m[0][1], m[0][2]],
            [m[1][0], m[1][1], m[1][2]],
            [m[2][0], m[2][1], m[2][2]],
        ]
    }

    pub fn transform_point(&self, p: [f64; 3]) -> [f64; 3] {
        let m = &self.m;
        [0, 1, 2].map(|r| m[r][0] * p[0] + m[r][1] * p[1] + m[r][2] * p[2] + m[r][3])
    }

    pub fn transform_vector(&self, v: [f64; 3]) -> [f64; 3] {
        let m = &self.m;
        [0, 1, 2].map(|r| m[r][0] * v[0] + m[r][1] * v[1] + m[r][2] * v[2])
    }

    /// Inverse of the affine part; `None` when singular.
    pub fn inverse(&self) -> Option<Affine> {
        let a = invert3(&self.linear())?;
        let t = [self.m[0][3], self.m[1][3], self.m[2][3]];
        let mut out = Self::identity();
        for r in 0..3 {
            for c in 0..3 {
                out.m[r][c] = a[r][c];
            }
            out.m[r][3] = -(a[r][0] * t[0] + a[r][1] * t[1] + a[r][2] * t[2]);
        }
        Some(out)
    }

    /// World (RAS) to the tracker's scaled-IJK frame: `diag(spacing) · ras_to_ijk`.
    pub fn world_to_scaled_ijk(ras_to_ijk: &Affine, spacing: [f64; 3]) -> Affine {
        Affine::scale(spacing).compose(ras_to_ijk)
    }

    /// Rotation taking tensors from the voxel frame back to world space.
    ///
    /// Translation is dropped and each column of `ras_to_ijk` normalised to
    /// strip voxel scaling; the result is inverted.
    pub fn tensor_rotation(ras_to_ijk: &Affine) -> Option<[[f64; 3]; 3]> {
        let mut r = ras_to_ijk.linear();
        for c in 0..3 {
            let n = (r[0][c] * r[0][c] + r[1][c] * r[1][c] + r[2][c] * r[2][c]).sqrt();
            if n == 0.0 {
                return None;
            }
            for row in r.iter_mut() {
                row[c] /= n;
            }
        }
        invert3(&r)
    }
}

fn invert3(a: &[[f64; 3]; 3]) -> Option<[[f64; 3]; 3]> {
    let cof =
        |r0: usize, r1: usize, c0: usize, c1: usize| a[r0][c0] * a[r1][c1] - a[r0][c1] * a[r1][c0];
    let det = a[0][0] * cof(1, 2, 1, 2) - a[0][1] * cof(1, 2, 0, 2) + a[0][2] * cof(1, 2, 0, 1);
    if det == 0.0 || !det.is_finite() {
        return None;
    }
    let inv = 1.0 / det;
    Some([
        [cof(1, 2, 1, 2) * inv, -cof(0, 2, 1, 2) * inv, cof(0, 1, 1, 2) * inv],
        [-cof(1, 2, 0, 2) * inv, cof(0, 2, 0, 2) * inv, -cof(0, 1, 0, 2) * inv],
        [cof(1, 2, 0, 1) * inv, -cof(0, 2, 0, 1) * inv, cof(0, 1, 0, 1) * inv],
    ])
}
