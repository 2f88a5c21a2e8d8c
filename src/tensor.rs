//! Symmetric 3x3 diffusion tensors and their eigensystems.

/// Component order of the six independent tensor entries.
pub const COMPONENTS: [(usize, usize); 6] = [(0, 0), (0, 1), (0, 2), (1, 1), (1, 2), (2, 2)];

const MAX_SWEEPS: usize = 50;

/// Relative tolerance under which two eigenvalues are treated as tied.
/// Ties keep the order of the diagonal they converged from, so sorting is
/// stable for isotropic and cylindrically symmetric tensors.
pub const EIGENVALUE_TIE_TOLERANCE: f64 = 1e-12;

/// A symmetric 3x3 tensor stored as `(xx, xy, xz, yy, yz, zz)`.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Tensor(pub [f64; 6]);

impl Tensor {
    pub fn new(xx: f64, xy: f64, xz: f64, yy: f64, yz: f64, zz: f64) -> Self {
        Self([xx, xy, xz, yy, yz, zz])
    }

    pub fn diagonal(l1: f64, l2: f64, l3: f64) -> Self {
        Self([l1, 0.0, 0.0, l2, 0.0, l3])
    }

    /// Builds a tensor from a 9-component row-major matrix, symmetrising it.
    pub fn from_row_major(m: &[f64; 9]) -> Self {
        Self([
            m[0],
            0.5 * (m[1] + m[3]),
            0.5 * (m[2] + m[6]),
            m[4],
            0.5 * (m[5] + m[7]),
            m[8],
        ])
    }

    /// Largest absolute difference between `m` and its transpose.
    pub fn asymmetry(m: &[f64; 9]) -> f64 {
        (m[1] - m[3])
            .abs()
            .max((m[2] - m[6]).abs())
            .max((m[5] - m[7]).abs())
    }

    /// Builds a tensor whose eigenvalues are `values` and eigenvectors are the
    /// rows of `vectors` (assumed orthonormal).
    pub fn from_eigensystem(values: [f64; 3], vectors: [[f64; 3]; 3]) -> Self {
        let mut m = [[0.0; 3]; 3];
        for k in 0..3 {
            let v = vectors[k];
            for r in 0..3 {
                for c in 0..3 {
                    m[r][c] += values[k] * v[r] * v[c];
                }
            }
        }
        Self::from_matrix(&m)
    }

    pub fn from_matrix(m: &[[f64; 3]; 3]) -> Self {
        let mut out = [0.0; 6];
        for (slot, &(r, c)) in out.iter_mut().zip(COMPONENTS.iter()) {
            *slot = 0.5 * (m[r][c] + m[c][r]);
        }
        Self(out)
    }

    pub fn to_matrix(&self) -> [[f64; 3]; 3] {
        let [xx, xy, xz, yy, yz, zz] = self.0;
        [[xx, xy, xz], [xy, yy, yz], [xz, yz, zz]]
    }

    pub fn to_row_major(&self) -> [f64; 9] {
        let m = self.to_matrix();
        [
            m[0][0], m[0][1], m[0][2], m[1][0], m[1][1], m[1][2], m[2][0], m[2][1], m[2][2],
        ]
    }

    pub fn component(&self, index: usize) -> f64 {
        self.0[index]
    }

    pub fn trace(&self) -> f64 {
        self.0[0] + self.0[3] + self.0[5]
    }

    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|v| v.is_finite())
    }

    /// Returns `R T Rᵀ`.
    pub fn rotate(&self, r: &[[f64; 3]; 3]) -> Self {
        let t = self.to_matrix();
        let mut rt = [[0.0; 3]; 3];
        for i in 0..3 {
            for j in 0..3 {
                rt[i][j] = (0..3).map(|k| r[i][k] * t[k][j]).sum();
            }
        }
        let mut out = [[0.0; 3]; 3];
        for i in 0..3 {
            for j in 0..3 {
                out[i][j] = (0..3).map(|k| rt[i][k] * r[j][k]).sum();
            }
        }
        Self::from_matrix(&out)
    }

    /// Eigen-decomposition by cyclic Jacobi rotations. `None` when any
    /// component is not finite.
    pub fn eigensystem(&self) -> Option<Eigensystem> {
        if !self.is_finite() {
            return None;
        }
        let (values, vectors) = jacobi(self.to_matrix());

        let mut order = [0usize, 1, 2];
        let scale = values.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
        let tie = EIGENVALUE_TIE_TOLERANCE * scale;
        // Insertion sort, descending; ties within tolerance keep their order.
        for i in 1..3 {
            let mut j = i;
            while j > 0 && values[order[j]] > values[order[j - 1]] + tie {
                order.swap(j, j - 1);
                j -= 1;
            }
        }

        let mut sorted_values = [0.0; 3];
        let mut sorted_vectors = [[0.0; 3]; 3];
        for (slot, &k) in order.iter().enumerate() {
            sorted_values[slot] = values[k];
            sorted_vectors[slot] = normalized([vectors[0][k], vectors[1][k], vectors[2][k]]);
        }

        Some(Eigensystem {
            values: sorted_values,
            vectors: sorted_vectors,
        })
    }
}

/// Eigenvalues in descending order with matching unit eigenvectors.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Eigensystem {
    pub values: [f64; 3],
    /// `vectors[0]` is the major eigenvector.
    pub vectors: [[f64; 3]; 3],
}

impl Eigensystem {
    /// Eigenvalues with negative values (numerical noise) clamped to zero.
    pub fn clamped_values(&self) -> [f64; 3] {
        self.values.map(|v| v.max(0.0))
    }

    pub fn major(&self) -> [f64; 3] {
        self.vectors[0]
    }
}

fn jacobi(mut a: [[f64; 3]; 3]) -> ([f64; 3], [[f64; 3]; 3]) {
    let mut v = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
    let norm: f64 = a.iter().flatten().map(|x| x * x).sum();

    for _ in 0..MAX_SWEEPS {
        let off = a[0][1] * a[0][1] + a[0][2] * a[0][2] + a[1][2] * a[1][2];
        if off == 0.0 || off <= f64::EPSILON * f64::EPSILON * norm {
            break;
        }
        for (p, q) in [(0, 1), (0, 2), (1, 2)] {
            let apq = a[p][q];
            if apq == 0.0 {
                continue;
            }
            let theta = (a[q][q] - a[p][p]) / (2.0 * apq);
            let t = if theta.abs() > 1e150 {
                0.5 / theta
            } else {
                let sign = if theta < 0.0 { -1.0 } else { 1.0 };
                sign / (theta.abs() + (theta * theta + 1.0).sqrt())
            };
            let c = 1.0 / (t * t + 1.0).sqrt();
            let s = t * c;

            a[p][p] -= t * apq;
            a[q][q] += t * apq;
            a[p][q] = 0.0;
            a[q][p] = 0.0;
            for r in 0..3 {
                if r != p && r != q {
                    let arp = a[r][p];
                    let arq = a[r][q];
                    a[r][p] = c * arp - s * arq;
                    a[p][r] = a[r][p];
                    a[r][q] = s * arp + c * arq;
                    a[q][r] = a[r][q];
                }
            }
            for row in v.iter_mut() {
                let vrp = row[p];
                let vrq = row[q];
                row[p] = c * vrp - s * vrq;
                row[q] = s * vrp + c * vrq;
            }
        }
    }

    ([a[0][0], a[1][1], a[2][2]], v)
}

pub(crate) fn normalized(v: [f64; 3]) -> [f64; 3] {
    let n = norm(v);
    if n > 0.0 { v.map(|x| x / n) } else { v }
}

pub(crate) fn norm(v: [f64; 3]) -> f64 {
    dot(v, v).sqrt()
}

pub(crate) fn dot(a: [f64; 3], b: [f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}
