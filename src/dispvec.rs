//! Per-line operators for least-squares resampling
//!
//! A distorted EPI acquisition samples each line along the phase-encode
//! axis through a 1D displacement of the true signal. [`DispVec`] holds
//! that displacement for one line (in voxels) and derives the sampling
//! matrix K: row r gives the overlap of acquired voxel r's displaced
//! sampling interval with each undistorted voxel, so that
//! `observed = K * true` under a piecewise-linear displacement between
//! voxel centres. Intensity pile-up where the map compresses falls out
//! of the overlap weights directly, and intervals displaced beyond the
//! field of view lose weight, which is what makes the unregularized
//! system ill-conditioned near the edges.
//!
//! The companion second-difference matrix S supplies the smoothness
//! regularizer of the per-line least-squares system. Its row sums are
//! zero, boundary rows included, so constant lines incur no penalty.

use crate::volume::Volume;
use nalgebra::DMatrix;

/// The displacement of one image line along the phase-encode axis.
#[derive(Debug, Clone)]
pub struct DispVec {
    d: Vec<f64>,
}

impl DispVec {
    /// Wrap a line of per-voxel displacements in voxel units.
    pub fn from_displacements(d: Vec<f64>) -> Self {
        DispVec { d }
    }

    pub fn len(&self) -> usize {
        self.d.len()
    }

    pub fn is_empty(&self) -> bool {
        self.d.is_empty()
    }

    /// Displacement at a continuous position, linear between voxel
    /// centres and clamped to the end values beyond them.
    fn interp(&self, x: f64) -> f64 {
        let n = self.d.len();
        if x <= 0.0 {
            return self.d[0];
        }
        if x >= (n - 1) as f64 {
            return self.d[n - 1];
        }
        let i0 = x.floor() as usize;
        let f = x - i0 as f64;
        self.d[i0] * (1.0 - f) + self.d[i0 + 1] * f
    }

    /// The n x n sampling matrix of this line's displacement.
    ///
    /// Acquired voxel r integrates the true signal over
    /// `[r - 1/2 + d(r - 1/2), r + 1/2 + d(r + 1/2)]`; entry (r, m) is
    /// the length of that interval's overlap with voxel m's unit
    /// interval. A zero displacement gives the identity matrix.
    pub fn k_matrix(&self) -> DMatrix<f64> {
        let n = self.d.len();
        let mut k = DMatrix::zeros(n, n);
        for r in 0..n {
            let mut lo = r as f64 - 0.5 + self.interp(r as f64 - 0.5);
            let mut hi = r as f64 + 0.5 + self.interp(r as f64 + 0.5);
            if hi < lo {
                std::mem::swap(&mut lo, &mut hi);
            }
            let first = (lo + 0.5).floor() as isize;
            let last = (hi + 0.5).floor() as isize;
            for m in first..=last {
                if m < 0 || m as usize >= n {
                    continue;
                }
                let a = lo.max(m as f64 - 0.5);
                let b = hi.min(m as f64 + 0.5);
                if b > a {
                    k[(r, m as usize)] += b - a;
                }
            }
        }
        k
    }

    /// The n x n second-difference matrix shared by every line of a
    /// given length. Interior rows are `[-1 2 -1]`, boundary rows are
    /// one-sided first differences, so every row sums to zero.
    pub fn s_matrix(n: usize) -> DMatrix<f64> {
        let mut s = DMatrix::zeros(n, n);
        if n < 2 {
            return s;
        }
        s[(0, 0)] = 1.0;
        s[(0, 1)] = -1.0;
        for r in 1..n - 1 {
            s[(r, r - 1)] = -1.0;
            s[(r, r)] = 2.0;
            s[(r, r + 1)] = -1.0;
        }
        s[(n - 1, n - 2)] = -1.0;
        s[(n - 1, n - 1)] = 1.0;
        s
    }
}

/// Copy the x line at (., j, k) out of a volume.
pub fn extract_row(vol: &Volume, j: usize, k: usize) -> Vec<f64> {
    let nx = vol.dims().0;
    (0..nx).map(|i| vol.at(i, j, k)).collect()
}

/// Copy the y line at (i, ., k) out of a volume.
pub fn extract_column(vol: &Volume, i: usize, k: usize) -> Vec<f64> {
    let ny = vol.dims().1;
    (0..ny).map(|j| vol.at(i, j, k)).collect()
}

/// A line can be reconstructed only when every voxel along it is valid.
pub fn line_is_valid(mask_line: &[f64]) -> bool {
    mask_line.iter().all(|&m| m > 0.0)
}
