//! Common test utilities for eddy-core integration tests

use eddy_core::params::{AcqPara, DiffPara};
use eddy_core::volume::{Volume, Volume4};

/// Compute RMSE between two arrays, only within mask (non-zero values)
pub fn rmse(a: &[f64], b: &[f64], mask: &[f64]) -> f64 {
    let mut sum_sq = 0.0;
    let mut count = 0usize;
    for i in 0..a.len() {
        if mask[i] > 0.0 {
            let diff = a[i] - b[i];
            sum_sq += diff * diff;
            count += 1;
        }
    }
    if count == 0 {
        return 0.0;
    }
    (sum_sq / count as f64).sqrt()
}

/// A volume linear in the voxel indices, `base + gx*i + gy*j + gz*k`.
/// Trilinear interpolation reproduces such a volume exactly, so warped
/// copies have closed-form values.
pub fn linear_volume(
    dims: (usize, usize, usize),
    voxel_size: (f64, f64, f64),
    base: f64,
    slopes: [f64; 3],
) -> Volume {
    let mut vol = Volume::zeros(dims, voxel_size);
    for k in 0..dims.2 {
        for j in 0..dims.1 {
            for i in 0..dims.0 {
                *vol.at_mut(i, j, k) =
                    base + slopes[0] * i as f64 + slopes[1] * j as f64 + slopes[2] * k as f64;
            }
        }
    }
    vol
}

/// Stack volumes into a 4D series on the grid of the first.
pub fn series_of(vols: &[Volume]) -> Volume4 {
    let dims = vols[0].dims();
    let mut series = Volume4::zeros((dims.0, dims.1, dims.2, vols.len()), vols[0].voxel_size());
    for (t, v) in vols.iter().enumerate() {
        series.set_volume(t, v).unwrap();
    }
    series
}

pub fn full_mask(dims: (usize, usize, usize), voxel_size: (f64, f64, f64)) -> Volume {
    Volume::filled(dims, voxel_size, 1.0)
}

/// Acquisition with the phase-encode direction along +y.
pub fn acq_up() -> AcqPara {
    AcqPara::new([0.0, 1.0, 0.0], 0.05).unwrap()
}

/// Acquisition with the phase-encode direction along -y.
pub fn acq_down() -> AcqPara {
    AcqPara::new([0.0, -1.0, 0.0], 0.05).unwrap()
}

/// A diffusion weighting strong enough to make the scan a DWI.
pub fn dwi() -> DiffPara {
    DiffPara::new([1.0, 0.0, 0.0], 1000.0).unwrap()
}
