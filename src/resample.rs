//! Image resampling
//!
//! Pull-back resampling of volumes: for each output voxel `x` (mm
//! coordinates) the source is sampled at `A*x`, optionally displaced by a
//! vector field, with trilinear interpolation. Every function returns the
//! resampled volume together with a 0/1 validity mask marking which
//! output voxels sampled inside the source volume; values outside are
//! zero. The output grid always equals the source grid, which is all the
//! correction pipeline needs since every scan of a series shares one
//! acquisition matrix.

use crate::field::DispField;
use crate::volume::Volume;
use nalgebra::{Matrix4, Vector4};

fn transform(src: &Volume, a: &Matrix4<f64>, dfield: Option<&DispField>) -> (Volume, Volume) {
    let (nx, ny, nz) = src.dims();
    let (dx, dy, dz) = src.voxel_size();
    let mut out = Volume::zeros(src.dims(), src.voxel_size());
    let mut mask = Volume::zeros(src.dims(), src.voxel_size());

    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                let x = Vector4::new(i as f64 * dx, j as f64 * dy, k as f64 * dz, 1.0);
                let mut p = a * x;
                if let Some(field) = dfield {
                    let d = field.at(i, j, k);
                    p[0] += d[0];
                    p[1] += d[1];
                    p[2] += d[2];
                }
                if let Some(v) = src.sample_mm(p[0], p[1], p[2]) {
                    *out.at_mut(i, j, k) = v;
                    *mask.at_mut(i, j, k) = 1.0;
                }
            }
        }
    }
    (out, mask)
}

/// Resample a volume through an affine matrix: `out(x) = src(A*x)`.
///
/// # Returns
/// The resampled volume and its 0/1 validity mask.
pub fn affine_transform(src: &Volume, a: &Matrix4<f64>) -> (Volume, Volume) {
    transform(src, a, None)
}

/// Resample a volume through an affine matrix plus a displacement field:
/// `out(x) = src(A*x + d(x))` with `d` in mm, indexed by output voxel.
pub fn general_transform(
    src: &Volume,
    a: &Matrix4<f64>,
    dfield: &DispField,
) -> (Volume, Volume) {
    transform(src, a, Some(dfield))
}
