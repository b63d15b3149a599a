//! Gaussian smoothing
//!
//! Separable 3D Gaussian filtering used for the smoothed working copy of
//! each scan. The kernel is renormalized over the in-bounds taps so
//! constant images stay constant up to the volume edges.

use crate::volume::Volume;

/// Index into 3D array (Fortran/column-major order)
#[inline(always)]
fn idx3d(i: usize, j: usize, k: usize, nx: usize, ny: usize) -> usize {
    i + j * nx + k * nx * ny
}

/// Convert a full-width-at-half-maximum to the Gaussian sigma.
pub fn fwhm_to_sigma(fwhm: f64) -> f64 {
    fwhm / (8.0 * 2.0f64.ln()).sqrt()
}

/// Create 1D Gaussian kernel
fn make_gaussian_kernel(sigma: f64) -> Vec<f64> {
    let radius = (3.0 * sigma).ceil() as usize;
    let size = 2 * radius + 1;
    let mut kernel = vec![0.0; size];

    let two_sigma_sq = 2.0 * sigma * sigma;
    let mut sum = 0.0;

    for i in 0..size {
        let x = i as f64 - radius as f64;
        kernel[i] = (-x * x / two_sigma_sq).exp();
        sum += kernel[i];
    }

    for k in kernel.iter_mut() {
        *k /= sum;
    }

    kernel
}

/// Separable 3D Gaussian smoothing.
///
/// # Arguments
/// * `data` - Input volume (nx * ny * nz, Fortran order)
/// * `sigma` - Smoothing sigma in voxels [sx, sy, sz]; a zero sigma skips
///   the corresponding axis
///
/// # Returns
/// Smoothed volume
pub fn gaussian_smooth_3d(
    data: &[f64],
    sigma: [f64; 3],
    nx: usize,
    ny: usize,
    nz: usize,
) -> Vec<f64> {
    let n_total = nx * ny * nz;
    let mut result = data.to_vec();
    let mut temp = vec![0.0; n_total];

    // X direction
    if sigma[0] > 0.0 {
        let kernel = make_gaussian_kernel(sigma[0]);
        let half = kernel.len() / 2;

        for k in 0..nz {
            for j in 0..ny {
                for i in 0..nx {
                    let mut sum = 0.0;
                    let mut weight_sum = 0.0;
                    for (ki, &kv) in kernel.iter().enumerate() {
                        let ii = i as isize + ki as isize - half as isize;
                        if ii >= 0 && ii < nx as isize {
                            sum += result[idx3d(ii as usize, j, k, nx, ny)] * kv;
                            weight_sum += kv;
                        }
                    }
                    temp[idx3d(i, j, k, nx, ny)] = sum / weight_sum;
                }
            }
        }
        std::mem::swap(&mut result, &mut temp);
    }

    // Y direction
    if sigma[1] > 0.0 {
        let kernel = make_gaussian_kernel(sigma[1]);
        let half = kernel.len() / 2;

        for k in 0..nz {
            for j in 0..ny {
                for i in 0..nx {
                    let mut sum = 0.0;
                    let mut weight_sum = 0.0;
                    for (ki, &kv) in kernel.iter().enumerate() {
                        let jj = j as isize + ki as isize - half as isize;
                        if jj >= 0 && jj < ny as isize {
                            sum += result[idx3d(i, jj as usize, k, nx, ny)] * kv;
                            weight_sum += kv;
                        }
                    }
                    temp[idx3d(i, j, k, nx, ny)] = sum / weight_sum;
                }
            }
        }
        std::mem::swap(&mut result, &mut temp);
    }

    // Z direction
    if sigma[2] > 0.0 {
        let kernel = make_gaussian_kernel(sigma[2]);
        let half = kernel.len() / 2;

        for k in 0..nz {
            for j in 0..ny {
                for i in 0..nx {
                    let mut sum = 0.0;
                    let mut weight_sum = 0.0;
                    for (ki, &kv) in kernel.iter().enumerate() {
                        let kk = k as isize + ki as isize - half as isize;
                        if kk >= 0 && kk < nz as isize {
                            sum += result[idx3d(i, j, kk as usize, nx, ny)] * kv;
                            weight_sum += kv;
                        }
                    }
                    temp[idx3d(i, j, k, nx, ny)] = sum / weight_sum;
                }
            }
        }
        std::mem::swap(&mut result, &mut temp);
    }

    result
}

/// Smooth a volume with an isotropic Gaussian of the given FWHM in mm.
///
/// The sigma is converted to voxels per axis, so anisotropic voxels get
/// the same physical smoothing extent in every direction.
pub fn smooth_volume(vol: &Volume, fwhm_mm: f64) -> Volume {
    let (nx, ny, nz) = vol.dims();
    let (dx, dy, dz) = vol.voxel_size();
    let sigma_mm = fwhm_to_sigma(fwhm_mm);
    let sigma = [sigma_mm / dx, sigma_mm / dy, sigma_mm / dz];
    let data = gaussian_smooth_3d(vol.data(), sigma, nx, ny, nz);
    let mut out = Volume::zeros(vol.dims(), vol.voxel_size());
    out.data_mut().copy_from_slice(&data);
    out
}
