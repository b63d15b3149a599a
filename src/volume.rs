//! Volume containers
//!
//! 3D and 4D scalar volumes stored as flat `f64` buffers in Fortran order
//! (x fastest, `index = i + nx*(j + ny*k)`), the memory layout NIfTI data
//! arrives in. Coordinates come in two flavours throughout the crate:
//! voxel coordinates (continuous indices) and mm coordinates (voxel
//! coordinate times voxel dimension, no origin offset).

use crate::error::{EddyError, EddyResult};

/// A 3D scalar volume with isotropic-or-not voxel dimensions in mm.
#[derive(Debug, Clone, PartialEq)]
pub struct Volume {
    data: Vec<f64>,
    dims: (usize, usize, usize),
    voxel_size: (f64, f64, f64),
}

impl Volume {
    /// Create a zero-filled volume.
    pub fn zeros(dims: (usize, usize, usize), voxel_size: (f64, f64, f64)) -> Self {
        Volume {
            data: vec![0.0; dims.0 * dims.1 * dims.2],
            dims,
            voxel_size,
        }
    }

    /// Create a volume filled with a constant value.
    pub fn filled(dims: (usize, usize, usize), voxel_size: (f64, f64, f64), value: f64) -> Self {
        Volume {
            data: vec![value; dims.0 * dims.1 * dims.2],
            dims,
            voxel_size,
        }
    }

    /// Wrap an existing buffer. The buffer length must match the product
    /// of the dimensions.
    pub fn from_vec(
        data: Vec<f64>,
        dims: (usize, usize, usize),
        voxel_size: (f64, f64, f64),
    ) -> EddyResult<Self> {
        let expected = dims.0 * dims.1 * dims.2;
        if data.len() != expected {
            return Err(EddyError::Mismatch(format!(
                "volume buffer has {} elements, dimensions {}x{}x{} require {}",
                data.len(),
                dims.0,
                dims.1,
                dims.2,
                expected
            )));
        }
        Ok(Volume {
            data,
            dims,
            voxel_size,
        })
    }

    pub fn dims(&self) -> (usize, usize, usize) {
        self.dims
    }

    pub fn voxel_size(&self) -> (f64, f64, f64) {
        self.voxel_size
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    /// Flat index of voxel (i, j, k).
    #[inline]
    pub fn idx(&self, i: usize, j: usize, k: usize) -> usize {
        i + self.dims.0 * (j + self.dims.1 * k)
    }

    #[inline]
    pub fn at(&self, i: usize, j: usize, k: usize) -> f64 {
        self.data[self.idx(i, j, k)]
    }

    #[inline]
    pub fn at_mut(&mut self, i: usize, j: usize, k: usize) -> &mut f64 {
        let idx = self.idx(i, j, k);
        &mut self.data[idx]
    }

    /// True when both volumes share dimensions and voxel size.
    pub fn same_grid(&self, other: &Volume) -> bool {
        self.dims == other.dims && self.voxel_size == other.voxel_size
    }

    /// FOV centre in mm coordinates, `((nx-1)/2 * dx, ...)`.
    pub fn center_mm(&self) -> (f64, f64, f64) {
        (
            0.5 * (self.dims.0 as f64 - 1.0) * self.voxel_size.0,
            0.5 * (self.dims.1 as f64 - 1.0) * self.voxel_size.1,
            0.5 * (self.dims.2 as f64 - 1.0) * self.voxel_size.2,
        )
    }

    /// Trilinear interpolation at a continuous voxel coordinate.
    ///
    /// Returns `None` outside the volume (including non-finite input).
    pub fn sample_voxel(&self, x: f64, y: f64, z: f64) -> Option<f64> {
        let (nx, ny, nz) = self.dims;
        if !(x.is_finite() && y.is_finite() && z.is_finite()) {
            return None;
        }
        if x < 0.0 || y < 0.0 || z < 0.0 {
            return None;
        }
        if x > (nx - 1) as f64 || y > (ny - 1) as f64 || z > (nz - 1) as f64 {
            return None;
        }
        let i0 = x.floor() as usize;
        let j0 = y.floor() as usize;
        let k0 = z.floor() as usize;
        let i1 = (i0 + 1).min(nx - 1);
        let j1 = (j0 + 1).min(ny - 1);
        let k1 = (k0 + 1).min(nz - 1);
        let fx = x - i0 as f64;
        let fy = y - j0 as f64;
        let fz = z - k0 as f64;

        let c000 = self.at(i0, j0, k0);
        let c100 = self.at(i1, j0, k0);
        let c010 = self.at(i0, j1, k0);
        let c110 = self.at(i1, j1, k0);
        let c001 = self.at(i0, j0, k1);
        let c101 = self.at(i1, j0, k1);
        let c011 = self.at(i0, j1, k1);
        let c111 = self.at(i1, j1, k1);

        let c00 = c000 * (1.0 - fx) + c100 * fx;
        let c10 = c010 * (1.0 - fx) + c110 * fx;
        let c01 = c001 * (1.0 - fx) + c101 * fx;
        let c11 = c011 * (1.0 - fx) + c111 * fx;

        let c0 = c00 * (1.0 - fy) + c10 * fy;
        let c1 = c01 * (1.0 - fy) + c11 * fy;

        Some(c0 * (1.0 - fz) + c1 * fz)
    }

    /// Trilinear interpolation at an mm coordinate.
    pub fn sample_mm(&self, x: f64, y: f64, z: f64) -> Option<f64> {
        self.sample_voxel(
            x / self.voxel_size.0,
            y / self.voxel_size.1,
            z / self.voxel_size.2,
        )
    }

    /// Mean over voxels where the mask is positive. Zero for an empty mask.
    pub fn mean_where(&self, mask: &Volume) -> f64 {
        let mut sum = 0.0;
        let mut count = 0usize;
        for (v, m) in self.data.iter().zip(mask.data.iter()) {
            if *m > 0.0 {
                sum += *v;
                count += 1;
            }
        }
        if count == 0 {
            0.0
        } else {
            sum / count as f64
        }
    }

    /// In-place threshold: values above `threshold` become 1, the rest 0.
    pub fn binarise(&mut self, threshold: f64) {
        for v in self.data.iter_mut() {
            *v = if *v > threshold { 1.0 } else { 0.0 };
        }
    }

    /// Multiply every voxel by a scalar.
    pub fn scale(&mut self, factor: f64) {
        for v in self.data.iter_mut() {
            *v *= factor;
        }
    }

    /// Elementwise in-place product, used for combining validity masks
    /// and for Jacobian intensity modulation.
    pub fn mul_in_place(&mut self, other: &Volume) {
        debug_assert_eq!(self.dims, other.dims);
        for (v, o) in self.data.iter_mut().zip(other.data.iter()) {
            *v *= *o;
        }
    }

    /// Elementwise in-place sum.
    pub fn add_in_place(&mut self, other: &Volume) {
        debug_assert_eq!(self.dims, other.dims);
        for (v, o) in self.data.iter_mut().zip(other.data.iter()) {
            *v += *o;
        }
    }
}

/// A 4D volume: `nt` same-shaped 3D volumes stored back to back.
#[derive(Debug, Clone, PartialEq)]
pub struct Volume4 {
    data: Vec<f64>,
    dims: (usize, usize, usize, usize),
    voxel_size: (f64, f64, f64),
}

impl Volume4 {
    pub fn zeros(dims: (usize, usize, usize, usize), voxel_size: (f64, f64, f64)) -> Self {
        Volume4 {
            data: vec![0.0; dims.0 * dims.1 * dims.2 * dims.3],
            dims,
            voxel_size,
        }
    }

    pub fn from_vec(
        data: Vec<f64>,
        dims: (usize, usize, usize, usize),
        voxel_size: (f64, f64, f64),
    ) -> EddyResult<Self> {
        let expected = dims.0 * dims.1 * dims.2 * dims.3;
        if data.len() != expected {
            return Err(EddyError::Mismatch(format!(
                "4D buffer has {} elements, dimensions {}x{}x{}x{} require {}",
                data.len(),
                dims.0,
                dims.1,
                dims.2,
                dims.3,
                expected
            )));
        }
        Ok(Volume4 {
            data,
            dims,
            voxel_size,
        })
    }

    pub fn dims(&self) -> (usize, usize, usize, usize) {
        self.dims
    }

    /// Spatial dimensions of each constituent volume.
    pub fn dims3(&self) -> (usize, usize, usize) {
        (self.dims.0, self.dims.1, self.dims.2)
    }

    pub fn voxel_size(&self) -> (f64, f64, f64) {
        self.voxel_size
    }

    pub fn n_volumes(&self) -> usize {
        self.dims.3
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    /// Number of voxels in each constituent volume, the stride between
    /// consecutive volumes in the flat buffer.
    pub fn volume_len(&self) -> usize {
        self.dims.0 * self.dims.1 * self.dims.2
    }

    /// Copy out volume `t`.
    pub fn volume(&self, t: usize) -> EddyResult<Volume> {
        if t >= self.dims.3 {
            return Err(EddyError::IndexOutOfRange(format!(
                "volume {} of a series of {}",
                t, self.dims.3
            )));
        }
        let n = self.volume_len();
        Volume::from_vec(
            self.data[t * n..(t + 1) * n].to_vec(),
            self.dims3(),
            self.voxel_size,
        )
    }

    /// Overwrite volume `t`. The volume must match the series grid.
    pub fn set_volume(&mut self, t: usize, vol: &Volume) -> EddyResult<()> {
        if t >= self.dims.3 {
            return Err(EddyError::IndexOutOfRange(format!(
                "volume {} of a series of {}",
                t, self.dims.3
            )));
        }
        if vol.dims() != self.dims3() {
            return Err(EddyError::Mismatch(format!(
                "volume dimensions {:?} do not match series {:?}",
                vol.dims(),
                self.dims3()
            )));
        }
        let n = self.volume_len();
        self.data[t * n..(t + 1) * n].copy_from_slice(vol.data());
        Ok(())
    }
}
