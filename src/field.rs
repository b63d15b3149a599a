//! Displacement fields
//!
//! An off-resonance field in Hz displaces signal along the phase-encode
//! axis of an EPI acquisition. This module converts Hz maps to
//! displacement fields (voxel and mm units), computes the Jacobian of the
//! displacement along the phase-encode axis for intensity modulation, and
//! numerically inverts a displacement field line by line, which turns the
//! model-to-scan warp into the scan-to-model warp and vice versa.
//!
//! Displacements are stored as three component volumes; only the
//! phase-encode component is ever nonzero, but keeping the full vector
//! lets resampling treat the warp generically.

use crate::params::AcqPara;
use crate::volume::Volume;

/// A vector displacement field, one component volume per image axis.
#[derive(Debug, Clone)]
pub struct DispField {
    comps: [Volume; 3],
}

impl DispField {
    pub fn zeros(dims: (usize, usize, usize), voxel_size: (f64, f64, f64)) -> Self {
        DispField {
            comps: [
                Volume::zeros(dims, voxel_size),
                Volume::zeros(dims, voxel_size),
                Volume::zeros(dims, voxel_size),
            ],
        }
    }

    pub fn dims(&self) -> (usize, usize, usize) {
        self.comps[0].dims()
    }

    pub fn voxel_size(&self) -> (f64, f64, f64) {
        self.comps[0].voxel_size()
    }

    pub fn component(&self, axis: usize) -> &Volume {
        &self.comps[axis]
    }

    pub fn component_mut(&mut self, axis: usize) -> &mut Volume {
        &mut self.comps[axis]
    }

    /// Displacement vector at a voxel.
    #[inline]
    pub fn at(&self, i: usize, j: usize, k: usize) -> [f64; 3] {
        [
            self.comps[0].at(i, j, k),
            self.comps[1].at(i, j, k),
            self.comps[2].at(i, j, k),
        ]
    }
}

/// Convert an off-resonance Hz map into a voxel displacement field.
///
/// The displacement at each voxel is `pe * read_out_time * hz`, directed
/// along the phase-encode axis with the polarity of the phase-encode
/// vector.
pub fn hz_to_voxel_displacements(hz: &Volume, acqp: &AcqPara) -> DispField {
    let mut field = DispField::zeros(hz.dims(), hz.voxel_size());
    let pe = acqp.phase_encode_vector();
    let rot = acqp.read_out_time();
    for d in 0..3 {
        if pe[d] != 0.0 {
            let comp = field.component_mut(d);
            for (out, &h) in comp.data_mut().iter_mut().zip(hz.data().iter()) {
                *out = pe[d] * rot * h;
            }
        }
    }
    field
}

/// Scale a voxel displacement field to mm.
pub fn voxel_to_mm_displacements(field: &DispField) -> DispField {
    let vox = field.voxel_size();
    let scale = [vox.0, vox.1, vox.2];
    let mut out = field.clone();
    for d in 0..3 {
        out.component_mut(d).scale(scale[d]);
    }
    out
}

/// Jacobian determinant of a voxel displacement field.
///
/// With displacement confined to the phase-encode axis the determinant
/// reduces to `1 + d(disp)/d(pe axis)`, evaluated with central
/// differences in the interior and one-sided differences at the ends.
/// The input field must be in voxel units.
pub fn jacobian(field: &DispField, acqp: &AcqPara) -> Volume {
    let axis = acqp.pe_axis();
    let (nx, ny, nz) = field.dims();
    let d = field.component(axis);
    let mut jac = Volume::zeros(field.dims(), field.voxel_size());
    let n_axis = [nx, ny, nz][axis];

    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                let p = [i, j, k][axis];
                let deriv = if n_axis < 2 {
                    0.0
                } else if p == 0 {
                    line_value(d, i, j, k, axis, 1) - d.at(i, j, k)
                } else if p == n_axis - 1 {
                    d.at(i, j, k) - line_value(d, i, j, k, axis, p as isize - 1)
                } else {
                    0.5 * (line_value(d, i, j, k, axis, p as isize + 1)
                        - line_value(d, i, j, k, axis, p as isize - 1))
                };
                *jac.at_mut(i, j, k) = 1.0 + deriv;
            }
        }
    }
    jac
}

/// Value of a volume at a voxel with one coordinate replaced.
#[inline]
fn line_value(vol: &Volume, i: usize, j: usize, k: usize, axis: usize, p: isize) -> f64 {
    let mut c = [i, j, k];
    c[axis] = p as usize;
    vol.at(c[0], c[1], c[2])
}

/// Invert a voxel displacement field along the phase-encode axis.
///
/// For each line the forward map `y(x) = x + d(x)` (piecewise linear
/// between voxel centres) is inverted at every integer output position.
/// Output positions not covered by the forward map, and positions whose
/// bracketing input voxels fall outside `inmask`, are marked invalid in
/// the returned mask and get zero displacement.
///
/// # Arguments
/// * `field` - Forward displacement field in voxel units
/// * `acqp` - Acquisition whose phase-encode axis the field displaces along
/// * `inmask` - Validity (0/1) of the forward field
///
/// # Returns
/// The inverse displacement field (voxel units) and its validity mask.
pub fn invert_displacement_field(
    field: &DispField,
    acqp: &AcqPara,
    inmask: &Volume,
) -> (DispField, Volume) {
    let axis = acqp.pe_axis();
    let dims = field.dims();
    let (nx, ny, nz) = dims;
    let n = [nx, ny, nz][axis];
    let d = field.component(axis);

    let mut inv = DispField::zeros(dims, field.voxel_size());
    let mut omask = Volume::zeros(dims, field.voxel_size());

    // The two axes orthogonal to the phase-encode axis.
    let others: [usize; 2] = match axis {
        0 => [1, 2],
        1 => [0, 2],
        _ => [0, 1],
    };
    let n_a = [nx, ny, nz][others[0]];
    let n_b = [nx, ny, nz][others[1]];

    let mut y = vec![0.0; n];
    let mut valid = vec![false; n];

    for b in 0..n_b {
        for a in 0..n_a {
            let mut c = [0usize; 3];
            c[others[0]] = a;
            c[others[1]] = b;

            for p in 0..n {
                c[axis] = p;
                y[p] = p as f64 + d.at(c[0], c[1], c[2]);
                valid[p] = inmask.at(c[0], c[1], c[2]) > 0.0;
            }

            for yo in 0..n {
                let target = yo as f64;
                let mut found = None;
                for s in 0..n.saturating_sub(1) {
                    let lo = y[s];
                    let hi = y[s + 1];
                    if (lo - target) * (hi - target) <= 0.0 {
                        found = Some(s);
                        break;
                    }
                }
                c[axis] = yo;
                let idx = (c[0], c[1], c[2]);
                match found {
                    Some(s) if valid[s] && valid[s + 1] => {
                        let den = y[s + 1] - y[s];
                        let x = if den.abs() > 1e-12 {
                            s as f64 + (target - y[s]) / den
                        } else {
                            s as f64
                        };
                        *inv.component_mut(axis).at_mut(idx.0, idx.1, idx.2) = x - target;
                        *omask.at_mut(idx.0, idx.1, idx.2) = 1.0;
                    }
                    _ => {
                        // stays zero, mask stays zero
                    }
                }
            }
        }
    }
    (inv, omask)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::AcqPara;
    use approx::assert_relative_eq;

    fn acq_y() -> AcqPara {
        AcqPara::new([0.0, 1.0, 0.0], 0.05).unwrap()
    }

    #[test]
    fn test_hz_to_voxel_displacements() {
        let mut hz = Volume::filled((4, 4, 4), (2.0, 2.0, 2.0), 100.0);
        *hz.at_mut(0, 0, 0) = -40.0;
        let field = hz_to_voxel_displacements(&hz, &acq_y());
        // 100 Hz * 0.05 s = 5 voxels along +y
        assert_eq!(field.component(1).at(1, 1, 1), 5.0);
        assert_eq!(field.component(1).at(0, 0, 0), -2.0);
        assert!(field.component(0).data().iter().all(|&v| v == 0.0));
        assert!(field.component(2).data().iter().all(|&v| v == 0.0));

        let neg = AcqPara::new([0.0, -1.0, 0.0], 0.05).unwrap();
        let field_neg = hz_to_voxel_displacements(&hz, &neg);
        assert_eq!(field_neg.component(1).at(1, 1, 1), -5.0);
    }

    #[test]
    fn test_voxel_to_mm_scaling() {
        let hz = Volume::filled((4, 4, 4), (2.0, 3.0, 4.0), 100.0);
        let field = hz_to_voxel_displacements(&hz, &acq_y());
        let mm = voxel_to_mm_displacements(&field);
        // 5 voxels * 3 mm along y
        assert_eq!(mm.component(1).at(1, 1, 1), 15.0);
    }

    #[test]
    fn test_jacobian_of_linear_ramp() {
        let dims = (4, 8, 4);
        let mut field = DispField::zeros(dims, (1.0, 1.0, 1.0));
        for k in 0..4 {
            for j in 0..8 {
                for i in 0..4 {
                    *field.component_mut(1).at_mut(i, j, k) = 0.1 * j as f64;
                }
            }
        }
        let jac = jacobian(&field, &acq_y());
        // d(0.1*j)/dj = 0.1 exactly, for central and one-sided stencils
        for k in 0..4 {
            for j in 0..8 {
                for i in 0..4 {
                    assert_relative_eq!(jac.at(i, j, k), 1.1, epsilon = 1e-12);
                }
            }
        }
    }

    #[test]
    fn test_invert_constant_displacement() {
        let dims = (2, 10, 2);
        let mut field = DispField::zeros(dims, (1.0, 1.0, 1.0));
        field.component_mut(1).data_mut().fill(2.0);
        let inmask = Volume::filled(dims, (1.0, 1.0, 1.0), 1.0);

        let (inv, omask) = invert_displacement_field(&field, &acq_y(), &inmask);
        // y(x) = x + 2 covers outputs 2..=9 inside a 10-long line
        for yo in 0..10 {
            let m = omask.at(0, yo, 0);
            if yo >= 2 {
                assert_eq!(m, 1.0, "output {} should be covered", yo);
                assert_relative_eq!(inv.component(1).at(0, yo, 0), -2.0, epsilon = 1e-12);
            } else {
                assert_eq!(m, 0.0, "output {} has no preimage", yo);
                assert_eq!(inv.component(1).at(0, yo, 0), 0.0);
            }
        }
    }

    #[test]
    fn test_inversion_composes_to_identity() {
        let dims = (1, 16, 1);
        let mut field = DispField::zeros(dims, (1.0, 1.0, 1.0));
        for j in 0..16 {
            // Smooth, invertible displacement (|slope| < 1)
            *field.component_mut(1).at_mut(0, j, 0) =
                1.5 * (std::f64::consts::PI * j as f64 / 15.0).sin() * 0.4;
        }
        let inmask = Volume::filled(dims, (1.0, 1.0, 1.0), 1.0);
        let (inv, omask) = invert_displacement_field(&field, &acq_y(), &inmask);

        let d = field.component(1);
        for yo in 0..16 {
            if omask.at(0, yo, 0) == 0.0 {
                continue;
            }
            let x = yo as f64 + inv.component(1).at(0, yo, 0);
            // Interpolate the forward displacement at x
            let j0 = (x.floor() as usize).min(15);
            let j1 = (j0 + 1).min(15);
            let f = x - j0 as f64;
            let dx = d.at(0, j0, 0) * (1.0 - f) + d.at(0, j1, 0) * f;
            assert_relative_eq!(x + dx, yo as f64, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_inversion_respects_input_mask() {
        let dims = (1, 10, 1);
        let field = DispField::zeros(dims, (1.0, 1.0, 1.0));
        let mut inmask = Volume::filled(dims, (1.0, 1.0, 1.0), 1.0);
        *inmask.at_mut(0, 4, 0) = 0.0;

        let (_, omask) = invert_displacement_field(&field, &acq_y(), &inmask);
        // Identity map: output j brackets inputs (j-1, j) or (j, j+1);
        // invalid input voxel 4 invalidates the outputs that touch it.
        assert_eq!(omask.at(0, 4, 0), 0.0);
        assert_eq!(omask.at(0, 0, 0), 1.0);
        assert_eq!(omask.at(0, 9, 0), 1.0);
    }
}
