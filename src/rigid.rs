//! Rigid-body movement parameters
//!
//! Conversion between the six movement parameters of a scan (three
//! translations in mm followed by three rotations in radians, applied as
//! `Rx*Ry*Rz`) and 4x4 homogeneous matrices acting on mm coordinates.
//! Rotations are taken about the centre of the field of view, so small
//! rotation parameters perturb the image edges symmetrically.
//!
//! The forward matrix is `T(t) * T(c) * Rx * Ry * Rz * T(-c)` with `c`
//! the FOV centre. The decomposition is exact for pitch angles below
//! 90 degrees, which covers any physically plausible head movement.

use nalgebra::{Matrix4, Vector3};

fn translation(t: Vector3<f64>) -> Matrix4<f64> {
    let mut m = Matrix4::identity();
    m[(0, 3)] = t[0];
    m[(1, 3)] = t[1];
    m[(2, 3)] = t[2];
    m
}

fn rot_x(a: f64) -> Matrix4<f64> {
    let (s, c) = a.sin_cos();
    let mut m = Matrix4::identity();
    m[(1, 1)] = c;
    m[(1, 2)] = -s;
    m[(2, 1)] = s;
    m[(2, 2)] = c;
    m
}

fn rot_y(a: f64) -> Matrix4<f64> {
    let (s, c) = a.sin_cos();
    let mut m = Matrix4::identity();
    m[(0, 0)] = c;
    m[(0, 2)] = s;
    m[(2, 0)] = -s;
    m[(2, 2)] = c;
    m
}

fn rot_z(a: f64) -> Matrix4<f64> {
    let (s, c) = a.sin_cos();
    let mut m = Matrix4::identity();
    m[(0, 0)] = c;
    m[(0, 1)] = -s;
    m[(1, 0)] = s;
    m[(1, 1)] = c;
    m
}

/// FOV centre of a voxel grid in mm coordinates.
fn center(dims: (usize, usize, usize), voxel_size: (f64, f64, f64)) -> Vector3<f64> {
    Vector3::new(
        0.5 * (dims.0 as f64 - 1.0) * voxel_size.0,
        0.5 * (dims.1 as f64 - 1.0) * voxel_size.1,
        0.5 * (dims.2 as f64 - 1.0) * voxel_size.2,
    )
}

/// Build the rigid-body matrix for a movement parameter six-vector.
///
/// # Arguments
/// * `mp` - `[tx, ty, tz, rx, ry, rz]`, translations in mm, rotations in radians
/// * `dims` - Voxel grid the matrix acts on
/// * `voxel_size` - Voxel dimensions in mm
pub fn move_par_to_matrix(
    mp: &[f64; 6],
    dims: (usize, usize, usize),
    voxel_size: (f64, f64, f64),
) -> Matrix4<f64> {
    let c = center(dims, voxel_size);
    let t = Vector3::new(mp[0], mp[1], mp[2]);
    translation(t + c) * rot_x(mp[3]) * rot_y(mp[4]) * rot_z(mp[5]) * translation(-c)
}

/// Invert a rigid-body matrix `[R t; 0 1]` as `[R' -R't; 0 1]`.
///
/// Exact for proper rigid transforms, with none of the pivoting noise of
/// a general 4x4 inverse.
pub fn invert_rigid(m: &Matrix4<f64>) -> Matrix4<f64> {
    let mut inv = Matrix4::identity();
    for r in 0..3 {
        for c in 0..3 {
            inv[(r, c)] = m[(c, r)];
        }
    }
    let t = Vector3::new(m[(0, 3)], m[(1, 3)], m[(2, 3)]);
    for r in 0..3 {
        inv[(r, 3)] = -(inv[(r, 0)] * t[0] + inv[(r, 1)] * t[1] + inv[(r, 2)] * t[2]);
    }
    inv
}

/// Recover the movement parameter six-vector from a rigid-body matrix.
///
/// Inverse of [`move_par_to_matrix`] for the same grid. The rotation
/// block must be a proper rotation with pitch magnitude below 90 degrees.
pub fn matrix_to_move_par(
    m: &Matrix4<f64>,
    dims: (usize, usize, usize),
    voxel_size: (f64, f64, f64),
) -> [f64; 6] {
    let ry = m[(0, 2)].clamp(-1.0, 1.0).asin();
    let rx = (-m[(1, 2)]).atan2(m[(2, 2)]);
    let rz = (-m[(0, 1)]).atan2(m[(0, 0)]);

    let c = center(dims, voxel_size);
    let rot = m.fixed_view::<3, 3>(0, 0);
    let t_full = Vector3::new(m[(0, 3)], m[(1, 3)], m[(2, 3)]);
    let t = t_full - c + rot * c;

    [t[0], t[1], t[2], rx, ry, rz]
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const DIMS: (usize, usize, usize) = (32, 32, 20);
    const VOX: (f64, f64, f64) = (2.0, 2.0, 3.0);

    #[test]
    fn test_zero_parameters_give_identity() {
        let m = move_par_to_matrix(&[0.0; 6], DIMS, VOX);
        assert_relative_eq!(m, Matrix4::identity(), epsilon = 1e-12);
    }

    #[test]
    fn test_round_trip() {
        let mp = [1.5, -2.0, 0.7, 0.03, -0.05, 0.02];
        let m = move_par_to_matrix(&mp, DIMS, VOX);
        let back = matrix_to_move_par(&m, DIMS, VOX);
        for d in 0..6 {
            assert_relative_eq!(mp[d], back[d], epsilon = 1e-10);
        }
    }

    #[test]
    fn test_rotation_fixes_fov_center() {
        let mp = [0.0, 0.0, 0.0, 0.1, -0.07, 0.2];
        let m = move_par_to_matrix(&mp, DIMS, VOX);
        let c = center(DIMS, VOX);
        let moved = m * nalgebra::Vector4::new(c[0], c[1], c[2], 1.0);
        assert_relative_eq!(moved[0], c[0], epsilon = 1e-10);
        assert_relative_eq!(moved[1], c[1], epsilon = 1e-10);
        assert_relative_eq!(moved[2], c[2], epsilon = 1e-10);
    }

    #[test]
    fn test_pure_translation() {
        let mp = [3.0, -1.0, 2.5, 0.0, 0.0, 0.0];
        let m = move_par_to_matrix(&mp, DIMS, VOX);
        let p = m * nalgebra::Vector4::new(10.0, 20.0, 5.0, 1.0);
        assert_relative_eq!(p[0], 13.0, epsilon = 1e-12);
        assert_relative_eq!(p[1], 19.0, epsilon = 1e-12);
        assert_relative_eq!(p[2], 7.5, epsilon = 1e-12);
    }

    #[test]
    fn test_invert_rigid_matches_general_inverse() {
        let mp = [1.0, -2.0, 0.5, 0.04, 0.02, -0.06];
        let m = move_par_to_matrix(&mp, DIMS, VOX);
        let inv = invert_rigid(&m);
        assert_relative_eq!(m * inv, Matrix4::identity(), epsilon = 1e-12);
        assert_relative_eq!(inv * m, Matrix4::identity(), epsilon = 1e-12);
    }

    #[test]
    fn test_inverse_matrix_round_trip() {
        // Re-expressing a movement relative to a reference uses M * Mr^-1;
        // the decomposition must survive products of generated matrices.
        let mp_a = [1.0, 0.5, -0.25, 0.02, 0.01, -0.03];
        let mp_r = [0.2, -0.1, 0.4, -0.01, 0.02, 0.01];
        let ma = move_par_to_matrix(&mp_a, DIMS, VOX);
        let mr = move_par_to_matrix(&mp_r, DIMS, VOX);
        let rel = ma * mr.try_inverse().unwrap();
        let back = move_par_to_matrix(&matrix_to_move_par(&rel, DIMS, VOX), DIMS, VOX);
        assert_relative_eq!(rel, back, epsilon = 1e-10);
    }
}
