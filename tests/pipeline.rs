//! End-to-end tests of the correction pipeline on synthetic series with
//! closed-form ground truth.

mod common;

use approx::assert_relative_eq;
use nalgebra::DMatrix;

use common::*;
use eddy_core::ec_model::EcModelKind;
use eddy_core::manager::{EcScanManager, ScanType};
use eddy_core::nifti_io;
use eddy_core::params::DiffPara;
use eddy_core::volume::Volume;

const DIMS: (usize, usize, usize) = (6, 8, 4);
const VOX: (f64, f64, f64) = (2.0, 2.0, 2.0);

/// A manager holding one constant b0 and one DWI whose content is the
/// ground-truth ramp warped as a 10 Hz constant field would warp it
/// (half a voxel along -y), optionally with a rigid translation on top.
fn distorted_manager(observed: Volume) -> EcScanManager {
    let b0 = Volume::filled(DIMS, VOX, 50.0);
    let series = series_of(&[b0, observed]);
    let mask = full_mask(DIMS, VOX);
    EcScanManager::new(
        &series,
        &mask,
        &[acq_up(), acq_up()],
        &[DiffPara::b0(), dwi()],
        EcModelKind::Linear,
        None,
        None,
        &[0, 0],
        1,
    )
    .unwrap()
}

#[test]
fn test_constant_offset_distortion_is_undone() {
    let truth = linear_volume(DIMS, VOX, 100.0, [2.0, 10.0, 5.0]);
    // 10 Hz over a 0.05 s readout shifts the object half a voxel down
    // the +y ramp in the acquired image
    let observed = linear_volume(DIMS, VOX, 95.0, [2.0, 10.0, 5.0]);
    let mut mgr = distorted_manager(observed);

    // Linear model layout: 6 movement, 3 first-order coefficients, offset
    let mut params = DMatrix::zeros(1, 10);
    params[(0, 9)] = 10.0;
    mgr.set_parameters(&params, ScanType::Dwi).unwrap();

    let out = mgr.jac_registered_images(ScanType::Dwi).unwrap();
    assert_eq!(out.n_volumes(), 1);
    let corrected = out.volume(0).unwrap();

    // The last row along y samples past the acquired volume
    let mut interior = full_mask(DIMS, VOX);
    for k in 0..DIMS.2 {
        for i in 0..DIMS.0 {
            *interior.at_mut(i, DIMS.1 - 1, k) = 0.0;
        }
    }
    let err = rmse(corrected.data(), truth.data(), interior.data());
    assert!(err < 1e-9, "interior should match ground truth, rmse {}", err);
    assert_eq!(corrected.at(0, DIMS.1 - 1, 0), 0.0, "uncovered row is zeroed");
    assert_eq!(corrected.at(3, DIMS.1 - 1, 2), 0.0);
}

#[test]
fn test_movement_and_distortion_are_undone_together() {
    let truth = linear_volume(DIMS, VOX, 100.0, [2.0, 10.0, 5.0]);
    // A 2 mm translation along y (one voxel) shifts the sampling one
    // voxel down, the 10 Hz field half a voxel up: net half a voxel up
    // the ramp in the acquired image
    let observed = linear_volume(DIMS, VOX, 105.0, [2.0, 10.0, 5.0]);
    let mut mgr = distorted_manager(observed);

    let mut params = DMatrix::zeros(1, 10);
    params[(0, 1)] = 2.0;
    params[(0, 9)] = 10.0;
    mgr.set_parameters(&params, ScanType::Dwi).unwrap();

    let out = mgr.jac_registered_images(ScanType::Dwi).unwrap();
    let corrected = out.volume(0).unwrap();

    // The first row along y now samples before the acquired volume
    let mut interior = full_mask(DIMS, VOX);
    for k in 0..DIMS.2 {
        for i in 0..DIMS.0 {
            *interior.at_mut(i, 0, k) = 0.0;
        }
    }
    let err = rmse(corrected.data(), truth.data(), interior.data());
    assert!(err < 1e-9, "interior should match ground truth, rmse {}", err);
    assert_eq!(corrected.at(2, 0, 1), 0.0, "uncovered row is zeroed");
}

#[test]
fn test_opposed_pair_lsr_restores_average() {
    let dims = (4, 4, 2);
    let vox = (2.0, 2.0, 2.0);
    // Constant along the phase-encode axis, so the smoothness penalty
    // vanishes and the reconstruction is exact
    let mut a = Volume::zeros(dims, vox);
    for k in 0..dims.2 {
        for j in 0..dims.1 {
            for i in 0..dims.0 {
                *a.at_mut(i, j, k) = 1.0 + i as f64 + 10.0 * k as f64;
            }
        }
    }
    let mut b = a.clone();
    b.scale(2.0);

    let series = series_of(&[a.clone(), b]);
    let mask = full_mask(dims, vox);
    let mut mgr = EcScanManager::new(
        &series,
        &mask,
        &[acq_up(), acq_down()],
        &[DiffPara::b0(), DiffPara::b0()],
        EcModelKind::Movement,
        None,
        None,
        &[0, 0],
        1,
    )
    .unwrap();

    assert!(mgr.can_do_lsr_resampling());
    let out = mgr.lsr_registered_images(ScanType::Any).unwrap();
    assert_eq!(out.n_volumes(), 1);
    let recon = out.volume(0).unwrap();

    let mut expected = a;
    expected.scale(1.5);
    let err = rmse(recon.data(), expected.data(), mask.data());
    assert!(err < 1e-8, "reconstruction should be the voxelwise average, rmse {}", err);
}

#[test]
fn test_two_session_offset_separation_absorbs_translations() {
    let dims = (4, 4, 2);
    let vox = (2.0, 2.0, 2.0);
    let b0 = Volume::filled(dims, vox, 50.0);
    let d = linear_volume(dims, vox, 20.0, [1.0, 1.0, 1.0]);
    let series = series_of(&[b0, d.clone(), d.clone(), d.clone(), d]);
    let mask = full_mask(dims, vox);

    let mut mgr = EcScanManager::new(
        &series,
        &mask,
        &[acq_up(); 5],
        &[DiffPara::b0(), dwi(), dwi(), dwi(), dwi()],
        EcModelKind::Linear,
        None,
        None,
        &[0, 0, 0, 1, 1],
        2,
    )
    .unwrap();

    // Per-scan shift in Hz is offset + ty / (dy * pe_y * readout),
    // here offset + ty / 0.1
    let offsets = [8.0, 12.0, -4.0, 6.0];
    let tys = [0.2, -0.1, 0.3, 0.0];
    let lin_x = [1.0, 0.5, -0.3, 0.2];
    let mut params = DMatrix::zeros(4, 10);
    for r in 0..4 {
        params[(r, 1)] = tys[r];
        params[(r, 6)] = lin_x[r];
        params[(r, 9)] = offsets[r];
    }
    mgr.set_parameters(&params, ScanType::Dwi).unwrap();

    mgr.separate_field_offset_from_movement().unwrap();

    let after = mgr.parameters(ScanType::Dwi);
    for r in 0..4 {
        let total_hz = offsets[r] + tys[r] / 0.1;
        // The per-scan total is preserved exactly
        assert_relative_eq!(
            after[(r, 9)] + after[(r, 1)] / 0.1,
            total_hz,
            epsilon = 1e-9
        );
        // Four scans, four independent regressors: the fit is exact and
        // the whole shift moves into the offset
        assert_relative_eq!(after[(r, 9)], total_hz, epsilon = 1e-8);
        assert_relative_eq!(after[(r, 1)], 0.0, epsilon = 1e-8);
        // Parameters off the phase-encode axis stay put
        assert_relative_eq!(after[(r, 0)], 0.0, epsilon = 1e-12);
        assert_relative_eq!(after[(r, 6)], lin_x[r], epsilon = 1e-12);
    }
    // The b0 scan is not part of the separation
    let b0_params = mgr.parameters(ScanType::B0);
    assert!(b0_params.iter().all(|&v| v == 0.0));
}

#[test]
fn test_no_susceptibility_field_gives_pure_ec_hz_maps() {
    let dims = (4, 4, 2);
    let vox = (2.0, 2.0, 2.0);
    let b0 = Volume::filled(dims, vox, 50.0);
    let d = Volume::filled(dims, vox, 30.0);
    let series = series_of(&[b0, d]);
    let mask = full_mask(dims, vox);

    let mut mgr = EcScanManager::new(
        &series,
        &mask,
        &[acq_up(), acq_up()],
        &[DiffPara::b0(), dwi()],
        EcModelKind::Linear,
        None,
        None,
        &[0, 0],
        1,
    )
    .unwrap();
    assert!(!mgr.has_susc_field());
    assert!(mgr.susc_field().is_none());

    let mut params = DMatrix::zeros(1, 10);
    params[(0, 9)] = 4.0;
    mgr.set_parameters(&params, ScanType::Dwi).unwrap();

    // The Hz map is the eddy-current polynomial and nothing else
    let hz = mgr.scan_hz_ec_off_res_field(0, ScanType::Dwi).unwrap();
    for &v in hz.data() {
        assert_relative_eq!(v, 4.0, epsilon = 1e-12);
    }
    let b0_fields = mgr.ec_fields(ScanType::B0).unwrap();
    assert!(b0_fields.data().iter().all(|&v| v == 0.0));

    // Both transform directions work without a susceptibility map:
    // 4 Hz * 0.05 s * 2 mm voxels = 0.4 mm along +y
    let scan = mgr.scan(0, ScanType::Dwi).unwrap();
    let stm = scan.field_for_scan_to_model_transform(None).unwrap();
    assert_relative_eq!(stm.field.component(1).at(1, 1, 1), 0.4, epsilon = 1e-12);
    assert!(stm.mask.data().iter().all(|&m| m == 1.0));

    let mts = scan.field_for_model_to_scan_transform(None).unwrap();
    assert_relative_eq!(mts.field.component(1).at(1, 2, 1), -0.4, epsilon = 1e-10);
    assert_eq!(mts.mask.at(1, 0, 1), 0.0, "first row has no preimage");
    assert_eq!(mts.mask.at(1, 2, 1), 1.0);
}

#[test]
fn test_corrected_images_persist_through_nifti() {
    let observed = linear_volume(DIMS, VOX, 95.0, [2.0, 10.0, 5.0]);
    let mut mgr = distorted_manager(observed);
    let mut params = DMatrix::zeros(1, 10);
    params[(0, 9)] = 10.0;
    mgr.set_parameters(&params, ScanType::Dwi).unwrap();
    let out = mgr.jac_registered_images(ScanType::Dwi).unwrap();

    let path = std::env::temp_dir().join("eddy_core_pipeline_corrected.nii.gz");
    nifti_io::write_volume4(&path, &out).unwrap();
    let loaded = nifti_io::read_volume4(&path).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(loaded.dims(), out.dims());
    assert_eq!(loaded.voxel_size(), out.voxel_size());
    let ones = vec![1.0; out.data().len()];
    let err = rmse(loaded.data(), out.data(), &ones);
    assert!(err < 1e-3, "float32 storage should be near-lossless, rmse {}", err);
}
