//! Scan collection orchestration
//!
//! [`EcScanManager`] owns every scan of a diffusion acquisition in one
//! arena, in acquisition order, with index lists selecting the
//! diffusion-weighted and b0 subsets. At construction each volume of the
//! 4D series is classified by its b-value, attached to an eddy-current
//! model (the requested polynomial for DWI scans, movement-only for b0
//! scans) and rescaled so the first b0 has a mean intensity of 100
//! within the brain mask, which conditions the downstream estimation.
//!
//! On top of the per-scan transforms the manager provides the cross-scan
//! algorithms:
//!
//! * least-squares reconstruction (LSR) of an undistorted image from a
//!   pair of oppositely phase-encoded scans, solved line by line along
//!   the phase-encode axis as `(K'K + lambda S'S) y = K'y_obs` with the
//!   sampling matrices of both scans stacked vertically;
//! * separation of the constant field offset from subject translation,
//!   which are indistinguishable within a single scan but resolvable by
//!   regression across scans;
//! * re-expression of all movement parameters relative to a chosen
//!   reference scan.
//!
//! Batch image exports run scan (or pair) iterations in parallel with
//! rayon; every iteration reads shared immutable state and fills its own
//! volume of the output series exactly once. A failing iteration aborts
//! the whole export; volumes already assembled are discarded with it.

use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;

use crate::dispvec::{self, DispVec};
use crate::ec_model::{EcModelKind, ParamCategory, ScanEcModel};
use crate::error::{EddyError, EddyResult};
use crate::params::{AcqPara, DiffPara};
use crate::resample;
use crate::rigid;
use crate::scan::EcScan;
use crate::volume::{Volume, Volume4};

/// Regularization weight of the per-line LSR smoothness penalty.
const LSR_LAMBDA: f64 = 0.01;

/// Which subset of the scan collection an index refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanType {
    /// The full collection in acquisition order.
    Any,
    /// Diffusion-weighted scans only.
    Dwi,
    /// Unweighted (b0) scans only.
    B0,
}

/// The scans of one diffusion dataset and the operations that cut
/// across them.
#[derive(Debug, Clone)]
pub struct EcScanManager {
    scans: Vec<EcScan>,
    dwi_index: Vec<usize>,
    b0_index: Vec<usize>,
    susc: Option<Volume>,
    sf: f64,
    n_sessions: usize,
}

impl EcScanManager {
    /// Build the scan collection from an already-loaded series and its
    /// per-volume acquisition and diffusion tables.
    ///
    /// # Arguments
    /// * `series` - The acquired 4D data, one volume per scan
    /// * `mask` - Brain mask on the series grid, used for the
    ///   intensity-conditioning rescale
    /// * `acqs`, `diffs` - Per-volume acquisition and diffusion metadata
    /// * `ec_model` - Eddy-current model for diffusion-weighted scans;
    ///   b0 scans always get the movement-only model
    /// * `susc_field` - Precomputed susceptibility off-resonance field
    ///   in Hz on the series grid, shared by all scans
    /// * `move_par_seeds` - Per-volume rigid-body parameters from the
    ///   field-mapping registration, used to initialize each scan's
    ///   movement state
    /// * `sessions` - Zero-based session index per volume
    ///
    /// All scans are rescaled by `100 / mean(first b0 within mask)`; a
    /// series without a usable b0 cannot be conditioned and is rejected.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        series: &Volume4,
        mask: &Volume,
        acqs: &[AcqPara],
        diffs: &[DiffPara],
        ec_model: EcModelKind,
        susc_field: Option<Volume>,
        move_par_seeds: Option<&[[f64; 6]]>,
        sessions: &[usize],
        n_sessions: usize,
    ) -> EddyResult<Self> {
        let nt = series.n_volumes();
        let dims3 = series.dims3();
        let vox = series.voxel_size();

        if acqs.len() != nt || diffs.len() != nt || sessions.len() != nt {
            return Err(EddyError::Mismatch(format!(
                "series has {} volumes but {} acquisition, {} diffusion and {} session entries",
                nt,
                acqs.len(),
                diffs.len(),
                sessions.len()
            )));
        }
        if let Some(seeds) = move_par_seeds {
            if seeds.len() != nt {
                return Err(EddyError::Mismatch(format!(
                    "{} movement seeds for {} volumes",
                    seeds.len(),
                    nt
                )));
            }
        }
        if mask.dims() != dims3 || mask.voxel_size() != vox {
            return Err(EddyError::Mismatch(format!(
                "mask grid {:?} does not match series grid {:?}",
                mask.dims(),
                dims3
            )));
        }
        if let Some(ref s) = susc_field {
            if s.dims() != dims3 || s.voxel_size() != vox {
                return Err(EddyError::Mismatch(format!(
                    "susceptibility field grid {:?} does not match series grid {:?}",
                    s.dims(),
                    dims3
                )));
            }
        }
        for (t, &s) in sessions.iter().enumerate() {
            if s >= n_sessions {
                return Err(EddyError::Config(format!(
                    "volume {} claims session {} of {}",
                    t, s, n_sessions
                )));
            }
        }

        let first_b0 = diffs.iter().position(|d| d.is_b0()).ok_or_else(|| {
            EddyError::DegenerateData(
                "series contains no b0 volume to condition intensities against".to_string(),
            )
        })?;
        let mean = series.volume(first_b0)?.mean_where(mask);
        if !(mean > 0.0) {
            return Err(EddyError::DegenerateData(format!(
                "first b0 volume has mean intensity {} within the mask",
                mean
            )));
        }
        let sf = 100.0 / mean;

        let mut scans = Vec::with_capacity(nt);
        let mut dwi_index = Vec::new();
        let mut b0_index = Vec::new();
        for t in 0..nt {
            let kind = if diffs[t].is_b0() {
                EcModelKind::Movement
            } else if ec_model == EcModelKind::Movement {
                return Err(EddyError::Config(
                    "the movement-only model carries no eddy-current field and cannot \
                     be used for diffusion-weighted scans"
                        .to_string(),
                ));
            } else {
                ec_model
            };
            let mut vol = series.volume(t)?;
            vol.scale(sf);
            let mut scan = EcScan::new(vol, acqs[t], diffs[t], ScanEcModel::new(kind), sessions[t]);
            if let Some(seeds) = move_par_seeds {
                // The registration maps scan to field space; the scan's
                // movement state holds the opposite direction.
                let fwd = rigid::move_par_to_matrix(&seeds[t], dims3, vox);
                let seeded = rigid::matrix_to_move_par(&rigid::invert_rigid(&fwd), dims3, vox);
                scan.set_params(&seeded, ParamCategory::Movement)?;
            }
            if diffs[t].is_b0() {
                b0_index.push(t);
            } else {
                dwi_index.push(t);
            }
            scans.push(scan);
        }

        Ok(EcScanManager {
            scans,
            dwi_index,
            b0_index,
            susc: susc_field,
            sf,
            n_sessions,
        })
    }

    pub fn n_scans(&self, st: ScanType) -> usize {
        match st {
            ScanType::Any => self.scans.len(),
            ScanType::Dwi => self.dwi_index.len(),
            ScanType::B0 => self.b0_index.len(),
        }
    }

    /// Arena slot of scan `i` within a scope.
    fn index_for(&self, i: usize, st: ScanType) -> EddyResult<usize> {
        let slot = match st {
            ScanType::Any => (i < self.scans.len()).then_some(i),
            ScanType::Dwi => self.dwi_index.get(i).copied(),
            ScanType::B0 => self.b0_index.get(i).copied(),
        };
        slot.ok_or_else(|| {
            EddyError::IndexOutOfRange(format!(
                "scan {} of {} in scope {:?}",
                i,
                self.n_scans(st),
                st
            ))
        })
    }

    pub fn scan(&self, i: usize, st: ScanType) -> EddyResult<&EcScan> {
        let slot = self.index_for(i, st)?;
        Ok(&self.scans[slot])
    }

    pub fn scan_mut(&mut self, i: usize, st: ScanType) -> EddyResult<&mut EcScan> {
        let slot = self.index_for(i, st)?;
        Ok(&mut self.scans[slot])
    }

    /// Whether global scan `i` belongs to the diffusion-weighted subset.
    pub fn is_dwi(&self, i: usize) -> EddyResult<bool> {
        let slot = self.index_for(i, ScanType::Any)?;
        Ok(self.scans[slot].is_diffusion_weighted())
    }

    /// Global index of each diffusion-weighted scan, in subset order.
    pub fn dwi_to_global_index_mapping(&self) -> Vec<usize> {
        self.dwi_index.clone()
    }

    /// The load-time intensity scale factor `100 / mean(first b0)`.
    pub fn scale_factor(&self) -> f64 {
        self.sf
    }

    pub fn has_susc_field(&self) -> bool {
        self.susc.is_some()
    }

    pub fn susc_field(&self) -> Option<&Volume> {
        self.susc.as_ref()
    }

    pub fn no_of_sessions(&self) -> usize {
        self.n_sessions
    }

    /// Set the smoothing FWHM of every scan's working image.
    pub fn set_fwhm(&mut self, fwhm: f64) {
        for scan in self.scans.iter_mut() {
            scan.set_fwhm(fwhm);
        }
    }

    /// True when the collection is organized as two equal half-sequences
    /// in lock-step pair order: all scans of the first half share the
    /// first scan's acquisition parameters, and each scan `i` of the
    /// first half forms a matched phase-encode pair with scan `i + N/2`.
    pub fn can_do_lsr_resampling(&self) -> bool {
        let n = self.scans.len();
        if n < 2 || n % 2 != 0 {
            return false;
        }
        let first = self.scans[0].acq_para();
        let mut nfirst = n;
        for (s, scan) in self.scans.iter().enumerate().skip(1) {
            if scan.acq_para() != first {
                nfirst = s;
                break;
            }
        }
        if nfirst != n / 2 {
            return false;
        }
        let half = n / 2;
        for i in 0..half {
            let a = &self.scans[i];
            let b = &self.scans[i + half];
            if !a.original_ima().same_grid(b.original_ima())
                || !a.acq_para().matched_for_lsr(b.acq_para())
            {
                return false;
            }
        }
        true
    }

    /// Number of LSR pairs available within a scope.
    pub fn n_lsr_pairs(&self, st: ScanType) -> usize {
        self.n_scans(st) / 2
    }

    /// The scan indices `(i, i + N/2)` of LSR pair `i` within a scope.
    pub fn get_lsr_pair(&self, i: usize, st: ScanType) -> EddyResult<(usize, usize)> {
        if !self.can_do_lsr_resampling() {
            return Err(EddyError::Precondition(
                "scans are not organized as matched phase-encode pairs".to_string(),
            ));
        }
        let n_pairs = self.n_lsr_pairs(st);
        if i >= n_pairs {
            return Err(EddyError::IndexOutOfRange(format!(
                "pair {} of {} in scope {:?}",
                i, n_pairs, st
            )));
        }
        Ok((i, i + n_pairs))
    }

    /// Reconstruct one undistorted volume from a matched pair of scans.
    ///
    /// Both scans are rigid-body corrected, then every line along the
    /// phase-encode axis is recovered from the two distorted
    /// observations through the stacked per-line sampling matrices.
    /// Lines along which either scan's distortion field or
    /// motion-corrected image is undefined are left zero with a zero
    /// mask.
    ///
    /// Returns the reconstructed volume and its line-validity mask.
    pub fn lsr_resample_pair(
        &self,
        i: usize,
        j: usize,
        st: ScanType,
    ) -> EddyResult<(Volume, Volume)> {
        let si = self.scan(i, st)?;
        let sj = self.scan(j, st)?;
        if !si.original_ima().same_grid(sj.original_ima())
            || !si.acq_para().matched_for_lsr(sj.acq_para())
        {
            return Err(EddyError::Precondition(format!(
                "scans {} and {} do not form a matched phase-encode pair",
                i, j
            )));
        }
        let pe = si.acq_para().pe_axis();
        if pe == 2 {
            return Err(EddyError::Precondition(
                "phase encoding along the slice axis is not supported for \
                 least-squares resampling"
                    .to_string(),
            ));
        }

        let (ima_i, mask_i) = si.motion_corrected_original_ima();
        let (ima_j, mask_j) = sj.motion_corrected_original_ima();
        let susc = self.susc.as_ref();
        let tf_i = si.field_for_scan_to_model_transform(susc)?;
        let tf_j = sj.field_for_scan_to_model_transform(susc)?;

        let mut mask = mask_i;
        mask.mul_in_place(&mask_j);
        mask.mul_in_place(&tf_i.mask);
        mask.mul_in_place(&tf_j.mask);

        let dims = ima_i.dims();
        let vox = ima_i.voxel_size();
        let voxd = [vox.0, vox.1, vox.2][pe];
        // Displacements along the phase-encode axis, in voxels
        let mut disp_i = tf_i.field.component(pe).clone();
        disp_i.scale(1.0 / voxd);
        let mut disp_j = tf_j.field.component(pe).clone();
        disp_j.scale(1.0 / voxd);

        let (nx, ny, nz) = dims;
        let n = [nx, ny, nz][pe];
        let s = DispVec::s_matrix(n);
        let sts = s.transpose() * &s;

        let mut ovol = Volume::zeros(dims, vox);
        let mut omask = Volume::zeros(dims, vox);
        for k in 0..nz {
            if pe == 0 {
                for jj in 0..ny {
                    let mline = dispvec::extract_row(&mask, jj, k);
                    if !dispvec::line_is_valid(&mline) {
                        continue;
                    }
                    let ki = DispVec::from_displacements(dispvec::extract_row(&disp_i, jj, k));
                    let kj = DispVec::from_displacements(dispvec::extract_row(&disp_j, jj, k));
                    let yi = dispvec::extract_row(&ima_i, jj, k);
                    let yj = dispvec::extract_row(&ima_j, jj, k);
                    let sol = solve_lsr_line(&ki.k_matrix(), &kj.k_matrix(), &yi, &yj, &sts)?;
                    for ii in 0..nx {
                        *ovol.at_mut(ii, jj, k) = sol[ii];
                        *omask.at_mut(ii, jj, k) = 1.0;
                    }
                }
            } else {
                for ii in 0..nx {
                    let mline = dispvec::extract_column(&mask, ii, k);
                    if !dispvec::line_is_valid(&mline) {
                        continue;
                    }
                    let ki = DispVec::from_displacements(dispvec::extract_column(&disp_i, ii, k));
                    let kj = DispVec::from_displacements(dispvec::extract_column(&disp_j, ii, k));
                    let yi = dispvec::extract_column(&ima_i, ii, k);
                    let yj = dispvec::extract_column(&ima_j, ii, k);
                    let sol = solve_lsr_line(&ki.k_matrix(), &kj.k_matrix(), &yi, &yj, &sts)?;
                    for jj in 0..ny {
                        *ovol.at_mut(ii, jj, k) = sol[jj];
                        *omask.at_mut(ii, jj, k) = 1.0;
                    }
                }
            }
        }
        Ok((ovol, omask))
    }

    /// Bulk parameter assignment, one matrix row per scan in the scope.
    ///
    /// Each row must be at least as wide as its scan's parameter vector;
    /// the excess (zero padding for narrower models) is ignored.
    pub fn set_parameters(&mut self, params: &DMatrix<f64>, st: ScanType) -> EddyResult<()> {
        let n = self.n_scans(st);
        if params.nrows() != n {
            return Err(EddyError::Mismatch(format!(
                "parameter matrix has {} rows for {} scans in scope {:?}",
                params.nrows(),
                n,
                st
            )));
        }
        for r in 0..n {
            let slot = self.index_for(r, st)?;
            let np = self.scans[slot].n_param();
            if params.ncols() < np {
                return Err(EddyError::Mismatch(format!(
                    "parameter matrix has {} columns, scan {} needs {}",
                    params.ncols(),
                    r,
                    np
                )));
            }
            let row: Vec<f64> = (0..np).map(|c| params[(r, c)]).collect();
            self.scans[slot].set_params(&row, ParamCategory::All)?;
        }
        Ok(())
    }

    /// The current parameter state, one row per scan in the scope,
    /// zero-padded to the widest parameter vector.
    pub fn parameters(&self, st: ScanType) -> DMatrix<f64> {
        let n = self.n_scans(st);
        let width = (0..n)
            .filter_map(|i| self.index_for(i, st).ok())
            .map(|slot| self.scans[slot].n_param())
            .max()
            .unwrap_or(0);
        let mut params = DMatrix::zeros(n, width);
        for r in 0..n {
            if let Ok(slot) = self.index_for(r, st) {
                for (c, v) in self.scans[slot].params(ParamCategory::All).iter().enumerate() {
                    params[(r, c)] = *v;
                }
            }
        }
        params
    }

    /// Move the part of each DWI scan's signal shift that is explained
    /// by eddy currents and scanner drift from the movement parameters
    /// into the field-offset parameter.
    ///
    /// A constant off-resonance offset and a subject translation along
    /// the phase-encode axis displace a single scan identically, so the
    /// split between them is unobservable per scan. Across scans the
    /// offset follows the diffusion gradients and drifts with time,
    /// while true movement does not, so the total per-scan shift
    /// (offset plus phase-encode translation, expressed in Hz) is
    /// regressed onto each scan's first-order eddy-current coefficients,
    /// a linear-in-time ramp per session and one global ramp when there
    /// are several sessions. The explained part becomes the field
    /// offset; the residual stays in the translation. The total Hz per
    /// scan is unchanged by the operation.
    pub fn separate_field_offset_from_movement(&mut self) -> EddyResult<()> {
        let nd = self.dwi_index.len();
        if nd == 0 {
            return Ok(());
        }

        let mut hz = DVector::zeros(nd);
        for (di, &slot) in self.dwi_index.iter().enumerate() {
            let scan = &self.scans[slot];
            let h2m = scan.hz_to_mm_vector();
            let pe = scan.acq_para().pe_axis();
            hz[di] = scan.field_offset() + scan.move_par()[pe] / h2m[pe];
        }

        let global_ramp = self.n_sessions > 1;
        let ncol = 3 + self.n_sessions + usize::from(global_ramp);
        let mut x = DMatrix::zeros(nd, ncol);
        let mut session_counter = vec![0usize; self.n_sessions];
        for (di, &slot) in self.dwi_index.iter().enumerate() {
            let scan = &self.scans[slot];
            let lp = scan.linear_parameters();
            x[(di, 0)] = lp[0];
            x[(di, 1)] = lp[1];
            x[(di, 2)] = lp[2];
            let s = scan.session();
            session_counter[s] += 1;
            x[(di, 3 + s)] = session_counter[s] as f64;
            if global_ramp {
                x[(di, 3 + self.n_sessions)] = di as f64;
            }
        }
        // Scale the ramps to unit maximum so their singular values are
        // comparable to the coefficient columns
        for c in 3..ncol {
            let m = (0..nd).fold(0.0_f64, |acc, r| acc.max(x[(r, c)].abs()));
            if m > 0.0 {
                for r in 0..nd {
                    x[(r, c)] /= m;
                }
            }
        }

        let pinv = x
            .clone()
            .pseudo_inverse(1e-10)
            .map_err(|msg| EddyError::DegenerateData(msg.to_string()))?;
        let fitted = &x * (pinv * &hz);

        for (di, &slot) in self.dwi_index.iter().enumerate() {
            let scan = &mut self.scans[slot];
            let h2m = scan.hz_to_mm_vector();
            let residual_hz = hz[di] - fitted[di];
            scan.set_field_offset(fitted[di]);
            let mut mp = scan.move_par();
            for (d, &h) in h2m.iter().enumerate() {
                if h != 0.0 {
                    mp[d] = residual_hz * h;
                }
            }
            scan.set_params(&mp, ParamCategory::Movement)?;
        }
        Ok(())
    }

    /// Re-express the movement parameters of every scan in the scope
    /// relative to scan `r`, whose parameters become identity.
    pub fn set_reference(&mut self, r: usize, st: ScanType) -> EddyResult<()> {
        let ref_slot = self.index_for(r, st)?;
        let ref_inv = rigid::invert_rigid(&self.scans[ref_slot].forward_movement_matrix());
        let n = self.n_scans(st);
        for i in 0..n {
            let slot = self.index_for(i, st)?;
            let scan = &self.scans[slot];
            let dims = scan.original_ima().dims();
            let vox = scan.original_ima().voxel_size();
            let m = scan.forward_movement_matrix() * ref_inv;
            let mp = rigid::matrix_to_move_par(&m, dims, vox);
            self.scans[slot].set_params(&mp, ParamCategory::Movement)?;
        }
        Ok(())
    }

    /// The eddy-current field of scan `i` in Hz, pulled into model space
    /// with the scan's inverse movement matrix.
    pub fn scan_hz_ec_off_res_field(&self, i: usize, st: ScanType) -> EddyResult<Volume> {
        let scan = self.scan(i, st)?;
        let field = scan.ec_field();
        let (ovol, _mask) = resample::affine_transform(&field, &scan.inverse_movement_matrix());
        Ok(ovol)
    }

    /// The model-space eddy-current Hz fields of all scans in the scope,
    /// concatenated along the fourth dimension.
    pub fn ec_fields(&self, st: ScanType) -> EddyResult<Volume4> {
        let n = self.n_scans(st);
        let dims3 = self.scans[0].original_ima().dims();
        let vox = self.scans[0].original_ima().voxel_size();
        let mut out = Volume4::zeros((dims3.0, dims3.1, dims3.2, n), vox);
        for t in 0..n {
            let field = self.scan_hz_ec_off_res_field(t, st)?;
            out.set_volume(t, &field)?;
        }
        Ok(out)
    }

    /// Every scan of the scope unwarped into model space with Jacobian
    /// intensity modulation, intensities restored to the acquired scale.
    /// Smoothing is cleared first so the output reflects the acquired
    /// data.
    pub fn jac_registered_images(&mut self, st: ScanType) -> EddyResult<Volume4> {
        self.set_fwhm(0.0);
        let n = self.n_scans(st);
        let dims3 = self.scans[0].original_ima().dims();
        let vox = self.scans[0].original_ima().voxel_size();
        let mut out = Volume4::zeros((dims3.0, dims3.1, dims3.2, n), vox);
        let vol_len = out.volume_len();

        let this = &*self;
        let susc = this.susc.as_ref();
        out.data_mut()
            .par_chunks_exact_mut(vol_len)
            .enumerate()
            .try_for_each(|(t, chunk)| -> EddyResult<()> {
                let scan = this.scan(t, st)?;
                let (mut ima, _mask) = scan.get_unwarped_ima(susc)?;
                ima.scale(1.0 / this.sf);
                chunk.copy_from_slice(ima.data());
                Ok(())
            })?;
        Ok(out)
    }

    /// One LSR-reconstructed volume per pair of the scope, intensities
    /// restored to the acquired scale. Smoothing is cleared first so the
    /// output reflects the acquired data.
    pub fn lsr_registered_images(&mut self, st: ScanType) -> EddyResult<Volume4> {
        self.lsr_registered_images_with_progress(st, |_done, _total| {})
    }

    /// Like [`lsr_registered_images`](Self::lsr_registered_images), with
    /// a `(completed, total)` callback fired as each pair finishes.
    pub fn lsr_registered_images_with_progress<F>(
        &mut self,
        st: ScanType,
        progress: F,
    ) -> EddyResult<Volume4>
    where
        F: Fn(usize, usize) + Sync,
    {
        self.set_fwhm(0.0);
        if !self.can_do_lsr_resampling() {
            return Err(EddyError::Precondition(
                "scans are not organized as matched phase-encode pairs".to_string(),
            ));
        }
        let n_pairs = self.n_lsr_pairs(st);
        let dims3 = self.scans[0].original_ima().dims();
        let vox = self.scans[0].original_ima().voxel_size();
        let mut out = Volume4::zeros((dims3.0, dims3.1, dims3.2, n_pairs), vox);
        let vol_len = out.volume_len();

        let this = &*self;
        let done = AtomicUsize::new(0);
        out.data_mut()
            .par_chunks_exact_mut(vol_len)
            .enumerate()
            .try_for_each(|(p, chunk)| -> EddyResult<()> {
                let (i, j) = this.get_lsr_pair(p, st)?;
                let (mut ima, _mask) = this.lsr_resample_pair(i, j, st)?;
                ima.scale(1.0 / this.sf);
                chunk.copy_from_slice(ima.data());
                let finished = done.fetch_add(1, Ordering::Relaxed) + 1;
                progress(finished, n_pairs);
                Ok(())
            })?;
        Ok(out)
    }

    /// Write the parameter state of the scope as an ASCII matrix, one
    /// line per scan, zero-padded to the widest parameter vector.
    pub fn write_parameter_file<P: AsRef<Path>>(&self, path: P, st: ScanType) -> EddyResult<()> {
        let params = self.parameters(st);
        let mut file = File::create(path.as_ref())?;
        for r in 0..params.nrows() {
            let row: Vec<String> = (0..params.ncols())
                .map(|c| format!("{:.6e}", params[(r, c)]))
                .collect();
            writeln!(file, "{}", row.join(" "))?;
        }
        Ok(())
    }
}

/// Solve one line's regularized least-squares system
/// `(K'K + lambda S'S) y = K'y_obs` with the two scans' sampling
/// matrices stacked vertically.
fn solve_lsr_line(
    ki: &DMatrix<f64>,
    kj: &DMatrix<f64>,
    yi: &[f64],
    yj: &[f64],
    sts: &DMatrix<f64>,
) -> EddyResult<DVector<f64>> {
    let n = yi.len();
    let mut kk = DMatrix::zeros(2 * n, n);
    kk.view_mut((0, 0), (n, n)).copy_from(ki);
    kk.view_mut((n, 0), (n, n)).copy_from(kj);
    let y = DVector::from_iterator(2 * n, yi.iter().chain(yj.iter()).copied());

    let kt = kk.transpose();
    let ktk = &kt * &kk + sts * LSR_LAMBDA;
    let rhs = &kt * &y;
    ktk.lu().solve(&rhs).ok_or_else(|| {
        EddyError::DegenerateData("singular least-squares system for an image line".to_string())
    })
}
