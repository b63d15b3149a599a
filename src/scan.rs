//! Per-scan distortion model
//!
//! [`EcScan`] couples one acquired volume with everything needed to map
//! it between acquisition (scan) space and the motion-free, undistorted
//! model space: the acquisition metadata, the rigid-body movement
//! parameters and the eddy-current field model.
//!
//! The two central operations assemble the total off-resonance field
//! (eddy-current polynomial plus, when available, the shared
//! susceptibility field) in the space it is needed in:
//!
//! * scan-to-model: the eddy-current field is pulled into model space
//!   with the inverse movement matrix, the susceptibility field is added
//!   untransformed (it lives in model space), and the Hz map becomes a
//!   mm displacement field with its Jacobian intensity modulation.
//! * model-to-scan: the susceptibility field is pulled into scan space
//!   with the forward matrix, added to the untransformed eddy-current
//!   field, and the resulting displacement field is numerically inverted
//!   along the phase-encode axis.
//!
//! Resampling through these fields produces unwarped images (with
//! Jacobian modulation) and lets model-space predictions replace
//! corrupted slices in the acquired data.

use nalgebra::Matrix4;

use crate::ec_model::{ParamCategory, ScanEcModel};
use crate::error::{EddyError, EddyResult};
use crate::field::{self, DispField};
use crate::params::{AcqPara, DiffPara};
use crate::resample;
use crate::rigid;
use crate::smooth;
use crate::volume::Volume;

/// A displacement field between scan and model space, with the validity
/// mask of the transform and the Jacobian intensity modulation.
#[derive(Debug, Clone)]
pub struct TransformedField {
    /// Displacement field in mm, indexed by output voxel.
    pub field: DispField,
    /// 0/1 validity of the field.
    pub mask: Volume,
    /// Intensity modulation along the phase-encode axis.
    pub jacobian: Volume,
}

/// One scan of a diffusion series with its movement and eddy-current
/// parameter state.
#[derive(Debug, Clone)]
pub struct EcScan {
    ima: Volume,
    sima: Option<Volume>,
    fwhm: f64,
    acqp: AcqPara,
    diffp: DiffPara,
    model: ScanEcModel,
    session: usize,
}

impl EcScan {
    pub fn new(
        ima: Volume,
        acqp: AcqPara,
        diffp: DiffPara,
        model: ScanEcModel,
        session: usize,
    ) -> Self {
        EcScan {
            ima,
            sima: None,
            fwhm: 0.0,
            acqp,
            diffp,
            model,
            session,
        }
    }

    /// The working image: smoothed when a prefilter FWHM is set,
    /// otherwise the original.
    pub fn ima(&self) -> &Volume {
        self.sima.as_ref().unwrap_or(&self.ima)
    }

    /// The acquired image, regardless of smoothing.
    pub fn original_ima(&self) -> &Volume {
        &self.ima
    }

    pub fn acq_para(&self) -> &AcqPara {
        &self.acqp
    }

    pub fn diff_para(&self) -> &DiffPara {
        &self.diffp
    }

    pub fn session(&self) -> usize {
        self.session
    }

    pub fn is_diffusion_weighted(&self) -> bool {
        !self.diffp.is_b0()
    }

    pub fn model(&self) -> &ScanEcModel {
        &self.model
    }

    pub fn fwhm(&self) -> f64 {
        self.fwhm
    }

    /// Set the Gaussian prefilter FWHM in mm. Zero drops the smoothed
    /// working copy; any positive value recomputes it from the original.
    pub fn set_fwhm(&mut self, fwhm: f64) {
        self.fwhm = fwhm;
        if fwhm > 0.0 {
            self.sima = Some(smooth::smooth_volume(&self.ima, fwhm));
        } else {
            self.sima = None;
        }
    }

    pub fn n_param(&self) -> usize {
        self.model.n_param()
    }

    pub fn n_param_in(&self, category: ParamCategory) -> usize {
        self.model.n_param_in(category)
    }

    pub fn params(&self, category: ParamCategory) -> Vec<f64> {
        self.model.params(category)
    }

    pub fn set_params(&mut self, values: &[f64], category: ParamCategory) -> EddyResult<()> {
        self.model.set_params(values, category)
    }

    pub fn move_par(&self) -> [f64; 6] {
        self.model.move_par()
    }

    pub fn field_offset(&self) -> f64 {
        self.model.field_offset()
    }

    pub fn set_field_offset(&mut self, offset: f64) {
        self.model.set_field_offset(offset)
    }

    pub fn linear_parameters(&self) -> [f64; 3] {
        self.model.linear_parameters()
    }

    /// mm of displacement per Hz of off-resonance, per image axis.
    pub fn hz_to_mm_vector(&self) -> [f64; 3] {
        let pe = self.acqp.phase_encode_vector();
        let rot = self.acqp.read_out_time();
        let (dx, dy, dz) = self.ima.voxel_size();
        [dx * pe[0] * rot, dy * pe[1] * rot, dz * pe[2] * rot]
    }

    /// Rigid-body matrix taking model-space mm coordinates to the
    /// scan's sampling positions.
    pub fn forward_movement_matrix(&self) -> Matrix4<f64> {
        rigid::move_par_to_matrix(&self.move_par(), self.ima.dims(), self.ima.voxel_size())
    }

    pub fn inverse_movement_matrix(&self) -> Matrix4<f64> {
        rigid::invert_rigid(&self.forward_movement_matrix())
    }

    /// The eddy-current field in Hz on this scan's grid.
    pub fn ec_field(&self) -> Volume {
        self.model.ec_field(self.ima.dims(), self.ima.voxel_size())
    }

    fn check_susc(&self, susc: Option<&Volume>) -> EddyResult<()> {
        if let Some(s) = susc {
            if !s.same_grid(&self.ima) {
                return Err(EddyError::Mismatch(format!(
                    "susceptibility field grid {:?} does not match scan grid {:?}",
                    s.dims(),
                    self.ima.dims()
                )));
            }
        }
        Ok(())
    }

    /// Displacement field for resampling this scan into model space.
    pub fn field_for_scan_to_model_transform(
        &self,
        susc: Option<&Volume>,
    ) -> EddyResult<TransformedField> {
        self.check_susc(susc)?;
        let eb = self.ec_field();
        let ir = self.inverse_movement_matrix();
        let (mut tot, mask) = resample::affine_transform(&eb, &ir);
        if let Some(s) = susc {
            tot.add_in_place(s);
        }
        let dvox = field::hz_to_voxel_displacements(&tot, &self.acqp);
        let jacobian = field::jacobian(&dvox, &self.acqp);
        let dmm = field::voxel_to_mm_displacements(&dvox);
        Ok(TransformedField {
            field: dmm,
            mask,
            jacobian,
        })
    }

    /// Displacement field for resampling a model-space volume into this
    /// scan's space. The forward field is inverted line by line along
    /// the phase-encode axis; the mask marks output voxels the inversion
    /// could not reach.
    pub fn field_for_model_to_scan_transform(
        &self,
        susc: Option<&Volume>,
    ) -> EddyResult<TransformedField> {
        self.check_susc(susc)?;
        let mut tot = self.ec_field();
        let mut mask = Volume::filled(self.ima.dims(), self.ima.voxel_size(), 1.0);
        if let Some(s) = susc {
            let r = self.forward_movement_matrix();
            let (tsusc, smask) = resample::affine_transform(s, &r);
            tot.add_in_place(&tsusc);
            mask = smask;
        }
        let dvox = field::hz_to_voxel_displacements(&tot, &self.acqp);
        let (dinv, omask) = field::invert_displacement_field(&dvox, &self.acqp, &mask);
        let jacobian = field::jacobian(&dinv, &self.acqp);
        let dmm = field::voxel_to_mm_displacements(&dinv);
        Ok(TransformedField {
            field: dmm,
            mask: omask,
            jacobian,
        })
    }

    fn transform_to_model_space(
        &self,
        inima: &Volume,
        susc: Option<&Volume>,
        jacmod: bool,
    ) -> EddyResult<(Volume, Volume)> {
        let tf = self.field_for_scan_to_model_transform(susc)?;
        let ir = self.inverse_movement_matrix();
        let (mut ovol, mask2) = resample::general_transform(inima, &ir, &tf.field);
        let mut omask = tf.mask;
        omask.mul_in_place(&mask2);
        if jacmod {
            ovol.mul_in_place(&tf.jacobian);
        }
        Ok((ovol, omask))
    }

    fn transform_model_to_scan_space(
        &self,
        inima: &Volume,
        susc: Option<&Volume>,
        jacmod: bool,
    ) -> EddyResult<(Volume, Volume)> {
        let tf = self.field_for_model_to_scan_transform(susc)?;
        let r = self.forward_movement_matrix();
        let (mut ovol, mask2) = resample::general_transform(inima, &r, &tf.field);
        let mut omask = tf.mask;
        omask.mul_in_place(&mask2);
        if jacmod {
            ovol.mul_in_place(&tf.jacobian);
        }
        Ok((ovol, omask))
    }

    /// The working image resampled into model space, with Jacobian
    /// intensity modulation. Returns the image and its validity mask.
    pub fn get_unwarped_ima(&self, susc: Option<&Volume>) -> EddyResult<(Volume, Volume)> {
        self.transform_to_model_space(self.ima(), susc, true)
    }

    /// The original (unsmoothed) image resampled into model space.
    pub fn get_unwarped_original_ima(
        &self,
        susc: Option<&Volume>,
    ) -> EddyResult<(Volume, Volume)> {
        self.transform_to_model_space(&self.ima, susc, true)
    }

    /// The original image corrected for rigid-body movement only, with
    /// no distortion correction. Used as LSR input, where distortion is
    /// handled by the reconstruction itself.
    pub fn motion_corrected_original_ima(&self) -> (Volume, Volume) {
        let ir = self.inverse_movement_matrix();
        resample::affine_transform(&self.ima, &ir)
    }

    /// Overwrite the listed slices of the acquired image with a
    /// model-space prediction resampled into scan space.
    ///
    /// The prediction is transformed with Jacobian modulation; the mask
    /// is transformed without it, binarised at 0.9 and combined with the
    /// resampling validity, so only well-determined voxels are replaced.
    /// A set prefilter FWHM is reapplied afterwards. The content of the
    /// prediction is trusted as-is.
    pub fn replace_slices(
        &mut self,
        pred: &Volume,
        susc: Option<&Volume>,
        inmask: &Volume,
        slices: &[usize],
    ) -> EddyResult<()> {
        if !pred.same_grid(&self.ima) || !inmask.same_grid(&self.ima) {
            return Err(EddyError::Mismatch(
                "prediction and mask must share the scan grid".to_string(),
            ));
        }
        let (nx, ny, nz) = self.ima.dims();
        for &s in slices {
            if s >= nz {
                return Err(EddyError::IndexOutOfRange(format!(
                    "slice {} of a {}-slice volume",
                    s, nz
                )));
            }
        }

        let tf = self.field_for_model_to_scan_transform(susc)?;
        let r = self.forward_movement_matrix();
        let (mut pios, pmask) = resample::general_transform(pred, &r, &tf.field);
        pios.mul_in_place(&tf.jacobian);
        let (mut bios, bmask) = resample::general_transform(inmask, &r, &tf.field);
        bios.binarise(0.9);
        bios.mul_in_place(&bmask);
        bios.mul_in_place(&pmask);
        bios.mul_in_place(&tf.mask);

        for &s in slices {
            for j in 0..ny {
                for i in 0..nx {
                    if bios.at(i, j, s) > 0.0 {
                        *self.ima.at_mut(i, j, s) = pios.at(i, j, s);
                    }
                }
            }
        }
        if self.fwhm > 0.0 {
            self.sima = Some(smooth::smooth_volume(&self.ima, self.fwhm));
        }
        Ok(())
    }
}
