//! Eddy-current field models
//!
//! Each scan carries a model of the off-resonance field induced by the
//! diffusion gradients' eddy currents, parameterized together with the
//! scan's rigid-body movement in one flat vector:
//!
//! ```text
//! [ tx ty tz rx ry rz | ec coefficients ... | field offset ]
//! ```
//!
//! The eddy-current field is a polynomial in voxel coordinates centred on
//! the field of view, of first, second or third order, plus a spatially
//! constant offset in Hz. The movement-only model (used for b0 scans,
//! whose diffusion gradients are negligible) has neither coefficients nor
//! offset. Category views address fixed sub-ranges of the vector so the
//! outer estimation loop can optimize movement and field parameters
//! separately without reshuffling storage.

use crate::error::{EddyError, EddyResult};
use crate::volume::Volume;
use std::ops::Range;

/// Which polynomial the eddy-current field follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EcModelKind {
    /// Rigid-body movement only, no eddy-current field.
    Movement,
    /// First-order field: 3 gradients + offset.
    Linear,
    /// Second-order field: 9 coefficients + offset.
    Quadratic,
    /// Third-order field: 19 coefficients + offset.
    Cubic,
}

impl EcModelKind {
    /// Parse a model name as it appears in configuration.
    pub fn from_str(s: &str) -> EddyResult<Self> {
        match s.to_lowercase().as_str() {
            "movement" | "none" => Ok(EcModelKind::Movement),
            "linear" => Ok(EcModelKind::Linear),
            "quadratic" => Ok(EcModelKind::Quadratic),
            "cubic" => Ok(EcModelKind::Cubic),
            _ => Err(EddyError::Config(format!("unknown EC model '{}'", s))),
        }
    }

    /// Number of polynomial coefficients (excluding the offset).
    pub fn n_ec_coef(self) -> usize {
        match self {
            EcModelKind::Movement => 0,
            EcModelKind::Linear => 3,
            EcModelKind::Quadratic => 9,
            EcModelKind::Cubic => 19,
        }
    }

    pub fn has_field_offset(self) -> bool {
        !matches!(self, EcModelKind::Movement)
    }

    /// Total parameter count: movement + coefficients + offset.
    pub fn n_param(self) -> usize {
        6 + self.n_ec_coef() + usize::from(self.has_field_offset())
    }
}

/// Sub-range views of the flat parameter vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamCategory {
    /// The six rigid-body parameters.
    Movement,
    /// Polynomial coefficients and offset together.
    Ec,
    /// The constant offset alone (empty for the movement-only model).
    FieldOffset,
    /// The whole vector.
    All,
}

/// The parameter state of one scan's movement and eddy-current field.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanEcModel {
    kind: EcModelKind,
    params: Vec<f64>,
}

impl ScanEcModel {
    /// A model of the given kind with all parameters zero.
    pub fn new(kind: EcModelKind) -> Self {
        ScanEcModel {
            kind,
            params: vec![0.0; kind.n_param()],
        }
    }

    pub fn kind(&self) -> EcModelKind {
        self.kind
    }

    pub fn n_param(&self) -> usize {
        self.params.len()
    }

    pub fn has_field_offset(&self) -> bool {
        self.kind.has_field_offset()
    }

    fn category_range(&self, category: ParamCategory) -> Range<usize> {
        let n = self.params.len();
        match category {
            ParamCategory::Movement => 0..6,
            ParamCategory::Ec => 6..n,
            ParamCategory::FieldOffset => {
                if self.kind.has_field_offset() {
                    n - 1..n
                } else {
                    n..n
                }
            }
            ParamCategory::All => 0..n,
        }
    }

    /// Number of parameters in a category view.
    pub fn n_param_in(&self, category: ParamCategory) -> usize {
        self.category_range(category).len()
    }

    /// Copy out the parameters of a category.
    pub fn params(&self, category: ParamCategory) -> Vec<f64> {
        self.params[self.category_range(category)].to_vec()
    }

    /// Overwrite the parameters of a category. The slice length must
    /// equal the category width.
    pub fn set_params(&mut self, values: &[f64], category: ParamCategory) -> EddyResult<()> {
        let range = self.category_range(category);
        if values.len() != range.len() {
            return Err(EddyError::Mismatch(format!(
                "{} values given for a {:?} view of {} parameters",
                values.len(),
                category,
                range.len()
            )));
        }
        self.params[range].copy_from_slice(values);
        Ok(())
    }

    /// The six movement parameters.
    pub fn move_par(&self) -> [f64; 6] {
        let mut mp = [0.0; 6];
        mp.copy_from_slice(&self.params[0..6]);
        mp
    }

    /// The constant field offset in Hz (zero for the movement-only model).
    pub fn field_offset(&self) -> f64 {
        if self.kind.has_field_offset() {
            self.params[self.params.len() - 1]
        } else {
            0.0
        }
    }

    /// Set the constant field offset. Ignored by the movement-only model,
    /// whose field is identically zero.
    pub fn set_field_offset(&mut self, offset: f64) {
        if self.kind.has_field_offset() {
            let n = self.params.len();
            self.params[n - 1] = offset;
        }
    }

    /// The three first-order coefficients, used as regressors when the
    /// constant offset is separated from subject translation.
    pub fn linear_parameters(&self) -> [f64; 3] {
        let mut lp = [0.0; 3];
        if self.kind.n_ec_coef() >= 3 {
            lp.copy_from_slice(&self.params[6..9]);
        }
        lp
    }

    /// Evaluate the eddy-current field in Hz on a voxel grid.
    ///
    /// The polynomial is evaluated in voxel coordinates centred on the
    /// field of view; the movement-only model yields the zero field.
    pub fn ec_field(&self, dims: (usize, usize, usize), voxel_size: (f64, f64, f64)) -> Volume {
        let mut field = Volume::zeros(dims, voxel_size);
        if self.kind == EcModelKind::Movement {
            return field;
        }
        let (nx, ny, nz) = dims;
        let cx = 0.5 * (nx as f64 - 1.0);
        let cy = 0.5 * (ny as f64 - 1.0);
        let cz = 0.5 * (nz as f64 - 1.0);
        let n_ec = self.kind.n_ec_coef();
        let ec = &self.params[6..6 + n_ec];
        let offset = self.field_offset();

        for k in 0..nz {
            let z = k as f64 - cz;
            for j in 0..ny {
                let y = j as f64 - cy;
                for i in 0..nx {
                    let x = i as f64 - cx;
                    let mut v = offset + ec[0] * x + ec[1] * y + ec[2] * z;
                    if n_ec >= 9 {
                        v += ec[3] * x * x
                            + ec[4] * y * y
                            + ec[5] * z * z
                            + ec[6] * x * y
                            + ec[7] * x * z
                            + ec[8] * y * z;
                    }
                    if n_ec >= 19 {
                        v += ec[9] * x * x * x
                            + ec[10] * y * y * y
                            + ec[11] * z * z * z
                            + ec[12] * x * x * y
                            + ec[13] * x * x * z
                            + ec[14] * x * y * y
                            + ec[15] * y * y * z
                            + ec[16] * x * z * z
                            + ec[17] * y * z * z
                            + ec[18] * x * y * z;
                    }
                    *field.at_mut(i, j, k) = v;
                }
            }
        }
        field
    }
}
