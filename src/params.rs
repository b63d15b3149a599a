//! Acquisition and diffusion metadata
//!
//! Small validated value types describing how each volume of a diffusion
//! series was acquired: the phase-encode direction and readout time that
//! determine where off-resonance fields displace signal, and the
//! diffusion weighting that separates b0 from diffusion-weighted scans.

use crate::error::{EddyError, EddyResult};

/// b-values at or below this are treated as unweighted (b0) scans.
pub const B0_BVAL_THRESHOLD: f64 = 10.0;

/// Phase-encode direction and readout time of one acquisition.
///
/// The phase-encode vector must have exactly one nonzero component, equal
/// to +1 or -1, selecting the image axis along which off-resonance fields
/// displace signal and the polarity of that displacement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcqPara {
    pe_vector: [f64; 3],
    read_out_time: f64,
}

impl AcqPara {
    /// # Arguments
    /// * `pe_vector` - Phase-encode unit vector, one component must be ±1
    /// * `read_out_time` - Total readout time in seconds, must be positive
    pub fn new(pe_vector: [f64; 3], read_out_time: f64) -> EddyResult<Self> {
        let nonzero: Vec<usize> = (0..3).filter(|&d| pe_vector[d] != 0.0).collect();
        if nonzero.len() != 1 {
            return Err(EddyError::Config(format!(
                "phase-encode vector {:?} must have exactly one nonzero component",
                pe_vector
            )));
        }
        if (pe_vector[nonzero[0]].abs() - 1.0).abs() > 1e-6 {
            return Err(EddyError::Config(format!(
                "phase-encode component {} must be +1 or -1",
                pe_vector[nonzero[0]]
            )));
        }
        if !(read_out_time > 0.0) {
            return Err(EddyError::Config(format!(
                "readout time {} must be positive",
                read_out_time
            )));
        }
        Ok(AcqPara {
            pe_vector,
            read_out_time,
        })
    }

    pub fn phase_encode_vector(&self) -> [f64; 3] {
        self.pe_vector
    }

    /// Readout time in seconds.
    pub fn read_out_time(&self) -> f64 {
        self.read_out_time
    }

    /// Index (0, 1 or 2) of the phase-encode axis.
    pub fn pe_axis(&self) -> usize {
        (0..3)
            .find(|&d| self.pe_vector[d] != 0.0)
            .unwrap_or(1)
    }

    /// Sign (+1 or -1) of the phase-encode component.
    pub fn pe_sign(&self) -> f64 {
        self.pe_vector[self.pe_axis()].signum()
    }

    /// True when two acquisitions can form a least-squares resampling
    /// pair: same phase-encode axis (same or opposite polarity) and the
    /// same readout time.
    pub fn matched_for_lsr(&self, other: &AcqPara) -> bool {
        let dot: f64 = (0..3)
            .map(|d| self.pe_vector[d] * other.pe_vector[d])
            .sum();
        (dot.abs() - 1.0).abs() < 1e-6 && self.read_out_time == other.read_out_time
    }
}

/// Diffusion weighting of one acquisition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiffPara {
    bvec: [f64; 3],
    bval: f64,
}

impl DiffPara {
    /// # Arguments
    /// * `bvec` - Gradient direction (zero vector for b0 scans)
    /// * `bval` - b-value in s/mm^2, must be non-negative
    pub fn new(bvec: [f64; 3], bval: f64) -> EddyResult<Self> {
        if !(bval >= 0.0) {
            return Err(EddyError::Config(format!(
                "b-value {} must be non-negative",
                bval
            )));
        }
        Ok(DiffPara { bvec, bval })
    }

    /// An unweighted acquisition with zero gradient direction.
    pub fn b0() -> Self {
        DiffPara {
            bvec: [0.0; 3],
            bval: 0.0,
        }
    }

    pub fn bvec(&self) -> [f64; 3] {
        self.bvec
    }

    pub fn bval(&self) -> f64 {
        self.bval
    }

    /// True for unweighted scans (b-value at or below the b0 threshold).
    pub fn is_b0(&self) -> bool {
        self.bval <= B0_BVAL_THRESHOLD
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acqpara_validation() {
        assert!(AcqPara::new([0.0, 1.0, 0.0], 0.05).is_ok());
        assert!(AcqPara::new([-1.0, 0.0, 0.0], 0.05).is_ok());
        assert!(
            AcqPara::new([1.0, 1.0, 0.0], 0.05).is_err(),
            "two nonzero components"
        );
        assert!(
            AcqPara::new([0.0, 0.0, 0.0], 0.05).is_err(),
            "no nonzero component"
        );
        assert!(
            AcqPara::new([0.0, 0.5, 0.0], 0.05).is_err(),
            "component must be unit"
        );
        assert!(AcqPara::new([0.0, 1.0, 0.0], 0.0).is_err(), "zero readout");
        assert!(
            AcqPara::new([0.0, 1.0, 0.0], -0.05).is_err(),
            "negative readout"
        );
    }

    #[test]
    fn test_acqpara_axis_and_sign() {
        let up = AcqPara::new([0.0, 1.0, 0.0], 0.05).unwrap();
        let down = AcqPara::new([0.0, -1.0, 0.0], 0.05).unwrap();
        assert_eq!(up.pe_axis(), 1);
        assert_eq!(up.pe_sign(), 1.0);
        assert_eq!(down.pe_axis(), 1);
        assert_eq!(down.pe_sign(), -1.0);
    }

    #[test]
    fn test_matched_for_lsr() {
        let up = AcqPara::new([0.0, 1.0, 0.0], 0.05).unwrap();
        let down = AcqPara::new([0.0, -1.0, 0.0], 0.05).unwrap();
        let xdir = AcqPara::new([1.0, 0.0, 0.0], 0.05).unwrap();
        let slow = AcqPara::new([0.0, 1.0, 0.0], 0.08).unwrap();

        assert!(up.matched_for_lsr(&down), "opposite polarity matches");
        assert!(up.matched_for_lsr(&up), "same polarity matches");
        assert!(!up.matched_for_lsr(&xdir), "different axis never matches");
        assert!(!up.matched_for_lsr(&slow), "different readout never matches");
    }

    #[test]
    fn test_diffpara_b0_classification() {
        let b0 = DiffPara::b0();
        let low = DiffPara::new([1.0, 0.0, 0.0], 5.0).unwrap();
        let dwi = DiffPara::new([1.0, 0.0, 0.0], 1000.0).unwrap();
        assert!(b0.is_b0());
        assert!(low.is_b0(), "b=5 is below the threshold");
        assert!(!dwi.is_b0());
        assert!(DiffPara::new([0.0, 0.0, 1.0], -1.0).is_err());
    }
}
