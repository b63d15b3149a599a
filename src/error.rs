//! Crate-wide error type
//!
//! Every fallible operation in this crate returns [`EddyResult`]. The
//! variants follow the failure classes of the correction pipeline:
//! invalid configuration, out-of-range indices, shape or length
//! mismatches between inputs, violated operation preconditions and
//! numerically degenerate data. There are no internal retries; batch
//! operations abort on the first failure.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EddyError {
    /// Invalid construction-time input (bad phase-encode vector,
    /// non-positive readout time, unsupported EC model request, ...).
    #[error("Invalid configuration: {0}")]
    Config(String),
    /// Scan, slice or parameter index outside its valid range.
    #[error("Index out of range: {0}")]
    IndexOutOfRange(String),
    /// Mismatched dimensions or lengths between related inputs.
    #[error("Size mismatch: {0}")]
    Mismatch(String),
    /// An operation was requested on data that does not satisfy its
    /// preconditions (e.g. LSR resampling on unpaired scans).
    #[error("Precondition not met: {0}")]
    Precondition(String),
    /// Numerically unusable data (zero reference intensity, singular
    /// reconstruction system).
    #[error("Degenerate data: {0}")]
    DegenerateData(String),
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    /// Malformed or unsupported image file content.
    #[error("Invalid image file {}: {1}", .0.display())]
    InvalidImage(PathBuf, String),
}

pub type EddyResult<T> = Result<T, EddyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EddyError::Config("readout time must be positive".to_string());
        assert!(err.to_string().contains("Invalid configuration"));
        assert!(err.to_string().contains("readout time"));
    }

    #[test]
    fn test_io_error_conversion() {
        fn touch_missing() -> EddyResult<Vec<u8>> {
            let bytes = std::fs::read("/nonexistent/eddy_core_test_file")?;
            Ok(bytes)
        }
        assert!(matches!(touch_missing(), Err(EddyError::IoError(_))));
    }
}
