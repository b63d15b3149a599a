//! Eddy-Core: eddy current and movement correction for diffusion MRI
//!
//! This crate models the off-resonance fields induced by diffusion
//! gradients and subject movement in echo planar images, and resamples
//! the scans back into a common corrected space.
//!
//! # Modules
//! - `volume`: 3D/4D image containers with trilinear sampling
//! - `params`: Acquisition and diffusion metadata per scan
//! - `rigid`: Rigid body parameter/matrix conversions
//! - `ec_model`: Eddy current field models (linear, quadratic, cubic)
//! - `field`: Off-resonance field to displacement conversion
//! - `resample`: Pull-back resampling through displacement fields
//! - `smooth`: Gaussian smoothing for coarse registration passes
//! - `scan`: A single scan with its field model and movement state
//! - `dispvec`: Sampling matrices for least-squares restoration
//! - `manager`: The scan collection and its correction operations
//! - `nifti_io`: NIfTI-1 file reading and writing

// Core modules
pub mod error;
pub mod params;
pub mod rigid;
pub mod volume;

// Field and resampling machinery
pub mod dispvec;
pub mod ec_model;
pub mod field;
pub mod resample;
pub mod smooth;

// Scan modelling
pub mod manager;
pub mod scan;

// I/O modules
pub mod nifti_io;
