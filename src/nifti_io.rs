//! NIfTI file I/O
//!
//! Loads and saves [`Volume`] / [`Volume4`] as NIfTI-1 files. This is
//! the persistence seam for the manager's inputs and exports; the
//! correction algorithms themselves never touch files. Both `.nii` and
//! `.nii.gz` are supported, with gzip auto-detected on read and chosen
//! by extension on write. Files are written as FLOAT32 with the voxel
//! sizes on the sform diagonal; header scaling (`scl_slope`/`scl_inter`)
//! is applied to the data on read.

use std::io::{Cursor, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use ndarray::Array;
use nifti::volume::ndarray::IntoNdArray;
use nifti::{InMemNiftiObject, NiftiObject};

use crate::error::{EddyError, EddyResult};
use crate::volume::{Volume, Volume4};

/// Check if bytes are gzip compressed
fn is_gzip(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[0] == 0x1f && bytes[1] == 0x8b
}

/// Raw header fields for diagnostics when parsing fails
fn header_summary(bytes: &[u8]) -> String {
    if bytes.len() < 348 {
        return format!("file too small ({} bytes, need at least 348)", bytes.len());
    }
    let sizeof_hdr = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let magic = String::from_utf8_lossy(&bytes[344..348]).to_string();
    let datatype = i16::from_le_bytes([bytes[70], bytes[71]]);
    format!(
        "sizeof_hdr={}, magic='{}', datatype={}",
        sizeof_hdr, magic, datatype
    )
}

fn parse_nifti(path: &Path, bytes: &[u8]) -> EddyResult<InMemNiftiObject> {
    if is_gzip(bytes) {
        InMemNiftiObject::from_reader(GzDecoder::new(Cursor::new(bytes))).map_err(|e| {
            let mut decompressed = Vec::new();
            let info = if std::io::Read::read_to_end(
                &mut GzDecoder::new(Cursor::new(bytes)),
                &mut decompressed,
            )
            .is_ok()
            {
                header_summary(&decompressed)
            } else {
                "could not decompress".to_string()
            };
            EddyError::InvalidImage(path.to_path_buf(), format!("{} ({})", e, info))
        })
    } else {
        InMemNiftiObject::from_reader(Cursor::new(bytes)).map_err(|e| {
            EddyError::InvalidImage(
                path.to_path_buf(),
                format!("{} ({})", e, header_summary(bytes)),
            )
        })
    }
}

struct ParsedImage {
    data: Vec<f64>,
    dims: (usize, usize, usize, usize),
    voxel_size: (f64, f64, f64),
}

/// Pull the voxel data out of a parsed object in Fortran order
/// (x fastest, volumes back to back), with header scaling applied.
fn extract(path: &Path, obj: InMemNiftiObject) -> EddyResult<ParsedImage> {
    let header = obj.header();
    let pixdim = header.pixdim;
    let voxel_size = (pixdim[1] as f64, pixdim[2] as f64, pixdim[3] as f64);
    let scl_slope = if header.scl_slope == 0.0 {
        1.0
    } else {
        header.scl_slope as f64
    };
    let scl_inter = header.scl_inter as f64;

    let array: Array<f64, _> = obj.into_volume().into_ndarray().map_err(|e| {
        EddyError::InvalidImage(path.to_path_buf(), format!("unreadable voxel data: {}", e))
    })?;
    let shape = array.shape().to_vec();
    if shape.len() < 3 {
        return Err(EddyError::InvalidImage(
            path.to_path_buf(),
            format!("expected at least a 3D volume, got {}D", shape.len()),
        ));
    }
    if shape.len() > 4 {
        return Err(EddyError::InvalidImage(
            path.to_path_buf(),
            format!("expected at most a 4D series, got {}D", shape.len()),
        ));
    }
    let (nx, ny, nz) = (shape[0], shape[1], shape[2]);
    let nt = if shape.len() >= 4 { shape[3] } else { 1 };

    let mut data = Vec::with_capacity(nx * ny * nz * nt);
    if shape.len() == 3 {
        for k in 0..nz {
            for j in 0..ny {
                for i in 0..nx {
                    data.push(array[[i, j, k]]);
                }
            }
        }
    } else {
        for t in 0..nt {
            for k in 0..nz {
                for j in 0..ny {
                    for i in 0..nx {
                        data.push(array[[i, j, k, t]]);
                    }
                }
            }
        }
    }
    if scl_slope != 1.0 || scl_inter != 0.0 {
        for v in data.iter_mut() {
            *v = *v * scl_slope + scl_inter;
        }
    }
    Ok(ParsedImage {
        data,
        dims: (nx, ny, nz, nt),
        voxel_size,
    })
}

/// Read a 3D volume. A 4D file yields its first volume.
pub fn read_volume<P: AsRef<Path>>(path: P) -> EddyResult<Volume> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)?;
    let obj = parse_nifti(path, &bytes)?;
    let parsed = extract(path, obj)?;
    let (nx, ny, nz, _) = parsed.dims;
    let n = nx * ny * nz;
    Volume::from_vec(parsed.data[..n].to_vec(), (nx, ny, nz), parsed.voxel_size)
}

/// Read a 4D series. A 3D file yields a single-volume series.
pub fn read_volume4<P: AsRef<Path>>(path: P) -> EddyResult<Volume4> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)?;
    let obj = parse_nifti(path, &bytes)?;
    let parsed = extract(path, obj)?;
    Volume4::from_vec(parsed.data, parsed.dims, parsed.voxel_size)
}

/// Build a NIfTI-1 header (348 bytes) for FLOAT32 data with the voxel
/// sizes on the sform diagonal. `nt > 1` marks the file 4D.
fn build_header(dims: (usize, usize, usize, usize), voxel_size: (f64, f64, f64)) -> [u8; 348] {
    let (nx, ny, nz, nt) = dims;
    let (vsx, vsy, vsz) = voxel_size;
    let ndim: i16 = if nt > 1 { 4 } else { 3 };

    let mut header = [0u8; 348];

    // sizeof_hdr = 348
    header[0..4].copy_from_slice(&348i32.to_le_bytes());

    // dim[0..7]
    let dim: [i16; 8] = [ndim, nx as i16, ny as i16, nz as i16, nt as i16, 1, 1, 1];
    for (i, &d) in dim.iter().enumerate() {
        let offset = 40 + i * 2;
        header[offset..offset + 2].copy_from_slice(&d.to_le_bytes());
    }

    // datatype = 16 (FLOAT32), bitpix = 32
    header[70..72].copy_from_slice(&16i16.to_le_bytes());
    header[72..74].copy_from_slice(&32i16.to_le_bytes());

    // pixdim[0..7]
    let pixdim: [f32; 8] = [1.0, vsx as f32, vsy as f32, vsz as f32, 1.0, 1.0, 1.0, 1.0];
    for (i, &p) in pixdim.iter().enumerate() {
        let offset = 76 + i * 4;
        header[offset..offset + 4].copy_from_slice(&p.to_le_bytes());
    }

    // vox_offset = 352 (header + 4 bytes extension)
    header[108..112].copy_from_slice(&352.0f32.to_le_bytes());

    // scl_slope = 1.0, scl_inter = 0.0
    header[112..116].copy_from_slice(&1.0f32.to_le_bytes());
    header[116..120].copy_from_slice(&0.0f32.to_le_bytes());

    // sform_code = 1 (scanner anat)
    header[254..256].copy_from_slice(&1i16.to_le_bytes());

    // srow_x, srow_y, srow_z: voxel scaling, no rotation or origin
    let srows: [[f32; 4]; 3] = [
        [vsx as f32, 0.0, 0.0, 0.0],
        [0.0, vsy as f32, 0.0, 0.0],
        [0.0, 0.0, vsz as f32, 0.0],
    ];
    for (r, row) in srows.iter().enumerate() {
        for (c, &v) in row.iter().enumerate() {
            let offset = 280 + r * 16 + c * 4;
            header[offset..offset + 4].copy_from_slice(&v.to_le_bytes());
        }
    }

    // magic = "n+1\0" for NIfTI-1 single file
    header[344..348].copy_from_slice(b"n+1\0");

    header
}

/// Encode data as uncompressed NIfTI-1 bytes (FLOAT32).
fn encode_nifti(
    data: &[f64],
    dims: (usize, usize, usize, usize),
    voxel_size: (f64, f64, f64),
) -> EddyResult<Vec<u8>> {
    let header = build_header(dims, voxel_size);
    let mut buffer = Vec::with_capacity(352 + data.len() * 4);
    buffer.write_all(&header)?;
    // Extension flag (4 bytes, all zeros = no extension)
    buffer.write_all(&[0u8; 4])?;
    for &val in data {
        buffer.write_all(&(val as f32).to_le_bytes())?;
    }
    Ok(buffer)
}

fn write_bytes(path: &Path, bytes: Vec<u8>) -> EddyResult<()> {
    let bytes = if path.to_string_lossy().ends_with(".nii.gz") {
        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(&bytes)?;
        encoder.finish()?
    } else {
        bytes
    };
    std::fs::write(path, bytes)?;
    Ok(())
}

/// Write a 3D volume. A `.nii.gz` extension selects gzip compression.
pub fn write_volume<P: AsRef<Path>>(path: P, vol: &Volume) -> EddyResult<()> {
    let path = path.as_ref();
    let (nx, ny, nz) = vol.dims();
    let bytes = encode_nifti(vol.data(), (nx, ny, nz, 1), vol.voxel_size())?;
    write_bytes(path, bytes)
}

/// Write a 4D series. A `.nii.gz` extension selects gzip compression.
pub fn write_volume4<P: AsRef<Path>>(path: P, series: &Volume4) -> EddyResult<()> {
    let path = path.as_ref();
    let bytes = encode_nifti(series.data(), series.dims(), series.voxel_size())?;
    write_bytes(path, bytes)
}
