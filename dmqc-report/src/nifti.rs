//! Minimal NIfTI header reader
//!
//! Only the `dim` array is needed, to show the number of volumes in the report
//! table. Both NIfTI-1 (348-byte header) and NIfTI-2 (540-byte header) are
//! understood, optionally gzip compressed.

use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use flate2::read::GzDecoder;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const NIFTI1_HEADER_SIZE: i32 = 348;
const NIFTI2_HEADER_SIZE: i32 = 540;
const NIFTI1_DIM_OFFSET: usize = 40;
const NIFTI2_DIM_OFFSET: usize = 16;

/// Scan length column value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanLength {
    /// Size of the 4th dimension
    Volumes(u64),
    /// Readable image with fewer than four dimensions
    NotApplicable,
    /// Missing or unreadable file
    NoFile,
}

impl fmt::Display for ScanLength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanLength::Volumes(n) => write!(f, "{}", n),
            ScanLength::NotApplicable => f.write_str("N/A"),
            ScanLength::NoFile => f.write_str("No file"),
        }
    }
}

impl ScanLength {
    pub fn of(path: &Path) -> Self {
        match read_dims(path) {
            Ok(dims) if dims.len() >= 4 => ScanLength::Volumes(dims[3]),
            Ok(_) => {
                tracing::debug!(path = %path.display(), "Scan length cannot be read");
                ScanLength::NotApplicable
            }
            Err(e) => {
                tracing::debug!(path = %path.display(), "Cannot read nifti header: {}", e);
                ScanLength::NoFile
            }
        }
    }
}

/// Image dimensions, `dim[1..=dim[0]]`
pub fn read_dims(path: &Path) -> io::Result<Vec<u64>> {
    let mut file = BufReader::new(File::open(path)?);
    let mut magic = [0u8; 2];
    file.read_exact(&mut magic)?;

    let reader: Box<dyn Read> = if magic == GZIP_MAGIC {
        let file = BufReader::new(File::open(path)?);
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(io::Cursor::new(magic).chain(file))
    };

    parse_dims(reader)
}

fn parse_dims(mut reader: impl Read) -> io::Result<Vec<u64>> {
    let mut size = [0u8; 4];
    reader.read_exact(&mut size)?;

    let (little_endian, header_size) = if i32::from_le_bytes(size) == NIFTI1_HEADER_SIZE
        || i32::from_le_bytes(size) == NIFTI2_HEADER_SIZE
    {
        (true, i32::from_le_bytes(size))
    } else if i32::from_be_bytes(size) == NIFTI1_HEADER_SIZE
        || i32::from_be_bytes(size) == NIFTI2_HEADER_SIZE
    {
        (false, i32::from_be_bytes(size))
    } else {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "not a nifti header"));
    };

    let mut header = vec![0u8; header_size as usize];
    header[..4].copy_from_slice(&size);
    reader.read_exact(&mut header[4..])?;

    let dims: Vec<i64> = if header_size == NIFTI1_HEADER_SIZE {
        (0..8)
            .map(|i| {
                let at = NIFTI1_DIM_OFFSET + i * 2;
                let bytes = [header[at], header[at + 1]];
                i64::from(if little_endian {
                    i16::from_le_bytes(bytes)
                } else {
                    i16::from_be_bytes(bytes)
                })
            })
            .collect()
    } else {
        (0..8)
            .map(|i| {
                let at = NIFTI2_DIM_OFFSET + i * 8;
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(&header[at..at + 8]);
                if little_endian {
                    i64::from_le_bytes(bytes)
                } else {
                    i64::from_be_bytes(bytes)
                }
            })
            .collect()
    };

    let ndim = dims[0];
    if !(0..=7).contains(&ndim) {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "invalid dim[0]"));
    }

    Ok(dims[1..=ndim as usize]
        .iter()
        .map(|&d| d.max(0) as u64)
        .collect())
}
