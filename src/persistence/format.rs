//! Snapshot header, tags and little-endian field codecs.
//!
//! # Header
//!
//! ```text
//! ┌──────────────────────────────┐
//! │ encoding version   u32       │
//! │ algorithm tag      u32       │
//! │ dimension          u64       │
//! │ data type tag      u32       │
//! │ metric tag         u32       │
//! └──────────────────────────────┘
//! ```
//!
//! Fields are validated in that order and reading stops at the first bad
//! one, so nothing past an unrecognized tag is ever interpreted.

use std::io::{self, Read, Write};

use crate::distance::{DataType, Metric};
use crate::error::FormatError;

/// Version written by this build.
pub const ENCODING_VERSION: u32 = 3;

/// Oldest version this build can read. Anything below is deprecated.
pub const MIN_SUPPORTED_VERSION: u32 = 3;

/// Index family stored in a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlgorithmType {
    Flat,
    Hnsw,
    Tiered,
}

impl AlgorithmType {
    pub fn name(self) -> &'static str {
        match self {
            AlgorithmType::Flat => "FLAT",
            AlgorithmType::Hnsw => "HNSW",
            AlgorithmType::Tiered => "TIERED",
        }
    }

    pub fn tag(self) -> u32 {
        match self {
            AlgorithmType::Flat => 0,
            AlgorithmType::Hnsw => 1,
            AlgorithmType::Tiered => 2,
        }
    }

    pub fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            0 => Some(AlgorithmType::Flat),
            1 => Some(AlgorithmType::Hnsw),
            2 => Some(AlgorithmType::Tiered),
            _ => None,
        }
    }
}

pub fn data_type_tag(data_type: DataType) -> u32 {
    match data_type {
        DataType::Float32 => 0,
        DataType::Float64 => 1,
    }
}

pub fn data_type_from_tag(tag: u32) -> Option<DataType> {
    match tag {
        0 => Some(DataType::Float32),
        1 => Some(DataType::Float64),
        _ => None,
    }
}

pub fn metric_tag(metric: Metric) -> u32 {
    match metric {
        Metric::L2 => 0,
        Metric::InnerProduct => 1,
        Metric::Cosine => 2,
    }
}

pub fn metric_from_tag(tag: u32) -> Option<Metric> {
    match tag {
        0 => Some(Metric::L2),
        1 => Some(Metric::InnerProduct),
        2 => Some(Metric::Cosine),
        _ => None,
    }
}

/// Leading fields of every snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: u32,
    pub algorithm: AlgorithmType,
    pub dim: usize,
    pub data_type: DataType,
    pub metric: Metric,
}

impl Header {
    pub fn new(algorithm: AlgorithmType, dim: usize, data_type: DataType, metric: Metric) -> Self {
        Self {
            version: ENCODING_VERSION,
            algorithm,
            dim,
            data_type,
            metric,
        }
    }

    pub fn write<W: Write>(&self, w: &mut W) -> io::Result<()> {
        write_u32(w, self.version)?;
        write_u32(w, self.algorithm.tag())?;
        write_u64(w, self.dim as u64)?;
        write_u32(w, data_type_tag(self.data_type))?;
        write_u32(w, metric_tag(self.metric))
    }

    /// Read and validate a header, expecting an `expected` snapshot.
    pub fn read<R: Read>(r: &mut R, expected: AlgorithmType) -> Result<Self, FormatError> {
        let version = read_u32(r)?;
        if version < MIN_SUPPORTED_VERSION {
            return Err(FormatError::DeprecatedVersion(version));
        }
        if version > ENCODING_VERSION {
            return Err(FormatError::BadVersion(version));
        }

        let found = AlgorithmType::from_tag(read_u32(r)?);
        if found != Some(expected) {
            return Err(FormatError::AlgorithmMismatch { expected, found });
        }

        let dim = read_u64(r)?;
        let data_type = data_type_from_tag(read_u32(r)?).ok_or(FormatError::UnknownDataType)?;
        let metric = metric_from_tag(read_u32(r)?).ok_or(FormatError::UnknownMetric)?;
        if dim == 0 {
            return Err(FormatError::Corrupted("dimension is zero".into()));
        }
        let dim = usize::try_from(dim)
            .map_err(|_| FormatError::Corrupted(format!("dimension {dim} does not fit in memory")))?;

        Ok(Self {
            version,
            algorithm: expected,
            dim,
            data_type,
            metric,
        })
    }
}

#[inline]
pub fn write_u8<W: Write>(w: &mut W, v: u8) -> io::Result<()> {
    w.write_all(&[v])
}

#[inline]
pub fn write_u32<W: Write>(w: &mut W, v: u32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

#[inline]
pub fn write_u64<W: Write>(w: &mut W, v: u64) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

#[inline]
pub fn write_f64<W: Write>(w: &mut W, v: f64) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

#[inline]
pub fn read_u8<R: Read>(r: &mut R) -> io::Result<u8> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)?;
    Ok(buf[0])
}

#[inline]
pub fn read_u32<R: Read>(r: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

#[inline]
pub fn read_u64<R: Read>(r: &mut R) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

#[inline]
pub fn read_f64<R: Read>(r: &mut R) -> io::Result<f64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(f64::from_le_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn raw(fields: &[(u32, u64)]) -> Vec<u8> {
        // (width, value) pairs, width in bytes.
        let mut out = Vec::new();
        for &(width, v) in fields {
            match width {
                4 => out.extend_from_slice(&(v as u32).to_le_bytes()),
                _ => out.extend_from_slice(&v.to_le_bytes()),
            }
        }
        out
    }

    fn read(bytes: Vec<u8>) -> Result<Header, FormatError> {
        Header::read(&mut Cursor::new(bytes), AlgorithmType::Hnsw)
    }

    #[test]
    fn header_round_trip() {
        let header = Header::new(AlgorithmType::Hnsw, 16, DataType::Float64, Metric::Cosine);
        let mut buf = Vec::new();
        header.write(&mut buf).unwrap();
        assert_eq!(buf.len(), 4 + 4 + 8 + 4 + 4);
        assert_eq!(read(buf).unwrap(), header);
    }

    #[test]
    fn version_messages() {
        let err = read(raw(&[(4, 0)])).unwrap_err();
        assert_eq!(err.to_string(), "Cannot load index: deprecated encoding version: 0");
        let err = read(raw(&[(4, 42)])).unwrap_err();
        assert_eq!(err.to_string(), "Cannot load index: bad encoding version: 42");
    }

    #[test]
    fn algorithm_messages() {
        let err = read(raw(&[(4, 3), (4, 7)])).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Cannot load index: Expected HNSW file but got algorithm type: Unknown (corrupted file?)"
        );
        let err = read(raw(&[(4, 3), (4, 0)])).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Cannot load index: Expected HNSW file but got algorithm type: FLAT"
        );
    }

    #[test]
    fn data_type_and_metric_messages() {
        let err = read(raw(&[(4, 3), (4, 1), (8, 4), (4, 9)])).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Cannot load index: bad index data type: Unknown (corrupted file?)"
        );
        let err = read(raw(&[(4, 3), (4, 1), (8, 4), (4, 0), (4, 9)])).unwrap_err();
        assert!(matches!(err, FormatError::UnknownMetric));
    }

    #[test]
    fn short_input_is_truncated() {
        let err = read(raw(&[(4, 3), (4, 1)])).unwrap_err();
        assert!(matches!(err, FormatError::Truncated));
    }
}
