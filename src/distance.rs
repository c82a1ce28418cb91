//! Distance metrics and payload element types.
//!
//! Every index stores payloads of one element type ([`f32`] or [`f64`]) and
//! scores them with one [`Metric`]. Scores are always returned as `f64`, lower
//! is closer.
//!
//! ## Important nuance
//!
//! [`Metric::Cosine`] is computed as `1 - dot(a, b)` on **L2-normalized**
//! vectors. The index normalizes payloads when they are added and queries when
//! they arrive, so callers never normalize themselves. [`Metric::InnerProduct`]
//! uses the same formula without normalizing.

use std::fmt;
use std::io::{self, Read, Write};

use serde::{Deserialize, Serialize};

/// Distance metric for dense vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Metric {
    /// Squared Euclidean distance.
    #[default]
    L2,
    /// `1 - <a, b>`.
    InnerProduct,
    /// `1 - cos(a, b)`, via normalization and inner product.
    Cosine,
}

impl Metric {
    /// Whether payloads must be normalized before they are stored or compared.
    #[inline]
    pub fn normalizes(self) -> bool {
        matches!(self, Metric::Cosine)
    }

    /// Distance between two equal-length vectors.
    #[inline]
    #[must_use]
    pub fn distance<T: Element>(self, a: &[T], b: &[T]) -> f64 {
        debug_assert_eq!(a.len(), b.len());
        match self {
            Metric::L2 => l2_squared(a, b),
            Metric::InnerProduct | Metric::Cosine => 1.0 - dot(a, b),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Metric::L2 => "L2",
            Metric::InnerProduct => "IP",
            Metric::Cosine => "COSINE",
        }
    }
}

/// Numeric type of stored payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Float32,
    Float64,
}

impl DataType {
    pub fn name(self) -> &'static str {
        match self {
            DataType::Float32 => "FLOAT32",
            DataType::Float64 => "FLOAT64",
        }
    }

    /// Bytes per element.
    pub fn size(self) -> usize {
        match self {
            DataType::Float32 => 4,
            DataType::Float64 => 8,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A payload element type.
///
/// Arithmetic goes through `f64` so both element types share one set of
/// distance kernels.
pub trait Element: Copy + Default + PartialEq + fmt::Debug + Send + Sync + 'static {
    const DATA_TYPE: DataType;

    fn to_f64(self) -> f64;

    fn from_f64(v: f64) -> Self;

    fn write_le<W: Write>(self, w: &mut W) -> io::Result<()>;

    fn read_le<R: Read>(r: &mut R) -> io::Result<Self>;
}

impl Element for f32 {
    const DATA_TYPE: DataType = DataType::Float32;

    #[inline]
    fn to_f64(self) -> f64 {
        self as f64
    }

    #[inline]
    fn from_f64(v: f64) -> Self {
        v as f32
    }

    fn write_le<W: Write>(self, w: &mut W) -> io::Result<()> {
        w.write_all(&self.to_le_bytes())
    }

    fn read_le<R: Read>(r: &mut R) -> io::Result<Self> {
        let mut buf = [0u8; 4];
        r.read_exact(&mut buf)?;
        Ok(f32::from_le_bytes(buf))
    }
}

impl Element for f64 {
    const DATA_TYPE: DataType = DataType::Float64;

    #[inline]
    fn to_f64(self) -> f64 {
        self
    }

    #[inline]
    fn from_f64(v: f64) -> Self {
        v
    }

    fn write_le<W: Write>(self, w: &mut W) -> io::Result<()> {
        w.write_all(&self.to_le_bytes())
    }

    fn read_le<R: Read>(r: &mut R) -> io::Result<Self> {
        let mut buf = [0u8; 8];
        r.read_exact(&mut buf)?;
        Ok(f64::from_le_bytes(buf))
    }
}

/// Squared L2 distance.
#[inline]
#[must_use]
pub fn l2_squared<T: Element>(a: &[T], b: &[T]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x.to_f64() - y.to_f64();
            d * d
        })
        .sum()
}

/// Dot product.
#[inline]
#[must_use]
pub fn dot<T: Element>(a: &[T], b: &[T]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| x.to_f64() * y.to_f64())
        .sum()
}

/// L2-normalize `v` in place.
///
/// The norm is accumulated in `f64`, so `f32` vectors whose squared sum
/// overflows `f32::MAX` still normalize correctly. Zero vectors are left as is.
pub fn normalize<T: Element>(v: &mut [T]) {
    let norm = v
        .iter()
        .map(|x| {
            let x = x.to_f64();
            x * x
        })
        .sum::<f64>()
        .sqrt();
    if norm > 0.0 && norm.is_finite() {
        for x in v.iter_mut() {
            *x = T::from_f64(x.to_f64() / norm);
        }
    }
}

/// Copy `v`, normalizing the copy if `metric` requires it.
pub(crate) fn prepare<T: Element>(metric: Metric, v: &[T]) -> Vec<T> {
    let mut owned = v.to_vec();
    if metric.normalizes() {
        normalize(&mut owned);
    }
    owned
}
