//! Error types for tierann.
//!
//! Parameter and format errors are returned to the caller as-is. An
//! [`IndexError::InvariantViolation`] means the graph was found in a state it
//! can never legally reach; the owning index refuses further work afterwards
//! and reports [`IndexError::Poisoned`].

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::persistence::format::AlgorithmType;
use crate::{DataType, Label};

/// Errors produced while resolving raw query parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum ParamError {
    /// No output configuration was supplied.
    #[error("query parameter output is missing")]
    NullParam,
    /// A recognized parameter name appeared more than once.
    #[error("query parameter is already set")]
    AlreadySet,
    /// The parameter name is not recognized by this index.
    #[error("unknown query parameter")]
    UnknownParam,
    /// The value failed to parse or is out of range.
    #[error("bad query parameter value")]
    BadValue,
    /// `hybrid_policy` names a policy that does not exist.
    #[error("hybrid policy does not exist")]
    InvalidPolicy,
    /// A hybrid-only parameter was given for a non-hybrid query.
    #[error("hybrid parameters are only valid for hybrid queries")]
    NotHybrid,
    /// `batch_size` cannot be combined with the ad-hoc policy.
    #[error("batch size cannot be set together with the ad-hoc hybrid policy")]
    AdHocWithBatchSize,
}

impl ParamError {
    /// Stable numeric code, for hosts that forward errors over a wire protocol.
    pub fn code(self) -> i32 {
        match self {
            ParamError::NullParam => 1,
            ParamError::AlreadySet => 2,
            ParamError::UnknownParam => 3,
            ParamError::BadValue => 4,
            ParamError::InvalidPolicy => 5,
            ParamError::NotHybrid => 6,
            ParamError::AdHocWithBatchSize => 7,
        }
    }
}

/// Errors produced while loading a snapshot.
#[derive(Debug, Error)]
pub enum FormatError {
    /// The snapshot file could not be opened.
    #[error("Cannot open file: {}", .path.display())]
    CannotOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Cannot load index: deprecated encoding version: {0}")]
    DeprecatedVersion(u32),

    #[error("Cannot load index: bad encoding version: {0}")]
    BadVersion(u32),

    #[error(
        "Cannot load index: Expected {} file but got algorithm type: {}",
        .expected.name(),
        tag_name(.found.map(AlgorithmType::name))
    )]
    AlgorithmMismatch {
        expected: AlgorithmType,
        found: Option<AlgorithmType>,
    },

    #[error("Cannot load index: bad index data type: Unknown (corrupted file?)")]
    UnknownDataType,

    #[error(
        "Cannot load index: Expected {} data but got data type: {}",
        .expected.name(),
        .found.name()
    )]
    DataTypeMismatch { expected: DataType, found: DataType },

    #[error("Cannot load index: bad metric: Unknown (corrupted file?)")]
    UnknownMetric,

    #[error("Cannot load index: {0}")]
    Corrupted(String),

    #[error("Cannot load index: unexpected end of file")]
    Truncated,

    #[error("Cannot load index: read failed: {0}")]
    Read(#[source] io::Error),
}

impl From<io::Error> for FormatError {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            FormatError::Truncated
        } else {
            FormatError::Read(e)
        }
    }
}

fn tag_name(name: Option<&'static str>) -> String {
    match name {
        Some(name) => name.to_string(),
        None => "Unknown (corrupted file?)".to_string(),
    }
}

/// Errors returned by index operations.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("query parameter error: {0}")]
    Param(#[from] ParamError),

    #[error(transparent)]
    Format(#[from] FormatError),

    /// The graph references state that cannot exist. Fatal to the instance.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// An earlier invariant violation made this instance unusable.
    #[error("index is unusable after an earlier invariant violation")]
    Poisoned,

    #[error("dimension mismatch: index has {expected} dimensions, vector has {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("payload data type {actual:?} does not match index data type {expected:?}")]
    DataTypeMismatch { expected: DataType, actual: DataType },

    #[error("label {0} not found")]
    LabelNotFound(Label),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Growing the vector store would overflow or could not be allocated.
    #[error("cannot grow vector store to {capacity} slots of {dim} elements")]
    CapacityOverflow { capacity: usize, dim: usize },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl IndexError {
    /// Whether this error must poison the index instance that produced it.
    pub fn is_fatal(&self) -> bool {
        matches!(self, IndexError::InvariantViolation(_))
    }
}

pub type Result<T> = std::result::Result<T, IndexError>;
