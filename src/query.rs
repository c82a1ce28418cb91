//! Resolution of raw query directives into a [`QueryConfig`].
//!
//! Directives arrive as ordered `(name, value)` byte strings. Names and
//! policy values are matched case-insensitively. Resolution either fully
//! populates the target or leaves it untouched and returns one [`ParamError`].

use serde::{Deserialize, Serialize};

use crate::error::ParamError;

/// Kind of query the directives belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKind {
    None,
    Knn,
    Range,
    Hybrid,
}

/// How a hybrid (filtered) query walks the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SearchMode {
    /// No policy requested; the host decides.
    #[default]
    Empty,
    /// Score each filtered candidate directly.
    AdHoc,
    /// Pull nearest neighbors in batches and filter them.
    Batched,
}

/// Resolved per-query configuration. Zero means "not set".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QueryConfig {
    pub search_mode: SearchMode,
    pub batch_size: usize,
    pub ef_runtime: usize,
}

/// One raw `(name, value)` directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawParam<'a> {
    pub name: &'a [u8],
    pub value: &'a [u8],
}

impl<'a> RawParam<'a> {
    pub fn new<N, V>(name: &'a N, value: &'a V) -> Self
    where
        N: AsRef<[u8]> + ?Sized,
        V: AsRef<[u8]> + ?Sized,
    {
        Self {
            name: name.as_ref(),
            value: value.as_ref(),
        }
    }
}

const BATCH_SIZE: &[u8] = b"batch_size";
const HYBRID_POLICY: &[u8] = b"hybrid_policy";
const EF_RUNTIME: &[u8] = b"ef_runtime";

#[derive(Default)]
struct Seen<'a> {
    batch_size: Option<&'a [u8]>,
    hybrid_policy: Option<&'a [u8]>,
    ef_runtime: Option<&'a [u8]>,
}

fn set_once<'a>(slot: &mut Option<&'a [u8]>, value: &'a [u8]) -> Result<(), ParamError> {
    if slot.is_some() {
        return Err(ParamError::AlreadySet);
    }
    *slot = Some(value);
    Ok(())
}

fn parse_policy(value: &[u8]) -> Result<SearchMode, ParamError> {
    if value.eq_ignore_ascii_case(b"batches") || value.eq_ignore_ascii_case(b"batched") {
        Ok(SearchMode::Batched)
    } else if value.eq_ignore_ascii_case(b"adhoc_bf") || value.eq_ignore_ascii_case(b"adhoc") {
        Ok(SearchMode::AdHoc)
    } else {
        Err(ParamError::InvalidPolicy)
    }
}

/// Strict decimal: digits only, no sign, no leading zero, within `1..=i64::MAX`.
fn parse_positive(value: &[u8]) -> Result<usize, ParamError> {
    if value.is_empty() || value[0] == b'0' || !value.iter().all(u8::is_ascii_digit) {
        return Err(ParamError::BadValue);
    }
    let text = std::str::from_utf8(value).map_err(|_| ParamError::BadValue)?;
    let n: i64 = text.parse().map_err(|_| ParamError::BadValue)?;
    usize::try_from(n).map_err(|_| ParamError::BadValue)
}

/// Resolve `params` for a query of `kind` into `target`.
///
/// Checks, first failure wins:
/// 1. missing target
/// 2. repeated or unknown names (in input order)
/// 3. unknown `hybrid_policy` value
/// 4. ad-hoc policy combined with `batch_size`
/// 5. hybrid-only directives on a non-hybrid query
/// 6. malformed numbers
///
/// On success the target is reset and then populated, so fields that were
/// not supplied read as zero.
pub fn resolve_params(
    params: &[RawParam<'_>],
    target: Option<&mut QueryConfig>,
    kind: QueryKind,
) -> Result<(), ParamError> {
    let target = target.ok_or(ParamError::NullParam)?;

    let mut seen = Seen::default();
    for param in params {
        if param.name.eq_ignore_ascii_case(BATCH_SIZE) {
            set_once(&mut seen.batch_size, param.value)?;
        } else if param.name.eq_ignore_ascii_case(HYBRID_POLICY) {
            set_once(&mut seen.hybrid_policy, param.value)?;
        } else if param.name.eq_ignore_ascii_case(EF_RUNTIME) {
            set_once(&mut seen.ef_runtime, param.value)?;
        } else {
            return Err(ParamError::UnknownParam);
        }
    }

    let search_mode = match seen.hybrid_policy {
        Some(value) => parse_policy(value)?,
        None => SearchMode::Empty,
    };
    if search_mode == SearchMode::AdHoc && seen.batch_size.is_some() {
        return Err(ParamError::AdHocWithBatchSize);
    }
    let hybrid_only = seen.batch_size.is_some() || seen.hybrid_policy.is_some();
    if hybrid_only && kind != QueryKind::Hybrid {
        return Err(ParamError::NotHybrid);
    }

    let batch_size = seen.batch_size.map(parse_positive).transpose()?.unwrap_or(0);
    let ef_runtime = seen.ef_runtime.map(parse_positive).transpose()?.unwrap_or(0);

    *target = QueryConfig {
        search_mode,
        batch_size,
        ef_runtime,
    };
    Ok(())
}
