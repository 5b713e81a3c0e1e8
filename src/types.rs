use indexmap::IndexMap;
use serde_json::Value as JsonValue;

use crate::{CrateDbError, Result, Value};

/// Column type tag as reported by `/_sql?types`.
///
/// Scalar tags are plain integer codes; array and set columns arrive as
/// nested tags (`[100, inner]`) whose base type is the innermost scalar.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ColumnType {
    Null,
    NotSupported,
    Char,
    Boolean,
    Text,
    Ip,
    DoublePrecision,
    Real,
    SmallInt,
    BigInt,
    Integer,
    TimestampWithZone,
    Object,
    GeoPoint,
    GeoShape,
    TimestampWithoutZone,
    UncheckedObject,
    Interval,
    RegProc,
    Time,
    OidVector,
    Numeric,
    RegClass,
    Date,
    Bit,
    Json,
    Character,
    Array(Box<ColumnType>),
    Set(Box<ColumnType>),
    /// A tag this client does not know about. Cells are passed through
    /// unconverted.
    Unknown(i64),
}

impl ColumnType {
    pub(crate) fn from_code(code: i64) -> Self {
        match code {
            0 => Self::Null,
            1 => Self::NotSupported,
            2 => Self::Char,
            3 => Self::Boolean,
            4 => Self::Text,
            5 => Self::Ip,
            6 => Self::DoublePrecision,
            7 => Self::Real,
            8 => Self::SmallInt,
            9 => Self::BigInt,
            10 => Self::Integer,
            11 => Self::TimestampWithZone,
            12 => Self::Object,
            13 => Self::GeoPoint,
            14 => Self::GeoShape,
            15 => Self::TimestampWithoutZone,
            16 => Self::UncheckedObject,
            17 => Self::Interval,
            19 => Self::RegProc,
            20 => Self::Time,
            21 => Self::OidVector,
            22 => Self::Numeric,
            23 => Self::RegClass,
            24 => Self::Date,
            25 => Self::Bit,
            26 => Self::Json,
            27 => Self::Character,
            other => Self::Unknown(other),
        }
    }

    /// Parses a wire tag, which is either a bare code or `[code, inner]`.
    pub fn from_wire(raw: &JsonValue) -> Result<Self> {
        match raw {
            JsonValue::Number(code) => {
                let code = code.as_i64().ok_or_else(|| {
                    CrateDbError::Deserialization(format!("invalid column type code {code}"))
                })?;
                Ok(Self::from_code(code))
            }
            JsonValue::Array(parts) => {
                let (outer, inner) = match parts.as_slice() {
                    [outer, inner] => (outer, inner),
                    _ => {
                        return Err(CrateDbError::Deserialization(format!(
                            "composite column type must have two elements, got {}",
                            parts.len()
                        )))
                    }
                };
                let outer = outer.as_i64().ok_or_else(|| {
                    CrateDbError::Deserialization("composite column type code must be a number".to_owned())
                })?;
                let inner = Self::from_wire(inner)?;
                match outer {
                    100 => Ok(Self::Array(Box::new(inner))),
                    101 => Ok(Self::Set(Box::new(inner))),
                    other => Err(CrateDbError::Deserialization(format!(
                        "unknown composite column type code {other}"
                    ))),
                }
            }
            other => Err(CrateDbError::Deserialization(format!(
                "unexpected column type value: {other}"
            ))),
        }
    }

    /// The innermost scalar type, unwrapping nested array and set tags.
    pub fn base(&self) -> &ColumnType {
        match self {
            Self::Array(inner) | Self::Set(inner) => inner.base(),
            scalar => scalar,
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            Self::Null => 0,
            Self::NotSupported => 1,
            Self::Char => 2,
            Self::Boolean => 3,
            Self::Text => 4,
            Self::Ip => 5,
            Self::DoublePrecision => 6,
            Self::Real => 7,
            Self::SmallInt => 8,
            Self::BigInt => 9,
            Self::Integer => 10,
            Self::TimestampWithZone => 11,
            Self::Object => 12,
            Self::GeoPoint => 13,
            Self::GeoShape => 14,
            Self::TimestampWithoutZone => 15,
            Self::UncheckedObject => 16,
            Self::Interval => 17,
            Self::RegProc => 19,
            Self::Time => 20,
            Self::OidVector => 21,
            Self::Numeric => 22,
            Self::RegClass => 23,
            Self::Date => 24,
            Self::Bit => 25,
            Self::Json => 26,
            Self::Character => 27,
            Self::Array(_) => 100,
            Self::Set(_) => 101,
            Self::Unknown(code) => *code,
        }
    }
}

/// A row delivered in keyed (object) mode, ordered like `cols`.
pub type Record = IndexMap<String, Value>;

/// Result rows in the shape selected by the effective row mode.
#[derive(Clone, Debug, PartialEq)]
pub enum Rows {
    /// Positional arrays aligned with `cols`.
    Columns(Vec<Vec<Value>>),
    /// Keyed mappings using `cols` as the key source.
    Keyed(Vec<Record>),
}

impl Rows {
    pub fn len(&self) -> usize {
        match self {
            Self::Columns(rows) => rows.len(),
            Self::Keyed(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_columns(&self) -> Option<&[Vec<Value>]> {
        match self {
            Self::Columns(rows) => Some(rows),
            Self::Keyed(_) => None,
        }
    }

    pub fn as_keyed(&self) -> Option<&[Record]> {
        match self {
            Self::Keyed(rows) => Some(rows),
            Self::Columns(_) => None,
        }
    }
}

/// Wall-clock and server-reported timings for one call, in milliseconds.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Durations {
    /// Server-side execution time as reported in the response envelope.
    pub cratedb: f64,
    /// Transport-only time: wall clock minus the server-reported duration.
    pub request: f64,
    /// Client-side argument preparation, filled in by `insert_many`.
    pub preparation: Option<f64>,
    /// End-to-end call time including encoding and decoding.
    pub total: Option<f64>,
}

/// Byte sizes observed for one exchange.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Sizes {
    /// Bytes actually written to the socket (post-compression).
    pub request: u64,
    /// Response body bytes.
    pub response: u64,
    /// Pre-compression body size; present whenever compression is enabled.
    pub request_uncompressed: Option<u64>,
}

/// Structured error payload attached to a failed bulk sub-operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerErrorInfo {
    pub message: String,
    pub code: i64,
}

/// Response to a single statement.
#[derive(Clone, Debug, PartialEq)]
pub struct QueryResponse {
    pub cols: Vec<String>,
    pub col_types: Vec<ColumnType>,
    pub rows: Rows,
    pub rowcount: i64,
    /// Server-reported duration in milliseconds.
    pub duration: f64,
    pub durations: Durations,
    pub sizes: Sizes,
}

/// Per-statement outcome within a bulk response.
#[derive(Clone, Debug, PartialEq)]
pub struct BulkResult {
    pub rowcount: i64,
    pub error: Option<ServerErrorInfo>,
}

/// Response to a bulk statement. Rows are never returned; failed
/// sub-operations are indexed by `bulk_errors`.
#[derive(Clone, Debug, PartialEq)]
pub struct BulkResponse {
    pub cols: Vec<String>,
    pub col_types: Vec<ColumnType>,
    pub results: Vec<BulkResult>,
    /// Indices of results whose rowcount is the server's error sentinel (-2).
    pub bulk_errors: Vec<usize>,
    pub duration: f64,
    pub durations: Durations,
    pub sizes: Sizes,
}
