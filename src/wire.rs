use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::Value;

/// Request payload for `POST /_sql?types`.
#[derive(Debug, Serialize)]
pub(crate) struct SqlRequest<'a> {
    pub stmt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<&'a [Value]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bulk_args: Option<&'a [Vec<Value>]>,
}

impl<'a> SqlRequest<'a> {
    pub fn stmt(stmt: &'a str) -> Self {
        Self {
            stmt,
            args: None,
            bulk_args: None,
        }
    }

    pub fn with_args(stmt: &'a str, args: &'a [Value]) -> Self {
        Self {
            stmt,
            args: (!args.is_empty()).then_some(args),
            bulk_args: None,
        }
    }

    pub fn with_bulk_args(stmt: &'a str, bulk_args: &'a [Vec<Value>]) -> Self {
        Self {
            stmt,
            args: None,
            bulk_args: Some(bulk_args),
        }
    }
}

/// Success envelope. Cells and type tags stay as raw JSON until the
/// serializer applies the per-column conversions.
#[derive(Debug, Deserialize)]
pub(crate) struct SqlResponse {
    #[serde(default)]
    pub cols: Vec<String>,
    #[serde(default)]
    pub col_types: Vec<JsonValue>,
    #[serde(default)]
    pub rows: Vec<Vec<JsonValue>>,
    #[serde(default)]
    pub rowcount: Option<i64>,
    #[serde(default)]
    pub results: Option<Vec<BulkResultWire>>,
    #[serde(default)]
    pub duration: f64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct BulkResultWire {
    pub rowcount: i64,
    #[serde(default)]
    pub error: Option<ErrorPayload>,
}

/// Error envelope returned with any non-200 status.
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    pub error: ErrorPayload,
    #[serde(default)]
    pub error_trace: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorPayload {
    pub message: String,
    #[serde(default)]
    pub code: i64,
}
