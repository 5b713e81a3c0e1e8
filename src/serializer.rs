use chrono::{TimeZone, Utc};
use serde_json::Value as JsonValue;

use crate::{
    config::{DeserializationConfig, LongMode, TemporalMode},
    wire::{SqlRequest, SqlResponse},
    ColumnType, CrateDbError, Result, Value,
};

/// Encodes the request payload. Failures here never reached the network, so
/// they classify as request errors.
pub(crate) fn encode_payload(request: &SqlRequest<'_>) -> Result<Vec<u8>> {
    serde_json::to_vec(request)
        .map_err(|err| CrateDbError::request("could not serialize request payload", err))
}

/// Parses the raw response body into the wire envelope.
pub(crate) fn decode_body(body: &[u8]) -> Result<SqlResponse> {
    serde_json::from_slice(body)
        .map_err(|err| CrateDbError::Deserialization(format!("invalid response body: {err}")))
}

pub(crate) fn parse_col_types(raw: &[JsonValue]) -> Result<Vec<ColumnType>> {
    raw.iter().map(ColumnType::from_wire).collect()
}

/// Applies the per-column conversions from `col_types` to every row,
/// recursing into array cells.
pub(crate) fn convert_rows(
    rows: Vec<Vec<JsonValue>>,
    col_types: &[ColumnType],
    config: &DeserializationConfig,
) -> Result<Vec<Vec<Value>>> {
    rows.into_iter()
        .map(|row| {
            row.into_iter()
                .enumerate()
                .map(|(index, cell)| {
                    let value = json_to_value(cell);
                    match col_types.get(index) {
                        Some(col_type) => apply_policy(value, col_type.base(), config),
                        None => Ok(value),
                    }
                })
                .collect()
        })
        .collect()
}

/// Maps parsed JSON into `Value`. Integral numeric lexemes take the i64 path
/// before any float conversion, so 64-bit precision is never lost.
pub(crate) fn json_to_value(json: JsonValue) -> Value {
    match json {
        JsonValue::Null => Value::Null,
        JsonValue::Bool(value) => Value::Bool(value),
        JsonValue::Number(number) => match number.as_i64() {
            Some(value) => Value::BigInt(value),
            None => Value::Float(number.as_f64().unwrap_or(f64::NAN)),
        },
        JsonValue::String(value) => Value::Text(value),
        JsonValue::Array(items) => Value::Array(items.into_iter().map(json_to_value).collect()),
        JsonValue::Object(entries) => Value::Object(
            entries
                .into_iter()
                .map(|(key, value)| (key, json_to_value(value)))
                .collect(),
        ),
    }
}

fn apply_policy(value: Value, base: &ColumnType, config: &DeserializationConfig) -> Result<Value> {
    if let Value::Array(items) = value {
        return items
            .into_iter()
            .map(|item| apply_policy(item, base, config))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array);
    }
    match base {
        ColumnType::BigInt if config.long == LongMode::BigInt => coerce_bigint(value),
        ColumnType::TimestampWithZone | ColumnType::TimestampWithoutZone
            if config.timestamp == TemporalMode::Date =>
        {
            wrap_epoch_millis(value)
        }
        ColumnType::Date if config.date == TemporalMode::Date => wrap_epoch_millis(value),
        _ => Ok(value),
    }
}

fn coerce_bigint(value: Value) -> Result<Value> {
    match value {
        Value::BigInt(_) | Value::Null => Ok(value),
        Value::Float(float) => {
            // Convert via the string form; a fractional lexeme in a BIGINT
            // column is a server contract violation.
            let text = float.to_string();
            text.parse::<i64>().map(Value::BigInt).map_err(|_| {
                CrateDbError::Deserialization(format!(
                    "cannot convert '{text}' to a 64-bit integer"
                ))
            })
        }
        other => Err(CrateDbError::Deserialization(format!(
            "expected an integer cell for a BIGINT column, got {other:?}"
        ))),
    }
}

fn wrap_epoch_millis(value: Value) -> Result<Value> {
    match value {
        Value::BigInt(millis) => Utc
            .timestamp_millis_opt(millis)
            .single()
            .map(Value::Timestamp)
            .ok_or_else(|| {
                CrateDbError::Deserialization(format!(
                    "epoch milliseconds {millis} are out of range"
                ))
            }),
        other => Ok(other),
    }
}
