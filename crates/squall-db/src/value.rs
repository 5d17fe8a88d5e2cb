//! Column value decoding: PostgreSQL wire values into JSON-ready variants.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{Column, Row as _, TypeInfo, ValueRef};
use uuid::Uuid;

use crate::gateway::GatewayError;

/// A single decoded column value, tagged with the kind of thing it was in
/// the engine.
///
/// The variants cover what the services actually serve: scalars, text,
/// binary, timestamps, and embedded JSON. Everything else decodes through
/// the text fallback or fails materialization.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Timestamp(DateTime<Utc>),
    Json(Value),
}

impl SqlValue {
    /// The JSON rendition used in wire responses.
    ///
    /// Binary becomes standard base64, timestamps RFC 3339 in UTC. A float
    /// that JSON cannot represent (NaN, infinities) becomes null.
    pub fn into_json(self) -> Value {
        match self {
            SqlValue::Null => Value::Null,
            SqlValue::Bool(b) => Value::Bool(b),
            SqlValue::Int(i) => Value::Number(i.into()),
            SqlValue::Float(f) => serde_json::Number::from_f64(f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            SqlValue::Text(s) => Value::String(s),
            SqlValue::Bytes(b) => Value::String(BASE64.encode(b)),
            SqlValue::Timestamp(t) => {
                Value::String(t.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
            SqlValue::Json(v) => v,
        }
    }
}

/// Materializes one driver row into a wire row.
pub(crate) fn decode_row(row: &PgRow) -> Result<squall_types::Row, GatewayError> {
    let mut out = squall_types::Row::new();
    for idx in 0..row.columns().len() {
        let name = row.columns()[idx].name().to_string();
        let value = decode_value(row, idx)?;
        out.insert(name, value.into_json());
    }
    Ok(out)
}

/// Decodes the column at `idx` by its declared PostgreSQL type.
///
/// NULL short-circuits before any typed decode. Types without a dedicated
/// arm go through the text fallback, so an exotic column either reads as a
/// string or reports a decode failure.
fn decode_value(row: &PgRow, idx: usize) -> Result<SqlValue, GatewayError> {
    let column = &row.columns()[idx];
    let name = column.name();
    let dec_err = |e: sqlx::Error| GatewayError::Decode {
        column: name.to_string(),
        source: e,
    };

    let raw = row.try_get_raw(idx).map_err(|e| dec_err(e))?;
    if raw.is_null() {
        return Ok(SqlValue::Null);
    }

    let decoded = match column.type_info().name() {
        "BOOL" => row.try_get::<bool, _>(idx).map(SqlValue::Bool),
        "INT2" => row.try_get::<i16, _>(idx).map(|v| SqlValue::Int(v.into())),
        "INT4" => row.try_get::<i32, _>(idx).map(|v| SqlValue::Int(v.into())),
        "INT8" => row.try_get::<i64, _>(idx).map(SqlValue::Int),
        "FLOAT4" => row.try_get::<f32, _>(idx).map(|v| SqlValue::Float(v.into())),
        "FLOAT8" => row.try_get::<f64, _>(idx).map(SqlValue::Float),
        // NUMERIC values that do not fit an f64 keep their exact text form.
        "NUMERIC" => row.try_get::<Decimal, _>(idx).map(|d| match d.to_f64() {
            Some(f) => SqlValue::Float(f),
            None => SqlValue::Text(d.to_string()),
        }),
        "TEXT" | "VARCHAR" | "BPCHAR" | "CHAR" | "NAME" => {
            row.try_get::<String, _>(idx).map(SqlValue::Text)
        }
        "BYTEA" => row.try_get::<Vec<u8>, _>(idx).map(SqlValue::Bytes),
        "TIMESTAMP" => row
            .try_get::<NaiveDateTime, _>(idx)
            .map(|t| SqlValue::Timestamp(t.and_utc())),
        "TIMESTAMPTZ" => row
            .try_get::<DateTime<Utc>, _>(idx)
            .map(SqlValue::Timestamp),
        "DATE" => row
            .try_get::<NaiveDate, _>(idx)
            .map(|d| SqlValue::Text(d.to_string())),
        "TIME" => row
            .try_get::<NaiveTime, _>(idx)
            .map(|t| SqlValue::Text(t.to_string())),
        "UUID" => row
            .try_get::<Uuid, _>(idx)
            .map(|u| SqlValue::Text(u.to_string())),
        "JSON" | "JSONB" => row.try_get::<Value, _>(idx).map(SqlValue::Json),
        _ => row.try_get::<String, _>(idx).map(SqlValue::Text),
    };

    decoded.map_err(dec_err)
}
