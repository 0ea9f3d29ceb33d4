//! Row values: the tagged union behind every decoded cell, plus the typed
//! coercions the feature accessors are built on.
//!
//! A [`RowValue`] is what MessagePack decoding produces before any schema
//! is consulted. Typed accessors then coerce a `RowValue` against a column
//! descriptor, returning a [`Checked`] result that carries the normalized
//! value and any constraint violations instead of throwing.
//!
//! String-encoded temporals and decimals obey a round-trip rule: the input
//! string must equal the parsed value formatted back. This prevents silent
//! truncation or normalization of data that merely looks parseable.

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use std::fmt;
use std::str::FromStr;

use meridian_core::{Error, IssueCode, Result, ValueIssue};

use crate::geometry;

/// MessagePack extension type carrying a GeoPackage geometry blob ("G").
pub const GEOMETRY_EXT: i8 = 71;

/// The standard MessagePack timestamp extension type.
pub const TIMESTAMP_EXT: i8 = -1;

/// A decoded cell value, prior to schema-typed coercion.
#[derive(Debug, Clone, PartialEq)]
pub enum RowValue {
    /// Absent / null.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Unsigned integer too large for `i64`.
    UInt(u64),
    /// Floating point.
    Float(f64),
    /// UTF-8 text.
    Text(String),
    /// Byte sequence.
    Blob(Vec<u8>),
    /// Nested sequence (only seen in malformed or legacy rows).
    Array(Vec<RowValue>),
    /// Geometry decoded from the extension payload.
    Geometry(Box<geojson::Geometry>),
    /// Instant in time decoded from the timestamp extension.
    Instant(DateTime<Utc>),
}

impl RowValue {
    /// A short name for error messages.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::UInt(_) => "uint",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Blob(_) => "blob",
            Self::Array(_) => "array",
            Self::Geometry(_) => "geometry",
            Self::Instant(_) => "instant",
        }
    }

    /// Returns true for [`RowValue::Null`].
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Decodes a MessagePack value, resolving the registered extensions.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidFileContents`] for maps, unknown extension
    /// types, or invalid extension payloads.
    pub fn from_msgpack(context: &str, value: rmpv::Value) -> Result<Self> {
        match value {
            rmpv::Value::Nil => Ok(Self::Null),
            rmpv::Value::Boolean(b) => Ok(Self::Bool(b)),
            rmpv::Value::Integer(i) => {
                if let Some(v) = i.as_i64() {
                    Ok(Self::Int(v))
                } else if let Some(v) = i.as_u64() {
                    Ok(Self::UInt(v))
                } else {
                    Err(Error::invalid_contents(context, "unrepresentable integer"))
                }
            }
            rmpv::Value::F32(f) => Ok(Self::Float(f64::from(f))),
            rmpv::Value::F64(f) => Ok(Self::Float(f)),
            rmpv::Value::String(s) => s
                .into_str()
                .map(Self::Text)
                .ok_or_else(|| Error::invalid_contents(context, "string is not valid UTF-8")),
            rmpv::Value::Binary(b) => Ok(Self::Blob(b)),
            rmpv::Value::Array(items) => items
                .into_iter()
                .map(|item| Self::from_msgpack(context, item))
                .collect::<Result<Vec<_>>>()
                .map(Self::Array),
            rmpv::Value::Ext(GEOMETRY_EXT, data) => {
                geometry::decode_gpkg(context, &data).map(|g| Self::Geometry(Box::new(g)))
            }
            rmpv::Value::Ext(TIMESTAMP_EXT, data) => decode_timestamp(&data)
                .map(Self::Instant)
                .ok_or_else(|| Error::invalid_contents(context, "invalid timestamp extension")),
            rmpv::Value::Ext(kind, _) => Err(Error::invalid_contents(
                context,
                format!("unknown extension type {kind}"),
            )),
            rmpv::Value::Map(_) => Err(Error::invalid_contents(
                context,
                "maps are not valid row values",
            )),
        }
    }

    /// Encodes this value as MessagePack (used for primary-key packing).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for values that cannot appear in a
    /// primary-key tuple (geometries).
    pub fn to_msgpack(&self) -> Result<rmpv::Value> {
        match self {
            Self::Null => Ok(rmpv::Value::Nil),
            Self::Bool(b) => Ok(rmpv::Value::Boolean(*b)),
            Self::Int(i) => Ok(rmpv::Value::from(*i)),
            Self::UInt(u) => Ok(rmpv::Value::from(*u)),
            Self::Float(f) => Ok(rmpv::Value::F64(*f)),
            Self::Text(s) => Ok(rmpv::Value::String(s.clone().into())),
            Self::Blob(b) => Ok(rmpv::Value::Binary(b.clone())),
            Self::Array(items) => items
                .iter()
                .map(Self::to_msgpack)
                .collect::<Result<Vec<_>>>()
                .map(rmpv::Value::Array),
            Self::Instant(ts) => Ok(rmpv::Value::Ext(TIMESTAMP_EXT, encode_timestamp(ts))),
            Self::Geometry(_) => Err(Error::InvalidInput(
                "geometry values cannot be packed into a primary key".into(),
            )),
        }
    }

    /// Converts a JSON value (e.g. GeoJSON feature properties) to a row value.
    ///
    /// Objects are only accepted when they parse as GeoJSON geometries.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for objects that are not geometries.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        match value {
            serde_json::Value::Null => Ok(Self::Null),
            serde_json::Value::Bool(b) => Ok(Self::Bool(*b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Self::Int(i))
                } else if let Some(u) = n.as_u64() {
                    Ok(Self::UInt(u))
                } else {
                    Ok(Self::Float(n.as_f64().unwrap_or(f64::NAN)))
                }
            }
            serde_json::Value::String(s) => Ok(Self::Text(s.clone())),
            serde_json::Value::Array(items) => items
                .iter()
                .map(Self::from_json)
                .collect::<Result<Vec<_>>>()
                .map(Self::Array),
            serde_json::Value::Object(_) => {
                let geometry: geojson::Geometry = serde_json::from_value(value.clone())
                    .map_err(|e| {
                        Error::InvalidInput(format!("object value is not a GeoJSON geometry: {e}"))
                    })?;
                Ok(Self::Geometry(Box::new(geometry)))
            }
        }
    }

    /// Renders this value in the wire JSON form used by views and
    /// baseline-equality checks: geometries as lowercase hex WKB, blobs as
    /// base64, integers as raw JSON numbers, temporals as ISO 8601 strings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] when a geometry cannot be encoded.
    pub fn to_wire_json(&self) -> Result<serde_json::Value> {
        self.render(BlobEncoding::Base64)
    }

    /// Renders this value for the `kart.diff/v1+hexwkb` document, where
    /// byte blobs are lowercase hex, in parallel with the hex WKB
    /// geometries. Every other type renders exactly as
    /// [`RowValue::to_wire_json`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] when a geometry cannot be encoded.
    pub fn to_diff_json(&self) -> Result<serde_json::Value> {
        self.render(BlobEncoding::Hex)
    }

    fn render(&self, blobs: BlobEncoding) -> Result<serde_json::Value> {
        Ok(match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(i) => serde_json::Value::from(*i),
            Self::UInt(u) => serde_json::Value::from(*u),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Self::Text(s) => serde_json::Value::String(s.clone()),
            Self::Blob(b) => serde_json::Value::String(match blobs {
                BlobEncoding::Base64 => STANDARD.encode(b),
                BlobEncoding::Hex => hex::encode(b),
            }),
            Self::Array(items) => serde_json::Value::Array(
                items
                    .iter()
                    .map(|item| item.render(blobs))
                    .collect::<Result<Vec<_>>>()?,
            ),
            Self::Geometry(g) => serde_json::Value::String(geometry::wkb_hex(g)?),
            Self::Instant(ts) => {
                serde_json::Value::String(ts.format("%Y-%m-%dT%H:%M:%S%.fZ").to_string())
            }
        })
    }
}

/// How byte blobs render in a JSON form.
#[derive(Clone, Copy)]
enum BlobEncoding {
    Base64,
    Hex,
}

/// The result of a typed accessor.
///
/// `ok` is false only for hard violations; soft constraint issues (numeric
/// precision/scale) leave `ok` true while still listing their issues.
#[derive(Debug, Clone, PartialEq)]
pub struct Checked<T> {
    /// The `dataType` tag of the accessed column.
    pub data_type: &'static str,
    /// Whether the accessed column is part of the primary key.
    pub is_primary_key: bool,
    /// Whether the value passed all hard constraints.
    pub ok: bool,
    /// The normalized value; `None` for null or failed coercion.
    pub data: Option<T>,
    /// Constraint violations, hard and soft.
    pub issues: Vec<ValueIssue>,
}

impl<T> Checked<T> {
    fn null(data_type: &'static str, is_primary_key: bool) -> Self {
        Self {
            data_type,
            is_primary_key,
            ok: true,
            data: None,
            issues: Vec::new(),
        }
    }

    fn value(data_type: &'static str, is_primary_key: bool, data: T) -> Self {
        Self {
            data_type,
            is_primary_key,
            ok: true,
            data: Some(data),
            issues: Vec::new(),
        }
    }

    fn soft(data_type: &'static str, is_primary_key: bool, data: T, issues: Vec<ValueIssue>) -> Self {
        Self {
            data_type,
            is_primary_key,
            ok: true,
            data: Some(data),
            issues,
        }
    }

    fn fail(data_type: &'static str, is_primary_key: bool, issue: ValueIssue) -> Self {
        Self {
            data_type,
            is_primary_key,
            ok: false,
            data: None,
            issues: vec![issue],
        }
    }
}

// ============================================================================
// Typed coercions
// ============================================================================

pub(crate) fn coerce_boolean(column: &str, is_pk: bool, value: &RowValue) -> Checked<bool> {
    const TAG: &str = "boolean";
    match value {
        RowValue::Null => Checked::null(TAG, is_pk),
        RowValue::Bool(b) => Checked::value(TAG, is_pk, *b),
        RowValue::Int(0) | RowValue::UInt(0) => Checked::value(TAG, is_pk, false),
        RowValue::Int(1) | RowValue::UInt(1) => Checked::value(TAG, is_pk, true),
        RowValue::Text(s) if s.eq_ignore_ascii_case("true") => Checked::value(TAG, is_pk, true),
        RowValue::Text(s) if s.eq_ignore_ascii_case("false") => Checked::value(TAG, is_pk, false),
        other => Checked::fail(
            TAG,
            is_pk,
            ValueIssue::new(
                IssueCode::BadFormat,
                column,
                format!("cannot read a boolean from {}", other.type_name()),
            ),
        ),
    }
}

pub(crate) fn coerce_blob(column: &str, is_pk: bool, value: &RowValue) -> Checked<Vec<u8>> {
    const TAG: &str = "blob";
    match value {
        RowValue::Null => Checked::null(TAG, is_pk),
        RowValue::Blob(b) => Checked::value(TAG, is_pk, b.clone()),
        RowValue::Text(s) => decode_base64_any(s).map_or_else(
            || {
                Checked::fail(
                    TAG,
                    is_pk,
                    ValueIssue::new(IssueCode::BadFormat, column, "string is not valid base64"),
                )
            },
            |bytes| Checked::value(TAG, is_pk, bytes),
        ),
        RowValue::Array(items) => {
            let mut bytes = Vec::with_capacity(items.len());
            for item in items {
                let byte = match item {
                    RowValue::Int(i) if (0..=255).contains(i) => Some(*i as u8),
                    RowValue::UInt(u) if *u <= 255 => Some(*u as u8),
                    _ => None,
                };
                let Some(byte) = byte else {
                    return Checked::fail(
                        TAG,
                        is_pk,
                        ValueIssue::new(
                            IssueCode::BadFormat,
                            column,
                            "array elements must be integers in 0..=255",
                        ),
                    );
                };
                bytes.push(byte);
            }
            Checked::value(TAG, is_pk, bytes)
        }
        other => Checked::fail(
            TAG,
            is_pk,
            ValueIssue::new(
                IssueCode::BadFormat,
                column,
                format!("cannot read bytes from {}", other.type_name()),
            ),
        ),
    }
}

pub(crate) fn coerce_date(column: &str, is_pk: bool, value: &RowValue) -> Checked<NaiveDate> {
    const TAG: &str = "date";
    match value {
        RowValue::Null => Checked::null(TAG, is_pk),
        RowValue::Text(s) => match NaiveDate::parse_from_str(s, "%Y-%m-%d") {
            Ok(date) if date.format("%Y-%m-%d").to_string() == *s => {
                Checked::value(TAG, is_pk, date)
            }
            _ => Checked::fail(
                TAG,
                is_pk,
                ValueIssue::new(
                    IssueCode::BadFormat,
                    column,
                    format!("{s:?} is not an ISO 8601 date"),
                ),
            ),
        },
        other => Checked::fail(
            TAG,
            is_pk,
            ValueIssue::new(
                IssueCode::BadFormat,
                column,
                format!("cannot read a date from {}", other.type_name()),
            ),
        ),
    }
}

pub(crate) fn coerce_float(column: &str, is_pk: bool, value: &RowValue) -> Checked<f64> {
    const TAG: &str = "float";
    #[allow(clippy::cast_precision_loss)]
    match value {
        RowValue::Null => Checked::null(TAG, is_pk),
        RowValue::Float(f) => Checked::value(TAG, is_pk, *f),
        RowValue::Int(i) => Checked::value(TAG, is_pk, *i as f64),
        RowValue::UInt(u) => Checked::value(TAG, is_pk, *u as f64),
        RowValue::Text(s) => match s.parse::<f64>() {
            Ok(f) if f.is_finite() => Checked::value(TAG, is_pk, f),
            _ => Checked::fail(
                TAG,
                is_pk,
                ValueIssue::new(
                    IssueCode::BadFormat,
                    column,
                    format!("{s:?} is not a finite number"),
                ),
            ),
        },
        other => Checked::fail(
            TAG,
            is_pk,
            ValueIssue::new(
                IssueCode::BadFormat,
                column,
                format!("cannot read a float from {}", other.type_name()),
            ),
        ),
    }
}

pub(crate) fn coerce_geometry(
    column: &str,
    is_pk: bool,
    value: &RowValue,
) -> Checked<geojson::Geometry> {
    const TAG: &str = "geometry";
    match value {
        RowValue::Null => Checked::null(TAG, is_pk),
        RowValue::Geometry(g) => Checked::value(TAG, is_pk, (**g).clone()),
        other => Checked::fail(
            TAG,
            is_pk,
            ValueIssue::new(
                IssueCode::TypeError,
                column,
                format!("cannot read a geometry from {}", other.type_name()),
            ),
        ),
    }
}

pub(crate) fn coerce_integer(
    column: &str,
    is_pk: bool,
    size: u32,
    value: &RowValue,
) -> Checked<i128> {
    const TAG: &str = "integer";
    let parsed: Option<i128> = match value {
        RowValue::Null => return Checked::null(TAG, is_pk),
        RowValue::Int(i) => Some(i128::from(*i)),
        RowValue::UInt(u) => Some(i128::from(*u)),
        #[allow(clippy::cast_possible_truncation)]
        RowValue::Float(f) if f.fract() == 0.0 && f.is_finite() => Some(*f as i128),
        RowValue::Text(s) => parse_int_literal(s),
        _ => None,
    };
    let Some(parsed) = parsed else {
        return Checked::fail(
            TAG,
            is_pk,
            ValueIssue::new(
                IssueCode::BadFormat,
                column,
                format!("cannot read an integer from {}", value.type_name()),
            ),
        );
    };

    let max: i128 = (1i128 << (size - 1)) - 1;
    let min: i128 = -(1i128 << (size - 1));
    if parsed < min || parsed > max {
        return Checked::fail(
            TAG,
            is_pk,
            ValueIssue::new(
                IssueCode::OutOfRange,
                column,
                format!("{parsed} does not fit a signed {size}-bit integer"),
            ),
        );
    }
    Checked::value(TAG, is_pk, parsed)
}

pub(crate) fn coerce_interval(column: &str, is_pk: bool, value: &RowValue) -> Checked<IsoDuration> {
    const TAG: &str = "interval";
    match value {
        RowValue::Null => Checked::null(TAG, is_pk),
        RowValue::Text(s) => match IsoDuration::from_str(s) {
            Ok(duration) if duration.to_string() == *s => Checked::value(TAG, is_pk, duration),
            _ => Checked::fail(
                TAG,
                is_pk,
                ValueIssue::new(
                    IssueCode::BadFormat,
                    column,
                    format!("{s:?} is not an ISO 8601 duration"),
                ),
            ),
        },
        other => Checked::fail(
            TAG,
            is_pk,
            ValueIssue::new(
                IssueCode::BadFormat,
                column,
                format!("cannot read a duration from {}", other.type_name()),
            ),
        ),
    }
}

pub(crate) fn coerce_numeric(
    column: &str,
    is_pk: bool,
    precision: u32,
    scale: u32,
    value: &RowValue,
) -> Checked<Decimal> {
    const TAG: &str = "numeric";
    let parsed = match value {
        RowValue::Null => return Checked::null(TAG, is_pk),
        RowValue::Text(s) => match Decimal::from_str(s) {
            Ok(d) if d.to_string() == *s => Some(d),
            _ => None,
        },
        RowValue::Int(i) => Some(Decimal::from(*i)),
        RowValue::UInt(u) => Some(Decimal::from(*u)),
        _ => None,
    };
    let Some(decimal) = parsed else {
        return Checked::fail(
            TAG,
            is_pk,
            ValueIssue::new(
                IssueCode::BadFormat,
                column,
                format!("cannot read a decimal from {}", value.type_name()),
            ),
        );
    };

    // Precision/scale overruns are reported but the value is still usable.
    let mut issues = Vec::new();
    let digits = decimal.mantissa().unsigned_abs().to_string().len() as u32;
    if digits > precision {
        issues.push(ValueIssue::new(
            IssueCode::PrecisionExceeded,
            column,
            format!("{digits} significant digits exceed precision {precision}"),
        ));
    }
    if decimal.scale() > scale {
        issues.push(ValueIssue::new(
            IssueCode::ScaleExceeded,
            column,
            format!("{} decimal places exceed scale {scale}", decimal.scale()),
        ));
    }
    Checked::soft(TAG, is_pk, decimal, issues)
}

pub(crate) fn coerce_text(
    column: &str,
    is_pk: bool,
    length: Option<u64>,
    value: &RowValue,
) -> Checked<String> {
    const TAG: &str = "text";
    match value {
        RowValue::Null => Checked::null(TAG, is_pk),
        RowValue::Text(s) => {
            if let Some(max) = length {
                let chars = s.chars().count() as u64;
                if chars > max {
                    return Checked::fail(
                        TAG,
                        is_pk,
                        ValueIssue::new(
                            IssueCode::TooBig,
                            column,
                            format!("{chars} characters exceed the declared length {max}"),
                        ),
                    );
                }
            }
            Checked::value(TAG, is_pk, s.clone())
        }
        other => Checked::fail(
            TAG,
            is_pk,
            ValueIssue::new(
                IssueCode::BadFormat,
                column,
                format!("cannot read text from {}", other.type_name()),
            ),
        ),
    }
}

pub(crate) fn coerce_time(column: &str, is_pk: bool, value: &RowValue) -> Checked<NaiveTime> {
    const TAG: &str = "time";
    match value {
        RowValue::Null => Checked::null(TAG, is_pk),
        RowValue::Text(s) => match NaiveTime::parse_from_str(s, "%H:%M:%S%.f") {
            Ok(time) if format_time(&time) == *s => Checked::value(TAG, is_pk, time),
            _ => Checked::fail(
                TAG,
                is_pk,
                ValueIssue::new(
                    IssueCode::BadFormat,
                    column,
                    format!("{s:?} is not an ISO 8601 time"),
                ),
            ),
        },
        other => Checked::fail(
            TAG,
            is_pk,
            ValueIssue::new(
                IssueCode::BadFormat,
                column,
                format!("cannot read a time from {}", other.type_name()),
            ),
        ),
    }
}

pub(crate) fn coerce_timestamp(
    column: &str,
    is_pk: bool,
    timezone: Option<&str>,
    value: &RowValue,
) -> Checked<NaiveDateTime> {
    const TAG: &str = "timestamp";
    let utc = timezone == Some("UTC");
    match value {
        RowValue::Null => Checked::null(TAG, is_pk),
        RowValue::Instant(ts) => Checked::value(TAG, is_pk, ts.naive_utc()),
        RowValue::Text(s) => {
            // A trailing Z is only meaningful for UTC columns.
            let (body, suffix) = match s.strip_suffix('Z') {
                Some(body) if utc => (body, "Z"),
                _ => (s.as_str(), ""),
            };
            match NaiveDateTime::parse_from_str(body, "%Y-%m-%dT%H:%M:%S%.f") {
                Ok(ts) if format!("{}{suffix}", ts.format("%Y-%m-%dT%H:%M:%S%.f")) == *s => {
                    Checked::value(TAG, is_pk, ts)
                }
                _ => Checked::fail(
                    TAG,
                    is_pk,
                    ValueIssue::new(
                        IssueCode::BadFormat,
                        column,
                        format!("{s:?} is not an ISO 8601 datetime"),
                    ),
                ),
            }
        }
        other => Checked::fail(
            TAG,
            is_pk,
            ValueIssue::new(
                IssueCode::BadFormat,
                column,
                format!("cannot read a timestamp from {}", other.type_name()),
            ),
        ),
    }
}

fn format_time(time: &NaiveTime) -> String {
    time.format("%H:%M:%S%.f").to_string()
}

fn parse_int_literal(s: &str) -> Option<i128> {
    let trimmed = s.strip_suffix('n').unwrap_or(s);
    if trimmed.is_empty() {
        return None;
    }
    let digits = trimmed.strip_prefix('-').unwrap_or(trimmed);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    trimmed.parse().ok()
}

fn decode_base64_any(s: &str) -> Option<Vec<u8>> {
    STANDARD
        .decode(s)
        .or_else(|_| STANDARD_NO_PAD.decode(s))
        .or_else(|_| URL_SAFE.decode(s))
        .or_else(|_| URL_SAFE_NO_PAD.decode(s))
        .ok()
}

// ============================================================================
// Timestamp extension
// ============================================================================

/// Decodes the standard MessagePack timestamp payload (4, 8 or 12 bytes).
fn decode_timestamp(data: &[u8]) -> Option<DateTime<Utc>> {
    match data.len() {
        4 => {
            let secs = u32::from_be_bytes(data.try_into().ok()?);
            DateTime::from_timestamp(i64::from(secs), 0)
        }
        8 => {
            let combined = u64::from_be_bytes(data.try_into().ok()?);
            let nsecs = (combined >> 34) as u32;
            let secs = (combined & ((1 << 34) - 1)) as i64;
            DateTime::from_timestamp(secs, nsecs)
        }
        12 => {
            let nsecs = u32::from_be_bytes(data[0..4].try_into().ok()?);
            let secs = i64::from_be_bytes(data[4..12].try_into().ok()?);
            DateTime::from_timestamp(secs, nsecs)
        }
        _ => None,
    }
}

/// Encodes an instant as the smallest standard timestamp payload.
fn encode_timestamp(ts: &DateTime<Utc>) -> Vec<u8> {
    let secs = ts.timestamp();
    let nsecs = ts.timestamp_subsec_nanos();
    if nsecs == 0 && u32::try_from(secs).is_ok() {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        return (secs as u32).to_be_bytes().to_vec();
    }
    if (0..(1i64 << 34)).contains(&secs) {
        #[allow(clippy::cast_sign_loss)]
        let combined = (u64::from(nsecs) << 34) | (secs as u64);
        return combined.to_be_bytes().to_vec();
    }
    let mut out = Vec::with_capacity(12);
    out.extend_from_slice(&nsecs.to_be_bytes());
    out.extend_from_slice(&secs.to_be_bytes());
    out
}

// ============================================================================
// ISO 8601 durations
// ============================================================================

/// An ISO 8601 duration, kept component-wise so formatting is canonical.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct IsoDuration {
    /// Calendar years.
    pub years: u32,
    /// Calendar months.
    pub months: u32,
    /// Weeks.
    pub weeks: u32,
    /// Days.
    pub days: u32,
    /// Hours.
    pub hours: u32,
    /// Minutes.
    pub minutes: u32,
    /// Seconds, possibly fractional.
    pub seconds: f64,
}

impl IsoDuration {
    fn is_zero(&self) -> bool {
        self.years == 0
            && self.months == 0
            && self.weeks == 0
            && self.days == 0
            && self.hours == 0
            && self.minutes == 0
            && self.seconds == 0.0
    }
}

impl fmt::Display for IsoDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_zero() {
            return f.write_str("PT0S");
        }
        f.write_str("P")?;
        if self.years > 0 {
            write!(f, "{}Y", self.years)?;
        }
        if self.months > 0 {
            write!(f, "{}M", self.months)?;
        }
        if self.weeks > 0 {
            write!(f, "{}W", self.weeks)?;
        }
        if self.days > 0 {
            write!(f, "{}D", self.days)?;
        }
        if self.hours > 0 || self.minutes > 0 || self.seconds != 0.0 {
            f.write_str("T")?;
            if self.hours > 0 {
                write!(f, "{}H", self.hours)?;
            }
            if self.minutes > 0 {
                write!(f, "{}M", self.minutes)?;
            }
            if self.seconds != 0.0 {
                write!(f, "{}S", self.seconds)?;
            }
        }
        Ok(())
    }
}

impl FromStr for IsoDuration {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let rest = s
            .strip_prefix('P')
            .ok_or_else(|| Error::InvalidInput(format!("{s:?}: durations start with P")))?;
        if rest.is_empty() {
            return Err(Error::InvalidInput(format!("{s:?}: empty duration")));
        }

        let mut out = Self::default();
        let mut in_time = false;
        let mut number = String::new();
        let mut saw_component = false;

        for c in rest.chars() {
            match c {
                'T' if !in_time && number.is_empty() => in_time = true,
                '0'..='9' | '.' => number.push(c),
                designator => {
                    let value: f64 = number
                        .parse()
                        .map_err(|_| Error::InvalidInput(format!("{s:?}: bad number {number:?}")))?;
                    number.clear();
                    saw_component = true;
                    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                    let whole = value as u32;
                    let integral = f64::from(whole) == value;
                    match (in_time, designator) {
                        (false, 'Y') if integral => out.years = whole,
                        (false, 'M') if integral => out.months = whole,
                        (false, 'W') if integral => out.weeks = whole,
                        (false, 'D') if integral => out.days = whole,
                        (true, 'H') if integral => out.hours = whole,
                        (true, 'M') if integral => out.minutes = whole,
                        (true, 'S') => out.seconds = value,
                        _ => {
                            return Err(Error::InvalidInput(format!(
                                "{s:?}: unexpected designator {designator:?}"
                            )))
                        }
                    }
                }
            }
        }
        if !number.is_empty() || !saw_component {
            return Err(Error::InvalidInput(format!("{s:?}: incomplete duration")));
        }
        Ok(out)
    }
}
