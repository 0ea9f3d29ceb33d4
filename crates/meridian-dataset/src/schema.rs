//! Dataset schema: typed column descriptors parsed from `schema.json`.
//!
//! A schema is an ordered sequence of column entries tagged by `dataType`.
//! Column identity is the stable `id` string; `name` is only the current
//! label and may change across commits. Rows written under older schemas
//! are decoded through their legend (see [`crate::legend`]) and re-projected
//! onto the current schema by column id.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeSet;

use meridian_core::{Error, Result};

use crate::legend::Legend;

/// Geometry base names accepted in `geometryType`.
const GEOMETRY_NAMES: &[&str] = &[
    "GEOMETRY",
    "POINT",
    "LINESTRING",
    "POLYGON",
    "MULTIPOINT",
    "MULTILINESTRING",
    "MULTIPOLYGON",
    "GEOMETRYCOLLECTION",
];

/// Dimension suffixes accepted after a geometry base name.
const GEOMETRY_SUFFIXES: &[&str] = &["Z", "M", "ZM"];

/// The data type of a column, with per-type attributes.
///
/// The serialized form is tagged by `dataType` and carries only the
/// attributes that type defines, matching the on-disk `schema.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "dataType", rename_all = "lowercase")]
pub enum DataType {
    /// True/false.
    Boolean,
    /// Arbitrary byte sequence.
    Blob,
    /// Calendar date without time.
    Date,
    /// IEEE 754 floating point.
    Float {
        /// Bit width: 32 or 64.
        size: u32,
    },
    /// A geometry column.
    Geometry {
        /// WKT geometry token, e.g. `"MULTIPOLYGON"` or `"POINT Z"`.
        #[serde(rename = "geometryType")]
        geometry_type: String,
        /// CRS identifier, e.g. `"EPSG:4326"`. Absent means unspecified.
        #[serde(
            rename = "geometryCrs",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        geometry_crs: Option<String>,
    },
    /// Signed integer.
    Integer {
        /// Bit width: 8, 16, 32 or 64.
        size: u32,
    },
    /// ISO 8601 duration.
    Interval,
    /// Fixed-point decimal.
    Numeric {
        /// Total number of significant digits.
        precision: u32,
        /// Digits after the decimal point.
        scale: u32,
    },
    /// UTF-8 text.
    Text {
        /// Maximum length in characters; absent means unbounded.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        length: Option<u64>,
    },
    /// Time of day without date.
    Time,
    /// Date and time without timezone offset.
    Timestamp {
        /// `"UTC"` for instants, `null` for local/naive datetimes.
        #[serde(default)]
        timezone: Option<String>,
    },
}

impl DataType {
    /// Returns the `dataType` tag string for this type.
    #[must_use]
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::Boolean => "boolean",
            Self::Blob => "blob",
            Self::Date => "date",
            Self::Float { .. } => "float",
            Self::Geometry { .. } => "geometry",
            Self::Integer { .. } => "integer",
            Self::Interval => "interval",
            Self::Numeric { .. } => "numeric",
            Self::Text { .. } => "text",
            Self::Time => "time",
            Self::Timestamp { .. } => "timestamp",
        }
    }
}

/// A single column descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaEntry {
    /// Stable column identity, unique within the schema.
    pub id: String,
    /// Current column label.
    pub name: String,
    /// Primary-key ordinal; `None` for non-key columns.
    #[serde(
        rename = "primaryKeyIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub primary_key_index: Option<u32>,
    /// The column's data type and per-type attributes.
    #[serde(flatten)]
    pub data_type: DataType,
}

impl SchemaEntry {
    /// Returns true when this column is part of the primary key.
    #[must_use]
    pub fn is_primary_key(&self) -> bool {
        self.primary_key_index.is_some()
    }
}

/// An ordered, validated sequence of column descriptors.
///
/// Invariants (checked on construction): at least one entry, unique column
/// ids, and primary-key indices forming a dense sequence starting at zero.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    entries: Vec<SchemaEntry>,
}

impl Schema {
    /// Builds a schema from entries, validating the schema invariants.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SchemaValidation`] when an invariant is violated.
    pub fn new(entries: Vec<SchemaEntry>) -> Result<Self> {
        if entries.is_empty() {
            return Err(Error::schema("schema must have at least one column"));
        }

        let mut ids = BTreeSet::new();
        for entry in &entries {
            if !ids.insert(entry.id.as_str()) {
                return Err(Error::schema(format!("duplicate column id {:?}", entry.id)));
            }
            validate_entry(entry)?;
        }

        let mut pk_indices: Vec<u32> = entries.iter().filter_map(|e| e.primary_key_index).collect();
        pk_indices.sort_unstable();
        for (expected, actual) in pk_indices.iter().enumerate() {
            if *actual as usize != expected {
                return Err(Error::schema(format!(
                    "primary-key indices must form a dense sequence from 0, got {pk_indices:?}"
                )));
            }
        }

        Ok(Self { entries })
    }

    /// Parses a `schema.json` document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidFileContents`] for malformed JSON or unknown
    /// `dataType` tags, and [`Error::SchemaValidation`] for invariant
    /// violations.
    pub fn from_json(path: &str, bytes: &[u8]) -> Result<Self> {
        let entries: Vec<SchemaEntry> = serde_json::from_slice(bytes)
            .map_err(|e| Error::invalid_contents(path, format!("schema.json: {e}")))?;
        Self::new(entries)
    }

    /// The columns, in schema order.
    #[must_use]
    pub fn entries(&self) -> &[SchemaEntry] {
        &self.entries
    }

    /// Looks up a column by current name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&SchemaEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Looks up a column by stable id.
    #[must_use]
    pub fn get_by_id(&self, id: &str) -> Option<&SchemaEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    /// Primary-key columns ordered by `primaryKeyIndex`.
    #[must_use]
    pub fn primary_key_entries(&self) -> Vec<&SchemaEntry> {
        let mut keys: Vec<&SchemaEntry> =
            self.entries.iter().filter(|e| e.is_primary_key()).collect();
        keys.sort_by_key(|e| e.primary_key_index);
        keys
    }

    /// Non-primary-key columns in schema order.
    #[must_use]
    pub fn non_primary_key_entries(&self) -> Vec<&SchemaEntry> {
        self.entries.iter().filter(|e| !e.is_primary_key()).collect()
    }

    /// Primary-key column names ordered by `primaryKeyIndex`.
    #[must_use]
    pub fn primary_key_names(&self) -> Vec<&str> {
        self.primary_key_entries()
            .into_iter()
            .map(|e| e.name.as_str())
            .collect()
    }

    /// Non-primary-key column names in schema order.
    #[must_use]
    pub fn non_primary_key_names(&self) -> Vec<&str> {
        self.non_primary_key_entries()
            .into_iter()
            .map(|e| e.name.as_str())
            .collect()
    }

    /// The first geometry column, when the schema has one.
    #[must_use]
    pub fn primary_geometry(&self) -> Option<&SchemaEntry> {
        self.entries
            .iter()
            .find(|e| matches!(e.data_type, DataType::Geometry { .. }))
    }

    /// Collapses the current column ordering into a legend.
    #[must_use]
    pub fn to_legend(&self) -> Legend {
        let pk_ids: Vec<String> = self
            .primary_key_entries()
            .into_iter()
            .map(|e| e.id.clone())
            .collect();
        let non_pk_ids: Vec<String> = self
            .non_primary_key_entries()
            .into_iter()
            .map(|e| e.id.clone())
            .collect();
        Legend::from_parts(pk_ids, non_pk_ids)
    }

    /// Projects the schema to a closed-world JSON Schema document.
    ///
    /// Each column becomes a property constraining the values that column
    /// accepts in its normalized (JSON) form.
    #[must_use]
    pub fn to_json_schema(&self) -> Value {
        let mut properties = serde_json::Map::new();
        for entry in &self.entries {
            properties.insert(entry.name.clone(), column_json_schema(&entry.data_type));
        }
        let required: Vec<&str> = self.primary_key_names();
        json!({
            "$schema": "https://json-schema.org/draft/2020-12/schema",
            "type": "object",
            "properties": Value::Object(properties),
            "required": required,
        })
    }
}

impl<'a> IntoIterator for &'a Schema {
    type Item = &'a SchemaEntry;
    type IntoIter = std::slice::Iter<'a, SchemaEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

fn validate_entry(entry: &SchemaEntry) -> Result<()> {
    match &entry.data_type {
        DataType::Integer { size } => {
            if ![8, 16, 32, 64].contains(size) {
                return Err(Error::schema(format!(
                    "column {:?}: integer size must be 8, 16, 32 or 64, got {size}",
                    entry.name
                )));
            }
        }
        DataType::Float { size } => {
            if ![32, 64].contains(size) {
                return Err(Error::schema(format!(
                    "column {:?}: float size must be 32 or 64, got {size}",
                    entry.name
                )));
            }
        }
        DataType::Numeric { precision, scale } => {
            if scale > precision {
                return Err(Error::schema(format!(
                    "column {:?}: numeric scale {scale} exceeds precision {precision}",
                    entry.name
                )));
            }
        }
        DataType::Timestamp { timezone } => {
            if let Some(tz) = timezone {
                if tz != "UTC" {
                    return Err(Error::schema(format!(
                        "column {:?}: timestamp timezone must be \"UTC\" or null, got {tz:?}",
                        entry.name
                    )));
                }
            }
        }
        DataType::Geometry { geometry_type, .. } => {
            let mut parts = geometry_type.split_whitespace();
            let base = parts.next().unwrap_or("");
            let suffix = parts.next();
            let base_ok = GEOMETRY_NAMES.contains(&base);
            let suffix_ok = match suffix {
                None => true,
                Some(s) => GEOMETRY_SUFFIXES.contains(&s),
            };
            if !base_ok || !suffix_ok || parts.next().is_some() {
                return Err(Error::schema(format!(
                    "column {:?}: invalid geometryType {geometry_type:?}",
                    entry.name
                )));
            }
        }
        _ => {}
    }
    Ok(())
}

#[allow(clippy::cast_precision_loss)]
fn column_json_schema(data_type: &DataType) -> Value {
    match data_type {
        DataType::Boolean => json!({"type": "boolean"}),
        DataType::Blob => json!({
            "type": "array",
            "items": {"type": "integer", "minimum": 0, "maximum": 255},
            "format": "bytes",
        }),
        DataType::Date => json!({"type": "string", "format": "date"}),
        DataType::Time => json!({"type": "string", "format": "time"}),
        DataType::Timestamp { .. } => json!({"type": "string", "format": "date-time"}),
        DataType::Interval => json!({"type": "string", "format": "duration"}),
        DataType::Float { size } => {
            let bound = if *size == 32 {
                f64::from(f32::MAX)
            } else {
                f64::MAX
            };
            json!({"type": "number", "minimum": -bound, "maximum": bound})
        }
        DataType::Integer { size } => {
            let max: i128 = (1i128 << (size - 1)) - 1;
            let min: i128 = -(1i128 << (size - 1));
            json!({"type": "integer", "minimum": min, "maximum": max})
        }
        DataType::Numeric { precision, scale } => {
            let int_digits = (precision - scale).max(1);
            let pattern = if *scale == 0 {
                format!("^-?[0-9]{{1,{int_digits}}}$")
            } else {
                format!("^-?[0-9]{{1,{int_digits}}}(\\.[0-9]{{1,{scale}}})?$")
            };
            json!({"type": "string", "pattern": pattern})
        }
        DataType::Text { length } => match length {
            Some(max) => json!({"type": "string", "maxLength": max}),
            None => json!({"type": "string"}),
        },
        DataType::Geometry { .. } => {
            json!({"$ref": "https://geojson.org/schema/Geometry.json"})
        }
    }
}
