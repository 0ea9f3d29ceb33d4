//! Raw on-disk rows and their projection onto the current schema.
//!
//! A feature file holds a MessagePack 2-tuple `[legendId, [values...]]`;
//! the primary-key tuple is packed separately into the (base64) filename.
//! Decoding is schema-free: a [`RawFeature`] only knows which legend wrote
//! it. Projection through that legend and the *current* schema produces a
//! [`FeatureRecord`] with ids in current primary-key order, properties for
//! every current column (null where the row predates a column), and the
//! list of columns the row carries that the schema has since dropped.

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use std::collections::BTreeMap;

use meridian_core::{Error, Result};

use crate::crs::{CrsRegistry, WGS84};
use crate::legend::Legend;
use crate::path_structure::PathStructure;
use crate::schema::{DataType, Schema};
use crate::value::RowValue;

/// A single decoded on-disk row: key tuple, value tuple, and the legend
/// that defines what the slots mean.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFeature {
    /// Content-hash id of the legend the row was written under.
    pub legend_id: String,
    /// Primary-key values in the legend's key order.
    pub primary_keys: Vec<RowValue>,
    /// Non-primary-key values in the legend's value order.
    pub values: Vec<RowValue>,
}

/// A row projected onto the current schema.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRecord {
    /// Primary-key values by current name, in `primaryKeyIndex` order.
    pub ids: Vec<(String, RowValue)>,
    /// Non-primary-key values by current name.
    pub properties: BTreeMap<String, RowValue>,
    /// Legend columns the current schema no longer has.
    pub dropped_keys: Vec<String>,
    /// Name of the first geometry column, when the schema has one.
    pub geometry_column: Option<String>,
    /// Resolved CRS identifier for that column; `None` when unregistered.
    pub crs: Option<String>,
    /// The row's encoded ID under the current path structure.
    pub eid: String,
}

impl FeatureRecord {
    /// Primary-key values in order, without their names.
    #[must_use]
    pub fn id_values(&self) -> Vec<RowValue> {
        self.ids.iter().map(|(_, v)| v.clone()).collect()
    }

    /// Looks up a value by column name, checking ids then properties.
    #[must_use]
    pub fn value(&self, name: &str) -> Option<&RowValue> {
        self.ids
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
            .or_else(|| self.properties.get(name))
    }
}

impl RawFeature {
    /// Decodes a feature file from its filename and body bytes.
    ///
    /// Trailing bytes after the body tuple are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidFileContents`] when either the filename or
    /// the body fails to decode.
    pub fn from_file(context: &str, filename: &str, body: &[u8]) -> Result<Self> {
        let primary_keys = Self::decode_filename(context, filename)?;

        let mut cursor = body;
        let value = rmpv::decode::read_value(&mut cursor).map_err(|e| {
            Error::invalid_contents(context, format!("feature body is not MessagePack: {e}"))
        })?;
        let rmpv::Value::Array(tuple) = value else {
            return Err(Error::invalid_contents(context, "feature body must be a 2-tuple"));
        };
        if tuple.len() != 2 {
            return Err(Error::invalid_contents(
                context,
                format!("feature body must be a 2-tuple, got {} elements", tuple.len()),
            ));
        }
        let mut tuple = tuple.into_iter();
        let legend_id = match tuple.next() {
            Some(rmpv::Value::String(s)) => s.into_str().ok_or_else(|| {
                Error::invalid_contents(context, "legend id is not valid UTF-8")
            })?,
            _ => return Err(Error::invalid_contents(context, "legend id must be a string")),
        };
        let values = match tuple.next() {
            Some(rmpv::Value::Array(items)) => items
                .into_iter()
                .map(|item| RowValue::from_msgpack(context, item))
                .collect::<Result<Vec<_>>>()?,
            _ => {
                return Err(Error::invalid_contents(
                    context,
                    "feature values must be an array",
                ))
            }
        };

        Ok(Self {
            legend_id,
            primary_keys,
            values,
        })
    }

    /// Decodes a feature filename into its primary-key tuple.
    ///
    /// Classic base64 and base64url are both accepted, with or without
    /// padding.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidFileContents`] when the name is not base64
    /// or does not contain a packed key tuple.
    pub fn decode_filename(context: &str, filename: &str) -> Result<Vec<RowValue>> {
        let packed = STANDARD
            .decode(filename)
            .or_else(|_| STANDARD_NO_PAD.decode(filename))
            .or_else(|_| URL_SAFE.decode(filename))
            .or_else(|_| URL_SAFE_NO_PAD.decode(filename))
            .map_err(|_| Error::invalid_contents(context, "filename is not base64"))?;

        let mut cursor = packed.as_slice();
        let value = rmpv::decode::read_value(&mut cursor).map_err(|e| {
            Error::invalid_contents(context, format!("filename is not a packed key tuple: {e}"))
        })?;
        let rmpv::Value::Array(keys) = value else {
            return Err(Error::invalid_contents(
                context,
                "filename must decode to a key tuple",
            ));
        };
        keys.into_iter()
            .map(|key| RowValue::from_msgpack(context, key))
            .collect()
    }

    /// Projects this row onto the current schema.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when the row's legend is unknown, and
    /// propagates eid-derivation failures.
    pub fn to_record(
        &self,
        legends: &BTreeMap<String, Legend>,
        schema: &Schema,
        path_structure: &PathStructure,
        crss: &CrsRegistry,
    ) -> Result<FeatureRecord> {
        let legend = legends
            .get(&self.legend_id)
            .ok_or_else(|| Error::NotFound(format!("legend {}", self.legend_id)))?;

        // Map every legend slot to its value; short rows read as null.
        let mut raw: BTreeMap<&str, &RowValue> = BTreeMap::new();
        for slot in legend.column_slots() {
            let tuple = if slot.is_primary {
                &self.primary_keys
            } else {
                &self.values
            };
            if let Some(value) = tuple.get(slot.data_index) {
                raw.insert(slot.column_id, value);
            }
        }

        let ids: Vec<(String, RowValue)> = schema
            .primary_key_entries()
            .into_iter()
            .map(|entry| {
                let value = raw.get(entry.id.as_str()).copied().cloned();
                (entry.name.clone(), value.unwrap_or(RowValue::Null))
            })
            .collect();

        let properties: BTreeMap<String, RowValue> = schema
            .non_primary_key_entries()
            .into_iter()
            .map(|entry| {
                let value = raw.get(entry.id.as_str()).copied().cloned();
                (entry.name.clone(), value.unwrap_or(RowValue::Null))
            })
            .collect();

        let dropped_keys: Vec<String> = legend
            .column_slots()
            .filter(|slot| schema.get_by_id(slot.column_id).is_none())
            .map(|slot| slot.column_id.to_string())
            .collect();

        let (geometry_column, crs) = resolve_geometry(schema, crss);

        let id_values: Vec<RowValue> = ids.iter().map(|(_, v)| v.clone()).collect();
        let eid = path_structure.eid(&id_values)?;

        Ok(FeatureRecord {
            ids,
            properties,
            dropped_keys,
            geometry_column,
            crs,
            eid,
        })
    }
}

/// Resolves the primary geometry column and its CRS identifier.
///
/// The identifier falls back to [`WGS84`] when the column does not name
/// one, and resolves to `None` when the dataset's registry does not know
/// the identifier.
pub(crate) fn resolve_geometry(
    schema: &Schema,
    crss: &CrsRegistry,
) -> (Option<String>, Option<String>) {
    let Some(entry) = schema.primary_geometry() else {
        return (None, None);
    };
    let identifier = match &entry.data_type {
        DataType::Geometry { geometry_crs, .. } => {
            geometry_crs.clone().unwrap_or_else(|| WGS84.to_string())
        }
        _ => WGS84.to_string(),
    };
    let crs = crss.contains(&identifier).then_some(identifier);
    (Some(entry.name.clone()), crs)
}
