//! Typed features: schema-aware accessors, validation, and GeoJSON forms.
//!
//! A [`Feature`] pairs a projected [`FeatureRecord`] with the schema it was
//! projected through. Accessors are per data type and return a [`Checked`]
//! result rather than throwing on bad data; calling an accessor against a
//! column of a different type is a caller bug and fails hard with
//! [`Error::TypeMismatch`].

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use serde_json::json;

use meridian_core::{Error, Result, ValueIssue};

use crate::crs::{CrsRegistry, Reprojector, WGS84};
use crate::path_structure::PathStructure;
use crate::raw_feature::{resolve_geometry, FeatureRecord};
use crate::schema::{DataType, Schema, SchemaEntry};
use crate::value::{self, Checked, IsoDuration, RowValue};

/// A typed row of a dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    record: FeatureRecord,
    schema: Arc<Schema>,
}

impl Feature {
    /// Wraps a projected record with the schema it was projected through.
    #[must_use]
    pub fn from_record(record: FeatureRecord, schema: Arc<Schema>) -> Self {
        Self { record, schema }
    }

    /// The feature's encoded ID.
    #[must_use]
    pub fn eid(&self) -> &str {
        &self.record.eid
    }

    /// The underlying projected record.
    #[must_use]
    pub fn record(&self) -> &FeatureRecord {
        &self.record
    }

    /// The schema this feature was projected through.
    #[must_use]
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Primary-key values by name, in primary-key order.
    #[must_use]
    pub fn ids(&self) -> &[(String, RowValue)] {
        &self.record.ids
    }

    /// Non-primary-key values by name.
    #[must_use]
    pub fn properties(&self) -> &BTreeMap<String, RowValue> {
        &self.record.properties
    }

    /// The value of the primary geometry column, when present and non-null.
    #[must_use]
    pub fn geometry(&self) -> Option<&geojson::Geometry> {
        let column = self.record.geometry_column.as_deref()?;
        match self.record.value(column) {
            Some(RowValue::Geometry(g)) => Some(g),
            _ => None,
        }
    }

    pub(crate) fn record_mut(&mut self) -> &mut FeatureRecord {
        &mut self.record
    }

    fn entry(&self, name: &str, requested: &'static str) -> Result<(&SchemaEntry, RowValue)> {
        let entry = self
            .schema
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("column {name}")))?;
        if entry.data_type.tag() != requested {
            return Err(Error::TypeMismatch {
                column: name.to_string(),
                expected: entry.data_type.tag(),
                requested,
            });
        }
        let value = self.record.value(name).cloned().unwrap_or(RowValue::Null);
        Ok((entry, value))
    }

    /// Reads a boolean column.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeMismatch`] when `name` is not a boolean column.
    pub fn boolean(&self, name: &str) -> Result<Checked<bool>> {
        let (entry, value) = self.entry(name, "boolean")?;
        Ok(value::coerce_boolean(name, entry.is_primary_key(), &value))
    }

    /// Reads a blob column.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeMismatch`] when `name` is not a blob column.
    pub fn blob(&self, name: &str) -> Result<Checked<Vec<u8>>> {
        let (entry, value) = self.entry(name, "blob")?;
        Ok(value::coerce_blob(name, entry.is_primary_key(), &value))
    }

    /// Reads a date column.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeMismatch`] when `name` is not a date column.
    pub fn date(&self, name: &str) -> Result<Checked<NaiveDate>> {
        let (entry, value) = self.entry(name, "date")?;
        Ok(value::coerce_date(name, entry.is_primary_key(), &value))
    }

    /// Reads a float column.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeMismatch`] when `name` is not a float column.
    pub fn float(&self, name: &str) -> Result<Checked<f64>> {
        let (entry, value) = self.entry(name, "float")?;
        Ok(value::coerce_float(name, entry.is_primary_key(), &value))
    }

    /// Reads a geometry column.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeMismatch`] when `name` is not a geometry column.
    pub fn geometry_column(&self, name: &str) -> Result<Checked<geojson::Geometry>> {
        let (entry, value) = self.entry(name, "geometry")?;
        Ok(value::coerce_geometry(name, entry.is_primary_key(), &value))
    }

    /// Reads an integer column.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeMismatch`] when `name` is not an integer column.
    pub fn integer(&self, name: &str) -> Result<Checked<i128>> {
        let (entry, value) = self.entry(name, "integer")?;
        let size = match entry.data_type {
            DataType::Integer { size } => size,
            _ => 64,
        };
        Ok(value::coerce_integer(name, entry.is_primary_key(), size, &value))
    }

    /// Reads an interval column.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeMismatch`] when `name` is not an interval column.
    pub fn interval(&self, name: &str) -> Result<Checked<IsoDuration>> {
        let (entry, value) = self.entry(name, "interval")?;
        Ok(value::coerce_interval(name, entry.is_primary_key(), &value))
    }

    /// Reads a numeric column.
    ///
    /// Precision/scale overruns are reported as issues but keep `ok` true.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeMismatch`] when `name` is not a numeric column.
    pub fn numeric(&self, name: &str) -> Result<Checked<Decimal>> {
        let (entry, value) = self.entry(name, "numeric")?;
        let (precision, scale) = match entry.data_type {
            DataType::Numeric { precision, scale } => (precision, scale),
            _ => (u32::MAX, u32::MAX),
        };
        Ok(value::coerce_numeric(
            name,
            entry.is_primary_key(),
            precision,
            scale,
            &value,
        ))
    }

    /// Reads a text column.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeMismatch`] when `name` is not a text column.
    pub fn text(&self, name: &str) -> Result<Checked<String>> {
        let (entry, value) = self.entry(name, "text")?;
        let length = match entry.data_type {
            DataType::Text { length } => length,
            _ => None,
        };
        Ok(value::coerce_text(name, entry.is_primary_key(), length, &value))
    }

    /// Reads a time column.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeMismatch`] when `name` is not a time column.
    pub fn time(&self, name: &str) -> Result<Checked<NaiveTime>> {
        let (entry, value) = self.entry(name, "time")?;
        Ok(value::coerce_time(name, entry.is_primary_key(), &value))
    }

    /// Reads a timestamp column.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeMismatch`] when `name` is not a timestamp column.
    pub fn timestamp(&self, name: &str) -> Result<Checked<NaiveDateTime>> {
        let (entry, value) = self.entry(name, "timestamp")?;
        let timezone = match &entry.data_type {
            DataType::Timestamp { timezone } => timezone.as_deref(),
            _ => None,
        };
        Ok(value::coerce_timestamp(
            name,
            entry.is_primary_key(),
            timezone,
            &value,
        ))
    }

    /// Runs every column through its typed coercion, collecting hard
    /// failures.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] with the accumulated issues when any
    /// column fails a hard constraint.
    pub fn validate(&self) -> Result<()> {
        let mut issues: Vec<ValueIssue> = Vec::new();
        for entry in self.schema.as_ref() {
            let name = entry.name.as_str();
            let failed: Vec<ValueIssue> = match &entry.data_type {
                DataType::Boolean => hard_issues(&self.boolean(name)?),
                DataType::Blob => hard_issues(&self.blob(name)?),
                DataType::Date => hard_issues(&self.date(name)?),
                DataType::Float { .. } => hard_issues(&self.float(name)?),
                DataType::Geometry { .. } => hard_issues(&self.geometry_column(name)?),
                DataType::Integer { .. } => hard_issues(&self.integer(name)?),
                DataType::Interval => hard_issues(&self.interval(name)?),
                DataType::Numeric { .. } => hard_issues(&self.numeric(name)?),
                DataType::Text { .. } => hard_issues(&self.text(name)?),
                DataType::Time => hard_issues(&self.time(name)?),
                DataType::Timestamp { .. } => hard_issues(&self.timestamp(name)?),
            };
            issues.extend(failed);
        }
        if issues.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation { issues })
        }
    }

    /// Materializes this feature as GeoJSON, reprojected to [`WGS84`].
    ///
    /// Returns `None` when the schema has no geometry column or the
    /// feature's geometry is null.
    ///
    /// # Errors
    ///
    /// Propagates reprojection failures and wire-rendering failures.
    pub fn to_geojson(
        &self,
        crss: &CrsRegistry,
        reprojector: &dyn Reprojector,
    ) -> Result<Option<geojson::Feature>> {
        let Some(column) = self.record.geometry_column.clone() else {
            return Ok(None);
        };
        let mut geometry = match self.record.value(&column) {
            Some(RowValue::Geometry(g)) => (**g).clone(),
            _ => return Ok(None),
        };

        if let Some(identifier) = &self.record.crs {
            let mut members = serde_json::Map::new();
            members.insert(
                "crs".to_string(),
                json!({"type": "name", "properties": {"name": identifier}}),
            );
            geometry.foreign_members = Some(members);

            if identifier != WGS84 {
                if let Some(from) = crss.get(identifier) {
                    reprojector.reproject(&mut geometry, from, WGS84)?;
                }
            }
        }

        let mut ids = serde_json::Map::new();
        for (name, value) in &self.record.ids {
            ids.insert(name.clone(), value.to_wire_json()?);
        }

        let mut properties = serde_json::Map::new();
        for (name, value) in &self.record.properties {
            if *name == column {
                continue;
            }
            properties.insert(name.clone(), value.to_wire_json()?);
        }

        let mut foreign = serde_json::Map::new();
        foreign.insert(
            "_kart".to_string(),
            json!({
                "ids": serde_json::Value::Object(ids),
                "eid": self.record.eid,
                "geometryColumn": column,
            }),
        );

        Ok(Some(geojson::Feature {
            bbox: None,
            geometry: Some(geometry),
            id: Some(geojson::feature::Id::String(self.record.eid.clone())),
            properties: Some(properties),
            foreign_members: Some(foreign),
        }))
    }

    /// Builds a feature from a GeoJSON feature carrying `_kart.ids`.
    ///
    /// The inverse of [`Feature::to_geojson`]: primary keys come from the
    /// `_kart` foreign member, the geometry lands under its column name,
    /// and the result is validated against the schema.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] when `_kart.ids` is missing, and
    /// [`Error::Validation`] when any value fails its column's constraints.
    pub fn from_geojson(
        feature: &geojson::Feature,
        schema: &Arc<Schema>,
        crss: &CrsRegistry,
        path_structure: &PathStructure,
    ) -> Result<Self> {
        let kart_ids = feature
            .foreign_members
            .as_ref()
            .and_then(|m| m.get("_kart"))
            .and_then(|k| k.get("ids"))
            .and_then(serde_json::Value::as_object)
            .ok_or_else(|| Error::InvalidInput("feature has no _kart.ids member".into()))?;

        let ids: Vec<(String, RowValue)> = schema
            .primary_key_entries()
            .into_iter()
            .map(|entry| {
                let value = match kart_ids.get(&entry.name) {
                    Some(v) => RowValue::from_json(v)?,
                    None => RowValue::Null,
                };
                Ok((entry.name.clone(), value))
            })
            .collect::<Result<_>>()?;

        let (geometry_column, crs) = resolve_geometry(schema, crss);

        let mut properties: BTreeMap<String, RowValue> = BTreeMap::new();
        for entry in schema.non_primary_key_entries() {
            if Some(&entry.name) == geometry_column.as_ref() {
                let value = feature
                    .geometry
                    .clone()
                    .map_or(RowValue::Null, |g| RowValue::Geometry(Box::new(g)));
                properties.insert(entry.name.clone(), value);
                continue;
            }
            let value = match feature.properties.as_ref().and_then(|p| p.get(&entry.name)) {
                Some(v) => RowValue::from_json(v)?,
                None => RowValue::Null,
            };
            properties.insert(entry.name.clone(), value);
        }

        let id_values: Vec<RowValue> = ids.iter().map(|(_, v)| v.clone()).collect();
        let eid = path_structure.eid(&id_values)?;

        let built = Self {
            record: FeatureRecord {
                ids,
                properties,
                dropped_keys: Vec::new(),
                geometry_column,
                crs,
                eid,
            },
            schema: schema.clone(),
        };
        built.validate()?;
        Ok(built)
    }
}

fn hard_issues<T>(checked: &Checked<T>) -> Vec<ValueIssue> {
    if checked.ok {
        Vec::new()
    } else {
        checked.issues.clone()
    }
}
