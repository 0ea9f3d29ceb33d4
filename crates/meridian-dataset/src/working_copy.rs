//! The working copy: an in-memory change tracker over a baseline dataset.
//!
//! Edits never mutate the baseline. Every mutation records (or nets out) a
//! tracked change keyed by encoded ID, with at most one entry per eid;
//! reads overlay the tracker on the baseline, and the diff synthesizer
//! renders the tracker as a canonical `kart.diff/v1+hexwkb` document.

use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

use meridian_core::{
    values_equal, Error, EventBus, FeatureEvent, FeatureEventKind, Result, FEATURE_EVENT,
};

use crate::dataset::TableDatasetV3;
use crate::feature::Feature;
use crate::geometry;
use crate::schema::DataType;
use crate::value::RowValue;

/// One tracked edit for a single encoded ID.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackedChange {
    /// The feature is deleted from the working copy.
    Delete,
    /// The feature is new in the working copy.
    Insert(Feature),
    /// The feature's properties and/or geometry are changed.
    ///
    /// Property values of [`RowValue::Null`] clear the column.
    Update {
        /// New values by column name (primary-key names allowed).
        properties: BTreeMap<String, RowValue>,
        /// Replacement geometry, when changed.
        geometry: Option<geojson::Geometry>,
    },
}

/// A change tracker bound to one baseline dataset.
pub struct WorkingFeatureCollection {
    dataset: Arc<TableDatasetV3>,
    tracker: BTreeMap<String, TrackedChange>,
    events: EventBus,
    dominant_cache: Option<Option<String>>,
}

impl std::fmt::Debug for WorkingFeatureCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkingFeatureCollection")
            .field("dataset", &self.dataset.id())
            .field("tracked", &self.tracker.len())
            .finish_non_exhaustive()
    }
}

impl WorkingFeatureCollection {
    /// Creates an empty working copy over `dataset`.
    #[must_use]
    pub fn new(dataset: Arc<TableDatasetV3>) -> Self {
        Self {
            dataset,
            tracker: BTreeMap::new(),
            events: EventBus::new(),
            dominant_cache: None,
        }
    }

    /// The baseline dataset.
    #[must_use]
    pub fn dataset(&self) -> &Arc<TableDatasetV3> {
        &self.dataset
    }

    /// The event bus mutations publish on (`feature:added`,
    /// `feature:deleted`, `feature:updated`, plus the union `feature`).
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Number of tracked changes.
    #[must_use]
    pub fn tracked_len(&self) -> usize {
        self.tracker.len()
    }

    /// Returns true when any change is tracked.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        !self.tracker.is_empty()
    }

    /// The tracked change for an eid, if any.
    #[must_use]
    pub fn tracked(&self, eid: &str) -> Option<&TrackedChange> {
        self.tracker.get(eid)
    }

    /// Returns true when the working copy contains a feature at `eid`.
    ///
    /// # Errors
    ///
    /// Propagates baseline I/O failures.
    pub async fn has(&self, eid: &str) -> Result<bool> {
        match self.tracker.get(eid) {
            Some(TrackedChange::Delete) => Ok(false),
            Some(_) => Ok(true),
            None => self.dataset.has(eid).await,
        }
    }

    /// Loads the working-copy view of the feature at `eid`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when absent (including tracked deletes),
    /// and [`Error::Validation`] when the overlaid feature no longer
    /// satisfies the schema.
    pub async fn get(&self, eid: &str) -> Result<Feature> {
        match self.tracker.get(eid) {
            Some(TrackedChange::Delete) => Err(Error::NotFound(format!("feature {eid}"))),
            Some(TrackedChange::Insert(feature)) => {
                feature.validate()?;
                Ok(feature.clone())
            }
            Some(TrackedChange::Update {
                properties,
                geometry,
            }) => {
                let mut feature = self.dataset.get(eid).await?;
                apply_overlay(&mut feature, properties, geometry.as_ref());
                feature.validate()?;
                Ok(feature)
            }
            None => self.dataset.get(eid).await,
        }
    }

    /// Inserts a new feature.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] when the eid is already present,
    /// [`Error::Unsupported`] for `GeometryCollection` geometries or a
    /// geometry-type mismatch with the collection, and
    /// [`Error::Validation`] when the feature fails schema validation.
    pub async fn add(&mut self, feature: Feature) -> Result<()> {
        let eid = feature.eid().to_string();

        match self.tracker.get(&eid) {
            None => {
                if self.dataset.has(&eid).await? {
                    return Err(Error::InvalidInput(format!(
                        "feature {eid} already exists in the baseline"
                    )));
                }
            }
            Some(TrackedChange::Delete) => {}
            Some(_) => {
                return Err(Error::InvalidInput(format!(
                    "feature {eid} already exists in the working copy"
                )))
            }
        }

        if let Some(geometry) = feature.geometry() {
            self.check_geometry_type(geometry).await?;
        }
        feature.validate()?;

        self.tracker.insert(eid.clone(), TrackedChange::Insert(feature));
        self.publish(FeatureEventKind::Added, &eid);
        Ok(())
    }

    /// Deletes the feature at `eid`.
    ///
    /// Deleting a tracked insert removes the tracker entry entirely (net
    /// zero); anything else records a delete.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when the working copy has no feature at
    /// `eid`.
    pub async fn delete(&mut self, eid: &str) -> Result<()> {
        match self.tracker.get(eid) {
            Some(TrackedChange::Insert(_)) => {
                self.tracker.remove(eid);
            }
            Some(TrackedChange::Delete) => {
                return Err(Error::NotFound(format!("feature {eid}")));
            }
            Some(TrackedChange::Update { .. }) => {
                self.tracker.insert(eid.to_string(), TrackedChange::Delete);
            }
            None => {
                if !self.dataset.has(eid).await? {
                    return Err(Error::NotFound(format!("feature {eid}")));
                }
                self.tracker.insert(eid.to_string(), TrackedChange::Delete);
            }
        }
        self.publish(FeatureEventKind::Deleted, eid);
        Ok(())
    }

    /// Updates property values for the feature at `eid`.
    ///
    /// `None` values in `props` are stripped (not deletions); keys whose
    /// value equals the baseline are stripped too. With `merge` false the
    /// given properties replace the current non-key properties, clearing
    /// any column not named. Recording nothing (everything stripped) is
    /// not an error and publishes no event.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when absent and [`Error::Validation`]
    /// when the merged feature fails schema validation.
    pub async fn update_properties(
        &mut self,
        eid: &str,
        props: BTreeMap<String, Option<RowValue>>,
        merge: bool,
    ) -> Result<()> {
        let current = self.get(eid).await?;
        let baseline = self.baseline_for(eid).await?;
        let geometry_column = current.record().geometry_column.clone();

        // Strip undefined values, the geometry column, and no-op writes.
        let mut changed: BTreeMap<String, RowValue> = BTreeMap::new();
        for (name, value) in props {
            let Some(value) = value else { continue };
            if Some(&name) == geometry_column.as_ref() {
                continue;
            }
            if !equals_in_feature(&baseline, &name, &value) {
                changed.insert(name, value);
            }
        }

        if !merge {
            // Replacement clears every non-key, non-geometry column the
            // caller did not name.
            let schema = current.schema().clone();
            for entry in schema.non_primary_key_entries() {
                if Some(&entry.name) == geometry_column.as_ref()
                    || changed.contains_key(&entry.name)
                {
                    continue;
                }
                let cleared = RowValue::Null;
                let already_null = matches!(
                    current.record().value(&entry.name),
                    None | Some(RowValue::Null)
                );
                if !already_null && !equals_in_feature(&baseline, &entry.name, &cleared) {
                    changed.insert(entry.name.clone(), cleared);
                }
            }
        }

        if changed.is_empty() {
            return Ok(());
        }

        // Validate the overlaid result before committing the change.
        let mut preview = current.clone();
        apply_overlay(&mut preview, &changed, None);
        preview.validate()?;

        match self.tracker.get_mut(eid) {
            Some(TrackedChange::Insert(feature)) => {
                apply_overlay(feature, &changed, None);
            }
            Some(TrackedChange::Update { properties, .. }) => {
                properties.extend(changed);
            }
            Some(TrackedChange::Delete) => {
                return Err(Error::inconsistent(format!(
                    "update recorded against deleted feature {eid}"
                )));
            }
            None => {
                self.tracker.insert(
                    eid.to_string(),
                    TrackedChange::Update {
                        properties: changed,
                        geometry: None,
                    },
                );
            }
        }
        self.publish(FeatureEventKind::Updated, eid);
        Ok(())
    }

    /// Replaces the geometry of the feature at `eid`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when absent, [`Error::Unsupported`] for
    /// `GeometryCollection`, and [`Error::InvalidInput`] when the geometry
    /// type differs from the feature's current type.
    pub async fn update_geometry(&mut self, eid: &str, geometry: geojson::Geometry) -> Result<()> {
        self.check_geometry_type(&geometry).await?;

        let current = self.get(eid).await?;
        if let Some(existing) = current.geometry() {
            let existing_type = geojson_type_name(&existing.value);
            let new_type = geojson_type_name(&geometry.value);
            if existing_type != new_type {
                return Err(Error::InvalidInput(format!(
                    "geometry type change from {existing_type} to {new_type} is not allowed"
                )));
            }
        }

        match self.tracker.get_mut(eid) {
            Some(TrackedChange::Insert(feature)) => {
                apply_overlay(feature, &BTreeMap::new(), Some(&geometry));
            }
            Some(TrackedChange::Update { geometry: slot, .. }) => {
                *slot = Some(geometry);
            }
            Some(TrackedChange::Delete) => {
                return Err(Error::inconsistent(format!(
                    "update recorded against deleted feature {eid}"
                )));
            }
            None => {
                self.tracker.insert(
                    eid.to_string(),
                    TrackedChange::Update {
                        properties: BTreeMap::new(),
                        geometry: Some(geometry),
                    },
                );
            }
        }
        self.publish(FeatureEventKind::Updated, eid);
        Ok(())
    }

    /// Materializes the working-copy view as a GeoJSON feature collection.
    ///
    /// The baseline collection is cloned and every tracked change applied;
    /// the returned snapshot is immutable and unaffected by later edits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InconsistentState`] when a tracked change refers to
    /// a feature the baseline does not have.
    pub async fn to_geojson(&self) -> Result<Arc<geojson::FeatureCollection>> {
        let mut collection = (*self.dataset.to_geojson().await?).clone();

        for (eid, change) in &self.tracker {
            let position = collection
                .features
                .iter()
                .position(|f| feature_id(f) == Some(eid.as_str()));
            match change {
                TrackedChange::Delete => {
                    if let Some(index) = position {
                        collection.features.remove(index);
                    } else if !self.dataset.has(eid).await? {
                        return Err(Error::inconsistent(format!(
                            "tracked delete for unknown feature {eid}"
                        )));
                    }
                    // A baseline feature without geometry has no collection
                    // entry to remove; the delete still applies.
                }
                TrackedChange::Insert(feature) => {
                    let rendered =
                        feature.to_geojson(self.dataset.crss(), self.dataset.reprojector())?;
                    if let Some(rendered) = rendered {
                        collection.features.push(rendered);
                    }
                }
                TrackedChange::Update { .. } => {
                    if position.is_none() && !self.dataset.has(eid).await? {
                        return Err(Error::inconsistent(format!(
                            "tracked update for unknown feature {eid}"
                        )));
                    }
                    let overlaid = self.get(eid).await?;
                    let rendered =
                        overlaid.to_geojson(self.dataset.crss(), self.dataset.reprojector())?;
                    if let Some(index) = position {
                        collection.features.remove(index);
                    }
                    if let Some(rendered) = rendered {
                        collection.features.push(rendered);
                    }
                }
            }
        }
        Ok(Arc::new(collection))
    }

    /// Renders this working copy's tracked changes as the per-dataset diff
    /// body: `{}` when clean, else `{"feature": [..changes..]}`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InconsistentState`] when the tracker refers to
    /// baseline rows that do not exist.
    pub async fn dataset_diff(&self) -> Result<Value> {
        if self.tracker.is_empty() {
            return Ok(json!({}));
        }

        let schema = self.dataset.schema().clone();
        let geometry_key = schema.primary_geometry().map(|e| e.name.clone());
        let mut changes: Vec<Value> = Vec::new();

        for (eid, change) in &self.tracker {
            match change {
                TrackedChange::Insert(feature) => {
                    // An insert replacing a tracked delete still shadows a
                    // baseline row; that row's removal is part of the edit.
                    if self.dataset.has(eid).await? {
                        let baseline = self.require_baseline(eid).await?;
                        changes.push(json!({"--": primary_keys_object(&baseline)?}));
                    }
                    let mut object = Map::new();
                    insert_full_row(&mut object, feature, geometry_key.as_deref())?;
                    changes.push(json!({"++": Value::Object(object)}));
                }
                TrackedChange::Delete => {
                    let baseline = self.require_baseline(eid).await?;
                    changes.push(json!({"--": primary_keys_object(&baseline)?}));
                }
                TrackedChange::Update {
                    properties,
                    geometry,
                } => {
                    let baseline = self.require_baseline(eid).await?;

                    let pk_changed = baseline.ids().iter().any(|(name, old)| {
                        properties
                            .get(name)
                            .is_some_and(|new| !row_values_equal(old, new))
                    });

                    if pk_changed {
                        // Identity changes are never in-place: emit the old
                        // row's delete and the overlaid row's insert.
                        changes.push(json!({"--": primary_keys_object(&baseline)?}));

                        let mut overlaid = baseline.clone();
                        apply_overlay(&mut overlaid, properties, geometry.as_ref());
                        let mut object = Map::new();
                        insert_full_row(&mut object, &overlaid, geometry_key.as_deref())?;
                        changes.push(json!({"++": Value::Object(object)}));
                        continue;
                    }

                    let mut object = primary_keys_map(&baseline)?;
                    if let (Some(key), Some(new_geometry)) = (geometry_key.as_deref(), geometry) {
                        object.insert(
                            key.to_string(),
                            Value::String(geometry::wkb_hex(new_geometry)?),
                        );
                    }
                    for entry in schema.non_primary_key_entries() {
                        if let Some(value) = properties.get(&entry.name) {
                            if !object.contains_key(&entry.name) {
                                object.insert(entry.name.clone(), value.to_diff_json()?);
                            }
                        }
                    }
                    changes.push(json!({"+": Value::Object(object)}));
                }
            }
        }

        Ok(json!({"feature": changes}))
    }

    /// Renders the full canonical patch document for this dataset.
    ///
    /// # Errors
    ///
    /// Propagates [`WorkingFeatureCollection::dataset_diff`] failures.
    pub async fn to_patch(&self, base: Option<&str>) -> Result<Value> {
        let mut datasets = Map::new();
        datasets.insert(self.dataset.id().to_string(), self.dataset_diff().await?);
        Ok(json!({
            "kart.patch/v1": {"base": base, "crs": "EPSG:4326"},
            "kart.diff/v1+hexwkb": Value::Object(datasets),
        }))
    }

    /// The collection's dominant geometry type as a GeoJSON type name, or
    /// `None` for a dataset with no geometry column.
    ///
    /// A schema that pins a concrete geometry type decides directly; a
    /// generic `GEOMETRY` column takes the type of the first feature seen.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unsupported`] when the schema declares
    /// `GEOMETRYCOLLECTION`.
    pub async fn dominant_geometry_type(&mut self) -> Result<Option<String>> {
        if let Some(cached) = &self.dominant_cache {
            return Ok(cached.clone());
        }
        let resolved = self.resolve_dominant_type().await?;
        self.dominant_cache = Some(resolved.clone());
        Ok(resolved)
    }

    async fn resolve_dominant_type(&self) -> Result<Option<String>> {
        let Some(entry) = self.dataset.schema().primary_geometry() else {
            return Ok(None);
        };
        let token = match &entry.data_type {
            DataType::Geometry { geometry_type, .. } => geometry_type.as_str(),
            _ => return Ok(None),
        };
        let base = token.split_whitespace().next().unwrap_or("");
        match base {
            "GEOMETRYCOLLECTION" => Err(Error::unsupported(
                "GeometryCollection datasets are not supported",
            )),
            "GEOMETRY" | "" => {
                // Generic column: adopt the first concrete geometry seen.
                for feature in self.tracker.values() {
                    if let TrackedChange::Insert(inserted) = feature {
                        if let Some(geometry) = inserted.geometry() {
                            return Ok(Some(geojson_type_name(&geometry.value).to_string()));
                        }
                    }
                }
                let mut rows = self.dataset.features();
                while let Some(row) = rows.next().await {
                    if let Some(geometry) = row?.geometry() {
                        return Ok(Some(geojson_type_name(&geometry.value).to_string()));
                    }
                }
                Ok(None)
            }
            wkt => Ok(Some(wkt_to_geojson_type(wkt)?.to_string())),
        }
    }

    async fn check_geometry_type(&mut self, geometry: &geojson::Geometry) -> Result<()> {
        if matches!(geometry.value, geojson::Value::GeometryCollection(_)) {
            return Err(Error::unsupported(
                "GeometryCollection features are not supported",
            ));
        }
        if let Some(dominant) = self.dominant_geometry_type().await? {
            let actual = geojson_type_name(&geometry.value);
            if actual != dominant {
                return Err(Error::InvalidInput(format!(
                    "geometry type {actual} does not match the collection type {dominant}"
                )));
            }
        }
        Ok(())
    }

    /// The pre-overlay feature used for no-op stripping: the baseline row,
    /// or the tracked insert when the feature only exists in memory.
    async fn baseline_for(&self, eid: &str) -> Result<Feature> {
        match self.tracker.get(eid) {
            Some(TrackedChange::Insert(feature)) => Ok(feature.clone()),
            _ => self.dataset.get(eid).await,
        }
    }

    async fn require_baseline(&self, eid: &str) -> Result<Feature> {
        self.dataset.get(eid).await.map_err(|e| match e {
            Error::NotFound(_) => Error::inconsistent(format!(
                "tracked change refers to feature {eid} missing from the baseline"
            )),
            other => other,
        })
    }

    fn publish(&self, kind: FeatureEventKind, eid: &str) {
        let payload = FeatureEvent {
            kind,
            eid: eid.to_string(),
            dataset: self.dataset.id().to_string(),
        };
        self.events.publish(kind.event_name(), &payload);
        self.events.publish(FEATURE_EVENT, &payload);
    }
}

/// Applies a tracked update to a feature in place.
fn apply_overlay(
    feature: &mut Feature,
    properties: &BTreeMap<String, RowValue>,
    geometry: Option<&geojson::Geometry>,
) {
    let geometry_column = feature.record().geometry_column.clone();
    let record = feature.record_mut();
    for (name, value) in properties {
        if let Some(slot) = record.ids.iter_mut().find(|(n, _)| n == name) {
            slot.1 = value.clone();
        } else {
            record.properties.insert(name.clone(), value.clone());
        }
    }
    if let (Some(column), Some(geometry)) = (geometry_column, geometry) {
        record
            .properties
            .insert(column, RowValue::Geometry(Box::new(geometry.clone())));
    }
}

/// Compares a candidate value against a feature's current value by wire
/// form.
fn equals_in_feature(feature: &Feature, name: &str, candidate: &RowValue) -> bool {
    let current = feature.record().value(name).cloned().unwrap_or(RowValue::Null);
    row_values_equal(&current, candidate)
}

fn row_values_equal(a: &RowValue, b: &RowValue) -> bool {
    match (a.to_wire_json(), b.to_wire_json()) {
        (Ok(a), Ok(b)) => values_equal(&a, &b),
        _ => false,
    }
}

/// Emits a full row: primary keys in schema order, then the primary
/// geometry key, then the remaining properties, never overwriting a key
/// already present. Values take their diff rendering (hex blobs).
fn insert_full_row(
    object: &mut Map<String, Value>,
    feature: &Feature,
    geometry_key: Option<&str>,
) -> Result<()> {
    for (name, value) in feature.ids() {
        object.insert(name.clone(), value.to_diff_json()?);
    }
    if let Some(key) = geometry_key {
        if !object.contains_key(key) {
            let rendered = match feature.record().value(key) {
                Some(RowValue::Geometry(g)) => Value::String(geometry::wkb_hex(g)?),
                _ => Value::Null,
            };
            object.insert(key.to_string(), rendered);
        }
    }
    let schema = feature.schema().clone();
    for entry in schema.non_primary_key_entries() {
        if object.contains_key(&entry.name) {
            continue;
        }
        if Some(entry.name.as_str()) == geometry_key {
            continue;
        }
        let value = feature
            .record()
            .value(&entry.name)
            .cloned()
            .unwrap_or(RowValue::Null);
        object.insert(entry.name.clone(), value.to_diff_json()?);
    }
    Ok(())
}

/// Primary keys as a JSON object, in schema key order; missing keys render
/// as null.
fn primary_keys_map(feature: &Feature) -> Result<Map<String, Value>> {
    let mut object = Map::new();
    for (name, value) in feature.ids() {
        object.insert(name.clone(), value.to_diff_json()?);
    }
    Ok(object)
}

fn primary_keys_object(feature: &Feature) -> Result<Value> {
    primary_keys_map(feature).map(Value::Object)
}

fn feature_id(feature: &geojson::Feature) -> Option<&str> {
    match &feature.id {
        Some(geojson::feature::Id::String(id)) => Some(id.as_str()),
        _ => None,
    }
}

fn geojson_type_name(value: &geojson::Value) -> &'static str {
    match value {
        geojson::Value::Point(_) => "Point",
        geojson::Value::MultiPoint(_) => "MultiPoint",
        geojson::Value::LineString(_) => "LineString",
        geojson::Value::MultiLineString(_) => "MultiLineString",
        geojson::Value::Polygon(_) => "Polygon",
        geojson::Value::MultiPolygon(_) => "MultiPolygon",
        geojson::Value::GeometryCollection(_) => "GeometryCollection",
    }
}

fn wkt_to_geojson_type(token: &str) -> Result<&'static str> {
    Ok(match token {
        "POINT" => "Point",
        "MULTIPOINT" => "MultiPoint",
        "LINESTRING" => "LineString",
        "MULTILINESTRING" => "MultiLineString",
        "POLYGON" => "Polygon",
        "MULTIPOLYGON" => "MultiPolygon",
        other => {
            return Err(Error::unsupported(format!(
                "geometry type {other} has no GeoJSON equivalent"
            )))
        }
    })
}
