//! Shared fixtures: an in-memory Table Dataset V3 repo built file by file,
//! the same way the on-disk layout stores it.

use std::collections::BTreeMap;
use std::sync::Arc;

use meridian_core::{MemorySource, ObjectSource};
use meridian_dataset::{
    geometry, DatasetLayout, DatasetOptions, Feature, Legend, PathStructure, RowValue, Schema,
    TableDatasetV3,
};

pub const DATASET_ID: &str = "roads";

pub const SCHEMA_JSON: &str = r#"[
    {"id": "a1", "name": "fid", "dataType": "integer", "size": 64, "primaryKeyIndex": 0},
    {"id": "a2", "name": "geom", "dataType": "geometry", "geometryType": "POINT", "geometryCrs": "EPSG:4326"},
    {"id": "a3", "name": "name", "dataType": "text", "length": 40},
    {"id": "a4", "name": "payload", "dataType": "blob"}
]"#;

pub const PATH_STRUCTURE_JSON: &str =
    r#"{"scheme": "int", "branches": 16, "levels": 2, "encoding": "hex"}"#;

pub struct Fixture {
    pub source: Arc<MemorySource>,
    pub layout: DatasetLayout,
    pub schema: Arc<Schema>,
    pub path_structure: PathStructure,
    pub legend: Legend,
}

impl Fixture {
    /// Builds the metadata files for a valid single-integer-key dataset.
    pub fn new() -> Self {
        let source = Arc::new(MemorySource::new());
        let layout = DatasetLayout::new(DATASET_ID);
        let schema =
            Arc::new(Schema::from_json("schema.json", SCHEMA_JSON.as_bytes()).expect("schema"));
        let path_structure =
            PathStructure::from_json("path-structure.json", PATH_STRUCTURE_JSON.as_bytes())
                .expect("path structure");
        let legend = schema.to_legend();

        source.insert(layout.title(), "Roads");
        source.insert(layout.description(), "Road centrelines");
        source.insert(layout.schema(), SCHEMA_JSON);
        source.insert(layout.path_structure(), PATH_STRUCTURE_JSON);
        source.insert(layout.legend(legend.id()), legend.to_bytes());
        source.insert(
            format!("{}/EPSG:4326.wkt", layout.crs_dir()),
            "GEOGCS[\"WGS 84\",DATUM[\"WGS_1984\"]]",
        );

        Self {
            source,
            layout,
            schema,
            path_structure,
            legend,
        }
    }

    /// Writes one feature row file; returns its eid.
    pub fn write_feature(&self, fid: i64, name: Option<&str>, point: Option<[f64; 2]>) -> String {
        self.write_feature_with_payload(fid, name, point, None)
    }

    /// Writes one feature row file including a blob payload; returns its eid.
    pub fn write_feature_with_payload(
        &self,
        fid: i64,
        name: Option<&str>,
        point: Option<[f64; 2]>,
        payload: Option<&[u8]>,
    ) -> String {
        let pks = [RowValue::Int(fid)];
        let eid = self.path_structure.eid(&pks).expect("eid");

        let geometry_value = match point {
            Some([x, y]) => {
                let geometry = geojson::Geometry::new(geojson::Value::Point(vec![x, y]));
                rmpv::Value::Ext(71, geometry::encode_gpkg(&geometry).expect("gpkg"))
            }
            None => rmpv::Value::Nil,
        };
        let name_value = match name {
            Some(n) => rmpv::Value::String(n.into()),
            None => rmpv::Value::Nil,
        };
        let payload_value = match payload {
            Some(bytes) => rmpv::Value::Binary(bytes.to_vec()),
            None => rmpv::Value::Nil,
        };

        // Body: [legendId, [values in legend order: geom, name, payload]].
        let body = rmpv::Value::Array(vec![
            rmpv::Value::String(self.legend.id().into()),
            rmpv::Value::Array(vec![geometry_value, name_value, payload_value]),
        ]);
        let mut bytes = Vec::new();
        rmpv::encode::write_value(&mut bytes, &body).expect("encode body");

        self.source.insert(self.layout.feature(&eid), bytes);
        eid
    }

    pub fn object_source(&self) -> Arc<dyn ObjectSource> {
        self.source.clone()
    }

    pub async fn open(&self) -> Arc<TableDatasetV3> {
        TableDatasetV3::open(
            self.object_source(),
            DATASET_ID,
            DatasetOptions::default(),
        )
        .await
        .expect("dataset opens")
    }

    /// Builds an in-memory feature (not written to the source) for add().
    pub fn make_feature(&self, fid: i64, name: Option<&str>, point: Option<[f64; 2]>) -> Feature {
        self.make_feature_with_payload(fid, name, point, None)
    }

    /// Builds an in-memory feature including a blob payload.
    pub fn make_feature_with_payload(
        &self,
        fid: i64,
        name: Option<&str>,
        point: Option<[f64; 2]>,
        payload: Option<&[u8]>,
    ) -> Feature {
        let pks = vec![RowValue::Int(fid)];
        let eid = self.path_structure.eid(&pks).expect("eid");

        let mut properties = BTreeMap::new();
        properties.insert(
            "geom".to_string(),
            match point {
                Some([x, y]) => RowValue::Geometry(Box::new(geojson::Geometry::new(
                    geojson::Value::Point(vec![x, y]),
                ))),
                None => RowValue::Null,
            },
        );
        properties.insert(
            "name".to_string(),
            name.map_or(RowValue::Null, |n| RowValue::Text(n.to_string())),
        );
        properties.insert(
            "payload".to_string(),
            payload.map_or(RowValue::Null, |b| RowValue::Blob(b.to_vec())),
        );

        Feature::from_record(
            meridian_dataset::FeatureRecord {
                ids: vec![("fid".to_string(), RowValue::Int(fid))],
                properties,
                dropped_keys: Vec::new(),
                geometry_column: Some("geom".to_string()),
                crs: Some("EPSG:4326".to_string()),
                eid,
            },
            self.schema.clone(),
        )
    }
}
