//! Dataset layout and read-path contracts.
//!
//! # Invariants Tested
//!
//! 1. Layout validation requires title, schema, path structure and a
//!    non-empty legend directory
//! 2. Loading surfaces metadata (title, description, counts) and verifies
//!    legend hashes
//! 3. The terminal-branch walk yields every row lazily and random access
//!    agrees with it
//! 4. Projection follows the worked single-integer-key example end to end
//! 5. Spatial selection returns exactly the features whose boxes intersect

mod common;

use common::{Fixture, DATASET_ID};
use meridian_core::{content_hash, Error, MemorySource};
use meridian_dataset::{DatasetOptions, RowValue, TableDatasetV3};
use std::sync::Arc;

#[tokio::test]
async fn contract_layout_validation_requires_all_meta_files() {
    let fixture = Fixture::new();
    assert!(
        TableDatasetV3::is_valid_dataset(fixture.source.as_ref(), DATASET_ID)
            .await
            .expect("check")
    );

    // A tree missing schema.json is not a dataset.
    let partial = MemorySource::new();
    partial.insert("bare/.table-dataset/meta/title", "Bare");
    partial.insert("bare/.table-dataset/meta/path-structure.json", "{}");
    assert!(!TableDatasetV3::is_valid_dataset(&partial, "bare")
        .await
        .expect("check"));

    // An empty legend directory fails the check too (legends are implicit
    // directories in the memory source, so absence is equivalent).
    let no_legend = MemorySource::new();
    no_legend.insert("x/.table-dataset/meta/title", "X");
    no_legend.insert("x/.table-dataset/meta/schema.json", common::SCHEMA_JSON);
    no_legend.insert(
        "x/.table-dataset/meta/path-structure.json",
        common::PATH_STRUCTURE_JSON,
    );
    assert!(!TableDatasetV3::is_valid_dataset(&no_legend, "x")
        .await
        .expect("check"));
}

#[tokio::test]
async fn contract_load_surfaces_metadata() {
    let fixture = Fixture::new();
    fixture.write_feature(1, Some("Aurora Terrace"), Some([174.77, -41.28]));
    fixture.write_feature(2, Some("Bowen Street"), Some([174.78, -41.27]));

    let dataset = fixture.open().await;
    assert_eq!(dataset.title(), "Roads");
    assert_eq!(dataset.description(), Some("Road centrelines"));
    assert_eq!(dataset.feature_count(), 2);
    assert_eq!(dataset.legends().len(), 1);
    assert!(dataset.crs("EPSG:4326").is_some());
    assert_eq!(dataset.schema().primary_key_names(), vec!["fid"]);
}

#[tokio::test]
async fn contract_corrupt_legend_hash_aborts_load() {
    let fixture = Fixture::new();

    // A legend stored under the wrong name must be rejected.
    let bytes = fixture.legend.to_bytes();
    let wrong_stem = content_hash(b"something else entirely");
    fixture
        .source
        .insert(fixture.layout.legend(&wrong_stem), bytes);

    let err = TableDatasetV3::open(
        fixture.object_source(),
        DATASET_ID,
        DatasetOptions::default(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, Error::InvalidFileContents { .. }));
}

#[tokio::test]
async fn contract_walk_and_random_access_agree() {
    let fixture = Fixture::new();
    let mut eids = vec![
        fixture.write_feature(12345, Some("Alice"), Some([174.0, -41.0])),
        fixture.write_feature(7, Some("Bob"), Some([175.0, -40.0])),
        fixture.write_feature(8, None, None),
    ];
    eids.sort();

    let dataset = fixture.open().await;

    let mut walked = Vec::new();
    let mut rows = dataset.features();
    while let Some(row) = rows.next().await {
        walked.push(row.expect("row decodes").eid().to_string());
    }
    walked.sort();
    assert_eq!(walked, eids);

    for eid in &eids {
        assert!(dataset.has(eid).await.expect("has"));
        let feature = dataset.get(eid).await.expect("get");
        assert_eq!(feature.eid(), eid);
    }
    assert!(!dataset.has("0/0/AAAA").await.expect("has"));
    assert!(matches!(
        dataset.get("0/0/AAAA").await.unwrap_err(),
        Error::NotFound(_)
    ));
}

#[tokio::test]
async fn contract_single_integer_key_example() {
    // pk 12345 under {int, 16 branches, 2 levels, hex} lands at
    // 3/0/<base64(pack([12345]))> and projects to typed values.
    let fixture = Fixture::new();
    let eid = fixture.write_feature(12345, Some("Alice"), Some([174.0, -41.0]));
    assert!(eid.starts_with("3/0/"));

    let dataset = fixture.open().await;
    let feature = dataset.get(&eid).await.expect("get");

    assert_eq!(
        feature.ids(),
        &[("fid".to_string(), RowValue::Int(12345))]
    );
    let fid = feature.integer("fid").expect("accessor");
    assert_eq!(fid.data, Some(12345));
    assert!(fid.is_primary_key);

    let name = feature.text("name").expect("accessor");
    assert_eq!(name.data, Some("Alice".to_string()));

    assert_eq!(feature.record().crs.as_deref(), Some("EPSG:4326"));
    assert_eq!(feature.record().geometry_column.as_deref(), Some("geom"));
}

#[tokio::test]
async fn contract_unregistered_crs_resolves_to_none() {
    let fixture = Fixture::new();
    let schema_json = common::SCHEMA_JSON.replace("EPSG:4326", "EPSG:99999");
    fixture.source.insert(fixture.layout.schema(), schema_json);
    let eid = fixture.write_feature(1, Some("Alice"), Some([174.0, -41.0]));

    let dataset = fixture.open().await;
    let feature = dataset.get(&eid).await.expect("get");
    assert_eq!(feature.record().crs, None);
}

#[tokio::test]
async fn contract_spatial_selection_returns_intersecting_features() {
    let fixture = Fixture::new();
    let wellington = fixture.write_feature(1, Some("Wellington"), Some([174.77, -41.28]));
    let _auckland = fixture.write_feature(2, Some("Auckland"), Some([174.76, -36.84]));
    let _no_geom = fixture.write_feature(3, Some("Nowhere"), None);

    let dataset = fixture.open().await;
    let hits = dataset
        .select_intersection([174.0, -42.0, 175.0, -41.0])
        .await
        .expect("query");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].eid(), wellington);

    let all = dataset
        .select_intersection([170.0, -45.0, 180.0, -35.0])
        .await
        .expect("query");
    assert_eq!(all.len(), 2, "features without geometry are not indexed");
}

#[tokio::test]
async fn contract_spatial_index_cache_is_persisted_atomically() {
    let cache = tempfile::tempdir().expect("tempdir");
    let fixture = Fixture::new();
    fixture.write_feature(1, Some("Wellington"), Some([174.77, -41.28]));

    let dataset = TableDatasetV3::open(
        fixture.object_source(),
        DATASET_ID,
        DatasetOptions {
            cache_dir: Some(cache.path().to_path_buf()),
            ..DatasetOptions::default()
        },
    )
    .await
    .expect("open");

    dataset
        .select_intersection([174.0, -42.0, 175.0, -41.0])
        .await
        .expect("query");

    let cache_file = cache.path().join("spatial-index.json");
    assert!(cache_file.exists(), "index is persisted after first build");
    assert!(
        !cache.path().join("spatial-index.json.tmp").exists(),
        "temp file is renamed away"
    );

    // A fresh dataset instance reuses the persisted index.
    let reopened = TableDatasetV3::open(
        fixture.object_source(),
        DATASET_ID,
        DatasetOptions {
            cache_dir: Some(cache.path().to_path_buf()),
            ..DatasetOptions::default()
        },
    )
    .await
    .expect("open");
    let hits = reopened
        .select_intersection([174.0, -42.0, 175.0, -41.0])
        .await
        .expect("query");
    assert_eq!(hits.len(), 1);
}

#[tokio::test]
async fn contract_to_geojson_is_cached_and_omits_null_geometries() {
    let fixture = Fixture::new();
    fixture.write_feature(1, Some("Alice"), Some([174.0, -41.0]));
    fixture.write_feature(2, Some("Bob"), None);

    let dataset = fixture.open().await;
    let first = dataset.to_geojson().await.expect("collection");
    assert_eq!(first.features.len(), 1);

    let second = dataset.to_geojson().await.expect("collection");
    assert!(Arc::ptr_eq(&first, &second), "collection is cached");
}

#[tokio::test]
async fn contract_composite_key_walk_depth() {
    // A composite-key dataset under {msgpack/hash, 64, 3, base64} stores
    // rows three folder hops down; the walk must find them there.
    let source = Arc::new(MemorySource::new());
    let id = "observations";
    let layout = meridian_dataset::DatasetLayout::new(id);

    let schema_json = r#"[
        {"id": "k1", "name": "site", "dataType": "text", "primaryKeyIndex": 0},
        {"id": "k2", "name": "plot", "dataType": "text", "primaryKeyIndex": 1},
        {"id": "v1", "name": "note", "dataType": "text"}
    ]"#;
    let ps_json = r#"{"scheme": "msgpack/hash", "branches": 64, "levels": 3, "encoding": "base64"}"#;
    let schema = meridian_dataset::Schema::from_json("schema.json", schema_json.as_bytes())
        .expect("schema");
    let path_structure =
        meridian_dataset::PathStructure::from_json("ps.json", ps_json.as_bytes()).expect("ps");
    let legend = schema.to_legend();

    source.insert(layout.title(), "Observations");
    source.insert(layout.schema(), schema_json);
    source.insert(layout.path_structure(), ps_json);
    source.insert(layout.legend(legend.id()), legend.to_bytes());

    let pks = [
        RowValue::Text("A".to_string()),
        RowValue::Text("7".to_string()),
    ];
    let eid = path_structure.eid(&pks).expect("eid");
    let body = rmpv::Value::Array(vec![
        rmpv::Value::String(legend.id().into()),
        rmpv::Value::Array(vec![rmpv::Value::String("clear".into())]),
    ]);
    let mut bytes = Vec::new();
    rmpv::encode::write_value(&mut bytes, &body).expect("encode");
    source.insert(layout.feature(&eid), bytes);

    let dataset = TableDatasetV3::open(
        source.clone() as Arc<dyn meridian_core::ObjectSource>,
        id,
        DatasetOptions::default(),
    )
    .await
    .expect("open");

    let mut rows = dataset.features();
    let row = rows.next().await.expect("one row").expect("decodes");
    assert_eq!(row.eid(), eid);
    assert_eq!(
        row.ids(),
        &[
            ("site".to_string(), RowValue::Text("A".to_string())),
            ("plot".to_string(), RowValue::Text("7".to_string())),
        ]
    );
    assert!(rows.next().await.is_none());
}
