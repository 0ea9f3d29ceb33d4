//! Diff synthesis contracts for the `kart.diff/v1+hexwkb` document.
//!
//! # Invariants Tested
//!
//! 1. Inserts emit one `++` whose keys are primary keys (schema order),
//!    then the primary geometry key, then remaining properties
//! 2. Deletes emit one `--` holding every primary key
//! 3. Primary-key identity changes split into `--` plus `++`
//! 4. Update-then-delete nets to a single `--`; insert-then-delete nets to
//!    an empty diff
//! 5. The repository merges per-dataset diffs under one patch header

mod common;

use common::{Fixture, DATASET_ID};
use meridian_core::ObjectSource;
use meridian_dataset::{Repository, RepositoryOptions, RowValue, WorkingFeatureCollection};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

fn feature_changes(diff: &Value) -> &Vec<Value> {
    diff.get("feature")
        .and_then(Value::as_array)
        .expect("feature change list")
}

fn object_keys(value: &Value) -> Vec<&str> {
    value
        .as_object()
        .expect("object")
        .keys()
        .map(String::as_str)
        .collect()
}

#[tokio::test]
async fn contract_untouched_working_copy_has_empty_diff() {
    let fixture = Fixture::new();
    fixture.write_feature(1, Some("Alice"), Some([174.0, -41.0]));
    let dataset = fixture.open().await;
    let working = WorkingFeatureCollection::new(dataset);

    assert_eq!(working.dataset_diff().await.expect("diff"), json!({}));

    let patch = working.to_patch(None).await.expect("patch");
    assert_eq!(patch["kart.patch/v1"]["base"], Value::Null);
    assert_eq!(patch["kart.patch/v1"]["crs"], json!("EPSG:4326"));
    assert_eq!(patch["kart.diff/v1+hexwkb"][DATASET_ID], json!({}));
}

#[tokio::test]
async fn contract_insert_emits_one_plus_plus_in_canonical_key_order() {
    let fixture = Fixture::new();
    fixture.write_feature(1, Some("Alice"), Some([174.0, -41.0]));
    let dataset = fixture.open().await;
    let mut working = WorkingFeatureCollection::new(dataset);

    working
        .add(fixture.make_feature(50, Some("Carol"), Some([173.5, -42.25])))
        .await
        .expect("add");

    let diff = working.dataset_diff().await.expect("diff");
    let changes = feature_changes(&diff);
    assert_eq!(changes.len(), 1);

    let insert = changes[0].get("++").expect("++ entry");
    assert_eq!(
        object_keys(insert),
        vec!["fid", "geom", "name", "payload"],
        "primary keys first, then the geometry key, then properties"
    );
    assert_eq!(insert["fid"], json!(50));
    assert_eq!(insert["name"], json!("Carol"));

    let wkb = insert["geom"].as_str().expect("hex geometry");
    assert!(wkb.chars().all(|c| c.is_ascii_hexdigit()));
    assert_eq!(wkb.len(), 42, "2D point WKB is 21 bytes");
}

#[tokio::test]
async fn contract_delete_emits_one_minus_minus_with_primary_keys() {
    let fixture = Fixture::new();
    let eid = fixture.write_feature(12345, Some("Alice"), Some([174.0, -41.0]));
    let dataset = fixture.open().await;
    let mut working = WorkingFeatureCollection::new(dataset);

    working.delete(&eid).await.expect("delete");

    let diff = working.dataset_diff().await.expect("diff");
    let changes = feature_changes(&diff);
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0], json!({"--": {"fid": 12345}}));
}

#[tokio::test]
async fn contract_property_update_emits_plus_with_keys_and_changes_only() {
    let fixture = Fixture::new();
    let eid = fixture.write_feature(12345, Some("Alice"), Some([174.0, -41.0]));
    let dataset = fixture.open().await;
    let mut working = WorkingFeatureCollection::new(dataset);

    let mut props = BTreeMap::new();
    props.insert(
        "name".to_string(),
        Some(RowValue::Text("Alicia".to_string())),
    );
    working
        .update_properties(&eid, props, true)
        .await
        .expect("update");

    let diff = working.dataset_diff().await.expect("diff");
    let changes = feature_changes(&diff);
    assert_eq!(changes.len(), 1);

    let update = changes[0].get("+").expect("+ entry");
    assert_eq!(
        object_keys(update),
        vec!["fid", "name"],
        "unchanged geometry is omitted from the update"
    );
    assert_eq!(update["fid"], json!(12345));
    assert_eq!(update["name"], json!("Alicia"));
    assert!(changes[0].get("-").is_none(), "the minus side is omitted");
}

#[tokio::test]
async fn contract_geometry_update_emits_hex_wkb_under_the_geometry_key() {
    let fixture = Fixture::new();
    let eid = fixture.write_feature(12345, Some("Alice"), Some([174.0, -41.0]));
    let dataset = fixture.open().await;
    let mut working = WorkingFeatureCollection::new(dataset);

    let moved = geojson::Geometry::new(geojson::Value::Point(vec![175.0, -40.5]));
    working.update_geometry(&eid, moved).await.expect("update");

    let diff = working.dataset_diff().await.expect("diff");
    let update = feature_changes(&diff)[0].get("+").expect("+ entry");
    assert_eq!(object_keys(update), vec!["fid", "geom"]);
    let wkb = update["geom"].as_str().expect("hex geometry");
    assert!(wkb.chars().all(|c| c.is_ascii_hexdigit()));
}

#[tokio::test]
async fn contract_primary_key_change_splits_into_delete_and_insert() {
    let fixture = Fixture::new();
    let eid = fixture.write_feature(12345, Some("Alice"), Some([174.0, -41.0]));
    let dataset = fixture.open().await;
    let mut working = WorkingFeatureCollection::new(dataset);

    let mut props = BTreeMap::new();
    props.insert("fid".to_string(), Some(RowValue::Int(999)));
    props.insert(
        "name".to_string(),
        Some(RowValue::Text("Renumbered".to_string())),
    );
    working
        .update_properties(&eid, props, true)
        .await
        .expect("update");

    let diff = working.dataset_diff().await.expect("diff");
    let changes = feature_changes(&diff);
    assert_eq!(changes.len(), 2, "identity change is never in-place");

    assert_eq!(changes[0], json!({"--": {"fid": 12345}}));

    let insert = changes[1].get("++").expect("++ entry");
    assert_eq!(object_keys(insert), vec!["fid", "geom", "name", "payload"]);
    assert_eq!(insert["fid"], json!(999));
    assert_eq!(insert["name"], json!("Renumbered"));
    assert!(insert["geom"].is_string(), "overlay keeps the old geometry");
}

#[tokio::test]
async fn contract_blob_values_render_as_hex_in_the_diff() {
    let fixture = Fixture::new();
    let eid =
        fixture.write_feature_with_payload(12345, Some("Alice"), Some([174.0, -41.0]), None);
    let dataset = fixture.open().await;
    let mut working = WorkingFeatureCollection::new(dataset);

    // Inserted row: the blob lands in the `++` object as lowercase hex,
    // not base64 ("010203" vs "AQID").
    working
        .add(fixture.make_feature_with_payload(
            50,
            Some("Carol"),
            Some([173.0, -42.0]),
            Some(&[1, 2, 3]),
        ))
        .await
        .expect("add");

    // Updated row: same rendering under the `+` entry.
    let mut props = BTreeMap::new();
    props.insert(
        "payload".to_string(),
        Some(RowValue::Blob(vec![0x0a, 0x0b])),
    );
    working
        .update_properties(&eid, props, true)
        .await
        .expect("update");

    let diff = working.dataset_diff().await.expect("diff");
    let changes = feature_changes(&diff);
    assert_eq!(changes.len(), 2);

    // Changes list in eid order: fid 50 shards under 0/3/, fid 12345
    // under 3/0/, so the insert precedes the update.
    let insert = changes[0].get("++").expect("++ entry");
    assert_eq!(insert["payload"], json!("010203"));
    assert_ne!(insert["payload"], json!("AQID"));

    let update = changes[1].get("+").expect("+ entry");
    assert_eq!(object_keys(update), vec!["fid", "payload"]);
    assert_eq!(update["payload"], json!("0a0b"));
}

#[tokio::test]
async fn contract_update_then_delete_nets_to_a_single_delete() {
    let fixture = Fixture::new();
    let eid = fixture.write_feature(12345, Some("Alice"), Some([174.0, -41.0]));
    let dataset = fixture.open().await;
    let mut working = WorkingFeatureCollection::new(dataset);

    let mut props = BTreeMap::new();
    props.insert("name".to_string(), Some(RowValue::Text("Alicia".into())));
    working
        .update_properties(&eid, props, true)
        .await
        .expect("update");
    working.delete(&eid).await.expect("delete");

    let diff = working.dataset_diff().await.expect("diff");
    let changes = feature_changes(&diff);
    assert_eq!(changes.len(), 1);
    assert!(changes[0].get("--").is_some());
    assert!(changes[0].get("+").is_none());
}

#[tokio::test]
async fn contract_insert_then_delete_nets_to_an_empty_diff() {
    let fixture = Fixture::new();
    fixture.write_feature(1, Some("Alice"), Some([174.0, -41.0]));
    let dataset = fixture.open().await;
    let mut working = WorkingFeatureCollection::new(dataset);

    let feature = fixture.make_feature(50, Some("Carol"), Some([173.0, -42.0]));
    let eid = feature.eid().to_string();
    working.add(feature).await.expect("add");
    working.delete(&eid).await.expect("delete");

    assert_eq!(working.dataset_diff().await.expect("diff"), json!({}));
}

#[tokio::test]
async fn contract_repository_merges_dataset_diffs_under_one_header() {
    let fixture = Fixture::new();
    let eid = fixture.write_feature(12345, Some("Alice"), Some([174.0, -41.0]));

    let mut repo = Repository::new(
        fixture.object_source(),
        RepositoryOptions {
            base_commit: Some("abc123".to_string()),
            ..RepositoryOptions::default()
        },
    );

    assert!(repo.has(DATASET_ID).await.expect("has"));
    assert!(!repo.has("not-a-dataset").await.expect("has"));
    assert_eq!(
        repo.dataset_names().await.expect("names"),
        vec![DATASET_ID.to_string()]
    );

    let working = repo.get(DATASET_ID).await.expect("get");
    working.delete(&eid).await.expect("delete");

    let diff = repo.to_diff().await.expect("merged diff");
    assert_eq!(diff["kart.patch/v1"]["base"], json!("abc123"));
    assert_eq!(diff["kart.patch/v1"]["crs"], json!("EPSG:4326"));
    assert_eq!(
        diff["kart.diff/v1+hexwkb"][DATASET_ID]["feature"][0],
        json!({"--": {"fid": 12345}})
    );
}

#[tokio::test]
async fn contract_repository_get_rejects_invalid_names() {
    let source: Arc<dyn ObjectSource> = Arc::new(meridian_core::MemorySource::new());
    let mut repo = Repository::new(source, RepositoryOptions::default());
    assert!(repo.get("missing").await.is_err());
    assert!(repo.dataset_names().await.expect("names").is_empty());
}
