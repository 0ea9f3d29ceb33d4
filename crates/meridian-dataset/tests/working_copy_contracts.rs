//! Working-copy overlay contracts.
//!
//! # Invariants Tested
//!
//! 1. add/delete/update overlay the tracker on the baseline without ever
//!    mutating it
//! 2. Deleting a tracked insert nets to zero; no-op property updates are
//!    never recorded
//! 3. Geometry and property updates for one eid collapse into a single
//!    tracked change
//! 4. Mutations publish their specific event plus the union event
//! 5. Materialized views are immutable snapshots, isolated from later edits

mod common;

use common::Fixture;
use meridian_core::{Error, FeatureEventKind};
use meridian_dataset::{RowValue, TrackedChange, WorkingFeatureCollection};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn props(pairs: &[(&str, Option<RowValue>)]) -> BTreeMap<String, Option<RowValue>> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.clone()))
        .collect()
}

#[tokio::test]
async fn contract_add_makes_feature_visible() {
    let fixture = Fixture::new();
    fixture.write_feature(1, Some("Alice"), Some([174.0, -41.0]));
    let dataset = fixture.open().await;
    let mut working = WorkingFeatureCollection::new(dataset);

    let new_feature = fixture.make_feature(50, Some("Carol"), Some([173.0, -42.0]));
    let eid = new_feature.eid().to_string();

    assert!(!working.has(&eid).await.expect("has"));
    working.add(new_feature.clone()).await.expect("add");
    assert!(working.has(&eid).await.expect("has"));

    let read_back = working.get(&eid).await.expect("get");
    assert_eq!(read_back.ids(), new_feature.ids());
    assert_eq!(read_back.properties(), new_feature.properties());

    // The baseline itself is untouched.
    assert!(!working.dataset().has(&eid).await.expect("baseline has"));
}

#[tokio::test]
async fn contract_add_rejects_existing_and_invalid_features() {
    let fixture = Fixture::new();
    let existing = fixture.write_feature(1, Some("Alice"), Some([174.0, -41.0]));
    let dataset = fixture.open().await;
    let mut working = WorkingFeatureCollection::new(dataset);

    // Present in the baseline.
    let duplicate = fixture.make_feature(1, Some("Imposter"), Some([174.0, -41.0]));
    assert!(matches!(
        working.add(duplicate).await.unwrap_err(),
        Error::InvalidInput(_)
    ));
    let _ = existing;

    // Wrong geometry type for a POINT collection.
    let mut wrong_type = fixture.make_feature(60, Some("Line"), None);
    let line = geojson::Geometry::new(geojson::Value::LineString(vec![
        vec![0.0, 0.0],
        vec![1.0, 1.0],
    ]));
    // Splice the line in as the geometry value.
    {
        let record = wrong_type.record().clone();
        let mut properties = record.properties.clone();
        properties.insert(
            "geom".to_string(),
            RowValue::Geometry(Box::new(line.clone())),
        );
        wrong_type = meridian_dataset::Feature::from_record(
            meridian_dataset::FeatureRecord {
                properties,
                ..record
            },
            fixture.schema.clone(),
        );
    }
    assert!(matches!(
        working.add(wrong_type).await.unwrap_err(),
        Error::InvalidInput(_)
    ));

    // GeometryCollection is categorically unsupported.
    let mut collection_feature = fixture.make_feature(61, Some("GC"), None);
    {
        let record = collection_feature.record().clone();
        let mut properties = record.properties.clone();
        properties.insert(
            "geom".to_string(),
            RowValue::Geometry(Box::new(geojson::Geometry::new(
                geojson::Value::GeometryCollection(vec![]),
            ))),
        );
        collection_feature = meridian_dataset::Feature::from_record(
            meridian_dataset::FeatureRecord {
                properties,
                ..record
            },
            fixture.schema.clone(),
        );
    }
    assert!(matches!(
        working.add(collection_feature).await.unwrap_err(),
        Error::Unsupported { .. }
    ));

    // Schema-invalid feature (text over length).
    let too_long = fixture.make_feature(
        62,
        Some("a name that is much, much longer than forty characters allows"),
        Some([174.0, -41.0]),
    );
    assert!(matches!(
        working.add(too_long).await.unwrap_err(),
        Error::Validation { .. }
    ));
}

#[tokio::test]
async fn contract_delete_of_tracked_insert_nets_to_zero() {
    let fixture = Fixture::new();
    fixture.write_feature(1, Some("Alice"), Some([174.0, -41.0]));
    let dataset = fixture.open().await;
    let mut working = WorkingFeatureCollection::new(dataset);

    let feature = fixture.make_feature(50, Some("Carol"), Some([173.0, -42.0]));
    let eid = feature.eid().to_string();

    working.add(feature).await.expect("add");
    assert_eq!(working.tracked_len(), 1);

    working.delete(&eid).await.expect("delete");
    assert_eq!(working.tracked_len(), 0, "insert + delete cancel out");
    assert!(!working.has(&eid).await.expect("has"));

    // Deleting again is NotFound.
    assert!(matches!(
        working.delete(&eid).await.unwrap_err(),
        Error::NotFound(_)
    ));
}

#[tokio::test]
async fn contract_delete_of_baseline_feature_is_tracked() {
    let fixture = Fixture::new();
    let eid = fixture.write_feature(1, Some("Alice"), Some([174.0, -41.0]));
    let dataset = fixture.open().await;
    let mut working = WorkingFeatureCollection::new(dataset);

    working.delete(&eid).await.expect("delete");
    assert!(!working.has(&eid).await.expect("has"));
    assert!(matches!(
        working.get(&eid).await.unwrap_err(),
        Error::NotFound(_)
    ));
    assert!(matches!(
        working.tracked(&eid),
        Some(TrackedChange::Delete)
    ));

    // The baseline still has the row.
    assert!(working.dataset().has(&eid).await.expect("baseline"));
}

#[tokio::test]
async fn contract_no_op_property_update_records_nothing() {
    let fixture = Fixture::new();
    let eid = fixture.write_feature(1, Some("Alice"), Some([174.0, -41.0]));
    let dataset = fixture.open().await;
    let mut working = WorkingFeatureCollection::new(dataset);

    working
        .update_properties(
            &eid,
            props(&[
                ("name", Some(RowValue::Text("Alice".to_string()))),
                ("ghost", None),
            ]),
            true,
        )
        .await
        .expect("update");
    assert_eq!(working.tracked_len(), 0, "baseline-equal values are stripped");
}

#[tokio::test]
async fn contract_geometry_then_properties_is_one_tracked_update() {
    let fixture = Fixture::new();
    let eid = fixture.write_feature(1, Some("Alice"), Some([174.0, -41.0]));
    let dataset = fixture.open().await;
    let mut working = WorkingFeatureCollection::new(dataset);

    let moved = geojson::Geometry::new(geojson::Value::Point(vec![175.0, -40.5]));
    working.update_geometry(&eid, moved.clone()).await.expect("geometry");
    working
        .update_properties(
            &eid,
            props(&[("name", Some(RowValue::Text("Alicia".to_string())))]),
            true,
        )
        .await
        .expect("properties");

    assert_eq!(working.tracked_len(), 1);
    let Some(TrackedChange::Update {
        properties,
        geometry,
    }) = working.tracked(&eid)
    else {
        panic!("expected a single update");
    };
    assert_eq!(geometry.as_ref(), Some(&moved));
    assert_eq!(
        properties.get("name"),
        Some(&RowValue::Text("Alicia".to_string()))
    );

    // The overlaid view reflects both.
    let view = working.get(&eid).await.expect("get");
    assert_eq!(
        view.properties().get("name"),
        Some(&RowValue::Text("Alicia".to_string()))
    );
    assert_eq!(view.geometry(), Some(&moved));
}

#[tokio::test]
async fn contract_geometry_type_change_is_rejected() {
    let fixture = Fixture::new();
    let eid = fixture.write_feature(1, Some("Alice"), Some([174.0, -41.0]));
    let dataset = fixture.open().await;
    let mut working = WorkingFeatureCollection::new(dataset);

    let line = geojson::Geometry::new(geojson::Value::LineString(vec![
        vec![0.0, 0.0],
        vec![1.0, 1.0],
    ]));
    assert!(matches!(
        working.update_geometry(&eid, line).await.unwrap_err(),
        Error::InvalidInput(_)
    ));
}

#[tokio::test]
async fn contract_replace_mode_clears_unnamed_properties() {
    let fixture = Fixture::new();
    let eid = fixture.write_feature(1, Some("Alice"), Some([174.0, -41.0]));
    let dataset = fixture.open().await;
    let mut working = WorkingFeatureCollection::new(dataset);

    working
        .update_properties(&eid, props(&[]), false)
        .await
        .expect("replace");

    let view = working.get(&eid).await.expect("get");
    assert_eq!(view.properties().get("name"), Some(&RowValue::Null));
    // The geometry column is not touched by property replacement.
    assert!(view.geometry().is_some());
}

#[tokio::test]
async fn contract_validation_failures_reject_the_mutation() {
    let fixture = Fixture::new();
    let eid = fixture.write_feature(1, Some("Alice"), Some([174.0, -41.0]));
    let dataset = fixture.open().await;
    let mut working = WorkingFeatureCollection::new(dataset);

    let err = working
        .update_properties(
            &eid,
            props(&[(
                "name",
                Some(RowValue::Text(
                    "a name that is much, much longer than forty characters allows".to_string(),
                )),
            )]),
            true,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation { .. }));

    // Nothing was recorded; the view still shows the baseline value.
    assert_eq!(working.tracked_len(), 0);
    let view = working.get(&eid).await.expect("get");
    assert_eq!(
        view.properties().get("name"),
        Some(&RowValue::Text("Alice".to_string()))
    );
}

#[tokio::test]
async fn contract_mutations_publish_specific_and_union_events() {
    let fixture = Fixture::new();
    let eid = fixture.write_feature(1, Some("Alice"), Some([174.0, -41.0]));
    let dataset = fixture.open().await;
    let mut working = WorkingFeatureCollection::new(dataset);

    let added = Arc::new(AtomicUsize::new(0));
    let updated = Arc::new(AtomicUsize::new(0));
    let any = Arc::new(AtomicUsize::new(0));

    let counter = added.clone();
    working.events().subscribe("feature:added", "t", move |event| {
        assert_eq!(event.kind, FeatureEventKind::Added);
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let counter = updated.clone();
    working
        .events()
        .subscribe("feature:updated", "t", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
    let counter = any.clone();
    working.events().subscribe("feature", "t", move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    working
        .add(fixture.make_feature(50, Some("Carol"), Some([173.0, -42.0])))
        .await
        .expect("add");
    working
        .update_properties(
            &eid,
            props(&[("name", Some(RowValue::Text("Alicia".to_string())))]),
            true,
        )
        .await
        .expect("update");

    assert_eq!(added.load(Ordering::SeqCst), 1);
    assert_eq!(updated.load(Ordering::SeqCst), 1);
    assert_eq!(any.load(Ordering::SeqCst), 2, "union event fires for both");

    // Unsubscribing stops delivery.
    working.events().unsubscribe("feature", "t");
    working.delete(&eid).await.expect("delete");
    assert_eq!(any.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn contract_materialized_view_is_a_snapshot() {
    let fixture = Fixture::new();
    let eid = fixture.write_feature(1, Some("Alice"), Some([174.0, -41.0]));
    fixture.write_feature(2, Some("Bob"), Some([175.0, -40.0]));
    let dataset = fixture.open().await;
    let mut working = WorkingFeatureCollection::new(dataset);

    let before = working.to_geojson().await.expect("view");
    assert_eq!(before.features.len(), 2);

    working.delete(&eid).await.expect("delete");
    working
        .add(fixture.make_feature(50, Some("Carol"), Some([173.0, -42.0])))
        .await
        .expect("add");

    let after = working.to_geojson().await.expect("view");
    assert_eq!(after.features.len(), 2, "one deleted, one added");

    // The earlier snapshot is isolated from the later edits.
    assert_eq!(before.features.len(), 2);
    assert!(before
        .features
        .iter()
        .any(|f| matches!(&f.id, Some(geojson::feature::Id::String(id)) if *id == eid)));
    assert!(!after
        .features
        .iter()
        .any(|f| matches!(&f.id, Some(geojson::feature::Id::String(id)) if *id == eid)));
}
