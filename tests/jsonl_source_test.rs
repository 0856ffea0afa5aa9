//! The ongoing source following a JSON-lines store written by a separate producer.

use chrono::Utc;
use daq_actions::core::{DataPoint, DataStore};
use daq_actions::pipeline::{OngoingSource, RunContext, SourceOptions, Wakeup};
use daq_actions::store::JsonlStore;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use tokio::time::timeout;
use uuid::Uuid;

fn reading(value: f64) -> DataPoint {
    DataPoint::new("Temperature", Some(json!(value)), Uuid::nil(), Utc::now())
}

fn fast_options(historical: bool) -> SourceOptions {
    SourceOptions {
        historical,
        min_cycle: Duration::from_millis(50),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_source_follows_rows_from_another_writer() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("datapoints.jsonl");

    let producer = JsonlStore::open(&path).await.unwrap();
    producer.insert(&reading(17.0)).await.unwrap();
    producer.insert(&reading(18.0)).await.unwrap();
    producer.commit().await.unwrap();

    let store = Arc::new(JsonlStore::open(&path).await.unwrap());
    let (context, feedback) = RunContext::new(store);
    let mut source = OngoingSource::open(&context, feedback, fast_options(true))
        .await
        .unwrap();

    for expected in [17.0, 18.0] {
        let point = timeout(Duration::from_secs(5), source.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(point.data, Some(json!(expected)));
    }

    producer.insert(&reading(19.0)).await.unwrap();
    producer.commit().await.unwrap();

    let point = timeout(Duration::from_secs(5), source.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(point.data, Some(json!(19.0)));
    assert_eq!(point.id, Some(3));
    assert_eq!(source.watermark(), 3);
}

#[tokio::test]
async fn test_live_source_starts_after_existing_rows() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("datapoints.jsonl");

    let producer = JsonlStore::open(&path).await.unwrap();
    for value in [1.0, 2.0, 3.0] {
        producer.insert(&reading(value)).await.unwrap();
    }

    let store = Arc::new(JsonlStore::open(&path).await.unwrap());
    let (context, feedback) = RunContext::new(store);
    let mut source = OngoingSource::open(&context, feedback, fast_options(false))
        .await
        .unwrap();
    assert_eq!(source.watermark(), 3);

    producer.insert(&reading(4.0)).await.unwrap();
    let point = timeout(Duration::from_secs(5), source.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(point.data, Some(json!(4.0)));
}

#[tokio::test]
async fn test_refed_point_is_yielded_without_a_new_row() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("datapoints.jsonl");

    let store = Arc::new(JsonlStore::open(&path).await.unwrap());
    let (context, feedback) = RunContext::new(store);
    let mut source = OngoingSource::open(&context, feedback, fast_options(false))
        .await
        .unwrap();

    let refed = DataPoint::new("TemperatureBelow18", Some(json!(true)), Uuid::nil(), Utc::now());
    assert!(context.feedback().unwrap().send(refed.clone()));

    let point = timeout(Duration::from_secs(5), source.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(point, refed);
    assert_eq!(source.watermark(), 0);
}

#[tokio::test]
async fn test_notify_mode_wakes_on_insert_through_same_store() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("datapoints.jsonl");

    let store = Arc::new(JsonlStore::open(&path).await.unwrap());
    let (context, feedback) = RunContext::new(store.clone());
    let options = SourceOptions {
        wakeup: Wakeup::Notify {
            recheck: Duration::from_millis(100),
        },
        ..Default::default()
    };
    let mut source = OngoingSource::open(&context, feedback, options)
        .await
        .unwrap();

    let saver = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        store.insert(&reading(16.5)).await.unwrap()
    });

    let point = timeout(Duration::from_secs(5), source.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(point.data, Some(json!(16.5)));
    assert_eq!(Some(saver.await.unwrap()), point.id);
}
