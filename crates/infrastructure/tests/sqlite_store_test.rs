use chrono::{DateTime, Utc};
use measurement_core::traits::{FieldUpdate, Precondition, TaskStore};
use measurement_core::{
    CreateTaskRequest, MeasurementError, MeasurementResult, Probe, Schedule, TaskMetadata,
    TaskStatus, TaskType,
};
use measurement_infrastructure::SqliteTaskStore;
use tempfile::TempDir;

async fn setup() -> (TempDir, SqliteTaskStore) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("measurement.db");
    let store = SqliteTaskStore::new_embedded(path.to_str().unwrap())
        .await
        .unwrap();
    (dir, store)
}

fn at(rfc3339: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(rfc3339)
        .unwrap()
        .with_timezone(&Utc)
}

fn recurring_task(id: &str) -> TaskMetadata {
    TaskMetadata::from_request(
        id,
        CreateTaskRequest {
            vantage_points: vec!["us".to_string(), "eu".to_string()],
            probe: Probe::Httpstat,
            arguments: "https://example.com".to_string(),
            schedule: Schedule {
                start_time: Some(at("2030-01-01T00:00:00Z")),
                stop_time: Some(at("2030-01-02T00:00:00Z")),
                cron_expression: "*/10 * * * *".to_string(),
            },
        },
    )
}

fn result(region: &str, sequence: u64) -> MeasurementResult {
    MeasurementResult {
        measurement_start_time: Utc::now(),
        measurement_stop_time: Utc::now(),
        region: region.to_string(),
        sequence,
        result: format!("DNS lookup: {sequence} ms"),
    }
}

#[tokio::test]
async fn test_task_round_trip() {
    let (_dir, store) = setup().await;
    let task = recurring_task("abc");

    store.create(&task).await.unwrap();
    let loaded = store.get("abc").await.unwrap().unwrap();

    assert_eq!(loaded, task);
    assert_eq!(loaded.task_type, TaskType::RecurringScheduled);
    assert_eq!(loaded.vantage_points, vec!["us", "eu"]);
    assert!(store.exists("abc").await.unwrap());
    assert!(store.get("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn test_create_conflict() {
    let (_dir, store) = setup().await;
    store.create(&recurring_task("abc")).await.unwrap();
    assert!(matches!(
        store.create(&recurring_task("abc")).await,
        Err(MeasurementError::Conflict(_))
    ));
}

#[tokio::test]
async fn test_status_precondition() {
    let (_dir, store) = setup().await;
    store.create(&recurring_task("abc")).await.unwrap();
    let now = at("2030-01-01T00:00:05.250Z");

    let started = store
        .update_fields_if(
            "abc",
            &Precondition::StatusIn(vec![TaskStatus::Scheduled]),
            &[
                FieldUpdate::StartTime(now),
                FieldUpdate::Status(TaskStatus::Running),
            ],
        )
        .await
        .unwrap();
    assert!(started);

    let finalized_twice = store
        .update_fields_if(
            "abc",
            &Precondition::StatusIn(vec![TaskStatus::Scheduled]),
            &[FieldUpdate::Status(TaskStatus::Failed)],
        )
        .await
        .unwrap();
    assert!(!finalized_twice);

    let loaded = store.get("abc").await.unwrap().unwrap();
    assert_eq!(loaded.status, TaskStatus::Running);
    assert_eq!(loaded.schedule.start_time, Some(now));

    assert!(matches!(
        store
            .update_fields_if(
                "missing",
                &Precondition::StatusIn(vec![TaskStatus::Running]),
                &[FieldUpdate::Status(TaskStatus::Finished)],
            )
            .await,
        Err(MeasurementError::TaskNotFound { .. })
    ));
}

#[tokio::test]
async fn test_sequence_only_rises() {
    let (_dir, store) = setup().await;
    store.create(&recurring_task("abc")).await.unwrap();

    let raise = |value: u64| {
        (
            Precondition::SequenceBelow {
                region: "us".to_string(),
                value,
            },
            [FieldUpdate::Sequence {
                region: "us".to_string(),
                value,
            }],
        )
    };

    let (cond, updates) = raise(2);
    assert!(store.update_fields_if("abc", &cond, &updates).await.unwrap());
    let (cond, updates) = raise(1);
    assert!(!store.update_fields_if("abc", &cond, &updates).await.unwrap());

    let loaded = store.get("abc").await.unwrap().unwrap();
    assert_eq!(loaded.sequence_of("us"), 2);
    assert_eq!(loaded.sequence_of("eu"), 0);
}

#[tokio::test]
async fn test_unconditional_update() {
    let (_dir, store) = setup().await;
    store.create(&recurring_task("abc")).await.unwrap();
    let stop = at("2030-01-01T12:30:00Z");

    store
        .update_fields(
            "abc",
            &[
                FieldUpdate::StopTime(stop),
                FieldUpdate::Status(TaskStatus::Cancelled),
            ],
        )
        .await
        .unwrap();
    let loaded = store.get("abc").await.unwrap().unwrap();
    assert_eq!(loaded.status, TaskStatus::Cancelled);
    assert_eq!(loaded.schedule.stop_time, Some(stop));

    assert!(matches!(
        store.update_fields("missing", &[]).await,
        Err(MeasurementError::TaskNotFound { .. })
    ));
}

#[tokio::test]
async fn test_results_create_only_and_ordered() {
    let (_dir, store) = setup().await;
    store.create(&recurring_task("abc")).await.unwrap();

    for sequence in [2, 1, 3] {
        store.insert_result("abc", &result("us", sequence)).await.unwrap();
    }
    store.insert_result("abc", &result("eu", 1)).await.unwrap();
    assert!(matches!(
        store.insert_result("abc", &result("us", 2)).await,
        Err(MeasurementError::Conflict(_))
    ));

    assert_eq!(store.list_regions("abc").await.unwrap(), vec!["eu", "us"]);
    let us = store.list_results("abc", "us").await.unwrap();
    assert_eq!(
        us.iter().map(|r| r.sequence).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    assert_eq!(us[0].result, "DNS lookup: 1 ms");
    assert!(store.list_regions("other").await.unwrap().is_empty());
}
