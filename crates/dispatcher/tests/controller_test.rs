use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use measurement_core::models::{MeasurementResult, Probe, Schedule, TaskType};
use measurement_core::traits::TaskStore;
use measurement_core::{CreateTaskRequest, ErrorKind, MeasurementError, TaskStatus};
use measurement_dispatcher::{
    reaper_channel, DetachedFailureReceiver, DispatchSettings, Dispatcher, RandomTaskIdGenerator,
    ResultsView, TaskController, TaskIdGenerator,
};
use measurement_testing_utils::{
    MockAgentInvoker, MockJobScheduler, MockServiceResolver, MockTaskStore, MockTokenProvider,
    TaskBuilder,
};

/// 按顺序返回预设ID，用完后重复最后一个
struct ScriptedIds(Mutex<Vec<String>>);

impl ScriptedIds {
    fn new(ids: &[&str]) -> Self {
        Self(Mutex::new(ids.iter().rev().map(|s| s.to_string()).collect()))
    }
}

impl TaskIdGenerator for ScriptedIds {
    fn generate(&self) -> String {
        let mut ids = self.0.lock().unwrap();
        if ids.len() > 1 {
            ids.pop().unwrap()
        } else {
            ids[0].clone()
        }
    }
}

struct Harness {
    store: MockTaskStore,
    scheduler: MockJobScheduler,
    resolver: MockServiceResolver,
    invoker: MockAgentInvoker,
    failures: DetachedFailureReceiver,
    controller: TaskController,
}

fn harness_with(ids: Arc<dyn TaskIdGenerator>, store: MockTaskStore) -> Harness {
    let scheduler = MockJobScheduler::new();
    let resolver = MockServiceResolver::new();
    let invoker = MockAgentInvoker::new();
    let (failure_tx, failures) = reaper_channel();
    let dispatcher = Dispatcher::new(
        Arc::new(resolver.clone()),
        Arc::new(MockTokenProvider::new()),
        Arc::new(scheduler.clone()),
        Arc::new(invoker.clone()),
        DispatchSettings::new("netlab", "deployer@netlab.iam.gserviceaccount.com"),
        failure_tx,
    );
    let controller = TaskController::new(Arc::new(store.clone()), dispatcher, ids);
    Harness {
        store,
        scheduler,
        resolver,
        invoker,
        failures,
        controller,
    }
}

fn harness() -> Harness {
    harness_with(Arc::new(RandomTaskIdGenerator), MockTaskStore::new())
}

fn request(regions: &[&str], schedule: Schedule) -> CreateTaskRequest {
    CreateTaskRequest {
        vantage_points: regions.iter().map(|r| r.to_string()).collect(),
        probe: Probe::Ping,
        arguments: "8.8.8.8".to_string(),
        schedule,
    }
}

fn recurring_schedule() -> Schedule {
    Schedule {
        start_time: Some(Utc::now() + chrono::Duration::minutes(10)),
        stop_time: Some(Utc::now() + chrono::Duration::hours(2)),
        cron_expression: "*/5 * * * *".to_string(),
    }
}

async fn wait_for_invocations(invoker: &MockAgentInvoker, expected: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while invoker.invocations().len() < expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("detached invocations did not arrive");
}

#[tokio::test]
async fn test_create_one_off_asap_invokes_every_region() {
    let h = harness();
    let created = h
        .controller
        .create_task(request(&["us", "eu"], Schedule::default()), Some("abc123/1;o=1"))
        .await
        .unwrap();
    assert!(created.warnings.is_empty());

    let task = h.store.task(&created.id).unwrap();
    assert_eq!(task.task_type, TaskType::OneOffAsap);
    assert_eq!(task.status, TaskStatus::Scheduled);
    assert_eq!(task.sequence_of("us"), 0);
    assert_eq!(task.sequence_of("eu"), 0);

    wait_for_invocations(&h.invoker, 2).await;
    let mut invocations = h.invoker.invocations();
    invocations.sort_by(|a, b| a.region.cmp(&b.region));
    assert_eq!(invocations[1].region, "us");
    assert_eq!(
        invocations[1].url,
        "https://us.measurer.test/api/v1/measurements"
    );
    assert_eq!(
        invocations[1].bearer_token.as_deref(),
        Some("id-token:https://us.measurer.test")
    );
    assert_eq!(invocations[1].trace_context.as_deref(), Some("abc123/1;o=1"));
    assert_eq!(invocations[1].task_id, created.id);
    assert!(h.scheduler.created_jobs().is_empty());
}

#[tokio::test]
async fn test_create_recurring_registers_jobs() {
    let h = harness();
    let created = h
        .controller
        .create_task(request(&["us-central1", "europe-west1"], recurring_schedule()), None)
        .await
        .unwrap();

    let mut jobs = h.scheduler.created_jobs();
    jobs.sort_by(|a, b| a.name.cmp(&b.name));
    assert_eq!(jobs.len(), 2);

    let job = &jobs[1];
    assert_eq!(
        job.name,
        format!("projects/netlab/locations/us-central1/jobs/{}", created.id)
    );
    assert_eq!(job.schedule, "*/5 * * * *");
    assert_eq!(job.time_zone, "UTC");
    assert_eq!(job.attempt_deadline, Duration::from_secs(180));
    assert_eq!(job.retry_policy.retry_count, 0);
    assert_eq!(job.http_target.http_method, "POST");
    assert_eq!(
        job.http_target.uri,
        "https://us-central1.measurer.test/api/v1/measurements"
    );
    assert_eq!(job.http_target.body, format!("{{\"id\":\"{}\"}}", created.id));
    let oidc = job.http_target.oidc_token.as_ref().unwrap();
    assert_eq!(oidc.audience, "https://us-central1.measurer.test");
    assert_eq!(oidc.service_account_email, "deployer@netlab.iam.gserviceaccount.com");

    let task = h.store.task(&created.id).unwrap();
    assert_eq!(task.task_type, TaskType::RecurringScheduled);
    assert!(h.invoker.invocations().is_empty());
}

#[tokio::test]
async fn test_partial_dispatch_failure_is_a_warning() {
    let h = harness();
    h.resolver.fail_region("ap");
    let created = h
        .controller
        .create_task(request(&["us", "eu", "ap"], recurring_schedule()), None)
        .await
        .unwrap();

    assert_eq!(created.warnings.len(), 1);
    assert_eq!(created.warnings[0].region, "ap");
    assert_eq!(h.scheduler.created_jobs().len(), 2);

    let task = h.store.task(&created.id).unwrap();
    assert_eq!(task.status, TaskStatus::Scheduled);
    assert_eq!(task.sequence_of("ap"), 0);
}

#[tokio::test]
async fn test_total_dispatch_failure_marks_task_failed() {
    let h = harness();
    h.scheduler.fail_region("us");
    h.scheduler.fail_region("eu");
    let err = h
        .controller
        .create_task(request(&["us", "eu"], recurring_schedule()), None)
        .await
        .unwrap_err();

    match err {
        MeasurementError::DispatchFailed { id, errors } => {
            assert_eq!(errors.len(), 2);
            assert_eq!(h.store.task(&id).unwrap().status, TaskStatus::Failed);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_detached_invocation_failure_reaches_reaper() {
    let mut h = harness();
    h.invoker.fail_region("eu");
    let created = h
        .controller
        .create_task(request(&["us", "eu"], Schedule::default()), None)
        .await
        .unwrap();
    // 异步调用失败不影响创建结果
    assert!(created.warnings.is_empty());

    let failure = tokio::time::timeout(Duration::from_secs(5), h.failures.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(failure.region, "eu");
    assert_eq!(failure.task_id, created.id);
}

#[tokio::test]
async fn test_httpstat_rejects_non_http_arguments_before_dispatch() {
    let h = harness();
    let mut req = request(&["us"], Schedule::default());
    req.probe = Probe::Httpstat;
    req.arguments = "ftp://x".to_string();

    let err = h.controller.create_task(req, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(h.store.count(), 0);
    assert!(h.invoker.invocations().is_empty());
}

#[tokio::test]
async fn test_id_collision_retries_then_exhausts() {
    let store = MockTaskStore::with_tasks(vec![TaskBuilder::new("taken").build()]);
    let h = harness_with(Arc::new(ScriptedIds::new(&["taken", "taken", "fresh"])), store);
    let created = h
        .controller
        .create_task(request(&["us"], recurring_schedule()), None)
        .await
        .unwrap();
    assert_eq!(created.id, "fresh");

    let store = MockTaskStore::with_tasks(vec![TaskBuilder::new("taken").build()]);
    let h = harness_with(Arc::new(ScriptedIds::new(&["taken"])), store);
    let err = h
        .controller
        .create_task(request(&["us"], recurring_schedule()), None)
        .await
        .unwrap_err();
    assert!(matches!(err, MeasurementError::IdExhausted { attempts: 10 }));
    assert_eq!(h.store.count(), 1);
}

#[tokio::test]
async fn test_cancel_preconditions() {
    let now = Utc::now();
    let mut tasks = Vec::new();
    for (id, status) in [
        ("finished", TaskStatus::Finished),
        ("cancelled", TaskStatus::Cancelled),
        ("failed", TaskStatus::Failed),
    ] {
        tasks.push(
            TaskBuilder::new(id)
                .with_window(Some(now), None)
                .with_status(status)
                .build(),
        );
    }
    tasks.push(TaskBuilder::new("asap").build());
    let h = harness_with(Arc::new(RandomTaskIdGenerator), MockTaskStore::with_tasks(tasks));

    for id in ["finished", "cancelled", "failed", "asap"] {
        let err = h.controller.cancel_task(id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState, "{id}");
    }
    assert!(h.scheduler.deleted_jobs().is_empty());

    let err = h.controller.cancel_task("missing").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_cancel_deletes_every_region_job() {
    let now = Utc::now();
    for status in [TaskStatus::Scheduled, TaskStatus::Running] {
        let task = TaskBuilder::new("t1")
            .with_vantage_points(&["us", "eu"])
            .with_window(None, Some(now + chrono::Duration::hours(1)))
            .with_status(status)
            .build();
        let h = harness_with(
            Arc::new(RandomTaskIdGenerator),
            MockTaskStore::with_tasks(vec![task]),
        );
        h.scheduler.seed_job("projects/netlab/locations/us/jobs/t1");

        h.controller.cancel_task("t1").await.unwrap();

        let mut deleted = h.scheduler.deleted_jobs();
        deleted.sort();
        assert_eq!(
            deleted,
            vec![
                "projects/netlab/locations/eu/jobs/t1".to_string(),
                "projects/netlab/locations/us/jobs/t1".to_string(),
            ]
        );
        assert_eq!(h.store.task("t1").unwrap().status, TaskStatus::Cancelled);
    }
}

#[tokio::test]
async fn test_cancel_is_all_or_nothing() {
    let task = TaskBuilder::new("t2")
        .with_vantage_points(&["us", "eu", "ap"])
        .with_window(Some(Utc::now()), None)
        .with_status(TaskStatus::Running)
        .build();
    let h = harness_with(Arc::new(RandomTaskIdGenerator), MockTaskStore::with_tasks(vec![task]));
    h.scheduler.fail_region("eu");

    let err = h.controller.cancel_task("t2").await.unwrap_err();
    match err {
        MeasurementError::PartialFailure { errors } => {
            assert_eq!(errors.len(), 1);
            assert_eq!(errors[0].region, "eu");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    // 其他区域仍然各自尝试了删除
    assert_eq!(h.scheduler.deleted_jobs().len(), 2);
    assert_eq!(h.store.task("t2").unwrap().status, TaskStatus::Running);
}

#[tokio::test]
async fn test_status_lookup() {
    let task = TaskBuilder::new("t3").with_status(TaskStatus::Running).build();
    let h = harness_with(Arc::new(RandomTaskIdGenerator), MockTaskStore::with_tasks(vec![task]));
    assert_eq!(h.controller.task_status("t3").await.unwrap(), TaskStatus::Running);
    assert_eq!(
        h.controller.task_status("nope").await.unwrap_err().kind(),
        ErrorKind::NotFound
    );
}

#[tokio::test]
async fn test_results_grouped_by_region_and_sequence() {
    let scheduled = TaskBuilder::new("pending").build();
    let running = TaskBuilder::new("t4")
        .with_vantage_points(&["us", "eu"])
        .with_status(TaskStatus::Running)
        .with_sequence("us", 2)
        .build();
    let store = MockTaskStore::with_tasks(vec![scheduled, running]);
    let now = Utc::now();
    for (region, sequence) in [("us", 1), ("us", 2), ("eu", 1)] {
        store
            .insert_result(
                "t4",
                &MeasurementResult {
                    measurement_start_time: now,
                    measurement_stop_time: now,
                    region: region.to_string(),
                    sequence,
                    result: format!("{region}-{sequence}"),
                },
            )
            .await
            .unwrap();
    }
    let h = harness_with(Arc::new(RandomTaskIdGenerator), store);

    assert!(matches!(
        h.controller.task_results("pending").await.unwrap(),
        ResultsView::NotReady
    ));

    match h.controller.task_results("t4").await.unwrap() {
        ResultsView::Ready(view) => {
            assert_eq!(view.metadata.id, "t4");
            assert_eq!(view.total_results(), 3);
            assert_eq!(view.results["us"][&2u64].result, "us-2");
            assert_eq!(view.results["eu"][&1u64].result, "eu-1");
            let json = serde_json::to_value(&view).unwrap();
            assert_eq!(json["id"], "t4");
            assert_eq!(json["results"]["us"]["1"]["result"], "us-1");
        }
        ResultsView::NotReady => panic!("results should be ready"),
    }

    h.store.fail_on("list_results");
    let err = h.controller.task_results("t4").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Dependency);

    assert_eq!(
        h.controller.task_results("missing").await.unwrap_err().kind(),
        ErrorKind::NotFound
    );
}
