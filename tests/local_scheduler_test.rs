use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use measurement_api::{create_app, AppState};
use measurement_core::config::{ApiConfig, ObservabilityConfig};
use measurement_core::traits::{FieldUpdate, Precondition, TaskStore};
use measurement_core::{
    CreateTaskRequest, MeasurementResult, Probe, Result, Schedule, TaskMetadata, TaskStatus,
    TaskType,
};
use measurement_dispatcher::{reaper_channel, DispatchSettings, Dispatcher};
use measurement_infrastructure::{
    HttpAgentInvoker, InMemoryTaskStore, LocalJobScheduler, StaticServiceResolver,
    StaticTokenProvider,
};
use measurement_worker::{
    AgentSettings, CompletionTracker, MeasurementAgent, ProbeExecutor, ProbeRegistry,
};

/// 条件更新前等待一段时间，放大作业删除与收尾之间的时间窗口
struct DelayedStore {
    inner: InMemoryTaskStore,
}

#[async_trait]
impl TaskStore for DelayedStore {
    async fn get(&self, id: &str) -> Result<Option<TaskMetadata>> {
        self.inner.get(id).await
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        self.inner.exists(id).await
    }

    async fn create(&self, task: &TaskMetadata) -> Result<()> {
        self.inner.create(task).await
    }

    async fn update_fields(&self, id: &str, updates: &[FieldUpdate]) -> Result<()> {
        self.inner.update_fields(id, updates).await
    }

    async fn update_fields_if(
        &self,
        id: &str,
        precondition: &Precondition,
        updates: &[FieldUpdate],
    ) -> Result<bool> {
        tokio::time::sleep(Duration::from_millis(300)).await;
        self.inner.update_fields_if(id, precondition, updates).await
    }

    async fn list_regions(&self, id: &str) -> Result<Vec<String>> {
        self.inner.list_regions(id).await
    }

    async fn list_results(&self, id: &str, region: &str) -> Result<Vec<MeasurementResult>> {
        self.inner.list_results(id, region).await
    }

    async fn insert_result(&self, id: &str, result: &MeasurementResult) -> Result<()> {
        self.inner.insert_result(id, result).await
    }
}

struct EchoProbe;

#[async_trait]
impl ProbeExecutor for EchoProbe {
    async fn execute(&self, arguments: &str) -> Result<String> {
        Ok(arguments.to_string())
    }

    fn name(&self) -> &str {
        "echo"
    }
}

/// 本地调度的一次性任务：执行端删除自己的作业后，该次调用仍然完成收尾
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_scheduled_one_off_finishes_through_local_scheduler() {
    let store: Arc<dyn TaskStore> = Arc::new(DelayedStore {
        inner: InMemoryTaskStore::new(),
    });
    let http_client = reqwest::Client::new();
    let scheduler = Arc::new(LocalJobScheduler::new(
        Arc::new(StaticTokenProvider::none()),
        http_client.clone(),
    ));

    let mut probes = ProbeRegistry::new();
    probes.register(Probe::Ping, Arc::new(EchoProbe));
    let agent = MeasurementAgent::new(
        store.clone(),
        probes,
        CompletionTracker::new(store.clone(), scheduler.clone(), "netlab", "local"),
        AgentSettings {
            region: "local".to_string(),
            max_sequence_attempts: 3,
        },
    );
    let router = create_app(
        AppState::new("netlab", "agent").with_agent(agent),
        &ApiConfig::default(),
        &ObservabilityConfig::default(),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, router).await });

    let task = TaskMetadata::from_request(
        "local-once",
        CreateTaskRequest {
            vantage_points: vec!["local".to_string()],
            probe: Probe::Ping,
            arguments: "8.8.8.8".to_string(),
            schedule: Schedule {
                start_time: Some(Utc::now() - chrono::Duration::seconds(1)),
                stop_time: None,
                cron_expression: "* * * * *".to_string(),
            },
        },
    );
    assert_eq!(task.task_type, TaskType::OneOffScheduled);
    store.create(&task).await.unwrap();

    let (failure_tx, _failures) = reaper_channel();
    let dispatcher = Dispatcher::new(
        Arc::new(StaticServiceResolver::new(
            HashMap::new(),
            Some(format!("http://{addr}")),
        )),
        Arc::new(StaticTokenProvider::none()),
        scheduler.clone(),
        Arc::new(HttpAgentInvoker::new(http_client)),
        DispatchSettings::new("netlab", "deployer@netlab.iam.gserviceaccount.com"),
        failure_tx,
    );
    let outcome = dispatcher.dispatch(&task, None).await;
    assert!(outcome.errors.is_empty());
    assert_eq!(scheduler.job_names().await.len(), 1);

    // 作业按分钟触发
    let mut current = task.clone();
    for _ in 0..150 {
        current = store.get("local-once").await.unwrap().unwrap();
        if current.status == TaskStatus::Finished {
            break;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    assert_eq!(current.status, TaskStatus::Finished);
    assert_eq!(current.sequence_of("local"), 1);
    assert!(current.schedule.stop_time.is_some());
    assert!(scheduler.job_names().await.is_empty());
}
